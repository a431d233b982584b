use crate::{
    module::{MemberReference, ModuleReference, SymbolReference, TypeReference},
    rewrite::{
        HandlerCapabilities, HandlerMode, HandlerResult, InstructionHandler, RewriteContext, Stage,
    },
    symbols::Classification,
    Result,
};

/// Reports references into trusted modules that still do not resolve after the rewrite stages.
///
/// References a detect-only handler already claimed are skipped; their finding is already in the
/// report.
#[derive(Default)]
pub struct ReferenceClassifier;

impl ReferenceClassifier {
    /// The classifier.
    #[must_use]
    pub fn new() -> Self {
        ReferenceClassifier
    }

    fn classify(ctx: &RewriteContext<'_>, reference: SymbolReference) -> HandlerResult {
        if ctx.is_claimed(reference.token()) {
            return HandlerResult::Unhandled;
        }
        match ctx.resources.universe.classify(&reference) {
            Classification::Missing(reason) => HandlerResult::DetectedBroken(reason),
            Classification::Mismatch(reason) => HandlerResult::DetectedIncompatible(reason),
            Classification::Unchecked | Classification::Resolved => HandlerResult::Unhandled,
        }
    }
}

impl InstructionHandler for ReferenceClassifier {
    fn name(&self) -> &'static str {
        "classifier"
    }

    fn phrase(&self) -> &'static str {
        "checks references against the trusted modules"
    }

    fn capabilities(&self) -> HandlerCapabilities {
        HandlerCapabilities::all()
    }

    fn stage(&self) -> Stage {
        Stage::Detection
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::DetectOnly
    }

    fn handle_module_ref(
        &self,
        ctx: &mut RewriteContext<'_>,
        module_ref: &ModuleReference,
    ) -> Result<HandlerResult> {
        Ok(Self::classify(ctx, SymbolReference::Module(module_ref.clone())))
    }

    fn handle_type(
        &self,
        ctx: &mut RewriteContext<'_>,
        type_ref: &TypeReference,
    ) -> Result<HandlerResult> {
        Ok(Self::classify(ctx, SymbolReference::Type(type_ref.clone())))
    }

    fn handle_member(
        &self,
        ctx: &mut RewriteContext<'_>,
        member: &MemberReference,
    ) -> Result<HandlerResult> {
        let reference = if member.is_field() {
            SymbolReference::Field(member.clone())
        } else {
            SymbolReference::Method(member.clone())
        };
        Ok(Self::classify(ctx, reference))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        module::{Module, TableId, Token},
        rewrite::{RewriteConfig, SharedResources},
        symbols::SymbolUniverse,
        test::{build_host_v2, build_legacy_plugin, build_plugin},
    };

    fn classify_all(module: &mut Module, claim: Option<Token>) -> Vec<String> {
        let mut universe = SymbolUniverse::new(["Host"]);
        universe.add_module(Arc::new(build_host_v2())).unwrap();
        let resources = SharedResources {
            universe,
            ..SharedResources::default()
        };
        let config = RewriteConfig::default();
        let classifier = ReferenceClassifier::new();
        let mut ctx = RewriteContext::new(module, &resources, &config);
        if let Some(token) = claim {
            ctx.would(token, "fix it");
        }

        let mut findings = Vec::new();
        for reference in ctx.module.enumerate_references() {
            ctx.begin(HandlerMode::DetectOnly);
            let result = match &reference {
                SymbolReference::Module(module_ref) => {
                    classifier.handle_module_ref(&mut ctx, module_ref)
                }
                SymbolReference::Type(type_ref) => classifier.handle_type(&mut ctx, type_ref),
                SymbolReference::Field(member) | SymbolReference::Method(member) => {
                    classifier.handle_member(&mut ctx, member)
                }
            }
            .unwrap();
            if result != HandlerResult::Unhandled {
                findings.push(format!("{result} {reference}"));
            }
        }
        findings
    }

    #[test]
    fn resolved_references_are_quiet() {
        assert!(classify_all(&mut build_plugin(), None).is_empty());
    }

    #[test]
    fn legacy_references_are_classified() {
        let findings = classify_all(&mut build_legacy_plugin(), None);
        assert!(findings.contains(&"broken [Host]Game.Ghost".to_string()));
        assert!(findings.contains(&"broken [Host]Game.Player::Health".to_string()));
        assert!(findings.contains(&"incompatible [Host]Game.Player::Damage(System.Int32)".to_string()));
        assert!(!findings.iter().any(|finding| finding.contains("[Host 1.0.0.0]")));
    }

    #[test]
    fn claimed_references_are_skipped() {
        let mut plugin = build_legacy_plugin();
        let health = plugin
            .enumerate_references()
            .into_iter()
            .find(|reference| reference.to_string() == "[Host]Game.Player::Health")
            .unwrap()
            .token();
        assert_eq!(health.table_id(), Some(TableId::MemberRef));

        let findings = classify_all(&mut plugin, Some(health));
        assert!(!findings.iter().any(|finding| finding.ends_with("Game.Player::Health")));
    }
}
