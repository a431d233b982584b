use log::{debug, info};

use crate::{
    module::{
        MemberReference, ReferenceRow, SymbolReference, TableId, Token, TypeRef, TypeReference,
    },
    platform::TargetModule,
    rewrite::{
        HandlerCapabilities, HandlerMode, HandlerResult, InstructionHandler, RewriteContext, Stage,
    },
    Result,
};

/// Redirects references to retired platform modules onto the configured targets.
///
/// Type references move to the lowest target version that declares the type. Member references
/// are only checked: a member the chosen target does not declare is reported as broken. Retired
/// module references nobody uses any more are removed at the end of the pass.
pub struct PlatformHandler {
    mode: HandlerMode,
}

impl PlatformHandler {
    /// A handler in `mode`.
    #[must_use]
    pub fn new(mode: HandlerMode) -> Self {
        PlatformHandler { mode }
    }
}

impl InstructionHandler for PlatformHandler {
    fn name(&self) -> &'static str {
        "platform"
    }

    fn phrase(&self) -> &'static str {
        "redirects retired platform modules"
    }

    fn capabilities(&self) -> HandlerCapabilities {
        HandlerCapabilities::TYPE_REFERENCE | HandlerCapabilities::MEMBER_REFERENCE
    }

    fn stage(&self) -> Stage {
        Stage::PlatformRemap
    }

    fn mode(&self) -> HandlerMode {
        self.mode
    }

    fn handle_type(
        &self,
        ctx: &mut RewriteContext<'_>,
        type_ref: &TypeReference,
    ) -> Result<HandlerResult> {
        let resources = ctx.resources;
        let Some(platform) = resources.platform.as_ref() else {
            return Ok(HandlerResult::Unhandled);
        };
        let Some(retired) = type_ref.module.as_deref() else {
            return Ok(HandlerResult::Unhandled);
        };
        if !platform.is_stripped(retired) {
            return Ok(HandlerResult::Unhandled);
        }

        let full = type_ref.full_name();
        let required = type_ref.module_version.unwrap_or_default();
        let Some(target) = platform.select(&full, &required) else {
            return Ok(HandlerResult::DetectedBroken(format!(
                "no {} target declares {} at {} or later",
                platform.platform(),
                full,
                required
            )));
        };
        let destination = target.reference();

        if !ctx.rewriting() {
            return Ok(ctx.would(
                type_ref.token,
                format!(
                    "move {} from {} to {} {}",
                    full, retired, destination.name, destination.version
                ),
            ));
        }

        let scope = ctx
            .module
            .intern_module_ref(&destination.name, destination.version);
        ctx.module.replace_reference(
            &SymbolReference::Type(type_ref.clone()),
            ReferenceRow::Type(TypeRef {
                scope,
                namespace: type_ref.namespace.clone(),
                name: type_ref.name.clone(),
            }),
        )?;
        info!(
            "'{}': {} moved from {} to {} {}",
            ctx.module.name, full, retired, destination.name, destination.version
        );
        Ok(ctx.rewritten(format!(
            "moved from {} to {} {}",
            retired, destination.name, destination.version
        )))
    }

    fn handle_member(
        &self,
        ctx: &mut RewriteContext<'_>,
        member: &MemberReference,
    ) -> Result<HandlerResult> {
        let resources = ctx.resources;
        let Some(platform) = resources.platform.as_ref() else {
            return Ok(HandlerResult::Unhandled);
        };
        let Some(scope) = ctx.module.declaring_module(member.parent) else {
            return Ok(HandlerResult::Unhandled);
        };

        let target: Option<&TargetModule> = if platform.is_stripped(&scope.name) {
            platform.select(&member.declaring_type, &scope.version)
        } else if platform.is_target(&scope.name) {
            platform.target(&scope.name, &scope.version)
        } else {
            return Ok(HandlerResult::Unhandled);
        };
        let Some(target) = target else {
            return Ok(HandlerResult::DetectedBroken(format!(
                "no {} target provides {} for {} {}",
                platform.platform(),
                member.declaring_type,
                scope.name,
                scope.version
            )));
        };

        if target.declares_member(&member.declaring_type, &member.name, &member.shape) {
            return Ok(HandlerResult::Unhandled);
        }
        let reference = target.reference();
        Ok(HandlerResult::DetectedBroken(format!(
            "{} {} does not declare {}",
            reference.name,
            reference.version,
            member.key()
        )))
    }

    fn finalize(&self, ctx: &mut RewriteContext<'_>) -> Result<()> {
        let resources = ctx.resources;
        let Some(platform) = resources.platform.as_ref() else {
            return Ok(());
        };
        if !ctx.rewriting() {
            return Ok(());
        }

        for index in (0..ctx.module.module_refs.len()).rev() {
            let token = Token::from_index(TableId::ModuleRef, index);
            if !platform.is_stripped(&ctx.module.module_refs[index].name)
                || ctx.module.is_module_ref_used(token)
            {
                continue;
            }
            debug!(
                "'{}': dropping retired module reference {}",
                ctx.module.name, ctx.module.module_refs[index].name
            );
            ctx.module.remove_module_ref(token)?;
            ctx.mark_changed();
        }
        Ok(())
    }
}
