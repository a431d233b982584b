//! The ordered handler pipeline.

use log::{debug, info, warn};

use crate::{
    module::{Module, SymbolReference, Token},
    rewrite::{
        handlers::{
            ArchitectureCallback, ArchitectureHandler, FacadeHandler, FieldPropertyHandler,
            OptionalParamsHandler, PlatformHandler, ReferenceClassifier, TypeFinder,
        },
        HandlerCapabilities, HandlerMode, HandlerResult, InstructionHandler, RewriteConfig,
        RewriteContext, RewriteRecord, RewriteReport, SharedResources, Stage,
    },
    Error, Result,
};

/// Handlers in dispatch order.
///
/// Handlers are kept sorted by [`Stage`]; within a stage they run in the order they were added.
pub struct RewritePipeline {
    config: RewriteConfig,
    handlers: Vec<Box<dyn InstructionHandler>>,
}

impl RewritePipeline {
    /// A pipeline without handlers.
    #[must_use]
    pub fn new(config: RewriteConfig) -> Self {
        RewritePipeline {
            config,
            handlers: Vec::new(),
        }
    }

    /// The standard handler set for `config`.
    ///
    /// `on_architecture_fix` is called with the module name whenever the 32-bit requirement is
    /// cleared.
    #[must_use]
    pub fn from_config(config: RewriteConfig, on_architecture_fix: ArchitectureCallback) -> Self {
        let mode = HandlerMode::from_enabled(config.rewrite_enabled);
        let paranoid = config.paranoid_mode;

        RewritePipeline::new(config)
            .handler(Box::new(ArchitectureHandler::new(mode, on_architecture_fix)))
            .handler(Box::new(FieldPropertyHandler::new(mode)))
            .handler(Box::new(OptionalParamsHandler::new(mode)))
            .handler(Box::new(FacadeHandler::new(mode)))
            .handler(Box::new(PlatformHandler::new(mode)))
            .handler(Box::new(ReferenceClassifier::new()))
            .handler(Box::new(TypeFinder::new(paranoid)))
    }

    /// Add a handler after every handler of the same or an earlier stage.
    #[must_use]
    pub fn handler(mut self, handler: Box<dyn InstructionHandler>) -> Self {
        let position = self
            .handlers
            .iter()
            .position(|existing| existing.stage() > handler.stage())
            .unwrap_or(self.handlers.len());
        self.handlers.insert(position, handler);
        self
    }

    /// The configuration the pipeline was built for.
    #[must_use]
    pub fn config(&self) -> &RewriteConfig {
        &self.config
    }

    /// The handlers in dispatch order.
    pub fn handlers(&self) -> impl Iterator<Item = &dyn InstructionHandler> {
        self.handlers.iter().map(AsRef::as_ref)
    }

    /// Run every handler over `module`.
    ///
    /// Expected incompatibilities never fail the pass; they end up in the report. A failing
    /// structural fix, or a rewritten body that no longer verifies, produces a
    /// [`crate::rewrite::Verdict::Fatal`] report.
    ///
    /// # Errors
    /// Returns the error of a non-structural handler, which indicates an inconsistent module.
    pub fn run(&self, module: &mut Module, resources: &SharedResources) -> Result<RewriteReport> {
        let name = module.name.clone();
        let version = module.version;
        let records = boxcar::Vec::new();
        let mut ctx = RewriteContext::new(module, resources, &self.config);

        debug!("Rewriting '{}' {} with {} handlers", name, version, self.handlers.len());

        let fatal = self
            .rewrite_stages(&mut ctx, &records, &name)
            .and_then(|fatal| match fatal {
                Some(reason) => Ok(Some(reason)),
                None => Self::settle(&mut ctx),
            })?;

        if fatal.is_none() {
            self.detection_stage(&mut ctx, &records, &name)?;
        }

        let changed = ctx.structure_changed();
        let report = RewriteReport::new(
            name,
            version,
            records,
            changed,
            fatal,
            self.config.broken_references_are_fatal,
        );

        info!(
            "'{}' {}: {} ({} rewritten, {} findings)",
            report.module(),
            report.version(),
            report.verdict(),
            report.rewritten_count(),
            report.findings().count()
        );
        Ok(report)
    }

    fn rewrite_stages(
        &self,
        ctx: &mut RewriteContext<'_>,
        records: &boxcar::Vec<RewriteRecord>,
        name: &str,
    ) -> Result<Option<String>> {
        let rewriters: Vec<&dyn InstructionHandler> = self
            .handlers()
            .filter(|handler| handler.stage().rewrites())
            .collect();

        for handler in rewriters
            .iter()
            .filter(|handler| handler.capabilities().contains(HandlerCapabilities::MODULE))
        {
            ctx.begin(handler.mode());
            match handler.handle_module(ctx) {
                Ok(result) => record(records, ctx, *handler, name.to_string(), None, result),
                Err(error) if handler.stage() == Stage::StructuralFix => {
                    warn!("'{}': {}", name, error);
                    records.push(RewriteRecord {
                        reference: name.to_string(),
                        kind: None,
                        handler: handler.name(),
                        result: HandlerResult::DetectedIncompatible(error.to_string()),
                        reason: Some(error.to_string()),
                    });
                    return Ok(Some(error.to_string()));
                }
                Err(error) => return Err(error),
            }
        }

        for snapshot in ctx.module.enumerate_references() {
            // Earlier rewrites can change how this row resolves.
            let Some(reference) = ctx.module.resolve_reference(snapshot.token()) else {
                continue;
            };

            for handler in &rewriters {
                if !accepts(*handler, &reference) {
                    continue;
                }
                ctx.begin(handler.mode());
                let result = dispatch(*handler, ctx, &reference)?;
                record(
                    records,
                    ctx,
                    *handler,
                    reference.to_string(),
                    Some(&reference),
                    result,
                );
                if ctx.claimed() {
                    break;
                }
            }
        }

        for handler in &rewriters {
            ctx.begin(handler.mode());
            handler.finalize(ctx)?;
        }
        Ok(None)
    }

    /// Drop retired references and check every edited body.
    fn settle(ctx: &mut RewriteContext<'_>) -> Result<Option<String>> {
        let retired: Vec<Token> = ctx
            .take_retired()
            .into_iter()
            .filter(|token| ctx.module.token_uses(*token).is_empty())
            .collect();
        if !retired.is_empty() {
            debug!("Removing {} retired member references", retired.len());
            ctx.module.remove_member_refs(&retired)?;
            ctx.mark_changed();
        }

        let changed: Vec<(usize, usize)> = ctx.changed_methods().iter().copied().collect();
        for (type_index, method_index) in changed {
            match ctx.module.verify_method(type_index, method_index) {
                Ok(depth) => {
                    if let Some(body) =
                        ctx.module.types[type_index].methods[method_index].body.as_mut()
                    {
                        body.max_stack = body.max_stack.max(depth);
                    }
                }
                Err(error) => {
                    let method = &ctx.module.types[type_index].methods[method_index];
                    return Ok(Some(format!(
                        "rewritten {}::{} does not verify - {}",
                        ctx.module.types[type_index].full_name(),
                        method.name,
                        error
                    )));
                }
            }
        }

        if ctx.structure_changed() {
            if let Err(error) = ctx.module.validate() {
                return Ok(Some(format!("rewritten module is inconsistent - {error}")));
            }
        }
        Ok(None)
    }

    fn detection_stage(
        &self,
        ctx: &mut RewriteContext<'_>,
        records: &boxcar::Vec<RewriteRecord>,
        name: &str,
    ) -> Result<()> {
        let detectors: Vec<&dyn InstructionHandler> = self
            .handlers()
            .filter(|handler| handler.stage() == Stage::Detection)
            .collect();

        for handler in detectors
            .iter()
            .filter(|handler| handler.capabilities().contains(HandlerCapabilities::MODULE))
        {
            ctx.begin(HandlerMode::DetectOnly);
            let result = handler.handle_module(ctx)?;
            record(records, ctx, *handler, name.to_string(), None, result);
        }

        for reference in ctx.module.enumerate_references() {
            for handler in &detectors {
                if !accepts(*handler, &reference) {
                    continue;
                }
                ctx.begin(HandlerMode::DetectOnly);
                let result = dispatch(*handler, ctx, &reference)?;
                record(
                    records,
                    ctx,
                    *handler,
                    reference.to_string(),
                    Some(&reference),
                    result,
                );
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RewritePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.handlers().map(|handler| handler.name()).collect();
        f.debug_struct("RewritePipeline")
            .field("config", &self.config)
            .field("handlers", &names)
            .finish()
    }
}

fn accepts(handler: &dyn InstructionHandler, reference: &SymbolReference) -> bool {
    let needed = match reference {
        SymbolReference::Module(_) => HandlerCapabilities::MODULE,
        SymbolReference::Type(_) => HandlerCapabilities::TYPE_REFERENCE,
        SymbolReference::Field(_) | SymbolReference::Method(_) => {
            HandlerCapabilities::MEMBER_REFERENCE
        }
    };
    handler.capabilities().contains(needed)
}

fn dispatch(
    handler: &dyn InstructionHandler,
    ctx: &mut RewriteContext<'_>,
    reference: &SymbolReference,
) -> Result<HandlerResult> {
    let result = match reference {
        SymbolReference::Module(module) => handler.handle_module_ref(ctx, module),
        SymbolReference::Type(type_ref) => handler.handle_type(ctx, type_ref),
        SymbolReference::Field(member) | SymbolReference::Method(member) => {
            handler.handle_member(ctx, member)
        }
    };

    result.map_err(|error| match error {
        Error::ReferenceNotFound { token, description } => Error::ReferenceNotFound {
            token,
            description: format!("{} ({})", description, handler.name()),
        },
        other => other,
    })
}

fn record(
    records: &boxcar::Vec<RewriteRecord>,
    ctx: &mut RewriteContext<'_>,
    handler: &dyn InstructionHandler,
    display: String,
    reference: Option<&SymbolReference>,
    result: HandlerResult,
) {
    if result == HandlerResult::Unhandled {
        return;
    }

    let reason = result
        .reason()
        .map(str::to_string)
        .or_else(|| ctx.take_action());
    debug!(
        "{}: {} {}{}",
        handler.name(),
        result,
        display,
        reason.as_deref().map(|r| format!(" - {r}")).unwrap_or_default()
    );

    records.push(RewriteRecord {
        reference: display,
        kind: reference.map(SymbolReference::kind),
        handler: handler.name(),
        result,
        reason,
    });
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::{
        facade::FacadeRegistry,
        module::{ModuleFlags, TypeReference},
        rewrite::Verdict,
        symbols::SymbolUniverse,
        test::{build_compat, build_host_v2, build_legacy_plugin, build_plugin},
    };

    fn resources() -> SharedResources {
        let host = Arc::new(build_host_v2());
        let compat = Arc::new(build_compat());
        let mut universe = SymbolUniverse::new(["Host"]);
        universe.add_module(host.clone()).unwrap();
        let facades = FacadeRegistry::builder()
            .module(host)
            .module(compat)
            .map_method("Game.World::Log(System.String)", "Game.World", "Broadcast")
            .map_facade("Game.Legacy", "Compat.LegacyFacade")
            .build()
            .unwrap();

        SharedResources {
            universe,
            facades,
            platform: None,
        }
    }

    fn pipeline(config: RewriteConfig) -> RewritePipeline {
        RewritePipeline::from_config(config, Arc::new(|_: &str| {}))
    }

    struct Counting {
        stage: Stage,
        seen: Arc<AtomicUsize>,
    }

    impl InstructionHandler for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn phrase(&self) -> &'static str {
            "counts type references"
        }
        fn capabilities(&self) -> HandlerCapabilities {
            HandlerCapabilities::TYPE_REFERENCE
        }
        fn stage(&self) -> Stage {
            self.stage
        }
        fn mode(&self) -> HandlerMode {
            HandlerMode::Rewrite
        }
        fn handle_type(
            &self,
            _ctx: &mut RewriteContext<'_>,
            _reference: &TypeReference,
        ) -> Result<HandlerResult> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(HandlerResult::Unhandled)
        }
    }

    #[test]
    fn handlers_are_sorted_by_stage() {
        let seen = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline(RewriteConfig::default()).handler(Box::new(Counting {
            stage: Stage::HeuristicRepair,
            seen,
        }));

        let stages: Vec<Stage> = pipeline.handlers().map(|handler| handler.stage()).collect();
        let mut sorted = stages.clone();
        sorted.sort();
        assert_eq!(stages, sorted);

        let names: Vec<&str> = pipeline.handlers().map(|handler| handler.name()).collect();
        let counting = names.iter().position(|name| *name == "counting").unwrap();
        let optional = names.iter().position(|name| *name == "optional-params").unwrap();
        let facade = names.iter().position(|name| *name == "facade").unwrap();
        assert!(optional < counting && counting < facade);
    }

    #[test]
    fn clean_module_is_untouched() {
        let mut module = build_plugin();
        let original = module.clone();
        let report = pipeline(RewriteConfig::default().with_trusted(["Host"]))
            .run(&mut module, &resources())
            .unwrap();

        assert_eq!(report.verdict(), Verdict::Clean);
        assert!(!report.changed());
        assert!(report.is_empty());
        assert_eq!(module, original);
    }

    #[test]
    fn legacy_module_is_repaired() {
        let mut module = build_legacy_plugin();
        let report = pipeline(RewriteConfig::default().with_trusted(["Host"]))
            .run(&mut module, &resources())
            .unwrap();

        assert!(report.changed());
        // Ghost cannot be fixed and Teleport changed arity.
        assert_eq!(report.verdict(), Verdict::HasWarnings);
        let rewritten: Vec<&str> = report
            .records()
            .filter(|record| record.result == HandlerResult::Rewritten)
            .map(|record| record.handler)
            .collect();
        assert!(rewritten.contains(&"field-property"));
        assert!(rewritten.contains(&"optional-params"));
        assert!(rewritten.contains(&"facade"));

        let findings: Vec<String> = report.findings().map(ToString::to_string).collect();
        assert!(findings
            .iter()
            .any(|finding| finding.starts_with("broken [classifier] [Host]Game.Ghost")));
        assert!(findings.iter().any(|finding| finding
            .contains("[Host]Game.Player::Teleport(System.Int32): arity")));

        module.verify_bodies().unwrap();
        module.validate().unwrap();
        assert!(!module.member_refs.iter().any(|row| row.name == "Health"));
    }

    #[test]
    fn detect_only_reports_without_changing() {
        let mut module = build_legacy_plugin();
        let original = module.clone();
        let report = pipeline(RewriteConfig::detect_only().with_trusted(["Host"]))
            .run(&mut module, &resources())
            .unwrap();

        assert_eq!(module, original);
        assert!(!report.changed());
        assert_eq!(report.verdict(), Verdict::HasWarnings);
        assert_eq!(report.rewritten_count(), 0);

        let log = report
            .records_for("[Host]Game.World::Log(System.String)")
            .collect::<Vec<_>>();
        // The facade claims Log; the classifier does not report it a second time.
        assert_eq!(log.len(), 1);
        assert!(log[0].reason.as_deref().unwrap().starts_with("would "));
    }

    #[test]
    fn structural_failure_is_fatal() {
        let mut module = build_plugin();
        module.flags = ModuleFlags::REQUIRES_32BIT;
        let report = pipeline(RewriteConfig::default())
            .run(&mut module, &resources())
            .unwrap();

        assert_eq!(report.verdict(), Verdict::Fatal);
        assert!(report.fatal_reason().unwrap().contains("architecture"));
        assert_eq!(report.len(), 1);
    }

    #[test]
    fn broken_references_can_be_fatal() {
        let mut module = build_legacy_plugin();
        let report = pipeline(RewriteConfig::strict().with_trusted(["Host"]))
            .run(&mut module, &resources())
            .unwrap();
        assert_eq!(report.verdict(), Verdict::Fatal);
        assert!(report.fatal_reason().is_none());
    }
}
