use std::sync::Arc;

use log::warn;

use crate::{
    module::{ModuleFlags, Token},
    rewrite::{
        HandlerCapabilities, HandlerMode, HandlerResult, InstructionHandler, RewriteContext, Stage,
    },
    Error, Result,
};

/// Notified with the module name whenever a 32-bit requirement is cleared.
pub type ArchitectureCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Clears the 32-bit requirement of IL-only modules so they load into 64-bit hosts.
///
/// A module carrying native code cannot be fixed this way; the handler fails, which makes the
/// report fatal.
pub struct ArchitectureHandler {
    mode: HandlerMode,
    on_cleared: ArchitectureCallback,
}

impl ArchitectureHandler {
    const NAME: &'static str = "architecture";

    /// A handler calling `on_cleared` after every fix.
    #[must_use]
    pub fn new(mode: HandlerMode, on_cleared: ArchitectureCallback) -> Self {
        ArchitectureHandler { mode, on_cleared }
    }
}

impl InstructionHandler for ArchitectureHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn phrase(&self) -> &'static str {
        "clears the 32-bit requirement"
    }

    fn capabilities(&self) -> HandlerCapabilities {
        HandlerCapabilities::MODULE
    }

    fn stage(&self) -> Stage {
        Stage::StructuralFix
    }

    fn mode(&self) -> HandlerMode {
        self.mode
    }

    fn handle_module(&self, ctx: &mut RewriteContext<'_>) -> Result<HandlerResult> {
        let flags = ctx.module.flags;
        if !flags.contains(ModuleFlags::REQUIRES_32BIT) {
            return Ok(HandlerResult::Unhandled);
        }
        if !flags.contains(ModuleFlags::IL_ONLY) {
            return Err(Error::StructuralFix {
                handler: Self::NAME,
                message: format!(
                    "'{}' contains native code and requires a 32-bit process",
                    ctx.module.name
                ),
            });
        }

        if !ctx.rewriting() {
            return Ok(ctx.would(Token::default(), "clear the 32-bit requirement"));
        }

        ctx.module.flags.remove(ModuleFlags::REQUIRES_32BIT);
        warn!("Cleared the 32-bit requirement of '{}'", ctx.module.name);
        (self.on_cleared)(&ctx.module.name);
        Ok(ctx.rewritten("cleared the 32-bit requirement"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        rewrite::{RewriteConfig, SharedResources},
        test::build_plugin,
    };

    fn run(flags: ModuleFlags, mode: HandlerMode) -> (Result<HandlerResult>, ModuleFlags, Vec<String>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = ArchitectureHandler::new(
            mode,
            Arc::new(move |name: &str| sink.lock().unwrap().push(name.to_string())),
        );

        let mut module = build_plugin();
        module.flags = flags;
        let resources = SharedResources::default();
        let config = RewriteConfig::default();
        let mut ctx = RewriteContext::new(&mut module, &resources, &config);
        ctx.begin(mode);
        let result = handler.handle_module(&mut ctx);
        drop(ctx);

        let names = seen.lock().unwrap().clone();
        (result, module.flags, names)
    }

    #[test]
    fn clears_flag_and_notifies() {
        let (result, flags, names) = run(
            ModuleFlags::IL_ONLY | ModuleFlags::REQUIRES_32BIT,
            HandlerMode::Rewrite,
        );
        assert_eq!(result.unwrap(), HandlerResult::Rewritten);
        assert_eq!(flags, ModuleFlags::IL_ONLY);
        assert_eq!(names, vec!["SamplePlugin"]);
    }

    #[test]
    fn detect_only_leaves_flags() {
        let (result, flags, names) = run(
            ModuleFlags::IL_ONLY | ModuleFlags::REQUIRES_32BIT,
            HandlerMode::DetectOnly,
        );
        assert!(matches!(
            result.unwrap(),
            HandlerResult::DetectedIncompatible(reason) if reason.starts_with("would clear")
        ));
        assert!(flags.contains(ModuleFlags::REQUIRES_32BIT));
        assert!(names.is_empty());
    }

    #[test]
    fn native_code_cannot_be_fixed() {
        let (result, _, names) = run(ModuleFlags::REQUIRES_32BIT, HandlerMode::Rewrite);
        assert!(matches!(result, Err(Error::StructuralFix { handler: "architecture", .. })));
        assert!(names.is_empty());

        let (result, _, _) = run(ModuleFlags::IL_ONLY, HandlerMode::Rewrite);
        assert_eq!(result.unwrap(), HandlerResult::Unhandled);
    }
}
