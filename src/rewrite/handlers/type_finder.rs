use crate::{
    module::TypeReference,
    rewrite::{
        HandlerCapabilities, HandlerMode, HandlerResult, InstructionHandler, RewriteContext, Stage,
    },
    Result,
};

const RUNTIME_BINDER: &str = "Microsoft.CSharp.RuntimeBinder.";

const CONSOLE_TYPES: &[&str] = &["System.Console"];

const FILESYSTEM_TYPES: &[&str] = &[
    "System.IO.File",
    "System.IO.Directory",
    "System.IO.FileStream",
    "System.IO.FileInfo",
    "System.IO.DirectoryInfo",
    "System.IO.StreamWriter",
    "System.IO.StreamReader",
];

const SHELL_TYPES: &[&str] = &["System.Diagnostics.Process", "System.Diagnostics.ProcessStartInfo"];

/// Flags type references that reach outside the host's sandbox.
///
/// Late binding through the runtime binder is always reported. Console, filesystem and process
/// access only in paranoid mode.
pub struct TypeFinder {
    paranoid: bool,
}

impl TypeFinder {
    /// A finder; `paranoid` enables the sandbox checks.
    #[must_use]
    pub fn new(paranoid: bool) -> Self {
        TypeFinder { paranoid }
    }
}

impl InstructionHandler for TypeFinder {
    fn name(&self) -> &'static str {
        "type-finder"
    }

    fn phrase(&self) -> &'static str {
        "flags sandbox-escaping types"
    }

    fn capabilities(&self) -> HandlerCapabilities {
        HandlerCapabilities::TYPE_REFERENCE
    }

    fn stage(&self) -> Stage {
        Stage::Detection
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::DetectOnly
    }

    fn handle_type(
        &self,
        _ctx: &mut RewriteContext<'_>,
        type_ref: &TypeReference,
    ) -> Result<HandlerResult> {
        let full = type_ref.full_name();
        if full.starts_with(RUNTIME_BINDER) {
            return Ok(HandlerResult::DetectedDynamic);
        }
        if !self.paranoid {
            return Ok(HandlerResult::Unhandled);
        }

        let found = full.as_str();
        Ok(if CONSOLE_TYPES.contains(&found) {
            HandlerResult::DetectedConsoleAccess
        } else if FILESYSTEM_TYPES.contains(&found) {
            HandlerResult::DetectedFilesystemAccess
        } else if SHELL_TYPES.contains(&found) {
            HandlerResult::DetectedShellAccess
        } else {
            HandlerResult::Unhandled
        })
    }
}
