//! The handler trait and the values it dispatches on.

use bitflags::bitflags;
use strum::{Display, EnumIter};

use crate::{
    module::{MemberReference, ModuleReference, TypeReference},
    rewrite::RewriteContext,
    Result,
};

bitflags! {
    /// What a handler looks at. The pipeline only calls the hooks a handler declares.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HandlerCapabilities: u8 {
        /// The module as a whole and its module references
        const MODULE = 0x01;
        /// Type references
        const TYPE_REFERENCE = 0x02;
        /// Field and method references
        const MEMBER_REFERENCE = 0x04;
    }
}

/// Pipeline stages in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Stage {
    /// Module-level fixes; a failure aborts the pass
    StructuralFix,
    /// Heuristic repair of references to changed members
    HeuristicRepair,
    /// Facade and renamed-member mapping
    SignatureMapping,
    /// Retired module redirection
    PlatformRemap,
    /// Detection over the final state, never rewrites
    Detection,
}

impl Stage {
    /// Returns `true` for every stage that may change the module.
    #[must_use]
    pub fn rewrites(self) -> bool {
        self != Stage::Detection
    }
}

/// Whether a handler applies its changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum HandlerMode {
    /// Report what would change
    DetectOnly,
    /// Change the module
    Rewrite,
}

impl HandlerMode {
    /// The mode of a rewrite handler under `rewrite_enabled`.
    #[must_use]
    pub fn from_enabled(rewrite_enabled: bool) -> Self {
        if rewrite_enabled {
            HandlerMode::Rewrite
        } else {
            HandlerMode::DetectOnly
        }
    }
}

/// The outcome of one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
pub enum HandlerResult {
    /// The handler had nothing to do
    #[strum(to_string = "unhandled")]
    Unhandled,
    /// The reference was rewritten
    #[strum(to_string = "rewritten")]
    Rewritten,
    /// The reference resolves to something of a different shape, or would be rewritten
    #[strum(to_string = "incompatible")]
    DetectedIncompatible(String),
    /// The reference does not resolve
    #[strum(to_string = "broken")]
    DetectedBroken(String),
    /// Console access
    #[strum(to_string = "console-access")]
    DetectedConsoleAccess,
    /// Filesystem access
    #[strum(to_string = "filesystem-access")]
    DetectedFilesystemAccess,
    /// Process creation
    #[strum(to_string = "shell-access")]
    DetectedShellAccess,
    /// Late-bound calls through the runtime binder
    #[strum(to_string = "dynamic")]
    DetectedDynamic,
}

impl HandlerResult {
    /// The reason carried by the result, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            HandlerResult::DetectedIncompatible(reason) | HandlerResult::DetectedBroken(reason) => {
                Some(reason)
            }
            _ => None,
        }
    }

    /// Returns `true` for every `Detected*` result.
    #[must_use]
    pub fn is_detection(&self) -> bool {
        !matches!(self, HandlerResult::Unhandled | HandlerResult::Rewritten)
    }
}

/// A named unit of rewrite or detection logic.
///
/// Hooks default to [`HandlerResult::Unhandled`]; a handler overrides the ones matching its
/// [`InstructionHandler::capabilities`]. Rewrite handlers honour
/// [`InstructionHandler::mode`] through [`RewriteContext::rewritten`] and
/// [`RewriteContext::would`].
///
/// Returning an error from a [`Stage::StructuralFix`] handler produces a fatal report; from
/// any other stage it aborts the pass with that error.
pub trait InstructionHandler: Send + Sync {
    /// Unique name used in reports and logs.
    fn name(&self) -> &'static str;

    /// What the handler does, in a few words.
    fn phrase(&self) -> &'static str;

    /// The hooks the pipeline calls.
    fn capabilities(&self) -> HandlerCapabilities;

    /// The stage the handler runs in.
    fn stage(&self) -> Stage;

    /// Whether the handler applies its changes.
    fn mode(&self) -> HandlerMode;

    /// Called once per module before any reference.
    ///
    /// # Errors
    /// A structural failure the module cannot be loaded with.
    fn handle_module(&self, _ctx: &mut RewriteContext<'_>) -> Result<HandlerResult> {
        Ok(HandlerResult::Unhandled)
    }

    /// Called once per module reference.
    ///
    /// # Errors
    /// An inconsistent module.
    fn handle_module_ref(
        &self,
        _ctx: &mut RewriteContext<'_>,
        _reference: &ModuleReference,
    ) -> Result<HandlerResult> {
        Ok(HandlerResult::Unhandled)
    }

    /// Called once per type reference.
    ///
    /// # Errors
    /// An inconsistent module.
    fn handle_type(
        &self,
        _ctx: &mut RewriteContext<'_>,
        _reference: &TypeReference,
    ) -> Result<HandlerResult> {
        Ok(HandlerResult::Unhandled)
    }

    /// Called once per field or method reference.
    ///
    /// # Errors
    /// An inconsistent module.
    fn handle_member(
        &self,
        _ctx: &mut RewriteContext<'_>,
        _reference: &MemberReference,
    ) -> Result<HandlerResult> {
        Ok(HandlerResult::Unhandled)
    }

    /// Called once after every reference went through the rewrite stages.
    ///
    /// # Errors
    /// An inconsistent module.
    fn finalize(&self, _ctx: &mut RewriteContext<'_>) -> Result<()> {
        Ok(())
    }
}
