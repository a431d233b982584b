use std::collections::{BTreeSet, HashSet};

use crate::{
    facade::FacadeRegistry,
    module::{Module, Token},
    platform::PlatformAssemblyMap,
    rewrite::{HandlerMode, HandlerResult, RewriteConfig},
    symbols::SymbolUniverse,
};

/// Read-only state shared by every pipeline of a session.
#[derive(Debug, Default)]
pub struct SharedResources {
    /// The trusted symbol universe
    pub universe: SymbolUniverse,
    /// Facade and renamed-member mappings
    pub facades: FacadeRegistry,
    /// Retired module redirection, if configured
    pub platform: Option<PlatformAssemblyMap>,
}

/// What a handler sees while it runs: the module under rewrite and the shared resources.
pub struct RewriteContext<'a> {
    /// The module being rewritten
    pub module: &'a mut Module,
    /// Shared resources
    pub resources: &'a SharedResources,
    /// Session configuration
    pub config: &'a RewriteConfig,
    mode: HandlerMode,
    claimed: bool,
    action: Option<String>,
    claimed_tokens: HashSet<Token>,
    changed_methods: BTreeSet<(usize, usize)>,
    retired: Vec<Token>,
    structure_changed: bool,
}

impl<'a> RewriteContext<'a> {
    pub(crate) fn new(
        module: &'a mut Module,
        resources: &'a SharedResources,
        config: &'a RewriteConfig,
    ) -> Self {
        RewriteContext {
            module,
            resources,
            config,
            mode: HandlerMode::DetectOnly,
            claimed: false,
            action: None,
            claimed_tokens: HashSet::new(),
            changed_methods: BTreeSet::new(),
            retired: Vec::new(),
            structure_changed: false,
        }
    }

    /// The mode of the handler currently running.
    #[must_use]
    pub fn mode(&self) -> HandlerMode {
        self.mode
    }

    /// Returns `true` if the running handler may change the module.
    #[must_use]
    pub fn rewriting(&self) -> bool {
        self.mode == HandlerMode::Rewrite
    }

    /// Record that the running handler changed the module as described by `action`.
    pub fn rewritten(&mut self, action: impl Into<String>) -> HandlerResult {
        self.claimed = true;
        self.structure_changed = true;
        self.action = Some(action.into());
        HandlerResult::Rewritten
    }

    /// Report what the running handler would change about `token` in rewrite mode.
    ///
    /// Like a rewrite, this ends the rewrite stages for the reference.
    pub fn would(&mut self, token: Token, action: impl AsRef<str>) -> HandlerResult {
        self.claimed = true;
        self.claimed_tokens.insert(token);
        HandlerResult::DetectedIncompatible(format!("would {}", action.as_ref()))
    }

    /// Returns `true` if a detect-only handler already reported a fix for `token`.
    #[must_use]
    pub fn is_claimed(&self, token: Token) -> bool {
        self.claimed_tokens.contains(&token)
    }

    /// Note that the body of a method was edited and must be verified.
    pub fn touch(&mut self, type_index: usize, method_index: usize) {
        self.changed_methods.insert((type_index, method_index));
    }

    /// Queue a MemberRef for removal once the rewrite stages are done.
    pub fn retire(&mut self, token: Token) {
        if !self.retired.contains(&token) {
            self.retired.push(token);
        }
    }

    pub(crate) fn begin(&mut self, mode: HandlerMode) {
        self.mode = mode;
        self.claimed = false;
        self.action = None;
    }

    pub(crate) fn claimed(&self) -> bool {
        self.claimed
    }

    pub(crate) fn take_action(&mut self) -> Option<String> {
        self.action.take()
    }

    pub(crate) fn take_retired(&mut self) -> Vec<Token> {
        std::mem::take(&mut self.retired)
    }

    pub(crate) fn changed_methods(&self) -> &BTreeSet<(usize, usize)> {
        &self.changed_methods
    }

    pub(crate) fn mark_changed(&mut self) {
        self.structure_changed = true;
    }

    pub(crate) fn structure_changed(&self) -> bool {
        self.structure_changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{module::TableId, test::build_plugin};

    #[test]
    fn claims_follow_the_mode() {
        let mut module = build_plugin();
        let resources = SharedResources::default();
        let config = RewriteConfig::default();
        let mut ctx = RewriteContext::new(&mut module, &resources, &config);
        let token = Token::from_parts(TableId::MemberRef, 1);

        ctx.begin(HandlerMode::DetectOnly);
        assert!(!ctx.rewriting());
        let result = ctx.would(token, "map Log to Broadcast");
        assert_eq!(
            result,
            HandlerResult::DetectedIncompatible("would map Log to Broadcast".into())
        );
        assert!(ctx.claimed());
        assert!(ctx.is_claimed(token));
        assert!(!ctx.structure_changed());

        ctx.begin(HandlerMode::Rewrite);
        assert!(!ctx.claimed());
        assert_eq!(ctx.rewritten("renamed"), HandlerResult::Rewritten);
        assert_eq!(ctx.take_action().as_deref(), Some("renamed"));
        assert!(ctx.structure_changed());

        ctx.retire(token);
        ctx.retire(token);
        assert_eq!(ctx.take_retired(), vec![token]);
        assert!(ctx.take_retired().is_empty());
    }
}
