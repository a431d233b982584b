use log::{debug, warn};

use crate::{
    module::{
        MemberRef, MemberReference, MemberShape, ReferenceRow, SymbolReference, TypeRef,
        TypeReference,
    },
    rewrite::{
        handlers::scope_for, HandlerCapabilities, HandlerMode, HandlerResult, InstructionHandler,
        RewriteContext, Stage,
    },
    Result,
};

/// Points references at the facades and renamed members registered for them.
///
/// A whole-type facade moves the TypeRef itself, which only happens when the facade serves every
/// member the module uses from that type. Otherwise members are moved one at a time. References
/// into modules the registry does not cover are never touched.
pub struct FacadeHandler {
    mode: HandlerMode,
}

impl FacadeHandler {
    /// A handler in `mode`.
    #[must_use]
    pub fn new(mode: HandlerMode) -> Self {
        FacadeHandler { mode }
    }
}

impl InstructionHandler for FacadeHandler {
    fn name(&self) -> &'static str {
        "facade"
    }

    fn phrase(&self) -> &'static str {
        "redirects references to registered facades"
    }

    fn capabilities(&self) -> HandlerCapabilities {
        HandlerCapabilities::TYPE_REFERENCE | HandlerCapabilities::MEMBER_REFERENCE
    }

    fn stage(&self) -> Stage {
        Stage::SignatureMapping
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
        if !resources.facades.covers(type_ref.module.as_deref()) {
            return Ok(HandlerResult::Unhandled);
        }
        let full = type_ref.full_name();
        let Some(facade) = resources.facades.type_facade(&full) else {
            return Ok(HandlerResult::Unhandled);
        };

        // Exact member mappings take precedence, so their members keep the type reference too.
        let module = &*ctx.module;
        let unserved = module
            .member_refs
            .iter()
            .filter(|member_ref| member_ref.parent == type_ref.token)
            .find(|member_ref| {
                let shape = MemberShape::of(module, &member_ref.signature);
                resources.facades.maps_exactly(&shape.key(&full, &member_ref.name))
                    || !facade.provides(&member_ref.name, &shape)
            });
        if let Some(member_ref) = unserved {
            // Members are still mapped one at a time.
            debug!(
                "{} does not take over {}::{}, keeping the type reference",
                facade.full_name(),
                full,
                member_ref.name
            );
            return Ok(HandlerResult::Unhandled);
        }

        if !ctx.rewriting() {
            return Ok(ctx.would(
                type_ref.token,
                format!("redirect {} to [{}]{}", full, facade.module, facade.full_name()),
            ));
        }

        let scope = scope_for(ctx.module, &facade.module, facade.version);
        ctx.module.replace_reference(
            &SymbolReference::Type(type_ref.clone()),
            ReferenceRow::Type(TypeRef {
                scope,
                namespace: facade.namespace.clone(),
                name: facade.type_name.clone(),
            }),
        )?;
        Ok(ctx.rewritten(format!(
            "{} redirected to [{}]{}",
            full,
            facade.module,
            facade.full_name()
        )))
    }

    fn handle_member(
        &self,
        ctx: &mut RewriteContext<'_>,
        member: &MemberReference,
    ) -> Result<HandlerResult> {
        let resources = ctx.resources;
        let Some(target) = resources.facades.lookup(member) else {
            return Ok(HandlerResult::Unhandled);
        };
        if target.shape != member.shape {
            let refusal = format!("{target} does not have the shape of {}", member.key());
            warn!("{refusal}");
            return Ok(HandlerResult::DetectedIncompatible(refusal));
        }

        if !ctx.rewriting() {
            return Ok(ctx.would(member.token, format!("map {} to {}", member.key(), target)));
        }

        let scope = scope_for(ctx.module, &target.module, target.version);
        let parent = ctx
            .module
            .intern_type_ref(scope, &target.namespace, &target.type_name);
        let old = if member.is_field() {
            SymbolReference::Field(member.clone())
        } else {
            SymbolReference::Method(member.clone())
        };
        ctx.module.replace_reference(
            &old,
            ReferenceRow::Member(MemberRef {
                parent,
                name: target.member.clone(),
                signature: member.signature.clone(),
            }),
        )?;
        Ok(ctx.rewritten(format!("{} mapped to {}", member.key(), target)))
    }
}
