use log::{debug, warn};

use crate::{
    code::{Instruction, Opcode},
    module::{MemberReference, MemberShape, MemberSignature},
    rewrite::{
        HandlerCapabilities, HandlerMode, HandlerResult, InstructionHandler, RewriteContext, Stage,
    },
    symbols::MethodLocation,
    Result,
};

/// Rewrites accesses to a field that became a property into accessor calls.
///
/// Applies to a trusted field reference whose field no longer exists while the owner declares
/// `get_Name` (and `set_Name` if the plugin stores to it) of the field's type. Address-taking
/// and token uses cannot be expressed through accessors and make the handler refuse.
pub struct FieldPropertyHandler {
    mode: HandlerMode,
}

impl FieldPropertyHandler {
    /// A handler in `mode`.
    #[must_use]
    pub fn new(mode: HandlerMode) -> Self {
        FieldPropertyHandler { mode }
    }
}

/// Accessor with `has_this` matching the field access, returning or taking `field_type`.
fn accessor<'a>(
    candidates: Vec<MethodLocation<'a>>,
    getter: bool,
    field_type: &str,
) -> Option<MethodLocation<'a>> {
    candidates.into_iter().find(|candidate| match candidate.shape() {
        MemberShape::Method {
            return_type,
            params,
            ..
        } => {
            if getter {
                params.is_empty() && return_type == field_type
            } else {
                params.len() == 1 && params[0] == field_type && return_type == "System.Void"
            }
        }
        MemberShape::Field { .. } => false,
    })
}

impl InstructionHandler for FieldPropertyHandler {
    fn name(&self) -> &'static str {
        "field-property"
    }

    fn phrase(&self) -> &'static str {
        "replaces removed fields with property accessors"
    }

    fn capabilities(&self) -> HandlerCapabilities {
        HandlerCapabilities::MEMBER_REFERENCE
    }

    fn stage(&self) -> Stage {
        Stage::HeuristicRepair
    }

    fn mode(&self) -> HandlerMode {
        self.mode
    }

    fn handle_member(
        &self,
        ctx: &mut RewriteContext<'_>,
        member: &MemberReference,
    ) -> Result<HandlerResult> {
        let MemberShape::Field { field_type } = &member.shape else {
            return Ok(HandlerResult::Unhandled);
        };
        let resources = ctx.resources;
        let universe = &resources.universe;
        if !member.module.as_deref().is_some_and(|m| universe.is_trusted(m)) {
            return Ok(HandlerResult::Unhandled);
        }
        let Some(owner) = universe.member_owner(member) else {
            return Ok(HandlerResult::Unhandled);
        };
        if universe.find_field(owner, &member.name).is_some() {
            return Ok(HandlerResult::Unhandled);
        }

        let get_name = format!("get_{}", member.name);
        let set_name = format!("set_{}", member.name);
        let Some(getter) = accessor(universe.find_methods(owner, &get_name), true, field_type)
        else {
            return Ok(HandlerResult::Unhandled);
        };
        let setter = accessor(universe.find_methods(owner, &set_name), false, field_type);
        let is_static = !getter.method().signature.has_this;

        let uses = ctx.module.token_uses(member.token);
        let mut needs_setter = false;
        for &(type_index, method_index, index) in &uses {
            let Some(opcode) = ctx.module.types[type_index].methods[method_index]
                .body
                .as_ref()
                .and_then(|body| body.instructions.get(index))
                .map(|instruction| instruction.opcode)
            else {
                continue;
            };

            let refusal = match opcode {
                Opcode::Ldfld | Opcode::Stfld if is_static => {
                    Some(format!("{opcode} on a field whose accessors are static"))
                }
                Opcode::Ldsfld | Opcode::Stsfld if !is_static => {
                    Some(format!("{opcode} on a field whose accessors are instance methods"))
                }
                Opcode::Ldfld | Opcode::Ldsfld => None,
                Opcode::Stfld | Opcode::Stsfld => {
                    needs_setter = true;
                    setter
                        .is_none()
                        .then(|| format!("{opcode} but {} has no {set_name}", owner.full_name()))
                }
                other => Some(format!("{other} cannot be expressed through accessors")),
            };
            if let Some(refusal) = refusal {
                warn!("Not rewriting {}: {}", member.key(), refusal);
                return Ok(HandlerResult::DetectedIncompatible(refusal));
            }
        }

        if !ctx.rewriting() {
            return Ok(ctx.would(
                member.token,
                format!("replace field {} with {}", member.key(), get_name),
            ));
        }

        let call = if is_static { Opcode::Call } else { Opcode::Callvirt };
        let signature = ctx
            .module
            .import_method_signature(getter.owner.module, &getter.method().signature)?;
        let get_token =
            ctx.module
                .intern_member_ref(member.parent, &get_name, MemberSignature::Method(signature));
        let set_token = match setter.filter(|_| needs_setter) {
            Some(setter) => {
                let signature = ctx
                    .module
                    .import_method_signature(setter.owner.module, &setter.method().signature)?;
                Some(ctx.module.intern_member_ref(
                    member.parent,
                    &set_name,
                    MemberSignature::Method(signature),
                ))
            }
            None => None,
        };

        for (type_index, method_index, index) in uses {
            let Some(body) = ctx.module.types[type_index].methods[method_index]
                .body
                .as_mut()
            else {
                continue;
            };
            let Some(opcode) = body.instructions.get(index).map(|i| i.opcode) else {
                continue;
            };
            let token = match (opcode, set_token) {
                (Opcode::Stfld | Opcode::Stsfld, Some(set_token)) => set_token,
                _ => get_token,
            };
            body.replace(index, Instruction::with_token(call, token))?;
            ctx.touch(type_index, method_index);
        }

        debug!("{} now goes through {}", member.key(), get_name);
        ctx.retire(member.token);
        Ok(ctx.rewritten(format!(
            "field {} replaced with {}::{}",
            member.name,
            owner.full_name(),
            get_name
        )))
    }
}
