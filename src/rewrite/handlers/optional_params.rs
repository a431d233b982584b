use log::{debug, warn};

use crate::{
    code::{Instruction, Opcode, Operand},
    module::{
        Constant, MemberRef, MemberReference, MemberShape, MemberSignature, Module, ReferenceRow,
        SymbolReference,
    },
    rewrite::{
        HandlerCapabilities, HandlerMode, HandlerResult, InstructionHandler, RewriteContext, Stage,
    },
    symbols::MethodLocation,
    Result,
};

/// Appends the default values of parameters that were added with defaults.
///
/// A call site compiled against `M(a)` keeps working against `M(a, b = x)` once `x` is pushed
/// before every call and the reference is pointed at the longer signature.
pub struct OptionalParamsHandler {
    mode: HandlerMode,
}

impl OptionalParamsHandler {
    /// A handler in `mode`.
    #[must_use]
    pub fn new(mode: HandlerMode) -> Self {
        OptionalParamsHandler { mode }
    }
}

/// The candidate whose leading parameters match `shape` and whose extra parameters all carry a
/// usable default, preferring the fewest extras.
fn extended_candidate<'a>(
    shape: &MemberShape,
    candidates: Vec<MethodLocation<'a>>,
) -> Option<(MethodLocation<'a>, Vec<Constant>)> {
    let MemberShape::Method {
        has_this,
        return_type,
        params,
    } = shape
    else {
        return None;
    };

    candidates
        .into_iter()
        .filter_map(|candidate| {
            let MemberShape::Method {
                has_this: declared_this,
                return_type: declared_return,
                params: declared_params,
            } = candidate.shape()
            else {
                return None;
            };
            if declared_this != *has_this
                || declared_return != *return_type
                || declared_params.len() <= params.len()
                || declared_params[..params.len()] != params[..]
            {
                return None;
            }

            let method = candidate.method();
            let defaults = (params.len()..declared_params.len())
                .map(|index| {
                    let value = method.default_value(index)?;
                    value
                        .fits(&method.signature.params[index])
                        .then(|| value.clone())
                })
                .collect::<Option<Vec<_>>>()?;
            Some((candidate, defaults))
        })
        .min_by_key(|(_, defaults)| defaults.len())
}

/// The instruction pushing `value`.
fn load(module: &mut Module, value: &Constant) -> Result<Instruction> {
    let with = |opcode, operand| Instruction { opcode, operand };
    Ok(match *value {
        Constant::Boolean(flag) => Instruction::ldc_i4(i32::from(flag)),
        Constant::Char(value) => Instruction::ldc_i4(i32::from(value)),
        Constant::I1(value) => Instruction::ldc_i4(i32::from(value)),
        Constant::U1(value) => Instruction::ldc_i4(i32::from(value)),
        Constant::I2(value) => Instruction::ldc_i4(i32::from(value)),
        Constant::U2(value) => Instruction::ldc_i4(i32::from(value)),
        Constant::I4(value) => Instruction::ldc_i4(value),
        #[allow(clippy::cast_possible_wrap)]
        Constant::U4(value) => Instruction::ldc_i4(value as i32),
        Constant::I8(value) => with(Opcode::LdcI8, Operand::Int64(value)),
        #[allow(clippy::cast_possible_wrap)]
        Constant::U8(value) => with(Opcode::LdcI8, Operand::Int64(value as i64)),
        Constant::R4(value) => with(Opcode::LdcR4, Operand::Float32(value)),
        Constant::R8(value) => with(Opcode::LdcR8, Operand::Float64(value)),
        Constant::String(ref value) => {
            Instruction::with_token(Opcode::Ldstr, module.user_strings.intern(value)?)
        }
        Constant::Null => Instruction::simple(Opcode::Ldnull),
    })
}

impl InstructionHandler for OptionalParamsHandler {
    fn name(&self) -> &'static str {
        "optional-params"
    }

    fn phrase(&self) -> &'static str {
        "supplies defaults for added optional parameters"
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
        if member.is_field() {
            return Ok(HandlerResult::Unhandled);
        }
        let resources = ctx.resources;
        let universe = &resources.universe;
        if !member.module.as_deref().is_some_and(|m| universe.is_trusted(m)) {
            return Ok(HandlerResult::Unhandled);
        }
        let Some(owner) = universe.member_owner(member) else {
            return Ok(HandlerResult::Unhandled);
        };
        let candidates = universe.find_methods(owner, &member.name);
        if candidates.iter().any(|candidate| candidate.shape() == member.shape) {
            return Ok(HandlerResult::Unhandled);
        }
        let Some((target, defaults)) = extended_candidate(&member.shape, candidates) else {
            return Ok(HandlerResult::Unhandled);
        };

        let uses = ctx.module.token_uses(member.token);
        for &(type_index, method_index, index) in &uses {
            let opcode = ctx.module.types[type_index].methods[method_index]
                .body
                .as_ref()
                .and_then(|body| body.instructions.get(index))
                .map(|instruction| instruction.opcode);
            if let Some(other @ (Opcode::Ldftn | Opcode::Ldtoken)) = opcode {
                let refusal = format!("{other} of {} cannot receive default arguments", member.key());
                warn!("{refusal}");
                return Ok(HandlerResult::DetectedIncompatible(refusal));
            }
        }

        if !ctx.rewriting() {
            return Ok(ctx.would(
                member.token,
                format!("append {} default argument(s) for {}", defaults.len(), target.key()),
            ));
        }

        // Descending, so earlier insertions do not shift later call sites.
        let mut sites = uses;
        sites.sort_unstable_by(|a, b| b.cmp(a));
        for (type_index, method_index, index) in sites {
            let loads = defaults
                .iter()
                .map(|value| load(ctx.module, value))
                .collect::<Result<Vec<_>>>()?;
            let Some(body) = ctx.module.types[type_index].methods[method_index]
                .body
                .as_mut()
            else {
                continue;
            };
            body.insert_before(index, loads)?;
            ctx.touch(type_index, method_index);
        }

        let signature = ctx
            .module
            .import_method_signature(target.owner.module, &target.method().signature)?;
        ctx.module.replace_reference(
            &SymbolReference::Method(member.clone()),
            ReferenceRow::Member(MemberRef {
                parent: member.parent,
                name: member.name.clone(),
                signature: MemberSignature::Method(signature),
            }),
        )?;

        debug!("{} now calls {}", member.key(), target.key());
        Ok(ctx.rewritten(format!(
            "appended {} default argument(s) for {}",
            defaults.len(),
            target.key()
        )))
    }
}
