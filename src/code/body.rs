//! Method bodies and their structural verification.

use crate::{
    code::{decode_body, encode_body, FlowType, Instruction, Opcode, Operand, StackEffect},
    module::{MethodSignature, Token},
    Result,
};

/// Resolves the signature of a method referenced by a call-like instruction.
///
/// The module implements this for its own MethodDef and MemberRef tokens.
pub trait CallResolver {
    /// The signature of the method `token` points at, `None` if it cannot be resolved.
    fn method_signature(&self, token: Token) -> Option<MethodSignature>;
}

/// The code of a method.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodBody {
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// Number of local variables
    pub local_count: u16,
    /// The instructions
    pub instructions: Vec<Instruction>,
}

impl MethodBody {
    /// Create a body from instructions.
    #[must_use]
    pub fn new(max_stack: u16, local_count: u16, instructions: Vec<Instruction>) -> Self {
        MethodBody {
            max_stack,
            local_count,
            instructions,
        }
    }

    /// Decode a body from its header values and code bytes.
    ///
    /// # Errors
    /// Returns an error if the code cannot be decoded.
    pub fn decode(max_stack: u16, local_count: u16, code: &[u8]) -> Result<Self> {
        Ok(MethodBody {
            max_stack,
            local_count,
            instructions: decode_body(code)?,
        })
    }

    /// Encode the instructions.
    ///
    /// # Errors
    /// Returns an error if an instruction is malformed or a branch target is out of range.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_body(&self.instructions)
    }

    /// Indices of all instructions whose token operand is `token`.
    #[must_use]
    pub fn uses_of(&self, token: Token) -> Vec<usize> {
        self.instructions
            .iter()
            .enumerate()
            .filter(|(_, instruction)| instruction.token() == Some(token))
            .map(|(index, _)| index)
            .collect()
    }

    /// Insert `inserted` before the instruction at `index`.
    ///
    /// Branches that targeted `index` now target the first inserted instruction, so every path
    /// into the original instruction runs the inserted sequence first. Targets after `index`
    /// are shifted. The inserted instructions must not contain branches.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `index` is out of range or an inserted instruction
    /// is a branch.
    pub fn insert_before(&mut self, index: usize, inserted: Vec<Instruction>) -> Result<()> {
        if index > self.instructions.len() {
            return Err(malformed_error!(
                "Insert position {} is outside the body of {} instructions",
                index,
                self.instructions.len()
            ));
        }
        if inserted.iter().any(|instruction| instruction.opcode.is_branch()) {
            return Err(malformed_error!("Inserted instructions must not branch"));
        }

        let count = inserted.len();
        if count == 0 {
            return Ok(());
        }

        for instruction in &mut self.instructions {
            instruction.map_targets(|target| if target > index { target + count } else { target });
        }

        self.instructions.splice(index..index, inserted);
        Ok(())
    }

    /// Replace the instruction at `index`, keeping every branch target as is.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `index` is out of range.
    pub fn replace(&mut self, index: usize, instruction: Instruction) -> Result<()> {
        let Some(slot) = self.instructions.get_mut(index) else {
            return Err(malformed_error!("No instruction at index {}", index));
        };
        *slot = instruction;
        Ok(())
    }

    /// Verify the structural validity of the body.
    ///
    /// Checks that every branch target is in range and simulates the evaluation stack along all
    /// paths: no underflow, identical depth wherever paths merge, the right depth at every `ret`
    /// and no path that runs past the last instruction. `signature` is the signature of the
    /// method owning the body.
    ///
    /// Returns the maximum stack depth reached.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] describing the first violation found.
    pub fn verify(&self, signature: &MethodSignature, resolver: &dyn CallResolver) -> Result<u16> {
        let count = self.instructions.len();
        if count == 0 {
            return Err(malformed_error!("Method body is empty"));
        }

        let arg_count = signature.stack_inputs();
        let mut depths: Vec<Option<usize>> = vec![None; count];
        let mut worklist = vec![(0usize, 0usize)];
        let mut max_depth = 0usize;

        while let Some((index, depth)) = worklist.pop() {
            match depths[index] {
                Some(known) if known == depth => continue,
                Some(known) => {
                    return Err(malformed_error!(
                        "Stack depth mismatch at instruction {}: {} vs {}",
                        index,
                        known,
                        depth
                    ))
                }
                None => depths[index] = Some(depth),
            }

            let instruction = &self.instructions[index];
            self.check_indices(index, instruction, arg_count)?;

            let (pops, pushes) = self.stack_effect(index, instruction, signature, resolver)?;
            if depth < pops {
                return Err(malformed_error!(
                    "Stack underflow at instruction {} ({}): needs {}, has {}",
                    index,
                    instruction.opcode,
                    pops,
                    depth
                ));
            }

            let after = depth - pops + pushes;
            max_depth = max_depth.max(after).max(depth);

            for target in instruction.targets() {
                if target >= count {
                    return Err(malformed_error!(
                        "Branch target {} of instruction {} is out of range",
                        target,
                        index
                    ));
                }
                worklist.push((target, after));
            }

            match instruction.opcode.flow() {
                FlowType::Return => {
                    if after != 0 {
                        return Err(malformed_error!(
                            "Stack not empty at return (instruction {}): {} values left",
                            index,
                            after
                        ));
                    }
                }
                FlowType::Throw | FlowType::UnconditionalBranch => {}
                _ => {
                    if index + 1 >= count {
                        return Err(malformed_error!(
                            "Execution falls off the end of the body after instruction {}",
                            index
                        ));
                    }
                    worklist.push((index + 1, after));
                }
            }
        }

        u16::try_from(max_depth).map_err(|_| malformed_error!("Stack depth {} too large", max_depth))
    }

    fn check_indices(&self, index: usize, instruction: &Instruction, arg_count: usize) -> Result<()> {
        let local = match instruction.opcode {
            Opcode::Ldloc0 | Opcode::Stloc0 => Some(0),
            Opcode::Ldloc1 | Opcode::Stloc1 => Some(1),
            Opcode::Ldloc2 | Opcode::Stloc2 => Some(2),
            Opcode::Ldloc3 | Opcode::Stloc3 => Some(3),
            Opcode::LdlocS | Opcode::StlocS => match instruction.operand {
                Operand::UInt8(value) => Some(usize::from(value)),
                _ => None,
            },
            _ => None,
        };
        if let Some(local) = local {
            if local >= usize::from(self.local_count) {
                return Err(malformed_error!(
                    "Instruction {} uses local {} of {}",
                    index,
                    local,
                    self.local_count
                ));
            }
        }

        let argument = match instruction.opcode {
            Opcode::Ldarg0 => Some(0),
            Opcode::Ldarg1 => Some(1),
            Opcode::Ldarg2 => Some(2),
            Opcode::Ldarg3 => Some(3),
            Opcode::LdargS => match instruction.operand {
                Operand::UInt8(value) => Some(usize::from(value)),
                _ => None,
            },
            _ => None,
        };
        if let Some(argument) = argument {
            if argument >= arg_count {
                return Err(malformed_error!(
                    "Instruction {} uses argument {} of {}",
                    index,
                    argument,
                    arg_count
                ));
            }
        }

        Ok(())
    }

    fn stack_effect(
        &self,
        index: usize,
        instruction: &Instruction,
        signature: &MethodSignature,
        resolver: &dyn CallResolver,
    ) -> Result<(usize, usize)> {
        let callee = || -> Result<MethodSignature> {
            instruction
                .token()
                .and_then(|token| resolver.method_signature(token))
                .ok_or_else(|| {
                    malformed_error!(
                        "Instruction {} ({}) references an unknown method",
                        index,
                        instruction.opcode
                    )
                })
        };

        Ok(match instruction.opcode.stack_effect() {
            StackEffect::Fixed { pops, pushes } => (usize::from(pops), usize::from(pushes)),
            StackEffect::Call => {
                let callee = callee()?;
                (
                    callee.stack_inputs(),
                    usize::from(!callee.return_type.is_void()),
                )
            }
            StackEffect::NewObj => {
                let callee = callee()?;
                if !callee.has_this {
                    return Err(malformed_error!(
                        "newobj at instruction {} references a static method",
                        index
                    ));
                }
                (callee.params.len(), 1)
            }
            StackEffect::Return => (usize::from(!signature.return_type.is_void()), 0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{TableId, TypeSignature};
    use std::collections::HashMap;

    struct Signatures(HashMap<Token, MethodSignature>);

    impl CallResolver for Signatures {
        fn method_signature(&self, token: Token) -> Option<MethodSignature> {
            self.0.get(&token).cloned()
        }
    }

    fn resolver() -> Signatures {
        let mut map = HashMap::new();
        // static int Add(int, int)
        map.insert(
            Token::from_parts(TableId::MemberRef, 1),
            MethodSignature::static_method(
                TypeSignature::I4,
                vec![TypeSignature::I4, TypeSignature::I4],
            ),
        );
        // instance void .ctor(string)
        map.insert(
            Token::from_parts(TableId::MemberRef, 2),
            MethodSignature::instance(TypeSignature::Void, vec![TypeSignature::String]),
        );
        Signatures(map)
    }

    fn void_static() -> MethodSignature {
        MethodSignature::static_method(TypeSignature::Void, vec![])
    }

    #[test]
    fn verify_call_sequence() {
        let body = MethodBody::new(
            2,
            1,
            vec![
                Instruction::ldc_i4(1),
                Instruction::ldc_i4(2),
                Instruction::with_token(Opcode::Call, Token::from_parts(TableId::MemberRef, 1)),
                Instruction::simple(Opcode::Stloc0),
                Instruction::with_token(Opcode::Ldstr, Token(0x7000_0001)),
                Instruction::with_token(Opcode::Newobj, Token::from_parts(TableId::MemberRef, 2)),
                Instruction::simple(Opcode::Pop),
                Instruction::simple(Opcode::Ret),
            ],
        );
        assert_eq!(body.verify(&void_static(), &resolver()).unwrap(), 2);
    }

    #[test]
    fn verify_detects_underflow() {
        let body = MethodBody::new(
            2,
            0,
            vec![
                Instruction::ldc_i4(1),
                Instruction::with_token(Opcode::Call, Token::from_parts(TableId::MemberRef, 1)),
                Instruction::simple(Opcode::Ret),
            ],
        );
        assert!(body.verify(&void_static(), &resolver()).is_err());
    }

    #[test]
    fn verify_detects_merge_mismatch() {
        // ldarg.0; brtrue.s L; ldc.i4.1; L: ret
        let signature =
            MethodSignature::static_method(TypeSignature::Void, vec![TypeSignature::I4]);
        let body = MethodBody::new(
            1,
            0,
            vec![
                Instruction::simple(Opcode::Ldarg0),
                Instruction::branch(Opcode::BrtrueS, 3),
                Instruction::ldc_i4(1),
                Instruction::simple(Opcode::Ret),
            ],
        );
        assert!(body.verify(&signature, &resolver()).is_err());
    }

    #[test]
    fn verify_return_value_and_fall_through() {
        let returns_int = MethodSignature::static_method(TypeSignature::I4, vec![]);
        let ok = MethodBody::new(
            1,
            0,
            vec![Instruction::ldc_i4(3), Instruction::simple(Opcode::Ret)],
        );
        assert_eq!(ok.verify(&returns_int, &resolver()).unwrap(), 1);
        assert!(ok.verify(&void_static(), &resolver()).is_err());

        let falls_off = MethodBody::new(0, 0, vec![Instruction::simple(Opcode::Nop)]);
        assert!(falls_off.verify(&void_static(), &resolver()).is_err());

        let unknown_call = MethodBody::new(
            0,
            0,
            vec![
                Instruction::with_token(Opcode::Call, Token::from_parts(TableId::MemberRef, 9)),
                Instruction::simple(Opcode::Ret),
            ],
        );
        assert!(unknown_call.verify(&void_static(), &resolver()).is_err());
    }

    #[test]
    fn verify_indices() {
        let body = MethodBody::new(
            1,
            0,
            vec![
                Instruction::simple(Opcode::Ldloc0),
                Instruction::simple(Opcode::Pop),
                Instruction::simple(Opcode::Ret),
            ],
        );
        assert!(body.verify(&void_static(), &resolver()).is_err());

        let instance = MethodSignature::instance(TypeSignature::Void, vec![]);
        let body = MethodBody::new(
            1,
            0,
            vec![
                Instruction::simple(Opcode::Ldarg0),
                Instruction::simple(Opcode::Pop),
                Instruction::simple(Opcode::Ret),
            ],
        );
        assert!(body.verify(&instance, &resolver()).is_ok());
        assert!(body.verify(&void_static(), &resolver()).is_err());
    }

    #[test]
    fn insert_redirects_branches() {
        // 0: ldarg.0 ; 1: brfalse.s 3 ; 2: nop ; 3: call ; 4: ret
        let call = Token::from_parts(TableId::MemberRef, 1);
        let mut body = MethodBody::new(
            2,
            0,
            vec![
                Instruction::simple(Opcode::Ldarg0),
                Instruction::branch(Opcode::BrfalseS, 4),
                Instruction::simple(Opcode::Nop),
                Instruction::with_token(Opcode::Call, call),
                Instruction::simple(Opcode::Ret),
            ],
        );

        body.insert_before(3, vec![Instruction::ldc_i4(7)]).unwrap();

        assert_eq!(body.instructions.len(), 6);
        assert_eq!(body.instructions[1].operand, Operand::Target(5));
        assert_eq!(body.instructions[3], Instruction::ldc_i4(7));
        assert_eq!(body.uses_of(call), vec![4]);

        let mut body = MethodBody::new(
            1,
            0,
            vec![
                Instruction::branch(Opcode::Br, 1),
                Instruction::simple(Opcode::Ret),
            ],
        );
        body.insert_before(1, vec![Instruction::simple(Opcode::Nop)]).unwrap();
        assert_eq!(body.instructions[0].operand, Operand::Target(1));
        assert_eq!(body.instructions[2].opcode, Opcode::Ret);

        assert!(body.insert_before(9, vec![]).is_err());
        assert!(body
            .insert_before(0, vec![Instruction::branch(Opcode::Br, 0)])
            .is_err());
    }

    #[test]
    fn replace_instruction() {
        let mut body = MethodBody::new(0, 0, vec![Instruction::simple(Opcode::Ret)]);
        body.replace(0, Instruction::simple(Opcode::Nop)).unwrap();
        assert_eq!(body.instructions[0].opcode, Opcode::Nop);
        assert!(body.replace(1, Instruction::simple(Opcode::Nop)).is_err());
    }
}
