use std::fmt;

use crate::{
    code::{OperandType, Opcode},
    module::Token,
};

/// Decoded operand of an [`Instruction`].
///
/// Branch targets are instruction indices within the owning body, not byte displacements, so
/// instructions can be inserted or replaced without recomputing offsets by hand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Signed 8bit immediate
    Int8(i8),
    /// Unsigned 8bit immediate
    UInt8(u8),
    /// Signed 32bit immediate
    Int32(i32),
    /// Signed 64bit immediate
    Int64(i64),
    /// 32bit floating point immediate
    Float32(f32),
    /// 64bit floating point immediate
    Float64(f64),
    /// Metadata token
    Token(Token),
    /// Index of the branch target instruction
    Target(usize),
    /// Indices of the jump table targets
    Switch(Vec<usize>),
}

/// A single instruction of a method body.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The opcode
    pub opcode: Opcode,
    /// The operand, matching the opcode's [`OperandType`]
    pub operand: Operand,
}

impl Instruction {
    /// An instruction without operand.
    #[must_use]
    pub fn simple(opcode: Opcode) -> Self {
        Instruction {
            opcode,
            operand: Operand::None,
        }
    }

    /// An instruction with a token operand (`call`, `ldfld`, `ldstr`, ...).
    #[must_use]
    pub fn with_token(opcode: Opcode, token: Token) -> Self {
        Instruction {
            opcode,
            operand: Operand::Token(token),
        }
    }

    /// A branch to the instruction at index `target`.
    #[must_use]
    pub fn branch(opcode: Opcode, target: usize) -> Self {
        Instruction {
            opcode,
            operand: Operand::Target(target),
        }
    }

    /// Push a 32bit integer using the shortest encoding.
    #[must_use]
    pub fn ldc_i4(value: i32) -> Self {
        let opcode = match value {
            -1 => Opcode::LdcI4M1,
            0 => Opcode::LdcI40,
            1 => Opcode::LdcI41,
            2 => Opcode::LdcI42,
            3 => Opcode::LdcI43,
            4 => Opcode::LdcI44,
            5 => Opcode::LdcI45,
            6 => Opcode::LdcI46,
            7 => Opcode::LdcI47,
            8 => Opcode::LdcI48,
            _ => {
                return match i8::try_from(value) {
                    Ok(short) => Instruction {
                        opcode: Opcode::LdcI4S,
                        operand: Operand::Int8(short),
                    },
                    Err(_) => Instruction {
                        opcode: Opcode::LdcI4,
                        operand: Operand::Int32(value),
                    },
                }
            }
        };
        Instruction::simple(opcode)
    }

    /// The token operand, if any.
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match self.operand {
            Operand::Token(token) => Some(token),
            _ => None,
        }
    }

    /// Branch target indices (empty for non-branches).
    #[must_use]
    pub fn targets(&self) -> Vec<usize> {
        match &self.operand {
            Operand::Target(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Rewrite every branch target through `map`.
    pub fn map_targets(&mut self, map: impl Fn(usize) -> usize) {
        match &mut self.operand {
            Operand::Target(target) => *target = map(*target),
            Operand::Switch(targets) => {
                for target in targets.iter_mut() {
                    *target = map(*target);
                }
            }
            _ => {}
        }
    }

    /// Returns `true` if the operand variant matches the opcode's operand layout.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        matches!(
            (self.opcode.operand_type(), &self.operand),
            (OperandType::None, Operand::None)
                | (OperandType::Int8, Operand::Int8(_))
                | (OperandType::UInt8, Operand::UInt8(_))
                | (OperandType::Int32, Operand::Int32(_))
                | (OperandType::Int64, Operand::Int64(_))
                | (OperandType::Float32, Operand::Float32(_))
                | (OperandType::Float64, Operand::Float64(_))
                | (OperandType::Token, Operand::Token(_))
                | (OperandType::ShortTarget, Operand::Target(_))
                | (OperandType::Target, Operand::Target(_))
                | (OperandType::Switch, Operand::Switch(_))
        )
    }

    /// Encoded size in bytes, given the opcode form as stored.
    #[must_use]
    pub fn size(&self) -> usize {
        let operand = match self.opcode.operand_type() {
            OperandType::None => 0,
            OperandType::Int8 | OperandType::UInt8 | OperandType::ShortTarget => 1,
            OperandType::Int32
            | OperandType::Float32
            | OperandType::Token
            | OperandType::Target => 4,
            OperandType::Int64 | OperandType::Float64 => 8,
            OperandType::Switch => match &self.operand {
                Operand::Switch(targets) => 4 + 4 * targets.len(),
                _ => 4,
            },
        };
        self.opcode.size() + operand
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int8(value) => write!(f, " {value}"),
            Operand::UInt8(value) => write!(f, " {value}"),
            Operand::Int32(value) => write!(f, " {value}"),
            Operand::Int64(value) => write!(f, " {value}"),
            Operand::Float32(value) => write!(f, " {value}"),
            Operand::Float64(value) => write!(f, " {value}"),
            Operand::Token(token) => write!(f, " {token}"),
            Operand::Target(target) => write!(f, " IL_{target:04}"),
            Operand::Switch(targets) => {
                let targets: Vec<String> =
                    targets.iter().map(|target| format!("IL_{target:04}")).collect();
                write!(f, " ({})", targets.join(", "))
            }
        }
    }
}
