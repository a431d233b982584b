//! Instruction stream decoding.
//!
//! Method bodies are decoded linearly: the module format has no embedded data inside code, so
//! every byte belongs to exactly one instruction. Branch displacements are resolved to
//! instruction indices in a second step; a displacement that does not land on an instruction
//! boundary is a malformed body.
//!
//! # Example
//!
//! ```rust
//! use modcompat::code::{decode_body, Opcode, Operand};
//!
//! // ldarg.0; brtrue.s +1; nop; ret
//! let code = [0x02, 0x2D, 0x01, 0x00, 0x2A];
//! let instructions = decode_body(&code)?;
//! assert_eq!(instructions.len(), 4);
//! assert_eq!(instructions[1].operand, Operand::Target(3));
//! assert_eq!(instructions[3].opcode, Opcode::Ret);
//! # Ok::<(), modcompat::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    code::{Instruction, OperandType, Opcode, Operand},
    file::parser::Parser,
    module::Token,
    Result,
};

/// Operand as read from the byte stream, before branch resolution.
enum RawOperand {
    Resolved(Operand),
    Target(i64),
    Switch(Vec<i64>),
}

/// Decode a single instruction at the parser position.
///
/// Branch operands are returned as absolute byte offsets within the stream.
fn decode_raw(parser: &mut Parser) -> Result<(Opcode, RawOperand)> {
    let first_byte = parser.read_le::<u8>()?;
    let (prefix, value) = match first_byte {
        0xFE => (0xFE, parser.read_le::<u8>()?),
        _ => (0x00, first_byte),
    };

    let Some(opcode) = Opcode::from_encoding(prefix, value) else {
        return Err(if prefix == 0 {
            malformed_error!("Invalid opcode: {:02X}", value)
        } else {
            malformed_error!("Invalid opcode: FE {:02X}", value)
        });
    };

    let operand = match opcode.operand_type() {
        OperandType::None => RawOperand::Resolved(Operand::None),
        OperandType::Int8 => RawOperand::Resolved(Operand::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => RawOperand::Resolved(Operand::UInt8(parser.read_le::<u8>()?)),
        OperandType::Int32 => RawOperand::Resolved(Operand::Int32(parser.read_le::<i32>()?)),
        OperandType::Int64 => RawOperand::Resolved(Operand::Int64(parser.read_le::<i64>()?)),
        OperandType::Float32 => RawOperand::Resolved(Operand::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => RawOperand::Resolved(Operand::Float64(parser.read_le::<f64>()?)),
        OperandType::Token => {
            RawOperand::Resolved(Operand::Token(Token::new(parser.read_le::<u32>()?)))
        }
        OperandType::ShortTarget => {
            let displacement = i64::from(parser.read_le::<i8>()?);
            RawOperand::Target(parser.pos() as i64 + displacement)
        }
        OperandType::Target => {
            let displacement = i64::from(parser.read_le::<i32>()?);
            RawOperand::Target(parser.pos() as i64 + displacement)
        }
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()? as usize;
            if case_count > parser.remaining() / 4 {
                return Err(out_of_bounds_error!());
            }

            let mut displacements = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                displacements.push(i64::from(parser.read_le::<i32>()?));
            }

            // Displacements are relative to the end of the whole switch instruction
            let base = parser.pos() as i64;
            RawOperand::Switch(displacements.into_iter().map(|d| base + d).collect())
        }
    };

    Ok((opcode, operand))
}

/// Decode a complete method body into instructions with index-based branch targets.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for invalid opcodes or branch targets that are not
/// instruction boundaries, and [`crate::Error::OutOfBounds`] for truncated instructions.
pub fn decode_body(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut raw = Vec::new();
    let mut index_of_offset = HashMap::new();

    while parser.has_more_data() {
        index_of_offset.insert(parser.pos() as i64, raw.len());
        raw.push(decode_raw(&mut parser)?);
    }

    let resolve = |target: i64| -> Result<usize> {
        index_of_offset
            .get(&target)
            .copied()
            .ok_or_else(|| malformed_error!("Branch target {} is not an instruction boundary", target))
    };

    let mut instructions = Vec::with_capacity(raw.len());
    for (opcode, operand) in raw {
        let operand = match operand {
            RawOperand::Resolved(operand) => operand,
            RawOperand::Target(target) => Operand::Target(resolve(target)?),
            RawOperand::Switch(targets) => Operand::Switch(
                targets
                    .into_iter()
                    .map(&resolve)
                    .collect::<Result<Vec<usize>>>()?,
            ),
        };
        instructions.push(Instruction { opcode, operand });
    }

    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn decode_operands() {
        let code = [
            0x1F, 0xFE, // ldc.i4.s -2
            0x20, 0x10, 0x27, 0x00, 0x00, // ldc.i4 10000
            0x28, 0x01, 0x00, 0x00, 0x0A, // call 0x0A000001
            0xFE, 0x06, 0x02, 0x00, 0x00, 0x06, // ldftn 0x06000002
            0x11, 0x03, // ldloc.s 3
            0x2A, // ret
        ];

        let instructions = decode_body(&code).unwrap();
        assert_eq!(instructions.len(), 6);
        assert_eq!(instructions[0].operand, Operand::Int8(-2));
        assert_eq!(instructions[1].operand, Operand::Int32(10000));
        assert_eq!(instructions[2].token(), Some(Token(0x0A000001)));
        assert_eq!(instructions[3].opcode, Opcode::Ldftn);
        assert_eq!(instructions[3].token(), Some(Token(0x06000002)));
        assert_eq!(instructions[4].operand, Operand::UInt8(3));
    }

    #[test]
    fn decode_branches() {
        // IL_0: br.s IL_3 ; IL_2: nop ; IL_3: ldc.i4.0 ; IL_4: brfalse IL_0 ; IL_9: ret
        let code = [0x2B, 0x01, 0x00, 0x16, 0x39, 0xF7, 0xFF, 0xFF, 0xFF, 0x2A];
        let instructions = decode_body(&code).unwrap();

        assert_eq!(instructions[0].operand, Operand::Target(2));
        assert_eq!(instructions[3].opcode, Opcode::Brfalse);
        assert_eq!(instructions[3].operand, Operand::Target(0));
    }

    #[test]
    fn decode_switch() {
        // ldc.i4.0 ; switch (IL_A, IL_B) ; nop ; ret
        let code = [
            0x16, 0x45, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
            0x00, 0x00, 0x2A,
        ];
        let instructions = decode_body(&code).unwrap();
        assert_eq!(instructions[1].operand, Operand::Switch(vec![2, 3]));
    }

    #[test]
    fn decode_invalid() {
        assert!(matches!(
            decode_body(&[0x01]),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            decode_body(&[0xFE, 0x99]),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            decode_body(&[0x28, 0x01, 0x00]),
            Err(Error::OutOfBounds { .. })
        ));
        // branch into the middle of the call operand
        assert!(matches!(
            decode_body(&[0x2B, 0x01, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A]),
            Err(Error::Malformed { .. })
        ));
        // branch past the end
        assert!(decode_body(&[0x2B, 0x05, 0x2A]).is_err());
        // huge switch count
        assert!(decode_body(&[0x45, 0xFF, 0xFF, 0xFF, 0xFF]).is_err());
        assert!(decode_body(&[]).unwrap().is_empty());
    }
}
