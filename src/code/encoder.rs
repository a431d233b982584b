//! Instruction stream encoding.
//!
//! Offsets are recomputed from the instruction list on every encode. Short branches whose
//! displacement no longer fits into 8 bits after a rewrite are promoted to their long form;
//! since promotion grows the stream, layout is repeated until no further promotion is needed.
//! Forms are never demoted, so re-encoding a decoded body yields the original bytes.

use crate::{
    code::{Instruction, OperandType, Opcode, Operand},
    file::io::write_le,
    Result,
};

/// Compute the byte offset of every instruction (plus the end offset) for the given forms.
fn layout(instructions: &[Instruction], forms: &[Opcode]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut offset = 0;
    for (instruction, form) in instructions.iter().zip(forms) {
        offsets.push(offset);
        let sized = Instruction {
            opcode: *form,
            operand: instruction.operand.clone(),
        };
        offset += sized.size();
    }
    offsets.push(offset);
    offsets
}

fn target_offset(offsets: &[usize], target: usize, count: usize) -> Result<i64> {
    if target >= count {
        return Err(malformed_error!(
            "Branch target {} is outside the body of {} instructions",
            target,
            count
        ));
    }
    Ok(offsets[target] as i64)
}

/// Choose the final opcode form of every instruction, promoting short branches as needed.
fn select_forms(instructions: &[Instruction]) -> Result<(Vec<Opcode>, Vec<usize>)> {
    let mut forms: Vec<Opcode> = instructions.iter().map(|i| i.opcode).collect();

    loop {
        let offsets = layout(instructions, &forms);
        let mut promoted = false;

        for (index, instruction) in instructions.iter().enumerate() {
            if forms[index].operand_type() != OperandType::ShortTarget {
                continue;
            }
            let Operand::Target(target) = instruction.operand else {
                continue;
            };

            let next = offsets[index + 1] as i64;
            let displacement = target_offset(&offsets, target, instructions.len())? - next;
            if i8::try_from(displacement).is_err() {
                forms[index] = forms[index].long_form();
                promoted = true;
            }
        }

        if !promoted {
            return Ok((forms, offsets));
        }
    }
}

/// Encode instructions into a byte stream.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if an operand does not match its opcode or a branch
/// target is outside the instruction list.
pub fn encode_body(instructions: &[Instruction]) -> Result<Vec<u8>> {
    for (index, instruction) in instructions.iter().enumerate() {
        if !instruction.is_well_formed() {
            return Err(malformed_error!(
                "Instruction {} ({}) has an operand of the wrong kind",
                index,
                instruction.opcode
            ));
        }
    }

    let (forms, offsets) = select_forms(instructions)?;
    let count = instructions.len();
    let mut buffer = Vec::with_capacity(offsets[count]);

    for (index, (instruction, form)) in instructions.iter().zip(&forms).enumerate() {
        if form.prefix() != 0 {
            buffer.push(form.prefix());
        }
        buffer.push(form.value());

        let next = offsets[index + 1] as i64;
        match (&instruction.operand, form.operand_type()) {
            (Operand::None, _) => {}
            (Operand::Int8(value), _) => write_le(&mut buffer, *value),
            (Operand::UInt8(value), _) => write_le(&mut buffer, *value),
            (Operand::Int32(value), _) => write_le(&mut buffer, *value),
            (Operand::Int64(value), _) => write_le(&mut buffer, *value),
            (Operand::Float32(value), _) => write_le(&mut buffer, *value),
            (Operand::Float64(value), _) => write_le(&mut buffer, *value),
            (Operand::Token(token), _) => write_le(&mut buffer, token.value()),
            (Operand::Target(target), OperandType::ShortTarget) => {
                let displacement = target_offset(&offsets, *target, count)? - next;
                let displacement = i8::try_from(displacement)
                    .map_err(|_| malformed_error!("Short branch displacement out of range"))?;
                write_le(&mut buffer, displacement);
            }
            (Operand::Target(target), _) => {
                let displacement = target_offset(&offsets, *target, count)? - next;
                let displacement = i32::try_from(displacement)
                    .map_err(|_| malformed_error!("Branch displacement out of range"))?;
                write_le(&mut buffer, displacement);
            }
            (Operand::Switch(targets), _) => {
                write_le(&mut buffer, targets.len() as u32);
                for target in targets {
                    let displacement = target_offset(&offsets, *target, count)? - next;
                    let displacement = i32::try_from(displacement)
                        .map_err(|_| malformed_error!("Switch displacement out of range"))?;
                    write_le(&mut buffer, displacement);
                }
            }
        }
    }

    Ok(buffer)
}
