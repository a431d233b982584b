//! Method body instructions: decoding, encoding, editing and verification.
//!
//! This module provides the instruction level of the module model. Bodies are decoded into an
//! editable list of [`Instruction`]s whose branch operands are instruction indices; handlers
//! insert or replace instructions through [`MethodBody`] and the encoder recomputes all byte
//! offsets on save.
//!
//! # Key Types
//! - [`Opcode`] - The supported instruction set with operand, flow and stack metadata
//! - [`Instruction`] / [`Operand`] - A decoded instruction
//! - [`MethodBody`] - The code of one method, with insertion and verification
//!
//! # Main Functions
//! - [`decode_body`] - Decode a byte stream into instructions
//! - [`encode_body`] - Encode instructions into a byte stream
//!
//! # Example
//! ```rust
//! use modcompat::code::{decode_body, encode_body, Instruction, Opcode};
//!
//! let instructions = vec![Instruction::ldc_i4(42), Instruction::simple(Opcode::Pop), Instruction::simple(Opcode::Ret)];
//! let code = encode_body(&instructions)?;
//! assert_eq!(code, vec![0x1F, 0x2A, 0x26, 0x2A]);
//! assert_eq!(decode_body(&code)?, instructions);
//! # Ok::<(), modcompat::Error>(())
//! ```

mod body;
mod decoder;
mod encoder;
mod instruction;
mod opcodes;

pub use body::{CallResolver, MethodBody};
pub use decoder::decode_body;
pub use encoder::encode_body;
pub use instruction::{Instruction, Operand};
pub use opcodes::{FlowType, Opcode, OperandType, StackEffect};
