//! Instruction set model and binary encoding for the Ember shader compiler.
//!
//! The crate is the single source of truth for the LIR instruction set:
//! categories, opcodes, operand primitives, instruction flags, and the
//! packing of instructions into the 64/128-bit word format consumed by the
//! hardware, together with the inverse disassembly direction.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod category;
pub mod decode;
pub mod encode;
mod flags;
mod header;
mod instruction;
mod opcode;
mod regs;

#[cfg(test)]
mod encoding_tests;

pub use category::Category;
pub use decode::{decode, decode_stream, DecodeError};
pub use encode::{encode, encode_stream, EncodeError, InstrWords};
pub use flags::{BarrierClass, InstrFlags, SrcMods};
pub use header::{HeaderError, ShaderHeader, HEADER_LEN, HEADER_MAGIC};
pub use instruction::{ConvKind, Extra, MachInstr, MachSrc, Stage, Width};
pub use opcode::{CmpCond, InvalidOpcode, Opcode};
pub use regs::{ConstSlot, FieldOverflow, Imm10, PhysReg, TexOffset};
