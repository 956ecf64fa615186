//! Arena-backed low-level IR for the Ember shader compiler.
//!
//! The IR models a scalar, typed-width instruction stream over SSA values
//! before register allocation and physical registers after it. Blocks,
//! instructions and register arrays live in per-shader arenas addressed by
//! typed indices; use-def edges are index pairs, never pointers.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod arena;
mod array;
mod block;
mod builder;
mod display;
mod instr;
mod operand;
mod shader;
pub mod validate;

pub use arena::{Arena, ArenaId, ArrayId, BlockId, InstrId, Value};
pub use array::ArrayDecl;
pub use block::Block;
pub use builder::Builder;
pub use instr::{Instr, InstrExtra, MemInfo, TexInfo};
pub use operand::{Dst, DstKind, Imm, ImmType, Src, SrcKind};
pub use shader::{ConstRegion, ConstState, Shader, UboUpload};
pub use validate::{validate_predicated, validate_ssa, ValidationError};
