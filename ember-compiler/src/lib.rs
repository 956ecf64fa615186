//! Backend compiler core for the Ember tiled GPU family.
//!
//! The crate consumes a fully typed, structured, SSA-form shader (the
//! high-level IR under [`hir`]) and produces a packed binary plus a
//! [`metadata::ShaderMetadata`] record. The pipeline is a straight line:
//! HIR lowering and normalization, SSA optimization, a second lowering
//! round for address arithmetic, predicated-control-flow emission,
//! latency-aware scheduling, register allocation, post-allocation
//! scheduling and sync legalization, cleanup, and binary packing.
//!
//! One [`context::CompilerContext`] serves one driver instance; each
//! compilation owns its IR arenas and shares nothing but the atomic
//! variant counter, so callers may compile on multiple threads.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod binary;
pub mod context;
mod cp;
pub mod emit;
pub mod error;
pub mod generation;
pub mod hir;
mod layout;
mod legalize;
pub mod lower;
pub mod metadata;
pub mod opt;
pub mod pipeline;
mod postsched;
pub mod ra;
mod sched;

pub use context::{CompilerContext, CompilerOptions};
pub use error::{BugCode, CompileError};
pub use generation::{Gen6, Gen7, Generation};
pub use pipeline::{compile_variant, CompiledVariant};
