//! Compilation error taxonomy.
//!
//! Every fallible pass returns a [`CompileError`]; callers unwind to the
//! `compile_variant` boundary. There is no retry and no partial output.

use ember_asm::{DecodeError, EncodeError};
use ember_ir::ValidationError;

/// Stable code identifying an internal-bug class.
///
/// Codes are part of the driver-visible contract and never renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum BugCode {
    /// An opcode reached a pass that has no handling for it.
    UnreachableOpcode = 0x01,
    /// The register allocator found a cycle while resolving spills.
    SpillCycle = 0x02,
    /// Execution-mask pushes and pops did not match.
    UnmatchedExec = 0x03,
    /// A pseudo instruction survived to the packer.
    StrayPseudoOp = 0x04,
    /// The scheduler failed to find a ready instruction.
    SchedulerWedged = 0x05,
    /// A value was consumed before any definition was emitted.
    UseBeforeDef = 0x06,
    /// A structured node kind reached the emitter out of position.
    MalformedStructure = 0x07,
    /// Loop nesting did not return to zero on exit.
    LoopNesting = 0x08,
}

/// Why a compilation failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// An inter-pass validator rejected the IR.
    #[error("invariant violation after pass `{pass}`: {source}")]
    InvariantViolation {
        /// The pass that produced the rejected IR.
        pass: &'static str,
        /// The violated rule.
        #[source]
        source: ValidationError,
    },
    /// A hard resource limit was exceeded.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),
    /// A legal input cannot be expressed on this generation.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    /// The compiler reached a state it believed impossible.
    #[error("internal bug {code:?}: {detail}")]
    InternalBug {
        /// Stable bug code.
        code: BugCode,
        /// Free-form context for bug reports.
        detail: String,
    },
    /// The packer rejected an instruction.
    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),
    /// The disassembler rejected its own output.
    #[error("disassembly failed: {0}")]
    Decode(#[from] DecodeError),
}

impl CompileError {
    /// Shorthand for an [`CompileError::InternalBug`].
    pub fn bug(code: BugCode, detail: impl Into<String>) -> Self {
        Self::InternalBug {
            code,
            detail: detail.into(),
        }
    }
}

/// Result alias used by every pass.
pub type Result<T> = core::result::Result<T, CompileError>;
