//! Hardware generations.
//!
//! Generation-specific decisions are expressed through a trait of
//! associated constants so the pipeline monomorphizes per generation
//! instead of branching on a runtime id in every pass.

use ember_asm::Opcode;

/// A hardware generation the compiler can target.
pub trait Generation: Copy + Default + 'static {
    /// Tag written into the binary header.
    const TAG: u8;

    /// Whether half and full registers share one physical file.
    const MERGED_REGS: bool;
    /// Whether texture-cache-backed storage-buffer loads are available.
    const HAS_ISAM_SSBO: bool;
    /// Whether the once-per-wave preamble is supported.
    const HAS_PREAMBLE: bool;
    /// Alignment, in vec4, of each uploaded const region.
    const CONST_UPLOAD_UNIT: u32;
    /// Const file size in vec4.
    const MAX_CONST: u32;
    /// Whether flat varyings bypass the interpolator.
    const FLAT_BYPASS: bool;
    /// Pointer width in 32-bit words.
    const POINTER_SIZE: u32;
    /// Hard cap on packed instructions.
    const MAX_INSTRS: u32;

    /// Scalar register-file size in full-width slots.
    const REG_FILE_SLOTS: u16 = 192;

    /// Cycles before an SFU result may be consumed without `(ss)`.
    const SFU_LATENCY: u32 = 8;
    /// Cycles before a texture/memory result may be consumed without
    /// `(sy)`.
    const ASYNC_LATENCY: u32 = 10;
    /// Longest delay-slot run the scheduler fills with `nop`s.
    const MAX_DELAY: u32 = 6;
    /// Whether latency is high enough to justify the larger live-value
    /// threshold in the pre-RA scheduler.
    const HIGH_LATENCY: bool;

    /// Issue-to-read latency of an ALU result, in cycles.
    fn alu_latency(op: Opcode) -> u32 {
        match op.category() {
            Some(ember_asm::Category::Cat3) => 3,
            Some(ember_asm::Category::Cat4) => Self::SFU_LATENCY,
            Some(ember_asm::Category::Cat5) | Some(ember_asm::Category::Cat6) => {
                Self::ASYNC_LATENCY
            }
            _ => 3,
        }
    }
}

/// The sixth generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gen6;

impl Generation for Gen6 {
    const TAG: u8 = 6;
    const MERGED_REGS: bool = true;
    const HAS_ISAM_SSBO: bool = false;
    const HAS_PREAMBLE: bool = false;
    const CONST_UPLOAD_UNIT: u32 = 4;
    const MAX_CONST: u32 = 512;
    const FLAT_BYPASS: bool = false;
    const POINTER_SIZE: u32 = 2;
    const MAX_INSTRS: u32 = 8192;
    const HIGH_LATENCY: bool = false;
}

/// The seventh generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gen7;

impl Generation for Gen7 {
    const TAG: u8 = 7;
    const MERGED_REGS: bool = true;
    const HAS_ISAM_SSBO: bool = true;
    const HAS_PREAMBLE: bool = true;
    const CONST_UPLOAD_UNIT: u32 = 8;
    const MAX_CONST: u32 = 640;
    const FLAT_BYPASS: bool = true;
    const POINTER_SIZE: u32 = 2;
    const MAX_INSTRS: u32 = 16384;
    const HIGH_LATENCY: bool = true;
}

static_assertions::const_assert!(Gen6::MAX_CONST <= Gen7::MAX_CONST);
