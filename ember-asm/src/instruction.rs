//! Machine-level instruction representation.
//!
//! [`MachInstr`] is the flattened, register-allocated form the packer
//! consumes and the disassembler produces. It carries physical operands
//! only; SSA values and pseudo instructions never reach this layer.

use crate::{
    BarrierClass,
    CmpCond,
    ConstSlot,
    Imm10,
    InstrFlags,
    Opcode,
    PhysReg,
    SrcMods,
    TexOffset,
};

/// Operand width in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Width {
    /// 8-bit; appears in conversions only.
    W8 = 0,
    /// 16-bit.
    W16 = 1,
    /// 32-bit.
    W32 = 2,
    /// 64-bit; split before reaching the machine level.
    W64 = 3,
}

impl Width {
    /// Width in bits.
    pub const fn bits(self) -> u32 {
        match self {
            Self::W8 => 8,
            Self::W16 => 16,
            Self::W32 => 32,
            Self::W64 => 64,
        }
    }

    /// Width from its two-bit field value.
    pub const fn from_bits_field(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Self::W8,
            1 => Self::W16,
            2 => Self::W32,
            _ => Self::W64,
        }
    }
}

/// Shader stage tag carried in the binary header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Stage {
    /// Vertex shader.
    Vertex = 0,
    /// Tessellation control shader.
    TessCtrl = 1,
    /// Tessellation evaluation shader.
    TessEval = 2,
    /// Geometry shader.
    Geometry = 3,
    /// Fragment shader.
    Fragment = 4,
    /// Compute shader.
    Compute = 5,
}

/// A machine source operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MachSrc {
    /// Register source with modifiers.
    Reg {
        /// Source register slot.
        reg: PhysReg,
        /// Applied modifiers.
        mods: SrcMods,
    },
    /// Const-file source with modifiers.
    Const {
        /// Source const-file slot.
        slot: ConstSlot,
        /// Applied modifiers.
        mods: SrcMods,
    },
    /// Ten-bit inline immediate (cat2 only).
    Imm10(Imm10),
    /// Full-width immediate (cat1 only).
    Imm32(u32),
}

impl MachSrc {
    /// Register source without modifiers.
    pub const fn reg(reg: PhysReg) -> Self {
        Self::Reg {
            reg,
            mods: SrcMods::empty(),
        }
    }

    /// Source modifiers, if the operand kind carries them.
    pub fn mods(&self) -> SrcMods {
        match self {
            Self::Reg { mods, .. } | Self::Const { mods, .. } => *mods,
            _ => SrcMods::empty(),
        }
    }
}

/// Conversion kinds of the `cov` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ConvKind {
    /// Float to float width change.
    F2F = 0,
    /// Float to signed integer.
    F2I = 1,
    /// Float to unsigned integer.
    F2U = 2,
    /// Signed integer to float.
    I2F = 3,
    /// Unsigned integer to float.
    U2F = 4,
    /// Unsigned width change.
    U2U = 5,
    /// Signed width change (sign extending).
    I2I = 6,
}

impl ConvKind {
    /// Kind from its three-bit field value.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x7 {
            0 => Self::F2F,
            1 => Self::F2I,
            2 => Self::F2U,
            3 => Self::I2F,
            4 => Self::U2F,
            5 => Self::U2U,
            _ => Self::I2I,
        }
    }
}

/// Per-category operand payload that does not fit the common fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Extra {
    /// No extra payload.
    #[default]
    None,
    /// Branch target as a signed instruction-count displacement.
    Branch {
        /// Displacement from the next instruction.
        offset: i32,
    },
    /// Execution-mask stack depth for `push.exec` / `pop.exec`.
    Exec {
        /// Number of mask levels.
        levels: u8,
    },
    /// Conversion descriptor for `cov`.
    Conv {
        /// Conversion kind.
        kind: ConvKind,
        /// Source width.
        src: Width,
        /// Destination width.
        dst: Width,
    },
    /// Texture operand set.
    Tex {
        /// Texture binding index.
        tex: u8,
        /// Sampler binding index.
        samp: u8,
        /// Static texel offset.
        offset: TexOffset,
        /// Whether the coordinate carries an array layer.
        array: bool,
        /// Number of result components.
        comps: u8,
    },
    /// Memory operand set.
    Mem {
        /// Immediate element offset folded into the access.
        offset: i32,
        /// Buffer or image binding index.
        binding: u8,
    },
    /// Fence ordering classes.
    Fence {
        /// Classes the fence orders against.
        classes: BarrierClass,
    },
}

/// A single machine instruction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MachInstr {
    /// Operation selector.
    pub opcode: Opcode,
    /// Execution flags.
    pub flags: InstrFlags,
    /// Repeat count; the instruction issues `repeat + 1` times.
    pub repeat: u8,
    /// Comparison condition for opcodes that carry one.
    pub cond: Option<CmpCond>,
    /// Destination register, if the opcode writes one.
    pub dst: Option<PhysReg>,
    /// Source operands.
    pub srcs: Vec<MachSrc>,
    /// Category-specific payload.
    pub extra: Extra,
}

impl MachInstr {
    /// An instruction with no operands.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            flags: InstrFlags::empty(),
            repeat: 0,
            cond: None,
            dst: None,
            srcs: Vec::new(),
            extra: Extra::None,
        }
    }

    /// A `nop`.
    pub fn nop() -> Self {
        Self::new(Opcode::Nop)
    }

    /// Builder-style destination.
    pub fn with_dst(mut self, dst: PhysReg) -> Self {
        self.dst = Some(dst);
        self
    }

    /// Builder-style source append.
    pub fn with_src(mut self, src: MachSrc) -> Self {
        self.srcs.push(src);
        self
    }

    /// Builder-style flag set.
    pub fn with_flags(mut self, flags: InstrFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Builder-style extra payload.
    pub fn with_extra(mut self, extra: Extra) -> Self {
        self.extra = extra;
        self
    }

    /// Whether the packed form needs a second word.
    pub fn is_wide(&self) -> bool {
        match self.extra {
            Extra::Tex { offset, .. } => {
                offset != TexOffset::NONE || self.srcs.len() > 2
            }
            Extra::Mem { offset, binding } => {
                !(-1024..=1023).contains(&offset)
                    || binding >= 0x10
                    || self.srcs.len() > 2
            }
            _ => false,
        }
    }
}

impl core::fmt::Display for MachInstr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.flags.contains(InstrFlags::SS) {
            write!(f, "(ss)")?;
        }
        if self.flags.contains(InstrFlags::SY) {
            write!(f, "(sy)")?;
        }
        write!(f, "{}", self.opcode.mnemonic())?;
        if let Some(cond) = self.cond {
            write!(f, ".{cond}")?;
        }
        if self.flags.contains(InstrFlags::SAT) {
            write!(f, "(sat)")?;
        }
        if self.repeat > 0 {
            write!(f, "(rpt{})", self.repeat)?;
        }
        if let Some(dst) = self.dst {
            write!(f, " {dst}")?;
        }
        for (i, src) in self.srcs.iter().enumerate() {
            if i > 0 || self.dst.is_some() {
                write!(f, ",")?;
            }
            match src {
                MachSrc::Reg { reg, mods } => {
                    write!(f, " ")?;
                    if mods.contains(SrcMods::ABS) {
                        write!(f, "(abs)")?;
                    }
                    if mods.contains(SrcMods::NEG) {
                        write!(f, "(neg)")?;
                    }
                    if mods.contains(SrcMods::NOT) {
                        write!(f, "(not)")?;
                    }
                    if mods.contains(SrcMods::R) {
                        write!(f, "(r)")?;
                    }
                    write!(f, "{reg}")?;
                }
                MachSrc::Const { slot, .. } => write!(f, " {slot}")?,
                MachSrc::Imm10(imm) => write!(f, " {imm}")?,
                MachSrc::Imm32(v) => write!(f, " #{v:#x}")?,
            }
        }
        match self.extra {
            Extra::Branch { offset } => write!(f, " #{offset}")?,
            Extra::Exec { levels } => write!(f, " #{levels}")?,
            Extra::Mem { offset, binding } => {
                if offset != 0 || binding != 0 {
                    write!(f, " [{binding}+{offset}]")?;
                }
            }
            Extra::Tex { tex, samp, .. } => write!(f, " tex={tex} samp={samp}")?,
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_tex_sample_is_narrow() {
        let i = MachInstr::new(Opcode::Sam)
            .with_dst(PhysReg::full(0))
            .with_src(MachSrc::reg(PhysReg::full(4)))
            .with_extra(Extra::Tex {
                tex: 0,
                samp: 0,
                offset: TexOffset::NONE,
                array: false,
                comps: 4,
            });
        assert!(!i.is_wide());
    }

    #[test]
    fn offset_tex_sample_is_wide() {
        let i = MachInstr::new(Opcode::Sam).with_extra(Extra::Tex {
            tex: 0,
            samp: 0,
            offset: TexOffset::new(1, -1, 0).unwrap(),
            array: false,
            comps: 4,
        });
        assert!(i.is_wide());
    }
}
