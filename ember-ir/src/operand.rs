//! Instruction operands.

use crate::{ArrayId, Value};
use ember_asm::{ConstSlot, PhysReg, SrcMods, Width};

/// Typed interpretation of an immediate word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImmType {
    /// Unsigned (or bit-pattern) integer.
    U32,
    /// 32-bit float.
    F32,
    /// 16-bit float stored in the low half.
    F16,
}

/// An immediate operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Imm {
    /// Raw bit pattern.
    pub bits: u32,
    /// Interpretation.
    pub ty: ImmType,
}

impl Imm {
    /// Unsigned integer immediate.
    pub const fn uint(value: u32) -> Self {
        Self {
            bits: value,
            ty: ImmType::U32,
        }
    }

    /// Signed integer immediate, stored two's complement.
    pub const fn int(value: i32) -> Self {
        Self {
            bits: value as u32,
            ty: ImmType::U32,
        }
    }

    /// 32-bit float immediate.
    pub fn float(value: f32) -> Self {
        Self {
            bits: value.to_bits(),
            ty: ImmType::F32,
        }
    }

    /// Value as f32, when typed as one.
    pub fn as_f32(self) -> Option<f32> {
        matches!(self.ty, ImmType::F32).then(|| f32::from_bits(self.bits))
    }
}

/// Where a source operand's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SrcKind {
    /// An SSA value.
    Ssa(Value),
    /// A physical register; post-allocation form.
    Phys(PhysReg),
    /// An immediate.
    Imm(Imm),
    /// A const-file slot.
    Const(ConstSlot),
    /// A register-array element; resolved to a physical register once the
    /// array's base is colored.
    Array {
        /// The array read.
        id: ArrayId,
        /// Static element index; the address register adds any runtime
        /// part when the `RELATIVE` modifier is set.
        elem: u16,
    },
}

/// A source operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Src {
    /// Value source.
    pub kind: SrcKind,
    /// Operand width.
    pub width: Width,
    /// Modifier set.
    pub mods: SrcMods,
}

impl Src {
    /// SSA source of the given width.
    pub const fn ssa(value: Value, width: Width) -> Self {
        Self {
            kind: SrcKind::Ssa(value),
            width,
            mods: SrcMods::empty(),
        }
    }

    /// Immediate source of the given width.
    pub const fn imm(imm: Imm, width: Width) -> Self {
        Self {
            kind: SrcKind::Imm(imm),
            width,
            mods: SrcMods::empty(),
        }
    }

    /// Const-file source of the given width.
    pub const fn const_file(slot: ConstSlot, width: Width) -> Self {
        Self {
            kind: SrcKind::Const(slot),
            width,
            mods: SrcMods::empty(),
        }
    }

    /// The SSA value read, if this is an SSA source.
    pub fn as_ssa(&self) -> Option<Value> {
        match self.kind {
            SrcKind::Ssa(v) => Some(v),
            _ => None,
        }
    }

    /// Builder-style modifier set.
    pub fn with_mods(mut self, mods: SrcMods) -> Self {
        self.mods = mods;
        self
    }
}

/// Where a destination operand writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DstKind {
    /// An SSA value definition.
    Ssa(Value),
    /// A physical register; post-allocation form.
    Phys(PhysReg),
    /// A register-array element write.
    Array {
        /// The array written.
        id: ArrayId,
        /// Static element index.
        elem: u16,
    },
}

/// A destination operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dst {
    /// Write target.
    pub kind: DstKind,
    /// Operand width.
    pub width: Width,
    /// Component write mask; 1 for scalar results, wider for grouped
    /// pseudo-instruction results.
    pub wrmask: u8,
}

impl Dst {
    /// SSA destination of the given width.
    pub const fn ssa(value: Value, width: Width) -> Self {
        Self {
            kind: DstKind::Ssa(value),
            width,
            wrmask: 1,
        }
    }

    /// The SSA value defined, if still in SSA form.
    pub fn as_ssa(&self) -> Option<Value> {
        match self.kind {
            DstKind::Ssa(v) => Some(v),
            _ => None,
        }
    }

    /// The physical register written, post-allocation.
    pub fn as_phys(&self) -> Option<PhysReg> {
        match self.kind {
            DstKind::Phys(r) => Some(r),
            _ => None,
        }
    }
}
