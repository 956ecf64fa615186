//! # The `impl_opcodes!` macro
//!
//! The opcode table is generated from a single declarative table so that the
//! enum variants, the category lookup, the mnemonic strings and the raw-byte
//! conversions can never drift apart.
//!
//! Each row of the table includes:
//!
//! - A short docstring.
//! - The category identifier (`cat0`..`cat7`, or `meta` for pseudo
//!   instructions that must be eliminated before packing).
//! - The opcode value within its category (low five bits of the raw opcode).
//! - The variant identifier and the display mnemonic.

use crate::Category;
use core::fmt;

/// Raised when a raw opcode value does not map to an encodable opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("invalid opcode")]
pub struct InvalidOpcode;

/// Comparison condition carried by compare and predicated-branch opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CmpCond {
    /// Equal.
    Eq = 0,
    /// Not equal.
    Ne = 1,
    /// Less than.
    Lt = 2,
    /// Less than or equal.
    Le = 3,
    /// Greater than.
    Gt = 4,
    /// Greater than or equal.
    Ge = 5,
}

impl CmpCond {
    /// Condition from its three-bit field value.
    pub const fn from_bits(bits: u8) -> Result<Self, InvalidOpcode> {
        match bits & 0x7 {
            0 => Ok(Self::Eq),
            1 => Ok(Self::Ne),
            2 => Ok(Self::Lt),
            3 => Ok(Self::Le),
            4 => Ok(Self::Gt),
            5 => Ok(Self::Ge),
            _ => Err(InvalidOpcode),
        }
    }

    /// The condition testing the logically inverted relation.
    pub const fn inverse(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Le => Self::Gt,
            Self::Gt => Self::Le,
            Self::Ge => Self::Lt,
        }
    }
}

impl fmt::Display for CmpCond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
        };
        write!(f, "{s}")
    }
}

macro_rules! cat_base {
    (cat0) => {
        0x000
    };
    (cat1) => {
        0x020
    };
    (cat2) => {
        0x040
    };
    (cat3) => {
        0x060
    };
    (cat4) => {
        0x080
    };
    (cat5) => {
        0x0a0
    };
    (cat6) => {
        0x0c0
    };
    (cat7) => {
        0x0e0
    };
    (meta) => {
        0x100
    };
}

macro_rules! cat_of {
    (cat0) => {
        Some(Category::Cat0)
    };
    (cat1) => {
        Some(Category::Cat1)
    };
    (cat2) => {
        Some(Category::Cat2)
    };
    (cat3) => {
        Some(Category::Cat3)
    };
    (cat4) => {
        Some(Category::Cat4)
    };
    (cat5) => {
        Some(Category::Cat5)
    };
    (cat6) => {
        Some(Category::Cat6)
    };
    (cat7) => {
        Some(Category::Cat7)
    };
    (meta) => {
        None
    };
}

macro_rules! impl_opcodes {
    (
        $(
            $doc:literal
            $cat:ident $val:literal $Op:ident $mnemonic:literal
        )*
    ) => {
        /// Operation selector of an instruction.
        ///
        /// The raw value composes the category in bits 5..8 with the
        /// per-category opcode in bits 0..5. Pseudo instructions (`meta`
        /// rows) live above the encodable range and are rejected by the
        /// packer.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[repr(u16)]
        pub enum Opcode {
            $(
                #[doc = $doc]
                $Op = cat_base!($cat) + $val,
            )*
        }

        impl Opcode {
            /// Encoding category, or `None` for pseudo instructions.
            pub const fn category(self) -> Option<Category> {
                match self {
                    $(
                        Self::$Op => cat_of!($cat),
                    )*
                }
            }

            /// Display mnemonic.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(
                        Self::$Op => $mnemonic,
                    )*
                }
            }
        }

        impl core::convert::TryFrom<u16> for Opcode {
            type Error = InvalidOpcode;

            fn try_from(raw: u16) -> Result<Self, Self::Error> {
                match raw {
                    $(
                        _ if raw == cat_base!($cat) + $val => {
                            // Pseudo opcodes never appear in packed words.
                            if (cat_base!($cat) + $val) as u16 > 0xff {
                                Err(InvalidOpcode)
                            } else {
                                Ok(Self::$Op)
                            }
                        }
                    )*
                    _ => Err(InvalidOpcode),
                }
            }
        }
    };
}

impl_opcodes! {
    "No operation; consumes one issue cycle."
    cat0 0x00 Nop "nop"
    "Terminates the shader."
    cat0 0x01 End "end"
    "Unconditional branch."
    cat0 0x02 Jump "jump"
    "Branch taken if any lane is live in the execution mask."
    cat0 0x03 JumpExecAny "jmp.any"
    "Deactivates lanes failing the comparison; begins an if arm."
    cat0 0x04 IfICmp "if.icmp"
    "Swaps the active set within the innermost if; begins an else arm."
    cat0 0x05 ElseICmp "else.icmp"
    "Loop backedge test against the nesting counter."
    cat0 0x06 WhileICmp "while.icmp"
    "Pushes execution-mask levels onto the nesting stack."
    cat0 0x07 PushExec "push.exec"
    "Pops execution-mask levels and reactivates matching lanes."
    cat0 0x08 PopExec "pop.exec"
    "Demotes the invocation to a helper; stores are masked from here on."
    cat0 0x09 Demote "demote"
    "Elects exactly one live lane; used to enter the preamble."
    cat0 0x0a GetOne "getone"
    "Preamble start marker; skips the preamble on non-elected waves."
    cat0 0x0b ShPs "shps"
    "Preamble end marker."
    cat0 0x0c ShPe "shpe"

    "Register move; the source may be an immediate or const-file slot."
    cat1 0x00 Mov "mov"
    "Width or type conversion."
    cat1 0x01 Cov "cov"
    "Writes the indirect address register."
    cat1 0x02 MovA "mova"

    "Floating-point add."
    cat2 0x00 FAdd "add.f"
    "Floating-point multiply."
    cat2 0x01 FMul "mul.f"
    "Floating-point minimum."
    cat2 0x02 FMin "min.f"
    "Floating-point maximum."
    cat2 0x03 FMax "max.f"
    "Floating-point compare; writes a canonical 0/1 result."
    cat2 0x04 FCmp "cmps.f"
    "Floating-point absolute value / negate through source modifiers."
    cat2 0x05 FAbsNeg "absneg.f"
    "Floating-point floor."
    cat2 0x06 FFloor "floor.f"
    "Integer add."
    cat2 0x07 IAdd "add.i"
    "Integer subtract."
    cat2 0x08 ISub "sub.i"
    "Signed integer minimum."
    cat2 0x09 IMin "min.s"
    "Signed integer maximum."
    cat2 0x0a IMax "max.s"
    "Unsigned integer minimum."
    cat2 0x0b UMin "min.u"
    "Unsigned integer maximum."
    cat2 0x0c UMax "max.u"
    "Signed integer compare; writes a canonical 0/1 result."
    cat2 0x0d ICmp "cmps.s"
    "Unsigned integer compare; writes a canonical 0/1 result."
    cat2 0x0e UCmp "cmps.u"
    "Bitwise and."
    cat2 0x0f And "and.b"
    "Bitwise or."
    cat2 0x10 Or "or.b"
    "Bitwise exclusive or."
    cat2 0x11 Xor "xor.b"
    "Bitwise complement."
    cat2 0x12 Not "not.b"
    "Logical shift left."
    cat2 0x13 Shl "shl.b"
    "Logical shift right."
    cat2 0x14 Shr "shr.b"
    "Arithmetic shift right."
    cat2 0x15 Ashr "ashr.b"
    "Unsigned 32x32 multiply, low half."
    cat2 0x16 UMul "mul.u"
    "Unsigned 32x32 multiply, high half."
    cat2 0x17 UMulHigh "mulh.u"
    "Integer absolute value / negate through source modifiers."
    cat2 0x18 IAbsNeg "absneg.s"
    "Perspective varying fetch via barycentrics."
    cat2 0x19 Bary "bary.f"
    "Flat varying fetch bypassing interpolation."
    cat2 0x1a Flat "flat.b"

    "Floating-point multiply-add."
    cat3 0x00 MadF "mad.f"
    "Unsigned integer multiply-add."
    cat3 0x01 MadU "mad.u"
    "Signed integer multiply-add."
    cat3 0x02 MadS "mad.s"
    "Select: `dst = src1 ? src0 : src2`."
    cat3 0x03 SelB "sel.b"

    "Reciprocal."
    cat4 0x00 Rcp "rcp"
    "Reciprocal square root."
    cat4 0x01 Rsq "rsq"
    "Square root."
    cat4 0x02 Sqrt "sqrt"
    "Base-2 logarithm."
    cat4 0x03 Log2 "log2"
    "Base-2 exponential."
    cat4 0x04 Exp2 "exp2"
    "Sine, quadrant fix-up stage."
    cat4 0x05 SinPt1 "sin.p1"
    "Sine, first-quadrant sinc stage."
    cat4 0x06 SinPt2 "sin.p2"

    "Texture sample with implicit derivatives."
    cat5 0x00 Sam "sam"
    "Texture sample with lod bias."
    cat5 0x01 SamB "sam.b"
    "Texture sample with explicit lod."
    cat5 0x02 SamL "sam.l"
    "Texture sample with explicit gradients."
    cat5 0x03 SamGrad "sam.g"
    "Texture-cache-backed buffer load."
    cat5 0x04 Isam "isam"
    "Texture dimension query."
    cat5 0x05 GetSize "getsize"
    "Screen-space derivative along x."
    cat5 0x06 Dsx "dsx"
    "Screen-space derivative along y."
    cat5 0x07 Dsy "dsy"

    "Global memory load."
    cat6 0x00 LdG "ldg"
    "Global memory store."
    cat6 0x01 StG "stg"
    "Shared (local) memory load."
    cat6 0x02 LdL "ldl"
    "Shared (local) memory store."
    cat6 0x03 StL "stl"
    "Scratch (private) memory load; spill fills use it."
    cat6 0x04 LdP "ldp"
    "Scratch (private) memory store; spills use it."
    cat6 0x05 StP "stp"
    "Storage-buffer load."
    cat6 0x06 LdIbo "ldib"
    "Storage-buffer store."
    cat6 0x07 StIbo "stib"
    "Image load."
    cat6 0x08 LdImg "ldimg"
    "Image store."
    cat6 0x09 StImg "stimg"
    "Const-file load with a runtime offset."
    cat6 0x0a LdC "ldc"
    "Const-file store; preamble use only."
    cat6 0x0b StC "stc"
    "Atomic add; the destination is tied to the data source."
    cat6 0x0c AtomicAdd "atomic.add"
    "Atomic minimum; the destination is tied to the data source."
    cat6 0x0d AtomicMin "atomic.min"
    "Atomic maximum; the destination is tied to the data source."
    cat6 0x0e AtomicMax "atomic.max"
    "Atomic and; the destination is tied to the data source."
    cat6 0x0f AtomicAnd "atomic.and"
    "Atomic or; the destination is tied to the data source."
    cat6 0x10 AtomicOr "atomic.or"
    "Atomic exclusive or; the destination is tied to the data source."
    cat6 0x11 AtomicXor "atomic.xor"
    "Atomic exchange; the destination is tied to the data source."
    cat6 0x12 AtomicExch "atomic.xchg"
    "Atomic compare-exchange; the destination is tied to the data source."
    cat6 0x13 AtomicCmpXchg "atomic.cmpxchg"

    "Execution barrier across the workgroup."
    cat7 0x00 Bar "bar"
    "Memory fence; ordering classes are carried in the payload."
    cat7 0x01 Fence "fence"

    "SSA merge of predecessor values."
    meta 0x00 Phi "meta.phi"
    "Extracts one scalar component of a grouped value."
    meta 0x01 Split "meta.split"
    "Groups scalar components into consecutive registers."
    meta 0x02 Combine "meta.combine"
    "Shader input made live at entry."
    meta 0x03 Input "meta.input"
    "Marks the end of a block's logical scope for liveness."
    meta 0x04 LogicalEnd "meta.lend"
    "Register spill to scratch; replaced by `stp` during allocation."
    meta 0x05 Spill "meta.spill"
    "Register fill from scratch; replaced by `ldp` during allocation."
    meta 0x06 Fill "meta.fill"
}

impl Opcode {
    /// Raw opcode value as packed into an instruction word.
    ///
    /// Only meaningful for encodable opcodes; pseudo opcodes return their
    /// out-of-range discriminant, which the packer rejects.
    pub const fn raw(self) -> u16 {
        self as u16
    }

    /// Whether this is a pseudo instruction that cannot be encoded.
    pub const fn is_meta(self) -> bool {
        self.category().is_none()
    }

    /// Whether the opcode executes on the special-function unit.
    pub const fn is_sfu(self) -> bool {
        matches!(self.category(), Some(Category::Cat4))
    }

    /// Whether the opcode retires asynchronously (texture or memory).
    pub const fn is_async(self) -> bool {
        matches!(self.category(), Some(Category::Cat5) | Some(Category::Cat6))
    }

    /// Whether the opcode carries a comparison condition field.
    pub const fn has_cond(self) -> bool {
        matches!(
            self,
            Self::FCmp
                | Self::ICmp
                | Self::UCmp
                | Self::IfICmp
                | Self::ElseICmp
                | Self::WhileICmp
        )
    }

    /// Whether the destination must alias one of the sources.
    pub const fn is_atomic(self) -> bool {
        matches!(
            self,
            Self::AtomicAdd
                | Self::AtomicMin
                | Self::AtomicMax
                | Self::AtomicAnd
                | Self::AtomicOr
                | Self::AtomicXor
                | Self::AtomicExch
                | Self::AtomicCmpXchg
        )
    }

    /// Whether the instruction has an observable effect besides its
    /// destination write and therefore must never be eliminated.
    pub const fn has_side_effects(self) -> bool {
        matches!(
            self,
            Self::End
                | Self::Demote
                | Self::StG
                | Self::StL
                | Self::StP
                | Self::StIbo
                | Self::StImg
                | Self::StC
                | Self::Bar
                | Self::Fence
        ) || self.is_atomic()
    }

    /// Whether the opcode is a memory store.
    pub const fn is_store(self) -> bool {
        matches!(
            self,
            Self::StG | Self::StL | Self::StP | Self::StIbo | Self::StImg | Self::StC
        )
    }

    /// Whether the opcode is a memory load.
    pub const fn is_load(self) -> bool {
        matches!(
            self,
            Self::LdG | Self::LdL | Self::LdP | Self::LdIbo | Self::LdImg | Self::LdC
        )
    }

    /// Whether the opcode participates in control flow.
    pub const fn is_flow(self) -> bool {
        matches!(self.category(), Some(Category::Cat0))
    }

    /// Fixed source-operand count of ALU-like opcodes.
    ///
    /// Categories with variable operand sets (cat0, cat5, cat6) announce
    /// their sources through presence bits instead and return `None`.
    pub const fn fixed_srcs(self) -> Option<u8> {
        match self.category() {
            Some(Category::Cat1) => Some(1),
            Some(Category::Cat2) => match self {
                Self::FAbsNeg | Self::FFloor | Self::Not | Self::IAbsNeg | Self::Flat => {
                    Some(1)
                }
                _ => Some(2),
            },
            Some(Category::Cat3) => Some(3),
            Some(Category::Cat4) => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn raw_round_trips_for_encodable_opcodes() {
        for op in Opcode::iter() {
            if op.is_meta() {
                assert!(Opcode::try_from(op.raw()).is_err());
            } else {
                assert_eq!(Opcode::try_from(op.raw()), Ok(op));
            }
        }
    }

    #[test]
    fn categories_match_raw_layout() {
        for op in Opcode::iter() {
            if let Some(cat) = op.category() {
                assert_eq!((op.raw() >> 5) as u8, cat as u8);
            } else {
                assert!(op.raw() > 0xff);
            }
        }
    }
}
