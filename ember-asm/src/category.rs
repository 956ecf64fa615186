//! Instruction categories.
//!
//! Every encodable opcode belongs to one of eight categories. The category
//! selects the payload layout of the packed instruction word and the issue
//! port the hardware dispatches the instruction to.

use core::fmt;

/// Encoding category of an instruction.
///
/// The category occupies the top three bits of every packed word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Category {
    /// Control flow: branches, predicate-stack manipulation, `end`, `nop`.
    Cat0 = 0,
    /// Moves and width/type conversions.
    Cat1 = 1,
    /// Two-source ALU.
    Cat2 = 2,
    /// Three-source ALU (multiply-add, select).
    Cat3 = 3,
    /// Special-function unit: transcendentals.
    Cat4 = 4,
    /// Texture sampling and texture-cache loads.
    Cat5 = 5,
    /// Memory access and atomics.
    Cat6 = 6,
    /// Synchronization barriers and fences.
    Cat7 = 7,
}

impl Category {
    /// Number of encodable categories.
    pub const COUNT: usize = 8;

    /// Category from the top three bits of a packed word.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x7 {
            0 => Self::Cat0,
            1 => Self::Cat1,
            2 => Self::Cat2,
            3 => Self::Cat3,
            4 => Self::Cat4,
            5 => Self::Cat5,
            6 => Self::Cat6,
            _ => Self::Cat7,
        }
    }

    /// Whether instructions of this category may occupy two 64-bit words.
    ///
    /// Only texture and memory instructions carry operand sets wide enough
    /// to spill into a second word; every other category is fixed 64-bit.
    pub const fn may_be_wide(self) -> bool {
        matches!(self, Self::Cat5 | Self::Cat6)
    }

    /// Whether results of this category retire through the scalar-op
    /// latency window and require `(ss)` on close consumers.
    pub const fn is_sfu(self) -> bool {
        matches!(self, Self::Cat4)
    }

    /// Whether results of this category retire asynchronously and require
    /// `(sy)` on consumers until synchronized.
    pub const fn is_async(self) -> bool {
        matches!(self, Self::Cat5 | Self::Cat6)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cat{}", *self as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn from_bits_round_trips() {
        for cat in Category::iter() {
            assert_eq!(Category::from_bits(cat as u8), cat);
        }
    }
}
