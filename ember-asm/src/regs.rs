//! Typed operand primitives of the packed instruction format.

use core::fmt;

/// Out-of-range value for a typed operand field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("operand field out of range")]
pub struct FieldOverflow;

/// A physical scalar register slot.
///
/// The register file is addressed at component granularity: slot `n` names
/// component `n % 4` of vector register `n / 4`. Half registers live in the
/// same merged file; full slot `n` aliases half slots `2n` and `2n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhysReg {
    num: u16,
    half: bool,
}

impl PhysReg {
    /// Highest addressable scalar slot.
    pub const MAX_SLOT: u16 = 0x1ff;

    /// A full-width (32-bit) register slot.
    pub const fn full(num: u16) -> Self {
        Self {
            num: num & Self::MAX_SLOT,
            half: false,
        }
    }

    /// A half-width (16-bit) register slot.
    pub const fn half(num: u16) -> Self {
        Self {
            num: num & Self::MAX_SLOT,
            half: true,
        }
    }

    /// Scalar slot number.
    pub const fn num(self) -> u16 {
        self.num
    }

    /// Whether this is a half-width slot.
    pub const fn is_half(self) -> bool {
        self.half
    }

    /// Vector register index, in file-native units.
    pub const fn reg(self) -> u16 {
        self.num >> 2
    }

    /// Component index within the vector register.
    pub const fn comp(self) -> u16 {
        self.num & 0x3
    }

    /// The slot `delta` scalar positions above this one, same width.
    pub const fn offset(self, delta: u16) -> Self {
        Self {
            num: (self.num + delta) & Self::MAX_SLOT,
            half: self.half,
        }
    }

    /// Ten-bit field value: slot in bits 0..9, width in bit 9.
    pub const fn to_bits(self) -> u16 {
        self.num | ((self.half as u16) << 9)
    }

    /// Register from its ten-bit field value.
    pub const fn from_bits(bits: u16) -> Self {
        Self {
            num: bits & Self::MAX_SLOT,
            half: (bits >> 9) & 1 == 1,
        }
    }
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = if self.half { "hr" } else { "r" };
        let comp = [".x", ".y", ".z", ".w"][self.comp() as usize];
        write!(f, "{file}{}{comp}", self.reg())
    }
}

/// Ten-bit sign-extended inline immediate of cat2 instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct Imm10(u16);

impl Imm10 {
    /// Zero immediate.
    pub const ZERO: Self = Self(0);

    /// Construct from the raw ten-bit field, masking out excess bits.
    pub const fn new(bits: u16) -> Self {
        Self(bits & 0x3ff)
    }

    /// Construct from a signed value if it fits the ten-bit range.
    pub const fn from_i32(value: i32) -> Result<Self, FieldOverflow> {
        if value >= -512 && value <= 511 {
            Ok(Self((value as u16) & 0x3ff))
        } else {
            Err(FieldOverflow)
        }
    }

    /// Raw field bits.
    pub const fn to_bits(self) -> u16 {
        self.0
    }

    /// Sign-extended value.
    pub const fn value(self) -> i32 {
        ((self.0 as i32) << 22) >> 22
    }
}

impl fmt::Display for Imm10 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.value())
    }
}

/// Static texel offset of a texture instruction.
///
/// Each component is a signed four-bit field in `[-8, 7]`, packed x-first
/// from bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct TexOffset(u16);

impl TexOffset {
    /// No offset.
    pub const NONE: Self = Self(0);

    /// Pack three component offsets, each in `[-8, 7]`.
    pub const fn new(x: i8, y: i8, z: i8) -> Result<Self, FieldOverflow> {
        if x < -8 || x > 7 || y < -8 || y > 7 || z < -8 || z > 7 {
            return Err(FieldOverflow);
        }
        Ok(Self(
            (x as u16 & 0xf) | ((y as u16 & 0xf) << 4) | ((z as u16 & 0xf) << 8),
        ))
    }

    /// Construct from the raw twelve-bit field.
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & 0xfff)
    }

    /// Raw field bits.
    pub const fn to_bits(self) -> u16 {
        self.0
    }

    /// Unpacked component offsets.
    pub const fn components(self) -> (i8, i8, i8) {
        let x = ((self.0 & 0xf) as i8) << 4 >> 4;
        let y = (((self.0 >> 4) & 0xf) as i8) << 4 >> 4;
        let z = (((self.0 >> 8) & 0xf) as i8) << 4 >> 4;
        (x, y, z)
    }
}

/// A const-file offset in scalar (32-bit word) units.
///
/// The const file is programmed in vec4 granularity; slot `n` names
/// component `n % 4` of vec4 `n / 4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct ConstSlot(u16);

impl ConstSlot {
    /// Slot from a scalar word offset.
    pub const fn new(word: u16) -> Self {
        Self(word)
    }

    /// Scalar word offset.
    pub const fn word(self) -> u16 {
        self.0
    }

    /// Containing vec4 index.
    pub const fn vec4(self) -> u16 {
        self.0 >> 2
    }

    /// Component within the containing vec4.
    pub const fn comp(self) -> u16 {
        self.0 & 0x3
    }

    /// The slot `delta` words above this one.
    pub const fn offset(self, delta: u16) -> Self {
        Self(self.0 + delta)
    }
}

impl fmt::Display for ConstSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let comp = [".x", ".y", ".z", ".w"][self.comp() as usize];
        write!(f, "c{}{comp}", self.vec4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, false)]
    #[case(7, true)]
    #[case(191, false)]
    fn phys_reg_bits_round_trip(#[case] num: u16, #[case] half: bool) {
        let r = if half {
            PhysReg::half(num)
        } else {
            PhysReg::full(num)
        };
        assert_eq!(PhysReg::from_bits(r.to_bits()), r);
    }

    #[test]
    fn imm10_sign_extends() {
        assert_eq!(Imm10::from_i32(-1).unwrap().value(), -1);
        assert_eq!(Imm10::from_i32(-512).unwrap().value(), -512);
        assert_eq!(Imm10::from_i32(511).unwrap().value(), 511);
        assert!(Imm10::from_i32(512).is_err());
        assert!(Imm10::from_i32(-513).is_err());
    }

    #[rstest]
    #[case(-8, 7, 0)]
    #[case(0, 0, 0)]
    #[case(7, -8, -1)]
    fn tex_offset_round_trips(#[case] x: i8, #[case] y: i8, #[case] z: i8) {
        let o = TexOffset::new(x, y, z).unwrap();
        assert_eq!(o.components(), (x, y, z));
    }

    #[test]
    fn tex_offset_packs_four_bit_fields() {
        let o = TexOffset::new(-1, 2, -8).unwrap();
        assert_eq!(
            o.to_bits(),
            (0xf) | (0x2 << 4) | (0x8 << 8),
        );
    }
}
