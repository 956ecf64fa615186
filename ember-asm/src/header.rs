//! The 16-byte header prefixed to every packed shader binary.

use crate::Stage;

/// Header magic, `"EMBR"` read as little-endian.
pub const HEADER_MAGIC: u32 = 0x4552_4d42;

/// Header length in bytes.
pub const HEADER_LEN: usize = 16;

/// Malformed shader binary header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    /// The buffer is shorter than [`HEADER_LEN`].
    #[error("buffer too short for a shader header")]
    Truncated,
    /// The magic word does not match.
    #[error("bad header magic {0:#010x}")]
    BadMagic(u32),
    /// Unknown stage tag.
    #[error("unknown stage tag {0}")]
    BadStage(u8),
}

/// Fixed-layout shader binary header.
///
/// Layout (little-endian): magic `u32`, generation `u8`, stage `u8`,
/// half-register count `u8`, full-register count `u8`, const length in
/// vec4 `u16`, instruction count `u32`, reserved `u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShaderHeader {
    /// Hardware generation tag.
    pub generation: u8,
    /// Shader stage.
    pub stage: Stage,
    /// Number of half registers used.
    pub half_regs: u8,
    /// Number of full registers used.
    pub full_regs: u8,
    /// Const-file region size in vec4 units.
    pub const_len: u16,
    /// Number of packed instructions (words may exceed this for wide forms).
    pub instr_count: u32,
}

impl ShaderHeader {
    /// Serializes the header.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&HEADER_MAGIC.to_le_bytes());
        out[4] = self.generation;
        out[5] = self.stage as u8;
        out[6] = self.half_regs;
        out[7] = self.full_regs;
        out[8..10].copy_from_slice(&self.const_len.to_le_bytes());
        out[10..14].copy_from_slice(&self.instr_count.to_le_bytes());
        out
    }

    /// Deserializes a header from the front of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_LEN {
            return Err(HeaderError::Truncated);
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().expect("4 bytes"));
        if magic != HEADER_MAGIC {
            return Err(HeaderError::BadMagic(magic));
        }
        let stage = match bytes[5] {
            0 => Stage::Vertex,
            1 => Stage::TessCtrl,
            2 => Stage::TessEval,
            3 => Stage::Geometry,
            4 => Stage::Fragment,
            5 => Stage::Compute,
            other => return Err(HeaderError::BadStage(other)),
        };
        Ok(Self {
            generation: bytes[4],
            stage,
            half_regs: bytes[6],
            full_regs: bytes[7],
            const_len: u16::from_le_bytes(bytes[8..10].try_into().expect("2 bytes")),
            instr_count: u32::from_le_bytes(bytes[10..14].try_into().expect("4 bytes")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = ShaderHeader {
            generation: 7,
            stage: Stage::Fragment,
            half_regs: 4,
            full_regs: 9,
            const_len: 48,
            instr_count: 1234,
        };
        assert_eq!(ShaderHeader::from_bytes(&h.to_bytes()), Ok(h));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = ShaderHeader {
            generation: 6,
            stage: Stage::Compute,
            half_regs: 0,
            full_regs: 2,
            const_len: 0,
            instr_count: 1,
        }
        .to_bytes();
        bytes[0] ^= 0xff;
        assert!(matches!(
            ShaderHeader::from_bytes(&bytes),
            Err(HeaderError::BadMagic(_))
        ));
    }
}
