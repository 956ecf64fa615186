//! Packing machine instructions into the binary word format.
//!
//! Every instruction packs one little-endian 64-bit word; wide cat5/cat6
//! forms append a second word announced by the `wide` bit. The field
//! helpers below are shared with [`crate::decode`] so the two stay
//! self-inverse.

use crate::{
    Category,
    Extra,
    FieldOverflow,
    InstrFlags,
    MachInstr,
    MachSrc,
    Opcode,
    TexOffset,
    Width,
};

/// Packing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// A pseudo instruction survived to the packer.
    #[error("pseudo opcode `{0}` cannot be encoded")]
    PseudoOpcode(Opcode),
    /// A flag is set that the category cannot express.
    #[error("illegal flag combination on `{0}`")]
    IllegalFlags(Opcode),
    /// An operand kind or position the category cannot express.
    #[error("operand not encodable on `{0}`")]
    IllegalOperand(Opcode),
    /// A required operand or condition is missing.
    #[error("missing operand on `{0}`")]
    MissingOperand(Opcode),
    /// A typed field overflowed its bit width.
    #[error(transparent)]
    Field(#[from] FieldOverflow),
    /// Repeat counts are limited to three.
    #[error("repeat count {0} out of range")]
    Repeat(u8),
}

/// The packed form of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrWords {
    /// First (or only) word.
    pub lo: u64,
    /// Second word of wide cat5/cat6 forms.
    pub hi: Option<u64>,
}

impl InstrWords {
    /// Number of 64-bit words occupied.
    pub fn len(&self) -> usize {
        1 + usize::from(self.hi.is_some())
    }

    /// Always false; present for clippy's `len` convention.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Appends the words to a little-endian byte stream.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.lo.to_le_bytes());
        if let Some(hi) = self.hi {
            out.extend_from_slice(&hi.to_le_bytes());
        }
    }
}

// Common field positions (word 0).
pub(crate) const CAT_SHIFT: u32 = 61;
pub(crate) const SS_BIT: u32 = 60;
pub(crate) const SY_BIT: u32 = 59;
pub(crate) const RPT_SHIFT: u32 = 57;
pub(crate) const SAT_BIT: u32 = 56;
pub(crate) const WIDE_BIT: u32 = 55;
pub(crate) const OPC_SHIFT: u32 = 50;
pub(crate) const EI_BIT: u32 = 49;
pub(crate) const KILL_BIT: u32 = 48;
pub(crate) const PRED_BIT: u32 = 47;

// Shared ALU-ish field positions.
pub(crate) const DST_SHIFT: u32 = 37;

// Source kinds as packed in two-bit fields.
pub(crate) const KIND_REG: u64 = 0;
pub(crate) const KIND_CONST: u64 = 1;
pub(crate) const KIND_IMM: u64 = 2;

pub(crate) fn field(value: u64, shift: u32, bits: u32) -> u64 {
    debug_assert!(value < (1 << bits));
    value << shift
}

fn src_reg_bits(src: &MachSrc) -> Result<(u64, u64, u64), FieldOverflow> {
    // (kind, value, mods) triple of a register-or-const-or-imm10 source.
    match src {
        MachSrc::Reg { reg, mods } => {
            Ok((KIND_REG, reg.to_bits() as u64, mods.bits() as u64))
        }
        MachSrc::Const { slot, mods } => {
            if slot.word() > 0x3ff {
                return Err(FieldOverflow);
            }
            Ok((KIND_CONST, slot.word() as u64, mods.bits() as u64))
        }
        MachSrc::Imm10(imm) => Ok((KIND_IMM, imm.to_bits() as u64, 0)),
        MachSrc::Imm32(_) => Err(FieldOverflow),
    }
}

fn check_flags(instr: &MachInstr, cat: Category) -> Result<(), EncodeError> {
    let f = instr.flags;
    if cat == Category::Cat0 && f.intersects(InstrFlags::SS | InstrFlags::SY) {
        return Err(EncodeError::IllegalFlags(instr.opcode));
    }
    if f.contains(InstrFlags::SAT)
        && !matches!(cat, Category::Cat2 | Category::Cat3)
    {
        return Err(EncodeError::IllegalFlags(instr.opcode));
    }
    Ok(())
}

fn common_word(instr: &MachInstr, cat: Category) -> Result<u64, EncodeError> {
    if instr.repeat > 3 {
        return Err(EncodeError::Repeat(instr.repeat));
    }
    let opc = (instr.opcode.raw() & 0x1f) as u64;
    let f = instr.flags;
    let mut w = field(cat as u64, CAT_SHIFT, 3) | field(opc, OPC_SHIFT, 5);
    w |= field(instr.repeat as u64, RPT_SHIFT, 2);
    if f.contains(InstrFlags::SS) {
        w |= 1 << SS_BIT;
    }
    if f.contains(InstrFlags::SY) {
        w |= 1 << SY_BIT;
    }
    if f.contains(InstrFlags::SAT) {
        w |= 1 << SAT_BIT;
    }
    if f.contains(InstrFlags::EI) {
        w |= 1 << EI_BIT;
    }
    if f.contains(InstrFlags::KILL) {
        w |= 1 << KILL_BIT;
    }
    if f.contains(InstrFlags::PRED_WRITE) {
        w |= 1 << PRED_BIT;
    }
    Ok(w)
}

fn encode_cat0(instr: &MachInstr) -> Result<u64, EncodeError> {
    let mut w = 0;
    if let Some(cond) = instr.cond {
        w |= field(cond as u64, 44, 3);
    } else if instr.opcode.has_cond() {
        return Err(EncodeError::MissingOperand(instr.opcode));
    }
    match instr.extra {
        Extra::Exec { levels } => {
            if levels > 0xf {
                return Err(EncodeError::Field(FieldOverflow));
            }
            w |= field(levels as u64, 40, 4);
        }
        Extra::Branch { offset } => {
            if !(-(1 << 23)..(1 << 23)).contains(&offset) {
                return Err(EncodeError::Field(FieldOverflow));
            }
            w |= (offset as u32 as u64) & 0xff_ffff;
        }
        Extra::None => {}
        _ => return Err(EncodeError::IllegalOperand(instr.opcode)),
    }
    match instr.srcs.as_slice() {
        [] => {}
        [MachSrc::Reg { reg, mods }] if mods.is_empty() => {
            w |= 1 << 34;
            w |= field(reg.to_bits() as u64, 24, 10);
        }
        _ => return Err(EncodeError::IllegalOperand(instr.opcode)),
    }
    if instr.dst.is_some() {
        return Err(EncodeError::IllegalOperand(instr.opcode));
    }
    Ok(w)
}

fn encode_cat1(instr: &MachInstr) -> Result<u64, EncodeError> {
    let dst = instr
        .dst
        .ok_or(EncodeError::MissingOperand(instr.opcode))?;
    let mut w = field(dst.to_bits() as u64, DST_SHIFT, 10);
    let src_w = match (instr.opcode, instr.extra) {
        (Opcode::Cov, Extra::Conv { kind, src, dst: conv_dst }) => {
            let dst_reg_w = if dst.is_half() { Width::W16 } else { Width::W32 };
            if conv_dst != dst_reg_w {
                return Err(EncodeError::IllegalOperand(instr.opcode));
            }
            w |= field(kind as u64, 30, 3);
            src
        }
        (Opcode::Cov, _) => return Err(EncodeError::IllegalOperand(instr.opcode)),
        (_, Extra::None) => {
            if dst.is_half() {
                Width::W16
            } else {
                Width::W32
            }
        }
        _ => return Err(EncodeError::IllegalOperand(instr.opcode)),
    };
    w |= field(src_w as u64, 35, 2);
    let src = instr
        .srcs
        .first()
        .ok_or(EncodeError::MissingOperand(instr.opcode))?;
    if instr.srcs.len() > 1 {
        return Err(EncodeError::IllegalOperand(instr.opcode));
    }
    match src {
        MachSrc::Imm32(bits) => {
            w |= field(KIND_IMM, 33, 2);
            w |= *bits as u64;
        }
        MachSrc::Reg { reg, mods } => {
            w |= field(KIND_REG, 33, 2);
            w |= field(reg.to_bits() as u64, 0, 10);
            w |= field(mods.bits() as u64, 10, 5);
        }
        MachSrc::Const { slot, mods } => {
            if slot.word() > 0x3ff {
                return Err(EncodeError::Field(FieldOverflow));
            }
            w |= field(KIND_CONST, 33, 2);
            w |= field(slot.word() as u64, 0, 10);
            w |= field(mods.bits() as u64, 10, 5);
        }
        MachSrc::Imm10(_) => return Err(EncodeError::IllegalOperand(instr.opcode)),
    }
    Ok(w)
}

fn encode_cat2(instr: &MachInstr) -> Result<u64, EncodeError> {
    let dst = instr
        .dst
        .ok_or(EncodeError::MissingOperand(instr.opcode))?;
    let mut w = field(dst.to_bits() as u64, DST_SHIFT, 10);
    if let Some(cond) = instr.cond {
        w |= field(cond as u64, 34, 3);
    } else if instr.opcode.has_cond() {
        return Err(EncodeError::MissingOperand(instr.opcode));
    }
    let nonreg = instr
        .srcs
        .iter()
        .filter(|s| !matches!(s, MachSrc::Reg { .. }))
        .count();
    if nonreg > 1 {
        return Err(EncodeError::IllegalOperand(instr.opcode));
    }
    match instr.srcs.as_slice() {
        [s0] => {
            let (k, v, m) = src_reg_bits(s0)?;
            w |= field(k, 32, 2) | field(v, 22, 10) | field(m, 18, 4);
        }
        [s0, s1] => {
            let (k0, v0, m0) = src_reg_bits(s0)?;
            let (k1, v1, m1) = src_reg_bits(s1)?;
            w |= field(k0, 32, 2) | field(v0, 22, 10) | field(m0, 18, 4);
            w |= field(k1, 16, 2) | field(v1, 6, 10) | field(m1, 2, 4);
        }
        _ => return Err(EncodeError::IllegalOperand(instr.opcode)),
    }
    Ok(w)
}

fn encode_cat3(instr: &MachInstr) -> Result<u64, EncodeError> {
    let dst = instr
        .dst
        .ok_or(EncodeError::MissingOperand(instr.opcode))?;
    let mut w = field(dst.to_bits() as u64, DST_SHIFT, 10);
    let [s0, s1, s2] = instr.srcs.as_slice() else {
        return Err(EncodeError::MissingOperand(instr.opcode));
    };
    // Only src0 may come from the const file; src1/src2 are registers.
    match s0 {
        MachSrc::Reg { reg, mods } => {
            w |= field(reg.to_bits() as u64, 26, 10);
            w |= cat3_mods(instr.opcode, mods, 25, 24)?;
        }
        MachSrc::Const { slot, mods } => {
            if slot.word() > 0x3ff {
                return Err(EncodeError::Field(FieldOverflow));
            }
            w |= 1 << 36;
            w |= field(slot.word() as u64, 26, 10);
            w |= cat3_mods(instr.opcode, mods, 25, 24)?;
        }
        _ => return Err(EncodeError::IllegalOperand(instr.opcode)),
    }
    for (src, val_shift, neg_bit) in [(s1, 14u32, 13u32), (s2, 3, 2)] {
        let MachSrc::Reg { reg, mods } = src else {
            return Err(EncodeError::IllegalOperand(instr.opcode));
        };
        w |= field(reg.to_bits() as u64, val_shift, 10);
        w |= cat3_mods(instr.opcode, mods, neg_bit, u32::MAX)?;
    }
    Ok(w)
}

fn cat3_mods(
    opcode: Opcode,
    mods: &crate::SrcMods,
    neg_bit: u32,
    r_bit: u32,
) -> Result<u64, EncodeError> {
    use crate::SrcMods;
    let mut w = 0;
    let mut rem = *mods;
    if rem.contains(SrcMods::NEG) {
        w |= 1 << neg_bit;
        rem.remove(SrcMods::NEG);
    }
    if rem.contains(SrcMods::R) && r_bit != u32::MAX {
        w |= 1 << r_bit;
        rem.remove(SrcMods::R);
    }
    if !rem.is_empty() {
        return Err(EncodeError::IllegalOperand(opcode));
    }
    Ok(w)
}

fn encode_cat4(instr: &MachInstr) -> Result<u64, EncodeError> {
    let dst = instr
        .dst
        .ok_or(EncodeError::MissingOperand(instr.opcode))?;
    let mut w = field(dst.to_bits() as u64, DST_SHIFT, 10);
    let [src] = instr.srcs.as_slice() else {
        return Err(EncodeError::MissingOperand(instr.opcode));
    };
    let (k, v, m) = src_reg_bits(src)?;
    if k == KIND_IMM {
        return Err(EncodeError::IllegalOperand(instr.opcode));
    }
    w |= field(k, 35, 2) | field(v, 25, 10) | field(m, 21, 4);
    Ok(w)
}

fn encode_cat5(instr: &MachInstr) -> Result<(u64, Option<u64>), EncodeError> {
    let dst = instr
        .dst
        .ok_or(EncodeError::MissingOperand(instr.opcode))?;
    let mut w = field(dst.to_bits() as u64, DST_SHIFT, 10);
    let Extra::Tex {
        tex,
        samp,
        offset,
        array,
        comps,
    } = instr.extra
    else {
        return Err(EncodeError::IllegalOperand(instr.opcode));
    };
    if tex > 0x1f || samp > 0x1f || comps > 4 {
        return Err(EncodeError::Field(FieldOverflow));
    }
    let mut srcs = instr.srcs.iter();
    let s0 = srcs.next().ok_or(EncodeError::MissingOperand(instr.opcode))?;
    {
        let MachSrc::Reg { reg, mods } = s0 else {
            return Err(EncodeError::IllegalOperand(instr.opcode));
        };
        if !mods.is_empty() {
            return Err(EncodeError::IllegalOperand(instr.opcode));
        }
        w |= field(reg.to_bits() as u64, 27, 10);
    }
    if let Some(s1) = srcs.next() {
        let MachSrc::Reg { reg, mods } = s1 else {
            return Err(EncodeError::IllegalOperand(instr.opcode));
        };
        if !mods.is_empty() {
            return Err(EncodeError::IllegalOperand(instr.opcode));
        }
        w |= 1 << 26;
        w |= field(reg.to_bits() as u64, 16, 10);
    }
    w |= field(tex as u64, 11, 5) | field(samp as u64, 6, 5);
    w |= field(comps as u64, 2, 3);
    if array {
        w |= 1 << 1;
    }
    let mut hi = 0u64;
    let mut wide = false;
    if offset != TexOffset::NONE {
        hi |= field(offset.to_bits() as u64, 0, 12) | (1 << 12);
        wide = true;
    }
    if let Some(s2) = srcs.next() {
        let MachSrc::Reg { reg, mods } = s2 else {
            return Err(EncodeError::IllegalOperand(instr.opcode));
        };
        if !mods.is_empty() {
            return Err(EncodeError::IllegalOperand(instr.opcode));
        }
        hi |= field(reg.to_bits() as u64, 13, 10) | (1 << 23);
        wide = true;
    }
    if srcs.next().is_some() {
        return Err(EncodeError::IllegalOperand(instr.opcode));
    }
    Ok((w, wide.then_some(hi)))
}

fn encode_cat6(instr: &MachInstr) -> Result<(u64, Option<u64>), EncodeError> {
    let mut w = 0;
    if let Some(dst) = instr.dst {
        w |= field(dst.to_bits() as u64, DST_SHIFT, 10);
    } else if instr.opcode.is_load() || instr.opcode.is_atomic() {
        return Err(EncodeError::MissingOperand(instr.opcode));
    }
    let Extra::Mem { offset, binding } = instr.extra else {
        return Err(EncodeError::IllegalOperand(instr.opcode));
    };
    let wide = instr.is_wide();
    let mut regs = [None, None, None];
    for (i, src) in instr.srcs.iter().enumerate() {
        let MachSrc::Reg { reg, mods } = src else {
            return Err(EncodeError::IllegalOperand(instr.opcode));
        };
        if !mods.is_empty() || i >= 3 {
            return Err(EncodeError::IllegalOperand(instr.opcode));
        }
        regs[i] = Some(*reg);
    }
    if let Some(r0) = regs[0] {
        w |= 1 << 11;
        w |= field(r0.to_bits() as u64, 27, 10);
    }
    if let Some(r1) = regs[1] {
        w |= 1 << 26;
        w |= field(r1.to_bits() as u64, 16, 10);
    }
    let mut hi = 0u64;
    if wide {
        hi |= field(binding as u64, 0, 8);
        if let Some(r2) = regs[2] {
            hi |= field(r2.to_bits() as u64, 8, 10) | (1 << 18);
        }
        hi |= ((offset as u32 as u64) & 0xffff_ffff) << 32;
    } else {
        if regs[2].is_some() {
            return Err(EncodeError::IllegalOperand(instr.opcode));
        }
        if binding > 0xf || !(-1024..=1023).contains(&offset) {
            return Err(EncodeError::Field(FieldOverflow));
        }
        w |= field(binding as u64, 12, 4);
        w |= (offset as u32 as u64) & 0x7ff;
    }
    Ok((w, wide.then_some(hi)))
}

fn encode_cat7(instr: &MachInstr) -> Result<u64, EncodeError> {
    match instr.extra {
        Extra::Fence { classes } => Ok(classes.bits() as u64),
        Extra::None if instr.opcode == Opcode::Bar => Ok(0),
        _ => Err(EncodeError::IllegalOperand(instr.opcode)),
    }
}

/// Packs one instruction.
pub fn encode(instr: &MachInstr) -> Result<InstrWords, EncodeError> {
    let cat = instr
        .opcode
        .category()
        .ok_or(EncodeError::PseudoOpcode(instr.opcode))?;
    check_flags(instr, cat)?;
    let mut lo = common_word(instr, cat)?;
    let hi = match cat {
        Category::Cat0 => {
            lo |= encode_cat0(instr)?;
            None
        }
        Category::Cat1 => {
            lo |= encode_cat1(instr)?;
            None
        }
        Category::Cat2 => {
            lo |= encode_cat2(instr)?;
            None
        }
        Category::Cat3 => {
            lo |= encode_cat3(instr)?;
            None
        }
        Category::Cat4 => {
            lo |= encode_cat4(instr)?;
            None
        }
        Category::Cat5 => {
            let (w, hi) = encode_cat5(instr)?;
            lo |= w;
            hi
        }
        Category::Cat6 => {
            let (w, hi) = encode_cat6(instr)?;
            lo |= w;
            hi
        }
        Category::Cat7 => {
            lo |= encode_cat7(instr)?;
            None
        }
    };
    if hi.is_some() {
        lo |= 1 << WIDE_BIT;
    }
    Ok(InstrWords { lo, hi })
}

/// Packs a full instruction stream into a little-endian byte buffer.
pub fn encode_stream(instrs: &[MachInstr]) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(instrs.len() * 8);
    for instr in instrs {
        encode(instr)?.write_to(&mut out);
    }
    Ok(out)
}
