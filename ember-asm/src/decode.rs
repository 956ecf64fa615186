//! Unpacking binary words back into machine instructions.
//!
//! The decoder is the inverse of [`crate::encode`] over canonically
//! constructed instructions and backs both the disassembler and the
//! round-trip test suites.

use crate::{
    encode::{
        CAT_SHIFT,
        DST_SHIFT,
        EI_BIT,
        KILL_BIT,
        KIND_CONST,
        KIND_IMM,
        KIND_REG,
        OPC_SHIFT,
        PRED_BIT,
        RPT_SHIFT,
        SAT_BIT,
        SS_BIT,
        SY_BIT,
        WIDE_BIT,
    },
    BarrierClass,
    Category,
    CmpCond,
    ConstSlot,
    ConvKind,
    Extra,
    Imm10,
    InstrFlags,
    InvalidOpcode,
    MachInstr,
    MachSrc,
    Opcode,
    PhysReg,
    SrcMods,
    TexOffset,
    Width,
};

/// Unpacking failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The opcode field does not name an encodable opcode.
    #[error(transparent)]
    InvalidOpcode(#[from] InvalidOpcode),
    /// The stream ended inside an instruction.
    #[error("truncated instruction stream")]
    Truncated,
    /// A field carries a value outside its legal range.
    #[error("illegal field value in `{0}`")]
    IllegalField(Opcode),
}

fn bits(word: u64, shift: u32, width: u32) -> u64 {
    (word >> shift) & ((1 << width) - 1)
}

fn sign_extend(value: u64, width: u32) -> i32 {
    let shift = 32 - width;
    ((value as u32 as i32) << shift) >> shift
}

fn reg_src(word: u64, shift: u32, mods_shift: u32, mods_bits: u32) -> MachSrc {
    MachSrc::Reg {
        reg: PhysReg::from_bits(bits(word, shift, 10) as u16),
        mods: SrcMods::from_bits_truncate(bits(word, mods_shift, mods_bits) as u8),
    }
}

fn kinded_src(
    op: Opcode,
    kind: u64,
    value: u64,
    mods: u64,
) -> Result<MachSrc, DecodeError> {
    let mods = SrcMods::from_bits_truncate(mods as u8);
    match kind {
        KIND_REG => Ok(MachSrc::Reg {
            reg: PhysReg::from_bits(value as u16),
            mods,
        }),
        KIND_CONST => Ok(MachSrc::Const {
            slot: ConstSlot::new(value as u16),
            mods,
        }),
        KIND_IMM => Ok(MachSrc::Imm10(Imm10::new(value as u16))),
        _ => Err(DecodeError::IllegalField(op)),
    }
}

fn decode_cat0(op: Opcode, lo: u64, instr: &mut MachInstr) -> Result<(), DecodeError> {
    if op.has_cond() {
        instr.cond = Some(
            CmpCond::from_bits(bits(lo, 44, 3) as u8)
                .map_err(|_| DecodeError::IllegalField(op))?,
        );
    }
    instr.extra = match op {
        Opcode::PushExec | Opcode::PopExec | Opcode::WhileICmp => Extra::Exec {
            levels: bits(lo, 40, 4) as u8,
        },
        Opcode::Jump | Opcode::JumpExecAny => Extra::Branch {
            offset: sign_extend(bits(lo, 0, 24), 24),
        },
        _ => Extra::None,
    };
    if bits(lo, 34, 1) == 1 {
        instr.srcs.push(MachSrc::Reg {
            reg: PhysReg::from_bits(bits(lo, 24, 10) as u16),
            mods: SrcMods::empty(),
        });
    }
    Ok(())
}

fn decode_cat1(op: Opcode, lo: u64, instr: &mut MachInstr) -> Result<(), DecodeError> {
    let dst = PhysReg::from_bits(bits(lo, DST_SHIFT, 10) as u16);
    instr.dst = Some(dst);
    let src_w = Width::from_bits_field(bits(lo, 35, 2) as u8);
    if op == Opcode::Cov {
        let dst_w = if dst.is_half() { Width::W16 } else { Width::W32 };
        instr.extra = Extra::Conv {
            kind: ConvKind::from_bits(bits(lo, 30, 3) as u8),
            src: src_w,
            dst: dst_w,
        };
    }
    match bits(lo, 33, 2) {
        KIND_IMM => instr.srcs.push(MachSrc::Imm32(bits(lo, 0, 32) as u32)),
        kind => {
            let value = bits(lo, 0, 10);
            let mods = bits(lo, 10, 5);
            instr.srcs.push(kinded_src(op, kind, value, mods)?);
        }
    }
    Ok(())
}

fn decode_cat2(op: Opcode, lo: u64, instr: &mut MachInstr) -> Result<(), DecodeError> {
    instr.dst = Some(PhysReg::from_bits(bits(lo, DST_SHIFT, 10) as u16));
    if op.has_cond() {
        instr.cond = Some(
            CmpCond::from_bits(bits(lo, 34, 3) as u8)
                .map_err(|_| DecodeError::IllegalField(op))?,
        );
    }
    let srcs = op.fixed_srcs().unwrap_or(2);
    instr.srcs.push(kinded_src(
        op,
        bits(lo, 32, 2),
        bits(lo, 22, 10),
        bits(lo, 18, 4),
    )?);
    if srcs > 1 {
        instr.srcs.push(kinded_src(
            op,
            bits(lo, 16, 2),
            bits(lo, 6, 10),
            bits(lo, 2, 4),
        )?);
    }
    Ok(())
}

fn decode_cat3(_op: Opcode, lo: u64, instr: &mut MachInstr) {
    instr.dst = Some(PhysReg::from_bits(bits(lo, DST_SHIFT, 10) as u16));
    let mut mods0 = SrcMods::empty();
    if bits(lo, 25, 1) == 1 {
        mods0 |= SrcMods::NEG;
    }
    if bits(lo, 24, 1) == 1 {
        mods0 |= SrcMods::R;
    }
    if bits(lo, 36, 1) == 1 {
        instr.srcs.push(MachSrc::Const {
            slot: ConstSlot::new(bits(lo, 26, 10) as u16),
            mods: mods0,
        });
    } else {
        instr.srcs.push(MachSrc::Reg {
            reg: PhysReg::from_bits(bits(lo, 26, 10) as u16),
            mods: mods0,
        });
    }
    for (val_shift, neg_bit) in [(14u32, 13u32), (3, 2)] {
        let mut mods = SrcMods::empty();
        if bits(lo, neg_bit, 1) == 1 {
            mods |= SrcMods::NEG;
        }
        instr.srcs.push(MachSrc::Reg {
            reg: PhysReg::from_bits(bits(lo, val_shift, 10) as u16),
            mods,
        });
    }
}

fn decode_cat4(op: Opcode, lo: u64, instr: &mut MachInstr) -> Result<(), DecodeError> {
    instr.dst = Some(PhysReg::from_bits(bits(lo, DST_SHIFT, 10) as u16));
    instr.srcs.push(kinded_src(
        op,
        bits(lo, 35, 2),
        bits(lo, 25, 10),
        bits(lo, 21, 4),
    )?);
    Ok(())
}

fn decode_cat5(
    op: Opcode,
    lo: u64,
    hi: Option<u64>,
    instr: &mut MachInstr,
) -> Result<(), DecodeError> {
    instr.dst = Some(PhysReg::from_bits(bits(lo, DST_SHIFT, 10) as u16));
    instr.srcs.push(reg_src(lo, 27, 0, 0));
    if bits(lo, 26, 1) == 1 {
        instr.srcs.push(reg_src(lo, 16, 0, 0));
    }
    let mut offset = TexOffset::NONE;
    if let Some(hi) = hi {
        if bits(hi, 12, 1) == 1 {
            offset = TexOffset::from_bits(bits(hi, 0, 12) as u16);
        }
        if bits(hi, 23, 1) == 1 {
            instr.srcs.push(reg_src(hi, 13, 0, 0));
        }
    }
    let comps = bits(lo, 2, 3) as u8;
    if comps > 4 {
        return Err(DecodeError::IllegalField(op));
    }
    instr.extra = Extra::Tex {
        tex: bits(lo, 11, 5) as u8,
        samp: bits(lo, 6, 5) as u8,
        offset,
        array: bits(lo, 1, 1) == 1,
        comps,
    };
    Ok(())
}

fn decode_cat6(op: Opcode, lo: u64, hi: Option<u64>, instr: &mut MachInstr) {
    if op.is_load() || op.is_atomic() {
        instr.dst = Some(PhysReg::from_bits(bits(lo, DST_SHIFT, 10) as u16));
    }
    if bits(lo, 11, 1) == 1 {
        instr.srcs.push(reg_src(lo, 27, 0, 0));
    }
    if bits(lo, 26, 1) == 1 {
        instr.srcs.push(reg_src(lo, 16, 0, 0));
    }
    let (offset, binding) = match hi {
        Some(hi) => {
            if bits(hi, 18, 1) == 1 {
                instr.srcs.push(reg_src(hi, 8, 0, 0));
            }
            ((hi >> 32) as u32 as i32, bits(hi, 0, 8) as u8)
        }
        None => (
            sign_extend(bits(lo, 0, 11), 11),
            bits(lo, 12, 4) as u8,
        ),
    };
    instr.extra = Extra::Mem { offset, binding };
}

fn decode_cat7(op: Opcode, lo: u64, instr: &mut MachInstr) {
    if op == Opcode::Fence {
        instr.extra = Extra::Fence {
            classes: BarrierClass::from_bits_truncate(bits(lo, 0, 9) as u16),
        };
    }
}

/// Unpacks one instruction starting at `words[0]`.
///
/// Returns the instruction and the number of words consumed.
pub fn decode(words: &[u64]) -> Result<(MachInstr, usize), DecodeError> {
    let lo = *words.first().ok_or(DecodeError::Truncated)?;
    let cat = Category::from_bits(bits(lo, CAT_SHIFT, 3) as u8);
    let raw = ((cat as u16) << 5) | bits(lo, OPC_SHIFT, 5) as u16;
    let op = Opcode::try_from(raw)?;

    let wide = cat.may_be_wide() && bits(lo, WIDE_BIT, 1) == 1;
    let hi = if wide {
        Some(*words.get(1).ok_or(DecodeError::Truncated)?)
    } else {
        None
    };

    let mut flags = InstrFlags::empty();
    for (bit, flag) in [
        (SS_BIT, InstrFlags::SS),
        (SY_BIT, InstrFlags::SY),
        (SAT_BIT, InstrFlags::SAT),
        (EI_BIT, InstrFlags::EI),
        (KILL_BIT, InstrFlags::KILL),
        (PRED_BIT, InstrFlags::PRED_WRITE),
    ] {
        if bits(lo, bit, 1) == 1 {
            flags |= flag;
        }
    }
    let mut instr = MachInstr::new(op);
    instr.flags = flags;
    instr.repeat = bits(lo, RPT_SHIFT, 2) as u8;

    match cat {
        Category::Cat0 => decode_cat0(op, lo, &mut instr)?,
        Category::Cat1 => decode_cat1(op, lo, &mut instr)?,
        Category::Cat2 => decode_cat2(op, lo, &mut instr)?,
        Category::Cat3 => decode_cat3(op, lo, &mut instr),
        Category::Cat4 => decode_cat4(op, lo, &mut instr)?,
        Category::Cat5 => decode_cat5(op, lo, hi, &mut instr)?,
        Category::Cat6 => decode_cat6(op, lo, hi, &mut instr),
        Category::Cat7 => decode_cat7(op, lo, &mut instr),
    }
    Ok((instr, 1 + usize::from(wide)))
}

/// Unpacks a little-endian byte stream into machine instructions.
pub fn decode_stream(bytes: &[u8]) -> Result<Vec<MachInstr>, DecodeError> {
    if bytes.len() % 8 != 0 {
        return Err(DecodeError::Truncated);
    }
    let words: Vec<u64> = bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().expect("chunk is 8 bytes")))
        .collect();
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < words.len() {
        let (instr, used) = decode(&words[pos..])?;
        out.push(instr);
        pos += used;
    }
    Ok(out)
}
