//! Storage-buffer and image offset lowering.
//!
//! The memory opcodes address elements, not bytes. Byte offsets shrink by
//! `log2(bit_size / 8)`; when the offset already comes out of a shift the
//! shifts fuse, and when it is `iadd(const, x)` the constant shifts on
//! its own so later folding can merge it into the instruction's immediate
//! offset field.

use super::Prepend;
use crate::error::Result;
use crate::generation::Generation;
use crate::hir::{AluOp, HirId, HirOp, HirShader, HirType};

fn element_shift(bits: u8) -> u32 {
    (bits as u32 / 8).trailing_zeros()
}

/// Rewrites `offset` (a byte offset) into an element offset, reusing
/// shifts and split constants where the defining instruction allows.
fn scale_offset(
    shader: &mut HirShader,
    pre: &mut Prepend,
    offset: HirId,
    shift: u32,
) -> HirId {
    let u32t = HirType::U32;
    if shift == 0 {
        return offset;
    }
    let mut emit = |shader: &mut HirShader, pre: &mut Prepend, op, srcs: &[HirId]| {
        let v = shader.alloc(op, u32t, srcs.iter().copied());
        pre.push(v);
        v
    };
    if let Some(bytes) = shader.as_const_u32(offset) {
        let v = shader.alloc_const_u32(bytes >> shift);
        pre.push(v);
        return v;
    }
    let def = shader.instr(offset).clone();
    match def.op {
        // (x << k) >> shift fuses when k covers the element size.
        HirOp::Alu(AluOp::IShl) => {
            if let Some(k) = shader.as_const_u32(def.srcs[1]) {
                if k == shift {
                    return def.srcs[0];
                }
                if k > shift {
                    let nk = shader.alloc_const_u32(k - shift);
                    pre.push(nk);
                    return emit(shader, pre, HirOp::Alu(AluOp::IShl), &[def.srcs[0], nk]);
                }
            }
        }
        // iadd(const, x): scale both halves independently so the constant
        // can later merge into the immediate offset field.
        HirOp::Alu(AluOp::IAdd) => {
            let (c, x) = if shader.as_const_u32(def.srcs[0]).is_some() {
                (def.srcs[0], def.srcs[1])
            } else if shader.as_const_u32(def.srcs[1]).is_some() {
                (def.srcs[1], def.srcs[0])
            } else {
                let k = shader.alloc_const_u32(shift);
                pre.push(k);
                return emit(shader, pre, HirOp::Alu(AluOp::UShr), &[offset, k]);
            };
            let bytes = shader.as_const_u32(c).expect("checked const");
            let scaled_x = scale_offset(shader, pre, x, shift);
            let scaled_c = shader.alloc_const_u32(bytes >> shift);
            pre.push(scaled_c);
            return emit(shader, pre, HirOp::Alu(AluOp::IAdd), &[scaled_x, scaled_c]);
        }
        _ => {}
    }
    let k = shader.alloc_const_u32(shift);
    pre.push(k);
    emit(shader, pre, HirOp::Alu(AluOp::UShr), &[offset, k])
}

pub(super) fn run<G: Generation>(shader: &mut HirShader) -> Result<()> {
    let _ = G::HAS_ISAM_SSBO;
    super::map_instrs(shader, &mut |shader, id| {
        let op = shader.instr(id).op.clone();
        let mut pre = Prepend::new();
        match op {
            HirOp::LoadSsbo {
                binding,
                element_offset: false,
            } => {
                let bits = shader.instr(id).ty.bits;
                let offset = shader.instr(id).srcs[0];
                let scaled = scale_offset(shader, &mut pre, offset, element_shift(bits));
                let instr = shader.instr_mut(id);
                instr.srcs[0] = scaled;
                instr.op = HirOp::LoadSsbo {
                    binding,
                    element_offset: true,
                };
            }
            HirOp::StoreSsbo {
                binding,
                element_offset: false,
            } => {
                let bits = shader.ty(shader.instr(id).srcs[0]).bits;
                let offset = shader.instr(id).srcs[1];
                let scaled = scale_offset(shader, &mut pre, offset, element_shift(bits));
                let instr = shader.instr_mut(id);
                instr.srcs[1] = scaled;
                instr.op = HirOp::StoreSsbo {
                    binding,
                    element_offset: true,
                };
            }
            _ => {}
        }
        Ok(pre)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Gen7;
    use crate::hir::{HirBuilder, Sysval};
    use ember_asm::Stage;

    #[test]
    fn aligned_constant_byte_offset_becomes_element_constant() {
        let mut b = HirBuilder::new(Stage::Compute);
        let off = b.const_u32(64);
        let ld = b.load_ssbo(0, off, HirType::U32);
        let mut shader = b.finish();
        run::<Gen7>(&mut shader).unwrap();
        let new_off = shader.instr(ld).srcs[0];
        assert_eq!(shader.as_const_u32(new_off), Some(16));
        assert!(matches!(
            shader.instr(ld).op,
            HirOp::LoadSsbo {
                element_offset: true,
                ..
            }
        ));
    }

    #[test]
    fn shifted_offset_fuses_with_the_element_shift() {
        let mut b = HirBuilder::new(Stage::Compute);
        let x = b.sysval(Sysval::LocalInvocationId, HirType::U32);
        let two = b.const_u32(2);
        let bytes = b.alu2(AluOp::IShl, HirType::U32, x, two);
        let ld = b.load_ssbo(0, bytes, HirType::U32);
        let mut shader = b.finish();
        run::<Gen7>(&mut shader).unwrap();
        // offset = (x << 2) >> 2 == x, with no shift at all.
        assert_eq!(shader.instr(ld).srcs[0], x);
    }

    #[test]
    fn added_constant_scales_separately() {
        let mut b = HirBuilder::new(Stage::Compute);
        let x = b.sysval(Sysval::LocalInvocationId, HirType::U32);
        let two = b.const_u32(2);
        let sh = b.alu2(AluOp::IShl, HirType::U32, x, two);
        let c = b.const_u32(32);
        let bytes = b.alu2(AluOp::IAdd, HirType::U32, c, sh);
        let ld = b.load_ssbo(0, bytes, HirType::U32);
        let mut shader = b.finish();
        run::<Gen7>(&mut shader).unwrap();
        let sum = shader.instr(ld).srcs[0];
        assert_eq!(shader.instr(sum).op, HirOp::Alu(AluOp::IAdd));
        // Runtime part fused to x, constant part pre-shifted to 8.
        assert_eq!(shader.instr(sum).srcs[0], x);
        assert_eq!(shader.as_const_u32(shader.instr(sum).srcs[1]), Some(8));
    }
}
