//! 64-bit integer splitting.
//!
//! The ALU is at most 32 bits wide, so 64-bit integers live as two-word
//! vectors: component 0 is the low word. Arithmetic splits into
//! carry-propagating word operations, logic splits per word, and 64-bit
//! memory accesses become two-component 32-bit accesses.

use super::Prepend;
use crate::error::{CompileError, Result};
use crate::generation::Generation;
use crate::hir::{AluOp, HirId, HirOp, HirShader, HirType, ScalarBase};
use smallvec::smallvec;

const WORD_PAIR: HirType = HirType::vector(ScalarBase::Uint, 32, 2);
const U32T: HirType = HirType::U32;

struct Splitter<'s> {
    shader: &'s mut HirShader,
    pre: Prepend,
}

impl Splitter<'_> {
    fn emit(&mut self, op: HirOp, ty: HirType, srcs: &[HirId]) -> HirId {
        let v = self.shader.alloc(op, ty, srcs.iter().copied());
        self.pre.push(v);
        v
    }

    fn halves(&mut self, v: HirId) -> (HirId, HirId) {
        let lo = self.emit(HirOp::VecExtract { comp: 0 }, U32T, &[v]);
        let hi = self.emit(HirOp::VecExtract { comp: 1 }, U32T, &[v]);
        (lo, hi)
    }

    fn alu(&mut self, op: AluOp, srcs: &[HirId]) -> HirId {
        self.emit(HirOp::Alu(op), U32T, srcs)
    }

    fn bool_alu(&mut self, op: AluOp, a: HirId, b: HirId) -> HirId {
        self.emit(HirOp::Alu(op), super::bools::BOOL_REG, &[a, b])
    }
}

pub(super) fn run<G: Generation>(shader: &mut HirShader) -> Result<()> {
    let _ = G::POINTER_SIZE;
    super::map_instrs(shader, &mut |shader, id| {
        let (op, ty, srcs) = {
            let i = shader.instr(id);
            (i.op.clone(), i.ty, i.srcs.clone())
        };
        if ty.bits != 64 || ty.comps != 1 {
            // Narrowing conversions consume a 64-bit pair even when the
            // result is narrow.
            if let HirOp::Alu(AluOp::U2U | AluOp::I2I) = op {
                let src_ty = shader.ty(srcs[0]);
                if src_ty.bits == 64 || src_ty == WORD_PAIR {
                    let mut s = Splitter {
                        shader: &mut *shader,
                        pre: Prepend::new(),
                    };
                    let (lo, _hi) = s.halves(srcs[0]);
                    let pre = s.pre;
                    let instr = shader.instr_mut(id);
                    instr.op = HirOp::Copy;
                    instr.srcs = smallvec![lo];
                    return Ok(pre);
                }
            }
            return Ok(Prepend::new());
        }
        let mut s = Splitter {
            shader: &mut *shader,
            pre: Prepend::new(),
        };
        let (lo, hi) = match op {
            HirOp::Const { words } => {
                let lo = s.shader.alloc_const_u32(words[0]);
                s.pre.push(lo);
                let hi = s
                    .shader
                    .alloc_const_u32(words.get(1).copied().unwrap_or(0));
                s.pre.push(hi);
                (lo, hi)
            }
            HirOp::Undef => {
                let z = s.shader.alloc_const_u32(0);
                s.pre.push(z);
                (z, z)
            }
            HirOp::Alu(AluOp::U2U | AluOp::I2I) => {
                // Widening: zero or sign extend the 32-bit source.
                let src = srcs[0];
                let signed = matches!(op, HirOp::Alu(AluOp::I2I));
                if signed {
                    let sh = s.shader.alloc_const_u32(31);
                    s.pre.push(sh);
                    let hi = s.alu(AluOp::IShr, &[src, sh]);
                    (src, hi)
                } else {
                    let z = s.shader.alloc_const_u32(0);
                    s.pre.push(z);
                    (src, z)
                }
            }
            HirOp::Alu(alu @ (AluOp::IAnd | AluOp::IOr | AluOp::IXor)) => {
                let (alo, ahi) = s.halves(srcs[0]);
                let (blo, bhi) = s.halves(srcs[1]);
                (s.alu(alu, &[alo, blo]), s.alu(alu, &[ahi, bhi]))
            }
            HirOp::Alu(AluOp::INot) => {
                let (alo, ahi) = s.halves(srcs[0]);
                (s.alu(AluOp::INot, &[alo]), s.alu(AluOp::INot, &[ahi]))
            }
            HirOp::Alu(AluOp::IAdd) => {
                let (alo, ahi) = s.halves(srcs[0]);
                let (blo, bhi) = s.halves(srcs[1]);
                let lo = s.alu(AluOp::IAdd, &[alo, blo]);
                let carry = s.bool_alu(AluOp::ULt, lo, alo);
                let carry32 = s.emit(HirOp::Alu(AluOp::U2U), U32T, &[carry]);
                let hi0 = s.alu(AluOp::IAdd, &[ahi, bhi]);
                let hi = s.alu(AluOp::IAdd, &[hi0, carry32]);
                (lo, hi)
            }
            HirOp::Alu(AluOp::ISub) => {
                let (alo, ahi) = s.halves(srcs[0]);
                let (blo, bhi) = s.halves(srcs[1]);
                let lo = s.alu(AluOp::ISub, &[alo, blo]);
                let borrow = s.bool_alu(AluOp::ULt, alo, blo);
                let borrow32 = s.emit(HirOp::Alu(AluOp::U2U), U32T, &[borrow]);
                let hi0 = s.alu(AluOp::ISub, &[ahi, bhi]);
                let hi = s.alu(AluOp::ISub, &[hi0, borrow32]);
                (lo, hi)
            }
            HirOp::Alu(alu @ (AluOp::IShl | AluOp::UShr)) => {
                let amount = s
                    .shader
                    .as_const_u32(srcs[1])
                    .ok_or_else(|| {
                        CompileError::UnsupportedFeature(
                            "64-bit shift by a runtime amount".into(),
                        )
                    })?;
                let (alo, ahi) = s.halves(srcs[0]);
                let pair = shift_pair(&mut s, alu, alo, ahi, amount % 64);
                let pre = s.pre;
                let instr = shader.instr_mut(id);
                instr.op = HirOp::VecCompose;
                instr.ty = WORD_PAIR;
                instr.srcs = smallvec![pair.0, pair.1];
                return Ok(pre);
            }
            HirOp::LoadSsbo { .. }
            | HirOp::LoadGlobal
            | HirOp::LoadShared
            | HirOp::LoadUbo { .. } => {
                // Memory produces the pair directly; only the type changes.
                let pre = s.pre;
                shader.instr_mut(id).ty = WORD_PAIR;
                return Ok(pre);
            }
            HirOp::Copy | HirOp::Phi => {
                let pre = s.pre;
                shader.instr_mut(id).ty = WORD_PAIR;
                return Ok(pre);
            }
            other => {
                return Err(CompileError::UnsupportedFeature(format!(
                    "64-bit operation {other:?}"
                )))
            }
        };
        let pre = s.pre;
        let instr = shader.instr_mut(id);
        instr.op = HirOp::VecCompose;
        instr.ty = WORD_PAIR;
        instr.srcs = smallvec![lo, hi];
        Ok(pre)
    })
}

fn shift_pair(
    s: &mut Splitter<'_>,
    op: AluOp,
    lo: HirId,
    hi: HirId,
    amount: u32,
) -> (HirId, HirId) {
    if amount == 0 {
        return (lo, hi);
    }
    let zero = s.shader.alloc_const_u32(0);
    s.pre.push(zero);
    if amount >= 32 {
        let k = s.shader.alloc_const_u32(amount - 32);
        s.pre.push(k);
        return match op {
            AluOp::IShl => (zero, s.alu(AluOp::IShl, &[lo, k])),
            _ => (s.alu(AluOp::UShr, &[hi, k]), zero),
        };
    }
    let k = s.shader.alloc_const_u32(amount);
    s.pre.push(k);
    let inv = s.shader.alloc_const_u32(32 - amount);
    s.pre.push(inv);
    match op {
        AluOp::IShl => {
            let new_lo = s.alu(AluOp::IShl, &[lo, k]);
            let spill = s.alu(AluOp::UShr, &[lo, inv]);
            let hi_sh = s.alu(AluOp::IShl, &[hi, k]);
            let new_hi = s.alu(AluOp::IOr, &[hi_sh, spill]);
            (new_lo, new_hi)
        }
        _ => {
            let new_hi = s.alu(AluOp::UShr, &[hi, k]);
            let spill = s.alu(AluOp::IShl, &[hi, inv]);
            let lo_sh = s.alu(AluOp::UShr, &[lo, k]);
            let new_lo = s.alu(AluOp::IOr, &[lo_sh, spill]);
            (new_lo, new_hi)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::HirBuilder;
    use ember_asm::Stage;

    #[test]
    fn u64_add_produces_carry_chain() {
        let u64t = HirType::scalar(ScalarBase::Uint, 64);
        let mut b = HirBuilder::new(Stage::Compute);
        let a = b.const_vec(u64t, &[u32::MAX, 0]);
        let c = b.const_vec(u64t, &[1, 0]);
        let sum = b.alu2(AluOp::IAdd, u64t, a, c);
        let mut shader = b.finish();
        run::<crate::generation::Gen7>(&mut shader).unwrap();
        assert_eq!(shader.instr(sum).op, HirOp::VecCompose);
        assert_eq!(shader.ty(sum), WORD_PAIR);
        // The carry is a compare feeding back into the high word.
        assert!(shader
            .instrs
            .iter()
            .any(|i| i.op == HirOp::Alu(AluOp::ULt)));
    }

    #[test]
    fn runtime_shift_amounts_are_rejected() {
        let u64t = HirType::scalar(ScalarBase::Uint, 64);
        let mut b = HirBuilder::new(Stage::Compute);
        let a = b.const_vec(u64t, &[1, 0]);
        let dynamic = b.sysval(crate::hir::Sysval::VertexId, HirType::U32);
        b.alu2(AluOp::IShl, u64t, a, dynamic);
        let mut shader = b.finish();
        assert!(matches!(
            run::<crate::generation::Gen7>(&mut shader),
            Err(CompileError::UnsupportedFeature(_))
        ));
    }
}
