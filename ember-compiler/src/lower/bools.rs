//! Boolean lowering.
//!
//! One-bit values become canonical 0/1 in 16-bit integer registers.
//! Logical connectives turn into integer bitwise ops (safe on 0/1),
//! `not` into `xor 1` so the canonical range is preserved, and the
//! cross-type conversions into compare/select sequences against zero.

use super::Prepend;
use crate::error::Result;
use crate::hir::{AluOp, HirOp, HirShader, HirType, ScalarBase};
use smallvec::smallvec;

/// The register type carrying lowered booleans.
pub(crate) const BOOL_REG: HirType = HirType::scalar(ScalarBase::Uint, 16);

pub(super) fn run(shader: &mut HirShader) -> Result<()> {
    // Variable declarations first, so loads and stores agree.
    for ty in &mut shader.vars {
        if ty.base == ScalarBase::Bool {
            *ty = HirType::vector(ScalarBase::Uint, 16, ty.comps);
        }
    }
    super::map_instrs(shader, &mut |shader, id| {
        let op = shader.instr(id).op.clone();
        let mut pre = Prepend::new();
        match op {
            HirOp::Alu(AluOp::BAnd) => {
                shader.instr_mut(id).op = HirOp::Alu(AluOp::IAnd);
            }
            HirOp::Alu(AluOp::BOr) => {
                shader.instr_mut(id).op = HirOp::Alu(AluOp::IOr);
            }
            HirOp::Alu(AluOp::BNot) => {
                // `xor 1` keeps the canonical 0/1 range where a bitwise
                // complement would not.
                let one = shader.alloc(
                    HirOp::Const {
                        words: smallvec![1],
                    },
                    BOOL_REG,
                    [],
                );
                pre.push(one);
                let instr = shader.instr_mut(id);
                instr.op = HirOp::Alu(AluOp::IXor);
                instr.srcs.push(one);
            }
            HirOp::Alu(AluOp::B2F) => {
                let zero = shader.alloc_const_f32(0.0);
                let one = shader.alloc_const_f32(1.0);
                pre.push(zero);
                pre.push(one);
                let instr = shader.instr_mut(id);
                let cond = instr.srcs[0];
                instr.op = HirOp::Alu(AluOp::Select);
                instr.srcs = smallvec![cond, one, zero];
            }
            HirOp::Alu(AluOp::B2I) => {
                // The carrier is already 0/1; only the width changes.
                shader.instr_mut(id).op = HirOp::Alu(AluOp::U2U);
            }
            HirOp::Alu(AluOp::I2B) => {
                let src_ty = shader.ty(shader.instr(id).srcs[0]);
                let zero = shader.alloc(
                    HirOp::Const {
                        words: smallvec![0],
                    },
                    src_ty,
                    [],
                );
                pre.push(zero);
                let instr = shader.instr_mut(id);
                instr.op = HirOp::Alu(AluOp::INe);
                instr.srcs.push(zero);
            }
            HirOp::Alu(AluOp::F2B) => {
                let zero = shader.alloc_const_f32(0.0);
                pre.push(zero);
                let instr = shader.instr_mut(id);
                instr.op = HirOp::Alu(AluOp::FNe);
                instr.srcs.push(zero);
            }
            HirOp::Undef if shader.instr(id).ty.base == ScalarBase::Bool => {
                // Undefined booleans become false so every consumer still
                // sees a canonical value.
                shader.instr_mut(id).op = HirOp::Const {
                    words: smallvec![0],
                };
            }
            _ => {}
        }
        // Every boolean-typed result now lives in a 16-bit register.
        let instr = shader.instr_mut(id);
        if instr.ty.base == ScalarBase::Bool {
            instr.ty = HirType::vector(ScalarBase::Uint, 16, instr.ty.comps);
        }
        Ok(pre)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::HirBuilder;
    use ember_asm::Stage;

    #[test]
    fn bnot_becomes_xor_one() {
        let mut b = HirBuilder::new(Stage::Compute);
        let t = b.const_bool(true);
        let n = b.alu1(AluOp::BNot, HirType::BOOL, t);
        let mut shader = b.finish();
        run(&mut shader).unwrap();
        assert_eq!(shader.instr(n).op, HirOp::Alu(AluOp::IXor));
        assert_eq!(shader.ty(n), BOOL_REG);
        let one = shader.instr(n).srcs[1];
        assert_eq!(shader.as_const_u32(one), Some(1));
    }

    #[test]
    fn b2f_is_a_select_of_float_constants() {
        let mut b = HirBuilder::new(Stage::Compute);
        let t = b.const_bool(false);
        let f = b.alu1(AluOp::B2F, HirType::F32, t);
        let mut shader = b.finish();
        run(&mut shader).unwrap();
        assert_eq!(shader.instr(f).op, HirOp::Alu(AluOp::Select));
        let one = shader.instr(f).srcs[1];
        let zero = shader.instr(f).srcs[2];
        assert_eq!(shader.as_const_f32(one), Some(1.0));
        assert_eq!(shader.as_const_f32(zero), Some(0.0));
    }
}
