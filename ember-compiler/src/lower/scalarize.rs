//! ALU scalarization.
//!
//! Vector ALU operations become one scalar operation per component,
//! stitched together with `VecExtract`/`VecCompose`; emission later maps
//! those onto the `split`/`combine` pseudo-instructions. Vector constants
//! split the same way so each component can fold independently.

use super::Prepend;
use crate::error::Result;
use crate::hir::{HirOp, HirShader};
use smallvec::{smallvec, SmallVec};

pub(super) fn run(shader: &mut HirShader) -> Result<()> {
    let mut split = 0usize;
    super::map_instrs(shader, &mut |shader, id| {
        let (op, ty, srcs) = {
            let instr = shader.instr(id);
            (instr.op.clone(), instr.ty, instr.srcs.clone())
        };
        if ty.comps <= 1 {
            return Ok(Prepend::new());
        }
        match op {
            HirOp::Alu(op) => {
                let scalar_ty = ty.to_scalar();
                let mut pre = Prepend::new();
                let mut comps = SmallVec::<[_; 4]>::new();
                for c in 0..ty.comps {
                    let mut comp_srcs = SmallVec::<[_; 4]>::new();
                    for &s in &srcs {
                        let s_ty = shader.ty(s);
                        if s_ty.comps > 1 {
                            let e = shader.alloc(
                                HirOp::VecExtract { comp: c },
                                s_ty.to_scalar(),
                                [s],
                            );
                            pre.push(e);
                            comp_srcs.push(e);
                        } else {
                            comp_srcs.push(s);
                        }
                    }
                    let comp =
                        shader.alloc(HirOp::Alu(op), scalar_ty, comp_srcs);
                    pre.push(comp);
                    comps.push(comp);
                }
                let instr = shader.instr_mut(id);
                instr.op = HirOp::VecCompose;
                instr.srcs = comps;
                split += 1;
                Ok(pre)
            }
            HirOp::Const { words } => {
                let scalar_ty = ty.to_scalar();
                let mut pre = Prepend::new();
                let mut comps = SmallVec::<[_; 4]>::new();
                for &word in words.iter() {
                    let c = shader.alloc(
                        HirOp::Const {
                            words: smallvec![word],
                        },
                        scalar_ty,
                        [],
                    );
                    pre.push(c);
                    comps.push(c);
                }
                let instr = shader.instr_mut(id);
                instr.op = HirOp::VecCompose;
                instr.srcs = comps;
                split += 1;
                Ok(pre)
            }
            _ => Ok(Prepend::new()),
        }
    })?;
    tracing::debug!(split, "scalarized vector operations");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{AluOp, HirBuilder, HirType, ScalarBase};
    use ember_asm::Stage;

    #[test]
    fn vector_add_splits_into_components() {
        let vec2 = HirType::vector(ScalarBase::Float, 32, 2);
        let mut b = HirBuilder::new(Stage::Compute);
        let a = b.const_vec(vec2, &[0x3f80_0000, 0x4000_0000]);
        let c = b.const_vec(vec2, &[0x4040_0000, 0x4080_0000]);
        let sum = b.alu2(AluOp::FAdd, vec2, a, c);
        let mut shader = b.finish();
        run(&mut shader).unwrap();
        assert_eq!(shader.instr(sum).op, HirOp::VecCompose);
        for &comp in &shader.instr(sum).srcs.clone() {
            assert_eq!(shader.instr(comp).op, HirOp::Alu(AluOp::FAdd));
            assert_eq!(shader.ty(comp).comps, 1);
        }
    }
}
