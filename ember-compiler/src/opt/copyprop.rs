//! Copy propagation.
//!
//! Chases `Copy` chains at every use site and collapses
//! `VecExtract(VecCompose(..))` back to the extracted component.

use crate::hir::{HirId, HirOp, HirShader};
use smallvec::smallvec;

fn resolve(shader: &HirShader, mut id: HirId) -> HirId {
    // Copy chains are short; the bound only guards against cycles that
    // would indicate a malformed tree.
    for _ in 0..64 {
        match &shader.instr(id).op {
            HirOp::Copy => id = shader.instr(id).srcs[0],
            _ => break,
        }
    }
    id
}

pub(super) fn run(shader: &mut HirShader) -> bool {
    let mut changed = super::rewrite_srcs(shader, &resolve);

    // VecExtract of a known composition selects the component value
    // directly; extracting component zero of a scalar is the identity.
    for id in 0..shader.instrs.len() {
        let HirOp::VecExtract { comp } = shader.instrs[id].op else {
            continue;
        };
        let src = shader.instrs[id].srcs[0];
        let replacement = match &shader.instr(src).op {
            HirOp::VecCompose => {
                shader.instr(src).srcs.get(comp as usize).copied()
            }
            _ if shader.ty(src).comps == 1 && comp == 0 => Some(src),
            _ => None,
        };
        if let Some(value) = replacement {
            let instr = &mut shader.instrs[id];
            instr.op = HirOp::Copy;
            instr.srcs = smallvec![value];
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{AluOp, HirBuilder, HirType, ScalarBase};
    use ember_asm::Stage;

    #[test]
    fn extract_of_compose_collapses() {
        let vec2 = HirType::vector(ScalarBase::Uint, 32, 2);
        let mut b = HirBuilder::new(Stage::Compute);
        let x = b.const_u32(7);
        let y = b.const_u32(9);
        let v = b.vec_compose(vec2, &[x, y]);
        let e = b.vec_extract(v, 1);
        let use_site = b.alu2(AluOp::IAdd, HirType::U32, e, e);
        let mut shader = b.finish();
        run(&mut shader);
        run(&mut shader);
        assert_eq!(shader.instr(use_site).srcs[0], y);
    }
}
