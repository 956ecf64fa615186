//! Algebraic rewriting.
//!
//! Identity and absorption rules that are safe without fast-math, plus
//! the late negation-folding pass (`a + (-b)` becomes `a - b`).

use crate::hir::{AluOp, HirId, HirOp, HirShader};
use smallvec::smallvec;

fn const_of(shader: &HirShader, id: HirId) -> Option<u32> {
    shader.as_const_u32(id)
}

fn rewrite_copy(shader: &mut HirShader, id: usize, value: HirId) {
    let instr = &mut shader.instrs[id];
    instr.op = HirOp::Copy;
    instr.srcs = smallvec![value];
}

fn rewrite_const(shader: &mut HirShader, id: usize, word: u32) {
    let instr = &mut shader.instrs[id];
    instr.op = HirOp::Const {
        words: smallvec![word],
    };
    instr.srcs = smallvec![];
}

pub(super) fn run(shader: &mut HirShader) -> bool {
    let mut changed = false;
    for id in 0..shader.instrs.len() {
        let HirOp::Alu(op) = shader.instrs[id].op else {
            continue;
        };
        let srcs = shader.instrs[id].srcs.clone();
        let (a, b) = match srcs.as_slice() {
            [a, b] => (*a, Some(*b)),
            [a] => (*a, None),
            _ => {
                if op == AluOp::Select && srcs[1] == srcs[2] {
                    rewrite_copy(shader, id, srcs[1]);
                    changed = true;
                }
                continue;
            }
        };
        let ca = const_of(shader, a);
        let cb = b.and_then(|b| const_of(shader, b));
        let b_id = b;
        match op {
            AluOp::IAdd | AluOp::IOr | AluOp::IXor | AluOp::ISub => {
                if cb == Some(0) {
                    rewrite_copy(shader, id, a);
                    changed = true;
                } else if ca == Some(0)
                    && matches!(op, AluOp::IAdd | AluOp::IOr | AluOp::IXor)
                {
                    rewrite_copy(shader, id, b_id.expect("binary op"));
                    changed = true;
                }
            }
            AluOp::IShl | AluOp::UShr | AluOp::IShr => {
                if cb == Some(0) {
                    rewrite_copy(shader, id, a);
                    changed = true;
                }
            }
            AluOp::IMul => {
                if cb == Some(1) {
                    rewrite_copy(shader, id, a);
                    changed = true;
                } else if ca == Some(1) {
                    rewrite_copy(shader, id, b_id.expect("binary op"));
                    changed = true;
                } else if cb == Some(0) || ca == Some(0) {
                    rewrite_const(shader, id, 0);
                    changed = true;
                }
            }
            AluOp::IAnd => {
                if cb == Some(u32::MAX) {
                    rewrite_copy(shader, id, a);
                    changed = true;
                } else if cb == Some(0) || ca == Some(0) {
                    rewrite_const(shader, id, 0);
                    changed = true;
                }
            }
            AluOp::FMul => {
                if cb == Some(1.0f32.to_bits()) {
                    rewrite_copy(shader, id, a);
                    changed = true;
                } else if ca == Some(1.0f32.to_bits()) {
                    rewrite_copy(shader, id, b_id.expect("binary op"));
                    changed = true;
                }
            }
            AluOp::UMin | AluOp::UMax | AluOp::IMin | AluOp::IMax => {
                if b_id == Some(a) {
                    rewrite_copy(shader, id, a);
                    changed = true;
                }
            }
            _ => {}
        }
    }
    changed
}

/// Late identities: fold negations into subtractions once the main loop
/// has settled.
pub(super) fn run_late(shader: &mut HirShader) -> bool {
    let mut changed = false;
    for id in 0..shader.instrs.len() {
        let HirOp::Alu(op) = shader.instrs[id].op else {
            continue;
        };
        let srcs = shader.instrs[id].srcs.clone();
        match (op, srcs.as_slice()) {
            (AluOp::FAdd, [a, b]) => {
                if shader.instr(*b).op == HirOp::Alu(AluOp::FNeg) {
                    let inner = shader.instr(*b).srcs[0];
                    let a = *a;
                    let instr = &mut shader.instrs[id];
                    instr.op = HirOp::Alu(AluOp::FSub);
                    instr.srcs = smallvec![a, inner];
                    changed = true;
                }
            }
            (AluOp::IAdd, [a, b]) => {
                if shader.instr(*b).op == HirOp::Alu(AluOp::INeg) {
                    let inner = shader.instr(*b).srcs[0];
                    let a = *a;
                    let instr = &mut shader.instrs[id];
                    instr.op = HirOp::Alu(AluOp::ISub);
                    instr.srcs = smallvec![a, inner];
                    changed = true;
                }
            }
            _ => {}
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{HirBuilder, HirType};
    use ember_asm::Stage;

    #[test]
    fn add_of_negation_becomes_subtract() {
        let mut b = HirBuilder::new(Stage::Compute);
        let x = b.const_f32(5.0);
        let y = b.const_f32(3.0);
        let n = b.alu1(AluOp::FNeg, HirType::F32, y);
        let s = b.alu2(AluOp::FAdd, HirType::F32, x, n);
        let mut shader = b.finish();
        assert!(run_late(&mut shader));
        assert_eq!(shader.instr(s).op, HirOp::Alu(AluOp::FSub));
        assert_eq!(shader.instr(s).srcs[1], y);
    }

    #[test]
    fn multiply_by_zero_is_absorbed() {
        let mut b = HirBuilder::new(Stage::Compute);
        let x = b.sysval(crate::hir::Sysval::VertexId, HirType::U32);
        let z = b.const_u32(0);
        let m = b.alu2(AluOp::IMul, HirType::U32, x, z);
        let mut shader = b.finish();
        assert!(run(&mut shader));
        assert_eq!(shader.as_const_u32(m), Some(0));
    }
}
