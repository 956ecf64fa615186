//! Sine and cosine lowering.
//!
//! The hardware splits sine across two SFU stages: `sin.p1` maps a
//! quadrant angle in `[0, 4]` to a piecewise sign/offset fixup in
//! `[-1, 1]`, and `sin.p2` evaluates sinc over the first quadrant in
//! turns. `sin(x) = sin.p2(sin.p1(q)) * sin.p1(q)` after reducing `x` to
//! quadrants modulo turns; cosine shifts the angle by one quadrant.

use super::Prepend;
use crate::error::Result;
use crate::hir::{AluOp, HirOp, HirShader};
use smallvec::smallvec;

const INV_TAU: f32 = core::f32::consts::FRAC_1_PI * 0.5;

pub(super) fn run(shader: &mut HirShader) -> Result<()> {
    super::map_instrs(shader, &mut |shader, id| {
        let op = match shader.instr(id).op {
            HirOp::Alu(op @ (AluOp::FSin | AluOp::FCos)) => op,
            _ => return Ok(Prepend::new()),
        };
        let ty = shader.instr(id).ty;
        let x = shader.instr(id).srcs[0];
        let mut pre = Prepend::new();

        let inv_tau = shader.alloc_const_f32(INV_TAU);
        pre.push(inv_tau);
        let mut turns = shader.alloc(HirOp::Alu(AluOp::FMul), ty, [x, inv_tau]);
        pre.push(turns);
        if op == AluOp::FCos {
            let quarter = shader.alloc_const_f32(0.25);
            pre.push(quarter);
            turns = shader.alloc(HirOp::Alu(AluOp::FAdd), ty, [turns, quarter]);
            pre.push(turns);
        }
        let fract = shader.alloc(HirOp::Alu(AluOp::FFract), ty, [turns]);
        pre.push(fract);
        let four = shader.alloc_const_f32(4.0);
        pre.push(four);
        let quadrants = shader.alloc(HirOp::Alu(AluOp::FMul), ty, [fract, four]);
        pre.push(quadrants);
        let fixup = shader.alloc(HirOp::Alu(AluOp::SinPt1), ty, [quadrants]);
        pre.push(fixup);
        let sinc = shader.alloc(HirOp::Alu(AluOp::SinPt2), ty, [fixup]);
        pre.push(sinc);

        let instr = shader.instr_mut(id);
        instr.op = HirOp::Alu(AluOp::FMul);
        instr.srcs = smallvec![sinc, fixup];
        Ok(pre)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{HirBuilder, HirType};
    use ember_asm::Stage;

    #[test]
    fn sin_becomes_two_stage_product() {
        let mut b = HirBuilder::new(Stage::Fragment);
        let x = b.const_f32(1.0);
        let s = b.alu1(AluOp::FSin, HirType::F32, x);
        let mut shader = b.finish();
        run(&mut shader).unwrap();
        assert_eq!(shader.instr(s).op, HirOp::Alu(AluOp::FMul));
        let sinc = shader.instr(s).srcs[0];
        let fixup = shader.instr(s).srcs[1];
        assert_eq!(shader.instr(sinc).op, HirOp::Alu(AluOp::SinPt2));
        assert_eq!(shader.instr(fixup).op, HirOp::Alu(AluOp::SinPt1));
    }

    #[test]
    fn cos_shifts_by_a_quarter_turn() {
        let mut b = HirBuilder::new(Stage::Fragment);
        let x = b.const_f32(0.5);
        let c = b.alu1(AluOp::FCos, HirType::F32, x);
        let mut shader = b.finish();
        run(&mut shader).unwrap();
        // The reduced angle feeds through an fadd of 0.25 turns.
        let sinc = shader.instr(c).srcs[0];
        let fixup = shader.instr(sinc).srcs[0];
        let quadrants = shader.instr(fixup).srcs[0];
        let fract = shader.instr(quadrants).srcs[0];
        let add = shader.instr(fract).srcs[0];
        assert_eq!(shader.instr(add).op, HirOp::Alu(AluOp::FAdd));
        assert_eq!(
            shader.as_const_f32(shader.instr(add).srcs[1]),
            Some(0.25)
        );
    }
}
