//! Barycentric lowering.
//!
//! `at_sample` reduces to `at_offset` through the sample-position lookup,
//! and `at_offset` expands to manual perspective interpolation: scale the
//! pixel barycentrics by 1/w, walk them along the screen-space
//! derivatives, and divide back out by the interpolated w.

use super::Prepend;
use crate::error::Result;
use crate::hir::{AluOp, BaryMode, HirId, HirOp, HirShader, HirType, ScalarBase, Sysval};
use smallvec::smallvec;

pub(super) fn run(shader: &mut HirShader) -> Result<()> {
    super::map_instrs(shader, &mut |shader, id| {
        let mode = match shader.instr(id).op {
            HirOp::LoadBarycentric { mode } => mode,
            _ => return Ok(Prepend::new()),
        };
        match mode {
            BaryMode::Pixel => Ok(Prepend::new()),
            BaryMode::AtSample => {
                let sample = shader.instr(id).srcs[0];
                let vec2 = HirType::vector(ScalarBase::Float, 32, 2);
                let pos = shader.alloc(
                    HirOp::LoadSysval(Sysval::SamplePosFromId),
                    vec2,
                    [sample],
                );
                let instr = shader.instr_mut(id);
                instr.op = HirOp::LoadBarycentric {
                    mode: BaryMode::AtOffset,
                };
                instr.srcs = smallvec![pos];
                // Leave the instruction in place; the next round of the
                // walk does not revisit it, so expand immediately.
                let mut pre = Prepend::new();
                pre.push(pos);
                pre.extend(expand_at_offset(shader, id));
                Ok(pre)
            }
            BaryMode::AtOffset => Ok(expand_at_offset(shader, id)),
        }
    })
}

fn expand_at_offset(shader: &mut HirShader, id: HirId) -> Prepend {
    let f32s = HirType::F32;
    let vec2 = HirType::vector(ScalarBase::Float, 32, 2);
    let vec4 = HirType::vector(ScalarBase::Float, 32, 4);
    let offset = shader.instr(id).srcs[0];
    let mut pre = Prepend::new();
    let mut push = |shader: &mut HirShader, pre: &mut Prepend, op, ty, srcs: &[HirId]| {
        let v = shader.alloc(op, ty, srcs.iter().copied());
        pre.push(v);
        v
    };

    let ij = push(
        shader,
        &mut pre,
        HirOp::LoadBarycentric {
            mode: BaryMode::Pixel,
        },
        vec2,
        &[],
    );
    let i = push(shader, &mut pre, HirOp::VecExtract { comp: 0 }, f32s, &[ij]);
    let j = push(shader, &mut pre, HirOp::VecExtract { comp: 1 }, f32s, &[ij]);
    let frag = push(shader, &mut pre, HirOp::LoadSysval(Sysval::FragCoord), vec4, &[]);
    let w_inv = push(shader, &mut pre, HirOp::VecExtract { comp: 3 }, f32s, &[frag]);

    let off_x = push(shader, &mut pre, HirOp::VecExtract { comp: 0 }, f32s, &[offset]);
    let off_y = push(shader, &mut pre, HirOp::VecExtract { comp: 1 }, f32s, &[offset]);

    // sij = (i/w, j/w, 1/w), then walk along ddx/ddy of each component.
    let mut interp = |shader: &mut HirShader, pre: &mut Prepend, s: HirId| {
        let dx = {
            let v = shader.alloc(HirOp::Ddx, f32s, [s]);
            pre.push(v);
            v
        };
        let dy = {
            let v = shader.alloc(HirOp::Ddy, f32s, [s]);
            pre.push(v);
            v
        };
        let a = {
            let v = shader.alloc(HirOp::Alu(AluOp::FMad), f32s, [off_x, dx, s]);
            pre.push(v);
            v
        };
        let v = shader.alloc(HirOp::Alu(AluOp::FMad), f32s, [off_y, dy, a]);
        pre.push(v);
        v
    };

    let si = push(shader, &mut pre, HirOp::Alu(AluOp::FMul), f32s, &[i, w_inv]);
    let sj = push(shader, &mut pre, HirOp::Alu(AluOp::FMul), f32s, &[j, w_inv]);
    let ni = interp(shader, &mut pre, si);
    let nj = interp(shader, &mut pre, sj);
    let nz = interp(shader, &mut pre, w_inv);

    let rcp = push(shader, &mut pre, HirOp::Alu(AluOp::FRcp), f32s, &[nz]);
    let new_i = push(shader, &mut pre, HirOp::Alu(AluOp::FMul), f32s, &[ni, rcp]);
    let new_j = push(shader, &mut pre, HirOp::Alu(AluOp::FMul), f32s, &[nj, rcp]);

    let instr = shader.instr_mut(id);
    instr.op = HirOp::VecCompose;
    instr.srcs = smallvec![new_i, new_j];
    pre
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::HirBuilder;
    use ember_asm::Stage;
    use smallvec::SmallVec;

    #[test]
    fn at_sample_goes_through_sample_position() {
        let mut b = HirBuilder::new(Stage::Fragment);
        let idx = b.const_u32(1);
        let vec2 = HirType::vector(ScalarBase::Float, 32, 2);
        let bary = b.push(
            HirOp::LoadBarycentric {
                mode: BaryMode::AtSample,
            },
            vec2,
            SmallVec::from_slice(&[idx]),
        );
        let mut shader = b.finish();
        run(&mut shader).unwrap();
        // The result is composed from perspective-divided components.
        assert_eq!(shader.instr(bary).op, HirOp::VecCompose);
        assert!(shader
            .instrs
            .iter()
            .any(|i| i.op == HirOp::LoadSysval(Sysval::SamplePosFromId)));
        assert!(shader.instrs.iter().any(|i| i.op == HirOp::Ddx));
    }
}
