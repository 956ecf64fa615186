//! Texture operation legalization.
//!
//! Projective samples divide through explicitly, array layers follow the
//! `min(d - 1, f32_to_u32(layer + 0.5))` rule with the layer count read
//! from a driver system value, cube-map gradients expand to the
//! three-component vector form the face-selection hardware consumes, and
//! static texel offsets are checked against the 4-bit signed field they
//! pack into.

use super::Prepend;
use crate::error::{CompileError, Result};
use crate::hir::{AluOp, HirId, HirOp, HirShader, HirType, LodMode, ScalarBase, Sysval, TexDim};
use smallvec::SmallVec;

/// Widens one gradient operand to a full 3-component vector, padding the
/// missing derivative components with zero.
fn widen_gradient(
    shader: &mut HirShader,
    pre: &mut Prepend,
    grad: HirId,
) -> HirId {
    let g_ty = shader.ty(grad);
    let scalar = g_ty.to_scalar();
    let vec3 = HirType::vector(g_ty.base, g_ty.bits, 3);
    let mut comps = SmallVec::<[_; 4]>::new();
    for c in 0..3u8 {
        if c < g_ty.comps {
            let e = shader.alloc(HirOp::VecExtract { comp: c }, scalar, [grad]);
            pre.push(e);
            comps.push(e);
        } else {
            let z = shader.alloc_const_f32(0.0);
            pre.push(z);
            comps.push(z);
        }
    }
    let wide = shader.alloc(HirOp::VecCompose, vec3, comps);
    pre.push(wide);
    wide
}

pub(super) fn run(shader: &mut HirShader) -> Result<()> {
    super::map_instrs(shader, &mut |shader, id| {
        let mut tex_op = match &shader.instr(id).op {
            HirOp::Tex(t) => *t,
            _ => return Ok(Prepend::new()),
        };
        let mut pre = Prepend::new();

        if let Some((x, y, z)) = tex_op.offset {
            for o in [x, y, z] {
                if !(-8..=7).contains(&o) {
                    return Err(CompileError::UnsupportedFeature(format!(
                        "texture offset component {o} outside [-8, 7]"
                    )));
                }
            }
        }

        // Cube derivatives are taken on the 3D direction vector; narrow
        // gradients widen to vec3 before face selection.
        if tex_op.dim == TexDim::Cube && tex_op.lod == LodMode::Grad {
            for slot in 1..=2 {
                let grad = shader.instr(id).srcs[slot];
                if shader.ty(grad).comps < 3 {
                    let wide = widen_gradient(shader, &mut pre, grad);
                    shader.instr_mut(id).srcs[slot] = wide;
                }
            }
        }

        let coord = shader.instr(id).srcs[0];
        let coord_ty = shader.ty(coord);
        let base = tex_op.dim.coord_comps();

        if tex_op.proj {
            // txp: divide every coordinate component by the trailing
            // projector before sampling.
            let proj_comp = coord_ty.comps - 1;
            let scalar = coord_ty.to_scalar();
            let q = shader.alloc(HirOp::VecExtract { comp: proj_comp }, scalar, [coord]);
            pre.push(q);
            let rcp = shader.alloc(HirOp::Alu(AluOp::FRcp), scalar, [q]);
            pre.push(rcp);
            let mut comps = SmallVec::<[_; 4]>::new();
            for c in 0..proj_comp {
                let e = shader.alloc(HirOp::VecExtract { comp: c }, scalar, [coord]);
                pre.push(e);
                let m = shader.alloc(HirOp::Alu(AluOp::FMul), scalar, [e, rcp]);
                pre.push(m);
                comps.push(m);
            }
            let new_ty =
                HirType::vector(coord_ty.base, coord_ty.bits, proj_comp);
            let new_coord = shader.alloc(HirOp::VecCompose, new_ty, comps);
            pre.push(new_coord);
            tex_op.proj = false;
            let instr = shader.instr_mut(id);
            instr.srcs[0] = new_coord;
            instr.op = HirOp::Tex(tex_op);
            return Ok(pre);
        }

        if tex_op.array && !tex_op.layer_is_int {
            // GLES: layer = min(d - 1, f32_to_u32(layer + 0.5)).
            let scalar = coord_ty.to_scalar();
            let uint_ty = HirType::scalar(ScalarBase::Uint, 32);
            let layer_comp = base;
            let layer =
                shader.alloc(HirOp::VecExtract { comp: layer_comp }, scalar, [coord]);
            pre.push(layer);
            let half = shader.alloc_const_f32(0.5);
            pre.push(half);
            let biased = shader.alloc(HirOp::Alu(AluOp::FAdd), scalar, [layer, half]);
            pre.push(biased);
            let as_u = shader.alloc(HirOp::Alu(AluOp::F2U), uint_ty, [biased]);
            pre.push(as_u);
            let d1 = shader.alloc(
                HirOp::LoadSysval(Sysval::ArraySizeMinus1 { tex: tex_op.tex }),
                uint_ty,
                [],
            );
            pre.push(d1);
            let clamped = shader.alloc(HirOp::Alu(AluOp::UMin), uint_ty, [as_u, d1]);
            pre.push(clamped);
            let mut comps = SmallVec::<[_; 4]>::new();
            for c in 0..base {
                let e = shader.alloc(HirOp::VecExtract { comp: c }, scalar, [coord]);
                pre.push(e);
                comps.push(e);
            }
            comps.push(clamped);
            let new_coord = shader.alloc(HirOp::VecCompose, coord_ty, comps);
            pre.push(new_coord);
            tex_op.layer_is_int = true;
            let instr = shader.instr_mut(id);
            instr.srcs[0] = new_coord;
            instr.op = HirOp::Tex(tex_op);
        }
        Ok(pre)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{HirBuilder, LodMode, TexDim, TexOp};
    use ember_asm::Stage;

    fn sample_op(array: bool, proj: bool) -> TexOp {
        TexOp {
            tex: 0,
            samp: 0,
            dim: TexDim::Dim2D,
            array,
            layer_is_int: false,
            proj,
            offset: None,
            lod: LodMode::Auto,
        }
    }

    #[test]
    fn array_layer_is_clamped_against_sysval() {
        let vec3 = HirType::vector(ScalarBase::Float, 32, 3);
        let vec4 = HirType::vector(ScalarBase::Float, 32, 4);
        let mut b = HirBuilder::new(Stage::Fragment);
        let coord = b.const_vec(vec3, &[0, 0, 0x3fd9_999a]);
        let s = b.tex(sample_op(true, false), vec4, &[coord]);
        let mut shader = b.finish();
        run(&mut shader).unwrap();

        let HirOp::Tex(t) = &shader.instr(s).op else {
            panic!("not a tex")
        };
        assert!(t.layer_is_int);
        let new_coord = shader.instr(s).srcs[0];
        let layer = shader.instr(new_coord).srcs[2];
        assert_eq!(shader.instr(layer).op, HirOp::Alu(AluOp::UMin));
        let d1 = shader.instr(layer).srcs[1];
        assert_eq!(
            shader.instr(d1).op,
            HirOp::LoadSysval(Sysval::ArraySizeMinus1 { tex: 0 })
        );
    }

    #[test]
    fn projective_sample_divides_first() {
        let vec3 = HirType::vector(ScalarBase::Float, 32, 3);
        let vec4 = HirType::vector(ScalarBase::Float, 32, 4);
        let mut b = HirBuilder::new(Stage::Fragment);
        let coord = b.const_vec(vec3, &[0, 0, 0x4000_0000]);
        let s = b.tex(sample_op(false, true), vec4, &[coord]);
        let mut shader = b.finish();
        run(&mut shader).unwrap();

        let HirOp::Tex(t) = &shader.instr(s).op else {
            panic!("not a tex")
        };
        assert!(!t.proj);
        let new_coord = shader.instr(s).srcs[0];
        assert_eq!(shader.ty(new_coord).comps, 2);
        let x = shader.instr(new_coord).srcs[0];
        assert_eq!(shader.instr(x).op, HirOp::Alu(AluOp::FMul));
        let rcp = shader.instr(x).srcs[1];
        assert_eq!(shader.instr(rcp).op, HirOp::Alu(AluOp::FRcp));
    }

    #[test]
    fn cube_gradients_widen_to_vector_form() {
        let vec2 = HirType::vector(ScalarBase::Float, 32, 2);
        let vec3 = HirType::vector(ScalarBase::Float, 32, 3);
        let vec4 = HirType::vector(ScalarBase::Float, 32, 4);
        let mut b = HirBuilder::new(Stage::Fragment);
        let coord = b.const_vec(vec3, &[0, 0, 0x3f80_0000]);
        let ddx = b.const_vec(vec2, &[0x3a80_0000, 0]);
        let ddy = b.const_vec(vec2, &[0, 0x3a80_0000]);
        let op = TexOp {
            dim: TexDim::Cube,
            lod: LodMode::Grad,
            ..sample_op(false, false)
        };
        let s = b.tex(op, vec4, &[coord, ddx, ddy]);
        let mut shader = b.finish();
        run(&mut shader).unwrap();

        for slot in 1..=2 {
            let grad = shader.instr(s).srcs[slot];
            assert_eq!(shader.ty(grad).comps, 3, "gradient {slot} widened");
            assert_eq!(shader.instr(grad).op, HirOp::VecCompose);
            let pad = shader.instr(grad).srcs[2];
            assert_eq!(shader.as_const_f32(pad), Some(0.0));
        }
        // Idempotent: vec3 gradients pass through untouched.
        let widened: Vec<_> = (1..=2).map(|k| shader.instr(s).srcs[k]).collect();
        run(&mut shader).unwrap();
        assert_eq!(shader.instr(s).srcs[1], widened[0]);
        assert_eq!(shader.instr(s).srcs[2], widened[1]);
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let vec2 = HirType::vector(ScalarBase::Float, 32, 2);
        let vec4 = HirType::vector(ScalarBase::Float, 32, 4);
        let mut b = HirBuilder::new(Stage::Fragment);
        let coord = b.const_vec(vec2, &[0, 0]);
        let mut op = sample_op(false, false);
        op.offset = Some((9, 0, 0));
        b.tex(op, vec4, &[coord]);
        let mut shader = b.finish();
        assert!(matches!(
            run(&mut shader),
            Err(CompileError::UnsupportedFeature(_))
        ));
    }
}
