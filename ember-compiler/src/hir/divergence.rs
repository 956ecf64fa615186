//! Divergence analysis.
//!
//! Marks each value as wave-uniform or per-lane divergent. Uniformity is
//! what the preamble hoister feeds on; the analysis is conservative in
//! the divergent direction.

use super::{HirId, HirOp, HirShader, Node, Sysval};

fn source_divergence(op: &HirOp, stage: ember_asm::Stage) -> Option<bool> {
    // `Some` pins the op's divergence regardless of sources.
    use ember_asm::Stage;
    match op {
        HirOp::Const { .. } | HirOp::Undef => Some(false),
        HirOp::LoadUbo { .. } | HirOp::LoadConstFile { .. } => None,
        HirOp::LoadInput { .. } | HirOp::InterpolateAt { .. } => Some(true),
        HirOp::LoadBarycentric { .. } | HirOp::Ddx | HirOp::Ddy => Some(true),
        HirOp::LoadSysval(sv) => Some(match sv {
            Sysval::VertexId
            | Sysval::InstanceId
            | Sysval::FragCoord
            | Sysval::SampleId
            | Sysval::SamplePosFromId
            | Sysval::InvocationId
            | Sysval::TessCoord
            | Sysval::LocalInvocationId => true,
            Sysval::PatchId => stage != Stage::TessCtrl && stage != Stage::TessEval,
            Sysval::WorkgroupId
            | Sysval::ArraySizeMinus1 { .. }
            | Sysval::TessFactorBase
            | Sysval::TessParamBase => false,
        }),
        HirOp::LoadSsbo { .. }
        | HirOp::LoadGlobal
        | HirOp::LoadShared
        | HirOp::ImageLoad { .. }
        | HirOp::SsboAtomic { .. }
        | HirOp::ImageAtomic { .. }
        | HirOp::Tex(_)
        | HirOp::LoadPerVertexOutput { .. } => Some(true),
        HirOp::TexSize { .. } => Some(false),
        _ => None,
    }
}

/// Computes per-value divergence into `shader.divergent`.
///
/// Values inside divergent control flow are themselves divergent; local
/// variables are divergent once any store to them is.
pub fn analyze_divergence(shader: &mut HirShader) {
    let n = shader.instrs.len();
    let mut divergent = vec![false; n];
    let mut var_divergent = vec![false; shader.vars.len()];

    // Stores inside conditional bodies depend on the lanes that reach
    // them; iterate to a fixed point over variable divergence.
    loop {
        let mut changed = false;
        let mut visit_stack: Vec<(&[Node], bool)> = vec![(shader.body.as_slice(), false)];
        let mut order: Vec<(HirId, bool)> = Vec::new();
        while let Some((nodes, in_divergent_cf)) = visit_stack.pop() {
            for node in nodes {
                match node {
                    Node::Instr(id) => order.push((*id, in_divergent_cf)),
                    Node::If {
                        cond,
                        then_body,
                        else_body,
                    } => {
                        let div_cf = in_divergent_cf || divergent[cond.index()];
                        visit_stack.push((then_body.as_slice(), div_cf));
                        visit_stack.push((else_body.as_slice(), div_cf));
                    }
                    Node::Loop { body } => {
                        // Loop trip counts may differ per lane.
                        visit_stack.push((body.as_slice(), true));
                    }
                    Node::Break | Node::Continue => {}
                }
            }
        }
        for (id, in_divergent_cf) in order {
            let instr = &shader.instrs[id.index()];
            let mut d = match source_divergence(&instr.op, shader.stage) {
                Some(pinned) => pinned,
                None => instr
                    .srcs
                    .iter()
                    .any(|s| divergent[s.index()]),
            };
            match &instr.op {
                HirOp::LoadVar(v) => d = var_divergent[v.0 as usize],
                HirOp::StoreVar(v) => {
                    let store_div = d || in_divergent_cf;
                    if store_div && !var_divergent[v.0 as usize] {
                        var_divergent[v.0 as usize] = true;
                        changed = true;
                    }
                }
                _ => {}
            }
            if d != divergent[id.index()] {
                divergent[id.index()] = d;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    shader.divergent = divergent;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{AluOp, HirBuilder, HirType};
    use ember_asm::Stage;

    #[test]
    fn ubo_math_is_uniform_but_input_math_is_not() {
        let mut b = HirBuilder::new(Stage::Fragment);
        let input = b.declare_input(crate::hir::IoVar {
            semantic: crate::hir::Semantic::User(0),
            driver_location: 0,
            comps: 1,
            interp: Default::default(),
        });
        let off = b.const_u32(16);
        let u = b.load_ubo(0, off, HirType::F32);
        let i = b.load_input(input, HirType::F32);
        let uu = b.alu2(AluOp::FAdd, HirType::F32, u, u);
        let ui = b.alu2(AluOp::FAdd, HirType::F32, u, i);
        let mut shader = b.finish();
        analyze_divergence(&mut shader);
        assert!(!shader.divergent[uu.index()]);
        assert!(shader.divergent[ui.index()]);
    }
}
