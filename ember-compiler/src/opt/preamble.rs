//! Preamble hoisting.
//!
//! Expensive expressions whose operands are wave-uniform move into a
//! once-per-wave preamble: one elected lane evaluates them and parks the
//! results in the const file, and the main body reads them back at zero
//! cost. Hoisting is bounded by a const-file budget and by the cost
//! model: plain ALU weighs 1, SFU 4, texture and memory 8, phis 2, and
//! anything that folds into a source modifier is free.

use crate::error::Result;
use crate::generation::Generation;
use crate::hir::{analyze_divergence, HirId, HirInstr, HirOp, HirShader, Node};
use crate::layout;
use ember_ir::ConstRegion;
use std::collections::{HashMap, HashSet};

/// Vec4 budget for preamble results.
const PREAMBLE_BUDGET_VEC4: u16 = 8;

/// Minimum subtree cost that justifies a const-file slot.
const HOIST_THRESHOLD: u32 = 4;

fn op_cost(op: &HirOp) -> u32 {
    use crate::hir::AluOp;
    match op {
        HirOp::Const { .. }
        | HirOp::Undef
        | HirOp::Copy
        | HirOp::VecCompose
        | HirOp::VecExtract { .. }
        | HirOp::LoadConstFile { .. } => 0,
        HirOp::Phi => 2,
        HirOp::Alu(
            AluOp::FRcp
            | AluOp::FRsq
            | AluOp::FSqrt
            | AluOp::FLog2
            | AluOp::FExp2
            | AluOp::SinPt1
            | AluOp::SinPt2,
        ) => 4,
        HirOp::Alu(_) => 1,
        HirOp::Tex(_) | HirOp::TexSize { .. } => 8,
        HirOp::LoadUbo { .. }
        | HirOp::LoadSsbo { .. }
        | HirOp::LoadGlobal
        | HirOp::LoadShared => 8,
        _ => 1,
    }
}

fn hoistable(shader: &HirShader, id: HirId) -> bool {
    let instr = shader.instr(id);
    !instr.op.has_side_effects()
        && !shader.divergent[id.index()]
        && !matches!(
            instr.op,
            HirOp::LoadVar(_)
                | HirOp::LoadInput { .. }
                | HirOp::InterpolateAt { .. }
                | HirOp::LoadBarycentric { .. }
                | HirOp::Ddx
                | HirOp::Ddy
                | HirOp::Phi
        )
}

/// Transitive closure of `root` over hoistable definitions, or `None`
/// when some dependency cannot move.
fn closure_of(
    shader: &HirShader,
    top_level: &HashSet<HirId>,
    root: HirId,
) -> Option<Vec<HirId>> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![(root, false)];
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(id);
            continue;
        }
        if !seen.insert(id) {
            continue;
        }
        if !hoistable(shader, id) || !top_level.contains(&id) {
            return None;
        }
        stack.push((id, true));
        for &s in &shader.instr(id).srcs {
            stack.push((s, false));
        }
    }
    Some(order)
}

fn subtree_cost(shader: &HirShader, closure: &[HirId]) -> u32 {
    closure.iter().map(|&id| op_cost(&shader.instr(id).op)).sum()
}

/// Runs preamble hoisting; a no-op on generations without the feature.
pub(crate) fn run<G: Generation>(shader: &mut HirShader) -> Result<()> {
    if !G::HAS_PREAMBLE
        || crate::context::debug_flags()
            .contains(crate::context::DebugFlags::NO_PREAMBLE)
    {
        return Ok(());
    }
    analyze_divergence(shader);

    let top_level: HashSet<HirId> = shader
        .body
        .iter()
        .filter_map(|n| match n {
            Node::Instr(id) => Some(*id),
            _ => None,
        })
        .collect();

    let base_vec4 = {
        let ubo_end = shader
            .ubo_uploads
            .iter()
            .map(|u| u.const_vec4 + (u.size() / 16) as u16)
            .max()
            .unwrap_or(0);
        ubo_end.max(layout::reserved_vec4(shader))
    };
    let budget_words = (PREAMBLE_BUDGET_VEC4 * 4)
        .min((G::MAX_CONST as u16).saturating_sub(base_vec4) * 4);

    let uses = super::count_uses(shader);
    let mut chosen: Vec<(HirId, Vec<HirId>)> = Vec::new();
    let mut in_preamble: HashSet<HirId> = HashSet::new();
    let mut words = 0u16;
    for node in &shader.body {
        let Node::Instr(id) = node else { continue };
        let id = *id;
        if words >= budget_words {
            break;
        }
        if uses[id.index()] == 0
            || shader.ty(id).comps != 1
            || in_preamble.contains(&id)
            || !hoistable(shader, id)
        {
            continue;
        }
        let Some(closure) = closure_of(shader, &top_level, id) else {
            continue;
        };
        if subtree_cost(shader, &closure) < HOIST_THRESHOLD {
            continue;
        }
        in_preamble.extend(closure.iter().copied());
        chosen.push((id, closure));
        words += 1;
    }
    if chosen.is_empty() {
        return Ok(());
    }

    // Clone each closure into the preamble and park the roots in the
    // const file; the main-body roots become const-file reads.
    let mut clone_map: HashMap<HirId, HirId> = HashMap::new();
    let mut preamble = Vec::new();
    let mut next_word = base_vec4 * 4;
    for (root, closure) in &chosen {
        for &dep in closure {
            if clone_map.contains_key(&dep) {
                continue;
            }
            let mut instr: HirInstr = shader.instr(dep).clone();
            for s in instr.srcs.iter_mut() {
                *s = clone_map[s];
            }
            let new = shader.alloc_instr(instr);
            clone_map.insert(dep, new);
            preamble.push(Node::Instr(new));
        }
        let ty = shader.ty(*root);
        let store = shader.alloc(
            HirOp::StoreConstFile { word: next_word },
            ty,
            [clone_map[root]],
        );
        preamble.push(Node::Instr(store));
        let instr = shader.instr_mut(*root);
        instr.op = HirOp::LoadConstFile { word: next_word };
        instr.srcs.clear();
        next_word += 1;
    }
    let len_vec4 = (next_word - base_vec4 * 4).div_ceil(4);
    shader.preamble = preamble;
    shader.preamble_const = Some(ConstRegion {
        offset: base_vec4,
        len: len_vec4,
    });
    tracing::debug!(
        hoisted = chosen.len(),
        base = base_vec4,
        "preamble hoisting done"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{Gen6, Gen7};
    use crate::hir::{AluOp, HirBuilder, HirType};
    use ember_asm::Stage;

    fn uniform_sfu_shader() -> HirShader {
        let mut b = HirBuilder::new(Stage::Fragment);
        let off = b.const_u32(0);
        let u = b.load_ubo(0, off, HirType::F32);
        let r = b.alu1(AluOp::FRcp, HirType::F32, u);
        let one = b.const_f32(1.0);
        let v = b.alu2(AluOp::FAdd, HirType::F32, r, one);
        b.store_output(0, v);
        b.finish()
    }

    #[test]
    fn expensive_uniform_chain_moves_to_preamble() {
        let mut shader = uniform_sfu_shader();
        run::<Gen7>(&mut shader).unwrap();
        assert!(!shader.preamble.is_empty());
        let region = shader.preamble_const.expect("region allocated");
        assert!(region.len >= 1);
        // The rcp root in the main body became a const-file read.
        assert!(shader.body.iter().any(|n| matches!(
            n,
            Node::Instr(id) if matches!(shader.instr(*id).op, HirOp::LoadConstFile { .. })
        )));
        assert!(shader
            .preamble
            .iter()
            .any(|n| matches!(n, Node::Instr(id)
                if matches!(shader.instr(*id).op, HirOp::StoreConstFile { .. }))));
    }

    #[test]
    fn preamble_is_gated_on_the_generation() {
        let mut shader = uniform_sfu_shader();
        run::<Gen6>(&mut shader).unwrap();
        assert!(shader.preamble.is_empty());
    }
}
