//! Branch-to-select peephole.
//!
//! An `if` whose arms are short runs of effect-free instructions, joined
//! only through phis, costs more as divergent control flow than as
//! straight-line selects. Both arms hoist out and each following phi
//! becomes `select(cond, then_value, else_value)`.

use crate::hir::{AluOp, HirOp, HirShader, Node};
use smallvec::smallvec;

/// Largest combined arm size the peephole flattens.
const MAX_FLATTENED: usize = 64;

fn flattenable(shader: &HirShader, nodes: &[Node]) -> bool {
    nodes.iter().all(|n| match n {
        Node::Instr(id) => !shader.instr(*id).op.has_side_effects(),
        _ => false,
    })
}

fn flatten(shader: &mut HirShader, nodes: &mut Vec<Node>) -> bool {
    let mut changed = false;
    let mut i = 0;
    while i < nodes.len() {
        // Recurse first so inner ifs flatten before the outer test.
        match &mut nodes[i] {
            Node::If {
                then_body,
                else_body,
                ..
            } => {
                changed |= flatten(shader, then_body);
                changed |= flatten(shader, else_body);
            }
            Node::Loop { body } => {
                changed |= flatten(shader, body);
                i += 1;
                continue;
            }
            _ => {
                i += 1;
                continue;
            }
        }
        let Node::If {
            cond,
            then_body,
            else_body,
        } = &nodes[i]
        else {
            unreachable!("checked above")
        };
        let cond = *cond;
        if then_body.len() + else_body.len() > MAX_FLATTENED
            || !flattenable(shader, then_body)
            || !flattenable(shader, else_body)
        {
            i += 1;
            continue;
        }
        let Node::If {
            then_body,
            else_body,
            ..
        } = nodes.remove(i)
        else {
            unreachable!("checked above")
        };
        let arm_len = then_body.len() + else_body.len();
        nodes.splice(i..i, then_body.into_iter().chain(else_body));
        // Phis directly after the if become selects on its condition.
        let mut j = i + arm_len;
        while j < nodes.len() {
            let Node::Instr(id) = &nodes[j] else { break };
            let id = *id;
            if shader.instr(id).op != HirOp::Phi {
                break;
            }
            let t = shader.instr(id).srcs[0];
            let e = shader.instr(id).srcs[1];
            let instr = shader.instr_mut(id);
            instr.op = HirOp::Alu(AluOp::Select);
            instr.srcs = smallvec![cond, t, e];
            j += 1;
        }
        changed = true;
    }
    changed
}

pub(super) fn run(shader: &mut HirShader) -> bool {
    let mut body = core::mem::take(&mut shader.body);
    let changed = flatten(shader, &mut body);
    shader.body = body;
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{HirBuilder, HirType};
    use ember_asm::Stage;

    #[test]
    fn small_pure_if_becomes_selects() {
        let mut b = HirBuilder::new(Stage::Compute);
        let c = b.sysval(crate::hir::Sysval::VertexId, HirType::U32);
        let zero = b.const_u32(0);
        let cond = b.alu2(AluOp::INe, crate::lower::bools::BOOL_REG, c, zero);
        b.if_begin(cond);
        let one = b.const_u32(1);
        let t = b.alu2(AluOp::IAdd, HirType::U32, c, one);
        b.else_begin();
        let two = b.const_u32(2);
        let e = b.alu2(AluOp::IAdd, HirType::U32, c, two);
        b.if_end();
        let join = b.phi(HirType::U32, t, e);
        let mut shader = b.finish();
        assert!(run(&mut shader));
        assert!(!shader
            .body
            .iter()
            .any(|n| matches!(n, Node::If { .. })));
        assert_eq!(shader.instr(join).op, HirOp::Alu(AluOp::Select));
        assert_eq!(shader.instr(join).srcs[0], cond);
    }

    #[test]
    fn effectful_arms_stay_branchy() {
        let mut b = HirBuilder::new(Stage::Compute);
        let cond = b.const_bool(true);
        b.if_begin(cond);
        b.discard();
        b.if_end();
        let mut shader = b.finish();
        assert!(!run(&mut shader));
        assert!(shader.body.iter().any(|n| matches!(n, Node::If { .. })));
    }
}
