//! Move sinking.
//!
//! Pulls constants, const-file loads and comparisons down to sit directly
//! before their single consumer, which shortens their live ranges ahead
//! of scheduling. Only moves within one body list; a value used across a
//! scope boundary stays put.

use crate::hir::{HirId, HirOp, HirShader, Node};

fn sinkable(shader: &HirShader, id: HirId) -> bool {
    match &shader.instr(id).op {
        HirOp::Const { .. } | HirOp::LoadConstFile { .. } | HirOp::LoadUbo { .. } => {
            true
        }
        HirOp::Alu(op) => op.is_cmp(),
        _ => false,
    }
}

fn uses_value(shader: &HirShader, node: &Node, value: HirId) -> bool {
    match node {
        Node::Instr(id) => shader.instr(*id).srcs.contains(&value),
        Node::If { cond, .. } => *cond == value,
        _ => false,
    }
}

fn sink_list(shader: &HirShader, nodes: &mut Vec<Node>, uses: &[u32]) -> bool {
    let mut changed = false;
    let mut i = 0;
    while i < nodes.len() {
        if let Node::If {
            then_body,
            else_body,
            ..
        } = &mut nodes[i]
        {
            changed |= sink_list(shader, then_body, uses);
            changed |= sink_list(shader, else_body, uses);
        } else if let Node::Loop { body } = &mut nodes[i] {
            changed |= sink_list(shader, body, uses);
        }
        let Node::Instr(id) = &nodes[i] else {
            i += 1;
            continue;
        };
        let id = *id;
        if uses[id.index()] != 1 || !sinkable(shader, id) {
            i += 1;
            continue;
        }
        let user = nodes
            .iter()
            .enumerate()
            .skip(i + 1)
            .find(|(_, n)| uses_value(shader, n, id))
            .map(|(pos, _)| pos);
        match user {
            Some(pos) if pos > i + 1 => {
                let node = nodes.remove(i);
                nodes.insert(pos - 1, node);
                changed = true;
                // The list shifted; revisit the slot that moved up.
            }
            _ => i += 1,
        }
    }
    changed
}

pub(super) fn run(shader: &mut HirShader) -> bool {
    let uses = super::count_uses(shader);
    let mut body = core::mem::take(&mut shader.body);
    let changed = sink_list(shader, &mut body, &uses);
    shader.body = body;
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{AluOp, HirBuilder, HirType};
    use ember_asm::Stage;

    #[test]
    fn single_use_constant_moves_to_its_user() {
        let mut b = HirBuilder::new(Stage::Compute);
        let k = b.const_u32(42);
        let x = b.sysval(crate::hir::Sysval::VertexId, HirType::U32);
        let y = b.alu2(AluOp::IMul, HirType::U32, x, x);
        let z = b.alu2(AluOp::IAdd, HirType::U32, y, k);
        let _keep = b.alu2(AluOp::IXor, HirType::U32, z, y);
        let mut shader = b.finish();
        assert!(run(&mut shader));
        // The constant now sits directly before its single use.
        let pos_k = shader
            .body
            .iter()
            .position(|n| matches!(n, Node::Instr(i) if *i == k))
            .unwrap();
        let pos_z = shader
            .body
            .iter()
            .position(|n| matches!(n, Node::Instr(i) if *i == z))
            .unwrap();
        assert_eq!(pos_k + 1, pos_z);
        assert!(!run(&mut shader), "sinking is idempotent");
    }
}
