//! Dead code elimination.
//!
//! Removes placed instructions whose value is unused and whose operation
//! has no observable effect, then drops `if` nodes whose arms emptied
//! out. Runs its own inner loop so chains of dead values disappear in one
//! call.

use crate::hir::{HirShader, Node};

fn sweep(shader: &HirShader, nodes: &mut Vec<Node>, uses: &[u32]) -> bool {
    let mut changed = false;
    nodes.retain_mut(|node| match node {
        Node::Instr(id) => {
            let instr = shader.instr(*id);
            let dead = uses[id.index()] == 0 && !instr.op.has_side_effects();
            if dead {
                changed = true;
            }
            !dead
        }
        Node::If {
            then_body,
            else_body,
            ..
        } => {
            changed |= sweep(shader, then_body, uses);
            changed |= sweep(shader, else_body, uses);
            if then_body.is_empty() && else_body.is_empty() {
                changed = true;
                false
            } else {
                true
            }
        }
        Node::Loop { body } => {
            changed |= sweep(shader, body, uses);
            true
        }
        _ => true,
    });
    changed
}

pub(super) fn run(shader: &mut HirShader) -> bool {
    let mut any = false;
    loop {
        let uses = super::count_uses(shader);
        let mut preamble = core::mem::take(&mut shader.preamble);
        let mut body = core::mem::take(&mut shader.body);
        let mut changed = sweep(shader, &mut preamble, &uses);
        changed |= sweep(shader, &mut body, &uses);
        shader.preamble = preamble;
        shader.body = body;
        if !changed {
            break;
        }
        any = true;
    }
    any
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{AluOp, HirBuilder, HirType};
    use ember_asm::Stage;

    #[test]
    fn dead_chains_vanish_in_one_call() {
        let mut b = HirBuilder::new(Stage::Compute);
        let x = b.const_u32(1);
        let y = b.alu2(AluOp::IAdd, HirType::U32, x, x);
        let _dead = b.alu2(AluOp::IAdd, HirType::U32, y, y);
        let mut shader = b.finish();
        assert!(run(&mut shader));
        assert!(shader.body.is_empty());
    }

    #[test]
    fn stores_survive() {
        let mut b = HirBuilder::new(Stage::Compute);
        let x = b.const_u32(1);
        let off = b.const_u32(0);
        b.store_ssbo(0, x, off);
        let mut shader = b.finish();
        run(&mut shader);
        assert_eq!(shader.body.len(), 3);
    }
}
