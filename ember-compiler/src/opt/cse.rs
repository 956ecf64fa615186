//! Common subexpression elimination.
//!
//! A scoped hash walk over the structured tree: an expression seen in an
//! enclosing scope dominates everything nested after it, so nested
//! duplicates rewrite to copies of the first occurrence.

use crate::hir::{HirId, HirInstr, HirOp, HirShader, Node};
use smallvec::smallvec;
use std::collections::HashMap;

fn is_cse_candidate(op: &HirOp) -> bool {
    matches!(
        op,
        HirOp::Const { .. }
            | HirOp::Alu(_)
            | HirOp::VecCompose
            | HirOp::VecExtract { .. }
            | HirOp::LoadConstFile { .. }
            | HirOp::LoadSysval(_)
    )
}

type Key = (HirOp, crate::hir::HirType, smallvec::SmallVec<[HirId; 4]>);

fn key_of(instr: &HirInstr) -> Key {
    (instr.op.clone(), instr.ty, instr.srcs.clone())
}

fn walk(
    shader: &mut HirShader,
    nodes: &[Node],
    seen: &mut Vec<HashMap<Key, HirId>>,
    changed: &mut bool,
) {
    for node in nodes {
        match node {
            Node::Instr(id) => {
                let instr = shader.instr(*id);
                if !is_cse_candidate(&instr.op) || instr.op == HirOp::Copy {
                    continue;
                }
                let key = key_of(instr);
                let prior = seen.iter().rev().find_map(|scope| scope.get(&key));
                match prior {
                    Some(&first) if first != *id => {
                        let instr = shader.instr_mut(*id);
                        instr.op = HirOp::Copy;
                        instr.srcs = smallvec![first];
                        *changed = true;
                    }
                    Some(_) => {}
                    None => {
                        seen.last_mut().expect("scope stack").insert(key, *id);
                    }
                }
            }
            Node::If {
                then_body,
                else_body,
                ..
            } => {
                seen.push(HashMap::new());
                walk(shader, then_body, seen, changed);
                seen.pop();
                seen.push(HashMap::new());
                walk(shader, else_body, seen, changed);
                seen.pop();
            }
            Node::Loop { body } => {
                seen.push(HashMap::new());
                walk(shader, body, seen, changed);
                seen.pop();
            }
            _ => {}
        }
    }
}

pub(super) fn run(shader: &mut HirShader) -> bool {
    let mut changed = false;
    let body = core::mem::take(&mut shader.body);
    let mut seen = vec![HashMap::new()];
    walk(shader, &body, &mut seen, &mut changed);
    shader.body = body;
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{AluOp, HirBuilder, HirType};
    use ember_asm::Stage;

    #[test]
    fn duplicate_adds_merge() {
        let mut b = HirBuilder::new(Stage::Compute);
        let x = b.sysval(crate::hir::Sysval::VertexId, HirType::U32);
        let one = b.const_u32(1);
        let s1 = b.alu2(AluOp::IAdd, HirType::U32, x, one);
        let s2 = b.alu2(AluOp::IAdd, HirType::U32, x, one);
        let mut shader = b.finish();
        assert!(run(&mut shader));
        assert_eq!(shader.instr(s2).op, HirOp::Copy);
        assert_eq!(shader.instr(s2).srcs[0], s1);
    }

    #[test]
    fn sibling_branches_do_not_merge() {
        let mut b = HirBuilder::new(Stage::Compute);
        let c = b.const_bool(true);
        let x = b.sysval(crate::hir::Sysval::VertexId, HirType::U32);
        let one = b.const_u32(1);
        b.if_begin(c);
        let t = b.alu2(AluOp::IAdd, HirType::U32, x, one);
        b.else_begin();
        let e = b.alu2(AluOp::IAdd, HirType::U32, x, one);
        b.if_end();
        let mut shader = b.finish();
        run(&mut shader);
        // Neither arm dominates the other.
        assert_ne!(shader.instr(t).op, HirOp::Copy);
        assert_ne!(shader.instr(e).op, HirOp::Copy);
    }
}
