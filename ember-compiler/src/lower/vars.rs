//! Local-variable promotion to SSA.
//!
//! Variables mutated only in straight-line code and `if` arms become SSA
//! values with phis at the joins. Variables stored inside a loop keep
//! their load/store form; emission maps those onto register arrays, which
//! is how loop-carried state reaches the allocator.

use crate::error::Result;
use crate::hir::{HirId, HirOp, HirShader, Node, VarId};
use std::collections::{HashMap, HashSet};

fn collect_loop_vars(nodes: &[Node], shader: &HirShader, in_loop: bool, pinned: &mut HashSet<VarId>) {
    for node in nodes {
        match node {
            Node::Instr(id) => {
                if in_loop {
                    if let HirOp::StoreVar(v) = shader.instr(*id).op {
                        pinned.insert(v);
                    }
                }
            }
            Node::If {
                then_body,
                else_body,
                ..
            } => {
                collect_loop_vars(then_body, shader, in_loop, pinned);
                collect_loop_vars(else_body, shader, in_loop, pinned);
            }
            Node::Loop { body } => collect_loop_vars(body, shader, true, pinned),
            _ => {}
        }
    }
}

type Env = HashMap<VarId, HirId>;

fn promote(
    shader: &mut HirShader,
    nodes: Vec<Node>,
    env: &mut Env,
    pinned: &HashSet<VarId>,
) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::Instr(id) => {
                match shader.instr(id).op.clone() {
                    HirOp::LoadVar(v) if !pinned.contains(&v) => {
                        let instr = shader.instr_mut(id);
                        match env.get(&v) {
                            Some(&value) => {
                                instr.op = HirOp::Copy;
                                instr.srcs.clear();
                                instr.srcs.push(value);
                            }
                            // Read before any write.
                            None => instr.op = HirOp::Undef,
                        }
                        out.push(Node::Instr(id));
                    }
                    HirOp::StoreVar(v) if !pinned.contains(&v) => {
                        let value = shader.instr(id).srcs[0];
                        env.insert(v, value);
                        // The store node disappears; the value lives on in
                        // the environment.
                    }
                    _ => out.push(Node::Instr(id)),
                }
            }
            Node::If {
                cond,
                then_body,
                else_body,
            } => {
                let mut then_env = env.clone();
                let mut else_env = env.clone();
                let then_body = promote(shader, then_body, &mut then_env, pinned);
                let else_body = promote(shader, else_body, &mut else_env, pinned);
                out.push(Node::If {
                    cond,
                    then_body,
                    else_body,
                });
                let vars: HashSet<VarId> = then_env
                    .keys()
                    .chain(else_env.keys())
                    .copied()
                    .collect();
                for v in vars {
                    let t = then_env.get(&v).copied();
                    let e = else_env.get(&v).copied();
                    match (t, e) {
                        (Some(tv), Some(ev)) if tv == ev => {
                            env.insert(v, tv);
                        }
                        (Some(tv), Some(ev)) => {
                            let ty = shader.vars[v.0 as usize];
                            let phi = shader.alloc(HirOp::Phi, ty, [tv, ev]);
                            out.push(Node::Instr(phi));
                            env.insert(v, phi);
                        }
                        // Stored on one path only: join with the prior
                        // value, or undef when there was none.
                        (one, other) => {
                            let stored = one.or(other).expect("one arm stored");
                            let ty = shader.vars[v.0 as usize];
                            let prior = env.get(&v).copied().unwrap_or_else(|| {
                                shader.alloc(HirOp::Undef, ty, [])
                            });
                            if prior == stored {
                                continue;
                            }
                            let (tv, ev) = if t.is_some() {
                                (stored, prior)
                            } else {
                                (prior, stored)
                            };
                            // An undef prior needs placing before the if;
                            // appending after keeps ids stable because the
                            // phi reads it regardless of path.
                            if shader.instr(prior).op == HirOp::Undef
                                && !out.iter().any(|n| matches!(n, Node::Instr(i) if *i == prior))
                            {
                                let pos = out.len() - 1;
                                out.insert(pos, Node::Instr(prior));
                            }
                            let phi = shader.alloc(HirOp::Phi, ty, [tv, ev]);
                            out.push(Node::Instr(phi));
                            env.insert(v, phi);
                        }
                    }
                }
            }
            Node::Loop { body } => {
                // Pinned vars carry the loop state; promoted values from
                // outside remain visible inside.
                let mut loop_env = env.clone();
                let body = promote(shader, body, &mut loop_env, pinned);
                out.push(Node::Loop { body });
            }
            other => out.push(other),
        }
    }
    out
}

pub(super) fn run(shader: &mut HirShader) -> Result<()> {
    let mut pinned = HashSet::new();
    collect_loop_vars(&shader.body, shader, false, &mut pinned);
    let body = core::mem::take(&mut shader.body);
    let mut env = Env::new();
    shader.body = promote(shader, body, &mut env, &pinned);
    tracing::debug!(pinned = pinned.len(), "variable promotion done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{AluOp, HirBuilder, HirType};
    use ember_asm::Stage;

    #[test]
    fn if_stores_become_phis() {
        let mut b = HirBuilder::new(Stage::Compute);
        let var = b.declare_var(HirType::U32);
        let init = b.const_u32(0);
        b.store_var(var, init);
        let one = b.const_u32(1);
        let cond = b.alu2(AluOp::INe, HirType::BOOL, one, init);
        b.if_begin(cond);
        let two = b.const_u32(2);
        b.store_var(var, two);
        b.if_end();
        let read = b.load_var(var);
        let mut shader = b.finish();
        run(&mut shader).unwrap();

        // No stores survive, the read is a copy of a phi.
        assert!(!shader
            .instrs
            .iter()
            .enumerate()
            .any(|(i, ins)| matches!(ins.op, HirOp::StoreVar(_))
                && shader.body.iter().any(|n| matches!(n, Node::Instr(id) if id.index() == i))));
        let HirOp::Copy = shader.instr(read).op else {
            panic!("load not rewritten to copy");
        };
        let phi = shader.instr(read).srcs[0];
        assert_eq!(shader.instr(phi).op, HirOp::Phi);
    }
}
