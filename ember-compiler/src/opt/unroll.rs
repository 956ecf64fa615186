//! Bounded loop unrolling.
//!
//! A loop whose exit test is driven by variables with statically known
//! evolution gets interpreted up front; if it provably finishes within
//! the iteration bound, its body is cloned once per iteration and the
//! loop node disappears. Loops the interpreter cannot see through stay
//! loops.

use super::fold;
use crate::hir::{AluOp, HirId, HirInstr, HirOp, HirShader, Node, VarId};
use std::collections::HashMap;

/// Iteration bound beyond which unrolling stops paying for itself.
const MAX_ITERS: u32 = 32;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Abstract {
    Known(u32),
    Opaque,
}

struct Interp<'s> {
    shader: &'s HirShader,
    vars: HashMap<VarId, Abstract>,
    values: HashMap<HirId, Abstract>,
}

enum StepOutcome {
    Ran,
    Broke,
    GaveUp,
}

impl Interp<'_> {
    fn value(&self, id: HirId) -> Abstract {
        if let Some(&v) = self.values.get(&id) {
            return v;
        }
        match self.shader.as_const_u32(id) {
            Some(w) => Abstract::Known(w),
            None => Abstract::Opaque,
        }
    }

    fn eval_instr(&mut self, id: HirId) -> StepOutcome {
        let instr = self.shader.instr(id);
        let out = match &instr.op {
            HirOp::Const { words } if words.len() == 1 => Abstract::Known(words[0]),
            HirOp::Copy => self.value(instr.srcs[0]),
            HirOp::LoadVar(v) => {
                self.vars.get(v).copied().unwrap_or(Abstract::Opaque)
            }
            HirOp::StoreVar(v) => {
                let value = self.value(instr.srcs[0]);
                self.vars.insert(*v, value);
                return StepOutcome::Ran;
            }
            HirOp::Alu(op) => {
                let vals: Vec<Abstract> =
                    instr.srcs.iter().map(|&s| self.value(s)).collect();
                let known: Option<Vec<u32>> = vals
                    .iter()
                    .map(|v| match v {
                        Abstract::Known(w) => Some(*w),
                        Abstract::Opaque => None,
                    })
                    .collect();
                match known.as_deref() {
                    Some([a]) => fold::eval_unary(*op, *a)
                        .map_or(Abstract::Opaque, Abstract::Known),
                    Some([a, b]) => fold::eval_cmp(*op, *a, *b)
                        .map(|v| Abstract::Known(v as u32))
                        .or_else(|| {
                            fold::eval_int2(*op, *a, *b).map(Abstract::Known)
                        })
                        .unwrap_or(Abstract::Opaque),
                    _ => Abstract::Opaque,
                }
            }
            // Anything with effects poisons the interpretation unless it
            // is a pure value producer we can treat as opaque.
            op if op.has_side_effects() => return StepOutcome::GaveUp,
            _ => Abstract::Opaque,
        };
        self.values.insert(id, out);
        StepOutcome::Ran
    }

    fn run_body(&mut self, nodes: &[Node]) -> StepOutcome {
        for node in nodes {
            match node {
                Node::Instr(id) => match self.eval_instr(*id) {
                    StepOutcome::Ran => {}
                    other => return other,
                },
                Node::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    // The break-shaped if is handled here too: taking a
                    // Break arm ends the iteration.
                    let taken = match self.value(*cond) {
                        Abstract::Known(c) => {
                            if c != 0 {
                                then_body
                            } else {
                                else_body
                            }
                        }
                        Abstract::Opaque => return StepOutcome::GaveUp,
                    };
                    match self.run_body(taken) {
                        StepOutcome::Ran => {}
                        other => return other,
                    }
                }
                Node::Break => return StepOutcome::Broke,
                Node::Continue => break,
                Node::Loop { .. } => return StepOutcome::GaveUp,
            }
        }
        StepOutcome::Ran
    }
}

/// Collects the variable environment established by the nodes before the
/// loop. Stores inside nested control flow go opaque.
fn init_env(shader: &HirShader, preceding: &[Node]) -> HashMap<VarId, Abstract> {
    fn poison(nodes: &[Node], shader: &HirShader, vars: &mut HashMap<VarId, Abstract>) {
        for node in nodes {
            match node {
                Node::Instr(id) => {
                    if let HirOp::StoreVar(v) = shader.instr(*id).op {
                        vars.insert(v, Abstract::Opaque);
                    }
                }
                Node::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    poison(then_body, shader, vars);
                    poison(else_body, shader, vars);
                }
                Node::Loop { body } => poison(body, shader, vars),
                _ => {}
            }
        }
    }
    let mut interp = Interp {
        shader,
        vars: HashMap::new(),
        values: HashMap::new(),
    };
    for node in preceding {
        match node {
            Node::Instr(id) => {
                let _ = interp.eval_instr(*id);
            }
            Node::If {
                then_body,
                else_body,
                ..
            } => {
                poison(then_body, shader, &mut interp.vars);
                poison(else_body, shader, &mut interp.vars);
            }
            Node::Loop { body } => poison(body, shader, &mut interp.vars),
            _ => {}
        }
    }
    interp.vars
}

/// Interprets the loop; `Some(n)` means it runs exactly `n` iterations.
fn trip_count(
    shader: &HirShader,
    body: &[Node],
    vars: HashMap<VarId, Abstract>,
) -> Option<u32> {
    let mut interp = Interp {
        shader,
        vars,
        values: HashMap::new(),
    };
    for n in 0..MAX_ITERS {
        interp.values.clear();
        match interp.run_body(body) {
            StepOutcome::Ran => {}
            StepOutcome::Broke => return Some(n + 1),
            StepOutcome::GaveUp => return None,
        }
    }
    None
}

fn clone_nodes(
    shader: &mut HirShader,
    nodes: &[Node],
    map: &mut HashMap<HirId, HirId>,
) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::Instr(id) => {
                let mut instr: HirInstr = shader.instr(*id).clone();
                for s in instr.srcs.iter_mut() {
                    if let Some(&mapped) = map.get(s) {
                        *s = mapped;
                    }
                }
                let new = shader.alloc_instr(instr);
                map.insert(*id, new);
                out.push(Node::Instr(new));
            }
            Node::If {
                cond,
                then_body,
                else_body,
            } => {
                let cond = map.get(cond).copied().unwrap_or(*cond);
                let then_body = clone_nodes(shader, then_body, map);
                let else_body = clone_nodes(shader, else_body, map);
                out.push(Node::If {
                    cond,
                    then_body,
                    else_body,
                });
            }
            Node::Loop { body } => {
                let body = clone_nodes(shader, body, map);
                out.push(Node::Loop { body });
            }
            Node::Break => out.push(Node::Break),
            Node::Continue => out.push(Node::Continue),
        }
    }
    out
}

/// Replays one unrolled iteration, dropping the break test that the
/// interpreter already resolved.
fn strip_break(shader: &HirShader, nodes: Vec<Node>, last: bool) -> Option<Vec<Node>> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::If {
                cond,
                then_body,
                else_body,
            } if body_is_break(&then_body) || body_is_break(&else_body) => {
                let breaks_on_true = body_is_break(&then_body);
                if last {
                    // The final iteration stops at the break test.
                    return Some(out);
                }
                // Keep the non-breaking arm's contents inline.
                let keep = if breaks_on_true { else_body } else { then_body };
                let _ = cond;
                out.extend(keep);
            }
            Node::Break | Node::Continue => return None,
            other => out.push(other),
        }
    }
    let _ = shader;
    Some(out)
}

fn body_is_break(nodes: &[Node]) -> bool {
    matches!(nodes, [Node::Break])
}

fn has_unrollable_shape(nodes: &[Node]) -> bool {
    // One top-level break test, no other jumps, no nested loops.
    let mut breaks = 0;
    for node in nodes {
        match node {
            Node::If {
                then_body,
                else_body,
                ..
            } => {
                if body_is_break(then_body) || body_is_break(else_body) {
                    breaks += 1;
                } else if then_body.iter().chain(else_body).any(|n| {
                    matches!(n, Node::Break | Node::Continue | Node::Loop { .. })
                }) {
                    return false;
                }
            }
            Node::Break | Node::Continue | Node::Loop { .. } => return false,
            _ => {}
        }
    }
    breaks == 1
}

fn unroll_in(shader: &mut HirShader, nodes: &mut Vec<Node>) -> bool {
    let mut changed = false;
    let mut i = 0;
    while i < nodes.len() {
        match &mut nodes[i] {
            Node::If {
                then_body,
                else_body,
                ..
            } => {
                changed |= unroll_in(shader, then_body);
                changed |= unroll_in(shader, else_body);
                i += 1;
            }
            Node::Loop { body } => {
                changed |= unroll_in(shader, body);
                let Node::Loop { body } = &nodes[i] else {
                    unreachable!("just matched")
                };
                if !has_unrollable_shape(body) {
                    i += 1;
                    continue;
                }
                let env = init_env(shader, &nodes[..i]);
                let Some(n) = trip_count(shader, body, env) else {
                    i += 1;
                    continue;
                };
                let Node::Loop { body } = nodes.remove(i) else {
                    unreachable!("just matched")
                };
                let mut unrolled = Vec::new();
                let mut ok = true;
                for iter in 0..n {
                    let mut map = HashMap::new();
                    let cloned = clone_nodes(shader, &body, &mut map);
                    match strip_break(shader, cloned, iter + 1 == n) {
                        Some(mut flat) => unrolled.append(&mut flat),
                        None => {
                            ok = false;
                            break;
                        }
                    }
                }
                if ok {
                    tracing::debug!(iterations = n, "loop unrolled");
                    nodes.splice(i..i, unrolled);
                    changed = true;
                } else {
                    nodes.insert(i, Node::Loop { body });
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    changed
}

pub(super) fn run(shader: &mut HirShader) -> bool {
    let mut body = core::mem::take(&mut shader.body);
    let changed = unroll_in(shader, &mut body);
    shader.body = body;
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{HirBuilder, HirType};
    use ember_asm::Stage;

    #[test]
    fn counted_loop_unrolls_fully() {
        let mut b = HirBuilder::new(Stage::Compute);
        let var = b.declare_var(HirType::U32);
        let acc = b.declare_var(HirType::U32);
        let zero = b.const_u32(0);
        b.store_var(var, zero);
        b.store_var(acc, zero);
        b.loop_begin();
        let i = b.load_var(var);
        let four = b.const_u32(4);
        let done = b.alu2(AluOp::UGe, crate::lower::bools::BOOL_REG, i, four);
        b.if_begin(done);
        b.brk();
        b.if_end();
        let a = b.load_var(acc);
        let sum = b.alu2(AluOp::IAdd, HirType::U32, a, i);
        b.store_var(acc, sum);
        let one = b.const_u32(1);
        let next = b.alu2(AluOp::IAdd, HirType::U32, i, one);
        b.store_var(var, next);
        b.loop_end();
        let mut shader = b.finish();
        assert!(run(&mut shader));
        assert!(!shader
            .body
            .iter()
            .any(|n| matches!(n, Node::Loop { .. })));
        // Four body copies plus the prologue stores.
        let adds = shader
            .body
            .iter()
            .filter(|n| match n {
                Node::Instr(id) => {
                    shader.instr(*id).op == HirOp::Alu(AluOp::IAdd)
                }
                _ => false,
            })
            .count();
        assert_eq!(adds, 8, "two adds per iteration");
    }

    #[test]
    fn opaque_bound_stays_a_loop() {
        let mut b = HirBuilder::new(Stage::Compute);
        let var = b.declare_var(HirType::U32);
        let zero = b.const_u32(0);
        b.store_var(var, zero);
        let bound = b.sysval(crate::hir::Sysval::VertexId, HirType::U32);
        b.loop_begin();
        let i = b.load_var(var);
        let done = b.alu2(AluOp::UGe, crate::lower::bools::BOOL_REG, i, bound);
        b.if_begin(done);
        b.brk();
        b.if_end();
        let one = b.const_u32(1);
        let next = b.alu2(AluOp::IAdd, HirType::U32, i, one);
        b.store_var(var, next);
        b.loop_end();
        let mut shader = b.finish();
        assert!(!run(&mut shader));
        assert!(shader.body.iter().any(|n| matches!(n, Node::Loop { .. })));
    }
}
