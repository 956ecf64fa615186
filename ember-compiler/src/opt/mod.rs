//! The SSA optimizer.
//!
//! A fixed-point loop of rewrites over the structured HIR: copy
//! propagation, constant folding, algebraic identities, branch-to-select,
//! common subexpression elimination, dead code elimination and bounded
//! loop unrolling. The loop stops when an iteration makes no change,
//! which is also what makes a second optimizer run a no-op. A late pass
//! applies negation folding and sinks constants toward their uses, and
//! the preamble pass lifts expensive uniform expressions out of the wave.

mod algebraic;
mod copyprop;
mod cse;
mod dce;
mod fold;
pub(crate) mod preamble;
mod select;
mod sink;
mod unroll;

use crate::error::Result;
use crate::hir::{HirId, HirShader, Node};

/// Counts uses of every value from placed instructions and `if`
/// conditions.
pub(crate) fn count_uses(shader: &HirShader) -> Vec<u32> {
    fn walk(shader: &HirShader, nodes: &[Node], counts: &mut [u32]) {
        for node in nodes {
            match node {
                Node::Instr(id) => {
                    for s in &shader.instr(*id).srcs {
                        counts[s.index()] += 1;
                    }
                }
                Node::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    counts[cond.index()] += 1;
                    walk(shader, then_body, counts);
                    walk(shader, else_body, counts);
                }
                Node::Loop { body } => walk(shader, body, counts),
                _ => {}
            }
        }
    }
    let mut counts = vec![0u32; shader.instrs.len()];
    walk(shader, &shader.preamble, &mut counts);
    walk(shader, &shader.body, &mut counts);
    counts
}

/// Rewrites every source (and `if` condition) through `resolve`.
pub(crate) fn rewrite_srcs(
    shader: &mut HirShader,
    resolve: &impl Fn(&HirShader, HirId) -> HirId,
) -> bool {
    fn walk(
        shader: &mut HirShader,
        nodes: &mut Vec<Node>,
        resolve: &impl Fn(&HirShader, HirId) -> HirId,
        changed: &mut bool,
    ) {
        for node in nodes {
            match node {
                Node::Instr(id) => {
                    let id = *id;
                    for slot in 0..shader.instr(id).srcs.len() {
                        let old = shader.instr(id).srcs[slot];
                        let new = resolve(shader, old);
                        if new != old {
                            shader.instr_mut(id).srcs[slot] = new;
                            *changed = true;
                        }
                    }
                }
                Node::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    let new = resolve(shader, *cond);
                    if new != *cond {
                        *cond = new;
                        *changed = true;
                    }
                    walk(shader, then_body, resolve, changed);
                    walk(shader, else_body, resolve, changed);
                }
                Node::Loop { body } => walk(shader, body, resolve, changed),
                _ => {}
            }
        }
    }
    let mut changed = false;
    let mut preamble = core::mem::take(&mut shader.preamble);
    let mut body = core::mem::take(&mut shader.body);
    walk(shader, &mut preamble, resolve, &mut changed);
    walk(shader, &mut body, resolve, &mut changed);
    shader.preamble = preamble;
    shader.body = body;
    changed
}

/// Runs the rewrite loop to a fixed point.
pub fn run_fixed_point(shader: &mut HirShader) -> Result<()> {
    let span = tracing::debug_span!("opt_fixed_point").entered();
    let mut rounds = 0usize;
    loop {
        let mut changed = false;
        changed |= copyprop::run(shader);
        changed |= fold::run(shader);
        changed |= algebraic::run(shader);
        changed |= select::run(shader);
        changed |= cse::run(shader);
        changed |= unroll::run(shader);
        changed |= dce::run(shader);
        rounds += 1;
        if !changed {
            break;
        }
    }
    tracing::debug!(rounds, "optimizer reached fixed point");
    drop(span);
    Ok(())
}

/// Late identities and the move-sink, after the second lowering round.
pub fn run_late(shader: &mut HirShader) -> Result<()> {
    let span = tracing::debug_span!("opt_late").entered();
    algebraic::run_late(shader);
    copyprop::run(shader);
    dce::run(shader);
    sink::run(shader);
    drop(span);
    Ok(())
}
