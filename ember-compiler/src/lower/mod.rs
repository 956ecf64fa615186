//! HIR lowering and normalization.
//!
//! Two rounds of rewrites bring the driver-provided HIR down to a form
//! every later stage understands: scalar 16/32-bit ALU, explicit address
//! arithmetic for every memory space, intrinsics mapped one-to-one onto
//! instruction-set operations. The second round runs after SSA
//! optimization so address expressions have folded to constants first.

mod barycentric;
pub(crate) mod bools;
mod idiv;
mod io_offsets;
mod lower64;
mod scalarize;
mod tess;
mod tex;
mod trig;
pub(crate) mod ubo_ranges;
mod vars;

use crate::error::Result;
use crate::generation::Generation;
use crate::hir::{HirId, HirShader, Node};
use smallvec::SmallVec;

/// Instructions to splice in front of the instruction being rewritten.
pub(crate) type Prepend = SmallVec<[HirId; 8]>;

fn walk_body<F>(shader: &mut HirShader, nodes: &mut Vec<Node>, f: &mut F) -> Result<()>
where
    F: FnMut(&mut HirShader, HirId) -> Result<Prepend>,
{
    let mut out = Vec::with_capacity(nodes.len());
    for mut node in nodes.drain(..) {
        match &mut node {
            Node::Instr(id) => {
                let pre = f(shader, *id)?;
                out.extend(pre.into_iter().map(Node::Instr));
                out.push(node);
            }
            Node::If {
                then_body,
                else_body,
                ..
            } => {
                walk_body(shader, then_body, f)?;
                walk_body(shader, else_body, f)?;
                out.push(node);
            }
            Node::Loop { body } => {
                walk_body(shader, body, f)?;
                out.push(node);
            }
            Node::Break | Node::Continue => out.push(node),
        }
    }
    *nodes = out;
    Ok(())
}

/// Applies `f` to every placed instruction, in structured order.
///
/// The callback rewrites the instruction in place and returns helper
/// instructions to splice immediately before it; ids stay stable so other
/// use sites never need patching.
pub(crate) fn map_instrs<F>(shader: &mut HirShader, f: &mut F) -> Result<()>
where
    F: FnMut(&mut HirShader, HirId) -> Result<Prepend>,
{
    let mut preamble = core::mem::take(&mut shader.preamble);
    let mut body = core::mem::take(&mut shader.body);
    let result = walk_body(shader, &mut preamble, f)
        .and_then(|()| walk_body(shader, &mut body, f));
    shader.preamble = preamble;
    shader.body = body;
    result
}

/// First lowering round: structural normalization.
pub fn round_one<G: Generation>(shader: &mut HirShader) -> Result<()> {
    let span = tracing::debug_span!("lower_round_one").entered();
    vars::run(shader)?;
    scalarize::run(shader)?;
    lower64::run::<G>(shader)?;
    bools::run(shader)?;
    trig::run(shader)?;
    tex::run(shader)?;
    barycentric::run(shader)?;
    tess::run(shader)?;
    drop(span);
    Ok(())
}

/// Second lowering round: address arithmetic, after constants folded.
pub fn round_two<G: Generation>(shader: &mut HirShader) -> Result<()> {
    let span = tracing::debug_span!("lower_round_two").entered();
    idiv::run(shader)?;
    io_offsets::run::<G>(shader)?;
    ubo_ranges::run::<G>(shader)?;
    drop(span);
    Ok(())
}
