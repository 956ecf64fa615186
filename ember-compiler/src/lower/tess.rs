//! Tessellation-control I/O lowering.
//!
//! Per-vertex outputs move to driver-addressed global memory at
//! `param_base + (patch * out_vertices + vertex) * patch_words +
//! attr_offset`. The body runs under `if (invocation < out_vertices)`.
//! Tess-factor writes are deferred into a block-ending epilogue guarded
//! by `if (invocation == 0)`: the factor region starts one word into the
//! patch record, triangles store one vec4 (three outer levels plus the
//! inner), quads a vec4 of outer levels then a vec2 of inner, isolines a
//! vec2 of outer only.

use crate::error::Result;
use crate::hir::{
    AluOp,
    HirId,
    HirOp,
    HirShader,
    HirType,
    Node,
    ScalarBase,
    Semantic,
    Sysval,
    TessInfo,
};
use smallvec::smallvec;

#[derive(Default)]
struct FactorWrites {
    outer: Option<HirId>,
    inner: Option<HirId>,
}

fn attr_words(shader: &HirShader) -> u32 {
    // Each user output occupies one vec4 in the patch record.
    shader
        .outputs
        .iter()
        .filter(|o| !matches!(o.semantic, Semantic::TessLevelOuter | Semantic::TessLevelInner))
        .count() as u32
        * 4
}

fn lower_io(
    shader: &mut HirShader,
    nodes: Vec<Node>,
    factors: &mut FactorWrites,
    patch_words: u32,
    out_vertices: u32,
) -> Vec<Node> {
    let u32t = HirType::U32;
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::Instr(id) => {
                let op = shader.instr(id).op.clone();
                match op {
                    HirOp::StoreOutput { output } => {
                        match shader.outputs[output as usize].semantic {
                            Semantic::TessLevelOuter => {
                                factors.outer = Some(shader.instr(id).srcs[0]);
                                // The store itself dies; the epilogue
                                // writes the factors.
                                continue;
                            }
                            Semantic::TessLevelInner => {
                                factors.inner = Some(shader.instr(id).srcs[0]);
                                continue;
                            }
                            _ => {}
                        }
                        // Own-invocation output: vertex = invocation id.
                        let value = shader.instr(id).srcs[0];
                        let vertex =
                            shader.alloc(HirOp::LoadSysval(Sysval::InvocationId), u32t, []);
                        out.push(Node::Instr(vertex));
                        let addr = per_vertex_addr(
                            shader,
                            &mut out,
                            vertex,
                            output,
                            patch_words,
                            out_vertices,
                        );
                        let instr = shader.instr_mut(id);
                        instr.op = HirOp::StoreGlobal;
                        instr.srcs = smallvec![value, addr];
                        out.push(Node::Instr(id));
                    }
                    HirOp::StorePerVertexOutput { output } => {
                        let value = shader.instr(id).srcs[0];
                        let vertex = shader.instr(id).srcs[1];
                        let addr = per_vertex_addr(
                            shader,
                            &mut out,
                            vertex,
                            output,
                            patch_words,
                            out_vertices,
                        );
                        let instr = shader.instr_mut(id);
                        instr.op = HirOp::StoreGlobal;
                        instr.srcs = smallvec![value, addr];
                        out.push(Node::Instr(id));
                    }
                    HirOp::LoadPerVertexOutput { output } => {
                        let vertex = shader.instr(id).srcs[0];
                        let addr = per_vertex_addr(
                            shader,
                            &mut out,
                            vertex,
                            output,
                            patch_words,
                            out_vertices,
                        );
                        let instr = shader.instr_mut(id);
                        instr.op = HirOp::LoadGlobal;
                        instr.srcs = smallvec![addr];
                        out.push(Node::Instr(id));
                    }
                    _ => out.push(Node::Instr(id)),
                }
            }
            Node::If {
                cond,
                then_body,
                else_body,
            } => {
                let then_body =
                    lower_io(shader, then_body, factors, patch_words, out_vertices);
                let else_body =
                    lower_io(shader, else_body, factors, patch_words, out_vertices);
                out.push(Node::If {
                    cond,
                    then_body,
                    else_body,
                });
            }
            Node::Loop { body } => {
                let body = lower_io(shader, body, factors, patch_words, out_vertices);
                out.push(Node::Loop { body });
            }
            other => out.push(other),
        }
    }
    out
}

fn per_vertex_addr(
    shader: &mut HirShader,
    out: &mut Vec<Node>,
    vertex: HirId,
    output: u8,
    patch_words: u32,
    out_vertices: u32,
) -> HirId {
    let u32t = HirType::U32;
    let mut emit = |shader: &mut HirShader, out: &mut Vec<Node>, op, srcs: &[HirId]| {
        let v = shader.alloc(op, u32t, srcs.iter().copied());
        out.push(Node::Instr(v));
        v
    };
    let attr_off = shader.outputs[output as usize].driver_location as u32 * 4;
    let base = emit(shader, out, HirOp::LoadSysval(Sysval::TessParamBase), &[]);
    let patch = emit(shader, out, HirOp::LoadSysval(Sysval::PatchId), &[]);
    let verts = shader.alloc_const_u32(out_vertices);
    out.push(Node::Instr(verts));
    let patch_base = emit(shader, out, HirOp::Alu(AluOp::IMul), &[patch, verts]);
    let slot = emit(shader, out, HirOp::Alu(AluOp::IAdd), &[patch_base, vertex]);
    let words = shader.alloc_const_u32(patch_words);
    out.push(Node::Instr(words));
    let scaled = emit(shader, out, HirOp::Alu(AluOp::IMul), &[slot, words]);
    let off = shader.alloc_const_u32(attr_off);
    out.push(Node::Instr(off));
    let rel = emit(shader, out, HirOp::Alu(AluOp::IAdd), &[scaled, off]);
    emit(shader, out, HirOp::Alu(AluOp::IAdd), &[base, rel])
}

fn factor_epilogue(
    shader: &mut HirShader,
    factors: &FactorWrites,
    tess: TessInfo,
) -> Vec<Node> {
    let u32t = HirType::U32;
    let f32t = HirType::F32;
    let mut body = Vec::new();
    let mut emit = |shader: &mut HirShader, body: &mut Vec<Node>, op, ty, srcs: &[HirId]| {
        let v = shader.alloc(op, ty, srcs.iter().copied());
        body.push(Node::Instr(v));
        v
    };

    let outer_n = tess.topology.outer_levels();
    let inner_n = tess.topology.inner_levels();
    let stride = outer_n + inner_n;

    let base = emit(shader, &mut body, HirOp::LoadSysval(Sysval::TessFactorBase), u32t, &[]);
    let patch = emit(shader, &mut body, HirOp::LoadSysval(Sysval::PatchId), u32t, &[]);
    let stride_c = shader.alloc_const_u32(stride);
    body.push(Node::Instr(stride_c));
    let scaled = emit(shader, &mut body, HirOp::Alu(AluOp::IMul), u32t, &[patch, stride_c]);
    let one = shader.alloc_const_u32(1);
    body.push(Node::Instr(one));
    let rel = emit(shader, &mut body, HirOp::Alu(AluOp::IAdd), u32t, &[scaled, one]);
    let addr = emit(shader, &mut body, HirOp::Alu(AluOp::IAdd), u32t, &[base, rel]);

    let mut level = |shader: &mut HirShader,
                     body: &mut Vec<Node>,
                     from: Option<HirId>,
                     comp: u8| match from {
        Some(v) if shader.ty(v).comps > comp => {
            let e = shader.alloc(HirOp::VecExtract { comp }, f32t, [v]);
            body.push(Node::Instr(e));
            e
        }
        Some(v) if shader.ty(v).comps == 1 && comp == 0 => v,
        _ => {
            let z = shader.alloc_const_f32(0.0);
            body.push(Node::Instr(z));
            z
        }
    };

    // First store: up to four words starting one word into the record.
    let mut first = Vec::new();
    for c in 0..outer_n.min(4) as u8 {
        first.push(level(shader, &mut body, factors.outer, c));
    }
    if first.len() < 4 && inner_n > 0 {
        first.push(level(shader, &mut body, factors.inner, 0));
    }
    let first_ty = HirType::vector(ScalarBase::Float, 32, first.len() as u8);
    let payload = emit(shader, &mut body, HirOp::VecCompose, first_ty, &first);
    let store = shader.alloc(HirOp::StoreGlobal, first_ty, [payload, addr]);
    body.push(Node::Instr(store));

    // Quads carry a second store for the two inner levels.
    if inner_n == 2 {
        let i0 = level(shader, &mut body, factors.inner, 0);
        let i1 = level(shader, &mut body, factors.inner, 1);
        let vec2 = HirType::vector(ScalarBase::Float, 32, 2);
        let inner = emit(shader, &mut body, HirOp::VecCompose, vec2, &[i0, i1]);
        let off = shader.alloc_const_u32(outer_n);
        body.push(Node::Instr(off));
        let addr2 = emit(shader, &mut body, HirOp::Alu(AluOp::IAdd), u32t, &[addr, off]);
        let store2 = shader.alloc(HirOp::StoreGlobal, vec2, [inner, addr2]);
        body.push(Node::Instr(store2));
    }
    body
}

pub(super) fn run(shader: &mut HirShader) -> Result<()> {
    if shader.stage != ember_asm::Stage::TessCtrl {
        return Ok(());
    }
    let Some(tess) = shader.tess else {
        return Ok(());
    };
    let out_vertices = tess.out_vertices as u32;
    let patch_words = attr_words(shader);

    let body = core::mem::take(&mut shader.body);
    let mut factors = FactorWrites::default();
    let body = lower_io(shader, body, &mut factors, patch_words, out_vertices);

    // Guard the body: only real output invocations run it.
    let u32t = HirType::U32;
    let mut new_body = Vec::new();
    let invoc = shader.alloc(HirOp::LoadSysval(Sysval::InvocationId), u32t, []);
    new_body.push(Node::Instr(invoc));
    let count = shader.alloc_const_u32(out_vertices);
    new_body.push(Node::Instr(count));
    let active = shader.alloc(
        HirOp::Alu(AluOp::ULt),
        crate::lower::bools::BOOL_REG,
        [invoc, count],
    );
    new_body.push(Node::Instr(active));
    new_body.push(Node::If {
        cond: active,
        then_body: body,
        else_body: Vec::new(),
    });

    // Epilogue: the first invocation writes the packed tess factors.
    if factors.outer.is_some() || factors.inner.is_some() {
        let zero = shader.alloc_const_u32(0);
        new_body.push(Node::Instr(zero));
        let is_first = shader.alloc(
            HirOp::Alu(AluOp::IEq),
            crate::lower::bools::BOOL_REG,
            [invoc, zero],
        );
        new_body.push(Node::Instr(is_first));
        let epilogue = factor_epilogue(shader, &factors, tess);
        new_body.push(Node::If {
            cond: is_first,
            then_body: epilogue,
            else_body: Vec::new(),
        });
    }

    shader.body = new_body;
    tracing::debug!(patch_words, out_vertices, "tess control I/O lowered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{HirBuilder, InterpMode, IoVar, TessTopology};
    use ember_asm::Stage;

    #[test]
    fn triangle_factors_store_one_vec4_in_the_epilogue() {
        let mut b = HirBuilder::new(Stage::TessCtrl);
        b.set_tess(TessInfo {
            topology: TessTopology::Triangles,
            out_vertices: 3,
        });
        let outer = b.declare_output(IoVar {
            semantic: Semantic::TessLevelOuter,
            driver_location: 0,
            comps: 3,
            interp: InterpMode::Flat,
        });
        let inner = b.declare_output(IoVar {
            semantic: Semantic::TessLevelInner,
            driver_location: 1,
            comps: 1,
            interp: InterpMode::Flat,
        });
        let vec3 = HirType::vector(ScalarBase::Float, 32, 3);
        let o = b.const_vec(vec3, &[0x3f80_0000; 3]);
        let i = b.const_f32(2.0);
        b.store_output(outer, o);
        b.store_output(inner, i);
        let mut shader = b.finish();
        run(&mut shader).unwrap();

        // Body wrapped in the invocation guard, epilogue guarded by == 0.
        assert_eq!(shader.body.len(), 7);
        let Node::If { then_body, .. } = &shader.body[6] else {
            panic!("missing epilogue if");
        };
        let stores: Vec<_> = then_body
            .iter()
            .filter_map(|n| match n {
                Node::Instr(id) if shader.instr(*id).op == HirOp::StoreGlobal => {
                    Some(*id)
                }
                _ => None,
            })
            .collect();
        assert_eq!(stores.len(), 1, "triangles store a single vec4");
        let payload = shader.instr(stores[0]).srcs[0];
        assert_eq!(shader.ty(payload).comps, 4);
    }
}
