//! The compilation pipeline.
//!
//! A straight line of passes over one arena-scoped shader: two lowering
//! rounds bracketing SSA optimization, predicated emission, scheduling,
//! allocation, post-scheduling, cleanup, packing and metadata. Failures
//! return immediately; there is no retry and no partial output.

use crate::context::{debug_flags, CompilerContext, DebugFlags};
use crate::error::{CompileError, Result};
use crate::generation::Generation;
use crate::hir::HirShader;
use crate::metadata::{self, ShaderMetadata};
use crate::{binary, cp, emit, layout, legalize, lower, opt, postsched, ra, sched};
use ember_ir::{validate_predicated, validate_ssa, Shader};

/// A finished compilation.
pub struct CompiledVariant {
    /// Driver-assigned variant id.
    pub id: u32,
    /// Packed binary: header plus instruction words, little-endian.
    pub binary: Vec<u8>,
    /// Metadata record.
    pub metadata: ShaderMetadata,
}

fn check(
    ctx: &CompilerContext,
    pass: &'static str,
    lir: &Shader,
    predicated: bool,
) -> Result<()> {
    if debug_flags().contains(DebugFlags::DUMP_PASSES) {
        tracing::debug!(pass, ir = %lir, "pass output");
    }
    if ctx.options.no_validate && !debug_flags().contains(DebugFlags::STRICT) {
        return Ok(());
    }
    let result = if predicated {
        validate_predicated(lir)
    } else {
        validate_ssa(lir).and_then(|()| validate_predicated(lir))
    };
    result.map_err(|source| CompileError::InvariantViolation { pass, source })
}

/// Compiles one shader variant for generation `G`.
pub fn compile_variant<G: Generation>(
    ctx: &CompilerContext,
    hir: &HirShader,
) -> Result<CompiledVariant> {
    if hir.internal && !ctx.options.internal {
        return Err(CompileError::UnsupportedFeature(
            "internal shaders need the `internal` option".into(),
        ));
    }
    let id = ctx.next_shader_id();
    let span = tracing::debug_span!("compile_variant", id).entered();
    let mut hir = hir.clone();

    lower::round_one::<G>(&mut hir)?;
    if !ctx.options.no_optimize {
        opt::run_fixed_point(&mut hir)?;
    }
    lower::round_two::<G>(&mut hir)?;
    if !ctx.options.no_optimize {
        opt::run_fixed_point(&mut hir)?;
        opt::run_late(&mut hir)?;
        opt::preamble::run::<G>(&mut hir)?;
    }

    let mut out = emit::emit::<G>(&hir)?;
    check(ctx, "emit", &out.lir, false)?;

    // The immediate pool sits after every other leading region.
    let imm_base = layout::reserved_vec4(&hir)
        .max(
            out.lir
                .consts
                .ubo_uploads
                .iter()
                .map(|u| u.const_vec4 + (u.size() / 16) as u16)
                .max()
                .unwrap_or(0),
        )
        .max(
            hir.preamble_const
                .map(|r| r.end())
                .unwrap_or(0),
        );
    if imm_base as u32 + layout::IMMEDIATE_RESERVE_VEC4 as u32 > G::MAX_CONST {
        return Err(CompileError::ResourceExhausted("const file overflow"));
    }
    legalize::run(&mut out.lir, imm_base)?;
    check(ctx, "legalize", &out.lir, false)?;

    sched::run::<G>(&mut out.lir)?;
    check(ctx, "sched", &out.lir, false)?;

    let ra_stats = ra::run::<G>(&mut out.lir)?;
    check(ctx, "ra", &out.lir, true)?;

    postsched::run::<G>(&mut out.lir, !ctx.options.no_optimize)?;
    check(ctx, "postsched", &out.lir, true)?;
    cp::run(&mut out.lir)?;
    check(ctx, "cp", &out.lir, true)?;
    // Cleanup shortened some distances; re-derive nops and sync flags on
    // the final stream.
    postsched::run::<G>(&mut out.lir, false)?;
    check(ctx, "legalize_sync", &out.lir, true)?;

    let packed =
        binary::pack::<G>(&out.lir, ra_stats.half_slots, ra_stats.full_slots)?;

    let mut meta = metadata::build(
        &hir,
        &out.lir,
        &out,
        ra_stats,
        metadata::collect_stats(&out.lir),
    );
    if !ctx.options.shaderdb {
        meta.stats = None;
    }
    if ctx.options.verbose_disasm || debug_flags().contains(DebugFlags::DUMP_DISASM) {
        let mach = binary::to_mach(&out.lir)?;
        meta.disasm = Some(binary::disassemble(&mach));
    }

    tracing::debug!(
        instrs = packed.instr_count,
        bytes = packed.bytes.len(),
        "variant compiled"
    );
    drop(span);
    Ok(CompiledVariant {
        id,
        binary: packed.bytes,
        metadata: meta,
    })
}
