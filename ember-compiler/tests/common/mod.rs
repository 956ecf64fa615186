//! Shared helpers for the end-to-end suites.
#![allow(dead_code)]

use ember_asm::{decode_stream, MachInstr, Opcode, HEADER_LEN};
use ember_compiler::hir::{HirBuilder, HirShader, HirType, Sysval};
use ember_compiler::{compile_variant, CompiledVariant, CompilerContext, CompilerOptions, Generation};

/// Compiles with default options.
pub fn compile<G: Generation>(hir: &HirShader) -> CompiledVariant {
    let ctx = CompilerContext::new(CompilerOptions {
        shaderdb: true,
        ..CompilerOptions::default()
    });
    compile_variant::<G>(&ctx, hir).expect("compilation succeeds")
}

/// Compiles with the optimizer off.
pub fn compile_unoptimized<G: Generation>(hir: &HirShader) -> CompiledVariant {
    let ctx = CompilerContext::new(CompilerOptions {
        no_optimize: true,
        ..CompilerOptions::default()
    });
    compile_variant::<G>(&ctx, hir).expect("compilation succeeds")
}

/// Decodes the instruction stream behind the header.
pub fn decode(variant: &CompiledVariant) -> Vec<MachInstr> {
    decode_stream(&variant.binary[HEADER_LEN..]).expect("stream decodes")
}

/// Positions of each occurrence of `op`, in stream order.
pub fn find_all(stream: &[MachInstr], op: Opcode) -> Vec<usize> {
    stream
        .iter()
        .enumerate()
        .filter(|(_, i)| i.opcode == op)
        .map(|(p, _)| p)
        .collect()
}

/// Asserts `ops` appear in the stream in the given relative order.
pub fn assert_sequence(stream: &[MachInstr], ops: &[Opcode]) {
    let mut at = 0usize;
    for &op in ops {
        let found = stream[at..]
            .iter()
            .position(|i| i.opcode == op)
            .unwrap_or_else(|| {
                panic!(
                    "missing {op} (after index {at}) in:\n{}",
                    render(stream)
                )
            });
        at += found + 1;
    }
}

/// Renders the stream for assertion messages.
pub fn render(stream: &[MachInstr]) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    for (i, instr) in stream.iter().enumerate() {
        let _ = writeln!(out, "{i:03}: {instr}");
    }
    out
}

/// A compute-shader builder with a handy scalar invocation index.
pub fn compute_shader() -> (HirBuilder, ember_compiler::hir::HirId) {
    let mut b = HirBuilder::new(ember_asm::Stage::Compute);
    let idx3 = b.sysval(Sysval::LocalInvocationId, HirType::vector(
        ember_compiler::hir::ScalarBase::Uint,
        32,
        3,
    ));
    let idx = b.vec_extract(idx3, 0);
    (b, idx)
}
