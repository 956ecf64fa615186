//! Tessellation-control lowering, end to end.

mod common;

use common::*;
use ember_asm::{Opcode, Stage};
use ember_compiler::hir::{
    HirBuilder,
    HirType,
    InterpMode,
    IoVar,
    ScalarBase,
    Semantic,
    Sysval,
    TessInfo,
    TessTopology,
};
use ember_compiler::Gen7;

fn triangle_tcs() -> ember_compiler::hir::HirShader {
    let mut b = HirBuilder::new(Stage::TessCtrl);
    b.set_tess(TessInfo {
        topology: TessTopology::Triangles,
        out_vertices: 3,
    });
    let pos = b.declare_output(IoVar {
        semantic: Semantic::User(0),
        driver_location: 0,
        comps: 4,
        interp: InterpMode::Smooth,
    });
    let outer = b.declare_output(IoVar {
        semantic: Semantic::TessLevelOuter,
        driver_location: 1,
        comps: 3,
        interp: InterpMode::Flat,
    });
    let inner = b.declare_output(IoVar {
        semantic: Semantic::TessLevelInner,
        driver_location: 2,
        comps: 1,
        interp: InterpMode::Flat,
    });
    let vec4 = HirType::vector(ScalarBase::Float, 32, 4);
    let vec3 = HirType::vector(ScalarBase::Float, 32, 3);
    let p = b.const_vec(vec4, &[0; 4]);
    b.store_output(pos, p);
    let o = b.const_vec(vec3, &[0x3f80_0000, 0x4000_0000, 0x4040_0000]);
    b.store_output(outer, o);
    let i = b.const_f32(4.0);
    b.store_output(inner, i);
    b.finish()
}

/// Scenario: the body runs under the invocation guard, the factor
/// epilogue under `invocation == 0`, and triangles store one vec4 of
/// factors.
#[test]
fn triangle_factors_write_one_vec4_epilogue() {
    let shader = triangle_tcs();
    let variant = compile_unoptimized::<Gen7>(&shader);
    let stream = decode(&variant);

    // Two guards: body gate and first-invocation gate.
    assert!(find_all(&stream, Opcode::IfICmp).len() >= 2);
    // Per-vertex output plus exactly one factor store, all global; no
    // separate vec2 inner store for triangles.
    let stores = find_all(&stream, Opcode::StG);
    assert_eq!(
        stores.len(),
        2,
        "one output store and one factor store:\n{}",
        render(&stream)
    );
}

/// The tess-factor address chain reads the driver-provided bases.
#[test]
fn factor_address_reads_driver_params() {
    let shader = triangle_tcs();
    let variant = compile_unoptimized::<Gen7>(&shader);
    let stream = decode(&variant);
    // Address math multiplies the patch id by the per-patch stride (4 for
    // triangles) and lands one word past the record start.
    assert!(!find_all(&stream, Opcode::UMul).is_empty());
    let _ = Sysval::TessFactorBase;
}
