//! Shader I/O: input registers, varying fetch, output layout.

mod common;

use common::*;
use ember_asm::{Opcode, Stage};
use ember_compiler::hir::{
    AluOp,
    HirBuilder,
    HirType,
    InterpMode,
    IoVar,
    ScalarBase,
    Semantic,
};
use ember_compiler::Gen7;

/// Vertex outputs report position first, user varyings second, point
/// size last; stream-out captures the user varyings.
#[test]
fn vertex_output_layout_orders_semantics() {
    let vec4 = HirType::vector(ScalarBase::Float, 32, 4);
    let mut b = HirBuilder::new(Stage::Vertex);
    let position_in = b.declare_input(IoVar {
        semantic: Semantic::User(0),
        driver_location: 0,
        comps: 4,
        interp: InterpMode::Smooth,
    });
    let pos_out = b.declare_output(IoVar {
        semantic: Semantic::Position,
        driver_location: 0,
        comps: 4,
        interp: InterpMode::Smooth,
    });
    let color_out = b.declare_output(IoVar {
        semantic: Semantic::User(0),
        driver_location: 1,
        comps: 4,
        interp: InterpMode::Smooth,
    });
    let psize_out = b.declare_output(IoVar {
        semantic: Semantic::PointSize,
        driver_location: 2,
        comps: 1,
        interp: InterpMode::Smooth,
    });
    let p = b.load_input(position_in, vec4);
    let one = b.const_f32(1.0);
    b.store_output(psize_out, one);
    b.store_output(pos_out, p);
    let two = b.const_f32(2.0);
    let x = b.vec_extract(p, 0);
    let scaled = b.alu2(AluOp::FMul, HirType::F32, x, two);
    let y = b.vec_extract(p, 1);
    let z = b.vec_extract(p, 2);
    let w = b.vec_extract(p, 3);
    let color = b.vec_compose(vec4, &[scaled, y, z, w]);
    b.store_output(color_out, color);
    let shader = b.finish();

    let variant = compile::<Gen7>(&shader);
    let outs = &variant.metadata.outputs;
    assert_eq!(outs.len(), 3);
    assert_eq!(outs[0].semantic, Semantic::Position);
    assert_eq!(outs[1].semantic, Semantic::User(0));
    assert_eq!(outs[2].semantic, Semantic::PointSize);

    let so = &variant.metadata.stream_out;
    assert_eq!(so.entries.len(), 1);
    assert_eq!(so.entries[0].comps, 4);
    assert_eq!(so.strides[0], 4);

    // The attribute arrived through input registers, not memory.
    assert_eq!(variant.metadata.inputs.len(), 1);
    let stream = decode(&variant);
    assert!(find_all(&stream, Opcode::LdG).is_empty());
}

/// Fragment varyings fetch through the barycentric pair.
#[test]
fn fragment_varyings_fetch_through_barycentrics() {
    let mut b = HirBuilder::new(Stage::Fragment);
    let varying = b.declare_input(IoVar {
        semantic: Semantic::User(0),
        driver_location: 0,
        comps: 2,
        interp: InterpMode::Smooth,
    });
    let color = b.declare_output(IoVar {
        semantic: Semantic::Color(0),
        driver_location: 0,
        comps: 1,
        interp: InterpMode::Smooth,
    });
    let vec2 = HirType::vector(ScalarBase::Float, 32, 2);
    let uv = b.load_input(varying, vec2);
    let u = b.vec_extract(uv, 0);
    let v = b.vec_extract(uv, 1);
    let sum = b.alu2(AluOp::FAdd, HirType::F32, u, v);
    b.store_output(color, sum);
    let shader = b.finish();

    let variant = compile::<Gen7>(&shader);
    let stream = decode(&variant);
    assert_eq!(
        find_all(&stream, Opcode::Bary).len(),
        2,
        "one fetch per component:\n{}",
        render(&stream)
    );
    assert!(variant.metadata.inputs[0].bary);
}

/// Flat varyings bypass the interpolator on generations that allow it.
#[test]
fn flat_varyings_bypass_interpolation() {
    let mut b = HirBuilder::new(Stage::Fragment);
    let varying = b.declare_input(IoVar {
        semantic: Semantic::User(0),
        driver_location: 0,
        comps: 1,
        interp: InterpMode::Flat,
    });
    let color = b.declare_output(IoVar {
        semantic: Semantic::Color(0),
        driver_location: 0,
        comps: 1,
        interp: InterpMode::Smooth,
    });
    let v = b.load_input(varying, HirType::F32);
    b.store_output(color, v);
    let shader = b.finish();

    let variant = compile::<Gen7>(&shader);
    let stream = decode(&variant);
    assert!(!find_all(&stream, Opcode::Flat).is_empty());
    assert!(find_all(&stream, Opcode::Bary).is_empty());
}
