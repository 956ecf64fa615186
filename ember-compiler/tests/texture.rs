//! Texture legalization and encoding, end to end.

mod common;

use common::*;
use ember_asm::{ConvKind, Extra, Opcode, Stage, TexOffset};
use ember_compiler::hir::{
    HirBuilder,
    HirType,
    InterpMode,
    IoVar,
    LodMode,
    ScalarBase,
    Semantic,
    TexDim,
    TexOp,
};
use ember_compiler::Gen7;

fn frag_with_sample(op: TexOp, coord_words: &[u32], coord_comps: u8) -> ember_compiler::hir::HirShader {
    let mut b = HirBuilder::new(Stage::Fragment);
    let color = b.declare_output(IoVar {
        semantic: Semantic::Color(0),
        driver_location: 0,
        comps: 4,
        interp: InterpMode::Smooth,
    });
    let coord_ty = HirType::vector(ScalarBase::Float, 32, coord_comps);
    let vec4 = HirType::vector(ScalarBase::Float, 32, 4);
    let coord = b.const_vec(coord_ty, coord_words);
    let texel = b.tex(op, vec4, &[coord]);
    b.store_output(color, texel);
    b.finish()
}

/// Scenario: a 2D-array sample clamps `layer + 0.5` against the driver's
/// layer count and samples with the array flag.
#[test]
fn array_sample_clamps_the_layer() {
    let op = TexOp {
        tex: 0,
        samp: 0,
        dim: TexDim::Dim2D,
        array: true,
        layer_is_int: false,
        proj: false,
        offset: None,
        lod: LodMode::Auto,
    };
    // (u, v, 1.7); the optimizer would fold the constant layer, which is
    // not what is under test.
    let shader = frag_with_sample(op, &[0, 0, 0x3fd9_999a], 3);
    let variant = compile_unoptimized::<Gen7>(&shader);
    let stream = decode(&variant);

    let sam = &stream[*find_all(&stream, Opcode::Sam).first().expect("sam emitted")];
    let Extra::Tex { array, .. } = sam.extra else {
        panic!("sam without tex payload");
    };
    assert!(array, "array-dim flag set");
    // The layer conversion and clamp survive to the stream.
    assert!(stream.iter().any(|i| {
        i.opcode == Opcode::Cov
            && matches!(i.extra, Extra::Conv { kind: ConvKind::F2U, .. })
    }));
    assert!(!find_all(&stream, Opcode::UMin).is_empty());
}

/// P6: a static offset packs into the three signed nibbles.
#[test]
fn static_offset_packs_into_nibbles() {
    let op = TexOp {
        tex: 1,
        samp: 1,
        dim: TexDim::Dim2D,
        array: false,
        layer_is_int: false,
        proj: false,
        offset: Some((1, -2, 3)),
        lod: LodMode::Auto,
    };
    let shader = frag_with_sample(op, &[0, 0], 2);
    let variant = compile::<Gen7>(&shader);
    let stream = decode(&variant);

    let sam = &stream[find_all(&stream, Opcode::Sam)[0]];
    let Extra::Tex { offset, .. } = sam.extra else {
        panic!("sam without tex payload");
    };
    let (ox, oy, oz) = (1i16, -2i16, 3i16);
    let expected =
        (ox as u16 & 0xf) | ((oy as u16 & 0xf) << 4) | ((oz as u16 & 0xf) << 8);
    assert_eq!(offset.to_bits(), expected);
    assert_eq!(offset, TexOffset::new(1, -2, 3).unwrap());
}

/// Projective coordinates divide through before sampling.
#[test]
fn projective_sample_divides_by_the_projector() {
    let op = TexOp {
        tex: 0,
        samp: 0,
        dim: TexDim::Dim2D,
        array: false,
        layer_is_int: false,
        proj: false,
        offset: None,
        lod: LodMode::Auto,
    };
    let mut proj_op = op;
    proj_op.proj = true;
    let shader = frag_with_sample(proj_op, &[0x3f80_0000, 0x3f80_0000, 0x4000_0000], 3);
    let variant = compile_unoptimized::<Gen7>(&shader);
    let stream = decode(&variant);
    assert_sequence(&stream, &[Opcode::Rcp, Opcode::FMul, Opcode::Sam]);
}
