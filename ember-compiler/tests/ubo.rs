//! UBO range promotion, end to end.

mod common;

use common::*;
use ember_asm::{MachSrc, Opcode};
use ember_compiler::hir::{AluOp, HirType, ScalarBase};
use ember_compiler::{Gen6, Generation};

/// Three neighboring vec4 loads promote to one upload and read the const
/// file; the UBO pointer never materializes at runtime.
#[test]
fn neighboring_loads_promote_to_one_const_upload() {
    let vec4 = HirType::vector(ScalarBase::Float, 32, 4);
    let (mut b, _x) = compute_shader();
    b.declare_ubo(256);
    let mut sums = Vec::new();
    for k in 1..4u32 {
        let off = b.const_u32(16 * k);
        let v = b.load_ubo(0, off, vec4);
        sums.push(b.vec_extract(v, 0));
    }
    let s0 = b.alu2(AluOp::FAdd, HirType::F32, sums[0], sums[1]);
    let s1 = b.alu2(AluOp::FAdd, HirType::F32, s0, sums[2]);
    let zero = b.const_u32(0);
    b.store_ssbo(0, s1, zero);
    let shader = b.finish();

    let variant = compile::<Gen6>(&shader);
    let uploads = &variant.metadata.consts.ubo_uploads;
    assert_eq!(uploads.len(), 1);
    assert_eq!((uploads[0].start, uploads[0].end), (0, 64));
    let base_word = uploads[0].const_vec4 * 4;

    let stream = decode(&variant);
    // No runtime UBO access survives.
    assert!(
        find_all(&stream, Opcode::LdC).is_empty(),
        "ubo pointer used at runtime:\n{}",
        render(&stream)
    );
    // The promoted components arrive as const-file reads at the expected
    // words: base + k*4 for the x component of each vec4.
    let const_words: Vec<u16> = stream
        .iter()
        .flat_map(|i| i.srcs.iter())
        .filter_map(|s| match s {
            MachSrc::Const { slot, .. } => Some(slot.word()),
            _ => None,
        })
        .collect();
    for k in 1..4u16 {
        assert!(
            const_words.contains(&(base_word + k * 4)),
            "missing const read at word {} in:\n{}",
            base_word + k * 4,
            render(&stream)
        );
    }
}

/// Runtime-offset loads keep the dynamic const-cache path.
#[test]
fn runtime_offset_loads_stay_dynamic() {
    let vec4 = HirType::vector(ScalarBase::Float, 32, 4);
    let (mut b, x) = compute_shader();
    b.declare_ubo(256);
    let four = b.const_u32(16);
    let off = b.alu2(AluOp::IMul, HirType::U32, x, four);
    let v = b.load_ubo(0, off, vec4);
    let first = b.vec_extract(v, 0);
    let zero = b.const_u32(0);
    b.store_ssbo(0, first, zero);
    let shader = b.finish();

    let variant = compile::<Gen6>(&shader);
    let stream = decode(&variant);
    assert!(!find_all(&stream, Opcode::LdC).is_empty());
    let _ = Gen6::MAX_CONST;
}
