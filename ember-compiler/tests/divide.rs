//! Constant-division codegen, end to end.

mod common;

use common::*;
use ember_asm::{MachSrc, Opcode};
use ember_compiler::hir::{AluOp, HirType};
use ember_compiler::Gen7;

/// `x / 3` becomes the magic-number sequence with no divide.
#[test]
fn divide_by_three_uses_the_magic_multiplier() {
    let (mut b, x) = compute_shader();
    let three = b.const_u32(3);
    let q = b.alu2(AluOp::UDiv, HirType::U32, x, three);
    let zero = b.const_u32(0);
    b.store_ssbo(0, q, zero);
    let shader = b.finish();

    let stream = decode(&compile::<Gen7>(&shader));
    assert_sequence(&stream, &[Opcode::UMulHigh, Opcode::Shr, Opcode::StIbo]);

    // Both magic parameters arrive through mov-immediates.
    let imm_movs: Vec<u32> = stream
        .iter()
        .filter(|i| i.opcode == Opcode::Mov)
        .filter_map(|i| match i.srcs.first() {
            Some(MachSrc::Imm32(v)) => Some(*v),
            _ => None,
        })
        .collect();
    assert!(
        imm_movs.contains(&0xaaaa_aaab),
        "multiplier not materialized in:\n{}",
        render(&stream)
    );
    assert!(imm_movs.contains(&1), "post shift not materialized");
}

/// P7: division by a power of two is exactly one right shift.
#[test]
fn divide_by_power_of_two_is_one_shift() {
    let (mut b, x) = compute_shader();
    let q16 = b.const_u32(16);
    let q = b.alu2(AluOp::UDiv, HirType::U32, x, q16);
    let zero = b.const_u32(0);
    b.store_ssbo(0, q, zero);
    let shader = b.finish();

    let stream = decode(&compile::<Gen7>(&shader));
    let shrs = find_all(&stream, Opcode::Shr);
    assert_eq!(shrs.len(), 1, "exactly one shift in:\n{}", render(&stream));
    assert!(find_all(&stream, Opcode::UMulHigh).is_empty());
    // The shift amount is log2(16).
    assert!(stream.iter().any(|i| {
        i.opcode == Opcode::Mov
            && matches!(i.srcs.first(), Some(MachSrc::Imm32(4)))
    }));
}

/// Division by one disappears entirely.
#[test]
fn divide_by_one_is_identity() {
    let (mut b, x) = compute_shader();
    let one = b.const_u32(1);
    let q = b.alu2(AluOp::UDiv, HirType::U32, x, one);
    let zero = b.const_u32(0);
    b.store_ssbo(0, q, zero);
    let shader = b.finish();

    let stream = decode(&compile::<Gen7>(&shader));
    assert!(find_all(&stream, Opcode::UMulHigh).is_empty());
    assert!(find_all(&stream, Opcode::Shr).is_empty());
}

/// Division by a runtime value falls back to the reciprocal expansion.
#[test]
fn runtime_divisor_uses_reciprocal_refinement() {
    let (mut b, x) = compute_shader();
    let zero = b.const_u32(0);
    let four = b.const_u32(4);
    let d = b.load_ssbo(0, four, HirType::U32);
    let q = b.alu2(AluOp::UDiv, HirType::U32, x, d);
    b.store_ssbo(0, q, zero);
    let shader = b.finish();

    let stream = decode(&compile::<Gen7>(&shader));
    assert_sequence(&stream, &[Opcode::Rcp, Opcode::FMul, Opcode::Cov]);
    // The estimate is biased one ulp low before truncation so the
    // corrections below only ever need to add.
    assert!(
        stream.iter().any(|i| {
            i.opcode == Opcode::Mov
                && matches!(
                    i.srcs.first(),
                    Some(MachSrc::Imm32(bits)) if *bits == 0.999_999_94f32.to_bits()
                )
        }),
        "reciprocal bias not materialized:\n{}",
        render(&stream)
    );
    // Two correction rounds compare the remainder back against the
    // divisor.
    assert!(find_all(&stream, Opcode::UCmp).len() >= 2);
}
