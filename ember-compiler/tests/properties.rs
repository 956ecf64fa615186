//! Cross-cutting invariants over full compilations.

mod common;

use common::*;
use ember_asm::{encode_stream, Opcode, HEADER_LEN};
use ember_compiler::hir::{analyze_divergence, AluOp, HirOp, HirType, ScalarBase};
use ember_compiler::{lower, opt, Gen6, Gen7};

/// P3: unpacking a compiled stream and packing it again reproduces the
/// bytes exactly.
#[test]
fn binary_round_trips_through_the_disassembler() {
    let (mut b, x) = compute_shader();
    let three = b.const_u32(3);
    let q = b.alu2(AluOp::UDiv, HirType::U32, x, three);
    let f = b.alu1(AluOp::U2F, HirType::F32, q);
    let r = b.alu1(AluOp::FRsq, HirType::F32, f);
    let zero = b.const_u32(0);
    b.store_ssbo(0, r, zero);
    let shader = b.finish();

    let variant = compile::<Gen7>(&shader);
    let words = &variant.binary[HEADER_LEN..];
    let stream = decode(&variant);
    let repacked = encode_stream(&stream).expect("stream repacks");
    assert_eq!(repacked, words);
}

/// P4: a second optimizer run changes nothing.
#[test]
fn optimizer_is_idempotent() {
    let (mut b, x) = compute_shader();
    let one = b.const_u32(1);
    let two = b.const_u32(2);
    let a = b.alu2(AluOp::IAdd, HirType::U32, x, one);
    let c = b.alu2(AluOp::IMul, HirType::U32, a, two);
    let d = b.alu2(AluOp::IAdd, HirType::U32, c, one);
    let cond = b.alu2(AluOp::ULt, HirType::BOOL, d, two);
    b.if_begin(cond);
    let t = b.alu2(AluOp::IAdd, HirType::U32, d, one);
    b.else_begin();
    let e = b.alu2(AluOp::IAdd, HirType::U32, d, two);
    b.if_end();
    let j = b.phi(HirType::U32, t, e);
    let zero = b.const_u32(0);
    b.store_ssbo(0, j, zero);
    let mut shader = b.finish();

    lower::round_one::<Gen7>(&mut shader).unwrap();
    opt::run_fixed_point(&mut shader).unwrap();
    let snapshot = format!("{:?}{:?}", shader.body, shader.instrs);
    opt::run_fixed_point(&mut shader).unwrap();
    let again = format!("{:?}{:?}", shader.body, shader.instrs);
    assert_eq!(snapshot, again);
}

/// P5: an aligned byte offset of `4k` loads element `k` with no runtime
/// shift.
#[test]
fn aligned_ssbo_offset_becomes_a_plain_element_offset() {
    let (mut b, x) = compute_shader();
    let two = b.const_u32(2);
    let dynamic_bytes = b.alu2(AluOp::IShl, HirType::U32, x, two);
    let forty = b.const_u32(40);
    let bytes = b.alu2(AluOp::IAdd, HirType::U32, dynamic_bytes, forty);
    let v = b.load_ssbo(0, bytes, HirType::U32);
    let zero = b.const_u32(0);
    b.store_ssbo(1, v, zero);
    let shader = b.finish();

    // Gen6 keeps read-only loads on the plain buffer path.
    let variant = compile::<Gen6>(&shader);
    let stream = decode(&variant);
    // The dynamic shift fused away and the constant scaled to elements.
    assert!(
        find_all(&stream, Opcode::Shr).is_empty(),
        "no runtime shift:\n{}",
        render(&stream)
    );
    assert!(find_all(&stream, Opcode::Shl).is_empty());
    let ld = &stream[find_all(&stream, Opcode::LdIbo)[0]];
    let ember_asm::Extra::Mem { offset, .. } = ld.extra else {
        panic!("load without mem payload");
    };
    assert_eq!(offset, 10, "40 bytes is element 10:\n{}", render(&stream));
}

/// P8: after lowering, nothing is one-bit typed and every boolean
/// producer yields canonical 0/1.
#[test]
fn booleans_are_canonical_after_lowering() {
    let (mut b, x) = compute_shader();
    let zero = b.const_u32(0);
    let t = b.alu2(AluOp::ULt, HirType::BOOL, x, zero);
    let f = b.const_bool(true);
    let n = b.alu1(AluOp::BNot, HirType::BOOL, t);
    let both = b.alu2(AluOp::BAnd, HirType::BOOL, n, f);
    let as_f = b.alu1(AluOp::B2F, HirType::F32, both);
    b.store_ssbo(0, as_f, zero);
    let mut shader = b.finish();

    lower::round_one::<Gen7>(&mut shader).unwrap();
    analyze_divergence(&mut shader);
    for instr in &shader.instrs {
        assert_ne!(
            instr.ty.base,
            ScalarBase::Bool,
            "one-bit type survived lowering: {instr:?}"
        );
        // Constants feeding boolean consumers stay 0/1.
        if let HirOp::Const { words } = &instr.op {
            if instr.ty.bits == 16 {
                assert!(words.iter().all(|&w| w <= 1));
            }
        }
    }
}

/// A uniform SFU chain compiles through the once-per-wave preamble on
/// generations that support it.
#[test]
fn uniform_work_compiles_through_the_preamble() {
    let (mut b, xi) = compute_shader();
    let off = b.const_u32(0);
    let u = b.load_ubo(0, off, HirType::F32);
    let r = b.alu1(AluOp::FRcp, HirType::F32, u);
    let xf = b.alu1(AluOp::U2F, HirType::F32, xi);
    let v = b.alu2(AluOp::FMul, HirType::F32, r, xf);
    let zero = b.const_u32(0);
    b.store_ssbo(0, v, zero);
    let mut builder_shader = b.finish();
    builder_shader.ubo_sizes.push(64);

    let variant = compile::<Gen7>(&builder_shader);
    let stream = decode(&variant);
    assert_sequence(
        &stream,
        &[Opcode::GetOne, Opcode::ShPs, Opcode::Rcp, Opcode::StC, Opcode::ShPe],
    );
    // The main body reads the parked result instead of recomputing it.
    let shpe = find_all(&stream, Opcode::ShPe)[0];
    assert!(find_all(&stream, Opcode::Rcp).iter().all(|&p| p < shpe));
    assert_eq!(variant.metadata.consts.preamble.len, 1);
}

/// The promoted-immediate pool deduplicates repeated words.
#[test]
fn immediate_pool_deduplicates() {
    let (mut b, x) = compute_shader();
    // Two separate out-of-range immediates with the same bits reach the
    // pool once. Shifts keep the adds from folding together.
    let xf = b.alu1(AluOp::U2F, HirType::F32, x);
    let big1 = b.const_f32(1234.5);
    let a = b.alu2(AluOp::FMul, HirType::F32, xf, big1);
    let zero = b.const_u32(0);
    b.store_ssbo(0, a, zero);
    let shader = b.finish();

    let variant = compile::<Gen7>(&shader);
    let pool = &variant.metadata.consts.immediate_words;
    let copies = pool.iter().filter(|&&w| w == 1234.5f32.to_bits()).count();
    assert!(copies <= 1);
    let _ = find_all(&decode(&variant), Opcode::FMul);
}
