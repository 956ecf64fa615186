//! Latency handling and sync flags, end to end.

mod common;

use common::*;
use ember_asm::{Category, InstrFlags, MachSrc, Opcode, PhysReg};
use ember_compiler::hir::{AluOp, HirType, ScalarBase};
use ember_compiler::{Gen7, Generation};
use std::collections::HashMap;

/// Scenario: `z = log2(x) + 1.0` does not issue the add right behind the
/// SFU op, and the add carries `(ss)`.
#[test]
fn sfu_consumer_is_spaced_and_synced() {
    let (mut b, xi) = compute_shader();
    let x = b.alu1(AluOp::U2F, HirType::F32, xi);
    let y = b.alu1(AluOp::FLog2, HirType::F32, x);
    let one = b.const_f32(1.0);
    let z = b.alu2(AluOp::FAdd, HirType::F32, y, one);
    let zero = b.const_u32(0);
    b.store_ssbo(0, z, zero);
    let shader = b.finish();

    let stream = decode(&compile::<Gen7>(&shader));
    let log_pos = find_all(&stream, Opcode::Log2)[0];
    let add_pos = find_all(&stream, Opcode::FAdd)
        .into_iter()
        .find(|&p| p > log_pos)
        .expect("dependent add present");
    assert!(
        add_pos - log_pos > 4,
        "at least four cycles separate the pair:\n{}",
        render(&stream)
    );
    assert!(
        stream[add_pos].flags.contains(InstrFlags::SS),
        "the consumer stalls on the scalar queue:\n{}",
        render(&stream)
    );
}

/// P1 over a whole stream: `(ss)` is set exactly when a producer within
/// the SFU latency window is an SFU op.
#[test]
fn ss_flags_match_the_distance_model() {
    let (mut b, xi) = compute_shader();
    let x = b.alu1(AluOp::U2F, HirType::F32, xi);
    let r = b.alu1(AluOp::FRcp, HirType::F32, x);
    let s = b.alu1(AluOp::FSqrt, HirType::F32, x);
    let m = b.alu2(AluOp::FMul, HirType::F32, r, s);
    let zero = b.const_u32(0);
    b.store_ssbo(0, m, zero);
    let shader = b.finish();

    let stream = decode(&compile::<Gen7>(&shader));
    let mut last_writer: HashMap<PhysReg, (usize, Category)> = HashMap::new();
    for (pos, instr) in stream.iter().enumerate() {
        if instr.opcode.category() == Some(Category::Cat0) {
            continue;
        }
        let mut expect_ss = false;
        for src in &instr.srcs {
            if let MachSrc::Reg { reg, .. } = src {
                if let Some(&(wpos, cat)) = last_writer.get(reg) {
                    if cat == Category::Cat4
                        && pos - wpos < Gen7::SFU_LATENCY as usize
                    {
                        expect_ss = true;
                    }
                }
            }
        }
        assert_eq!(
            instr.flags.contains(InstrFlags::SS),
            expect_ss,
            "instruction {pos} disagrees with the model:\n{}",
            render(&stream)
        );
        if let (Some(dst), Some(cat)) = (instr.dst, instr.opcode.category()) {
            for c in 0..extra_comps(instr) {
                last_writer.insert(dst.offset(c), (pos, cat));
            }
        }
    }
}

fn extra_comps(instr: &ember_asm::MachInstr) -> u16 {
    match instr.extra {
        ember_asm::Extra::Tex { comps, .. } => comps.max(1) as u16,
        _ => 1 + instr.repeat as u16,
    }
}

/// Memory consumers carry `(sy)` until a sync retires the queue.
#[test]
fn memory_consumer_carries_sy() {
    let (mut b, _xi) = compute_shader();
    let zero = b.const_u32(0);
    let v = b.load_ssbo(0, zero, HirType::U32);
    let one = b.const_u32(1);
    let w = b.alu2(AluOp::IAdd, HirType::U32, v, one);
    let four = b.const_u32(4);
    b.store_ssbo(0, w, four);
    let shader = b.finish();

    let stream = decode(&compile::<Gen7>(&shader));
    let ld = find_all(&stream, Opcode::LdIbo)[0];
    let add = find_all(&stream, Opcode::IAdd)
        .into_iter()
        .find(|&p| p > ld)
        .expect("consumer present");
    assert!(stream[add].flags.contains(InstrFlags::SY));
    let _ = ScalarBase::Uint;
}
