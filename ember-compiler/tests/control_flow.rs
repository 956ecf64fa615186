//! Predicated control-flow emission, end to end.

mod common;

use common::*;
use ember_asm::{CmpCond, Extra, Opcode};
use ember_compiler::hir::{AluOp, HirType};
use ember_compiler::{Gen7, Generation};

/// The canonical if/else shape: deactivate, run, swap, run, pop.
#[test]
fn if_else_emits_the_predication_sequence() {
    let (mut b, x) = compute_shader();
    let zero = b.const_u32(0);
    let cond = b.alu2(AluOp::INe, HirType::BOOL, x, zero);
    let four = b.const_u32(4);
    let a = b.load_ssbo(0, zero, HirType::U32);
    let c = b.load_ssbo(0, four, HirType::U32);
    b.if_begin(cond);
    let one = b.const_u32(1);
    let t = b.alu2(AluOp::IAdd, HirType::U32, a, one);
    b.else_begin();
    let two = b.const_u32(2);
    let e = b.alu2(AluOp::IAdd, HirType::U32, c, two);
    b.if_end();
    let r = b.phi(HirType::U32, t, e);
    b.store_ssbo(0, r, zero);
    let shader = b.finish();

    // The optimizer would flatten arms this small into selects; the
    // predication path is what is under test.
    let stream = decode(&compile_unoptimized::<Gen7>(&shader));
    assert_sequence(
        &stream,
        &[
            Opcode::IfICmp,
            Opcode::IAdd,
            Opcode::ElseICmp,
            Opcode::IAdd,
            Opcode::PopExec,
        ],
    );
    let if_pos = find_all(&stream, Opcode::IfICmp)[0];
    assert_eq!(stream[if_pos].cond, Some(CmpCond::Ne));
    let else_pos = find_all(&stream, Opcode::ElseICmp)[0];
    assert_eq!(stream[else_pos].cond, Some(CmpCond::Eq));
    let pop = find_all(&stream, Opcode::PopExec)[0];
    assert_eq!(stream[pop].extra, Extra::Exec { levels: 1 });
}

/// Small pure arms flatten to selects under the optimizer instead.
#[test]
fn optimizer_flattens_small_pure_arms() {
    let (mut b, x) = compute_shader();
    let zero = b.const_u32(0);
    let cond = b.alu2(AluOp::INe, HirType::BOOL, x, zero);
    b.if_begin(cond);
    let one = b.const_u32(1);
    let t = b.alu2(AluOp::IAdd, HirType::U32, x, one);
    b.else_begin();
    let two = b.const_u32(2);
    let e = b.alu2(AluOp::IAdd, HirType::U32, x, two);
    b.if_end();
    let r = b.phi(HirType::U32, t, e);
    b.store_ssbo(0, r, zero);
    let shader = b.finish();

    let stream = decode(&compile::<Gen7>(&shader));
    assert!(
        find_all(&stream, Opcode::IfICmp).is_empty(),
        "selects expected instead of branches:\n{}",
        render(&stream)
    );
    assert!(!find_all(&stream, Opcode::SelB).is_empty());
}

/// Loops wrap the body in two mask levels and branch back while any lane
/// is live.
#[test]
fn loop_emits_double_level_wrapper() {
    let (mut b, x) = compute_shader();
    let var = b.declare_var(HirType::U32);
    let zero = b.const_u32(0);
    b.store_var(var, zero);
    b.loop_begin();
    let i = b.load_var(var);
    let done = b.alu2(AluOp::UGe, HirType::BOOL, i, x);
    b.if_begin(done);
    b.brk();
    b.if_end();
    let one = b.const_u32(1);
    let next = b.alu2(AluOp::IAdd, HirType::U32, i, one);
    b.store_var(var, next);
    b.loop_end();
    let i_after = b.load_var(var);
    b.store_ssbo(0, i_after, zero);
    let shader = b.finish();

    let variant = compile::<Gen7>(&shader);
    let stream = decode(&variant);
    assert_sequence(
        &stream,
        &[
            Opcode::PushExec,
            Opcode::WhileICmp,
            Opcode::JumpExecAny,
            Opcode::PopExec,
        ],
    );
    let push = &stream[find_all(&stream, Opcode::PushExec)[0]];
    assert_eq!(push.extra, Extra::Exec { levels: 2 });
    let jmp_pos = find_all(&stream, Opcode::JumpExecAny)[0];
    let Extra::Branch { offset } = stream[jmp_pos].extra else {
        panic!("jump without target");
    };
    assert!(offset < 0, "loop backedge jumps backward");

    // P2 shape: pushes and pops balance over the stream.
    let mut depth = 0i32;
    for instr in &stream {
        match (instr.opcode, instr.extra) {
            (Opcode::PushExec, Extra::Exec { levels }) => depth += levels as i32,
            (Opcode::PopExec, Extra::Exec { levels }) => depth -= levels as i32,
            (Opcode::IfICmp, _) => depth += 1,
            _ => {}
        }
    }
    assert_eq!(depth, 0, "exec depth balances:\n{}", render(&stream));
}

/// P2 on the structural level: the emitter's output passes the
/// predication validator for nested control flow.
#[test]
fn nested_control_flow_balances_the_mask_stack() {
    let (mut b, x) = compute_shader();
    let zero = b.const_u32(0);
    let c1 = b.alu2(AluOp::INe, HirType::BOOL, x, zero);
    b.if_begin(c1);
    let one = b.const_u32(1);
    let c2 = b.alu2(AluOp::UGe, HirType::BOOL, x, one);
    b.if_begin(c2);
    b.store_ssbo(0, x, zero);
    b.if_end();
    b.if_end();
    b.store_ssbo(1, x, zero);
    let shader = b.finish();
    let _ = Gen7::MAX_INSTRS;
    let variant = compile_unoptimized::<Gen7>(&shader);
    let stream = decode(&variant);
    assert_eq!(find_all(&stream, Opcode::IfICmp).len(), 2);
    assert_eq!(find_all(&stream, Opcode::PopExec).len(), 2);
}
