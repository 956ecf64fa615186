//! Constant folding.

use crate::hir::{AluOp, HirOp, HirShader, ScalarBase};
use smallvec::smallvec;

fn mask_for(bits: u8) -> u32 {
    match bits {
        8 => 0xff,
        16 => 0xffff,
        _ => u32::MAX,
    }
}

fn eval_float2(op: AluOp, a: f32, b: f32) -> Option<f32> {
    Some(match op {
        AluOp::FAdd => a + b,
        AluOp::FSub => a - b,
        AluOp::FMul => a * b,
        AluOp::FMin => a.min(b),
        AluOp::FMax => a.max(b),
        _ => return None,
    })
}

pub(super) fn eval_int2(op: AluOp, a: u32, b: u32) -> Option<u32> {
    Some(match op {
        AluOp::IAdd => a.wrapping_add(b),
        AluOp::ISub => a.wrapping_sub(b),
        AluOp::IMul => a.wrapping_mul(b),
        AluOp::UMulHigh => ((a as u64 * b as u64) >> 32) as u32,
        AluOp::IAnd => a & b,
        AluOp::IOr => a | b,
        AluOp::IXor => a ^ b,
        AluOp::IShl => a.wrapping_shl(b),
        AluOp::UShr => a.wrapping_shr(b),
        AluOp::IShr => ((a as i32).wrapping_shr(b)) as u32,
        AluOp::IMin => (a as i32).min(b as i32) as u32,
        AluOp::IMax => (a as i32).max(b as i32) as u32,
        AluOp::UMin => a.min(b),
        AluOp::UMax => a.max(b),
        _ => return None,
    })
}

pub(super) fn eval_cmp(op: AluOp, a: u32, b: u32) -> Option<bool> {
    let fa = f32::from_bits(a);
    let fb = f32::from_bits(b);
    Some(match op {
        AluOp::FEq => fa == fb,
        AluOp::FNe => fa != fb,
        AluOp::FLt => fa < fb,
        AluOp::FGe => fa >= fb,
        AluOp::IEq => a == b,
        AluOp::INe => a != b,
        AluOp::ILt => (a as i32) < (b as i32),
        AluOp::IGe => (a as i32) >= (b as i32),
        AluOp::ULt => a < b,
        AluOp::UGe => a >= b,
        _ => return None,
    })
}

pub(super) fn eval_unary(op: AluOp, a: u32) -> Option<u32> {
    let fa = f32::from_bits(a);
    Some(match op {
        AluOp::FNeg => (-fa).to_bits(),
        AluOp::FAbs => fa.abs().to_bits(),
        AluOp::FFloor => fa.floor().to_bits(),
        AluOp::FFract => (fa - fa.floor()).to_bits(),
        AluOp::INeg => (a as i32).wrapping_neg() as u32,
        AluOp::INot => !a,
        AluOp::F2U => fa as u32,
        AluOp::F2I => (fa as i32) as u32,
        AluOp::U2F => (a as f32).to_bits(),
        AluOp::I2F => (a as i32 as f32).to_bits(),
        AluOp::U2U | AluOp::I2I => a,
        _ => return None,
    })
}

pub(super) fn run(shader: &mut HirShader) -> bool {
    let mut changed = false;
    for id in 0..shader.instrs.len() {
        let instr = &shader.instrs[id];
        let new_op = match &instr.op {
            HirOp::Alu(AluOp::Select) => {
                let cond = shader.as_const_u32(instr.srcs[0]);
                match cond {
                    Some(c) => {
                        let chosen = if c != 0 { instr.srcs[1] } else { instr.srcs[2] };
                        Some((HirOp::Copy, smallvec![chosen]))
                    }
                    None => None,
                }
            }
            HirOp::Phi if instr.srcs.len() == 2 && instr.srcs[0] == instr.srcs[1] => {
                Some((HirOp::Copy, smallvec![instr.srcs[0]]))
            }
            HirOp::Alu(op) => {
                let op = *op;
                let consts: Option<Vec<u32>> = instr
                    .srcs
                    .iter()
                    .map(|&s| shader.as_const_u32(s))
                    .collect();
                let ty = instr.ty;
                consts.and_then(|c| {
                    let word = match c.as_slice() {
                        [a] => eval_unary(op, *a),
                        [a, b] => {
                            if let Some(v) = eval_cmp(op, *a, *b) {
                                Some(v as u32)
                            } else if ty.base == ScalarBase::Float {
                                eval_float2(op, f32::from_bits(*a), f32::from_bits(*b))
                                    .map(f32::to_bits)
                            } else {
                                eval_int2(op, *a, *b)
                            }
                        }
                        [a, b, c3] if op == AluOp::FMad => {
                            Some(
                                (f32::from_bits(*a)
                                    .mul_add(f32::from_bits(*b), f32::from_bits(*c3)))
                                .to_bits(),
                            )
                        }
                        _ => None,
                    }?;
                    let word = if ty.base != ScalarBase::Float {
                        word & mask_for(ty.bits)
                    } else {
                        word
                    };
                    Some((
                        HirOp::Const {
                            words: smallvec![word],
                        },
                        smallvec![],
                    ))
                })
            }
            _ => None,
        };
        if let Some((op, srcs)) = new_op {
            let instr = &mut shader.instrs[id];
            instr.op = op;
            instr.srcs = srcs;
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{HirBuilder, HirType};
    use ember_asm::Stage;

    #[test]
    fn integer_add_folds() {
        let mut b = HirBuilder::new(Stage::Compute);
        let x = b.const_u32(40);
        let y = b.const_u32(2);
        let s = b.alu2(AluOp::IAdd, HirType::U32, x, y);
        let mut shader = b.finish();
        assert!(run(&mut shader));
        assert_eq!(shader.as_const_u32(s), Some(42));
    }

    #[test]
    fn compare_folds_to_canonical_bool() {
        let mut b = HirBuilder::new(Stage::Compute);
        let x = b.const_u32(3);
        let y = b.const_u32(4);
        let c = b.alu2(AluOp::ULt, crate::lower::bools::BOOL_REG, x, y);
        let mut shader = b.finish();
        assert!(run(&mut shader));
        assert_eq!(shader.as_const_u32(c), Some(1));
    }
}
