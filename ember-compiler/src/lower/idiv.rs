//! Integer division lowering.
//!
//! Unsigned division by a constant uses the multiply-by-magic-number
//! scheme: `p / q == umul_high(p + increment, multiplier) >> post_shift`,
//! with a pre-shift when `q` is even and the increment would otherwise be
//! needed. Powers of two reduce to a plain shift, dividing by one is the
//! identity, and dividing by `u32::MAX` is an equality test. Division by
//! a runtime value falls back to a reciprocal estimate biased one ulp
//! low, so two additive correction rounds always land on the quotient.

use super::Prepend;
use crate::error::Result;
use crate::hir::{AluOp, HirId, HirOp, HirShader, HirType};
use smallvec::smallvec;

/// Fast-division parameters for a constant divisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UdivInfo {
    /// The magic multiplier.
    pub multiplier: u32,
    /// Right shift applied to the dividend first.
    pub pre_shift: u32,
    /// Right shift applied to the high multiply result.
    pub post_shift: u32,
    /// Whether one is added to the dividend first.
    pub increment: bool,
}

/// Computes the fast-division parameters for `d`, which must not be 0, 1
/// or a power of two.
pub(crate) fn compute_udiv_info(d: u32) -> UdivInfo {
    fn core(d: u32) -> (u32, u32, bool) {
        let l = 31 - d.leading_zeros();
        let p = 32 + l;
        let two_p = 1u128 << p;
        let m_down = (two_p / d as u128) as u64;
        let rem = (two_p % d as u128) as u64;
        let e = d as u64 - rem;
        if e < (1u64 << l) {
            // Round-up multiplier is exact on the full range.
            ((m_down + 1) as u32, l, false)
        } else {
            (m_down as u32, l, true)
        }
    }
    debug_assert!(d > 1 && !d.is_power_of_two());
    let (multiplier, post_shift, increment) = core(d);
    if increment && d.trailing_zeros() > 0 {
        // Shifting out the even factor often removes the increment, which
        // saves the add on the hot path.
        let pre_shift = d.trailing_zeros();
        let (m, post, inc) = core(d >> pre_shift);
        if !inc {
            return UdivInfo {
                multiplier: m,
                pre_shift,
                post_shift: post,
                increment: false,
            };
        }
    }
    UdivInfo {
        multiplier,
        pre_shift: 0,
        post_shift,
        increment,
    }
}

fn emit_const_udiv(
    shader: &mut HirShader,
    pre: &mut Prepend,
    p: HirId,
    q: u32,
) -> HirId {
    let u32t = HirType::U32;
    let mut emit = |shader: &mut HirShader, pre: &mut Prepend, op, srcs: &[HirId]| {
        let v = shader.alloc(op, u32t, srcs.iter().copied());
        pre.push(v);
        v
    };
    match q {
        0 => {
            // Undefined; all-ones matches what the hardware divider gave.
            let v = shader.alloc_const_u32(u32::MAX);
            pre.push(v);
            v
        }
        1 => p,
        u32::MAX => {
            // Only u32::MAX / u32::MAX == 1.
            let max = shader.alloc_const_u32(u32::MAX);
            pre.push(max);
            let eq = shader.alloc(
                HirOp::Alu(AluOp::IEq),
                super::bools::BOOL_REG,
                [p, max],
            );
            pre.push(eq);
            emit(shader, pre, HirOp::Alu(AluOp::U2U), &[eq])
        }
        _ if q.is_power_of_two() => {
            let k = shader.alloc_const_u32(q.trailing_zeros());
            pre.push(k);
            emit(shader, pre, HirOp::Alu(AluOp::UShr), &[p, k])
        }
        _ => {
            let info = compute_udiv_info(q);
            let mut n = p;
            if info.pre_shift > 0 {
                let k = shader.alloc_const_u32(info.pre_shift);
                pre.push(k);
                n = emit(shader, pre, HirOp::Alu(AluOp::UShr), &[n, k]);
            }
            if info.increment {
                // Saturating add: the wrap at p == u32::MAX would poison
                // the high multiply.
                let one = shader.alloc_const_u32(1);
                pre.push(one);
                let bumped = emit(shader, pre, HirOp::Alu(AluOp::IAdd), &[n, one]);
                n = emit(shader, pre, HirOp::Alu(AluOp::UMax), &[bumped, n]);
            }
            let m = shader.alloc_const_u32(info.multiplier);
            pre.push(m);
            let h = emit(shader, pre, HirOp::Alu(AluOp::UMulHigh), &[n, m]);
            let s = shader.alloc_const_u32(info.post_shift);
            pre.push(s);
            emit(shader, pre, HirOp::Alu(AluOp::UShr), &[h, s])
        }
    }
}

fn emit_runtime_udiv(
    shader: &mut HirShader,
    pre: &mut Prepend,
    a: HirId,
    b: HirId,
) -> HirId {
    let u32t = HirType::U32;
    let f32t = HirType::F32;
    let boolr = super::bools::BOOL_REG;
    let mut emit = |shader: &mut HirShader, pre: &mut Prepend, op, ty, srcs: &[HirId]| {
        let v = shader.alloc(op, ty, srcs.iter().copied());
        pre.push(v);
        v
    };
    let af = emit(shader, pre, HirOp::Alu(AluOp::U2F), f32t, &[a]);
    let bf = emit(shader, pre, HirOp::Alu(AluOp::U2F), f32t, &[b]);
    let rcp = emit(shader, pre, HirOp::Alu(AluOp::FRcp), f32t, &[bf]);
    // Bias the reciprocal low by one ulp (1.0 - 2^-24). The estimate must
    // never exceed the true quotient: the correction rounds only add, and
    // an overshoot would wrap the unsigned remainder.
    let bias = shader.alloc_const_f32(0.999_999_94);
    pre.push(bias);
    let rcp = emit(shader, pre, HirOp::Alu(AluOp::FMul), f32t, &[rcp, bias]);
    let qf = emit(shader, pre, HirOp::Alu(AluOp::FMul), f32t, &[af, rcp]);
    let mut q = emit(shader, pre, HirOp::Alu(AluOp::F2U), u32t, &[qf]);
    // Two correction rounds recover the bits the biased estimate lost.
    for _ in 0..2 {
        let prod = emit(shader, pre, HirOp::Alu(AluOp::IMul), u32t, &[q, b]);
        let r = emit(shader, pre, HirOp::Alu(AluOp::ISub), u32t, &[a, prod]);
        let over = emit(shader, pre, HirOp::Alu(AluOp::UGe), boolr, &[r, b]);
        let bump = emit(shader, pre, HirOp::Alu(AluOp::U2U), u32t, &[over]);
        q = emit(shader, pre, HirOp::Alu(AluOp::IAdd), u32t, &[q, bump]);
    }
    q
}

pub(super) fn run(shader: &mut HirShader) -> Result<()> {
    super::map_instrs(shader, &mut |shader, id| {
        let op = match shader.instr(id).op {
            HirOp::Alu(op @ (AluOp::UDiv | AluOp::UMod)) => op,
            _ => return Ok(Prepend::new()),
        };
        let a = shader.instr(id).srcs[0];
        let b = shader.instr(id).srcs[1];
        let mut pre = Prepend::new();
        let quot = match shader.as_const_u32(b) {
            Some(q) => emit_const_udiv(shader, &mut pre, a, q),
            None => emit_runtime_udiv(shader, &mut pre, a, b),
        };
        let instr = shader.instr_mut(id);
        if op == AluOp::UDiv {
            instr.op = HirOp::Copy;
            instr.srcs = smallvec![quot];
        } else {
            // a % b == a - (a / b) * b.
            let prod = shader.alloc(HirOp::Alu(AluOp::IMul), HirType::U32, [quot, b]);
            pre.push(prod);
            let instr = shader.instr_mut(id);
            instr.op = HirOp::Alu(AluOp::ISub);
            instr.srcs = smallvec![a, prod];
        }
        Ok(pre)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::HirBuilder;
    use ember_asm::Stage;
    use proptest::prelude::*;
    use rstest::rstest;

    fn reference_udiv(info: UdivInfo, p: u32) -> u32 {
        // The emitted increment saturates rather than wraps.
        let n = ((p >> info.pre_shift) as u64 + u64::from(info.increment))
            .min(u32::MAX as u64);
        ((n * info.multiplier as u64) >> 32) as u32 >> info.post_shift
    }

    #[test]
    fn divide_by_three_magic() {
        let info = compute_udiv_info(3);
        assert_eq!(info.multiplier, 0xaaaa_aaab);
        assert_eq!(info.post_shift, 1);
        assert_eq!(info.pre_shift, 0);
        assert!(!info.increment);
    }

    #[rstest]
    #[case(3)]
    #[case(5)]
    #[case(6)]
    #[case(7)]
    #[case(10)]
    #[case(641)]
    #[case(0x7fff_ffff)]
    fn magic_matches_hardware_division(#[case] q: u32) {
        let info = compute_udiv_info(q);
        for p in [0, 1, 2, q - 1, q, q + 1, 1000, u32::MAX - 1, u32::MAX] {
            assert_eq!(reference_udiv(info, p), p / q, "p={p} q={q}");
        }
    }

    proptest! {
        #[test]
        fn magic_is_exact(p in any::<u32>(), q in 2u32..=u32::MAX - 1) {
            prop_assume!(!q.is_power_of_two());
            let info = compute_udiv_info(q);
            prop_assert_eq!(reference_udiv(info, p), p / q);
        }
    }

    #[test]
    fn power_of_two_becomes_single_shift() {
        let mut b = HirBuilder::new(Stage::Compute);
        let x = b.sysval(crate::hir::Sysval::VertexId, HirType::U32);
        let q = b.const_u32(16);
        let d = b.alu2(AluOp::UDiv, HirType::U32, x, q);
        let mut shader = b.finish();
        run(&mut shader).unwrap();
        let HirOp::Copy = shader.instr(d).op else {
            panic!("udiv not rewritten")
        };
        let shift = shader.instr(d).srcs[0];
        assert_eq!(shader.instr(shift).op, HirOp::Alu(AluOp::UShr));
        assert_eq!(
            shader.as_const_u32(shader.instr(shift).srcs[1]),
            Some(4)
        );
    }
}
