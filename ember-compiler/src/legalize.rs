//! Operand legalization ahead of scheduling.
//!
//! The encoding allows an inline immediate only where the category has a
//! field for it: a 32-bit immediate on `mov`, a 10-bit sign-extended
//! integer on one cat2 source, nothing anywhere else; the const file is
//! readable from one cat2 source and from cat3 src0 only. Everything
//! else materializes through a `mov` here, while values are still SSA
//! and registers are cheap.

use crate::error::Result;
use ember_asm::{Category, ConstSlot, Opcode};
use ember_ir::{Dst, ImmType, Instr, Shader, Src, SrcKind};

fn imm_fits_cat2(src: &Src) -> bool {
    match src.kind {
        SrcKind::Imm(imm) => {
            imm.ty == ImmType::U32 && {
                let v = imm.bits as i32;
                (-512..=511).contains(&v)
            }
        }
        _ => true,
    }
}

fn is_reg(src: &Src) -> bool {
    matches!(src.kind, SrcKind::Ssa(_) | SrcKind::Phys(_) | SrcKind::Array { .. })
}

fn is_const(src: &Src) -> bool {
    matches!(src.kind, SrcKind::Const(_))
}

fn is_imm(src: &Src) -> bool {
    matches!(src.kind, SrcKind::Imm(_))
}

/// Whether source `slot` of `op` may be a non-register operand at all.
fn slot_allows(op: Opcode, cat: Category, slot: usize, src: &Src) -> bool {
    match cat {
        Category::Cat1 => true,
        Category::Cat2 => {
            if is_imm(src) {
                imm_fits_cat2(src)
            } else {
                true
            }
        }
        Category::Cat3 => !is_imm(src) && (slot == 0 || !is_const(src)),
        Category::Cat4 => !is_imm(src),
        Category::Cat0 => {
            // Branch tests read a register; `while.icmp` has implicit
            // operands and never carries sources here.
            let _ = op;
            is_reg(src)
        }
        Category::Cat5 | Category::Cat6 => is_reg(src),
        Category::Cat7 => false,
    }
}

/// Materializes illegal operands.
///
/// Wide immediates on categories with a const field intern into the
/// deduplicated immediate pool starting at `imm_base` vec4; everything
/// else goes through a `mov`.
pub fn run(shader: &mut Shader, imm_base: u16) -> Result<()> {
    let span = tracing::debug_span!("legalize").entered();
    let mut materialized = 0usize;
    let mut pooled = 0usize;
    for block in shader.block_order.clone() {
        for id in shader.block_instrs(block) {
            let Some(cat) = shader.instrs[id].opcode.category() else {
                continue;
            };
            let op = shader.instrs[id].opcode;
            // One non-register source per cat2 instruction; the encoding
            // has a single const/immediate field.
            let mut nonreg_budget = match cat {
                Category::Cat2 => 1,
                _ => usize::MAX,
            };
            for slot in 0..shader.instrs[id].srcs.len() {
                let src = shader.instrs[id].srcs[slot];
                let mut needs_mov = !slot_allows(op, cat, slot, &src);
                if !is_reg(&src) && !needs_mov && nonreg_budget != usize::MAX {
                    if nonreg_budget == 0 {
                        needs_mov = true;
                    } else {
                        nonreg_budget -= 1;
                    }
                }
                if !needs_mov {
                    continue;
                }
                // Wide immediates prefer a deduplicated const-file slot
                // where the category can read one.
                let const_ok = match cat {
                    Category::Cat2 => nonreg_budget > 0,
                    Category::Cat3 => slot == 0,
                    Category::Cat4 => true,
                    _ => false,
                };
                if let SrcKind::Imm(imm) = src.kind {
                    if const_ok && src.width == ember_asm::Width::W32 {
                        let idx = shader.consts.intern_imm(imm.bits);
                        let word = imm_base * 4 + idx;
                        shader.instrs[id].srcs[slot] = Src {
                            kind: SrcKind::Const(ConstSlot::new(word)),
                            width: src.width,
                            mods: src.mods,
                        };
                        if nonreg_budget != usize::MAX {
                            nonreg_budget -= 1;
                        }
                        pooled += 1;
                        continue;
                    }
                }
                let width = src.width;
                let value = shader.new_value(width);
                let mut mov = Instr::new(Opcode::Mov);
                mov.dsts.push(Dst::ssa(value, width));
                mov.srcs.push(Src { mods: ember_asm::SrcMods::empty(), ..src });
                shader.insert_before(id, mov);
                let moved = Src {
                    kind: SrcKind::Ssa(value),
                    width,
                    mods: src.mods,
                };
                shader.instrs[id].srcs[slot] = moved;
                materialized += 1;
            }
        }
    }
    if !shader.consts.imm_pool.is_empty() {
        shader.consts.immediates = ember_ir::ConstRegion {
            offset: imm_base,
            len: (shader.consts.imm_pool.len() as u16).div_ceil(4),
        };
    }
    // Source rewrites above bypass the incremental bookkeeping.
    shader.recompute_use_counts();
    tracing::debug!(materialized, pooled, "operands legalized");
    drop(span);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_asm::{Stage, Width};
    use ember_ir::Imm;

    #[test]
    fn float_immediate_moves_out_of_cat2() {
        let mut s = Shader::new(Stage::Compute);
        let b = s.new_block();
        let x = s.new_value(Width::W32);
        let mut def = Instr::new(Opcode::Mov);
        def.dsts.push(Dst::ssa(x, Width::W32));
        def.srcs.push(Src::imm(Imm::uint(0), Width::W32));
        s.append(b, def);
        let d = s.new_value(Width::W32);
        let mut add = Instr::new(Opcode::FAdd);
        add.dsts.push(Dst::ssa(d, Width::W32));
        add.srcs.push(Src::ssa(x, Width::W32));
        add.srcs.push(Src::imm(Imm::float(1.0), Width::W32));
        let add_id = s.append(b, add);
        run(&mut s, 32).unwrap();
        // The float constant lands in the immediate pool.
        assert!(matches!(
            s.instrs[add_id].srcs[1].kind,
            SrcKind::Const(_)
        ));
        assert_eq!(s.consts.imm_pool, vec![1.0f32.to_bits()]);
    }

    #[test]
    fn small_integer_immediate_stays_inline() {
        let mut s = Shader::new(Stage::Compute);
        let b = s.new_block();
        let x = s.new_value(Width::W32);
        let mut def = Instr::new(Opcode::Mov);
        def.dsts.push(Dst::ssa(x, Width::W32));
        def.srcs.push(Src::imm(Imm::uint(0), Width::W32));
        s.append(b, def);
        let d = s.new_value(Width::W32);
        let mut add = Instr::new(Opcode::IAdd);
        add.dsts.push(Dst::ssa(d, Width::W32));
        add.srcs.push(Src::ssa(x, Width::W32));
        add.srcs.push(Src::imm(Imm::uint(3), Width::W32));
        let add_id = s.append(b, add);
        run(&mut s, 32).unwrap();
        assert!(matches!(
            s.instrs[add_id].srcs[1].kind,
            SrcKind::Imm(_)
        ));
        assert!(s.consts.imm_pool.is_empty());
    }
}
