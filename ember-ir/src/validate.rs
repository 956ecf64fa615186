//! Inter-pass IR validation.
//!
//! Each check mirrors one structural invariant of the IR. Passes run the
//! validator between stages unless the caller disabled it; a violation
//! names the offending instruction so the failing pass is identifiable
//! from the error alone.

use crate::{
    BlockId,
    DstKind,
    InstrExtra,
    InstrId,
    Shader,
    SrcKind,
    Value,
};
use ember_asm::{Opcode, SrcMods};
use std::collections::HashMap;

/// A structural invariant violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// An SSA value has more than one definition.
    #[error("{value} is defined more than once (second def at {instr})")]
    MultipleDefs {
        /// The re-defined value.
        value: Value,
        /// The offending definition.
        instr: InstrId,
    },
    /// A use site is not dominated by its definition.
    #[error("{value} used at {instr} without a dominating definition")]
    UndominatedUse {
        /// The used value.
        value: Value,
        /// The offending use.
        instr: InstrId,
    },
    /// Source and destination widths disagree on a non-converting opcode.
    #[error("width mismatch at {instr}")]
    WidthMismatch {
        /// The offending instruction.
        instr: InstrId,
    },
    /// Execution-mask pushes and pops do not balance.
    #[error("execution mask depth mismatch entering {block}")]
    ExecImbalance {
        /// The block with inconsistent entry depth.
        block: BlockId,
    },
    /// A phi's sources do not line up with its block's predecessors.
    #[error("phi {instr} does not match its block's predecessors")]
    MalformedPhi {
        /// The offending phi.
        instr: InstrId,
    },
    /// A repeat group breaks the repeat shape rules.
    #[error("illegal repeat shape at {instr}")]
    IllegalRepeat {
        /// The offending instruction.
        instr: InstrId,
    },
    /// A recorded use count disagrees with the instruction stream.
    #[error("stale use count for {value}")]
    StaleUseCount {
        /// The miscounted value.
        value: Value,
    },
}

/// Whether `op` legitimately changes width between sources and
/// destination.
fn converts_width(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::Cov
            | Opcode::FCmp
            | Opcode::ICmp
            | Opcode::UCmp
            // sel.b reads its 16-bit condition next to full operands.
            | Opcode::SelB
            | Opcode::Split
            | Opcode::Combine
            | Opcode::Phi
    ) || op.is_load()
        || matches!(
            op,
            Opcode::Sam
                | Opcode::SamB
                | Opcode::SamL
                | Opcode::SamGrad
                | Opcode::Isam
                | Opcode::GetSize
        )
}

fn compute_dominators(shader: &Shader) -> HashMap<BlockId, Vec<BlockId>> {
    // Dense iterative dataflow; block counts are small enough that the
    // set representation does not matter.
    let all: Vec<BlockId> = shader.block_order.clone();
    let mut dom: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    if all.is_empty() {
        return dom;
    }
    dom.insert(all[0], vec![all[0]]);
    for &b in &all[1..] {
        dom.insert(b, all.clone());
    }
    let mut changed = true;
    while changed {
        changed = false;
        for &b in &all[1..] {
            let preds = &shader.blocks[b].predecessors;
            let mut new: Option<Vec<BlockId>> = None;
            for &p in preds {
                let pd = &dom[&p];
                new = Some(match new {
                    None => pd.clone(),
                    Some(cur) => cur.into_iter().filter(|x| pd.contains(x)).collect(),
                });
            }
            let mut new = new.unwrap_or_default();
            if !new.contains(&b) {
                new.push(b);
            }
            if dom[&b] != new {
                dom.insert(b, new);
                changed = true;
            }
        }
    }
    dom
}

fn check_ssa(shader: &Shader) -> Result<(), ValidationError> {
    let dom = compute_dominators(shader);
    let mut seen_defs: HashMap<Value, InstrId> = HashMap::new();
    // Definition uniqueness, then dominance of each use.
    for &block in &shader.block_order {
        for &instr in &shader.blocks[block].instrs {
            for dst in &shader.instrs[instr].dsts {
                if let DstKind::Ssa(v) = dst.kind {
                    if seen_defs.insert(v, instr).is_some() {
                        return Err(ValidationError::MultipleDefs { value: v, instr });
                    }
                }
            }
        }
    }
    for &block in &shader.block_order {
        let mut defined_here: Vec<Value> = Vec::new();
        for &instr in &shader.blocks[block].instrs {
            let node = &shader.instrs[instr];
            let phi_preds = match &node.extra {
                InstrExtra::Phi { preds } => Some(preds),
                _ => None,
            };
            for (slot, src) in node.srcs.iter().enumerate() {
                let Some(v) = src.as_ssa() else { continue };
                let Some(def) = shader.def_of(v) else {
                    return Err(ValidationError::UndominatedUse { value: v, instr });
                };
                let def_block = shader.instrs[def].block.expect("defs are attached");
                // A phi source must dominate the matching predecessor's
                // exit rather than the phi itself.
                let use_block = match phi_preds {
                    Some(preds) => *preds
                        .get(slot)
                        .ok_or(ValidationError::MalformedPhi { instr })?,
                    None => block,
                };
                let dominated = if def_block == use_block {
                    use_block != block || defined_here.contains(&v) || phi_preds.is_some()
                } else {
                    dom.get(&use_block)
                        .map(|d| d.contains(&def_block))
                        .unwrap_or(false)
                };
                if !dominated {
                    return Err(ValidationError::UndominatedUse { value: v, instr });
                }
            }
            for dst in &node.dsts {
                if let DstKind::Ssa(v) = dst.kind {
                    defined_here.push(v);
                }
            }
        }
    }
    Ok(())
}

fn check_widths(shader: &Shader) -> Result<(), ValidationError> {
    for &block in &shader.block_order {
        for &instr in &shader.blocks[block].instrs {
            let node = &shader.instrs[instr];
            if converts_width(node.opcode) || node.opcode.category().is_none() {
                continue;
            }
            let Some(dst) = node.dsts.first() else { continue };
            for src in &node.srcs {
                if src.width != dst.width {
                    return Err(ValidationError::WidthMismatch { instr });
                }
            }
        }
    }
    Ok(())
}

fn check_exec_balance(shader: &Shader) -> Result<(), ValidationError> {
    // Execution falls through blocks in layout order; the mask depth must
    // never underflow and must be zero when the shader ends. `if.icmp`
    // pushes one implicit level that the matching `pop.exec 1` releases;
    // the zero-level pops flushing the nesting counter are neutral.
    let mut depth = 0i32;
    for &block in &shader.block_order {
        for &instr in &shader.blocks[block].instrs {
            let node = &shader.instrs[instr];
            match node.opcode {
                Opcode::IfICmp => depth += 1,
                Opcode::PushExec | Opcode::PopExec => {
                    if let InstrExtra::Exec { levels } = node.extra {
                        if node.opcode == Opcode::PushExec {
                            depth += levels as i32;
                        } else {
                            depth -= levels as i32;
                        }
                    }
                }
                _ => {}
            }
            if depth < 0 {
                return Err(ValidationError::ExecImbalance { block });
            }
            if node.opcode == Opcode::End && depth != 0 {
                return Err(ValidationError::ExecImbalance { block });
            }
        }
    }
    Ok(())
}

fn check_phis(shader: &Shader) -> Result<(), ValidationError> {
    for &block in &shader.block_order {
        for &instr in &shader.blocks[block].instrs {
            let node = &shader.instrs[instr];
            if !node.is_phi() {
                continue;
            }
            let InstrExtra::Phi { preds } = &node.extra else {
                return Err(ValidationError::MalformedPhi { instr });
            };
            if preds.len() != node.srcs.len() {
                return Err(ValidationError::MalformedPhi { instr });
            }
            for p in preds {
                if !shader.blocks[block].predecessors.contains(p) {
                    return Err(ValidationError::MalformedPhi { instr });
                }
            }
        }
    }
    Ok(())
}

fn check_repeats(shader: &Shader) -> Result<(), ValidationError> {
    for &block in &shader.block_order {
        for &instr in &shader.blocks[block].instrs {
            let node = &shader.instrs[instr];
            if node.repeat == 0 {
                continue;
            }
            if node.repeat > 3 {
                return Err(ValidationError::IllegalRepeat { instr });
            }
            // Immediate-stepping repeats are only supported on `mov`.
            for src in &node.srcs {
                if src.mods.contains(SrcMods::R)
                    && matches!(src.kind, SrcKind::Imm(_))
                    && node.opcode != Opcode::Mov
                {
                    return Err(ValidationError::IllegalRepeat { instr });
                }
            }
        }
    }
    Ok(())
}

fn check_use_counts(shader: &Shader) -> Result<(), ValidationError> {
    let mut counts = vec![0u32; shader.value_count()];
    for &block in &shader.block_order {
        for &instr in &shader.blocks[block].instrs {
            for src in &shader.instrs[instr].srcs {
                if let SrcKind::Ssa(v) = src.kind {
                    counts[v.index()] += 1;
                }
            }
        }
    }
    for (i, &count) in counts.iter().enumerate() {
        let v = Value::new(i as u32);
        if shader.use_count(v) != count {
            return Err(ValidationError::StaleUseCount { value: v });
        }
    }
    Ok(())
}

/// Validates the shader against the structural invariants that hold in
/// SSA form.
pub fn validate_ssa(shader: &Shader) -> Result<(), ValidationError> {
    check_ssa(shader)?;
    check_widths(shader)?;
    check_phis(shader)?;
    check_repeats(shader)?;
    check_use_counts(shader)?;
    Ok(())
}

/// Validates invariants that hold from predication lowering onward.
pub fn validate_predicated(shader: &Shader) -> Result<(), ValidationError> {
    check_exec_balance(shader)?;
    check_repeats(shader)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Dst, Instr, Shader, Src};
    use ember_asm::{Stage, Width};

    fn exec(shader: &mut Shader, block: BlockId, op: Opcode, levels: u8) {
        let mut i = Instr::new(op);
        i.extra = InstrExtra::Exec { levels };
        shader.append(block, i);
    }

    #[test]
    fn unmatched_push_is_rejected() {
        let mut s = Shader::new(Stage::Compute);
        let b = s.new_block();
        exec(&mut s, b, Opcode::PushExec, 2);
        s.append(b, Instr::new(Opcode::End));
        assert!(matches!(
            validate_predicated(&s),
            Err(ValidationError::ExecImbalance { .. })
        ));
        exec(&mut s, b, Opcode::PopExec, 2);
        // The `end` sits mid-block now; rebuild in balanced order.
        let mut s2 = Shader::new(Stage::Compute);
        let b2 = s2.new_block();
        exec(&mut s2, b2, Opcode::PushExec, 2);
        exec(&mut s2, b2, Opcode::PopExec, 2);
        s2.append(b2, Instr::new(Opcode::End));
        assert!(validate_predicated(&s2).is_ok());
    }

    #[test]
    fn use_without_dominating_def_is_rejected() {
        let mut s = Shader::new(Stage::Compute);
        let b = s.new_block();
        let v = s.new_value(Width::W32);
        let w = s.new_value(Width::W32);
        // Use before the definition in the same block.
        let mut user = Instr::new(Opcode::IAdd);
        user.dsts.push(Dst::ssa(w, Width::W32));
        user.srcs.push(Src::ssa(v, Width::W32));
        user.srcs.push(Src::ssa(v, Width::W32));
        s.append(b, user);
        let mut def = Instr::new(Opcode::Mov);
        def.dsts.push(Dst::ssa(v, Width::W32));
        def.srcs.push(Src::imm(crate::Imm::uint(0), Width::W32));
        s.append(b, def);
        assert!(matches!(
            validate_ssa(&s),
            Err(ValidationError::UndominatedUse { .. })
        ));
    }
}
