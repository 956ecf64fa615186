//! Post-allocation scheduler and sync legalizer.
//!
//! Per block, a DAG over physical registers (true, output and anti
//! dependencies), barrier classes and declared false dependencies is
//! walked with a priority queue favoring the longest path to the exit.
//! ALU results younger than their pipeline latency get `nop`s; SFU
//! consumers get a short soft spacing and carry `(ss)`; texture and
//! memory consumers carry `(sy)` until a sync retires the outstanding
//! set. The sequencer drains both queues at block boundaries and neither
//! address nor predicate state crosses one, so tracking is per block.

use crate::error::{BugCode, CompileError, Result};
use crate::generation::Generation;
use ember_asm::{Category, InstrFlags, Opcode, PhysReg};
use ember_ir::{DstKind, Instr, InstrId, Shader, SrcKind};
use std::collections::{HashMap, HashSet};

/// Soft spacing inserted between an SFU op and its first consumer.
const SOFT_SS_DELAY: u32 = 4;

fn regs_written(instr: &Instr) -> Vec<PhysReg> {
    let mut out = Vec::new();
    for dst in &instr.dsts {
        if let DstKind::Phys(r) = dst.kind {
            for c in 0..dst.wrmask.max(1) as u16 {
                out.push(r.offset(c));
            }
        }
    }
    out
}

fn regs_read(instr: &Instr) -> Vec<PhysReg> {
    let mut out = Vec::new();
    for src in &instr.srcs {
        if let SrcKind::Phys(r) = src.kind {
            out.push(r);
        }
    }
    out
}

struct Dag {
    /// Successor lists.
    succs: Vec<Vec<usize>>,
    /// Unscheduled predecessor counts.
    preds: Vec<usize>,
}

fn build_dag(shader: &Shader, ids: &[InstrId]) -> Dag {
    let n = ids.len();
    let mut succs = vec![Vec::new(); n];
    let mut preds = vec![0usize; n];
    let mut edge = |succs: &mut Vec<Vec<usize>>, preds: &mut Vec<usize>, a: usize, b: usize| {
        if !succs[a].contains(&b) {
            succs[a].push(b);
            preds[b] += 1;
        }
    };
    for j in 0..n {
        let bj = &shader.instrs[ids[j]];
        let rj = regs_read(bj);
        let wj = regs_written(bj);
        for i in 0..j {
            let bi = &shader.instrs[ids[i]];
            let ri = regs_read(bi);
            let wi = regs_written(bi);
            let true_dep = wi.iter().any(|r| rj.contains(r));
            let out_dep = wi.iter().any(|r| wj.contains(r));
            let anti_dep = ri.iter().any(|r| wj.contains(r));
            let barrier = bi
                .barrier_class
                .intersects(bj.barrier_conflict);
            let false_dep = bj.deps.contains(&ids[i]);
            if true_dep || out_dep || anti_dep || barrier || false_dep {
                edge(&mut succs, &mut preds, i, j);
            }
        }
    }
    Dag { succs, preds }
}

fn max_delays<G: Generation>(shader: &Shader, ids: &[InstrId], dag: &Dag) -> Vec<u32> {
    let n = ids.len();
    let mut delay = vec![0u32; n];
    for i in (0..n).rev() {
        let own = G::alu_latency(shader.instrs[ids[i]].opcode);
        let best_succ = dag.succs[i].iter().map(|&s| delay[s]).max().unwrap_or(0);
        delay[i] = own + best_succ;
    }
    delay
}

#[derive(Clone, Copy)]
struct Writer {
    emit_index: u32,
    category: Category,
    synced: bool,
}

struct Legalizer<'g, G> {
    emitted: Vec<InstrId>,
    emit_index: u32,
    writers: HashMap<PhysReg, Writer>,
    nops: u32,
    _gen: core::marker::PhantomData<&'g G>,
}

impl<G: Generation> Legalizer<'_, G> {
    fn place(&mut self, shader: &mut Shader, block: ember_ir::BlockId, id: InstrId) {
        // Hard ALU latency fills with nops; SFU soft spacing too, within
        // the delay-slot budget.
        let mut need = 0u32;
        for r in regs_read(&shader.instrs[id]) {
            if let Some(w) = self.writers.get(&r) {
                let dist = self.emit_index - w.emit_index;
                let want = match w.category {
                    Category::Cat4 => SOFT_SS_DELAY + 1,
                    Category::Cat5 | Category::Cat6 => 0,
                    _ => 3,
                };
                need = need.max(want.saturating_sub(dist));
            }
        }
        for _ in 0..need.min(G::MAX_DELAY) {
            let nop = shader.instrs.alloc(Instr::new(Opcode::Nop));
            shader.instrs[nop].block = Some(block);
            shader.instrs[nop].ip = self.emit_index;
            self.emitted.push(nop);
            self.emit_index += 1;
            self.nops += 1;
        }

        // Sync flags against the distance model, recomputed from scratch
        // so a re-run after cleanup stays exact. Control flow cannot
        // carry them; `end` retires the queues implicitly.
        shader.instrs[id]
            .flags
            .remove(InstrFlags::SS | InstrFlags::SY);
        let flow = shader.instrs[id].opcode.is_flow();
        let mut ss = false;
        let mut sy = false;
        for r in regs_read(&shader.instrs[id]) {
            if let Some(w) = self.writers.get(&r) {
                let dist = self.emit_index - w.emit_index;
                if w.category == Category::Cat4 && dist < G::SFU_LATENCY {
                    ss = true;
                }
                if matches!(w.category, Category::Cat5 | Category::Cat6)
                    && !w.synced
                    && dist < G::ASYNC_LATENCY
                {
                    sy = true;
                }
            }
        }
        if ss && !flow {
            shader.instrs[id].flags |= InstrFlags::SS;
        }
        if sy && !flow {
            shader.instrs[id].flags |= InstrFlags::SY;
            // A sync retires every outstanding asynchronous result.
            for w in self.writers.values_mut() {
                if matches!(w.category, Category::Cat5 | Category::Cat6) {
                    w.synced = true;
                }
            }
        }

        let category = shader.instrs[id]
            .opcode
            .category()
            .unwrap_or(Category::Cat1);
        for r in regs_written(&shader.instrs[id]) {
            self.writers.insert(
                r,
                Writer {
                    emit_index: self.emit_index,
                    category,
                    synced: false,
                },
            );
        }
        shader.instrs[id].ip = self.emit_index;
        self.emitted.push(id);
        self.emit_index += 1;
    }
}

/// Schedules and legalizes every block.
///
/// With `reorder` unset (the `no-optimize` path) the DAG walk is skipped
/// and instructions keep their order, but nop insertion and sync-flag
/// legalization still run; they are correctness, not optimization.
pub fn run<G: Generation>(shader: &mut Shader, reorder: bool) -> Result<()> {
    let span = tracing::debug_span!("post_ra_sched").entered();
    let mut total_nops = 0;
    let mut legal = Legalizer::<G> {
        emitted: Vec::new(),
        emit_index: 0,
        writers: HashMap::new(),
        nops: 0,
        _gen: core::marker::PhantomData,
    };
    for block in shader.block_order.clone() {
        // Register state does not carry across blocks.
        legal.writers.clear();
        let all = shader.block_instrs(block);
        let mut body = Vec::new();
        let mut tail = Vec::new();
        for id in all {
            let op = shader.instrs[id].opcode;
            if op.is_flow() || op == Opcode::LogicalEnd {
                tail.push(id);
            } else {
                body.push(id);
            }
        }
        legal.emitted.clear();
        if reorder {
            let dag = build_dag(shader, &body);
            let delays = max_delays::<G>(shader, &body, &dag);
            let mut remaining: HashSet<usize> = (0..body.len()).collect();
            let mut pred_count = dag.preds.clone();
            while !remaining.is_empty() {
                let pick = remaining
                    .iter()
                    .copied()
                    .filter(|&i| pred_count[i] == 0)
                    .max_by_key(|&i| (delays[i], core::cmp::Reverse(i)))
                    .ok_or_else(|| {
                        CompileError::bug(
                            BugCode::SchedulerWedged,
                            "post-RA DAG has a cycle",
                        )
                    })?;
                remaining.remove(&pick);
                for &s in &dag.succs[pick] {
                    pred_count[s] -= 1;
                }
                legal.place(shader, block, body[pick]);
            }
        } else {
            for id in body {
                legal.place(shader, block, id);
            }
        }
        // The pinned tail still takes part in sync legalization.
        for id in tail {
            legal.place(shader, block, id);
        }
        shader.blocks[block].instrs = core::mem::take(&mut legal.emitted);
        total_nops += legal.nops;
        legal.nops = 0;
    }
    tracing::debug!(nops = total_nops, "post-RA schedule done");
    drop(span);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Gen7;
    use ember_asm::{Stage, Width};
    use ember_ir::{Dst, Src};

    fn phys_instr(
        shader: &mut Shader,
        b: ember_ir::BlockId,
        op: Opcode,
        dst: PhysReg,
        srcs: &[PhysReg],
    ) -> InstrId {
        let mut i = Instr::new(op);
        i.dsts.push(Dst {
            kind: DstKind::Phys(dst),
            width: Width::W32,
            wrmask: 1,
        });
        for &s in srcs {
            i.srcs.push(Src {
                kind: SrcKind::Phys(s),
                width: Width::W32,
                mods: ember_asm::SrcMods::empty(),
            });
        }
        shader.append(b, i)
    }

    #[test]
    fn sfu_consumer_is_spaced_and_carries_ss() {
        let mut s = Shader::new(Stage::Compute);
        let b = s.new_block();
        let r0 = PhysReg::full(0);
        let r1 = PhysReg::full(4);
        let r2 = PhysReg::full(8);
        phys_instr(&mut s, b, Opcode::Log2, r1, &[r0]);
        let add = phys_instr(&mut s, b, Opcode::FAdd, r2, &[r1, r1]);
        run::<Gen7>(&mut s, true).unwrap();

        let order = s.block_instrs(b);
        let log_pos = order
            .iter()
            .position(|&i| s.instrs[i].opcode == Opcode::Log2)
            .unwrap();
        let add_pos = order.iter().position(|&i| i == add).unwrap();
        assert!(add_pos - log_pos > SOFT_SS_DELAY as usize);
        assert!(s.instrs[add].flags.contains(InstrFlags::SS));
    }

    #[test]
    fn anti_dependency_blocks_reordering() {
        let mut s = Shader::new(Stage::Compute);
        let b = s.new_block();
        let r0 = PhysReg::full(0);
        let r1 = PhysReg::full(4);
        // read r0 then overwrite r0: the write may not move above.
        let read = phys_instr(&mut s, b, Opcode::IAdd, r1, &[r0, r0]);
        let write = phys_instr(&mut s, b, Opcode::Mov, r0, &[r1]);
        run::<Gen7>(&mut s, true).unwrap();
        let order = s.block_instrs(b);
        let p_read = order.iter().position(|&i| i == read).unwrap();
        let p_write = order.iter().position(|&i| i == write).unwrap();
        assert!(p_read < p_write);
    }
}
