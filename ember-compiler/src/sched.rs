//! Pre-allocation list scheduler.
//!
//! Reorders each block to hide latency while keeping live-value pressure
//! in check. Candidates are picked from a ready list: meta ops first,
//! then inputs, then demotes, then expensive ops, otherwise the smallest
//! remaining delay with the longest path to the exit as the tie breaker.
//! Above the pressure threshold only candidates that shrink the live set
//! stay eligible, and a short nop budget avoids scheduling a consumer
//! into the sync window of a just-issued SFU op. Stubborn latency gaps
//! fill with explicit nops, at most six at a time.

use crate::error::{BugCode, CompileError, Result};
use crate::generation::Generation;
use ember_asm::{InstrFlags, Opcode};
use ember_ir::{ArrayId, BlockId, DstKind, Instr, InstrId, Shader, SrcKind, Value};
use std::collections::{HashMap, HashSet};

/// Nop budget rule 6 may spend to dodge an `(ss)`.
const SYNC_DODGE_BUDGET: u32 = 4;

fn is_meta(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::Phi | Opcode::Split | Opcode::Combine | Opcode::Input
    )
}

fn is_expensive(op: Opcode) -> bool {
    op.is_sfu() || op.is_async()
}

/// Pinned tail: control flow must stay at the block end in source order.
fn is_tail(op: Opcode) -> bool {
    op.is_flow() || op == Opcode::LogicalEnd
}

fn array_of(instr: &Instr) -> Option<ArrayId> {
    for d in &instr.dsts {
        if let DstKind::Array { id, .. } = d.kind {
            return Some(id);
        }
    }
    for s in &instr.srcs {
        if let SrcKind::Array { id, .. } = s.kind {
            return Some(id);
        }
    }
    None
}

/// Program-order edges from memory-ordering classes, refined so accesses
/// to different register arrays never alias.
fn barrier_deps(shader: &Shader, body: &[InstrId]) -> HashMap<InstrId, Vec<InstrId>> {
    let mut deps: HashMap<InstrId, Vec<InstrId>> = HashMap::new();
    for j in 1..body.len() {
        let b = &shader.instrs[body[j]];
        if b.barrier_conflict.is_empty() {
            continue;
        }
        for &earlier in &body[..j] {
            let a = &shader.instrs[earlier];
            if !a.barrier_class.intersects(b.barrier_conflict) {
                continue;
            }
            if let (Some(x), Some(y)) = (array_of(a), array_of(b)) {
                if x != y {
                    continue;
                }
            }
            deps.entry(body[j]).or_default().push(earlier);
        }
    }
    deps
}

struct BlockSched<'s, G> {
    shader: &'s mut Shader,
    block: BlockId,
    /// Unscheduled body instructions.
    pending: Vec<InstrId>,
    /// Issue cycle at which each value becomes free to read.
    value_ready: HashMap<Value, u32>,
    /// Values whose last use is still pending, with remaining use counts.
    live: HashMap<Value, u32>,
    now: u32,
    last_sfu_issue: Option<u32>,
    /// Most recently issued writer of the single address register.
    last_mova: Option<InstrId>,
    /// Ordering edges from barrier classes, by consumer.
    extra_deps: HashMap<InstrId, Vec<InstrId>>,
    scheduled: Vec<InstrId>,
    nops: u32,
    _gen: core::marker::PhantomData<G>,
}

impl<G: Generation> BlockSched<'_, G> {
    fn dep_values(&self, id: InstrId) -> Vec<Value> {
        self.shader.instrs[id]
            .srcs
            .iter()
            .filter_map(|s| s.as_ssa())
            .collect()
    }

    /// Remaining cycles before `id` can issue without a stall.
    fn delay(&self, id: InstrId) -> u32 {
        self.dep_values(id)
            .iter()
            .filter_map(|v| self.value_ready.get(v))
            .map(|&ready| ready.saturating_sub(self.now))
            .max()
            .unwrap_or(0)
    }

    /// Whether every same-block dependency has already been scheduled.
    fn deps_done(&self, id: InstrId, placed: &HashSet<InstrId>) -> bool {
        let instr = &self.shader.instrs[id];
        let block = Some(self.block);
        let src_ok = instr.srcs.iter().all(|s| match s.as_ssa() {
            Some(v) => match self.shader.def_of(v) {
                Some(def) if self.shader.instrs[def].block == block => {
                    placed.contains(&def)
                }
                _ => true,
            },
            None => true,
        });
        let dep_ok = instr.deps.iter().all(|d| {
            self.shader.instrs[*d].block != block || placed.contains(d)
        });
        let addr_ok = match instr.address {
            Some(a) => self.shader.instrs[a].block != block || placed.contains(&a),
            None => true,
        };
        let order_ok = self
            .extra_deps
            .get(&id)
            .map(|v| v.iter().all(|d| placed.contains(d)))
            .unwrap_or(true);
        src_ok && dep_ok && addr_ok && order_ok
    }

    /// Change in live scalar components if `id` were scheduled now.
    fn live_effect(&self, id: InstrId) -> i32 {
        let instr = &self.shader.instrs[id];
        let new_live: i32 = instr.dsts.iter().map(|d| d.wrmask as i32).sum();
        let mut dying = 0i32;
        for src in &instr.srcs {
            if let Some(v) = src.as_ssa() {
                if self.live.get(&v).copied() == Some(1) {
                    if let Some(def) = self.shader.def_of(v) {
                        dying += self.shader.instrs[def]
                            .dsts
                            .first()
                            .map(|d| d.wrmask as i32)
                            .unwrap_or(1);
                    }
                }
            }
        }
        new_live - dying
    }

    fn live_total(&self) -> i32 {
        self.live
            .keys()
            .filter_map(|v| self.shader.def_of(*v))
            .map(|def| {
                self.shader.instrs[def]
                    .dsts
                    .first()
                    .map(|d| d.wrmask as i32)
                    .unwrap_or(1)
            })
            .sum()
    }

    /// Longest latency path from `id` to the end of the block.
    fn max_delay(&self, id: InstrId, memo: &mut HashMap<InstrId, u32>) -> u32 {
        if let Some(&d) = memo.get(&id) {
            return d;
        }
        let mut best = 0;
        let def_latency = G::alu_latency(self.shader.instrs[id].opcode);
        if let Some(dst) = self.shader.instrs[id].dsts.first() {
            if let Some(v) = dst.as_ssa() {
                for &user in &self.pending {
                    let uses = self.shader.instrs[user]
                        .srcs
                        .iter()
                        .any(|s| s.as_ssa() == Some(v));
                    if uses {
                        best = best.max(self.max_delay(user, memo));
                    }
                }
            }
        }
        let total = best + def_latency;
        memo.insert(id, total);
        total
    }

    fn pick(&mut self, placed: &HashSet<InstrId>) -> Option<InstrId> {
        let ready: Vec<InstrId> = self
            .pending
            .iter()
            .copied()
            .filter(|&id| self.deps_done(id, placed))
            .collect();
        if ready.is_empty() {
            return None;
        }
        // Rule 1: meta ops issue immediately.
        if let Some(&id) = ready
            .iter()
            .find(|&&id| is_meta(self.shader.instrs[id].opcode))
        {
            return Some(id);
        }
        // Pressure gate: above the threshold only shrinking candidates
        // stay eligible.
        let threshold = if G::HIGH_LATENCY { 2 * 16 * 4 } else { 2 * 12 * 4 };
        let eligible: Vec<InstrId> = if self.live_total() > threshold {
            let shrinking: Vec<InstrId> = ready
                .iter()
                .copied()
                .filter(|&id| self.live_effect(id) <= 0)
                .collect();
            if shrinking.is_empty() {
                ready.clone()
            } else {
                shrinking
            }
        } else {
            ready.clone()
        };
        // Rule 3: demotes go as early as possible.
        if let Some(&id) = eligible
            .iter()
            .find(|&&id| self.shader.instrs[id].flags.contains(InstrFlags::KILL))
        {
            return Some(id);
        }
        // Rule 4: expensive ops over cheap ones when both are ready now.
        let zero_delay_expensive = eligible.iter().copied().find(|&id| {
            self.delay(id) == 0 && is_expensive(self.shader.instrs[id].opcode)
        });
        if let Some(id) = zero_delay_expensive {
            return Some(id);
        }
        // Rules 5 and 6: minimum delay, longest path tie break, dodging
        // the SFU sync window within the nop budget.
        let mut memo = HashMap::new();
        let mut best: Option<(InstrId, u32, u32, bool)> = None;
        for &id in &eligible {
            let delay = self.delay(id);
            let path = self.max_delay(id, &mut memo);
            let forces_sync = self.forces_sync(id);
            let better = match best {
                None => true,
                Some((_, bd, bp, bs)) => {
                    // A non-sync candidate within the nop budget beats a
                    // sync-forcing one.
                    if bs != forces_sync && delay.abs_diff(bd) <= SYNC_DODGE_BUDGET
                    {
                        bs && !forces_sync
                    } else {
                        delay < bd || (delay == bd && path > bp)
                    }
                }
            };
            if better {
                best = Some((id, delay, path, forces_sync));
            }
        }
        best.map(|(id, ..)| id)
    }

    fn forces_sync(&self, id: InstrId) -> bool {
        let Some(issued) = self.last_sfu_issue else {
            return false;
        };
        if self.now.saturating_sub(issued) >= G::SFU_LATENCY {
            return false;
        }
        self.dep_values(id).iter().any(|v| {
            self.shader
                .def_of(*v)
                .map(|def| self.shader.instrs[def].opcode.is_sfu())
                .unwrap_or(false)
        })
    }

    fn issue(&mut self, id: InstrId) {
        let delay = self.delay(id);
        self.now += delay.min(G::MAX_DELAY);
        let op = self.shader.instrs[id].opcode;
        if op.is_sfu() {
            self.last_sfu_issue = Some(self.now);
        }
        for v in self.dep_values(id) {
            if let Some(count) = self.live.get_mut(&v) {
                *count -= 1;
                if *count == 0 {
                    self.live.remove(&v);
                }
            }
        }
        if let Some(dst) = self.shader.instrs[id].dsts.first() {
            if let Some(v) = dst.as_ssa() {
                let latency = G::alu_latency(op);
                self.value_ready.insert(v, self.now + latency);
                let uses = self.count_pending_uses(v, id);
                if uses > 0 {
                    self.live.insert(v, uses);
                }
            }
        }
        self.now += 1;
        self.scheduled.push(id);
    }

    fn count_pending_uses(&self, v: Value, except: InstrId) -> u32 {
        self.pending
            .iter()
            .filter(|&&id| id != except)
            .map(|&id| {
                self.shader.instrs[id]
                    .srcs
                    .iter()
                    .filter(|s| s.as_ssa() == Some(v))
                    .count() as u32
            })
            .sum()
    }

    fn run(mut self) -> Result<(Vec<InstrId>, u32)> {
        let mut placed: HashSet<InstrId> = HashSet::new();
        // Seed liveness with cross-block values consumed here.
        let block = Some(self.block);
        for &id in &self.pending {
            for src in self.shader.instrs[id].srcs.clone() {
                if let Some(v) = src.as_ssa() {
                    let foreign = self
                        .shader
                        .def_of(v)
                        .map(|d| self.shader.instrs[d].block != block)
                        .unwrap_or(true);
                    if foreign {
                        *self.live.entry(v).or_insert(0) += 1;
                    }
                }
            }
        }
        let total = self.pending.len();
        let mut guard = 0usize;
        while placed.len() < total {
            guard += 1;
            if guard > total * total + total + 64 {
                return Err(CompileError::bug(
                    BugCode::SchedulerWedged,
                    "no progress in the pre-RA scheduler",
                ));
            }
            match self.pick(&placed) {
                Some(id) => {
                    // There is one address register. If another writer
                    // issued since this instruction's writer, clone the
                    // writer and retarget; downstream users keep their
                    // own pointer, which is why instruction identity is
                    // not stable across scheduling.
                    if let Some(addr) = self.shader.instrs[id].address {
                        if placed.contains(&addr)
                            && self.last_mova.is_some()
                            && self.last_mova != Some(addr)
                        {
                            let mut clone = self.shader.instrs[addr].clone();
                            clone.block = Some(self.block);
                            let new_id = self.shader.instrs.alloc(clone);
                            self.scheduled.push(new_id);
                            self.now += 1;
                            self.shader.instrs[id].address = Some(new_id);
                            self.last_mova = Some(new_id);
                        }
                    }
                    self.pending.retain(|&p| p != id);
                    placed.insert(id);
                    if self.shader.instrs[id].opcode == Opcode::MovA {
                        self.last_mova = Some(id);
                    }
                    self.issue(id);
                }
                None => {
                    // Latency stall with nothing else to run.
                    for _ in 0..G::MAX_DELAY {
                        self.nops += 1;
                        self.now += 1;
                        if self
                            .pending
                            .iter()
                            .any(|&id| self.deps_done(id, &placed))
                        {
                            break;
                        }
                    }
                }
            }
        }
        Ok((self.scheduled, self.nops))
    }
}

/// Schedules every block of the shader.
pub fn run<G: Generation>(shader: &mut Shader) -> Result<()> {
    let span = tracing::debug_span!("pre_ra_sched").entered();
    let mut total_nops = 0;
    for block in shader.block_order.clone() {
        let all = shader.block_instrs(block);
        // Phis stay at the head, control flow at the tail, both in source
        // order; the body in between is fair game.
        let mut head = Vec::new();
        let mut body = Vec::new();
        let mut tail = Vec::new();
        for id in all {
            let op = shader.instrs[id].opcode;
            if op == Opcode::Phi {
                head.push(id);
            } else if is_tail(op) {
                tail.push(id);
            } else {
                body.push(id);
            }
        }
        let extra_deps = barrier_deps(shader, &body);
        let sched = BlockSched::<G> {
            shader: &mut *shader,
            block,
            pending: body,
            extra_deps,
            value_ready: HashMap::new(),
            live: HashMap::new(),
            now: 0,
            last_sfu_issue: None,
            last_mova: None,
            scheduled: Vec::new(),
            nops: 0,
            _gen: core::marker::PhantomData,
        };
        let (mut order, nops) = sched.run()?;
        total_nops += nops;
        let mut new_list = head;
        new_list.append(&mut order);
        new_list.extend(tail);
        shader.blocks[block].instrs = new_list;
    }
    // Address-writer clones may have added uses.
    shader.recompute_use_counts();
    tracing::debug!(nops = total_nops, "pre-RA schedule done");
    drop(span);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Gen7;
    use ember_asm::{Stage, Width};
    use ember_ir::{Dst, Src};

    fn simple(op: Opcode, shader: &mut Shader, b: BlockId, srcs: &[Value]) -> Value {
        let v = shader.new_value(Width::W32);
        let mut i = Instr::new(op);
        i.dsts.push(Dst::ssa(v, Width::W32));
        for &s in srcs {
            i.srcs.push(Src::ssa(s, Width::W32));
        }
        shader.append(b, i);
        v
    }

    #[test]
    fn independent_work_fills_the_sfu_shadow() {
        let mut s = Shader::new(Stage::Compute);
        let b = s.new_block();
        let x = simple(Opcode::Mov, &mut s, b, &[]);
        let lg = simple(Opcode::Log2, &mut s, b, &[x]);
        let dep = simple(Opcode::FAdd, &mut s, b, &[lg, lg]);
        let indep1 = simple(Opcode::Mov, &mut s, b, &[]);
        let indep2 = simple(Opcode::IAdd, &mut s, b, &[indep1, indep1]);
        run::<Gen7>(&mut s).unwrap();

        let order = s.block_instrs(b);
        let pos = |v: Value| {
            let def = s.def_of(v).unwrap();
            order.iter().position(|&i| i == def).unwrap()
        };
        // The dependent add does not immediately follow the SFU op; the
        // independent chain slots into the shadow.
        assert!(pos(dep) > pos(lg) + 1 || pos(indep2) > pos(lg));
        assert!(pos(dep) > pos(lg));
    }
}
