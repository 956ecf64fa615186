//! Register allocation.
//!
//! Coloring over SSA live ranges in the merged half/full register file.
//! The file is modeled in half-slot units so a full register conflicts
//! with its two halves. Inputs are precolored from their arrival slots,
//! arrays are precolored to contiguous ranges before anything else is
//! assigned, tied atomic destinations reuse their data source's color,
//! and grouped values (`combine`/tex results) occupy contiguous runs.
//! When coloring fails, the furthest-ending live range spills to scratch
//! through `stp`/`ldp` and allocation restarts. Phis resolve into
//! parallel moves at the predecessor ends, with a scratch register
//! breaking copy cycles.

use crate::error::{BugCode, CompileError, Result};
use crate::generation::Generation;
use ember_asm::{Opcode, PhysReg, Width};
use ember_ir::{
    BlockId,
    Dst,
    DstKind,
    Instr,
    InstrExtra,
    InstrId,
    MemInfo,
    Shader,
    Src,
    SrcKind,
    Value,
};
use std::collections::{HashMap, HashSet};

/// Allocation statistics for the metadata record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RaStats {
    /// Spill stores inserted.
    pub spills: u32,
    /// Fill loads inserted.
    pub fills: u32,
    /// Highest full slot used, plus one.
    pub full_slots: u16,
    /// Highest half slot used, plus one.
    pub half_slots: u16,
}

/// A value's placement needs, in half-slot units.
#[derive(Debug, Clone, Copy)]
struct Need {
    /// Half-slots per component (1 for half values, 2 for full).
    unit: u16,
    /// Consecutive components.
    comps: u16,
}

fn value_need(shader: &Shader, v: Value) -> Need {
    let (width, wrmask) = shader
        .def_of(v)
        .and_then(|d| {
            shader.instrs[d]
                .dsts
                .iter()
                .find(|dst| dst.as_ssa() == Some(v))
                .map(|dst| (dst.width, dst.wrmask))
        })
        .unwrap_or((shader.width_of(v), 1));
    let unit = if width == Width::W16 { 1 } else { 2 };
    Need {
        unit,
        comps: wrmask.max(1) as u16,
    }
}

/// Linearized program position of every instruction.
fn positions(shader: &Shader) -> HashMap<InstrId, u32> {
    let mut pos = HashMap::new();
    let mut ip = 0;
    for &b in &shader.block_order {
        for &i in &shader.blocks[b].instrs {
            pos.insert(i, ip);
            ip += 1;
        }
    }
    pos
}

/// Block-level liveness: values live into each block.
fn block_liveness(shader: &Shader) -> HashMap<BlockId, HashSet<Value>> {
    let mut live_in: HashMap<BlockId, HashSet<Value>> = HashMap::new();
    for &b in &shader.block_order {
        live_in.insert(b, HashSet::new());
    }
    let mut changed = true;
    while changed {
        changed = false;
        for &b in shader.block_order.iter().rev() {
            let mut live: HashSet<Value> = HashSet::new();
            for succ in shader.blocks[b].successors() {
                live.extend(live_in[&succ].iter().copied());
                // Phi sources are live out of the matching predecessor
                // only.
                for &i in &shader.blocks[succ].instrs {
                    let instr = &shader.instrs[i];
                    if !instr.is_phi() {
                        continue;
                    }
                    if let InstrExtra::Phi { preds } = &instr.extra {
                        for (slot, p) in preds.iter().enumerate() {
                            if *p == b {
                                if let Some(v) = instr.srcs[slot].as_ssa() {
                                    live.insert(v);
                                }
                            }
                        }
                    }
                    for dst in &instr.dsts {
                        if let Some(v) = dst.as_ssa() {
                            live.remove(&v);
                        }
                    }
                }
            }
            for &i in shader.blocks[b].instrs.iter().rev() {
                let instr = &shader.instrs[i];
                for dst in &instr.dsts {
                    if let Some(v) = dst.as_ssa() {
                        live.remove(&v);
                    }
                }
                if !instr.is_phi() {
                    for src in &instr.srcs {
                        if let Some(v) = src.as_ssa() {
                            live.insert(v);
                        }
                    }
                }
            }
            let entry = live_in.get_mut(&b).expect("initialized");
            if *entry != live {
                *entry = live;
                changed = true;
            }
        }
    }
    live_in
}

/// Live interval of each value over the linear layout order.
fn intervals(
    shader: &Shader,
    pos: &HashMap<InstrId, u32>,
) -> HashMap<Value, (u32, u32)> {
    let live_in = block_liveness(shader);
    let mut ranges: HashMap<Value, (u32, u32)> = HashMap::new();
    let mut touch = |v: Value, at: u32, ranges: &mut HashMap<Value, (u32, u32)>| {
        let e = ranges.entry(v).or_insert((at, at));
        e.0 = e.0.min(at);
        e.1 = e.1.max(at);
    };
    for &b in &shader.block_order {
        let Some(&first) = shader.blocks[b].instrs.first() else {
            continue;
        };
        let last = *shader.blocks[b].instrs.last().expect("nonempty");
        let (bs, be) = (pos[&first], pos[&last]);
        for &v in &live_in[&b] {
            touch(v, bs, &mut ranges);
            touch(v, be, &mut ranges);
        }
        for &i in &shader.blocks[b].instrs {
            let at = pos[&i];
            let instr = &shader.instrs[i];
            for dst in &instr.dsts {
                if let Some(v) = dst.as_ssa() {
                    touch(v, at, &mut ranges);
                }
            }
            for src in &instr.srcs {
                if let Some(v) = src.as_ssa() {
                    touch(v, at, &mut ranges);
                }
            }
        }
    }
    // Values live into a loop header stay live through the whole loop: a
    // backedge at position p extends every value live at the header.
    for &b in &shader.block_order {
        let Some(&last) = shader.blocks[b].instrs.last() else {
            continue;
        };
        for succ in shader.blocks[b].successors() {
            let Some(&head) = shader.blocks[succ].instrs.first() else {
                continue;
            };
            if pos[&head] < pos[&last] {
                for &v in &live_in[&succ] {
                    if let Some(r) = ranges.get_mut(&v) {
                        r.1 = r.1.max(pos[&last]);
                    }
                }
            }
        }
    }
    ranges
}

struct Allocator<'s, G> {
    shader: &'s mut Shader,
    /// Base half-slot of the allocatable region.
    base: u16,
    cap: u16,
    colors: HashMap<Value, u16>,
    ranges: HashMap<Value, (u32, u32)>,
    stats: RaStats,
    scratch_slot: u32,
    _gen: core::marker::PhantomData<G>,
}

impl<G: Generation> Allocator<'_, G> {
    fn overlaps(&self, a: Value, b: Value) -> bool {
        let (Some(&(s0, e0)), Some(&(s1, e1))) =
            (self.ranges.get(&a), self.ranges.get(&b))
        else {
            return false;
        };
        s0 <= e1 && s1 <= e0
    }

    /// Half-slots occupied by `v` at its current color.
    fn occupied(&self, v: Value) -> Option<core::ops::Range<u16>> {
        let &start = self.colors.get(&v)?;
        let need = value_need(self.shader, v);
        Some(start..start + need.unit * need.comps)
    }

    fn fits(&self, candidate: core::ops::Range<u16>, v: Value) -> bool {
        if candidate.end > self.cap {
            return false;
        }
        for (&other, _) in &self.colors {
            if other == v || !self.overlaps(v, other) {
                continue;
            }
            let occ = self.occupied(other).expect("colored");
            if candidate.start < occ.end && occ.start < candidate.end {
                return false;
            }
        }
        true
    }

    /// Picks a color for `v`, honoring a preferred start slot if given.
    fn color(&mut self, v: Value, prefer: Option<u16>) -> Option<u16> {
        let need = value_need(self.shader, v);
        let size = need.unit * need.comps;
        if let Some(p) = prefer {
            if self.fits(p..p + size, v) {
                self.colors.insert(v, p);
                return Some(p);
            }
        }
        let mut start = self.base;
        // Full-width values start on even half-slots.
        let align = need.unit;
        while start + size <= self.cap {
            if start % align == 0 && self.fits(start..start + size, v) {
                self.colors.insert(v, start);
                return Some(start);
            }
            start += 1;
        }
        None
    }

    /// Spills the colored value with the furthest interval end.
    fn spill_one(&mut self, exclude: Value) -> Result<()> {
        let victim = self
            .colors
            .keys()
            .copied()
            .filter(|&v| {
                v != exclude && value_need(self.shader, v).comps == 1
            })
            .max_by_key(|v| self.ranges.get(v).map(|r| r.1).unwrap_or(0))
            .ok_or_else(|| {
                CompileError::bug(BugCode::SpillCycle, "nothing left to spill")
            })?;
        let def = self.shader.def_of(victim).ok_or_else(|| {
            CompileError::bug(BugCode::SpillCycle, "spilling an undefined value")
        })?;
        let width = self.shader.width_of(victim);
        let slot = self.scratch_slot;
        self.scratch_slot += 1;

        // Store after the definition, reload before every use. The
        // scratch accesses order against each other like buffer traffic.
        let mut store = Instr::new(Opcode::StP);
        store.extra = InstrExtra::Mem(MemInfo {
            offset: slot as i32,
            binding: 0,
        });
        store.srcs.push(Src::ssa(victim, width));
        store.barrier_class = ember_asm::BarrierClass::BUFFER_W;
        store.barrier_conflict = store.barrier_class.default_conflict();
        let store_id = self.shader.insert_after(def, store);
        self.shader.keep(store_id);
        self.stats.spills += 1;

        // Phi sources stay put: they live at the predecessor's exit, not
        // at the phi, so a fill there would read the wrong block.
        let users: Vec<InstrId> = self
            .shader
            .instrs
            .ids()
            .filter(|&i| {
                i != store_id
                    && self.shader.instrs[i].block.is_some()
                    && !self.shader.instrs[i].is_phi()
                    && self.shader.instrs[i]
                        .srcs
                        .iter()
                        .any(|s| s.as_ssa() == Some(victim))
            })
            .collect();
        for user in users {
            let fresh = self.shader.new_value(width);
            let mut fill = Instr::new(Opcode::LdP);
            fill.extra = InstrExtra::Mem(MemInfo {
                offset: slot as i32,
                binding: 0,
            });
            fill.dsts.push(Dst::ssa(fresh, width));
            fill.barrier_class = ember_asm::BarrierClass::BUFFER_R;
            fill.barrier_conflict = ember_asm::BarrierClass::BUFFER_W;
            self.shader.insert_before(user, fill);
            for s in self.shader.instrs[user].srcs.iter_mut() {
                if s.as_ssa() == Some(victim) {
                    s.kind = SrcKind::Ssa(fresh);
                }
            }
            self.stats.fills += 1;
        }
        self.shader.recompute_use_counts();
        Ok(())
    }
}

fn reserved_base(shader: &Shader) -> u16 {
    // r0 (half slots 0..2) is the nesting counter's home once any
    // predicated control flow exists.
    let any_cf = shader.block_order.iter().any(|&b| {
        shader.blocks[b].instrs.iter().any(|&i| {
            matches!(
                shader.instrs[i].opcode,
                Opcode::PushExec | Opcode::PopExec | Opcode::IfICmp
            )
        })
    });
    if any_cf {
        2
    } else {
        0
    }
}

/// Runs allocation; rewrites all operands to physical form.
pub fn run<G: Generation>(shader: &mut Shader) -> Result<RaStats> {
    let span = tracing::debug_span!("ra").entered();
    if !G::MERGED_REGS {
        // Every shipped generation merges the files; the split-bank
        // conflict model never left the older compiler.
        return Err(CompileError::UnsupportedFeature(
            "separate half/full register files".into(),
        ));
    }
    let base = reserved_base(shader);
    // The top full register stays out of the allocatable region; phi
    // cycle resolution claims it as scratch.
    let cap = G::REG_FILE_SLOTS * 2 - 2;

    // Arrays take fixed contiguous ranges right after the reserve, bases
    // aligned to their element width.
    let mut array_base = base;
    for a in shader.arrays.ids().collect::<Vec<_>>() {
        let decl = &shader.arrays[a];
        let unit: u16 = if decl.half { 1 } else { 2 };
        let len = decl.len;
        array_base = array_base.next_multiple_of(unit);
        let start = array_base;
        array_base += unit * len;
        shader.arrays[a].base = Some(half_slot_to_reg(start, unit == 1));
    }

    let mut attempts = 0;
    let stats = loop {
        attempts += 1;
        if attempts > 8 {
            return Err(CompileError::ResourceExhausted(
                "register spill budget exceeded",
            ));
        }
        match try_allocate::<G>(shader, array_base, cap) {
            Ok(stats) => break stats,
            Err(RetryOrFail::Fail(e)) => return Err(e),
            Err(RetryOrFail::Retry) => continue,
        }
    };
    tracing::debug!(
        spills = stats.spills,
        fills = stats.fills,
        full = stats.full_slots,
        half = stats.half_slots,
        "allocation done"
    );
    drop(span);
    Ok(stats)
}

enum RetryOrFail {
    Retry,
    Fail(CompileError),
}

fn half_slot_to_reg(half_slot: u16, half: bool) -> PhysReg {
    if half {
        PhysReg::half(half_slot)
    } else {
        PhysReg::full(half_slot / 2)
    }
}

fn try_allocate<G: Generation>(
    shader: &mut Shader,
    base: u16,
    cap: u16,
) -> core::result::Result<RaStats, RetryOrFail> {
    let pos = positions(shader);
    let ranges = intervals(shader, &pos);
    let existing_spill_slots = shader
        .instrs
        .iter()
        .filter(|(_, i)| i.opcode == Opcode::StP && i.block.is_some())
        .count() as u32;
    let mut alloc = Allocator::<G> {
        shader,
        base,
        cap,
        colors: HashMap::new(),
        ranges,
        stats: RaStats::default(),
        scratch_slot: existing_spill_slots,
        _gen: core::marker::PhantomData,
    };

    // Precolor inputs at their arrival slots, in slot order after the
    // reserved region.
    let mut input_instrs: Vec<(u16, InstrId)> = Vec::new();
    for &b in &alloc.shader.block_order {
        for &i in &alloc.shader.blocks[b].instrs {
            if alloc.shader.instrs[i].opcode == Opcode::Input {
                if let InstrExtra::Input { slot } = alloc.shader.instrs[i].extra {
                    input_instrs.push((slot, i));
                }
            }
        }
    }
    input_instrs.sort_by_key(|(slot, _)| *slot);
    let mut next_input = base;
    for (_, i) in &input_instrs {
        let Some(v) = alloc.shader.instrs[*i].dsts[0].as_ssa() else {
            continue;
        };
        let need = value_need(alloc.shader, v);
        next_input = next_input.next_multiple_of(need.unit);
        alloc.colors.insert(v, next_input);
        next_input += need.unit * need.comps;
    }

    // Color remaining values in definition order; interval overlap is the
    // interference relation.
    let order: Vec<InstrId> = alloc
        .shader
        .block_order
        .iter()
        .flat_map(|&b| alloc.shader.blocks[b].instrs.clone())
        .collect();
    for &i in &order {
        let instr = alloc.shader.instrs[i].clone();
        for dst in &instr.dsts {
            let Some(v) = dst.as_ssa() else { continue };
            if alloc.colors.contains_key(&v) {
                continue;
            }
            let prefer = preferred_color(&alloc, &instr, v);
            if alloc.color(v, prefer).is_none() {
                if let Err(e) = alloc.spill_one(v) {
                    return Err(RetryOrFail::Fail(e));
                }
                return Err(RetryOrFail::Retry);
            }
        }
    }

    // Rewrite operands, resolve phis, then strip the phis.
    let colors = alloc.colors.clone();
    let mut stats = alloc.stats;
    let widths: HashMap<Value, Width> = colors
        .keys()
        .map(|&v| (v, alloc.shader.width_of(v)))
        .collect();
    let to_phys = |v: Value| -> Option<PhysReg> {
        let &slot = colors.get(&v)?;
        Some(half_slot_to_reg(slot, widths[&v] == Width::W16))
    };

    resolve_phis(alloc.shader, &to_phys, base, cap, &mut stats)
        .map_err(RetryOrFail::Fail)?;

    let ids: Vec<InstrId> = alloc.shader.instrs.ids().collect();
    for i in ids {
        if alloc.shader.instrs[i].block.is_none() {
            continue;
        }
        let array_bases: Vec<Option<PhysReg>> = alloc
            .shader
            .arrays
            .iter()
            .map(|(_, d)| d.base)
            .collect();
        let instr = &mut alloc.shader.instrs[i];
        for dst in instr.dsts.iter_mut() {
            match dst.kind {
                DstKind::Ssa(v) => {
                    if let Some(r) = to_phys(v) {
                        dst.kind = DstKind::Phys(r);
                    }
                }
                DstKind::Array { id, elem } => {
                    let b = array_bases[id.index()]
                        .expect("arrays precolored");
                    dst.kind = DstKind::Phys(b.offset(elem));
                }
                DstKind::Phys(_) => {}
            }
        }
        for src in instr.srcs.iter_mut() {
            match src.kind {
                SrcKind::Ssa(v) => {
                    if let Some(r) = to_phys(v) {
                        src.kind = SrcKind::Phys(r);
                    }
                }
                SrcKind::Array { id, elem } => {
                    let b = array_bases[id.index()]
                        .expect("arrays precolored");
                    src.kind = SrcKind::Phys(b.offset(elem));
                }
                _ => {}
            }
        }
    }

    // Usage statistics over the final assignment.
    let mut max_half = 0u16;
    let mut max_full = 0u16;
    for (&v, &slot) in &colors {
        let need = value_need(alloc.shader, v);
        let end = slot + need.unit * need.comps;
        if widths[&v] == Width::W16 {
            max_half = max_half.max(end);
        } else {
            max_full = max_full.max(end.div_ceil(2));
        }
    }
    stats.full_slots = max_full;
    stats.half_slots = max_half;
    Ok(stats)
}

/// Affinity hints: splits chase their group's component slot, phis chase
/// a source, tied atomics chase their data operand.
fn preferred_color<G: Generation>(
    alloc: &Allocator<'_, G>,
    instr: &Instr,
    v: Value,
) -> Option<u16> {
    match instr.opcode {
        Opcode::Split => {
            let InstrExtra::Split { comp } = instr.extra else {
                return None;
            };
            let group = instr.srcs[0].as_ssa()?;
            let base = *alloc.colors.get(&group)?;
            let unit = value_need(alloc.shader, group).unit;
            Some(base + unit * comp as u16)
        }
        Opcode::Phi => instr
            .srcs
            .iter()
            .filter_map(|s| s.as_ssa())
            .find_map(|s| alloc.colors.get(&s).copied()),
        op if op.is_atomic() => {
            // The hardware writes back through the data register.
            let data = instr.srcs.get(1)?.as_ssa()?;
            alloc.colors.get(&data).copied()
        }
        Opcode::Combine => {
            // Start the group where its first source already lives.
            let first = instr.srcs.first()?.as_ssa()?;
            alloc.colors.get(&first).copied()
        }
        _ => {
            let _ = v;
            None
        }
    }
}

/// Phi resolution: parallel moves at predecessor ends, cycles broken
/// through the top-of-file scratch slot.
fn resolve_phis(
    shader: &mut Shader,
    to_phys: &impl Fn(Value) -> Option<PhysReg>,
    _base: u16,
    cap: u16,
    stats: &mut RaStats,
) -> Result<()> {
    let blocks: Vec<BlockId> = shader.block_order.clone();
    for b in blocks {
        let phis: Vec<InstrId> = shader.blocks[b]
            .instrs
            .iter()
            .copied()
            .filter(|&i| shader.instrs[i].is_phi())
            .collect();
        if phis.is_empty() {
            continue;
        }
        // Gather per-predecessor move sets.
        let mut moves: HashMap<BlockId, Vec<(PhysReg, PhysReg, Width)>> =
            HashMap::new();
        for &phi in &phis {
            let instr = shader.instrs[phi].clone();
            let InstrExtra::Phi { preds } = &instr.extra else {
                return Err(CompileError::bug(
                    BugCode::MalformedStructure,
                    "phi without predecessor payload",
                ));
            };
            let dst_v = instr.dsts[0].as_ssa().ok_or_else(|| {
                CompileError::bug(BugCode::MalformedStructure, "phi without ssa dst")
            })?;
            let dst = to_phys(dst_v).ok_or_else(|| {
                CompileError::bug(BugCode::MalformedStructure, "uncolored phi")
            })?;
            for (slot, &pred) in preds.iter().enumerate() {
                let src_v = instr.srcs[slot].as_ssa().ok_or_else(|| {
                    CompileError::bug(
                        BugCode::MalformedStructure,
                        "phi source is not ssa",
                    )
                })?;
                let src = to_phys(src_v).ok_or_else(|| {
                    CompileError::bug(
                        BugCode::MalformedStructure,
                        "uncolored phi source",
                    )
                })?;
                if src != dst {
                    moves.entry(pred).or_default().push((
                        dst,
                        src,
                        instr.dsts[0].width,
                    ));
                }
            }
        }
        for (pred, mut set) in moves {
            emit_parallel_moves(shader, pred, &mut set, cap, stats)?;
        }
        for phi in phis {
            shader.remove(phi);
        }
    }
    Ok(())
}

fn emit_parallel_moves(
    shader: &mut Shader,
    pred: BlockId,
    set: &mut Vec<(PhysReg, PhysReg, Width)>,
    cap: u16,
    stats: &mut RaStats,
) -> Result<()> {
    let _ = stats;
    // Insertion point: before the trailing control flow of the block.
    let insert_at = {
        let instrs = &shader.blocks[pred].instrs;
        instrs
            .iter()
            .position(|&i| {
                let op = shader.instrs[i].opcode;
                op.is_flow() || op == Opcode::LogicalEnd
            })
            .unwrap_or(instrs.len())
    };
    let mut emitted: Vec<Instr> = Vec::new();
    let mut guard = 0;
    while !set.is_empty() {
        guard += 1;
        if guard > 4 * (set.len() + 4) {
            return Err(CompileError::bug(
                BugCode::SpillCycle,
                "parallel move resolution does not converge",
            ));
        }
        // Emit any move whose destination is not also a pending source.
        if let Some(idx) = set
            .iter()
            .position(|(dst, _, _)| !set.iter().any(|(_, s, _)| s == dst))
        {
            let (dst, src, width) = set.remove(idx);
            emitted.push(reg_mov(dst, src, width));
            continue;
        }
        // A cycle: rotate through the scratch register reserved above the
        // allocatable region.
        let (dst, src, width) = set.remove(0);
        let scratch = PhysReg::full(cap / 2);
        emitted.push(reg_mov(scratch, src, width));
        for entry in set.iter_mut() {
            if entry.1 == src {
                entry.1 = scratch;
            }
        }
        set.push((dst, scratch, width));
    }
    for (k, instr) in emitted.into_iter().enumerate() {
        let at = insert_at + k;
        let id = shader.instrs.alloc(instr);
        shader.instrs[id].block = Some(pred);
        shader.blocks[pred].instrs.insert(at, id);
    }
    Ok(())
}

fn reg_mov(dst: PhysReg, src: PhysReg, width: Width) -> Instr {
    let mut m = Instr::new(Opcode::Mov);
    m.dsts.push(Dst {
        kind: DstKind::Phys(dst),
        width,
        wrmask: 1,
    });
    m.srcs.push(Src {
        kind: SrcKind::Phys(src),
        width,
        mods: ember_asm::SrcMods::empty(),
    });
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Gen7;
    use ember_asm::Stage;

    fn mov_imm(shader: &mut Shader, b: BlockId, w: Width) -> Value {
        let v = shader.new_value(w);
        let mut i = Instr::new(Opcode::Mov);
        i.dsts.push(Dst::ssa(v, w));
        i.srcs.push(Src::imm(ember_ir::Imm::uint(1), w));
        shader.append(b, i);
        v
    }

    #[test]
    fn values_with_overlapping_lives_get_distinct_registers() {
        let mut s = Shader::new(Stage::Compute);
        let b = s.new_block();
        let a = mov_imm(&mut s, b, Width::W32);
        let c = mov_imm(&mut s, b, Width::W32);
        let d = s.new_value(Width::W32);
        let mut add = Instr::new(Opcode::IAdd);
        add.dsts.push(Dst::ssa(d, Width::W32));
        add.srcs.push(Src::ssa(a, Width::W32));
        add.srcs.push(Src::ssa(c, Width::W32));
        s.append(b, add);
        let mut end = Instr::new(Opcode::End);
        end.srcs.push(Src::ssa(d, Width::W32));
        let e = s.append(b, end);
        s.keep(e);

        run::<Gen7>(&mut s).unwrap();
        let instrs = s.block_instrs(b);
        let r0 = s.instrs[instrs[0]].dsts[0].as_phys().unwrap();
        let r1 = s.instrs[instrs[1]].dsts[0].as_phys().unwrap();
        assert_ne!(r0, r1);
    }

    #[test]
    fn merged_file_full_register_blocks_its_halves() {
        let mut s = Shader::new(Stage::Compute);
        let b = s.new_block();
        let full = mov_imm(&mut s, b, Width::W32);
        let half = mov_imm(&mut s, b, Width::W16);
        let d = s.new_value(Width::W32);
        let mut add = Instr::new(Opcode::IAdd);
        add.dsts.push(Dst::ssa(d, Width::W32));
        add.srcs.push(Src::ssa(full, Width::W32));
        add.srcs.push(Src::ssa(full, Width::W32));
        s.append(b, add);
        let mut end = Instr::new(Opcode::End);
        end.srcs.push(Src::ssa(d, Width::W32));
        end.srcs.push(Src::ssa(half, Width::W16));
        let e = s.append(b, end);
        s.keep(e);

        run::<Gen7>(&mut s).unwrap();
        let instrs = s.block_instrs(b);
        let rf = s.instrs[instrs[0]].dsts[0].as_phys().unwrap();
        let rh = s.instrs[instrs[1]].dsts[0].as_phys().unwrap();
        // The half slot does not alias either half of the full register.
        assert!(rh.num() / 2 != rf.num() || rh.is_half() == rf.is_half());
        assert!(rh.is_half());
        assert!(!rf.is_half());
        assert_ne!(rh.num() / 2, rf.num());
    }
}
