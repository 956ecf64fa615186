//! The per-compilation IR container.

use crate::{
    Arena,
    ArrayDecl,
    ArrayId,
    Block,
    BlockId,
    Dst,
    DstKind,
    Instr,
    InstrId,
    Src,
    SrcKind,
    Value,
};
use ember_asm::{Stage, Width};

/// One planned const-file upload of a UBO range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UboUpload {
    /// Source UBO binding.
    pub ubo: u8,
    /// Inclusive start byte offset, 16-byte aligned.
    pub start: u32,
    /// Exclusive end byte offset, 16-byte aligned.
    pub end: u32,
    /// Destination const-file offset in vec4 units.
    pub const_vec4: u16,
}

impl UboUpload {
    /// Upload size in bytes.
    pub fn size(&self) -> u32 {
        self.end - self.start
    }
}

/// One region of the const file, in vec4 units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstRegion {
    /// Region offset.
    pub offset: u16,
    /// Region length.
    pub len: u16,
}

impl ConstRegion {
    /// Whether the region is allocated.
    pub fn is_present(&self) -> bool {
        self.len != 0
    }

    /// First vec4 past the region.
    pub fn end(&self) -> u16 {
        self.offset + self.len
    }
}

/// Const-file layout and pools accumulated during compilation.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstState {
    /// Reserved system-value slots.
    pub driver_params: ConstRegion,
    /// Base pointers of UBOs that were not promoted.
    pub ubo_bases: ConstRegion,
    /// Storage-buffer size words.
    pub ssbo_sizes: ConstRegion,
    /// Image dimension words.
    pub image_dims: ConstRegion,
    /// Stream-out buffer addresses.
    pub stream_out: ConstRegion,
    /// Deduplicated immediate words.
    pub immediates: ConstRegion,
    /// Immediate pool contents, in emission order.
    pub imm_pool: Vec<u32>,
    /// Planned UBO uploads.
    pub ubo_uploads: Vec<UboUpload>,
}

impl ConstState {
    /// Interns `word` into the immediate pool, returning its scalar slot
    /// relative to the immediates region base.
    pub fn intern_imm(&mut self, word: u32) -> u16 {
        if let Some(pos) = self.imm_pool.iter().position(|&w| w == word) {
            return pos as u16;
        }
        self.imm_pool.push(word);
        (self.imm_pool.len() - 1) as u16
    }

    /// Total vec4 count consumed by every allocated region.
    pub fn total_vec4(&self) -> u16 {
        [
            self.driver_params,
            self.ubo_bases,
            self.ssbo_sizes,
            self.image_dims,
            self.stream_out,
            self.immediates,
        ]
        .iter()
        .map(ConstRegion::end)
        .max()
        .unwrap_or(0)
        .max(
            self.ubo_uploads
                .iter()
                .map(|u| u.const_vec4 + (u.size() as u16).div_ceil(16))
                .max()
                .unwrap_or(0),
        )
    }
}

/// A complete shader in LIR form.
///
/// All nodes live in arenas owned here; detaching an instruction from its
/// block never frees it (removal is idempotent), and ids stay valid until
/// the shader is dropped.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Shader {
    /// Shader stage.
    pub stage: Stage,
    /// Instruction arena.
    pub instrs: Arena<InstrId, Instr>,
    /// Block arena.
    pub blocks: Arena<BlockId, Block>,
    /// Blocks in layout order.
    pub block_order: Vec<BlockId>,
    /// Register arrays.
    pub arrays: Arena<ArrayId, ArrayDecl>,
    /// Const-file state.
    pub consts: ConstState,
    /// Instructions pinned against elimination for their side effects.
    pub keeps: Vec<InstrId>,
    /// Instructions whose results feed the predicate register.
    pub predicates: Vec<InstrId>,
    defs: Vec<Option<InstrId>>,
    widths: Vec<Width>,
    use_counts: Vec<u32>,
}

impl Shader {
    /// An empty shader for `stage`.
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            instrs: Arena::new(),
            blocks: Arena::new(),
            block_order: Vec::new(),
            arrays: Arena::new(),
            consts: ConstState::default(),
            keeps: Vec::new(),
            predicates: Vec::new(),
            defs: Vec::new(),
            widths: Vec::new(),
            use_counts: Vec::new(),
        }
    }

    /// Creates a block and appends it to the layout order.
    pub fn new_block(&mut self) -> BlockId {
        let id = self.blocks.alloc(Block::new());
        self.block_order.push(id);
        id
    }

    /// Allocates a fresh SSA value of the given width.
    pub fn new_value(&mut self, width: Width) -> Value {
        let v = Value::new(self.defs.len() as u32);
        self.defs.push(None);
        self.widths.push(width);
        self.use_counts.push(0);
        v
    }

    /// Number of SSA values allocated.
    pub fn value_count(&self) -> usize {
        self.defs.len()
    }

    /// Declared width of a value.
    pub fn width_of(&self, value: Value) -> Width {
        self.widths[value.index()]
    }

    /// The instruction defining `value`, if any.
    pub fn def_of(&self, value: Value) -> Option<InstrId> {
        self.defs[value.index()]
    }

    /// Current use count of `value`.
    pub fn use_count(&self, value: Value) -> u32 {
        self.use_counts[value.index()]
    }

    /// Appends `instr` to the end of `block`.
    pub fn append(&mut self, block: BlockId, instr: Instr) -> InstrId {
        let id = self.attach(block, instr);
        self.blocks[block].instrs.push(id);
        id
    }

    /// Inserts `instr` immediately before `anchor` in the anchor's block.
    pub fn insert_before(&mut self, anchor: InstrId, instr: Instr) -> InstrId {
        let block = self.instrs[anchor].block.expect("anchor is attached");
        let id = self.attach(block, instr);
        let list = &mut self.blocks[block].instrs;
        let pos = list
            .iter()
            .position(|&i| i == anchor)
            .expect("anchor is listed");
        list.insert(pos, id);
        id
    }

    /// Inserts `instr` immediately after `anchor` in the anchor's block.
    pub fn insert_after(&mut self, anchor: InstrId, instr: Instr) -> InstrId {
        let block = self.instrs[anchor].block.expect("anchor is attached");
        let id = self.attach(block, instr);
        let list = &mut self.blocks[block].instrs;
        let pos = list
            .iter()
            .position(|&i| i == anchor)
            .expect("anchor is listed");
        list.insert(pos + 1, id);
        id
    }

    fn attach(&mut self, block: BlockId, mut instr: Instr) -> InstrId {
        instr.block = Some(block);
        let id = self.instrs.alloc(instr);
        for slot in 0..self.instrs[id].dsts.len() {
            if let DstKind::Ssa(v) = self.instrs[id].dsts[slot].kind {
                debug_assert!(self.defs[v.index()].is_none(), "{v} defined twice");
                self.defs[v.index()] = Some(id);
            }
        }
        for slot in 0..self.instrs[id].srcs.len() {
            if let SrcKind::Ssa(v) = self.instrs[id].srcs[slot].kind {
                self.use_counts[v.index()] += 1;
            }
        }
        id
    }

    /// Detaches `instr` from its block. Idempotent; the arena slot stays
    /// alive and indices held elsewhere never dangle.
    pub fn remove(&mut self, instr: InstrId) {
        let Some(block) = self.instrs[instr].block.take() else {
            return;
        };
        self.blocks[block].instrs.retain(|&i| i != instr);
        for slot in 0..self.instrs[instr].srcs.len() {
            if let SrcKind::Ssa(v) = self.instrs[instr].srcs[slot].kind {
                self.use_counts[v.index()] =
                    self.use_counts[v.index()].saturating_sub(1);
            }
        }
        for slot in 0..self.instrs[instr].dsts.len() {
            if let DstKind::Ssa(v) = self.instrs[instr].dsts[slot].kind {
                if self.defs[v.index()] == Some(instr) {
                    self.defs[v.index()] = None;
                }
            }
        }
    }

    /// Rewrites every use of `value` to `replacement`, preserving each
    /// site's modifiers by composing them over the replacement's.
    pub fn replace_uses(&mut self, value: Value, replacement: Src) {
        let mut delta = 0u32;
        for id in self.instrs.ids().collect::<Vec<_>>() {
            if self.instrs[id].block.is_none() {
                continue;
            }
            for slot in 0..self.instrs[id].srcs.len() {
                let src = self.instrs[id].srcs[slot];
                if src.as_ssa() != Some(value) {
                    continue;
                }
                let mut new = replacement;
                new.mods |= src.mods;
                self.instrs[id].srcs[slot] = new;
                delta += 1;
                if let SrcKind::Ssa(nv) = new.kind {
                    self.use_counts[nv.index()] += 1;
                }
            }
        }
        self.use_counts[value.index()] =
            self.use_counts[value.index()].saturating_sub(delta);
    }

    /// Recomputes every use count from attached instructions.
    pub fn recompute_use_counts(&mut self) {
        self.use_counts.iter_mut().for_each(|c| *c = 0);
        let ids: Vec<_> = self.instrs.ids().collect();
        for id in ids {
            if self.instrs[id].block.is_none() {
                continue;
            }
            for slot in 0..self.instrs[id].srcs.len() {
                if let SrcKind::Ssa(v) = self.instrs[id].srcs[slot].kind {
                    self.use_counts[v.index()] += 1;
                }
            }
        }
    }

    /// Marks an instruction as observable; it survives elimination.
    pub fn keep(&mut self, instr: InstrId) {
        if !self.keeps.contains(&instr) {
            self.keeps.push(instr);
        }
    }

    /// Whether the instruction is pinned by a keep.
    pub fn is_kept(&self, instr: InstrId) -> bool {
        self.keeps.contains(&instr)
    }

    /// Attached instructions of `block`, snapshot at call time.
    ///
    /// The snapshot tolerates removal of the current instruction during
    /// iteration; instructions inserted earlier than the cursor are not
    /// revisited.
    pub fn block_instrs(&self, block: BlockId) -> Vec<InstrId> {
        self.blocks[block].instrs.clone()
    }

    /// Total number of attached instructions.
    pub fn instr_count(&self) -> usize {
        self.block_order
            .iter()
            .map(|&b| self.blocks[b].instrs.len())
            .sum()
    }
}

/// An array declaration helper.
impl Shader {
    /// Declares a register array.
    pub fn new_array(&mut self, len: u16, half: bool) -> ArrayId {
        self.arrays.alloc(ArrayDecl::new(len, half))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_asm::Opcode;

    #[test]
    fn removal_is_idempotent() {
        let mut s = Shader::new(Stage::Compute);
        let b = s.new_block();
        let v = s.new_value(Width::W32);
        let mut i = Instr::new(Opcode::Mov);
        i.dsts.push(Dst::ssa(v, Width::W32));
        let id = s.append(b, i);
        assert_eq!(s.def_of(v), Some(id));
        s.remove(id);
        s.remove(id);
        assert_eq!(s.def_of(v), None);
        assert!(s.blocks[b].instrs.is_empty());
    }

    #[test]
    fn use_counts_track_replacement() {
        let mut s = Shader::new(Stage::Compute);
        let b = s.new_block();
        let a = s.new_value(Width::W32);
        let c = s.new_value(Width::W32);
        let mut def = Instr::new(Opcode::Mov);
        def.dsts.push(Dst::ssa(a, Width::W32));
        s.append(b, def);
        let mut user = Instr::new(Opcode::IAdd);
        let d = s.new_value(Width::W32);
        user.dsts.push(Dst::ssa(d, Width::W32));
        user.srcs.push(Src::ssa(a, Width::W32));
        user.srcs.push(Src::ssa(a, Width::W32));
        s.append(b, user);
        assert_eq!(s.use_count(a), 2);
        s.replace_uses(a, Src::ssa(c, Width::W32));
        assert_eq!(s.use_count(a), 0);
        assert_eq!(s.use_count(c), 2);
    }
}
