//! Basic blocks.

use crate::{BlockId, InstrId};
use smallvec::SmallVec;

/// A basic block: an ordered instruction list plus control-flow edges.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Block {
    /// Instructions in program order.
    pub instrs: Vec<InstrId>,
    /// Successor edges; at most two.
    pub successors: [Option<BlockId>; 2],
    /// Predecessor edges.
    pub predecessors: SmallVec<[BlockId; 4]>,
    /// The instruction whose result drives the terminator, if conditional.
    pub condition: Option<InstrId>,
    /// Set once the block ends in an unconditional jump; inhibits further
    /// successor appends.
    pub unconditional_jump: bool,
}

impl Block {
    /// An empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a successor edge unless the block already jumped away.
    pub fn add_successor(&mut self, target: BlockId) {
        if self.unconditional_jump {
            return;
        }
        if self.successors[0].is_none() {
            self.successors[0] = Some(target);
        } else if self.successors[1].is_none() && self.successors[0] != Some(target) {
            self.successors[1] = Some(target);
        }
    }

    /// Successors in edge order.
    pub fn successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.successors.iter().flatten().copied()
    }

    /// The last instruction, if any.
    pub fn last_instr(&self) -> Option<InstrId> {
        self.instrs.last().copied()
    }
}
