//! IR instructions.

use crate::{BlockId, Dst, InstrId, Src};
use ember_asm::{
    BarrierClass,
    CmpCond,
    ConvKind,
    InstrFlags,
    Opcode,
    TexOffset,
    Width,
};
use smallvec::SmallVec;

/// Texture operand payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TexInfo {
    /// Texture binding index.
    pub tex: u8,
    /// Sampler binding index.
    pub samp: u8,
    /// Static texel offset.
    pub offset: TexOffset,
    /// Whether the last coordinate component is an array layer.
    pub array: bool,
    /// Result component count.
    pub comps: u8,
}

/// Memory operand payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemInfo {
    /// Immediate element offset folded into the access.
    pub offset: i32,
    /// Buffer or image binding index.
    pub binding: u8,
}

/// Payloads that only some opcodes carry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InstrExtra {
    /// No payload.
    #[default]
    None,
    /// Branch target block.
    Branch {
        /// Target of the jump.
        target: BlockId,
    },
    /// Execution-mask stack depth for `push.exec` / `pop.exec`.
    Exec {
        /// Number of mask levels.
        levels: u8,
    },
    /// Conversion descriptor for `cov`.
    Conv {
        /// Conversion kind.
        kind: ConvKind,
        /// Source width.
        src: Width,
        /// Destination width.
        dst: Width,
    },
    /// Texture payload.
    Tex(TexInfo),
    /// Memory payload.
    Mem(MemInfo),
    /// Fence ordering classes.
    Fence {
        /// Classes the fence orders against.
        classes: BarrierClass,
    },
    /// Shader input payload: the input slot this value arrives in.
    Input {
        /// Driver-assigned input slot.
        slot: u16,
    },
    /// Component selector of a `split` pseudo-instruction.
    Split {
        /// Extracted component of the grouped source.
        comp: u8,
    },
    /// Phi payload: one source per predecessor, in predecessor order.
    Phi {
        /// Predecessor blocks, parallel to the instruction's sources.
        preds: SmallVec<[BlockId; 2]>,
    },
}

/// A single IR instruction.
///
/// Instructions are arena-allocated; detaching one from its block leaves
/// the slot alive until the shader is dropped, so indices held by other
/// passes never dangle.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instr {
    /// Operation selector.
    pub opcode: Opcode,
    /// Destinations; empty for stores and control flow.
    pub dsts: SmallVec<[Dst; 1]>,
    /// Sources.
    pub srcs: SmallVec<[Src; 3]>,
    /// Repeat count; the instruction issues `repeat + 1` times over
    /// successive registers.
    pub repeat: u8,
    /// Execution flags.
    pub flags: InstrFlags,
    /// Comparison condition for opcodes that carry one.
    pub cond: Option<CmpCond>,
    /// Opcode-specific payload.
    pub extra: InstrExtra,
    /// Ordering classes this instruction belongs to.
    pub barrier_class: BarrierClass,
    /// Classes this instruction must not be reordered past.
    pub barrier_conflict: BarrierClass,
    /// The instruction producing the indirect address this one consumes.
    pub address: Option<InstrId>,
    /// Extra scheduling-order edges declared by passes.
    pub deps: SmallVec<[InstrId; 2]>,
    /// Owning block; `None` once detached.
    pub block: Option<BlockId>,
    /// Instruction position assigned by the post-RA scheduler; used for
    /// latency distances.
    pub ip: u32,
}

impl Instr {
    /// A fresh instruction with no operands.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            dsts: SmallVec::new(),
            srcs: SmallVec::new(),
            repeat: 0,
            flags: InstrFlags::empty(),
            cond: None,
            extra: InstrExtra::None,
            barrier_class: BarrierClass::empty(),
            barrier_conflict: BarrierClass::empty(),
            address: None,
            deps: SmallVec::new(),
            block: None,
            ip: 0,
        }
    }

    /// The single destination, if the instruction has exactly one.
    pub fn dst(&self) -> Option<&Dst> {
        match self.dsts.as_slice() {
            [d] => Some(d),
            _ => None,
        }
    }

    /// Whether this instruction may never be eliminated.
    pub fn has_side_effects(&self) -> bool {
        self.opcode.has_side_effects()
            || self.flags.contains(InstrFlags::PRED_WRITE)
            || !self.barrier_class.is_empty() && self.opcode.is_store()
    }

    /// Whether this is an SSA merge.
    pub fn is_phi(&self) -> bool {
        self.opcode == Opcode::Phi
    }

    /// Whether this is one of the pseudo grouping ops resolved after
    /// allocation.
    pub fn is_shuffle(&self) -> bool {
        matches!(self.opcode, Opcode::Split | Opcode::Combine)
    }
}
