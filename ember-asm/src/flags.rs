//! Instruction flags, source modifiers and memory-ordering classes.

use bitflags::bitflags;

bitflags! {
    /// Per-instruction execution flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct InstrFlags: u16 {
        /// Stall until outstanding scalar (SFU) results retire.
        const SS = 1 << 0;
        /// Stall until outstanding texture/memory results retire.
        const SY = 1 << 1;
        /// Saturate the destination to `[0, 1]`.
        const SAT = 1 << 2;
        /// Marks the last consumer of shader inputs; releases varying storage.
        const EI = 1 << 3;
        /// The instruction may demote its invocation.
        const KILL = 1 << 4;
        /// The result additionally feeds the predicate register.
        const PRED_WRITE = 1 << 5;
    }
}

bitflags! {
    /// Source operand modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct SrcMods: u8 {
        /// Absolute value applied before use.
        const ABS = 1 << 0;
        /// Negation applied before use (after `ABS` when both are set).
        const NEG = 1 << 1;
        /// Bitwise complement applied before use.
        const NOT = 1 << 2;
        /// Per-iteration register advance inside a repeat group.
        const R = 1 << 3;
        /// Source is addressed relative to the indirect address register.
        const RELATIVE = 1 << 4;
    }
}

bitflags! {
    /// Memory-ordering classes.
    ///
    /// A scheduler edge is added from `a` to `b` iff
    /// `a.barrier_class & b.barrier_conflict` is non-empty.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct BarrierClass: u16 {
        /// Shared-memory read.
        const SHARED_R = 1 << 0;
        /// Shared-memory write.
        const SHARED_W = 1 << 1;
        /// Image read.
        const IMAGE_R = 1 << 2;
        /// Image write.
        const IMAGE_W = 1 << 3;
        /// Storage-buffer read.
        const BUFFER_R = 1 << 4;
        /// Storage-buffer write.
        const BUFFER_W = 1 << 5;
        /// Register-array read.
        const ARRAY_R = 1 << 6;
        /// Register-array write.
        const ARRAY_W = 1 << 7;
        /// Depends on the invocation still being active (not demoted).
        const ACTIVE_FRAGMENT = 1 << 8;
        /// Orders against every class.
        const EVERYTHING = 0x1ff;
    }
}

impl BarrierClass {
    /// Classes a fence with these classes must not be reordered past.
    ///
    /// Reads conflict with writes of the same space; writes conflict with
    /// both reads and writes.
    pub fn default_conflict(self) -> Self {
        let mut conflict = Self::empty();
        if self.intersects(Self::SHARED_R) {
            conflict |= Self::SHARED_W;
        }
        if self.intersects(Self::SHARED_W) {
            conflict |= Self::SHARED_R | Self::SHARED_W;
        }
        if self.intersects(Self::IMAGE_R) {
            conflict |= Self::IMAGE_W;
        }
        if self.intersects(Self::IMAGE_W) {
            conflict |= Self::IMAGE_R | Self::IMAGE_W;
        }
        if self.intersects(Self::BUFFER_R) {
            conflict |= Self::BUFFER_W;
        }
        if self.intersects(Self::BUFFER_W) {
            conflict |= Self::BUFFER_R | Self::BUFFER_W;
        }
        if self.intersects(Self::ARRAY_R) {
            conflict |= Self::ARRAY_W;
        }
        if self.intersects(Self::ARRAY_W) {
            conflict |= Self::ARRAY_R | Self::ARRAY_W;
        }
        conflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everything_covers_all_classes() {
        let all = BarrierClass::SHARED_R
            | BarrierClass::SHARED_W
            | BarrierClass::IMAGE_R
            | BarrierClass::IMAGE_W
            | BarrierClass::BUFFER_R
            | BarrierClass::BUFFER_W
            | BarrierClass::ARRAY_R
            | BarrierClass::ARRAY_W
            | BarrierClass::ACTIVE_FRAGMENT;
        assert_eq!(all, BarrierClass::EVERYTHING);
    }

    #[test]
    fn write_classes_conflict_with_reads_and_writes() {
        let c = BarrierClass::BUFFER_W.default_conflict();
        assert!(c.contains(BarrierClass::BUFFER_R | BarrierClass::BUFFER_W));
        assert!(!c.intersects(BarrierClass::SHARED_R | BarrierClass::SHARED_W));
    }
}
