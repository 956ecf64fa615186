//! Register arrays.

use crate::InstrId;
use ember_asm::PhysReg;

/// A contiguous register range indexable at runtime.
///
/// Arrays from different declarations never alias; the allocator assigns
/// each a fixed base before coloring.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArrayDecl {
    /// Length in registers.
    pub len: u16,
    /// Whether elements are half width.
    pub half: bool,
    /// Most recent write; reads and writes of the same array order
    /// against it.
    pub last_write: Option<InstrId>,
    /// Base register assigned before coloring.
    pub base: Option<PhysReg>,
}

impl ArrayDecl {
    /// A fresh array of `len` registers.
    pub fn new(len: u16, half: bool) -> Self {
        Self {
            len,
            half,
            last_write: None,
            base: None,
        }
    }
}
