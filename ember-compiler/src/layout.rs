//! Const-file layout policy.
//!
//! The const file is carved front-to-back: driver params, stream-out
//! addresses (vertex stages), UBO base pointers, SSBO sizes, image
//! dimensions, then promoted UBO ranges, preamble results, and finally
//! the immediate pool. The UBO promotion budget is computed against what
//! the leading regions leave over.

use crate::hir::{HirOp, HirShader};
use ember_asm::Stage;
use ember_ir::ConstRegion;

/// Vec4 slots reserved for driver params (vertex-id base, first vertex,
/// tess bases, local group size, the texture array-size table).
pub(crate) const DRIVER_PARAMS_VEC4: u16 = 4;

/// Vec4 slots reserved for stream-out buffer addresses on vertex stages.
pub(crate) const STREAM_OUT_VEC4: u16 = 2;

/// Vec4 slots held back for the immediate pool.
pub(crate) const IMMEDIATE_RESERVE_VEC4: u16 = 16;

/// The leading const-file regions, all in vec4 units.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LeadingRegions {
    pub driver_params: ConstRegion,
    pub stream_out: ConstRegion,
    pub ubo_bases: ConstRegion,
    pub ssbo_sizes: ConstRegion,
    pub image_dims: ConstRegion,
}

impl LeadingRegions {
    /// First vec4 past every leading region.
    pub fn end(&self) -> u16 {
        [
            self.driver_params,
            self.stream_out,
            self.ubo_bases,
            self.ssbo_sizes,
            self.image_dims,
        ]
        .iter()
        .map(ConstRegion::end)
        .max()
        .unwrap_or(0)
    }
}

fn max_binding(counts: impl Iterator<Item = u8>) -> u16 {
    counts.map(|b| b as u16 + 1).max().unwrap_or(0)
}

/// Computes the leading regions for a shader.
pub(crate) fn leading_regions(hir: &HirShader) -> LeadingRegions {
    let mut next = DRIVER_PARAMS_VEC4;
    let mut regions = LeadingRegions {
        driver_params: ConstRegion {
            offset: 0,
            len: DRIVER_PARAMS_VEC4,
        },
        ..LeadingRegions::default()
    };
    if hir.stage == Stage::Vertex {
        regions.stream_out = ConstRegion {
            offset: next,
            len: STREAM_OUT_VEC4,
        };
        next += STREAM_OUT_VEC4;
    }
    // One pointer (two words) per declared UBO.
    let ubos = hir.ubo_sizes.len() as u16;
    if ubos > 0 {
        let len = (ubos * 2).div_ceil(4);
        regions.ubo_bases = ConstRegion { offset: next, len };
        next += len;
    }
    // One size word per referenced SSBO.
    let ssbos = max_binding(hir.instrs.iter().filter_map(|i| match i.op {
        HirOp::LoadSsbo { binding, .. }
        | HirOp::StoreSsbo { binding, .. }
        | HirOp::SsboAtomic { binding, .. } => Some(binding),
        _ => None,
    }));
    if ssbos > 0 {
        let len = ssbos.div_ceil(4);
        regions.ssbo_sizes = ConstRegion { offset: next, len };
        next += len;
    }
    // Three dimension words per referenced image.
    let images = max_binding(hir.instrs.iter().filter_map(|i| match i.op {
        HirOp::ImageLoad { image }
        | HirOp::ImageStore { image }
        | HirOp::ImageAtomic { image, .. } => Some(image),
        _ => None,
    }));
    if images > 0 {
        let len = (images * 3).div_ceil(4);
        regions.image_dims = ConstRegion { offset: next, len };
    }
    regions
}

/// First vec4 available to promoted UBO ranges.
pub(crate) fn reserved_vec4(hir: &HirShader) -> u16 {
    leading_regions(hir).end()
}
