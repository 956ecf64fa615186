//! UBO range analysis and const-file promotion.
//!
//! Constant-offset UBO loads are collected into aligned byte ranges,
//! neighbors merge, and the surviving ranges — up to the const-file
//! budget left after the driver-param and stream-out reservations — are
//! planned as one-time uploads. Each covered load then reads the const
//! file directly and the UBO pointer never materializes at runtime.

use crate::error::Result;
use crate::generation::Generation;
use crate::hir::{HirOp, HirShader};
use crate::layout;
use ember_ir::UboUpload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Range {
    ubo: u8,
    start: u32,
    end: u32,
}

fn load_range<G: Generation>(shader: &HirShader, id: usize) -> Option<Range> {
    let instr = &shader.instrs[id];
    let HirOp::LoadUbo { ubo } = instr.op else {
        return None;
    };
    let offset = shader.as_const_u32(instr.srcs[0])?;
    let size = instr.ty.comps as u32 * instr.ty.bits as u32 / 8;
    let align = G::CONST_UPLOAD_UNIT * 16;
    Some(Range {
        ubo,
        start: offset / align * align,
        end: (offset + size).div_ceil(align) * align,
    })
}

fn merge_neighbors(ranges: &mut Vec<Range>) {
    ranges.sort_by_key(|r| (r.ubo, r.start));
    let mut merged: Vec<Range> = Vec::with_capacity(ranges.len());
    for r in ranges.drain(..) {
        match merged.last_mut() {
            Some(last) if last.ubo == r.ubo && r.start <= last.end => {
                last.end = last.end.max(r.end);
            }
            _ => merged.push(r),
        }
    }
    *ranges = merged;
}

pub(crate) fn run<G: Generation>(shader: &mut HirShader) -> Result<()> {
    if crate::context::debug_flags()
        .contains(crate::context::DebugFlags::NO_UBO_TO_CONST)
    {
        return Ok(());
    }
    let mut ranges = Vec::new();
    for id in 0..shader.instrs.len() {
        if let Some(r) = load_range::<G>(shader, id) {
            ranges.push(r);
        }
    }
    merge_neighbors(&mut ranges);

    // Budget: whatever the reserved regions left of the const file,
    // re-checked per range so a late overflow drops the range instead of
    // failing the compile.
    let base_vec4 = layout::reserved_vec4(shader);
    let mut next_vec4 = base_vec4;
    let cap_vec4 = G::MAX_CONST as u16 - layout::IMMEDIATE_RESERVE_VEC4;
    let mut plan: Vec<UboUpload> = Vec::new();
    for r in ranges {
        let size_vec4 = ((r.end - r.start) / 16) as u16;
        let aligned = next_vec4.next_multiple_of(G::CONST_UPLOAD_UNIT as u16);
        if aligned + size_vec4 > cap_vec4 {
            tracing::debug!(ubo = r.ubo, start = r.start, end = r.end, "range dropped");
            continue;
        }
        plan.push(UboUpload {
            ubo: r.ubo,
            start: r.start,
            end: r.end,
            const_vec4: aligned,
        });
        next_vec4 = aligned + size_vec4;
    }

    // Rewrite covered loads.
    let mut promoted = 0usize;
    super::map_instrs(shader, &mut |shader, id| {
        let Some(r) = load_range::<G>(shader, id.index()) else {
            return Ok(super::Prepend::new());
        };
        let offset = shader
            .as_const_u32(shader.instrs[id.index()].srcs[0])
            .expect("range implies const offset");
        if let Some(upload) = plan.iter().find(|u| {
            u.ubo == r.ubo && r.start >= u.start && r.end <= u.end
        }) {
            let word = upload.const_vec4 * 4 + ((offset - upload.start) / 4) as u16;
            let instr = shader.instr_mut(id);
            instr.op = HirOp::LoadConstFile { word };
            instr.srcs.clear();
            promoted += 1;
        }
        Ok(super::Prepend::new())
    })?;
    tracing::debug!(uploads = plan.len(), promoted, "ubo ranges planned");
    shader.ubo_uploads = plan;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Gen6;
    use crate::hir::{HirBuilder, HirType, ScalarBase};
    use ember_asm::Stage;

    #[test]
    fn neighboring_vec4_loads_merge_into_one_upload() {
        let vec4 = HirType::vector(ScalarBase::Float, 32, 4);
        let mut b = HirBuilder::new(Stage::Compute);
        b.declare_ubo(256);
        let mut loads = Vec::new();
        for k in 1..4u32 {
            let off = b.const_u32(16 * k);
            loads.push(b.load_ubo(0, off, vec4));
        }
        let mut shader = b.finish();
        run::<Gen6>(&mut shader).unwrap();

        assert_eq!(shader.ubo_uploads.len(), 1);
        let u = shader.ubo_uploads[0];
        assert_eq!((u.start, u.end), (0, 64));
        let base_word = u.const_vec4 * 4;
        for (i, &ld) in loads.iter().enumerate() {
            let k = i as u16 + 1;
            assert_eq!(
                shader.instr(ld).op,
                HirOp::LoadConstFile {
                    word: base_word + k * 4
                },
                "load {k} reads the promoted range"
            );
        }
    }

    #[test]
    fn ranges_past_the_budget_are_dropped_not_fatal() {
        let vec4 = HirType::vector(ScalarBase::Float, 32, 4);
        let mut b = HirBuilder::new(Stage::Compute);
        b.declare_ubo(1 << 20);
        // Strided loads that cannot merge; more ranges than the const
        // file can hold.
        let mut loads = Vec::new();
        for k in 0..200u32 {
            let off = b.const_u32(k * 128);
            loads.push(b.load_ubo(0, off, vec4));
        }
        let mut shader = b.finish();
        run::<Gen6>(&mut shader).unwrap();

        assert!(shader.ubo_uploads.len() < 200);
        assert!(!shader.ubo_uploads.is_empty());
        // Early loads promoted, late loads untouched.
        assert!(matches!(
            shader.instr(loads[0]).op,
            HirOp::LoadConstFile { .. }
        ));
        assert!(matches!(
            shader.instr(*loads.last().unwrap()).op,
            HirOp::LoadUbo { .. }
        ));
    }
}
