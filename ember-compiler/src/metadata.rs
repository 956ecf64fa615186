//! The per-variant metadata record.
//!
//! Everything the driver needs to program the hardware around the binary:
//! input and output register assignments, the const-file layout in vec4
//! units, stream-out descriptors for vertex variants, sampler sRGB
//! fix-ups, and — when requested — per-variant statistics and a textual
//! disassembly.

use crate::emit::EmitOutput;
use crate::hir::{HirShader, InterpMode, Semantic};
use crate::ra::RaStats;
use ember_asm::{Opcode, PhysReg, Stage};
use ember_ir::{ConstRegion, Shader};

/// One input attribute or varying binding.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InputLoc {
    /// Semantic slot.
    pub semantic: Semantic,
    /// Base register of the first component.
    pub reg: PhysReg,
    /// Component mask.
    pub mask: u8,
    /// Interpolation mode.
    pub interp: InterpMode,
    /// Whether the input is fetched through the barycentrics.
    pub bary: bool,
}

/// One output varying binding.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutputLoc {
    /// Semantic slot.
    pub semantic: Semantic,
    /// Base register of the first component.
    pub reg: PhysReg,
    /// Component mask.
    pub mask: u8,
}

/// Const-file layout, all offsets in vec4 units.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstLayout {
    /// Driver-param region.
    pub driver_params: ConstRegion,
    /// UBO base-pointer region.
    pub ubo_bases: ConstRegion,
    /// SSBO size region.
    pub ssbo_sizes: ConstRegion,
    /// Image dimension region.
    pub image_dims: ConstRegion,
    /// Stream-out address region.
    pub stream_out: ConstRegion,
    /// Immediate pool region.
    pub immediates: ConstRegion,
    /// Preamble result region.
    pub preamble: ConstRegion,
    /// Planned UBO uploads.
    pub ubo_uploads: Vec<ember_ir::UboUpload>,
    /// Immediate pool words.
    pub immediate_words: Vec<u32>,
}

/// One stream-out output tuple.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamOutEntry {
    /// Source register of the first component.
    pub reg: PhysReg,
    /// Component count.
    pub comps: u8,
    /// Target buffer.
    pub buffer: u8,
    /// Dword offset within the buffer stride.
    pub offset: u16,
}

/// Stream-out configuration of a vertex variant.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamOutDesc {
    /// Per-buffer stride in dwords.
    pub strides: [u16; 4],
    /// Captured outputs.
    pub entries: Vec<StreamOutEntry>,
}

/// Per-variant statistics, collected under the `shaderdb` option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VariantStats {
    /// Packed instructions.
    pub instrs: u32,
    /// Plain nops among them.
    pub nops: u32,
    /// Instructions per category, cat0 through cat7.
    pub cat: [u32; 8],
    /// Half registers used.
    pub half_regs: u16,
    /// Full registers used.
    pub full_regs: u16,
    /// Spill stores.
    pub spills: u32,
    /// Fill loads.
    pub fills: u32,
    /// Hardware loops.
    pub loops: u32,
    /// `(ss)` flags set.
    pub ss: u32,
    /// `(sy)` flags set.
    pub sy: u32,
}

/// The metadata record handed back with the binary.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShaderMetadata {
    /// Input bindings.
    pub inputs: Vec<InputLoc>,
    /// Output bindings; for vertex stages ordered position first, user
    /// varyings second, point size last.
    pub outputs: Vec<OutputLoc>,
    /// Const-file layout.
    pub consts: ConstLayout,
    /// Stream-out descriptors (vertex stages).
    pub stream_out: StreamOutDesc,
    /// Samplers needing the sRGB fix-up, as a bitmask by binding.
    pub srgb_samplers: u16,
    /// Statistics, when `shaderdb` was set.
    pub stats: Option<VariantStats>,
    /// Disassembly, when `verbose_disasm` was set.
    pub disasm: Option<String>,
}

fn semantic_order(sem: &Semantic) -> u8 {
    match sem {
        Semantic::Position => 0,
        Semantic::User(_) | Semantic::Color(_) | Semantic::Patch(_) => 1,
        Semantic::Depth => 1,
        Semantic::TessLevelOuter | Semantic::TessLevelInner => 1,
        Semantic::PointSize => 2,
    }
}

/// Builds the metadata record.
pub fn build(
    hir: &HirShader,
    lir: &Shader,
    emit: &EmitOutput,
    ra: RaStats,
    nops_and_flags: VariantStats,
) -> ShaderMetadata {
    let mut inputs = Vec::new();
    for decl_idx in 0..hir.inputs.len() as u8 {
        let decl = hir.inputs[decl_idx as usize];
        if hir.stage == Stage::Fragment {
            // Varying fetched through barycentrics; the register column
            // reports the barycentric pair base instead.
            let bary_reg = emit
                .inputs
                .iter()
                .find(|b| b.decl.is_none())
                .and_then(|b| lir.instrs[b.instr].dsts[0].as_phys());
            inputs.push(InputLoc {
                semantic: decl.semantic,
                reg: bary_reg.unwrap_or(PhysReg::full(0)),
                mask: (1u8 << decl.comps) - 1,
                interp: decl.interp,
                bary: decl.interp != InterpMode::Flat,
            });
        } else {
            let first = emit
                .inputs
                .iter()
                .find(|b| b.decl == Some(decl_idx))
                .and_then(|b| lir.instrs[b.instr].dsts[0].as_phys());
            if let Some(reg) = first {
                inputs.push(InputLoc {
                    semantic: decl.semantic,
                    reg,
                    mask: (1u8 << decl.comps) - 1,
                    interp: decl.interp,
                    bary: false,
                });
            }
        }
    }

    // Output registers come from the final `end` source assignment.
    let mut outputs: Vec<OutputLoc> = Vec::new();
    for (i, binding) in emit.outputs.iter().enumerate() {
        if binding.comp != 0 {
            continue;
        }
        let decl = hir.outputs[binding.decl as usize];
        let reg = lir.instrs[emit.end].srcs[i]
            .kind
            .clone();
        let reg = match reg {
            ember_ir::SrcKind::Phys(r) => r,
            _ => continue,
        };
        outputs.push(OutputLoc {
            semantic: decl.semantic,
            reg,
            mask: (1u8 << decl.comps) - 1,
        });
    }
    if hir.stage == Stage::Vertex {
        outputs.sort_by_key(|o| semantic_order(&o.semantic));
    }

    let consts = ConstLayout {
        driver_params: lir.consts.driver_params,
        ubo_bases: lir.consts.ubo_bases,
        ssbo_sizes: lir.consts.ssbo_sizes,
        image_dims: lir.consts.image_dims,
        stream_out: lir.consts.stream_out,
        immediates: lir.consts.immediates,
        preamble: hir.preamble_const.unwrap_or_default(),
        ubo_uploads: lir.consts.ubo_uploads.clone(),
        immediate_words: lir.consts.imm_pool.clone(),
    };

    // Stream-out captures every user varying into buffer zero.
    let mut stream_out = StreamOutDesc::default();
    if hir.stage == Stage::Vertex {
        let mut offset = 0u16;
        for out in &outputs {
            if let Semantic::User(_) = out.semantic {
                let comps = out.mask.count_ones() as u8;
                stream_out.entries.push(StreamOutEntry {
                    reg: out.reg,
                    comps,
                    buffer: 0,
                    offset,
                });
                offset += comps as u16;
            }
        }
        stream_out.strides[0] = offset;
    }

    let stats = VariantStats {
        half_regs: ra.half_slots,
        full_regs: ra.full_slots,
        spills: ra.spills,
        fills: ra.fills,
        ..nops_and_flags
    };

    ShaderMetadata {
        inputs,
        outputs,
        consts,
        stream_out,
        srgb_samplers: hir.srgb_samplers,
        stats: Some(stats),
        disasm: None,
    }
}

/// Collects instruction-stream statistics from the final LIR.
pub fn collect_stats(lir: &Shader) -> VariantStats {
    let mut stats = VariantStats::default();
    for &b in &lir.block_order {
        for &i in &lir.blocks[b].instrs {
            let instr = &lir.instrs[i];
            stats.instrs += 1;
            if instr.opcode == Opcode::Nop {
                stats.nops += 1;
            }
            if let Some(cat) = instr.opcode.category() {
                stats.cat[cat as usize] += 1;
            }
            if instr.opcode == Opcode::JumpExecAny {
                stats.loops += 1;
            }
            if instr.flags.contains(ember_asm::InstrFlags::SS) {
                stats.ss += 1;
            }
            if instr.flags.contains(ember_asm::InstrFlags::SY) {
                stats.sy += 1;
            }
        }
    }
    stats
}
