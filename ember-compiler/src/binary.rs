//! Binary emission: LIR to machine instructions to packed words.
//!
//! Blocks are laid out in order, branch targets resolve to signed
//! instruction displacements, and the stream packs behind the 16-byte
//! header. The generation's instruction-count cap is enforced after nop
//! insertion, when the count is final.

use crate::error::{BugCode, CompileError, Result};
use crate::generation::Generation;
use ember_asm::{
    encode_stream,
    Extra,
    Imm10,
    MachInstr,
    MachSrc,
    Opcode,
    ShaderHeader,
};
use ember_ir::{BlockId, ImmType, Instr, InstrExtra, Shader, SrcKind};
use std::collections::HashMap;

fn mach_src(src: &ember_ir::Src, op: Opcode) -> Result<MachSrc> {
    Ok(match src.kind {
        SrcKind::Phys(reg) => MachSrc::Reg {
            reg,
            mods: src.mods,
        },
        SrcKind::Const(slot) => MachSrc::Const {
            slot,
            mods: src.mods,
        },
        SrcKind::Imm(imm) => {
            if op.category() == Some(ember_asm::Category::Cat1) {
                MachSrc::Imm32(imm.bits)
            } else if imm.ty == ImmType::U32 {
                MachSrc::Imm10(Imm10::from_i32(imm.bits as i32).map_err(|_| {
                    CompileError::bug(
                        BugCode::UnreachableOpcode,
                        "unlegalized wide immediate",
                    )
                })?)
            } else {
                return Err(CompileError::bug(
                    BugCode::UnreachableOpcode,
                    "unlegalized typed immediate",
                ));
            }
        }
        SrcKind::Ssa(v) => {
            return Err(CompileError::bug(
                BugCode::UnreachableOpcode,
                format!("{v} not allocated"),
            ))
        }
        SrcKind::Array { .. } => {
            return Err(CompileError::bug(
                BugCode::UnreachableOpcode,
                "array operand survived allocation",
            ))
        }
    })
}

fn mach_instr(
    instr: &Instr,
    branch_target: Option<i32>,
) -> Result<MachInstr> {
    let mut m = MachInstr::new(instr.opcode);
    m.flags = instr.flags;
    m.repeat = instr.repeat;
    m.cond = instr.cond;
    if let Some(dst) = instr.dsts.first() {
        m.dst = dst.as_phys();
    }
    // `end` keeps its output operands through allocation for liveness;
    // the machine form takes none.
    if instr.opcode != Opcode::End {
        for src in &instr.srcs {
            m.srcs.push(mach_src(src, instr.opcode)?);
        }
    }
    m.extra = match &instr.extra {
        InstrExtra::None => Extra::None,
        InstrExtra::Branch { .. } => Extra::Branch {
            offset: branch_target.ok_or_else(|| {
                CompileError::bug(BugCode::UnreachableOpcode, "unresolved branch")
            })?,
        },
        InstrExtra::Exec { levels } => Extra::Exec { levels: *levels },
        InstrExtra::Conv { kind, src, dst } => Extra::Conv {
            kind: *kind,
            src: *src,
            dst: *dst,
        },
        InstrExtra::Tex(t) => Extra::Tex {
            tex: t.tex,
            samp: t.samp,
            offset: t.offset,
            array: t.array,
            comps: t.comps,
        },
        InstrExtra::Mem(mi) => Extra::Mem {
            offset: mi.offset,
            binding: mi.binding,
        },
        InstrExtra::Fence { classes } => Extra::Fence { classes: *classes },
        other => {
            return Err(CompileError::bug(
                BugCode::StrayPseudoOp,
                format!("{other:?} reached the packer"),
            ))
        }
    };
    Ok(m)
}

/// Converts the scheduled, allocated LIR into a machine stream.
pub fn to_mach(shader: &Shader) -> Result<Vec<MachInstr>> {
    // First pass: instruction index of each block head.
    let mut block_index: HashMap<BlockId, i32> = HashMap::new();
    let mut index = 0i32;
    for &b in &shader.block_order {
        block_index.insert(b, index);
        index += shader.blocks[b].instrs.len() as i32;
    }
    let mut out = Vec::with_capacity(index as usize);
    let mut at = 0i32;
    for &b in &shader.block_order {
        for &i in &shader.blocks[b].instrs {
            let instr = &shader.instrs[i];
            let target = match &instr.extra {
                InstrExtra::Branch { target } => {
                    Some(block_index[target] - (at + 1))
                }
                _ => None,
            };
            out.push(mach_instr(instr, target)?);
            at += 1;
        }
    }
    Ok(out)
}

/// The packed shader: header plus word stream.
pub struct Binary {
    /// Little-endian bytes: header then instruction words.
    pub bytes: Vec<u8>,
    /// Packed instruction count.
    pub instr_count: u32,
}

/// Packs the LIR into the final byte buffer.
pub fn pack<G: Generation>(
    shader: &Shader,
    half_regs: u16,
    full_regs: u16,
) -> Result<Binary> {
    let mach = to_mach(shader)?;
    let count = mach.len() as u32;
    if count > G::MAX_INSTRS {
        return Err(CompileError::ResourceExhausted(
            "instruction stream exceeds the generation cap",
        ));
    }
    let header = ShaderHeader {
        generation: G::TAG,
        stage: shader.stage,
        half_regs: half_regs.min(u8::MAX as u16) as u8,
        full_regs: full_regs.min(u8::MAX as u16) as u8,
        const_len: shader.consts.total_vec4(),
        instr_count: count,
    };
    let mut bytes = header.to_bytes().to_vec();
    bytes.extend(encode_stream(&mach)?);
    Ok(Binary {
        bytes,
        instr_count: count,
    })
}

/// Renders the machine stream as text, one instruction per line.
pub fn disassemble(mach: &[MachInstr]) -> String {
    use itertools::Itertools;
    mach.iter()
        .enumerate()
        .map(|(i, instr)| format!("{i:04}: {instr}"))
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Gen7;
    use ember_asm::{PhysReg, Stage, Width};
    use ember_ir::{Dst, DstKind, Src};

    #[test]
    fn backward_branch_offset_is_negative() {
        let mut s = Shader::new(Stage::Compute);
        let b0 = s.new_block();
        let b1 = s.new_block();
        let mut m = Instr::new(Opcode::Mov);
        m.dsts.push(Dst {
            kind: DstKind::Phys(PhysReg::full(0)),
            width: Width::W32,
            wrmask: 1,
        });
        m.srcs.push(Src::imm(ember_ir::Imm::uint(1), Width::W32));
        s.append(b0, m);
        let mut j = Instr::new(Opcode::JumpExecAny);
        j.extra = InstrExtra::Branch { target: b0 };
        s.append(b1, j);
        s.append(b1, Instr::new(Opcode::End));

        let mach = to_mach(&s).unwrap();
        let Extra::Branch { offset } = mach[1].extra else {
            panic!("missing branch extra")
        };
        // From the instruction after the jump (index 2) back to index 0.
        assert_eq!(offset, -2);
    }

    #[test]
    fn packed_binary_carries_header_and_round_trips() {
        let mut s = Shader::new(Stage::Compute);
        let b = s.new_block();
        let mut m = Instr::new(Opcode::Mov);
        m.dsts.push(Dst {
            kind: DstKind::Phys(PhysReg::full(0)),
            width: Width::W32,
            wrmask: 1,
        });
        m.srcs.push(Src::imm(ember_ir::Imm::uint(42), Width::W32));
        s.append(b, m);
        s.append(b, Instr::new(Opcode::End));

        let binary = pack::<Gen7>(&s, 0, 1).unwrap();
        let header =
            ShaderHeader::from_bytes(&binary.bytes).expect("valid header");
        assert_eq!(header.instr_count, 2);
        assert_eq!(header.generation, 7);
        let back =
            ember_asm::decode_stream(&binary.bytes[ember_asm::HEADER_LEN..])
                .expect("stream decodes");
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].opcode, Opcode::Mov);
        assert_eq!(back[1].opcode, Opcode::End);
    }
}
