use crate::*;
use proptest::prelude::*;
use strum::IntoEnumIterator;

/// A canonical, encodable instruction for the given opcode, with operand
/// registers drawn from `r`.
fn sample_instr(op: Opcode, r: [u16; 4], half: bool) -> MachInstr {
    let reg = |n: u16| {
        if half {
            PhysReg::half(n)
        } else {
            PhysReg::full(n)
        }
    };
    let mut i = MachInstr::new(op);
    match op.category().expect("encodable opcode") {
        Category::Cat0 => {
            if op.has_cond() {
                i.cond = Some(CmpCond::Ne);
                i = i.with_src(MachSrc::reg(reg(r[0])));
            }
            match op {
                Opcode::PushExec | Opcode::PopExec | Opcode::WhileICmp => {
                    i.extra = Extra::Exec {
                        levels: (r[1] % 4) as u8,
                    };
                }
                Opcode::Jump | Opcode::JumpExecAny => {
                    i.extra = Extra::Branch {
                        offset: r[1] as i32 - 256,
                    };
                }
                _ => {}
            }
        }
        Category::Cat1 => {
            i = i.with_dst(reg(r[0]));
            if op == Opcode::Cov {
                i.extra = Extra::Conv {
                    kind: ConvKind::F2F,
                    src: Width::W32,
                    dst: if half { Width::W16 } else { Width::W32 },
                };
            }
            i = i.with_src(MachSrc::reg(reg(r[1])));
        }
        Category::Cat2 => {
            i = i.with_dst(reg(r[0])).with_src(MachSrc::reg(reg(r[1])));
            if op.fixed_srcs() == Some(2) {
                i = i.with_src(MachSrc::reg(reg(r[2])));
            }
            if op.has_cond() {
                i.cond = Some(CmpCond::Lt);
            }
        }
        Category::Cat3 => {
            i = i
                .with_dst(reg(r[0]))
                .with_src(MachSrc::reg(reg(r[1])))
                .with_src(MachSrc::reg(reg(r[2])))
                .with_src(MachSrc::reg(reg(r[3])));
        }
        Category::Cat4 => {
            i = i.with_dst(reg(r[0])).with_src(MachSrc::reg(reg(r[1])));
        }
        Category::Cat5 => {
            i = i
                .with_dst(reg(r[0]))
                .with_src(MachSrc::reg(reg(r[1])))
                .with_extra(Extra::Tex {
                    tex: (r[2] % 32) as u8,
                    samp: (r[3] % 32) as u8,
                    offset: TexOffset::NONE,
                    array: r[2] % 2 == 1,
                    comps: 4,
                });
        }
        Category::Cat6 => {
            if op.is_load() || op.is_atomic() {
                i = i.with_dst(reg(r[0]));
            }
            i = i.with_src(MachSrc::reg(reg(r[1])));
            if op.is_store() || op.is_atomic() {
                i = i.with_src(MachSrc::reg(reg(r[2])));
            }
            i = i.with_extra(Extra::Mem {
                offset: r[3] as i32 - 512,
                binding: (r[2] % 16) as u8,
            });
        }
        Category::Cat7 => {
            if op == Opcode::Fence {
                i = i.with_extra(Extra::Fence {
                    classes: BarrierClass::BUFFER_R | BarrierClass::BUFFER_W,
                });
            }
        }
    }
    i
}

fn encodable_opcodes() -> Vec<Opcode> {
    Opcode::iter().filter(|op| !op.is_meta()).collect()
}

proptest! {
    #[test]
    fn round_trip_random_instructions(
        op_index in 0usize..64,
        regs in proptest::array::uniform4(0u16..512),
        half in any::<bool>(),
    ) {
        let ops = encodable_opcodes();
        let op = ops[op_index % ops.len()];
        let instr = sample_instr(op, regs, half);
        let words = encode(&instr).expect("canonical instruction encodes");
        let mut stream = vec![words.lo];
        stream.extend(words.hi);
        let (back, used) = decode(&stream).expect("encoded instruction decodes");
        prop_assert_eq!(used, words.len());
        prop_assert_eq!(back, instr);
    }
}

#[test]
fn round_trip_every_encodable_opcode() {
    for op in encodable_opcodes() {
        let instr = sample_instr(op, [4, 8, 12, 16], false);
        let words = encode(&instr).unwrap_or_else(|e| panic!("{op}: {e}"));
        let mut stream = vec![words.lo];
        stream.extend(words.hi);
        let (back, _) = decode(&stream).unwrap_or_else(|e| panic!("{op}: {e}"));
        assert_eq!(back, instr, "{op} did not round trip");
    }
}

#[test]
fn round_trip_byte_stream() {
    let instrs: Vec<MachInstr> = encodable_opcodes()
        .into_iter()
        .map(|op| sample_instr(op, [1, 2, 3, 4], false))
        .collect();
    let bytes = encode_stream(&instrs).expect("stream encodes");
    let back = decode_stream(&bytes).expect("stream decodes");
    assert_eq!(back, instrs);
}

#[test]
fn meta_opcodes_do_not_encode() {
    for op in Opcode::iter().filter(|op| op.is_meta()) {
        assert_eq!(
            encode(&MachInstr::new(op)),
            Err(EncodeError::PseudoOpcode(op))
        );
    }
}

#[test]
fn sync_flags_are_illegal_on_cat0() {
    let mut i = MachInstr::nop();
    i.flags |= InstrFlags::SS;
    assert_eq!(encode(&i), Err(EncodeError::IllegalFlags(Opcode::Nop)));
}

#[test]
fn saturate_is_illegal_on_sfu() {
    let mut i = sample_instr(Opcode::Rcp, [0, 4, 0, 0], false);
    i.flags |= InstrFlags::SAT;
    assert_eq!(encode(&i), Err(EncodeError::IllegalFlags(Opcode::Rcp)));
}

#[test]
fn cat2_rejects_two_nonreg_sources() {
    let i = MachInstr::new(Opcode::IAdd)
        .with_dst(PhysReg::full(0))
        .with_src(MachSrc::Imm10(Imm10::from_i32(3).unwrap()))
        .with_src(MachSrc::Const {
            slot: ConstSlot::new(4),
            mods: SrcMods::empty(),
        });
    assert_eq!(encode(&i), Err(EncodeError::IllegalOperand(Opcode::IAdd)));
}

#[test]
fn cat3_allows_const_only_on_src0() {
    let c = MachSrc::Const {
        slot: ConstSlot::new(8),
        mods: SrcMods::empty(),
    };
    let ok = MachInstr::new(Opcode::MadF)
        .with_dst(PhysReg::full(0))
        .with_src(c)
        .with_src(MachSrc::reg(PhysReg::full(4)))
        .with_src(MachSrc::reg(PhysReg::full(8)));
    assert!(encode(&ok).is_ok());

    let bad = MachInstr::new(Opcode::MadF)
        .with_dst(PhysReg::full(0))
        .with_src(MachSrc::reg(PhysReg::full(4)))
        .with_src(c)
        .with_src(MachSrc::reg(PhysReg::full(8)));
    assert_eq!(
        encode(&bad),
        Err(EncodeError::IllegalOperand(Opcode::MadF))
    );
}

#[test]
fn tex_offset_forces_wide_form() {
    let mut i = sample_instr(Opcode::Sam, [0, 4, 0, 0], false);
    let Extra::Tex { ref mut offset, .. } = i.extra else {
        unreachable!()
    };
    *offset = TexOffset::new(1, -2, 3).unwrap();
    let words = encode(&i).expect("wide tex encodes");
    assert_eq!(words.len(), 2);
    let mut stream = vec![words.lo];
    stream.extend(words.hi);
    let (back, used) = decode(&stream).expect("wide tex decodes");
    assert_eq!(used, 2);
    assert_eq!(back, i);
}

#[test]
fn large_mem_offset_forces_wide_form() {
    let mut i = sample_instr(Opcode::LdIbo, [0, 4, 8, 0], false);
    i.extra = Extra::Mem {
        offset: 1 << 16,
        binding: 2,
    };
    let words = encode(&i).expect("wide mem encodes");
    assert_eq!(words.len(), 2);
}
