//! Emission of predicated LIR from the structured HIR.
//!
//! The GPU has no per-lane branch. Structured `if`/`loop` lower to
//! execution-mask manipulation: `if.icmp` deactivates lanes failing the
//! condition, `else.icmp` swaps the active set, `pop.exec` releases mask
//! levels, and loops wrap the body in two mask levels so `break` and
//! `continue` share one mechanism through the per-lane nesting counter
//! in `r0.l`. Blocks are emitted in post-order over the structured tree
//! with a fresh join block after each construct; `meta.lend` marks each
//! block's logical scope end for liveness.

use crate::error::{BugCode, CompileError, Result};
use crate::generation::Generation;
use crate::hir::{
    AluOp,
    BaryMode,
    BarrierKind,
    HirId,
    HirOp,
    HirShader,
    HirType,
    InterpMode,
    LodMode,
    ScalarBase,
    Sysval,
    VarId,
};
use crate::layout;
use ember_asm::{
    BarrierClass,
    CmpCond,
    ConstSlot,
    ConvKind,
    InstrFlags,
    Opcode,
    PhysReg,
    SrcMods,
    Stage,
    TexOffset,
    Width,
};
use ember_ir::{
    ArrayId,
    BlockId,
    Dst,
    DstKind,
    Imm,
    Instr,
    InstrExtra,
    InstrId,
    MemInfo,
    Shader,
    Src,
    SrcKind,
    TexInfo,
    Value,
};
use smallvec::{smallvec, SmallVec};
use std::collections::{HashMap, HashSet};

/// One shader-output component and the value that must be live in it at
/// the end of the shader.
#[derive(Debug, Clone, Copy)]
pub struct OutputBinding {
    /// Output declaration index.
    pub decl: u8,
    /// Component.
    pub comp: u8,
    /// The value the driver reads.
    pub value: Value,
}

/// One register shader input.
#[derive(Debug, Clone, Copy)]
pub struct InputBinding {
    /// Ordering slot; user inputs sit below the synthetic sysval slots.
    pub slot: u16,
    /// Input declaration index for user inputs.
    pub decl: Option<u8>,
    /// The `meta.input` instruction.
    pub instr: InstrId,
}

/// Emission result: the LIR plus the I/O maps the metadata emitter needs.
pub struct EmitOutput {
    /// The predicated LIR shader.
    pub lir: Shader,
    /// Register inputs in slot order.
    pub inputs: Vec<InputBinding>,
    /// Output component bindings, consumed by `end`.
    pub outputs: Vec<OutputBinding>,
    /// The final `end` instruction.
    pub end: InstrId,
}

fn width_of(ty: HirType) -> Result<Width> {
    match ty.bits {
        8 => Ok(Width::W8),
        16 => Ok(Width::W16),
        32 => Ok(Width::W32),
        _ => Err(CompileError::bug(
            BugCode::UnreachableOpcode,
            format!("width {} survived lowering", ty.bits),
        )),
    }
}

fn sysval_slot(sv: &Sysval) -> Option<u16> {
    // Synthetic register-input slots; uniform sysvals come from the
    // driver-param const region instead.
    Some(match sv {
        Sysval::VertexId => 0x100,
        Sysval::InstanceId => 0x102,
        Sysval::InvocationId => 0x108,
        Sysval::PatchId => 0x10a,
        Sysval::TessCoord => 0x10c,
        Sysval::FragCoord => 0x110,
        Sysval::SampleId => 0x114,
        Sysval::LocalInvocationId => 0x118,
        Sysval::WorkgroupId => 0x11c,
        _ => return None,
    })
}

fn sysval_comps(sv: &Sysval) -> u8 {
    match sv {
        Sysval::TessCoord => 2,
        Sysval::LocalInvocationId | Sysval::WorkgroupId => 3,
        Sysval::FragCoord => 4,
        _ => 1,
    }
}

/// Driver-param const words (within the driver-param region).
mod driver_params {
    /// Tess-factor region base address.
    pub const TESS_FACTOR_BASE: u16 = 2;
    /// Tess-param region base address.
    pub const TESS_PARAM_BASE: u16 = 3;
    /// Start of the per-texture array-size-minus-one table.
    pub const ARRAY_SIZES: u16 = 8;
}

/// Synthetic slot of the fragment barycentric pair.
const BARY_SLOT: u16 = 0x180;

struct LoopCtx {
    header: BlockId,
    brk: BlockId,
}

struct Emitter<'h, G> {
    hir: &'h HirShader,
    lir: Shader,
    cur: BlockId,
    val_map: HashMap<HirId, SmallVec<[Value; 4]>>,
    input_vals: HashMap<u16, SmallVec<[Value; 4]>>,
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    var_arrays: HashMap<VarId, ArrayId>,
    loop_stack: Vec<LoopCtx>,
    ssbo_written: HashSet<u8>,
    last_if: Option<(BlockId, BlockId)>,
    any_cf: bool,
    if_depth: u8,
    _gen: core::marker::PhantomData<G>,
}

impl<'h, G: Generation> Emitter<'h, G> {
    fn new(hir: &'h HirShader) -> Self {
        let mut lir = Shader::new(hir.stage);
        let entry = lir.new_block();
        Self {
            hir,
            lir,
            cur: entry,
            val_map: HashMap::new(),
            input_vals: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            var_arrays: HashMap::new(),
            loop_stack: Vec::new(),
            ssbo_written: HashSet::new(),
            last_if: None,
            any_cf: false,
            if_depth: 0,
            _gen: core::marker::PhantomData,
        }
    }

    fn emit(&mut self, instr: Instr) -> InstrId {
        self.lir.append(self.cur, instr)
    }

    fn new_ssa_instr(
        &mut self,
        opcode: Opcode,
        width: Width,
        srcs: &[Src],
    ) -> (Value, InstrId) {
        let value = self.lir.new_value(width);
        let mut instr = Instr::new(opcode);
        instr.dsts.push(Dst::ssa(value, width));
        instr.srcs.extend(srcs.iter().copied());
        let id = self.emit(instr);
        (value, id)
    }

    fn mov_imm(&mut self, width: Width, imm: Imm) -> Value {
        self.new_ssa_instr(Opcode::Mov, width, &[Src::imm(imm, width)]).0
    }

    fn mov_const(&mut self, width: Width, slot: ConstSlot) -> Value {
        self.new_ssa_instr(Opcode::Mov, width, &[Src::const_file(slot, width)])
            .0
    }

    fn logical_end(&mut self) {
        self.emit(Instr::new(Opcode::LogicalEnd));
    }

    /// The per-component LIR values of a HIR value.
    fn vals(&self, id: HirId) -> Result<&SmallVec<[Value; 4]>> {
        self.val_map.get(&id).ok_or_else(|| {
            CompileError::bug(BugCode::UseBeforeDef, format!("{id} has no value"))
        })
    }

    fn val(&self, id: HirId, comp: usize) -> Result<Value> {
        let vals = self.vals(id)?;
        vals.get(comp).copied().ok_or_else(|| {
            CompileError::bug(
                BugCode::UseBeforeDef,
                format!("{id} has no component {comp}"),
            )
        })
    }

    fn src(&self, id: HirId, comp: usize) -> Result<Src> {
        let width = width_of(self.hir.ty(id).to_scalar())?;
        Ok(Src::ssa(self.val(id, comp)?, width))
    }

    /// Groups scalar component values into consecutive registers.
    fn grouped(&mut self, comps: &[Value], width: Width) -> Value {
        if let [single] = comps {
            return *single;
        }
        let value = self.lir.new_value(width);
        let mut instr = Instr::new(Opcode::Combine);
        let mut dst = Dst::ssa(value, width);
        dst.wrmask = comps.len() as u8;
        instr.dsts.push(dst);
        instr
            .srcs
            .extend(comps.iter().map(|&v| Src::ssa(v, width)));
        self.emit(instr);
        value
    }

    /// Splits a grouped result into per-component values.
    fn split_all(&mut self, group: Value, n: u8, width: Width) -> SmallVec<[Value; 4]> {
        if n <= 1 {
            return smallvec![group];
        }
        let mut out = SmallVec::new();
        for comp in 0..n {
            let (v, id) = self.new_ssa_instr(
                Opcode::Split,
                width,
                &[Src::ssa(group, width)],
            );
            self.lir.instrs[id].extra = InstrExtra::Split { comp };
            out.push(v);
        }
        out
    }

    /// Emits a grouped-destination instruction plus its splits.
    fn emit_grouped_def(
        &mut self,
        mut instr: Instr,
        n: u8,
        width: Width,
    ) -> SmallVec<[Value; 4]> {
        let value = self.lir.new_value(width);
        let mut dst = Dst::ssa(value, width);
        dst.wrmask = n.max(1);
        instr.dsts.push(dst);
        self.emit(instr);
        self.split_all(value, n, width)
    }

    // ---- inputs ----

    fn input_meta(&mut self, slot: u16, width: Width, decl: Option<u8>) -> Value {
        let value = self.lir.new_value(width);
        let mut instr = Instr::new(Opcode::Input);
        instr.dsts.push(Dst::ssa(value, width));
        instr.extra = InstrExtra::Input { slot };
        let id = self.emit(instr);
        self.inputs.push(InputBinding { slot, decl, instr: id });
        value
    }

    /// Pre-creates register inputs so they live in the entry block.
    fn emit_entry_inputs(&mut self) {
        let hir = self.hir;
        let mut needed_sysvals: Vec<Sysval> = Vec::new();
        let mut needs_bary = false;
        let mut user_inputs: Vec<u8> = Vec::new();
        for instr in &hir.instrs {
            match &instr.op {
                HirOp::LoadSysval(sv) if sysval_slot(sv).is_some() => {
                    if !needed_sysvals.contains(sv) {
                        needed_sysvals.push(*sv);
                    }
                }
                HirOp::LoadInput { input } => {
                    if hir.stage == Stage::Fragment {
                        needs_bary = true;
                    } else if !user_inputs.contains(input) {
                        user_inputs.push(*input);
                    }
                }
                HirOp::InterpolateAt { .. } | HirOp::LoadBarycentric { .. } => {
                    needs_bary = true;
                }
                _ => {}
            }
        }
        user_inputs.sort_unstable();
        for decl in user_inputs {
            let var = hir.inputs[decl as usize];
            let mut vals = SmallVec::new();
            for comp in 0..var.comps {
                let slot = var.driver_location as u16 * 4 + comp as u16;
                vals.push(self.input_meta(slot, Width::W32, Some(decl)));
            }
            self.input_vals.insert(decl as u16, vals);
        }
        if needs_bary {
            let mut vals = SmallVec::new();
            for comp in 0..2u16 {
                vals.push(self.input_meta(BARY_SLOT + comp, Width::W32, None));
            }
            self.input_vals.insert(BARY_SLOT, vals);
        }
        needed_sysvals.sort_by_key(sysval_slot);
        for sv in needed_sysvals {
            let slot = sysval_slot(&sv).expect("filtered to register sysvals");
            let mut vals = SmallVec::new();
            for comp in 0..sysval_comps(&sv) {
                vals.push(self.input_meta(slot + comp as u16, Width::W32, None));
            }
            self.input_vals.insert(slot, vals);
        }
    }

    fn bary_pair(&mut self) -> Result<Value> {
        let comps = self.input_vals.get(&BARY_SLOT).cloned().ok_or_else(|| {
            CompileError::bug(BugCode::UseBeforeDef, "barycentrics not prepared")
        })?;
        Ok(self.grouped(&comps, Width::W32))
    }

    // ---- control flow ----

    fn ensure_nesting_init(&mut self) {
        if self.any_cf {
            return;
        }
        self.any_cf = true;
        // The nesting counter lives in r0.l and starts at zero, once.
        let mut instr = Instr::new(Opcode::Mov);
        instr.dsts.push(Dst {
            kind: DstKind::Phys(PhysReg::half(0)),
            width: Width::W16,
            wrmask: 1,
        });
        instr
            .srcs
            .push(Src::imm(Imm::uint(0), Width::W16));
        let id = self.emit(instr);
        self.lir.keep(id);
    }

    fn new_listed_block(&mut self) -> BlockId {
        self.lir.new_block()
    }

    fn edge(&mut self, from: BlockId, to: BlockId) {
        self.lir.blocks[from].add_successor(to);
        if !self.lir.blocks[to].predecessors.contains(&from) {
            self.lir.blocks[to].predecessors.push(from);
        }
    }

    fn emit_if(
        &mut self,
        cond: HirId,
        then_body: &[crate::hir::Node],
        else_body: &[crate::hir::Node],
    ) -> Result<()> {
        self.ensure_nesting_init();
        let cond_src = self.src(cond, 0)?;
        let first = self.cur;
        self.logical_end();
        let mut if_i = Instr::new(Opcode::IfICmp);
        if_i.cond = Some(CmpCond::Ne);
        if_i.srcs.push(cond_src);
        let if_id = self.emit(if_i);
        let cond_def = self
            .val(cond, 0)
            .ok()
            .and_then(|v| self.lir.def_of(v));
        self.lir.blocks[first].condition = cond_def;
        self.lir.keep(if_id);
        self.if_depth += 1;

        let then_blk = self.new_listed_block();
        self.edge(first, then_blk);
        self.cur = then_blk;
        self.emit_body(then_body)?;
        let end_then = self.cur;
        self.logical_end();
        let mut else_i = Instr::new(Opcode::ElseICmp);
        else_i.cond = Some(CmpCond::Eq);
        else_i.srcs.push(cond_src);
        let else_id = self.emit(else_i);
        self.lir.keep(else_id);

        let else_blk = self.new_listed_block();
        self.edge(first, else_blk);
        self.cur = else_blk;
        self.emit_body(else_body)?;
        let end_else = self.cur;
        self.logical_end();
        let mut pop = Instr::new(Opcode::PopExec);
        pop.extra = InstrExtra::Exec { levels: 1 };
        let pop_id = self.emit(pop);
        self.lir.keep(pop_id);
        self.if_depth -= 1;

        let after = self.new_listed_block();
        self.edge(end_then, after);
        self.edge(end_else, after);
        self.cur = after;
        self.last_if = Some((end_then, end_else));
        Ok(())
    }

    fn emit_loop(&mut self, body: &[crate::hir::Node]) -> Result<()> {
        self.ensure_nesting_init();
        self.logical_end();
        let mut push = Instr::new(Opcode::PushExec);
        push.extra = InstrExtra::Exec { levels: 2 };
        let push_id = self.emit(push);
        self.lir.keep(push_id);

        let prev = self.cur;
        let header = self.new_listed_block();
        self.edge(prev, header);
        // The break target joins the layout after the body.
        let brk = self.lir.blocks.alloc(ember_ir::Block::new());
        self.loop_stack.push(LoopCtx { header, brk });
        let saved_depth = core::mem::take(&mut self.if_depth);

        self.cur = header;
        self.emit_body(body)?;

        let latch = self.cur;
        self.logical_end();
        // `while.icmp 0 == 0`: the zero operands are implicit.
        let mut whl = Instr::new(Opcode::WhileICmp);
        whl.cond = Some(CmpCond::Eq);
        whl.extra = InstrExtra::Exec { levels: 2 };
        let whl_id = self.emit(whl);
        self.lir.keep(whl_id);
        let mut jmp = Instr::new(Opcode::JumpExecAny);
        jmp.extra = InstrExtra::Branch { target: header };
        let jmp_id = self.emit(jmp);
        self.lir.keep(jmp_id);
        let mut pop = Instr::new(Opcode::PopExec);
        pop.extra = InstrExtra::Exec { levels: 2 };
        let pop_id = self.emit(pop);
        self.lir.keep(pop_id);
        self.edge(latch, header);
        self.edge(latch, brk);

        let ctx = self.loop_stack.pop().expect("loop context pushed");
        if self.if_depth != 0 {
            return Err(CompileError::bug(
                BugCode::LoopNesting,
                "loop nesting did not return to zero",
            ));
        }
        self.if_depth = saved_depth;
        self.lir.block_order.push(ctx.brk);
        self.cur = ctx.brk;
        Ok(())
    }

    fn emit_jump(&mut self, is_break: bool) -> Result<()> {
        let ctx = self.loop_stack.last().ok_or_else(|| {
            CompileError::bug(BugCode::MalformedStructure, "jump outside a loop")
        })?;
        let (target, levels) = if is_break {
            (ctx.brk, 2u32)
        } else {
            (ctx.header, 1u32)
        };
        let nestings = levels + self.if_depth as u32;
        // Update the per-lane nesting counter, then flush it into the
        // mask with a zero-level pop.
        let mut mov = Instr::new(Opcode::Mov);
        mov.dsts.push(Dst {
            kind: DstKind::Phys(PhysReg::half(0)),
            width: Width::W16,
            wrmask: 1,
        });
        mov.srcs.push(Src::imm(Imm::uint(nestings), Width::W16));
        let mov_id = self.emit(mov);
        self.lir.keep(mov_id);
        self.logical_end();
        let mut pop = Instr::new(Opcode::PopExec);
        pop.extra = InstrExtra::Exec { levels: 0 };
        let pop_id = self.emit(pop);
        self.lir.keep(pop_id);
        let cur = self.cur;
        self.edge(cur, target);
        self.lir.blocks[cur].unconditional_jump = true;
        Ok(())
    }

    fn emit_body(&mut self, nodes: &[crate::hir::Node]) -> Result<()> {
        use crate::hir::Node;
        for node in nodes {
            match node {
                Node::Instr(id) => self.emit_instr(*id)?,
                Node::If {
                    cond,
                    then_body,
                    else_body,
                } => self.emit_if(*cond, then_body, else_body)?,
                Node::Loop { body } => self.emit_loop(body)?,
                Node::Break => self.emit_jump(true)?,
                Node::Continue => self.emit_jump(false)?,
            }
        }
        Ok(())
    }

    // ---- instructions ----

    fn scalar_srcs(&self, id: HirId) -> Result<SmallVec<[Src; 3]>> {
        self.hir
            .instr(id)
            .srcs
            .iter()
            .map(|&s| self.src(s, 0))
            .collect()
    }

    fn set_scalar(&mut self, id: HirId, value: Value) {
        self.val_map.insert(id, smallvec![value]);
    }

    fn emit_alu(&mut self, id: HirId, op: AluOp) -> Result<()> {
        let ty = self.hir.ty(id);
        if ty.comps > 1 {
            return Err(CompileError::bug(
                BugCode::UnreachableOpcode,
                "vector ALU survived scalarization",
            ));
        }
        let width = width_of(ty)?;
        let srcs = self.scalar_srcs(id)?;
        let value = match op {
            AluOp::FAdd => self.plain(Opcode::FAdd, width, &srcs),
            AluOp::FSub => {
                let mut s = srcs.clone();
                s[1].mods ^= SrcMods::NEG;
                self.plain(Opcode::FAdd, width, &s)
            }
            AluOp::FMul => self.plain(Opcode::FMul, width, &srcs),
            AluOp::FMad => self.plain(Opcode::MadF, width, &srcs),
            AluOp::FMin => self.plain(Opcode::FMin, width, &srcs),
            AluOp::FMax => self.plain(Opcode::FMax, width, &srcs),
            AluOp::FNeg => {
                let s = srcs[0].with_mods(srcs[0].mods | SrcMods::NEG);
                self.plain(Opcode::FAbsNeg, width, &[s])
            }
            AluOp::FAbs => {
                let s = srcs[0].with_mods(srcs[0].mods | SrcMods::ABS);
                self.plain(Opcode::FAbsNeg, width, &[s])
            }
            AluOp::FFloor => self.plain(Opcode::FFloor, width, &srcs),
            AluOp::FFract => {
                // x - floor(x).
                let floor = self.plain(Opcode::FFloor, width, &srcs);
                let neg = Src::ssa(floor, width).with_mods(SrcMods::NEG);
                self.plain(Opcode::FAdd, width, &[srcs[0], neg])
            }
            AluOp::FRcp => self.plain(Opcode::Rcp, width, &srcs),
            AluOp::FRsq => self.plain(Opcode::Rsq, width, &srcs),
            AluOp::FSqrt => self.plain(Opcode::Sqrt, width, &srcs),
            AluOp::FLog2 => self.plain(Opcode::Log2, width, &srcs),
            AluOp::FExp2 => self.plain(Opcode::Exp2, width, &srcs),
            AluOp::SinPt1 => self.plain(Opcode::SinPt1, width, &srcs),
            AluOp::SinPt2 => self.plain(Opcode::SinPt2, width, &srcs),
            AluOp::IAdd => self.plain(Opcode::IAdd, width, &srcs),
            AluOp::ISub => self.plain(Opcode::ISub, width, &srcs),
            AluOp::IMul => self.plain(Opcode::UMul, width, &srcs),
            AluOp::UMulHigh => self.plain(Opcode::UMulHigh, width, &srcs),
            AluOp::INeg => {
                let s = srcs[0].with_mods(srcs[0].mods | SrcMods::NEG);
                self.plain(Opcode::IAbsNeg, width, &[s])
            }
            AluOp::IMin => self.plain(Opcode::IMin, width, &srcs),
            AluOp::IMax => self.plain(Opcode::IMax, width, &srcs),
            AluOp::UMin => self.plain(Opcode::UMin, width, &srcs),
            AluOp::UMax => self.plain(Opcode::UMax, width, &srcs),
            AluOp::IAnd => self.plain(Opcode::And, width, &srcs),
            AluOp::IOr => self.plain(Opcode::Or, width, &srcs),
            AluOp::IXor => self.plain(Opcode::Xor, width, &srcs),
            AluOp::INot => self.plain(Opcode::Not, width, &srcs),
            AluOp::IShl => self.plain(Opcode::Shl, width, &srcs),
            AluOp::UShr => self.plain(Opcode::Shr, width, &srcs),
            AluOp::IShr => self.plain(Opcode::Ashr, width, &srcs),
            AluOp::Select => {
                // sel.b: dst = src1 ? src0 : src2.
                let s = [srcs[1], srcs[0], srcs[2]];
                self.plain(Opcode::SelB, width, &s)
            }
            AluOp::FEq => self.cmp(Opcode::FCmp, CmpCond::Eq, width, &srcs),
            AluOp::FNe => self.cmp(Opcode::FCmp, CmpCond::Ne, width, &srcs),
            AluOp::FLt => self.cmp(Opcode::FCmp, CmpCond::Lt, width, &srcs),
            AluOp::FGe => self.cmp(Opcode::FCmp, CmpCond::Ge, width, &srcs),
            AluOp::IEq => self.cmp(Opcode::ICmp, CmpCond::Eq, width, &srcs),
            AluOp::INe => self.cmp(Opcode::ICmp, CmpCond::Ne, width, &srcs),
            AluOp::ILt => self.cmp(Opcode::ICmp, CmpCond::Lt, width, &srcs),
            AluOp::IGe => self.cmp(Opcode::ICmp, CmpCond::Ge, width, &srcs),
            AluOp::ULt => self.cmp(Opcode::UCmp, CmpCond::Lt, width, &srcs),
            AluOp::UGe => self.cmp(Opcode::UCmp, CmpCond::Ge, width, &srcs),
            AluOp::F2I => self.conv(ConvKind::F2I, id, width, &srcs)?,
            AluOp::F2U => self.conv(ConvKind::F2U, id, width, &srcs)?,
            AluOp::I2F => self.conv(ConvKind::I2F, id, width, &srcs)?,
            AluOp::U2F => self.conv(ConvKind::U2F, id, width, &srcs)?,
            AluOp::F2F => self.conv(ConvKind::F2F, id, width, &srcs)?,
            AluOp::U2U => self.conv(ConvKind::U2U, id, width, &srcs)?,
            AluOp::I2I => self.conv(ConvKind::I2I, id, width, &srcs)?,
            other => {
                return Err(CompileError::bug(
                    BugCode::UnreachableOpcode,
                    format!("{other:?} survived lowering"),
                ))
            }
        };
        self.set_scalar(id, value);
        Ok(())
    }

    fn plain(&mut self, opcode: Opcode, width: Width, srcs: &[Src]) -> Value {
        self.new_ssa_instr(opcode, width, srcs).0
    }

    fn cmp(
        &mut self,
        opcode: Opcode,
        cond: CmpCond,
        width: Width,
        srcs: &[Src],
    ) -> Value {
        let value = self.lir.new_value(width);
        let mut instr = Instr::new(opcode);
        instr.cond = Some(cond);
        instr.dsts.push(Dst::ssa(value, width));
        instr.srcs.extend(srcs.iter().copied());
        self.emit(instr);
        value
    }

    fn conv(
        &mut self,
        kind: ConvKind,
        id: HirId,
        dst_w: Width,
        srcs: &[Src],
    ) -> Result<Value> {
        let src_ty = self.hir.ty(self.hir.instr(id).srcs[0]);
        let src_w = width_of(src_ty)?;
        let value = self.lir.new_value(dst_w);
        let mut instr = Instr::new(Opcode::Cov);
        instr.extra = InstrExtra::Conv {
            kind,
            src: src_w,
            dst: dst_w,
        };
        instr.dsts.push(Dst::ssa(value, dst_w));
        instr.srcs.extend(srcs.iter().copied());
        self.emit(instr);
        Ok(value)
    }

    /// Splits a memory offset into a register part and an immediate
    /// element offset, reusing HIR constant knowledge.
    fn offset_parts(&mut self, offset: HirId) -> Result<(Option<Value>, i32)> {
        if let Some(k) = self.hir.as_const_u32(offset) {
            return Ok((None, k as i32));
        }
        if let HirOp::Alu(AluOp::IAdd) = self.hir.instr(offset).op {
            let a = self.hir.instr(offset).srcs[0];
            let b = self.hir.instr(offset).srcs[1];
            if let Some(k) = self.hir.as_const_u32(b) {
                return Ok((Some(self.val(a, 0)?), k as i32));
            }
            if let Some(k) = self.hir.as_const_u32(a) {
                return Ok((Some(self.val(b, 0)?), k as i32));
            }
        }
        Ok((Some(self.val(offset, 0)?), 0))
    }

    fn mem_instr(
        &mut self,
        opcode: Opcode,
        offset: i32,
        binding: u8,
        srcs: &[Src],
        class: BarrierClass,
    ) -> Instr {
        let mut instr = Instr::new(opcode);
        instr.extra = InstrExtra::Mem(MemInfo { offset, binding });
        instr.srcs.extend(srcs.iter().copied());
        instr.barrier_class = class;
        instr.barrier_conflict = class.default_conflict();
        instr
    }

    fn var_array(&mut self, var: VarId) -> ArrayId {
        if let Some(&id) = self.var_arrays.get(&var) {
            return id;
        }
        let ty = self.hir.vars[var.0 as usize];
        let id = self.lir.new_array(ty.comps as u16, ty.bits == 16);
        self.var_arrays.insert(var, id);
        id
    }

    fn array_dep(&mut self, array: ArrayId, instr: InstrId, write: bool) {
        // Reads and writes of one array order against its last write.
        if let Some(last) = self.lir.arrays[array].last_write {
            if last != instr {
                self.lir.instrs[instr].deps.push(last);
            }
        }
        if write {
            self.lir.arrays[array].last_write = Some(instr);
        }
    }

    fn emit_instr(&mut self, id: HirId) -> Result<()> {
        let hir_instr = self.hir.instr(id).clone();
        let ty = hir_instr.ty;
        match &hir_instr.op {
            HirOp::Const { words } => {
                let width = width_of(ty.to_scalar())?;
                let mut vals = SmallVec::new();
                for &w in words.iter() {
                    let imm = if ty.base == ScalarBase::Float && ty.bits == 32 {
                        Imm::float(f32::from_bits(w))
                    } else {
                        Imm::uint(w)
                    };
                    vals.push(self.mov_imm(width, imm));
                }
                self.val_map.insert(id, vals);
            }
            HirOp::Undef => {
                // Undefined values read as zero.
                let width = width_of(ty.to_scalar())?;
                let v = self.mov_imm(width, Imm::uint(0));
                self.set_scalar(id, v);
            }
            HirOp::Copy => {
                let vals = self.vals(hir_instr.srcs[0])?.clone();
                self.val_map.insert(id, vals);
            }
            HirOp::Alu(op) => self.emit_alu(id, *op)?,
            HirOp::VecCompose => {
                let mut vals = SmallVec::new();
                for &s in &hir_instr.srcs {
                    vals.push(self.val(s, 0)?);
                }
                self.val_map.insert(id, vals);
            }
            HirOp::VecExtract { comp } => {
                let v = self.val(hir_instr.srcs[0], *comp as usize)?;
                self.set_scalar(id, v);
            }
            HirOp::Phi => {
                let (end_then, end_else) = self.last_if.ok_or_else(|| {
                    CompileError::bug(
                        BugCode::MalformedStructure,
                        "phi without a preceding if",
                    )
                })?;
                let width = width_of(ty.to_scalar())?;
                let mut vals = SmallVec::new();
                for comp in 0..ty.comps {
                    let t = self.val(hir_instr.srcs[0], comp as usize)?;
                    let e = self.val(hir_instr.srcs[1], comp as usize)?;
                    let value = self.lir.new_value(width);
                    let mut instr = Instr::new(Opcode::Phi);
                    instr.dsts.push(Dst::ssa(value, width));
                    instr.srcs.push(Src::ssa(t, width));
                    instr.srcs.push(Src::ssa(e, width));
                    instr.extra = InstrExtra::Phi {
                        preds: smallvec![end_then, end_else],
                    };
                    self.emit(instr);
                    vals.push(value);
                }
                self.val_map.insert(id, vals);
            }
            HirOp::LoadVar(var) => {
                let array = self.var_array(*var);
                let decl_ty = self.hir.vars[var.0 as usize];
                let width = width_of(decl_ty.to_scalar())?;
                let mut vals = SmallVec::new();
                for comp in 0..decl_ty.comps {
                    let value = self.lir.new_value(width);
                    let mut instr = Instr::new(Opcode::Mov);
                    instr.dsts.push(Dst::ssa(value, width));
                    instr.srcs.push(Src {
                        kind: SrcKind::Array {
                            id: array,
                            elem: comp as u16,
                        },
                        width,
                        mods: SrcMods::empty(),
                    });
                    instr.barrier_class = BarrierClass::ARRAY_R;
                    instr.barrier_conflict = BarrierClass::ARRAY_W;
                    let iid = self.emit(instr);
                    self.array_dep(array, iid, false);
                    vals.push(value);
                }
                self.val_map.insert(id, vals);
            }
            HirOp::StoreVar(var) => {
                let array = self.var_array(*var);
                let decl_ty = self.hir.vars[var.0 as usize];
                let width = width_of(decl_ty.to_scalar())?;
                for comp in 0..decl_ty.comps {
                    let mut instr = Instr::new(Opcode::Mov);
                    instr.dsts.push(Dst {
                        kind: DstKind::Array {
                            id: array,
                            elem: comp as u16,
                        },
                        width,
                        wrmask: 1,
                    });
                    instr.srcs.push(self.src(hir_instr.srcs[0], comp as usize)?);
                    instr.barrier_class = BarrierClass::ARRAY_W;
                    instr.barrier_conflict =
                        BarrierClass::ARRAY_R | BarrierClass::ARRAY_W;
                    let iid = self.emit(instr);
                    self.array_dep(array, iid, true);
                    self.lir.keep(iid);
                }
            }
            HirOp::LoadInput { input } => {
                let decl = self.hir.inputs[*input as usize];
                if self.hir.stage == Stage::Fragment {
                    let flat = decl.interp == InterpMode::Flat && G::FLAT_BYPASS;
                    let pair = self.bary_pair()?;
                    let mut vals = SmallVec::new();
                    for comp in 0..decl.comps {
                        let inloc =
                            decl.driver_location as u32 * 4 + comp as u32;
                        let loc = Src::imm(Imm::uint(inloc), Width::W32);
                        let value = if flat {
                            self.plain(Opcode::Flat, Width::W32, &[loc])
                        } else {
                            let ij = Src::ssa(pair, Width::W32);
                            self.plain(Opcode::Bary, Width::W32, &[loc, ij])
                        };
                        vals.push(value);
                    }
                    self.val_map.insert(id, vals);
                } else {
                    let vals = self
                        .input_vals
                        .get(&(*input as u16))
                        .cloned()
                        .ok_or_else(|| {
                            CompileError::bug(
                                BugCode::UseBeforeDef,
                                "input not prepared",
                            )
                        })?;
                    self.val_map.insert(id, vals);
                }
            }
            HirOp::InterpolateAt { input } => {
                let decl = self.hir.inputs[*input as usize];
                let comps: SmallVec<[Value; 4]> = (0..2)
                    .map(|c| self.val(hir_instr.srcs[0], c))
                    .collect::<Result<_>>()?;
                let pair = self.grouped(&comps, Width::W32);
                let mut vals = SmallVec::new();
                for comp in 0..decl.comps {
                    let inloc = decl.driver_location as u32 * 4 + comp as u32;
                    let loc = Src::imm(Imm::uint(inloc), Width::W32);
                    let ij = Src::ssa(pair, Width::W32);
                    vals.push(self.plain(Opcode::Bary, Width::W32, &[loc, ij]));
                }
                self.val_map.insert(id, vals);
            }
            HirOp::LoadBarycentric { mode } => {
                if *mode != BaryMode::Pixel {
                    return Err(CompileError::bug(
                        BugCode::UnreachableOpcode,
                        "barycentric mode survived lowering",
                    ));
                }
                let vals = self
                    .input_vals
                    .get(&BARY_SLOT)
                    .cloned()
                    .expect("prepared by entry scan");
                self.val_map.insert(id, vals);
            }
            HirOp::Ddx | HirOp::Ddy => {
                let opcode = if hir_instr.op == HirOp::Ddx {
                    Opcode::Dsx
                } else {
                    Opcode::Dsy
                };
                let s = self.src(hir_instr.srcs[0], 0)?;
                let value = self.lir.new_value(Width::W32);
                let mut instr = Instr::new(opcode);
                instr.dsts.push(Dst::ssa(value, Width::W32));
                instr.srcs.push(s);
                instr.extra = InstrExtra::Tex(TexInfo {
                    comps: 1,
                    ..TexInfo::default()
                });
                self.emit(instr);
                self.set_scalar(id, value);
            }
            HirOp::StoreOutput { output } => {
                let decl = self.hir.outputs[*output as usize];
                for comp in 0..decl.comps {
                    let value = self.val(hir_instr.srcs[0], comp as usize)?;
                    self.outputs.push(OutputBinding {
                        decl: *output,
                        comp,
                        value,
                    });
                }
            }
            HirOp::LoadSysval(sv) => {
                if let Some(slot) = sysval_slot(sv) {
                    let vals = self
                        .input_vals
                        .get(&slot)
                        .cloned()
                        .expect("prepared by entry scan");
                    self.val_map.insert(id, vals);
                } else {
                    let word = match sv {
                        Sysval::TessFactorBase => driver_params::TESS_FACTOR_BASE,
                        Sysval::TessParamBase => driver_params::TESS_PARAM_BASE,
                        Sysval::ArraySizeMinus1 { tex } => {
                            driver_params::ARRAY_SIZES + *tex as u16
                        }
                        Sysval::SamplePosFromId => {
                            // Sample positions sit in a driver table read
                            // through the dynamically indexed const load.
                            let idx = self.src(hir_instr.srcs[0], 0)?;
                            let instr = self.mem_instr(
                                Opcode::LdC,
                                0,
                                15,
                                &[idx],
                                BarrierClass::empty(),
                            );
                            let vals =
                                self.emit_grouped_def(instr, 2, Width::W32);
                            self.val_map.insert(id, vals);
                            return Ok(());
                        }
                        other => {
                            return Err(CompileError::bug(
                                BugCode::UnreachableOpcode,
                                format!("sysval {other:?} has no mapping"),
                            ))
                        }
                    };
                    let v = self.mov_const(Width::W32, ConstSlot::new(word));
                    self.set_scalar(id, v);
                }
            }
            HirOp::LoadUbo { ubo } => {
                // Runtime-offset UBO access reads through the const cache
                // with a word offset.
                let byte_off = self.val(hir_instr.srcs[0], 0)?;
                let two = Src::imm(Imm::uint(2), Width::W32);
                let words = self.plain(
                    Opcode::Shr,
                    Width::W32,
                    &[Src::ssa(byte_off, Width::W32), two],
                );
                let instr = self.mem_instr(
                    Opcode::LdC,
                    0,
                    *ubo,
                    &[Src::ssa(words, Width::W32)],
                    BarrierClass::empty(),
                );
                let width = width_of(ty.to_scalar())?;
                let vals = self.emit_grouped_def(instr, ty.comps, width);
                self.val_map.insert(id, vals);
            }
            HirOp::LoadConstFile { word } => {
                let width = width_of(ty.to_scalar())?;
                let mut vals = SmallVec::new();
                for comp in 0..ty.comps {
                    vals.push(
                        self.mov_const(width, ConstSlot::new(word + comp as u16)),
                    );
                }
                self.val_map.insert(id, vals);
            }
            HirOp::StoreConstFile { word } => {
                let data = self.src(hir_instr.srcs[0], 0)?;
                let instr = self.mem_instr(
                    Opcode::StC,
                    *word as i32,
                    0,
                    &[data],
                    BarrierClass::empty(),
                );
                let iid = self.emit(instr);
                self.lir.keep(iid);
            }
            HirOp::LoadSsbo { binding, .. } => {
                let width = width_of(ty.to_scalar())?;
                let (reg, imm) = self.offset_parts(hir_instr.srcs[0])?;
                let use_isam =
                    G::HAS_ISAM_SSBO && !self.ssbo_written.contains(binding);
                let vals = if use_isam {
                    // The texture path has no immediate offset field, so
                    // fold the constant back into the offset register.
                    let off_val = match (reg, imm) {
                        (Some(v), 0) => v,
                        (Some(v), k) => self.plain(
                            Opcode::IAdd,
                            Width::W32,
                            &[
                                Src::ssa(v, Width::W32),
                                Src::imm(Imm::int(k), Width::W32),
                            ],
                        ),
                        (None, k) => self.mov_imm(Width::W32, Imm::uint(k as u32)),
                    };
                    let mut instr = Instr::new(Opcode::Isam);
                    instr.srcs.push(Src::ssa(off_val, Width::W32));
                    instr.extra = InstrExtra::Tex(TexInfo {
                        tex: *binding,
                        comps: ty.comps,
                        ..TexInfo::default()
                    });
                    instr.barrier_class = BarrierClass::BUFFER_R;
                    instr.barrier_conflict = BarrierClass::BUFFER_W;
                    self.emit_grouped_def(instr, ty.comps, width)
                } else {
                    let srcs: SmallVec<[Src; 3]> = match reg {
                        Some(v) => smallvec![Src::ssa(v, Width::W32)],
                        None => SmallVec::new(),
                    };
                    let instr = self.mem_instr(
                        Opcode::LdIbo,
                        imm,
                        *binding,
                        &srcs,
                        BarrierClass::BUFFER_R,
                    );
                    self.emit_grouped_def(instr, ty.comps, width)
                };
                self.val_map.insert(id, vals);
            }
            HirOp::StoreSsbo { binding, .. } => {
                let value_ty = self.hir.ty(hir_instr.srcs[0]);
                let width = width_of(value_ty.to_scalar())?;
                let comps: SmallVec<[Value; 4]> = (0..value_ty.comps)
                    .map(|c| self.val(hir_instr.srcs[0], c as usize))
                    .collect::<Result<_>>()?;
                let data = self.grouped(&comps, width);
                let (reg, imm) = self.offset_parts(hir_instr.srcs[1])?;
                let mut srcs: SmallVec<[Src; 3]> = SmallVec::new();
                match reg {
                    Some(v) => srcs.push(Src::ssa(v, Width::W32)),
                    None => {
                        let v = self.mov_imm(Width::W32, Imm::uint(0));
                        srcs.push(Src::ssa(v, Width::W32));
                    }
                }
                srcs.push(Src::ssa(data, width));
                let instr = self.mem_instr(
                    Opcode::StIbo,
                    imm,
                    *binding,
                    &srcs,
                    BarrierClass::BUFFER_W,
                );
                let iid = self.emit(instr);
                self.lir.keep(iid);
            }
            HirOp::SsboAtomic { binding, kind } => {
                let width = width_of(ty.to_scalar())?;
                let (reg, imm) = self.offset_parts(hir_instr.srcs[0])?;
                let mut srcs: SmallVec<[Src; 3]> = SmallVec::new();
                match reg {
                    Some(v) => srcs.push(Src::ssa(v, Width::W32)),
                    None => {
                        let v = self.mov_imm(Width::W32, Imm::uint(0));
                        srcs.push(Src::ssa(v, Width::W32));
                    }
                }
                for s in &hir_instr.srcs[1..] {
                    srcs.push(self.src(*s, 0)?);
                }
                let opcode = atomic_opcode(kind);
                let mut instr = self.mem_instr(
                    opcode,
                    imm,
                    *binding,
                    &srcs,
                    BarrierClass::BUFFER_R | BarrierClass::BUFFER_W,
                );
                let value = self.lir.new_value(width);
                instr.dsts.push(Dst::ssa(value, width));
                let iid = self.emit(instr);
                self.lir.keep(iid);
                self.set_scalar(id, value);
            }
            HirOp::LoadShared => {
                let width = width_of(ty.to_scalar())?;
                let (reg, imm) = self.offset_parts(hir_instr.srcs[0])?;
                let srcs: SmallVec<[Src; 3]> = match reg {
                    Some(v) => smallvec![Src::ssa(v, Width::W32)],
                    None => SmallVec::new(),
                };
                let instr = self.mem_instr(
                    Opcode::LdL,
                    imm,
                    0,
                    &srcs,
                    BarrierClass::SHARED_R,
                );
                let vals = self.emit_grouped_def(instr, ty.comps, width);
                self.val_map.insert(id, vals);
            }
            HirOp::StoreShared => {
                let value_ty = self.hir.ty(hir_instr.srcs[0]);
                let width = width_of(value_ty.to_scalar())?;
                let comps: SmallVec<[Value; 4]> = (0..value_ty.comps)
                    .map(|c| self.val(hir_instr.srcs[0], c as usize))
                    .collect::<Result<_>>()?;
                let data = self.grouped(&comps, width);
                let (reg, imm) = self.offset_parts(hir_instr.srcs[1])?;
                let mut srcs: SmallVec<[Src; 3]> = SmallVec::new();
                match reg {
                    Some(v) => srcs.push(Src::ssa(v, Width::W32)),
                    None => {
                        let v = self.mov_imm(Width::W32, Imm::uint(0));
                        srcs.push(Src::ssa(v, Width::W32));
                    }
                }
                srcs.push(Src::ssa(data, width));
                let instr =
                    self.mem_instr(Opcode::StL, imm, 0, &srcs, BarrierClass::SHARED_W);
                let iid = self.emit(instr);
                self.lir.keep(iid);
            }
            HirOp::LoadGlobal => {
                let width = width_of(ty.to_scalar())?;
                let (reg, imm) = self.offset_parts(hir_instr.srcs[0])?;
                let srcs: SmallVec<[Src; 3]> = match reg {
                    Some(v) => smallvec![Src::ssa(v, Width::W32)],
                    None => SmallVec::new(),
                };
                let instr = self.mem_instr(
                    Opcode::LdG,
                    imm,
                    0,
                    &srcs,
                    BarrierClass::BUFFER_R,
                );
                let vals = self.emit_grouped_def(instr, ty.comps, width);
                self.val_map.insert(id, vals);
            }
            HirOp::StoreGlobal => {
                let value_ty = self.hir.ty(hir_instr.srcs[0]);
                let width = width_of(value_ty.to_scalar())?;
                let comps: SmallVec<[Value; 4]> = (0..value_ty.comps)
                    .map(|c| self.val(hir_instr.srcs[0], c as usize))
                    .collect::<Result<_>>()?;
                let data = self.grouped(&comps, width);
                let (reg, imm) = self.offset_parts(hir_instr.srcs[1])?;
                let mut srcs: SmallVec<[Src; 3]> = SmallVec::new();
                match reg {
                    Some(v) => srcs.push(Src::ssa(v, Width::W32)),
                    None => {
                        let v = self.mov_imm(Width::W32, Imm::uint(0));
                        srcs.push(Src::ssa(v, Width::W32));
                    }
                }
                srcs.push(Src::ssa(data, width));
                let instr = self.mem_instr(
                    Opcode::StG,
                    imm,
                    0,
                    &srcs,
                    BarrierClass::BUFFER_W,
                );
                let iid = self.emit(instr);
                self.lir.keep(iid);
            }
            HirOp::ImageLoad { image } => {
                let width = width_of(ty.to_scalar())?;
                let coord_ty = self.hir.ty(hir_instr.srcs[0]);
                let comps: SmallVec<[Value; 4]> = (0..coord_ty.comps)
                    .map(|c| self.val(hir_instr.srcs[0], c as usize))
                    .collect::<Result<_>>()?;
                let coord = self.grouped(&comps, Width::W32);
                let instr = self.mem_instr(
                    Opcode::LdImg,
                    0,
                    *image,
                    &[Src::ssa(coord, Width::W32)],
                    BarrierClass::IMAGE_R,
                );
                let vals = self.emit_grouped_def(instr, ty.comps, width);
                self.val_map.insert(id, vals);
            }
            HirOp::ImageStore { image } => {
                let value_ty = self.hir.ty(hir_instr.srcs[0]);
                let width = width_of(value_ty.to_scalar())?;
                let data_comps: SmallVec<[Value; 4]> = (0..value_ty.comps)
                    .map(|c| self.val(hir_instr.srcs[0], c as usize))
                    .collect::<Result<_>>()?;
                let data = self.grouped(&data_comps, width);
                let coord_ty = self.hir.ty(hir_instr.srcs[1]);
                let coord_comps: SmallVec<[Value; 4]> = (0..coord_ty.comps)
                    .map(|c| self.val(hir_instr.srcs[1], c as usize))
                    .collect::<Result<_>>()?;
                let coord = self.grouped(&coord_comps, Width::W32);
                let instr = self.mem_instr(
                    Opcode::StImg,
                    0,
                    *image,
                    &[Src::ssa(coord, Width::W32), Src::ssa(data, width)],
                    BarrierClass::IMAGE_W,
                );
                let iid = self.emit(instr);
                self.lir.keep(iid);
            }
            HirOp::ImageAtomic { image, kind } => {
                let width = width_of(ty.to_scalar())?;
                let coord_ty = self.hir.ty(hir_instr.srcs[0]);
                let coord_comps: SmallVec<[Value; 4]> = (0..coord_ty.comps)
                    .map(|c| self.val(hir_instr.srcs[0], c as usize))
                    .collect::<Result<_>>()?;
                let coord = self.grouped(&coord_comps, Width::W32);
                let mut srcs: SmallVec<[Src; 3]> =
                    smallvec![Src::ssa(coord, Width::W32)];
                for s in &hir_instr.srcs[1..] {
                    srcs.push(self.src(*s, 0)?);
                }
                let mut instr = self.mem_instr(
                    atomic_opcode(kind),
                    0,
                    *image,
                    &srcs,
                    BarrierClass::IMAGE_R | BarrierClass::IMAGE_W,
                );
                let value = self.lir.new_value(width);
                instr.dsts.push(Dst::ssa(value, width));
                let iid = self.emit(instr);
                self.lir.keep(iid);
                self.set_scalar(id, value);
            }
            HirOp::TexSize { tex } => {
                let width = width_of(ty.to_scalar())?;
                let lod = self.mov_imm(Width::W32, Imm::uint(0));
                let mut instr = Instr::new(Opcode::GetSize);
                instr.srcs.push(Src::ssa(lod, Width::W32));
                instr.extra = InstrExtra::Tex(TexInfo {
                    tex: *tex,
                    comps: ty.comps,
                    ..TexInfo::default()
                });
                let vals = self.emit_grouped_def(instr, ty.comps, width);
                self.val_map.insert(id, vals);
            }
            HirOp::Tex(op) => {
                let width = width_of(ty.to_scalar())?;
                let coord_ty = self.hir.ty(hir_instr.srcs[0]);
                let coord_comps: SmallVec<[Value; 4]> = (0..coord_ty.comps)
                    .map(|c| self.val(hir_instr.srcs[0], c as usize))
                    .collect::<Result<_>>()?;
                let coord = self.grouped(&coord_comps, Width::W32);
                let mut srcs: SmallVec<[Src; 3]> =
                    smallvec![Src::ssa(coord, Width::W32)];
                let opcode = match op.lod {
                    LodMode::Auto => Opcode::Sam,
                    LodMode::Bias => Opcode::SamB,
                    LodMode::Lod => Opcode::SamL,
                    LodMode::Grad => Opcode::SamGrad,
                };
                match op.lod {
                    LodMode::Bias | LodMode::Lod => {
                        srcs.push(self.src(hir_instr.srcs[1], 0)?);
                    }
                    LodMode::Grad => {
                        for g in &hir_instr.srcs[1..3] {
                            let g_ty = self.hir.ty(*g);
                            let comps: SmallVec<[Value; 4]> = (0..g_ty.comps)
                                .map(|c| self.val(*g, c as usize))
                                .collect::<Result<_>>()?;
                            let grad = self.grouped(&comps, Width::W32);
                            srcs.push(Src::ssa(grad, Width::W32));
                        }
                    }
                    LodMode::Auto => {}
                }
                let offset = match op.offset {
                    Some((x, y, z)) => TexOffset::new(x, y, z)
                        .map_err(|_| {
                            CompileError::UnsupportedFeature(
                                "texture offset out of field range".into(),
                            )
                        })?,
                    None => TexOffset::NONE,
                };
                let mut instr = Instr::new(opcode);
                instr.srcs = srcs;
                instr.extra = InstrExtra::Tex(TexInfo {
                    tex: op.tex,
                    samp: op.samp,
                    offset,
                    array: op.array,
                    comps: ty.comps,
                });
                let vals = self.emit_grouped_def(instr, ty.comps, width);
                self.val_map.insert(id, vals);
            }
            HirOp::Discard => {
                let mut instr = Instr::new(Opcode::Demote);
                instr.flags |= InstrFlags::KILL;
                instr.barrier_class = BarrierClass::ACTIVE_FRAGMENT;
                let iid = self.emit(instr);
                self.lir.keep(iid);
            }
            HirOp::Barrier(kind) => {
                let iid = match kind {
                    BarrierKind::Workgroup => {
                        let mut instr = Instr::new(Opcode::Bar);
                        instr.barrier_class = BarrierClass::EVERYTHING;
                        instr.barrier_conflict = BarrierClass::EVERYTHING;
                        self.emit(instr)
                    }
                    BarrierKind::Buffer => {
                        let classes =
                            BarrierClass::BUFFER_R | BarrierClass::BUFFER_W;
                        let mut instr = Instr::new(Opcode::Fence);
                        instr.extra = InstrExtra::Fence { classes };
                        instr.barrier_class = classes;
                        instr.barrier_conflict = classes;
                        self.emit(instr)
                    }
                    BarrierKind::Image => {
                        let classes = BarrierClass::IMAGE_R | BarrierClass::IMAGE_W;
                        let mut instr = Instr::new(Opcode::Fence);
                        instr.extra = InstrExtra::Fence { classes };
                        instr.barrier_class = classes;
                        instr.barrier_conflict = classes;
                        self.emit(instr)
                    }
                };
                self.lir.keep(iid);
            }
            HirOp::LoadPerVertexOutput { .. } | HirOp::StorePerVertexOutput { .. } => {
                return Err(CompileError::bug(
                    BugCode::UnreachableOpcode,
                    format!("{:?} survived lowering", hir_instr.op),
                ))
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<EmitOutput> {
        // `end` consumes every output so liveness keeps them to the very
        // end of the shader.
        let mut end = Instr::new(Opcode::End);
        end.flags |= InstrFlags::EI;
        for out in &self.outputs {
            let width = self.lir.width_of(out.value);
            end.srcs.push(Src::ssa(out.value, width));
        }
        let end_id = self.emit(end);
        self.lir.keep(end_id);
        Ok(EmitOutput {
            lir: self.lir,
            inputs: self.inputs,
            outputs: self.outputs,
            end: end_id,
        })
    }
}

fn atomic_opcode(kind: &crate::hir::AtomicKind) -> Opcode {
    use crate::hir::AtomicKind;
    match kind {
        AtomicKind::Add => Opcode::AtomicAdd,
        AtomicKind::Min => Opcode::AtomicMin,
        AtomicKind::Max => Opcode::AtomicMax,
        AtomicKind::And => Opcode::AtomicAnd,
        AtomicKind::Or => Opcode::AtomicOr,
        AtomicKind::Xor => Opcode::AtomicXor,
        AtomicKind::Exchange => Opcode::AtomicExch,
        AtomicKind::CompareExchange => Opcode::AtomicCmpXchg,
    }
}

/// Lowers the structured HIR into predicated LIR.
pub fn emit<G: Generation>(hir: &HirShader) -> Result<EmitOutput> {
    let span = tracing::debug_span!("emit").entered();
    let mut e = Emitter::<G>::new(hir);
    for instr_id in 0..hir.instrs.len() {
        if let HirOp::StoreSsbo { binding, .. } | HirOp::SsboAtomic { binding, .. } =
            hir.instrs[instr_id].op
        {
            e.ssbo_written.insert(binding);
        }
    }
    e.emit_entry_inputs();
    e.lir.consts.ubo_uploads = hir.ubo_uploads.clone();
    let regions = layout::leading_regions(hir);
    e.lir.consts.driver_params = regions.driver_params;
    e.lir.consts.stream_out = regions.stream_out;
    e.lir.consts.ubo_bases = regions.ubo_bases;
    e.lir.consts.ssbo_sizes = regions.ssbo_sizes;
    e.lir.consts.image_dims = regions.image_dims;
    if !hir.preamble.is_empty() {
        // The preamble brackets live in their own blocks so scheduling
        // cannot migrate work across `shps`/`shpe`.
        let getone = e.emit(Instr::new(Opcode::GetOne));
        e.lir.keep(getone);
        let shps = e.emit(Instr::new(Opcode::ShPs));
        e.lir.keep(shps);
        let entry = e.cur;
        let pre_block = e.lir.new_block();
        e.edge(entry, pre_block);
        e.cur = pre_block;
        e.emit_body(&hir.preamble)?;
        let shpe = e.emit(Instr::new(Opcode::ShPe));
        e.lir.keep(shpe);
        let main_block = e.lir.new_block();
        let pre_end = e.cur;
        e.edge(pre_end, main_block);
        e.cur = main_block;
    }
    e.emit_body(&hir.body)?;
    let out = e.finish()?;
    drop(span);
    Ok(out)
}
