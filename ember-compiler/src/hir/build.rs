//! Programmatic HIR construction.
//!
//! The builder is how the driver frontend (and the test suite) hands a
//! shader to the compiler: instructions append to the open structured
//! scope, and `if`/`loop` scopes open and close in a stack discipline.

use super::{
    AluOp,
    BarrierKind,
    HirId,
    HirInstr,
    HirOp,
    HirShader,
    HirType,
    IoVar,
    Node,
    Sysval,
    TessInfo,
    TexOp,
    VarId,
};
use ember_asm::Stage;
use smallvec::{smallvec, SmallVec};

enum Frame {
    Root(Vec<Node>),
    If {
        cond: HirId,
        then_body: Option<Vec<Node>>,
        current: Vec<Node>,
    },
    Loop {
        current: Vec<Node>,
    },
}

/// A structured HIR builder.
pub struct HirBuilder {
    shader: HirShader,
    frames: Vec<Frame>,
}

impl HirBuilder {
    /// A builder for an empty shader of `stage`.
    pub fn new(stage: Stage) -> Self {
        Self {
            shader: HirShader::new(stage),
            frames: vec![Frame::Root(Vec::new())],
        }
    }

    /// Declares an input variable, returning its index.
    pub fn declare_input(&mut self, var: IoVar) -> u8 {
        self.shader.inputs.push(var);
        (self.shader.inputs.len() - 1) as u8
    }

    /// Declares an output variable, returning its index.
    pub fn declare_output(&mut self, var: IoVar) -> u8 {
        self.shader.outputs.push(var);
        (self.shader.outputs.len() - 1) as u8
    }

    /// Declares a UBO of `size` bytes, returning its binding.
    pub fn declare_ubo(&mut self, size: u32) -> u8 {
        self.shader.ubo_sizes.push(size);
        (self.shader.ubo_sizes.len() - 1) as u8
    }

    /// Declares a local variable.
    pub fn declare_var(&mut self, ty: HirType) -> VarId {
        self.shader.declare_var(ty)
    }

    /// Sets tessellation parameters.
    pub fn set_tess(&mut self, tess: TessInfo) {
        self.shader.tess = Some(tess);
    }

    fn current_body(&mut self) -> &mut Vec<Node> {
        match self.frames.last_mut().expect("builder has a scope") {
            Frame::Root(body) => body,
            Frame::If { current, .. } | Frame::Loop { current } => current,
        }
    }

    /// Emits an instruction into the open scope.
    pub fn push(&mut self, op: HirOp, ty: HirType, srcs: SmallVec<[HirId; 4]>) -> HirId {
        let id = self.shader.alloc_instr(HirInstr { op, ty, srcs });
        self.current_body().push(Node::Instr(id));
        id
    }

    /// A scalar u32 constant.
    pub fn const_u32(&mut self, value: u32) -> HirId {
        self.push(
            HirOp::Const {
                words: smallvec![value],
            },
            HirType::U32,
            SmallVec::new(),
        )
    }

    /// A scalar i32 constant.
    pub fn const_i32(&mut self, value: i32) -> HirId {
        self.push(
            HirOp::Const {
                words: smallvec![value as u32],
            },
            HirType::I32,
            SmallVec::new(),
        )
    }

    /// A scalar f32 constant.
    pub fn const_f32(&mut self, value: f32) -> HirId {
        self.push(
            HirOp::Const {
                words: smallvec![value.to_bits()],
            },
            HirType::F32,
            SmallVec::new(),
        )
    }

    /// A boolean constant.
    pub fn const_bool(&mut self, value: bool) -> HirId {
        self.push(
            HirOp::Const {
                words: smallvec![value as u32],
            },
            HirType::BOOL,
            SmallVec::new(),
        )
    }

    /// A vector constant of `ty`.
    pub fn const_vec(&mut self, ty: HirType, words: &[u32]) -> HirId {
        self.push(
            HirOp::Const {
                words: words.iter().copied().collect(),
            },
            ty,
            SmallVec::new(),
        )
    }

    /// A one-source ALU op.
    pub fn alu1(&mut self, op: AluOp, ty: HirType, a: HirId) -> HirId {
        self.push(HirOp::Alu(op), ty, smallvec![a])
    }

    /// A two-source ALU op.
    pub fn alu2(&mut self, op: AluOp, ty: HirType, a: HirId, b: HirId) -> HirId {
        self.push(HirOp::Alu(op), ty, smallvec![a, b])
    }

    /// A three-source ALU op.
    pub fn alu3(&mut self, op: AluOp, ty: HirType, a: HirId, b: HirId, c: HirId) -> HirId {
        self.push(HirOp::Alu(op), ty, smallvec![a, b, c])
    }

    /// Builds a vector from scalars.
    pub fn vec_compose(&mut self, ty: HirType, comps: &[HirId]) -> HirId {
        self.push(HirOp::VecCompose, ty, comps.iter().copied().collect())
    }

    /// Extracts a component of a vector.
    pub fn vec_extract(&mut self, src: HirId, comp: u8) -> HirId {
        let ty = self.shader.ty(src).to_scalar();
        self.push(HirOp::VecExtract { comp }, ty, smallvec![src])
    }

    /// Reads a local variable.
    pub fn load_var(&mut self, var: VarId) -> HirId {
        let ty = self.shader.vars[var.0 as usize];
        self.push(HirOp::LoadVar(var), ty, SmallVec::new())
    }

    /// Writes a local variable.
    pub fn store_var(&mut self, var: VarId, value: HirId) {
        let ty = self.shader.vars[var.0 as usize];
        self.push(HirOp::StoreVar(var), ty, smallvec![value]);
    }

    /// Reads a shader input.
    pub fn load_input(&mut self, input: u8, ty: HirType) -> HirId {
        self.push(HirOp::LoadInput { input }, ty, SmallVec::new())
    }

    /// Writes a shader output.
    pub fn store_output(&mut self, output: u8, value: HirId) {
        let ty = self.shader.ty(value);
        self.push(HirOp::StoreOutput { output }, ty, smallvec![value]);
    }

    /// Loads from a UBO at a byte offset.
    pub fn load_ubo(&mut self, ubo: u8, offset: HirId, ty: HirType) -> HirId {
        self.push(HirOp::LoadUbo { ubo }, ty, smallvec![offset])
    }

    /// Loads from an SSBO at a byte offset.
    pub fn load_ssbo(&mut self, binding: u8, offset: HirId, ty: HirType) -> HirId {
        self.push(
            HirOp::LoadSsbo {
                binding,
                element_offset: false,
            },
            ty,
            smallvec![offset],
        )
    }

    /// Stores to an SSBO at a byte offset.
    pub fn store_ssbo(&mut self, binding: u8, value: HirId, offset: HirId) {
        let ty = self.shader.ty(value);
        self.push(
            HirOp::StoreSsbo {
                binding,
                element_offset: false,
            },
            ty,
            smallvec![value, offset],
        );
    }

    /// Reads a system value.
    pub fn sysval(&mut self, sv: Sysval, ty: HirType) -> HirId {
        self.push(HirOp::LoadSysval(sv), ty, SmallVec::new())
    }

    /// Samples a texture.
    pub fn tex(&mut self, op: TexOp, ty: HirType, srcs: &[HirId]) -> HirId {
        self.push(HirOp::Tex(op), ty, srcs.iter().copied().collect())
    }

    /// Joins the values produced by the arms of the `if` that directly
    /// precedes the call.
    pub fn phi(&mut self, ty: HirType, then_value: HirId, else_value: HirId) -> HirId {
        self.push(HirOp::Phi, ty, smallvec![then_value, else_value])
    }

    /// Demotes the invocation.
    pub fn discard(&mut self) {
        self.push(HirOp::Discard, HirType::BOOL, SmallVec::new());
    }

    /// Emits a barrier.
    pub fn barrier(&mut self, kind: BarrierKind) {
        self.push(HirOp::Barrier(kind), HirType::U32, SmallVec::new());
    }

    /// Opens an `if` scope on `cond`.
    pub fn if_begin(&mut self, cond: HirId) {
        self.frames.push(Frame::If {
            cond,
            then_body: None,
            current: Vec::new(),
        });
    }

    /// Switches the open `if` to its else arm.
    pub fn else_begin(&mut self) {
        match self.frames.last_mut() {
            Some(Frame::If {
                then_body: then_body @ None,
                current,
                ..
            }) => {
                *then_body = Some(core::mem::take(current));
            }
            _ => panic!("else outside an open if"),
        }
    }

    /// Closes the open `if` scope.
    pub fn if_end(&mut self) {
        match self.frames.pop() {
            Some(Frame::If {
                cond,
                then_body,
                current,
            }) => {
                let (then_body, else_body) = match then_body {
                    Some(t) => (t, current),
                    None => (current, Vec::new()),
                };
                self.current_body().push(Node::If {
                    cond,
                    then_body,
                    else_body,
                });
            }
            _ => panic!("if_end outside an open if"),
        }
    }

    /// Opens a loop scope.
    pub fn loop_begin(&mut self) {
        self.frames.push(Frame::Loop {
            current: Vec::new(),
        });
    }

    /// Closes the open loop scope.
    pub fn loop_end(&mut self) {
        match self.frames.pop() {
            Some(Frame::Loop { current }) => {
                self.current_body().push(Node::Loop { body: current });
            }
            _ => panic!("loop_end outside an open loop"),
        }
    }

    /// Exits the innermost loop.
    pub fn brk(&mut self) {
        self.current_body().push(Node::Break);
    }

    /// Restarts the innermost loop.
    pub fn cont(&mut self) {
        self.current_body().push(Node::Continue);
    }

    /// Finishes the shader.
    ///
    /// Panics if a scope is still open; that is a frontend bug, not a
    /// compile error.
    pub fn finish(mut self) -> HirShader {
        assert_eq!(self.frames.len(), 1, "unclosed structured scope");
        let Some(Frame::Root(body)) = self.frames.pop() else {
            unreachable!("root frame is always last")
        };
        self.shader.body = body;
        self.shader
    }
}
