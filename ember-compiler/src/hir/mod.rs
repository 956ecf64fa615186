//! The high-level input IR.
//!
//! A typed, structured, SSA-form shader handed over by the driver: vector
//! values up to four components, bit widths from 1 to 64, structured
//! `if`/`loop` control flow, and intrinsic operations covering I/O,
//! memory, and texturing. The lowering stages of the compiler normalize
//! this form until every operation maps to the low-level instruction set.

mod build;
mod divergence;

pub use build::HirBuilder;
pub use divergence::analyze_divergence;

use core::fmt;
use smallvec::SmallVec;

/// Index of a HIR instruction; also names the value the instruction
/// defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct HirId(u32);

impl HirId {
    /// Id from a raw index.
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Raw index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Index of a local variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct VarId(pub u32);

/// Scalar base type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScalarBase {
    /// IEEE float.
    Float,
    /// Signed integer.
    Sint,
    /// Unsigned integer.
    Uint,
    /// One-bit boolean.
    Bool,
}

/// A (possibly vector) HIR type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HirType {
    /// Scalar base.
    pub base: ScalarBase,
    /// Scalar width in bits: 1, 8, 16, 32 or 64.
    pub bits: u8,
    /// Component count, 1..=4.
    pub comps: u8,
}

impl HirType {
    /// Scalar type constructor.
    pub const fn scalar(base: ScalarBase, bits: u8) -> Self {
        Self {
            base,
            bits,
            comps: 1,
        }
    }

    /// Vector type constructor.
    pub const fn vector(base: ScalarBase, bits: u8, comps: u8) -> Self {
        Self { base, bits, comps }
    }

    /// 32-bit unsigned scalar.
    pub const U32: Self = Self::scalar(ScalarBase::Uint, 32);
    /// 32-bit signed scalar.
    pub const I32: Self = Self::scalar(ScalarBase::Sint, 32);
    /// 32-bit float scalar.
    pub const F32: Self = Self::scalar(ScalarBase::Float, 32);
    /// One-bit boolean scalar.
    pub const BOOL: Self = Self::scalar(ScalarBase::Bool, 1);

    /// The same type with one component.
    pub const fn to_scalar(self) -> Self {
        Self { comps: 1, ..self }
    }

    /// Whether this is a vector type.
    pub const fn is_vector(self) -> bool {
        self.comps > 1
    }
}

/// Scalarizable ALU operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AluOp {
    /// Float add.
    FAdd,
    /// Float subtract.
    FSub,
    /// Float multiply.
    FMul,
    /// Fused multiply-add.
    FMad,
    /// Float minimum.
    FMin,
    /// Float maximum.
    FMax,
    /// Float negate.
    FNeg,
    /// Float absolute value.
    FAbs,
    /// Float floor.
    FFloor,
    /// Float fractional part.
    FFract,
    /// Reciprocal.
    FRcp,
    /// Reciprocal square root.
    FRsq,
    /// Square root.
    FSqrt,
    /// Base-2 logarithm.
    FLog2,
    /// Base-2 exponential.
    FExp2,
    /// Sine (radians).
    FSin,
    /// Cosine (radians).
    FCos,
    /// Integer add.
    IAdd,
    /// Integer subtract.
    ISub,
    /// Integer multiply, low half.
    IMul,
    /// Unsigned multiply, high half.
    UMulHigh,
    /// Unsigned divide.
    UDiv,
    /// Unsigned modulo.
    UMod,
    /// Integer negate.
    INeg,
    /// Signed minimum.
    IMin,
    /// Signed maximum.
    IMax,
    /// Unsigned minimum.
    UMin,
    /// Unsigned maximum.
    UMax,
    /// Bitwise and.
    IAnd,
    /// Bitwise or.
    IOr,
    /// Bitwise exclusive or.
    IXor,
    /// Bitwise complement.
    INot,
    /// Shift left.
    IShl,
    /// Logical shift right.
    UShr,
    /// Arithmetic shift right.
    IShr,
    /// Float compare, equal.
    FEq,
    /// Float compare, not equal.
    FNe,
    /// Float compare, less.
    FLt,
    /// Float compare, greater or equal.
    FGe,
    /// Integer compare, equal.
    IEq,
    /// Integer compare, not equal.
    INe,
    /// Signed compare, less.
    ILt,
    /// Signed compare, greater or equal.
    IGe,
    /// Unsigned compare, less.
    ULt,
    /// Unsigned compare, greater or equal.
    UGe,
    /// Boolean and.
    BAnd,
    /// Boolean or.
    BOr,
    /// Boolean not.
    BNot,
    /// Select: `srcs[0] ? srcs[1] : srcs[2]`.
    Select,
    /// Boolean to float (0.0 / 1.0).
    B2F,
    /// Boolean to integer (0 / 1).
    B2I,
    /// Integer to boolean (`!= 0`).
    I2B,
    /// Float to boolean (`!= 0.0`).
    F2B,
    /// Float to signed integer.
    F2I,
    /// Float to unsigned integer.
    F2U,
    /// Signed integer to float.
    I2F,
    /// Unsigned integer to float.
    U2F,
    /// Float width conversion.
    F2F,
    /// Unsigned width conversion.
    U2U,
    /// Signed width conversion.
    I2I,
    /// Sine quadrant fix-up stage; produced by trig lowering.
    SinPt1,
    /// Sine first-quadrant sinc stage; produced by trig lowering.
    SinPt2,
}

impl AluOp {
    /// Whether the result is a comparison/boolean.
    pub const fn is_cmp(self) -> bool {
        matches!(
            self,
            Self::FEq
                | Self::FNe
                | Self::FLt
                | Self::FGe
                | Self::IEq
                | Self::INe
                | Self::ILt
                | Self::IGe
                | Self::ULt
                | Self::UGe
        )
    }
}

/// System values a shader can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Sysval {
    /// Vertex index.
    VertexId,
    /// Instance index.
    InstanceId,
    /// Fragment coordinate (vec4).
    FragCoord,
    /// Sample index.
    SampleId,
    /// Sample position from a sample index; consumes one source.
    SamplePosFromId,
    /// Tessellation invocation (output control point) index.
    InvocationId,
    /// Patch index within the draw.
    PatchId,
    /// Tessellation coordinate (vec2/vec3).
    TessCoord,
    /// Local invocation id (uvec3).
    LocalInvocationId,
    /// Workgroup id (uvec3).
    WorkgroupId,
    /// One-past-max texture array layer for a binding; consumes no
    /// sources, the binding rides in the payload.
    ArraySizeMinus1 {
        /// Texture binding queried.
        tex: u8,
    },
    /// Base address of the tess-factor region.
    TessFactorBase,
    /// Base address of the tess-param (per-patch varying) region.
    TessParamBase,
}

/// Barycentric interpolation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BaryMode {
    /// At the pixel center.
    Pixel,
    /// At a given sample index; consumes one source.
    AtSample,
    /// At a pixel-relative offset; consumes one vec2 source.
    AtOffset,
}

/// Texture dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TexDim {
    /// 1D.
    Dim1D,
    /// 2D.
    Dim2D,
    /// 3D.
    Dim3D,
    /// Cube map.
    Cube,
}

impl TexDim {
    /// Coordinate component count, without array layer or projector.
    pub const fn coord_comps(self) -> u8 {
        match self {
            Self::Dim1D => 1,
            Self::Dim2D => 2,
            Self::Dim3D | Self::Cube => 3,
        }
    }
}

/// Level-of-detail selection of a texture sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LodMode {
    /// Implicit derivatives.
    Auto,
    /// Lod bias; one extra source.
    Bias,
    /// Explicit lod; one extra source.
    Lod,
    /// Explicit gradients; two extra vector sources.
    Grad,
}

/// A texture sampling operation descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TexOp {
    /// Texture binding.
    pub tex: u8,
    /// Sampler binding.
    pub samp: u8,
    /// Dimensionality.
    pub dim: TexDim,
    /// Whether the coordinate carries a trailing array layer.
    pub array: bool,
    /// Whether the array layer has been converted to a clamped integer;
    /// set by texture legalization.
    pub layer_is_int: bool,
    /// Whether the coordinate carries a trailing projector to divide by.
    pub proj: bool,
    /// Static texel offset, if any; each component in `[-8, 7]` after
    /// legalization.
    pub offset: Option<(i8, i8, i8)>,
    /// Lod selection.
    pub lod: LodMode,
}

/// Atomic memory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AtomicKind {
    /// Addition.
    Add,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise exclusive or.
    Xor,
    /// Exchange.
    Exchange,
    /// Compare-exchange; two data sources.
    CompareExchange,
}

/// Memory-barrier scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BarrierKind {
    /// Workgroup execution + shared memory.
    Workgroup,
    /// Buffer memory ordering only.
    Buffer,
    /// Image memory ordering only.
    Image,
}

/// I/O semantic slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Semantic {
    /// Clip-space position.
    Position,
    /// Point sprite size.
    PointSize,
    /// User varying by index.
    User(u8),
    /// Fragment output color by render target.
    Color(u8),
    /// Fragment depth output.
    Depth,
    /// Outer tessellation levels.
    TessLevelOuter,
    /// Inner tessellation levels.
    TessLevelInner,
    /// Per-patch user varying.
    Patch(u8),
}

/// Varying interpolation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InterpMode {
    /// Perspective-correct.
    #[default]
    Smooth,
    /// No interpolation.
    Flat,
    /// Screen-linear.
    NoPerspective,
}

/// An input or output variable declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IoVar {
    /// Semantic slot.
    pub semantic: Semantic,
    /// Driver-assigned location used for layout.
    pub driver_location: u8,
    /// Component count.
    pub comps: u8,
    /// Interpolation, for fragment inputs.
    pub interp: InterpMode,
}

/// Tessellation domain topologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TessTopology {
    /// Triangle domain.
    Triangles,
    /// Quad domain.
    Quads,
    /// Isoline domain.
    Isolines,
}

impl TessTopology {
    /// Number of outer tessellation levels stored for this topology.
    pub const fn outer_levels(self) -> u32 {
        match self {
            Self::Triangles => 3,
            Self::Quads => 4,
            Self::Isolines => 2,
        }
    }

    /// Number of inner tessellation levels stored for this topology.
    pub const fn inner_levels(self) -> u32 {
        match self {
            Self::Triangles => 1,
            Self::Quads => 2,
            Self::Isolines => 0,
        }
    }
}

/// Tessellation-stage parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TessInfo {
    /// Domain topology.
    pub topology: TessTopology,
    /// Output control points per patch.
    pub out_vertices: u8,
}

/// One HIR operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HirOp {
    /// A typed constant; one word per component.
    Const {
        /// Component bit patterns.
        words: SmallVec<[u32; 4]>,
    },
    /// An undefined value.
    Undef,
    /// An identity of its source; introduced by rewrites and removed by
    /// copy propagation.
    Copy,
    /// A pure ALU operation.
    Alu(AluOp),
    /// Builds a vector from scalar sources.
    VecCompose,
    /// Extracts one component of a vector source.
    VecExtract {
        /// Extracted component.
        comp: u8,
    },
    /// Reads a local variable.
    LoadVar(VarId),
    /// Writes a local variable.
    StoreVar(VarId),
    /// Joins values from the two arms of the directly preceding `if`.
    Phi,
    /// Reads a shader input (attribute or varying).
    LoadInput {
        /// Input declaration index.
        input: u8,
    },
    /// Reads a varying at an explicit barycentric; sources are the
    /// barycentric value then nothing else.
    InterpolateAt {
        /// Input declaration index.
        input: u8,
    },
    /// Writes a shader output.
    StoreOutput {
        /// Output declaration index.
        output: u8,
    },
    /// Reads a per-vertex output of another invocation (TCS);
    /// sources: vertex index, then element offset in words.
    LoadPerVertexOutput {
        /// Output declaration index.
        output: u8,
    },
    /// Writes a per-vertex output (TCS); sources: value, vertex index.
    StorePerVertexOutput {
        /// Output declaration index.
        output: u8,
    },
    /// Loads from a uniform buffer; source is the byte offset.
    LoadUbo {
        /// UBO binding.
        ubo: u8,
    },
    /// Loads from the const file at a fixed word offset; produced by UBO
    /// promotion and preamble hoisting only.
    LoadConstFile {
        /// Scalar word offset.
        word: u16,
    },
    /// Stores to the const file at a fixed word offset; legal only inside
    /// the preamble.
    StoreConstFile {
        /// Scalar word offset.
        word: u16,
    },
    /// Loads from a storage buffer; source is the offset (bytes before
    /// I/O lowering, elements after).
    LoadSsbo {
        /// SSBO binding.
        binding: u8,
        /// Whether the offset has been converted to elements.
        element_offset: bool,
    },
    /// Stores to a storage buffer; sources: value, offset.
    StoreSsbo {
        /// SSBO binding.
        binding: u8,
        /// Whether the offset has been converted to elements.
        element_offset: bool,
    },
    /// Storage-buffer atomic; sources: offset, data (, compare).
    SsboAtomic {
        /// SSBO binding.
        binding: u8,
        /// Operation kind.
        kind: AtomicKind,
    },
    /// Loads from global memory; source is a word address. Produced by
    /// tessellation I/O lowering.
    LoadGlobal,
    /// Stores to global memory; sources: value, word address. Produced by
    /// tessellation I/O lowering.
    StoreGlobal,
    /// Loads from workgroup-shared memory; source is the byte offset.
    LoadShared,
    /// Stores to workgroup-shared memory; sources: value, byte offset.
    StoreShared,
    /// Loads a texel from an image; source is the coordinate vector.
    ImageLoad {
        /// Image binding.
        image: u8,
    },
    /// Stores a texel to an image; sources: value, coordinate.
    ImageStore {
        /// Image binding.
        image: u8,
    },
    /// Image atomic; sources: coordinate, data (, compare).
    ImageAtomic {
        /// Image binding.
        image: u8,
        /// Operation kind.
        kind: AtomicKind,
    },
    /// Queries image or texture dimensions.
    TexSize {
        /// Texture binding.
        tex: u8,
    },
    /// Samples a texture; sources: coordinate (, lod/bias | ddx, ddy)
    /// (, comparator).
    Tex(TexOp),
    /// Reads a system value.
    LoadSysval(Sysval),
    /// Produces barycentric weights.
    LoadBarycentric {
        /// Interpolation position.
        mode: BaryMode,
    },
    /// Screen-space derivative in x.
    Ddx,
    /// Screen-space derivative in y.
    Ddy,
    /// Demotes the invocation to a helper.
    Discard,
    /// Execution/memory barrier.
    Barrier(BarrierKind),
}

impl HirOp {
    /// Whether the operation has observable effects besides its value.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            Self::StoreVar(_)
                | Self::StoreOutput { .. }
                | Self::StorePerVertexOutput { .. }
                | Self::StoreSsbo { .. }
                | Self::SsboAtomic { .. }
                | Self::StoreGlobal
                | Self::StoreShared
                | Self::ImageStore { .. }
                | Self::ImageAtomic { .. }
                | Self::StoreConstFile { .. }
                | Self::Discard
                | Self::Barrier(_)
        )
    }
}

/// One HIR instruction: an operation, its sources and its result type.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HirInstr {
    /// Operation.
    pub op: HirOp,
    /// Result type; meaningless for pure stores.
    pub ty: HirType,
    /// Source values.
    pub srcs: SmallVec<[HirId; 4]>,
}

/// A node of the structured control-flow tree.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Node {
    /// A straight-line instruction.
    Instr(HirId),
    /// Two-armed conditional.
    If {
        /// Condition value (boolean).
        cond: HirId,
        /// Then arm.
        then_body: Vec<Node>,
        /// Else arm.
        else_body: Vec<Node>,
    },
    /// An infinite loop exited by `Break`.
    Loop {
        /// Loop body.
        body: Vec<Node>,
    },
    /// Exits the innermost loop.
    Break,
    /// Restarts the innermost loop.
    Continue,
}

/// A complete high-level shader.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HirShader {
    /// Shader stage.
    pub stage: ember_asm::Stage,
    /// Once-per-wave preamble body; filled by preamble hoisting.
    pub preamble: Vec<Node>,
    /// Structured body.
    pub body: Vec<Node>,
    /// Instruction pool; `HirId` indexes here.
    pub instrs: Vec<HirInstr>,
    /// Local variable types.
    pub vars: Vec<HirType>,
    /// Input declarations.
    pub inputs: Vec<IoVar>,
    /// Output declarations.
    pub outputs: Vec<IoVar>,
    /// Declared UBO sizes in bytes, by binding.
    pub ubo_sizes: Vec<u32>,
    /// Planned const-file uploads of UBO ranges; filled by range
    /// analysis, consumed by emission and the metadata record.
    pub ubo_uploads: Vec<ember_ir::UboUpload>,
    /// Const-file region written by the preamble, once hoisting ran.
    pub preamble_const: Option<ember_ir::ConstRegion>,
    /// Samplers whose fetches need the sRGB decode fix-up, as a bitmask
    /// by binding.
    pub srgb_samplers: u16,
    /// Whether this is an internally generated shader (blit, clear);
    /// compiled only when the context opts in.
    pub internal: bool,
    /// Tessellation parameters for tessellation stages.
    pub tess: Option<TessInfo>,
    /// Per-value divergence; filled by [`analyze_divergence`].
    pub divergent: Vec<bool>,
}

impl HirShader {
    /// An empty shader for `stage`.
    pub fn new(stage: ember_asm::Stage) -> Self {
        Self {
            stage,
            preamble: Vec::new(),
            body: Vec::new(),
            instrs: Vec::new(),
            vars: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            ubo_sizes: Vec::new(),
            ubo_uploads: Vec::new(),
            preamble_const: None,
            srgb_samplers: 0,
            internal: false,
            tess: None,
            divergent: Vec::new(),
        }
    }

    /// The instruction defining `id`.
    pub fn instr(&self, id: HirId) -> &HirInstr {
        &self.instrs[id.index()]
    }

    /// Mutable access to the instruction defining `id`.
    pub fn instr_mut(&mut self, id: HirId) -> &mut HirInstr {
        &mut self.instrs[id.index()]
    }

    /// Result type of `id`.
    pub fn ty(&self, id: HirId) -> HirType {
        self.instrs[id.index()].ty
    }

    /// Interprets `id` as a scalar u32 constant.
    pub fn as_const_u32(&self, id: HirId) -> Option<u32> {
        match &self.instr(id).op {
            HirOp::Const { words } if words.len() == 1 => Some(words[0]),
            _ => None,
        }
    }

    /// Interprets `id` as a scalar f32 constant.
    pub fn as_const_f32(&self, id: HirId) -> Option<f32> {
        self.as_const_u32(id).map(f32::from_bits)
    }

    /// Allocates an instruction into the pool without placing it in the
    /// tree.
    pub fn alloc_instr(&mut self, instr: HirInstr) -> HirId {
        let id = HirId::new(self.instrs.len() as u32);
        self.instrs.push(instr);
        id
    }

    /// Allocation shorthand used by the rewrite passes.
    pub fn alloc(
        &mut self,
        op: HirOp,
        ty: HirType,
        srcs: impl IntoIterator<Item = HirId>,
    ) -> HirId {
        self.alloc_instr(HirInstr {
            op,
            ty,
            srcs: srcs.into_iter().collect(),
        })
    }

    /// A fresh scalar u32 constant instruction (not yet placed).
    pub fn alloc_const_u32(&mut self, value: u32) -> HirId {
        self.alloc(
            HirOp::Const {
                words: smallvec::smallvec![value],
            },
            HirType::U32,
            [],
        )
    }

    /// A fresh scalar f32 constant instruction (not yet placed).
    pub fn alloc_const_f32(&mut self, value: f32) -> HirId {
        self.alloc(
            HirOp::Const {
                words: smallvec::smallvec![value.to_bits()],
            },
            HirType::F32,
            [],
        )
    }

    /// Declares a local variable.
    pub fn declare_var(&mut self, ty: HirType) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(ty);
        id
    }
}
