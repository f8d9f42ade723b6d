// Shadow register state for the fixed-function GPU pipeline.
//
// The console GPU is configured entirely through register writes carried
// by the command FIFO: vertex descriptors, a 16-stage color combiner,
// per-vertex lighting, matrix memory, and the blend/depth/fog output
// stage. This module mirrors every register the translation layer
// depends on as one coherent struct, suitable for deriving a wgpu
// pipeline and uniform block before each draw.

use crate::gx::lighting::{ChannelCtrl, Light};
use crate::gx::texture::TexBinding;

// ---------------------------------------------------------------------------
// Vertex attribute types
// ---------------------------------------------------------------------------

/// Identifies one of the 21 vertex attribute slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VtxAttr {
    PosMatrixIdx = 0,
    Tex0MatrixIdx = 1,
    Tex1MatrixIdx = 2,
    Tex2MatrixIdx = 3,
    Tex3MatrixIdx = 4,
    Tex4MatrixIdx = 5,
    Tex5MatrixIdx = 6,
    Tex6MatrixIdx = 7,
    Tex7MatrixIdx = 8,
    Position = 9,
    Normal = 10,
    Color0 = 11,
    Color1 = 12,
    Tex0 = 13,
    Tex1 = 14,
    Tex2 = 15,
    Tex3 = 16,
    Tex4 = 17,
    Tex5 = 18,
    Tex6 = 19,
    Tex7 = 20,
}

impl VtxAttr {
    pub const COUNT: usize = 21;

    /// Return the attribute for an index (0..=20), if valid.
    pub fn from_index(i: u8) -> Option<Self> {
        if i <= 20 {
            // SAFETY: repr(u8) with contiguous discriminants 0..=20.
            Some(unsafe { std::mem::transmute::<u8, VtxAttr>(i) })
        } else {
            None
        }
    }

    /// True for the nine per-vertex matrix-index slots.
    pub fn is_matrix_index(self) -> bool {
        (self as u8) <= VtxAttr::Tex7MatrixIdx as u8
    }
}

/// How vertex data for an attribute is supplied in the draw payload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttrInput {
    /// Attribute is not present in the vertex.
    #[default]
    None = 0,
    /// Data is inlined in the vertex stream.
    Direct = 1,
    /// 8-bit index into an external attribute array.
    Index8 = 2,
    /// 16-bit index into an external attribute array.
    Index16 = 3,
}

impl AttrInput {
    pub fn from_bits(v: u32) -> Self {
        match v & 3 {
            1 => Self::Direct,
            2 => Self::Index8,
            3 => Self::Index16,
            _ => Self::None,
        }
    }
}

/// Numeric component type for position/normal/texcoord attributes.
///
/// For color attributes the same field selects a packed color format
/// (see `ColorCompType`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompType {
    #[default]
    U8 = 0,
    S8 = 1,
    U16 = 2,
    S16 = 3,
    F32 = 4,
}

impl CompType {
    pub fn from_bits(v: u32) -> Self {
        match v & 7 {
            1 => Self::S8,
            2 => Self::U16,
            3 => Self::S16,
            4 => Self::F32,
            _ => Self::U8,
        }
    }

    /// Size in bytes of one component.
    pub fn size(self) -> usize {
        match self {
            Self::U8 | Self::S8 => 1,
            Self::U16 | Self::S16 => 2,
            Self::F32 => 4,
        }
    }
}

/// Packed color layouts selected by the component-type field of a color
/// attribute.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColorCompType {
    Rgb565 = 0,
    Rgb8 = 1,
    Rgbx8 = 2,
    Rgba4 = 3,
    Rgba6 = 4,
    #[default]
    Rgba8 = 5,
}

impl ColorCompType {
    pub fn from_bits(v: u32) -> Self {
        match v & 7 {
            0 => Self::Rgb565,
            1 => Self::Rgb8,
            2 => Self::Rgbx8,
            3 => Self::Rgba4,
            4 => Self::Rgba6,
            _ => Self::Rgba8,
        }
    }

    /// Size in bytes of one packed color value.
    pub fn size(self) -> usize {
        match self {
            Self::Rgb565 | Self::Rgba4 => 2,
            Self::Rgb8 | Self::Rgba6 => 3,
            Self::Rgbx8 | Self::Rgba8 => 4,
        }
    }
}

/// Per-format-table layout of a single attribute.
///
/// * `count`     -- component count selector (e.g. XY vs XYZ).
/// * `comp_type` -- raw component-type field (numeric or color layout).
/// * `frac`      -- fixed-point fractional bit count (0 for float).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VtxAttrFmt {
    pub count: u8,
    pub comp_type: u8,
    pub frac: u8,
}

/// External attribute array registered through the CP array registers.
///
/// `cached_range` is a GPU-side copy of the array in the storage arena;
/// it is invalidated whenever the base pointer or stride is rewritten.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct AttrArray {
    pub base: u32,
    pub stride: u16,
    pub size: u32,
    pub cached_range: Option<crate::gfx::frame::GpuRange>,
}

impl AttrArray {
    pub fn set_base(&mut self, base: u32) {
        if self.base != base {
            self.base = base;
            self.cached_range = None;
        }
    }

    pub fn set_stride(&mut self, stride: u16) {
        if self.stride != stride {
            self.stride = stride;
            self.cached_range = None;
        }
    }
}

/// Number of external attribute arrays (position, normal, two colors,
/// eight texcoords).
pub const NUM_ATTR_ARRAYS: usize = 12;

// ---------------------------------------------------------------------------
// TEV stages
// ---------------------------------------------------------------------------

/// Raw color-argument selectors (hardware encoding, 4 bits).
pub mod tev_color_arg {
    pub const CPREV: u8 = 0;
    pub const APREV: u8 = 1;
    pub const C0: u8 = 2;
    pub const A0: u8 = 3;
    pub const C1: u8 = 4;
    pub const A1: u8 = 5;
    pub const C2: u8 = 6;
    pub const A2: u8 = 7;
    pub const TEXC: u8 = 8;
    pub const TEXA: u8 = 9;
    pub const RASC: u8 = 10;
    pub const RASA: u8 = 11;
    pub const ONE: u8 = 12;
    pub const HALF: u8 = 13;
    pub const KONST: u8 = 14;
    pub const ZERO: u8 = 15;
}

/// Raw alpha-argument selectors (hardware encoding, 3 bits).
pub mod tev_alpha_arg {
    pub const APREV: u8 = 0;
    pub const A0: u8 = 1;
    pub const A1: u8 = 2;
    pub const A2: u8 = 3;
    pub const TEXA: u8 = 4;
    pub const RASA: u8 = 5;
    pub const KONST: u8 = 6;
    pub const ZERO: u8 = 7;
}

/// Indirect-texture binding for one TEV stage. Held in the shadow state
/// but not consumed by the shader generator (unimplemented hardware
/// feature; a stage using it is logged and rendered without indirection).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndirectStage {
    pub ind_stage: u8,
    pub format: u8,
    pub bias: u8,
    pub matrix: u8,
    pub wrap_s: u8,
    pub wrap_t: u8,
    pub enabled: bool,
}

/// One stage of the 16-stage texture-environment combiner.
///
/// Each stage computes, for color and alpha independently:
///   result = (d OP ((1 - c) * a + c * b) + bias) * scale
/// optionally clamped to [0,1] and written to one of four registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TevStage {
    /// Color combiner inputs [a, b, c, d] (tev_color_arg encoding).
    pub color_in: [u8; 4],
    /// Alpha combiner inputs [a, b, c, d] (tev_alpha_arg encoding).
    pub alpha_in: [u8; 4],

    /// Color op (0 = add, 1 = sub).
    pub color_op: u8,
    pub alpha_op: u8,
    /// Bias selector (0 = zero, 1 = +0.5, 2 = -0.5).
    pub color_bias: u8,
    pub alpha_bias: u8,
    /// Output scale (0 = 1x, 1 = 2x, 2 = 4x, 3 = 0.5x).
    pub color_scale: u8,
    pub alpha_scale: u8,
    pub color_clamp: bool,
    pub alpha_clamp: bool,
    /// Destination register (0 = prev, 1..3 = reg0..reg2).
    pub color_dest: u8,
    pub alpha_dest: u8,

    /// Texture coordinate generator index (0xFF = none).
    pub tex_coord: u8,
    /// Texture map index (0xFF = none).
    pub tex_map: u8,
    /// Whether the texture lookup is enabled for this stage.
    pub tex_enable: bool,
    /// Rasterized color channel feeding this stage (0xFF = none).
    pub channel: u8,

    /// Konst color / alpha selectors (5-bit hardware encoding).
    pub kcsel: u8,
    pub kasel: u8,

    /// Swap-table selectors for the rasterized and texture colors.
    pub ras_swap: u8,
    pub tex_swap: u8,

    pub indirect: IndirectStage,
}

impl Default for TevStage {
    fn default() -> Self {
        Self {
            // Pass-through from the previous register.
            color_in: [
                tev_color_arg::ZERO,
                tev_color_arg::ZERO,
                tev_color_arg::ZERO,
                tev_color_arg::CPREV,
            ],
            alpha_in: [
                tev_alpha_arg::ZERO,
                tev_alpha_arg::ZERO,
                tev_alpha_arg::ZERO,
                tev_alpha_arg::APREV,
            ],
            color_op: 0,
            alpha_op: 0,
            color_bias: 0,
            alpha_bias: 0,
            color_scale: 0,
            alpha_scale: 0,
            color_clamp: true,
            alpha_clamp: true,
            color_dest: 0,
            alpha_dest: 0,
            tex_coord: 0xFF,
            tex_map: 0xFF,
            tex_enable: false,
            channel: 0xFF,
            kcsel: 0x0C, // K0 rgb
            kasel: 0x1C, // K0 alpha
            ras_swap: 0,
            tex_swap: 0,
            indirect: IndirectStage::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Texture coordinate generators
// ---------------------------------------------------------------------------

/// Generation type for a texcoord generator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TexGenKind {
    /// Source transformed by a hardware texture matrix.
    #[default]
    Regular = 0,
    /// Bump-mapped from an emboss light (unimplemented; logged).
    Bump = 1,
    /// Color channel 0 passed through as ST.
    Color0 = 2,
    /// Color channel 1 passed through as ST.
    Color1 = 3,
}

/// Source row selector for a texcoord generator.
pub mod texgen_src {
    pub const POSITION: u8 = 0;
    pub const NORMAL: u8 = 1;
    pub const COLORS: u8 = 2;
    pub const TEX0: u8 = 5;
    // TEX1..TEX7 follow at 6..=12.
}

/// One texture-coordinate generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexGen {
    pub kind: TexGenKind,
    /// Source row (texgen_src encoding).
    pub source: u8,
    /// Texture matrix slot (0..10), 0xFF when untransformed.
    pub matrix: u8,
    /// Post-transform matrix slot (0..20), 0xFF when none.
    pub post_matrix: u8,
    /// Normalize the coordinate before the post-transform.
    pub normalize: bool,
    /// True for a 3x4 (STQ, projected) transform, false for 2x4 (ST).
    pub projected: bool,
}

impl Default for TexGen {
    fn default() -> Self {
        Self {
            kind: TexGenKind::Regular,
            source: texgen_src::TEX0,
            matrix: 0xFF,
            post_matrix: 0xFF,
            normalize: false,
            projected: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Matrix memory
// ---------------------------------------------------------------------------

pub const NUM_POS_MATRICES: usize = 10;
pub const NUM_TEX_MATRICES: usize = 10;
pub const NUM_POST_MATRICES: usize = 20;

const IDENT_3X4: [f32; 12] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0,
];

const IDENT_3X3: [f32; 9] = [
    1.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, //
    0.0, 0.0, 1.0,
];

const IDENT_4X4: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// All matrix memory: position/normal pairs, texture matrices,
/// post-transform matrices, and the projection matrix.
///
/// Hardware matrices are row-major 3x4 (or 3x3 for normals); they are
/// kept in that form and expanded to column-major 4x4 at uniform-upload
/// time. The projection matrix keeps both the expanded 4x4 and the raw
/// 7-word register form for readback.
#[derive(Debug, Clone)]
pub struct Matrices {
    pub position: [[f32; 12]; NUM_POS_MATRICES],
    pub normal: [[f32; 9]; NUM_POS_MATRICES],
    pub texture: [[f32; 12]; NUM_TEX_MATRICES],
    pub post: [[f32; 12]; NUM_POST_MATRICES],
    pub projection: [f32; 16],
    /// Raw projection registers: 6 coefficients + type word.
    pub projection_raw: [f32; 7],
    /// Index of the active position/normal pair.
    pub current_pos: u8,
}

impl Default for Matrices {
    fn default() -> Self {
        Self {
            position: [IDENT_3X4; NUM_POS_MATRICES],
            normal: [IDENT_3X3; NUM_POS_MATRICES],
            texture: [IDENT_3X4; NUM_TEX_MATRICES],
            post: [IDENT_3X4; NUM_POST_MATRICES],
            projection: IDENT_4X4,
            projection_raw: [0.0; 7],
            current_pos: 0,
        }
    }
}

impl Matrices {
    /// Rebuild the expanded 4x4 projection from the raw register form.
    pub fn update_projection(&mut self) {
        let d = &self.projection_raw;
        let m = &mut self.projection;
        *m = [0.0; 16];
        if d[6] == 0.0 {
            // Perspective:
            //   a 0 c 0
            //   0 b d 0
            //   0 0 e f
            //   0 0 -1 0
            m[0] = d[0];
            m[5] = d[1];
            m[8] = d[2];
            m[9] = d[3];
            m[10] = d[4];
            m[11] = -1.0;
            m[14] = d[5];
        } else {
            // Orthographic:
            //   a 0 0 d
            //   0 b 0 e
            //   0 0 c f
            //   0 0 0 1
            m[0] = d[0];
            m[5] = d[1];
            m[10] = d[2];
            m[12] = d[3];
            m[13] = d[4];
            m[14] = d[5];
            m[15] = 1.0;
        }
    }
}

// ---------------------------------------------------------------------------
// Output-merger state
// ---------------------------------------------------------------------------

/// Blend-factor selectors matching the hardware encoding.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlendFactor {
    Zero = 0,
    #[default]
    One = 1,
    SrcColor = 2,
    InvSrcColor = 3,
    SrcAlpha = 4,
    InvSrcAlpha = 5,
    DstAlpha = 6,
    InvDstAlpha = 7,
}

impl BlendFactor {
    pub fn from_bits(v: u32) -> Self {
        match v & 7 {
            0 => Self::Zero,
            2 => Self::SrcColor,
            3 => Self::InvSrcColor,
            4 => Self::SrcAlpha,
            5 => Self::InvSrcAlpha,
            6 => Self::DstAlpha,
            7 => Self::InvDstAlpha,
            _ => Self::One,
        }
    }
}

/// Logic-op selectors (active when logic blending is enabled).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogicOp {
    Clear = 0,
    And = 1,
    RevAnd = 2,
    #[default]
    Copy = 3,
    InvAnd = 4,
    Noop = 5,
    Xor = 6,
    Or = 7,
    Nor = 8,
    Equiv = 9,
    Inv = 10,
    RevOr = 11,
    InvCopy = 12,
    InvOr = 13,
    Nand = 14,
    Set = 15,
}

/// Framebuffer blend state decoded from the pixel-engine blend register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendMode {
    pub enabled: bool,
    pub subtract: bool,
    pub logic_enabled: bool,
    pub logic_op: LogicOp,
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub color_update: bool,
    pub alpha_update: bool,
}

impl Default for BlendMode {
    fn default() -> Self {
        Self {
            enabled: false,
            subtract: false,
            logic_enabled: false,
            logic_op: LogicOp::Copy,
            src_factor: BlendFactor::SrcAlpha,
            dst_factor: BlendFactor::InvSrcAlpha,
            color_update: true,
            alpha_update: true,
        }
    }
}

/// Destination-alpha override: forces the written alpha to a constant.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DstAlpha {
    pub enabled: bool,
    pub alpha: u8,
}

/// Compare function shared by depth test and alpha compare.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompareFn {
    Never = 0,
    Less = 1,
    Equal = 2,
    #[default]
    LessEqual = 3,
    Greater = 4,
    NotEqual = 5,
    GreaterEqual = 6,
    Always = 7,
}

impl CompareFn {
    pub fn from_bits(v: u32) -> Self {
        match v & 7 {
            0 => Self::Never,
            1 => Self::Less,
            2 => Self::Equal,
            4 => Self::Greater,
            5 => Self::NotEqual,
            6 => Self::GreaterEqual,
            7 => Self::Always,
            _ => Self::LessEqual,
        }
    }
}

/// Depth-buffer test and write configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZMode {
    pub enable: bool,
    pub func: CompareFn,
    pub update: bool,
}

impl Default for ZMode {
    fn default() -> Self {
        Self {
            enable: true,
            func: CompareFn::LessEqual,
            update: true,
        }
    }
}

/// Combining logic for the two alpha-compare conditions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AlphaLogic {
    #[default]
    And = 0,
    Or = 1,
    Xor = 2,
    Xnor = 3,
}

/// Dual-condition alpha-compare test applied as a fragment discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlphaCompare {
    pub comp0: CompareFn,
    pub ref0: u8,
    pub comp1: CompareFn,
    pub ref1: u8,
    pub logic: AlphaLogic,
}

impl Default for AlphaCompare {
    fn default() -> Self {
        Self {
            comp0: CompareFn::Always,
            ref0: 0,
            comp1: CompareFn::Always,
            ref1: 0,
            logic: AlphaLogic::And,
        }
    }
}

/// Fog curve selector (hardware encoding).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FogKind {
    #[default]
    None = 0,
    Linear = 2,
    Exp = 4,
    Exp2 = 5,
    RevExp = 6,
    RevExp2 = 7,
}

impl FogKind {
    pub fn from_bits(v: u32) -> Self {
        match v & 7 {
            2 => Self::Linear,
            4 => Self::Exp,
            5 => Self::Exp2,
            6 => Self::RevExp,
            7 => Self::RevExp2,
            _ => Self::None,
        }
    }
}

/// Fog state as carried in the raster registers: the a/b/c curve
/// coefficients (already folded from the API's near/far/start/end by the
/// encoder) plus the fog color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fog {
    pub kind: FogKind,
    pub a: f32,
    pub b_mag: f32,
    pub b_shift: u32,
    pub c: f32,
    pub color: [f32; 4],
}

impl Default for Fog {
    fn default() -> Self {
        Self {
            kind: FogKind::None,
            a: 0.0,
            b_mag: 0.0,
            b_shift: 0,
            c: 0.0,
            color: [0.0; 4],
        }
    }
}

/// Face-culling mode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CullMode {
    None = 0,
    Front = 1,
    #[default]
    Back = 2,
    All = 3,
}

impl CullMode {
    pub fn from_bits(v: u32) -> Self {
        match v & 3 {
            1 => Self::Front,
            2 => Self::Back,
            3 => Self::All,
            _ => Self::None,
        }
    }
}

/// Viewport transform parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 640.0,
            height: 480.0,
            near: 0.0,
            far: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level shadow state
// ---------------------------------------------------------------------------

pub const NUM_TEV_STAGES: usize = 16;
pub const NUM_TEXGENS: usize = 8;
pub const NUM_CHANNELS: usize = 4;
pub const NUM_LIGHTS: usize = 8;
pub const NUM_TEXMAPS: usize = 8;
pub const NUM_VTX_FORMATS: usize = 8;

/// Complete mutable mirror of the GPU pipeline registers.
///
/// A single instance is owned by the graphics context and passed by
/// reference into every subsystem; no global state.
#[derive(Debug, Clone)]
pub struct ShadowState {
    // -- Vertex layout ---------------------------------------------------
    /// Per-attribute input type (none / direct / indexed).
    pub vtx_desc: [AttrInput; VtxAttr::COUNT],
    /// Eight vertex-format tables, one `VtxAttrFmt` per attribute.
    pub vtx_fmt: [[VtxAttrFmt; VtxAttr::COUNT]; NUM_VTX_FORMATS],
    /// External attribute arrays for indexed attributes.
    pub arrays: [AttrArray; NUM_ATTR_ARRAYS],

    // -- TEV pipeline ----------------------------------------------------
    pub tev_stages: [TevStage; NUM_TEV_STAGES],
    pub num_tev_stages: u8,
    /// Combiner registers: prev, reg0, reg1, reg2 (RGBA).
    pub tev_regs: [[f32; 4]; 4],
    /// Constant-color registers k0..k3 (RGBA).
    pub konst: [[f32; 4]; 4],
    /// Four swap tables of RGBA component selectors (0=r,1=g,2=b,3=a).
    pub swap_tables: [[u8; 4]; 4],

    // -- Lighting --------------------------------------------------------
    /// Color/alpha channel controls: color0, alpha0, color1, alpha1.
    pub channels: [ChannelCtrl; NUM_CHANNELS],
    pub num_channels: u8,
    pub ambient_colors: [[f32; 4]; 2],
    pub material_colors: [[f32; 4]; 2],
    pub lights: [Light; NUM_LIGHTS],

    // -- Texcoord generation ----------------------------------------------
    pub tex_gens: [TexGen; NUM_TEXGENS],
    pub num_tex_gens: u8,

    // -- Transform ---------------------------------------------------------
    pub matrices: Matrices,
    pub viewport: Viewport,

    // -- Output merger -----------------------------------------------------
    pub cull_mode: CullMode,
    pub blend: BlendMode,
    pub dst_alpha: DstAlpha,
    pub z_mode: ZMode,
    pub alpha_compare: AlphaCompare,
    pub fog: Fog,
    /// Clear color applied by the next framebuffer copy, RGBA bytes.
    pub clear_color: [u8; 4],
    /// Clear depth, 24-bit.
    pub clear_depth: u32,

    // -- Texture bindings ---------------------------------------------------
    pub textures: [TexBinding; NUM_TEXMAPS],

    /// Per-pixel lighting mode: evaluate channel lighting in the fragment
    /// stage instead of per vertex.
    pub per_pixel_lighting: bool,

    /// Set on any register change; cleared once a draw consumes the
    /// current uniform snapshot.
    pub dirty: bool,
}

impl ShadowState {
    /// Power-on defaults.
    pub fn new() -> Self {
        Self {
            vtx_desc: [AttrInput::None; VtxAttr::COUNT],
            vtx_fmt: [[VtxAttrFmt::default(); VtxAttr::COUNT]; NUM_VTX_FORMATS],
            arrays: [AttrArray::default(); NUM_ATTR_ARRAYS],

            tev_stages: [TevStage::default(); NUM_TEV_STAGES],
            num_tev_stages: 1,
            tev_regs: [[0.0; 4]; 4],
            konst: [[1.0; 4]; 4],
            swap_tables: [[0, 1, 2, 3]; 4],

            channels: [ChannelCtrl::default(); NUM_CHANNELS],
            num_channels: 1,
            ambient_colors: [[0.0, 0.0, 0.0, 1.0]; 2],
            material_colors: [[1.0, 1.0, 1.0, 1.0]; 2],
            lights: [Light::default(); NUM_LIGHTS],

            tex_gens: [TexGen::default(); NUM_TEXGENS],
            num_tex_gens: 0,

            matrices: Matrices::default(),
            viewport: Viewport::default(),

            cull_mode: CullMode::default(),
            blend: BlendMode::default(),
            dst_alpha: DstAlpha::default(),
            z_mode: ZMode::default(),
            alpha_compare: AlphaCompare::default(),
            fog: Fog::default(),
            clear_color: [0, 0, 0, 255],
            clear_depth: 0x00FF_FFFF,

            textures: [TexBinding::default(); NUM_TEXMAPS],

            per_pixel_lighting: false,

            dirty: true,
        }
    }

    /// Reset to power-on defaults.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Mark the uniform snapshot stale.
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// The format table entry for (format, attribute).
    #[inline]
    pub fn attr_fmt(&self, fmt: u8, attr: VtxAttr) -> VtxAttrFmt {
        self.vtx_fmt[fmt as usize & 7][attr as usize]
    }

    /// Map an attribute slot to its external array index, if it has one.
    pub fn array_index(attr: VtxAttr) -> Option<usize> {
        match attr {
            VtxAttr::Position => Some(0),
            VtxAttr::Normal => Some(1),
            VtxAttr::Color0 => Some(2),
            VtxAttr::Color1 => Some(3),
            VtxAttr::Tex0
            | VtxAttr::Tex1
            | VtxAttr::Tex2
            | VtxAttr::Tex3
            | VtxAttr::Tex4
            | VtxAttr::Tex5
            | VtxAttr::Tex6
            | VtxAttr::Tex7 => Some(4 + (attr as usize - VtxAttr::Tex0 as usize)),
            _ => None,
        }
    }
}

impl Default for ShadowState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_default_has_sane_values() {
        let state = ShadowState::new();
        assert_eq!(state.num_tev_stages, 1);
        assert_eq!(state.num_channels, 1);
        assert_eq!(state.num_tex_gens, 0);
        assert!(state.z_mode.enable);
        assert!(state.blend.color_update);
        assert!(state.blend.alpha_update);
        assert_eq!(state.cull_mode, CullMode::Back);
        assert_eq!(state.clear_depth, 0x00FF_FFFF);
        assert!(state.dirty);
    }

    #[test]
    fn vtx_attr_round_trip() {
        for i in 0..=20u8 {
            let attr = VtxAttr::from_index(i).unwrap();
            assert_eq!(attr as u8, i);
        }
        assert!(VtxAttr::from_index(21).is_none());
    }

    #[test]
    fn reset_restores_defaults() {
        let mut state = ShadowState::new();
        state.num_tev_stages = 8;
        state.cull_mode = CullMode::None;
        state.z_mode.enable = false;
        state.reset();
        assert_eq!(state.num_tev_stages, 1);
        assert_eq!(state.cull_mode, CullMode::Back);
        assert!(state.z_mode.enable);
    }

    #[test]
    fn array_rewrite_invalidates_cached_range() {
        let mut array = AttrArray {
            base: 0x8000_0000,
            stride: 12,
            size: 0,
            cached_range: Some(crate::gfx::frame::GpuRange {
                offset: 64,
                size: 256,
            }),
        };
        array.set_stride(12); // unchanged, cache survives
        assert!(array.cached_range.is_some());
        array.set_base(0x8000_0100);
        assert!(array.cached_range.is_none());
    }

    #[test]
    fn array_index_covers_indexed_attributes() {
        assert_eq!(ShadowState::array_index(VtxAttr::Position), Some(0));
        assert_eq!(ShadowState::array_index(VtxAttr::Color1), Some(3));
        assert_eq!(ShadowState::array_index(VtxAttr::Tex7), Some(11));
        assert_eq!(ShadowState::array_index(VtxAttr::PosMatrixIdx), None);
    }

    #[test]
    fn projection_perspective_expansion() {
        let mut m = Matrices::default();
        m.projection_raw = [2.0, 1.5, 0.0, 0.0, -1.0003, -0.20003, 0.0];
        m.update_projection();
        assert_eq!(m.projection[0], 2.0);
        assert_eq!(m.projection[5], 1.5);
        assert_eq!(m.projection[11], -1.0);
        assert_eq!(m.projection[15], 0.0);
    }

    #[test]
    fn projection_ortho_expansion() {
        let mut m = Matrices::default();
        m.projection_raw = [0.003, 0.004, -0.5, -1.0, 1.0, 0.0, 1.0];
        m.update_projection();
        assert_eq!(m.projection[11], 0.0);
        assert_eq!(m.projection[15], 1.0);
        assert_eq!(m.projection[12], -1.0);
    }

    #[test]
    fn comp_type_sizes() {
        assert_eq!(CompType::U8.size(), 1);
        assert_eq!(CompType::S16.size(), 2);
        assert_eq!(CompType::F32.size(), 4);
        assert_eq!(ColorCompType::Rgb565.size(), 2);
        assert_eq!(ColorCompType::Rgb8.size(), 3);
        assert_eq!(ColorCompType::Rgba8.size(), 4);
    }
}
