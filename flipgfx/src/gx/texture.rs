// Texture and palette bindings.
//
// GPU-side texture objects are addressed through small index-based
// handles into side tables owned by the graphics context; the shadow
// state only records which handle is bound to each of the eight texture
// units, plus the sampling parameters that feed the sampler cache and
// the format tags that feed the shader generator.

/// Index-based handle to a registered texture (side table in the
/// graphics context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

/// Index-based handle to a registered palette (TLUT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TlutHandle(pub u32);

/// Maximum number of simultaneously registered palettes.
pub const NUM_TLUTS: usize = 20;

/// Texel wrap mode (hardware encoding).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WrapMode {
    #[default]
    Clamp = 0,
    Repeat = 1,
    Mirror = 2,
}

impl WrapMode {
    pub fn from_bits(v: u32) -> Self {
        match v & 3 {
            1 => Self::Repeat,
            2 => Self::Mirror,
            _ => Self::Clamp,
        }
    }
}

/// Texel filter mode. Mip variants carry the mip filter in the name.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FilterMode {
    Near = 0,
    #[default]
    Linear = 1,
    NearMipNear = 2,
    LinMipNear = 3,
    NearMipLin = 4,
    LinMipLin = 5,
}

/// How the bound image's texels must be interpreted by the shader.
///
/// `Native` images were converted to an RGBA GPU format at upload time.
/// `Intensity` / `IntensityAlpha` images came from render-to-texture
/// copies in an intensity format and need a swizzle after sampling.
/// `Indexed` images store palette indices and need a TLUT lookup with a
/// 4-tap gather to emulate hardware bilinear filtering.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TexLoadFmt {
    #[default]
    Native = 0,
    Intensity = 1,
    IntensityAlpha = 2,
    Indexed = 3,
}

/// Palette entry format tag.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlutFmt {
    #[default]
    IntensityAlpha8 = 0,
    Rgb565 = 1,
    Rgb5A3 = 2,
}

/// One texture unit binding in the shadow state.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TexBinding {
    pub handle: Option<TextureHandle>,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub lod_bias: f32,
    pub min_lod: f32,
    pub max_lod: f32,
    pub load_fmt: TexLoadFmt,
    pub tlut: Option<TlutHandle>,
    pub tlut_fmt: TlutFmt,
}

impl TexBinding {
    /// Whether this binding requires palette indirection in the shader.
    pub fn is_indexed(&self) -> bool {
        self.load_fmt == TexLoadFmt::Indexed
    }
}
