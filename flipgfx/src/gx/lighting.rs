// Color-channel and hardware light state.
//
// Four channels (color0, alpha0, color1, alpha1) select where the
// rasterized color comes from and which of the eight hardware lights
// contribute to it. The attenuation and diffuse functions here drive the
// formulas emitted by the shader generator.

/// Where a channel's ambient or material color is sourced from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColorSrc {
    /// Live register color (ambient_colors / material_colors).
    #[default]
    Register = 0,
    /// Per-vertex color attribute.
    Vertex = 1,
}

/// Diffuse term applied per light.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DiffuseFn {
    /// Constant 1 contribution.
    #[default]
    None = 0,
    /// Raw dot(normal, light_dir), may go negative.
    Sign = 1,
    /// max(0, dot(normal, light_dir)).
    Clamp = 2,
}

/// Attenuation term applied per light.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttnFn {
    #[default]
    Off = 0,
    /// Specular attenuation (half-angle based).
    Spec = 1,
    /// Spotlight attenuation: cosine polynomial over distance polynomial.
    Spot = 2,
}

/// One color or alpha channel control.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCtrl {
    pub lighting_enabled: bool,
    pub ambient_src: ColorSrc,
    pub material_src: ColorSrc,
    pub diffuse_fn: DiffuseFn,
    pub attn_fn: AttnFn,
    /// Bitmask over the eight hardware lights.
    pub light_mask: u8,
}

/// One hardware light. Attenuation coefficient triples follow the
/// console convention: contribution =
///   max(0, a0 + a1*aattn + a2*aattn^2) / (k0 + k1*d + k2*d^2)
/// where `aattn` is the spot cosine and `d` the distance to the vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub position: [f32; 3],
    pub direction: [f32; 3],
    pub color: [f32; 4],
    /// Cosine (angular) attenuation coefficients a0, a1, a2.
    pub cos_attn: [f32; 3],
    /// Distance attenuation coefficients k0, k1, k2.
    pub dist_attn: [f32; 3],
}

impl Default for Light {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            direction: [0.0, 0.0, -1.0],
            color: [1.0; 4],
            // Neutral: full contribution at any angle and distance.
            cos_attn: [1.0, 0.0, 0.0],
            dist_attn: [1.0, 0.0, 0.0],
        }
    }
}
