// Shader and pipeline configuration snapshots.
//
// A `ShaderConfig` is a plain-bytes snapshot of everything in the shadow
// state that changes generated WGSL. Two equal configs always produce
// byte-identical shaders, so the config doubles as the cache key: it is
// hashed with xxh3 and stored next to the hash so a collision between
// distinct configs is detected instead of silently rendering wrong.

use bytemuck::{Pod, Zeroable};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{GxError, Result};
use crate::gx::state::{ShadowState, TexGenKind, VtxAttr, NUM_TEV_STAGES, NUM_TEXGENS};
use crate::gx::texture::TexLoadFmt;

/// Bumped whenever the config layout or the generated WGSL changes in a
/// way that invalidates persisted pipeline caches.
pub const CONFIG_VERSION: u32 = 3;

/// One TEV stage, raw hardware selectors.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct StageConfig {
    pub color_in: [u8; 4],
    pub alpha_in: [u8; 4],
    pub color_op: u8,
    pub alpha_op: u8,
    pub color_bias: u8,
    pub alpha_bias: u8,
    pub color_scale: u8,
    pub alpha_scale: u8,
    pub color_clamp: u8,
    pub alpha_clamp: u8,
    pub color_dest: u8,
    pub alpha_dest: u8,
    pub tex_coord: u8,
    pub tex_map: u8,
    pub tex_enable: u8,
    pub channel: u8,
    pub kcsel: u8,
    pub kasel: u8,
    pub ras_swap: u8,
    pub tex_swap: u8,
}

/// One texcoord generator.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TexGenConfig {
    pub kind: u8,
    pub source: u8,
    pub matrix: u8,
    pub post_matrix: u8,
    pub normalize: u8,
    pub projected: u8,
}

/// One color or alpha channel control.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ChannelConfig {
    pub lit: u8,
    pub ambient_src: u8,
    pub material_src: u8,
    pub diffuse_fn: u8,
    pub attn_fn: u8,
    pub light_mask: u8,
}

/// Everything that selects a WGSL shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ShaderConfig {
    pub version: u32,
    pub num_tev_stages: u32,
    pub num_tex_gens: u32,
    pub num_channels: u32,

    pub stages: [StageConfig; NUM_TEV_STAGES],
    pub tex_gens: [TexGenConfig; NUM_TEXGENS],
    pub channels: [ChannelConfig; 4],
    pub swap_tables: [[u8; 4]; 4],

    /// Bitmask over `VtxAttr` of attributes present in the vertex
    /// stream; fully determines the flattened vertex layout.
    pub attrs_present: u32,

    /// Per-texmap load format (`TexLoadFmt` encoding); selects the
    /// post-sample swizzle and palette indirection.
    pub tex_load_fmt: [u8; 8],

    pub fog_kind: u32,

    pub alpha_comp0: u8,
    pub alpha_comp1: u8,
    pub alpha_logic: u8,
    pub alpha_ref0: u8,
    pub alpha_ref1: u8,
    pub dst_alpha_enable: u8,
    pub dst_alpha: u8,
    pub per_pixel_lighting: u8,
}

impl ShaderConfig {
    /// Snapshot the shader-relevant registers, validating every slot
    /// reference an active stage makes.
    pub fn from_state(state: &ShadowState) -> Result<Self> {
        let mut cfg = Self::zeroed();
        cfg.version = CONFIG_VERSION;
        cfg.num_tev_stages = state.num_tev_stages.clamp(1, NUM_TEV_STAGES as u8) as u32;
        cfg.num_tex_gens = state.num_tex_gens.min(NUM_TEXGENS as u8) as u32;
        cfg.num_channels = state.num_channels.min(2) as u32;

        for (i, s) in state.tev_stages.iter().enumerate() {
            cfg.stages[i] = StageConfig {
                color_in: s.color_in,
                alpha_in: s.alpha_in,
                color_op: s.color_op,
                alpha_op: s.alpha_op,
                color_bias: s.color_bias,
                alpha_bias: s.alpha_bias,
                color_scale: s.color_scale,
                alpha_scale: s.alpha_scale,
                color_clamp: s.color_clamp as u8,
                alpha_clamp: s.alpha_clamp as u8,
                color_dest: s.color_dest,
                alpha_dest: s.alpha_dest,
                tex_coord: s.tex_coord,
                tex_map: s.tex_map,
                tex_enable: s.tex_enable as u8,
                channel: s.channel,
                kcsel: s.kcsel,
                kasel: s.kasel,
                ras_swap: s.ras_swap,
                tex_swap: s.tex_swap,
            };
        }
        for (i, g) in state.tex_gens.iter().enumerate() {
            cfg.tex_gens[i] = TexGenConfig {
                kind: g.kind as u8,
                source: g.source,
                matrix: g.matrix,
                post_matrix: g.post_matrix,
                normalize: g.normalize as u8,
                projected: g.projected as u8,
            };
        }
        for (i, c) in state.channels.iter().enumerate() {
            cfg.channels[i] = ChannelConfig {
                lit: c.lighting_enabled as u8,
                ambient_src: c.ambient_src as u8,
                material_src: c.material_src as u8,
                diffuse_fn: c.diffuse_fn as u8,
                attn_fn: c.attn_fn as u8,
                light_mask: c.light_mask,
            };
        }
        cfg.swap_tables = state.swap_tables;

        cfg.attrs_present = crate::fifo::vertex::attrs_present_mask(state);

        for (i, t) in state.textures.iter().enumerate() {
            cfg.tex_load_fmt[i] = t.load_fmt as u8;
        }

        cfg.fog_kind = state.fog.kind as u32;
        cfg.alpha_comp0 = state.alpha_compare.comp0 as u8;
        cfg.alpha_comp1 = state.alpha_compare.comp1 as u8;
        cfg.alpha_logic = state.alpha_compare.logic as u8;
        cfg.alpha_ref0 = state.alpha_compare.ref0;
        cfg.alpha_ref1 = state.alpha_compare.ref1;
        cfg.dst_alpha_enable = state.dst_alpha.enabled as u8;
        cfg.dst_alpha = state.dst_alpha.alpha;
        cfg.per_pixel_lighting = state.per_pixel_lighting as u8;

        cfg.validate(state)?;
        Ok(cfg)
    }

    /// Check every slot an active stage or generator references.
    fn validate(&self, state: &ShadowState) -> Result<()> {
        for i in 0..self.num_tev_stages as usize {
            let s = &self.stages[i];
            if s.tex_enable != 0 {
                if s.tex_coord as u32 >= self.num_tex_gens {
                    return Err(GxError::InvalidSlot {
                        kind: "texcoord generator",
                        index: s.tex_coord as usize,
                    });
                }
                if s.tex_map as usize >= crate::gx::state::NUM_TEXMAPS {
                    return Err(GxError::InvalidSlot {
                        kind: "texture map",
                        index: s.tex_map as usize,
                    });
                }
            }
            if s.channel != 0xFF && s.channel as u32 >= self.num_channels.max(1) {
                return Err(GxError::InvalidSlot {
                    kind: "color channel",
                    index: s.channel as usize,
                });
            }
        }
        for i in 0..self.num_tex_gens as usize {
            let g = &self.tex_gens[i];
            if g.matrix != 0xFF && g.matrix as usize >= crate::gx::state::NUM_TEX_MATRICES {
                return Err(GxError::InvalidSlot {
                    kind: "texture matrix",
                    index: g.matrix as usize,
                });
            }
            if g.post_matrix != 0xFF
                && g.post_matrix as usize >= crate::gx::state::NUM_POST_MATRICES
            {
                return Err(GxError::InvalidSlot {
                    kind: "post-transform matrix",
                    index: g.post_matrix as usize,
                });
            }
            if g.kind == TexGenKind::Regular as u8 || g.kind == TexGenKind::Bump as u8 {
                let src_attr = texgen_source_attr(g.source);
                if let Some(attr) = src_attr {
                    if self.attrs_present & (1 << attr as u32) == 0
                        && !matches!(attr, VtxAttr::Position)
                    {
                        return Err(GxError::InvalidSlot {
                            kind: "texgen source attribute",
                            index: attr as usize,
                        });
                    }
                }
            }
        }
        // Indexed textures need a palette registered.
        for i in 0..self.num_tev_stages as usize {
            let s = &self.stages[i];
            if s.tex_enable != 0
                && self.tex_load_fmt[s.tex_map as usize] == TexLoadFmt::Indexed as u8
                && state.textures[s.tex_map as usize].tlut.is_none()
            {
                return Err(GxError::InvalidSlot {
                    kind: "palette",
                    index: s.tex_map as usize,
                });
            }
        }
        Ok(())
    }

    /// Content hash of the snapshot.
    pub fn hash(&self) -> u64 {
        xxh3_64(bytemuck::bytes_of(self))
    }
}

/// Map a texgen source row to the vertex attribute it reads, if any.
pub fn texgen_source_attr(source: u8) -> Option<VtxAttr> {
    use crate::gx::state::texgen_src;
    match source {
        texgen_src::POSITION => Some(VtxAttr::Position),
        texgen_src::NORMAL => Some(VtxAttr::Normal),
        texgen_src::COLORS => None, // rasterized colors, not a raw attribute
        s if (texgen_src::TEX0..texgen_src::TEX0 + 8).contains(&s) => {
            VtxAttr::from_index(VtxAttr::Tex0 as u8 + (s - texgen_src::TEX0))
        }
        _ => None,
    }
}

/// Everything that selects a render pipeline: the shader plus the
/// fixed-function state wgpu bakes into the pipeline object.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PipelineConfig {
    pub shader: ShaderConfig,

    pub topology: u8,
    pub cull_mode: u8,
    pub blend_enable: u8,
    pub blend_subtract: u8,
    pub blend_src: u8,
    pub blend_dst: u8,
    pub color_update: u8,
    pub alpha_update: u8,
    pub depth_test: u8,
    pub depth_func: u8,
    pub depth_write: u8,
    pub _pad: u8,

    /// wgpu::TextureFormat of the color target, as a stable id.
    pub color_format: u32,
    pub depth_format: u32,
}

impl PipelineConfig {
    pub fn from_state(
        state: &ShadowState,
        topology: crate::fifo::Topology,
        color_format: u32,
        depth_format: u32,
    ) -> Result<Self> {
        let shader = ShaderConfig::from_state(state)?;
        Ok(Self {
            shader,
            topology: topology as u8,
            cull_mode: state.cull_mode as u8,
            blend_enable: state.blend.enabled as u8,
            blend_subtract: state.blend.subtract as u8,
            blend_src: state.blend.src_factor as u8,
            blend_dst: state.blend.dst_factor as u8,
            color_update: state.blend.color_update as u8,
            alpha_update: state.blend.alpha_update as u8,
            depth_test: state.z_mode.enable as u8,
            depth_func: state.z_mode.func as u8,
            depth_write: state.z_mode.update as u8,
            _pad: 0,
            color_format,
            depth_format,
        })
    }

    pub fn hash(&self) -> u64 {
        xxh3_64(bytemuck::bytes_of(self))
    }
}
