// Usage analysis and uniform layout.
//
// The generated shader only declares what the active configuration can
// reach: combiner registers read before written, sampled textures,
// referenced channels, and the matrices the texcoord generators name.
// The uniform buffer layout is derived here once and consumed twice, by
// the WGSL generator (struct declaration) and by the uniform writer
// (byte placement), so the two can never disagree.

use crate::gx::state::{
    tev_alpha_arg, tev_color_arg, TexGenKind, NUM_POST_MATRICES, NUM_TEX_MATRICES,
};
use crate::shader::config::ShaderConfig;

/// Offset value for a uniform block that is not present.
pub const UNIFORM_ABSENT: u32 = u32::MAX;

/// Fixed header: position/normal matrix (4x4) plus projection (4x4).
pub const UNIFORM_HEADER_SIZE: u32 = 128;

/// Size of one GPU-side light record: position, direction, color,
/// cosine attenuation, distance attenuation, one vec4 each.
pub const LIGHT_SIZE: u32 = 80;

/// Byte offsets of every optional uniform block; `UNIFORM_ABSENT` when
/// the block is not part of this shader's buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformOffsets {
    /// Combiner registers prev, reg0..reg2.
    pub regs: [u32; 4],
    /// Light array (8 records) and per-channel mask vector.
    pub lights: u32,
    pub light_masks: u32,
    /// Ambient and material colors per channel pair.
    pub chan_ambient: [u32; 2],
    pub chan_material: [u32; 2],
    /// Constant colors k0..k3.
    pub konst: [u32; 4],
    pub tex_mtx: [u32; NUM_TEX_MATRICES],
    pub post_mtx: [u32; NUM_POST_MATRICES],
    pub fog: u32,
    pub lod_bias: [u32; 8],
    /// Total size in bytes, rounded up to the WGSL struct's 16-byte
    /// alignment.
    pub size: u32,
}

impl Default for UniformOffsets {
    fn default() -> Self {
        Self {
            regs: [UNIFORM_ABSENT; 4],
            lights: UNIFORM_ABSENT,
            light_masks: UNIFORM_ABSENT,
            chan_ambient: [UNIFORM_ABSENT; 2],
            chan_material: [UNIFORM_ABSENT; 2],
            konst: [UNIFORM_ABSENT; 4],
            tex_mtx: [UNIFORM_ABSENT; NUM_TEX_MATRICES],
            post_mtx: [UNIFORM_ABSENT; NUM_POST_MATRICES],
            fog: UNIFORM_ABSENT,
            lod_bias: [UNIFORM_ABSENT; 8],
            size: UNIFORM_HEADER_SIZE,
        }
    }
}

/// Everything the generator and uniform writer need to agree on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderInfo {
    /// Combiner registers whose pre-draw value is observable (read by
    /// some stage before any earlier stage wrote that component).
    pub used_regs: u8,
    pub used_konsts: u8,
    /// Texture maps sampled by active stages.
    pub sampled_textures: u8,
    /// Of those, the maps that need palette indirection.
    pub indexed_textures: u8,
    /// Channel pairs whose rasterized color feeds a stage.
    pub sampled_channels: u8,
    /// Any sampled channel has lighting enabled.
    pub any_lit: bool,
    pub used_tex_matrices: u16,
    /// Texture matrices that need a full 3x4 (projected STQ) transform.
    pub tex_matrix_projected: u16,
    pub used_post_matrices: u32,
    pub fog: bool,
    pub offsets: UniformOffsets,
}

/// Combiner register read by a color argument, if any.
fn color_arg_reg(arg: u8) -> Option<usize> {
    match arg {
        tev_color_arg::CPREV | tev_color_arg::APREV => Some(0),
        tev_color_arg::C0 | tev_color_arg::A0 => Some(1),
        tev_color_arg::C1 | tev_color_arg::A1 => Some(2),
        tev_color_arg::C2 | tev_color_arg::A2 => Some(3),
        _ => None,
    }
}

fn alpha_arg_reg(arg: u8) -> Option<usize> {
    match arg {
        tev_alpha_arg::APREV => Some(0),
        tev_alpha_arg::A0 => Some(1),
        tev_alpha_arg::A1 => Some(2),
        tev_alpha_arg::A2 => Some(3),
        _ => None,
    }
}

/// Konst color selectors below 12 are fixed fractions; 12 and up select
/// a constant register (low two bits).
pub fn kcsel_konst(sel: u8) -> Option<usize> {
    (sel >= 12).then_some((sel & 3) as usize)
}

/// Konst alpha selectors below 16 are fixed fractions.
pub fn kasel_konst(sel: u8) -> Option<usize> {
    (sel >= 16).then_some((sel & 3) as usize)
}

/// Analyze a config and lay out its uniform buffer.
pub fn build_shader_info(cfg: &ShaderConfig) -> ShaderInfo {
    let mut info = ShaderInfo::default();

    // Read-before-write analysis over the combiner registers, tracking
    // color and alpha components separately.
    let mut written_rgb = 0u8;
    let mut written_a = 0u8;
    for i in 0..cfg.num_tev_stages as usize {
        let s = &cfg.stages[i];
        for &arg in &s.color_in {
            if let Some(reg) = color_arg_reg(arg) {
                // APREV-family args read the alpha component.
                let reads_alpha = matches!(
                    arg,
                    tev_color_arg::APREV | tev_color_arg::A0 | tev_color_arg::A1 | tev_color_arg::A2
                );
                let written = if reads_alpha { written_a } else { written_rgb };
                if written & (1 << reg) == 0 {
                    info.used_regs |= 1 << reg;
                }
            }
            if arg == tev_color_arg::KONST {
                if let Some(k) = kcsel_konst(s.kcsel) {
                    info.used_konsts |= 1 << k;
                }
            }
        }
        for &arg in &s.alpha_in {
            if let Some(reg) = alpha_arg_reg(arg) {
                if written_a & (1 << reg) == 0 {
                    info.used_regs |= 1 << reg;
                }
            }
            if arg == tev_alpha_arg::KONST {
                if let Some(k) = kasel_konst(s.kasel) {
                    info.used_konsts |= 1 << k;
                }
            }
        }
        if s.tex_enable != 0 {
            info.sampled_textures |= 1 << s.tex_map;
            if cfg.tex_load_fmt[s.tex_map as usize]
                == crate::gx::texture::TexLoadFmt::Indexed as u8
            {
                info.indexed_textures |= 1 << s.tex_map;
            }
        }
        if s.channel != 0xFF {
            info.sampled_channels |= 1 << s.channel;
        }
        written_rgb |= 1 << s.color_dest;
        written_a |= 1 << s.alpha_dest;
    }

    for pair in 0..2usize {
        if info.sampled_channels & (1 << pair) == 0 {
            continue;
        }
        // A pair is lit if either its color or its alpha control is.
        let color = &cfg.channels[pair * 2];
        let alpha = &cfg.channels[pair * 2 + 1];
        if color.lit != 0 || alpha.lit != 0 {
            info.any_lit = true;
        }
    }

    for i in 0..cfg.num_tex_gens as usize {
        let g = &cfg.tex_gens[i];
        if g.kind == TexGenKind::Regular as u8 && g.matrix != 0xFF {
            info.used_tex_matrices |= 1 << g.matrix;
            if g.projected != 0 {
                info.tex_matrix_projected |= 1 << g.matrix;
            }
        }
        if g.post_matrix != 0xFF {
            info.used_post_matrices |= 1 << g.post_matrix;
        }
    }

    info.fog = cfg.fog_kind != 0;

    // Block placement, in declaration order. Every block is a multiple
    // of 16 bytes except the trailing LOD biases.
    let mut off = UNIFORM_HEADER_SIZE;
    for r in 0..4 {
        if info.used_regs & (1 << r) != 0 {
            info.offsets.regs[r] = off;
            off += 16;
        }
    }
    if info.any_lit {
        info.offsets.lights = off;
        off += 8 * LIGHT_SIZE;
        info.offsets.light_masks = off;
        off += 16;
    }
    for pair in 0..2 {
        if info.sampled_channels & (1 << pair) != 0 {
            info.offsets.chan_ambient[pair] = off;
            off += 16;
            info.offsets.chan_material[pair] = off;
            off += 16;
        }
    }
    for k in 0..4 {
        if info.used_konsts & (1 << k) != 0 {
            info.offsets.konst[k] = off;
            off += 16;
        }
    }
    for m in 0..NUM_TEX_MATRICES {
        if info.used_tex_matrices & (1 << m) != 0 {
            info.offsets.tex_mtx[m] = off;
            off += if info.tex_matrix_projected & (1 << m) != 0 {
                64
            } else {
                32
            };
        }
    }
    for m in 0..NUM_POST_MATRICES {
        if info.used_post_matrices & (1 << m) != 0 {
            info.offsets.post_mtx[m] = off;
            off += 64;
        }
    }
    if info.fog {
        info.offsets.fog = off;
        off += 32;
    }
    for t in 0..8 {
        if info.sampled_textures & (1 << t) != 0 {
            info.offsets.lod_bias[t] = off;
            off += 4;
        }
    }
    // WGSL rounds the struct size up to its 16-byte alignment; the bound
    // range must cover the whole struct or the draw is rejected.
    info.offsets.size = (off + 15) & !15;

    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gx::state::{AttrInput, ShadowState, VtxAttr};

    fn base_config() -> ShaderConfig {
        let mut state = ShadowState::new();
        state.vtx_desc[VtxAttr::Position as usize] = AttrInput::Direct;
        ShaderConfig::from_state(&state).unwrap()
    }

    #[test]
    fn default_config_needs_only_prev_register() {
        // The default stage passes prev through, reading it unwritten.
        let info = build_shader_info(&base_config());
        assert_eq!(info.used_regs, 0b0001);
        assert_eq!(info.used_konsts, 0);
        assert_eq!(info.sampled_textures, 0);
        assert!(!info.any_lit);
        assert_eq!(info.offsets.size, UNIFORM_HEADER_SIZE + 16);
    }

    #[test]
    fn register_written_before_read_needs_no_initial_value() {
        let mut cfg = base_config();
        cfg.num_tev_stages = 2;
        // Stage 0 writes reg1 (color and alpha) from constants; stage 1
        // reads it back. No initial value needed.
        cfg.stages[0].color_in = [
            tev_color_arg::ONE,
            tev_color_arg::ZERO,
            tev_color_arg::ZERO,
            tev_color_arg::ZERO,
        ];
        cfg.stages[0].alpha_in = [tev_alpha_arg::ZERO; 4];
        cfg.stages[0].color_dest = 2;
        cfg.stages[0].alpha_dest = 2;
        cfg.stages[1].color_in[3] = tev_color_arg::C1;
        cfg.stages[1].alpha_in[3] = tev_alpha_arg::A1;
        cfg.stages[1].color_dest = 0;
        cfg.stages[1].alpha_dest = 0;
        let info = build_shader_info(&cfg);
        assert_eq!(info.used_regs & 0b0100, 0);
    }

    #[test]
    fn color_write_does_not_cover_alpha_read() {
        let mut cfg = base_config();
        cfg.num_tev_stages = 2;
        // Stage 0 writes reg0's color but its alpha goes to prev.
        cfg.stages[0].color_dest = 1;
        cfg.stages[0].alpha_dest = 0;
        // Stage 1 reads A0: reg0's alpha was never written.
        cfg.stages[1].alpha_in[3] = tev_alpha_arg::A0;
        let info = build_shader_info(&cfg);
        assert_ne!(info.used_regs & 0b0010, 0);
    }

    #[test]
    fn konst_selectors_map_to_registers() {
        assert_eq!(kcsel_konst(0x0C), Some(0));
        assert_eq!(kcsel_konst(0x0F), Some(3));
        assert_eq!(kcsel_konst(0x1D), Some(1)); // K1 green broadcast
        assert_eq!(kcsel_konst(0x00), None); // fraction 1.0
        assert_eq!(kasel_konst(0x1C), Some(0));
        assert_eq!(kasel_konst(0x07), None);
    }

    #[test]
    fn lit_channel_adds_light_block() {
        let mut cfg = base_config();
        cfg.stages[0].channel = 0;
        cfg.num_channels = 1;
        cfg.channels[0].lit = 1;
        cfg.channels[0].light_mask = 0b11;
        let info = build_shader_info(&cfg);
        assert!(info.any_lit);
        assert_eq!(info.sampled_channels, 0b01);
        // header + prev + lights + masks + ambient + material.
        assert_eq!(
            info.offsets.size,
            UNIFORM_HEADER_SIZE + 16 + 640 + 16 + 16 + 16
        );
        assert_eq!(info.offsets.lights, UNIFORM_HEADER_SIZE + 16);
    }

    #[test]
    fn unlit_sampled_channel_skips_lights() {
        let mut cfg = base_config();
        cfg.stages[0].channel = 0;
        cfg.num_channels = 1;
        let info = build_shader_info(&cfg);
        assert!(!info.any_lit);
        assert_eq!(info.offsets.lights, UNIFORM_ABSENT);
        assert_ne!(info.offsets.chan_material[0], UNIFORM_ABSENT);
    }

    #[test]
    fn texture_matrix_sizes_depend_on_projection() {
        let mut cfg = base_config();
        cfg.num_tex_gens = 2;
        cfg.tex_gens[0].matrix = 0;
        cfg.tex_gens[0].projected = 0;
        cfg.tex_gens[1].matrix = 3;
        cfg.tex_gens[1].projected = 1;
        let info = build_shader_info(&cfg);
        assert_eq!(info.used_tex_matrices, 0b1001);
        assert_eq!(info.tex_matrix_projected, 0b1000);
        let base = info.offsets.tex_mtx[0];
        assert_eq!(info.offsets.tex_mtx[3], base + 32);
        assert_eq!(info.offsets.size, info.offsets.tex_mtx[3] + 64);
    }

    #[test]
    fn fog_and_lod_bias_trail_the_buffer() {
        let mut cfg = base_config();
        cfg.fog_kind = crate::gx::state::FogKind::Linear as u32;
        cfg.num_tex_gens = 1;
        cfg.tex_gens[0].source = crate::gx::state::texgen_src::POSITION;
        cfg.stages[0].tex_enable = 1;
        cfg.stages[0].tex_map = 5;
        let info = build_shader_info(&cfg);
        assert!(info.fog);
        assert_eq!(info.sampled_textures, 1 << 5);
        assert_eq!(info.offsets.lod_bias[5], info.offsets.fog + 32);
        // 4 trailing LOD-bias bytes round up to the next 16.
        assert_eq!(info.offsets.size, info.offsets.fog + 48);
    }

    #[test]
    fn size_covers_the_aligned_wgsl_struct() {
        // Any trailing f32 LOD bias leaves the raw byte count at 16k+4;
        // the declared size must reach the struct's rounded end.
        let mut cfg = base_config();
        cfg.num_tex_gens = 1;
        cfg.tex_gens[0].source = crate::gx::state::texgen_src::POSITION;
        cfg.stages[0].tex_enable = 1;
        cfg.stages[0].tex_map = 0;
        let info = build_shader_info(&cfg);
        assert_eq!(info.offsets.lod_bias[0] % 16, 0);
        assert_eq!(info.offsets.size % 16, 0);
        assert_eq!(info.offsets.size, info.offsets.lod_bias[0] + 16);
    }

    #[test]
    fn offsets_are_16_byte_aligned_for_vec4_blocks() {
        let mut cfg = base_config();
        cfg.stages[0].channel = 0;
        cfg.num_channels = 1;
        cfg.channels[0].lit = 1;
        cfg.fog_kind = 2;
        let info = build_shader_info(&cfg);
        for off in [
            info.offsets.regs[0],
            info.offsets.lights,
            info.offsets.light_masks,
            info.offsets.chan_ambient[0],
            info.offsets.fog,
        ] {
            assert_ne!(off, UNIFORM_ABSENT);
            assert_eq!(off % 16, 0);
        }
    }
}
