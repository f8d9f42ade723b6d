// Transform-unit register bank: matrix memory, hardware lights, color
// channels, texcoord generators, viewport and projection.
//
// XF loads are bulk writes: a base address plus a run of 32-bit words.
// A single load may span several logical objects (for example two
// consecutive position matrices), so matrix and light memory is decoded
// word by word.

use log::{debug, warn};

use crate::gx::bits::{bit, field, rgba8};
use crate::gx::lighting::{AttnFn, ColorSrc, DiffuseFn};
use crate::gx::state::{ShadowState, TexGenKind, NUM_CHANNELS, NUM_LIGHTS, NUM_TEXGENS};

// Matrix memory (word addresses). Position and texture matrices share
// one region: ten 3x4 position matrices followed by ten 3x4 texture
// matrices.
pub const POS_MTX_BASE: u16 = 0x0000;
pub const TEX_MTX_BASE: u16 = 0x0078; // word 120
pub const POSTEX_MTX_END: u16 = 0x00F0; // word 240
pub const NRM_MTX_BASE: u16 = 0x0400;
pub const NRM_MTX_END: u16 = 0x045A; // 10 * 9 words
pub const POST_MTX_BASE: u16 = 0x0500;
pub const POST_MTX_END: u16 = 0x05F0; // 20 * 12 words
pub const LIGHT_BASE: u16 = 0x0600;
pub const LIGHT_END: u16 = 0x0680; // 8 * 16 words

// Control registers.
pub const REG_MTXIDX_A: u16 = 0x1018;
pub const REG_MTXIDX_B: u16 = 0x1019;
pub const REG_NUM_CHANS: u16 = 0x1009;
pub const REG_AMBIENT0: u16 = 0x100A;
pub const REG_MATERIAL0: u16 = 0x100C;
pub const REG_CHAN_CTRL0: u16 = 0x100E; // color0, color1, alpha0, alpha1
pub const REG_VIEWPORT0: u16 = 0x101A; // ..=0x101F
pub const REG_PROJECTION0: u16 = 0x1020; // six coefficients + type word
pub const REG_NUM_TEXGENS: u16 = 0x103F;
pub const REG_TEXGEN0: u16 = 0x1040; // ..=0x1047
pub const REG_POST_TEXGEN0: u16 = 0x1050; // ..=0x1057

/// Channel-control registers arrive as color0, color1, alpha0, alpha1;
/// the shadow state keeps them paired as color0, alpha0, color1, alpha1.
const CHAN_SLOT: [usize; NUM_CHANNELS] = [0, 2, 1, 3];

/// Apply one bulk XF load to the shadow state.
pub fn load_xf_regs(state: &mut ShadowState, base: u16, data: &[u32]) {
    for (i, &word) in data.iter().enumerate() {
        load_xf_word(state, base.wrapping_add(i as u16), word);
    }
    if !data.is_empty() {
        state.mark_dirty();
    }
}

fn load_xf_word(state: &mut ShadowState, addr: u16, word: u32) {
    match addr {
        POS_MTX_BASE..TEX_MTX_BASE => {
            let w = (addr - POS_MTX_BASE) as usize;
            state.matrices.position[w / 12][w % 12] = f32::from_bits(word);
        }
        TEX_MTX_BASE..POSTEX_MTX_END => {
            let w = (addr - TEX_MTX_BASE) as usize;
            state.matrices.texture[w / 12][w % 12] = f32::from_bits(word);
        }
        NRM_MTX_BASE..NRM_MTX_END => {
            let w = (addr - NRM_MTX_BASE) as usize;
            state.matrices.normal[w / 9][w % 9] = f32::from_bits(word);
        }
        POST_MTX_BASE..POST_MTX_END => {
            let w = (addr - POST_MTX_BASE) as usize;
            state.matrices.post[w / 12][w % 12] = f32::from_bits(word);
        }
        LIGHT_BASE..LIGHT_END => {
            let w = (addr - LIGHT_BASE) as usize;
            load_light_word(state, w / 16, w % 16, word);
        }
        REG_MTXIDX_A => {
            state.matrices.current_pos = (field(word, 0, 6) / 3) as u8;
            for t in 0..4usize {
                set_texgen_matrix(state, t, field(word, 6 + 6 * t as u32, 6));
            }
        }
        REG_MTXIDX_B => {
            for t in 0..4usize {
                set_texgen_matrix(state, 4 + t, field(word, 6 * t as u32, 6));
            }
        }
        REG_NUM_CHANS => state.num_channels = (word & 3) as u8,
        REG_AMBIENT0 => state.ambient_colors[0] = rgba8(word),
        a if a == REG_AMBIENT0 + 1 => state.ambient_colors[1] = rgba8(word),
        REG_MATERIAL0 => state.material_colors[0] = rgba8(word),
        a if a == REG_MATERIAL0 + 1 => state.material_colors[1] = rgba8(word),
        a if (REG_CHAN_CTRL0..REG_CHAN_CTRL0 + NUM_CHANNELS as u16).contains(&a) => {
            let slot = CHAN_SLOT[(a - REG_CHAN_CTRL0) as usize];
            state.channels[slot] = decode_channel_ctrl(word);
        }
        a if (REG_VIEWPORT0..REG_VIEWPORT0 + 6).contains(&a) => {
            decode_viewport_word(state, (a - REG_VIEWPORT0) as usize, f32::from_bits(word));
        }
        a if (REG_PROJECTION0..REG_PROJECTION0 + 7).contains(&a) => {
            let i = (a - REG_PROJECTION0) as usize;
            state.matrices.projection_raw[i] = if i == 6 {
                // Type word: integral, not a float payload.
                word as f32
            } else {
                f32::from_bits(word)
            };
            if i == 6 {
                state.matrices.update_projection();
            }
        }
        REG_NUM_TEXGENS => state.num_tex_gens = (word & 0xF).min(NUM_TEXGENS as u32) as u8,
        a if (REG_TEXGEN0..REG_TEXGEN0 + NUM_TEXGENS as u16).contains(&a) => {
            decode_texgen(state, (a - REG_TEXGEN0) as usize, word);
        }
        a if (REG_POST_TEXGEN0..REG_POST_TEXGEN0 + NUM_TEXGENS as u16).contains(&a) => {
            let gen = &mut state.tex_gens[(a - REG_POST_TEXGEN0) as usize];
            let idx = field(word, 0, 8);
            gen.post_matrix = if idx >= 64 { ((idx - 64) / 3) as u8 } else { 0xFF };
            gen.normalize = bit(word, 8);
        }
        _ => {
            warn!("unhandled XF register {addr:#06x} = {word:#010x}");
        }
    }
}

/// Matrix-index fields encode the row of the shared pos/tex matrix
/// memory; texture matrices start at row 30 and occupy three rows each.
fn set_texgen_matrix(state: &mut ShadowState, gen: usize, row: u32) {
    let slot = if row >= 30 { ((row - 30) / 3) as u8 } else { 0xFF };
    if state.tex_gens[gen].matrix != slot {
        state.tex_gens[gen].matrix = slot;
        debug!("texgen {gen} matrix slot {slot}");
    }
}

fn load_light_word(state: &mut ShadowState, light: usize, word: usize, value: u32) {
    if light >= NUM_LIGHTS {
        return;
    }
    let l = &mut state.lights[light];
    let f = f32::from_bits(value);
    match word {
        0..=2 => {} // reserved
        3 => l.color = rgba8(value),
        4..=6 => l.cos_attn[word - 4] = f,
        7..=9 => l.dist_attn[word - 7] = f,
        10..=12 => l.position[word - 10] = f,
        13..=15 => l.direction[word - 13] = f,
        _ => unreachable!(),
    }
}

fn decode_channel_ctrl(v: u32) -> crate::gx::lighting::ChannelCtrl {
    let src = |b: bool| if b { ColorSrc::Vertex } else { ColorSrc::Register };
    crate::gx::lighting::ChannelCtrl {
        material_src: src(bit(v, 0)),
        lighting_enabled: bit(v, 1),
        ambient_src: src(bit(v, 6)),
        diffuse_fn: match field(v, 7, 2) {
            1 => DiffuseFn::Sign,
            2 => DiffuseFn::Clamp,
            _ => DiffuseFn::None,
        },
        attn_fn: if !bit(v, 9) {
            AttnFn::Off
        } else if bit(v, 10) {
            AttnFn::Spot
        } else {
            AttnFn::Spec
        },
        light_mask: (field(v, 2, 4) | (field(v, 11, 4) << 4)) as u8,
    }
}

/// Encode a channel-control word; the inverse of `decode_channel_ctrl`
/// (used by the register round-trip tests and replay capture).
pub fn encode_channel_ctrl(c: &crate::gx::lighting::ChannelCtrl) -> u32 {
    let mut v = 0u32;
    v |= (c.material_src == ColorSrc::Vertex) as u32;
    v |= (c.lighting_enabled as u32) << 1;
    v |= ((c.light_mask & 0xF) as u32) << 2;
    v |= ((c.ambient_src == ColorSrc::Vertex) as u32) << 6;
    v |= (c.diffuse_fn as u32) << 7;
    match c.attn_fn {
        AttnFn::Off => {}
        AttnFn::Spec => v |= 1 << 9,
        AttnFn::Spot => v |= (1 << 9) | (1 << 10),
    }
    v |= ((c.light_mask >> 4) as u32) << 11;
    v
}

/// Viewport registers hold the hardware transform directly:
///   vp0 = w/2, vp1 = -h/2, vp2 = (far-near)*2^24,
///   vp3 = 342 + x + w/2, vp4 = 342 + y + h/2, vp5 = far*2^24.
fn decode_viewport_word(state: &mut ShadowState, i: usize, f: f32) {
    const SUBPIXEL_OFFSET: f32 = 342.0;
    const Z_SCALE: f32 = 16_777_215.0;
    let vp = &mut state.viewport;
    match i {
        0 => vp.width = 2.0 * f,
        1 => vp.height = -2.0 * f,
        2 => vp.near = vp.far - f / Z_SCALE,
        3 => vp.x = f - SUBPIXEL_OFFSET - vp.width / 2.0,
        4 => vp.y = f - SUBPIXEL_OFFSET - vp.height / 2.0,
        5 => {
            let range = vp.far - vp.near;
            vp.far = f / Z_SCALE;
            vp.near = vp.far - range;
        }
        _ => unreachable!(),
    }
}

fn decode_texgen(state: &mut ShadowState, gen: usize, v: u32) {
    let g = &mut state.tex_gens[gen];
    g.projected = bit(v, 1);
    g.kind = match field(v, 4, 3) {
        1 => TexGenKind::Bump,
        2 => TexGenKind::Color0,
        3 => TexGenKind::Color1,
        _ => TexGenKind::Regular,
    };
    g.source = field(v, 7, 5) as u8;
    if g.kind == TexGenKind::Bump {
        // Emboss source/light fields present but not consumed.
        warn!(
            "texgen {gen}: emboss bump mapping requested (source {}, light {}), \
             rendering without it",
            field(v, 12, 3),
            field(v, 15, 3)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gx::state::texgen_src;

    fn words(fs: &[f32]) -> Vec<u32> {
        fs.iter().map(|f| f.to_bits()).collect()
    }

    #[test]
    fn position_matrix_load_spans_two_matrices() {
        let mut state = ShadowState::new();
        // 24 floats starting at matrix 0 fill matrices 0 and 1.
        let data: Vec<f32> = (0..24).map(|i| i as f32).collect();
        load_xf_regs(&mut state, POS_MTX_BASE, &words(&data));
        assert_eq!(state.matrices.position[0][0], 0.0);
        assert_eq!(state.matrices.position[0][11], 11.0);
        assert_eq!(state.matrices.position[1][0], 12.0);
        assert_eq!(state.matrices.position[1][11], 23.0);
        assert_eq!(state.matrices.position[2][0], 1.0); // identity untouched
    }

    #[test]
    fn texture_matrix_region_follows_position() {
        let mut state = ShadowState::new();
        load_xf_regs(&mut state, TEX_MTX_BASE + 12, &words(&[7.5]));
        assert_eq!(state.matrices.texture[1][0], 7.5);
    }

    #[test]
    fn normal_matrix_load() {
        let mut state = ShadowState::new();
        let data: Vec<f32> = (0..9).map(|i| i as f32 + 0.5).collect();
        load_xf_regs(&mut state, NRM_MTX_BASE + 9, &words(&data));
        assert_eq!(state.matrices.normal[1][0], 0.5);
        assert_eq!(state.matrices.normal[1][8], 8.5);
    }

    #[test]
    fn light_block_decodes_fields() {
        let mut state = ShadowState::new();
        let mut data = vec![0u32; 16];
        data[3] = 0xFF00_00FF; // red, full alpha
        data[4] = 1.0f32.to_bits();
        data[7] = 2.0f32.to_bits();
        data[10] = 3.0f32.to_bits();
        data[13] = (-1.0f32).to_bits();
        load_xf_regs(&mut state, LIGHT_BASE + 32, &data); // light 2
        let l = &state.lights[2];
        assert_eq!(l.color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(l.cos_attn[0], 1.0);
        assert_eq!(l.dist_attn[0], 2.0);
        assert_eq!(l.position, [3.0, 0.0, 0.0]);
        assert_eq!(l.direction, [-1.0, 0.0, 0.0]);
    }

    #[test]
    fn channel_ctrl_round_trips() {
        use crate::gx::lighting::ChannelCtrl;
        let ctrl = ChannelCtrl {
            lighting_enabled: true,
            ambient_src: ColorSrc::Register,
            material_src: ColorSrc::Vertex,
            diffuse_fn: DiffuseFn::Clamp,
            attn_fn: AttnFn::Spot,
            light_mask: 0b1010_0101,
        };
        let mut state = ShadowState::new();
        load_xf_regs(&mut state, REG_CHAN_CTRL0, &[encode_channel_ctrl(&ctrl)]);
        assert_eq!(state.channels[0], ctrl);

        // Register order is color0, color1, alpha0, alpha1; state order
        // pairs each color with its alpha.
        load_xf_regs(&mut state, REG_CHAN_CTRL0 + 1, &[encode_channel_ctrl(&ctrl)]);
        assert_eq!(state.channels[2], ctrl);
    }

    #[test]
    fn projection_load_builds_perspective() {
        let mut state = ShadowState::new();
        let mut data = words(&[2.0, 1.5, 0.0, 0.0, -1.0, -0.1]);
        data.push(0); // perspective
        load_xf_regs(&mut state, REG_PROJECTION0, &data);
        let m = &state.matrices.projection;
        assert_eq!(m[0], 2.0);
        assert_eq!(m[5], 1.5);
        assert_eq!(m[11], -1.0);
        assert_eq!(m[14], -0.1);
    }

    #[test]
    fn projection_load_builds_ortho() {
        let mut state = ShadowState::new();
        let mut data = words(&[0.5, 0.75, -0.01, -1.0, 1.0, 0.0]);
        data.push(1); // orthographic
        load_xf_regs(&mut state, REG_PROJECTION0, &data);
        let m = &state.matrices.projection;
        assert_eq!(m[0], 0.5);
        assert_eq!(m[12], -1.0);
        assert_eq!(m[15], 1.0);
        assert_eq!(m[11], 0.0);
    }

    #[test]
    fn viewport_decode_recovers_dimensions() {
        let mut state = ShadowState::new();
        // 640x480 at origin, depth range [0, 1].
        let z = 16_777_215.0f32;
        let vals = [320.0, -240.0, z, 342.0 + 320.0, 342.0 + 240.0, z];
        load_xf_regs(&mut state, REG_VIEWPORT0, &words(&vals));
        let vp = &state.viewport;
        assert_eq!(vp.width, 640.0);
        assert_eq!(vp.height, 480.0);
        assert_eq!(vp.x, 0.0);
        assert_eq!(vp.y, 0.0);
        assert!((vp.far - 1.0).abs() < 1e-6);
        assert!(vp.near.abs() < 1e-6);
    }

    #[test]
    fn texgen_config_decodes() {
        let mut state = ShadowState::new();
        // Regular texgen from TEX0, projected STQ.
        let v = (1 << 1) | ((texgen_src::TEX0 as u32) << 7);
        load_xf_regs(&mut state, REG_TEXGEN0 + 3, &[v]);
        let g = &state.tex_gens[3];
        assert_eq!(g.kind, TexGenKind::Regular);
        assert_eq!(g.source, texgen_src::TEX0);
        assert!(g.projected);
    }

    #[test]
    fn matrix_index_selects_texture_slots() {
        let mut state = ShadowState::new();
        // Geometry row 6 (pair 2), texgen0 row 30 (tex slot 0),
        // texgen1 row 33 (tex slot 1).
        let a = 6 | (30 << 6) | (33 << 12);
        load_xf_regs(&mut state, REG_MTXIDX_A, &[a]);
        assert_eq!(state.matrices.current_pos, 2);
        assert_eq!(state.tex_gens[0].matrix, 0);
        assert_eq!(state.tex_gens[1].matrix, 1);
        assert_eq!(state.tex_gens[2].matrix, 0xFF);
    }

    #[test]
    fn post_texgen_config() {
        let mut state = ShadowState::new();
        // Post matrix slot 1 (row 64 + 3), normalized.
        load_xf_regs(&mut state, REG_POST_TEXGEN0, &[67 | (1 << 8)]);
        assert_eq!(state.tex_gens[0].post_matrix, 1);
        assert!(state.tex_gens[0].normalize);
    }

    #[test]
    fn num_texgens_is_clamped() {
        let mut state = ShadowState::new();
        load_xf_regs(&mut state, REG_NUM_TEXGENS, &[12]);
        assert_eq!(state.num_tex_gens, 8);
    }

    #[test]
    fn xf_load_sets_dirty_flag() {
        let mut state = ShadowState::new();
        state.dirty = false;
        load_xf_regs(&mut state, REG_NUM_CHANS, &[2]);
        assert!(state.dirty);
        assert_eq!(state.num_channels, 2);
    }
}
