// Uniform buffer assembly.
//
// Fills a byte buffer in the exact order `UniformOffsets` laid out, so
// the generated WGSL struct and this writer can never disagree about a
// field position without the same change touching `build_shader_info`.

use crate::gx::state::ShadowState;
use crate::shader::info::{ShaderInfo, UNIFORM_ABSENT};

/// Write the uniform block for the current register state. The buffer is
/// resized to the block size reported by `info.offsets.size`.
pub fn build_uniform(state: &ShadowState, info: &ShaderInfo, out: &mut Vec<u8>) {
    let off = &info.offsets;
    out.clear();
    out.resize(off.size as usize, 0);

    // Header: position/normal matrix expanded to 4x4, then projection.
    // Both are stored column-major as wgpu expects.
    let pos = &state.matrices.position[state.matrices.current_pos as usize];
    let mut posnrm = [0.0f32; 16];
    for col in 0..4 {
        posnrm[col * 4] = pos[col];
        posnrm[col * 4 + 1] = pos[4 + col];
        posnrm[col * 4 + 2] = pos[8 + col];
    }
    posnrm[15] = 1.0;
    put(out, 0, &posnrm);
    put(out, 64, &state.matrices.projection);

    for r in 0..4 {
        if off.regs[r] != UNIFORM_ABSENT {
            put(out, off.regs[r], &state.tev_regs[r]);
        }
    }

    if off.lights != UNIFORM_ABSENT {
        let mut base = off.lights;
        for light in &state.lights {
            put(out, base, &vec4(light.position, 1.0));
            put(out, base + 16, &vec4(light.direction, 0.0));
            put(out, base + 32, &light.color);
            put(out, base + 48, &vec4(light.cos_attn, 0.0));
            put(out, base + 64, &vec4(light.dist_attn, 0.0));
            base += 80;
        }
    }
    if off.light_masks != UNIFORM_ABSENT {
        let masks: Vec<u8> = state
            .channels
            .iter()
            .flat_map(|c| u32::from(c.light_mask).to_le_bytes())
            .collect();
        out[off.light_masks as usize..off.light_masks as usize + 16].copy_from_slice(&masks);
    }

    for pair in 0..2 {
        if off.chan_ambient[pair] != UNIFORM_ABSENT {
            put(out, off.chan_ambient[pair], &state.ambient_colors[pair]);
            put(out, off.chan_material[pair], &state.material_colors[pair]);
        }
    }

    for k in 0..4 {
        if off.konst[k] != UNIFORM_ABSENT {
            put(out, off.konst[k], &state.konst[k]);
        }
    }

    // Texture matrices go out as rows: the shader applies them with dot
    // products, so no transposition happens here. Projected slots carry
    // three rows plus an identity fourth to fill the mat4x4.
    for m in 0..state.matrices.texture.len() {
        if off.tex_mtx[m] == UNIFORM_ABSENT {
            continue;
        }
        let rows = &state.matrices.texture[m];
        put(out, off.tex_mtx[m], &rows[0..8]);
        if info.tex_matrix_projected & (1 << m) != 0 {
            put(out, off.tex_mtx[m] + 32, &rows[8..12]);
            put(out, off.tex_mtx[m] + 48, &[0.0, 0.0, 0.0, 1.0]);
        }
    }
    for m in 0..state.matrices.post.len() {
        if off.post_mtx[m] == UNIFORM_ABSENT {
            continue;
        }
        put(out, off.post_mtx[m], &state.matrices.post[m][..]);
        put(out, off.post_mtx[m] + 48, &[0.0, 0.0, 0.0, 1.0]);
    }

    if off.fog != UNIFORM_ABSENT {
        let (a, b) = fold_fog(state);
        put(out, off.fog, &[a, b, state.fog.c, 0.0]);
        put(out, off.fog + 16, &state.fog.color);
    }

    for t in 0..8 {
        if off.lod_bias[t] != UNIFORM_ABSENT {
            put(out, off.lod_bias[t], &[state.textures[t].lod_bias]);
        }
    }
}

fn put(out: &mut [u8], offset: u32, vals: &[f32]) {
    let o = offset as usize;
    out[o..o + vals.len() * 4].copy_from_slice(bytemuck::cast_slice(vals));
}

fn vec4(v: [f32; 3], w: f32) -> [f32; 4] {
    [v[0], v[1], v[2], w]
}

/// Fold the hardware fog coefficients into the normalized-depth form the
/// shader evaluates. Hardware computes eye depth as
///   ze = a / (b_mag / 2^b_shift - z24)
/// over a 24-bit depth value; with depth in [0, 1] both terms scale by
/// 2^(24 - b_shift).
fn fold_fog(state: &ShadowState) -> (f32, f32) {
    // b_shift comes from a 5-bit register field, so the cast is lossless.
    let scale = (24 - state.fog.b_shift as i32) as f32;
    let denom = scale.exp2();
    (state.fog.a / denom, state.fog.b_mag / denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gx::state::{tev_alpha_arg, tev_color_arg, AttrInput, FogKind, VtxAttr};
    use crate::shader::config::ShaderConfig;
    use crate::shader::info::build_shader_info;

    fn read_f32(buf: &[u8], offset: u32) -> f32 {
        let o = offset as usize;
        f32::from_le_bytes([buf[o], buf[o + 1], buf[o + 2], buf[o + 3]])
    }

    fn build(state: &ShadowState) -> (ShaderInfo, Vec<u8>) {
        let cfg = ShaderConfig::from_state(state).unwrap();
        let info = build_shader_info(&cfg);
        let mut buf = Vec::new();
        build_uniform(state, &info, &mut buf);
        (info, buf)
    }

    #[test]
    fn buffer_matches_reported_size() {
        let state = ShadowState::new();
        let (info, buf) = build(&state);
        assert_eq!(buf.len(), info.offsets.size as usize);
    }

    #[test]
    fn posnrm_matrix_is_column_major() {
        let mut state = ShadowState::new();
        // Translation by (5, 6, 7) in row-major 3x4 form.
        state.matrices.position[0][3] = 5.0;
        state.matrices.position[0][7] = 6.0;
        state.matrices.position[0][11] = 7.0;
        let (_, buf) = build(&state);
        // Column 3 holds the translation, column-major.
        assert_eq!(read_f32(&buf, 48), 5.0);
        assert_eq!(read_f32(&buf, 52), 6.0);
        assert_eq!(read_f32(&buf, 56), 7.0);
        assert_eq!(read_f32(&buf, 60), 1.0);
        // Diagonal stays identity.
        assert_eq!(read_f32(&buf, 0), 1.0);
        assert_eq!(read_f32(&buf, 20), 1.0);
    }

    #[test]
    fn active_matrix_index_selects_the_row() {
        let mut state = ShadowState::new();
        state.matrices.position[3][0] = 2.5;
        state.matrices.current_pos = 3;
        let (_, buf) = build(&state);
        assert_eq!(read_f32(&buf, 0), 2.5);
    }

    #[test]
    fn read_before_write_register_is_uploaded() {
        let mut state = ShadowState::new();
        state.tev_stages[0].color_in[3] = tev_color_arg::C1;
        state.tev_regs[2] = [0.25, 0.5, 0.75, 1.0];
        let (info, buf) = build(&state);
        let off = info.offsets.regs[2];
        assert_ne!(off, UNIFORM_ABSENT);
        assert_eq!(read_f32(&buf, off), 0.25);
        assert_eq!(read_f32(&buf, off + 12), 1.0);
    }

    #[test]
    fn light_block_layout() {
        let mut state = ShadowState::new();
        state.vtx_desc[VtxAttr::Normal as usize] = AttrInput::Direct;
        state.tev_stages[0].channel = 0;
        state.tev_stages[0].color_in[3] = tev_color_arg::RASC;
        state.channels[0].lighting_enabled = true;
        state.channels[0].light_mask = 0b101;
        state.lights[1].position = [10.0, 20.0, 30.0];
        state.lights[1].color = [0.5, 0.5, 0.5, 1.0];
        let (info, buf) = build(&state);
        let lights = info.offsets.lights;
        assert_ne!(lights, UNIFORM_ABSENT);
        // Light 1 starts one 80-byte stride in.
        assert_eq!(read_f32(&buf, lights + 80), 10.0);
        assert_eq!(read_f32(&buf, lights + 80 + 4), 20.0);
        assert_eq!(read_f32(&buf, lights + 80 + 12), 1.0);
        assert_eq!(read_f32(&buf, lights + 80 + 32), 0.5);
        // Channel 0 mask sits first in the mask vector.
        let masks = info.offsets.light_masks as usize;
        assert_eq!(
            u32::from_le_bytes(buf[masks..masks + 4].try_into().unwrap()),
            0b101
        );
    }

    #[test]
    fn konst_upload_follows_usage() {
        let mut state = ShadowState::new();
        state.tev_stages[0].alpha_in[3] = tev_alpha_arg::KONST;
        state.tev_stages[0].kasel = 0x1D; // K1 alpha
        state.konst[1] = [0.1, 0.2, 0.3, 0.4];
        let (info, buf) = build(&state);
        assert_eq!(info.offsets.konst[0], UNIFORM_ABSENT);
        let off = info.offsets.konst[1];
        assert_ne!(off, UNIFORM_ABSENT);
        assert!((read_f32(&buf, off + 12) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn texture_matrix_rows_written_in_order() {
        let mut state = ShadowState::new();
        state.num_tex_gens = 1;
        state.tex_gens[0].source = crate::gx::state::texgen_src::POSITION;
        state.tex_gens[0].matrix = 1;
        state.tev_stages[0].tex_enable = true;
        state.tev_stages[0].tex_coord = 0;
        state.tev_stages[0].tex_map = 0;
        state.tev_stages[0].color_in[3] = tev_color_arg::TEXC;
        state.matrices.texture[1][0] = 2.0;
        state.matrices.texture[1][4] = 3.0;
        let (info, buf) = build(&state);
        let off = info.offsets.tex_mtx[1];
        assert_ne!(off, UNIFORM_ABSENT);
        assert_eq!(read_f32(&buf, off), 2.0);
        assert_eq!(read_f32(&buf, off + 16), 3.0);
    }

    #[test]
    fn fog_coefficients_fold_to_normalized_depth() {
        let mut state = ShadowState::new();
        state.fog.kind = FogKind::Linear;
        state.fog.a = 1024.0;
        state.fog.b_mag = 8388608.0;
        state.fog.b_shift = 1;
        state.fog.c = 0.25;
        state.fog.color = [1.0, 0.0, 0.0, 1.0];
        let (info, buf) = build(&state);
        let off = info.offsets.fog;
        assert_ne!(off, UNIFORM_ABSENT);
        let denom = (2.0f32).powi(23);
        assert!((read_f32(&buf, off) - 1024.0 / denom).abs() < 1e-9);
        assert!((read_f32(&buf, off + 4) - 1.0).abs() < 1e-6);
        assert_eq!(read_f32(&buf, off + 8), 0.25);
        assert_eq!(read_f32(&buf, off + 16), 1.0);
    }

    #[test]
    fn lod_bias_written_per_sampled_texture() {
        let mut state = ShadowState::new();
        state.num_tex_gens = 1;
        state.tex_gens[0].source = crate::gx::state::texgen_src::POSITION;
        state.tev_stages[0].tex_enable = true;
        state.tev_stages[0].tex_coord = 0;
        state.tev_stages[0].tex_map = 2;
        state.tev_stages[0].color_in[3] = tev_color_arg::TEXC;
        state.textures[2].lod_bias = -1.5;
        let (info, buf) = build(&state);
        let off = info.offsets.lod_bias[2];
        assert_ne!(off, UNIFORM_ABSENT);
        assert_eq!(read_f32(&buf, off), -1.5);
    }
}
