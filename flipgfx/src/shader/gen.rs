// WGSL shader generation.
//
// Every draw configuration maps to one complete shader module: a vertex
// stage that transforms positions, evaluates texcoord generators and
// (unless per-pixel lighting is on) the color channels, and a fragment
// stage that runs the active TEV stages over sampled textures and
// rasterized colors. The uniform struct is declared in the exact block
// order `build_shader_info` computed, so the byte writer and the shader
// always agree on offsets.

use std::fmt::Write;

use crate::fifo::vertex::VertexLayout;
use crate::gx::state::{tev_alpha_arg, tev_color_arg, AlphaLogic, CompareFn, FogKind, TexGenKind, VtxAttr};
use crate::gx::texture::TexLoadFmt;
use crate::shader::config::{texgen_source_attr, ShaderConfig};
use crate::shader::info::{kasel_konst, kcsel_konst, ShaderInfo};

/// Generate the complete WGSL module for a configuration.
pub fn generate_wgsl(cfg: &ShaderConfig, info: &ShaderInfo) -> String {
    let layout = VertexLayout::from_mask(cfg.attrs_present);
    let mut out = String::with_capacity(8192);

    write_uniform_decl(&mut out, info);
    write_bindings(&mut out, info);
    write_vertex_io(&mut out, cfg, info, &layout);
    write_channel_helpers(&mut out, cfg, info);
    write_sample_helpers(&mut out, cfg, info);
    write_vertex_main(&mut out, cfg, info, &layout);
    write_fragment_main(&mut out, cfg, info);

    out
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

fn write_uniform_decl(out: &mut String, info: &ShaderInfo) {
    if info.any_lit {
        out.push_str(
            "struct Light {\n\
             \x20   position: vec4<f32>,\n\
             \x20   direction: vec4<f32>,\n\
             \x20   color: vec4<f32>,\n\
             \x20   cos_attn: vec4<f32>,\n\
             \x20   dist_attn: vec4<f32>,\n\
             }\n\n",
        );
    }

    out.push_str("struct Uniforms {\n");
    out.push_str("    posnrm: mat4x4<f32>,\n");
    out.push_str("    projection: mat4x4<f32>,\n");
    for r in 0..4 {
        if info.used_regs & (1 << r) != 0 {
            writeln!(out, "    {}: vec4<f32>,", reg_uniform_name(r)).unwrap();
        }
    }
    if info.any_lit {
        out.push_str("    lights: array<Light, 8>,\n");
        out.push_str("    light_masks: vec4<u32>,\n");
    }
    for pair in 0..2 {
        if info.sampled_channels & (1 << pair) != 0 {
            writeln!(out, "    chan{pair}_ambient: vec4<f32>,").unwrap();
            writeln!(out, "    chan{pair}_material: vec4<f32>,").unwrap();
        }
    }
    for k in 0..4 {
        if info.used_konsts & (1 << k) != 0 {
            writeln!(out, "    konst{k}: vec4<f32>,").unwrap();
        }
    }
    for m in 0..10 {
        if info.used_tex_matrices & (1 << m) != 0 {
            if info.tex_matrix_projected & (1 << m) != 0 {
                writeln!(out, "    tex_mtx{m}: mat4x4<f32>,").unwrap();
            } else {
                writeln!(out, "    tex_mtx{m}: mat2x4<f32>,").unwrap();
            }
        }
    }
    for m in 0..20 {
        if info.used_post_matrices & (1 << m) != 0 {
            writeln!(out, "    post_mtx{m}: mat4x4<f32>,").unwrap();
        }
    }
    if info.fog {
        out.push_str("    fog_params: vec4<f32>,\n");
        out.push_str("    fog_color: vec4<f32>,\n");
    }
    for t in 0..8 {
        if info.sampled_textures & (1 << t) != 0 {
            writeln!(out, "    lod_bias_{t}: f32,").unwrap();
        }
    }
    out.push_str("}\n\n");
    out.push_str("@group(0) @binding(0) var<uniform> uni: Uniforms;\n\n");
}

fn write_bindings(out: &mut String, info: &ShaderInfo) {
    for t in 0..8u32 {
        if info.sampled_textures & (1 << t) != 0 {
            writeln!(
                out,
                "@group(1) @binding({}) var tex{t}: texture_2d<f32>;",
                t * 2
            )
            .unwrap();
            writeln!(
                out,
                "@group(1) @binding({}) var samp{t}: sampler;",
                t * 2 + 1
            )
            .unwrap();
        }
    }
    for t in 0..8u32 {
        if info.indexed_textures & (1 << t) != 0 {
            writeln!(out, "@group(2) @binding({t}) var palette{t}: texture_2d<f32>;").unwrap();
        }
    }
    out.push('\n');
}

fn attr_var_name(attr: VtxAttr) -> &'static str {
    match attr {
        VtxAttr::Position => "position",
        VtxAttr::Normal => "normal",
        VtxAttr::Color0 => "color0",
        VtxAttr::Color1 => "color1",
        VtxAttr::Tex0 => "tex0",
        VtxAttr::Tex1 => "tex1",
        VtxAttr::Tex2 => "tex2",
        VtxAttr::Tex3 => "tex3",
        VtxAttr::Tex4 => "tex4",
        VtxAttr::Tex5 => "tex5",
        VtxAttr::Tex6 => "tex6",
        VtxAttr::Tex7 => "tex7",
        _ => "mtxidx",
    }
}

fn width_type(width: u8) -> &'static str {
    match width {
        2 => "vec2<f32>",
        3 => "vec3<f32>",
        _ => "vec4<f32>",
    }
}

/// Varyings carried from vertex to fragment, in declaration order.
fn varyings(cfg: &ShaderConfig, info: &ShaderInfo) -> Vec<(String, String)> {
    let mut v = Vec::new();
    let per_pixel = cfg.per_pixel_lighting != 0;
    for pair in 0..2u8 {
        if info.sampled_channels & (1 << pair) == 0 {
            continue;
        }
        if per_pixel {
            if has_attr(cfg, color_attr(pair)) {
                v.push((format!("raw_color{pair}"), "vec4<f32>".into()));
            }
        } else {
            v.push((format!("chan{pair}"), "vec4<f32>".into()));
        }
    }
    for n in 0..cfg.num_tex_gens as usize {
        let comps = if texgen_is_projected(cfg, n) { 3 } else { 2 };
        v.push((format!("tc{n}"), width_type(comps).into()));
    }
    if per_pixel && info.any_lit {
        v.push(("world_pos".into(), "vec3<f32>".into()));
        v.push(("world_normal".into(), "vec3<f32>".into()));
    }
    v
}

fn color_attr(pair: u8) -> VtxAttr {
    if pair == 0 {
        VtxAttr::Color0
    } else {
        VtxAttr::Color1
    }
}

fn has_attr(cfg: &ShaderConfig, attr: VtxAttr) -> bool {
    cfg.attrs_present & (1 << attr as u32) != 0
}

fn texgen_is_projected(cfg: &ShaderConfig, n: usize) -> bool {
    let g = &cfg.tex_gens[n];
    g.kind == TexGenKind::Regular as u8 && g.matrix != 0xFF && g.projected != 0
}

fn write_vertex_io(out: &mut String, cfg: &ShaderConfig, info: &ShaderInfo, layout: &VertexLayout) {
    out.push_str("struct VsIn {\n");
    for (loc, field) in layout.fields.iter().enumerate() {
        writeln!(
            out,
            "    @location({loc}) {}: {},",
            attr_var_name(field.attr),
            width_type(field.width)
        )
        .unwrap();
    }
    out.push_str("}\n\n");

    out.push_str("struct VsOut {\n");
    out.push_str("    @builtin(position) position: vec4<f32>,\n");
    for (loc, (name, ty)) in varyings(cfg, info).iter().enumerate() {
        writeln!(out, "    @location({loc}) {name}: {ty},").unwrap();
    }
    out.push_str("}\n\n");
}

// ---------------------------------------------------------------------------
// Color channels
// ---------------------------------------------------------------------------

/// Emit `compute_chan{pair}` for every sampled channel pair. The helper
/// takes world-space position and normal plus the raw vertex color and
/// returns the rasterized color the TEV stages see.
fn write_channel_helpers(out: &mut String, cfg: &ShaderConfig, info: &ShaderInfo) {
    for pair in 0..2u8 {
        if info.sampled_channels & (1 << pair) == 0 {
            continue;
        }
        let color = &cfg.channels[pair as usize * 2];
        let alpha = &cfg.channels[pair as usize * 2 + 1];

        writeln!(
            out,
            "fn compute_chan{pair}(world_pos: vec3<f32>, nrm: vec3<f32>, \
             vtx_color: vec4<f32>) -> vec4<f32> {{"
        )
        .unwrap();

        let mat_rgb = if color.material_src != 0 {
            "vtx_color.rgb".to_string()
        } else {
            format!("uni.chan{pair}_material.rgb")
        };
        let mat_a = if alpha.material_src != 0 {
            "vtx_color.a".to_string()
        } else {
            format!("uni.chan{pair}_material.a")
        };

        if color.lit != 0 {
            let amb = if color.ambient_src != 0 {
                "vtx_color.rgb".to_string()
            } else {
                format!("uni.chan{pair}_ambient.rgb")
            };
            writeln!(out, "    var illum = {amb};").unwrap();
            write_light_loop(out, color, pair as usize * 2, false);
            writeln!(
                out,
                "    let rgb = {mat_rgb} * clamp(illum, vec3<f32>(0.0), vec3<f32>(1.0));"
            )
            .unwrap();
        } else {
            writeln!(out, "    let rgb = {mat_rgb};").unwrap();
        }

        if alpha.lit != 0 {
            let amb = if alpha.ambient_src != 0 {
                "vtx_color.a".to_string()
            } else {
                format!("uni.chan{pair}_ambient.a")
            };
            writeln!(out, "    var illum_a = {amb};").unwrap();
            write_light_loop(out, alpha, pair as usize * 2 + 1, true);
            writeln!(out, "    let a = {mat_a} * clamp(illum_a, 0.0, 1.0);").unwrap();
        } else {
            writeln!(out, "    let a = {mat_a};").unwrap();
        }

        out.push_str("    return vec4<f32>(rgb, a);\n}\n\n");
    }
}

/// One dynamic light loop. The mask comes from the uniform so lights can
/// be toggled without regenerating the shader.
fn write_light_loop(
    out: &mut String,
    ctrl: &crate::shader::config::ChannelConfig,
    chan_index: usize,
    alpha: bool,
) {
    writeln!(out, "    for (var li = 0u; li < 8u; li = li + 1u) {{").unwrap();
    writeln!(
        out,
        "        if (((uni.light_masks[{chan_index}u] >> li) & 1u) == 0u) {{ continue; }}"
    )
    .unwrap();
    out.push_str("        let lt = uni.lights[li];\n");
    out.push_str("        let ldir = lt.position.xyz - world_pos;\n");
    out.push_str("        let dist = length(ldir);\n");
    out.push_str("        let ldirn = ldir / max(dist, 1e-5);\n");

    // Attenuation.
    match ctrl.attn_fn {
        1 => {
            // Specular: cosine and distance polynomials both driven by
            // the normal-halfway term.
            out.push_str("        let aattn = max(0.0, dot(nrm, ldirn));\n");
            out.push_str(
                "        let att = max(0.0, lt.cos_attn.x + lt.cos_attn.y * aattn \
                 + lt.cos_attn.z * aattn * aattn)\n\
                 \x20           / max(lt.dist_attn.x + lt.dist_attn.y * aattn \
                 + lt.dist_attn.z * aattn * aattn, 1e-5);\n",
            );
        }
        2 => {
            // Spotlight: cosine polynomial over the spot angle, distance
            // polynomial over the range.
            out.push_str("        let aattn = max(0.0, dot(ldirn, -lt.direction.xyz));\n");
            out.push_str(
                "        let att = max(0.0, lt.cos_attn.x + lt.cos_attn.y * aattn \
                 + lt.cos_attn.z * aattn * aattn)\n\
                 \x20           / max(lt.dist_attn.x + lt.dist_attn.y * dist \
                 + lt.dist_attn.z * dist * dist, 1e-5);\n",
            );
        }
        _ => out.push_str("        let att = 1.0;\n"),
    }

    // Diffuse.
    match ctrl.diffuse_fn {
        1 => out.push_str("        let diff = dot(nrm, ldirn);\n"),
        2 => out.push_str("        let diff = max(0.0, dot(nrm, ldirn));\n"),
        _ => out.push_str("        let diff = 1.0;\n"),
    }

    if alpha {
        out.push_str("        illum_a = illum_a + att * diff * lt.color.a;\n");
    } else {
        out.push_str("        illum = illum + att * diff * lt.color.rgb;\n");
    }
    out.push_str("    }\n");
}

// ---------------------------------------------------------------------------
// Texture sampling
// ---------------------------------------------------------------------------

/// Emit `sample_tex{t}` for every sampled map: plain sample with the
/// load-format swizzle, or a palette lookup with a manual bilinear
/// filter for indexed images.
fn write_sample_helpers(out: &mut String, cfg: &ShaderConfig, info: &ShaderInfo) {
    for t in 0..8usize {
        if info.sampled_textures & (1 << t) == 0 {
            continue;
        }
        if info.indexed_textures & (1 << t) != 0 {
            writeln!(
                out,
                "fn pal{t}(index: f32) -> vec4<f32> {{\n\
                 \x20   return textureLoad(palette{t}, \
                 vec2<i32>(i32(index * 255.0 + 0.5), 0), 0);\n}}\n"
            )
            .unwrap();
            // Hardware filters after the palette lookup, so the four
            // gathered indices are expanded first and blended after.
            writeln!(
                out,
                "fn sample_tex{t}(uv: vec2<f32>) -> vec4<f32> {{\n\
                 \x20   let idx = textureGather(0, tex{t}, samp{t}, uv);\n\
                 \x20   let dims = vec2<f32>(textureDimensions(tex{t}));\n\
                 \x20   let f = fract(uv * dims - 0.5);\n\
                 \x20   let c00 = pal{t}(idx.w);\n\
                 \x20   let c10 = pal{t}(idx.z);\n\
                 \x20   let c01 = pal{t}(idx.x);\n\
                 \x20   let c11 = pal{t}(idx.y);\n\
                 \x20   return mix(mix(c00, c10, f.x), mix(c01, c11, f.x), f.y);\n}}\n"
            )
            .unwrap();
            continue;
        }
        let swizzle = match cfg.tex_load_fmt[t] {
            f if f == TexLoadFmt::Intensity as u8 => "vec4<f32>(c.rrr, c.r)",
            f if f == TexLoadFmt::IntensityAlpha as u8 => "vec4<f32>(c.rrr, c.g)",
            _ => "c",
        };
        writeln!(
            out,
            "fn sample_tex{t}(uv: vec2<f32>) -> vec4<f32> {{\n\
             \x20   let c = textureSampleBias(tex{t}, samp{t}, uv, uni.lod_bias_{t});\n\
             \x20   return {swizzle};\n}}\n"
        )
        .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Vertex stage
// ---------------------------------------------------------------------------

fn write_vertex_main(
    out: &mut String,
    cfg: &ShaderConfig,
    info: &ShaderInfo,
    layout: &VertexLayout,
) {
    let per_pixel = cfg.per_pixel_lighting != 0;

    out.push_str("@vertex\nfn vs_main(in: VsIn) -> VsOut {\n");
    out.push_str("    var out: VsOut;\n");
    out.push_str("    let world = uni.posnrm * vec4<f32>(in.position, 1.0);\n");
    out.push_str("    out.position = uni.projection * world;\n");

    let normal_expr = if has_attr(cfg, VtxAttr::Normal) {
        "normalize((uni.posnrm * vec4<f32>(in.normal, 0.0)).xyz)"
    } else {
        "vec3<f32>(0.0, 0.0, 1.0)"
    };
    let needs_normal = info.any_lit
        || (!per_pixel && info.sampled_channels != 0)
        || (0..cfg.num_tex_gens as usize).any(|n| {
            cfg.tex_gens[n].kind == TexGenKind::Regular as u8
                && texgen_source_attr(cfg.tex_gens[n].source) == Some(VtxAttr::Normal)
        });
    if needs_normal {
        writeln!(out, "    let nrm = {normal_expr};").unwrap();
    }

    // Channels: evaluated here unless deferred to the fragment stage.
    for pair in 0..2u8 {
        if info.sampled_channels & (1 << pair) == 0 {
            continue;
        }
        let vtx_color = if has_attr(cfg, color_attr(pair)) {
            format!("in.{}", attr_var_name(color_attr(pair)))
        } else {
            "vec4<f32>(1.0)".to_string()
        };
        if per_pixel {
            if has_attr(cfg, color_attr(pair)) {
                writeln!(out, "    out.raw_color{pair} = {vtx_color};").unwrap();
            }
        } else {
            writeln!(
                out,
                "    out.chan{pair} = compute_chan{pair}(world.xyz, nrm, {vtx_color});"
            )
            .unwrap();
        }
    }
    if per_pixel && info.any_lit {
        out.push_str("    out.world_pos = world.xyz;\n");
        out.push_str("    out.world_normal = nrm;\n");
    }

    for n in 0..cfg.num_tex_gens as usize {
        write_texgen(out, cfg, n, layout);
    }

    out.push_str("    return out;\n}\n\n");
}

fn write_texgen(out: &mut String, cfg: &ShaderConfig, n: usize, layout: &VertexLayout) {
    let g = &cfg.tex_gens[n];
    writeln!(out, "    // texgen {n}").unwrap();

    match g.kind {
        k if k == TexGenKind::Color0 as u8 || k == TexGenKind::Color1 as u8 => {
            // ST from the rasterized color; the channel result is
            // computed above (or the raw color stands in).
            let pair = (k - TexGenKind::Color0 as u8) as usize;
            let src = if cfg.per_pixel_lighting != 0 {
                if has_attr(cfg, color_attr(pair as u8)) {
                    format!("out.raw_color{pair}.rg")
                } else {
                    "vec2<f32>(1.0)".to_string()
                }
            } else {
                format!("out.chan{pair}.rg")
            };
            writeln!(out, "    out.tc{n} = {src};").unwrap();
            return;
        }
        _ => {}
    }

    // Source row to a vec4.
    let src = match texgen_source_attr(g.source) {
        Some(VtxAttr::Position) => "vec4<f32>(in.position, 1.0)".to_string(),
        Some(VtxAttr::Normal) => "vec4<f32>(nrm, 1.0)".to_string(),
        Some(attr) if layout.field(attr).is_some() => {
            format!("vec4<f32>(in.{}, 1.0, 1.0)", attr_var_name(attr))
        }
        _ => "vec4<f32>(0.0, 0.0, 0.0, 1.0)".to_string(),
    };
    writeln!(out, "    let tg{n}_src = {src};").unwrap();

    // Bump generators fall back to the source passthrough; the decode
    // layer already warned.
    if g.kind == TexGenKind::Bump as u8 || g.matrix == 0xFF {
        writeln!(out, "    out.tc{n} = tg{n}_src.xy;").unwrap();
        apply_post_matrix(out, cfg, n);
        return;
    }

    let m = g.matrix as usize;
    if g.projected != 0 {
        writeln!(
            out,
            "    var tg{n} = vec3<f32>(dot(uni.tex_mtx{m}[0], tg{n}_src), \
             dot(uni.tex_mtx{m}[1], tg{n}_src), dot(uni.tex_mtx{m}[2], tg{n}_src));"
        )
        .unwrap();
    } else {
        writeln!(
            out,
            "    var tg{n} = vec3<f32>(dot(uni.tex_mtx{m}[0], tg{n}_src), \
             dot(uni.tex_mtx{m}[1], tg{n}_src), 1.0);"
        )
        .unwrap();
    }
    if g.normalize != 0 {
        writeln!(out, "    tg{n} = normalize(tg{n});").unwrap();
    }
    if g.post_matrix != 0xFF {
        let p = g.post_matrix as usize;
        writeln!(
            out,
            "    let tg{n}_post = vec4<f32>(tg{n}, 1.0);\n\
             \x20   tg{n} = vec3<f32>(dot(uni.post_mtx{p}[0], tg{n}_post), \
             dot(uni.post_mtx{p}[1], tg{n}_post), dot(uni.post_mtx{p}[2], tg{n}_post));"
        )
        .unwrap();
    }
    if g.projected != 0 {
        writeln!(out, "    out.tc{n} = tg{n};").unwrap();
    } else {
        writeln!(out, "    out.tc{n} = tg{n}.xy;").unwrap();
    }
}

/// Post transform for the passthrough texgen paths (vec2 coordinate).
fn apply_post_matrix(out: &mut String, cfg: &ShaderConfig, n: usize) {
    let g = &cfg.tex_gens[n];
    if g.post_matrix == 0xFF {
        return;
    }
    let p = g.post_matrix as usize;
    writeln!(
        out,
        "    let tc{n}_post = vec4<f32>(out.tc{n}, 1.0, 1.0);\n\
         \x20   out.tc{n} = vec2<f32>(dot(uni.post_mtx{p}[0], tc{n}_post), \
         dot(uni.post_mtx{p}[1], tc{n}_post));"
    )
    .unwrap();
}

// ---------------------------------------------------------------------------
// Fragment stage: TEV
// ---------------------------------------------------------------------------

fn reg_uniform_name(r: usize) -> &'static str {
    match r {
        0 => "reg_prev",
        1 => "reg0",
        2 => "reg1",
        3 => "reg2",
        _ => unreachable!(),
    }
}

fn reg_var_name(r: u8) -> &'static str {
    match r & 3 {
        0 => "tev_prev",
        1 => "tev_reg0",
        2 => "tev_reg1",
        _ => "tev_reg2",
    }
}

/// Swizzle string for one swap table.
fn swap_swizzle(table: &[u8; 4]) -> String {
    table
        .iter()
        .map(|&c| ['r', 'g', 'b', 'a'][(c & 3) as usize])
        .collect()
}

/// Color argument to a WGSL vec3 expression, in the context of stage `n`.
fn color_arg_expr(arg: u8, n: usize) -> String {
    match arg {
        tev_color_arg::CPREV => "tev_prev.rgb".into(),
        tev_color_arg::APREV => "vec3<f32>(tev_prev.a)".into(),
        tev_color_arg::C0 => "tev_reg0.rgb".into(),
        tev_color_arg::A0 => "vec3<f32>(tev_reg0.a)".into(),
        tev_color_arg::C1 => "tev_reg1.rgb".into(),
        tev_color_arg::A1 => "vec3<f32>(tev_reg1.a)".into(),
        tev_color_arg::C2 => "tev_reg2.rgb".into(),
        tev_color_arg::A2 => "vec3<f32>(tev_reg2.a)".into(),
        tev_color_arg::TEXC => format!("tex_{n}.rgb"),
        tev_color_arg::TEXA => format!("vec3<f32>(tex_{n}.a)"),
        tev_color_arg::RASC => format!("ras_{n}.rgb"),
        tev_color_arg::RASA => format!("vec3<f32>(ras_{n}.a)"),
        tev_color_arg::ONE => "vec3<f32>(1.0)".into(),
        tev_color_arg::HALF => "vec3<f32>(0.5)".into(),
        tev_color_arg::KONST => format!("kc_{n}"),
        _ => "vec3<f32>(0.0)".into(),
    }
}

fn alpha_arg_expr(arg: u8, n: usize) -> String {
    match arg {
        tev_alpha_arg::APREV => "tev_prev.a".into(),
        tev_alpha_arg::A0 => "tev_reg0.a".into(),
        tev_alpha_arg::A1 => "tev_reg1.a".into(),
        tev_alpha_arg::A2 => "tev_reg2.a".into(),
        tev_alpha_arg::TEXA => format!("tex_{n}.a"),
        tev_alpha_arg::RASA => format!("ras_{n}.a"),
        tev_alpha_arg::KONST => format!("ka_{n}"),
        _ => "0.0".into(),
    }
}

fn bias_literal(bias: u8) -> &'static str {
    match bias {
        1 => "0.5",
        2 => "-0.5",
        _ => "0.0",
    }
}

fn scale_literal(scale: u8) -> &'static str {
    match scale {
        1 => "2.0",
        2 => "4.0",
        3 => "0.5",
        _ => "1.0",
    }
}

/// Konst color selector to a vec3 expression.
fn kcsel_expr(sel: u8) -> String {
    if let Some(k) = kcsel_konst(sel) {
        let swz = match (sel - 12) / 4 {
            0 => "rgb",
            1 => "rrr",
            2 => "ggg",
            3 => "bbb",
            _ => "aaa",
        };
        format!("uni.konst{k}.{swz}")
    } else {
        format!("vec3<f32>({:.3})", (8 - sel.min(7)) as f32 / 8.0)
    }
}

fn kasel_expr(sel: u8) -> String {
    if let Some(k) = kasel_konst(sel) {
        let comp = match (sel - 16) / 4 {
            0 => "r",
            1 => "g",
            2 => "b",
            _ => "a",
        };
        format!("uni.konst{k}.{comp}")
    } else {
        format!("{:.3}", (8 - sel.min(7)) as f32 / 8.0)
    }
}

fn compare_expr(comp: u8, reference: u8) -> String {
    let r = reference as f32 / 255.0;
    match CompareFn::from_bits(comp as u32) {
        CompareFn::Never => "false".into(),
        CompareFn::Less => format!("final_a < {r:.6}"),
        CompareFn::Equal => format!("abs(final_a - {r:.6}) < 0.002"),
        CompareFn::LessEqual => format!("final_a <= {r:.6}"),
        CompareFn::Greater => format!("final_a > {r:.6}"),
        CompareFn::NotEqual => format!("abs(final_a - {r:.6}) >= 0.002"),
        CompareFn::GreaterEqual => format!("final_a >= {r:.6}"),
        CompareFn::Always => "true".into(),
    }
}

fn write_fragment_main(out: &mut String, cfg: &ShaderConfig, info: &ShaderInfo) {
    let per_pixel = cfg.per_pixel_lighting != 0;

    out.push_str("@fragment\nfn fs_main(in: VsOut) -> @location(0) vec4<f32> {\n");

    // Rasterized channel colors.
    for pair in 0..2u8 {
        if info.sampled_channels & (1 << pair) == 0 {
            continue;
        }
        if per_pixel {
            let raw = if has_attr(cfg, color_attr(pair)) {
                format!("in.raw_color{pair}")
            } else {
                "vec4<f32>(1.0)".to_string()
            };
            let (pos, nrm) = if info.any_lit {
                ("in.world_pos", "normalize(in.world_normal)")
            } else {
                ("vec3<f32>(0.0)", "vec3<f32>(0.0, 0.0, 1.0)")
            };
            writeln!(
                out,
                "    let chan{pair} = compute_chan{pair}({pos}, {nrm}, {raw});"
            )
            .unwrap();
        } else {
            writeln!(out, "    let chan{pair} = in.chan{pair};").unwrap();
        }
    }

    // Combiner registers: pre-draw values only when observable.
    for r in 0..4u8 {
        if info.used_regs & (1 << r) != 0 {
            writeln!(
                out,
                "    var {}: vec4<f32> = uni.{};",
                reg_var_name(r),
                reg_uniform_name(r as usize)
            )
            .unwrap();
        } else {
            writeln!(out, "    var {}: vec4<f32> = vec4<f32>(0.0);", reg_var_name(r)).unwrap();
        }
    }
    out.push('\n');

    for n in 0..cfg.num_tev_stages as usize {
        write_tev_stage(out, cfg, n);
    }

    out.push_str("    let final_rgb = clamp(tev_prev.rgb, vec3<f32>(0.0), vec3<f32>(1.0));\n");
    out.push_str("    let final_a = clamp(tev_prev.a, 0.0, 1.0);\n");

    write_alpha_compare(out, cfg);

    let rgb_expr = if info.fog {
        write_fog(out, cfg);
        "fogged_rgb"
    } else {
        "final_rgb"
    };

    let a_expr = if cfg.dst_alpha_enable != 0 {
        writeln!(
            out,
            "    let out_a = {:.6};",
            cfg.dst_alpha as f32 / 255.0
        )
        .unwrap();
        "out_a"
    } else {
        "final_a"
    };

    writeln!(out, "    return vec4<f32>({rgb_expr}, {a_expr});").unwrap();
    out.push_str("}\n");
}

fn write_tev_stage(out: &mut String, cfg: &ShaderConfig, n: usize) {
    let s = &cfg.stages[n];
    writeln!(out, "    // TEV stage {n}").unwrap();

    // Texture lookup for this stage.
    let uses_tex = s.color_in.iter().any(|&a| {
        matches!(a, tev_color_arg::TEXC | tev_color_arg::TEXA)
    }) || s.alpha_in.iter().any(|&a| a == tev_alpha_arg::TEXA);
    if s.tex_enable != 0 && uses_tex {
        let g = s.tex_coord as usize;
        let t = s.tex_map as usize;
        let uv = if texgen_is_projected(cfg, g) {
            format!("in.tc{g}.xy / max(in.tc{g}.z, 1e-5)")
        } else {
            format!("in.tc{g}")
        };
        let swz = swap_swizzle(&cfg.swap_tables[(s.tex_swap & 3) as usize]);
        writeln!(out, "    let tex_{n} = sample_tex{t}({uv}).{swz};").unwrap();
    } else if uses_tex {
        // Stage reads a texture argument with no lookup configured.
        writeln!(out, "    let tex_{n} = vec4<f32>(0.0);").unwrap();
    }

    // Rasterized color for this stage.
    let uses_ras = s.color_in.iter().any(|&a| {
        matches!(a, tev_color_arg::RASC | tev_color_arg::RASA)
    }) || s.alpha_in.iter().any(|&a| a == tev_alpha_arg::RASA);
    if uses_ras {
        let swz = swap_swizzle(&cfg.swap_tables[(s.ras_swap & 3) as usize]);
        if s.channel == 0xFF {
            writeln!(out, "    let ras_{n} = vec4<f32>(0.0);").unwrap();
        } else {
            writeln!(out, "    let ras_{n} = chan{}.{swz};", s.channel).unwrap();
        }
    }

    // Konst selections.
    if s.color_in.iter().any(|&a| a == tev_color_arg::KONST) {
        writeln!(out, "    let kc_{n} = {};", kcsel_expr(s.kcsel)).unwrap();
    }
    if s.alpha_in.iter().any(|&a| a == tev_alpha_arg::KONST) {
        writeln!(out, "    let ka_{n} = {};", kasel_expr(s.kasel)).unwrap();
    }

    // Combine: d OP ((1 - c) * a + c * b) + bias, then scale.
    let ca = color_arg_expr(s.color_in[0], n);
    let cb = color_arg_expr(s.color_in[1], n);
    let cc = color_arg_expr(s.color_in[2], n);
    let cd = color_arg_expr(s.color_in[3], n);
    let cop = if s.color_op != 0 { "-" } else { "+" };
    writeln!(out, "    let ca_{n} = {ca};").unwrap();
    writeln!(out, "    let cb_{n} = {cb};").unwrap();
    writeln!(out, "    let cc_{n} = {cc};").unwrap();
    writeln!(
        out,
        "    let color_{n} = ({cd} {cop} ((vec3<f32>(1.0) - cc_{n}) * ca_{n} \
         + cc_{n} * cb_{n}) + vec3<f32>({})) * {};",
        bias_literal(s.color_bias),
        scale_literal(s.color_scale)
    )
    .unwrap();

    let aa = alpha_arg_expr(s.alpha_in[0], n);
    let ab = alpha_arg_expr(s.alpha_in[1], n);
    let ac = alpha_arg_expr(s.alpha_in[2], n);
    let ad = alpha_arg_expr(s.alpha_in[3], n);
    let aop = if s.alpha_op != 0 { "-" } else { "+" };
    writeln!(
        out,
        "    let alpha_{n} = ({ad} {aop} ((1.0 - {ac}) * {aa} + {ac} * {ab}) + {}) * {};",
        bias_literal(s.alpha_bias),
        scale_literal(s.alpha_scale)
    )
    .unwrap();

    let color_expr = if s.color_clamp != 0 {
        format!("clamp(color_{n}, vec3<f32>(0.0), vec3<f32>(1.0))")
    } else {
        format!("color_{n}")
    };
    let alpha_expr = if s.alpha_clamp != 0 {
        format!("clamp(alpha_{n}, 0.0, 1.0)")
    } else {
        format!("alpha_{n}")
    };

    let cdest = reg_var_name(s.color_dest);
    let adest = reg_var_name(s.alpha_dest);
    if s.color_dest == s.alpha_dest {
        writeln!(out, "    {cdest} = vec4<f32>({color_expr}, {alpha_expr});").unwrap();
    } else {
        writeln!(out, "    {cdest} = vec4<f32>({color_expr}, {cdest}.a);").unwrap();
        writeln!(out, "    {adest} = vec4<f32>({adest}.rgb, {alpha_expr});").unwrap();
    }
    out.push('\n');
}

fn write_alpha_compare(out: &mut String, cfg: &ShaderConfig) {
    let always0 = CompareFn::from_bits(cfg.alpha_comp0 as u32) == CompareFn::Always;
    let always1 = CompareFn::from_bits(cfg.alpha_comp1 as u32) == CompareFn::Always;
    let logic = match cfg.alpha_logic & 3 {
        1 => AlphaLogic::Or,
        2 => AlphaLogic::Xor,
        3 => AlphaLogic::Xnor,
        _ => AlphaLogic::And,
    };
    // Statically true tests compile to nothing.
    match logic {
        AlphaLogic::And if always0 && always1 => return,
        AlphaLogic::Or if always0 || always1 => return,
        _ => {}
    }

    let c0 = compare_expr(cfg.alpha_comp0, cfg.alpha_ref0);
    let c1 = compare_expr(cfg.alpha_comp1, cfg.alpha_ref1);
    let combined = match logic {
        AlphaLogic::And => format!("({c0}) && ({c1})"),
        AlphaLogic::Or => format!("({c0}) || ({c1})"),
        AlphaLogic::Xor => format!("({c0}) != ({c1})"),
        AlphaLogic::Xnor => format!("({c0}) == ({c1})"),
    };
    writeln!(out, "    if (!({combined})) {{ discard; }}").unwrap();
}

/// Fog factor from the projected depth:
///   ze = a / (b - z), x = clamp(ze - c), then the selected curve.
fn write_fog(out: &mut String, cfg: &ShaderConfig) {
    out.push_str(
        "    let fog_ze = uni.fog_params.x / max(uni.fog_params.y - in.position.z, 1e-6);\n",
    );
    out.push_str("    let fog_x = clamp(fog_ze - uni.fog_params.z, 0.0, 1.0);\n");
    let curve = match cfg.fog_kind {
        k if k == FogKind::Linear as u32 => "fog_x".to_string(),
        k if k == FogKind::Exp as u32 => "1.0 - exp2(-8.0 * fog_x)".to_string(),
        k if k == FogKind::Exp2 as u32 => "1.0 - exp2(-8.0 * fog_x * fog_x)".to_string(),
        k if k == FogKind::RevExp as u32 => "exp2(-8.0 * (1.0 - fog_x))".to_string(),
        _ => "exp2(-8.0 * (1.0 - fog_x) * (1.0 - fog_x))".to_string(),
    };
    writeln!(out, "    let fog_f = clamp({curve}, 0.0, 1.0);").unwrap();
    out.push_str("    let fogged_rgb = mix(final_rgb, uni.fog_color.rgb, fog_f);\n");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
