//! Integration tests across the decode -> shader -> cache layers. None
//! of these need a GPU device.

use flipgfx::fifo::{self, ByteOrder, DrawCollector};
use flipgfx::gfx::pipeline::{format_tag, BuildCache, CacheConfig, BUILD_BUDGET};
use flipgfx::gx::state::ShadowState;
use flipgfx::shader::config::{PipelineConfig, ShaderConfig};
use flipgfx::shader::info::{build_shader_info, UNIFORM_ABSENT};
use flipgfx::shader::{build_uniform, generate_wgsl};

fn bp(stream: &mut Vec<u8>, addr: u8, value: u32) {
    stream.push(0x61);
    stream.extend_from_slice(&((u32::from(addr) << 24) | (value & 0x00FF_FFFF)).to_be_bytes());
}

fn cp(stream: &mut Vec<u8>, addr: u8, value: u32) {
    stream.push(0x08);
    stream.push(addr);
    stream.extend_from_slice(&value.to_be_bytes());
}

fn xf(stream: &mut Vec<u8>, base: u16, words: &[u32]) {
    stream.push(0x10);
    stream.extend_from_slice(&(((words.len() as u32 - 1) << 16) | u32::from(base)).to_be_bytes());
    for &w in words {
        stream.extend_from_slice(&w.to_be_bytes());
    }
}

fn decode(stream: &[u8]) -> ShadowState {
    let mut state = ShadowState::new();
    let mut sink = DrawCollector::default();
    fifo::process(&mut state, stream, ByteOrder::Big, None, &mut sink).unwrap();
    state
}

/// Registers for a one-stage textured draw: direct float positions and
/// texcoords, texgen 0 reading TEX0, TEV stage 0 sampling map 0.
fn textured_stream() -> Vec<u8> {
    let mut s = Vec::new();
    cp(&mut s, 0x50, 1 << 9); // position direct
    cp(&mut s, 0x60, 1); // tex0 direct
    cp(&mut s, 0x70, (1 | (4 << 1)) | (1 << 21) | (4 << 22)); // pos + tex0 f32
    xf(&mut s, 0x103F, &[1]); // one texgen
    xf(&mut s, 0x1040, &[5 << 7]); // texgen 0: regular, source TEX0
    // TEV order pair 0: map 0, coord 0, enabled, no channel.
    bp(&mut s, 0x28, (1 << 6) | (7 << 7));
    // Stage 0 color combiner: d = TEXC.
    bp(&mut s, 0xC0, 8);
    s
}

#[test]
fn decoded_state_generates_a_sampling_shader() {
    let state = decode(&textured_stream());
    let cfg = ShaderConfig::from_state(&state).unwrap();
    let info = build_shader_info(&cfg);
    let wgsl = generate_wgsl(&cfg, &info);

    assert!(wgsl.contains("fn sample_tex0"));
    assert!(wgsl.contains("out.tc0"));
    assert!(wgsl.contains("// TEV stage 0"));
    // The stage output lands in prev and feeds the final color.
    assert!(wgsl.contains("tev_prev"));
}

#[test]
fn uniform_block_size_matches_the_layout_contract() {
    // Default state: 128-byte matrix header plus one combiner register
    // (prev is read by the default passthrough stage).
    let state = ShadowState::new();
    let cfg = ShaderConfig::from_state(&state).unwrap();
    let info = build_shader_info(&cfg);
    assert_eq!(info.offsets.size, 128 + 16);

    // Textured stream adds a 4-byte lod bias for map 0; the size rounds
    // up to the WGSL struct's 16-byte alignment so the binding covers it.
    let state = decode(&textured_stream());
    let cfg = ShaderConfig::from_state(&state).unwrap();
    let info = build_shader_info(&cfg);
    assert_eq!(info.offsets.size, 128 + 16 + 16);
    assert_ne!(info.offsets.lod_bias[0], UNIFORM_ABSENT);

    let mut bytes = Vec::new();
    build_uniform(&state, &info, &mut bytes);
    assert_eq!(bytes.len() as u32, info.offsets.size);
}

#[test]
fn same_stream_yields_one_pipeline_build() {
    let state = decode(&textured_stream());
    let cfg = PipelineConfig::from_state(
        &state,
        flipgfx::fifo::Topology::TriangleList,
        format_tag::BGRA8_UNORM,
        format_tag::DEPTH24_PLUS,
    )
    .unwrap();

    let cache: BuildCache<PipelineConfig, u32> = BuildCache::new();
    let a = cache.request(&cfg).unwrap();
    let b = cache.request(&cfg).unwrap();
    assert_eq!(a, b);
    assert_eq!(cache.build_pending(|_| 1), 1);
    assert_eq!(cache.build_pending(|_| 1), 0);
    assert_eq!(cache.get(a), Some(1));
}

#[test]
fn pipeline_cache_survives_a_disk_round_trip() -> anyhow::Result<()> {
    let state = decode(&textured_stream());
    let cfg = PipelineConfig::from_state(
        &state,
        flipgfx::fifo::Topology::TriangleList,
        format_tag::BGRA8_UNORM,
        format_tag::DEPTH24_PLUS,
    )?;

    let cache: BuildCache<PipelineConfig, u32> = BuildCache::new();
    let hash = cache.request(&cfg)?;

    let path = std::env::temp_dir().join(format!("flipgfx-cache-{hash:x}.bin"));
    {
        let mut file = std::fs::File::create(&path)?;
        cache.save(&mut file)?;
    }
    let replay: BuildCache<PipelineConfig, u32> = BuildCache::new();
    {
        let mut file = std::fs::File::open(&path)?;
        assert_eq!(replay.load(&mut file)?, 1);
    }
    std::fs::remove_file(&path).ok();

    // The replayed entry is the same config under the same hash.
    assert_eq!(replay.request(&cfg)?, hash);
    assert_eq!(replay.pending(), 1);
    Ok(())
}

#[test]
fn budget_bounds_in_frame_builds() {
    let cache: BuildCache<ShaderConfig, u64> = BuildCache::new();
    let state = decode(&textured_stream());
    let mut cfg = ShaderConfig::from_state(&state).unwrap();
    for stages in 1..=(BUILD_BUDGET as u32 + 2) {
        cfg.num_tev_stages = stages;
        cache.request(&cfg).unwrap();
    }
    assert_eq!(cache.build_pending(|c| c.content_hash()), BUILD_BUDGET);
    assert_eq!(cache.pending(), 2);
}
