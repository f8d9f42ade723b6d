// Pipeline cache.
//
// Pipeline objects are expensive to create, so lookups are decoupled from
// builds: `request` assigns a stable hash immediately and queues the
// config, and the object becomes visible once a builder (a dedicated
// worker thread, or the budgeted in-frame pass) finishes it. A draw that
// resolves to a not-yet-Ready pipeline is skipped for that frame.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::error::{GxError, Result};
use crate::fifo::vertex::VertexLayout;
use crate::shader::config::{PipelineConfig, ShaderConfig, CONFIG_VERSION};
use crate::shader::gen::generate_wgsl;
use crate::shader::info::{build_shader_info, ShaderInfo};

/// Pipelines built per frame when no worker thread runs.
pub const BUILD_BUDGET: usize = if cfg!(debug_assertions) { 2 } else { 8 };

/// A config that can key a build cache and survive a disk round trip.
pub trait CacheConfig: bytemuck::Pod + PartialEq + Send + Sync {
    /// Record tag in the on-disk cache file.
    const TAG: u64;

    fn content_hash(&self) -> u64 {
        xxhash_rust::xxh3::xxh3_64(bytemuck::bytes_of(self))
    }

    /// False for records written by an incompatible build; such records
    /// are discarded silently on load.
    fn is_current(&self) -> bool;
}

impl CacheConfig for ShaderConfig {
    const TAG: u64 = 0x5348_4452; // "SHDR"

    fn content_hash(&self) -> u64 {
        self.hash()
    }

    fn is_current(&self) -> bool {
        self.version == CONFIG_VERSION
    }
}

impl CacheConfig for PipelineConfig {
    const TAG: u64 = 0x5049_5045; // "PIPE"

    fn content_hash(&self) -> u64 {
        self.hash()
    }

    fn is_current(&self) -> bool {
        self.shader.version == CONFIG_VERSION
    }
}

enum Slot<P> {
    Requested,
    Building,
    Ready(P),
}

struct Entry<C, P> {
    config: C,
    slot: Slot<P>,
}

struct Inner<C, P> {
    entries: HashMap<u64, Entry<C, P>>,
    queue: VecDeque<u64>,
}

struct Shared<C, P> {
    inner: Mutex<Inner<C, P>>,
    wake: Condvar,
    shutdown: AtomicBool,
}

/// Hash-keyed build cache with Requested -> Building -> Ready entries.
/// Entries are never evicted within a session.
pub struct BuildCache<C: CacheConfig, P> {
    shared: Arc<Shared<C, P>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl<C: CacheConfig, P: Clone> BuildCache<C, P> {
    /// Synchronous mode: pending builds run on the caller's thread via
    /// `build_pending`.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    entries: HashMap::new(),
                    queue: VecDeque::new(),
                }),
                wake: Condvar::new(),
                shutdown: AtomicBool::new(false),
            }),
            worker: None,
        }
    }

    /// Queue a config and return its stable reference hash. A second
    /// request for the same hash must present a byte-identical config;
    /// anything else is a hash collision and an algorithm defect.
    pub fn request(&self, config: &C) -> Result<u64> {
        let hash = config.content_hash();
        let mut inner = self.shared.inner.lock().map_err(poisoned)?;
        if let Some(entry) = inner.entries.get(&hash) {
            if entry.config != *config {
                return Err(GxError::Integrity(format!(
                    "cache hash collision on {hash:#018x}"
                )));
            }
            return Ok(hash);
        }
        inner.entries.insert(
            hash,
            Entry {
                config: *config,
                slot: Slot::Requested,
            },
        );
        inner.queue.push_back(hash);
        drop(inner);
        self.shared.wake.notify_one();
        Ok(hash)
    }

    /// The built object, if it reached Ready.
    pub fn get(&self, hash: u64) -> Option<P> {
        let inner = self.shared.inner.lock().ok()?;
        match inner.entries.get(&hash)?.slot {
            Slot::Ready(ref p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn pending(&self) -> usize {
        self.shared
            .inner
            .lock()
            .map(|i| i.queue.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.shared
            .inner
            .lock()
            .map(|i| i.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build up to `BUILD_BUDGET` queued configs on this thread. Returns
    /// how many were built. Used when no worker thread is running.
    pub fn build_pending(&self, build: impl Fn(&C) -> P) -> usize {
        let mut built = 0;
        while built < BUILD_BUDGET {
            let Some((hash, config)) = self.pop_for_build() else {
                break;
            };
            let object = build(&config);
            self.finish(hash, object);
            built += 1;
        }
        built
    }

    fn pop_for_build(&self) -> Option<(u64, C)> {
        let mut inner = self.shared.inner.lock().ok()?;
        let hash = inner.queue.pop_front()?;
        let entry = inner.entries.get_mut(&hash)?;
        entry.slot = Slot::Building;
        Some((hash, entry.config))
    }

    fn finish(&self, hash: u64, object: P) {
        if let Ok(mut inner) = self.shared.inner.lock() {
            if let Some(entry) = inner.entries.get_mut(&hash) {
                entry.slot = Slot::Ready(object);
            }
        }
    }

    /// Serialize every entry's config: a record count, then
    /// (tag, byte size, raw config) per record.
    pub fn save<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let inner = self
            .shared
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "cache lock poisoned"))?;
        w.write_all(&(inner.entries.len() as u32).to_le_bytes())?;
        for entry in inner.entries.values() {
            w.write_all(&C::TAG.to_le_bytes())?;
            let bytes = bytemuck::bytes_of(&entry.config);
            w.write_all(&(bytes.len() as u32).to_le_bytes())?;
            w.write_all(bytes)?;
        }
        Ok(())
    }

    /// Replay a cache file: every record that still matches this build is
    /// re-requested (rebuilt, not just looked up). Stale or foreign
    /// records are skipped. Returns how many records were accepted.
    pub fn load<R: Read>(&self, r: &mut R) -> io::Result<usize> {
        let mut count_raw = [0u8; 4];
        r.read_exact(&mut count_raw)?;
        let count = u32::from_le_bytes(count_raw);

        let mut accepted = 0;
        for _ in 0..count {
            let mut tag_raw = [0u8; 8];
            r.read_exact(&mut tag_raw)?;
            let tag = u64::from_le_bytes(tag_raw);
            let mut size_raw = [0u8; 4];
            r.read_exact(&mut size_raw)?;
            let size = u32::from_le_bytes(size_raw) as usize;

            let mut bytes = vec![0u8; size];
            r.read_exact(&mut bytes)?;
            if tag != C::TAG || size != std::mem::size_of::<C>() {
                log::debug!("skipping foreign cache record (tag {tag:#x}, {size} bytes)");
                continue;
            }
            let config: C = bytemuck::pod_read_unaligned(&bytes);
            if !config.is_current() {
                log::debug!("discarding stale cache record");
                continue;
            }
            if self.request(&config).is_ok() {
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    /// Signal the worker (if any) and wait for it to exit.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl<C, P> BuildCache<C, P>
where
    C: CacheConfig + 'static,
    P: Clone + Send + 'static,
{
    /// Background mode: a dedicated thread drains the queue until
    /// shutdown. The builder runs outside the lock.
    pub fn with_worker(build: impl Fn(&C) -> P + Send + 'static) -> Self {
        let mut cache = Self::new();
        let shared = Arc::clone(&cache.shared);
        cache.worker = Some(thread::spawn(move || {
            loop {
                let job = {
                    let mut inner = match shared.inner.lock() {
                        Ok(inner) => inner,
                        Err(_) => return,
                    };
                    loop {
                        if shared.shutdown.load(Ordering::SeqCst) {
                            return;
                        }
                        if let Some(hash) = inner.queue.pop_front() {
                            if let Some(entry) = inner.entries.get_mut(&hash) {
                                entry.slot = Slot::Building;
                                break Some((hash, entry.config));
                            }
                            continue;
                        }
                        inner = match shared.wake.wait(inner) {
                            Ok(inner) => inner,
                            Err(_) => return,
                        };
                    }
                };
                let Some((hash, config)) = job else { return };
                let object = build(&config);
                if let Ok(mut inner) = shared.inner.lock() {
                    if let Some(entry) = inner.entries.get_mut(&hash) {
                        entry.slot = Slot::Ready(object);
                    }
                }
            }
        }));
        cache
    }
}

impl<C: CacheConfig, P: Clone> Default for BuildCache<C, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: CacheConfig, P> Drop for BuildCache<C, P> {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> GxError {
    GxError::Integrity("cache lock poisoned".into())
}

// ---------------------------------------------------------------------------
// Concrete wgpu pipeline construction
// ---------------------------------------------------------------------------

/// Stable ids for the texture formats a pipeline config can name.
pub mod format_tag {
    pub const BGRA8_UNORM: u32 = 1;
    pub const BGRA8_UNORM_SRGB: u32 = 2;
    pub const RGBA8_UNORM: u32 = 3;
    pub const RGBA8_UNORM_SRGB: u32 = 4;
    pub const RGBA16_FLOAT: u32 = 5;
    pub const DEPTH24_PLUS: u32 = 16;
    pub const DEPTH32_FLOAT: u32 = 17;
}

pub fn color_format_tag(format: wgpu::TextureFormat) -> u32 {
    match format {
        wgpu::TextureFormat::Bgra8Unorm => format_tag::BGRA8_UNORM,
        wgpu::TextureFormat::Bgra8UnormSrgb => format_tag::BGRA8_UNORM_SRGB,
        wgpu::TextureFormat::Rgba8UnormSrgb => format_tag::RGBA8_UNORM_SRGB,
        wgpu::TextureFormat::Rgba16Float => format_tag::RGBA16_FLOAT,
        _ => format_tag::RGBA8_UNORM,
    }
}

pub fn depth_format_tag(format: wgpu::TextureFormat) -> u32 {
    match format {
        wgpu::TextureFormat::Depth32Float => format_tag::DEPTH32_FLOAT,
        _ => format_tag::DEPTH24_PLUS,
    }
}

fn color_format_from_tag(tag: u32) -> wgpu::TextureFormat {
    match tag {
        format_tag::BGRA8_UNORM => wgpu::TextureFormat::Bgra8Unorm,
        format_tag::BGRA8_UNORM_SRGB => wgpu::TextureFormat::Bgra8UnormSrgb,
        format_tag::RGBA8_UNORM_SRGB => wgpu::TextureFormat::Rgba8UnormSrgb,
        format_tag::RGBA16_FLOAT => wgpu::TextureFormat::Rgba16Float,
        _ => wgpu::TextureFormat::Rgba8Unorm,
    }
}

fn depth_format_from_tag(tag: u32) -> wgpu::TextureFormat {
    match tag {
        format_tag::DEPTH32_FLOAT => wgpu::TextureFormat::Depth32Float,
        _ => wgpu::TextureFormat::Depth24Plus,
    }
}

/// A compiled pipeline plus the bind group layouts the draws need to
/// create their bind groups against.
pub struct GpuPipeline {
    pub pipeline: wgpu::RenderPipeline,
    pub uniform_layout: wgpu::BindGroupLayout,
    pub texture_layout: Option<wgpu::BindGroupLayout>,
    pub palette_layout: Option<wgpu::BindGroupLayout>,
    pub info: ShaderInfo,
}

/// Builds `GpuPipeline`s from configs. Clones of this are handed to the
/// cache worker thread.
#[derive(Clone)]
pub struct PipelineBuilder {
    device: Arc<wgpu::Device>,
}

impl PipelineBuilder {
    pub fn new(device: Arc<wgpu::Device>) -> Self {
        Self { device }
    }

    pub fn build(&self, cfg: &PipelineConfig) -> Arc<GpuPipeline> {
        let info = build_shader_info(&cfg.shader);
        let wgsl = generate_wgsl(&cfg.shader, &info);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("gx generated"),
                source: wgpu::ShaderSource::Wgsl(wgsl.into()),
            });

        let uniform_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("gx uniforms"),
                    entries: &[wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: true,
                            min_binding_size: None,
                        },
                        count: None,
                    }],
                });

        let texture_layout = self.texture_layout(&info);
        let palette_layout = self.palette_layout(&info);

        let mut group_layouts: Vec<&wgpu::BindGroupLayout> = vec![&uniform_layout];
        if let Some(ref l) = texture_layout {
            group_layouts.push(l);
        }
        if let Some(ref l) = palette_layout {
            group_layouts.push(l);
        }
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("gx pipeline"),
                bind_group_layouts: &group_layouts,
                push_constant_ranges: &[],
            });

        let vertex_layout = VertexLayout::from_mask(cfg.shader.attrs_present);
        let attributes: Vec<wgpu::VertexAttribute> = vertex_layout
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| wgpu::VertexAttribute {
                offset: u64::from(f.offset) * 4,
                shader_location: i as u32,
                format: match f.width {
                    2 => wgpu::VertexFormat::Float32x2,
                    3 => wgpu::VertexFormat::Float32x3,
                    _ => wgpu::VertexFormat::Float32x4,
                },
            })
            .collect();

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("gx pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: "vs_main",
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: vertex_layout.stride_bytes() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &attributes,
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format: color_format_from_tag(cfg.color_format),
                        blend: blend_state(cfg),
                        write_mask: write_mask(cfg),
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: match cfg.topology {
                        1 => wgpu::PrimitiveTopology::LineList,
                        2 => wgpu::PrimitiveTopology::PointList,
                        _ => wgpu::PrimitiveTopology::TriangleList,
                    },
                    strip_index_format: None,
                    // The console rasterizer treats clockwise as front.
                    front_face: wgpu::FrontFace::Cw,
                    cull_mode: match cfg.cull_mode {
                        1 => Some(wgpu::Face::Front),
                        2 | 3 => Some(wgpu::Face::Back),
                        _ => None,
                    },
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: depth_format_from_tag(cfg.depth_format),
                    depth_write_enabled: cfg.depth_test != 0 && cfg.depth_write != 0,
                    depth_compare: if cfg.depth_test != 0 {
                        compare_function(cfg.depth_func)
                    } else {
                        wgpu::CompareFunction::Always
                    },
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });

        Arc::new(GpuPipeline {
            pipeline,
            uniform_layout,
            texture_layout,
            palette_layout,
            info,
        })
    }

    fn texture_layout(&self, info: &ShaderInfo) -> Option<wgpu::BindGroupLayout> {
        if info.sampled_textures == 0 {
            return None;
        }
        let mut entries = Vec::new();
        for t in 0..8u32 {
            if info.sampled_textures & (1 << t) == 0 {
                continue;
            }
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: t * 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: t * 2 + 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }
        Some(
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("gx textures"),
                    entries: &entries,
                }),
        )
    }

    fn palette_layout(&self, info: &ShaderInfo) -> Option<wgpu::BindGroupLayout> {
        if info.indexed_textures == 0 {
            return None;
        }
        let mut entries = Vec::new();
        for t in 0..8u32 {
            if info.indexed_textures & (1 << t) == 0 {
                continue;
            }
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: t,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }
        Some(
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("gx palettes"),
                    entries: &entries,
                }),
        )
    }
}

fn compare_function(func: u8) -> wgpu::CompareFunction {
    match func {
        0 => wgpu::CompareFunction::Never,
        1 => wgpu::CompareFunction::Less,
        2 => wgpu::CompareFunction::Equal,
        4 => wgpu::CompareFunction::Greater,
        5 => wgpu::CompareFunction::NotEqual,
        6 => wgpu::CompareFunction::GreaterEqual,
        7 => wgpu::CompareFunction::Always,
        _ => wgpu::CompareFunction::LessEqual,
    }
}

fn blend_factor(f: u8) -> wgpu::BlendFactor {
    match f {
        0 => wgpu::BlendFactor::Zero,
        2 => wgpu::BlendFactor::Src,
        3 => wgpu::BlendFactor::OneMinusSrc,
        4 => wgpu::BlendFactor::SrcAlpha,
        5 => wgpu::BlendFactor::OneMinusSrcAlpha,
        6 => wgpu::BlendFactor::DstAlpha,
        7 => wgpu::BlendFactor::OneMinusDstAlpha,
        _ => wgpu::BlendFactor::One,
    }
}

fn blend_state(cfg: &PipelineConfig) -> Option<wgpu::BlendState> {
    if cfg.blend_subtract != 0 {
        // Subtract mode ignores the factor selects: dst = dst - src.
        let component = wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::One,
            operation: wgpu::BlendOperation::ReverseSubtract,
        };
        return Some(wgpu::BlendState {
            color: component,
            alpha: component,
        });
    }
    if cfg.blend_enable == 0 {
        return None;
    }
    let component = wgpu::BlendComponent {
        src_factor: blend_factor(cfg.blend_src),
        dst_factor: blend_factor(cfg.blend_dst),
        operation: wgpu::BlendOperation::Add,
    };
    Some(wgpu::BlendState {
        color: component,
        alpha: component,
    })
}

fn write_mask(cfg: &PipelineConfig) -> wgpu::ColorWrites {
    let mut mask = wgpu::ColorWrites::empty();
    if cfg.color_update != 0 {
        mask |= wgpu::ColorWrites::RED | wgpu::ColorWrites::GREEN | wgpu::ColorWrites::BLUE;
    }
    if cfg.alpha_update != 0 {
        mask |= wgpu::ColorWrites::ALPHA;
    }
    mask
}
