// Graphics context.
//
// One `GfxContext` owns the shadow state and every GPU-side cache, and
// is the only type application code needs: feed it FIFO bytes (or
// display lists), register textures, and call begin/end frame around
// each rendered frame. Decode, shader resolution and resource appends
// all happen on the calling thread; only pipeline compilation may run on
// the cache's worker thread.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::{GxError, Result};
use crate::fifo::display_list::DisplayListCache;
use crate::fifo::primitive::expand_indices;
use crate::fifo::{self, ByteOrder, DecodedDraw, DrawSink, MemorySource};
use crate::gfx::bind::{
    texture_bind_hash, BindGroupCache, DrawBinds, RegisteredTexture, SamplerCache,
    TextureRegistry,
};
use crate::gfx::frame::{ArenaKind, FrameAllocator, GpuRange};
use crate::gfx::pipeline::{
    color_format_tag, depth_format_tag, BuildCache, GpuPipeline, PipelineBuilder,
};
use crate::gx::state::ShadowState;
use crate::gx::texture::{TextureHandle, TlutHandle};
use crate::shader::config::PipelineConfig;
use crate::shader::uniform::build_uniform;

/// Request a headless device/queue pair suitable for [`GfxContext`].
/// Tools and tests that render off-screen use this; windowed hosts bring
/// their own surface-compatible device.
pub fn create_headless_device() -> Result<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
    let instance = wgpu::Instance::default();
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        force_fallback_adapter: false,
        compatible_surface: None,
    }))
    .ok_or_else(|| GxError::Integrity("no compatible GPU adapter".into()))?;
    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("gx device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults(),
        },
        None,
    ))
    .map_err(|err| GxError::Integrity(format!("device request failed: {err}")))?;
    Ok((Arc::new(device), Arc::new(queue)))
}

#[derive(Default)]
pub struct ContextOptions {
    /// Compile pipelines on a dedicated worker thread instead of the
    /// budgeted in-frame builder.
    pub async_pipeline_builds: bool,
    /// Persist compiled pipeline configs here across sessions.
    pub pipeline_cache_path: Option<PathBuf>,
}

pub struct GfxContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,

    pub state: ShadowState,
    display_lists: DisplayListCache,

    pipelines: BuildCache<PipelineConfig, Arc<GpuPipeline>>,
    builder: Option<PipelineBuilder>,
    samplers: SamplerCache,
    bind_groups: BindGroupCache,
    textures: TextureRegistry,
    frame: FrameAllocator,

    color_format: wgpu::TextureFormat,
    depth_format: wgpu::TextureFormat,
    depth: Option<(wgpu::TextureView, u32, u32)>,
    width: u32,
    height: u32,

    last_uniform: Option<(u64, GpuRange)>,
    uniform_scratch: Vec<u8>,
    pending_clear: Option<([f64; 4], f32)>,
    pub skipped_draws: u64,

    cache_path: Option<PathBuf>,
}

impl GfxContext {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        color_format: wgpu::TextureFormat,
        options: ContextOptions,
    ) -> Self {
        let limits = device.limits();
        let frame = FrameAllocator::new(
            limits.min_uniform_buffer_offset_alignment,
            limits.min_storage_buffer_offset_alignment,
        );

        let (pipelines, builder) = if options.async_pipeline_builds {
            let worker = PipelineBuilder::new(Arc::clone(&device));
            (
                BuildCache::with_worker(move |cfg: &PipelineConfig| worker.build(cfg)),
                None,
            )
        } else {
            (
                BuildCache::new(),
                Some(PipelineBuilder::new(Arc::clone(&device))),
            )
        };

        let mut ctx = Self {
            device,
            queue,
            state: ShadowState::new(),
            display_lists: DisplayListCache::new(),
            pipelines,
            builder,
            samplers: SamplerCache::new(),
            bind_groups: BindGroupCache::new(),
            textures: TextureRegistry::new(),
            frame,
            color_format,
            depth_format: wgpu::TextureFormat::Depth24Plus,
            depth: None,
            width: 640,
            height: 480,
            last_uniform: None,
            uniform_scratch: Vec::new(),
            pending_clear: None,
            skipped_draws: 0,
            cache_path: options.pipeline_cache_path,
        };
        ctx.load_pipeline_cache();
        ctx
    }

    fn load_pipeline_cache(&mut self) {
        let Some(path) = &self.cache_path else { return };
        match File::open(path) {
            Ok(file) => match self.pipelines.load(&mut BufReader::new(file)) {
                Ok(accepted) => info!("pipeline cache: replaying {accepted} configs"),
                Err(err) => warn!("pipeline cache unreadable, starting cold: {err}"),
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("pipeline cache unreadable, starting cold: {err}"),
        }
    }

    /// Write the pipeline configs to the cache file, if one is set.
    pub fn save_pipeline_cache(&self) -> io::Result<()> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        let mut file = BufWriter::new(File::create(path)?);
        self.pipelines.save(&mut file)
    }

    /// Persist caches and stop the pipeline worker.
    pub fn shutdown(&mut self) {
        if let Err(err) = self.save_pipeline_cache() {
            warn!("failed to save pipeline cache: {err}");
        }
        self.pipelines.shutdown();
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    // -- texture registration -------------------------------------------

    pub fn register_texture(&mut self, texture: &wgpu::Texture) -> TextureHandle {
        self.textures.register_texture(RegisteredTexture {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            width: texture.width(),
            height: texture.height(),
        })
    }

    pub fn unregister_texture(&mut self, handle: TextureHandle) {
        self.textures.unregister_texture(handle);
    }

    /// Install a 256x1 palette texture in a TLUT slot.
    pub fn set_palette(&mut self, slot: TlutHandle, texture: &wgpu::Texture) -> Result<()> {
        self.textures.set_palette(
            slot,
            texture.create_view(&wgpu::TextureViewDescriptor::default()),
        )
    }

    // -- command streams -------------------------------------------------

    /// Decode a FIFO chunk, queueing its draws into the current frame.
    pub fn process_fifo(
        &mut self,
        bytes: &[u8],
        order: ByteOrder,
        mem: Option<&dyn MemorySource>,
    ) -> Result<()> {
        let mut sink = FrameSink {
            device: &self.device,
            pipelines: &self.pipelines,
            samplers: &mut self.samplers,
            bind_groups: &mut self.bind_groups,
            textures: &self.textures,
            frame: &mut self.frame,
            last_uniform: &mut self.last_uniform,
            uniform_scratch: &mut self.uniform_scratch,
            pending_clear: &mut self.pending_clear,
            skipped_draws: &mut self.skipped_draws,
            color_tag: color_format_tag(self.color_format),
            depth_tag: depth_format_tag(self.depth_format),
        };
        fifo::process(&mut self.state, bytes, order, mem, &mut sink)
    }

    /// Execute a display list through the replay cache.
    pub fn process_display_list(
        &mut self,
        bytes: &[u8],
        order: ByteOrder,
        mem: Option<&dyn MemorySource>,
    ) -> Result<()> {
        let mut sink = FrameSink {
            device: &self.device,
            pipelines: &self.pipelines,
            samplers: &mut self.samplers,
            bind_groups: &mut self.bind_groups,
            textures: &self.textures,
            frame: &mut self.frame,
            last_uniform: &mut self.last_uniform,
            uniform_scratch: &mut self.uniform_scratch,
            pending_clear: &mut self.pending_clear,
            skipped_draws: &mut self.skipped_draws,
            color_tag: color_format_tag(self.color_format),
            depth_tag: depth_format_tag(self.depth_format),
        };
        self.display_lists
            .execute(&mut self.state, bytes, order, mem, &mut sink)
    }

    // -- frame loop --------------------------------------------------------

    pub fn begin_frame(&mut self) {
        self.frame.begin_frame(&self.device);
        self.last_uniform = None;
        self.skipped_draws = 0;
        // First uniform block of a frame is always freshly uploaded.
        self.state.dirty = true;
    }

    /// Flush the frame's arenas, then render every queued draw into
    /// `target` in submission order.
    pub fn end_frame(&mut self, target: &wgpu::TextureView) -> Result<()> {
        if let Some(builder) = &self.builder {
            let built = self.pipelines.build_pending(|cfg| builder.build(cfg));
            if built > 0 {
                debug!("built {built} pipelines in-frame");
            }
        }
        self.frame.end_frame(&self.device, &self.queue);
        self.ensure_depth();

        // Resolve everything a pass borrow will need up front.
        struct Prepared {
            pipeline: Arc<GpuPipeline>,
            binds: Option<Arc<DrawBinds>>,
            uniform_group: usize,
            cmd: crate::gfx::frame::DrawCommand,
        }
        let mut uniform_groups: Vec<wgpu::BindGroup> = Vec::new();
        let mut group_for_pipeline: HashMap<u64, usize> = HashMap::new();
        let mut prepared: Vec<Prepared> = Vec::new();

        let uniform_buffer = self.frame.gpu_buffer(ArenaKind::Uniform);
        for cmd in self.frame.draws() {
            let Some(pipeline) = self.pipelines.get(cmd.pipeline) else {
                continue;
            };
            let Some(uniform_buffer) = uniform_buffer else {
                continue;
            };
            let uniform_group = *group_for_pipeline.entry(cmd.pipeline).or_insert_with(|| {
                let block = u64::from(pipeline.info.offsets.size.max(16));
                uniform_groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("gx uniforms"),
                    layout: &pipeline.uniform_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: uniform_buffer,
                            offset: 0,
                            size: NonZeroU64::new(block),
                        }),
                    }],
                }));
                uniform_groups.len() - 1
            });
            let binds = if cmd.bind != 0 {
                match self.bind_groups.get(cmd.bind) {
                    Some(b) => Some(b),
                    None => continue,
                }
            } else {
                None
            };
            prepared.push(Prepared {
                pipeline,
                binds,
                uniform_group,
                cmd: *cmd,
            });
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("gx frame"),
            });
        {
            let (color_load, depth_load) = match self.pending_clear.take() {
                Some((c, d)) => (
                    wgpu::LoadOp::Clear(wgpu::Color {
                        r: c[0],
                        g: c[1],
                        b: c[2],
                        a: c[3],
                    }),
                    wgpu::LoadOp::Clear(d),
                ),
                None => (wgpu::LoadOp::Load, wgpu::LoadOp::Load),
            };
            let depth_view = self.depth.as_ref().map(|(v, _, _)| v);
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("gx pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: depth_view.map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: depth_load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let (Some(vb), Some(ib)) = (
                self.frame.gpu_buffer(ArenaKind::Vertex),
                self.frame.gpu_buffer(ArenaKind::Index),
            ) {
                pass.set_vertex_buffer(0, vb.slice(..));
                pass.set_index_buffer(ib.slice(..), wgpu::IndexFormat::Uint32);
            }

            for draw in &prepared {
                pass.set_pipeline(&draw.pipeline.pipeline);
                pass.set_bind_group(
                    0,
                    &uniform_groups[draw.uniform_group],
                    &[draw.cmd.uniform.offset],
                );
                if let Some(binds) = &draw.binds {
                    pass.set_bind_group(1, &binds.textures, &[]);
                    if let Some(palettes) = &binds.palettes {
                        pass.set_bind_group(2, palettes, &[]);
                    }
                }
                let vp = draw.cmd.viewport;
                pass.set_viewport(
                    vp[0],
                    vp[1],
                    vp[2].max(1.0),
                    vp[3].max(1.0),
                    vp[4].clamp(0.0, 1.0),
                    vp[5].clamp(0.0, 1.0),
                );
                let first = draw.cmd.index.offset / 4;
                pass.draw_indexed(first..first + draw.cmd.index_count, 0, 0..1);
            }
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn ensure_depth(&mut self) {
        let matches = self
            .depth
            .as_ref()
            .is_some_and(|(_, w, h)| *w == self.width && *h == self.height);
        if matches {
            return;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("gx depth"),
            size: wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.depth_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        self.depth = Some((
            texture.create_view(&wgpu::TextureViewDescriptor::default()),
            self.width,
            self.height,
        ));
    }
}

impl Drop for GfxContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Per-stream sink
// ---------------------------------------------------------------------------

/// Translates decoded draws into frame resources and queued commands.
struct FrameSink<'a> {
    device: &'a wgpu::Device,
    pipelines: &'a BuildCache<PipelineConfig, Arc<GpuPipeline>>,
    samplers: &'a mut SamplerCache,
    bind_groups: &'a mut BindGroupCache,
    textures: &'a TextureRegistry,
    frame: &'a mut FrameAllocator,
    last_uniform: &'a mut Option<(u64, GpuRange)>,
    uniform_scratch: &'a mut Vec<u8>,
    pending_clear: &'a mut Option<([f64; 4], f32)>,
    skipped_draws: &'a mut u64,
    color_tag: u32,
    depth_tag: u32,
}

impl FrameSink<'_> {
    /// Resolve (and cache) the texture bind groups for this draw. `None`
    /// means the draw must be skipped; `Some(0)` means it samples
    /// nothing.
    fn resolve_binds(
        &mut self,
        state: &ShadowState,
        pipeline: &GpuPipeline,
    ) -> Result<Option<u64>> {
        let info = &pipeline.info;
        if info.sampled_textures == 0 {
            return Ok(Some(0));
        }
        let hash = texture_bind_hash(state, info);
        if self.bind_groups.get(hash).is_some() {
            return Ok(Some(hash));
        }
        let Some(layout) = pipeline.texture_layout.as_ref() else {
            return Ok(Some(0));
        };

        let mut views = Vec::new();
        let mut samplers = Vec::new();
        let mut palette_views = Vec::new();
        for t in 0..8usize {
            if info.sampled_textures & (1 << t) == 0 {
                continue;
            }
            let binding = &state.textures[t];
            let Some(handle) = binding.handle else {
                warn!("draw samples unbound texture unit {t}, skipped");
                return Ok(None);
            };
            let registered = self.textures.texture(handle)?;
            views.push((t as u32, &registered.view));
            samplers.push((t as u32, self.samplers.get_or_create(self.device, binding)));
            if info.indexed_textures & (1 << t) != 0 {
                let Some(tlut) = binding.tlut else {
                    warn!("indexed texture unit {t} has no palette, draw skipped");
                    return Ok(None);
                };
                palette_views.push((t as u32, self.textures.palette(tlut)?));
            }
        }

        let mut entries = Vec::new();
        for (t, view) in &views {
            entries.push(wgpu::BindGroupEntry {
                binding: t * 2,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        for (t, sampler) in &samplers {
            entries.push(wgpu::BindGroupEntry {
                binding: t * 2 + 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        let textures = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("gx textures"),
            layout,
            entries: &entries,
        });

        let palettes = match (pipeline.palette_layout.as_ref(), palette_views.is_empty()) {
            (Some(layout), false) => {
                let entries: Vec<wgpu::BindGroupEntry> = palette_views
                    .iter()
                    .map(|(t, view)| wgpu::BindGroupEntry {
                        binding: *t,
                        resource: wgpu::BindingResource::TextureView(view),
                    })
                    .collect();
                Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("gx palettes"),
                    layout,
                    entries: &entries,
                }))
            }
            _ => None,
        };

        self.bind_groups.insert(hash, DrawBinds { textures, palettes });
        Ok(Some(hash))
    }
}

fn viewport_rect(state: &ShadowState) -> [f32; 6] {
    let vp = &state.viewport;
    [vp.x, vp.y, vp.width, vp.height, vp.near, vp.far]
}

impl DrawSink for FrameSink<'_> {
    fn draw(&mut self, state: &mut ShadowState, draw: DecodedDraw) -> Result<()> {
        if draw.vertex_count == 0 || draw.layout.floats == 0 {
            return Ok(());
        }
        if state.dirty {
            self.frame.mark_state_change();
        }

        let cfg = match PipelineConfig::from_state(
            state,
            draw.kind.topology(),
            self.color_tag,
            self.depth_tag,
        ) {
            Ok(cfg) => cfg,
            Err(GxError::InvalidSlot { kind, index }) => {
                warn!("skipping draw: unpopulated {kind} slot {index}");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let hash = self.pipelines.request(&cfg)?;
        let Some(pipeline) = self.pipelines.get(hash) else {
            *self.skipped_draws += 1;
            debug!("pipeline {hash:#018x} not ready, draw skipped this frame");
            return Ok(());
        };

        let Some(bind) = self.resolve_binds(state, &pipeline)? else {
            return Ok(());
        };

        // Reuse the previous uniform block when nothing changed, so
        // consecutive draws stay mergeable.
        let reusable = match *self.last_uniform {
            Some((h, range)) if !state.dirty && h == hash => Some(range),
            _ => None,
        };
        let uniform = match reusable {
            Some(range) => range,
            None => {
                build_uniform(state, &pipeline.info, self.uniform_scratch);
                let range = self.frame.push_uniform(self.uniform_scratch);
                state.dirty = false;
                *self.last_uniform = Some((hash, range));
                range
            }
        };

        let stride = draw.layout.stride_bytes() as u32;
        let vertex = self
            .frame
            .push_vertices(bytemuck::cast_slice(&draw.vertices), stride);
        let base = vertex.offset / stride;
        let mut indices = Vec::new();
        expand_indices(draw.kind, draw.vertex_count, base, &mut indices);
        if indices.is_empty() {
            return Ok(());
        }
        let count = indices.len() as u32;
        let index = self.frame.push_indices(&indices);

        self.frame.queue_draw(
            hash,
            bind,
            uniform,
            vertex,
            index,
            count,
            viewport_rect(state),
        )
    }

    fn copy_clear(&mut self, state: &mut ShadowState) -> Result<()> {
        let c = state.clear_color;
        *self.pending_clear = Some((
            [
                f64::from(c[0]) / 255.0,
                f64::from(c[1]) / 255.0,
                f64::from(c[2]) / 255.0,
                f64::from(c[3]) / 255.0,
            ],
            state.clear_depth as f32 / 16_777_215.0,
        ));
        self.frame.mark_state_change();
        Ok(())
    }
}
