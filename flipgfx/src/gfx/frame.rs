// Frame resource allocator.
//
// Every frame's vertex, index, uniform, storage and texture-upload bytes
// are appended to CPU arenas, then `end_frame` copies only the written
// prefix of each arena through a mapped staging buffer into a persistent
// GPU buffer. Three staging sets rotate so the copy for frame N never
// waits on the GPU finishing frame N-1.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{GxError, Result};

pub const NUM_STAGING_SETS: usize = 3;

/// Byte range inside one of the persistent GPU buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuRange {
    pub offset: u32,
    pub size: u32,
}

impl GpuRange {
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ArenaKind {
    Vertex = 0,
    Index = 1,
    Uniform = 2,
    Storage = 3,
    TextureUpload = 4,
}

pub const NUM_ARENAS: usize = 5;

fn arena_usage(kind: usize) -> wgpu::BufferUsages {
    let base = wgpu::BufferUsages::COPY_DST;
    match kind {
        0 => base | wgpu::BufferUsages::VERTEX,
        1 => base | wgpu::BufferUsages::INDEX,
        2 => base | wgpu::BufferUsages::UNIFORM,
        3 => base | wgpu::BufferUsages::STORAGE,
        _ => base | wgpu::BufferUsages::COPY_SRC,
    }
}

/// One queued draw. Vertex and index data live in the frame's persistent
/// buffers; `uniform` doubles as the dynamic offset for bind group 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCommand {
    pub pipeline: u64,
    pub bind: u64,
    pub uniform: GpuRange,
    pub vertex: GpuRange,
    pub index: GpuRange,
    pub index_count: u32,
    pub viewport: [f32; 6],
    /// State epoch at queue time; draws from different epochs never merge.
    epoch: u64,
}

struct StagingBuffer {
    buffer: wgpu::Buffer,
    capacity: u64,
    map_ready: Arc<AtomicBool>,
    map_failed: Arc<AtomicBool>,
}

/// Map-async completion. An error still releases the frame waiting in
/// `begin_frame`; the failed buffer is replaced there.
fn finish_map(result: Result<(), wgpu::BufferAsyncError>, ready: &AtomicBool, failed: &AtomicBool) {
    if let Err(err) = result {
        log::error!("staging buffer remap failed: {err:?}");
        failed.store(true, Ordering::Release);
    }
    ready.store(true, Ordering::Release);
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    capacity: u64,
}

#[derive(Default)]
struct StagingSet {
    arenas: [Vec<u8>; NUM_ARENAS],
    staging: [Option<StagingBuffer>; NUM_ARENAS],
}

pub struct FrameAllocator {
    sets: [StagingSet; NUM_STAGING_SETS],
    gpu: [Option<GpuBuffer>; NUM_ARENAS],
    current: usize,
    uniform_align: u32,
    storage_align: u32,
    draws: Vec<DrawCommand>,
    epoch: u64,
    pub merged_draws: u64,
}

impl FrameAllocator {
    pub fn new(uniform_align: u32, storage_align: u32) -> Self {
        Self {
            sets: Default::default(),
            gpu: Default::default(),
            current: 0,
            uniform_align: uniform_align.max(1),
            storage_align: storage_align.max(1),
            draws: Vec::new(),
            epoch: 0,
            merged_draws: 0,
        }
    }

    /// Rotate to the next staging set and wait for its previous map to
    /// complete. Arenas and the draw queue reset empty.
    pub fn begin_frame(&mut self, device: &wgpu::Device) {
        self.current = (self.current + 1) % NUM_STAGING_SETS;
        for slot in &mut self.sets[self.current].staging {
            if let Some(staging) = slot {
                while !staging.map_ready.load(Ordering::Acquire) {
                    device.poll(wgpu::Maintain::Poll);
                }
                // A failed remap leaves the buffer unmapped and unusable;
                // drop it so the next flush allocates a fresh one.
                if staging.map_failed.load(Ordering::Acquire) {
                    *slot = None;
                }
            }
        }
        for arena in &mut self.sets[self.current].arenas {
            arena.clear();
        }
        self.draws.clear();
        self.epoch = 0;
        self.merged_draws = 0;
    }

    fn align_for(&self, kind: ArenaKind) -> u32 {
        match kind {
            ArenaKind::Uniform => self.uniform_align,
            ArenaKind::Storage => self.storage_align,
            ArenaKind::TextureUpload => wgpu::COPY_BYTES_PER_ROW_ALIGNMENT,
            _ => 1,
        }
    }

    /// Append bytes to an arena and return where they will land in the
    /// persistent buffer.
    pub fn push(&mut self, kind: ArenaKind, bytes: &[u8]) -> GpuRange {
        let align = self.align_for(kind) as usize;
        self.push_aligned(kind, bytes, align)
    }

    fn push_aligned(&mut self, kind: ArenaKind, bytes: &[u8], align: usize) -> GpuRange {
        let arena = &mut self.sets[self.current].arenas[kind as usize];
        let offset = (arena.len() + align - 1) / align * align;
        arena.resize(offset, 0);
        arena.extend_from_slice(bytes);
        GpuRange {
            offset: offset as u32,
            size: bytes.len() as u32,
        }
    }

    /// Vertex data is addressed with absolute index bases
    /// (`offset / stride`), so each push must start on a boundary of its
    /// own stride.
    pub fn push_vertices(&mut self, bytes: &[u8], stride: u32) -> GpuRange {
        self.push_aligned(ArenaKind::Vertex, bytes, stride.max(1) as usize)
    }

    pub fn push_indices(&mut self, indices: &[u32]) -> GpuRange {
        self.push(ArenaKind::Index, bytemuck::cast_slice(indices))
    }

    pub fn push_uniform(&mut self, bytes: &[u8]) -> GpuRange {
        self.push(ArenaKind::Uniform, bytes)
    }

    pub fn arena_len(&self, kind: ArenaKind) -> usize {
        self.sets[self.current].arenas[kind as usize].len()
    }

    /// Anything that can change rendering between two draws bumps the
    /// epoch, which fences draw merging.
    pub fn mark_state_change(&mut self) {
        self.epoch += 1;
    }

    /// Queue a draw, merging into the previous command when the two are
    /// indistinguishable and their index ranges touch.
    pub fn queue_draw(
        &mut self,
        pipeline: u64,
        bind: u64,
        uniform: GpuRange,
        vertex: GpuRange,
        index: GpuRange,
        index_count: u32,
        viewport: [f32; 6],
    ) -> Result<()> {
        let cmd = DrawCommand {
            pipeline,
            bind,
            uniform,
            vertex,
            index,
            index_count,
            viewport,
            epoch: self.epoch,
        };
        if let Some(prev) = self.draws.last_mut() {
            if can_merge(prev, &cmd) {
                if prev.index.end() != cmd.index.offset {
                    return Err(GxError::Integrity(format!(
                        "draw merge over a gap: {} .. {}",
                        prev.index.end(),
                        cmd.index.offset
                    )));
                }
                prev.index.size += cmd.index.size;
                prev.index_count += cmd.index_count;
                prev.vertex.size = cmd.vertex.end() - prev.vertex.offset;
                self.merged_draws += 1;
                return Ok(());
            }
        }
        self.draws.push(cmd);
        Ok(())
    }

    pub fn draws(&self) -> &[DrawCommand] {
        &self.draws
    }

    pub fn gpu_buffer(&self, kind: ArenaKind) -> Option<&wgpu::Buffer> {
        self.gpu[kind as usize].as_ref().map(|g| &g.buffer)
    }

    /// Flush every written arena prefix to its persistent buffer and
    /// queue the staging buffers for remapping. Must run before the
    /// frame's render passes are submitted so the queue orders the
    /// copies first.
    pub fn end_frame(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame upload"),
        });
        let set = &mut self.sets[self.current];
        for kind in 0..NUM_ARENAS {
            let len = set.arenas[kind].len() as u64;
            if len == 0 {
                continue;
            }
            let staging = ensure_staging(&mut set.staging[kind], device, len);
            staging
                .buffer
                .slice(..len)
                .get_mapped_range_mut()
                .copy_from_slice(&set.arenas[kind]);
            staging.buffer.unmap();
            staging.map_ready.store(false, Ordering::Release);

            let gpu = ensure_gpu(&mut self.gpu[kind], device, len, arena_usage(kind));
            encoder.copy_buffer_to_buffer(&staging.buffer, 0, &gpu.buffer, 0, len);
        }
        queue.submit(Some(encoder.finish()));

        // Remap for the next rotation; completion is observed by the
        // begin_frame poll three frames from now.
        for staging in set.staging.iter().flatten() {
            if staging.map_ready.load(Ordering::Acquire) {
                continue;
            }
            let ready = Arc::clone(&staging.map_ready);
            let failed = Arc::clone(&staging.map_failed);
            staging
                .buffer
                .slice(..)
                .map_async(wgpu::MapMode::Write, move |result| {
                    finish_map(result, &ready, &failed);
                });
        }
    }
}

fn buffer_capacity(len: u64) -> u64 {
    len.next_power_of_two().max(64 * 1024)
}

fn ensure_staging<'a>(
    slot: &'a mut Option<StagingBuffer>,
    device: &wgpu::Device,
    len: u64,
) -> &'a mut StagingBuffer {
    let needs_new = slot.as_ref().map_or(true, |s| s.capacity < len);
    if needs_new {
        let capacity = buffer_capacity(len);
        *slot = Some(StagingBuffer {
            buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("frame staging"),
                size: capacity,
                usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: true,
            }),
            capacity,
            map_ready: Arc::new(AtomicBool::new(true)),
            map_failed: Arc::new(AtomicBool::new(false)),
        });
    }
    slot.as_mut().unwrap_or_else(|| unreachable!())
}

fn ensure_gpu<'a>(
    slot: &'a mut Option<GpuBuffer>,
    device: &wgpu::Device,
    len: u64,
    usage: wgpu::BufferUsages,
) -> &'a mut GpuBuffer {
    let needs_new = slot.as_ref().map_or(true, |g| g.capacity < len);
    if needs_new {
        let capacity = buffer_capacity(len);
        *slot = Some(GpuBuffer {
            buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("frame buffer"),
                size: capacity,
                usage,
                mapped_at_creation: false,
            }),
            capacity,
        });
    }
    slot.as_mut().unwrap_or_else(|| unreachable!())
}

fn can_merge(prev: &DrawCommand, next: &DrawCommand) -> bool {
    prev.pipeline == next.pipeline
        && prev.bind == next.bind
        && prev.uniform == next.uniform
        && prev.viewport == next.viewport
        && prev.epoch == next.epoch
        && prev.vertex.end() == next.vertex.offset
}
