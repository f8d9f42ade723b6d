//! GPU-side resource management: pipeline/bind/sampler caches and the
//! per-frame staging allocator.

pub mod bind;
pub mod frame;
pub mod pipeline;

pub use bind::{BindGroupCache, DrawBinds, SamplerCache, TextureRegistry};
pub use frame::{ArenaKind, DrawCommand, FrameAllocator, GpuRange};
pub use pipeline::{BuildCache, CacheConfig, GpuPipeline, PipelineBuilder, BUILD_BUDGET};
