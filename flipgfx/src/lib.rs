//! flipgfx: a fixed-function console GPU command stream on wgpu.
//!
//! The crate decodes the console's binary FIFO protocol (register loads
//! and inline vertex data), mirrors every pipeline-relevant hardware
//! register in a [`gx::state::ShadowState`], and turns draws into
//! dynamically generated WGSL shaders, cached render pipelines and
//! per-frame GPU buffers. [`GfxContext`] ties the pieces together;
//! individual layers are usable on their own (the decoder and the shader
//! generator run without a GPU device, which the test suite relies on).

pub mod context;
pub mod error;
pub mod fifo;
pub mod gfx;
pub mod gx;
pub mod shader;

pub use context::{create_headless_device, ContextOptions, GfxContext};
pub use error::{GxError, Result};
pub use fifo::{ByteOrder, DrawCollector, DrawSink, MemorySource, RamImage};
pub use gx::state::ShadowState;
pub use gx::texture::{TextureHandle, TlutHandle};
