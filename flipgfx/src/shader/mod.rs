//! Shader generation: register state is snapshotted into a hashable
//! configuration, analyzed for resource usage, and turned into a WGSL
//! module plus a matching uniform block.

pub mod config;
pub mod gen;
pub mod info;
pub mod uniform;

pub use config::{PipelineConfig, ShaderConfig, CONFIG_VERSION};
pub use gen::generate_wgsl;
pub use info::{build_shader_info, ShaderInfo, UniformOffsets};
pub use uniform::build_uniform;
