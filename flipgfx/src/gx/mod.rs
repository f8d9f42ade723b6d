// Shadow-state model: the in-memory mirror of the console GPU's
// register file. Submodules hold the per-subsystem types; `ShadowState`
// in `state` is the single aggregate owned by the graphics context.

pub mod bits;
pub mod lighting;
pub mod state;
pub mod texture;

pub use state::ShadowState;
