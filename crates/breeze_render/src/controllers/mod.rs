//! # Renderable Controllers
//!
//! Controllers own the state of a family of renderable objects and expose it
//! to the pipeline through a single [`Renderable`](crate::scene::Renderable).
//!
//! ## Architecture
//!
//! - **Material / EffectDriver**: shared `Arc` assets controllers group by
//! - **WaterControllers**: double-buffered controller records, rebuilt only on
//!   structural change
//! - **WaterRenderable**: renderable adapter scheduling planar reflections

pub mod material;
pub mod water;
mod water_renderable;

pub use material::{asset_identity, EffectDriver, Material, MaterialPass, MaterialTechnique};
pub use water::{
    BufferSlot, CommitOutcome, PassQueue, PassRef, WaterConfig, WaterControllers, WaterDefaults,
    WaterError, WaterResult,
};
pub use water_renderable::{reflection_bindings, ReflectionBinding, WaterRenderable};
