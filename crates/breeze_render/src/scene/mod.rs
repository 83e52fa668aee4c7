//! # Scenery
//!
//! Scenery owns renderable objects and lights and reports the visible ones to
//! the pipeline through a culling callback protocol. The pipeline never walks
//! scenery storage itself.
//!
//! ## Architecture
//!
//! - **Renderable**: capability interface of anything that produces draw passes
//! - **RenderableData**: per-renderable data precomputed when it is attached
//! - **Scenery**: culls renderables and lights against a frustum
//! - **BasicScenery**: flat-list scenery with bounding-sphere culling

mod basic_scenery;
mod renderable;

pub use basic_scenery::BasicScenery;
pub use renderable::{
    LightJob, LightSource, PassFlags, Renderable, RenderableData, RenderablePass, Scenery,
};
