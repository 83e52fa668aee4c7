//! # Rendering Pipeline
//!
//! A pipeline renders every perspective of a frame through an ordered set of
//! stages, each split into ordered render queues.
//!
//! ## Architecture
//!
//! - **PipelineLayout**: stage and queue registration with layer-sorted slot tables
//! - **PipelinePerspective**: `[stage][queue]` job buckets of one viewpoint
//! - **PerspectivePool**: reusable perspectives, capped per frame
//! - **RenderingPipeline**: drives the prepare and render phases over all perspectives
//!
//! ## Frame
//!
//! ```text
//! clear_perspectives -> add_scenery / add_perspective -> prepare -> render
//! ```
//!
//! Renderables may schedule dependent perspectives (shadows, reflections)
//! while they prepare. Those are prepared in the same frame and rendered
//! before the perspective that scheduled them.

mod callbacks;
mod error;
mod layout;
mod perspective;
mod pool;
mod render_job;
mod rendering_pipeline;

#[cfg(test)]
mod tests;

pub use callbacks::{PerspectiveModifier, PerspectiveScheduler, PipelineProcessor, QueueSetup};
pub use error::{PipelineError, PipelineResult};
pub use layout::{
    PipelineLayout, PipelineStageDesc, QueueId, RenderQueueDesc, StageId, StageMask, MAX_STAGE_COUNT,
};
pub use perspective::{PerspectivePhase, PipelinePerspective};
pub use pool::{resolve_stage_mask, PerspectivePool, SchedulerView};
pub use render_job::{depth_sort_key, QueuedRenderJob, RenderJob};
pub use rendering_pipeline::{RenderingPipeline, DEFAULT_MAX_PERSPECTIVE_COUNT};
