//! # Render Jobs
//!
//! A render job is one deferred draw: the renderable that draws it, which of
//! its passes, and the transient data it prepared for the perspective.
//! Queued jobs additionally carry the two keys queues sort by.

use std::fmt;
use std::rc::Rc;

use crate::foundation::memory::HeapSlice;
use crate::render::device::DeviceContext;
use crate::render::perspective::Perspective;
use crate::scene::Renderable;

/// Deferred draw of one renderable pass
#[derive(Clone)]
pub struct RenderJob {
    /// Renderable issuing the draw
    pub renderable: Rc<dyn Renderable>,
    /// Renderable-defined pass data
    pub pass: u32,
    /// Data the renderable prepared for this perspective
    pub perspective_data: Option<HeapSlice>,
}

impl RenderJob {
    /// Issue the draw
    pub fn render(&self, perspective: &Perspective, context: &mut dyn DeviceContext) {
        self.renderable.render(self, perspective, context);
    }
}

impl fmt::Debug for RenderJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderJob")
            .field("pass", &self.pass)
            .field("perspective_data", &self.perspective_data)
            .finish_non_exhaustive()
    }
}

/// Render job waiting in a queue
#[derive(Debug, Clone)]
pub struct QueuedRenderJob {
    /// State-grouping key (material, effect, input layout)
    pub sort_index: u32,
    /// Camera distance key, see [`depth_sort_key`]
    pub depth: u32,
    /// The job
    pub job: RenderJob,
}

/// Order-preserving integer key of a squared camera distance
///
/// Non-negative IEEE-754 floats compare like their bit patterns read as
/// unsigned integers. Negative and NaN inputs cannot come from a squared
/// distance; they are clamped to zero.
pub fn depth_sort_key(distance_sq: f32) -> u32 {
    debug_assert!(
        distance_sq >= 0.0,
        "depth sort key requires a non-negative distance, got {distance_sq}"
    );
    distance_sq.max(0.0).to_bits()
}
