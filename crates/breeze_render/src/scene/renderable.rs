//! Renderable capability interface and the scenery culling protocol

use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;

use crate::foundation::math::{Plane, Sphere};
use crate::foundation::memory::HeapSlice;
use crate::render::device::DeviceContext;
use crate::render::perspective::Perspective;
use crate::render::pipeline::{PerspectiveScheduler, PipelineResult, QueueId, RenderJob, StageId, StageMask};

bitflags! {
    /// Per-pass scheduling requests
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PassFlags: u8 {
        /// Call [`Renderable::prepare`] once per perspective before queuing
        const PREPARE = 1 << 0;
        /// Call [`Renderable::finalize`] when the perspective is dequeued
        const FINALIZE = 1 << 1;
    }
}

/// Precomputed scheduling data of one renderable pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderablePass {
    /// Stage the pass renders in
    pub stage: StageId,
    /// Queue the pass renders in
    pub queue: QueueId,
    /// State-grouping key
    pub sort_index: u32,
    /// Renderable-defined pass data, handed back in [`RenderJob::pass`]
    pub pass: u32,
    /// Scheduling requests
    pub flags: PassFlags,
}

impl RenderablePass {
    /// Create a pass in the given stage and queue
    pub fn new(stage: StageId, queue: QueueId, sort_index: u32, pass: u32) -> Self {
        Self {
            stage,
            queue,
            sort_index,
            pass,
            flags: PassFlags::empty(),
        }
    }

    /// Set scheduling requests
    pub fn with_flags(mut self, flags: PassFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Renderable data gathered by scenery when a renderable is attached
#[derive(Clone)]
pub struct RenderableData {
    /// World-space bounds used for culling and depth sorting
    pub bounds: Sphere,
    /// The renderable
    pub renderable: Rc<dyn Renderable>,
    /// Accepted passes
    pub passes: Vec<RenderablePass>,
}

impl RenderableData {
    /// Empty data for `renderable`
    pub fn new(renderable: Rc<dyn Renderable>) -> Self {
        Self {
            bounds: Sphere::default(),
            renderable,
            passes: Vec::new(),
        }
    }

    /// Union of the flags of every pass rendering in `stages`
    pub fn pass_flags(&self, stages: StageMask) -> PassFlags {
        self.passes
            .iter()
            .filter(|pass| stages.contains(pass.stage))
            .fold(PassFlags::empty(), |flags, pass| flags | pass.flags)
    }
}

impl fmt::Debug for RenderableData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderableData")
            .field("bounds", &self.bounds)
            .field("passes", &self.passes)
            .finish_non_exhaustive()
    }
}

/// Anything that produces draw passes
///
/// Scenery calls the attachment methods; the pipeline calls `prepare`,
/// `finalize` and `render` once the renderable is visible in a perspective.
pub trait Renderable {
    /// Fill renderable-wide data, at least the bounds
    fn attached(&self, data: &mut RenderableData);

    /// Fill the scheduling data of pass `pass_idx`
    ///
    /// Returning `false` drops the pass.
    fn attach_pass(&self, pass_idx: u32, pass: &mut RenderablePass) -> bool;

    /// The renderable was removed from scenery
    fn detached(&self) {}

    /// Default state-grouping key of the renderable's passes
    fn sort_index(&self) -> u32 {
        0
    }

    /// Number of passes to query through [`Renderable::attach_pass`]
    fn pass_count(&self) -> u32;

    /// Changes whenever attached data must be gathered again
    fn revision(&self) -> u64 {
        0
    }

    /// Prepare per-perspective data, called at most once per perspective
    ///
    /// May schedule additional perspectives this one depends on.
    fn prepare(
        &self,
        _perspective: &mut Perspective,
        _scheduler: &mut dyn PerspectiveScheduler,
    ) -> PipelineResult<Option<HeapSlice>> {
        Ok(None)
    }

    /// Release whatever `prepare` set up, called when the perspective is dequeued
    fn finalize(&self, _perspective: &mut Perspective, _data: Option<HeapSlice>) {}

    /// Issue the draw calls of a queued job
    fn render(&self, job: &RenderJob, perspective: &Perspective, context: &mut dyn DeviceContext);
}

/// A light source owned by scenery
pub trait LightSource {
    /// World-space bounds of the lit volume
    fn bounds(&self) -> Sphere;
}

/// Visible light collected for a perspective
#[derive(Clone)]
pub struct LightJob {
    /// The light
    pub light: Rc<dyn LightSource>,
    /// Bounds at culling time
    pub bounds: Sphere,
}

impl fmt::Debug for LightJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LightJob")
            .field("bounds", &self.bounds)
            .finish_non_exhaustive()
    }
}

/// Culling interface of a scene
pub trait Scenery {
    /// Report every renderable intersecting the inward-facing `planes`
    fn cull_renderables(&self, planes: &[Plane; 6], visit: &mut dyn FnMut(&RenderableData));

    /// Report every light intersecting the inward-facing `planes`
    fn cull_lights(&self, planes: &[Plane; 6], visit: &mut dyn FnMut(&LightJob));
}
