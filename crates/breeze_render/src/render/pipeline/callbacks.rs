//! Extension points invoked by the pipeline while scheduling and rendering

use std::rc::Rc;

use super::error::PipelineResult;
use super::layout::{QueueId, StageId, StageMask};
use super::perspective::PipelinePerspective;
use crate::foundation::collections::PerspectiveKey;
use crate::render::device::{DeviceContext, PipeId};
use crate::render::perspective::PerspectiveDesc;

/// State setup run at stage and queue boundaries
pub trait QueueSetup {
    /// Prepare device state before a stage (`queue` is `None`) or a queue renders
    fn setup_rendering(
        &self,
        stage: StageId,
        queue: Option<QueueId>,
        perspective: &PipelinePerspective,
        context: &mut dyn DeviceContext,
    );
}

/// Post-processing hook of a perspective
///
/// Called after every queue with `(Some(stage), Some(queue))`, after the last
/// queue of a stage with `(Some(stage), None)` and after the last stage with
/// `(None, None)`.
pub trait PipelineProcessor {
    /// Run post-processing for the finished stage/queue
    fn render(
        &self,
        stage: Option<StageId>,
        queue: Option<QueueId>,
        perspective: &PipelinePerspective,
        context: &mut dyn DeviceContext,
    );
}

/// Global rewrite applied to every perspective description before use
pub trait PerspectiveModifier {
    /// Rewrite `desc` in place
    fn modify(&self, desc: &mut PerspectiveDesc);
}

/// Registration of additional perspectives from within a frame
///
/// Handed to renderables while they prepare, so they can request the shadow
/// and reflection viewpoints they depend on.
pub trait PerspectiveScheduler {
    /// Add a perspective rendered in the current frame
    ///
    /// An empty `stage_mask` selects the normal stages. `normal_only`
    /// additionally restricts the mask to normal stages.
    fn add_perspective(
        &mut self,
        desc: PerspectiveDesc,
        pipe: Option<PipeId>,
        processor: Option<Rc<dyn PipelineProcessor>>,
        stage_mask: StageMask,
        normal_only: bool,
    ) -> PipelineResult<PerspectiveKey>;
}
