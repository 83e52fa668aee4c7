//! The rendering pipeline driving the per-frame prepare and render cycle

use std::rc::Rc;

use super::callbacks::{PerspectiveModifier, PerspectiveScheduler, PipelineProcessor};
use super::error::PipelineResult;
use super::layout::{PipelineLayout, PipelineStageDesc, QueueId, RenderQueueDesc, StageId, StageMask};
use super::perspective::PipelinePerspective;
use super::pool::{resolve_stage_mask, PerspectivePool, SchedulerView};
use crate::config::PipelineConfig;
use crate::foundation::collections::PerspectiveKey;
use crate::foundation::memory::DEFAULT_CHUNK_SIZE;
use crate::render::device::{DeviceContext, PipeId};
use crate::render::perspective::PerspectiveDesc;
use crate::scene::Scenery;

/// Default maximum number of active perspectives
pub const DEFAULT_MAX_PERSPECTIVE_COUNT: usize = 64;

/// A rendering pipeline
///
/// Owns the stage and queue layout, the perspective pool and the scenery
/// rendered this frame. A frame is driven as:
///
/// 1. [`clear_perspectives`](Self::clear_perspectives)
/// 2. [`add_scenery`](Self::add_scenery) and [`add_perspective`](Self::add_perspective)
/// 3. [`prepare`](Self::prepare)
/// 4. [`render`](Self::render)
pub struct RenderingPipeline {
    name: String,
    layout: PipelineLayout,
    pool: PerspectivePool,
    scenery: Vec<Rc<dyn Scenery>>,
    modifier: Option<Rc<dyn PerspectiveModifier>>,
}

impl RenderingPipeline {
    /// Create a pipeline without stages or queues
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_limits(name, DEFAULT_MAX_PERSPECTIVE_COUNT, DEFAULT_CHUNK_SIZE)
    }

    /// Create a pipeline with explicit pool limits
    pub fn with_limits(name: impl Into<String>, max_perspective_count: usize, heap_chunk_size: usize) -> Self {
        Self {
            name: name.into(),
            layout: PipelineLayout::new(),
            pool: PerspectivePool::new(max_perspective_count, heap_chunk_size),
            scenery: Vec::new(),
            modifier: None,
        }
    }

    /// Create a pipeline and register the configured stages and queues
    pub fn from_config(name: impl Into<String>, config: &PipelineConfig) -> PipelineResult<Self> {
        let mut pipeline = Self::with_limits(name, config.max_perspective_count, config.heap_chunk_size);
        for stage in &config.stages {
            pipeline.add_stage(&stage.name, PipelineStageDesc::new(stage.layer, stage.normal))?;
        }
        for queue in &config.queues {
            pipeline.add_queue(&queue.name, RenderQueueDesc::new(queue.layer, queue.depth_sort));
        }
        log::debug!(
            "Created pipeline '{}' with {} stages and {} queues",
            pipeline.name,
            pipeline.layout.stage_count(),
            pipeline.layout.queue_count()
        );
        Ok(pipeline)
    }

    /// Pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a stage, see [`PipelineLayout::add_stage`]
    pub fn add_stage(&mut self, name: &str, desc: PipelineStageDesc) -> PipelineResult<StageId> {
        self.layout.add_stage(name, desc)
    }

    /// Register a queue, see [`PipelineLayout::add_queue`]
    pub fn add_queue(&mut self, name: &str, desc: RenderQueueDesc) -> QueueId {
        self.layout.add_queue(name, desc)
    }

    /// Look up a stage by name
    pub fn stage_id(&self, name: &str) -> Option<StageId> {
        self.layout.stage_id(name)
    }

    /// Look up a queue by name
    pub fn queue_id(&self, name: &str) -> Option<QueueId> {
        self.layout.queue_id(name)
    }

    /// Stage ids in render order
    pub fn ordered_stage_ids(&self) -> &[StageId] {
        self.layout.ordered_stage_ids()
    }

    /// Queue ids in render order
    pub fn ordered_queue_ids(&self) -> &[QueueId] {
        self.layout.ordered_queue_ids()
    }

    /// Stage and queue layout
    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }

    /// Install a modifier applied to every perspective description
    pub fn set_perspective_modifier(&mut self, modifier: Option<Rc<dyn PerspectiveModifier>>) {
        self.modifier = modifier;
    }

    /// Add scenery rendered by every perspective this frame
    pub fn add_scenery(&mut self, scenery: Rc<dyn Scenery>) {
        self.scenery.push(scenery);
    }

    /// Add a perspective rendered this frame
    ///
    /// An empty `stage_mask` selects the normal stages.
    ///
    /// # Errors
    ///
    /// Fails with [`PipelineError::PerspectiveLimit`](super::PipelineError::PerspectiveLimit)
    /// when the pool is exhausted.
    pub fn add_perspective(
        &mut self,
        desc: PerspectiveDesc,
        pipe: Option<PipeId>,
        processor: Option<Rc<dyn PipelineProcessor>>,
        stage_mask: StageMask,
    ) -> PipelineResult<PerspectiveKey> {
        PerspectiveScheduler::add_perspective(self, desc, pipe, processor, stage_mask, false)
    }

    /// Release every perspective to the pool and drop the scenery
    pub fn clear_perspectives(&mut self) {
        self.pool.release_all();
        self.scenery.clear();
    }

    /// Release the frame's resources, see [`clear_perspectives`](Self::clear_perspectives)
    pub fn release(&mut self) {
        self.clear_perspectives();
    }

    /// Collect, enqueue and sort every perspective
    ///
    /// Perspectives added by renderables while collecting are prepared in
    /// the same call, after the perspective that added them. Perspectives
    /// that were already prepared this frame are skipped.
    ///
    /// # Errors
    ///
    /// Propagates the first scheduling error raised by a renderable. The
    /// perspective that raised it is emptied, finalizing whatever it had
    /// already prepared, and is not collected again this frame.
    pub fn prepare(&mut self) -> PipelineResult<()> {
        let mut index = 0;
        loop {
            // Collecting may append perspectives, so re-read the active list
            let Some(key) = self.pool.active().get(index).copied() else {
                break;
            };
            index += 1;
            if !self.pool.is_collecting(key) {
                continue;
            }
            let Some(mut perspective) = self.pool.checkout(key) else {
                continue;
            };
            let result = self.collect(&mut perspective);
            if result.is_err() {
                perspective.abandon();
            }
            self.pool.checkin(key, perspective);
            result?;
        }

        log::trace!(
            "Pipeline '{}' prepared {} perspectives",
            self.name,
            self.pool.active_count()
        );
        Ok(())
    }

    fn collect(&mut self, perspective: &mut PipelinePerspective) -> PipelineResult<()> {
        let mut scheduler = SchedulerView::new(&self.layout, &mut self.pool, self.modifier.as_deref());
        let mut result = Ok(());
        for scenery in &self.scenery {
            if let Err(err) = perspective.add_renderables(&self.layout, scenery.as_ref(), &mut scheduler) {
                result = Err(err);
                break;
            }
            perspective.add_lights(scenery.as_ref());
        }
        perspective.add_dependencies(scheduler.into_added());
        result?;

        perspective.enqueue(&self.layout);
        perspective.prepare_queues(&self.layout);
        Ok(())
    }

    /// Render every perspective
    ///
    /// Stages render in layer order. Within a stage, perspectives render in
    /// reverse registration order with dependencies first, so that shadow and
    /// reflection viewpoints finish before the perspectives reading them.
    pub fn render(&mut self, context: &mut dyn DeviceContext) {
        let order = self.pool.render_order();
        for &stage in self.layout.ordered_stage_ids() {
            for &key in &order {
                if let Some(perspective) = self.pool.get(key) {
                    perspective.render_stage(&self.layout, stage, context);
                }
            }
        }
        for key in order {
            if let Some(perspective) = self.pool.get_mut(key) {
                perspective.mark_rendered();
            }
        }
    }

    /// Look up an active or pooled perspective
    pub fn perspective(&self, key: PerspectiveKey) -> Option<&PipelinePerspective> {
        self.pool.get(key)
    }

    /// Active perspectives in registration order
    pub fn perspective_keys(&self) -> &[PerspectiveKey] {
        self.pool.active()
    }

    /// Number of active perspectives
    pub fn perspective_count(&self) -> usize {
        self.pool.active_count()
    }

    /// Number of perspectives held by the pool, active or not
    pub fn pooled_perspective_count(&self) -> usize {
        self.pool.pooled_count()
    }

    /// Active perspectives in render order
    pub fn render_order(&self) -> Vec<PerspectiveKey> {
        self.pool.render_order()
    }
}

impl PerspectiveScheduler for RenderingPipeline {
    fn add_perspective(
        &mut self,
        mut desc: PerspectiveDesc,
        pipe: Option<PipeId>,
        processor: Option<Rc<dyn PipelineProcessor>>,
        stage_mask: StageMask,
        normal_only: bool,
    ) -> PipelineResult<PerspectiveKey> {
        if let Some(modifier) = &self.modifier {
            modifier.modify(&mut desc);
        }
        let mask = resolve_stage_mask(&self.layout, stage_mask, normal_only);
        self.pool.acquire(desc, pipe, processor, mask)
    }
}
