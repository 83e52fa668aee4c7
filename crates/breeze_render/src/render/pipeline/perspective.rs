//! # Pipeline Perspectives
//!
//! A [`PipelinePerspective`] is one viewpoint rendered through one pipeline.
//! It buckets the passes of visible renderables into a `[stage][queue]` grid
//! of job lists, sorts each list, and renders the grid in layer order.
//!
//! ## Frame phases
//!
//! ```text
//! Idle -> reset -> Collecting -> enqueue -> Enqueued -> prepare -> Prepared -> render -> Rendered
//!   ^                                                                                      |
//!   +------------------------------------- release ----------------------------------------+
//! ```
//!
//! A collection that fails ends in `Failed`: everything collected so far is
//! dequeued and the perspective is not collected again until it is reset.
//!
//! ## Bounded iteration
//!
//! The grid is sized to every registered stage and queue, but a frame only
//! touches the buckets that received jobs. Collection tracks the populated id
//! ranges so that dequeuing clears only those buckets, and `enqueue` records
//! the populated layer-slot ranges that rendering walks. The first and last
//! slots of those ranges are where stage setup and post-processing fire.

use std::fmt;
use std::ops::RangeInclusive;
use std::rc::Rc;

use super::callbacks::{PerspectiveScheduler, PipelineProcessor};
use super::error::PipelineResult;
use super::layout::{PipelineLayout, QueueId, StageId, StageMask};
use super::render_job::{depth_sort_key, QueuedRenderJob, RenderJob};
use crate::foundation::collections::PerspectiveKey;
use crate::foundation::memory::HeapSlice;
use crate::render::device::{DeviceContext, PipeId};
use crate::render::perspective::{Perspective, PerspectiveDesc, PerspectiveId};
use crate::scene::{LightJob, PassFlags, Renderable, Scenery};

/// Frame phase of a pipeline perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerspectivePhase {
    /// In the pool, not part of a frame
    Idle,
    /// Accepting renderables and lights
    Collecting,
    /// Populated ranges recorded
    Enqueued,
    /// Queues sorted
    Prepared,
    /// Rendered at least once this frame
    Rendered,
    /// Collection failed; holds nothing and renders nothing this frame
    Failed,
}

/// Inclusive `u32` range with an empty sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IdRange {
    first: u32,
    last: u32,
}

impl IdRange {
    const EMPTY: Self = Self {
        first: u32::MAX,
        last: 0,
    };

    fn is_empty(self) -> bool {
        self.first > self.last
    }

    fn include(&mut self, value: u32) {
        if value < self.first {
            self.first = value;
        }
        if value >= self.last {
            self.last = value;
        }
    }

    fn is_first(self, value: u32) -> bool {
        !self.is_empty() && value == self.first
    }

    fn is_last(self, value: u32) -> bool {
        !self.is_empty() && value == self.last
    }

    fn iter(self) -> RangeInclusive<u32> {
        if self.is_empty() {
            // Empty inclusive range
            1..=0
        } else {
            self.first..=self.last
        }
    }
}

#[derive(Debug, Default)]
struct QueueBucket {
    jobs: Vec<QueuedRenderJob>,
    sorted: Vec<u32>,
}

impl QueueBucket {
    fn sort_by_key(&mut self, key: impl Fn(&QueuedRenderJob) -> u32) {
        let Self { jobs, sorted } = self;
        sorted.clear();
        sorted.extend(0..jobs.len() as u32);
        // Stable, equal keys keep collection order
        sorted.sort_by_key(|&index| key(&jobs[index as usize]));
    }

    fn ordered(&self) -> impl Iterator<Item = &QueuedRenderJob> + '_ {
        // Collection order until a sort has run
        let permuted = self.sorted.len() == self.jobs.len();
        (0..self.jobs.len()).map(move |position| {
            let index = if permuted {
                self.sorted[position] as usize
            } else {
                position
            };
            &self.jobs[index]
        })
    }
}

#[derive(Debug)]
struct StageBucket {
    queues: Vec<QueueBucket>,
    /// Queue ids that received jobs
    queue_ids: IdRange,
    /// Layer slots of non-empty queues, set by enqueue
    queue_slots: IdRange,
}

impl Default for StageBucket {
    fn default() -> Self {
        Self {
            queues: Vec::new(),
            queue_ids: IdRange::EMPTY,
            queue_slots: IdRange::EMPTY,
        }
    }
}

/// Renderable that asked to be finalized, with the data it prepared
struct PendingFinalize {
    renderable: Rc<dyn Renderable>,
    data: Option<HeapSlice>,
}

/// One viewpoint rendered through a pipeline
pub struct PipelinePerspective {
    base: Perspective,
    pipe: Option<PipeId>,
    processor: Option<Rc<dyn PipelineProcessor>>,
    stage_mask: StageMask,

    stages: Vec<StageBucket>,
    /// Stage ids that received jobs
    stage_ids: IdRange,
    /// Layer slots of stages with non-empty queues, set by enqueue
    stage_slots: IdRange,

    lights: Vec<LightJob>,
    finalize: Vec<PendingFinalize>,
    dependencies: Vec<PerspectiveKey>,
    phase: PerspectivePhase,
}

impl PipelinePerspective {
    /// Create an idle perspective
    pub fn new(id: PerspectiveId, desc: PerspectiveDesc, chunk_size: usize) -> Self {
        Self {
            base: Perspective::new(id, desc, chunk_size),
            pipe: None,
            processor: None,
            stage_mask: StageMask::EMPTY,
            stages: Vec::new(),
            stage_ids: IdRange::EMPTY,
            stage_slots: IdRange::EMPTY,
            lights: Vec::new(),
            finalize: Vec::new(),
            dependencies: Vec::new(),
            phase: PerspectivePhase::Idle,
        }
    }

    /// Start a new use of this perspective
    pub fn reset(
        &mut self,
        desc: PerspectiveDesc,
        pipe: Option<PipeId>,
        processor: Option<Rc<dyn PipelineProcessor>>,
        stage_mask: StageMask,
    ) {
        self.dequeue();
        self.base.reset(desc);
        self.pipe = pipe;
        self.processor = processor;
        self.stage_mask = stage_mask;
        self.phase = PerspectivePhase::Collecting;
    }

    /// Return to idle, dropping everything collected
    pub fn release(&mut self) {
        self.dequeue();
        self.pipe = None;
        self.processor = None;
        self.stage_mask = StageMask::EMPTY;
        self.phase = PerspectivePhase::Idle;
    }

    /// Drop collected jobs and lights and free the data heap
    ///
    /// Pending finalize callbacks run first. Only buckets inside the
    /// populated ranges are cleared.
    pub fn dequeue(&mut self) {
        let pending = std::mem::take(&mut self.finalize);
        for entry in &pending {
            entry.renderable.finalize(&mut self.base, entry.data);
        }
        self.finalize = pending;
        self.finalize.clear();

        for stage_id in self.stage_ids.iter() {
            let Some(stage) = self.stages.get_mut(stage_id as usize) else {
                continue;
            };
            for queue_id in stage.queue_ids.iter() {
                if let Some(queue) = stage.queues.get_mut(queue_id as usize) {
                    queue.jobs.clear();
                    queue.sorted.clear();
                }
            }
            stage.queue_ids = IdRange::EMPTY;
            stage.queue_slots = IdRange::EMPTY;
        }
        self.stage_ids = IdRange::EMPTY;
        self.stage_slots = IdRange::EMPTY;

        self.lights.clear();
        self.dependencies.clear();
        self.base.free_data();

        if self.phase != PerspectivePhase::Idle {
            self.phase = PerspectivePhase::Collecting;
        }
    }

    fn ensure_layout(&mut self, layout: &PipelineLayout) {
        if self.stages.len() < layout.stage_count() {
            self.stages.resize_with(layout.stage_count(), StageBucket::default);
        }
        for stage in &mut self.stages {
            if stage.queues.len() < layout.queue_count() {
                stage.queues.resize_with(layout.queue_count(), QueueBucket::default);
            }
        }
    }

    /// Queue the passes of every renderable `scenery` reports visible
    ///
    /// Passes outside the stage mask are skipped. A renderable with a pass
    /// requesting [`PassFlags::PREPARE`] is prepared exactly once, and the
    /// returned data is attached to all of its jobs.
    pub fn add_renderables(
        &mut self,
        layout: &PipelineLayout,
        scenery: &dyn Scenery,
        scheduler: &mut dyn PerspectiveScheduler,
    ) -> PipelineResult<()> {
        self.ensure_layout(layout);

        let planes = self.base.desc().planes;
        let mut failure = None;

        scenery.cull_renderables(&planes, &mut |data| {
            if failure.is_some() {
                return;
            }

            let requested = data.pass_flags(self.stage_mask);
            if data.passes.is_empty() {
                return;
            }

            let mut perspective_data = None;
            if requested.contains(PassFlags::PREPARE) {
                match data.renderable.prepare(&mut self.base, scheduler) {
                    Ok(prepared) => perspective_data = prepared,
                    Err(err) => {
                        failure = Some(err);
                        return;
                    }
                }
            }
            if requested.contains(PassFlags::FINALIZE) {
                self.finalize.push(PendingFinalize {
                    renderable: data.renderable.clone(),
                    data: perspective_data,
                });
            }

            let depth = depth_sort_key(self.base.desc().distance_squared(&data.bounds.center));

            for pass in &data.passes {
                if !self.stage_mask.contains(pass.stage) {
                    continue;
                }
                let Some(stage) = self.stages.get_mut(pass.stage.index()) else {
                    continue;
                };
                let Some(queue) = stage.queues.get_mut(pass.queue.index()) else {
                    continue;
                };

                queue.jobs.push(QueuedRenderJob {
                    sort_index: pass.sort_index,
                    depth,
                    job: RenderJob {
                        renderable: data.renderable.clone(),
                        pass: pass.pass,
                        perspective_data,
                    },
                });
                stage.queue_ids.include(pass.queue.index() as u32);
                self.stage_ids.include(pass.stage.index() as u32);
            }
        });

        failure.map_or(Ok(()), Err)
    }

    /// Collect the lights `scenery` reports visible
    pub fn add_lights(&mut self, scenery: &dyn Scenery) {
        let planes = self.base.desc().planes;
        scenery.cull_lights(&planes, &mut |light| self.lights.push(light.clone()));
    }

    /// Record the populated layer-slot ranges
    ///
    /// Empty stages and queues are left out of the ranges, so rendering never
    /// visits them.
    pub fn enqueue(&mut self, layout: &PipelineLayout) {
        self.stage_slots = IdRange::EMPTY;

        for stage_id in self.stage_ids.iter() {
            let id = StageId::new(stage_id as usize);
            if !self.stage_mask.contains(id) {
                continue;
            }
            let Some(stage) = self.stages.get_mut(stage_id as usize) else {
                continue;
            };

            stage.queue_slots = IdRange::EMPTY;
            for queue_id in stage.queue_ids.iter() {
                let populated = stage
                    .queues
                    .get(queue_id as usize)
                    .is_some_and(|queue| !queue.jobs.is_empty());
                if !populated {
                    continue;
                }
                if let Some(slot) = layout.queue_slot(QueueId::new(queue_id as usize)) {
                    stage.queue_slots.include(slot);
                }
            }

            if !stage.queue_slots.is_empty() {
                if let Some(slot) = layout.stage_slot(id) {
                    self.stage_slots.include(slot);
                }
            }
        }

        self.phase = PerspectivePhase::Enqueued;
    }

    /// Depth-sort a queue if its description asks for it
    ///
    /// Ascending distance, nearest first.
    pub fn prepare_queue(&mut self, layout: &PipelineLayout, stage: StageId, queue: QueueId) {
        let Some(desc) = layout.queue_desc(queue) else {
            return;
        };
        if !desc.depth_sort {
            return;
        }
        if let Some(bucket) = self.bucket_mut(stage, queue) {
            bucket.sort_by_key(|job| job.depth);
        }
    }

    /// State-sort a queue unless its description asks for depth sorting
    ///
    /// Ascending sort index, grouping jobs that share GPU state.
    pub fn optimize_queue(&mut self, layout: &PipelineLayout, stage: StageId, queue: QueueId) {
        let Some(desc) = layout.queue_desc(queue) else {
            return;
        };
        if desc.depth_sort {
            return;
        }
        if let Some(bucket) = self.bucket_mut(stage, queue) {
            bucket.sort_by_key(|job| job.sort_index);
        }
    }

    /// Prepare and optimize every populated queue
    pub fn prepare_queues(&mut self, layout: &PipelineLayout) {
        for stage_id in self.stage_ids.iter() {
            let stage = StageId::new(stage_id as usize);
            let queue_ids = match self.stages.get(stage_id as usize) {
                Some(bucket) => bucket.queue_ids,
                None => continue,
            };
            for queue_id in queue_ids.iter() {
                let queue = QueueId::new(queue_id as usize);
                self.prepare_queue(layout, stage, queue);
                self.optimize_queue(layout, stage, queue);
            }
        }
        self.phase = PerspectivePhase::Prepared;
    }

    fn bucket_mut(&mut self, stage: StageId, queue: QueueId) -> Option<&mut QueueBucket> {
        self.stages
            .get_mut(stage.index())?
            .queues
            .get_mut(queue.index())
    }

    fn bucket(&self, stage: StageId, queue: QueueId) -> Option<&QueueBucket> {
        self.stages.get(stage.index())?.queues.get(queue.index())
    }

    /// Render every populated queue of a stage in layer order
    pub fn render_stage(&self, layout: &PipelineLayout, stage: StageId, context: &mut dyn DeviceContext) {
        if !self.stage_mask.contains(stage) {
            return;
        }
        let Some(bucket) = self.stages.get(stage.index()) else {
            return;
        };
        if bucket.queue_slots.is_empty() {
            return;
        }

        log::trace!(
            "Perspective {} rendering stage '{}'",
            self.base.id().raw(),
            layout.stage_name(stage).unwrap_or_default()
        );
        for slot in bucket.queue_slots.iter() {
            if let Some(queue) = layout.queue_at_slot(slot) {
                self.render_queue(layout, stage, queue, context);
            }
        }
    }

    /// Render one queue of a stage
    ///
    /// Fires the stage setup before the stage's first populated queue, the
    /// queue setup before its jobs, and the processor after the queue, after
    /// the stage's last queue and after the perspective's last stage.
    pub fn render_queue(
        &self,
        layout: &PipelineLayout,
        stage: StageId,
        queue: QueueId,
        context: &mut dyn DeviceContext,
    ) {
        let (Some(stage_bucket), Some(bucket)) = (self.stages.get(stage.index()), self.bucket(stage, queue)) else {
            return;
        };
        let (Some(stage_desc), Some(queue_desc)) = (layout.stage_desc(stage), layout.queue_desc(queue)) else {
            return;
        };
        let Some(queue_slot) = layout.queue_slot(queue) else {
            return;
        };

        if stage_bucket.queue_slots.is_first(queue_slot) {
            if let Some(setup) = &stage_desc.setup {
                setup.setup_rendering(stage, None, self, context);
            }
        }

        if !bucket.jobs.is_empty() {
            if let Some(setup) = &queue_desc.setup {
                setup.setup_rendering(stage, Some(queue), self, context);
            }
            for queued in bucket.ordered() {
                queued.job.render(&self.base, context);
            }
        }

        if let Some(processor) = &self.processor {
            processor.render(Some(stage), Some(queue), self, context);

            if stage_bucket.queue_slots.is_last(queue_slot) {
                processor.render(Some(stage), None, self, context);

                if layout
                    .stage_slot(stage)
                    .is_some_and(|slot| self.stage_slots.is_last(slot))
                {
                    processor.render(None, None, self, context);
                }
            }
        }
    }

    pub(crate) fn add_dependencies(&mut self, keys: impl IntoIterator<Item = PerspectiveKey>) {
        self.dependencies.extend(keys);
    }

    /// Drop a partial collection and leave the frame's collection for good
    pub(crate) fn abandon(&mut self) {
        self.dequeue();
        self.phase = PerspectivePhase::Failed;
    }

    pub(crate) fn mark_rendered(&mut self) {
        if !matches!(self.phase, PerspectivePhase::Idle | PerspectivePhase::Failed) {
            self.phase = PerspectivePhase::Rendered;
        }
    }

    /// The underlying perspective
    pub fn base(&self) -> &Perspective {
        &self.base
    }

    /// The underlying perspective, mutably
    pub fn base_mut(&mut self) -> &mut Perspective {
        &mut self.base
    }

    /// Perspective description
    pub fn desc(&self) -> &PerspectiveDesc {
        self.base.desc()
    }

    /// Instance identity
    pub fn id(&self) -> PerspectiveId {
        self.base.id()
    }

    /// Render-target pipe
    pub fn pipe(&self) -> Option<PipeId> {
        self.pipe
    }

    /// Stages this perspective renders
    pub fn stage_mask(&self) -> StageMask {
        self.stage_mask
    }

    /// Current frame phase
    pub fn phase(&self) -> PerspectivePhase {
        self.phase
    }

    /// Lights collected this frame
    pub fn lights(&self) -> &[LightJob] {
        &self.lights
    }

    /// Perspectives scheduled while this one collected, which must render first
    pub fn dependencies(&self) -> &[PerspectiveKey] {
        &self.dependencies
    }

    /// Jobs of a queue in collection order
    pub fn jobs(&self, stage: StageId, queue: QueueId) -> &[QueuedRenderJob] {
        self.bucket(stage, queue).map_or(&[], |bucket| bucket.jobs.as_slice())
    }

    /// Jobs of a queue in render order
    pub fn ordered_jobs(&self, stage: StageId, queue: QueueId) -> Vec<&QueuedRenderJob> {
        self.bucket(stage, queue)
            .map(|bucket| bucket.ordered().collect())
            .unwrap_or_default()
    }

    /// Total number of queued jobs
    pub fn job_count(&self) -> usize {
        self.stage_ids
            .iter()
            .filter_map(|stage| self.stages.get(stage as usize))
            .flat_map(|stage| stage.queues.iter())
            .map(|queue| queue.jobs.len())
            .sum()
    }

    /// Layer slots of the first and last populated stage, `None` when empty
    pub fn stage_slot_range(&self) -> Option<(u32, u32)> {
        (!self.stage_slots.is_empty()).then_some((self.stage_slots.first, self.stage_slots.last))
    }

    /// Layer slots of a stage's first and last populated queue, `None` when empty
    pub fn queue_slot_range(&self, stage: StageId) -> Option<(u32, u32)> {
        let slots = self.stages.get(stage.index())?.queue_slots;
        (!slots.is_empty()).then_some((slots.first, slots.last))
    }
}

impl fmt::Debug for PipelinePerspective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelinePerspective")
            .field("id", &self.base.id())
            .field("phase", &self.phase)
            .field("stage_mask", &self.stage_mask)
            .field("jobs", &self.job_count())
            .field("lights", &self.lights.len())
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Sphere, Vec3};
    use crate::render::device::{CommandRecorder, DrawCall};
    use crate::render::pipeline::layout::{PipelineStageDesc, RenderQueueDesc};
    use crate::render::pipeline::PipelineError;
    use crate::scene::{BasicScenery, RenderableData, RenderablePass};
    use std::cell::Cell;

    struct Marker {
        id: u32,
        z: f32,
        passes: Vec<RenderablePass>,
        prepared: Cell<u32>,
        finalized: Cell<u32>,
    }

    impl Marker {
        fn new(id: u32, z: f32, passes: Vec<RenderablePass>) -> Rc<Self> {
            Rc::new(Self {
                id,
                z,
                passes,
                prepared: Cell::new(0),
                finalized: Cell::new(0),
            })
        }
    }

    impl Renderable for Marker {
        fn attached(&self, data: &mut RenderableData) {
            data.bounds = Sphere::new(Vec3::new(0.0, 0.0, self.z), 0.5);
        }

        fn attach_pass(&self, pass_idx: u32, pass: &mut RenderablePass) -> bool {
            *pass = self.passes[pass_idx as usize];
            true
        }

        fn pass_count(&self) -> u32 {
            self.passes.len() as u32
        }

        fn prepare(
            &self,
            perspective: &mut Perspective,
            _scheduler: &mut dyn PerspectiveScheduler,
        ) -> PipelineResult<Option<HeapSlice>> {
            self.prepared.set(self.prepared.get() + 1);
            Ok(Some(perspective.store_data(&self.id.to_le_bytes())))
        }

        fn finalize(&self, perspective: &mut Perspective, data: Option<HeapSlice>) {
            // Data is still readable while finalizing
            assert!(data.and_then(|slice| perspective.data(slice)).is_some());
            self.finalized.set(self.finalized.get() + 1);
        }

        fn render(&self, job: &RenderJob, _perspective: &Perspective, context: &mut dyn DeviceContext) {
            context.draw(DrawCall {
                vertex_count: 3,
                instance_count: 1,
                first_instance: self.id * 100 + job.pass,
            });
        }
    }

    struct RefuseScheduling;

    impl PerspectiveScheduler for RefuseScheduling {
        fn add_perspective(
            &mut self,
            _desc: PerspectiveDesc,
            _pipe: Option<PipeId>,
            _processor: Option<Rc<dyn PipelineProcessor>>,
            _stage_mask: StageMask,
            _normal_only: bool,
        ) -> PipelineResult<PerspectiveKey> {
            Err(PipelineError::PerspectiveLimit { max: 0 })
        }
    }

    struct Fixture {
        layout: PipelineLayout,
        opaque: StageId,
        shadow: StageId,
        state: QueueId,
        depth: QueueId,
    }

    fn fixture() -> Fixture {
        let mut layout = PipelineLayout::new();
        let opaque = layout.add_stage("Opaque", PipelineStageDesc::new(0, true)).unwrap();
        let shadow = layout.add_stage("Shadow", PipelineStageDesc::new(-1, false)).unwrap();
        let state = layout.add_queue("State", RenderQueueDesc::new(0, false));
        let depth = layout.add_queue("Depth", RenderQueueDesc::new(1, true));
        Fixture { layout, opaque, shadow, state, depth }
    }

    fn camera() -> PerspectiveDesc {
        PerspectiveDesc::look_at(
            Vec3::zeros(),
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::y(),
            std::f32::consts::FRAC_PI_2,
            1.0,
            0.1,
            100.0,
        )
    }

    fn perspective(mask: StageMask) -> PipelinePerspective {
        let mut perspective = PipelinePerspective::new(PerspectiveId::new(0), camera(), 1024);
        perspective.reset(camera(), None, None, mask);
        perspective
    }

    #[test]
    fn test_stage_mask_filters_passes() {
        let f = fixture();
        let scenery = BasicScenery::new();
        scenery.add_renderable(Marker::new(
            1,
            -5.0,
            vec![
                RenderablePass::new(f.opaque, f.state, 0, 0),
                RenderablePass::new(f.shadow, f.state, 0, 1),
            ],
        ));

        let mut perspective = perspective(StageMask::of(f.opaque));
        perspective
            .add_renderables(&f.layout, &scenery, &mut RefuseScheduling)
            .unwrap();

        assert_eq!(perspective.jobs(f.opaque, f.state).len(), 1);
        assert!(perspective.jobs(f.shadow, f.state).is_empty());
        assert_eq!(perspective.job_count(), 1);
    }

    #[test]
    fn test_prepare_once_per_renderable_and_finalize_on_dequeue() {
        let f = fixture();
        let scenery = BasicScenery::new();
        let flags = PassFlags::PREPARE | PassFlags::FINALIZE;
        let marker = Marker::new(
            7,
            -5.0,
            vec![
                RenderablePass::new(f.opaque, f.state, 0, 0).with_flags(flags),
                RenderablePass::new(f.opaque, f.depth, 0, 1).with_flags(flags),
            ],
        );
        scenery.add_renderable(marker.clone());

        let mut perspective = perspective(StageMask::of(f.opaque));
        perspective
            .add_renderables(&f.layout, &scenery, &mut RefuseScheduling)
            .unwrap();

        assert_eq!(marker.prepared.get(), 1);
        let data = perspective.jobs(f.opaque, f.depth)[0].job.perspective_data;
        assert_eq!(perspective.jobs(f.opaque, f.state)[0].job.perspective_data, data);
        let bytes = data.and_then(|slice| perspective.base().data(slice)).unwrap();
        assert_eq!(bytes, &7u32.to_le_bytes());

        perspective.dequeue();
        assert_eq!(marker.finalized.get(), 1);
        assert_eq!(perspective.job_count(), 0);
        assert_eq!(data.and_then(|slice| perspective.base().data(slice)), None);

        // Nothing left to finalize
        perspective.release();
        assert_eq!(marker.finalized.get(), 1);
        assert_eq!(perspective.phase(), PerspectivePhase::Idle);
    }

    #[test]
    fn test_prepare_error_propagates() {
        struct Greedy;

        impl Renderable for Greedy {
            fn attached(&self, data: &mut RenderableData) {
                data.bounds = Sphere::new(Vec3::new(0.0, 0.0, -2.0), 1.0);
            }

            fn attach_pass(&self, _pass_idx: u32, pass: &mut RenderablePass) -> bool {
                pass.flags = PassFlags::PREPARE;
                true
            }

            fn pass_count(&self) -> u32 {
                1
            }

            fn prepare(
                &self,
                perspective: &mut Perspective,
                scheduler: &mut dyn PerspectiveScheduler,
            ) -> PipelineResult<Option<HeapSlice>> {
                scheduler.add_perspective(perspective.desc().clone(), None, None, StageMask::EMPTY, true)?;
                Ok(None)
            }

            fn render(&self, _job: &RenderJob, _perspective: &Perspective, _context: &mut dyn DeviceContext) {}
        }

        let f = fixture();
        let scenery = BasicScenery::new();
        scenery.add_renderable(Rc::new(Greedy));

        let mut perspective = perspective(StageMask::ALL);
        let result = perspective.add_renderables(&f.layout, &scenery, &mut RefuseScheduling);
        assert_eq!(result, Err(PipelineError::PerspectiveLimit { max: 0 }));
    }

    #[test]
    fn test_depth_and_state_sorting() {
        let f = fixture();
        let scenery = BasicScenery::new();
        for (id, z, sort) in [(1, -10.0, 3), (2, -5.0, 1), (3, -20.0, 2)] {
            scenery.add_renderable(Marker::new(
                id,
                z,
                vec![
                    RenderablePass::new(f.opaque, f.state, sort, 0),
                    RenderablePass::new(f.opaque, f.depth, sort, 1),
                ],
            ));
        }

        let mut perspective = perspective(StageMask::of(f.opaque));
        perspective
            .add_renderables(&f.layout, &scenery, &mut RefuseScheduling)
            .unwrap();
        perspective.enqueue(&f.layout);
        perspective.prepare_queues(&f.layout);

        let sort_order: Vec<u32> = perspective
            .ordered_jobs(f.opaque, f.state)
            .iter()
            .map(|job| job.sort_index)
            .collect();
        assert_eq!(sort_order, vec![1, 2, 3]);

        let depth_order: Vec<u32> = perspective
            .ordered_jobs(f.opaque, f.depth)
            .iter()
            .map(|job| job.sort_index)
            .collect();
        // Nearest first: z = -5, -10, -20
        assert_eq!(depth_order, vec![1, 3, 2]);

        // Optimizing a depth-sorted queue leaves its order alone
        perspective.optimize_queue(&f.layout, f.opaque, f.depth);
        let still_depth: Vec<u32> = perspective
            .ordered_jobs(f.opaque, f.depth)
            .iter()
            .map(|job| job.sort_index)
            .collect();
        assert_eq!(still_depth, depth_order);
    }

    #[test]
    fn test_enqueue_skips_empty_stages_and_queues() {
        let f = fixture();
        let scenery = BasicScenery::new();
        scenery.add_renderable(Marker::new(1, -5.0, vec![RenderablePass::new(f.opaque, f.depth, 0, 0)]));

        let mut perspective = perspective(StageMask::ALL);
        perspective
            .add_renderables(&f.layout, &scenery, &mut RefuseScheduling)
            .unwrap();
        perspective.enqueue(&f.layout);

        let depth_slot = f.layout.queue_slot(f.depth).unwrap();
        let opaque_slot = f.layout.stage_slot(f.opaque).unwrap();
        assert_eq!(perspective.queue_slot_range(f.opaque), Some((depth_slot, depth_slot)));
        assert_eq!(perspective.queue_slot_range(f.shadow), None);
        assert_eq!(perspective.stage_slot_range(), Some((opaque_slot, opaque_slot)));
        assert_eq!(perspective.phase(), PerspectivePhase::Enqueued);
    }

    #[test]
    fn test_render_missing_queue_is_noop() {
        let f = fixture();
        let perspective = perspective(StageMask::ALL);
        let mut recorder = CommandRecorder::new();

        perspective.render_queue(&f.layout, f.opaque, QueueId::new(42), &mut recorder);
        perspective.render_stage(&f.layout, StageId::new(9), &mut recorder);
        assert!(recorder.commands().is_empty());
    }

    #[test]
    fn test_render_walks_queues_in_layer_order() {
        let f = fixture();
        let scenery = BasicScenery::new();
        scenery.add_renderable(Marker::new(
            1,
            -5.0,
            vec![
                RenderablePass::new(f.opaque, f.depth, 0, 1),
                RenderablePass::new(f.opaque, f.state, 0, 0),
            ],
        ));

        let mut perspective = perspective(StageMask::ALL);
        perspective
            .add_renderables(&f.layout, &scenery, &mut RefuseScheduling)
            .unwrap();
        perspective.enqueue(&f.layout);
        perspective.prepare_queues(&f.layout);

        let mut recorder = CommandRecorder::new();
        perspective.render_stage(&f.layout, f.opaque, &mut recorder);
        let instances: Vec<u32> = recorder.draws().map(|draw| draw.first_instance).collect();
        assert_eq!(instances, vec![100, 101]);
    }
}
