//! Perspectives scheduled by renderables while they prepare

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{ahead, camera, EventLog, Mesh};
use crate::foundation::collections::PerspectiveKey;
use crate::foundation::math::{Plane, Sphere, Vec3};
use crate::foundation::memory::HeapSlice;
use crate::render::device::{CommandRecorder, DeviceCommand, DeviceContext, DrawCall};
use crate::render::perspective::{Perspective, PerspectiveFlags};
use crate::render::pipeline::{
    PerspectivePhase, PerspectiveScheduler, PipelineError, PipelineResult, PipelineStageDesc, QueueId,
    RenderJob, RenderQueueDesc, RenderingPipeline, StageId, StageMask,
};
use crate::scene::{BasicScenery, PassFlags, Renderable, RenderableData, RenderablePass};

/// Planar mirror requesting a reflection of every perspective it is seen in
struct Mirror {
    stage: StageId,
    queue: QueueId,
    /// Skip scheduling from within reflections
    guarded: bool,
    scheduled: RefCell<Vec<PerspectiveKey>>,
    log: EventLog,
}

impl Mirror {
    const ID: u32 = 42;

    fn new(stage: StageId, queue: QueueId, guarded: bool, log: &EventLog) -> Rc<Self> {
        Rc::new(Self {
            stage,
            queue,
            guarded,
            scheduled: RefCell::new(Vec::new()),
            log: log.clone(),
        })
    }

    fn surface() -> Plane {
        Plane::from_point_normal(Vec3::new(0.0, -1.0, 0.0), Vec3::y())
    }
}

impl Renderable for Mirror {
    fn attached(&self, data: &mut RenderableData) {
        data.bounds = Sphere::new(ahead(5.0), 1.0);
    }

    fn attach_pass(&self, _pass_idx: u32, pass: &mut RenderablePass) -> bool {
        *pass = RenderablePass::new(self.stage, self.queue, 0, 0).with_flags(PassFlags::PREPARE);
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
        if self.guarded && perspective.desc().flags.contains(PerspectiveFlags::REFLECTION) {
            return Ok(None);
        }

        let reflection = perspective.desc().mirrored(&Self::surface());
        let key = scheduler.add_perspective(reflection, None, None, StageMask::EMPTY, true)?;
        self.scheduled.borrow_mut().push(key);
        Ok(Some(perspective.store_data(&Self::ID.to_le_bytes())))
    }

    fn render(&self, job: &RenderJob, perspective: &Perspective, context: &mut dyn DeviceContext) {
        self.log.push(format!("draw {} {} p{}", Self::ID, job.pass, perspective.id().raw()));
        if let Some(bytes) = job.perspective_data.and_then(|slice| perspective.data(slice)) {
            context.set_constants(0, bytes);
        }
        context.draw(DrawCall {
            vertex_count: 6,
            instance_count: 1,
            first_instance: Self::ID,
        });
    }
}

/// Renderable counting its prepare and finalize calls
struct Decal {
    stage: StageId,
    queue: QueueId,
    prepared: Cell<u32>,
    finalized: Cell<u32>,
}

impl Decal {
    fn new(stage: StageId, queue: QueueId) -> Rc<Self> {
        Rc::new(Self {
            stage,
            queue,
            prepared: Cell::new(0),
            finalized: Cell::new(0),
        })
    }
}

impl Renderable for Decal {
    fn attached(&self, data: &mut RenderableData) {
        data.bounds = Sphere::new(ahead(4.0), 0.5);
    }

    fn attach_pass(&self, _pass_idx: u32, pass: &mut RenderablePass) -> bool {
        *pass = RenderablePass::new(self.stage, self.queue, 1, 0)
            .with_flags(PassFlags::PREPARE | PassFlags::FINALIZE);
        true
    }

    fn pass_count(&self) -> u32 {
        1
    }

    fn prepare(
        &self,
        _perspective: &mut Perspective,
        _scheduler: &mut dyn PerspectiveScheduler,
    ) -> PipelineResult<Option<HeapSlice>> {
        self.prepared.set(self.prepared.get() + 1);
        Ok(None)
    }

    fn finalize(&self, _perspective: &mut Perspective, _data: Option<HeapSlice>) {
        self.finalized.set(self.finalized.get() + 1);
    }

    fn render(&self, _job: &RenderJob, _perspective: &Perspective, context: &mut dyn DeviceContext) {
        context.draw(DrawCall {
            vertex_count: 4,
            instance_count: 1,
            first_instance: 0,
        });
    }
}

struct Setup {
    pipeline: RenderingPipeline,
    main: StageId,
    shadow: StageId,
    queue: QueueId,
}

fn setup(max_perspectives: usize) -> Setup {
    let mut pipeline = RenderingPipeline::with_limits("reflections", max_perspectives, 1024);
    let shadow = pipeline.add_stage("Shadow", PipelineStageDesc::new(-1, false)).unwrap();
    let main = pipeline.add_stage("Main", PipelineStageDesc::new(0, true)).unwrap();
    let queue = pipeline.add_queue("Default", RenderQueueDesc::new(0, false));
    Setup {
        pipeline,
        main,
        shadow,
        queue,
    }
}

#[test]
fn test_reflection_renders_before_its_dependent() {
    let Setup { mut pipeline, main, queue, .. } = setup(8);
    let log = EventLog::default();
    let mirror = Mirror::new(main, queue, true, &log);
    let scenery = Rc::new(BasicScenery::new());
    scenery.add_renderable(mirror.clone());
    pipeline.add_scenery(scenery);

    let camera_key = pipeline
        .add_perspective(camera(), None, None, StageMask::EMPTY)
        .unwrap();
    pipeline.prepare().unwrap();

    assert_eq!(pipeline.perspective_count(), 2);
    let scheduled = mirror.scheduled.borrow().clone();
    assert_eq!(scheduled.len(), 1);
    let reflection_key = scheduled[0];

    let camera_view = pipeline.perspective(camera_key).unwrap();
    assert_eq!(camera_view.dependencies(), &[reflection_key]);
    let reflection = pipeline.perspective(reflection_key).unwrap();
    assert!(reflection.desc().flags.contains(PerspectiveFlags::REFLECTION));
    assert!(reflection.desc().flipped);
    assert_eq!(reflection.stage_mask(), StageMask::of(main));
    assert_eq!(reflection.job_count(), 1);

    assert_eq!(pipeline.render_order(), vec![reflection_key, camera_key]);

    let mut recorder = CommandRecorder::new();
    pipeline.render(&mut recorder);
    assert_eq!(log.events(), vec!["draw 42 0 p1", "draw 42 0 p0"]);

    // Only the camera view received prepared data
    let constants: Vec<&DeviceCommand> = recorder
        .commands()
        .iter()
        .filter(|command| matches!(command, DeviceCommand::SetConstants { .. }))
        .collect();
    assert_eq!(
        constants,
        vec![&DeviceCommand::SetConstants {
            slot: 0,
            data: Mirror::ID.to_le_bytes().to_vec(),
        }]
    );
}

#[test]
fn test_unrelated_view_renders_between_reflection_and_camera() {
    let Setup { mut pipeline, main, queue, .. } = setup(8);
    let log = EventLog::default();
    let scenery = Rc::new(BasicScenery::new());
    scenery.add_renderable(Mirror::new(main, queue, true, &log));
    pipeline.add_scenery(scenery);

    // The first view sees the mirror, the second looks away from it
    let near = pipeline
        .add_perspective(camera(), None, None, StageMask::EMPTY)
        .unwrap();
    let away = camera().mirrored(&Plane::from_point_normal(Vec3::zeros(), Vec3::z()));
    let far = pipeline
        .add_perspective(away.with_flags(PerspectiveFlags::empty()), None, None, StageMask::EMPTY)
        .unwrap();
    pipeline.prepare().unwrap();

    let order = pipeline.render_order();
    assert_eq!(order.len(), 3);
    let reflection = pipeline.perspective(near).unwrap().dependencies()[0];
    assert_eq!(order, vec![reflection, far, near]);
}

#[test]
fn test_unbounded_recursion_hits_limit() {
    let Setup { mut pipeline, main, queue, .. } = setup(4);
    let log = EventLog::default();
    let scenery = Rc::new(BasicScenery::new());
    scenery.add_renderable(Mirror::new(main, queue, false, &log));
    pipeline.add_scenery(scenery);

    pipeline.add_perspective(camera(), None, None, StageMask::EMPTY).unwrap();
    assert_eq!(pipeline.prepare(), Err(PipelineError::PerspectiveLimit { max: 4 }));
    assert_eq!(pipeline.perspective_count(), 4);

    // Every perspective is back in the pool after the failed frame
    pipeline.clear_perspectives();
    assert_eq!(pipeline.perspective_count(), 0);
    assert_eq!(pipeline.pooled_perspective_count(), 4);
}

#[test]
fn test_failed_perspective_is_emptied_and_not_collected_again() {
    let Setup { mut pipeline, main, queue, .. } = setup(4);
    let log = EventLog::default();
    let decal = Decal::new(main, queue);
    let scenery = Rc::new(BasicScenery::new());
    scenery.add_renderable(decal.clone());
    scenery.add_renderable(Mirror::new(main, queue, false, &log));
    pipeline.add_scenery(scenery);

    pipeline.add_perspective(camera(), None, None, StageMask::EMPTY).unwrap();
    assert_eq!(pipeline.prepare(), Err(PipelineError::PerspectiveLimit { max: 4 }));
    assert_eq!(decal.prepared.get(), 4);

    // The deepest reflection failed: its decal job is gone and already finalized
    let failed = pipeline.perspective_keys()[3];
    let failed_view = pipeline.perspective(failed).unwrap();
    assert_eq!(failed_view.phase(), PerspectivePhase::Failed);
    assert_eq!(failed_view.job_count(), 0);
    assert_eq!(decal.finalized.get(), 1);

    // Preparing again neither re-collects nor duplicates anything
    assert_eq!(pipeline.prepare(), Ok(()));
    assert_eq!(decal.prepared.get(), 4);
    assert_eq!(pipeline.perspective(failed).unwrap().job_count(), 0);

    let mut recorder = CommandRecorder::new();
    pipeline.render(&mut recorder);
    assert_eq!(pipeline.perspective(failed).unwrap().phase(), PerspectivePhase::Failed);

    pipeline.clear_perspectives();
    assert_eq!(decal.finalized.get(), 4);
}

#[test]
fn test_normal_only_excludes_other_stages() {
    let Setup { mut pipeline, main, shadow, queue } = setup(8);
    let log = EventLog::default();
    let scenery = Rc::new(BasicScenery::new());
    scenery.add_renderable(Mirror::new(main, queue, true, &log));
    scenery.add_renderable(Mesh::new(1, ahead(6.0), &log).with_pass(shadow, queue, 0).into_rc());
    pipeline.add_scenery(scenery);

    let everything = StageMask::of(main).with(shadow);
    let camera_key = pipeline.add_perspective(camera(), None, None, everything).unwrap();
    pipeline.prepare().unwrap();

    let camera_view = pipeline.perspective(camera_key).unwrap();
    assert_eq!(camera_view.job_count(), 2);
    let reflection = pipeline.perspective(camera_view.dependencies()[0]).unwrap();
    assert!(!reflection.stage_mask().contains(shadow));
    assert_eq!(reflection.jobs(shadow, queue).len(), 0);
}

#[test]
fn test_scheduled_perspectives_recycle_next_frame() {
    let Setup { mut pipeline, main, queue, .. } = setup(8);
    let log = EventLog::default();
    let mirror = Mirror::new(main, queue, true, &log);

    let mut previous = None;
    for _ in 0..2 {
        let scenery = Rc::new(BasicScenery::new());
        scenery.add_renderable(mirror.clone());
        pipeline.add_scenery(scenery);
        pipeline.add_perspective(camera(), None, None, StageMask::EMPTY).unwrap();
        pipeline.prepare().unwrap();

        let ids: Vec<u64> = pipeline
            .perspective_keys()
            .iter()
            .filter_map(|&key| pipeline.perspective(key))
            .map(|perspective| perspective.id().raw())
            .collect();
        assert_eq!(ids, vec![0, 1]);
        if let Some(keys) = &previous {
            assert_eq!(keys, pipeline.perspective_keys());
        }
        previous = Some(pipeline.perspective_keys().to_vec());
        pipeline.clear_perspectives();
    }
    assert_eq!(pipeline.pooled_perspective_count(), 2);
}
