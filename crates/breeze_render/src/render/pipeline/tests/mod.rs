//! Pipeline integration tests
//!
//! Shared probes that record every callback the pipeline makes, so tests can
//! assert on the exact order of setup, draw and post-processing calls.

mod scheduling;

use std::cell::RefCell;
use std::rc::Rc;

use super::{PipelinePerspective, PipelineProcessor, QueueId, QueueSetup, RenderJob, StageId};
use crate::foundation::math::{Sphere, Vec3};
use crate::render::device::{DeviceContext, DrawCall};
use crate::render::perspective::{Perspective, PerspectiveDesc};
use crate::scene::{Renderable, RenderableData, RenderablePass};

/// Shared list of callback events
#[derive(Clone, Default)]
struct EventLog(Rc<RefCell<Vec<String>>>);

impl EventLog {
    fn push(&self, event: impl Into<String>) {
        self.0.borrow_mut().push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    fn count(&self, event: &str) -> usize {
        self.0.borrow().iter().filter(|e| e.as_str() == event).count()
    }

    fn count_prefix(&self, prefix: &str) -> usize {
        self.0.borrow().iter().filter(|e| e.starts_with(prefix)).count()
    }

    fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

fn label(stage: Option<StageId>, queue: Option<QueueId>) -> String {
    let stage = stage.map_or_else(|| "-".to_string(), |stage| format!("s{}", stage.index()));
    let queue = queue.map_or_else(|| "-".to_string(), |queue| format!("q{}", queue.index()));
    format!("{stage} {queue}")
}

struct SetupProbe {
    log: EventLog,
}

impl QueueSetup for SetupProbe {
    fn setup_rendering(
        &self,
        stage: StageId,
        queue: Option<QueueId>,
        _perspective: &PipelinePerspective,
        _context: &mut dyn DeviceContext,
    ) {
        self.log.push(format!("setup {}", label(Some(stage), queue)));
    }
}

struct ProcessorProbe {
    log: EventLog,
}

impl PipelineProcessor for ProcessorProbe {
    fn render(
        &self,
        stage: Option<StageId>,
        queue: Option<QueueId>,
        _perspective: &PipelinePerspective,
        _context: &mut dyn DeviceContext,
    ) {
        self.log.push(format!("post {}", label(stage, queue)));
    }
}

/// Renderable drawing one instance per pass
struct Mesh {
    id: u32,
    center: Vec3,
    passes: Vec<RenderablePass>,
    log: EventLog,
}

impl Mesh {
    fn new(id: u32, center: Vec3, log: &EventLog) -> Self {
        Self {
            id,
            center,
            passes: Vec::new(),
            log: log.clone(),
        }
    }

    fn with_pass(mut self, stage: StageId, queue: QueueId, sort_index: u32) -> Self {
        let pass = self.passes.len() as u32;
        self.passes.push(RenderablePass::new(stage, queue, sort_index, pass));
        self
    }

    fn into_rc(self) -> Rc<Self> {
        Rc::new(self)
    }
}

impl Renderable for Mesh {
    fn attached(&self, data: &mut RenderableData) {
        data.bounds = Sphere::new(self.center, 0.5);
    }

    fn attach_pass(&self, pass_idx: u32, pass: &mut RenderablePass) -> bool {
        match self.passes.get(pass_idx as usize) {
            Some(declared) => {
                *pass = *declared;
                true
            }
            None => false,
        }
    }

    fn pass_count(&self) -> u32 {
        self.passes.len() as u32
    }

    fn render(&self, job: &RenderJob, perspective: &Perspective, context: &mut dyn DeviceContext) {
        self.log.push(format!("draw {} {} p{}", self.id, job.pass, perspective.id().raw()));
        context.draw(DrawCall {
            vertex_count: 3,
            instance_count: 1,
            first_instance: self.id,
        });
    }
}

/// Camera at the origin looking down -z
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

/// Point `distance` units in front of [`camera`]
fn ahead(distance: f32) -> Vec3 {
    Vec3::new(0.0, 0.0, -distance)
}
