//! Renderable adapter drawing a shared set of water controllers
//!
//! One render pass is exposed per pass queue of the current controller
//! buffer. While preparing a perspective, every visible reflective surface
//! the camera looks down on requests a mirrored perspective, and the
//! resulting reflection bindings are stored in the perspective's data heap
//! for the draw calls.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use super::water::WaterControllers;
use crate::foundation::collections::{key_to_bits, PerspectiveKey};
use crate::foundation::memory::HeapSlice;
use crate::render::device::DeviceContext;
use crate::render::perspective::{Perspective, PerspectiveFlags, PerspectiveId};
use crate::render::pipeline::{PerspectiveScheduler, PipelineResult, RenderJob, StageMask};
use crate::scene::{PassFlags, Renderable, RenderableData, RenderablePass};

/// Reflection perspective requested for one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflectionBinding {
    /// Index of the controller in draw order
    pub controller: u32,
    /// Key bits of the reflection perspective
    pub perspective_bits: u64,
    /// Output slice of the reflection
    pub output_index: u32,
}

impl ReflectionBinding {
    fn new(controller: u32, perspective: PerspectiveKey, output_index: u32) -> Self {
        Self {
            controller,
            perspective_bits: key_to_bits(perspective),
            output_index,
        }
    }

    fn pack(self) -> [u32; 4] {
        [
            self.controller,
            self.perspective_bits as u32,
            (self.perspective_bits >> 32) as u32,
            self.output_index,
        ]
    }

    fn unpack(packed: [u32; 4]) -> Self {
        Self {
            controller: packed[0],
            perspective_bits: u64::from(packed[1]) | (u64::from(packed[2]) << 32),
            output_index: packed[3],
        }
    }
}

/// Decode reflection bindings stored by [`WaterRenderable::prepare`]
pub fn reflection_bindings(bytes: &[u8]) -> Vec<ReflectionBinding> {
    bytes
        .chunks_exact(std::mem::size_of::<[u32; 4]>())
        .map(|chunk| ReflectionBinding::unpack(bytemuck::pod_read_unaligned(chunk)))
        .collect()
}

/// Per-perspective cache of reflective controllers
#[derive(Debug, Default)]
struct ViewCache {
    structure_revision: Option<u64>,
    reflective: Vec<u32>,
}

/// Draws water controllers and schedules their reflections
pub struct WaterRenderable {
    controllers: Rc<RefCell<WaterControllers>>,
    reflection_stages: StageMask,
    views: RefCell<HashMap<PerspectiveId, ViewCache>>,
    cache_rebuilds: Cell<u64>,
}

impl WaterRenderable {
    /// Draw `controllers`, reflections render the normal stages
    pub fn new(controllers: Rc<RefCell<WaterControllers>>) -> Self {
        Self {
            controllers,
            reflection_stages: StageMask::EMPTY,
            views: RefCell::new(HashMap::new()),
            cache_rebuilds: Cell::new(0),
        }
    }

    /// Restrict the stages reflection perspectives render
    ///
    /// The mask is always intersected with the normal stages.
    pub fn with_reflection_stages(mut self, stages: StageMask) -> Self {
        self.reflection_stages = stages;
        self
    }

    /// Shared controllers
    pub fn controllers(&self) -> &Rc<RefCell<WaterControllers>> {
        &self.controllers
    }

    /// Number of times a perspective cache was rebuilt
    pub fn cache_rebuilds(&self) -> u64 {
        self.cache_rebuilds.get()
    }

    /// Reflective controllers for `perspective`, refreshed when the controllers changed
    fn reflective_controllers(&self, perspective: PerspectiveId, controllers: &WaterControllers) -> Vec<u32> {
        let revision = controllers.structure_revision();
        let mut views = self.views.borrow_mut();
        let view = views.entry(perspective).or_default();
        if view.structure_revision != Some(revision) {
            view.reflective.clear();
            view.reflective
                .extend((0..controllers.reflective_count()).map(|index| index as u32));
            view.structure_revision = Some(revision);
            self.cache_rebuilds.set(self.cache_rebuilds.get() + 1);
            log::trace!(
                "Water cache for perspective {} rebuilt with {} reflective controllers",
                perspective.raw(),
                view.reflective.len()
            );
        }
        view.reflective.clone()
    }
}

impl Renderable for WaterRenderable {
    fn attached(&self, data: &mut RenderableData) {
        data.bounds = self.controllers.borrow().bounds();
    }

    fn attach_pass(&self, pass_idx: u32, pass: &mut RenderablePass) -> bool {
        let controllers = self.controllers.borrow();
        let Some(queue) = controllers.pass_queues().get(pass_idx as usize) else {
            return false;
        };
        *pass = RenderablePass::new(queue.stage, queue.queue, queue.sort_index, pass_idx)
            .with_flags(PassFlags::PREPARE);
        true
    }

    fn pass_count(&self) -> u32 {
        self.controllers.borrow().pass_queues().len() as u32
    }

    fn revision(&self) -> u64 {
        self.controllers.borrow().generation()
    }

    fn prepare(
        &self,
        perspective: &mut Perspective,
        scheduler: &mut dyn PerspectiveScheduler,
    ) -> PipelineResult<Option<HeapSlice>> {
        // Reflections never request reflections of their own
        if perspective.desc().flags.contains(PerspectiveFlags::REFLECTION) {
            return Ok(None);
        }

        let controllers = self.controllers.borrow();
        let desc = perspective.desc();
        let mut bindings = Vec::new();
        for index in self.reflective_controllers(perspective.id(), &controllers) {
            let (Some(plane), Some(bounds)) = (
                controllers.surface_plane(index as usize),
                controllers.surface_bounds(index as usize),
            ) else {
                continue;
            };
            if plane.distance(&desc.cam_pos) <= 0.0 || !bounds.intersects_planes(&desc.planes) {
                continue;
            }

            let reflection = desc.mirrored(&plane);
            let key = scheduler.add_perspective(reflection, None, None, self.reflection_stages, true)?;
            bindings.push(ReflectionBinding::new(index, key, desc.output_index).pack());
        }

        if bindings.is_empty() {
            return Ok(None);
        }
        Ok(Some(perspective.store_data(bytemuck::cast_slice(bindings.as_slice()))))
    }

    fn render(&self, job: &RenderJob, perspective: &Perspective, context: &mut dyn DeviceContext) {
        let reflections = job
            .perspective_data
            .and_then(|slice| perspective.data(slice))
            .unwrap_or(&[]);
        self.controllers
            .borrow()
            .render_queue(job.pass as usize, reflections, context);
    }
}
