//! Flat-list scenery with bounding-sphere culling

use std::cell::RefCell;
use std::rc::Rc;

use super::renderable::{LightJob, LightSource, Renderable, RenderableData, RenderablePass, Scenery};
use crate::foundation::collections::{HandleMap, RenderableKey};
use crate::foundation::math::Plane;
use crate::render::pipeline::{QueueId, StageId};

struct SceneryEntry {
    data: RenderableData,
    revision: u64,
}

/// Scenery keeping renderables and lights in flat lists
///
/// Renderable data is gathered through the [`Renderable`] attachment methods
/// when a renderable is added, and gathered again whenever its
/// [`Renderable::revision`] changes.
#[derive(Default)]
pub struct BasicScenery {
    renderables: RefCell<HandleMap<RenderableKey, SceneryEntry>>,
    lights: RefCell<Vec<Rc<dyn LightSource>>>,
}

impl BasicScenery {
    /// Create an empty scenery
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a renderable
    pub fn add_renderable(&self, renderable: Rc<dyn Renderable>) -> RenderableKey {
        let revision = renderable.revision();
        let data = Self::gather(renderable);
        self.renderables
            .borrow_mut()
            .insert(SceneryEntry { data, revision })
    }

    /// Detach a renderable, returns `false` for unknown keys
    pub fn remove_renderable(&self, key: RenderableKey) -> bool {
        let removed = self.renderables.borrow_mut().remove(key);
        match removed {
            Some(entry) => {
                entry.data.renderable.detached();
                true
            }
            None => false,
        }
    }

    /// Add a light
    pub fn add_light(&self, light: Rc<dyn LightSource>) {
        self.lights.borrow_mut().push(light);
    }

    /// Number of attached renderables
    pub fn renderable_count(&self) -> usize {
        self.renderables.borrow().len()
    }

    /// Number of lights
    pub fn light_count(&self) -> usize {
        self.lights.borrow().len()
    }

    /// Gather data again for renderables whose revision changed
    pub fn refresh(&self) {
        let mut renderables = self.renderables.borrow_mut();
        for entry in renderables.values_mut() {
            let revision = entry.data.renderable.revision();
            if revision != entry.revision {
                log::trace!("Renderable revision {} -> {}, gathering pass data", entry.revision, revision);
                entry.data = Self::gather(entry.data.renderable.clone());
                entry.revision = revision;
            }
        }
    }

    fn gather(renderable: Rc<dyn Renderable>) -> RenderableData {
        let mut data = RenderableData::new(renderable.clone());
        renderable.attached(&mut data);

        let sort_index = renderable.sort_index();
        for pass_idx in 0..renderable.pass_count() {
            let mut pass = RenderablePass::new(StageId::default(), QueueId::default(), sort_index, pass_idx);
            if renderable.attach_pass(pass_idx, &mut pass) {
                data.passes.push(pass);
            }
        }
        data
    }
}

impl Scenery for BasicScenery {
    fn cull_renderables(&self, planes: &[Plane; 6], visit: &mut dyn FnMut(&RenderableData)) {
        self.refresh();

        // Snapshot first, visiting renderables may call back into the scenery
        let visible: Vec<RenderableData> = self
            .renderables
            .borrow()
            .values()
            .filter(|entry| entry.data.bounds.intersects_planes(planes))
            .map(|entry| entry.data.clone())
            .collect();

        for data in &visible {
            visit(data);
        }
    }

    fn cull_lights(&self, planes: &[Plane; 6], visit: &mut dyn FnMut(&LightJob)) {
        let lights: Vec<LightJob> = self
            .lights
            .borrow()
            .iter()
            .map(|light| LightJob {
                light: light.clone(),
                bounds: light.bounds(),
            })
            .filter(|job| job.bounds.intersects_planes(planes))
            .collect();

        for job in &lights {
            visit(job);
        }
    }
}
