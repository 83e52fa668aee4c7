//! Reusable pipeline perspectives and in-frame perspective scheduling

use std::rc::Rc;

use super::callbacks::{PerspectiveModifier, PerspectiveScheduler, PipelineProcessor};
use super::error::{PipelineError, PipelineResult};
use super::layout::{PipelineLayout, StageMask};
use super::perspective::{PerspectivePhase, PipelinePerspective};
use crate::foundation::collections::{PerspectiveKey, SecondaryMap, SlotMap};
use crate::render::device::PipeId;
use crate::render::perspective::{PerspectiveDesc, PerspectiveId};

/// Pool of pipeline perspectives
///
/// Perspectives are never dropped while the pool lives. Releasing returns
/// them to a free list together with their grown job lists and data heaps,
/// and the next acquisition hands them out again under the same key.
///
/// A perspective can be checked out while it collects renderables, so that
/// renderables may acquire further perspectives without aliasing it.
#[derive(Debug)]
pub struct PerspectivePool {
    slots: SlotMap<PerspectiveKey, Option<PipelinePerspective>>,
    active: Vec<PerspectiveKey>,
    free: Vec<PerspectiveKey>,
    max_count: usize,
    chunk_size: usize,
    next_id: u64,
}

impl PerspectivePool {
    /// Create an empty pool allowing `max_count` active perspectives
    pub fn new(max_count: usize, chunk_size: usize) -> Self {
        Self {
            slots: SlotMap::with_key(),
            active: Vec::new(),
            free: Vec::new(),
            max_count,
            chunk_size,
            next_id: 0,
        }
    }

    /// Activate a perspective, recycling a released one when possible
    pub fn acquire(
        &mut self,
        desc: PerspectiveDesc,
        pipe: Option<PipeId>,
        processor: Option<Rc<dyn PipelineProcessor>>,
        stage_mask: StageMask,
    ) -> PipelineResult<PerspectiveKey> {
        if self.active.len() >= self.max_count {
            log::error!(
                "Perspective limit of {} reached, rejecting perspective at {:?}",
                self.max_count,
                desc.cam_pos
            );
            return Err(PipelineError::PerspectiveLimit { max: self.max_count });
        }

        let key = match self.free.pop() {
            Some(key) => key,
            None => {
                let id = PerspectiveId::new(self.next_id);
                self.next_id += 1;
                log::debug!("Growing perspective pool to {} perspectives", self.slots.len() + 1);
                self.slots
                    .insert(Some(PipelinePerspective::new(id, desc.clone(), self.chunk_size)))
            }
        };

        if let Some(Some(perspective)) = self.slots.get_mut(key) {
            perspective.reset(desc, pipe, processor, stage_mask);
        }
        self.active.push(key);
        Ok(key)
    }

    /// Release every active perspective back to the free list
    pub fn release_all(&mut self) {
        // Reverse, so the next frame acquires in the same order
        for key in self.active.drain(..).rev() {
            if let Some(Some(perspective)) = self.slots.get_mut(key) {
                perspective.release();
            }
            self.free.push(key);
        }
    }

    /// Take an active perspective out of the pool
    pub fn checkout(&mut self, key: PerspectiveKey) -> Option<PipelinePerspective> {
        self.slots.get_mut(key)?.take()
    }

    /// Put a checked out perspective back
    pub fn checkin(&mut self, key: PerspectiveKey, perspective: PipelinePerspective) {
        if let Some(slot) = self.slots.get_mut(key) {
            *slot = Some(perspective);
        }
    }

    /// Look up a perspective, `None` while it is checked out
    pub fn get(&self, key: PerspectiveKey) -> Option<&PipelinePerspective> {
        self.slots.get(key)?.as_ref()
    }

    /// Look up a perspective mutably, `None` while it is checked out
    pub fn get_mut(&mut self, key: PerspectiveKey) -> Option<&mut PipelinePerspective> {
        self.slots.get_mut(key)?.as_mut()
    }

    /// Active perspectives in registration order
    pub fn active(&self) -> &[PerspectiveKey] {
        &self.active
    }

    /// Number of active perspectives
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of perspectives ever created
    pub fn pooled_count(&self) -> usize {
        self.slots.len()
    }

    /// Maximum number of active perspectives
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Active perspectives in render order
    ///
    /// Reverse registration order, except that a perspective's dependencies
    /// always come before it.
    pub fn render_order(&self) -> Vec<PerspectiveKey> {
        let mut visited = SecondaryMap::new();
        let mut order = Vec::with_capacity(self.active.len());
        for &key in self.active.iter().rev() {
            self.visit(key, &mut visited, &mut order);
        }
        order
    }

    fn visit(
        &self,
        key: PerspectiveKey,
        visited: &mut SecondaryMap<PerspectiveKey, ()>,
        order: &mut Vec<PerspectiveKey>,
    ) {
        if visited.insert(key, ()).is_some() {
            return;
        }
        if let Some(perspective) = self.get(key) {
            for &dependency in perspective.dependencies().iter().rev() {
                self.visit(dependency, visited, order);
            }
        }
        order.push(key);
    }

    /// Whether a perspective still has to collect this frame
    pub(crate) fn is_collecting(&self, key: PerspectiveKey) -> bool {
        self.get(key)
            .is_some_and(|perspective| perspective.phase() == PerspectivePhase::Collecting)
    }
}

/// Stage mask a new perspective renders
///
/// An empty request selects the normal stages; `normal_only` intersects the
/// request with them.
pub fn resolve_stage_mask(layout: &PipelineLayout, requested: StageMask, normal_only: bool) -> StageMask {
    let normal = layout.normal_stage_mask();
    let mask = if requested.is_empty() { normal } else { requested };
    if normal_only {
        mask & normal
    } else {
        mask
    }
}

/// Scheduler handed to renderables while one perspective collects
///
/// Records every perspective it adds, which become the collecting
/// perspective's dependencies.
pub struct SchedulerView<'a> {
    layout: &'a PipelineLayout,
    pool: &'a mut PerspectivePool,
    modifier: Option<&'a dyn PerspectiveModifier>,
    added: Vec<PerspectiveKey>,
}

impl<'a> SchedulerView<'a> {
    /// Schedule into `pool`
    pub fn new(
        layout: &'a PipelineLayout,
        pool: &'a mut PerspectivePool,
        modifier: Option<&'a dyn PerspectiveModifier>,
    ) -> Self {
        Self {
            layout,
            pool,
            modifier,
            added: Vec::new(),
        }
    }

    /// Perspectives added through this view
    pub fn added(&self) -> &[PerspectiveKey] {
        &self.added
    }

    /// Consume the view, returning the perspectives it added
    pub fn into_added(self) -> Vec<PerspectiveKey> {
        self.added
    }
}

impl PerspectiveScheduler for SchedulerView<'_> {
    fn add_perspective(
        &mut self,
        mut desc: PerspectiveDesc,
        pipe: Option<PipeId>,
        processor: Option<Rc<dyn PipelineProcessor>>,
        stage_mask: StageMask,
        normal_only: bool,
    ) -> PipelineResult<PerspectiveKey> {
        if let Some(modifier) = self.modifier {
            modifier.modify(&mut desc);
        }
        let mask = resolve_stage_mask(self.layout, stage_mask, normal_only);
        let key = self.pool.acquire(desc, pipe, processor, mask)?;
        self.added.push(key);
        Ok(key)
    }
}
