//! # Stage and Queue Registry
//!
//! Stages and queues are registered once by name and receive dense ids in
//! registration order. Draw order is decided by the declared layer instead:
//! every registration rebuilds the layer-sorted order and each id's slot in
//! it.
//!
//! ## Registration rules
//!
//! - Same name, same description: silent no-op, the existing id is returned
//! - Same name, different description: logged as an error, the first
//!   registration wins and its id is returned
//! - Equal layers keep registration order

use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::rc::Rc;

use super::callbacks::QueueSetup;
use super::error::{PipelineError, PipelineResult};

/// Maximum number of stages, bounded by the width of [`StageMask`]
pub const MAX_STAGE_COUNT: usize = 64;

/// Dense id of a registered pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StageId(u32);

impl StageId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position in registration order
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Dense id of a registered render queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct QueueId(u32);

impl QueueId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position in registration order
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Set of stages, one bit per stage id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StageMask(u64);

impl StageMask {
    /// No stages
    pub const EMPTY: Self = Self(0);
    /// Every stage
    pub const ALL: Self = Self(u64::MAX);

    /// Mask containing a single stage
    pub const fn of(stage: StageId) -> Self {
        Self(1 << stage.0)
    }

    /// Mask with `stage` added
    pub const fn with(self, stage: StageId) -> Self {
        Self(self.0 | (1 << stage.0))
    }

    /// Whether `stage` is part of the mask
    pub const fn contains(self, stage: StageId) -> bool {
        self.0 & (1 << stage.0) != 0
    }

    /// Whether no stage is part of the mask
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Raw bits
    pub const fn bits(self) -> u64 {
        self.0
    }
}

impl BitOr for StageMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for StageMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl FromIterator<StageId> for StageMask {
    fn from_iter<I: IntoIterator<Item = StageId>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

fn same_setup(a: &Option<Rc<dyn QueueSetup>>, b: &Option<Rc<dyn QueueSetup>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => std::ptr::eq(
            Rc::as_ptr(a).cast::<()>(),
            Rc::as_ptr(b).cast::<()>(),
        ),
        (None, None) => true,
        _ => false,
    }
}

/// Description of a pipeline stage
#[derive(Clone, Default)]
pub struct PipelineStageDesc {
    /// Draw-order layer, lower layers render first
    pub layer: i32,
    /// Part of the default stage mask
    pub normal: bool,
    /// Invoked once per perspective before the stage's first populated queue
    pub setup: Option<Rc<dyn QueueSetup>>,
}

impl PipelineStageDesc {
    /// Create a stage description without setup callback
    pub fn new(layer: i32, normal: bool) -> Self {
        Self {
            layer,
            normal,
            setup: None,
        }
    }

    /// Attach a setup callback
    pub fn with_setup(mut self, setup: Rc<dyn QueueSetup>) -> Self {
        self.setup = Some(setup);
        self
    }
}

impl PartialEq for PipelineStageDesc {
    fn eq(&self, other: &Self) -> bool {
        self.layer == other.layer
            && self.normal == other.normal
            && same_setup(&self.setup, &other.setup)
    }
}

impl fmt::Debug for PipelineStageDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStageDesc")
            .field("layer", &self.layer)
            .field("normal", &self.normal)
            .field("setup", &self.setup.is_some())
            .finish()
    }
}

/// Description of a render queue
#[derive(Clone, Default)]
pub struct RenderQueueDesc {
    /// Draw-order layer within a stage, lower layers render first
    pub layer: i32,
    /// Order jobs by camera distance instead of sort index
    pub depth_sort: bool,
    /// Invoked before the queue's jobs render
    pub setup: Option<Rc<dyn QueueSetup>>,
}

impl RenderQueueDesc {
    /// Create a queue description without setup callback
    pub fn new(layer: i32, depth_sort: bool) -> Self {
        Self {
            layer,
            depth_sort,
            setup: None,
        }
    }

    /// Attach a setup callback
    pub fn with_setup(mut self, setup: Rc<dyn QueueSetup>) -> Self {
        self.setup = Some(setup);
        self
    }
}

impl PartialEq for RenderQueueDesc {
    fn eq(&self, other: &Self) -> bool {
        self.layer == other.layer
            && self.depth_sort == other.depth_sort
            && same_setup(&self.setup, &other.setup)
    }
}

impl fmt::Debug for RenderQueueDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderQueueDesc")
            .field("layer", &self.layer)
            .field("depth_sort", &self.depth_sort)
            .field("setup", &self.setup.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct Registered<D> {
    name: String,
    desc: D,
    slot: u32,
}

/// Insert `id` after every id whose layer is lower or equal, then renumber slots
fn insert_by_layer<D, Id: Copy>(
    order: &mut Vec<Id>,
    entries: &mut [Registered<D>],
    id: Id,
    index_of: impl Fn(Id) -> usize,
    layer_of: impl Fn(&D) -> i32,
) {
    let layer = layer_of(&entries[index_of(id)].desc);
    let position = order
        .iter()
        .position(|&other| layer_of(&entries[index_of(other)].desc) > layer)
        .unwrap_or(order.len());
    order.insert(position, id);

    for (slot, &ordered) in order.iter().enumerate() {
        entries[index_of(ordered)].slot = slot as u32;
    }
}

/// Registry of a pipeline's stages and queues
#[derive(Debug, Default)]
pub struct PipelineLayout {
    stages: Vec<Registered<PipelineStageDesc>>,
    queues: Vec<Registered<RenderQueueDesc>>,
    stage_order: Vec<StageId>,
    queue_order: Vec<QueueId>,
    normal_stages: StageMask,
}

impl PipelineLayout {
    /// Create an empty layout
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage, or return the id of the stage registered under `name`
    pub fn add_stage(&mut self, name: &str, desc: PipelineStageDesc) -> PipelineResult<StageId> {
        if let Some(id) = self.stage_id(name) {
            if self.stages[id.index()].desc != desc {
                log::error!(
                    "Pipeline stage '{}' re-registered with a different description ({:?} vs {:?}), keeping the first",
                    name,
                    self.stages[id.index()].desc,
                    desc
                );
            }
            return Ok(id);
        }

        if self.stages.len() >= MAX_STAGE_COUNT {
            return Err(PipelineError::StageLimit {
                name: name.to_string(),
                max: MAX_STAGE_COUNT,
            });
        }

        let id = StageId::new(self.stages.len());
        if desc.normal {
            self.normal_stages = self.normal_stages.with(id);
        }
        self.stages.push(Registered {
            name: name.to_string(),
            desc,
            slot: 0,
        });
        insert_by_layer(
            &mut self.stage_order,
            &mut self.stages,
            id,
            StageId::index,
            |desc| desc.layer,
        );

        log::debug!("Registered pipeline stage '{}' as {:?}", name, id);
        Ok(id)
    }

    /// Register a queue, or return the id of the queue registered under `name`
    pub fn add_queue(&mut self, name: &str, desc: RenderQueueDesc) -> QueueId {
        if let Some(id) = self.queue_id(name) {
            if self.queues[id.index()].desc != desc {
                log::error!(
                    "Render queue '{}' re-registered with a different description ({:?} vs {:?}), keeping the first",
                    name,
                    self.queues[id.index()].desc,
                    desc
                );
            }
            return id;
        }

        let id = QueueId::new(self.queues.len());
        self.queues.push(Registered {
            name: name.to_string(),
            desc,
            slot: 0,
        });
        insert_by_layer(
            &mut self.queue_order,
            &mut self.queues,
            id,
            QueueId::index,
            |desc| desc.layer,
        );

        log::debug!("Registered render queue '{}' as {:?}", name, id);
        id
    }

    /// Id of the stage registered under `name`
    pub fn stage_id(&self, name: &str) -> Option<StageId> {
        self.stages
            .iter()
            .position(|stage| stage.name == name)
            .map(StageId::new)
    }

    /// Id of the queue registered under `name`
    pub fn queue_id(&self, name: &str) -> Option<QueueId> {
        self.queues
            .iter()
            .position(|queue| queue.name == name)
            .map(QueueId::new)
    }

    /// Description of a stage
    pub fn stage_desc(&self, id: StageId) -> Option<&PipelineStageDesc> {
        self.stages.get(id.index()).map(|stage| &stage.desc)
    }

    /// Description of a queue
    pub fn queue_desc(&self, id: QueueId) -> Option<&RenderQueueDesc> {
        self.queues.get(id.index()).map(|queue| &queue.desc)
    }

    /// Name of a stage
    pub fn stage_name(&self, id: StageId) -> Option<&str> {
        self.stages.get(id.index()).map(|stage| stage.name.as_str())
    }

    /// Name of a queue
    pub fn queue_name(&self, id: QueueId) -> Option<&str> {
        self.queues.get(id.index()).map(|queue| queue.name.as_str())
    }

    /// Position of a stage in draw order
    pub fn stage_slot(&self, id: StageId) -> Option<u32> {
        self.stages.get(id.index()).map(|stage| stage.slot)
    }

    /// Position of a queue in draw order
    pub fn queue_slot(&self, id: QueueId) -> Option<u32> {
        self.queues.get(id.index()).map(|queue| queue.slot)
    }

    /// Stage drawn at `slot`
    pub fn stage_at_slot(&self, slot: u32) -> Option<StageId> {
        self.stage_order.get(slot as usize).copied()
    }

    /// Queue drawn at `slot`
    pub fn queue_at_slot(&self, slot: u32) -> Option<QueueId> {
        self.queue_order.get(slot as usize).copied()
    }

    /// Stage ids in draw order
    pub fn ordered_stage_ids(&self) -> &[StageId] {
        &self.stage_order
    }

    /// Queue ids in draw order
    pub fn ordered_queue_ids(&self) -> &[QueueId] {
        &self.queue_order
    }

    /// Number of registered stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Number of registered queues
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Mask of all stages registered as normal
    pub fn normal_stage_mask(&self) -> StageMask {
        self.normal_stages
    }
}
