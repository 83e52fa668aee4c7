//! # Water Controllers
//!
//! Controllers for water surfaces, kept in structure-of-arrays records and a
//! derived draw structure that is rebuilt only when the controller set
//! changes structurally.
//!
//! ## Double buffering
//!
//! Mutations only touch a staging copy of the records. Two [`ControllerData`]
//! buffers exist and renderers read the current one, so nothing drawn changes
//! until [`WaterControllers::commit`] builds the other buffer from the staging
//! records and swaps. A structural change (controller set, assets, flags)
//! rebuilds the draw structure; a surface parameter change only repacks the
//! instance constants of a copy. Committing twice without mutating in between
//! is free.
//!
//! ```text
//! mutate staging -> commit -> rebuild or refresh other buffer -> swap -> resync staging and handles
//! ```
//!
//! ## Draw structure
//!
//! After a rebuild, records are ordered active first, reflective first, then
//! by material and effect driver identity. Active controllers sharing a
//! material form one contiguous range, and each pass queue stores the range
//! of its passes per material, so drawing a material needs no per-controller
//! lookups.

use std::cmp::Ordering;
use std::sync::Arc;

use thiserror::Error;

use super::material::{asset_identity, EffectDriver, Material};
use crate::foundation::collections::{HandleMap, WaterHandle};
use crate::foundation::math::{Plane, Sphere, Transform, Vec4};
use crate::render::device::{DeviceContext, DrawCall};
use crate::render::pipeline::{QueueId, StageId};

/// Constant slot per-controller instance data is uploaded to
pub const INSTANCE_CONSTANT_SLOT: u32 = 2;

/// Constant slot perspective-local reflection bindings are uploaded to
pub const REFLECTION_CONSTANT_SLOT: u32 = 3;

/// Vertices of one water grid instance
pub const WATER_GRID_VERTICES: u32 = 6 * 64 * 64;

/// Floats per packed controller instance
pub const INSTANCE_FLOATS: usize = 24;

/// Packed per-controller shader constants
///
/// World matrix (column major), tint, wave scale, reflective flag, padding.
pub type InstanceConstants = [f32; INSTANCE_FLOATS];

/// Water controller errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaterError {
    /// The handle was removed or never issued by this controller set
    #[error("Invalid water controller handle {0:?}")]
    InvalidHandle(WaterHandle),
}

/// Result type for water controller operations
pub type WaterResult<T> = Result<T, WaterError>;

/// Per-controller surface parameters
#[derive(Debug, Clone, PartialEq)]
pub struct WaterConfig {
    /// Surface placement, the surface is the local XZ plane
    pub transform: Transform,
    /// Color tint (RGBA)
    pub tint: Vec4,
    /// Wave amplitude multiplier
    pub wave_scale: f32,
}

impl Default for WaterConfig {
    fn default() -> Self {
        Self {
            transform: Transform::default(),
            tint: Vec4::new(0.1, 0.3, 0.4, 0.8),
            wave_scale: 1.0,
        }
    }
}

impl WaterConfig {
    fn pack(&self, reflective: bool) -> InstanceConstants {
        let mut packed = [0.0; INSTANCE_FLOATS];
        packed[..16].copy_from_slice(self.transform.to_matrix().as_slice());
        packed[16..20].copy_from_slice(self.tint.as_slice());
        packed[20] = self.wave_scale;
        packed[21] = if reflective { 1.0 } else { 0.0 };
        packed
    }

    fn surface_plane(&self) -> Plane {
        Plane::from_point_normal(self.transform.position, self.transform.up())
    }

    fn bounds(&self) -> Sphere {
        let scale = self.transform.scale;
        Sphere::new(self.transform.position, scale.x.abs().max(scale.z.abs()) * std::f32::consts::SQRT_2)
    }
}

/// Shared assets new controllers start with
#[derive(Debug, Clone, Default)]
pub struct WaterDefaults {
    /// Default material
    pub material: Option<Arc<Material>>,
    /// Default effect driver
    pub effect_driver: Option<Arc<EffectDriver>>,
    /// Whether new controllers render reflections
    pub reflective: bool,
}

#[derive(Debug, Clone)]
struct ControllerState {
    material: Option<Arc<Material>>,
    driver: Option<Arc<EffectDriver>>,
    reflective: bool,
    attached: bool,
    removed: bool,
}

impl ControllerState {
    fn is_active(&self) -> bool {
        self.attached && !self.removed && self.material.is_some()
    }

    fn material_identity(&self) -> Option<usize> {
        self.material.as_ref().map(asset_identity)
    }

    fn driver_identity(&self) -> Option<usize> {
        self.driver.as_ref().map(asset_identity)
    }
}

/// Draw order of controllers: active, reflective, material, driver
fn compare_states(a: &ControllerState, b: &ControllerState) -> Ordering {
    b.is_active()
        .cmp(&a.is_active())
        .then_with(|| b.reflective.cmp(&a.reflective))
        .then_with(|| a.material_identity().cmp(&b.material_identity()))
        .then_with(|| a.driver_identity().cmp(&b.driver_identity()))
}

#[derive(Debug, Clone, Default)]
struct ControllerRecords {
    handles: Vec<WaterHandle>,
    configs: Vec<WaterConfig>,
    states: Vec<ControllerState>,
}

impl ControllerRecords {
    fn len(&self) -> usize {
        self.handles.len()
    }

    fn push(&mut self, handle: WaterHandle, config: WaterConfig, state: ControllerState) {
        self.handles.push(handle);
        self.configs.push(config);
        self.states.push(state);
    }

    fn clear(&mut self) {
        self.handles.clear();
        self.configs.clear();
        self.states.clear();
    }
}

/// One material pass inside a pass queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassRef {
    /// Index into the unique materials
    pub material: u32,
    /// Technique index within the material
    pub technique: u32,
    /// Pass index within the technique
    pub pass: u32,
}

/// Material passes rendering in one stage and queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassQueue {
    /// Pipeline stage
    pub stage: StageId,
    /// Render queue
    pub queue: QueueId,
    /// Lowest sort index among the passes
    pub sort_index: u32,
    /// Passes grouped by material
    pub passes: Vec<PassRef>,
    /// Start of each material's passes, plus a final entry equal to `passes.len()`
    pub material_offsets: Vec<u32>,
}

impl PassQueue {
    /// Passes of one unique material
    pub fn material_passes(&self, material: usize) -> &[PassRef] {
        match (self.material_offsets.get(material), self.material_offsets.get(material + 1)) {
            (Some(&start), Some(&end)) => &self.passes[start as usize..end as usize],
            _ => &[],
        }
    }
}

/// Which of the two buffers is current
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferSlot {
    /// First buffer
    #[default]
    A,
    /// Second buffer
    B,
}

impl BufferSlot {
    fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Result of [`WaterControllers::commit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Nothing changed, the current buffer stays current
    Unchanged,
    /// Only surface parameters changed; the other buffer holds the same
    /// structure with repacked constants and is now current
    Refreshed,
    /// The other buffer was rebuilt and is now current
    Rebuilt,
}

/// One of the two controller buffers
#[derive(Debug, Clone, Default)]
struct ControllerData {
    records: ControllerRecords,
    structure_revision: u64,
    config_revision: u64,

    /// Unique materials of the active controllers, in draw order
    materials: Vec<Arc<Material>>,
    /// Unique material index per active controller
    material_index: Vec<u32>,
    /// Start of each material's controller range, plus `active_count`
    material_controllers: Vec<u32>,
    active_count: usize,
    /// Leading active controllers that are reflective
    reflective_count: usize,

    pass_queues: Vec<PassQueue>,
    /// Packed constants of the active controllers
    instances: Option<Vec<InstanceConstants>>,
}

impl ControllerData {
    /// Rebuild this buffer from the records of `source`
    fn rebuild_from(&mut self, source: &ControllerRecords, revision: u64) {
        let mut order: Vec<usize> = (0..source.len())
            .filter(|&index| !source.states[index].removed)
            .collect();
        order.sort_by(|&a, &b| compare_states(&source.states[a], &source.states[b]));

        self.records.clear();
        for &index in &order {
            self.records.push(
                source.handles[index],
                source.configs[index].clone(),
                source.states[index].clone(),
            );
        }

        self.link_materials();
        self.build_pass_queues();

        self.reflective_count = self.records.states[..self.active_count]
            .iter()
            .take_while(|state| state.reflective)
            .count();
        self.pack_instances();
        self.structure_revision = revision;
    }

    /// Copy the structure of `source` with new surface parameters
    ///
    /// `configs` must be in the record order of `source`.
    fn refresh_from(&mut self, source: &Self, configs: &[WaterConfig]) {
        self.clone_from(source);
        self.records.configs.clear();
        self.records.configs.extend_from_slice(configs);
        self.pack_instances();
    }

    fn pack_instances(&mut self) {
        self.instances = Some(
            self.records.configs[..self.active_count]
                .iter()
                .zip(&self.records.states)
                .map(|(config, state)| config.pack(state.reflective))
                .collect(),
        );
    }

    /// Compress adjacent equal materials over the active prefix
    fn link_materials(&mut self) {
        self.materials.clear();
        self.material_index.clear();
        self.material_controllers.clear();
        self.active_count = 0;

        for (index, state) in self.records.states.iter().enumerate() {
            // Sorted: the first inactive controller ends the active prefix
            let Some(material) = state.material.as_ref().filter(|_| state.is_active()) else {
                break;
            };

            let same = self
                .materials
                .last()
                .is_some_and(|last| Arc::ptr_eq(last, material));
            if !same {
                self.materials.push(material.clone());
                self.material_controllers.push(index as u32);
            }
            self.material_index.push(self.materials.len() as u32 - 1);
            self.active_count += 1;
        }
        self.material_controllers.push(self.active_count as u32);
    }

    /// Bucket every pass of every unique material by stage and queue
    fn build_pass_queues(&mut self) {
        self.pass_queues.clear();

        for material in &self.materials {
            for technique in material.techniques() {
                for pass in &technique.passes {
                    let exists = self
                        .pass_queues
                        .iter()
                        .any(|queue| queue.stage == pass.stage && queue.queue == pass.queue);
                    if !exists {
                        self.pass_queues.push(PassQueue {
                            stage: pass.stage,
                            queue: pass.queue,
                            sort_index: pass.sort_index,
                            passes: Vec::new(),
                            material_offsets: Vec::with_capacity(self.materials.len() + 1),
                        });
                    }
                }
            }
        }

        for (material_idx, material) in self.materials.iter().enumerate() {
            for queue in &mut self.pass_queues {
                queue.material_offsets.push(queue.passes.len() as u32);
            }
            for (technique_idx, technique) in material.techniques().iter().enumerate() {
                for (pass_idx, pass) in technique.passes.iter().enumerate() {
                    let queue = self
                        .pass_queues
                        .iter_mut()
                        .find(|queue| queue.stage == pass.stage && queue.queue == pass.queue);
                    if let Some(queue) = queue {
                        queue.sort_index = queue.sort_index.min(pass.sort_index);
                        queue.passes.push(PassRef {
                            material: material_idx as u32,
                            technique: technique_idx as u32,
                            pass: pass_idx as u32,
                        });
                    }
                }
            }
        }

        for queue in &mut self.pass_queues {
            queue.material_offsets.push(queue.passes.len() as u32);
        }
    }

    /// Drop state only the current buffer needs
    fn retire(&mut self) {
        self.records.clear();
        self.instances = None;
    }
}

/// Set of water surface controllers
#[derive(Debug)]
pub struct WaterControllers {
    buffers: [ControllerData; 2],
    current: BufferSlot,
    /// Records as mutated since the last commit, in current buffer order
    /// followed by controllers added since
    staging: ControllerRecords,
    /// Index into `staging` per live handle
    handles: HandleMap<WaterHandle, usize>,
    defaults: WaterDefaults,
    controller_revision: u64,
    config_revision: u64,
    generation: u64,
    rebuild_count: u64,
}

impl WaterControllers {
    /// Create an empty controller set
    pub fn new(defaults: WaterDefaults) -> Self {
        Self {
            buffers: [ControllerData::default(), ControllerData::default()],
            current: BufferSlot::default(),
            staging: ControllerRecords::default(),
            handles: HandleMap::with_key(),
            defaults,
            controller_revision: 0,
            config_revision: 0,
            generation: 0,
            rebuild_count: 0,
        }
    }

    fn data(&self) -> &ControllerData {
        &self.buffers[self.current.index()]
    }

    fn index(&self, handle: WaterHandle) -> WaterResult<usize> {
        self.handles
            .get(handle)
            .copied()
            .ok_or(WaterError::InvalidHandle(handle))
    }

    fn state_mut(&mut self, handle: WaterHandle) -> WaterResult<&mut ControllerState> {
        let index = self.index(handle)?;
        Ok(&mut self.staging.states[index])
    }

    fn touch(&mut self) {
        self.controller_revision += 1;
    }

    /// Add an attached controller using the default assets
    pub fn add_controller(&mut self, config: WaterConfig) -> WaterHandle {
        let state = ControllerState {
            material: self.defaults.material.clone(),
            driver: self.defaults.effect_driver.clone(),
            reflective: self.defaults.reflective,
            attached: true,
            removed: false,
        };
        let index = self.staging.len();
        let handle = self.handles.insert(index);
        self.staging.push(handle, config, state);
        self.touch();
        handle
    }

    /// Remove a controller, its record is dropped by the next commit
    pub fn remove_controller(&mut self, handle: WaterHandle) -> WaterResult<()> {
        self.state_mut(handle)?.removed = true;
        self.handles.remove(handle);
        self.touch();
        Ok(())
    }

    /// Change a controller's material
    pub fn set_material(&mut self, handle: WaterHandle, material: Option<Arc<Material>>) -> WaterResult<()> {
        self.state_mut(handle)?.material = material;
        self.touch();
        Ok(())
    }

    /// Change a controller's effect driver
    pub fn set_effect_driver(
        &mut self,
        handle: WaterHandle,
        driver: Option<Arc<EffectDriver>>,
    ) -> WaterResult<()> {
        self.state_mut(handle)?.driver = driver;
        self.touch();
        Ok(())
    }

    /// Enable or disable reflections
    pub fn set_reflective(&mut self, handle: WaterHandle, reflective: bool) -> WaterResult<()> {
        self.state_mut(handle)?.reflective = reflective;
        self.touch();
        Ok(())
    }

    /// Include a controller in rendering
    pub fn attach(&mut self, handle: WaterHandle) -> WaterResult<()> {
        self.state_mut(handle)?.attached = true;
        self.touch();
        Ok(())
    }

    /// Exclude a controller from rendering
    pub fn detach(&mut self, handle: WaterHandle) -> WaterResult<()> {
        self.state_mut(handle)?.attached = false;
        self.touch();
        Ok(())
    }

    /// Replace a controller's surface parameters
    ///
    /// Not a structural change: the next commit repacks constants without
    /// rebuilding the draw structure.
    pub fn set_config(&mut self, handle: WaterHandle, config: WaterConfig) -> WaterResult<()> {
        let index = self.index(handle)?;
        self.staging.configs[index] = config;
        self.config_revision += 1;
        Ok(())
    }

    /// Publish staged changes to renderers
    ///
    /// Structural changes rebuild the other buffer from the staging records;
    /// surface parameter changes alone refresh a copy of the current one.
    /// Either way the other buffer becomes current.
    pub fn commit(&mut self) -> CommitOutcome {
        let revision = self.controller_revision;
        let config_revision = self.config_revision;
        let data = self.data();
        let outcome = if data.structure_revision != revision {
            CommitOutcome::Rebuilt
        } else if data.config_revision != config_revision {
            CommitOutcome::Refreshed
        } else {
            return CommitOutcome::Unchanged;
        };

        let retired = self.current;
        {
            let Self { buffers, staging, .. } = self;
            let [a, b] = buffers;
            let (current, next) = match retired {
                BufferSlot::A => (&*a, b),
                BufferSlot::B => (&*b, a),
            };
            if outcome == CommitOutcome::Rebuilt {
                next.rebuild_from(staging, revision);
            } else {
                next.refresh_from(current, &staging.configs);
            }
            next.config_revision = config_revision;
        }
        self.current = retired.other();
        self.buffers[retired.index()].retire();
        self.generation += 1;

        if outcome == CommitOutcome::Rebuilt {
            // Records were permuted and removals dropped, restage them and
            // point every handle at its new position
            let Self { buffers, current, staging, handles, .. } = self;
            staging.clone_from(&buffers[current.index()].records);
            for (index, handle) in staging.handles.iter().enumerate() {
                if let Some(slot) = handles.get_mut(*handle) {
                    *slot = index;
                }
            }

            self.rebuild_count += 1;
            let data = self.data();
            log::debug!(
                "Rebuilt water controllers at revision {}: {} active, {} materials, {} pass queues",
                revision,
                data.active_count,
                data.materials.len(),
                data.pass_queues.len()
            );
        } else {
            log::trace!("Refreshed water controller constants at config revision {}", config_revision);
        }
        outcome
    }

    /// Material of a controller, including uncommitted changes
    pub fn material(&self, handle: WaterHandle) -> Option<&Arc<Material>> {
        let index = self.index(handle).ok()?;
        self.staging.states[index].material.as_ref()
    }

    /// Effect driver of a controller, including uncommitted changes
    pub fn effect_driver(&self, handle: WaterHandle) -> Option<&Arc<EffectDriver>> {
        let index = self.index(handle).ok()?;
        self.staging.states[index].driver.as_ref()
    }

    /// Surface parameters of a controller, including uncommitted changes
    pub fn config(&self, handle: WaterHandle) -> Option<&WaterConfig> {
        let index = self.index(handle).ok()?;
        self.staging.configs.get(index)
    }

    /// Whether a controller is attached
    pub fn is_attached(&self, handle: WaterHandle) -> bool {
        self.index(handle)
            .is_ok_and(|index| self.staging.states[index].attached)
    }

    /// Whether a controller renders reflections
    pub fn is_reflective(&self, handle: WaterHandle) -> bool {
        self.index(handle)
            .is_ok_and(|index| self.staging.states[index].reflective)
    }

    /// Number of live controllers
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether there are no live controllers
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Buffer renderers currently read
    pub fn current_slot(&self) -> BufferSlot {
        self.current
    }

    /// Controller revision stamped into the current buffer
    pub fn structure_revision(&self) -> u64 {
        self.data().structure_revision
    }

    /// Live controller revision
    pub fn controller_revision(&self) -> u64 {
        self.controller_revision
    }

    /// Number of commits that changed the current buffer
    ///
    /// Advances on rebuilds and on surface parameter refreshes alike.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of rebuilds so far
    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }

    /// Number of controllers drawn
    pub fn active_count(&self) -> usize {
        self.data().active_count
    }

    /// Number of leading active controllers that render reflections
    pub fn reflective_count(&self) -> usize {
        self.data().reflective_count
    }

    /// Unique materials of the drawn controllers
    pub fn unique_materials(&self) -> &[Arc<Material>] {
        &self.data().materials
    }

    /// Controller range `[start, end)` of a unique material
    pub fn material_controllers(&self, material: usize) -> Option<(usize, usize)> {
        let offsets = &self.data().material_controllers;
        Some((*offsets.get(material)? as usize, *offsets.get(material + 1)? as usize))
    }

    /// Unique material index of a drawn controller
    pub fn controller_material(&self, index: usize) -> Option<usize> {
        self.data().material_index.get(index).map(|&material| material as usize)
    }

    /// Pass queues of the current buffer
    pub fn pass_queues(&self) -> &[PassQueue] {
        &self.data().pass_queues
    }

    /// Controller handles in current buffer order
    pub fn controller_order(&self) -> &[WaterHandle] {
        &self.data().records.handles
    }

    /// Packed constants of the drawn controllers
    pub fn instances(&self) -> &[InstanceConstants] {
        self.data().instances.as_deref().unwrap_or(&[])
    }

    /// Reflection plane of a drawn controller
    pub fn surface_plane(&self, index: usize) -> Option<Plane> {
        let data = self.data();
        (index < data.active_count).then(|| data.records.configs[index].surface_plane())
    }

    /// Bounds of one drawn controller
    pub fn surface_bounds(&self, index: usize) -> Option<Sphere> {
        let data = self.data();
        (index < data.active_count).then(|| data.records.configs[index].bounds())
    }

    /// Bounds of all drawn controllers
    pub fn bounds(&self) -> Sphere {
        let data = self.data();
        data.records.configs[..data.active_count]
            .iter()
            .map(WaterConfig::bounds)
            .reduce(|merged, bounds| merged.merged(&bounds))
            .unwrap_or_default()
    }

    /// Draw every material pass of one pass queue
    ///
    /// Controllers are drawn instanced, one draw per run of controllers
    /// sharing a material and effect driver. Each run's constants are
    /// uploaded on their own, so instances are numbered from zero within the
    /// run. `reflections` is uploaded once before the first draw when
    /// non-empty.
    pub fn render_queue(&self, queue: usize, reflections: &[u8], context: &mut dyn DeviceContext) {
        let data = self.data();
        let Some(pass_queue) = data.pass_queues.get(queue) else {
            return;
        };
        let instances = data.instances.as_deref().unwrap_or(&[]);

        if !reflections.is_empty() {
            context.set_constants(REFLECTION_CONSTANT_SLOT, reflections);
        }

        for (material_idx, material) in data.materials.iter().enumerate() {
            let passes = pass_queue.material_passes(material_idx);
            let Some((start, end)) = self.material_controllers(material_idx) else {
                continue;
            };
            if passes.is_empty() || start == end {
                continue;
            }

            for pass in passes {
                material.bind(pass.technique, pass.pass, context);

                let states = &data.records.states[start..end];
                let mut run_start = start;
                for (offset, state) in states.iter().enumerate() {
                    let index = start + offset;
                    let run_end = index + 1;
                    let next_driver = states.get(offset + 1).map(ControllerState::driver_identity);
                    if next_driver == Some(state.driver_identity()) {
                        continue;
                    }

                    if let Some(driver) = &state.driver {
                        driver.bind(context);
                    }
                    if let Some(run) = instances.get(run_start..run_end) {
                        context.set_constants(INSTANCE_CONSTANT_SLOT, bytemuck::cast_slice(run));
                    }
                    context.draw(DrawCall {
                        vertex_count: WATER_GRID_VERTICES,
                        instance_count: (run_end - run_start) as u32,
                        first_instance: 0,
                    });
                    run_start = run_end;
                }
            }
        }
    }
}
