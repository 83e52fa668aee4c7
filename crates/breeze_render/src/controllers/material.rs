//! Materials and effect drivers referenced by renderable controllers
//!
//! Both are immutable shared assets handed around as `Arc`s. Controllers
//! group by asset identity, i.e. the `Arc` allocation, not by value.

use std::sync::Arc;

use crate::render::device::{DeviceContext, PassBinding};
use crate::render::pipeline::{QueueId, StageId};

/// Constant slot effect drivers upload their parameters to
pub const DRIVER_CONSTANT_SLOT: u32 = 1;

/// Identity of a shared asset, the address of its `Arc` allocation
pub fn asset_identity<T>(asset: &Arc<T>) -> usize {
    Arc::as_ptr(asset) as usize
}

/// One pass of a material technique and where it renders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialPass {
    /// Pipeline stage
    pub stage: StageId,
    /// Render queue
    pub queue: QueueId,
    /// State-grouping key
    pub sort_index: u32,
}

impl MaterialPass {
    /// Create a new pass
    pub fn new(stage: StageId, queue: QueueId, sort_index: u32) -> Self {
        Self {
            stage,
            queue,
            sort_index,
        }
    }
}

/// Ordered passes of one technique
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialTechnique {
    /// Technique name
    pub name: String,
    /// Passes in draw order
    pub passes: Vec<MaterialPass>,
}

impl MaterialTechnique {
    /// Create an empty technique
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passes: Vec::new(),
        }
    }

    /// Append a pass
    pub fn with_pass(mut self, pass: MaterialPass) -> Self {
        self.passes.push(pass);
        self
    }
}

/// Material: an effect and the techniques drawing with it
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    name: String,
    effect: String,
    techniques: Vec<MaterialTechnique>,
}

impl Material {
    /// Create a material without techniques
    pub fn new(name: impl Into<String>, effect: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            effect: effect.into(),
            techniques: Vec::new(),
        }
    }

    /// Append a technique
    pub fn with_technique(mut self, technique: MaterialTechnique) -> Self {
        self.techniques.push(technique);
        self
    }

    /// Material name for debugging
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the effect the passes bind
    pub fn effect(&self) -> &str {
        &self.effect
    }

    /// Techniques in declaration order
    pub fn techniques(&self) -> &[MaterialTechnique] {
        &self.techniques
    }

    /// Total number of passes over all techniques
    pub fn pass_count(&self) -> usize {
        self.techniques.iter().map(|technique| technique.passes.len()).sum()
    }

    /// Bind one pass of this material
    pub fn bind(&self, technique: u32, pass: u32, context: &mut dyn DeviceContext) {
        context.bind_pass(&PassBinding {
            effect: &self.effect,
            technique,
            pass,
        });
    }
}

/// Effect driver: per-effect parameters uploaded before its controllers draw
#[derive(Debug, Clone, PartialEq)]
pub struct EffectDriver {
    name: String,
    parameters: Vec<f32>,
}

impl EffectDriver {
    /// Create a driver with the given parameter block
    pub fn new(name: impl Into<String>, parameters: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }

    /// Driver name for debugging
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter block
    pub fn parameters(&self) -> &[f32] {
        &self.parameters
    }

    /// Upload the parameter block
    pub fn bind(&self, context: &mut dyn DeviceContext) {
        context.set_constants(DRIVER_CONSTANT_SLOT, bytemuck::cast_slice(self.parameters.as_slice()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::{CommandRecorder, DeviceCommand};

    #[test]
    fn test_identity_follows_allocation() {
        let a = Arc::new(Material::new("Water", "water.fx"));
        let b = Arc::new(Material::new("Water", "water.fx"));

        assert_eq!(*a, *b);
        assert_ne!(asset_identity(&a), asset_identity(&b));
        assert_eq!(asset_identity(&a), asset_identity(&a.clone()));
    }

    #[test]
    fn test_pass_count_spans_techniques() {
        let pass = MaterialPass::new(StageId::default(), QueueId::default(), 0);
        let material = Material::new("Water", "water.fx")
            .with_technique(MaterialTechnique::new("Surface").with_pass(pass).with_pass(pass))
            .with_technique(MaterialTechnique::new("Depth").with_pass(pass));
        assert_eq!(material.pass_count(), 3);
    }

    #[test]
    fn test_driver_uploads_parameters() {
        let driver = EffectDriver::new("Waves", vec![1.0, 0.5]);
        let mut recorder = CommandRecorder::new();
        driver.bind(&mut recorder);

        let expected: Vec<u8> = [1.0_f32, 0.5]
            .iter()
            .flat_map(|value| value.to_ne_bytes())
            .collect();
        assert_eq!(
            recorder.commands(),
            &[DeviceCommand::SetConstants {
                slot: DRIVER_CONSTANT_SLOT,
                data: expected,
            }]
        );
    }
}
