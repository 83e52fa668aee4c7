//! # Breeze Render
//!
//! Perspective scheduling and render queuing for the breeze engine.
//!
//! ## Features
//!
//! - **Rendering Pipeline**: layered stages and queues, pooled perspectives and
//!   a per-frame prepare/render cycle
//! - **Perspective Scheduling**: renderables request shadow and reflection
//!   viewpoints while they prepare; dependencies render first
//! - **Render Queues**: state-grouped or depth-sorted job ordering
//! - **Controllers**: double-buffered controller data rebuilt on structural
//!   change only
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use breeze_render::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut pipeline = RenderingPipeline::from_config("main", &PipelineConfig::default())?;
//!     let scenery = Rc::new(BasicScenery::new());
//!
//!     pipeline.clear_perspectives();
//!     pipeline.add_scenery(scenery);
//!     let camera = PerspectiveDesc::look_at(
//!         Vec3::new(0.0, 2.0, 10.0),
//!         Vec3::zeros(),
//!         Vec3::y(),
//!         1.0,
//!         16.0 / 9.0,
//!         0.1,
//!         500.0,
//!     );
//!     pipeline.add_perspective(camera, None, None, StageMask::EMPTY)?;
//!     pipeline.prepare()?;
//!
//!     let mut device = CommandRecorder::new();
//!     pipeline.render(&mut device);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod controllers;
pub mod foundation;
pub mod render;
pub mod scene;

/// Common imports for pipeline users
pub mod prelude {
    pub use crate::{
        config::{Config, PipelineConfig},
        controllers::{
            EffectDriver, Material, MaterialPass, MaterialTechnique, WaterConfig, WaterControllers,
            WaterDefaults, WaterRenderable,
        },
        foundation::math::{Plane, Sphere, Transform, Vec3},
        render::{
            pipeline::{
                PerspectiveScheduler, PipelineError, PipelineProcessor, PipelineResult,
                PipelineStageDesc, QueueId, QueueSetup, RenderJob, RenderQueueDesc,
                RenderingPipeline, StageId, StageMask,
            },
            CommandRecorder, DeviceContext, DrawCall, Perspective, PerspectiveDesc,
            PerspectiveFlags,
        },
        scene::{BasicScenery, PassFlags, Renderable, RenderableData, RenderablePass, Scenery},
    };
}
