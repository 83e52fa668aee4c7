//! # Rendering Pipeline Configuration
//!
//! Declares the stages and queues a [`RenderingPipeline`] is set up with, and
//! the limits of its perspective pool.
//!
//! ```toml
//! max_perspective_count = 32
//! heap_chunk_size = 65536
//!
//! [[stages]]
//! name = "Opaque"
//! layer = 0
//!
//! [[queues]]
//! name = "Sorted"
//! layer = 1
//! depth_sort = true
//! ```
//!
//! [`RenderingPipeline`]: crate::render::pipeline::RenderingPipeline

use serde::{Deserialize, Serialize};

use super::Config;
use crate::foundation::memory::DEFAULT_CHUNK_SIZE;

fn default_true() -> bool {
    true
}

/// A pipeline stage declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage name
    pub name: String,
    /// Draw-order layer, lower layers render first
    pub layer: i32,
    /// Whether the stage is part of the default stage mask
    #[serde(default = "default_true")]
    pub normal: bool,
}

/// A render queue declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Unique queue name
    pub name: String,
    /// Draw-order layer within a stage, lower layers render first
    pub layer: i32,
    /// Whether jobs are ordered by camera distance instead of sort index
    #[serde(default)]
    pub depth_sort: bool,
}

/// Rendering pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of perspectives active at the same time
    pub max_perspective_count: usize,
    /// Size of the first chunk of each perspective's data heap
    pub heap_chunk_size: usize,
    /// Stages registered on construction
    pub stages: Vec<StageConfig>,
    /// Queues registered on construction
    pub queues: Vec<QueueConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_perspective_count: 64,
            heap_chunk_size: DEFAULT_CHUNK_SIZE,
            stages: vec![
                StageConfig { name: "Opaque".into(), layer: 0, normal: true },
                StageConfig { name: "Transparent".into(), layer: 1, normal: true },
            ],
            queues: vec![
                QueueConfig { name: "Default".into(), layer: 0, depth_sort: false },
                QueueConfig { name: "Sorted".into(), layer: 1, depth_sort: true },
            ],
        }
    }
}

impl Config for PipelineConfig {}
