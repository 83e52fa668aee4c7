//! Pipeline error types

/// Errors raised while setting up or scheduling a rendering pipeline
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// More perspectives requested in one frame than the pool allows
    #[error("Perspective limit exceeded: at most {max} perspectives may be active")]
    PerspectiveLimit {
        /// Configured maximum
        max: usize,
    },

    /// More stages registered than a stage mask can address
    #[error("Cannot register stage '{name}': at most {max} pipeline stages are supported")]
    StageLimit {
        /// Name of the rejected stage
        name: String,
        /// Supported maximum
        max: usize,
    },
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
