//! # Rendering
//!
//! Perspectives, the device command boundary and the rendering pipeline.
//!
//! ## Architecture
//!
//! - **Perspective**: viewpoint description plus a per-frame data heap
//! - **DeviceContext**: the graphics API boundary draw calls are issued through
//! - **Pipeline**: stage/queue scheduling of renderable passes per perspective

pub mod device;
pub mod perspective;
pub mod pipeline;

pub use device::{CommandRecorder, DeviceCommand, DeviceContext, DrawCall, PassBinding, PipeId};
pub use perspective::{Perspective, PerspectiveDesc, PerspectiveFlags, PerspectiveId};
