//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the crate:
//! - Math types and culling primitives
//! - Per-frame memory arenas
//! - Handle-based collections
//! - Logging utilities

pub mod math;
pub mod memory;
pub mod collections;
pub mod logging;
