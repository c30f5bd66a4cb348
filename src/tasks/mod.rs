//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a cache is hosted.
//!
//! # Tasks
//! - Maintenance: expiration scan plus advisor-driven trimming

mod maintenance;

pub use maintenance::spawn_maintenance_task;
