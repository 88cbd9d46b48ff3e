//! Per-user locations and the registry index cache.

pub mod cache;
pub mod utils;
