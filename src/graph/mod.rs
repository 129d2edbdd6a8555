//! Prerequisite graph: offline builder and the in-memory snapshot cache.

pub mod builder;
pub mod cache;
