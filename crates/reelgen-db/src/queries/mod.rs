//! Query modules, one per entity.

pub mod assets;
pub mod jobs;
pub mod usage;
