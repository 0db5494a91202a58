//! Frontend input types
//!
//! Read-only data produced by scene traversal each frame: surfaces,
//! materials, views and lights.

pub mod surface;
pub mod material;
pub mod view;
pub mod vertex_cache;

pub use surface::{CacheClass, CacheClasses, VertexCacheHandle, ViewEntity, DrawSurface};
pub use material::{Coverage, Material, MaterialStage, StageLighting, sort};
pub use view::{LightKind, ViewLight, ViewDef};
pub use vertex_cache::{CacheBuffers, VertexCacheBuffers};

// Builders shared by unit tests
#[cfg(test)]
pub mod test_surfaces;

#[cfg(test)]
#[path = "frontend_tests.rs"]
mod tests;
