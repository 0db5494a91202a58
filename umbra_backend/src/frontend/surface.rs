/// Draw surfaces handed over by the frontend
///
/// Surfaces are read-only input. The backend never mutates them; stages only
/// read fields to fill per-draw parameters.

use std::sync::Arc;
use glam::{Mat4, Vec4};

use crate::graphics_device::Rect2D;
use super::material::Material;

/// Which vertex cache a handle points into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheClass {
    /// Level geometry uploaded once
    Static,
    /// Geometry regenerated every frame (skinned models, particles)
    Frame,
}

/// Storage classes of a surface's vertices and indices
///
/// Both usually match, but per-frame index data over static vertices (and
/// the reverse) is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheClasses {
    pub vertices: CacheClass,
    pub indices: CacheClass,
}

/// Location of vertex or index data inside a vertex cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexCacheHandle {
    pub class: CacheClass,
    /// Byte offset inside the cache buffer
    pub offset: u64,
    /// Byte size; 0 marks an invalid handle
    pub size: u64,
}

impl VertexCacheHandle {
    pub const INVALID: VertexCacheHandle = VertexCacheHandle { class: CacheClass::Static, offset: 0, size: 0 };

    pub fn new(class: CacheClass, offset: u64, size: u64) -> Self {
        Self { class, offset, size }
    }

    pub fn is_valid(&self) -> bool {
        self.size > 0
    }
}

/// Transform space of one rendered entity
#[derive(Debug, Clone, PartialEq)]
pub struct ViewEntity {
    pub entity_num: u32,
    pub model_matrix: Mat4,
    pub model_view_matrix: Mat4,
    /// First-person weapon: depth range squeezed toward the near plane
    pub weapon_depth_hack: bool,
    /// Depth offset applied to this entity's projection (0 = none)
    pub model_depth_hack: f32,
    /// Outline color when the entity is highlighted
    pub highlight: Option<Vec4>,
}

impl ViewEntity {
    pub fn new(entity_num: u32, model_matrix: Mat4, world_to_view: Mat4) -> Self {
        Self {
            entity_num,
            model_matrix,
            model_view_matrix: world_to_view * model_matrix,
            weapon_depth_hack: false,
            model_depth_hack: 0.0,
            highlight: None,
        }
    }
}

/// One drawable: material, transform and geometry
#[derive(Debug, Clone)]
pub struct DrawSurface {
    pub material: Arc<Material>,
    pub space: Arc<ViewEntity>,
    pub vertex_cache: VertexCacheHandle,
    pub index_cache: VertexCacheHandle,
    pub num_indices: u32,
    /// Screen-space bounds of the surface
    pub scissor: Rect2D,
    /// Evaluated material registers, indexed by the material stages
    pub shader_registers: Arc<[f32]>,
}

impl DrawSurface {
    /// Both caches valid and something to draw
    pub fn has_valid_caches(&self) -> bool {
        self.vertex_cache.is_valid() && self.index_cache.is_valid() && self.num_indices > 0
    }

    /// Storage classes used to pick the vertex and index buffers
    pub fn cache_classes(&self) -> CacheClasses {
        CacheClasses { vertices: self.vertex_cache.class, indices: self.index_cache.class }
    }

    /// Register value, 0.0 when out of range
    pub fn register(&self, index: usize) -> f32 {
        self.shader_registers.get(index).copied().unwrap_or(0.0)
    }

    /// Four consecutive registers named by `indices`
    pub fn register4(&self, indices: [usize; 4]) -> Vec4 {
        Vec4::new(
            self.register(indices[0]),
            self.register(indices[1]),
            self.register(indices[2]),
            self.register(indices[3]),
        )
    }
}
