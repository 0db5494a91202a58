/// Vertex layouts and indexed multi-draw commands

use bytemuck::{Pod, Zeroable};

/// Vertex format of the bound vertex cache, fixed per program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexLayoutKind {
    /// Full surface vertices (`DrawVertex`)
    Draw,
    /// Homogeneous shadow volume vertices (`ShadowVertex`)
    Shadow,
    /// No vertex input (fullscreen passes generate positions in the shader)
    None,
}

impl VertexLayoutKind {
    /// Stride in bytes of one vertex
    pub fn stride(&self) -> u32 {
        match self {
            VertexLayoutKind::Draw => std::mem::size_of::<DrawVertex>() as u32,
            VertexLayoutKind::Shadow => std::mem::size_of::<ShadowVertex>() as u32,
            VertexLayoutKind::None => 0,
        }
    }
}

/// Surface vertex as stored in the vertex caches
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DrawVertex {
    pub position: [f32; 3],
    pub st: [f32; 2],
    pub normal: [f32; 3],
    /// xyz tangent, w bitangent sign
    pub tangent: [f32; 4],
    pub color: [u8; 4],
    pub _pad: [u32; 3],
}

/// Shadow volume vertex, w = 0 for vertices extruded to infinity
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ShadowVertex {
    pub position: [f32; 4],
}

/// Index element size used by every cache
pub const INDEX_SIZE: u32 = std::mem::size_of::<u32>() as u32;

/// One indexed draw inside a multi-draw submission
///
/// `draw_id` is delivered to shaders as the base instance; programs use it
/// to index the per-draw parameter array of the current batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawElementsCommand {
    pub index_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub draw_id: u32,
}
