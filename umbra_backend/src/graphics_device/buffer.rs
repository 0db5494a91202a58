/// Buffer trait and buffer descriptor

use crate::error::Result;

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex buffer
    Vertex,
    /// Index buffer
    Index,
    /// Uniform/constant buffer
    Uniform,
    /// Storage buffer
    Storage,
}

/// Indexed binding point a buffer range can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferBindingTarget {
    /// Uniform block binding
    Uniform,
    /// Shader storage block binding
    Storage,
}

/// Descriptor for creating a buffer
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Debug name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Buffer usage
    pub usage: BufferUsage,
    /// Keep the buffer mapped for its whole lifetime (CPU writes, GPU reads)
    pub persistent: bool,
}

/// Buffer resource trait
///
/// Implemented by backend-specific buffer types (e.g., VulkanBuffer).
/// The buffer is automatically destroyed when dropped.
pub trait Buffer: Send + Sync {
    /// Debug name given at creation
    fn name(&self) -> &str;

    /// Size in bytes
    fn size(&self) -> u64;

    /// Copy `data` into the buffer at `offset`
    ///
    /// For persistent buffers this writes straight into mapped memory; the
    /// caller is responsible for not touching ranges the GPU may still read.
    fn update(&self, offset: u64, data: &[u8]) -> Result<()>;
}

/// Round `value` up to the next multiple of `alignment` (power of two or not)
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
