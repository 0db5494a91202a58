/// Buffer - Vulkan implementation of the backend Buffer trait
///
/// Every buffer lives in host-visible memory that stays mapped for its whole
/// lifetime, so `update` is a plain copy into the mapping.

use umbra_backend::umbra::{Error, Result};
use umbra_backend::umbra::device::Buffer as BackendBuffer;
use umbra_backend::{engine_bail, engine_error};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

/// Vulkan buffer implementation
pub struct Buffer {
    /// Shared GPU context (device, allocator)
    ctx: Arc<GpuContext>,
    /// Debug name
    name: String,
    /// Vulkan buffer
    pub(crate) buffer: vk::Buffer,
    /// GPU memory allocation
    pub(crate) allocation: Option<Allocation>,
    /// Buffer size
    pub(crate) size: u64,
}

impl Buffer {
    pub fn new(
        ctx: Arc<GpuContext>,
        name: &str,
        buffer: vk::Buffer,
        allocation: Allocation,
        size: u64,
    ) -> Self {
        Self {
            ctx,
            name: name.to_string(),
            buffer,
            allocation: Some(allocation),
            size,
        }
    }
}

impl BackendBuffer for Buffer {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.size {
            engine_bail!("umbra::vulkan", "Write of {} bytes at {} overflows buffer '{}' ({} bytes)",
                data.len(), offset, self.name, self.size);
        }

        let Some(allocation) = &self.allocation else {
            engine_error!("umbra::vulkan", "Buffer update failed: no GPU allocation");
            return Err(Error::BackendError("Buffer has no allocation".to_string()));
        };

        let mapped_ptr = allocation
            .mapped_ptr()
            .ok_or_else(|| Error::BackendError("Buffer is not CPU-accessible".to_string()))?
            .as_ptr() as *mut u8;

        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                mapped_ptr.add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }
}

/// Buffers handed to this device were created by it
pub(crate) fn as_vulkan(buffer: &dyn BackendBuffer) -> &Buffer {
    unsafe { &*(buffer as *const dyn BackendBuffer as *const Buffer) }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            // Free GPU memory
            if let Some(allocation) = self.allocation.take() {
                // Don't panic if lock fails - we still need to destroy the buffer
                if let Ok(mut allocator) = self.ctx.allocator.lock() {
                    allocator.free(allocation).ok();
                }
            }

            self.ctx.device.destroy_buffer(self.buffer, None);
        }
    }
}
