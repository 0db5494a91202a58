/// GraphicsDevice trait - the command surface the backend drives
///
/// Every method takes `&self`: implementations serialize internally (the
/// Vulkan device keeps its recording state behind a mutex). Calls are
/// recorded in issue order and never reordered.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::graphics_device::{
    Attachment, AttachmentDesc, BlitMask, Buffer, BufferBindingTarget, BufferDesc,
    ClearValues, DrawElementsCommand, FenceId, FenceStatus, Framebuffer, FramebufferDesc,
    FramebufferStatus, Program, Rect2D, RenderState, TextureHandle,
};

// ============================================================================
// Configuration, limits, statistics
// ============================================================================

/// Validation message verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugSeverity {
    ErrorsOnly,
    ErrorsAndWarnings,
    All,
}

/// Device creation configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Enable validation/debug layers
    pub enable_validation: bool,
    /// Validation messages forwarded to the engine log
    pub debug_severity: DebugSeverity,
    /// Application name
    pub app_name: String,
    /// Application version (major, minor, patch)
    pub app_version: (u32, u32, u32),
    /// Size of the presentation surface blits land on
    pub presentation_width: u32,
    pub presentation_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            debug_severity: DebugSeverity::ErrorsAndWarnings,
            app_name: "Umbra Application".to_string(),
            app_version: (1, 0, 0),
            presentation_width: 1280,
            presentation_height: 720,
        }
    }
}

/// Capabilities queried once by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Largest uniform block a program can declare, in bytes
    pub max_uniform_block_size: u64,
    /// Required alignment of bound uniform ranges
    pub uniform_buffer_offset_alignment: u64,
    /// Highest supported attachment sample count
    pub max_samples: u32,
    /// Textures can be referenced by handle from parameter data
    pub bindless_textures: bool,
    /// Number of texture units usable in one draw
    pub max_texture_units: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_uniform_block_size: 65536,
            uniform_buffer_offset_alignment: 256,
            max_samples: 8,
            bindless_textures: false,
            max_texture_units: 16,
        }
    }
}

/// Device-level counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Multi-draw submissions issued
    pub draw_submissions: u64,
    /// Individual draws inside those submissions
    pub draws: u64,
    /// Fences inserted
    pub fences_inserted: u64,
    /// GPU memory used (bytes)
    pub gpu_memory_used: u64,
}

// ============================================================================
// GraphicsDevice trait
// ============================================================================

/// Device abstraction implemented by each backend (Vulkan, test mocks)
pub trait GraphicsDevice: Send + Sync {
    /// Device capabilities
    fn limits(&self) -> DeviceLimits;

    // ===== Buffers =====

    /// Create a buffer (persistently mapped when `desc.persistent`)
    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>>;

    /// Bind `[offset, offset + size)` of `buffer` to an indexed binding point
    fn bind_buffer_range(
        &self,
        target: BufferBindingTarget,
        binding: u32,
        buffer: &Arc<dyn Buffer>,
        offset: u64,
        size: u64,
    ) -> Result<()>;

    // ===== Fences =====

    /// Insert a fence after every command issued so far
    fn insert_fence(&self) -> Result<FenceId>;

    /// Block up to `timeout` for the fence (zero timeout polls)
    fn client_wait_fence(&self, fence: FenceId, timeout: Duration) -> FenceStatus;

    /// Release a fence
    fn delete_fence(&self, fence: FenceId);

    // ===== Attachments and framebuffers =====

    fn create_attachment(&self, desc: &AttachmentDesc) -> Result<Arc<dyn Attachment>>;

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<Arc<dyn Framebuffer>>;

    /// Completeness of a framebuffer
    fn framebuffer_status(&self, framebuffer: &dyn Framebuffer) -> FramebufferStatus;

    /// Make `framebuffer` the draw destination (`None` = presentation surface)
    fn bind_framebuffer(&self, framebuffer: Option<&Arc<dyn Framebuffer>>) -> Result<()>;

    /// Copy (and resolve, when sample counts differ) the masked aspects
    /// from `src` to `dst` (`None` = presentation surface)
    fn blit_framebuffer(
        &self,
        src: &Arc<dyn Framebuffer>,
        dst: Option<&Arc<dyn Framebuffer>>,
        mask: BlitMask,
    ) -> Result<()>;

    /// Size of the presentation surface
    fn presentation_size(&self) -> (u32, u32);

    /// Clear the bound framebuffer, restricted to the current scissor
    fn clear(&self, values: &ClearValues) -> Result<()>;

    // ===== Fixed-function state =====

    fn set_viewport(&self, rect: Rect2D);

    fn set_scissor(&self, rect: Rect2D);

    fn set_render_state(&self, state: &RenderState);

    // ===== Programs, textures, geometry =====

    /// Activate a program (`None` deactivates)
    fn bind_program(&self, program: Option<&Arc<dyn Program>>) -> Result<()>;

    /// Bind a texture to a unit (non-bindless path)
    fn bind_texture(&self, unit: u32, texture: TextureHandle) -> Result<()>;

    /// Bind the vertex and index buffers of one cache class
    fn bind_vertex_cache(&self, vertices: &Arc<dyn Buffer>, indices: &Arc<dyn Buffer>) -> Result<()>;

    /// Issue one multi-draw submission
    fn multi_draw_elements(&self, draws: &[DrawElementsCommand]) -> Result<()>;

    /// Draw one fullscreen triangle with the bound program
    fn draw_fullscreen(&self) -> Result<()>;

    // ===== Diagnostics =====

    /// Report any error the device accumulated since the last check
    fn check_errors(&self, context: &str) -> Result<()>;

    fn stats(&self) -> DeviceStats;

    /// Wait until the GPU has finished all submitted work
    fn wait_idle(&self) -> Result<()>;
}
