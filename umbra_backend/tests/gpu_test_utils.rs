#![allow(dead_code)]
//! GPU test utilities - Shared Vulkan graphics_device for integration tests
//!
//! This module provides a global headless VulkanGraphicsDevice shared across
//! all GPU tests, the way an application holds one device for its lifetime.
//!
//! Tests that need compiled programs read them from the directory named by
//! `UMBRA_SHADER_DIR` and return early when it is unset.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use umbra_backend::umbra::device::{
    BufferDesc, BufferUsage, Config, DebugSeverity, GraphicsDevice,
};
use umbra_backend::umbra::frontend::{CacheBuffers, VertexCacheBuffers};
use umbra_backend_vulkan::VulkanGraphicsDevice;

/// Global VulkanGraphicsDevice instance (initialized once)
static GPU_GRAPHICS_DEVICE: OnceLock<Arc<VulkanGraphicsDevice>> = OnceLock::new();

/// Presentation size of the shared device
pub const TEST_WIDTH: u32 = 640;
pub const TEST_HEIGHT: u32 = 360;

/// Get the shared VulkanGraphicsDevice for GPU tests
///
/// Lazily initializes the graphics_device on first call. All subsequent calls
/// return a clone of the same Arc.
///
/// # Example
///
/// ```no_run
/// let graphics_device = get_test_graphics_device();
/// let limits = graphics_device.limits();
/// ```
pub fn get_test_graphics_device() -> Arc<VulkanGraphicsDevice> {
    Arc::clone(GPU_GRAPHICS_DEVICE.get_or_init(|| {
        let config = Config {
            enable_validation: true,
            debug_severity: DebugSeverity::ErrorsAndWarnings,
            app_name: "umbra integration tests".to_string(),
            presentation_width: TEST_WIDTH,
            presentation_height: TEST_HEIGHT,
            ..Config::default()
        };
        let graphics_device = VulkanGraphicsDevice::new(config)
            .expect("Failed to create VulkanGraphicsDevice for tests");
        Arc::new(graphics_device)
    }))
}

/// Shared device as a trait object
pub fn get_test_dyn_device() -> Arc<dyn GraphicsDevice> {
    get_test_graphics_device()
}

/// Directory holding the compiled programs, if configured
pub fn shader_dir() -> Option<PathBuf> {
    match std::env::var_os("UMBRA_SHADER_DIR") {
        Some(dir) => Some(PathBuf::from(dir)),
        None => {
            eprintln!("UMBRA_SHADER_DIR not set, skipping");
            None
        }
    }
}

/// Zero-filled static and per-frame vertex caches
pub fn create_vertex_caches(device: &dyn GraphicsDevice) -> VertexCacheBuffers {
    let make = |name: &str, usage: BufferUsage| {
        device.create_buffer(&BufferDesc {
            name: name.to_string(),
            size: 1 << 20,
            usage,
            persistent: false,
        }).expect("Failed to create vertex cache buffer")
    };
    VertexCacheBuffers::new(
        CacheBuffers {
            vertices: make("static_vertices", BufferUsage::Vertex),
            indices: make("static_indices", BufferUsage::Index),
        },
        CacheBuffers {
            vertices: make("frame_vertices", BufferUsage::Vertex),
            indices: make("frame_indices", BufferUsage::Index),
        },
    )
}
