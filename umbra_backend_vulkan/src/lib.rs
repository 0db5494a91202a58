/*!
# Umbra - Vulkan Device Backend

Vulkan implementation of the umbra `GraphicsDevice` trait.

This crate provides a headless Vulkan 1.3 device using the Ash library for
Vulkan bindings, gpu-allocator for memory management and spirq for SPIR-V
reflection of program uniform blocks.

```no_run
use umbra_backend::umbra::device::{Config, GraphicsDevice};
use umbra_backend_vulkan::VulkanGraphicsDevice;

let device = VulkanGraphicsDevice::new(Config::default())?;
let programs = device.program_manager("shaders/spv");
println!("max samples: {}", device.limits().max_samples);
# Ok::<(), umbra_backend::umbra::Error>(())
```
*/

mod vulkan;
mod vulkan_context;
mod vulkan_format;
mod vulkan_buffer;
mod vulkan_attachment;
mod vulkan_frame_buffer;
mod vulkan_program;
mod vulkan_pipeline;
mod vulkan_recorder;
mod vulkan_debug;

pub use vulkan::VulkanGraphicsDevice;
pub use vulkan_program::VulkanProgramManager;

// Re-export debug utilities
pub use vulkan_debug::{get_validation_stats, print_validation_stats_report, ValidationStats};
