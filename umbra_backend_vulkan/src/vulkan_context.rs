/// GpuContext - Shared GPU resources for all Vulkan objects
///
/// Contains everything resources need after creation:
/// - Device for Vulkan API calls
/// - Allocator for memory management
/// - Physical device properties for format and sample count checks

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

/// Shared GPU context for all Vulkan resources.
///
/// Shared (via `Arc`) by buffers, attachments, programs and pipelines so each
/// can release its own Vulkan objects on drop.
///
/// Note: Device and instance destruction is handled by VulkanGraphicsDevice::drop()
/// to keep the teardown order explicit.
pub struct GpuContext {
    /// Vulkan logical device
    pub device: ash::Device,

    /// GPU memory allocator (shared, requires mutex for thread safety)
    /// Wrapped in ManuallyDrop to ensure it's dropped BEFORE the device is destroyed
    pub allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    /// Graphics queue for command submission
    pub graphics_queue: vk::Queue,

    /// Graphics queue family index
    pub graphics_queue_family: u32,

    /// Physical device the logical device was created on
    pub physical_device: vk::PhysicalDevice,

    /// Physical device limits and properties
    pub properties: vk::PhysicalDeviceProperties,

    /// Vulkan instance (kept for format queries, destroyed by VulkanGraphicsDevice)
    pub(crate) instance: ash::Instance,

    /// Debug utils loader (for validation layers)
    pub(crate) debug_utils_loader: Option<ash::ext::debug_utils::Instance>,

    /// Debug messenger handle
    pub(crate) debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl GpuContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: ash::Device,
        allocator: Arc<Mutex<Allocator>>,
        graphics_queue: vk::Queue,
        graphics_queue_family: u32,
        physical_device: vk::PhysicalDevice,
        properties: vk::PhysicalDeviceProperties,
        instance: ash::Instance,
        debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
        debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    ) -> Self {
        Self {
            device,
            allocator: ManuallyDrop::new(allocator),
            graphics_queue,
            graphics_queue_family,
            physical_device,
            properties,
            instance,
            debug_utils_loader,
            debug_messenger,
        }
    }

    /// Optimal-tiling features of a format on this device
    pub fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
                .optimal_tiling_features
        }
    }

    /// Sample counts usable for attachments of the given aspects
    pub fn supported_sample_counts(&self, aspects: vk::ImageAspectFlags) -> vk::SampleCountFlags {
        let limits = &self.properties.limits;
        let mut counts = vk::SampleCountFlags::from_raw(0x7F);
        if aspects.contains(vk::ImageAspectFlags::COLOR) {
            counts &= limits.framebuffer_color_sample_counts;
        }
        if aspects.contains(vk::ImageAspectFlags::DEPTH) {
            counts &= limits.framebuffer_depth_sample_counts;
        }
        if aspects.contains(vk::ImageAspectFlags::STENCIL) {
            counts &= limits.framebuffer_stencil_sample_counts;
        }
        counts
    }
}
