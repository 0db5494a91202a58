/// VulkanGraphicsDevice - Vulkan implementation of the GraphicsDevice trait
///
/// Headless: the presentation surface is an internal color image sized from
/// `Config`, the destination of `bind_framebuffer(None)` and of blits with no
/// destination. Requires Vulkan 1.3 (dynamic rendering, extended dynamic
/// state) and VK_KHR_push_descriptor.

use umbra_backend::umbra::{Error, Result};
use umbra_backend::umbra::device::{
    Attachment as BackendAttachment, AttachmentDesc, AttachmentPoint, AttachmentStorage, BlitMask,
    Buffer as BackendBuffer, BufferBindingTarget, BufferDesc, ClearValues, Config,
    DeviceLimits, DeviceStats, DrawElementsCommand, FenceId, FenceStatus,
    Framebuffer as BackendFramebuffer, FramebufferDesc, FramebufferStatus, GraphicsDevice,
    Program as BackendProgram, Rect2D, RenderState, TextureHandle, AttachmentFormat,
};
use umbra_backend::{engine_bail, engine_debug, engine_err, engine_error, engine_info, engine_warn};
use ash::vk;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::vulkan_attachment::{Attachment, AttachmentImage, Unbacked};
use crate::vulkan_buffer::Buffer;
use crate::vulkan_context::GpuContext;
use crate::vulkan_format::{
    aspect_mask, attachment_format_to_vk, buffer_usage_to_vk, fallback_format, max_sample_count,
    sample_count_to_vk, sampled_aspect, subresource_range,
};
use crate::vulkan_frame_buffer::{as_vulkan_framebuffer, Framebuffer};
use crate::vulkan_pipeline::{STORAGE_BINDING_COUNT, TEXTURE_UNIT_COUNT, UNIFORM_BINDING_COUNT};
use crate::vulkan_program::VulkanProgramManager;
use crate::vulkan_recorder::{Recorder, TextureSource, INDIRECT_STRIDE};

/// Indirect draw records available between queue drains
const INDIRECT_CAPACITY: u32 = 65536;

/// Vulkan device implementation
pub struct VulkanGraphicsDevice {
    /// Vulkan entry (keeps the loader alive)
    _entry: ash::Entry,
    config: Config,
    limits: DeviceLimits,
    /// Shared GPU context for every resource
    ctx: Arc<GpuContext>,
    /// Command stream; dropped explicitly before the device is destroyed
    recorder: ManuallyDrop<Mutex<Recorder>>,
    next_texture: AtomicU64,
}

impl VulkanGraphicsDevice {
    /// Create a headless Vulkan device
    pub fn new(config: Config) -> Result<Self> {
        let validation = config.enable_validation && cfg!(feature = "vulkan-validation");
        if config.enable_validation && !validation {
            engine_warn!("umbra::vulkan", "Validation requested but the vulkan-validation feature is disabled");
        }

        unsafe {
            let entry = ash::Entry::load()
                .map_err(|e| {
                    engine_error!("umbra::vulkan", "Failed to load Vulkan library: {:?}", e);
                    Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
                })?;

            let app_name = CString::new(config.app_name.as_str())
                .unwrap_or_else(|_| CString::from(c"Umbra Application"));
            let (major, minor, patch) = config.app_version;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, major, minor, patch))
                .engine_name(c"Umbra")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            let mut extension_names = Vec::new();
            let mut layer_names = Vec::new();
            if validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
                layer_names.push(c"VK_LAYER_KHRONOS_validation".as_ptr());
            }

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry
                .create_instance(&create_info, None)
                .map_err(|e| {
                    engine_error!("umbra::vulkan", "Failed to create Vulkan instance: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
                })?;

            let (debug_utils_loader, debug_messenger) = if validation {
                let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
                crate::vulkan_debug::init_debug_config(config.debug_severity);

                let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(crate::vulkan_debug::severity_flags(config.debug_severity))
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                    )
                    .pfn_user_callback(Some(crate::vulkan_debug::vulkan_debug_callback));

                let messenger = debug_utils
                    .create_debug_utils_messenger(&debug_info, None)
                    .map_err(|e| {
                        engine_error!("umbra::vulkan", "Failed to create debug messenger: {:?}", e);
                        Error::InitializationFailed(format!("Failed to create debug messenger: {:?}", e))
                    })?;

                (Some(debug_utils), Some(messenger))
            } else {
                (None, None)
            };

            // Pick a 1.3 device with a graphics queue and push descriptors, discrete first
            let physical_devices = instance
                .enumerate_physical_devices()
                .map_err(|e| {
                    engine_error!("umbra::vulkan", "Failed to enumerate physical devices: {:?}", e);
                    Error::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
                })?;

            let (physical_device, graphics_family_index) = physical_devices
                .into_iter()
                .filter_map(|pd| Self::suitable_queue_family(&instance, pd).map(|family| (pd, family)))
                .max_by_key(|(pd, _)| {
                    instance.get_physical_device_properties(*pd).device_type == vk::PhysicalDeviceType::DISCRETE_GPU
                })
                .ok_or_else(|| {
                    engine_error!("umbra::vulkan", "No Vulkan 1.3 GPU with push descriptor support found");
                    Error::InitializationFailed("No suitable Vulkan GPU found".to_string())
                })?;

            let properties = instance.get_physical_device_properties(physical_device);
            let supported = instance.get_physical_device_features(physical_device);
            if supported.multi_draw_indirect == vk::FALSE || supported.draw_indirect_first_instance == vk::FALSE {
                engine_error!("umbra::vulkan", "GPU lacks multiDrawIndirect or drawIndirectFirstInstance");
                return Err(Error::InitializationFailed("Indirect multi-draw not supported".to_string()));
            }
            let wireframe_supported = supported.fill_mode_non_solid == vk::TRUE;

            let queue_priorities = [1.0];
            let queue_create_infos = [
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(graphics_family_index)
                    .queue_priorities(&queue_priorities),
            ];

            let device_extension_names = [ash::khr::push_descriptor::NAME.as_ptr()];

            let device_features = vk::PhysicalDeviceFeatures::default()
                .multi_draw_indirect(true)
                .draw_indirect_first_instance(true)
                .fill_mode_non_solid(wireframe_supported);
            let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
                .dynamic_rendering(true);

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names)
                .enabled_features(&device_features)
                .push_next(&mut vulkan_13_features);

            let device = instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| {
                    engine_error!("umbra::vulkan", "Failed to create logical device: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create device: {:?}", e))
                })?;

            let graphics_queue = device.get_device_queue(graphics_family_index, 0);
            let push_descriptor = ash::khr::push_descriptor::Device::new(&instance, &device);

            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| {
                engine_error!("umbra::vulkan", "Failed to create GPU allocator: {:?}", e);
                Error::InitializationFailed(format!("Failed to create allocator: {:?}", e))
            })?;

            let ctx = Arc::new(GpuContext::new(
                device,
                Arc::new(Mutex::new(allocator)),
                graphics_queue,
                graphics_family_index,
                physical_device,
                properties,
                instance,
                debug_utils_loader,
                debug_messenger,
            ));

            let limits = Self::query_limits(&properties);

            // Presentation surface
            let presentation_desc = AttachmentDesc {
                name: "presentation.color0".to_string(),
                width: config.presentation_width,
                height: config.presentation_height,
                samples: 1,
                format: AttachmentFormat::R8G8B8A8_UNORM,
                storage: AttachmentStorage::Renderbuffer,
            };
            let presentation_color: Arc<dyn BackendAttachment> =
                Arc::new(Self::build_attachment(&ctx, &presentation_desc, None)?);
            let presentation: Arc<dyn BackendFramebuffer> = Arc::new(Framebuffer::new(
                "presentation",
                config.presentation_width,
                config.presentation_height,
                vec![presentation_color],
                None,
                None,
            ));

            let indirect = Self::allocate_buffer(
                &ctx,
                "indirect",
                INDIRECT_CAPACITY as u64 * INDIRECT_STRIDE as u64,
                vk::BufferUsageFlags::INDIRECT_BUFFER,
            )?;

            let recorder = Recorder::new(
                Arc::clone(&ctx),
                push_descriptor,
                presentation,
                indirect,
                wireframe_supported,
            )?;

            let device_name = properties.device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            engine_info!("umbra::vulkan", "Vulkan device '{}' ready (max samples {}, presentation {}x{})",
                device_name, limits.max_samples, config.presentation_width, config.presentation_height);

            Ok(Self {
                _entry: entry,
                config,
                limits,
                ctx,
                recorder: ManuallyDrop::new(Mutex::new(recorder)),
                next_texture: AtomicU64::new(1),
            })
        }
    }

    /// Graphics queue family of a device that meets every requirement
    fn suitable_queue_family(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Option<u32> {
        unsafe {
            let properties = instance.get_physical_device_properties(physical_device);
            if properties.api_version < vk::API_VERSION_1_3 {
                return None;
            }

            let extensions = instance.enumerate_device_extension_properties(physical_device).ok()?;
            let push_descriptor = extensions.iter().any(|ext| {
                ext.extension_name_as_c_str().is_ok_and(|name| name == ash::khr::push_descriptor::NAME)
            });
            if !push_descriptor {
                return None;
            }

            instance
                .get_physical_device_queue_family_properties(physical_device)
                .iter()
                .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|index| index as u32)
        }
    }

    fn query_limits(properties: &vk::PhysicalDeviceProperties) -> DeviceLimits {
        let limits = &properties.limits;
        DeviceLimits {
            max_uniform_block_size: limits.max_uniform_buffer_range as u64,
            uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            max_samples: max_sample_count(
                limits.framebuffer_color_sample_counts
                    & limits.framebuffer_depth_sample_counts
                    & limits.framebuffer_stencil_sample_counts,
            ),
            bindless_textures: false,
            max_texture_units: TEXTURE_UNIT_COUNT.min(limits.max_per_stage_descriptor_sampled_images),
        }
    }

    /// Host-visible buffer, mapped for its whole lifetime
    fn allocate_buffer(ctx: &Arc<GpuContext>, name: &str, size: u64, usage: vk::BufferUsageFlags) -> Result<Buffer> {
        if size == 0 {
            engine_bail!("umbra::vulkan", "Buffer '{}' has zero size", name);
        }

        unsafe {
            let buffer_create_info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(usage | vk::BufferUsageFlags::TRANSFER_DST)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = ctx.device.create_buffer(&buffer_create_info, None)
                .map_err(|e| engine_err!("umbra::vulkan", "Failed to create buffer '{}' of {} bytes: {:?}", name, size, e))?;

            let requirements = ctx.device.get_buffer_memory_requirements(buffer);
            let allocation = ctx.allocator.lock()
                .map_err(|_| Error::BackendError("GPU allocator lock poisoned".to_string()))?
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location: MemoryLocation::CpuToGpu,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                });
            let allocation = match allocation {
                Ok(allocation) => allocation,
                Err(_) => {
                    ctx.device.destroy_buffer(buffer, None);
                    let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                    engine_error!("umbra::vulkan", "Out of GPU memory for buffer '{}' (required: {:.2} MB)", name, size_mb);
                    return Err(Error::OutOfMemory);
                }
            };

            ctx.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|e| engine_err!("umbra::vulkan", "Failed to bind buffer memory: {:?}", e))?;

            Ok(Buffer::new(Arc::clone(ctx), name, buffer, allocation, size))
        }
    }

    /// Attachment for `desc`, unbacked when the device cannot support it
    fn build_attachment(ctx: &Arc<GpuContext>, desc: &AttachmentDesc, texture_handle: Option<TextureHandle>) -> Result<Attachment> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::InvalidResource(format!(
                "Attachment '{}' has empty size {}x{}", desc.name, desc.width, desc.height
            )));
        }

        let sampled = desc.storage == AttachmentStorage::Texture;
        let attachment_feature = if desc.format.is_color() {
            vk::FormatFeatureFlags::COLOR_ATTACHMENT
        } else {
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
        };
        let mut required = attachment_feature;
        if sampled {
            required |= vk::FormatFeatureFlags::SAMPLED_IMAGE;
        }

        let preferred = attachment_format_to_vk(desc.format);
        let format = std::iter::once(preferred)
            .chain(fallback_format(preferred))
            .find(|&format| ctx.format_features(format).contains(required));

        let Some(format) = format else {
            engine_debug!("umbra::vulkan", "Attachment '{}': format {:?} unsupported", desc.name, desc.format);
            return Ok(Attachment::new(Arc::clone(ctx), desc.clone(), preferred, Err(Unbacked::Format), None));
        };

        let aspects = aspect_mask(desc.format);
        let samples = sample_count_to_vk(desc.samples)
            .filter(|&bit| ctx.supported_sample_counts(aspects).contains(bit));
        let Some(samples) = samples else {
            engine_debug!("umbra::vulkan", "Attachment '{}': {} samples unsupported", desc.name, desc.samples);
            return Ok(Attachment::new(Arc::clone(ctx), desc.clone(), format, Err(Unbacked::Samples), None));
        };

        let mut usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        usage |= if desc.format.is_color() {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        } else {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        };
        if sampled {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }

        unsafe {
            let image_create_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(format)
                .extent(vk::Extent3D { width: desc.width, height: desc.height, depth: 1 })
                .mip_levels(1)
                .array_layers(1)
                .samples(samples)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);

            let image = ctx.device.create_image(&image_create_info, None)
                .map_err(|e| engine_err!("umbra::vulkan", "Failed to create image '{}': {:?}", desc.name, e))?;

            let requirements = ctx.device.get_image_memory_requirements(image);
            let allocation = ctx.allocator.lock()
                .map_err(|_| Error::BackendError("GPU allocator lock poisoned".to_string()))?
                .allocate(&AllocationCreateDesc {
                    name: &desc.name,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                });
            let allocation = match allocation {
                Ok(allocation) => allocation,
                Err(_) => {
                    ctx.device.destroy_image(image, None);
                    let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                    engine_error!("umbra::vulkan", "Out of GPU memory for attachment '{}' (required: {:.2} MB)", desc.name, size_mb);
                    return Err(Error::OutOfMemory);
                }
            };

            ctx.device.bind_image_memory(image, allocation.memory(), allocation.offset())
                .map_err(|e| engine_err!("umbra::vulkan", "Failed to bind image memory: {:?}", e))?;

            let create_view = |aspects: vk::ImageAspectFlags| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format)
                    .subresource_range(subresource_range(aspects));
                ctx.device.create_image_view(&view_info, None)
                    .map_err(|e| engine_err!("umbra::vulkan", "Failed to create view of '{}': {:?}", desc.name, e))
            };
            let view = create_view(aspects)?;
            let sampled_view = if sampled {
                Some(create_view(sampled_aspect(desc.format))?)
            } else {
                None
            };

            let backing = AttachmentImage { image, view, sampled_view, allocation: Some(allocation) };
            Ok(Attachment::new(Arc::clone(ctx), desc.clone(), format, Ok(backing), texture_handle))
        }
    }

    fn recorder(&self) -> Result<MutexGuard<'_, Recorder>> {
        self.recorder.lock()
            .map_err(|_| Error::BackendError("Vulkan recorder lock poisoned".to_string()))
    }

    /// Program manager loading SPIR-V programs from `shader_dir`
    pub fn program_manager(&self, shader_dir: impl AsRef<Path>) -> VulkanProgramManager {
        VulkanProgramManager::new(Arc::clone(&self.ctx), shader_dir.as_ref())
    }

    /// Make an externally owned image view sampleable through a texture handle
    ///
    /// # Safety
    ///
    /// `view` must stay alive, in `SHADER_READ_ONLY_OPTIMAL`, until the handle
    /// is released with `unregister_texture` and every draw using it completed.
    pub unsafe fn register_external_texture(&self, view: vk::ImageView) -> Result<TextureHandle> {
        let handle = TextureHandle(self.next_texture.fetch_add(1, Ordering::Relaxed));
        self.recorder()?.textures.insert(handle.0, TextureSource::External(view));
        Ok(handle)
    }

    pub fn unregister_texture(&self, handle: TextureHandle) -> Result<()> {
        self.recorder()?.textures.remove(&handle.0);
        Ok(())
    }

    /// Pipelines built so far
    pub fn pipeline_count(&self) -> usize {
        self.recorder().map(|recorder| recorder.pipeline_count()).unwrap_or(0)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl GraphicsDevice for VulkanGraphicsDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn BackendBuffer>> {
        let buffer = Self::allocate_buffer(&self.ctx, &desc.name, desc.size, buffer_usage_to_vk(desc.usage))?;
        Ok(Arc::new(buffer))
    }

    fn bind_buffer_range(
        &self,
        target: BufferBindingTarget,
        binding: u32,
        buffer: &Arc<dyn BackendBuffer>,
        offset: u64,
        size: u64,
    ) -> Result<()> {
        let device_limits = &self.ctx.properties.limits;
        let (binding_count, alignment, max_range) = match target {
            BufferBindingTarget::Uniform => (
                UNIFORM_BINDING_COUNT,
                device_limits.min_uniform_buffer_offset_alignment,
                device_limits.max_uniform_buffer_range as u64,
            ),
            BufferBindingTarget::Storage => (
                STORAGE_BINDING_COUNT,
                device_limits.min_storage_buffer_offset_alignment,
                device_limits.max_storage_buffer_range as u64,
            ),
        };

        if binding >= binding_count {
            engine_bail!("umbra::vulkan", "{:?} binding {} out of range (max {})", target, binding, binding_count);
        }
        if alignment > 1 && offset % alignment != 0 {
            engine_bail!("umbra::vulkan", "{:?} range offset {} not aligned to {}", target, offset, alignment);
        }
        if size == 0 || size > max_range || offset + size > buffer.size() {
            engine_bail!("umbra::vulkan", "{:?} range [{}, {}) invalid for buffer '{}' ({} bytes)",
                target, offset, offset + size, buffer.name(), buffer.size());
        }

        self.recorder()?.bind_range(target, binding, buffer, offset, size);
        Ok(())
    }

    fn insert_fence(&self) -> Result<FenceId> {
        self.recorder()?.insert_fence()
    }

    fn client_wait_fence(&self, fence: FenceId, timeout: Duration) -> FenceStatus {
        // Wait outside the lock
        let handle = match self.recorder() {
            Ok(recorder) => recorder.fence_handle(fence),
            Err(_) => None,
        };
        let Some(handle) = handle else {
            return FenceStatus::Failed;
        };

        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.ctx.device.wait_for_fences(&[handle], true, timeout_ns) } {
            Ok(()) => FenceStatus::Signaled,
            Err(vk::Result::TIMEOUT) => FenceStatus::TimeoutExpired,
            Err(e) => {
                engine_error!("umbra::vulkan", "Fence {} wait failed: {:?}", fence.0, e);
                FenceStatus::Failed
            }
        }
    }

    fn delete_fence(&self, fence: FenceId) {
        if let Ok(mut recorder) = self.recorder() {
            recorder.release_fence(fence);
        }
    }

    fn create_attachment(&self, desc: &AttachmentDesc) -> Result<Arc<dyn BackendAttachment>> {
        let texture_handle = (desc.storage == AttachmentStorage::Texture)
            .then(|| TextureHandle(self.next_texture.fetch_add(1, Ordering::Relaxed)));
        let attachment = Arc::new(Self::build_attachment(&self.ctx, desc, texture_handle)?);

        if let Some(handle) = attachment.texture_handle() {
            let mut recorder = self.recorder()?;
            recorder.textures.retain(|_, source| match source {
                TextureSource::Attachment(weak) => weak.strong_count() > 0,
                TextureSource::External(_) => true,
            });
            recorder.textures.insert(handle.0, TextureSource::Attachment(Arc::downgrade(&attachment)));
        }
        Ok(attachment)
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<Arc<dyn BackendFramebuffer>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::InvalidResource(format!(
                "Framebuffer '{}' has empty size {}x{}", desc.name, desc.width, desc.height
            )));
        }
        Ok(Arc::new(Framebuffer::new(
            &desc.name,
            desc.width,
            desc.height,
            desc.color_attachments.clone(),
            desc.depth_attachment.clone(),
            desc.stencil_attachment.clone(),
        )))
    }

    fn framebuffer_status(&self, framebuffer: &dyn BackendFramebuffer) -> FramebufferStatus {
        framebuffer_status(as_vulkan_framebuffer(framebuffer))
    }

    fn bind_framebuffer(&self, framebuffer: Option<&Arc<dyn BackendFramebuffer>>) -> Result<()> {
        self.recorder()?.bind_framebuffer(framebuffer);
        Ok(())
    }

    fn blit_framebuffer(
        &self,
        src: &Arc<dyn BackendFramebuffer>,
        dst: Option<&Arc<dyn BackendFramebuffer>>,
        mask: BlitMask,
    ) -> Result<()> {
        self.recorder()?.blit(src, dst, mask);
        Ok(())
    }

    fn presentation_size(&self) -> (u32, u32) {
        (self.config.presentation_width, self.config.presentation_height)
    }

    fn clear(&self, values: &ClearValues) -> Result<()> {
        self.recorder()?.clear(values)
    }

    fn set_viewport(&self, rect: Rect2D) {
        if let Ok(mut recorder) = self.recorder() {
            recorder.set_viewport(rect);
        }
    }

    fn set_scissor(&self, rect: Rect2D) {
        if let Ok(mut recorder) = self.recorder() {
            recorder.set_scissor(rect);
        }
    }

    fn set_render_state(&self, state: &RenderState) {
        if let Ok(mut recorder) = self.recorder() {
            recorder.set_render_state(state);
        }
    }

    fn bind_program(&self, program: Option<&Arc<dyn BackendProgram>>) -> Result<()> {
        self.recorder()?.bind_program(program);
        Ok(())
    }

    fn bind_texture(&self, unit: u32, texture: TextureHandle) -> Result<()> {
        if unit >= self.limits.max_texture_units {
            engine_bail!("umbra::vulkan", "Texture unit {} out of range (max {})", unit, self.limits.max_texture_units);
        }
        self.recorder()?.bind_texture(unit, texture);
        Ok(())
    }

    fn bind_vertex_cache(&self, vertices: &Arc<dyn BackendBuffer>, indices: &Arc<dyn BackendBuffer>) -> Result<()> {
        self.recorder()?.bind_vertex_cache(vertices, indices);
        Ok(())
    }

    fn multi_draw_elements(&self, draws: &[DrawElementsCommand]) -> Result<()> {
        self.recorder()?.multi_draw(draws)
    }

    fn draw_fullscreen(&self) -> Result<()> {
        self.recorder()?.draw_fullscreen()
    }

    fn check_errors(&self, context: &str) -> Result<()> {
        let mut messages = self.recorder()?.take_errors();
        messages.extend(crate::vulkan_debug::take_pending_errors());
        if messages.is_empty() {
            return Ok(());
        }
        Err(engine_err!("umbra::vulkan", "{}: {}", context, messages.join("; ")))
    }

    fn stats(&self) -> DeviceStats {
        let mut stats = self.recorder().map(|recorder| recorder.stats()).unwrap_or_default();
        if let Ok(allocator) = self.ctx.allocator.lock() {
            stats.gpu_memory_used = allocator.generate_report().total_allocated_bytes;
        }
        stats
    }

    fn wait_idle(&self) -> Result<()> {
        self.recorder()?.drain()
    }
}

/// Completeness of a framebuffer on this device
pub(crate) fn framebuffer_status(framebuffer: &Framebuffer) -> FramebufferStatus {
    let mut points: Vec<(AttachmentPoint, &Attachment)> = framebuffer.color_attachments()
        .enumerate()
        .map(|(i, a)| (AttachmentPoint::Color(i as u32), a))
        .collect();
    points.extend(framebuffer.depth_attachment().map(|a| (AttachmentPoint::Depth, a)));
    points.extend(framebuffer.stencil.as_deref().map(|a| (AttachmentPoint::Stencil, crate::vulkan_frame_buffer::as_vulkan(a))));

    if points.is_empty() {
        return FramebufferStatus::MissingAttachment;
    }

    for (point, attachment) in &points {
        let desc = attachment.desc();
        let kind_matches = match point {
            AttachmentPoint::Color(_) => desc.format.is_color(),
            AttachmentPoint::Depth => desc.format.has_depth(),
            AttachmentPoint::Stencil => desc.format.has_stencil(),
            AttachmentPoint::Framebuffer => true,
        };
        if !kind_matches || desc.width < framebuffer.width() || desc.height < framebuffer.height() {
            return FramebufferStatus::IncompleteAttachment(*point);
        }
        match &attachment.image {
            Err(Unbacked::Format) => return FramebufferStatus::Unsupported(*point),
            Err(Unbacked::Samples) => return FramebufferStatus::IncompleteMultisample(*point),
            Ok(_) => {}
        }
        if desc.samples != framebuffer.samples() {
            return FramebufferStatus::IncompleteMultisample(*point);
        }
    }

    // Dynamic rendering takes one image for depth and stencil
    if framebuffer.depth.is_some() && framebuffer.stencil.is_some() {
        return FramebufferStatus::Unsupported(AttachmentPoint::Stencil);
    }
    FramebufferStatus::Complete
}

impl Drop for VulkanGraphicsDevice {
    fn drop(&mut self) {
        unsafe {
            // Wait for device to finish
            self.ctx.device.device_wait_idle().ok();

            // 1. Drop the command stream: fences, pools, samplers, pipelines,
            //    presentation image, indirect buffer and retained resources.
            //    After this, self.ctx is the sole Arc<GpuContext> owner unless
            //    the application still holds resources.
            ManuallyDrop::drop(&mut self.recorder);

            // 2. Drop allocator: free VkDeviceMemory pages BEFORE destroying device
            match Arc::get_mut(&mut self.ctx) {
                Some(ctx) => ManuallyDrop::drop(&mut ctx.allocator),
                None => engine_warn!("umbra::vulkan", "GPU resources outlive the device, allocator leaked"),
            }

            // 3. Cleanup debug config to prevent callbacks during destruction
            crate::vulkan_debug::cleanup_debug_config();

            // 4. Destroy debug messenger BEFORE device and instance
            if let (Some(debug_utils), Some(messenger)) = (
                &self.ctx.debug_utils_loader,
                &self.ctx.debug_messenger,
            ) {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }

            // 5. Destroy device and instance
            self.ctx.device.destroy_device(None);
            self.ctx.instance.destroy_instance(None);
        }
    }
}
