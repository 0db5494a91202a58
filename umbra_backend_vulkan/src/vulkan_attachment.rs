/// Attachment - Vulkan implementation of the backend Attachment trait
///
/// Wraps a VkImage with its attachment view and, for texture storage, a view
/// of the sampled aspect. An attachment the device cannot back (format or
/// sample count unsupported) is still created but holds no image; the
/// framebuffer it ends up in reports itself incomplete.

use umbra_backend::umbra::device::{Attachment as BackendAttachment, AttachmentDesc, TextureHandle};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use std::sync::{Arc, Mutex};

use crate::vulkan_context::GpuContext;

/// GPU side of a backed attachment
pub(crate) struct AttachmentImage {
    pub image: vk::Image,
    /// View of every aspect, used for rendering and clears
    pub view: vk::ImageView,
    /// View of the sampled aspect (texture storage only)
    pub sampled_view: Option<vk::ImageView>,
    pub allocation: Option<Allocation>,
}

/// Why an attachment has no image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Unbacked {
    /// Format not usable as an attachment (or not sampleable for textures)
    Format,
    /// Sample count not supported for the format's aspects
    Samples,
}

/// Vulkan attachment implementation
pub struct Attachment {
    ctx: Arc<GpuContext>,
    desc: AttachmentDesc,
    pub(crate) format: vk::Format,
    pub(crate) image: Result<AttachmentImage, Unbacked>,
    /// Current layout of the image, tracked for barriers
    pub(crate) layout: Mutex<vk::ImageLayout>,
    texture_handle: Option<TextureHandle>,
}

impl Attachment {
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        desc: AttachmentDesc,
        format: vk::Format,
        image: Result<AttachmentImage, Unbacked>,
        texture_handle: Option<TextureHandle>,
    ) -> Self {
        Self {
            ctx,
            desc,
            format,
            image,
            layout: Mutex::new(vk::ImageLayout::UNDEFINED),
            texture_handle,
        }
    }

    pub(crate) fn backing(&self) -> Option<&AttachmentImage> {
        self.image.as_ref().ok()
    }

    pub(crate) fn current_layout(&self) -> vk::ImageLayout {
        self.layout.lock().map(|layout| *layout).unwrap_or(vk::ImageLayout::UNDEFINED)
    }
}

impl BackendAttachment for Attachment {
    fn desc(&self) -> &AttachmentDesc {
        &self.desc
    }

    fn texture_handle(&self) -> Option<TextureHandle> {
        self.texture_handle
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        let Ok(backing) = &mut self.image else {
            return;
        };
        unsafe {
            if let Some(view) = backing.sampled_view.take() {
                self.ctx.device.destroy_image_view(view, None);
            }
            self.ctx.device.destroy_image_view(backing.view, None);

            if let Some(allocation) = backing.allocation.take() {
                if let Ok(mut allocator) = self.ctx.allocator.lock() {
                    allocator.free(allocation).ok();
                }
            }
            self.ctx.device.destroy_image(backing.image, None);
        }
    }
}
