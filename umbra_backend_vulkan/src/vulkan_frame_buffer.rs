/// Framebuffer - Vulkan implementation of the backend Framebuffer trait
///
/// Rendering uses dynamic rendering, so a framebuffer is only the list of
/// attachments that `vkCmdBeginRendering` receives. No VkFramebuffer or
/// VkRenderPass is created.

use umbra_backend::umbra::device::{Attachment as BackendAttachment, Framebuffer as BackendFramebuffer};
use ash::vk;
use std::sync::Arc;

use crate::vulkan_attachment::Attachment;

/// Vulkan framebuffer implementation
pub struct Framebuffer {
    name: String,
    width: u32,
    height: u32,
    samples: u32,
    pub(crate) color: Vec<Arc<dyn BackendAttachment>>,
    pub(crate) depth: Option<Arc<dyn BackendAttachment>>,
    pub(crate) stencil: Option<Arc<dyn BackendAttachment>>,
}

impl Framebuffer {
    pub(crate) fn new(
        name: &str,
        width: u32,
        height: u32,
        color: Vec<Arc<dyn BackendAttachment>>,
        depth: Option<Arc<dyn BackendAttachment>>,
        stencil: Option<Arc<dyn BackendAttachment>>,
    ) -> Self {
        let samples = color.iter()
            .chain(depth.iter())
            .chain(stencil.iter())
            .map(|a| a.desc().samples)
            .next()
            .unwrap_or(1);
        Self { name: name.to_string(), width, height, samples, color, depth, stencil }
    }

    pub(crate) fn color_attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.color.iter().map(|a| as_vulkan(a.as_ref()))
    }

    pub(crate) fn depth_attachment(&self) -> Option<&Attachment> {
        self.depth.as_deref().map(as_vulkan)
    }

    /// Attachment carrying the stencil aspect (separate, or packed with depth)
    pub(crate) fn stencil_attachment(&self) -> Option<&Attachment> {
        self.stencil.as_deref().map(as_vulkan).or_else(|| {
            self.depth_attachment().filter(|depth| depth.desc().format.has_stencil())
        })
    }

    /// Every attachment, color first
    pub(crate) fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.color_attachments()
            .chain(self.depth_attachment())
            .chain(self.stencil.as_deref().map(as_vulkan))
    }

    /// Formats a pipeline drawing into this framebuffer is built for
    pub(crate) fn rendering_formats(&self) -> RenderingFormats {
        let depth = self.depth_attachment()
            .filter(|a| a.desc().format.has_depth())
            .map_or(vk::Format::UNDEFINED, |a| a.format);
        let stencil = self.stencil_attachment().map_or(vk::Format::UNDEFINED, |a| a.format);
        RenderingFormats {
            color: self.color_attachments().map(|a| a.format).collect(),
            depth,
            stencil,
            samples: self.samples,
        }
    }
}

/// Attachment formats and sample count, part of every pipeline key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RenderingFormats {
    pub color: Vec<vk::Format>,
    pub depth: vk::Format,
    pub stencil: vk::Format,
    pub samples: u32,
}

/// Attachments handed to this device were created by it
pub(crate) fn as_vulkan(attachment: &dyn BackendAttachment) -> &Attachment {
    unsafe { &*(attachment as *const dyn BackendAttachment as *const Attachment) }
}

pub(crate) fn as_vulkan_framebuffer(framebuffer: &dyn BackendFramebuffer) -> &Framebuffer {
    unsafe { &*(framebuffer as *const dyn BackendFramebuffer as *const Framebuffer) }
}

impl BackendFramebuffer for Framebuffer {
    fn name(&self) -> &str {
        &self.name
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn samples(&self) -> u32 {
        self.samples
    }
}
