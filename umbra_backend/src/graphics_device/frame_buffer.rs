/// Framebuffer trait - groups attachments into one render destination
///
/// A framebuffer binds together color, depth and stencil attachments that
/// share width, height and sample count. Created by target sets and rebuilt
/// whenever their layout changes.

use std::sync::Arc;
use bitflags::bitflags;
use crate::graphics_device::Attachment;

/// Framebuffer — a bound set of attachments
pub trait Framebuffer: Send + Sync {
    /// Debug name (the owning target set's name)
    fn name(&self) -> &str;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Sample count shared by every attachment
    fn samples(&self) -> u32;
}

/// Descriptor for creating a framebuffer
pub struct FramebufferDesc {
    pub name: String,
    /// Color attachments in slot order
    pub color_attachments: Vec<Arc<dyn Attachment>>,
    /// Depth attachment, or packed depth-stencil
    pub depth_attachment: Option<Arc<dyn Attachment>>,
    /// Separate stencil attachment (None when depth is packed depth-stencil)
    pub stencil_attachment: Option<Arc<dyn Attachment>>,
    pub width: u32,
    pub height: u32,
}

/// Attachment point a completeness failure refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentPoint {
    Color(u32),
    Depth,
    Stencil,
    /// The failure is not tied to a single attachment
    Framebuffer,
}

/// Completeness status of a framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    IncompleteAttachment(AttachmentPoint),
    MissingAttachment,
    IncompleteMultisample(AttachmentPoint),
    Unsupported(AttachmentPoint),
}

impl FramebufferStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, FramebufferStatus::Complete)
    }

    /// Numeric status code, in the familiar GL enumerant space, for logs
    pub fn code(&self) -> u32 {
        match self {
            FramebufferStatus::Complete => 0x8CD5,
            FramebufferStatus::IncompleteAttachment(_) => 0x8CD6,
            FramebufferStatus::MissingAttachment => 0x8CD7,
            FramebufferStatus::Unsupported(_) => 0x8CDD,
            FramebufferStatus::IncompleteMultisample(_) => 0x8D56,
        }
    }

    /// Attachment point the status refers to
    pub fn attachment_point(&self) -> AttachmentPoint {
        match self {
            FramebufferStatus::IncompleteAttachment(point)
            | FramebufferStatus::IncompleteMultisample(point)
            | FramebufferStatus::Unsupported(point) => *point,
            _ => AttachmentPoint::Framebuffer,
        }
    }
}

bitflags! {
    /// Aspects copied by a blit or resolve
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BlitMask: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// Values used by `GraphicsDevice::clear`; `None` leaves the aspect untouched
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
    pub stencil: Option<u32>,
}

impl ClearValues {
    pub fn stencil_only(value: u32) -> Self {
        Self { color: None, depth: None, stencil: Some(value) }
    }

    pub fn depth_only(value: f32) -> Self {
        Self { color: None, depth: Some(value), stencil: None }
    }
}
