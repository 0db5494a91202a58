/// Attachment trait - renderbuffers and render-target textures
///
/// Attachments are the images a target set renders into. Texture-backed
/// attachments can also be sampled later in the frame (shadow atlas, resolved
/// color for tonemapping, stencil copy for soft shadows); renderbuffer-backed
/// ones cannot.

/// Opaque sampled-texture handle
///
/// With bindless textures enabled this is the value written into per-draw
/// parameters; otherwise it is bound to a texture unit with
/// `GraphicsDevice::bind_texture`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TextureHandle(pub u64);

impl TextureHandle {
    /// No texture bound
    pub const NONE: TextureHandle = TextureHandle(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Split the handle into the two 32-bit words shaders receive
    pub fn to_words(&self) -> [u32; 2] {
        [self.0 as u32, (self.0 >> 32) as u32]
    }
}

/// Pixel format of an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum AttachmentFormat {
    R8G8B8A8_UNORM,
    R16G16B16A16_SFLOAT,
    D24_UNORM,
    D32_SFLOAT,
    D24_UNORM_S8_UINT,
    D32_SFLOAT_S8_UINT,
    S8_UINT,
}

impl AttachmentFormat {
    /// Format carries a depth aspect
    pub fn has_depth(&self) -> bool {
        matches!(
            self,
            AttachmentFormat::D24_UNORM
                | AttachmentFormat::D32_SFLOAT
                | AttachmentFormat::D24_UNORM_S8_UINT
                | AttachmentFormat::D32_SFLOAT_S8_UINT
        )
    }

    /// Format carries a stencil aspect
    pub fn has_stencil(&self) -> bool {
        matches!(
            self,
            AttachmentFormat::D24_UNORM_S8_UINT
                | AttachmentFormat::D32_SFLOAT_S8_UINT
                | AttachmentFormat::S8_UINT
        )
    }

    pub fn is_color(&self) -> bool {
        !self.has_depth() && !self.has_stencil()
    }
}

/// Storage backing an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentStorage {
    /// Render-only storage, cannot be sampled
    Renderbuffer,
    /// Sampleable texture
    Texture,
}

/// Descriptor for creating an attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentDesc {
    /// Debug name (e.g., "primary.color0")
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Sample count (1 = not multisampled)
    pub samples: u32,
    pub format: AttachmentFormat,
    pub storage: AttachmentStorage,
}

/// Attachment resource trait
///
/// Implemented by backend-specific image types. Destroyed when dropped.
pub trait Attachment: Send + Sync {
    /// Descriptor the attachment was created with
    fn desc(&self) -> &AttachmentDesc;

    /// Sampled handle for texture-backed attachments
    fn texture_handle(&self) -> Option<TextureHandle>;
}
