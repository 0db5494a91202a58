/// Render target set - attachments grouped for one named purpose
///
/// A set owns its attachments and the framebuffer binding them. It is either
/// `Valid` (fully built and complete) or `Uninitialized`; every rebuild is a
/// full teardown followed by creation from scratch.

use std::sync::Arc;

use crate::error::Result;
use crate::graphics_device::{
    Attachment, AttachmentDesc, AttachmentFormat, AttachmentStorage, BlitMask, Framebuffer,
    FramebufferDesc, GraphicsDevice, TextureHandle,
};
use crate::settings::DepthBits;
use crate::{engine_debug, engine_error};

/// Aspects copied by `FrameTargetSet::resolve`
pub type ResolveMask = BlitMask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSetState {
    Uninitialized,
    Valid,
}

/// Depth/stencil layout of the primary set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryLayout {
    pub depth_bits: DepthBits,
    /// Stencil in its own attachment instead of packed depth-stencil
    pub separate_stencil: bool,
}

impl Default for PrimaryLayout {
    fn default() -> Self {
        Self { depth_bits: DepthBits::D24, separate_stencil: false }
    }
}

impl PrimaryLayout {
    fn depth_format(&self) -> AttachmentFormat {
        match (self.depth_bits, self.separate_stencil) {
            (DepthBits::D24, false) => AttachmentFormat::D24_UNORM_S8_UINT,
            (DepthBits::D32, false) => AttachmentFormat::D32_SFLOAT_S8_UINT,
            (DepthBits::D24, true) => AttachmentFormat::D24_UNORM,
            (DepthBits::D32, true) => AttachmentFormat::D32_SFLOAT,
        }
    }
}

/// Color format of the primary set
pub const PRIMARY_COLOR_FORMAT: AttachmentFormat = AttachmentFormat::R8G8B8A8_UNORM;

fn packed_depth_stencil(depth_bits: DepthBits) -> AttachmentFormat {
    match depth_bits {
        DepthBits::D24 => AttachmentFormat::D24_UNORM_S8_UINT,
        DepthBits::D32 => AttachmentFormat::D32_SFLOAT_S8_UINT,
    }
}

fn depth_only(depth_bits: DepthBits) -> AttachmentFormat {
    match depth_bits {
        DepthBits::D24 => AttachmentFormat::D24_UNORM,
        DepthBits::D32 => AttachmentFormat::D32_SFLOAT,
    }
}

pub struct FrameTargetSet {
    name: String,
    width: u32,
    height: u32,
    samples: u32,
    colors: Vec<Arc<dyn Attachment>>,
    depth: Option<Arc<dyn Attachment>>,
    stencil: Option<Arc<dyn Attachment>>,
    framebuffer: Option<Arc<dyn Framebuffer>>,
    /// Single-sample copy target of a multisampled set
    resolve: Option<Box<FrameTargetSet>>,
    state: TargetSetState,
}

impl FrameTargetSet {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            width: 0,
            height: 0,
            samples: 1,
            colors: Vec::new(),
            depth: None,
            stencil: None,
            framebuffer: None,
            resolve: None,
            state: TargetSetState::Uninitialized,
        }
    }

    // ===== Accessors =====

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn state(&self) -> TargetSetState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state == TargetSetState::Valid
    }

    pub fn framebuffer(&self) -> Option<&Arc<dyn Framebuffer>> {
        self.framebuffer.as_ref()
    }

    pub fn resolve_set(&self) -> Option<&FrameTargetSet> {
        self.resolve.as_deref()
    }

    /// The set to sample from: the resolve set when multisampled
    pub fn sample_source(&self) -> &FrameTargetSet {
        self.resolve.as_deref().unwrap_or(self)
    }

    pub fn color_texture(&self, slot: usize) -> Option<TextureHandle> {
        self.colors.get(slot).and_then(|a| a.texture_handle())
    }

    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.depth.as_ref().and_then(|a| a.texture_handle())
    }

    /// Texture holding the stencil aspect: the separate stencil, or packed depth
    pub fn stencil_texture(&self) -> Option<TextureHandle> {
        let packed = self.depth.as_ref().filter(|a| a.desc().format.has_stencil());
        self.stencil.as_ref().or(packed).and_then(|a| a.texture_handle())
    }

    /// Descriptors of every attachment: colors, then depth, then stencil
    pub fn attachment_descs(&self) -> Vec<AttachmentDesc> {
        self.colors.iter()
            .chain(self.depth.iter())
            .chain(self.stencil.iter())
            .map(|a| a.desc().clone())
            .collect()
    }

    pub fn has_separate_stencil(&self) -> bool {
        self.stencil.is_some()
    }

    // ===== Construction =====

    /// Rebuild the primary view set: one color, depth and stencil
    ///
    /// Multisampled sets render into renderbuffers and get a single-sample,
    /// texture-backed resolve set named `<name>_resolve`. Returns the result
    /// of `check_complete`.
    pub fn create_primary(
        &mut self,
        device: &dyn GraphicsDevice,
        width: u32,
        height: u32,
        samples: u32,
        layout: PrimaryLayout,
    ) -> Result<bool> {
        let samples = samples.max(1);
        self.rebuild(|set| {
            let storage = if samples > 1 { AttachmentStorage::Renderbuffer } else { AttachmentStorage::Texture };
            set.colors = vec![set.attachment(device, "color0", width, height, samples, PRIMARY_COLOR_FORMAT, storage)?];
            set.depth = Some(set.attachment(device, "depth", width, height, samples, layout.depth_format(), storage)?);
            if layout.separate_stencil {
                set.stencil = Some(set.attachment(device, "stencil", width, height, samples, AttachmentFormat::S8_UINT, storage)?);
            }

            if samples > 1 {
                let mut resolve = FrameTargetSet::new(&format!("{}_resolve", set.name));
                resolve.create_textures(
                    device,
                    width,
                    height,
                    Some(PRIMARY_COLOR_FORMAT),
                    Some(layout.depth_format()),
                    layout.separate_stencil.then_some(AttachmentFormat::S8_UINT),
                )?;
                set.resolve = Some(Box::new(resolve));
            }
            set.build(device, width, height, samples)
        })?;

        engine_debug!("umbra::FrameTargetSet", "Built '{}' {}x{} x{} ({:?}, separate stencil: {})",
            self.name, width, height, samples, layout.depth_bits, layout.separate_stencil);

        Ok(self.check_complete(device))
    }

    /// Rebuild as a square depth-only texture holding shadow map pages
    pub fn create_shadow_atlas(&mut self, device: &dyn GraphicsDevice, size: u32, depth_bits: DepthBits) -> Result<bool> {
        self.rebuild(|set| set.create_textures(device, size, size, None, Some(depth_only(depth_bits)), None))?;
        Ok(self.check_complete(device))
    }

    /// Rebuild as a single color texture (post-process)
    pub fn create_color(
        &mut self,
        device: &dyn GraphicsDevice,
        width: u32,
        height: u32,
        format: AttachmentFormat,
    ) -> Result<bool> {
        self.rebuild(|set| set.create_textures(device, width, height, Some(format), None, None))?;
        Ok(self.check_complete(device))
    }

    /// Rebuild as a sampleable, single-sample copy of the primary stencil
    ///
    /// The attachment has the format of the one carrying stencil in
    /// `layout`: packed depth-stencil, or `S8_UINT` alone when the stencil
    /// is separate. A multisampled primary is resolved into it.
    pub fn create_stencil_copy(
        &mut self,
        device: &dyn GraphicsDevice,
        width: u32,
        height: u32,
        layout: PrimaryLayout,
    ) -> Result<bool> {
        self.rebuild(|set| {
            if layout.separate_stencil {
                set.create_textures(device, width, height, None, None, Some(AttachmentFormat::S8_UINT))
            } else {
                set.create_textures(device, width, height, None, Some(packed_depth_stencil(layout.depth_bits)), None)
            }
        })?;
        Ok(self.check_complete(device))
    }

    /// Tear down, then run `create`; a failure leaves the set torn down
    fn rebuild<F>(&mut self, create: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.teardown();
        let result = create(self);
        if let Err(e) = &result {
            engine_error!("umbra::FrameTargetSet", "Building '{}' failed: {}", self.name, e);
            self.teardown();
        }
        result
    }

    fn create_textures(
        &mut self,
        device: &dyn GraphicsDevice,
        width: u32,
        height: u32,
        color: Option<AttachmentFormat>,
        depth: Option<AttachmentFormat>,
        stencil: Option<AttachmentFormat>,
    ) -> Result<()> {
        if let Some(format) = color {
            let attachment = self.attachment(device, "color0", width, height, 1, format, AttachmentStorage::Texture)?;
            self.colors.push(attachment);
        }
        if let Some(format) = depth {
            self.depth = Some(self.attachment(device, "depth", width, height, 1, format, AttachmentStorage::Texture)?);
        }
        if let Some(format) = stencil {
            self.stencil = Some(self.attachment(device, "stencil", width, height, 1, format, AttachmentStorage::Texture)?);
        }
        self.build(device, width, height, 1)
    }

    #[allow(clippy::too_many_arguments)]
    fn attachment(
        &self,
        device: &dyn GraphicsDevice,
        suffix: &str,
        width: u32,
        height: u32,
        samples: u32,
        format: AttachmentFormat,
        storage: AttachmentStorage,
    ) -> Result<Arc<dyn Attachment>> {
        device.create_attachment(&AttachmentDesc {
            name: format!("{}.{}", self.name, suffix),
            width,
            height,
            samples,
            format,
            storage,
        })
    }

    fn build(&mut self, device: &dyn GraphicsDevice, width: u32, height: u32, samples: u32) -> Result<()> {
        let framebuffer = device.create_framebuffer(&FramebufferDesc {
            name: self.name.clone(),
            color_attachments: self.colors.clone(),
            depth_attachment: self.depth.clone(),
            stencil_attachment: self.stencil.clone(),
            width,
            height,
        })?;

        self.framebuffer = Some(framebuffer);
        self.width = width;
        self.height = height;
        self.samples = samples;
        self.state = TargetSetState::Valid;
        Ok(())
    }

    /// Drop every attachment and the framebuffer
    pub fn teardown(&mut self) {
        self.framebuffer = None;
        self.colors.clear();
        self.depth = None;
        self.stencil = None;
        self.resolve = None;
        self.width = 0;
        self.height = 0;
        self.samples = 1;
        self.state = TargetSetState::Uninitialized;
    }

    // ===== Validation =====

    /// Query completeness of the set (and its resolve set)
    ///
    /// An incomplete set logs its name, attachment point and status code,
    /// then tears down. The fallback rebuild is up to the caller.
    pub fn check_complete(&mut self, device: &dyn GraphicsDevice) -> bool {
        let Some(framebuffer) = &self.framebuffer else {
            return false;
        };

        let status = device.framebuffer_status(framebuffer.as_ref());
        let resolve_complete = match self.resolve.as_deref_mut() {
            Some(resolve) => resolve.check_complete(device),
            None => true,
        };

        if !status.is_complete() {
            engine_error!("umbra::FrameTargetSet",
                "Target set '{}' incomplete at {:?}: status 0x{:X} ({:?})",
                self.name, status.attachment_point(), status.code(), status);
        }
        if !status.is_complete() || !resolve_complete {
            self.teardown();
            return false;
        }
        true
    }

    // ===== Resolve / scope =====

    /// Copy the masked aspects into the resolve set; no-op when single-sampled
    pub fn resolve(&self, device: &dyn GraphicsDevice, mask: ResolveMask) -> Result<()> {
        let (Some(source), Some(resolve)) = (&self.framebuffer, &self.resolve) else {
            return Ok(());
        };
        let Some(target) = resolve.framebuffer() else {
            return Ok(());
        };
        device.blit_framebuffer(source, Some(target), mask)
    }

    /// Bind the set and open a scope that leaves it exactly once
    pub fn enter_primary(&self, device: Arc<dyn GraphicsDevice>, presentation: Presentation) -> Result<PrimaryScope> {
        let Some(framebuffer) = self.framebuffer.clone() else {
            return Err(crate::engine_err!("umbra::FrameTargetSet",
                "Cannot enter '{}': target set is not built", self.name));
        };
        device.bind_framebuffer(Some(&framebuffer))?;

        Ok(PrimaryScope {
            device,
            primary: framebuffer,
            resolve: self.resolve.as_ref().and_then(|r| r.framebuffer().cloned()),
            presentation,
            finished: false,
        })
    }
}

// ============================================================================
// PrimaryScope
// ============================================================================

/// Where the finished primary image goes when the scope is left
pub enum Presentation {
    /// Blit color to the presentation surface
    Blit,
    /// Blit the masked aspects of another set instead (debug inspection)
    Inspect(Arc<dyn Framebuffer>, BlitMask),
    /// Leave it for a later pass (tonemapping presents)
    Deferred,
}

/// Scoped rendering into the primary set
///
/// Leaving resolves the multisampled color, hands the image to the
/// presentation surface, and unbinds. `finish` leaves explicitly and reports
/// errors; dropping an unfinished scope leaves and logs them.
pub struct PrimaryScope {
    device: Arc<dyn GraphicsDevice>,
    primary: Arc<dyn Framebuffer>,
    resolve: Option<Arc<dyn Framebuffer>>,
    presentation: Presentation,
    finished: bool,
}

impl PrimaryScope {
    pub fn finish(mut self) -> Result<()> {
        self.leave()
    }

    fn leave(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        if let Some(resolve) = &self.resolve {
            self.device.blit_framebuffer(&self.primary, Some(resolve), BlitMask::COLOR)?;
        }

        let source = self.resolve.as_ref().unwrap_or(&self.primary);
        match &self.presentation {
            Presentation::Blit => self.device.blit_framebuffer(source, None, BlitMask::COLOR)?,
            Presentation::Inspect(target, mask) => self.device.blit_framebuffer(target, None, *mask)?,
            Presentation::Deferred => {}
        }
        self.device.bind_framebuffer(None)
    }
}

impl Drop for PrimaryScope {
    fn drop(&mut self) {
        if let Err(e) = self.leave() {
            engine_error!("umbra::FrameTargetSet", "Leaving primary target failed: {}", e);
        }
    }
}

#[cfg(test)]
#[path = "frame_target_set_tests.rs"]
mod tests;
