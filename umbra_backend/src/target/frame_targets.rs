/// Named registry of the backend's render target sets
///
/// Holds the primary view set and the auxiliary sets the render settings
/// call for (shadow atlas, soft-shadow stencil copy, post-process). Observes
/// the settings' modified flags at the start of every view and rebuilds what
/// they affect.

use std::sync::Arc;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::graphics_device::{AttachmentFormat, BlitMask, GraphicsDevice};
use crate::settings::{RenderSettings, ShadowTechnique};
use crate::{engine_bail, engine_info, engine_warn};
use super::frame_target_set::{FrameTargetSet, PrimaryLayout, PrimaryScope, Presentation};
use super::shadow_atlas::{ShadowAtlas, ShadowPage};

/// Primary view set
pub const PRIMARY: &str = "primary";
/// Depth texture holding shadow map pages
pub const SHADOW_ATLAS: &str = "shadow_atlas";
/// Sampled copy of the primary stencil for soft shadows
pub const SHADOW_STENCIL: &str = "shadow_stencil";
/// Tonemap destination
pub const POST_PROCESS: &str = "post_process";

/// Color format of the post-process set
pub const POST_PROCESS_FORMAT: AttachmentFormat = AttachmentFormat::R8G8B8A8_UNORM;

pub struct FrameTargets {
    target_sets: FxHashMap<String, FrameTargetSet>,
    shadow_atlas: ShadowAtlas,
    /// Render size the current sets were built for
    size: (u32, u32),
    /// Target set constructions so far
    rebuilds: u64,
}

impl FrameTargets {
    pub fn new(shadow_pages_per_row: u32) -> Self {
        Self {
            target_sets: FxHashMap::default(),
            shadow_atlas: ShadowAtlas::new(0, shadow_pages_per_row),
            size: (0, 0),
            rebuilds: 0,
        }
    }

    // ===== Registry =====

    /// Register a new, uninitialized target set
    ///
    /// # Errors
    ///
    /// Returns an error if a set with the same name already exists.
    pub fn create(&mut self, name: &str) -> Result<&mut FrameTargetSet> {
        if self.target_sets.contains_key(name) {
            engine_bail!("umbra::FrameTargets", "Target set '{}' already exists", name);
        }
        Ok(self.target_sets.entry(name.to_string()).or_insert_with(|| FrameTargetSet::new(name)))
    }

    pub fn get(&self, name: &str) -> Option<&FrameTargetSet> {
        self.target_sets.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FrameTargetSet> {
        self.target_sets.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<FrameTargetSet> {
        self.target_sets.remove(name)
    }

    pub fn count(&self) -> usize {
        self.target_sets.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.target_sets.keys().map(|k| k.as_str()).collect()
    }

    /// Remove every target set (releases all attachments)
    pub fn clear(&mut self) {
        self.target_sets.clear();
        self.size = (0, 0);
    }

    pub fn primary(&self) -> Option<&FrameTargetSet> {
        self.get(PRIMARY).filter(|set| set.is_valid())
    }

    /// Number of target set constructions since creation
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    fn ensure(&mut self, name: &str) -> &mut FrameTargetSet {
        self.target_sets.entry(name.to_string()).or_insert_with(|| FrameTargetSet::new(name))
    }

    fn is_valid(&self, name: &str) -> bool {
        self.get(name).is_some_and(|set| set.is_valid())
    }

    // ===== Settings =====

    /// Rebuild every set whose layout the settings or the render size changed
    ///
    /// An incomplete set turns off the feature that asked for its layout,
    /// then everything is rebuilt once more:
    ///
    /// | incomplete set   | fallback                                           |
    /// |------------------|----------------------------------------------------|
    /// | `primary`        | no multisampling, packed stencil, no soft shadows |
    /// | `shadow_atlas`   | stencil shadow volumes                             |
    /// | `shadow_stencil` | no soft shadows                                    |
    /// | `post_process`   | no tonemapping                                     |
    ///
    /// Returns whether anything was rebuilt.
    ///
    /// # Errors
    ///
    /// `IncompleteFramebuffer` when the fallback configuration is incomplete
    /// too; device allocation errors are propagated.
    pub fn apply_settings(
        &mut self,
        device: &dyn GraphicsDevice,
        settings: &mut RenderSettings,
        width: u32,
        height: u32,
    ) -> Result<bool> {
        let (rebuilt, incomplete) = self.rebuild_modified(device, settings, width, height, false)?;

        if !incomplete.is_empty() {
            for name in &incomplete {
                Self::disable_feature_of(name, settings);
            }

            let (_, still_incomplete) = self.rebuild_modified(device, settings, width, height, true)?;
            if !still_incomplete.is_empty() {
                settings.clear_modified();
                return Err(Error::IncompleteFramebuffer(format!(
                    "target sets {:?} incomplete at {}x{} with fallback settings", still_incomplete, width, height
                )));
            }
            engine_info!("umbra::FrameTargets", "Fallback target configuration complete");
        }

        settings.clear_modified();
        Ok(rebuilt || !incomplete.is_empty())
    }

    fn disable_feature_of(name: &str, settings: &mut RenderSettings) {
        match name {
            PRIMARY => {
                engine_warn!("umbra::FrameTargets",
                    "Primary incomplete with multisample {} / separate stencil {} / soft shadows {}, falling back",
                    settings.multisample.get(), settings.separate_stencil.get(), settings.soft_shadow_quality.get());
                settings.multisample.set(1);
                settings.separate_stencil.set(false);
                settings.soft_shadow_quality.set(0);
            }
            SHADOW_ATLAS => {
                engine_warn!("umbra::FrameTargets",
                    "Shadow atlas {} incomplete, falling back to stencil shadows", settings.shadow_atlas_size.get());
                settings.shadow_technique.set(ShadowTechnique::StencilVolume);
            }
            SHADOW_STENCIL => {
                engine_warn!("umbra::FrameTargets", "Stencil copy incomplete, disabling soft shadows");
                settings.soft_shadow_quality.set(0);
            }
            POST_PROCESS => {
                engine_warn!("umbra::FrameTargets", "Post-process target incomplete, disabling tonemapping");
                settings.tonemap.set(false);
            }
            _ => {}
        }
    }

    fn rebuild_modified(
        &mut self,
        device: &dyn GraphicsDevice,
        settings: &RenderSettings,
        width: u32,
        height: u32,
        force: bool,
    ) -> Result<(bool, Vec<&'static str>)> {
        let resized = force || self.size != (width, height);
        let mut rebuilt = false;
        let mut incomplete = Vec::new();

        if resized || settings.primary_layout_modified() || !self.is_valid(PRIMARY) {
            let samples = settings.multisample.get().clamp(1, device.limits().max_samples.max(1));
            let layout = PrimaryLayout {
                depth_bits: settings.depth_bits.get(),
                separate_stencil: settings.separate_stencil.get(),
            };
            if !self.ensure(PRIMARY).create_primary(device, width, height, samples, layout)? {
                incomplete.push(PRIMARY);
            }
            self.rebuilds += 1;
            rebuilt = true;
        }

        if settings.shadow_technique.get() == ShadowTechnique::ShadowMap {
            if force || settings.shadow_layout_modified() || !self.is_valid(SHADOW_ATLAS) {
                let size = settings.shadow_atlas_size.get();
                if !self.ensure(SHADOW_ATLAS).create_shadow_atlas(device, size, settings.depth_bits.get())? {
                    incomplete.push(SHADOW_ATLAS);
                }
                self.shadow_atlas.resize(size);
                self.rebuilds += 1;
                rebuilt = true;
            }
        } else if self.remove(SHADOW_ATLAS).is_some() {
            rebuilt = true;
        }

        let soft_stencil = settings.shadow_technique.get() == ShadowTechnique::StencilVolume
            && settings.soft_shadow_quality.get() > 0;
        if soft_stencil {
            if resized
                || settings.shadow_layout_modified()
                || settings.separate_stencil.is_modified()
                || !self.is_valid(SHADOW_STENCIL)
            {
                let layout = PrimaryLayout {
                    depth_bits: settings.depth_bits.get(),
                    separate_stencil: settings.separate_stencil.get(),
                };
                if !self.ensure(SHADOW_STENCIL).create_stencil_copy(device, width, height, layout)? {
                    incomplete.push(SHADOW_STENCIL);
                }
                self.rebuilds += 1;
                rebuilt = true;
            }
        } else if self.remove(SHADOW_STENCIL).is_some() {
            rebuilt = true;
        }

        if settings.tonemap.get() {
            if resized || settings.tonemap.is_modified() || !self.is_valid(POST_PROCESS) {
                if !self.ensure(POST_PROCESS).create_color(device, width, height, POST_PROCESS_FORMAT)? {
                    incomplete.push(POST_PROCESS);
                }
                self.rebuilds += 1;
                rebuilt = true;
            }
        } else if self.remove(POST_PROCESS).is_some() {
            rebuilt = true;
        }

        self.size = (width, height);
        Ok((rebuilt, incomplete))
    }

    // ===== Primary scope =====

    /// Where the primary image goes when the primary scope is left
    ///
    /// A valid `debug_target` set is inspected instead of the primary one;
    /// with tonemapping the tonemap pass presents.
    pub fn presentation(&self, settings: &RenderSettings) -> Presentation {
        if let Some(name) = settings.debug_target.value() {
            match self.get(name).filter(|set| set.is_valid()) {
                Some(set) => {
                    let source = set.sample_source();
                    let mask = if source.color_texture(0).is_some() { BlitMask::COLOR } else { BlitMask::DEPTH };
                    if let Some(framebuffer) = source.framebuffer() {
                        return Presentation::Inspect(Arc::clone(framebuffer), mask);
                    }
                }
                None => engine_warn!("umbra::FrameTargets", "Debug target '{}' is not available", name),
            }
        }

        if settings.tonemap.get() && self.is_valid(POST_PROCESS) {
            Presentation::Deferred
        } else {
            Presentation::Blit
        }
    }

    /// Bind the primary set for rendering
    pub fn enter_primary(&self, device: Arc<dyn GraphicsDevice>, presentation: Presentation) -> Result<PrimaryScope> {
        match self.primary() {
            Some(primary) => primary.enter_primary(device, presentation),
            None => Err(Error::InvalidResource("primary target set is not built".to_string())),
        }
    }

    // ===== Shadow atlas pages =====

    pub fn shadow_atlas(&self) -> &ShadowAtlas {
        &self.shadow_atlas
    }

    /// Take a shadow atlas page for this frame, `None` when exhausted
    pub fn allocate_shadow_page(&mut self) -> Option<ShadowPage> {
        if !self.is_valid(SHADOW_ATLAS) {
            return None;
        }
        self.shadow_atlas.allocate()
    }

    /// Release every shadow page (end of frame)
    pub fn reset_shadow_pages(&mut self) {
        self.shadow_atlas.reset();
    }
}

#[cfg(test)]
#[path = "frame_targets_tests.rs"]
mod tests;
