//! Backend configuration
//!
//! `BackendConfig` is fixed at construction. `RenderSettings` may change
//! between frames; every value carries a modified flag the frame driver
//! observes to decide what to rebuild.

use std::time::Duration;

// ============================================================================
// Setting<T>
// ============================================================================

/// A value with a "modified since last observed" flag
#[derive(Debug, Clone, PartialEq)]
pub struct Setting<T> {
    value: T,
    modified: bool,
}

impl<T: Clone + PartialEq> Setting<T> {
    pub fn new(value: T) -> Self {
        Self { value, modified: false }
    }

    pub fn get(&self) -> T {
        self.value.clone()
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Change the value; flags it modified only when it actually changes
    pub fn set(&mut self, value: T) {
        if self.value != value {
            self.value = value;
            self.modified = true;
        }
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn clear_modified(&mut self) {
        self.modified = false;
    }

    /// Force the flag without changing the value (e.g., after a device reset)
    pub fn mark_modified(&mut self) {
        self.modified = true;
    }
}

// ============================================================================
// Enumerated settings
// ============================================================================

/// Per-light shadowing technique
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowTechnique {
    /// Stencil shadow volumes
    StencilVolume,
    /// Shadow map pages in the shadow atlas
    ShadowMap,
}

/// Depth buffer precision of the primary target set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthBits {
    D24,
    D32,
}

// ============================================================================
// RenderSettings
// ============================================================================

/// Settings observed at the start of every view
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Primary target sample count (1 = off)
    pub multisample: Setting<u32>,
    pub shadow_technique: Setting<ShadowTechnique>,
    /// Soft shadow sample quality (0 = hard shadows)
    pub soft_shadow_quality: Setting<u32>,
    /// Stencil in its own attachment instead of packed depth-stencil
    pub separate_stencil: Setting<bool>,
    /// Reference textures by handle from per-draw parameters
    pub bindless_textures: Setting<bool>,
    pub depth_bits: Setting<DepthBits>,
    /// Edge length of the shadow atlas
    pub shadow_atlas_size: Setting<u32>,
    /// Tonemap into the post-process target instead of blitting directly
    pub tonemap: Setting<bool>,
    /// Triangle overlay: 0 off, 1 depth tested, 2 through geometry
    pub show_tris: Setting<u32>,
    /// Present another named target set instead of the primary one
    pub debug_target: Setting<Option<String>>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            multisample: Setting::new(1),
            shadow_technique: Setting::new(ShadowTechnique::StencilVolume),
            soft_shadow_quality: Setting::new(0),
            separate_stencil: Setting::new(false),
            bindless_textures: Setting::new(false),
            depth_bits: Setting::new(DepthBits::D24),
            shadow_atlas_size: Setting::new(4096),
            tonemap: Setting::new(false),
            show_tris: Setting::new(0),
            debug_target: Setting::new(None),
        }
    }
}

impl RenderSettings {
    /// A setting that changes the primary target layout was modified
    pub fn primary_layout_modified(&self) -> bool {
        self.multisample.is_modified()
            || self.depth_bits.is_modified()
            || self.separate_stencil.is_modified()
    }

    /// A setting that changes the shadow targets was modified
    pub fn shadow_layout_modified(&self) -> bool {
        self.shadow_technique.is_modified()
            || self.shadow_atlas_size.is_modified()
            || self.soft_shadow_quality.is_modified()
            || self.depth_bits.is_modified()
    }

    pub fn clear_modified(&mut self) {
        self.multisample.clear_modified();
        self.shadow_technique.clear_modified();
        self.soft_shadow_quality.clear_modified();
        self.separate_stencil.clear_modified();
        self.bindless_textures.clear_modified();
        self.depth_bits.clear_modified();
        self.shadow_atlas_size.clear_modified();
        self.tonemap.clear_modified();
        self.show_tris.clear_modified();
        self.debug_target.clear_modified();
    }
}

// ============================================================================
// BackendConfig
// ============================================================================

/// Startup configuration of a `RenderBackend`
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Capacity of the shared per-draw parameter ring, in bytes
    pub param_buffer_size: u64,
    /// Upper bound on draws per batch (also bounded by the uniform block size)
    pub max_draws_per_batch: u32,
    /// Length of one blocking fence wait
    pub fence_wait_slice: Duration,
    /// Total time a reservation may wait on one fence before failing
    pub fence_wait_timeout: Duration,
    /// Shadow atlas pages per row (pages = rows * rows)
    pub shadow_atlas_pages_per_row: u32,
    /// Depth bias applied while rendering shadow maps
    pub shadow_polygon_offset: (f32, f32),
    /// Initial render settings
    pub settings: RenderSettings,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            param_buffer_size: 16 * 1024 * 1024,
            max_draws_per_batch: 256,
            fence_wait_slice: Duration::from_millis(1),
            fence_wait_timeout: Duration::from_secs(1),
            shadow_atlas_pages_per_row: 4,
            shadow_polygon_offset: (1.5, 2.0),
            settings: RenderSettings::default(),
        }
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
