/// Render backend - the per-view frame driver
///
/// Owns everything shared between stages (the parameter ring behind the
/// batch executor, the target sets, the render settings) and runs the stages
/// over each view in a fixed order:
///
/// depth pre-pass, then per light (shadows, interactions), shader passes for
/// solid then translucent surfaces, fog and blend lights, outlines, debug
/// overlays, and finally tonemapping once the primary target was left.
///
/// `end_frame` fences the frame's parameter data with a single ring lock.

use std::sync::Arc;
use glam::Vec4;

use crate::batch::{BatchExecutor, BatchStats};
use crate::error::Result;
use crate::frontend::{DrawSurface, LightKind, VertexCacheBuffers, ViewDef, ViewLight};
use crate::graphics_device::{
    BlitMask, ClearValues, GraphicsDevice, ProgramManager, VIEW_PARAMS_BINDING,
};
use crate::settings::{BackendConfig, RenderSettings, ShadowTechnique};
use crate::stage::{
    DebugStage, DepthStage, FogStage, InteractionStage, OutlineStage, ShaderPassStage,
    ShadowMapStage, Stage, StageContext, StencilShadowStage, SurfaceStage, TonemapStage,
    ViewParams, STENCIL_SHADOW_REF,
};
use crate::target::{FrameTargets, Presentation, ShadowPage, SHADOW_STENCIL};
use crate::{engine_bail, engine_debug, engine_error, engine_info, engine_trace, engine_warn};

/// Color the primary target is cleared to before each view
pub const VIEW_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Counters of one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Multi-draw submissions
    pub draw_submissions: u64,
    /// Batch flushes
    pub batches: u64,
    /// Surfaces drawn, summed over stages
    pub surfaces: u64,
    /// Surfaces skipped for invalid vertex caches
    pub skipped_surfaces: u64,
    /// Lights drawn (normal, fog and blend)
    pub lights: u64,
    /// Ring reservations that had to block on a fence
    pub fence_waits: u64,
}

// ============================================================================
// Stages
// ============================================================================

/// One value of every stage, called directly by the driver
struct Stages {
    depth: DepthStage,
    stencil_shadow: StencilShadowStage,
    shadow_map: ShadowMapStage,
    interaction: InteractionStage,
    shader_pass: ShaderPassStage,
    fog: FogStage,
    outline: OutlineStage,
    tonemap: TonemapStage,
    debug: DebugStage,
}

impl Stages {
    fn new(config: &BackendConfig) -> Self {
        Self {
            depth: DepthStage::new(),
            stencil_shadow: StencilShadowStage::new(),
            shadow_map: ShadowMapStage::new(config.shadow_polygon_offset),
            interaction: InteractionStage::new(),
            shader_pass: ShaderPassStage::new(),
            fog: FogStage::new(),
            outline: OutlineStage::new(),
            tonemap: TonemapStage::new(),
            debug: DebugStage::new(),
        }
    }

    fn all(&mut self) -> [&mut dyn Stage; 9] {
        [
            &mut self.depth,
            &mut self.stencil_shadow,
            &mut self.shadow_map,
            &mut self.interaction,
            &mut self.shader_pass,
            &mut self.fog,
            &mut self.outline,
            &mut self.tonemap,
            &mut self.debug,
        ]
    }

    /// Everything drawn inside the primary scope; returns the lights drawn
    fn draw_view<'a>(
        &mut self,
        ctx: &mut StageContext<'a>,
        view: &'a ViewDef,
        pages: &[Option<ShadowPage>],
    ) -> Result<u64> {
        self.depth.draw(ctx, &view.surfaces)?;
        ctx.device.check_errors("depth pre-pass")?;

        let mut lights = 0;
        for (light, page) in view.lights.iter().zip(pages) {
            if light.kind != LightKind::Normal || !light.has_interactions() {
                continue;
            }
            self.draw_light(ctx, light, *page)?;
            lights += 1;
        }
        ctx.device.check_errors("interactions")?;

        let (translucent, solid): (Vec<DrawSurface>, Vec<DrawSurface>) =
            view.surfaces.iter().cloned().partition(|s| s.material.is_translucent());
        self.shader_pass.draw(ctx, &solid)?;
        self.shader_pass.draw(ctx, &translucent)?;
        ctx.device.check_errors("shader passes")?;

        for light in view.lights.iter().filter(|l| l.kind != LightKind::Normal) {
            if light.interactions.is_empty() {
                continue;
            }
            ctx.light = Some(light);
            self.fog.draw(ctx, &light.interactions)?;
            lights += 1;
        }
        ctx.light = None;

        self.outline.draw(ctx, &view.surfaces)?;
        self.debug.draw(ctx, &view.surfaces)?;
        ctx.device.check_errors("overlays")?;
        Ok(lights)
    }

    fn draw_light<'a>(
        &mut self,
        ctx: &mut StageContext<'a>,
        light: &'a ViewLight,
        page: Option<ShadowPage>,
    ) -> Result<()> {
        ctx.light = Some(light);
        ctx.shadow_page = page;

        if light.casts_shadows() {
            match ctx.settings.shadow_technique.get() {
                ShadowTechnique::StencilVolume => {
                    ctx.device.set_scissor(ctx.view.scissor.intersect(&light.scissor));
                    ctx.device.clear(&ClearValues::stencil_only(STENCIL_SHADOW_REF))?;
                    self.stencil_shadow.draw(ctx, &light.shadows)?;
                    if ctx.settings.soft_shadow_quality.get() > 0 {
                        copy_stencil(ctx)?;
                    }
                }
                ShadowTechnique::ShadowMap => {
                    if page.is_some() {
                        self.shadow_map.draw(ctx, &light.shadows)?;
                        rebind_primary(ctx)?;
                    }
                }
            }
        }

        self.interaction.draw(ctx, &light.interactions)?;
        self.interaction.draw(ctx, &light.translucent_interactions)?;

        ctx.light = None;
        ctx.shadow_page = None;
        Ok(())
    }
}

/// Bind the primary set again and restore the view viewport
fn rebind_primary(ctx: &mut StageContext<'_>) -> Result<()> {
    let Some(primary) = ctx.targets.primary().and_then(|set| set.framebuffer()) else {
        engine_bail!("umbra::RenderBackend", "Primary target set vanished during the view");
    };
    ctx.device.bind_framebuffer(Some(primary))?;
    ctx.device.set_viewport(ctx.view.viewport);
    Ok(())
}

/// Copy the shadow stencil into the sampleable stencil copy
fn copy_stencil(ctx: &mut StageContext<'_>) -> Result<()> {
    let primary = ctx.targets.primary().and_then(|set| set.framebuffer());
    let copy = ctx.targets.get(SHADOW_STENCIL)
        .filter(|set| set.is_valid())
        .and_then(|set| set.framebuffer());
    match (primary, copy) {
        (Some(primary), Some(copy)) => {
            ctx.device.blit_framebuffer(primary, Some(copy), BlitMask::STENCIL)?;
            ctx.device.bind_framebuffer(Some(primary))
        }
        _ => {
            engine_warn!("umbra::RenderBackend", "No stencil copy target, soft shadows fall back to the stencil test");
            Ok(())
        }
    }
}

// ============================================================================
// RenderBackend
// ============================================================================

pub struct RenderBackend {
    device: Arc<dyn GraphicsDevice>,
    settings: RenderSettings,
    batches: BatchExecutor,
    targets: FrameTargets,
    stages: Stages,
    initialized: bool,
    /// Counters of the frame being recorded
    frame: BackendStats,
    /// Counters of the last completed frame
    last_frame: BackendStats,
    /// Executor and ring counters when the current frame started
    frame_start: (BatchStats, u64),
    frames: u64,
}

impl RenderBackend {
    /// Create the backend and its shared parameter ring
    ///
    /// Target sets are built by the first `draw_view`; stages need `init`.
    pub fn new(
        device: Arc<dyn GraphicsDevice>,
        config: BackendConfig,
        vertex_caches: VertexCacheBuffers,
    ) -> Result<Self> {
        let batches = BatchExecutor::new(Arc::clone(&device), &config, vertex_caches)?;
        let targets = FrameTargets::new(config.shadow_atlas_pages_per_row);
        let frame_start = (batches.stats(), batches.ring_stats().blocking_waits);

        engine_info!("umbra::RenderBackend", "Render backend created ({} byte parameter ring, {} draws per batch)",
            config.param_buffer_size, config.max_draws_per_batch);

        Ok(Self {
            device,
            settings: config.settings.clone(),
            batches,
            targets,
            stages: Stages::new(&config),
            initialized: false,
            frame: BackendStats::default(),
            last_frame: BackendStats::default(),
            frame_start,
            frames: 0,
        })
    }

    /// Load every stage's programs
    ///
    /// # Errors
    ///
    /// The first program that fails to load aborts initialization.
    pub fn init(&mut self, programs: &dyn ProgramManager) -> Result<()> {
        for stage in self.stages.all() {
            let name = stage.name();
            stage.init(programs, &self.batches).map_err(|e| {
                engine_error!("umbra::RenderBackend", "{} failed to initialize: {}", name, e);
                e
            })?;
        }
        self.initialized = true;
        engine_info!("umbra::RenderBackend", "All stages initialized");
        Ok(())
    }

    /// Release stage programs and wait for the GPU
    pub fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        for stage in self.stages.all() {
            stage.shutdown();
        }
        self.initialized = false;
        if let Err(e) = self.device.wait_idle() {
            engine_warn!("umbra::RenderBackend", "wait_idle failed during shutdown: {}", e);
        }
        engine_info!("umbra::RenderBackend", "Render backend shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    // ===== Accessors =====

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.device
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Settings changed here take effect at the next `draw_view`
    pub fn settings_mut(&mut self) -> &mut RenderSettings {
        &mut self.settings
    }

    pub fn targets(&self) -> &FrameTargets {
        &self.targets
    }

    pub fn batches(&self) -> &BatchExecutor {
        &self.batches
    }

    /// Counters of the last completed frame
    pub fn stats(&self) -> BackendStats {
        self.last_frame
    }

    /// Frames completed by `end_frame`
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    pub fn set_outline_thickness(&mut self, thickness: f32) {
        self.stages.outline.set_thickness(thickness);
    }

    // ===== Frame =====

    /// Render one view into the primary target and present it
    ///
    /// # Errors
    ///
    /// Fatal device errors, fence timeouts and incomplete target sets (after
    /// the fallback) are returned; the primary target is left either way.
    pub fn draw_view(&mut self, view: &ViewDef) -> Result<()> {
        if !self.initialized {
            engine_bail!("umbra::RenderBackend", "draw_view called before init");
        }

        if self.targets.apply_settings(self.device.as_ref(), &mut self.settings, view.render_width, view.render_height)? {
            engine_debug!("umbra::RenderBackend", "Target sets rebuilt for {}x{}", view.render_width, view.render_height);
        }

        let viewport = view.viewport;
        let view_params = ViewParams {
            projection: view.projection,
            world_to_view: view.world_to_view,
            view_origin: view.view_origin.extend(1.0),
            viewport: Vec4::new(viewport.x as f32, viewport.y as f32, viewport.width as f32, viewport.height as f32),
        };
        self.batches.upload_uniforms(VIEW_PARAMS_BINDING, &view_params)?;

        let pages = self.allocate_shadow_pages(view);

        let presentation = self.targets.presentation(&self.settings);
        let deferred = matches!(presentation, Presentation::Deferred);
        let scope = self.targets.enter_primary(Arc::clone(&self.device), presentation)?;

        self.device.set_viewport(view.viewport);
        self.device.set_scissor(view.scissor);
        self.device.clear(&ClearValues {
            color: Some(VIEW_CLEAR_COLOR),
            depth: Some(1.0),
            stencil: Some(0),
        })?;

        let mut ctx = StageContext::new(self.device.as_ref(), &mut self.batches, &self.targets, &self.settings, view);
        let lights = self.stages.draw_view(&mut ctx, view, &pages)?;
        let counters = ctx.counters;

        scope.finish()?;

        if deferred {
            let mut ctx = StageContext::new(self.device.as_ref(), &mut self.batches, &self.targets, &self.settings, view);
            self.stages.tonemap.present(&mut ctx)?;
        }

        self.frame.surfaces += counters.surfaces;
        self.frame.skipped_surfaces += counters.skipped_surfaces;
        self.frame.lights += lights;

        engine_trace!("umbra::RenderBackend", "View drawn: {} surfaces, {} lights", counters.surfaces, lights);
        Ok(())
    }

    /// Close the frame: fence its parameter data and roll the counters
    pub fn end_frame(&mut self) -> Result<()> {
        self.batches.lock()?;
        self.targets.reset_shadow_pages();

        let batch_stats = self.batches.stats();
        let waits = self.batches.ring_stats().blocking_waits;
        let (start, start_waits) = self.frame_start;
        self.frame.draw_submissions = batch_stats.draw_submissions - start.draw_submissions;
        self.frame.batches = batch_stats.batches - start.batches;
        self.frame.skipped_surfaces += batch_stats.skipped_draws - start.skipped_draws;
        self.frame.fence_waits = waits - start_waits;
        self.last_frame = std::mem::take(&mut self.frame);
        self.frame_start = (batch_stats, waits);
        self.frames += 1;

        self.device.check_errors("end_frame")
    }

    /// Shadow atlas pages of every shadow-mapped light, in light order
    fn allocate_shadow_pages(&mut self, view: &ViewDef) -> Vec<Option<ShadowPage>> {
        let shadow_maps = self.settings.shadow_technique.get() == ShadowTechnique::ShadowMap;
        view.lights.iter().map(|light| {
            if !shadow_maps || light.kind != LightKind::Normal || !light.casts_shadows() || !light.has_interactions() {
                return None;
            }
            let page = self.targets.allocate_shadow_page();
            if page.is_none() {
                engine_warn!("umbra::RenderBackend", "Shadow atlas exhausted, light at {:?} drawn unshadowed", light.origin);
            }
            page
        }).collect()
    }
}

#[cfg(test)]
#[path = "render_backend_tests.rs"]
mod tests;
