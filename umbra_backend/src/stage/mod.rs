/// Render stages
///
/// Each stage turns a list of surfaces into batched multi-draw submissions
/// for one part of the frame (depth pre-pass, shadows, interactions, ...).
/// Stages share the frame's `BatchExecutor` and see the current view and
/// light through a `StageContext` built by the frame driver.

mod params;
mod depth;
mod stencil_shadow;
mod shadow_map;
mod interaction;
mod shader_pass;
mod fog;
mod outline;
mod tonemap;
mod debug;

pub use params::*;
pub use depth::{DepthStage, SUBVIEW_STENCIL_REF};
pub use stencil_shadow::{StencilShadowStage, STENCIL_SHADOW_REF};
pub use shadow_map::ShadowMapStage;
pub use interaction::{InteractionStage, SHADOW_TEXTURE_UNIT};
pub use shader_pass::{ShaderPassStage, translucent_order};
pub use fog::FogStage;
pub use outline::{OutlineStage, OUTLINE_STENCIL_REF};
pub use tonemap::{TonemapStage, TONEMAP_SOURCE_UNIT};
pub use debug::DebugStage;

#[cfg(test)]
pub(crate) mod test_context;

use std::sync::Arc;
use bytemuck::Pod;
use glam::{Mat4, Vec3, Vec4};

use crate::batch::{Batch, BatchExecutor};
use crate::error::{Error, Result};
use crate::frontend::{DrawSurface, Material, MaterialStage, ViewDef, ViewEntity, ViewLight};
use crate::graphics_device::{
    assign_standard_blocks, DepthRange, GraphicsDevice, PolygonOffset, Program, ProgramDesc,
    ProgramManager, Rect2D, RenderState, TextureHandle, VertexLayoutKind,
};
use crate::settings::RenderSettings;
use crate::target::{FrameTargets, ShadowPage};
use crate::{engine_debug, engine_error};

/// Texture units a surface draw may bind
pub const MAX_SURFACE_TEXTURES: usize = 4;

/// Depth range used by first-person weapon surfaces
pub const WEAPON_DEPTH_RANGE: DepthRange = DepthRange { near: 0.0, far: 0.5 };

/// Polygon offset units per unit of material polygon offset
pub const DECAL_OFFSET_UNITS: f32 = -600.0;

// ============================================================================
// Stage trait
// ============================================================================

/// Common interface of the render stages
///
/// The frame driver owns one value of each concrete stage and calls them
/// directly; the trait fixes the lifecycle every stage follows.
pub trait Stage {
    /// Stage name used in logs and error checks
    fn name(&self) -> &'static str;

    /// Load programs and cache batch capacities
    ///
    /// # Errors
    ///
    /// Program link failure is fatal and returned as is.
    fn init(&mut self, programs: &dyn ProgramManager, batches: &BatchExecutor) -> Result<()>;

    /// Release programs
    fn shutdown(&mut self);
}

/// A stage drawing a list of surfaces
pub trait SurfaceStage: Stage {
    /// Draw `surfaces`
    ///
    /// Surfaces with invalid caches are skipped. An empty list issues no
    /// device call at all.
    fn draw(&mut self, ctx: &mut StageContext<'_>, surfaces: &[DrawSurface]) -> Result<()>;
}

/// Load a program and attach its standard uniform blocks
pub(crate) fn load_stage_program(
    programs: &dyn ProgramManager,
    stage: &str,
    name: &str,
    layout: VertexLayoutKind,
) -> Result<Arc<dyn Program>> {
    let program = programs.load_program(&ProgramDesc::new(name, layout)).map_err(|e| {
        engine_error!("umbra::Stage", "{}: program '{}' failed to load: {}", stage, name, e);
        e
    })?;
    assign_standard_blocks(program.as_ref())?;
    Ok(program)
}

/// Program of an initialized stage
pub(crate) fn require_program<'p>(program: &'p Option<Arc<dyn Program>>, stage: &str) -> Result<&'p Arc<dyn Program>> {
    program.as_ref().ok_or_else(|| Error::InvalidResource(format!("{} used before init", stage)))
}

// ============================================================================
// StageContext
// ============================================================================

/// Surfaces seen by the stages of one view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounters {
    pub surfaces: u64,
    pub skipped_surfaces: u64,
}

/// Everything a stage draws with
pub struct StageContext<'a> {
    pub device: &'a dyn GraphicsDevice,
    pub batches: &'a mut BatchExecutor,
    pub targets: &'a FrameTargets,
    pub settings: &'a RenderSettings,
    pub view: &'a ViewDef,
    /// Light being drawn by per-light stages
    pub light: Option<&'a ViewLight>,
    /// Shadow atlas page of the current light (shadow map path)
    pub shadow_page: Option<ShadowPage>,
    /// Textures travel in per-draw parameters instead of texture units
    pub bindless: bool,
    pub counters: StageCounters,
}

impl<'a> StageContext<'a> {
    pub fn new(
        device: &'a dyn GraphicsDevice,
        batches: &'a mut BatchExecutor,
        targets: &'a FrameTargets,
        settings: &'a RenderSettings,
        view: &'a ViewDef,
    ) -> Self {
        let bindless = settings.bindless_textures.get() && device.limits().bindless_textures;
        Self {
            device,
            batches,
            targets,
            settings,
            view,
            light: None,
            shadow_page: None,
            bindless,
            counters: StageCounters::default(),
        }
    }

    /// Count the surface, or skip it when its caches are invalid
    pub fn accept(&mut self, stage: &str, surface: &DrawSurface) -> bool {
        if !surface.has_valid_caches() {
            engine_debug!("umbra::Stage", "{}: skipping surface of '{}' with invalid vertex cache",
                stage, surface.material.name);
            self.counters.skipped_surfaces += 1;
            return false;
        }
        self.counters.surfaces += 1;
        true
    }

    /// Projection for an entity, with its model depth hack applied
    pub fn projection(&self, space: &ViewEntity) -> Mat4 {
        let mut projection = self.view.projection;
        if space.model_depth_hack != 0.0 {
            projection.w_axis.z -= space.model_depth_hack;
        }
        projection
    }

    /// Model to clip space
    pub fn mvp(&self, space: &ViewEntity) -> Mat4 {
        self.projection(space) * space.model_view_matrix
    }

    pub fn depth_range(&self, space: &ViewEntity) -> DepthRange {
        if space.weapon_depth_hack {
            WEAPON_DEPTH_RANGE
        } else {
            DepthRange::FULL
        }
    }

    /// Scissor shared by every draw of the view, clipped to the current light
    pub fn batch_scissor(&self) -> Rect2D {
        match self.light {
            Some(light) => self.view.scissor.intersect(&light.scissor),
            None => self.view.scissor,
        }
    }

    /// Surface scissor clipped to the batch scissor
    pub fn surface_scissor(&self, surface: &DrawSurface) -> Rect2D {
        self.batch_scissor().intersect(&surface.scissor)
    }

    /// Surface scissor as per-draw clip bounds (min x, min y, max x, max y)
    ///
    /// Shaders discard fragments outside the bounds.
    pub fn clip_bounds(&self, surface: &DrawSurface) -> Vec4 {
        let rect = self.surface_scissor(surface);
        Vec4::new(
            rect.x as f32,
            rect.y as f32,
            (rect.x + rect.width as i32) as f32,
            (rect.y + rect.height as i32) as f32,
        )
    }

    /// Texture to bind to a unit; nothing is bound with bindless textures
    pub fn bound_texture(&self, texture: TextureHandle) -> TextureHandle {
        if self.bindless { TextureHandle::NONE } else { texture }
    }

    /// Handles written into per-draw parameters; zero without bindless textures
    pub fn texture_words(&self, textures: &[TextureHandle]) -> TextureWords {
        let mut words = [0u32; 8];
        if self.bindless {
            for (i, texture) in textures.iter().take(MAX_SURFACE_TEXTURES).enumerate() {
                let [lo, hi] = texture.to_words();
                words[i * 2] = lo;
                words[i * 2 + 1] = hi;
            }
        }
        words
    }

    /// Light origin in the entity's model space
    pub fn light_origin_local(&self, space: &ViewEntity) -> Vec4 {
        let origin = self.light.map_or(Vec3::ZERO, |l| l.origin);
        space.model_matrix.inverse().transform_point3(origin).extend(1.0)
    }

    pub fn view_origin_local(&self, space: &ViewEntity) -> Vec4 {
        space.model_matrix.inverse().transform_point3(self.view.view_origin).extend(1.0)
    }
}

// ============================================================================
// Surface helpers
// ============================================================================

/// Texture matrix rows (s, t) of a material stage, identity without one
pub fn texture_rows(surface: &DrawSurface, stage: Option<&MaterialStage>) -> [Vec4; 2] {
    match stage.and_then(|s| s.texture_matrix) {
        Some([s, t]) => [
            Vec4::new(surface.register(s[0]), surface.register(s[1]), 0.0, surface.register(s[2])),
            Vec4::new(surface.register(t[0]), surface.register(t[1]), 0.0, surface.register(t[2])),
        ],
        None => [Vec4::X, Vec4::Y],
    }
}

/// A stage's condition register is set (or it has none)
pub fn stage_enabled(surface: &DrawSurface, stage: &MaterialStage) -> bool {
    !matches!(stage.condition, Some(register) if surface.register(register) == 0.0)
}

/// Depth bias of decal-style materials
pub fn polygon_offset(material: &Material) -> Option<PolygonOffset> {
    material.polygon_offset.map(|offset| PolygonOffset { factor: 0.0, units: DECAL_OFFSET_UNITS * offset })
}

// ============================================================================
// BatchRun
// ============================================================================

/// GPU state shared by every draw of a batch
///
/// A surface needing a different state flushes the batch before it is
/// appended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawState {
    pub render_state: RenderState,
    /// View scissor clipped to the light; surface scissors travel in the params
    pub scissor: Rect2D,
    /// Textures bound to units 0.. (`NONE` leaves a unit alone)
    pub textures: [TextureHandle; MAX_SURFACE_TEXTURES],
}

impl DrawState {
    pub fn new(render_state: RenderState, scissor: Rect2D) -> Self {
        Self { render_state, scissor, textures: [TextureHandle::NONE; MAX_SURFACE_TEXTURES] }
    }

    pub fn with_textures(mut self, textures: [TextureHandle; MAX_SURFACE_TEXTURES]) -> Self {
        self.textures = textures;
        self
    }
}

/// One bucket of surfaces drawn through a single program
///
/// Nothing reaches the device before the first draw: the program, state
/// and textures are applied lazily, so an empty bucket stays silent.
pub struct BatchRun<P: Pod> {
    batch: Batch<P>,
    program: Arc<dyn Program>,
    program_bound: bool,
    current: Option<DrawState>,
}

impl<P: Pod> BatchRun<P> {
    pub fn begin(ctx: &mut StageContext<'_>, program: &Arc<dyn Program>, layout: VertexLayoutKind) -> Result<Self> {
        Ok(Self {
            batch: ctx.batches.begin_batch::<P>(layout)?,
            program: Arc::clone(program),
            program_bound: false,
            current: None,
        })
    }

    /// Append one surface, flushing first when its state differs
    pub fn draw(&mut self, ctx: &mut StageContext<'_>, surface: &DrawSurface, state: DrawState, params: P) -> Result<()> {
        if !self.program_bound {
            ctx.device.bind_program(Some(&self.program))?;
            self.program_bound = true;
        }
        if self.current != Some(state) {
            ctx.batches.execute_draw_batch(&mut self.batch)?;
            apply_state(ctx.device, self.current.as_ref(), &state)?;
            self.current = Some(state);
        }
        ctx.batches.append(&mut self.batch, surface, params)
    }

    /// Draws accumulated and not yet flushed
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    pub fn finish(self, ctx: &mut StageContext<'_>) -> Result<()> {
        ctx.batches.finish_batch(self.batch)
    }
}

fn apply_state(device: &dyn GraphicsDevice, previous: Option<&DrawState>, next: &DrawState) -> Result<()> {
    if previous.map(|p| p.render_state) != Some(next.render_state) {
        device.set_render_state(&next.render_state);
    }
    if previous.map(|p| p.scissor) != Some(next.scissor) {
        device.set_scissor(next.scissor);
    }
    for (unit, texture) in next.textures.iter().enumerate() {
        let unchanged = previous.is_some_and(|p| p.textures[unit] == *texture);
        if !texture.is_none() && !unchanged {
            device.bind_texture(unit as u32, *texture)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "stage_tests.rs"]
mod tests;
