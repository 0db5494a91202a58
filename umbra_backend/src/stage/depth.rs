/// Depth pre-pass
///
/// Fills the depth buffer before any lighting so interactions can test
/// with EQUAL. Surfaces fall in three buckets, drawn in this order:
/// subview surfaces (also marking stencil), plain opaque surfaces through
/// the untextured fast path, and everything needing a texture or a depth
/// bias (alpha-tested and decal surfaces).

use std::sync::Arc;
use glam::Vec4;

use crate::batch::BatchExecutor;
use crate::error::Result;
use crate::frontend::{sort, DrawSurface};
use crate::graphics_device::{
    BlendMode, CompareOp, CullMode, Program, ProgramManager, RenderState, StencilState,
    TextureHandle, VertexLayoutKind,
};
use super::{
    load_stage_program, polygon_offset, require_program, stage_enabled, texture_rows, BatchRun,
    DepthParams, DrawState, Stage, StageContext, SurfaceStage, MAX_SURFACE_TEXTURES,
};
use crate::engine_debug;

/// Stencil value written under subview surfaces
pub const SUBVIEW_STENCIL_REF: u32 = 1;

#[derive(Default)]
pub struct DepthStage {
    fast_program: Option<Arc<dyn Program>>,
    textured_program: Option<Arc<dyn Program>>,
    max_batch: usize,
}

impl DepthStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    fn base_state(stencil: Option<StencilState>) -> RenderState {
        RenderState {
            depth_test: Some(CompareOp::Less),
            depth_write: true,
            stencil,
            blend: BlendMode::Opaque,
            color_write: false,
            cull: CullMode::Back,
            ..RenderState::default()
        }
    }

    fn draw_untextured(
        ctx: &mut StageContext<'_>,
        program: &Arc<dyn Program>,
        surfaces: &[&DrawSurface],
        stencil: Option<StencilState>,
    ) -> Result<()> {
        if surfaces.is_empty() {
            return Ok(());
        }
        let mut run = BatchRun::<DepthParams>::begin(ctx, program, VertexLayoutKind::Draw)?;
        for surface in surfaces {
            let render_state = RenderState {
                depth_range: ctx.depth_range(&surface.space),
                ..Self::base_state(stencil)
            };
            let params = DepthParams {
                mvp: ctx.mvp(&surface.space),
                clip_bounds: ctx.clip_bounds(surface),
                texture_s: Vec4::X,
                texture_t: Vec4::Y,
                color: Vec4::ONE,
                alpha_test: Vec4::ZERO,
                textures: [0; 8],
            };
            let state = DrawState::new(render_state, ctx.batch_scissor());
            run.draw(ctx, surface, state, params)?;
        }
        run.finish(ctx)
    }

    fn draw_textured(ctx: &mut StageContext<'_>, program: &Arc<dyn Program>, surfaces: &[&DrawSurface]) -> Result<()> {
        if surfaces.is_empty() {
            return Ok(());
        }
        let mut run = BatchRun::<DepthParams>::begin(ctx, program, VertexLayoutKind::Draw)?;
        for surface in surfaces {
            let material = &surface.material;
            let alpha_stage = material.alpha_tested_stage().filter(|s| stage_enabled(surface, s));
            let texture = alpha_stage.map_or(TextureHandle::NONE, |s| s.texture);
            let threshold = alpha_stage
                .and_then(|s| s.alpha_test)
                .map_or(0.0, |register| surface.register(register));
            let [texture_s, texture_t] = texture_rows(surface, alpha_stage);

            let render_state = RenderState {
                depth_range: ctx.depth_range(&surface.space),
                polygon_offset: polygon_offset(material),
                ..Self::base_state(None)
            };
            let mut textures = [TextureHandle::NONE; MAX_SURFACE_TEXTURES];
            textures[0] = ctx.bound_texture(texture);

            let params = DepthParams {
                mvp: ctx.mvp(&surface.space),
                clip_bounds: ctx.clip_bounds(surface),
                texture_s,
                texture_t,
                color: alpha_stage.map_or(Vec4::ONE, |s| surface.register4(s.color)),
                alpha_test: Vec4::new(threshold, 0.0, 0.0, 0.0),
                textures: ctx.texture_words(&[texture]),
            };
            let state = DrawState::new(render_state, ctx.batch_scissor()).with_textures(textures);
            run.draw(ctx, surface, state, params)?;
        }
        run.finish(ctx)
    }
}

impl Stage for DepthStage {
    fn name(&self) -> &'static str {
        "DepthStage"
    }

    fn init(&mut self, programs: &dyn ProgramManager, batches: &BatchExecutor) -> Result<()> {
        self.fast_program = Some(load_stage_program(programs, self.name(), "depth_fast", VertexLayoutKind::Draw)?);
        self.textured_program = Some(load_stage_program(programs, self.name(), "depth_textured", VertexLayoutKind::Draw)?);
        self.max_batch = batches.max_batch_size::<DepthParams>();
        engine_debug!("umbra::DepthStage", "Initialized, {} draws per batch", self.max_batch);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.fast_program = None;
        self.textured_program = None;
    }
}

impl SurfaceStage for DepthStage {
    fn draw(&mut self, ctx: &mut StageContext<'_>, surfaces: &[DrawSurface]) -> Result<()> {
        if surfaces.is_empty() {
            return Ok(());
        }
        let fast = Arc::clone(require_program(&self.fast_program, self.name())?);
        let textured = Arc::clone(require_program(&self.textured_program, self.name())?);

        let mut subview = Vec::new();
        let mut opaque = Vec::new();
        let mut remaining = Vec::new();
        for surface in surfaces {
            let material = &surface.material;
            // translucent and post-process surfaces never write depth
            if material.is_translucent() || material.sort >= sort::POST_PROCESS {
                continue;
            }
            if !ctx.accept(self.name(), surface) {
                continue;
            }
            if material.has_subview {
                subview.push(surface);
            } else if material.is_fast_path_opaque() {
                opaque.push(surface);
            } else {
                remaining.push(surface);
            }
        }

        Self::draw_untextured(ctx, &fast, &subview, Some(StencilState::mark(SUBVIEW_STENCIL_REF)))?;
        Self::draw_untextured(ctx, &fast, &opaque, None)?;
        Self::draw_textured(ctx, &textured, &remaining)
    }
}

#[cfg(test)]
#[path = "depth_tests.rs"]
mod tests;
