/// Fog and blend lights
///
/// Fog lights alpha-blend a density-driven fog color over the surfaces
/// inside their volume; blend lights modulate what is already drawn.

use std::sync::Arc;
use glam::Vec4;

use crate::batch::BatchExecutor;
use crate::error::{Error, Result};
use crate::frontend::{DrawSurface, LightKind};
use crate::graphics_device::{
    BlendMode, CompareOp, CullMode, Program, ProgramManager, RenderState, VertexLayoutKind,
    LIGHT_PARAMS_BINDING,
};
use super::{load_stage_program, require_program, BatchRun, DrawState, FogParams, LightParams, Stage, StageContext, SurfaceStage};

#[derive(Default)]
pub struct FogStage {
    fog_program: Option<Arc<dyn Program>>,
    blend_program: Option<Arc<dyn Program>>,
}

impl FogStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for FogStage {
    fn name(&self) -> &'static str {
        "FogStage"
    }

    fn init(&mut self, programs: &dyn ProgramManager, _batches: &BatchExecutor) -> Result<()> {
        self.fog_program = Some(load_stage_program(programs, self.name(), "fog", VertexLayoutKind::Draw)?);
        self.blend_program = Some(load_stage_program(programs, self.name(), "blend_light", VertexLayoutKind::Draw)?);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.fog_program = None;
        self.blend_program = None;
    }
}

impl SurfaceStage for FogStage {
    fn draw(&mut self, ctx: &mut StageContext<'_>, surfaces: &[DrawSurface]) -> Result<()> {
        if surfaces.is_empty() {
            return Ok(());
        }
        let Some(light) = ctx.light else {
            return Err(Error::InvalidResource(format!("{} drawn without a light", self.name())));
        };
        let (program, blend) = match light.kind {
            LightKind::Fog => (require_program(&self.fog_program, self.name())?, BlendMode::Alpha),
            LightKind::Blend => (require_program(&self.blend_program, self.name())?, BlendMode::Modulate),
            LightKind::Normal => {
                return Err(Error::InvalidResource(format!("{} drawn with a normal light", self.name())));
            }
        };
        let program = Arc::clone(program);

        let light_params = LightParams {
            shadow_view_projection: light.shadow_view_projection,
            origin: light.origin.extend(1.0),
            color: light.color,
            shadow_page: Vec4::new(1.0, 1.0, 0.0, 0.0),
            shadow_params: Vec4::ZERO,
            fog: Vec4::new(light.fog_density, 0.0, 0.0, 0.0),
            shadow_texture: [0; 4],
        };
        ctx.batches.upload_uniforms(LIGHT_PARAMS_BINDING, &light_params)?;

        let mut run = BatchRun::<FogParams>::begin(ctx, &program, VertexLayoutKind::Draw)?;
        for surface in surfaces {
            if !ctx.accept(self.name(), surface) {
                continue;
            }
            let render_state = RenderState {
                depth_test: Some(CompareOp::LessOrEqual),
                depth_write: false,
                blend,
                cull: CullMode::Back,
                depth_range: ctx.depth_range(&surface.space),
                ..RenderState::default()
            };
            let state = DrawState::new(render_state, ctx.batch_scissor());
            let params = FogParams {
                mvp: ctx.mvp(&surface.space),
                clip_bounds: ctx.clip_bounds(surface),
                model_matrix: surface.space.model_matrix,
            };
            run.draw(ctx, surface, state, params)?;
        }
        run.finish(ctx)
    }
}

#[cfg(test)]
#[path = "fog_tests.rs"]
mod tests;
