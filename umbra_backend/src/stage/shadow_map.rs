/// Shadow map rendering
///
/// Draws the current light's shadow casters into its shadow atlas page,
/// depth only, with a constant depth bias. The caller binds the primary
/// set again afterwards.

use std::sync::Arc;

use crate::batch::BatchExecutor;
use crate::error::{Error, Result};
use crate::frontend::DrawSurface;
use crate::graphics_device::{
    BlendMode, ClearValues, CompareOp, CullMode, PolygonOffset, Program, ProgramManager,
    RenderState, VertexLayoutKind,
};
use crate::target::SHADOW_ATLAS;
use super::{load_stage_program, require_program, BatchRun, DrawState, ShadowMapParams, Stage, StageContext, SurfaceStage};
use crate::engine_warn;

pub struct ShadowMapStage {
    program: Option<Arc<dyn Program>>,
    bias: PolygonOffset,
}

impl ShadowMapStage {
    /// `bias` is the (factor, units) depth bias applied to casters
    pub fn new(bias: (f32, f32)) -> Self {
        Self {
            program: None,
            bias: PolygonOffset { factor: bias.0, units: bias.1 },
        }
    }

    pub fn bias(&self) -> PolygonOffset {
        self.bias
    }
}

impl Stage for ShadowMapStage {
    fn name(&self) -> &'static str {
        "ShadowMapStage"
    }

    fn init(&mut self, programs: &dyn ProgramManager, _batches: &BatchExecutor) -> Result<()> {
        self.program = Some(load_stage_program(programs, self.name(), "shadow_map", VertexLayoutKind::Draw)?);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.program = None;
    }
}

impl SurfaceStage for ShadowMapStage {
    fn draw(&mut self, ctx: &mut StageContext<'_>, surfaces: &[DrawSurface]) -> Result<()> {
        if surfaces.is_empty() {
            return Ok(());
        }
        let program = Arc::clone(require_program(&self.program, self.name())?);
        let Some(light) = ctx.light else {
            return Err(Error::InvalidResource(format!("{} drawn without a light", self.name())));
        };
        let Some(page) = ctx.shadow_page else {
            engine_warn!("umbra::ShadowMapStage", "No shadow page for light at {:?}, skipping casters", light.origin);
            return Ok(());
        };
        let Some(atlas) = ctx.targets.get(SHADOW_ATLAS).and_then(|set| set.framebuffer()) else {
            return Err(Error::InvalidResource("shadow atlas is not built".to_string()));
        };

        ctx.device.bind_framebuffer(Some(atlas))?;
        ctx.device.set_viewport(page.viewport);
        ctx.device.set_scissor(page.viewport);
        ctx.device.set_render_state(&RenderState { color_write: false, ..RenderState::default() });
        ctx.device.clear(&ClearValues::depth_only(1.0))?;

        let render_state = RenderState {
            depth_test: Some(CompareOp::LessOrEqual),
            depth_write: true,
            blend: BlendMode::Opaque,
            color_write: false,
            cull: CullMode::Front,
            polygon_offset: Some(self.bias),
            ..RenderState::default()
        };
        let state = DrawState::new(render_state, page.viewport);

        let mut run = BatchRun::<ShadowMapParams>::begin(ctx, &program, VertexLayoutKind::Draw)?;
        for surface in surfaces {
            if !ctx.accept(self.name(), surface) {
                continue;
            }
            let params = ShadowMapParams {
                mvp: light.shadow_view_projection * surface.space.model_matrix,
            };
            run.draw(ctx, surface, state, params)?;
        }
        run.finish(ctx)
    }
}

#[cfg(test)]
#[path = "shadow_map_tests.rs"]
mod tests;
