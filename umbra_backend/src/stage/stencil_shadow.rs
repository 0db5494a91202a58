/// Stencil shadow volumes
///
/// Renders the current light's shadow volumes into the stencil buffer with
/// the depth-fail rule: back faces increment and front faces decrement
/// where the depth test fails. Pixels left at `STENCIL_SHADOW_REF` are lit.

use std::sync::Arc;

use crate::batch::BatchExecutor;
use crate::error::{Error, Result};
use crate::frontend::DrawSurface;
use crate::graphics_device::{
    BlendMode, CompareOp, CullMode, Program, ProgramManager, RenderState, StencilFaceState,
    StencilOp, StencilState, VertexLayoutKind,
};
use super::{load_stage_program, require_program, BatchRun, DrawState, ShadowVolumeParams, Stage, StageContext, SurfaceStage};

/// Stencil clear value before each shadowed light; lit pixels keep it
pub const STENCIL_SHADOW_REF: u32 = 128;

#[derive(Default)]
pub struct StencilShadowStage {
    program: Option<Arc<dyn Program>>,
}

impl StencilShadowStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two-sided depth-fail stencil state
    pub fn volume_stencil() -> StencilState {
        let face = |depth_fail_op| StencilFaceState {
            compare: CompareOp::Always,
            fail_op: StencilOp::Keep,
            depth_fail_op,
            pass_op: StencilOp::Keep,
        };
        StencilState {
            front: face(StencilOp::DecrementAndWrap),
            back: face(StencilOp::IncrementAndWrap),
            reference: STENCIL_SHADOW_REF,
            read_mask: 0xFF,
            write_mask: 0xFF,
        }
    }

    fn base_state() -> RenderState {
        RenderState {
            depth_test: Some(CompareOp::Less),
            depth_write: false,
            stencil: Some(Self::volume_stencil()),
            blend: BlendMode::Opaque,
            color_write: false,
            cull: CullMode::None,
            ..RenderState::default()
        }
    }
}

impl Stage for StencilShadowStage {
    fn name(&self) -> &'static str {
        "StencilShadowStage"
    }

    fn init(&mut self, programs: &dyn ProgramManager, _batches: &BatchExecutor) -> Result<()> {
        self.program = Some(load_stage_program(programs, self.name(), "shadow_volume", VertexLayoutKind::Shadow)?);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.program = None;
    }
}

impl SurfaceStage for StencilShadowStage {
    fn draw(&mut self, ctx: &mut StageContext<'_>, surfaces: &[DrawSurface]) -> Result<()> {
        if surfaces.is_empty() {
            return Ok(());
        }
        let program = Arc::clone(require_program(&self.program, self.name())?);
        if ctx.light.is_none() {
            return Err(Error::InvalidResource(format!("{} drawn without a light", self.name())));
        }

        let mut run = BatchRun::<ShadowVolumeParams>::begin(ctx, &program, VertexLayoutKind::Shadow)?;
        for surface in surfaces {
            if !ctx.accept(self.name(), surface) {
                continue;
            }
            let render_state = RenderState {
                depth_range: ctx.depth_range(&surface.space),
                ..Self::base_state()
            };
            let state = DrawState::new(render_state, ctx.batch_scissor());
            let params = ShadowVolumeParams {
                mvp: ctx.mvp(&surface.space),
                clip_bounds: ctx.clip_bounds(surface),
                light_origin_local: ctx.light_origin_local(&surface.space),
            };
            run.draw(ctx, surface, state, params)?;
        }
        run.finish(ctx)
    }
}

#[cfg(test)]
#[path = "stencil_shadow_tests.rs"]
mod tests;
