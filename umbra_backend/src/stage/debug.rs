/// Triangle overlay
///
/// `show_tris` 1 draws wireframes depth tested, 2 draws them through all
/// geometry.

use std::sync::Arc;
use glam::Vec4;

use crate::batch::BatchExecutor;
use crate::error::Result;
use crate::frontend::DrawSurface;
use crate::graphics_device::{
    BlendMode, CompareOp, CullMode, PolygonOffset, Program, ProgramManager, RenderState,
    VertexLayoutKind,
};
use super::{load_stage_program, require_program, BatchRun, DebugParams, DrawState, Stage, StageContext, SurfaceStage};

const WIREFRAME_COLOR: Vec4 = Vec4::new(1.0, 1.0, 1.0, 1.0);

#[derive(Default)]
pub struct DebugStage {
    program: Option<Arc<dyn Program>>,
}

impl DebugStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for DebugStage {
    fn name(&self) -> &'static str {
        "DebugStage"
    }

    fn init(&mut self, programs: &dyn ProgramManager, _batches: &BatchExecutor) -> Result<()> {
        self.program = Some(load_stage_program(programs, self.name(), "debug_wireframe", VertexLayoutKind::Draw)?);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.program = None;
    }
}

impl SurfaceStage for DebugStage {
    fn draw(&mut self, ctx: &mut StageContext<'_>, surfaces: &[DrawSurface]) -> Result<()> {
        let mode = ctx.settings.show_tris.get();
        if mode == 0 || surfaces.is_empty() {
            return Ok(());
        }
        let program = Arc::clone(require_program(&self.program, self.name())?);

        let base = RenderState {
            depth_test: if mode == 1 { Some(CompareOp::LessOrEqual) } else { None },
            depth_write: false,
            blend: BlendMode::Opaque,
            cull: CullMode::None,
            polygon_offset: Some(PolygonOffset { factor: -1.0, units: -2.0 }),
            wireframe: true,
            ..RenderState::default()
        };

        let mut run = BatchRun::<DebugParams>::begin(ctx, &program, VertexLayoutKind::Draw)?;
        for surface in surfaces {
            if !ctx.accept(self.name(), surface) {
                continue;
            }
            let render_state = RenderState {
                depth_range: ctx.depth_range(&surface.space),
                ..base
            };
            let state = DrawState::new(render_state, ctx.batch_scissor());
            let params = DebugParams {
                mvp: ctx.mvp(&surface.space),
                clip_bounds: ctx.clip_bounds(surface),
                color: WIREFRAME_COLOR,
            };
            run.draw(ctx, surface, state, params)?;
        }
        run.finish(ctx)
    }
}

#[cfg(test)]
#[path = "debug_tests.rs"]
mod tests;
