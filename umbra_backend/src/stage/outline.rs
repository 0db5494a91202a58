/// Highlight outlines
///
/// Highlighted entities are drawn twice: a mark pass writes
/// `OUTLINE_STENCIL_REF` under the entity, then an extruded pass draws the
/// highlight color wherever the stencil was not marked.

use std::sync::Arc;
use glam::Vec4;

use crate::batch::BatchExecutor;
use crate::error::Result;
use crate::frontend::DrawSurface;
use crate::graphics_device::{
    BlendMode, ClearValues, CompareOp, CullMode, Program, ProgramManager, RenderState,
    StencilState, VertexLayoutKind,
};
use super::{load_stage_program, require_program, BatchRun, DrawState, OutlineParams, Stage, StageContext, SurfaceStage};

pub const OUTLINE_STENCIL_REF: u32 = 1;

/// Default outline extrusion in model units
const OUTLINE_THICKNESS: f32 = 1.0;

pub struct OutlineStage {
    mark_program: Option<Arc<dyn Program>>,
    outline_program: Option<Arc<dyn Program>>,
    thickness: f32,
}

impl Default for OutlineStage {
    fn default() -> Self {
        Self { mark_program: None, outline_program: None, thickness: OUTLINE_THICKNESS }
    }
}

impl OutlineStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_thickness(&mut self, thickness: f32) {
        self.thickness = thickness;
    }

    fn pass(
        &self,
        ctx: &mut StageContext<'_>,
        program: &Arc<dyn Program>,
        surfaces: &[&DrawSurface],
        base: RenderState,
        thickness: f32,
    ) -> Result<()> {
        let mut run = BatchRun::<OutlineParams>::begin(ctx, program, VertexLayoutKind::Draw)?;
        for surface in surfaces {
            let render_state = RenderState {
                depth_range: ctx.depth_range(&surface.space),
                ..base
            };
            let state = DrawState::new(render_state, ctx.view.scissor);
            let params = OutlineParams {
                mvp: ctx.mvp(&surface.space),
                color: surface.space.highlight.unwrap_or(Vec4::ONE),
                thickness: Vec4::new(thickness, 0.0, 0.0, 0.0),
            };
            run.draw(ctx, surface, state, params)?;
        }
        run.finish(ctx)
    }
}

impl Stage for OutlineStage {
    fn name(&self) -> &'static str {
        "OutlineStage"
    }

    fn init(&mut self, programs: &dyn ProgramManager, _batches: &BatchExecutor) -> Result<()> {
        self.mark_program = Some(load_stage_program(programs, self.name(), "outline_mark", VertexLayoutKind::Draw)?);
        self.outline_program = Some(load_stage_program(programs, self.name(), "outline", VertexLayoutKind::Draw)?);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.mark_program = None;
        self.outline_program = None;
    }
}

impl SurfaceStage for OutlineStage {
    fn draw(&mut self, ctx: &mut StageContext<'_>, surfaces: &[DrawSurface]) -> Result<()> {
        let mut highlighted = Vec::new();
        for surface in surfaces.iter().filter(|s| s.space.highlight.is_some()) {
            if ctx.accept(self.name(), surface) {
                highlighted.push(surface);
            }
        }
        if highlighted.is_empty() {
            return Ok(());
        }
        let mark = Arc::clone(require_program(&self.mark_program, self.name())?);
        let outline = Arc::clone(require_program(&self.outline_program, self.name())?);

        ctx.device.set_scissor(ctx.view.scissor);
        ctx.device.clear(&ClearValues::stencil_only(0))?;

        let mark_state = RenderState {
            depth_test: Some(CompareOp::LessOrEqual),
            depth_write: false,
            stencil: Some(StencilState::mark(OUTLINE_STENCIL_REF)),
            color_write: false,
            cull: CullMode::Back,
            ..RenderState::default()
        };
        self.pass(ctx, &mark, &highlighted, mark_state, 0.0)?;

        let outline_state = RenderState {
            depth_test: None,
            depth_write: false,
            stencil: Some(StencilState::test(CompareOp::NotEqual, OUTLINE_STENCIL_REF)),
            blend: BlendMode::Alpha,
            cull: CullMode::None,
            ..RenderState::default()
        };
        self.pass(ctx, &outline, &highlighted, outline_state, self.thickness)
    }
}

#[cfg(test)]
#[path = "outline_tests.rs"]
mod tests;
