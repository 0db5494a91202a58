/// Tonemapping
///
/// Fullscreen pass from the (resolved) primary color into the post-process
/// set, which is then blitted to the presentation surface. Runs after the
/// primary scope was left with deferred presentation.

use std::sync::Arc;

use crate::batch::BatchExecutor;
use crate::error::{Error, Result};
use crate::graphics_device::{
    BlitMask, CullMode, Program, ProgramManager, Rect2D, RenderState, VertexLayoutKind,
};
use crate::target::POST_PROCESS;
use super::{load_stage_program, require_program, Stage, StageContext};

/// Texture unit of the tonemap source
pub const TONEMAP_SOURCE_UNIT: u32 = 0;

#[derive(Default)]
pub struct TonemapStage {
    program: Option<Arc<dyn Program>>,
}

impl TonemapStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tonemap the primary image and present the result
    pub fn present(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        let program = require_program(&self.program, self.name())?;
        let source = ctx.targets.primary()
            .and_then(|primary| primary.sample_source().color_texture(0))
            .ok_or_else(|| Error::InvalidResource("primary color is not sampleable".to_string()))?;
        let target = ctx.targets.get(POST_PROCESS)
            .filter(|set| set.is_valid())
            .ok_or_else(|| Error::InvalidResource("post-process target set is not built".to_string()))?;
        let Some(framebuffer) = target.framebuffer() else {
            return Err(Error::InvalidResource("post-process target set is not built".to_string()));
        };

        let full = Rect2D::from_size(target.width(), target.height());
        ctx.device.bind_framebuffer(Some(framebuffer))?;
        ctx.device.set_viewport(full);
        ctx.device.set_scissor(full);
        ctx.device.set_render_state(&RenderState {
            depth_test: None,
            depth_write: false,
            cull: CullMode::None,
            ..RenderState::default()
        });
        ctx.device.bind_program(Some(program))?;
        ctx.device.bind_texture(TONEMAP_SOURCE_UNIT, source)?;
        ctx.device.draw_fullscreen()?;

        ctx.device.blit_framebuffer(framebuffer, None, BlitMask::COLOR)?;
        ctx.device.bind_framebuffer(None)
    }
}

impl Stage for TonemapStage {
    fn name(&self) -> &'static str {
        "TonemapStage"
    }

    fn init(&mut self, programs: &dyn ProgramManager, _batches: &BatchExecutor) -> Result<()> {
        self.program = Some(load_stage_program(programs, self.name(), "tonemap", VertexLayoutKind::None)?);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.program = None;
    }
}

#[cfg(test)]
#[path = "tonemap_tests.rs"]
mod tests;
