/// Unlit material stages
///
/// Draws every enabled ambient stage of the given surfaces in material sort
/// order, with the stage's blend mode, register-driven color and optional
/// alpha test. Used once for opaque surfaces after the interactions and
/// once for translucent surfaces.

use std::sync::Arc;
use glam::Vec4;
use rdst::RadixSort;

use crate::batch::BatchExecutor;
use crate::error::Result;
use crate::frontend::{DrawSurface, StageLighting};
use crate::graphics_device::{CompareOp, CullMode, Program, ProgramManager, RenderState, TextureHandle, VertexLayoutKind};
use super::{
    load_stage_program, polygon_offset, require_program, stage_enabled, texture_rows, BatchRun,
    DrawState, ShaderPassParams, Stage, StageContext, SurfaceStage, MAX_SURFACE_TEXTURES,
};

/// Order-preserving map of a sort value onto unsigned integers
fn sort_bits(sort: f32) -> u32 {
    let bits = sort.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

/// Indices of `surfaces` ordered by material sort, ties kept in input order
pub fn translucent_order(surfaces: &[DrawSurface]) -> Vec<usize> {
    let mut keys: Vec<u64> = surfaces
        .iter()
        .enumerate()
        .map(|(i, s)| ((sort_bits(s.material.sort) as u64) << 32) | i as u64)
        .collect();
    keys.radix_sort_unstable();
    keys.into_iter().map(|key| (key & 0xFFFF_FFFF) as usize).collect()
}

#[derive(Default)]
pub struct ShaderPassStage {
    program: Option<Arc<dyn Program>>,
}

impl ShaderPassStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for ShaderPassStage {
    fn name(&self) -> &'static str {
        "ShaderPassStage"
    }

    fn init(&mut self, programs: &dyn ProgramManager, _batches: &BatchExecutor) -> Result<()> {
        self.program = Some(load_stage_program(programs, self.name(), "shader_pass", VertexLayoutKind::Draw)?);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.program = None;
    }
}

impl SurfaceStage for ShaderPassStage {
    fn draw(&mut self, ctx: &mut StageContext<'_>, surfaces: &[DrawSurface]) -> Result<()> {
        if !surfaces.iter().any(|s| s.material.has_ambient_stages()) {
            return Ok(());
        }
        let program = Arc::clone(require_program(&self.program, self.name())?);

        let mut run = BatchRun::<ShaderPassParams>::begin(ctx, &program, VertexLayoutKind::Draw)?;
        for index in translucent_order(surfaces) {
            let surface = &surfaces[index];
            let material = &surface.material;
            if !material.has_ambient_stages() || !ctx.accept(self.name(), surface) {
                continue;
            }

            for stage in material.stages.iter().filter(|s| s.lighting == StageLighting::Ambient) {
                if !stage_enabled(surface, stage) {
                    continue;
                }
                let render_state = RenderState {
                    depth_test: Some(CompareOp::LessOrEqual),
                    depth_write: false,
                    blend: stage.blend,
                    cull: CullMode::Back,
                    polygon_offset: polygon_offset(material),
                    depth_range: ctx.depth_range(&surface.space),
                    ..RenderState::default()
                };
                let mut textures = [TextureHandle::NONE; MAX_SURFACE_TEXTURES];
                textures[0] = ctx.bound_texture(stage.texture);
                let state = DrawState::new(render_state, ctx.batch_scissor()).with_textures(textures);

                let [texture_s, texture_t] = texture_rows(surface, Some(stage));
                let vertex_color = if stage.vertex_color {
                    Vec4::new(1.0, 0.0, 0.0, 0.0)
                } else {
                    Vec4::new(0.0, 1.0, 0.0, 0.0)
                };
                let threshold = stage.alpha_test.map_or(0.0, |register| surface.register(register));
                let params = ShaderPassParams {
                    mvp: ctx.mvp(&surface.space),
                    clip_bounds: ctx.clip_bounds(surface),
                    texture_s,
                    texture_t,
                    color: surface.register4(stage.color),
                    vertex_color,
                    alpha_test: Vec4::new(threshold, 0.0, 0.0, 0.0),
                    textures: ctx.texture_words(&[stage.texture]),
                };
                run.draw(ctx, surface, state, params)?;
            }
        }
        run.finish(ctx)
    }
}

#[cfg(test)]
#[path = "shader_pass_tests.rs"]
mod tests;
