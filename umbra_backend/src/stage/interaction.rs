/// Light interactions
///
/// Accumulates one light's contribution over the surfaces it touches with
/// additive blending. Opaque surfaces test depth EQUAL against the pre-pass
/// and are masked by the light's shadows: the stencil buffer, a stencil
/// copy sampled for soft shadows, or a shadow atlas page. Translucent
/// surfaces are lit unshadowed with a LEQUAL test.

use std::sync::Arc;
use glam::Vec4;

use crate::batch::BatchExecutor;
use crate::error::{Error, Result};
use crate::frontend::{DrawSurface, MaterialStage, StageLighting, ViewLight};
use crate::graphics_device::{
    BlendMode, CompareOp, CullMode, Program, ProgramManager, RenderState, StencilState,
    TextureHandle, VertexLayoutKind, LIGHT_PARAMS_BINDING,
};
use crate::settings::ShadowTechnique;
use crate::target::{ShadowPage, SHADOW_ATLAS, SHADOW_STENCIL};
use super::{
    load_stage_program, polygon_offset, require_program, stage_enabled, texture_rows, BatchRun,
    DrawState, InteractionParams, LightParams, Stage, StageContext, SurfaceStage, STENCIL_SHADOW_REF,
};

/// Texture unit of the shadow texture (atlas or stencil copy)
pub const SHADOW_TEXTURE_UNIT: u32 = 4;

/// How the current light's shadows reach the interaction shader
#[derive(Debug, Clone, Copy, PartialEq)]
enum ShadowMode {
    Unshadowed,
    /// Stencil test against the shadow volumes
    Stencil,
    /// Sample a copy of the stencil buffer
    SoftStencil(TextureHandle),
    /// Sample a shadow atlas page
    ShadowMap(ShadowPage, TextureHandle),
}

impl ShadowMode {
    fn texture(&self) -> TextureHandle {
        match self {
            ShadowMode::SoftStencil(texture) | ShadowMode::ShadowMap(_, texture) => *texture,
            _ => TextureHandle::NONE,
        }
    }
}

#[derive(Default)]
pub struct InteractionStage {
    program: Option<Arc<dyn Program>>,
    soft_stencil_program: Option<Arc<dyn Program>>,
    shadow_map_program: Option<Arc<dyn Program>>,
    max_batch: usize,
}

impl InteractionStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    fn shadow_mode(ctx: &StageContext<'_>, light: &ViewLight) -> ShadowMode {
        if !light.casts_shadows() {
            return ShadowMode::Unshadowed;
        }
        match ctx.settings.shadow_technique.get() {
            ShadowTechnique::StencilVolume => {
                let copy = ctx.targets.get(SHADOW_STENCIL).and_then(|set| set.stencil_texture());
                match copy {
                    Some(texture) if ctx.settings.soft_shadow_quality.get() > 0 => ShadowMode::SoftStencil(texture),
                    _ => ShadowMode::Stencil,
                }
            }
            ShadowTechnique::ShadowMap => {
                let atlas = ctx.targets.get(SHADOW_ATLAS).and_then(|set| set.depth_texture());
                match (ctx.shadow_page, atlas) {
                    (Some(page), Some(texture)) => ShadowMode::ShadowMap(page, texture),
                    _ => ShadowMode::Unshadowed,
                }
            }
        }
    }

    fn light_params(ctx: &StageContext<'_>, light: &ViewLight, mode: ShadowMode) -> LightParams {
        let shadow_page = match mode {
            ShadowMode::ShadowMap(page, _) => Vec4::from(page.uv_scale_bias(ctx.targets.shadow_atlas().atlas_size())),
            _ => Vec4::new(1.0, 1.0, 0.0, 0.0),
        };
        let words = ctx.texture_words(&[mode.texture()]);
        LightParams {
            shadow_view_projection: light.shadow_view_projection,
            origin: light.origin.extend(1.0),
            color: light.color,
            shadow_page,
            shadow_params: Vec4::new(
                ctx.settings.soft_shadow_quality.get() as f32,
                1.0 / ctx.view.render_width.max(1) as f32,
                1.0 / ctx.view.render_height.max(1) as f32,
                if mode == ShadowMode::Unshadowed { 0.0 } else { 1.0 },
            ),
            fog: Vec4::ZERO,
            shadow_texture: [words[0], words[1], 0, 0],
        }
    }

    fn params(ctx: &StageContext<'_>, surface: &DrawSurface, stages: &[Option<&MaterialStage>; 3]) -> InteractionParams {
        let [bump, diffuse, specular] = *stages;
        let color = |stage: Option<&MaterialStage>| stage.map_or(Vec4::ZERO, |s| surface.register4(s.color));
        let vertex_color = match diffuse {
            Some(stage) if stage.vertex_color => Vec4::new(1.0, 0.0, 0.0, 0.0),
            _ => Vec4::new(0.0, 1.0, 0.0, 0.0),
        };
        let texture = |stage: Option<&MaterialStage>| stage.map_or(TextureHandle::NONE, |s| s.texture);

        InteractionParams {
            mvp: ctx.mvp(&surface.space),
            clip_bounds: ctx.clip_bounds(surface),
            model_matrix: surface.space.model_matrix,
            light_origin_local: ctx.light_origin_local(&surface.space),
            view_origin_local: ctx.view_origin_local(&surface.space),
            bump_st: texture_rows(surface, bump),
            diffuse_st: texture_rows(surface, diffuse),
            specular_st: texture_rows(surface, specular),
            diffuse_color: color(diffuse),
            specular_color: color(specular),
            vertex_color,
            textures: ctx.texture_words(&[texture(bump), texture(diffuse), texture(specular)]),
        }
    }

    fn draw_bucket(
        &self,
        ctx: &mut StageContext<'_>,
        program: &Arc<dyn Program>,
        surfaces: &[&DrawSurface],
        base: RenderState,
    ) -> Result<()> {
        if surfaces.is_empty() {
            return Ok(());
        }
        let mut run = BatchRun::<InteractionParams>::begin(ctx, program, VertexLayoutKind::Draw)?;
        for surface in surfaces {
            let material = &surface.material;
            let stage = |lighting| material.stage_by_lighting(lighting).filter(|s| stage_enabled(surface, s));
            let stages = [stage(StageLighting::Bump), stage(StageLighting::Diffuse), stage(StageLighting::Specular)];
            if stages.iter().all(Option::is_none) {
                continue;
            }

            let textures = stages.map(|s| ctx.bound_texture(s.map_or(TextureHandle::NONE, |s| s.texture)));
            let render_state = RenderState {
                depth_range: ctx.depth_range(&surface.space),
                polygon_offset: polygon_offset(material),
                ..base
            };
            let state = DrawState::new(render_state, ctx.batch_scissor())
                .with_textures([textures[0], textures[1], textures[2], TextureHandle::NONE]);
            let params = Self::params(ctx, surface, &stages);
            run.draw(ctx, surface, state, params)?;
        }
        run.finish(ctx)
    }
}

impl Stage for InteractionStage {
    fn name(&self) -> &'static str {
        "InteractionStage"
    }

    fn init(&mut self, programs: &dyn ProgramManager, batches: &BatchExecutor) -> Result<()> {
        let name = self.name();
        self.program = Some(load_stage_program(programs, name, "interaction", VertexLayoutKind::Draw)?);
        self.soft_stencil_program = Some(load_stage_program(programs, name, "interaction_soft_stencil", VertexLayoutKind::Draw)?);
        self.shadow_map_program = Some(load_stage_program(programs, name, "interaction_shadow_map", VertexLayoutKind::Draw)?);
        self.max_batch = batches.max_batch_size::<InteractionParams>();
        Ok(())
    }

    fn shutdown(&mut self) {
        self.program = None;
        self.soft_stencil_program = None;
        self.shadow_map_program = None;
    }
}

impl SurfaceStage for InteractionStage {
    fn draw(&mut self, ctx: &mut StageContext<'_>, surfaces: &[DrawSurface]) -> Result<()> {
        if surfaces.is_empty() {
            return Ok(());
        }
        let Some(light) = ctx.light else {
            return Err(Error::InvalidResource(format!("{} drawn without a light", self.name())));
        };
        let unshadowed = Arc::clone(require_program(&self.program, self.name())?);

        let mode = Self::shadow_mode(ctx, light);
        let shadowed = match mode {
            ShadowMode::SoftStencil(_) => Arc::clone(require_program(&self.soft_stencil_program, self.name())?),
            ShadowMode::ShadowMap(..) => Arc::clone(require_program(&self.shadow_map_program, self.name())?),
            _ => Arc::clone(&unshadowed),
        };

        let mut opaque = Vec::new();
        let mut translucent = Vec::new();
        for surface in surfaces {
            if !surface.material.receives_light() || !ctx.accept(self.name(), surface) {
                continue;
            }
            if surface.material.is_translucent() {
                translucent.push(surface);
            } else {
                opaque.push(surface);
            }
        }
        if opaque.is_empty() && translucent.is_empty() {
            return Ok(());
        }

        let light_params = Self::light_params(ctx, light, mode);
        ctx.batches.upload_uniforms(LIGHT_PARAMS_BINDING, &light_params)?;
        if !ctx.bindless && !mode.texture().is_none() {
            ctx.device.bind_texture(SHADOW_TEXTURE_UNIT, mode.texture())?;
        }

        let lit = RenderState {
            depth_test: Some(CompareOp::Equal),
            depth_write: false,
            stencil: match mode {
                ShadowMode::Stencil => Some(StencilState::test(CompareOp::Equal, STENCIL_SHADOW_REF)),
                _ => None,
            },
            blend: BlendMode::Additive,
            color_write: true,
            cull: CullMode::Back,
            ..RenderState::default()
        };
        self.draw_bucket(ctx, &shadowed, &opaque, lit)?;

        let translucent_lit = RenderState {
            depth_test: Some(CompareOp::LessOrEqual),
            stencil: None,
            ..lit
        };
        self.draw_bucket(ctx, &unshadowed, &translucent, translucent_lit)
    }
}

#[cfg(test)]
#[path = "interaction_tests.rs"]
mod tests;
