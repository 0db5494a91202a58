/// Material descriptions as evaluated by the frontend
///
/// Only what the stages need to bucket and draw surfaces: coverage, sort
/// order, per-stage lighting role, texture, register indices and blend.

use crate::graphics_device::{BlendMode, TextureHandle};

/// How a material covers the pixels it is drawn over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coverage {
    Opaque,
    /// Alpha-tested
    Perforated,
    Translucent,
}

/// Sort values. Subviews first, post-process surfaces last.
pub mod sort {
    pub const SUBVIEW: f32 = -3.0;
    pub const GUI: f32 = -2.0;
    pub const BAD: f32 = -1.0;
    pub const OPAQUE: f32 = 0.0;
    pub const PORTAL_SKY: f32 = 1.0;
    pub const DECAL: f32 = 2.0;
    pub const FAR: f32 = 3.0;
    pub const MEDIUM: f32 = 5.0;
    pub const CLOSE: f32 = 6.0;
    pub const ALMOST_NEAREST: f32 = 7.0;
    pub const NEAREST: f32 = 8.0;
    pub const POST_PROCESS: f32 = 100.0;
}

/// Role of a material stage in the lighting pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageLighting {
    /// Drawn by the shader pass, unaffected by lights
    Ambient,
    Bump,
    Diffuse,
    Specular,
}

/// One evaluated stage of a material
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialStage {
    pub lighting: StageLighting,
    pub texture: TextureHandle,
    /// Register indices of the 2x3 texture matrix rows (s, t)
    pub texture_matrix: Option<[[usize; 3]; 2]>,
    /// Register indices of the RGBA color
    pub color: [usize; 4],
    /// Register index of the alpha-test threshold
    pub alpha_test: Option<usize>,
    /// Register index; the stage is skipped when the register is 0
    pub condition: Option<usize>,
    pub blend: BlendMode,
    /// Multiply by the vertex color
    pub vertex_color: bool,
}

impl MaterialStage {
    pub fn new(lighting: StageLighting, texture: TextureHandle) -> Self {
        Self {
            lighting,
            texture,
            texture_matrix: None,
            color: [0, 0, 0, 0],
            alpha_test: None,
            condition: None,
            blend: BlendMode::Opaque,
            vertex_color: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub coverage: Coverage,
    pub sort: f32,
    /// Decal-style depth bias, in polygon offset units
    pub polygon_offset: Option<f32>,
    /// Mirror or portal rendered from its own view
    pub has_subview: bool,
    pub no_shadows: bool,
    pub stages: Vec<MaterialStage>,
}

impl Material {
    pub fn new(name: &str, coverage: Coverage) -> Self {
        Self {
            name: name.to_string(),
            coverage,
            sort: match coverage {
                Coverage::Translucent => sort::MEDIUM,
                _ => sort::OPAQUE,
            },
            polygon_offset: None,
            has_subview: false,
            no_shadows: false,
            stages: Vec::new(),
        }
    }

    pub fn with_stage(mut self, stage: MaterialStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn is_translucent(&self) -> bool {
        self.coverage == Coverage::Translucent
    }

    /// Any stage takes part in light interactions
    pub fn receives_light(&self) -> bool {
        self.stages.iter().any(|s| s.lighting != StageLighting::Ambient)
    }

    /// Any stage is drawn by the shader pass
    pub fn has_ambient_stages(&self) -> bool {
        self.stages.iter().any(|s| s.lighting == StageLighting::Ambient)
    }

    /// Opaque without depth bias: the depth pass can skip texturing
    pub fn is_fast_path_opaque(&self) -> bool {
        self.coverage == Coverage::Opaque && self.polygon_offset.is_none() && !self.has_subview
    }

    /// First alpha-tested stage (drives the perforated depth path)
    pub fn alpha_tested_stage(&self) -> Option<&MaterialStage> {
        self.stages.iter().find(|s| s.alpha_test.is_some())
    }

    pub fn stage_by_lighting(&self, lighting: StageLighting) -> Option<&MaterialStage> {
        self.stages.iter().find(|s| s.lighting == lighting)
    }
}
