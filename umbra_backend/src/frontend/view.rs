/// View and light definitions produced by the frontend each frame

use glam::{Mat4, Vec3, Vec4};

use crate::graphics_device::Rect2D;
use super::surface::DrawSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightKind {
    /// Regular light drawn by the interaction pass
    Normal,
    /// Fog volume drawn by the fog pass
    Fog,
    /// Blend light (modulates what is already drawn)
    Blend,
}

/// A light visible in the view, with its pre-culled surface lists
#[derive(Debug, Clone)]
pub struct ViewLight {
    pub origin: Vec3,
    pub color: Vec4,
    /// Screen-space bounds of the light volume
    pub scissor: Rect2D,
    pub kind: LightKind,
    pub no_shadows: bool,
    /// Shadow volumes (stencil path) or shadow casters (shadow map path)
    pub shadows: Vec<DrawSurface>,
    /// Opaque and perforated surfaces lit by this light
    pub interactions: Vec<DrawSurface>,
    /// Translucent surfaces lit by this light, drawn unshadowed
    pub translucent_interactions: Vec<DrawSurface>,
    /// Fog/blend lights: density (distance to full opacity is 1 / density)
    pub fog_density: f32,
    /// World to light clip space, used for shadow map rendering and lookup
    pub shadow_view_projection: Mat4,
}

impl ViewLight {
    pub fn new(origin: Vec3, color: Vec4, scissor: Rect2D) -> Self {
        Self {
            origin,
            color,
            scissor,
            kind: LightKind::Normal,
            no_shadows: false,
            shadows: Vec::new(),
            interactions: Vec::new(),
            translucent_interactions: Vec::new(),
            fog_density: 0.0,
            shadow_view_projection: Mat4::IDENTITY,
        }
    }

    pub fn casts_shadows(&self) -> bool {
        !self.no_shadows && !self.shadows.is_empty()
    }

    pub fn has_interactions(&self) -> bool {
        !self.interactions.is_empty() || !self.translucent_interactions.is_empty()
    }
}

/// Everything needed to render one view
#[derive(Debug, Clone)]
pub struct ViewDef {
    pub render_width: u32,
    pub render_height: u32,
    pub viewport: Rect2D,
    pub scissor: Rect2D,
    pub view_origin: Vec3,
    pub world_to_view: Mat4,
    pub projection: Mat4,
    /// All surfaces, sorted by material sort value
    pub surfaces: Vec<DrawSurface>,
    pub lights: Vec<ViewLight>,
    /// Mirror/portal view rendered into a subview texture
    pub is_subview: bool,
}

impl ViewDef {
    pub fn new(render_width: u32, render_height: u32) -> Self {
        let full = Rect2D::from_size(render_width, render_height);
        Self {
            render_width,
            render_height,
            viewport: full,
            scissor: full,
            view_origin: Vec3::ZERO,
            world_to_view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            surfaces: Vec::new(),
            lights: Vec::new(),
            is_subview: false,
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.world_to_view
    }
}
