/// Uniform blocks and per-draw parameter layouts
///
/// `ViewParams` and `LightParams` are uploaded once per view and per light.
/// The `*Params` structs are the per-draw array elements each stage fills;
/// shaders index them with the draw id.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use crate::assert_draw_params_layout;

/// Up to four bindless texture handles as (lo, hi) word pairs
pub type TextureWords = [u32; 8];

/// Per-view uniforms
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ViewParams {
    pub projection: Mat4,
    pub world_to_view: Mat4,
    pub view_origin: Vec4,
    /// x, y, width, height
    pub viewport: Vec4,
}

/// Per-light uniforms
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightParams {
    pub shadow_view_projection: Mat4,
    pub origin: Vec4,
    pub color: Vec4,
    /// Shadow atlas page as uv scale (xy) and bias (zw)
    pub shadow_page: Vec4,
    /// x: soft shadow samples, y/z: inverse render size, w: 1 when shadowed
    pub shadow_params: Vec4,
    /// x: fog density
    pub fog: Vec4,
    /// Bindless handle of the shadow texture (atlas or stencil copy)
    pub shadow_texture: [u32; 4],
}

assert_draw_params_layout!(ViewParams { projection, world_to_view, view_origin, viewport });
assert_draw_params_layout!(LightParams {
    shadow_view_projection, origin, color, shadow_page, shadow_params, fog, shadow_texture
});

/// Depth pre-pass draw
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DepthParams {
    pub mvp: Mat4,
    /// Surface scissor in pixels (min x, min y, max x, max y)
    pub clip_bounds: Vec4,
    pub texture_s: Vec4,
    pub texture_t: Vec4,
    pub color: Vec4,
    /// x: alpha threshold (0 disables the test)
    pub alpha_test: Vec4,
    pub textures: TextureWords,
}

/// Shadow volume draw
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadowVolumeParams {
    pub mvp: Mat4,
    /// Surface scissor in pixels (min x, min y, max x, max y)
    pub clip_bounds: Vec4,
    /// Volumes extrude w = 0 vertices away from this point
    pub light_origin_local: Vec4,
}

/// Shadow caster draw into an atlas page
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadowMapParams {
    /// Model to light clip space
    pub mvp: Mat4,
}

/// Light interaction draw
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InteractionParams {
    pub mvp: Mat4,
    /// Surface scissor in pixels (min x, min y, max x, max y)
    pub clip_bounds: Vec4,
    pub model_matrix: Mat4,
    pub light_origin_local: Vec4,
    pub view_origin_local: Vec4,
    pub bump_st: [Vec4; 2],
    pub diffuse_st: [Vec4; 2],
    pub specular_st: [Vec4; 2],
    pub diffuse_color: Vec4,
    pub specular_color: Vec4,
    /// x: vertex color modulate, y: vertex color add
    pub vertex_color: Vec4,
    pub textures: TextureWords,
}

/// Unlit material stage draw
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShaderPassParams {
    pub mvp: Mat4,
    /// Surface scissor in pixels (min x, min y, max x, max y)
    pub clip_bounds: Vec4,
    pub texture_s: Vec4,
    pub texture_t: Vec4,
    pub color: Vec4,
    pub vertex_color: Vec4,
    pub alpha_test: Vec4,
    pub textures: TextureWords,
}

/// Fog or blend light draw
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FogParams {
    pub mvp: Mat4,
    /// Surface scissor in pixels (min x, min y, max x, max y)
    pub clip_bounds: Vec4,
    pub model_matrix: Mat4,
}

/// Highlight outline draw
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct OutlineParams {
    pub mvp: Mat4,
    pub color: Vec4,
    /// x: extrusion along the normal, in model units
    pub thickness: Vec4,
}

/// Wireframe overlay draw
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DebugParams {
    pub mvp: Mat4,
    /// Surface scissor in pixels (min x, min y, max x, max y)
    pub clip_bounds: Vec4,
    pub color: Vec4,
}

assert_draw_params_layout!(DepthParams { mvp, clip_bounds, texture_s, texture_t, color, alpha_test, textures });
assert_draw_params_layout!(ShadowVolumeParams { mvp, clip_bounds, light_origin_local });
assert_draw_params_layout!(ShadowMapParams { mvp });
assert_draw_params_layout!(InteractionParams {
    mvp, clip_bounds, model_matrix, light_origin_local, view_origin_local, bump_st, diffuse_st, specular_st,
    diffuse_color, specular_color, vertex_color, textures,
});
assert_draw_params_layout!(ShaderPassParams { mvp, clip_bounds, texture_s, texture_t, color, vertex_color, alpha_test, textures });
assert_draw_params_layout!(FogParams { mvp, clip_bounds, model_matrix });
assert_draw_params_layout!(OutlineParams { mvp, color, thickness });
assert_draw_params_layout!(DebugParams { mvp, clip_bounds, color });
