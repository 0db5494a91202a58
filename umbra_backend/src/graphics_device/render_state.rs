/// Fixed-function state applied before draws
///
/// `RenderState` is set as a whole with `GraphicsDevice::set_render_state`.
/// Backends diff it against what is already bound.

/// 2D rectangle in framebuffer pixels (viewport, scissor, atlas page)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect2D {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle anchored at the origin
    pub fn from_size(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersection of two rectangles (empty when disjoint)
    pub fn intersect(&self, other: &Rect2D) -> Rect2D {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width as i32).min(other.x + other.width as i32);
        let y1 = (self.y + self.height as i32).min(other.y + other.height as i32);
        if x1 <= x0 || y1 <= y0 {
            return Rect2D::new(x0, y0, 0, 0);
        }
        Rect2D::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32)
    }
}

/// Comparison function for depth and stencil tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

/// Stencil buffer update operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrementAndClamp,
    DecrementAndClamp,
    Invert,
    IncrementAndWrap,
    DecrementAndWrap,
}

/// Per-face stencil behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFaceState {
    pub compare: CompareOp,
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
}

impl StencilFaceState {
    /// Test only, never write
    pub fn test(compare: CompareOp) -> Self {
        Self {
            compare,
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
        }
    }
}

/// Stencil test configuration (two-sided)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub front: StencilFaceState,
    pub back: StencilFaceState,
    pub reference: u32,
    pub read_mask: u32,
    pub write_mask: u32,
}

impl StencilState {
    /// Same test on both faces, no writes
    pub fn test(compare: CompareOp, reference: u32) -> Self {
        let face = StencilFaceState::test(compare);
        Self { front: face, back: face, reference, read_mask: 0xFF, write_mask: 0 }
    }

    /// Always pass and replace with `reference`
    pub fn mark(reference: u32) -> Self {
        let face = StencilFaceState {
            compare: CompareOp::Always,
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Replace,
        };
        Self { front: face, back: face, reference, read_mask: 0xFF, write_mask: 0xFF }
    }
}

/// Color blend equation presets used by the stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// No blending, source replaces destination
    Opaque,
    /// src + dst (light accumulation)
    Additive,
    /// src * src_alpha + dst * (1 - src_alpha)
    Alpha,
    /// src * dst (blend lights, decals)
    Modulate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Depth bias, in the units of `glPolygonOffset` / `vkCmdSetDepthBias`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolygonOffset {
    pub factor: f32,
    pub units: f32,
}

/// Depth range mapping (the weapon depth hack squeezes it toward the near plane)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRange {
    pub near: f32,
    pub far: f32,
}

impl DepthRange {
    pub const FULL: DepthRange = DepthRange { near: 0.0, far: 1.0 };
}

/// Complete fixed-function state for a run of draws
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    /// Depth comparison, `None` disables the depth test
    pub depth_test: Option<CompareOp>,
    pub depth_write: bool,
    /// Stencil test, `None` disables it
    pub stencil: Option<StencilState>,
    pub blend: BlendMode,
    pub color_write: bool,
    pub cull: CullMode,
    pub polygon_offset: Option<PolygonOffset>,
    pub depth_range: DepthRange,
    /// Rasterize edges only (debug overlays)
    pub wireframe: bool,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            depth_test: Some(CompareOp::LessOrEqual),
            depth_write: true,
            stencil: None,
            blend: BlendMode::Opaque,
            color_write: true,
            cull: CullMode::Back,
            polygon_offset: None,
            depth_range: DepthRange::FULL,
            wireframe: false,
        }
    }
}

#[cfg(test)]
#[path = "render_state_tests.rs"]
mod tests;
