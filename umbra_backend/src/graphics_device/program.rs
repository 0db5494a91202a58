/// Program handles and the program manager collaborator
///
/// Program compilation, linking and reflection live outside the backend.
/// Stages only hold opaque `Program` handles, assign uniform block bindings
/// once at init, and bind them through the device.

use std::sync::Arc;
use crate::error::Result;
use crate::graphics_device::VertexLayoutKind;

/// Uniform block carrying per-view data (projection, view matrix, viewport)
pub const VIEW_PARAMS_BLOCK: &str = "ViewParams";
/// Uniform block carrying the per-draw parameter array of a batch
pub const DRAW_PARAMS_BLOCK: &str = "DrawParams";
/// Uniform block carrying per-light data
pub const LIGHT_PARAMS_BLOCK: &str = "LightParams";

/// Binding index of `ViewParams`
pub const VIEW_PARAMS_BINDING: u32 = 0;
/// Binding index of `DrawParams`
pub const DRAW_PARAMS_BINDING: u32 = 1;
/// Binding index of `LightParams`
pub const LIGHT_PARAMS_BINDING: u32 = 2;

/// Linked GPU program
pub trait Program: Send + Sync {
    /// Program name as requested from the manager
    fn name(&self) -> &str;

    /// Whether the program declares a uniform block with this name
    fn has_uniform_block(&self, block: &str) -> bool;

    /// Attach the named uniform block to an indexed binding point
    ///
    /// # Errors
    ///
    /// Fails when the block does not exist or cannot use that binding.
    fn assign_uniform_block(&self, block: &str, binding: u32) -> Result<()>;
}

/// Request for a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramDesc {
    /// Program name (e.g., "depth_fast", "interaction_stencil")
    pub name: String,
    /// Vertex format the program consumes
    pub vertex_layout: VertexLayoutKind,
}

impl ProgramDesc {
    pub fn new(name: &str, vertex_layout: VertexLayoutKind) -> Self {
        Self { name: name.to_string(), vertex_layout }
    }
}

/// Source of linked programs
///
/// Link failure is reported as an error and treated as fatal by the stages.
pub trait ProgramManager {
    fn load_program(&self, desc: &ProgramDesc) -> Result<Arc<dyn Program>>;
}

/// Assign every standard block the program declares to its fixed binding
pub fn assign_standard_blocks(program: &dyn Program) -> Result<()> {
    for (block, binding) in [
        (VIEW_PARAMS_BLOCK, VIEW_PARAMS_BINDING),
        (DRAW_PARAMS_BLOCK, DRAW_PARAMS_BINDING),
        (LIGHT_PARAMS_BLOCK, LIGHT_PARAMS_BINDING),
    ] {
        if program.has_uniform_block(block) {
            program.assign_uniform_block(block, binding)?;
        }
    }
    Ok(())
}
