/// Graphics device module - device trait and all resource/state types

pub mod graphics_device;
pub mod buffer;
pub mod fence;
pub mod attachment;
pub mod frame_buffer;
pub mod render_state;
pub mod draw;
pub mod program;

pub use graphics_device::*;
pub use buffer::*;
pub use fence::*;
pub use attachment::*;
pub use frame_buffer::*;
pub use render_state::*;
pub use draw::*;
pub use program::*;

// Mock graphics device for tests (no GPU required)
#[cfg(test)]
pub mod mock_graphics_device;
