/*!
# Umbra

Render backend core for a real-time 3D engine.

The frontend hands the backend a fully culled view (surfaces grouped per
light, shadow casters, scissor rectangles); the backend turns it into GPU
work through a platform-agnostic `GraphicsDevice` trait. Device
implementations (Vulkan, the in-crate mock used by the unit tests) provide
the concrete buffers, fences and framebuffers.

## Architecture

- **RingBuffer**: fenced, persistently mapped ring for per-frame data
- **BatchExecutor**: packs surfaces into multi-draw batches with per-draw parameters
- **FrameTargets**: primary, shadow and post-process target sets, rebuilt on setting changes
- **Stages**: depth, shadows, interactions, shader passes, fog, outline, tonemap, debug
- **RenderBackend**: runs the stages over a view and closes frames
*/

// Internal modules
mod error;
mod engine;
pub mod log;
pub mod settings;
pub mod graphics_device;
pub mod ring_buffer;
pub mod frontend;
pub mod target;
pub mod batch;
pub mod stage;
pub mod backend;

// Main umbra namespace module
pub mod umbra {
    // Error types
    pub use crate::error::{Error, Result};

    // Engine singleton
    pub use crate::engine::Engine;

    // Frame driver and its configuration
    pub use crate::backend::{BackendStats, RenderBackend};
    pub use crate::settings::{BackendConfig, DepthBits, RenderSettings, Setting, ShadowTechnique};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
    }

    // Device abstraction implemented by platform backends
    pub mod device {
        pub use crate::graphics_device::*;
    }

    // View description produced by the frontend
    pub mod frontend {
        pub use crate::frontend::*;
    }

    pub mod target {
        pub use crate::target::*;
    }

    pub mod stage {
        pub use crate::stage::*;
    }
}

// Re-export math library at crate root
pub use glam;
