//! Frame driver
//!
//! `RenderBackend` owns the shared batch executor, the frame target sets and
//! one value of every render stage, and runs them in a fixed order for each
//! view.

mod render_backend;

pub use render_backend::{BackendStats, RenderBackend, VIEW_CLEAR_COLOR};
