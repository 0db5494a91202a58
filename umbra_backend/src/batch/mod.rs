//! Draw batching
//!
//! Per-draw parameter arrays staged per batch, uploaded through the shared
//! ring buffer and indexed by draw id in a single multi-draw submission.

mod batch_executor;
mod draw_params;

pub use batch_executor::{Batch, BatchDraw, BatchExecutor, BatchStats, PARAM_RING_NAME};
