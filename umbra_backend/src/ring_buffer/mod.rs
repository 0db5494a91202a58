//! Fence-guarded persistent ring buffer module
//!
//! Shared storage for per-draw and per-view parameter data.

mod ring_buffer;

pub use ring_buffer::{RingBuffer, RingAllocation, LockRecord, FenceWaitPolicy, RingStats};
