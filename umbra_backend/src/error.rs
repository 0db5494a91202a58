//! Error types for the Umbra render backend
//!
//! This module defines the error types used throughout the backend,
//! including device, target, ring buffer and batching failures.

use std::fmt;

/// Result type for Umbra backend operations
pub type Result<T> = std::result::Result<T, Error>;

/// Umbra backend errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Backend-specific error (Vulkan, mock device, etc.)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (buffer range, attachment, program, etc.)
    InvalidResource(String),

    /// Initialization failed (device, ring buffer, programs, target sets)
    InitializationFailed(String),

    /// A fence did not signal within the bounded wait
    FenceTimeout(String),

    /// A target set failed its completeness check
    IncompleteFramebuffer(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::FenceTimeout(msg) => write!(f, "Fence timeout: {}", msg),
            Error::IncompleteFramebuffer(msg) => write!(f, "Incomplete framebuffer: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
