//! Unit tests for error.rs
//!
//! Tests all Error variants and their implementations (Display, Debug, Clone, std::error::Error).

use crate::error::{Error, Result};

// ============================================================================
// ERROR DISPLAY TESTS
// ============================================================================

#[test]
fn test_backend_error_display() {
    let err = Error::BackendError("queue submit failed".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Backend error"));
    assert!(display.contains("queue submit failed"));
}

#[test]
fn test_out_of_memory_display() {
    let err = Error::OutOfMemory;
    assert_eq!(format!("{}", err), "Out of GPU memory");
}

#[test]
fn test_invalid_resource_display() {
    let err = Error::InvalidResource("reservation larger than ring".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Invalid resource"));
    assert!(display.contains("reservation larger than ring"));
}

#[test]
fn test_initialization_failed_display() {
    let err = Error::InitializationFailed("program link failed".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Initialization failed"));
    assert!(display.contains("program link failed"));
}

#[test]
fn test_fence_timeout_display() {
    let err = Error::FenceTimeout("fence 7 after 1000 ms".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Fence timeout"));
    assert!(display.contains("fence 7"));
}

#[test]
fn test_incomplete_framebuffer_display() {
    let err = Error::IncompleteFramebuffer("primary: status 0x8CD6".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Incomplete framebuffer"));
    assert!(display.contains("primary"));
}

// ============================================================================
// ERROR TRAIT IMPLEMENTATIONS
// ============================================================================

#[test]
fn test_error_is_std_error() {
    let err = Error::OutOfMemory;
    let _: &dyn std::error::Error = &err;
}

#[test]
fn test_error_debug() {
    let debug = format!("{:?}", Error::FenceTimeout("x".to_string()));
    assert!(debug.contains("FenceTimeout"));

    let debug = format!("{:?}", Error::OutOfMemory);
    assert!(debug.contains("OutOfMemory"));
}

#[test]
fn test_error_clone() {
    let err1 = Error::IncompleteFramebuffer("shadow_atlas".to_string());
    let err2 = err1.clone();
    assert_eq!(format!("{}", err1), format!("{}", err2));
}

// ============================================================================
// RESULT ALIAS
// ============================================================================

#[test]
fn test_result_ok_and_err() {
    fn ok() -> Result<u32> {
        Ok(42)
    }
    fn err() -> Result<u32> {
        Err(Error::OutOfMemory)
    }

    assert_eq!(ok().unwrap(), 42);
    assert!(err().is_err());
}

#[test]
fn test_result_question_mark_propagation() {
    fn inner() -> Result<()> {
        Err(Error::InvalidResource("inner".to_string()))
    }
    fn outer() -> Result<()> {
        inner()?;
        Ok(())
    }

    match outer() {
        Err(Error::InvalidResource(msg)) => assert_eq!(msg, "inner"),
        other => panic!("unexpected result: {:?}", other),
    }
}
