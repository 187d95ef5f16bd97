//! Unit tests for error.rs
//!
//! Tests all Error variants, their Display output and the engine_err!/engine_bail! macros.

use crate::error::{Error, Result};
use serial_test::serial;

// ============================================================================
// ERROR DISPLAY TESTS
// ============================================================================

#[test]
fn test_backend_error_display() {
    let err = Error::BackendError("dispatch of 'frustum_cull' failed".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Backend error"));
    assert!(display.contains("frustum_cull"));
}

#[test]
fn test_out_of_memory_display() {
    let err = Error::OutOfMemory;
    assert_eq!(format!("{}", err), "Out of GPU memory");
}

#[test]
fn test_invalid_resource_display() {
    let err = Error::InvalidResource("Buffer key not found".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Invalid resource"));
    assert!(display.contains("Buffer key not found"));
}

#[test]
fn test_initialization_failed_display() {
    let err = Error::InitializationFailed("kernel creation failed".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Initialization failed"));
    assert!(display.contains("kernel creation failed"));
}

#[test]
fn test_unsupported_display() {
    let err = Error::Unsupported("compute shaders".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Unsupported"));
    assert!(display.contains("compute shaders"));
}

#[test]
fn test_invalid_config_display() {
    let err = Error::InvalidConfig("refit_iterations must be > 0".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Invalid configuration"));
    assert!(display.contains("refit_iterations"));
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
    let debug = format!("{:?}", Error::BackendError("test".to_string()));
    assert!(debug.contains("BackendError"));

    let debug = format!("{:?}", Error::Unsupported("test".to_string()));
    assert!(debug.contains("Unsupported"));
}

#[test]
fn test_error_clone_and_eq() {
    let err1 = Error::InvalidResource("res".to_string());
    let err2 = err1.clone();
    assert_eq!(err1, err2);
    assert_ne!(err1, Error::OutOfMemory);
}

// ============================================================================
// RESULT TYPE TESTS
// ============================================================================

#[test]
fn test_error_propagation_with_question_mark() {
    fn inner() -> Result<i32> {
        Err(Error::OutOfMemory)
    }

    fn outer() -> Result<i32> {
        inner()?;
        Ok(42)
    }

    assert_eq!(outer(), Err(Error::OutOfMemory));
}

// ============================================================================
// MACRO TESTS
// ============================================================================

#[test]
#[serial]
fn test_engine_err_builds_backend_error() {
    let err = crate::engine_err!("galaxy3d::Test", "value {} out of range", 7);
    assert_eq!(err, Error::BackendError("value 7 out of range".to_string()));
}

#[test]
#[serial]
fn test_engine_bail_returns_early() {
    fn checked(value: u32) -> Result<u32> {
        if value == 0 {
            crate::engine_bail!("galaxy3d::Test", "value must be non-zero");
        }
        Ok(value * 2)
    }

    assert_eq!(checked(3), Ok(6));
    assert_eq!(
        checked(0),
        Err(Error::BackendError("value must be non-zero".to_string()))
    );
}
