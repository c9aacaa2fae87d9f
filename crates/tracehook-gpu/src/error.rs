//! GPU error types.

use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Acceleration structure build rejected by the device.
    #[error("Acceleration structure build failed: {0}")]
    BuildFailed(String),

    /// Shader resource view creation failed.
    #[error("View creation failed: {0}")]
    ViewCreation(String),

    /// Buffer could not be mapped for CPU access.
    #[error("Buffer map failed: {0}")]
    MapFailed(String),

    /// Handle does not name a live object on this device.
    #[error("Invalid handle: {0}")]
    InvalidHandle(u64),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
