//! Test harness for tracehook.
//!
//! Provides a headless recording device and geometry fixtures so the
//! acceleration-structure layer can be exercised without a GPU.

pub mod fixtures;
pub mod harness;

pub use fixtures::{indexed_geometry, test_view_projection, triangle_geometry};
pub use harness::{BuildRecord, DeviceEvent, FailurePlan, RecordingDevice};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("Readback failed: {0}")]
    Readback(String),
}

pub type Result<T> = std::result::Result<T, TestError>;
