//! Core types, math, and configuration tables for tracehook.
//!
//! This crate provides the foundational types shared by the GPU abstraction
//! and the ray-tracing scene crates:
//! - Transform packing and clip-space to world-space recovery
//! - Material snapshots and the material lookup table
//! - Engine-wide error type

pub mod error;
pub mod material;
pub mod math;

pub use error::{Error, Result};
pub use material::{Material, MaterialKind, MaterialOverride, MaterialTable};
pub use math::Transform3x4;

/// Engine-wide constants
pub mod constants {
    /// Default number of frames a retired GPU object waits before destruction.
    pub const DEFAULT_RECLAIM_FRAMES: usize = 4;
    /// Default number of frames a stale geometry entry survives without a redraw.
    pub const DEFAULT_EVICTION_THRESHOLD: u64 = 100;
    /// Sentinel descriptor index for an unbound attachment slot.
    pub const INVALID_DESCRIPTOR: u32 = u32::MAX;
    /// Largest instance id representable in a native instance descriptor (24 bits).
    pub const MAX_INSTANCE_ID: u32 = (1 << 24) - 1;
}
