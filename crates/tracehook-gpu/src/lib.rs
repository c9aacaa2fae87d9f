//! GPU abstraction layer for tracehook.
//!
//! This crate provides:
//! - The device trait every GPU call is routed through
//! - Resource, view and acceleration-structure build descriptors
//! - Exactly-once ownership guards for device objects
//! - Deferred reclamation of objects still referenced by in-flight frames

pub mod deferred;
pub mod device;
pub mod error;
pub mod resource;

#[cfg(test)]
mod testing;

pub use deferred::ReclaimQueue;
pub use device::{
    upload, AccelerationStructureBuild, AccelerationStructureLevel, BuildFlags, BuildInputs,
    BuildSizes, CommandList, Format, MemoryLocation, ResourceDesc, ResourceHandle, ResourceKind,
    ResourceUsage, RtDevice, TriangleGeometry, ViewDesc, ViewHandle,
};
pub use error::{GpuError, Result};
pub use resource::{DeviceObject, Owned, OwnedResource, OwnedView};
