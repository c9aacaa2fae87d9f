//! Acceleration-structure scene tracking for draw-call driven ray tracing.
//!
//! This crate provides:
//! - A geometry cache holding one bottom-level structure per unique mesh
//! - Per-frame instance accumulation with stable occurrence ordering
//! - Scene assembly into a single top-level structure per frame
//! - Upload of the per-instance attachment and shading-data tables
//! - The [`RayTracingScene`] facade the hook layer drives

pub mod accumulator;
pub mod cache;
pub mod config;
pub mod context;
pub mod geometry;
pub mod packer;
pub mod scene;

pub use accumulator::{InstanceAccumulator, InstanceRef};
pub use cache::{
    AttachmentBinding, CacheStats, GeometryCache, GeometryEntry, GeometryState, InstanceRecord,
};
pub use config::RtConfig;
pub use context::RayTracingScene;
pub use geometry::{AttachmentSlot, AttachmentSource, BuildDescriptor, GeometryKey, ObservedDraw};
pub use packer::{AttachmentEntry, AttachmentRow, GpuTable, MetadataPacker, ShadingData};
pub use scene::{FrameScene, InstanceDesc, InstanceFlags, SceneAssembler, SceneStats};
