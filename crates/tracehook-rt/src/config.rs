//! Scene tracking configuration.

use serde::{Deserialize, Serialize};
use tracehook_core::constants::{DEFAULT_EVICTION_THRESHOLD, DEFAULT_RECLAIM_FRAMES};
use tracehook_core::MaterialTable;
use tracehook_gpu::BuildFlags;

/// Configuration for acceleration-structure tracking.
///
/// Constructed once at startup; the material table is read by reference from
/// the components that resolve materials.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RtConfig {
    /// Number of reclamation buckets (frames a retired object survives).
    pub reclaim_frames: usize,
    /// Frames a stale geometry entry may go without a redraw before eviction.
    pub eviction_threshold: u64,
    /// Run eviction every this many frames. `None` leaves eviction to the caller.
    pub eviction_interval: Option<u64>,
    /// Instance mask for opaque geometry.
    pub opaque_mask: u8,
    /// Instance mask for geometry traced as non-opaque.
    pub non_opaque_mask: u8,
    /// Disable triangle facing culling on every instance.
    pub cull_disable: bool,
    /// Draws with fewer vertices (or indices) than this are ignored.
    pub min_primitive_vertices: u32,
    /// Material overrides keyed by shader or texture hash.
    pub materials: MaterialTable,
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            reclaim_frames: DEFAULT_RECLAIM_FRAMES,
            eviction_threshold: DEFAULT_EVICTION_THRESHOLD,
            eviction_interval: Some(DEFAULT_EVICTION_THRESHOLD),
            opaque_mask: 0x01,
            non_opaque_mask: 0x02,
            cull_disable: true,
            min_primitive_vertices: 3,
            materials: MaterialTable::default(),
        }
    }
}

impl RtConfig {
    /// Fewest reclamation buckets that still keep a retired object alive past
    /// the frame that recorded its last use.
    pub const MIN_RECLAIM_FRAMES: usize = 2;

    /// Set the number of reclamation buckets. Values below 2 are raised to 2.
    pub fn with_reclaim_frames(mut self, frames: usize) -> Self {
        self.reclaim_frames = frames.max(Self::MIN_RECLAIM_FRAMES);
        self
    }

    /// Apply the builder clamps to fields set directly or deserialized.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.reclaim_frames = self.reclaim_frames.max(Self::MIN_RECLAIM_FRAMES);
        self.eviction_interval = self.eviction_interval.filter(|&i| i > 0);
        self
    }

    /// Set the eviction threshold in frames.
    pub fn with_eviction_threshold(mut self, frames: u64) -> Self {
        self.eviction_threshold = frames;
        self
    }

    /// Set how often eviction runs automatically.
    pub fn with_eviction_interval(mut self, interval: Option<u64>) -> Self {
        self.eviction_interval = interval.filter(|&i| i > 0);
        self
    }

    /// Set the opaque and non-opaque instance masks.
    pub fn with_masks(mut self, opaque: u8, non_opaque: u8) -> Self {
        self.opaque_mask = opaque;
        self.non_opaque_mask = non_opaque;
        self
    }

    /// Set the material table.
    pub fn with_materials(mut self, materials: MaterialTable) -> Self {
        self.materials = materials;
        self
    }

    /// Build flags for a bottom-level structure.
    pub fn blas_flags(&self, is_static: bool) -> BuildFlags {
        if is_static {
            BuildFlags::PREFER_FAST_TRACE
        } else {
            BuildFlags::PREFER_FAST_BUILD
        }
    }

    /// Build flags for the per-frame top-level structure.
    pub fn tlas_flags(&self) -> BuildFlags {
        BuildFlags::PREFER_FAST_BUILD
    }

    /// Instance mask for the given opacity.
    pub fn mask(&self, opaque: bool) -> u8 {
        if opaque {
            self.opaque_mask
        } else {
            self.non_opaque_mask
        }
    }
}
