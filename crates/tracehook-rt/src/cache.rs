//! Bottom-level acceleration structures shared by every draw of the same mesh.
//!
//! Entries live in a dense arena addressed through a key lookup table. Removal
//! swaps the last entry into the hole, so entry order is not stable across
//! evictions.

use std::sync::Arc;

use glam::Mat4;
use hashbrown::HashMap;
use tracehook_core::constants::INVALID_DESCRIPTOR;
use tracehook_core::math::clip_to_world;
use tracehook_core::Material;
use tracehook_gpu::{
    AccelerationStructureBuild, AccelerationStructureLevel, BuildFlags, BuildInputs, CommandList,
    Format, OwnedResource, OwnedView, ReclaimQueue, ResourceDesc, ResourceHandle, Result,
    RtDevice,
};
use tracing::{debug, warn};

use crate::geometry::{AttachmentSlot, AttachmentSource, BuildDescriptor, GeometryKey};

/// One placement of a mesh in the scene.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InstanceRecord {
    /// Current transform. Object-to-clip until the scene assembler resolves it to world space.
    pub transform: Mat4,
    /// Previous frame's transform.
    pub prev_transform: Mat4,
    pub material: Material,
    /// Fingerprint of the vertex streams bound when this instance was drawn.
    pub stream: u64,
    /// Frame this record was last written.
    pub frame: u64,
    clip_space: bool,
    prev_clip_space: bool,
}

impl InstanceRecord {
    /// First appearance: no motion.
    pub(crate) fn new(transform: Mat4, material: Material, stream: u64, frame: u64) -> Self {
        Self {
            transform,
            prev_transform: transform,
            material,
            stream,
            frame,
            clip_space: true,
            prev_clip_space: true,
        }
    }

    /// Repeat appearance: the old current transform becomes the previous one.
    pub(crate) fn update(&mut self, transform: Mat4, material: Material, frame: u64) {
        self.prev_transform = self.transform;
        self.prev_clip_space = self.clip_space;
        self.transform = transform;
        self.clip_space = true;
        self.material = material;
        self.frame = frame;
    }

    /// Returns true if `transform` still holds the draw's object-to-clip matrix.
    pub fn is_clip_space(&self) -> bool {
        self.clip_space
    }

    /// Rewrite clip-space transforms as world-space ones.
    ///
    /// Without a camera base the stored transforms are taken as world space.
    pub(crate) fn resolve(&mut self, inverse_view_projection: Option<Mat4>) {
        if let Some(inverse) = inverse_view_projection {
            if self.clip_space {
                self.transform = clip_to_world(self.transform, inverse);
            }
            if self.prev_clip_space {
                self.prev_transform = clip_to_world(self.prev_transform, inverse);
            }
        }
        self.clip_space = false;
        self.prev_clip_space = false;
    }
}

/// A view over a draw-bound resource, owned by its geometry entry.
#[derive(Debug)]
pub struct AttachmentBinding {
    pub slot: AttachmentSlot,
    pub view: OwnedView,
    pub descriptor_index: u32,
    pub offset: u32,
    pub stride: u32,
    pub format: Format,
}

/// Build and visibility bookkeeping for one entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeometryState {
    pub last_visible_frame: u64,
    pub last_rebuild_frame: Option<u64>,
    pub needs_rebuild: bool,
    /// Frame `needs_rebuild` was raised, if it is set.
    pub stale_since: Option<u64>,
    pub is_dynamic: bool,
}

/// Cached state for one unique mesh.
#[derive(Debug)]
pub struct GeometryEntry {
    descriptor: BuildDescriptor,
    acceleration_structure: Option<OwnedResource>,
    attachments: Vec<AttachmentBinding>,
    pub(crate) instances: Vec<InstanceRecord>,
    pub(crate) state: GeometryState,
}

impl GeometryEntry {
    fn new(descriptor: BuildDescriptor, frame: u64) -> Self {
        Self {
            descriptor,
            acceleration_structure: None,
            attachments: Vec::new(),
            instances: Vec::new(),
            state: GeometryState {
                last_visible_frame: frame,
                last_rebuild_frame: None,
                needs_rebuild: true,
                stale_since: Some(frame),
                is_dynamic: descriptor.dynamic,
            },
        }
    }

    pub fn descriptor(&self) -> &BuildDescriptor {
        &self.descriptor
    }

    pub fn key(&self) -> GeometryKey {
        self.descriptor.key()
    }

    /// The bottom-level structure, if a build has ever succeeded.
    pub fn acceleration_structure(&self) -> Option<ResourceHandle> {
        self.acceleration_structure.as_ref().map(OwnedResource::handle)
    }

    pub fn attachments(&self) -> &[AttachmentBinding] {
        &self.attachments
    }

    pub fn instances(&self) -> &[InstanceRecord] {
        &self.instances
    }

    pub fn state(&self) -> &GeometryState {
        &self.state
    }

    fn mark_stale(&mut self, frame: u64) {
        self.state.needs_rebuild = true;
        self.state.stale_since.get_or_insert(frame);
    }

    fn needs_build(&self, descriptor: &BuildDescriptor, frame: u64) -> bool {
        self.state.needs_rebuild
            || self.descriptor.geometry.opaque != descriptor.geometry.opaque
            || (self.state.is_dynamic && self.state.last_rebuild_frame != Some(frame))
    }

    /// Hand the structure and every attachment view to the reclamation queue.
    fn retire(&mut self, reclaim: &ReclaimQueue) {
        if let Some(blas) = self.acceleration_structure.take() {
            blas.retire(reclaim);
        }
        for binding in self.attachments.drain(..) {
            binding.view.retire(reclaim);
        }
    }
}

/// Running counters for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub blas_builds: u64,
    pub blas_build_failures: u64,
    pub evictions: u64,
}

/// Maps build descriptors to persistent bottom-level structures.
pub struct GeometryCache {
    device: Arc<dyn RtDevice>,
    reclaim: Arc<ReclaimQueue>,
    entries: Vec<GeometryEntry>,
    lookup: HashMap<GeometryKey, usize>,
    stats: CacheStats,
}

impl GeometryCache {
    pub fn new(device: Arc<dyn RtDevice>, reclaim: Arc<ReclaimQueue>) -> Self {
        Self {
            device,
            reclaim,
            entries: Vec::new(),
            lookup: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GeometryEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [GeometryEntry] {
        &mut self.entries
    }

    pub fn get(&self, key: &GeometryKey) -> Option<&GeometryEntry> {
        self.lookup.get(key).map(|&index| &self.entries[index])
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }

    /// Find or create the entry for `descriptor`, building its structure if required.
    ///
    /// A build is recorded into `cmd` on first sight, after invalidation, when
    /// opacity changes, and once per frame for dynamic geometry. A failed build
    /// keeps whatever structure the entry already had and leaves it stale.
    pub fn resolve(
        &mut self,
        cmd: CommandList,
        descriptor: &BuildDescriptor,
        attachments: &[AttachmentSource],
        flags: BuildFlags,
        frame: u64,
    ) -> &mut GeometryEntry {
        let key = descriptor.key();
        let index = match self.lookup.get(&key) {
            Some(&index) => index,
            None => {
                let index = self.entries.len();
                self.entries.push(GeometryEntry::new(*descriptor, frame));
                self.lookup.insert(key, index);
                debug!(?key, index, "new geometry entry");
                index
            }
        };

        let entry = &mut self.entries[index];
        if entry.needs_build(descriptor, frame) {
            match build_entry(
                &self.device,
                &self.reclaim,
                entry,
                descriptor,
                cmd,
                attachments,
                flags,
                frame,
            ) {
                Ok(()) => self.stats.blas_builds += 1,
                Err(err) => {
                    self.stats.blas_build_failures += 1;
                    // A structure that was valid before the attempt stays in the scene.
                    if entry.state.needs_rebuild || entry.acceleration_structure.is_none() {
                        entry.mark_stale(frame);
                    }
                    warn!(?key, %err, "bottom-level build failed");
                }
            }
        }
        entry
    }

    /// Mark every entry reading from `buffer` for rebuild on its next draw.
    ///
    /// Returns the number of entries marked.
    pub fn invalidate(&mut self, buffer: ResourceHandle, frame: u64) -> usize {
        let mut marked = 0;
        for entry in &mut self.entries {
            if entry.descriptor.key().references(buffer) {
                entry.mark_stale(frame);
                marked += 1;
            }
        }
        if marked > 0 {
            debug!(?buffer, marked, "invalidated geometry");
        }
        marked
    }

    /// Remove entries that have been stale and undrawn for more than `threshold` frames.
    ///
    /// Their structures and views go to the reclamation queue. Returns the
    /// number of entries removed.
    pub fn evict_stale(&mut self, frame: u64, threshold: u64) -> usize {
        let mut evicted = 0;
        let mut index = 0;
        while index < self.entries.len() {
            let state = &self.entries[index].state;
            let expired = state.needs_rebuild
                && frame.saturating_sub(state.last_visible_frame) > threshold
                && state
                    .stale_since
                    .is_some_and(|since| frame.saturating_sub(since) > threshold);
            if expired {
                self.remove_at(index);
                evicted += 1;
            } else {
                index += 1;
            }
        }
        if evicted > 0 {
            self.stats.evictions += evicted as u64;
            debug!(evicted, remaining = self.entries.len(), "evicted stale geometry");
        }
        evicted
    }

    /// Retire every entry. Used at shutdown.
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            entry.retire(&self.reclaim);
        }
        self.entries.clear();
        self.lookup.clear();
    }

    fn remove_at(&mut self, index: usize) {
        let mut removed = self.entries.swap_remove(index);
        self.lookup.remove(&removed.key());
        if let Some(moved) = self.entries.get(index) {
            self.lookup.insert(moved.key(), index);
        }
        removed.retire(&self.reclaim);
    }
}

impl Drop for GeometryCache {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Record a bottom-level build of `descriptor` for `entry` and capture its attachment views.
///
/// The entry is left untouched on error.
#[allow(clippy::too_many_arguments)]
fn build_entry(
    device: &Arc<dyn RtDevice>,
    reclaim: &ReclaimQueue,
    entry: &mut GeometryEntry,
    descriptor: &BuildDescriptor,
    cmd: CommandList,
    attachments: &[AttachmentSource],
    flags: BuildFlags,
    frame: u64,
) -> Result<()> {
    let inputs = BuildInputs::Bottom(descriptor.geometry);
    let sizes = device.acceleration_structure_sizes(&inputs)?;

    let blas = OwnedResource::new(
        Arc::clone(device),
        device.create_resource(&ResourceDesc::acceleration_structure(
            "blas",
            AccelerationStructureLevel::Bottom,
            sizes.result,
        ))?,
    );
    let scratch = OwnedResource::new(
        Arc::clone(device),
        device.create_resource(&ResourceDesc::scratch("blas_scratch", sizes.scratch))?,
    );

    device.build_acceleration_structure(
        cmd,
        &AccelerationStructureBuild {
            inputs: &inputs,
            instances: ResourceHandle::NULL,
            dst: blas.handle(),
            scratch: scratch.handle(),
            flags,
        },
    )?;

    // Recorded: the GPU owns these until the command list retires.
    scratch.retire(reclaim);
    if let Some(previous) = entry.acceleration_structure.replace(blas) {
        previous.retire(reclaim);
    }

    let captured = capture_attachments(device, attachments);
    for binding in std::mem::replace(&mut entry.attachments, captured) {
        binding.view.retire(reclaim);
    }

    entry.descriptor = *descriptor;
    entry.state.needs_rebuild = false;
    entry.state.stale_since = None;
    entry.state.last_rebuild_frame = Some(frame);
    Ok(())
}

/// Create one view per attachment. Slots whose view cannot be created stay unbound.
fn capture_attachments(
    device: &Arc<dyn RtDevice>,
    attachments: &[AttachmentSource],
) -> Vec<AttachmentBinding> {
    attachments
        .iter()
        .filter(|source| !source.resource.is_null())
        .filter_map(|source| match device.create_view(source.resource, &source.view) {
            Ok(view) => Some(AttachmentBinding {
                slot: source.slot,
                descriptor_index: device.descriptor_index(view).unwrap_or(INVALID_DESCRIPTOR),
                view: OwnedView::new(Arc::clone(device), view),
                offset: source.offset,
                stride: source.stride,
                format: source.format,
            }),
            Err(err) => {
                warn!(slot = ?source.slot, %err, "attachment view creation failed");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracehook_test::{indexed_geometry, triangle_geometry, RecordingDevice};

    const CMD: CommandList = CommandList(1);

    fn setup() -> (Arc<RecordingDevice>, Arc<ReclaimQueue>, GeometryCache) {
        let device = RecordingDevice::shared();
        let reclaim = Arc::new(ReclaimQueue::new(4));
        let cache = GeometryCache::new(device.clone(), Arc::clone(&reclaim));
        (device, reclaim, cache)
    }

    fn resolve(cache: &mut GeometryCache, descriptor: &BuildDescriptor, frame: u64) {
        cache.resolve(CMD, descriptor, &[], BuildFlags::PREFER_FAST_TRACE, frame);
    }

    #[test]
    fn identical_descriptors_share_one_build() {
        let (device, _reclaim, mut cache) = setup();
        let descriptor = BuildDescriptor::new(indexed_geometry(1, 2, 0, 36), false);
        for frame in 0..5 {
            resolve(&mut cache, &descriptor, frame);
            resolve(&mut cache, &descriptor, frame);
        }
        assert_eq!(cache.len(), 1);
        assert_eq!(device.build_count(AccelerationStructureLevel::Bottom), 1);
        assert_eq!(cache.stats().blas_builds, 1);
    }

    #[test]
    fn different_ranges_are_different_entries() {
        let (_device, _reclaim, mut cache) = setup();
        resolve(&mut cache, &BuildDescriptor::new(indexed_geometry(1, 2, 0, 36), false), 0);
        resolve(&mut cache, &BuildDescriptor::new(indexed_geometry(1, 2, 72, 36), false), 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn invalidation_rebuilds_on_next_draw_and_defers_old_structure() {
        let (device, reclaim, mut cache) = setup();
        let descriptor = BuildDescriptor::new(triangle_geometry(7, 30), false);
        resolve(&mut cache, &descriptor, 0);
        let first = cache.get(&descriptor.key()).unwrap().acceleration_structure().unwrap();

        assert_eq!(cache.invalidate(ResourceHandle(7), 1), 1);
        assert!(cache.get(&descriptor.key()).unwrap().state().needs_rebuild);

        resolve(&mut cache, &descriptor, 2);
        let entry = cache.get(&descriptor.key()).unwrap();
        let second = entry.acceleration_structure().unwrap();
        assert_ne!(first, second);
        assert!(!entry.state().needs_rebuild);
        assert_eq!(entry.state().last_rebuild_frame, Some(2));

        // The old structure may still be read by an in-flight top-level build.
        assert!(device.is_live(first));
        reclaim.drain_all();
        assert!(!device.is_live(first));
        assert!(device.is_live(second));
    }

    #[test]
    fn failed_first_build_leaves_entry_without_structure() {
        let (device, _reclaim, mut cache) = setup();
        device.fail_next_builds(1);
        let descriptor = BuildDescriptor::new(triangle_geometry(3, 9), false);
        resolve(&mut cache, &descriptor, 0);

        let entry = cache.get(&descriptor.key()).unwrap();
        assert!(entry.acceleration_structure().is_none());
        assert!(entry.state().needs_rebuild);
        assert_eq!(cache.stats().blas_build_failures, 1);
        // Nothing recorded, so the failed allocations were freed immediately.
        assert_eq!(device.live_resource_count(), 0);

        resolve(&mut cache, &descriptor, 1);
        assert!(cache.get(&descriptor.key()).unwrap().acceleration_structure().is_some());
    }

    #[test]
    fn failed_rebuild_keeps_previous_structure() {
        let (device, _reclaim, mut cache) = setup();
        let descriptor = BuildDescriptor::new(triangle_geometry(3, 9), false);
        resolve(&mut cache, &descriptor, 0);
        let before = cache.get(&descriptor.key()).unwrap().acceleration_structure();

        cache.invalidate(ResourceHandle(3), 1);
        device.fail_next_builds(1);
        resolve(&mut cache, &descriptor, 1);

        let entry = cache.get(&descriptor.key()).unwrap();
        assert_eq!(entry.acceleration_structure(), before);
        assert!(entry.state().needs_rebuild);
    }

    #[test]
    fn failed_dynamic_rebuild_keeps_structure_and_descriptor() {
        let (device, _reclaim, mut cache) = setup();
        let a = BuildDescriptor::new(indexed_geometry(1, 2, 0, 36), true);
        let b = BuildDescriptor::new(indexed_geometry(1, 2, 96, 48), true);
        resolve(&mut cache, &a, 0);
        let before = cache.entries()[0].acceleration_structure();

        device.fail_next_builds(1);
        resolve(&mut cache, &b, 1);

        let entry = &cache.entries()[0];
        assert_eq!(entry.acceleration_structure(), before);
        assert!(!entry.state().needs_rebuild);
        assert_eq!(entry.state().stale_since, None);
        assert_eq!(entry.descriptor().geometry.index_offset, 0);
        assert_eq!(entry.state().last_rebuild_frame, Some(0));

        resolve(&mut cache, &b, 2);
        assert_eq!(cache.entries()[0].descriptor().geometry.index_offset, 96);
    }

    #[test]
    fn failed_opacity_rebuild_keeps_previous_opacity() {
        let (device, _reclaim, mut cache) = setup();
        let mut descriptor = BuildDescriptor::new(triangle_geometry(5, 9), false);
        resolve(&mut cache, &descriptor, 0);
        let before = cache.entries()[0].acceleration_structure();

        descriptor.geometry.opaque = false;
        device.fail_next_builds(1);
        resolve(&mut cache, &descriptor, 1);

        let entry = &cache.entries()[0];
        assert_eq!(entry.acceleration_structure(), before);
        assert!(entry.descriptor().is_opaque());
        assert!(!entry.state().needs_rebuild);

        resolve(&mut cache, &descriptor, 2);
        assert!(!cache.entries()[0].descriptor().is_opaque());
        assert_eq!(device.build_count(AccelerationStructureLevel::Bottom), 2);
    }

    #[test]
    fn dynamic_geometry_matches_on_buffers_and_rebuilds_each_frame() {
        let (device, _reclaim, mut cache) = setup();
        let a = BuildDescriptor::new(indexed_geometry(1, 2, 0, 36), true);
        let b = BuildDescriptor::new(indexed_geometry(1, 2, 96, 48), true);

        resolve(&mut cache, &a, 0);
        resolve(&mut cache, &b, 0);
        assert_eq!(cache.len(), 1);
        assert_eq!(device.build_count(AccelerationStructureLevel::Bottom), 1);

        resolve(&mut cache, &b, 1);
        assert_eq!(device.build_count(AccelerationStructureLevel::Bottom), 2);
        assert_eq!(cache.entries()[0].descriptor().geometry.index_offset, 96);
    }

    #[test]
    fn opacity_change_triggers_rebuild() {
        let (device, _reclaim, mut cache) = setup();
        let mut descriptor = BuildDescriptor::new(triangle_geometry(5, 9), false);
        resolve(&mut cache, &descriptor, 0);
        descriptor.geometry.opaque = false;
        resolve(&mut cache, &descriptor, 0);
        assert_eq!(device.build_count(AccelerationStructureLevel::Bottom), 2);
        assert!(!cache.entries()[0].descriptor().is_opaque());
    }

    #[test]
    fn attachments_are_captured_and_owned() {
        let (device, reclaim, mut cache) = setup();
        let uv_buffer = device
            .create_resource(&ResourceDesc::scratch("uvs", 1024))
            .unwrap();
        let descriptor = BuildDescriptor::new(triangle_geometry(9, 9), false);
        let attachments = [AttachmentSource::structured(
            AttachmentSlot::Uv,
            uv_buffer,
            0,
            9,
            8,
        )];
        cache.resolve(CMD, &descriptor, &attachments, BuildFlags::empty(), 0);

        let entry = cache.get(&descriptor.key()).unwrap();
        assert_eq!(entry.attachments().len(), 1);
        let binding = &entry.attachments()[0];
        assert_eq!(binding.slot, AttachmentSlot::Uv);
        assert_ne!(binding.descriptor_index, INVALID_DESCRIPTOR);
        let view = binding.view.handle();
        assert_eq!(device.view_resource(view), Some(uv_buffer));

        cache.clear();
        assert!(device.is_view_live(view));
        reclaim.drain_all();
        assert!(!device.is_view_live(view));
    }

    #[test]
    fn failed_attachment_view_leaves_slot_unbound() {
        let (device, _reclaim, mut cache) = setup();
        let uv_buffer = device
            .create_resource(&ResourceDesc::scratch("uvs", 1024))
            .unwrap();
        let descriptor = BuildDescriptor::new(triangle_geometry(9, 9), false);
        let attachments = [AttachmentSource::structured(
            AttachmentSlot::Uv,
            uv_buffer,
            0,
            9,
            8,
        )];

        device.fail_next_view_creates(1);
        let entry = cache.resolve(CMD, &descriptor, &attachments, BuildFlags::empty(), 0);
        assert!(entry.acceleration_structure().is_some());
        assert!(entry.attachments().is_empty());
        assert_eq!(device.live_view_count(), 0);
    }

    #[test]
    fn eviction_swaps_last_into_hole_and_defers_destruction() {
        let (device, reclaim, mut cache) = setup();
        let stale = BuildDescriptor::new(triangle_geometry(1, 9), false);
        let middle = BuildDescriptor::new(triangle_geometry(2, 9), false);
        let last = BuildDescriptor::new(triangle_geometry(3, 9), false);
        resolve(&mut cache, &stale, 0);
        resolve(&mut cache, &middle, 0);
        resolve(&mut cache, &last, 0);
        let stale_blas = cache.get(&stale.key()).unwrap().acceleration_structure().unwrap();

        cache.invalidate(ResourceHandle(1), 10);
        assert_eq!(cache.evict_stale(110, 100), 0);
        assert_eq!(cache.evict_stale(111, 100), 1);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&stale.key()).is_none());
        assert_eq!(cache.entries()[0].key(), last.key());
        assert_eq!(cache.get(&last.key()).unwrap().key(), last.key());
        assert_eq!(cache.get(&middle.key()).unwrap().key(), middle.key());
        assert_eq!(cache.stats().evictions, 1);

        assert!(device.is_live(stale_blas));
        reclaim.drain_all();
        assert!(!device.is_live(stale_blas));
    }

    #[test]
    fn redrawn_entries_are_not_evicted() {
        let (_device, _reclaim, mut cache) = setup();
        let descriptor = BuildDescriptor::new(triangle_geometry(1, 9), false);
        resolve(&mut cache, &descriptor, 0);
        cache.invalidate(ResourceHandle(1), 5);
        resolve(&mut cache, &descriptor, 6);
        assert_eq!(cache.evict_stale(500, 100), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn drawn_entries_with_failing_rebuilds_are_not_evicted() {
        let (device, _reclaim, mut cache) = setup();
        let descriptor = BuildDescriptor::new(triangle_geometry(1, 9), false);
        resolve(&mut cache, &descriptor, 0);
        cache.invalidate(ResourceHandle(1), 1);

        for frame in 1..=200 {
            device.fail_next_builds(1);
            let entry = cache.resolve(CMD, &descriptor, &[], BuildFlags::PREFER_FAST_TRACE, frame);
            entry.state.last_visible_frame = frame;
        }
        assert!(cache.entries()[0].state().needs_rebuild);
        assert_eq!(cache.evict_stale(200, 100), 0);

        // Once the draws stop, the entry ages out.
        assert_eq!(cache.evict_stale(300, 100), 0);
        assert_eq!(cache.evict_stale(301, 100), 1);
    }

    #[test]
    fn reused_handle_after_invalidation_gets_fresh_structure() {
        let (device, _reclaim, mut cache) = setup();
        let descriptor = BuildDescriptor::new(triangle_geometry(4, 30), false);
        resolve(&mut cache, &descriptor, 0);
        // Buffer 4 destroyed and recreated with different contents under the same handle.
        cache.invalidate(ResourceHandle(4), 3);
        resolve(&mut cache, &descriptor, 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(device.build_count(AccelerationStructureLevel::Bottom), 2);
    }
}
