//! Maps repeated draws of the same mesh onto stable per-instance slots.

use std::hash::BuildHasher;

use hashbrown::{DefaultHashBuilder, HashMap};
use tracehook_gpu::CommandList;
use tracing::trace;

use crate::cache::{GeometryCache, InstanceRecord};
use crate::config::RtConfig;
use crate::geometry::{GeometryKey, ObservedDraw};

/// Location of an instance record inside the geometry cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    pub key: GeometryKey,
    /// Index into the entry's instance list.
    pub index: usize,
}

/// Per-frame occurrence counters.
///
/// The Nth draw of a mesh with a given vertex-stream fingerprint updates the
/// Nth record carrying that fingerprint, so a duplicated object keeps its own
/// motion history across frames.
#[derive(Default)]
pub struct InstanceAccumulator {
    occurrences: HashMap<(GeometryKey, u64), usize>,
    hasher: DefaultHashBuilder,
}

impl InstanceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the occurrence counters. Instance records persist.
    pub fn begin_frame(&mut self) {
        self.occurrences.clear();
    }

    /// Number of distinct occurrence keys seen this frame.
    pub fn occurrence_keys(&self) -> usize {
        self.occurrences.len()
    }

    /// Record one draw. Returns `None` for degenerate draws.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn record(
        &mut self,
        cache: &mut GeometryCache,
        cmd: CommandList,
        draw: &ObservedDraw,
        config: &RtConfig,
        frame: u64,
    ) -> Option<InstanceRef> {
        let descriptor = draw.descriptor();
        if descriptor.is_degenerate(config.min_primitive_vertices) {
            trace!(?descriptor, "skipping degenerate draw");
            return None;
        }

        let key = descriptor.key();
        let stream = self.hasher.hash_one(&draw.vertex_streams);
        let counter = self.occurrences.entry((key, stream)).or_insert(0);
        let ordinal = *counter;
        *counter += 1;

        let material = config.materials.resolve(draw.material, draw.material_key);
        let entry = cache.resolve(
            cmd,
            &descriptor,
            &draw.attachments,
            config.blas_flags(draw.is_static),
            frame,
        );

        let slot = entry
            .instances
            .iter()
            .enumerate()
            .filter(|(_, record)| record.stream == stream)
            .nth(ordinal)
            .map(|(index, _)| index);

        let index = match slot {
            Some(index) => {
                entry.instances[index].update(draw.transform, material, frame);
                index
            }
            None => {
                entry
                    .instances
                    .push(InstanceRecord::new(draw.transform, material, stream, frame));
                entry.instances.len() - 1
            }
        };
        entry.state.last_visible_frame = frame;

        trace!(?key, ordinal, index, "recorded instance");
        Some(InstanceRef { key, index })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Mat4;
    use tracehook_core::{MaterialKind, MaterialOverride, MaterialTable};
    use tracehook_gpu::{AccelerationStructureLevel, ReclaimQueue, ResourceHandle};
    use tracehook_test::{indexed_geometry, triangle_geometry, RecordingDevice};

    use super::*;

    const CMD: CommandList = CommandList(1);

    struct Fixture {
        device: Arc<RecordingDevice>,
        cache: GeometryCache,
        accumulator: InstanceAccumulator,
        config: RtConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let device = RecordingDevice::shared();
            let reclaim = Arc::new(ReclaimQueue::new(4));
            Self {
                cache: GeometryCache::new(device.clone(), reclaim),
                device,
                accumulator: InstanceAccumulator::new(),
                config: RtConfig::default(),
            }
        }

        fn draw(&mut self, draw: &ObservedDraw, frame: u64) -> Option<InstanceRef> {
            self.accumulator
                .record(&mut self.cache, CMD, draw, &self.config, frame)
        }

        fn records(&self, key: &GeometryKey) -> Vec<(Mat4, Mat4)> {
            self.cache
                .get(key)
                .unwrap()
                .instances()
                .iter()
                .map(|r| (r.transform, r.prev_transform))
                .collect()
        }
    }

    fn translation(x: f32) -> Mat4 {
        Mat4::from_translation(glam::Vec3::new(x, 0.0, 0.0))
    }

    #[test]
    fn repeated_draws_update_instances_in_order() {
        let mut fx = Fixture::new();
        let geometry = indexed_geometry(1, 2, 0, 36);
        let key = GeometryKey::new(&geometry, false);
        let (t1, t2) = (translation(1.0), translation(2.0));
        let (t1b, t2b) = (translation(1.5), translation(2.5));

        fx.accumulator.begin_frame();
        fx.draw(&ObservedDraw::new(geometry, t1), 1);
        fx.draw(&ObservedDraw::new(geometry, t2), 1);
        assert_eq!(fx.records(&key), vec![(t1, t1), (t2, t2)]);

        fx.accumulator.begin_frame();
        let first = fx.draw(&ObservedDraw::new(geometry, t1b), 2).unwrap();
        let second = fx.draw(&ObservedDraw::new(geometry, t2b), 2).unwrap();
        assert_eq!((first.index, second.index), (0, 1));
        assert_eq!(fx.records(&key), vec![(t1b, t1), (t2b, t2)]);

        assert_eq!(fx.cache.len(), 1);
        assert_eq!(fx.device.build_count(AccelerationStructureLevel::Bottom), 1);
    }

    #[test]
    fn k_draws_produce_k_records() {
        let mut fx = Fixture::new();
        let geometry = triangle_geometry(4, 30);
        fx.accumulator.begin_frame();
        for i in 0..5 {
            fx.draw(&ObservedDraw::new(geometry, translation(i as f32)), 0);
        }
        let key = GeometryKey::new(&geometry, false);
        assert_eq!(fx.cache.get(&key).unwrap().instances().len(), 5);
        assert_eq!(fx.accumulator.occurrence_keys(), 1);

        fx.accumulator.begin_frame();
        for i in 0..5 {
            fx.draw(&ObservedDraw::new(geometry, translation(i as f32)), 1);
        }
        assert_eq!(fx.cache.get(&key).unwrap().instances().len(), 5);
    }

    #[test]
    fn vertex_streams_separate_occurrences() {
        let mut fx = Fixture::new();
        let geometry = triangle_geometry(4, 30);
        let key = GeometryKey::new(&geometry, false);
        let plain = ObservedDraw::new(geometry, translation(1.0));
        let instanced = ObservedDraw::new(geometry, translation(9.0))
            .with_vertex_streams(vec![ResourceHandle(4), ResourceHandle(11)]);

        fx.accumulator.begin_frame();
        fx.draw(&plain, 0);
        fx.draw(&instanced, 0);

        // Next frame the instanced draw comes first; it must still find its own record.
        fx.accumulator.begin_frame();
        let moved = ObservedDraw {
            transform: translation(10.0),
            ..instanced.clone()
        };
        let r = fx.draw(&moved, 1).unwrap();
        assert_eq!(r.index, 1);
        let record = fx.cache.get(&key).unwrap().instances()[1];
        assert_eq!(record.prev_transform, translation(9.0));
        assert_eq!(record.transform, translation(10.0));
    }

    #[test]
    fn degenerate_draws_are_ignored() {
        let mut fx = Fixture::new();
        assert!(fx
            .draw(&ObservedDraw::new(triangle_geometry(4, 2), Mat4::IDENTITY), 0)
            .is_none());
        assert!(fx.cache.is_empty());
    }

    #[test]
    fn draws_mark_entry_visible() {
        let mut fx = Fixture::new();
        let geometry = triangle_geometry(4, 30);
        fx.draw(&ObservedDraw::new(geometry, Mat4::IDENTITY), 7);
        let key = GeometryKey::new(&geometry, false);
        assert_eq!(fx.cache.get(&key).unwrap().state().last_visible_frame, 7);
    }

    #[test]
    fn material_overrides_apply_by_key() {
        let mut fx = Fixture::new();
        fx.config = RtConfig::default().with_materials(
            MaterialTable::new().with(0xfeed, MaterialOverride::new(MaterialKind::Glass)),
        );
        let geometry = triangle_geometry(4, 30);
        let draw = ObservedDraw::new(geometry, Mat4::IDENTITY)
            .with_material(tracehook_core::Material::default(), Some(0xfeed));
        fx.draw(&draw, 0);
        let key = GeometryKey::new(&geometry, false);
        assert_eq!(
            fx.cache.get(&key).unwrap().instances()[0].material.kind,
            MaterialKind::Glass
        );
    }
}
