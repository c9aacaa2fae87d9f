//! Entry point the hook layer drives.

use std::sync::Arc;

use glam::Mat4;
use tracehook_gpu::{CommandList, ReclaimQueue, ResourceHandle, RtDevice, ViewHandle};
use tracing::{debug, info, warn};

use crate::accumulator::{InstanceAccumulator, InstanceRef};
use crate::cache::{CacheStats, GeometryCache};
use crate::config::RtConfig;
use crate::geometry::ObservedDraw;
use crate::packer::MetadataPacker;
use crate::scene::{FrameScene, SceneAssembler, SceneStats};

/// Ray-tracing scene kept in sync with an observed stream of draw calls.
///
/// Call order per frame: [`on_frame_begin`](Self::on_frame_begin), any number of
/// [`on_draw_observed`](Self::on_draw_observed) and
/// [`on_buffer_updated`](Self::on_buffer_updated), one
/// [`build_scene`](Self::build_scene), then [`on_frame_end`](Self::on_frame_end).
///
/// Device failures never escape: they are logged and the affected geometry or
/// frame falls back to its previous state.
pub struct RayTracingScene {
    config: RtConfig,
    reclaim: Arc<ReclaimQueue>,
    cache: GeometryCache,
    accumulator: InstanceAccumulator,
    assembler: SceneAssembler,
    packer: MetadataPacker,
    frame: u64,
    last_stats: SceneStats,
    shut_down: bool,
}

impl RayTracingScene {
    /// Out-of-range config fields are clamped as the `with_*` builders would.
    pub fn new(device: Arc<dyn RtDevice>, config: RtConfig) -> Self {
        let config = config.normalized();
        let reclaim = Arc::new(ReclaimQueue::new(config.reclaim_frames));
        info!(
            reclaim_frames = reclaim.frames(),
            eviction_threshold = config.eviction_threshold,
            "ray-tracing scene created"
        );
        Self {
            cache: GeometryCache::new(Arc::clone(&device), Arc::clone(&reclaim)),
            accumulator: InstanceAccumulator::new(),
            assembler: SceneAssembler::new(Arc::clone(&device), Arc::clone(&reclaim)),
            packer: MetadataPacker::new(device, Arc::clone(&reclaim)),
            reclaim,
            config,
            frame: 0,
            last_stats: SceneStats::default(),
            shut_down: false,
        }
    }

    pub fn on_frame_begin(&mut self) {
        self.accumulator.begin_frame();
    }

    /// Record one qualifying draw. Returns where its instance landed, or `None`
    /// if the draw was degenerate.
    pub fn on_draw_observed(
        &mut self,
        cmd: CommandList,
        draw: &ObservedDraw,
    ) -> Option<InstanceRef> {
        self.accumulator
            .record(&mut self.cache, cmd, draw, &self.config, self.frame)
    }

    /// A vertex or index buffer's contents changed.
    pub fn on_buffer_updated(&mut self, buffer: ResourceHandle) {
        self.cache.invalidate(buffer, self.frame);
    }

    /// Assemble the frame, record the top-level build and upload the instance tables.
    ///
    /// Tables are only replaced when the top-level structure was, so the two
    /// always describe the same instance list.
    pub fn build_scene(
        &mut self,
        cmd: CommandList,
        base_view_projection: Option<Mat4>,
    ) -> SceneStats {
        let stats = self.assembler.assemble(
            cmd,
            &mut self.cache,
            &self.config,
            base_view_projection,
            self.frame,
        );
        if stats.tlas_built || stats.instances == 0 {
            if let Err(err) = self.packer.pack(self.assembler.scene()) {
                warn!(%err, "instance table upload failed");
            }
        }
        self.last_stats = stats;
        stats
    }

    /// Close the frame: reclaim the oldest bucket and run periodic eviction.
    pub fn on_frame_end(&mut self) {
        self.reclaim.advance();
        if let Some(interval) = self.config.eviction_interval {
            if self.frame % interval == 0 && self.frame > 0 {
                self.evict_stale();
            }
        }
        self.frame += 1;
    }

    /// Evict entries stale for longer than the configured threshold.
    pub fn evict_stale(&mut self) -> usize {
        self.cache
            .evict_stale(self.frame, self.config.eviction_threshold)
    }

    pub fn top_level_acceleration_structure(&self) -> Option<ResourceHandle> {
        self.assembler.top_level()
    }

    pub fn attachment_table(&self) -> Option<ViewHandle> {
        self.packer.attachment_table().map(|t| t.view())
    }

    pub fn shading_data_table(&self) -> Option<ViewHandle> {
        self.packer.shading_data_table().map(|t| t.view())
    }

    pub fn frame_scene(&self) -> &FrameScene {
        self.assembler.scene()
    }

    /// Shared with resource-destruction hooks on other threads.
    pub fn reclaim_queue(&self) -> &Arc<ReclaimQueue> {
        &self.reclaim
    }

    pub fn cache(&self) -> &GeometryCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn last_stats(&self) -> SceneStats {
        self.last_stats
    }

    pub fn config(&self) -> &RtConfig {
        &self.config
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Release every owned object. Call once the GPU is idle.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.packer.clear();
        self.assembler.clear();
        self.cache.clear();
        let destroyed = self.reclaim.drain_all();
        self.shut_down = true;
        debug!(destroyed, frame = self.frame, "ray-tracing scene shut down");
    }
}

impl Drop for RayTracingScene {
    fn drop(&mut self) {
        self.shutdown();
    }
}
