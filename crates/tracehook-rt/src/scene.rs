//! Per-frame flattening of cached geometry into one top-level structure.

use std::mem::size_of;
use std::sync::Arc;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use tracehook_core::constants::MAX_INSTANCE_ID;
use tracehook_core::math::{invert_view_projection, motion_delta};
use tracehook_core::Transform3x4;
use tracehook_gpu::{
    upload, AccelerationStructureBuild, AccelerationStructureLevel, BuildInputs, CommandList,
    MemoryLocation, OwnedResource, ReclaimQueue, ResourceDesc, ResourceHandle, ResourceUsage,
    Result, RtDevice,
};
use tracing::{debug, warn};

use crate::cache::GeometryCache;
use crate::config::RtConfig;
use crate::packer::{AttachmentRow, ShadingData};

bitflags! {
    /// Per-instance flags stored in the top 8 bits of the hit-group word.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct InstanceFlags: u8 {
        const TRIANGLE_CULL_DISABLE = 1 << 0;
        const TRIANGLE_FRONT_COUNTERCLOCKWISE = 1 << 1;
        const FORCE_OPAQUE = 1 << 2;
        const FORCE_NON_OPAQUE = 1 << 3;
    }
}

/// Native instance descriptor consumed by the top-level build.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceDesc {
    pub transform: Transform3x4,
    /// Instance id (24 bits) and visibility mask (8 bits).
    pub instance_id_and_mask: u32,
    /// Hit-group offset (24 bits) and [`InstanceFlags`] (8 bits).
    pub sbt_offset_and_flags: u32,
    /// GPU address of the bottom-level structure.
    pub acceleration_structure: u64,
}

impl InstanceDesc {
    pub fn new(
        transform: Mat4,
        instance_id: u32,
        mask: u8,
        flags: InstanceFlags,
        acceleration_structure: u64,
    ) -> Self {
        Self {
            transform: Transform3x4::from_mat4(transform),
            instance_id_and_mask: (instance_id & MAX_INSTANCE_ID) | (u32::from(mask) << 24),
            sbt_offset_and_flags: u32::from(flags.bits()) << 24,
            acceleration_structure,
        }
    }

    #[inline]
    pub const fn instance_id(&self) -> u32 {
        self.instance_id_and_mask & MAX_INSTANCE_ID
    }

    #[inline]
    pub const fn mask(&self) -> u8 {
        (self.instance_id_and_mask >> 24) as u8
    }

    #[inline]
    pub const fn flags(&self) -> InstanceFlags {
        InstanceFlags::from_bits_retain((self.sbt_offset_and_flags >> 24) as u8)
    }
}

/// Flattened arrays for one frame, all indexed by instance id.
#[derive(Clone, Debug, Default)]
pub struct FrameScene {
    pub instances: Vec<InstanceDesc>,
    pub attachments: Vec<AttachmentRow>,
    pub shading: Vec<ShadingData>,
    /// Previous-to-current world transform per instance.
    pub motion: Vec<Mat4>,
}

impl FrameScene {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn clear(&mut self) {
        self.instances.clear();
        self.attachments.clear();
        self.shading.clear();
        self.motion.clear();
    }
}

/// What went into the frame's top-level structure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SceneStats {
    pub instances: usize,
    /// Entries waiting for a rebuild.
    pub skipped_stale: usize,
    /// Dynamic entries not drawn this frame.
    pub skipped_dynamic: usize,
    /// Entries whose first build failed.
    pub skipped_unbuilt: usize,
    /// A new top-level structure was recorded this frame.
    pub tlas_built: bool,
}

/// Builds the frame's instance list and top-level structure.
pub struct SceneAssembler {
    device: Arc<dyn RtDevice>,
    reclaim: Arc<ReclaimQueue>,
    /// Arrays the current top-level structure was built from.
    scene: FrameScene,
    /// This frame's arrays until their build succeeds.
    staging: FrameScene,
    tlas: Option<OwnedResource>,
}

impl SceneAssembler {
    pub fn new(device: Arc<dyn RtDevice>, reclaim: Arc<ReclaimQueue>) -> Self {
        Self {
            device,
            reclaim,
            scene: FrameScene::default(),
            staging: FrameScene::default(),
            tlas: None,
        }
    }

    /// The arrays behind [`Self::top_level`].
    ///
    /// After a failed build this is still the previous frame's scene.
    pub fn scene(&self) -> &FrameScene {
        &self.scene
    }

    pub fn top_level(&self) -> Option<ResourceHandle> {
        self.tlas.as_ref().map(OwnedResource::handle)
    }

    /// Flatten `cache` and record the top-level build into `cmd`.
    ///
    /// `base_view_projection` is the camera the hook layer captured; draw
    /// transforms are divided by it to recover world space. A failed build keeps
    /// the previous frame's structure and arrays.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn assemble(
        &mut self,
        cmd: CommandList,
        cache: &mut GeometryCache,
        config: &RtConfig,
        base_view_projection: Option<Mat4>,
        frame: u64,
    ) -> SceneStats {
        let mut stats = self.flatten(cache, config, base_view_projection, frame);
        match self.build_top_level(cmd, config) {
            Ok(built) => {
                stats.tlas_built = built;
                std::mem::swap(&mut self.scene, &mut self.staging);
            }
            Err(err) => warn!(%err, "top-level build failed, keeping previous structure"),
        }
        stats
    }

    /// Retire the top-level structure.
    pub fn clear(&mut self) {
        if let Some(tlas) = self.tlas.take() {
            tlas.retire(&self.reclaim);
        }
        self.scene.clear();
        self.staging.clear();
    }

    fn flatten(
        &mut self,
        cache: &mut GeometryCache,
        config: &RtConfig,
        base_view_projection: Option<Mat4>,
        frame: u64,
    ) -> SceneStats {
        self.staging.clear();
        let mut stats = SceneStats::default();

        let inverse_base = base_view_projection.and_then(|vp| match invert_view_projection(vp) {
            Ok(inverse) => Some(inverse),
            Err(err) => {
                warn!(%err, "ignoring camera base");
                None
            }
        });

        'entries: for entry in cache.entries_mut() {
            let state = entry.state;
            let Some(blas) = entry.acceleration_structure() else {
                stats.skipped_unbuilt += 1;
                continue;
            };
            if state.needs_rebuild {
                stats.skipped_stale += 1;
                continue;
            }
            if state.is_dynamic && state.last_visible_frame != frame {
                stats.skipped_dynamic += 1;
                continue;
            }

            // Occurrences not repeated this frame are gone.
            if state.last_visible_frame == frame {
                entry.instances.retain(|record| record.frame == frame);
            }

            let address = self.device.acceleration_structure_address(blas);
            let row = AttachmentRow::from_bindings(entry.attachments());
            let geometry_opaque = entry.descriptor().is_opaque();

            for record in &mut entry.instances {
                let id = self.staging.instances.len() as u32;
                if id > MAX_INSTANCE_ID {
                    warn!(limit = MAX_INSTANCE_ID, "instance id space exhausted");
                    break 'entries;
                }

                record.resolve(inverse_base);
                let prev = if record.frame == frame {
                    record.prev_transform
                } else {
                    record.transform
                };
                let opaque = geometry_opaque && !record.material.kind.forces_non_opaque();
                let mut flags = if opaque {
                    InstanceFlags::FORCE_OPAQUE
                } else {
                    InstanceFlags::FORCE_NON_OPAQUE
                };
                if config.cull_disable {
                    flags |= InstanceFlags::TRIANGLE_CULL_DISABLE;
                }

                self.staging.instances.push(InstanceDesc::new(
                    record.transform,
                    id,
                    config.mask(opaque),
                    flags,
                    address,
                ));
                self.staging.attachments.push(row);
                self.staging
                    .shading
                    .push(ShadingData::new(&record.material, prev, opaque));
                self.staging.motion.push(motion_delta(prev, record.transform));
            }
        }

        stats.instances = self.staging.len();
        stats
    }

    /// Returns whether a new structure was recorded.
    fn build_top_level(&mut self, cmd: CommandList, config: &RtConfig) -> Result<bool> {
        if self.staging.is_empty() {
            if let Some(tlas) = self.tlas.take() {
                tlas.retire(&self.reclaim);
            }
            return Ok(false);
        }

        let device = &self.device;
        let instance_count = self.staging.len() as u32;

        let instances = OwnedResource::new(
            Arc::clone(device),
            device.create_resource(&ResourceDesc::buffer(
                "tlas_instances",
                (self.staging.len() * size_of::<InstanceDesc>()) as u64,
                ResourceUsage::ACCELERATION_STRUCTURE_BUILD_INPUT,
                MemoryLocation::CpuToGpu,
            ))?,
        );
        upload(device.as_ref(), instances.handle(), &self.staging.instances)?;

        let inputs = BuildInputs::Top { instance_count };
        let sizes = device.acceleration_structure_sizes(&inputs)?;
        let tlas = OwnedResource::new(
            Arc::clone(device),
            device.create_resource(&ResourceDesc::acceleration_structure(
                "tlas",
                AccelerationStructureLevel::Top,
                sizes.result,
            ))?,
        );
        let scratch = OwnedResource::new(
            Arc::clone(device),
            device.create_resource(&ResourceDesc::scratch("tlas_scratch", sizes.scratch))?,
        );

        // Bottom-level builds recorded earlier this frame must land first.
        device.acceleration_structure_barrier(cmd);
        device.build_acceleration_structure(
            cmd,
            &AccelerationStructureBuild {
                inputs: &inputs,
                instances: instances.handle(),
                dst: tlas.handle(),
                scratch: scratch.handle(),
                flags: config.tlas_flags(),
            },
        )?;
        device.acceleration_structure_barrier(cmd);

        scratch.retire(&self.reclaim);
        instances.retire(&self.reclaim);
        if let Some(previous) = self.tlas.replace(tlas) {
            previous.retire(&self.reclaim);
        }

        debug!(instance_count, "top-level build recorded");
        Ok(true)
    }
}

impl Drop for SceneAssembler {
    fn drop(&mut self) {
        self.clear();
    }
}
