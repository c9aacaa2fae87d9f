//! Per-instance tables read by hit shaders.
//!
//! Both tables are indexed by the instance id written into the top-level
//! structure. They are rebuilt from scratch every frame; the previous frame's
//! buffers go to the reclamation queue because shading work from that frame may
//! still be reading them.

use std::mem::size_of;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use tracehook_core::constants::INVALID_DESCRIPTOR;
use tracehook_core::{Material, Transform3x4};
use tracehook_gpu::{
    upload, Format, MemoryLocation, OwnedResource, OwnedView, ReclaimQueue, ResourceDesc,
    ResourceHandle, ResourceUsage, Result, RtDevice, ViewDesc, ViewHandle,
};
use tracing::debug;

use crate::cache::AttachmentBinding;
use crate::geometry::AttachmentSlot;
use crate::scene::FrameScene;

/// One logical binding as seen by the shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct AttachmentEntry {
    /// Bindless descriptor index, or [`INVALID_DESCRIPTOR`] when unbound.
    pub descriptor_index: u32,
    pub offset: u32,
    pub stride: u32,
    pub format: u32,
}

impl AttachmentEntry {
    pub const UNBOUND: Self = Self {
        descriptor_index: INVALID_DESCRIPTOR,
        offset: 0,
        stride: 0,
        format: Format::Unknown.as_raw(),
    };

    #[inline]
    pub const fn is_bound(&self) -> bool {
        self.descriptor_index != INVALID_DESCRIPTOR
    }
}

impl Default for AttachmentEntry {
    fn default() -> Self {
        Self::UNBOUND
    }
}

/// Attachment table row: one entry per [`AttachmentSlot`].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct AttachmentRow {
    pub slots: [AttachmentEntry; AttachmentSlot::COUNT],
}

impl AttachmentRow {
    pub const EMPTY: Self = Self {
        slots: [AttachmentEntry::UNBOUND; AttachmentSlot::COUNT],
    };

    /// Row for a geometry entry's bindings. Later bindings for a slot win.
    pub fn from_bindings(bindings: &[AttachmentBinding]) -> Self {
        let mut row = Self::EMPTY;
        for binding in bindings {
            row.slots[binding.slot.index()] = AttachmentEntry {
                descriptor_index: binding.descriptor_index,
                offset: binding.offset,
                stride: binding.stride,
                format: binding.format.as_raw(),
            };
        }
        row
    }

    #[inline]
    pub fn slot(&self, slot: AttachmentSlot) -> &AttachmentEntry {
        &self.slots[slot.index()]
    }
}

impl Default for AttachmentRow {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Shading-data table row.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ShadingData {
    pub diffuse: [f32; 4],
    pub specular: [f32; 4],
    /// Previous frame's object-to-world transform, for motion vectors.
    pub prev_world: Transform3x4,
    pub roughness: f32,
    /// Bit 0: traced as opaque.
    pub flags: u32,
    /// [`tracehook_core::MaterialKind`] discriminant.
    pub kind: u32,
    pub _pad: u32,
}

impl ShadingData {
    pub const FLAG_OPAQUE: u32 = 1 << 0;

    pub fn new(material: &Material, prev_world: Mat4, opaque: bool) -> Self {
        Self {
            diffuse: material.albedo.to_array(),
            specular: material.specular.to_array(),
            prev_world: Transform3x4::from_mat4(prev_world),
            roughness: material.roughness,
            flags: if opaque { Self::FLAG_OPAQUE } else { 0 },
            kind: material.kind.as_raw(),
            _pad: 0,
        }
    }

    #[inline]
    pub const fn is_opaque(&self) -> bool {
        self.flags & Self::FLAG_OPAQUE != 0
    }
}

/// An uploaded structured buffer with its shader-resource view.
#[derive(Debug)]
pub struct GpuTable {
    buffer: OwnedResource,
    view: OwnedView,
    descriptor_index: Option<u32>,
    count: u32,
}

impl GpuTable {
    pub fn buffer(&self) -> ResourceHandle {
        self.buffer.handle()
    }

    pub fn view(&self) -> ViewHandle {
        self.view.handle()
    }

    pub fn descriptor_index(&self) -> Option<u32> {
        self.descriptor_index
    }

    /// Number of rows.
    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn retire(self, reclaim: &ReclaimQueue) {
        self.view.retire(reclaim);
        self.buffer.retire(reclaim);
    }
}

/// Uploads the attachment and shading-data tables for each frame.
pub struct MetadataPacker {
    device: Arc<dyn RtDevice>,
    reclaim: Arc<ReclaimQueue>,
    attachments: Option<GpuTable>,
    shading: Option<GpuTable>,
}

impl MetadataPacker {
    pub fn new(device: Arc<dyn RtDevice>, reclaim: Arc<ReclaimQueue>) -> Self {
        Self {
            device,
            reclaim,
            attachments: None,
            shading: None,
        }
    }

    pub fn attachment_table(&self) -> Option<&GpuTable> {
        self.attachments.as_ref()
    }

    pub fn shading_data_table(&self) -> Option<&GpuTable> {
        self.shading.as_ref()
    }

    /// Replace both tables with ones built from `scene`.
    ///
    /// An empty scene leaves no tables. On error the tables created so far are
    /// destroyed and both slots are left empty.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn pack(&mut self, scene: &FrameScene) -> Result<()> {
        self.clear();
        let attachments = self.create_table("attachment_table", &scene.attachments)?;
        let shading = self.create_table("shading_data_table", &scene.shading)?;
        self.attachments = attachments;
        self.shading = shading;
        debug!(rows = scene.len(), "packed instance tables");
        Ok(())
    }

    /// Retire both tables.
    pub fn clear(&mut self) {
        if let Some(table) = self.attachments.take() {
            table.retire(&self.reclaim);
        }
        if let Some(table) = self.shading.take() {
            table.retire(&self.reclaim);
        }
    }

    fn create_table<T: Pod>(&self, name: &str, rows: &[T]) -> Result<Option<GpuTable>> {
        if rows.is_empty() {
            return Ok(None);
        }
        let device = &self.device;
        let stride = size_of::<T>() as u32;
        let count = rows.len() as u32;

        let buffer = OwnedResource::new(
            Arc::clone(device),
            device.create_resource(&ResourceDesc::buffer(
                name,
                (rows.len() * size_of::<T>()) as u64,
                ResourceUsage::SHADER_RESOURCE,
                MemoryLocation::CpuToGpu,
            ))?,
        );
        upload(device.as_ref(), buffer.handle(), rows)?;

        let view = OwnedView::new(
            Arc::clone(device),
            device.create_view(
                buffer.handle(),
                &ViewDesc::StructuredBuffer {
                    first_element: 0,
                    element_count: count,
                    stride,
                },
            )?,
        );

        Ok(Some(GpuTable {
            descriptor_index: device.descriptor_index(view.handle()),
            buffer,
            view,
            count,
        }))
    }
}

impl Drop for MetadataPacker {
    fn drop(&mut self) {
        self.clear();
    }
}
