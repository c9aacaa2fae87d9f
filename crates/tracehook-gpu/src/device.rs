//! Device abstraction all GPU calls are routed through.
//!
//! The hook layer provides one implementation per intercepted graphics API;
//! nothing above this trait names a native API type.

use bitflags::bitflags;

use crate::error::{GpuError, Result};

/// Opaque handle to a buffer or acceleration-structure resource. `0` is null.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub u64);

impl ResourceHandle {
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Opaque handle to a shader-resource view. `0` is null.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewHandle(pub u64);

impl ViewHandle {
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Opaque handle to a command list in recording state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CommandList(pub u64);

/// Where a resource's memory lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Device-local, not CPU visible.
    GpuOnly,
    /// CPU-writable upload memory that the GPU reads.
    CpuToGpu,
}

bitflags! {
    /// How a resource will be used.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ResourceUsage: u32 {
        const SHADER_RESOURCE = 1 << 0;
        const ACCELERATION_STRUCTURE_STORAGE = 1 << 1;
        const ACCELERATION_STRUCTURE_BUILD_INPUT = 1 << 2;
        const SCRATCH = 1 << 3;
    }
}

bitflags! {
    /// Acceleration-structure build preferences.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BuildFlags: u32 {
        const PREFER_FAST_TRACE = 1 << 0;
        const PREFER_FAST_BUILD = 1 << 1;
        const ALLOW_UPDATE = 1 << 2;
    }
}

/// Bottom or top level acceleration structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccelerationStructureLevel {
    Bottom,
    Top,
}

/// Kind of resource to create.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    AccelerationStructure(AccelerationStructureLevel),
}

/// Resource creation parameters.
#[derive(Clone, Copy, Debug)]
pub struct ResourceDesc<'a> {
    pub name: &'a str,
    pub size: u64,
    pub kind: ResourceKind,
    pub usage: ResourceUsage,
    pub memory: MemoryLocation,
}

impl<'a> ResourceDesc<'a> {
    /// Plain buffer.
    pub const fn buffer(
        name: &'a str,
        size: u64,
        usage: ResourceUsage,
        memory: MemoryLocation,
    ) -> Self {
        Self {
            name,
            size,
            kind: ResourceKind::Buffer,
            usage,
            memory,
        }
    }

    /// Device-local storage for an acceleration structure.
    pub const fn acceleration_structure(
        name: &'a str,
        level: AccelerationStructureLevel,
        size: u64,
    ) -> Self {
        Self {
            name,
            size,
            kind: ResourceKind::AccelerationStructure(level),
            usage: ResourceUsage::ACCELERATION_STRUCTURE_STORAGE,
            memory: MemoryLocation::GpuOnly,
        }
    }

    /// Device-local scratch memory for a build.
    pub const fn scratch(name: &'a str, size: u64) -> Self {
        Self::buffer(name, size, ResourceUsage::SCRATCH, MemoryLocation::GpuOnly)
    }
}

/// Element formats for typed views and vertex/index streams.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Format {
    #[default]
    Unknown = 0,
    R16Uint = 1,
    R32Uint = 2,
    R16G16Float = 3,
    R32G32Float = 4,
    R32G32B32Float = 5,
    R32G32B32A32Float = 6,
    R8G8B8A8Unorm = 7,
}

impl Format {
    /// Value written into GPU attachment tables.
    #[inline]
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    /// Size of one element in bytes; `0` for [`Format::Unknown`].
    pub const fn byte_size(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::R16Uint => 2,
            Self::R32Uint | Self::R16G16Float | Self::R8G8B8A8Unorm => 4,
            Self::R32G32Float => 8,
            Self::R32G32B32Float => 12,
            Self::R32G32B32A32Float => 16,
        }
    }
}

/// Shader-resource view parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewDesc {
    StructuredBuffer {
        first_element: u64,
        element_count: u32,
        stride: u32,
    },
    TypedBuffer {
        offset: u64,
        element_count: u32,
        format: Format,
    },
    AccelerationStructure,
}

/// Triangle input for a bottom-level build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriangleGeometry {
    pub vertex_buffer: ResourceHandle,
    pub vertex_offset: u64,
    pub vertex_count: u32,
    pub vertex_stride: u32,
    pub vertex_format: Format,
    /// Null when the draw is not indexed.
    pub index_buffer: ResourceHandle,
    pub index_offset: u64,
    pub index_count: u32,
    pub index_format: Format,
    pub opaque: bool,
}

impl TriangleGeometry {
    /// Returns true if the geometry uses an index buffer.
    #[inline]
    pub const fn is_indexed(&self) -> bool {
        !self.index_buffer.is_null()
    }

    /// Number of triangles the build will consume.
    pub const fn primitive_count(&self) -> u32 {
        if self.is_indexed() {
            self.index_count / 3
        } else {
            self.vertex_count / 3
        }
    }
}

/// What an acceleration-structure build consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildInputs {
    Bottom(TriangleGeometry),
    Top { instance_count: u32 },
}

impl BuildInputs {
    pub const fn level(&self) -> AccelerationStructureLevel {
        match self {
            Self::Bottom(_) => AccelerationStructureLevel::Bottom,
            Self::Top { .. } => AccelerationStructureLevel::Top,
        }
    }
}

/// Memory requirements reported by the device for a build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildSizes {
    pub result: u64,
    pub scratch: u64,
}

/// A build command to record.
#[derive(Clone, Copy, Debug)]
pub struct AccelerationStructureBuild<'a> {
    pub inputs: &'a BuildInputs,
    /// Instance descriptor buffer; null for bottom-level builds.
    pub instances: ResourceHandle,
    pub dst: ResourceHandle,
    pub scratch: ResourceHandle,
    pub flags: BuildFlags,
}

/// Uniform device interface exposed by the hook layer.
///
/// Every method may be called from whichever thread the driver invokes the
/// hook on, so implementations must be `Send + Sync`.
pub trait RtDevice: Send + Sync {
    fn create_resource(&self, desc: &ResourceDesc<'_>) -> Result<ResourceHandle>;

    fn destroy_resource(&self, resource: ResourceHandle);

    fn create_view(&self, resource: ResourceHandle, desc: &ViewDesc) -> Result<ViewHandle>;

    fn destroy_view(&self, view: ViewHandle);

    /// Map `resource`, hand its bytes to `write`, then unmap.
    ///
    /// Only valid for [`MemoryLocation::CpuToGpu`] resources.
    fn map_buffer(&self, resource: ResourceHandle, write: &mut dyn FnMut(&mut [u8]))
        -> Result<()>;

    fn acceleration_structure_sizes(&self, inputs: &BuildInputs) -> Result<BuildSizes>;

    /// Record a build into `cmd`. Does not wait for completion.
    fn build_acceleration_structure(
        &self,
        cmd: CommandList,
        build: &AccelerationStructureBuild<'_>,
    ) -> Result<()>;

    /// Order earlier acceleration-structure writes before later builds and reads.
    fn acceleration_structure_barrier(&self, cmd: CommandList);

    /// GPU address of an acceleration structure, as referenced by instance descriptors.
    fn acceleration_structure_address(&self, resource: ResourceHandle) -> u64;

    /// Bindless descriptor index of a view, if the view is shader visible.
    fn descriptor_index(&self, view: ViewHandle) -> Option<u32>;
}

/// Copy `data` into the start of a CPU-writable buffer.
pub fn upload<T: bytemuck::Pod>(
    device: &dyn RtDevice,
    resource: ResourceHandle,
    data: &[T],
) -> Result<()> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let mut fits = true;
    device.map_buffer(resource, &mut |mapped: &mut [u8]| {
        if bytes.len() > mapped.len() {
            fits = false;
            return;
        }
        mapped[..bytes.len()].copy_from_slice(bytes);
    })?;

    if fits {
        Ok(())
    } else {
        Err(GpuError::InvalidState(
            "Data too large for buffer".to_string(),
        ))
    }
}
