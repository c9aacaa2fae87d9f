//! Geometry identity and the draw records reported by the hook layer.

use glam::Mat4;
use tracehook_core::Material;
use tracehook_gpu::{Format, ResourceHandle, TriangleGeometry, ViewDesc};

/// Identity of a drawable mesh.
///
/// Static geometry is identified by buffer handles plus ranges. Dynamic
/// geometry lives in buffers that are rewritten every frame at shifting
/// offsets, so only the buffer handles take part in its identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeometryKey {
    pub vertex_buffer: ResourceHandle,
    pub vertex_offset: u64,
    pub vertex_count: u32,
    pub vertex_stride: u32,
    pub index_buffer: ResourceHandle,
    pub index_offset: u64,
    pub index_count: u32,
    pub dynamic: bool,
}

impl GeometryKey {
    pub fn new(geometry: &TriangleGeometry, dynamic: bool) -> Self {
        if dynamic {
            Self {
                vertex_buffer: geometry.vertex_buffer,
                vertex_offset: 0,
                vertex_count: 0,
                vertex_stride: 0,
                index_buffer: geometry.index_buffer,
                index_offset: 0,
                index_count: 0,
                dynamic,
            }
        } else {
            Self {
                vertex_buffer: geometry.vertex_buffer,
                vertex_offset: geometry.vertex_offset,
                vertex_count: geometry.vertex_count,
                vertex_stride: geometry.vertex_stride,
                index_buffer: geometry.index_buffer,
                index_offset: geometry.index_offset,
                index_count: geometry.index_count,
                dynamic,
            }
        }
    }

    /// Returns true if the mesh reads from `buffer`.
    #[inline]
    pub fn references(&self, buffer: ResourceHandle) -> bool {
        !buffer.is_null() && (self.vertex_buffer == buffer || self.index_buffer == buffer)
    }
}

/// Everything needed to (re)build a bottom-level structure for one mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildDescriptor {
    pub geometry: TriangleGeometry,
    pub dynamic: bool,
}

impl BuildDescriptor {
    pub const fn new(geometry: TriangleGeometry, dynamic: bool) -> Self {
        Self { geometry, dynamic }
    }

    #[inline]
    pub fn key(&self) -> GeometryKey {
        GeometryKey::new(&self.geometry, self.dynamic)
    }

    #[inline]
    pub const fn is_opaque(&self) -> bool {
        self.geometry.opaque
    }

    /// A draw with fewer than `min_vertices` vertices (or indices) produces no triangles.
    pub fn is_degenerate(&self, min_vertices: u32) -> bool {
        let g = &self.geometry;
        let count = if g.is_indexed() {
            g.index_count
        } else {
            g.vertex_count
        };
        g.vertex_buffer.is_null() || count < min_vertices.max(3)
    }
}

/// Logical shader bindings exposed per instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum AttachmentSlot {
    Index = 0,
    Vertex = 1,
    Uv = 2,
    Normal = 3,
    Color = 4,
    Material = 5,
    Texture = 6,
}

impl AttachmentSlot {
    pub const COUNT: usize = 7;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Index,
        Self::Vertex,
        Self::Uv,
        Self::Normal,
        Self::Color,
        Self::Material,
        Self::Texture,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A resource bound by the draw that hit shaders need to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentSource {
    pub slot: AttachmentSlot,
    pub resource: ResourceHandle,
    /// View to create over `resource`.
    pub view: ViewDesc,
    /// Byte offset of the first element, as seen by the shader.
    pub offset: u32,
    pub stride: u32,
    pub format: Format,
}

impl AttachmentSource {
    /// Typed buffer attachment starting at `offset` bytes.
    pub fn typed(
        slot: AttachmentSlot,
        resource: ResourceHandle,
        offset: u32,
        element_count: u32,
        format: Format,
    ) -> Self {
        Self {
            slot,
            resource,
            view: ViewDesc::TypedBuffer {
                offset: u64::from(offset),
                element_count,
                format,
            },
            offset,
            stride: format.byte_size(),
            format,
        }
    }

    /// Structured buffer attachment of `stride`-byte elements.
    pub fn structured(
        slot: AttachmentSlot,
        resource: ResourceHandle,
        offset: u32,
        element_count: u32,
        stride: u32,
    ) -> Self {
        Self {
            slot,
            resource,
            view: ViewDesc::StructuredBuffer {
                first_element: u64::from(offset / stride.max(1)),
                element_count,
                stride,
            },
            offset,
            stride,
            format: Format::Unknown,
        }
    }
}

/// One qualifying draw call, as reported by the hook layer.
#[derive(Clone, Debug)]
pub struct ObservedDraw {
    pub geometry: TriangleGeometry,
    /// Object-to-clip transform, or object-to-world when no camera base is known.
    pub transform: Mat4,
    pub material: Material,
    /// Shader or texture hash used for material table lookups.
    pub material_key: Option<u64>,
    pub attachments: Vec<AttachmentSource>,
    /// Every vertex buffer bound for the draw, including instance streams.
    pub vertex_streams: Vec<ResourceHandle>,
    /// Geometry contents never change after the first draw.
    pub is_static: bool,
    /// Geometry is streamed or skinned into reused buffers.
    pub dynamic_stream: bool,
}

impl ObservedDraw {
    /// Draw of `geometry` with default material and no attachments.
    pub fn new(geometry: TriangleGeometry, transform: Mat4) -> Self {
        Self {
            geometry,
            transform,
            material: Material::default(),
            material_key: None,
            attachments: Vec::new(),
            vertex_streams: vec![geometry.vertex_buffer],
            is_static: true,
            dynamic_stream: false,
        }
    }

    #[must_use]
    pub fn with_material(mut self, material: Material, key: Option<u64>) -> Self {
        self.material = material;
        self.material_key = key;
        self
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: AttachmentSource) -> Self {
        self.attachments.push(attachment);
        self
    }

    #[must_use]
    pub fn with_vertex_streams(mut self, streams: Vec<ResourceHandle>) -> Self {
        self.vertex_streams = streams;
        self
    }

    #[must_use]
    pub fn dynamic(mut self) -> Self {
        self.dynamic_stream = true;
        self.is_static = false;
        self
    }

    pub fn descriptor(&self) -> BuildDescriptor {
        BuildDescriptor::new(self.geometry, self.dynamic_stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracehook_test::{indexed_geometry, triangle_geometry};

    #[test]
    fn static_key_includes_ranges() {
        let a = indexed_geometry(1, 2, 0, 36);
        let b = indexed_geometry(1, 2, 72, 36);
        assert_ne!(GeometryKey::new(&a, false), GeometryKey::new(&b, false));
        assert_eq!(GeometryKey::new(&a, false), GeometryKey::new(&a, false));
    }

    #[test]
    fn dynamic_key_ignores_ranges() {
        let a = indexed_geometry(1, 2, 0, 36);
        let b = indexed_geometry(1, 2, 72, 48);
        assert_eq!(GeometryKey::new(&a, true), GeometryKey::new(&b, true));
        assert_ne!(GeometryKey::new(&a, true), GeometryKey::new(&a, false));
    }

    #[test]
    fn key_references_vertex_and_index_buffers() {
        let key = GeometryKey::new(&indexed_geometry(1, 2, 0, 36), false);
        assert!(key.references(ResourceHandle(1)));
        assert!(key.references(ResourceHandle(2)));
        assert!(!key.references(ResourceHandle(3)));
        assert!(!key.references(ResourceHandle::NULL));
    }

    #[test]
    fn degenerate_draws() {
        assert!(BuildDescriptor::new(triangle_geometry(1, 2), false).is_degenerate(3));
        assert!(!BuildDescriptor::new(triangle_geometry(1, 3), false).is_degenerate(3));
        assert!(BuildDescriptor::new(triangle_geometry(0, 30), false).is_degenerate(3));
        assert!(BuildDescriptor::new(indexed_geometry(1, 2, 0, 0), false).is_degenerate(3));
    }

    #[test]
    fn structured_attachment_first_element() {
        let a = AttachmentSource::structured(AttachmentSlot::Uv, ResourceHandle(4), 64, 10, 8);
        assert_eq!(
            a.view,
            ViewDesc::StructuredBuffer {
                first_element: 8,
                element_count: 10,
                stride: 8
            }
        );
    }
}
