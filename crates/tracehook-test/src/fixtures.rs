//! Geometry and camera fixtures.

use glam::{Mat4, Vec3};
use tracehook_gpu::{Format, ResourceHandle, TriangleGeometry};

/// Non-indexed triangle list in `vertex_buffer`.
pub fn triangle_geometry(vertex_buffer: u64, vertex_count: u32) -> TriangleGeometry {
    TriangleGeometry {
        vertex_buffer: ResourceHandle(vertex_buffer),
        vertex_offset: 0,
        vertex_count,
        vertex_stride: 12,
        vertex_format: Format::R32G32B32Float,
        index_buffer: ResourceHandle::NULL,
        index_offset: 0,
        index_count: 0,
        index_format: Format::Unknown,
        opaque: true,
    }
}

/// Indexed triangle list with 16-bit indices.
pub fn indexed_geometry(
    vertex_buffer: u64,
    index_buffer: u64,
    index_offset: u64,
    index_count: u32,
) -> TriangleGeometry {
    TriangleGeometry {
        index_buffer: ResourceHandle(index_buffer),
        index_offset,
        index_count,
        index_format: Format::R16Uint,
        vertex_count: 1024,
        ..triangle_geometry(vertex_buffer, 0)
    }
}

/// Perspective camera at `(0, 2, 10)` looking at the origin.
pub fn test_view_projection() -> Mat4 {
    let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 10.0), Vec3::ZERO, Vec3::Y);
    let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, 16.0 / 9.0, 0.1, 500.0);
    proj * view
}
