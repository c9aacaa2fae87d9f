//! Transform helpers for instance descriptors and motion vectors.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::error::{Error, Result};

/// Determinants below this are treated as singular.
const SINGULAR_EPSILON: f32 = 1e-12;

/// Row-major 3x4 affine transform, the layout native instance descriptors expect.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Transform3x4 {
    pub rows: [[f32; 4]; 3],
}

impl Transform3x4 {
    /// Identity transform.
    pub const IDENTITY: Self = Self {
        rows: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
    };

    /// Pack the top three rows of a column-major matrix.
    ///
    /// The bottom row is dropped; callers are expected to pass affine matrices.
    #[inline]
    pub fn from_mat4(m: Mat4) -> Self {
        Self {
            rows: [
                m.row(0).to_array(),
                m.row(1).to_array(),
                m.row(2).to_array(),
            ],
        }
    }

    /// Expand back to a column-major matrix with an affine bottom row.
    #[inline]
    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&[
            [self.rows[0][0], self.rows[1][0], self.rows[2][0], 0.0],
            [self.rows[0][1], self.rows[1][1], self.rows[2][1], 0.0],
            [self.rows[0][2], self.rows[1][2], self.rows[2][2], 0.0],
            [self.rows[0][3], self.rows[1][3], self.rows[2][3], 1.0],
        ])
    }

    /// Flatten into twelve floats, row by row.
    #[inline]
    pub fn to_array(&self) -> [f32; 12] {
        bytemuck::cast(self.rows)
    }
}

impl Default for Transform3x4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Invert a base view-projection matrix.
///
/// Fails on singular input, which happens when the hook layer captured an
/// uninitialized or degenerate camera constant buffer.
pub fn invert_view_projection(view_projection: Mat4) -> Result<Mat4> {
    let det = view_projection.determinant();
    if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
        return Err(Error::InvalidData(format!(
            "view-projection matrix is singular (determinant {det})"
        )));
    }
    Ok(view_projection.inverse())
}

/// Recover an object-to-world transform from an object-to-clip transform.
///
/// `clip = view_projection * world`, so `world = inverse(view_projection) * clip`.
/// The bottom row is re-normalized so that the result stays affine.
#[inline]
pub fn clip_to_world(object_to_clip: Mat4, inverse_view_projection: Mat4) -> Mat4 {
    let mut world = inverse_view_projection * object_to_clip;
    world.x_axis.w = 0.0;
    world.y_axis.w = 0.0;
    world.z_axis.w = 0.0;
    world.w_axis.w = 1.0;
    world
}

/// Transform that carries a point from its previous world position to its current one.
///
/// Returns identity when the previous transform cannot be inverted.
#[inline]
pub fn motion_delta(previous_world: Mat4, current_world: Mat4) -> Mat4 {
    if previous_world.determinant().abs() < SINGULAR_EPSILON {
        return Mat4::IDENTITY;
    }
    current_world * previous_world.inverse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::{Quat, Vec3};

    fn sample_world() -> Mat4 {
        Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 1.0, 0.5),
            Quat::from_rotation_y(0.7),
            Vec3::new(3.0, -1.0, 8.0),
        )
    }

    fn sample_view_projection() -> Mat4 {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 10.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, 16.0 / 9.0, 0.1, 500.0);
        proj * view
    }

    #[test]
    fn transform_roundtrips_affine_matrix() {
        let m = sample_world();
        let packed = Transform3x4::from_mat4(m);
        assert_relative_eq!(
            packed.to_mat4().to_cols_array().as_slice(),
            m.to_cols_array().as_slice(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn transform_is_row_major() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let packed = Transform3x4::from_mat4(m).to_array();
        assert_eq!(packed[3], 1.0);
        assert_eq!(packed[7], 2.0);
        assert_eq!(packed[11], 3.0);
    }

    #[test]
    fn clip_space_recovers_world() {
        let world = sample_world();
        let vp = sample_view_projection();
        let inv = invert_view_projection(vp).unwrap();
        let recovered = clip_to_world(vp * world, inv);
        assert_relative_eq!(
            recovered.to_cols_array().as_slice(),
            world.to_cols_array().as_slice(),
            epsilon = 1e-3
        );
    }

    #[test]
    fn singular_view_projection_is_rejected() {
        assert!(invert_view_projection(Mat4::ZERO).is_err());
    }

    #[test]
    fn motion_delta_maps_previous_to_current() {
        let prev = Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0));
        let cur = Mat4::from_translation(Vec3::new(4.0, 0.0, 0.0));
        let delta = motion_delta(prev, cur);
        let p = delta.transform_point3(prev.transform_point3(Vec3::ZERO));
        assert_relative_eq!(p.x, 4.0, epsilon = 1e-6);
    }
}
