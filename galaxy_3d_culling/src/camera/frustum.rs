/// Frustum: six clipping planes for visibility culling.
///
/// Each plane is represented as a Vec4 (A, B, C, D) where:
/// - (A, B, C) is the inward-pointing normal
/// - D is the signed distance
/// - A point P is inside the frustum if dot(plane, P_homogeneous) >= 0 for all planes
///
/// Recomputed from the camera's view-projection matrix every frame. The
/// same plane test runs on the CPU traversal and inside the `FrustumCull`
/// compute kernel (`planes_reject_box` is shared by both).

use glam::{Mat4, Vec3, Vec4};
use crate::scene::AABB;

/// Frustum plane indices
pub const PLANE_LEFT: usize = 0;
pub const PLANE_RIGHT: usize = 1;
pub const PLANE_BOTTOM: usize = 2;
pub const PLANE_TOP: usize = 3;
pub const PLANE_NEAR: usize = 4;
pub const PLANE_FAR: usize = 5;

/// Planes whose normal is shorter than this are left unnormalized
pub const PLANE_NORMALIZE_EPSILON: f32 = 1e-4;

/// Six frustum planes for culling.
///
/// Each plane is (A, B, C, D) where Ax + By + Cz + D = 0.
/// Normal (A, B, C) points inward (toward the visible volume).
/// Works with both perspective and orthographic projections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    /// Frustum planes: left, right, bottom, top, near, far
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Extract frustum planes from a view-projection matrix.
    ///
    /// Uses the Gribb & Hartmann method. Works for both perspective
    /// and orthographic projections.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let m = vp.to_cols_array_2d();

        // Gribb & Hartmann: extract planes from rows of the VP matrix
        let mut planes = [
            // Left:   row3 + row0
            Vec4::new(m[0][3] + m[0][0], m[1][3] + m[1][0], m[2][3] + m[2][0], m[3][3] + m[3][0]),
            // Right:  row3 - row0
            Vec4::new(m[0][3] - m[0][0], m[1][3] - m[1][0], m[2][3] - m[2][0], m[3][3] - m[3][0]),
            // Bottom: row3 + row1
            Vec4::new(m[0][3] + m[0][1], m[1][3] + m[1][1], m[2][3] + m[2][1], m[3][3] + m[3][1]),
            // Top:    row3 - row1
            Vec4::new(m[0][3] - m[0][1], m[1][3] - m[1][1], m[2][3] - m[2][1], m[3][3] - m[3][1]),
            // Near:   row3 + row2
            Vec4::new(m[0][3] + m[0][2], m[1][3] + m[1][2], m[2][3] + m[2][2], m[3][3] + m[3][2]),
            // Far:    row3 - row2
            Vec4::new(m[0][3] - m[0][2], m[1][3] - m[1][2], m[2][3] - m[2][2], m[3][3] - m[3][2]),
        ];

        for plane in &mut planes {
            let normal_len = Vec3::new(plane.x, plane.y, plane.z).length();
            if normal_len >= PLANE_NORMALIZE_EPSILON {
                *plane /= normal_len;
            }
        }

        Self { planes }
    }

    /// Positive-vertex test of the box `[min, max]` against all six planes.
    ///
    /// Conservative: may accept boxes that are outside (near frustum
    /// corners), never rejects a box that intersects the volume.
    /// Boxes with non-finite components or `min > max` are rejected.
    pub fn is_box_visible(&self, min: Vec3, max: Vec3) -> bool {
        if !AABB::new(min, max).is_valid() {
            return false;
        }
        !planes_reject_box(&self.planes, min, max)
    }

    /// AABB-typed wrapper around `is_box_visible`.
    pub fn intersects_aabb(&self, aabb: &AABB) -> bool {
        self.is_box_visible(aabb.min, aabb.max)
    }
}

/// Corner of `[min, max]` most aligned with `normal`
#[inline]
fn positive_vertex(normal: Vec3, min: Vec3, max: Vec3) -> Vec3 {
    Vec3::new(
        if normal.x >= 0.0 { max.x } else { min.x },
        if normal.y >= 0.0 { max.y } else { min.y },
        if normal.z >= 0.0 { max.z } else { min.z },
    )
}

/// `true` if the positive vertex of `[min, max]` is behind any plane.
///
/// No validity check: callers decide how to treat degenerate boxes.
/// NaN components never compare below zero, so an all-NaN box is not
/// rejected here.
#[inline]
pub(crate) fn planes_reject_box(planes: &[Vec4; 6], min: Vec3, max: Vec3) -> bool {
    planes.iter().any(|plane| {
        let normal = Vec3::new(plane.x, plane.y, plane.z);
        normal.dot(positive_vertex(normal, min, max)) + plane.w < 0.0
    })
}

#[cfg(test)]
#[path = "frustum_tests.rs"]
mod tests;
