/// Axis-Aligned Bounding Box in world space
///
/// Used for object bounds, hierarchy node bounds and scene bounds.
/// `AABB::EMPTY` (min = +inf, max = -inf) is the identity of `union`
/// and is never visible.

use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AABB {
    /// Minimum corner (x, y, z)
    pub min: Vec3,
    /// Maximum corner (x, y, z)
    pub max: Vec3,
}

impl AABB {
    /// Empty box: union identity, fails every containment and frustum test
    pub const EMPTY: AABB = AABB {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Cube of side `size` centered on `center`
    pub fn from_center_size(center: Vec3, size: f32) -> Self {
        let half = Vec3::splat(size * 0.5);
        Self { min: center - half, max: center + half }
    }

    /// Box with the given center and half-extents
    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self { min: center - half_extents, max: center + half_extents }
    }

    /// All components finite and `min <= max` on every axis
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min.cmple(self.max).all()
    }

    /// The box itself when valid, `EMPTY` otherwise
    pub fn sanitized(&self) -> AABB {
        if self.is_valid() { *self } else { AABB::EMPTY }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Surface area (0 for invalid boxes)
    pub fn surface_area(&self) -> f32 {
        if !self.is_valid() {
            return 0.0;
        }
        let e = self.extent();
        2.0 * (e.x * e.y + e.y * e.z + e.z * e.x)
    }

    /// Smallest box containing both. Invalid operands are ignored.
    pub fn union(&self, other: &AABB) -> AABB {
        match (self.is_valid(), other.is_valid()) {
            (true, true) => AABB {
                min: self.min.min(other.min),
                max: self.max.max(other.max),
            },
            (true, false) => *self,
            (false, true) => *other,
            (false, false) => AABB::EMPTY,
        }
    }

    /// Grow by `amount` on every side
    pub fn expanded(&self, amount: Vec3) -> AABB {
        AABB { min: self.min - amount, max: self.max + amount }
    }

    /// Test if this AABB fully contains another AABB.
    pub fn contains(&self, other: &AABB) -> bool {
        self.min.x <= other.min.x && self.max.x >= other.max.x
        && self.min.y <= other.min.y && self.max.y >= other.max.y
        && self.min.z <= other.min.z && self.max.z >= other.max.z
    }
}

impl Default for AABB {
    fn default() -> Self {
        AABB::EMPTY
    }
}

#[cfg(test)]
#[path = "aabb_tests.rs"]
mod tests;
