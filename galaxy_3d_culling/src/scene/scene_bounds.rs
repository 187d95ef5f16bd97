/// Scene bounds: padded box over all object bounds.
///
/// Only used to normalize object centers into the Morton grid. Dynamic
/// objects are extended along their velocity so that objects about to
/// leave the box still quantize sensibly until the next rebuild.

use glam::Vec3;
use crate::config::CullingConfig;
use crate::scene::{AABB, SceneObject};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneBounds {
    pub aabb: AABB,
}

impl SceneBounds {
    /// Bounds over all valid object boxes.
    ///
    /// Padding is `extent * scene_bounds_padding` plus
    /// `max_speed * velocity_padding_factor` on every side. Each axis is then
    /// widened around its center to at least `min_scene_size`. With no valid
    /// object the result is a `min_scene_size` cube at the origin.
    pub fn compute(objects: &[SceneObject], config: &CullingConfig) -> Self {
        let mut bounds = AABB::EMPTY;
        let mut max_speed = 0.0_f32;

        for object in objects {
            let mut aabb = *object.aabb();
            if !aabb.is_valid() {
                continue;
            }
            if object.is_dynamic() {
                let velocity = object.velocity();
                if velocity.is_finite() {
                    let predicted = velocity * config.velocity_prediction_time;
                    aabb = aabb.union(&AABB::new(aabb.min + predicted, aabb.max + predicted));
                    max_speed = max_speed.max(velocity.length());
                }
            }
            bounds = bounds.union(&aabb);
        }

        if !bounds.is_valid() {
            return Self {
                aabb: AABB::from_center_size(Vec3::ZERO, config.min_scene_size),
            };
        }

        let padding = bounds.extent() * config.scene_bounds_padding
            + Vec3::splat(max_speed * config.velocity_padding_factor);
        let mut aabb = bounds.expanded(padding);

        let center = aabb.center();
        let half = aabb.extent().max(Vec3::splat(config.min_scene_size)) * 0.5;
        aabb = AABB::from_center_half_extents(center, half);

        Self { aabb }
    }

    /// Map a point into `[0, 1]^3` relative to the bounds (clamped)
    pub fn normalize(&self, point: Vec3) -> Vec3 {
        let extent = self.aabb.extent().max(Vec3::splat(f32::EPSILON));
        ((point - self.aabb.min) / extent).clamp(Vec3::ZERO, Vec3::ONE)
    }
}

impl Default for SceneBounds {
    fn default() -> Self {
        Self { aabb: AABB::from_center_size(Vec3::ZERO, 1.0) }
    }
}

#[cfg(test)]
#[path = "scene_bounds_tests.rs"]
mod tests;
