/// Dynamic object tracker
///
/// Advances every dynamic object by one frame and reports how much the
/// scene moved. The report is the only input of the maintenance policy.

use crate::scene::SceneObject;

/// Movement summary of one tracker update
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionReport {
    /// Sum of the per-object movement distances of dynamic objects
    pub total_movement: f32,
    /// Largest single-object movement distance
    pub max_object_movement: f32,
    /// Number of dynamic objects that moved a non-zero distance
    pub moved_objects: usize,
    /// Dynamic objects whose bounds turned invalid or valid again
    pub validity_changes: usize,
}

/// Driver of the `Motion` models of dynamic objects
#[derive(Debug, Default)]
pub struct MotionTracker {
    frames: u64,
}

impl MotionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of updates performed
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Advance dynamic objects by `dt` seconds.
    ///
    /// Orbit and Linear motions compute the new position; Manual objects
    /// keep the position set through `SceneObject::set_position`. In every
    /// case the movement is measured against the previous update.
    pub fn update(&mut self, objects: &mut [SceneObject], dt: f32) -> MotionReport {
        self.frames += 1;
        let dt = if dt.is_finite() && dt > 0.0 { dt } else { 0.0 };

        let mut report = MotionReport::default();
        for object in objects.iter_mut() {
            let current = object.position();
            let Some(motion) = object.motion_mut() else {
                continue;
            };
            let position = motion.advance(current, dt).unwrap_or(current);
            let was_valid = object.tracked_bounds_valid();
            let moved = object.apply_motion(position, dt);

            if object.tracked_bounds_valid() != was_valid {
                crate::engine_debug!(
                    "galaxy3d::MotionTracker",
                    "Object {} bounds are {}",
                    object.index(),
                    if was_valid { "invalid" } else { "valid again" }
                );
                report.validity_changes += 1;
            }
            report.total_movement += moved;
            report.max_object_movement = report.max_object_movement.max(moved);
            if moved > 0.0 {
                report.moved_objects += 1;
            }
        }

        crate::engine_trace!(
            "galaxy3d::MotionTracker",
            "Frame {}: {} objects moved, total {:.4}, max {:.4}",
            self.frames,
            report.moved_objects,
            report.total_movement,
            report.max_object_movement
        );

        report
    }
}

#[cfg(test)]
#[path = "motion_tracker_tests.rs"]
mod tests;
