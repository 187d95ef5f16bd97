/// Scene object: one cullable entity of the visibility pipeline.
///
/// Holds the world-space bounds consumed by the hierarchy builders, the
/// visibility flags written by the culling stages, the motion state driven
/// by `MotionTracker`, and the occlusion hysteresis state owned by
/// `OcclusionIntegrator`.
///
/// The object list is fixed for a session; `index()` is the position of
/// the object in that list and is what hierarchy leaves reference.

use glam::Vec3;
use crate::culling::OcclusionState;
use crate::scene::AABB;

/// Motion model of a dynamic object
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Motion {
    /// Circular motion in the XZ plane: `center + (cos t, 0, sin t) * radius`
    Orbit {
        center: Vec3,
        radius: f32,
        /// Radians per second
        angular_speed: f32,
        /// Current angle (radians)
        time: f32,
    },
    /// Constant velocity (world units per second)
    Linear {
        velocity: Vec3,
    },
    /// Moved only through `SceneObject::set_position`
    Manual,
}

impl Motion {
    /// Orbit with unit angular speed starting at angle `time`
    pub fn orbit(center: Vec3, radius: f32, time: f32) -> Self {
        Motion::Orbit { center, radius, angular_speed: 1.0, time }
    }

    /// Advance the motion by `dt` seconds and return the new position,
    /// or `None` when the position is not driven by the motion model.
    pub(crate) fn advance(&mut self, position: Vec3, dt: f32) -> Option<Vec3> {
        match self {
            Motion::Orbit { center, radius, angular_speed, time } => {
                *time += dt * *angular_speed;
                Some(*center + Vec3::new(time.cos() * *radius, 0.0, time.sin() * *radius))
            }
            Motion::Linear { velocity } => Some(position + *velocity * dt),
            Motion::Manual => None,
        }
    }

    /// Position at the current motion state (Orbit only)
    pub(crate) fn current_position(&self) -> Option<Vec3> {
        match self {
            Motion::Orbit { center, radius, time, .. } => {
                Some(*center + Vec3::new(time.cos() * *radius, 0.0, time.sin() * *radius))
            }
            _ => None,
        }
    }
}

/// A cullable object
#[derive(Debug, Clone)]
pub struct SceneObject {
    index: usize,
    aabb: AABB,
    half_extents: Vec3,
    /// Final visibility flag read by the renderer
    visible: bool,
    /// Culling Executor output for the current frame
    frustum_visible: bool,
    motion: Option<Motion>,
    last_position: Vec3,
    tracked_position: Vec3,
    /// Bounds validity at the last tracker update
    tracked_valid: bool,
    movement_distance: f32,
    velocity: Vec3,
    occlusion: OcclusionState,
}

impl SceneObject {
    /// Static cube of side `size` centered on `center`
    pub fn new_static(center: Vec3, size: f32) -> Self {
        Self::with_bounds(AABB::from_center_size(center, size), None)
    }

    /// Dynamic cube of side `size` driven by `motion`.
    ///
    /// Orbiting objects start on their orbit, not at `center`.
    pub fn new_dynamic(center: Vec3, size: f32, motion: Motion) -> Self {
        let start = motion.current_position().unwrap_or(center);
        Self::with_bounds(AABB::from_center_size(start, size), Some(motion))
    }

    /// Static object with arbitrary bounds (possibly invalid)
    pub fn from_aabb(aabb: AABB) -> Self {
        Self::with_bounds(aabb, None)
    }

    fn with_bounds(aabb: AABB, motion: Option<Motion>) -> Self {
        let (position, half_extents) = if aabb.is_valid() {
            (aabb.center(), aabb.extent() * 0.5)
        } else {
            (Vec3::ZERO, Vec3::ZERO)
        };
        Self {
            index: 0,
            aabb,
            half_extents,
            visible: true,
            frustum_visible: true,
            motion,
            last_position: position,
            tracked_position: position,
            tracked_valid: aabb.is_valid(),
            movement_distance: 0.0,
            velocity: Vec3::ZERO,
            occlusion: OcclusionState::default(),
        }
    }

    // ===== ACCESSORS =====

    /// Position in the session's object list
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn aabb(&self) -> &AABB {
        &self.aabb
    }

    pub fn position(&self) -> Vec3 {
        self.aabb.center()
    }

    pub fn half_extents(&self) -> Vec3 {
        self.half_extents
    }

    /// Final visibility (frustum result with occlusion applied)
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Frustum culling result of the last completed cull
    pub fn is_frustum_visible(&self) -> bool {
        self.frustum_visible
    }

    pub fn is_dynamic(&self) -> bool {
        self.motion.is_some()
    }

    pub fn motion(&self) -> Option<&Motion> {
        self.motion.as_ref()
    }

    /// Position before the last tracker update
    pub fn last_position(&self) -> Vec3 {
        self.last_position
    }

    /// Distance moved during the last tracker update
    pub fn movement_distance(&self) -> f32 {
        self.movement_distance
    }

    /// World units per second, measured by the last tracker update
    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn occlusion(&self) -> &OcclusionState {
        &self.occlusion
    }

    // ===== MUTATORS =====

    /// Move a dynamic object's center. The tracker measures the delta on
    /// its next update. Static objects ignore this call.
    pub fn set_position(&mut self, position: Vec3) {
        if self.motion.is_some() {
            self.aabb = AABB::from_center_half_extents(position, self.half_extents);
        }
    }

    /// Replace the motion model (None turns the object static)
    pub fn set_motion(&mut self, motion: Option<Motion>) {
        self.motion = motion;
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub(crate) fn set_frustum_visible(&mut self, visible: bool) {
        self.frustum_visible = visible;
    }

    pub(crate) fn tracked_bounds_valid(&self) -> bool {
        self.tracked_valid
    }

    pub(crate) fn motion_mut(&mut self) -> Option<&mut Motion> {
        self.motion.as_mut()
    }

    /// Record this frame's motion: bounds recentered on `position`, delta
    /// measured against the position of the previous tracker update.
    /// Returns the distance moved.
    pub(crate) fn apply_motion(&mut self, position: Vec3, dt: f32) -> f32 {
        let delta = position - self.tracked_position;
        self.last_position = self.tracked_position;
        self.tracked_position = position;
        self.aabb = AABB::from_center_half_extents(position, self.half_extents);
        self.tracked_valid = self.aabb.is_valid();
        self.movement_distance = if delta.is_finite() { delta.length() } else { 0.0 };
        self.velocity = if dt > 0.0 && delta.is_finite() { delta / dt } else { Vec3::ZERO };
        self.movement_distance
    }

    pub(crate) fn occlusion_mut(&mut self) -> &mut OcclusionState {
        &mut self.occlusion
    }
}

#[cfg(test)]
#[path = "scene_object_tests.rs"]
mod tests;
