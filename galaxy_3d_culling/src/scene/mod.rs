//! Scene module
//!
//! Cullable objects, their bounds and motion, and the scene-wide bounds
//! used for Morton quantization.

mod aabb;
mod scene_object;
mod scene_bounds;
mod motion_tracker;

pub use aabb::AABB;
pub use scene_object::{SceneObject, Motion};
pub use scene_bounds::SceneBounds;
pub use motion_tracker::{MotionTracker, MotionReport};
