//! Camera module: view frustum.
//!
//! The camera itself is owned and driven by the caller; the culling core
//! only consumes its view-projection matrix once per frame.

mod frustum;

pub use frustum::{
    Frustum, PLANE_NORMALIZE_EPSILON,
    PLANE_LEFT, PLANE_RIGHT, PLANE_BOTTOM, PLANE_TOP, PLANE_NEAR, PLANE_FAR,
};
pub(crate) use frustum::planes_reject_box;
