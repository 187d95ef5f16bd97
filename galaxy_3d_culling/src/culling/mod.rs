//! Culling module
//!
//! CPU and GPU hierarchy systems, occlusion feedback, and the
//! `VisibilitySystem` that runs them once per frame.

mod cpu_bvh_system;
mod gpu_bvh_system;
mod occlusion;
mod visibility_system;

pub use cpu_bvh_system::CpuBvhSystem;
pub use gpu_bvh_system::{GpuBvhSystem, GpuCullOutcome};
pub use occlusion::{
    OcclusionState, OcclusionIntegrator, OcclusionReport,
    OcclusionQuerySource, QueryPoll, ScriptedQuerySource,
};
pub use visibility_system::{VisibilitySystem, FrameStats, ExecutionPath};
