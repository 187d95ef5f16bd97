/*!
# Galaxy 3D Culling

Per-frame visibility determination for the Galaxy 3D engine.

Every frame each scene object gets one visibility bit the renderer reads
before submitting draws. The bit combines a frustum test, accelerated by a
bounding volume hierarchy, with delayed occlusion-query feedback.

## Architecture

- **VisibilitySystem**: explicit per-frame context running the pipeline
- **CpuBvhSystem**: median-split hierarchy and recursive traversal
- **GpuBvhSystem**: LBVH build, refit and cull through a `ComputeDevice`
- **MaintenancePolicy**: rebuild / refit / nothing, once per frame
- **OcclusionIntegrator**: hysteresis over occlusion query results
- **ComputeDevice**: compute backend trait (`SoftwareComputeDevice` runs the
  kernels on the CPU)

The GPU path falls back to the CPU path whenever compute is missing or a
GPU stage fails.
*/

// Internal modules
mod error;
mod engine;
mod config;
pub mod log;
pub mod camera;
pub mod scene;
pub mod bvh;
pub mod compute;
pub mod culling;

// Main galaxy3d namespace module
pub mod galaxy3d {
    // Error types
    pub use crate::error::{Error, Result};

    // Logging entry point
    pub use crate::engine::Engine;

    // Configuration
    pub use crate::config::CullingConfig;

    // Frame orchestration
    pub use crate::culling::{VisibilitySystem, FrameStats, ExecutionPath};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
        // Note: engine_* macros are NOT re-exported here - they are internal only
    }

    // Camera sub-module
    pub mod camera {
        pub use crate::camera::*;
    }

    // Scene sub-module
    pub mod scene {
        pub use crate::scene::*;
    }

    // Hierarchy sub-module
    pub mod bvh {
        pub use crate::bvh::*;
    }

    // Compute backend sub-module
    pub mod compute {
        pub use crate::compute::*;
    }

    // Culling sub-module
    pub mod culling {
        pub use crate::culling::*;
    }
}

// Re-export math library at crate root
pub use glam;
