/// VisibilitySystem: per-frame orchestration of the culling pipeline.
///
/// Owns the objects and every stage of the pipeline. `run_frame` executes,
/// in order: motion update, scene bounds, maintenance decision, build or
/// refit, frustum cull, occlusion integration, device frame submission.
///
/// The GPU path is used while a compute device is available and healthy.
/// A failing GPU stage falls back to the CPU for the frame; after
/// `max_consecutive_gpu_failures` failing frames in a row the GPU path is
/// dropped for the session. `run_frame` itself never fails.

use glam::{Mat4, Vec3};
use crate::bvh::{MaintenanceAction, MaintenancePolicy};
use crate::camera::Frustum;
use crate::compute::SharedComputeDevice;
use crate::config::CullingConfig;
use crate::culling::cpu_bvh_system::CpuBvhSystem;
use crate::culling::gpu_bvh_system::{GpuBvhSystem, GpuCullOutcome};
use crate::culling::occlusion::{OcclusionIntegrator, OcclusionQuerySource, OcclusionReport};
use crate::error::{Error, Result};
use crate::scene::{MotionReport, MotionTracker, SceneBounds, SceneObject};

/// Where the hierarchy lives and is traversed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    Gpu,
    Cpu,
}

/// Per-frame statistics returned by `run_frame`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    /// Frame number, starting at 0
    pub frame: u64,
    pub action: MaintenanceAction,
    /// Path that produced this frame's frustum bits
    pub path: ExecutionPath,
    /// GPU path active but this frame fell back to the CPU
    pub fallback: bool,
    /// GPU path: visibility of an earlier frame landed and was applied
    pub gpu_results_applied: bool,
    pub motion: MotionReport,
    pub occlusion: OcclusionReport,
    pub object_count: usize,
    pub frustum_visible: usize,
    pub visible: usize,
}

pub struct VisibilitySystem {
    objects: Vec<SceneObject>,
    config: CullingConfig,
    tracker: MotionTracker,
    policy: MaintenancePolicy,
    cpu: CpuBvhSystem,
    gpu: Option<GpuBvhSystem>,
    occlusion: OcclusionIntegrator,
    frustum: Frustum,
    scene_bounds: SceneBounds,
    device: Option<SharedComputeDevice>,
    consecutive_gpu_failures: u32,
    frame: u64,
}

impl VisibilitySystem {
    /// Take ownership of the objects (their index becomes their position)
    /// and set up the GPU path when `device` supports compute.
    ///
    /// Fails only on an invalid configuration; GPU setup problems select
    /// the CPU path instead.
    pub fn new(
        mut objects: Vec<SceneObject>,
        config: CullingConfig,
        device: Option<SharedComputeDevice>,
    ) -> Result<Self> {
        config.validate()?;

        for (index, object) in objects.iter_mut().enumerate() {
            object.set_index(index);
        }

        let gpu = match &device {
            Some(device) if config.prefer_gpu => {
                match GpuBvhSystem::new(device.clone(), objects.len(), &config) {
                    Ok(gpu) => Some(gpu),
                    Err(Error::Unsupported(what)) => {
                        crate::engine_info!(
                            "galaxy3d::VisibilitySystem",
                            "No GPU support for {}, using the CPU path",
                            what
                        );
                        None
                    }
                    Err(e) => {
                        crate::engine_warn!(
                            "galaxy3d::VisibilitySystem",
                            "GPU setup failed ({}), using the CPU path",
                            e
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        let scene_bounds = SceneBounds::compute(&objects, &config);
        crate::engine_info!(
            "galaxy3d::VisibilitySystem",
            "{} objects, {:?} path",
            objects.len(),
            if gpu.is_some() { ExecutionPath::Gpu } else { ExecutionPath::Cpu }
        );

        Ok(Self {
            tracker: MotionTracker::new(),
            policy: MaintenancePolicy::new(&config),
            cpu: CpuBvhSystem::new(),
            occlusion: OcclusionIntegrator::new(&config),
            frustum: Frustum::from_view_projection(&Mat4::IDENTITY),
            scene_bounds,
            objects,
            config,
            gpu,
            device,
            consecutive_gpu_failures: 0,
            frame: 0,
        })
    }

    // ===== ACCESSORS =====

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    /// Mutable access for manual moves (`SceneObject::set_position`);
    /// the object count stays fixed
    pub fn objects_mut(&mut self) -> &mut [SceneObject] {
        &mut self.objects
    }

    /// Indices of the objects the renderer should draw
    pub fn visible_indices(&self) -> Vec<usize> {
        self.objects
            .iter()
            .filter(|o| o.is_visible())
            .map(|o| o.index())
            .collect()
    }

    pub fn execution_path(&self) -> ExecutionPath {
        if self.gpu.is_some() {
            ExecutionPath::Gpu
        } else {
            ExecutionPath::Cpu
        }
    }

    pub fn scene_bounds(&self) -> &SceneBounds {
        &self.scene_bounds
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    pub fn config(&self) -> &CullingConfig {
        &self.config
    }

    pub fn policy(&self) -> &MaintenancePolicy {
        &self.policy
    }

    pub fn cpu_system(&self) -> &CpuBvhSystem {
        &self.cpu
    }

    /// Number of frames run so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn consecutive_gpu_failures(&self) -> u32 {
        self.consecutive_gpu_failures
    }

    /// Occlusion queries to issue this frame, nearest first
    pub fn plan_queries(&mut self, eye: Vec3) -> Vec<usize> {
        self.occlusion.plan_queries(&mut self.objects, eye)
    }

    // ===== FRAME =====

    /// Run one frame of the pipeline
    pub fn run_frame(
        &mut self,
        dt: f32,
        view_projection: &Mat4,
        queries: &mut dyn OcclusionQuerySource,
    ) -> FrameStats {
        let motion = self.tracker.update(&mut self.objects, dt);
        self.scene_bounds = SceneBounds::compute(&self.objects, &self.config);
        self.frustum = Frustum::from_view_projection(view_projection);

        self.poll_gpu_quality();
        let action = self.policy.evaluate(&motion);

        let gpu_active = self.gpu.is_some();
        let mut gpu_failed = false;
        let gpu_outcome = if gpu_active && self.maintain_gpu(action) { self.cull_gpu() } else { None };
        let path = if gpu_outcome.is_some() {
            ExecutionPath::Gpu
        } else {
            if gpu_active {
                gpu_failed = true;
            } else {
                self.maintain_cpu(action);
            }
            self.cull_cpu();
            ExecutionPath::Cpu
        };

        if gpu_active {
            self.record_gpu_frame(gpu_failed);
        }

        // GPU bits may come from a frame where the box was still valid
        for object in self.objects.iter_mut().filter(|o| !o.aabb().is_valid()) {
            object.set_frustum_visible(false);
        }

        let occlusion = self.occlusion.integrate(&mut self.objects, queries);

        if let Some(device) = &self.device {
            if let Ok(mut device) = device.lock() {
                device.submit_frame();
            }
        }

        let stats = FrameStats {
            frame: self.frame,
            action,
            path,
            fallback: gpu_failed,
            gpu_results_applied: gpu_outcome.is_some_and(|o| o.results_applied),
            motion,
            occlusion,
            object_count: self.objects.len(),
            frustum_visible: self.objects.iter().filter(|o| o.is_frustum_visible()).count(),
            visible: self.objects.iter().filter(|o| o.is_visible()).count(),
        };
        crate::engine_trace!(
            "galaxy3d::VisibilitySystem",
            "Frame {}: {:?} on {:?}, {}/{} visible ({} in frustum)",
            stats.frame, stats.action, stats.path, stats.visible, stats.object_count, stats.frustum_visible
        );
        self.frame += 1;
        stats
    }

    fn poll_gpu_quality(&mut self) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        match gpu.poll_quality() {
            Ok(Some(sample)) => self.policy.record_quality(sample),
            Ok(None) => {}
            Err(e) => crate::engine_warn!("galaxy3d::VisibilitySystem", "Quality readback failed: {}", e),
        }
    }

    /// GPU build/refit; false when the stage failed (the frame falls back)
    fn maintain_gpu(&mut self, action: MaintenanceAction) -> bool {
        let Some(gpu) = self.gpu.as_mut() else {
            return false;
        };

        match action {
            MaintenanceAction::Rebuild(reason) => match gpu.build(&self.objects, &self.scene_bounds) {
                Ok(()) => {
                    crate::engine_debug!("galaxy3d::VisibilitySystem", "GPU rebuild ({:?})", reason);
                    self.policy.record_rebuild(None);
                    self.cpu.mark_stale();
                    true
                }
                Err(e) => {
                    crate::engine_warn!(
                        "galaxy3d::VisibilitySystem",
                        "GPU rebuild failed ({}), CPU fallback this frame",
                        e
                    );
                    gpu.invalidate();
                    self.policy.record_refit_failure();
                    false
                }
            },
            MaintenanceAction::Refit => match gpu.refit(&self.objects) {
                Ok(()) => {
                    self.cpu.mark_stale();
                    true
                }
                Err(e) => {
                    crate::engine_warn!(
                        "galaxy3d::VisibilitySystem",
                        "GPU refit failed ({}), rebuild scheduled",
                        e
                    );
                    self.policy.record_refit_failure();
                    false
                }
            },
            MaintenanceAction::None => true,
        }
    }

    /// CPU path maintenance: the CPU never refits, a refit request rebuilds
    fn maintain_cpu(&mut self, action: MaintenanceAction) {
        let rebuild = match action {
            MaintenanceAction::Rebuild(_) | MaintenanceAction::Refit => true,
            MaintenanceAction::None => self.cpu.is_stale(),
        };
        if rebuild {
            let quality = self.cpu.build(&self.objects);
            self.policy.record_rebuild(Some(quality));
        }
    }

    fn cull_gpu(&mut self) -> Option<GpuCullOutcome> {
        let gpu = self.gpu.as_mut()?;
        match gpu.cull(&mut self.objects, &self.frustum) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                crate::engine_warn!("galaxy3d::VisibilitySystem", "GPU cull failed ({}), CPU fallback", e);
                None
            }
        }
    }

    fn cull_cpu(&mut self) {
        if self.cpu.is_stale() {
            self.cpu.build(&self.objects);
        }
        self.cpu.cull(&mut self.objects, &self.frustum);
        if let Some(gpu) = self.gpu.as_mut() {
            // Bits from an older GPU frame must not override this frame's
            gpu.discard_pending_visibility();
        }
    }

    fn record_gpu_frame(&mut self, failed: bool) {
        if !failed {
            self.consecutive_gpu_failures = 0;
            return;
        }

        self.consecutive_gpu_failures += 1;
        if self.consecutive_gpu_failures >= self.config.max_consecutive_gpu_failures {
            crate::engine_warn!(
                "galaxy3d::VisibilitySystem",
                "GPU path disabled after {} consecutive failures",
                self.consecutive_gpu_failures
            );
            self.gpu = None;
            self.policy.record_refit_failure();
        }
    }
}

#[cfg(test)]
#[path = "visibility_system_tests.rs"]
mod tests;
