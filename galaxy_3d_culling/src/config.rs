//! Culling configuration
//!
//! Static for a session. `Default` holds the tuned values of the reference
//! scene; `validate` is called once by `VisibilitySystem::new`.

use crate::error::{Error, Result};

/// Tunable thresholds of the visibility pipeline
#[derive(Debug, Clone)]
pub struct CullingConfig {
    /// Per-object movement (world units, this frame) above which a refit is requested
    pub refit_movement_threshold: f32,
    /// Movement accumulated since the last rebuild above which a rebuild is forced
    pub rebuild_movement_threshold: f32,
    /// Hard ceiling on evaluations between two rebuilds
    pub max_frames_between_rebuilds: u32,
    /// Latest quality sample / post-rebuild baseline ratio that forces a rebuild
    pub quality_degradation_ratio: f32,
    /// Number of refit dispatches per refit (each separated by a barrier)
    pub refit_iterations: u32,
    /// Consecutive zero-sample query results needed to hide an object
    pub occluded_frame_threshold: u32,
    /// Threads per compute workgroup
    pub thread_group_size: u32,
    /// Scene bounds padding, as a fraction of the largest scene extent
    pub scene_bounds_padding: f32,
    /// Seconds of velocity extrapolation added to dynamic object bounds
    pub velocity_prediction_time: f32,
    /// Extra padding per unit of the fastest object's speed
    pub velocity_padding_factor: f32,
    /// Minimum extent of the scene bounds on every axis
    pub min_scene_size: f32,
    /// Consecutive GPU build/refit/cull failures before the GPU path is disabled
    pub max_consecutive_gpu_failures: u32,
    /// Use the compute device when it supports compute
    pub prefer_gpu: bool,
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self {
            refit_movement_threshold: 0.01,
            rebuild_movement_threshold: 2.0,
            max_frames_between_rebuilds: 300,
            quality_degradation_ratio: 2.0,
            refit_iterations: 3,
            occluded_frame_threshold: 1,
            thread_group_size: 64,
            scene_bounds_padding: 0.1,
            velocity_prediction_time: 0.1,
            velocity_padding_factor: 0.2,
            min_scene_size: 1.0,
            max_consecutive_gpu_failures: 3,
            prefer_gpu: true,
        }
    }
}

impl CullingConfig {
    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("refit_movement_threshold", self.refit_movement_threshold),
            ("rebuild_movement_threshold", self.rebuild_movement_threshold),
            ("scene_bounds_padding", self.scene_bounds_padding),
            ("velocity_prediction_time", self.velocity_prediction_time),
            ("velocity_padding_factor", self.velocity_padding_factor),
            ("min_scene_size", self.min_scene_size),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{} must be finite and >= 0 (got {})", name, value
                )));
            }
        }

        if !self.quality_degradation_ratio.is_finite() || self.quality_degradation_ratio <= 1.0 {
            return Err(Error::InvalidConfig(format!(
                "quality_degradation_ratio must be finite and > 1 (got {})",
                self.quality_degradation_ratio
            )));
        }

        let non_zero = [
            ("max_frames_between_rebuilds", self.max_frames_between_rebuilds),
            ("refit_iterations", self.refit_iterations),
            ("occluded_frame_threshold", self.occluded_frame_threshold),
            ("thread_group_size", self.thread_group_size),
            ("max_consecutive_gpu_failures", self.max_consecutive_gpu_failures),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{} must be > 0", name)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
