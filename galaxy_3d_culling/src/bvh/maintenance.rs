/// Hierarchy maintenance policy.
///
/// Decides once per frame whether the hierarchy is rebuilt, refitted or
/// left alone. Checks run in a fixed priority order, so a given sequence
/// of motion reports always produces the same sequence of decisions.

use crate::config::CullingConfig;
use crate::scene::MotionReport;

/// Why a full rebuild was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    /// No valid hierarchy yet, or the previous refit/build failed
    Mandatory,
    /// `max_frames_between_rebuilds` evaluations since the last rebuild
    FrameCeiling,
    /// Movement accumulated since the last rebuild exceeded the threshold
    CumulativeMovement,
    /// Quality sample degraded past `quality_degradation_ratio` x baseline
    QualityDegraded,
    /// A dynamic object's bounds turned invalid, or valid again
    BoundsValidity,
}

/// Decision for the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceAction {
    Rebuild(RebuildReason),
    Refit,
    None,
}

/// Stateful rebuild/refit policy
#[derive(Debug, Clone)]
pub struct MaintenancePolicy {
    refit_movement_threshold: f32,
    rebuild_movement_threshold: f32,
    max_frames_between_rebuilds: u32,
    quality_degradation_ratio: f32,

    mandatory_rebuild: bool,
    frames_since_rebuild: u32,
    accumulated_movement: f32,
    quality_baseline: Option<f32>,
    latest_quality: Option<f32>,
}

impl MaintenancePolicy {
    /// New policy; the first evaluation always requests a mandatory rebuild
    pub fn new(config: &CullingConfig) -> Self {
        Self {
            refit_movement_threshold: config.refit_movement_threshold,
            rebuild_movement_threshold: config.rebuild_movement_threshold,
            max_frames_between_rebuilds: config.max_frames_between_rebuilds,
            quality_degradation_ratio: config.quality_degradation_ratio,
            mandatory_rebuild: true,
            frames_since_rebuild: 0,
            accumulated_movement: 0.0,
            quality_baseline: None,
            latest_quality: None,
        }
    }

    /// Decide this frame's action from the tracker's report
    pub fn evaluate(&mut self, report: &MotionReport) -> MaintenanceAction {
        self.frames_since_rebuild = self.frames_since_rebuild.saturating_add(1);
        if report.total_movement.is_finite() {
            self.accumulated_movement += report.total_movement;
        }

        if self.mandatory_rebuild {
            return MaintenanceAction::Rebuild(RebuildReason::Mandatory);
        }

        // No movement is measured across an invalid position
        if report.validity_changes > 0 {
            return MaintenanceAction::Rebuild(RebuildReason::BoundsValidity);
        }

        if self.frames_since_rebuild >= self.max_frames_between_rebuilds {
            return MaintenanceAction::Rebuild(RebuildReason::FrameCeiling);
        }

        if self.accumulated_movement > self.rebuild_movement_threshold {
            return MaintenanceAction::Rebuild(RebuildReason::CumulativeMovement);
        }

        if let (Some(baseline), Some(latest)) = (self.quality_baseline, self.latest_quality) {
            if baseline > 0.0 && latest / baseline > self.quality_degradation_ratio {
                return MaintenanceAction::Rebuild(RebuildReason::QualityDegraded);
            }
        }

        if report.max_object_movement > self.refit_movement_threshold {
            return MaintenanceAction::Refit;
        }

        MaintenanceAction::None
    }

    /// A rebuild completed. Resets the frame counter and the movement total;
    /// `quality` (when known) becomes the new baseline.
    pub fn record_rebuild(&mut self, quality: Option<f32>) {
        self.mandatory_rebuild = false;
        self.frames_since_rebuild = 0;
        self.accumulated_movement = 0.0;
        self.quality_baseline = quality.filter(|q| q.is_finite());
        self.latest_quality = None;
    }

    /// Store a quality sample of the current hierarchy. The first sample
    /// after a rebuild without a known quality becomes the baseline.
    pub fn record_quality(&mut self, sample: f32) {
        if !sample.is_finite() {
            return;
        }
        if self.quality_baseline.is_none() {
            self.quality_baseline = Some(sample);
        }
        self.latest_quality = Some(sample);
    }

    /// A refit (or build) failed: the tree may be stale, rebuild next frame
    pub fn record_refit_failure(&mut self) {
        self.mandatory_rebuild = true;
    }

    pub fn needs_mandatory_rebuild(&self) -> bool {
        self.mandatory_rebuild
    }

    pub fn frames_since_rebuild(&self) -> u32 {
        self.frames_since_rebuild
    }

    pub fn accumulated_movement(&self) -> f32 {
        self.accumulated_movement
    }

    pub fn quality_baseline(&self) -> Option<f32> {
        self.quality_baseline
    }
}

#[cfg(test)]
#[path = "maintenance_tests.rs"]
mod tests;
