/// Occlusion feedback: hysteresis over asynchronous occlusion query results.
///
/// The renderer issues one query per object in the order returned by
/// `OcclusionIntegrator::plan_queries` and answers polls through an
/// `OcclusionQuerySource`. Results arrive frames later; objects keep their
/// counter until a new result lands. Occlusion can only hide an object that
/// passed the frustum test, never reveal one that did not.

use std::collections::VecDeque;
use glam::Vec3;
use rustc_hash::FxHashMap;
use crate::config::CullingConfig;
use crate::scene::SceneObject;

/// Per-object occlusion query state.
///
/// Only the integrator mutates it; everything else reads it through
/// `SceneObject::occlusion()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcclusionState {
    query_in_progress: bool,
    last_result_samples: u64,
    consecutive_occluded_frames: u32,
}

impl OcclusionState {
    pub fn query_in_progress(&self) -> bool {
        self.query_in_progress
    }

    /// Sample count of the last completed query
    pub fn last_result_samples(&self) -> u64 {
        self.last_result_samples
    }

    /// Number of consecutive completed queries that reported zero samples
    pub fn consecutive_occluded_frames(&self) -> u32 {
        self.consecutive_occluded_frames
    }
}

/// Result of polling one object's query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPoll {
    NotReady,
    /// Number of samples that passed the depth test
    Ready(u64),
}

/// Non-blocking access to the renderer's occlusion queries
pub trait OcclusionQuerySource {
    fn poll(&mut self, object_index: usize) -> QueryPoll;
}

/// Query source answering from per-object scripts.
///
/// Each poll consumes the next scripted answer of the object; once the
/// script is exhausted the object's repeated answer is returned, or
/// `NotReady` when none is set.
#[derive(Debug, Default)]
pub struct ScriptedQuerySource {
    scripts: FxHashMap<usize, VecDeque<QueryPoll>>,
    repeated: FxHashMap<usize, QueryPoll>,
    polls: u64,
}

impl ScriptedQuerySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one answer to the object's script
    pub fn push(&mut self, object_index: usize, poll: QueryPoll) -> &mut Self {
        self.scripts.entry(object_index).or_default().push_back(poll);
        self
    }

    /// Append `Ready(samples)` answers to the object's script
    pub fn push_samples(&mut self, object_index: usize, samples: impl IntoIterator<Item = u64>) -> &mut Self {
        let script = self.scripts.entry(object_index).or_default();
        script.extend(samples.into_iter().map(QueryPoll::Ready));
        self
    }

    /// Answer returned for the object once its script is exhausted
    pub fn repeat(&mut self, object_index: usize, poll: QueryPoll) -> &mut Self {
        self.repeated.insert(object_index, poll);
        self
    }

    /// Number of polls answered so far
    pub fn poll_count(&self) -> u64 {
        self.polls
    }
}

impl OcclusionQuerySource for ScriptedQuerySource {
    fn poll(&mut self, object_index: usize) -> QueryPoll {
        self.polls += 1;
        if let Some(poll) = self.scripts.get_mut(&object_index).and_then(|s| s.pop_front()) {
            return poll;
        }
        self.repeated.get(&object_index).copied().unwrap_or(QueryPoll::NotReady)
    }
}

/// Outcome of one `integrate` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OcclusionReport {
    /// Queries that completed this frame
    pub results_received: usize,
    /// Frustum-visible objects hidden by occlusion
    pub hidden_by_occlusion: usize,
}

pub struct OcclusionIntegrator {
    occluded_frame_threshold: u32,
}

impl OcclusionIntegrator {
    pub fn new(config: &CullingConfig) -> Self {
        Self {
            occluded_frame_threshold: config.occluded_frame_threshold,
        }
    }

    pub fn occluded_frame_threshold(&self) -> u32 {
        self.occluded_frame_threshold
    }

    /// Fold ready query results into the counters, then set every object's
    /// final visibility from its frustum bit and counter.
    pub fn integrate(
        &self,
        objects: &mut [SceneObject],
        source: &mut dyn OcclusionQuerySource,
    ) -> OcclusionReport {
        let mut report = OcclusionReport::default();

        for object in objects.iter_mut() {
            if object.occlusion().query_in_progress {
                if let QueryPoll::Ready(samples) = source.poll(object.index()) {
                    let state = object.occlusion_mut();
                    state.query_in_progress = false;
                    state.last_result_samples = samples;
                    if samples == 0 {
                        state.consecutive_occluded_frames = state.consecutive_occluded_frames.saturating_add(1);
                    } else {
                        state.consecutive_occluded_frames = 0;
                    }
                    report.results_received += 1;
                }
            }

            let occluded = object.occlusion().consecutive_occluded_frames >= self.occluded_frame_threshold;
            let frustum_visible = object.is_frustum_visible();
            if frustum_visible && occluded {
                report.hidden_by_occlusion += 1;
            }
            object.set_visible(frustum_visible && !occluded);
        }

        if report.results_received > 0 {
            crate::engine_trace!(
                "galaxy3d::Occlusion",
                "{} query results, {} objects hidden",
                report.results_received, report.hidden_by_occlusion
            );
        }
        report
    }

    /// Objects to query this frame, nearest first.
    ///
    /// Candidates are frustum-visible objects without a query in flight;
    /// each returned object is marked in progress. Queries of objects that
    /// left the frustum are abandoned, their counter is kept.
    pub fn plan_queries(&self, objects: &mut [SceneObject], eye: Vec3) -> Vec<usize> {
        let mut candidates: Vec<(f32, usize)> = Vec::new();

        for (position, object) in objects.iter_mut().enumerate() {
            if !object.is_frustum_visible() {
                object.occlusion_mut().query_in_progress = false;
                continue;
            }
            if object.occlusion().query_in_progress {
                continue;
            }
            candidates.push((eye.distance_squared(object.aabb().center()), position));
        }

        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        candidates
            .into_iter()
            .map(|(_, position)| {
                let object = &mut objects[position];
                object.occlusion_mut().query_in_progress = true;
                object.index()
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "occlusion_tests.rs"]
mod tests;
