//! Galaxy3D culling demo
//!
//! Runs the visibility pipeline headless on a small scene: a 3x3 grid of
//! static cubes and three cubes orbiting behind it, seen by a camera that
//! pans left and right. The scene is run twice, once on the software
//! compute device (GPU path) and once with compute disabled (CPU path).
//!
//! Set RUST_LOG=debug to see per-frame maintenance decisions.

use galaxy_3d_culling::galaxy3d::bvh::MaintenanceAction;
use galaxy_3d_culling::galaxy3d::compute::{DeviceFaults, SharedComputeDevice, SoftwareComputeDevice};
use galaxy_3d_culling::galaxy3d::culling::{OcclusionQuerySource, QueryPoll};
use galaxy_3d_culling::galaxy3d::log::{LogEntry, LogSeverity, Logger};
use galaxy_3d_culling::galaxy3d::scene::{Motion, SceneObject, AABB};
use galaxy_3d_culling::galaxy3d::{CullingConfig, Engine, ExecutionPath, Result, VisibilitySystem};
use glam::{Mat4, Vec3};
use std::sync::{Arc, Mutex};

const FRAMES: u64 = 600;
const DT: f32 = 1.0 / 60.0;

/// Forwards engine logs to the `log` crate (env_logger backend)
struct LogForwarder;

impl Logger for LogForwarder {
    fn log(&self, entry: &LogEntry) {
        let level = match entry.severity {
            LogSeverity::Trace => log::Level::Trace,
            LogSeverity::Debug => log::Level::Debug,
            LogSeverity::Info => log::Level::Info,
            LogSeverity::Warn => log::Level::Warn,
            LogSeverity::Error => log::Level::Error,
        };
        match (entry.file, entry.line) {
            (Some(file), Some(line)) => {
                log::log!(target: entry.source.as_str(), level, "{} ({}:{})", entry.message, file, line)
            }
            _ => log::log!(target: entry.source.as_str(), level, "{}", entry.message),
        }
    }
}

/// Answers occlusion queries from the previous frame's geometry: an object
/// is occluded when the line from the eye to its center crosses a static
/// cube first.
struct LineOfSightQueries {
    occluded: Vec<bool>,
}

impl LineOfSightQueries {
    fn new() -> Self {
        Self { occluded: Vec::new() }
    }

    fn refresh(&mut self, objects: &[SceneObject], eye: Vec3) {
        self.occluded = objects
            .iter()
            .map(|target| {
                let center = target.position();
                objects.iter().any(|other| {
                    other.index() != target.index()
                        && !other.is_dynamic()
                        && segment_hits(eye, center, other.aabb())
                })
            })
            .collect();
    }
}

impl OcclusionQuerySource for LineOfSightQueries {
    fn poll(&mut self, object_index: usize) -> QueryPoll {
        match self.occluded.get(object_index) {
            Some(true) => QueryPoll::Ready(0),
            Some(false) => QueryPoll::Ready(4096),
            None => QueryPoll::NotReady,
        }
    }
}

/// Slab test of the segment `from -> to` against `aabb`
fn segment_hits(from: Vec3, to: Vec3, aabb: &AABB) -> bool {
    let direction = to - from;
    let mut t_min = 0.0_f32;
    let mut t_max = 1.0_f32;
    for axis in 0..3 {
        let (origin, dir) = (from[axis], direction[axis]);
        let (lo, hi) = (aabb.min[axis], aabb.max[axis]);
        if dir.abs() < f32::EPSILON {
            if origin < lo || origin > hi {
                return false;
            }
            continue;
        }
        let (t0, t1) = ((lo - origin) / dir, (hi - origin) / dir);
        t_min = t_min.max(t0.min(t1));
        t_max = t_max.min(t0.max(t1));
        if t_min > t_max {
            return false;
        }
    }
    true
}

fn demo_objects() -> Vec<SceneObject> {
    let mut objects = Vec::new();
    for y in [-2.0, 0.0, 2.0] {
        for x in [-4.0, 0.0, 4.0] {
            objects.push(SceneObject::new_static(Vec3::new(x, y, 10.0), 2.0));
        }
    }
    for (center, radius, start) in [
        (Vec3::new(-8.0, 0.0, 15.0), 3.0, 0.0),
        (Vec3::new(8.0, 0.0, 15.0), 4.0, 1.57),
        (Vec3::new(0.0, 4.0, 12.0), 2.5, 3.14),
    ] {
        objects.push(SceneObject::new_dynamic(center, 1.5, Motion::orbit(center, radius, start)));
    }
    objects
}

fn camera(frame: u64) -> (Vec3, Mat4) {
    let eye = Vec3::new(((frame as f32) * 0.02).sin() * 6.0, 0.0, 0.0);
    let projection = Mat4::perspective_rh(0.8, 16.0 / 9.0, 0.1, 100.0);
    let view = Mat4::look_at_rh(eye, eye + Vec3::Z, Vec3::Y);
    (eye, projection * view)
}

/// Aggregates of one run
#[derive(Default)]
struct RunSummary {
    rebuilds: u32,
    refits: u32,
    fallbacks: u32,
    gpu_frames: u32,
    visible_total: u64,
    hidden_by_occlusion: u64,
}

fn run(label: &str, device: Option<SharedComputeDevice>) -> Result<RunSummary> {
    let mut system = VisibilitySystem::new(demo_objects(), CullingConfig::default(), device)?;
    let mut queries = LineOfSightQueries::new();
    let mut summary = RunSummary::default();

    log::info!("[{}] starting on the {:?} path", label, system.execution_path());

    for frame in 0..FRAMES {
        let (eye, view_projection) = camera(frame);
        queries.refresh(system.objects(), eye);
        let stats = system.run_frame(DT, &view_projection, &mut queries);
        system.plan_queries(eye);

        match stats.action {
            MaintenanceAction::Rebuild(_) => summary.rebuilds += 1,
            MaintenanceAction::Refit => summary.refits += 1,
            MaintenanceAction::None => {}
        }
        if stats.fallback {
            summary.fallbacks += 1;
        }
        if stats.path == ExecutionPath::Gpu {
            summary.gpu_frames += 1;
        }
        summary.visible_total += stats.visible as u64;
        summary.hidden_by_occlusion += stats.occlusion.hidden_by_occlusion as u64;

        if frame % 120 == 0 {
            log::info!(
                "[{}] frame {}: {}/{} visible, {} in frustum, {:?}",
                label, stats.frame, stats.visible, stats.object_count, stats.frustum_visible, stats.action
            );
        }
    }

    log::info!(
        "[{}] {} frames: {} rebuilds, {} refits, {} GPU frames, {} fallbacks, {:.2} visible/frame, {} occlusion hides",
        label,
        FRAMES,
        summary.rebuilds,
        summary.refits,
        summary.gpu_frames,
        summary.fallbacks,
        summary.visible_total as f64 / FRAMES as f64,
        summary.hidden_by_occlusion
    );
    Ok(summary)
}

fn shared(device: SoftwareComputeDevice) -> (Arc<Mutex<SoftwareComputeDevice>>, SharedComputeDevice) {
    let typed = Arc::new(Mutex::new(device));
    let shared: SharedComputeDevice = typed.clone();
    (typed, shared)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    Engine::set_logger(LogForwarder);

    let (gpu_device, gpu_shared) = shared(SoftwareComputeDevice::new());
    if let Err(e) = run("software compute", Some(gpu_shared)) {
        log::error!("Software compute run failed: {}", e);
        std::process::exit(1);
    }
    if let Ok(device) = gpu_device.lock() {
        let stats = device.stats();
        log::info!(
            "Device: {} dispatches, {} barriers, {} bytes uploaded, {} readbacks",
            stats.dispatches, stats.barriers, stats.bytes_uploaded, stats.readbacks_completed
        );
    }

    let (_, cpu_shared) = shared(SoftwareComputeDevice::new().with_faults(DeviceFaults::NO_COMPUTE));
    if let Err(e) = run("no compute", Some(cpu_shared)) {
        log::error!("CPU run failed: {}", e);
        std::process::exit(1);
    }
}
