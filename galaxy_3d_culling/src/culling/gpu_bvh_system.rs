/// GPU hierarchy: LBVH build, iterative refit and frustum cull through a
/// `ComputeDevice`.
///
/// Every stage locks the device once, records its uploads and dispatches
/// and returns. Results come back through readback buffers that are polled
/// without waiting:
/// - visibility of frame `f` is applied at the start of the cull of a later
///   frame (one frame late with the usual latency)
/// - the node buffer is copied after a build/refit for quality samples
///
/// A staging buffer holds one copy in flight at a time. While a copy is
/// pending no new one is scheduled, so with a latency of `L` frames a
/// result lands every `L` frames instead of never.
///
/// The only stall is the Morton sort placeholder, which reads the code
/// buffer back, sorts it on the CPU and uploads it again.

use std::mem::size_of;
use std::sync::MutexGuard;
use crate::bvh::morton;
use crate::camera::Frustum;
use crate::compute::{
    BufferKey, BuildParams, ComputeBufferDesc, ComputeBufferUsage, ComputeDevice, CullParams,
    GpuFrustum, GpuMortonCode, GpuNode, GpuObject, KernelDesc, KernelKey, KernelKind,
    SharedComputeDevice,
};
use crate::config::CullingConfig;
use crate::error::{Error, Result};
use crate::scene::{SceneBounds, SceneObject};
use crate::{engine_bail, engine_err};

struct GpuBuffers {
    build_params: BufferKey,
    cull_params: BufferKey,
    frustum: BufferKey,
    objects: BufferKey,
    codes: BufferKey,
    nodes: BufferKey,
    counters: BufferKey,
    visibility: BufferKey,
    visibility_staging: BufferKey,
    node_staging: BufferKey,
}

impl GpuBuffers {
    fn all(&self) -> [BufferKey; 10] {
        [
            self.build_params,
            self.cull_params,
            self.frustum,
            self.objects,
            self.codes,
            self.nodes,
            self.counters,
            self.visibility,
            self.visibility_staging,
            self.node_staging,
        ]
    }
}

struct GpuKernels {
    morton_codes: KernelKey,
    build_internal_nodes: KernelKey,
    build_leaves: KernelKey,
    compute_bounds: KernelKey,
    refit: KernelKey,
    frustum_cull: KernelKey,
}

/// Outcome of one GPU cull
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuCullOutcome {
    /// A previous frame's visibility landed and was applied
    pub results_applied: bool,
    /// Objects whose frustum bit is set after this call
    pub frustum_visible: usize,
}

pub struct GpuBvhSystem {
    device: SharedComputeDevice,
    object_count: usize,
    workgroup_size: u32,
    refit_iterations: u32,
    buffers: GpuBuffers,
    kernels: GpuKernels,
    built: bool,
    visibility_pending: bool,
    /// Incremented by every build
    tree_generation: u64,
    /// Tree generation of the node copy in flight
    node_sample: Option<u64>,
}

impl GpuBvhSystem {
    /// Create every buffer and kernel for `object_count` objects.
    ///
    /// Fails with `Error::Unsupported` when the device has no compute
    /// support; buffers created before a failure are released.
    pub fn new(device: SharedComputeDevice, object_count: usize, config: &CullingConfig) -> Result<Self> {
        let workgroup_size = config.thread_group_size.max(1);
        let (buffers, kernels) = {
            let mut guard = lock(&device)?;
            if !guard.supports_compute() {
                return Err(Error::Unsupported("compute shaders".to_string()));
            }

            let mut created = Vec::new();
            let result = create_buffers(&mut *guard, object_count, &mut created)
                .and_then(|buffers| create_kernels(&mut *guard, workgroup_size).map(|k| (buffers, k)));
            if result.is_err() {
                for key in created {
                    let _ = guard.destroy_buffer(key);
                }
            }
            result?
        };

        crate::engine_info!(
            "galaxy3d::GpuBvh",
            "GPU hierarchy ready: {} objects, workgroup size {}",
            object_count, workgroup_size
        );

        Ok(Self {
            device,
            object_count,
            workgroup_size,
            refit_iterations: config.refit_iterations.max(1),
            buffers,
            kernels,
            built: false,
            visibility_pending: false,
            tree_generation: 0,
            node_sample: None,
        })
    }

    pub fn object_count(&self) -> usize {
        self.object_count
    }

    /// Whether the node buffer holds a complete tree
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Forget the device tree (the next maintenance must be a rebuild)
    pub fn invalidate(&mut self) {
        self.built = false;
    }

    /// Ignore the visibility copy still in flight (the frame was culled
    /// elsewhere); the next cull schedules a fresh one
    pub fn discard_pending_visibility(&mut self) {
        self.visibility_pending = false;
    }

    fn groups(&self, threads: usize) -> u32 {
        threads.div_ceil(self.workgroup_size as usize) as u32
    }

    fn check_object_count(&self, objects: &[SceneObject]) -> Result<()> {
        if objects.len() != self.object_count {
            return Err(Error::InvalidResource(format!(
                "GPU hierarchy sized for {} objects, got {}",
                self.object_count, objects.len()
            )));
        }
        Ok(())
    }

    /// Full LBVH rebuild over the objects' current boxes
    pub fn build(&mut self, objects: &[SceneObject], bounds: &SceneBounds) -> Result<()> {
        self.check_object_count(objects)?;
        self.built = false;
        self.tree_generation += 1;
        let n = self.object_count;
        if n == 0 {
            self.built = true;
            return Ok(());
        }

        let params = BuildParams::new(n as u32, bounds);
        let gpu_objects = gpu_objects(objects);
        let b = &self.buffers;
        let k = &self.kernels;
        let object_groups = self.groups(n);

        let mut device = lock(&self.device)?;
        device.write_buffer(b.build_params, 0, bytemuck::bytes_of(&params))?;
        device.write_buffer(b.objects, 0, bytemuck::cast_slice(&gpu_objects))?;

        device.dispatch(k.morton_codes, &[b.build_params, b.objects, b.codes], object_groups)?;
        device.barrier();

        // Sort placeholder: stall, sort on the CPU, upload
        let bytes = device.read_blocking(b.codes)?;
        let mut codes: Vec<GpuMortonCode> = decode(&bytes, n)?;
        morton::sort_morton_codes(&mut codes);
        device.write_buffer(b.codes, 0, bytemuck::cast_slice(&codes))?;

        device.dispatch(k.build_internal_nodes, &[b.build_params, b.codes, b.nodes], self.groups(n - 1))?;
        device.dispatch(k.build_leaves, &[b.build_params, b.codes, b.objects, b.nodes], object_groups)?;
        device.barrier();

        if n > 1 {
            let zeros = vec![0u32; n - 1];
            device.write_buffer(b.counters, 0, bytemuck::cast_slice(&zeros))?;
        }
        device.dispatch(k.compute_bounds, &[b.build_params, b.nodes, b.counters], object_groups)?;
        device.barrier();

        // A copy of the previous tree still in flight is dropped on arrival
        // and replaced by a copy of this one
        if self.node_sample.is_none() {
            device.copy_to_readback(b.nodes, b.node_staging)?;
            self.node_sample = Some(self.tree_generation);
        }
        drop(device);

        self.built = true;
        crate::engine_debug!("galaxy3d::GpuBvh", "LBVH rebuilt over {} objects", n);
        Ok(())
    }

    /// `refit_iterations` relaxation passes over all nodes with the
    /// objects' current boxes
    pub fn refit(&mut self, objects: &[SceneObject]) -> Result<()> {
        self.check_object_count(objects)?;
        if !self.built {
            engine_bail!("galaxy3d::GpuBvh", "Refit requested before any build");
        }
        let n = self.object_count;
        if n == 0 {
            return Ok(());
        }

        let gpu_objects = gpu_objects(objects);
        let b = &self.buffers;
        let node_groups = self.groups(2 * n - 1);

        let mut device = lock(&self.device)?;
        device.write_buffer(b.objects, 0, bytemuck::cast_slice(&gpu_objects))?;
        for _ in 0..self.refit_iterations {
            device.dispatch(self.kernels.refit, &[b.build_params, b.objects, b.nodes], node_groups)?;
            device.barrier();
        }
        if self.node_sample.is_none() {
            device.copy_to_readback(b.nodes, b.node_staging)?;
            self.node_sample = Some(self.tree_generation);
        }
        Ok(())
    }

    /// Apply any landed visibility from a previous frame, then dispatch
    /// this frame's cull.
    ///
    /// Objects keep their previous frustum bit until a result lands. While
    /// the previous result is still in flight nothing is dispatched.
    pub fn cull(&mut self, objects: &mut [SceneObject], frustum: &Frustum) -> Result<GpuCullOutcome> {
        self.check_object_count(objects)?;
        let n = self.object_count;
        let b = &self.buffers;
        let mut outcome = GpuCullOutcome::default();

        let mut device = lock(&self.device)?;

        if self.visibility_pending {
            if let Some(bytes) = device.try_read(b.visibility_staging)? {
                let visibility: Vec<u32> = decode(&bytes, n)?;
                for (object, flag) in objects.iter_mut().zip(visibility) {
                    object.set_frustum_visible(flag != 0);
                }
                self.visibility_pending = false;
                outcome.results_applied = true;
            }
        }
        outcome.frustum_visible = objects.iter().filter(|o| o.is_frustum_visible()).count();

        if n == 0 {
            return Ok(outcome);
        }
        if !self.built {
            return Err(engine_err!("galaxy3d::GpuBvh", "Cull requested before any build"));
        }
        if self.visibility_pending {
            return Ok(outcome);
        }

        let params = CullParams {
            object_count: n as u32,
            node_count: (2 * n - 1) as u32,
            root_index: 0,
            _pad: 0,
        };
        device.write_buffer(b.frustum, 0, bytemuck::bytes_of(&GpuFrustum::new(frustum)))?;
        device.write_buffer(b.cull_params, 0, bytemuck::bytes_of(&params))?;
        device.dispatch(
            self.kernels.frustum_cull,
            &[b.cull_params, b.frustum, b.nodes, b.visibility],
            self.groups(n),
        )?;
        device.barrier();
        device.copy_to_readback(b.visibility, b.visibility_staging)?;
        drop(device);

        self.visibility_pending = true;
        Ok(outcome)
    }

    /// Surface area cost of the node buffer copy scheduled by a
    /// build/refit, once it has landed.
    ///
    /// A copy taken from a tree that has been rebuilt since is dropped and
    /// a copy of the current tree is scheduled instead.
    pub fn poll_quality(&mut self) -> Result<Option<f32>> {
        let Some(generation) = self.node_sample else {
            return Ok(None);
        };
        if self.object_count == 0 {
            return Ok(None);
        }
        let node_count = 2 * self.object_count - 1;

        let mut device = lock(&self.device)?;
        let Some(bytes) = device.try_read(self.buffers.node_staging)? else {
            return Ok(None);
        };
        self.node_sample = None;

        if generation != self.tree_generation {
            if self.built {
                device.copy_to_readback(self.buffers.nodes, self.buffers.node_staging)?;
                self.node_sample = Some(self.tree_generation);
            }
            return Ok(None);
        }
        drop(device);

        let nodes: Vec<GpuNode> = decode(&bytes, node_count)?;
        let cost = nodes
            .iter()
            .filter(|node| node.is_leaf == 0)
            .map(|node| node.aabb().surface_area())
            .sum();
        Ok(Some(cost))
    }
}

impl Drop for GpuBvhSystem {
    fn drop(&mut self) {
        if let Ok(mut device) = self.device.lock() {
            for key in self.buffers.all() {
                let _ = device.destroy_buffer(key);
            }
        }
    }
}

fn lock(device: &SharedComputeDevice) -> Result<MutexGuard<'_, dyn ComputeDevice + 'static>> {
    device
        .lock()
        .map_err(|_| engine_err!("galaxy3d::GpuBvh", "Compute device lock poisoned"))
}

/// First `count` records of a readback
fn decode<T: bytemuck::AnyBitPattern + bytemuck::NoUninit>(bytes: &[u8], count: usize) -> Result<Vec<T>> {
    let len = count * size_of::<T>();
    match bytes.get(..len) {
        Some(data) => Ok(bytemuck::pod_collect_to_vec(data)),
        None => Err(engine_err!(
            "galaxy3d::GpuBvh",
            "Readback holds {} bytes, {} expected",
            bytes.len(), len
        )),
    }
}

fn gpu_objects(objects: &[SceneObject]) -> Vec<GpuObject> {
    objects
        .iter()
        .enumerate()
        .map(|(i, object)| GpuObject::new(object.aabb(), i as u32))
        .collect()
}

fn create_buffers(
    device: &mut dyn ComputeDevice,
    object_count: usize,
    created: &mut Vec<BufferKey>,
) -> Result<GpuBuffers> {
    let n = object_count;
    let node_count = (2 * n).saturating_sub(1);
    let mut create = |name: &str, count: usize, stride: usize, usage: ComputeBufferUsage| -> Result<BufferKey> {
        let desc = ComputeBufferDesc {
            name: format!("bvh_{}", name),
            size: (count.max(1) * stride) as u64,
            usage,
        };
        let key = device.create_buffer(&desc)?;
        created.push(key);
        Ok(key)
    };

    use ComputeBufferUsage::{Readback, Storage, Uniform};
    Ok(GpuBuffers {
        build_params: create("build_params", 1, size_of::<BuildParams>(), Uniform)?,
        cull_params: create("cull_params", 1, size_of::<CullParams>(), Uniform)?,
        frustum: create("frustum", 1, size_of::<GpuFrustum>(), Uniform)?,
        objects: create("objects", n, size_of::<GpuObject>(), Storage)?,
        codes: create("morton_codes", n, size_of::<GpuMortonCode>(), Storage)?,
        nodes: create("nodes", node_count, size_of::<GpuNode>(), Storage)?,
        counters: create("counters", n.saturating_sub(1), size_of::<u32>(), Storage)?,
        visibility: create("visibility", n, size_of::<u32>(), Storage)?,
        visibility_staging: create("visibility_staging", n, size_of::<u32>(), Readback)?,
        node_staging: create("node_staging", node_count, size_of::<GpuNode>(), Readback)?,
    })
}

fn create_kernels(device: &mut dyn ComputeDevice, workgroup_size: u32) -> Result<GpuKernels> {
    let mut create = |kind: KernelKind| device.create_kernel(&KernelDesc { kind, workgroup_size });
    Ok(GpuKernels {
        morton_codes: create(KernelKind::MortonCodes)?,
        build_internal_nodes: create(KernelKind::BuildInternalNodes)?,
        build_leaves: create(KernelKind::BuildLeaves)?,
        compute_bounds: create(KernelKind::ComputeBounds)?,
        refit: create(KernelKind::Refit)?,
        frustum_cull: create(KernelKind::FrustumCull)?,
    })
}

#[cfg(test)]
#[path = "gpu_bvh_system_tests.rs"]
mod tests;
