/// SoftwareComputeDevice: ComputeDevice executed on the CPU.
///
/// Runs the kernel thread functions of `compute::kernels` with GPU
/// semantics the culling core has to cope with:
/// - threads of a dispatch run in a configurable order (`DispatchOrder`)
/// - readback copies become readable only `readback_latency` submitted
///   frames after they were scheduled
/// - failures can be injected per capability (`DeviceFaults`) or per kernel
///
/// Buffers are plain byte vectors; kernels decode them with bytemuck at
/// dispatch time and write the results back.

use bitflags::bitflags;
use bytemuck::{AnyBitPattern, NoUninit};
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::SlotMap;
use crate::compute::compute_device::{
    BufferKey, ComputeBufferDesc, ComputeBufferUsage, ComputeDevice, KernelDesc, KernelKey, KernelKind,
};
use crate::compute::kernels::{
    self, BuildParams, CullParams, GpuFrustum, GpuMortonCode, GpuNode, GpuObject,
};
use crate::error::{Error, Result};
use crate::{engine_bail, engine_err};

bitflags! {
    /// Injectable device failures
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceFaults: u32 {
        /// `supports_compute` reports false, dispatches fail
        const NO_COMPUTE      = 1 << 0;
        /// `create_buffer` fails with OutOfMemory
        const BUFFER_CREATION = 1 << 1;
        /// `create_kernel` fails
        const KERNEL_CREATION = 1 << 2;
        /// Every dispatch fails
        const DISPATCH        = 1 << 3;
        /// `try_read` fails
        const READBACK        = 1 << 4;
    }
}

/// Order in which the threads of a dispatch are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchOrder {
    #[default]
    Forward,
    Reverse,
}

/// Counters for tests and diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftwareDeviceStats {
    pub dispatches: u64,
    pub barriers: u64,
    pub bytes_uploaded: u64,
    pub readbacks_completed: u64,
}

struct SoftwareBuffer {
    name: String,
    usage: ComputeBufferUsage,
    data: Vec<u8>,
}

struct SoftwareKernel {
    kind: KernelKind,
    workgroup_size: u32,
}

struct PendingReadback {
    data: Vec<u8>,
    ready_frame: u64,
}

pub struct SoftwareComputeDevice {
    buffers: SlotMap<BufferKey, SoftwareBuffer>,
    kernels: SlotMap<KernelKey, SoftwareKernel>,
    pending_readbacks: FxHashMap<BufferKey, PendingReadback>,
    failing_kernels: FxHashSet<KernelKind>,
    frame: u64,
    readback_latency: u64,
    dispatch_order: DispatchOrder,
    faults: DeviceFaults,
    stats: SoftwareDeviceStats,
}

impl SoftwareComputeDevice {
    /// Device with one frame of readback latency, forward dispatch order
    /// and no faults
    pub fn new() -> Self {
        Self {
            buffers: SlotMap::with_key(),
            kernels: SlotMap::with_key(),
            pending_readbacks: FxHashMap::default(),
            failing_kernels: FxHashSet::default(),
            frame: 0,
            readback_latency: 1,
            dispatch_order: DispatchOrder::Forward,
            faults: DeviceFaults::empty(),
            stats: SoftwareDeviceStats::default(),
        }
    }

    pub fn with_readback_latency(mut self, frames: u64) -> Self {
        self.readback_latency = frames;
        self
    }

    pub fn with_dispatch_order(mut self, order: DispatchOrder) -> Self {
        self.dispatch_order = order;
        self
    }

    pub fn with_faults(mut self, faults: DeviceFaults) -> Self {
        self.faults = faults;
        self
    }

    pub fn set_faults(&mut self, faults: DeviceFaults) {
        self.faults = faults;
    }

    pub fn faults(&self) -> DeviceFaults {
        self.faults
    }

    /// Make every dispatch of `kind` fail (or succeed again)
    pub fn set_kernel_failure(&mut self, kind: KernelKind, failing: bool) {
        if failing {
            self.failing_kernels.insert(kind);
        } else {
            self.failing_kernels.remove(&kind);
        }
    }

    pub fn set_dispatch_order(&mut self, order: DispatchOrder) {
        self.dispatch_order = order;
    }

    /// Number of submitted frames
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn stats(&self) -> SoftwareDeviceStats {
        self.stats
    }

    /// Blocking copy of a buffer's current content (tests and tools only)
    pub fn read_buffer_now(&self, buffer: BufferKey) -> Result<Vec<u8>> {
        self.buffers
            .get(buffer)
            .map(|b| b.data.clone())
            .ok_or_else(|| Error::InvalidResource(format!("Buffer {:?} not found", buffer)))
    }

    // ===== DECODING HELPERS =====

    fn buffer(&self, key: BufferKey) -> Result<&SoftwareBuffer> {
        self.buffers
            .get(key)
            .ok_or_else(|| engine_err!("galaxy3d::SoftwareDevice", "Buffer {:?} not found", key))
    }

    fn read_array<T: AnyBitPattern + NoUninit>(&self, key: BufferKey) -> Result<Vec<T>> {
        let data = &self.buffer(key)?.data;
        let whole = data.len() - data.len() % std::mem::size_of::<T>();
        Ok(bytemuck::pod_collect_to_vec(&data[..whole]))
    }

    fn read_value<T: AnyBitPattern>(&self, key: BufferKey) -> Result<T> {
        let buffer = self.buffer(key)?;
        let size = std::mem::size_of::<T>();
        if buffer.data.len() < size {
            engine_bail!(
                "galaxy3d::SoftwareDevice",
                "Buffer '{}' holds {} bytes, {} required",
                buffer.name, buffer.data.len(), size
            );
        }
        bytemuck::try_pod_read_unaligned(&buffer.data[..size])
            .map_err(|e| engine_err!("galaxy3d::SoftwareDevice", "Cannot decode '{}': {:?}", buffer.name, e))
    }

    fn store_array<T: NoUninit>(&mut self, key: BufferKey, values: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let buffer = self
            .buffers
            .get_mut(key)
            .ok_or_else(|| engine_err!("galaxy3d::SoftwareDevice", "Buffer {:?} not found", key))?;
        buffer.data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn thread_ids(&self, count: u32) -> Box<dyn Iterator<Item = u32>> {
        match self.dispatch_order {
            DispatchOrder::Forward => Box::new(0..count),
            DispatchOrder::Reverse => Box::new((0..count).rev()),
        }
    }

    fn run_kernel(&mut self, kind: KernelKind, b: &[BufferKey], threads: u32) -> Result<()> {
        match kind {
            KernelKind::MortonCodes => {
                let params: BuildParams = self.read_value(b[0])?;
                let objects: Vec<GpuObject> = self.read_array(b[1])?;
                let mut codes: Vec<GpuMortonCode> = self.read_array(b[2])?;
                for tid in self.thread_ids(threads) {
                    kernels::morton_codes_thread(tid, &params, &objects, &mut codes);
                }
                self.store_array(b[2], &codes)
            }
            KernelKind::BuildInternalNodes => {
                let params: BuildParams = self.read_value(b[0])?;
                let codes: Vec<GpuMortonCode> = self.read_array(b[1])?;
                let mut nodes: Vec<GpuNode> = self.read_array(b[2])?;
                for tid in self.thread_ids(threads) {
                    kernels::build_internal_nodes_thread(tid, &params, &codes, &mut nodes);
                }
                self.store_array(b[2], &nodes)
            }
            KernelKind::BuildLeaves => {
                let params: BuildParams = self.read_value(b[0])?;
                let codes: Vec<GpuMortonCode> = self.read_array(b[1])?;
                let objects: Vec<GpuObject> = self.read_array(b[2])?;
                let mut nodes: Vec<GpuNode> = self.read_array(b[3])?;
                for tid in self.thread_ids(threads) {
                    kernels::build_leaves_thread(tid, &params, &codes, &objects, &mut nodes);
                }
                self.store_array(b[3], &nodes)
            }
            KernelKind::ComputeBounds => {
                let params: BuildParams = self.read_value(b[0])?;
                let mut nodes: Vec<GpuNode> = self.read_array(b[1])?;
                let mut counters: Vec<u32> = self.read_array(b[2])?;
                for tid in self.thread_ids(threads) {
                    kernels::compute_bounds_thread(tid, &params, &mut nodes, &mut counters);
                }
                self.store_array(b[1], &nodes)?;
                self.store_array(b[2], &counters)
            }
            KernelKind::Refit => {
                let params: BuildParams = self.read_value(b[0])?;
                let objects: Vec<GpuObject> = self.read_array(b[1])?;
                let mut nodes: Vec<GpuNode> = self.read_array(b[2])?;
                for tid in self.thread_ids(threads) {
                    kernels::refit_thread(tid, &params, &objects, &mut nodes);
                }
                self.store_array(b[2], &nodes)
            }
            KernelKind::FrustumCull => {
                let params: CullParams = self.read_value(b[0])?;
                let frustum: GpuFrustum = self.read_value(b[1])?;
                let nodes: Vec<GpuNode> = self.read_array(b[2])?;
                let mut visibility: Vec<u32> = self.read_array(b[3])?;
                for tid in self.thread_ids(threads) {
                    kernels::frustum_cull_thread(tid, &params, &frustum, &nodes, &mut visibility);
                }
                self.store_array(b[3], &visibility)
            }
        }
    }
}

impl Default for SoftwareComputeDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeDevice for SoftwareComputeDevice {
    fn supports_compute(&self) -> bool {
        !self.faults.contains(DeviceFaults::NO_COMPUTE)
    }

    fn create_buffer(&mut self, desc: &ComputeBufferDesc) -> Result<BufferKey> {
        if self.faults.contains(DeviceFaults::BUFFER_CREATION) {
            crate::engine_error!(
                "galaxy3d::SoftwareDevice",
                "Out of memory creating buffer '{}' ({} bytes)",
                desc.name, desc.size
            );
            return Err(Error::OutOfMemory);
        }
        if desc.size == 0 {
            engine_bail!("galaxy3d::SoftwareDevice", "Buffer '{}' has zero size", desc.name);
        }

        let key = self.buffers.insert(SoftwareBuffer {
            name: desc.name.clone(),
            usage: desc.usage,
            data: vec![0u8; desc.size as usize],
        });
        crate::engine_trace!(
            "galaxy3d::SoftwareDevice",
            "Created {:?} buffer '{}' ({} bytes)",
            desc.usage, desc.name, desc.size
        );
        Ok(key)
    }

    fn destroy_buffer(&mut self, buffer: BufferKey) -> Result<()> {
        self.pending_readbacks.remove(&buffer);
        self.buffers
            .remove(buffer)
            .map(|_| ())
            .ok_or_else(|| Error::InvalidResource(format!("Buffer {:?} not found", buffer)))
    }

    fn create_kernel(&mut self, desc: &KernelDesc) -> Result<KernelKey> {
        if self.faults.contains(DeviceFaults::KERNEL_CREATION) {
            return Err(Error::InitializationFailed(format!(
                "Kernel '{}' failed to compile", desc.kind.name()
            )));
        }
        if desc.workgroup_size == 0 {
            engine_bail!("galaxy3d::SoftwareDevice", "Kernel '{}' has zero workgroup size", desc.kind.name());
        }
        Ok(self.kernels.insert(SoftwareKernel {
            kind: desc.kind,
            workgroup_size: desc.workgroup_size,
        }))
    }

    fn write_buffer(&mut self, buffer: BufferKey, offset: u64, data: &[u8]) -> Result<()> {
        let target = self
            .buffers
            .get_mut(buffer)
            .ok_or_else(|| engine_err!("galaxy3d::SoftwareDevice", "Write to unknown buffer {:?}", buffer))?;

        let start = offset as usize;
        let end = start + data.len();
        if end > target.data.len() {
            engine_bail!(
                "galaxy3d::SoftwareDevice",
                "Write of {} bytes at {} overflows buffer '{}' ({} bytes)",
                data.len(), offset, target.name, target.data.len()
            );
        }
        target.data[start..end].copy_from_slice(data);
        self.stats.bytes_uploaded += data.len() as u64;
        Ok(())
    }

    fn dispatch(&mut self, kernel: KernelKey, bindings: &[BufferKey], workgroups: u32) -> Result<()> {
        let (kind, workgroup_size) = match self.kernels.get(kernel) {
            Some(k) => (k.kind, k.workgroup_size),
            None => engine_bail!("galaxy3d::SoftwareDevice", "Dispatch of unknown kernel {:?}", kernel),
        };

        if self.faults.contains(DeviceFaults::NO_COMPUTE) {
            return Err(Error::Unsupported("compute dispatch".to_string()));
        }
        if self.faults.contains(DeviceFaults::DISPATCH) || self.failing_kernels.contains(&kind) {
            return Err(Error::BackendError(format!("Dispatch of '{}' failed", kind.name())));
        }
        if bindings.len() != kind.binding_count() {
            engine_bail!(
                "galaxy3d::SoftwareDevice",
                "Kernel '{}' expects {} bindings, got {}",
                kind.name(), kind.binding_count(), bindings.len()
            );
        }

        let threads = workgroups.saturating_mul(workgroup_size);
        crate::engine_trace!(
            "galaxy3d::SoftwareDevice",
            "Dispatch '{}': {} groups x {} threads",
            kind.name(), workgroups, workgroup_size
        );
        self.run_kernel(kind, bindings, threads)?;
        self.stats.dispatches += 1;
        Ok(())
    }

    fn barrier(&mut self) {
        // Dispatches already complete in submission order
        self.stats.barriers += 1;
    }

    fn copy_to_readback(&mut self, src: BufferKey, dst: BufferKey) -> Result<()> {
        let data = self.buffer(src)?.data.clone();
        let target = self.buffer(dst)?;
        if target.usage != ComputeBufferUsage::Readback {
            engine_bail!("galaxy3d::SoftwareDevice", "Buffer '{}' is not a readback buffer", target.name);
        }
        if target.data.len() < data.len() {
            engine_bail!(
                "galaxy3d::SoftwareDevice",
                "Readback buffer '{}' too small ({} < {})",
                target.name, target.data.len(), data.len()
            );
        }

        self.pending_readbacks.insert(dst, PendingReadback {
            data,
            ready_frame: self.frame + self.readback_latency,
        });
        Ok(())
    }

    fn try_read(&mut self, buffer: BufferKey) -> Result<Option<Vec<u8>>> {
        if self.faults.contains(DeviceFaults::READBACK) {
            return Err(Error::BackendError("Readback failed".to_string()));
        }
        if !self.buffers.contains_key(buffer) {
            return Err(Error::InvalidResource(format!("Buffer {:?} not found", buffer)));
        }

        let ready = self
            .pending_readbacks
            .get(&buffer)
            .is_some_and(|p| self.frame >= p.ready_frame);
        if !ready {
            return Ok(None);
        }

        let Some(pending) = self.pending_readbacks.remove(&buffer) else {
            return Ok(None);
        };
        if let Some(target) = self.buffers.get_mut(buffer) {
            target.data[..pending.data.len()].copy_from_slice(&pending.data);
        }
        self.stats.readbacks_completed += 1;
        Ok(Some(pending.data))
    }

    fn read_blocking(&mut self, buffer: BufferKey) -> Result<Vec<u8>> {
        if self.faults.contains(DeviceFaults::READBACK) {
            return Err(Error::BackendError("Readback failed".to_string()));
        }
        self.read_buffer_now(buffer)
    }

    fn submit_frame(&mut self) {
        self.frame += 1;
    }
}

#[cfg(test)]
#[path = "software_device_tests.rs"]
mod tests;
