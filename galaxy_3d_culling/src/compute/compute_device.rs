/// ComputeDevice trait and resource descriptors
///
/// The culling core reaches the GPU only through this trait. Buffers and
/// kernels are referenced by slotmap keys owned by the device. Every call
/// is non-blocking: results written by dispatches come back through
/// `copy_to_readback` + `try_read`, which returns `None` until the copy
/// has landed (typically one or more submitted frames later).

use std::sync::{Arc, Mutex};
use slotmap::new_key_type;
use crate::error::Result;

new_key_type! {
    /// Key of a buffer owned by a ComputeDevice
    pub struct BufferKey;
    /// Key of a kernel owned by a ComputeDevice
    pub struct KernelKey;
}

/// Buffer usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeBufferUsage {
    /// Small read-only parameter block
    Uniform,
    /// Read/write structured data
    Storage,
    /// CPU-readable staging copy target
    Readback,
}

/// Descriptor for creating a compute buffer
#[derive(Debug, Clone)]
pub struct ComputeBufferDesc {
    /// Debug name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    pub usage: ComputeBufferUsage,
}

/// Compute kernels of the LBVH pipeline.
///
/// Binding order per kernel is documented in `compute::kernels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    MortonCodes,
    BuildInternalNodes,
    BuildLeaves,
    ComputeBounds,
    Refit,
    FrustumCull,
}

impl KernelKind {
    pub const ALL: [KernelKind; 6] = [
        KernelKind::MortonCodes,
        KernelKind::BuildInternalNodes,
        KernelKind::BuildLeaves,
        KernelKind::ComputeBounds,
        KernelKind::Refit,
        KernelKind::FrustumCull,
    ];

    /// Number of buffers the kernel expects, in binding order
    pub fn binding_count(&self) -> usize {
        match self {
            KernelKind::MortonCodes => 3,
            KernelKind::BuildInternalNodes => 3,
            KernelKind::BuildLeaves => 4,
            KernelKind::ComputeBounds => 3,
            KernelKind::Refit => 3,
            KernelKind::FrustumCull => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KernelKind::MortonCodes => "morton_codes",
            KernelKind::BuildInternalNodes => "build_internal_nodes",
            KernelKind::BuildLeaves => "build_leaves",
            KernelKind::ComputeBounds => "compute_bounds",
            KernelKind::Refit => "refit",
            KernelKind::FrustumCull => "frustum_cull",
        }
    }
}

/// Descriptor for creating a compute kernel
#[derive(Debug, Clone)]
pub struct KernelDesc {
    pub kind: KernelKind,
    /// Threads per workgroup
    pub workgroup_size: u32,
}

/// Device handle shared between the visibility system and the renderer
pub type SharedComputeDevice = Arc<Mutex<dyn ComputeDevice>>;

/// Compute backend
///
/// Implemented by hardware backends and by `SoftwareComputeDevice`.
/// Held as `Arc<Mutex<dyn ComputeDevice>>` and locked once per GPU stage.
pub trait ComputeDevice: Send + Sync {
    /// Whether compute dispatches are available at all
    fn supports_compute(&self) -> bool;

    /// Create a zero-initialized buffer
    fn create_buffer(&mut self, desc: &ComputeBufferDesc) -> Result<BufferKey>;

    /// Release a buffer
    fn destroy_buffer(&mut self, buffer: BufferKey) -> Result<()>;

    /// Create a kernel
    fn create_kernel(&mut self, desc: &KernelDesc) -> Result<KernelKey>;

    /// Upload `data` at byte `offset`
    fn write_buffer(&mut self, buffer: BufferKey, offset: u64, data: &[u8]) -> Result<()>;

    /// Run `workgroups` workgroups of `kernel` over `bindings` (binding order)
    fn dispatch(&mut self, kernel: KernelKey, bindings: &[BufferKey], workgroups: u32) -> Result<()>;

    /// Make writes of previous dispatches visible to later ones
    fn barrier(&mut self);

    /// Schedule a copy of `src` into the readback buffer `dst`
    fn copy_to_readback(&mut self, src: BufferKey, dst: BufferKey) -> Result<()>;

    /// Non-blocking read of a readback buffer.
    ///
    /// `Ok(None)` while the last scheduled copy is not available yet, or when
    /// no copy was scheduled since the last successful read.
    fn try_read(&mut self, buffer: BufferKey) -> Result<Option<Vec<u8>>>;

    /// Stalling read of any buffer after all previous dispatches completed.
    ///
    /// Only the Morton sort stage uses it, once per rebuild.
    fn read_blocking(&mut self, buffer: BufferKey) -> Result<Vec<u8>>;

    /// End of the frame's GPU work
    fn submit_frame(&mut self);
}
