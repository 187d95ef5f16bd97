//! Compute module
//!
//! Backend-agnostic compute device abstraction, the GPU records and kernel
//! thread functions of the LBVH pipeline, and a software device that runs
//! them on the CPU.

mod compute_device;
pub mod kernels;
mod software_device;

pub use compute_device::{
    BufferKey, KernelKey,
    ComputeDevice, SharedComputeDevice, ComputeBufferDesc, ComputeBufferUsage,
    KernelDesc, KernelKind,
};
pub use kernels::{GpuObject, GpuNode, GpuMortonCode, GpuFrustum, BuildParams, CullParams};
pub use software_device::{SoftwareComputeDevice, SoftwareDeviceStats, DispatchOrder, DeviceFaults};
