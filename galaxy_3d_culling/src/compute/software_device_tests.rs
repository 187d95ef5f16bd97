use super::*;
use crate::bvh::Bvh;
use crate::scene::{AABB, SceneBounds};
use glam::Vec3;
use serial_test::serial;

fn storage(device: &mut SoftwareComputeDevice, name: &str, size: u64) -> BufferKey {
    device
        .create_buffer(&ComputeBufferDesc { name: name.to_string(), size, usage: ComputeBufferUsage::Storage })
        .unwrap()
}

fn readback(device: &mut SoftwareComputeDevice, name: &str, size: u64) -> BufferKey {
    device
        .create_buffer(&ComputeBufferDesc { name: name.to_string(), size, usage: ComputeBufferUsage::Readback })
        .unwrap()
}

fn kernel(device: &mut SoftwareComputeDevice, kind: KernelKind) -> KernelKey {
    device.create_kernel(&KernelDesc { kind, workgroup_size: 64 }).unwrap()
}

fn row_boxes() -> Vec<AABB> {
    (0..6).map(|i| AABB::from_center_size(Vec3::new(i as f32 * 3.0, 0.0, 0.0), 1.0)).collect()
}

/// Full LBVH build through the device, returns the node buffer content
fn build_on_device(device: &mut SoftwareComputeDevice, boxes: &[AABB]) -> Vec<GpuNode> {
    let n = boxes.len();
    let bounds = SceneBounds { aabb: AABB::new(Vec3::splat(-5.0), Vec3::splat(25.0)) };
    let params = BuildParams::new(n as u32, &bounds);
    let objects: Vec<GpuObject> = boxes.iter().enumerate().map(|(i, b)| GpuObject::new(b, i as u32)).collect();

    let params_buf = device
        .create_buffer(&ComputeBufferDesc {
            name: "params".to_string(),
            size: std::mem::size_of::<BuildParams>() as u64,
            usage: ComputeBufferUsage::Uniform,
        })
        .unwrap();
    let object_buf = storage(device, "objects", (n * std::mem::size_of::<GpuObject>()) as u64);
    let code_buf = storage(device, "codes", (n * std::mem::size_of::<GpuMortonCode>()) as u64);
    let node_buf = storage(device, "nodes", ((2 * n - 1) * std::mem::size_of::<GpuNode>()) as u64);
    let counter_buf = storage(device, "counters", ((n - 1) * 4) as u64);

    device.write_buffer(params_buf, 0, bytemuck::bytes_of(&params)).unwrap();
    device.write_buffer(object_buf, 0, bytemuck::cast_slice(&objects)).unwrap();

    let morton = kernel(device, KernelKind::MortonCodes);
    let internal = kernel(device, KernelKind::BuildInternalNodes);
    let leaves = kernel(device, KernelKind::BuildLeaves);
    let bounds_kernel = kernel(device, KernelKind::ComputeBounds);

    device.dispatch(morton, &[params_buf, object_buf, code_buf], 1).unwrap();
    device.barrier();
    let mut codes: Vec<GpuMortonCode> = bytemuck::pod_collect_to_vec(device.read_buffer_now(code_buf).unwrap().as_slice());
    crate::bvh::morton::sort_morton_codes(&mut codes);
    device.write_buffer(code_buf, 0, bytemuck::cast_slice(&codes)).unwrap();

    device.dispatch(internal, &[params_buf, code_buf, node_buf], 1).unwrap();
    device.dispatch(leaves, &[params_buf, code_buf, object_buf, node_buf], 1).unwrap();
    device.barrier();
    device.dispatch(bounds_kernel, &[params_buf, node_buf, counter_buf], 1).unwrap();

    bytemuck::pod_collect_to_vec(device.read_buffer_now(node_buf).unwrap().as_slice())
}

// ============================================================================
// Resources
// ============================================================================

#[test]
fn test_create_and_destroy_buffer() {
    let mut device = SoftwareComputeDevice::new();
    let buffer = storage(&mut device, "a", 64);
    assert_eq!(device.buffer_count(), 1);
    assert_eq!(device.read_buffer_now(buffer).unwrap(), vec![0u8; 64]);

    device.destroy_buffer(buffer).unwrap();
    assert_eq!(device.buffer_count(), 0);
    assert!(matches!(device.destroy_buffer(buffer), Err(Error::InvalidResource(_))));
}

#[test]
#[serial]
fn test_zero_sized_buffer_rejected() {
    let mut device = SoftwareComputeDevice::new();
    let result = device.create_buffer(&ComputeBufferDesc {
        name: "empty".to_string(),
        size: 0,
        usage: ComputeBufferUsage::Storage,
    });
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_write_out_of_bounds_fails() {
    let mut device = SoftwareComputeDevice::new();
    let buffer = storage(&mut device, "small", 8);
    assert!(device.write_buffer(buffer, 4, &[1, 2, 3, 4]).is_ok());
    assert!(device.write_buffer(buffer, 6, &[1, 2, 3, 4]).is_err());
    assert_eq!(device.read_buffer_now(buffer).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
    assert_eq!(device.stats().bytes_uploaded, 4);
}

#[test]
#[serial]
fn test_dispatch_checks_binding_count() {
    let mut device = SoftwareComputeDevice::new();
    let buffer = storage(&mut device, "a", 64);
    let morton = kernel(&mut device, KernelKind::MortonCodes);
    assert!(device.dispatch(morton, &[buffer], 1).is_err());
    assert_eq!(device.stats().dispatches, 0);
}

// ============================================================================
// Dispatch
// ============================================================================

#[test]
fn test_full_build_on_device_is_valid() {
    let boxes = row_boxes();
    let mut device = SoftwareComputeDevice::new();
    let nodes = build_on_device(&mut device, &boxes);
    let bvh = Bvh::from_nodes(nodes.iter().map(|n| n.to_bvh_node()).collect(), 0);
    bvh.validate(boxes.len()).unwrap();
    assert_eq!(device.stats().dispatches, 4);
}

#[test]
fn test_dispatch_order_does_not_change_result() {
    let boxes = row_boxes();
    let mut forward = SoftwareComputeDevice::new();
    let mut reverse = SoftwareComputeDevice::new().with_dispatch_order(DispatchOrder::Reverse);
    assert_eq!(build_on_device(&mut forward, &boxes), build_on_device(&mut reverse, &boxes));
}

// ============================================================================
// Readback latency
// ============================================================================

#[test]
fn test_readback_arrives_after_latency() {
    let mut device = SoftwareComputeDevice::new().with_readback_latency(2);
    let src = storage(&mut device, "src", 4);
    let dst = readback(&mut device, "dst", 4);
    device.write_buffer(src, 0, &[9, 8, 7, 6]).unwrap();

    // Nothing scheduled yet
    assert_eq!(device.try_read(dst).unwrap(), None);

    device.copy_to_readback(src, dst).unwrap();
    assert_eq!(device.try_read(dst).unwrap(), None);
    device.submit_frame();
    assert_eq!(device.try_read(dst).unwrap(), None);
    device.submit_frame();
    assert_eq!(device.try_read(dst).unwrap(), Some(vec![9, 8, 7, 6]));
    // Consumed
    assert_eq!(device.try_read(dst).unwrap(), None);
    assert_eq!(device.stats().readbacks_completed, 1);
}

#[test]
fn test_readback_snapshot_taken_at_copy_time() {
    let mut device = SoftwareComputeDevice::new().with_readback_latency(0);
    let src = storage(&mut device, "src", 2);
    let dst = readback(&mut device, "dst", 2);
    device.write_buffer(src, 0, &[1, 1]).unwrap();
    device.copy_to_readback(src, dst).unwrap();
    device.write_buffer(src, 0, &[2, 2]).unwrap();
    assert_eq!(device.try_read(dst).unwrap(), Some(vec![1, 1]));
}

#[test]
#[serial]
fn test_copy_requires_readback_target() {
    let mut device = SoftwareComputeDevice::new();
    let src = storage(&mut device, "src", 4);
    let other = storage(&mut device, "other", 4);
    let small = readback(&mut device, "small", 2);
    assert!(device.copy_to_readback(src, other).is_err());
    assert!(device.copy_to_readback(src, small).is_err());
}

// ============================================================================
// Fault injection
// ============================================================================

#[test]
fn test_no_compute_fault() {
    let mut device = SoftwareComputeDevice::new().with_faults(DeviceFaults::NO_COMPUTE);
    assert!(!device.supports_compute());
    let buffer = storage(&mut device, "a", 64);
    let refit = kernel(&mut device, KernelKind::Refit);
    assert!(matches!(device.dispatch(refit, &[buffer, buffer, buffer], 1), Err(Error::Unsupported(_))));
}

#[test]
#[serial]
fn test_buffer_creation_fault_is_out_of_memory() {
    let mut device = SoftwareComputeDevice::new().with_faults(DeviceFaults::BUFFER_CREATION);
    let result = device.create_buffer(&ComputeBufferDesc {
        name: "a".to_string(),
        size: 16,
        usage: ComputeBufferUsage::Storage,
    });
    assert!(matches!(result, Err(Error::OutOfMemory)));
}

#[test]
fn test_kernel_creation_fault() {
    let mut device = SoftwareComputeDevice::new().with_faults(DeviceFaults::KERNEL_CREATION);
    let result = device.create_kernel(&KernelDesc { kind: KernelKind::FrustumCull, workgroup_size: 64 });
    assert!(matches!(result, Err(Error::InitializationFailed(_))));
}

#[test]
fn test_faults_can_change_mid_session() {
    let mut device = SoftwareComputeDevice::new().with_readback_latency(0);
    let src = storage(&mut device, "src", 4);
    let dst = readback(&mut device, "dst", 4);
    device.copy_to_readback(src, dst).unwrap();

    device.set_faults(DeviceFaults::READBACK);
    assert!(device.try_read(dst).is_err());
    device.set_faults(DeviceFaults::empty());
    assert_eq!(device.try_read(dst).unwrap(), Some(vec![0; 4]));
}

#[test]
fn test_per_kernel_failure() {
    let mut device = SoftwareComputeDevice::new();
    let buffer = storage(&mut device, "a", 64);
    let refit = kernel(&mut device, KernelKind::Refit);
    device.set_kernel_failure(KernelKind::Refit, true);
    assert!(matches!(device.dispatch(refit, &[buffer, buffer, buffer], 1), Err(Error::BackendError(_))));
    device.set_kernel_failure(KernelKind::Refit, false);
    // Zeroed params: zero threads do any work
    assert!(device.dispatch(refit, &[buffer, buffer, buffer], 1).is_ok());
}

#[test]
fn test_read_blocking_honors_readback_fault() {
    let mut device = SoftwareComputeDevice::new();
    let buffer = storage(&mut device, "a", 4);
    device.write_buffer(buffer, 0, &[1, 2, 3, 4]).unwrap();
    assert_eq!(device.read_blocking(buffer).unwrap(), vec![1, 2, 3, 4]);
    device.set_faults(DeviceFaults::READBACK);
    assert!(device.read_blocking(buffer).is_err());
}
