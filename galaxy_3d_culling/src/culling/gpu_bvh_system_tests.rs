use super::*;
use crate::bvh::Bvh;
use crate::compute::{DeviceFaults, DispatchOrder, SoftwareComputeDevice};
use glam::{Mat4, Vec3};
use std::sync::{Arc, Mutex};

fn grid_objects() -> Vec<SceneObject> {
    let mut objects = Vec::new();
    for y in [-2.0, 0.0, 2.0] {
        for x in [-4.0, 0.0, 4.0] {
            objects.push(SceneObject::new_static(Vec3::new(x, y, 10.0), 2.0));
        }
    }
    for (i, object) in objects.iter_mut().enumerate() {
        object.set_index(i);
    }
    objects
}

fn bounds(objects: &[SceneObject]) -> SceneBounds {
    SceneBounds::compute(objects, &CullingConfig::default())
}

/// Camera at the origin looking down +Z, narrow enough to cut the grid
fn narrow_frustum() -> Frustum {
    let projection = Mat4::perspective_rh(0.5, 1.0, 0.1, 100.0);
    let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0), Vec3::Y);
    Frustum::from_view_projection(&(projection * view))
}

fn software_device(device: SoftwareComputeDevice) -> (Arc<Mutex<SoftwareComputeDevice>>, SharedComputeDevice) {
    let typed = Arc::new(Mutex::new(device));
    let shared: SharedComputeDevice = typed.clone();
    (typed, shared)
}

fn device_tree(system: &GpuBvhSystem, device: &Arc<Mutex<SoftwareComputeDevice>>) -> Bvh {
    let bytes = device.lock().unwrap().read_buffer_now(system.buffers.nodes).unwrap();
    let nodes: Vec<GpuNode> = bytemuck::pod_collect_to_vec(bytes.as_slice());
    Bvh::from_nodes(nodes.iter().map(|n| n.to_bvh_node()).collect(), 0)
}

// ============================================================================
// Creation
// ============================================================================

#[test]
fn test_new_without_compute_is_unsupported() {
    let (_, shared) = software_device(SoftwareComputeDevice::new().with_faults(DeviceFaults::NO_COMPUTE));
    let result = GpuBvhSystem::new(shared, 9, &CullingConfig::default());
    assert!(matches!(result, Err(Error::Unsupported(_))));
}

#[test]
fn test_buffer_creation_failure_releases_nothing_behind() {
    let (typed, shared) = software_device(SoftwareComputeDevice::new().with_faults(DeviceFaults::BUFFER_CREATION));
    let result = GpuBvhSystem::new(shared, 9, &CullingConfig::default());
    assert!(matches!(result, Err(Error::OutOfMemory)));
    assert_eq!(typed.lock().unwrap().buffer_count(), 0);
}

#[test]
fn test_kernel_creation_failure_releases_buffers() {
    let (typed, shared) = software_device(SoftwareComputeDevice::new().with_faults(DeviceFaults::KERNEL_CREATION));
    let result = GpuBvhSystem::new(shared, 9, &CullingConfig::default());
    assert!(matches!(result, Err(Error::InitializationFailed(_))));
    assert_eq!(typed.lock().unwrap().buffer_count(), 0);
}

#[test]
fn test_drop_releases_buffers() {
    let (typed, shared) = software_device(SoftwareComputeDevice::new());
    let system = GpuBvhSystem::new(shared, 9, &CullingConfig::default()).unwrap();
    assert_eq!(typed.lock().unwrap().buffer_count(), 10);
    drop(system);
    assert_eq!(typed.lock().unwrap().buffer_count(), 0);
}

// ============================================================================
// Build / refit
// ============================================================================

#[test]
fn test_build_produces_valid_tree() {
    let objects = grid_objects();
    let (typed, shared) = software_device(SoftwareComputeDevice::new());
    let mut system = GpuBvhSystem::new(shared, objects.len(), &CullingConfig::default()).unwrap();
    assert!(!system.is_built());

    system.build(&objects, &bounds(&objects)).unwrap();
    assert!(system.is_built());

    let bvh = device_tree(&system, &typed);
    bvh.validate(objects.len()).unwrap();
    for node in bvh.nodes().iter().filter(|n| n.is_leaf) {
        assert_eq!(node.aabb, *objects[node.object_index as usize].aabb());
    }
}

#[test]
fn test_build_independent_of_dispatch_order() {
    let objects = grid_objects();
    let (forward, shared_forward) = software_device(SoftwareComputeDevice::new());
    let (reverse, shared_reverse) =
        software_device(SoftwareComputeDevice::new().with_dispatch_order(DispatchOrder::Reverse));

    let mut a = GpuBvhSystem::new(shared_forward, objects.len(), &CullingConfig::default()).unwrap();
    let mut b = GpuBvhSystem::new(shared_reverse, objects.len(), &CullingConfig::default()).unwrap();
    a.build(&objects, &bounds(&objects)).unwrap();
    b.build(&objects, &bounds(&objects)).unwrap();

    assert_eq!(device_tree(&a, &forward), device_tree(&b, &reverse));
}

#[test]
fn test_single_object_build() {
    let objects = vec![SceneObject::new_static(Vec3::new(0.0, 0.0, 5.0), 1.0)];
    let (typed, shared) = software_device(SoftwareComputeDevice::new());
    let mut system = GpuBvhSystem::new(shared, 1, &CullingConfig::default()).unwrap();
    system.build(&objects, &bounds(&objects)).unwrap();
    device_tree(&system, &typed).validate(1).unwrap();
}

#[test]
fn test_object_count_mismatch_is_rejected() {
    let objects = grid_objects();
    let (_, shared) = software_device(SoftwareComputeDevice::new());
    let mut system = GpuBvhSystem::new(shared, 4, &CullingConfig::default()).unwrap();
    assert!(matches!(system.build(&objects, &bounds(&objects)), Err(Error::InvalidResource(_))));
}

#[test]
fn test_refit_before_build_fails() {
    let objects = grid_objects();
    let (_, shared) = software_device(SoftwareComputeDevice::new());
    let mut system = GpuBvhSystem::new(shared, objects.len(), &CullingConfig::default()).unwrap();
    assert!(system.refit(&objects).is_err());
}

#[test]
fn test_refit_tracks_moved_objects() {
    let mut objects = grid_objects();
    let (typed, shared) = software_device(SoftwareComputeDevice::new());
    let config = CullingConfig { refit_iterations: 1, ..Default::default() };
    let mut system = GpuBvhSystem::new(shared, objects.len(), &config).unwrap();
    system.build(&objects, &bounds(&objects)).unwrap();

    objects[4] = SceneObject::new_static(Vec3::new(0.5, 0.5, 11.0), 2.0);

    // One pass: leaves already hold the new boxes
    system.refit(&objects).unwrap();
    let bvh = device_tree(&system, &typed);
    let leaf = bvh.nodes().iter().find(|n| n.is_leaf && n.object_index == 4).unwrap();
    assert_eq!(leaf.aabb, *objects[4].aabb());

    // Enough passes: every internal box encloses its children again
    for _ in 0..bvh.depth() {
        system.refit(&objects).unwrap();
    }
    let bvh = device_tree(&system, &typed);
    bvh.validate(objects.len()).unwrap();
    assert!(bvh.node(0).unwrap().aabb.contains(objects[4].aabb()));
}

#[test]
fn test_quality_sample_arrives_after_latency() {
    let objects = grid_objects();
    let (typed, shared) = software_device(SoftwareComputeDevice::new());
    let mut system = GpuBvhSystem::new(shared, objects.len(), &CullingConfig::default()).unwrap();
    assert_eq!(system.poll_quality().unwrap(), None);

    system.build(&objects, &bounds(&objects)).unwrap();
    assert_eq!(system.poll_quality().unwrap(), None);
    typed.lock().unwrap().submit_frame();

    let expected = device_tree(&system, &typed).surface_area_cost();
    assert_eq!(system.poll_quality().unwrap(), Some(expected));
    assert_eq!(system.poll_quality().unwrap(), None);
}

#[test]
fn test_quality_samples_keep_landing_under_continuous_refits() {
    let objects = grid_objects();
    let (typed, shared) = software_device(SoftwareComputeDevice::new().with_readback_latency(2));
    let mut system = GpuBvhSystem::new(shared, objects.len(), &CullingConfig::default()).unwrap();
    system.build(&objects, &bounds(&objects)).unwrap();

    let mut sampled = Vec::new();
    for frame in 0..8 {
        if system.poll_quality().unwrap().is_some() {
            sampled.push(frame);
        }
        system.refit(&objects).unwrap();
        typed.lock().unwrap().submit_frame();
    }
    assert_eq!(sampled, vec![2, 4, 6]);
}

#[test]
fn test_sample_of_replaced_tree_is_dropped() {
    let mut objects = grid_objects();
    let (typed, shared) = software_device(SoftwareComputeDevice::new());
    let mut system = GpuBvhSystem::new(shared, objects.len(), &CullingConfig::default()).unwrap();
    system.build(&objects, &bounds(&objects)).unwrap();

    objects[4] = SceneObject::new_static(Vec3::new(0.0, 0.0, 40.0), 6.0);
    objects[4].set_index(4);
    system.build(&objects, &bounds(&objects)).unwrap();
    typed.lock().unwrap().submit_frame();

    // First tree's copy lands and is dropped, the current tree is copied
    assert_eq!(system.poll_quality().unwrap(), None);
    typed.lock().unwrap().submit_frame();

    let expected = device_tree(&system, &typed).surface_area_cost();
    assert_eq!(system.poll_quality().unwrap(), Some(expected));
}

// ============================================================================
// Cull
// ============================================================================

#[test]
fn test_cull_results_are_one_frame_late() {
    let mut objects = grid_objects();
    let frustum = narrow_frustum();
    let (typed, shared) = software_device(SoftwareComputeDevice::new());
    let mut system = GpuBvhSystem::new(shared, objects.len(), &CullingConfig::default()).unwrap();
    system.build(&objects, &bounds(&objects)).unwrap();

    // Frame 0: nothing landed yet, initial bits kept
    let outcome = system.cull(&mut objects, &frustum).unwrap();
    assert!(!outcome.results_applied);
    assert!(objects.iter().all(|o| o.is_frustum_visible()));
    typed.lock().unwrap().submit_frame();

    // Frame 1: frame 0's result
    let outcome = system.cull(&mut objects, &frustum).unwrap();
    assert!(outcome.results_applied);
    for object in &objects {
        assert_eq!(object.is_frustum_visible(), frustum.intersects_aabb(object.aabb()));
    }
    assert!(outcome.frustum_visible > 0);
    assert!(outcome.frustum_visible < objects.len());
}

#[test]
fn test_cull_results_land_every_latency_frames() {
    let mut objects = grid_objects();
    let frustum = narrow_frustum();
    let (typed, shared) = software_device(SoftwareComputeDevice::new().with_readback_latency(3));
    let mut system = GpuBvhSystem::new(shared, objects.len(), &CullingConfig::default()).unwrap();
    system.build(&objects, &bounds(&objects)).unwrap();

    let mut landed = Vec::new();
    for frame in 0..9 {
        if system.cull(&mut objects, &frustum).unwrap().results_applied {
            landed.push(frame);
        }
        typed.lock().unwrap().submit_frame();
    }
    assert_eq!(landed, vec![3, 6]);
    for object in &objects {
        assert_eq!(object.is_frustum_visible(), frustum.intersects_aabb(object.aabb()));
    }
}

#[test]
fn test_no_cull_dispatched_while_result_in_flight() {
    let mut objects = grid_objects();
    let (typed, shared) = software_device(SoftwareComputeDevice::new().with_readback_latency(2));
    let mut system = GpuBvhSystem::new(shared, objects.len(), &CullingConfig::default()).unwrap();
    system.build(&objects, &bounds(&objects)).unwrap();

    system.cull(&mut objects, &narrow_frustum()).unwrap();
    let dispatches = typed.lock().unwrap().stats().dispatches;
    typed.lock().unwrap().submit_frame();

    system.cull(&mut objects, &narrow_frustum()).unwrap();
    assert_eq!(typed.lock().unwrap().stats().dispatches, dispatches);
}

#[test]
fn test_cull_before_build_fails() {
    let mut objects = grid_objects();
    let (_, shared) = software_device(SoftwareComputeDevice::new());
    let mut system = GpuBvhSystem::new(shared, objects.len(), &CullingConfig::default()).unwrap();
    assert!(system.cull(&mut objects, &narrow_frustum()).is_err());
}

#[test]
fn test_dispatch_failure_mid_session() {
    let mut objects = grid_objects();
    let (typed, shared) = software_device(SoftwareComputeDevice::new());
    let mut system = GpuBvhSystem::new(shared, objects.len(), &CullingConfig::default()).unwrap();
    system.build(&objects, &bounds(&objects)).unwrap();
    system.cull(&mut objects, &narrow_frustum()).unwrap();
    typed.lock().unwrap().submit_frame();

    typed.lock().unwrap().set_faults(DeviceFaults::DISPATCH);
    assert!(system.cull(&mut objects, &narrow_frustum()).is_err());
    assert!(system.refit(&objects).is_err());

    typed.lock().unwrap().set_faults(DeviceFaults::empty());
    assert!(system.cull(&mut objects, &narrow_frustum()).is_ok());
}
