use super::*;

fn objects(count: usize) -> Vec<SceneObject> {
    (0..count)
        .map(|i| {
            let mut object = SceneObject::new_static(Vec3::new(0.0, 0.0, -(i as f32) * 5.0 - 5.0), 1.0);
            object.set_index(i);
            object
        })
        .collect()
}

fn integrator(threshold: u32) -> OcclusionIntegrator {
    OcclusionIntegrator::new(&CullingConfig { occluded_frame_threshold: threshold, ..Default::default() })
}

// ============================================================================
// Hysteresis
// ============================================================================

#[test]
fn test_hysteresis_sequence() {
    let integrator = integrator(2);
    let mut objects = objects(1);
    let mut source = ScriptedQuerySource::new();
    source.push_samples(0, [0, 0, 0, 1, 0]);

    let mut visibility = Vec::new();
    let mut counters = Vec::new();
    for _ in 0..5 {
        assert_eq!(integrator.plan_queries(&mut objects, Vec3::ZERO), vec![0]);
        integrator.integrate(&mut objects, &mut source);
        visibility.push(objects[0].is_visible());
        counters.push(objects[0].occlusion().consecutive_occluded_frames());
    }

    assert_eq!(counters, vec![1, 2, 3, 0, 1]);
    assert_eq!(visibility, vec![true, false, false, true, true]);
}

#[test]
fn test_not_ready_keeps_state() {
    let integrator = integrator(1);
    let mut objects = objects(1);
    let mut source = ScriptedQuerySource::new();
    source.push_samples(0, [0]).repeat(0, QueryPoll::NotReady);

    integrator.plan_queries(&mut objects, Vec3::ZERO);
    integrator.integrate(&mut objects, &mut source);
    assert!(!objects[0].is_visible());

    // New query, never answered: hidden state persists
    integrator.plan_queries(&mut objects, Vec3::ZERO);
    for _ in 0..3 {
        let report = integrator.integrate(&mut objects, &mut source);
        assert_eq!(report.results_received, 0);
        assert_eq!(report.hidden_by_occlusion, 1);
        assert!(!objects[0].is_visible());
        assert!(objects[0].occlusion().query_in_progress());
    }
}

#[test]
fn test_occlusion_never_reveals_culled_object() {
    let integrator = integrator(1);
    let mut objects = objects(1);
    objects[0].set_frustum_visible(false);
    let mut source = ScriptedQuerySource::new();
    source.repeat(0, QueryPoll::Ready(1000));

    integrator.integrate(&mut objects, &mut source);
    assert!(!objects[0].is_visible());
    // No query in flight: the source was never asked
    assert_eq!(source.poll_count(), 0);
}

#[test]
fn test_visible_result_resets_counter() {
    let integrator = integrator(3);
    let mut objects = objects(1);
    let mut source = ScriptedQuerySource::new();
    source.push_samples(0, [0, 0, 12]);

    for _ in 0..3 {
        integrator.plan_queries(&mut objects, Vec3::ZERO);
        integrator.integrate(&mut objects, &mut source);
    }
    assert_eq!(objects[0].occlusion().consecutive_occluded_frames(), 0);
    assert_eq!(objects[0].occlusion().last_result_samples(), 12);
    assert!(objects[0].is_visible());
}

// ============================================================================
// Query planning
// ============================================================================

#[test]
fn test_plan_queries_front_to_back() {
    let integrator = integrator(1);
    let mut objects = objects(4);
    // Eye behind the farthest object: order reverses
    let planned = integrator.plan_queries(&mut objects, Vec3::new(0.0, 0.0, -40.0));
    assert_eq!(planned, vec![3, 2, 1, 0]);
    assert!(objects.iter().all(|o| o.occlusion().query_in_progress()));

    // Everything in flight: nothing new to plan
    assert!(integrator.plan_queries(&mut objects, Vec3::ZERO).is_empty());
}

#[test]
fn test_plan_queries_skips_and_abandons_culled_objects() {
    let integrator = integrator(1);
    let mut objects = objects(3);
    integrator.plan_queries(&mut objects, Vec3::ZERO);

    objects[1].set_frustum_visible(false);
    let mut source = ScriptedQuerySource::new();
    source.push_samples(0, [5]).push_samples(2, [5]);
    integrator.integrate(&mut objects, &mut source);

    let planned = integrator.plan_queries(&mut objects, Vec3::ZERO);
    assert_eq!(planned, vec![0, 2]);
    assert!(!objects[1].occlusion().query_in_progress());
}

#[test]
fn test_abandoned_query_keeps_counter() {
    let integrator = integrator(5);
    let mut objects = objects(1);
    let mut source = ScriptedQuerySource::new();
    source.push_samples(0, [0, 0]);
    for _ in 0..2 {
        integrator.plan_queries(&mut objects, Vec3::ZERO);
        integrator.integrate(&mut objects, &mut source);
    }
    integrator.plan_queries(&mut objects, Vec3::ZERO);
    objects[0].set_frustum_visible(false);
    integrator.plan_queries(&mut objects, Vec3::ZERO);

    assert!(!objects[0].occlusion().query_in_progress());
    assert_eq!(objects[0].occlusion().consecutive_occluded_frames(), 2);
}

#[test]
fn test_scripted_source_order() {
    let mut source = ScriptedQuerySource::new();
    source.push(1, QueryPoll::NotReady).push(1, QueryPoll::Ready(3)).repeat(1, QueryPoll::Ready(9));
    assert_eq!(source.poll(1), QueryPoll::NotReady);
    assert_eq!(source.poll(1), QueryPoll::Ready(3));
    assert_eq!(source.poll(1), QueryPoll::Ready(9));
    assert_eq!(source.poll(1), QueryPoll::Ready(9));
    assert_eq!(source.poll(2), QueryPoll::NotReady);
    assert_eq!(source.poll_count(), 5);
}
