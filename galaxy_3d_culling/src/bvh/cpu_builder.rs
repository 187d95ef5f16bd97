/// CPU median-split hierarchy builder.
///
/// Top-down: the object range is split at its median along the axis of
/// largest extent of the range's box, objects ordered by box center.
/// Internal boxes are the union of the range, computed before the split.
/// The root is the last node pushed.

use crate::bvh::{Bvh, BvhNode, INVALID_INDEX};
use crate::scene::{AABB, SceneObject};

/// Build a hierarchy over `objects`.
///
/// Invalid object boxes are stored as `AABB::EMPTY`: the object keeps its
/// leaf but never passes a frustum test and never widens a parent.
pub fn build(objects: &[SceneObject]) -> Bvh {
    let boxes: Vec<AABB> = objects.iter().map(|o| o.aabb().sanitized()).collect();
    build_from_boxes(&boxes)
}

/// Build a hierarchy over raw boxes (leaf `object_index` = position in `boxes`)
pub fn build_from_boxes(boxes: &[AABB]) -> Bvh {
    if boxes.is_empty() {
        return Bvh::default();
    }

    let mut indices: Vec<u32> = (0..boxes.len() as u32).collect();
    let mut nodes = Vec::with_capacity(2 * boxes.len() - 1);
    let root = build_recursive(&mut nodes, boxes, &mut indices);

    Bvh::from_nodes(nodes, root)
}

fn build_recursive(nodes: &mut Vec<BvhNode>, boxes: &[AABB], indices: &mut [u32]) -> u32 {
    if let [object] = indices {
        let object = *object;
        nodes.push(BvhNode::leaf(boxes[object as usize], object));
        return (nodes.len() - 1) as u32;
    }

    let bounds = indices
        .iter()
        .fold(AABB::EMPTY, |acc, &i| acc.union(&boxes[i as usize]));

    let axis = if bounds.is_valid() {
        let extent = bounds.extent();
        if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        }
    } else {
        0
    };

    indices.sort_by(|&a, &b| {
        let ca = boxes[a as usize].center()[axis];
        let cb = boxes[b as usize].center()[axis];
        ca.total_cmp(&cb).then(a.cmp(&b))
    });

    let mid = indices.len() / 2;
    let (left_indices, right_indices) = indices.split_at_mut(mid);
    let left = build_recursive(nodes, boxes, left_indices);
    let right = build_recursive(nodes, boxes, right_indices);

    nodes.push(BvhNode::internal(bounds, left, right));
    let index = (nodes.len() - 1) as u32;
    nodes[left as usize].parent = index;
    nodes[right as usize].parent = index;
    debug_assert_eq!(nodes[index as usize].parent, INVALID_INDEX);

    index
}

#[cfg(test)]
#[path = "cpu_builder_tests.rs"]
mod tests;
