/// CPU hierarchy: median-split rebuild and recursive frustum traversal.
///
/// Always available; the visibility system falls back to it whenever the
/// GPU path is missing or fails. The CPU path never refits.

use crate::bvh::{cpu_builder, Bvh};
use crate::camera::Frustum;
use crate::scene::SceneObject;

#[derive(Debug)]
pub struct CpuBvhSystem {
    bvh: Bvh,
    stale: bool,
    build_count: u64,
}

impl CpuBvhSystem {
    pub fn new() -> Self {
        Self {
            bvh: Bvh::default(),
            stale: true,
            build_count: 0,
        }
    }

    /// Rebuild from the objects' current boxes, returns the new tree's
    /// surface area cost
    pub fn build(&mut self, objects: &[SceneObject]) -> f32 {
        self.bvh = cpu_builder::build(objects);
        self.stale = false;
        self.build_count += 1;

        let cost = self.bvh.surface_area_cost();
        crate::engine_debug!(
            "galaxy3d::CpuBvh",
            "Built {} nodes, depth {}, cost {:.2}",
            self.bvh.len(), self.bvh.depth(), cost
        );
        cost
    }

    /// Flag the tree as out of date (objects changed on another path)
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn build_count(&self) -> u64 {
        self.build_count
    }

    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    /// Set every object's frustum bit from a traversal of the tree,
    /// returns the number of objects marked visible
    pub fn cull(&self, objects: &mut [SceneObject], frustum: &Frustum) -> usize {
        for object in objects.iter_mut() {
            object.set_frustum_visible(false);
        }

        let mut visible = 0;
        if let Some(root) = self.bvh.root() {
            self.cull_node(root, objects, frustum, &mut visible);
        }
        visible
    }

    fn cull_node(&self, index: u32, objects: &mut [SceneObject], frustum: &Frustum, visible: &mut usize) {
        let Some(node) = self.bvh.node(index) else {
            return;
        };
        if !frustum.intersects_aabb(&node.aabb) {
            return;
        }

        if node.is_leaf {
            if let Some(object) = objects.get_mut(node.object_index as usize) {
                object.set_frustum_visible(true);
                *visible += 1;
            }
            return;
        }

        self.cull_node(node.left, objects, frustum, visible);
        self.cull_node(node.right, objects, frustum, visible);
    }
}

impl Default for CpuBvhSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "cpu_bvh_system_tests.rs"]
mod tests;
