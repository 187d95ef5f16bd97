/// Bvh: flat node arena of a binary bounding volume hierarchy.
///
/// Both builders produce this layout:
/// - `2N - 1` nodes for `N >= 1` objects, `N` of them leaves
/// - every object referenced by exactly one leaf
/// - internal `aabb` contains the union of its children's boxes
///
/// Node links are `u32` indices into the arena with `INVALID_INDEX` as
/// the "none" sentinel, which is also the representation used by the
/// compute kernels. A rebuild replaces the arena; a refit only changes boxes.

use crate::error::{Error, Result};
use crate::scene::AABB;

/// Sentinel for absent child / parent / object links
pub const INVALID_INDEX: u32 = u32::MAX;

/// Capacity of the explicit traversal stack used by the `FrustumCull` kernel.
///
/// Builder-produced trees stay far below it: the CPU median split gives a
/// depth of `ceil(log2 N)`, the LBVH at most `30 + ceil(log2 N)` (one level
/// per Morton bit plus the index tiebreak).
pub const TRAVERSAL_STACK_CAPACITY: usize = 64;

/// A single node of the hierarchy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    /// World-space box of the subtree
    pub aabb: AABB,
    /// Left child index (`INVALID_INDEX` for leaves)
    pub left: u32,
    /// Right child index (`INVALID_INDEX` for leaves)
    pub right: u32,
    /// Parent index (`INVALID_INDEX` for the root)
    pub parent: u32,
    /// Referenced object (`INVALID_INDEX` for internal nodes)
    pub object_index: u32,
    pub is_leaf: bool,
}

impl BvhNode {
    pub fn leaf(aabb: AABB, object_index: u32) -> Self {
        Self {
            aabb,
            left: INVALID_INDEX,
            right: INVALID_INDEX,
            parent: INVALID_INDEX,
            object_index,
            is_leaf: true,
        }
    }

    pub fn internal(aabb: AABB, left: u32, right: u32) -> Self {
        Self {
            aabb,
            left,
            right,
            parent: INVALID_INDEX,
            object_index: INVALID_INDEX,
            is_leaf: false,
        }
    }
}

/// Bounding volume hierarchy over a fixed object list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    root: u32,
}

impl Bvh {
    /// Wrap a node arena. No validation; see `validate`.
    pub fn from_nodes(nodes: Vec<BvhNode>, root: u32) -> Self {
        if nodes.is_empty() {
            return Self::default();
        }
        Self { nodes, root }
    }

    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    pub fn node(&self, index: u32) -> Option<&BvhNode> {
        self.nodes.get(index as usize)
    }

    /// Root index, `None` for an empty hierarchy
    pub fn root(&self) -> Option<u32> {
        if self.nodes.is_empty() { None } else { Some(self.root) }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf).count()
    }

    /// Number of nodes on the longest root-to-leaf path minus one
    /// (a single leaf has depth 0, an empty tree too).
    pub fn depth(&self) -> usize {
        let Some(root) = self.root() else {
            return 0;
        };
        let mut max_depth = 0;
        let mut stack = vec![(root, 0usize)];
        while let Some((index, depth)) = stack.pop() {
            let Some(node) = self.node(index) else {
                continue;
            };
            max_depth = max_depth.max(depth);
            // Guard against cycles in malformed arenas
            if depth > self.nodes.len() {
                break;
            }
            if !node.is_leaf {
                stack.push((node.left, depth + 1));
                stack.push((node.right, depth + 1));
            }
        }
        max_depth
    }

    /// Quality metric: sum of internal node surface areas (lower is better)
    pub fn surface_area_cost(&self) -> f32 {
        self.nodes
            .iter()
            .filter(|n| !n.is_leaf)
            .map(|n| n.aabb.surface_area())
            .sum()
    }

    /// Overwrite the box of a node (refit support)
    pub(crate) fn set_node_aabb(&mut self, index: u32, aabb: AABB) {
        if let Some(node) = self.nodes.get_mut(index as usize) {
            node.aabb = aabb;
        }
    }

    /// Check the structural invariants against `object_count` objects:
    /// node count, leaf completeness, parent/child consistency and box
    /// containment (invalid boxes are exempt from containment).
    pub fn validate(&self, object_count: usize) -> Result<()> {
        if object_count == 0 {
            return if self.nodes.is_empty() {
                Ok(())
            } else {
                Err(Error::InvalidResource(format!(
                    "Hierarchy over 0 objects has {} nodes", self.nodes.len()
                )))
            };
        }

        let expected = 2 * object_count - 1;
        if self.nodes.len() != expected {
            return Err(Error::InvalidResource(format!(
                "Expected {} nodes for {} objects, found {}",
                expected, object_count, self.nodes.len()
            )));
        }

        let root = self.root as usize;
        if root >= self.nodes.len() || self.nodes[root].parent != INVALID_INDEX {
            return Err(Error::InvalidResource(format!("Invalid root {}", self.root)));
        }

        let mut seen_objects = vec![false; object_count];
        let mut reached = vec![false; self.nodes.len()];
        let mut stack = vec![self.root];

        while let Some(index) = stack.pop() {
            let i = index as usize;
            if reached[i] {
                return Err(Error::InvalidResource(format!("Node {} reached twice", i)));
            }
            reached[i] = true;
            let node = &self.nodes[i];

            if node.is_leaf {
                let object = node.object_index as usize;
                if object >= object_count {
                    return Err(Error::InvalidResource(format!(
                        "Leaf {} references object {}", i, node.object_index
                    )));
                }
                if seen_objects[object] {
                    return Err(Error::InvalidResource(format!(
                        "Object {} referenced by more than one leaf", object
                    )));
                }
                seen_objects[object] = true;
                continue;
            }

            for child in [node.left, node.right] {
                let c = child as usize;
                if c >= self.nodes.len() {
                    return Err(Error::InvalidResource(format!(
                        "Node {} has out-of-range child {}", i, child
                    )));
                }
                let child_node = &self.nodes[c];
                if child_node.parent != index {
                    return Err(Error::InvalidResource(format!(
                        "Node {} has parent {}, expected {}", c, child_node.parent, index
                    )));
                }
                if child_node.aabb.is_valid() && !node.aabb.contains(&child_node.aabb) {
                    return Err(Error::InvalidResource(format!(
                        "Node {} does not contain child {}", i, c
                    )));
                }
                stack.push(child);
            }
        }

        if let Some(unreached) = reached.iter().position(|r| !r) {
            return Err(Error::InvalidResource(format!("Node {} unreachable from root", unreached)));
        }
        if let Some(missing) = seen_objects.iter().position(|s| !s) {
            return Err(Error::InvalidResource(format!("Object {} has no leaf", missing)));
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
