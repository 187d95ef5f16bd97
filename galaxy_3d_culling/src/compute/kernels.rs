/// GPU-visible records and compute kernel thread functions.
///
/// Records are `#[repr(C)]` Pod structs padded to 16-byte multiples so
/// they can be uploaded as storage/uniform buffers unchanged. Each kernel
/// is written as a per-thread function: `thread_id` is the global
/// invocation index and every function bounds-checks it, like a shader
/// does when the last workgroup is partially filled. Threads of one
/// dispatch may run in any order.
///
/// Binding order (index into the dispatch's `bindings`):
///
/// | Kernel             | 0           | 1           | 2             | 3            |
/// |--------------------|-------------|-------------|---------------|--------------|
/// | MortonCodes        | BuildParams | GpuObject[] | codes         |              |
/// | BuildInternalNodes | BuildParams | codes       | GpuNode[]     |              |
/// | BuildLeaves        | BuildParams | codes       | GpuObject[]   | GpuNode[]    |
/// | ComputeBounds      | BuildParams | GpuNode[]   | u32 counters  |              |
/// | Refit              | BuildParams | GpuObject[] | GpuNode[]     |              |
/// | FrustumCull        | CullParams  | GpuFrustum  | GpuNode[]     | u32 visibility |

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use rdst::RadixKey;
use crate::bvh::{morton, radix_tree, BvhNode, INVALID_INDEX, TRAVERSAL_STACK_CAPACITY};
use crate::camera::{planes_reject_box, Frustum};
use crate::scene::{AABB, SceneBounds};

// ===== GPU RECORDS =====

/// Object box as seen by the kernels (invalid boxes uploaded as EMPTY)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuObject {
    pub min: [f32; 3],
    pub object_index: u32,
    pub max: [f32; 3],
    pub _pad: u32,
}

impl GpuObject {
    pub fn new(aabb: &AABB, object_index: u32) -> Self {
        let aabb = aabb.sanitized();
        Self {
            min: aabb.min.to_array(),
            object_index,
            max: aabb.max.to_array(),
            _pad: 0,
        }
    }

    pub fn aabb(&self) -> AABB {
        AABB::new(Vec3::from_array(self.min), Vec3::from_array(self.max))
    }
}

/// Hierarchy node as stored in the node buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuNode {
    pub min: [f32; 3],
    pub left: u32,
    pub max: [f32; 3],
    pub right: u32,
    pub parent: u32,
    pub object_index: u32,
    pub is_leaf: u32,
    pub _pad: u32,
}

impl GpuNode {
    pub fn aabb(&self) -> AABB {
        AABB::new(Vec3::from_array(self.min), Vec3::from_array(self.max))
    }

    pub fn set_aabb(&mut self, aabb: &AABB) {
        self.min = aabb.min.to_array();
        self.max = aabb.max.to_array();
    }

    pub fn to_bvh_node(&self) -> BvhNode {
        BvhNode {
            aabb: self.aabb(),
            left: self.left,
            right: self.right,
            parent: self.parent,
            object_index: self.object_index,
            is_leaf: self.is_leaf != 0,
        }
    }
}

/// (Morton code, object index) pair; sorted by code then index
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuMortonCode {
    pub code: u32,
    pub object_index: u32,
    pub _pad: [u32; 2],
}

impl GpuMortonCode {
    pub fn new(code: u32, object_index: u32) -> Self {
        Self { code, object_index, _pad: [0; 2] }
    }
}

impl RadixKey for GpuMortonCode {
    // 4 bytes of object index (least significant) then 4 bytes of code
    const LEVELS: usize = 8;

    #[inline]
    fn get_level(&self, level: usize) -> u8 {
        let key = ((self.code as u64) << 32) | self.object_index as u64;
        (key >> (level * 8)) as u8
    }
}

impl radix_tree::MortonKey for GpuMortonCode {
    #[inline]
    fn morton(&self) -> u32 {
        self.code
    }
}

/// Six frustum planes (left, right, bottom, top, near, far)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuFrustum {
    pub planes: [[f32; 4]; 6],
}

impl GpuFrustum {
    pub fn new(frustum: &Frustum) -> Self {
        Self { planes: frustum.planes.map(|p| p.to_array()) }
    }

    fn planes(&self) -> [Vec4; 6] {
        self.planes.map(Vec4::from_array)
    }
}

/// Parameters of the build / refit kernels
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BuildParams {
    pub object_count: u32,
    pub node_count: u32,
    pub _pad0: u32,
    pub _pad1: u32,
    pub scene_min: [f32; 3],
    pub _pad2: f32,
    pub scene_max: [f32; 3],
    pub _pad3: f32,
}

impl BuildParams {
    pub fn new(object_count: u32, bounds: &SceneBounds) -> Self {
        Self {
            object_count,
            node_count: (2 * object_count).saturating_sub(1),
            _pad0: 0,
            _pad1: 0,
            scene_min: bounds.aabb.min.to_array(),
            _pad2: 0.0,
            scene_max: bounds.aabb.max.to_array(),
            _pad3: 0.0,
        }
    }

    fn scene_bounds(&self) -> SceneBounds {
        SceneBounds {
            aabb: AABB::new(Vec3::from_array(self.scene_min), Vec3::from_array(self.scene_max)),
        }
    }
}

/// Parameters of the FrustumCull kernel
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CullParams {
    pub object_count: u32,
    pub node_count: u32,
    pub root_index: u32,
    pub _pad: u32,
}

// ===== KERNEL THREAD FUNCTIONS =====

/// One thread per object: code of the object's box center
pub fn morton_codes_thread(
    thread_id: u32,
    params: &BuildParams,
    objects: &[GpuObject],
    codes: &mut [GpuMortonCode],
) {
    let i = thread_id as usize;
    if thread_id >= params.object_count || i >= objects.len() || i >= codes.len() {
        return;
    }
    let code = morton::morton_code_for(&objects[i].aabb(), &params.scene_bounds());
    codes[i] = GpuMortonCode::new(code, objects[i].object_index);
}

/// One thread per internal node `i` in `[0, N - 2]`: children and parent links
pub fn build_internal_nodes_thread(
    thread_id: u32,
    params: &BuildParams,
    codes: &[GpuMortonCode],
    nodes: &mut [GpuNode],
) {
    let n = params.object_count as usize;
    let i = thread_id as usize;
    if n < 2 || i >= n - 1 || codes.len() < n || nodes.len() < 2 * n - 1 {
        return;
    }

    let (left, right) = radix_tree::internal_children(&codes[..n], i);
    let node = &mut nodes[i];
    node.left = left;
    node.right = right;
    node.object_index = INVALID_INDEX;
    node.is_leaf = 0;
    if i == 0 {
        node.parent = INVALID_INDEX;
    }
    nodes[left as usize].parent = i as u32;
    nodes[right as usize].parent = i as u32;
}

/// One thread per leaf: object box and index of sorted position `thread_id`
pub fn build_leaves_thread(
    thread_id: u32,
    params: &BuildParams,
    codes: &[GpuMortonCode],
    objects: &[GpuObject],
    nodes: &mut [GpuNode],
) {
    let n = params.object_count as usize;
    let k = thread_id as usize;
    if k >= n || k >= codes.len() || nodes.len() < 2 * n - 1 {
        return;
    }

    let object_index = codes[k].object_index;
    let aabb = objects
        .get(object_index as usize)
        .map(|o| o.aabb())
        .unwrap_or(AABB::EMPTY);

    let leaf = &mut nodes[n - 1 + k];
    leaf.set_aabb(&aabb);
    leaf.left = INVALID_INDEX;
    leaf.right = INVALID_INDEX;
    leaf.object_index = object_index;
    leaf.is_leaf = 1;
    if n == 1 {
        leaf.parent = INVALID_INDEX;
    }
}

/// One thread per leaf: walk to the root, the second thread to reach a
/// node computes its box from its two finished children.
///
/// `counters` holds one arrival counter per internal node, zeroed before
/// the dispatch. The increment stands for an atomic add.
pub fn compute_bounds_thread(
    thread_id: u32,
    params: &BuildParams,
    nodes: &mut [GpuNode],
    counters: &mut [u32],
) {
    let n = params.object_count as usize;
    let k = thread_id as usize;
    if n < 2 || k >= n || nodes.len() < 2 * n - 1 || counters.len() < n - 1 {
        return;
    }

    let mut current = nodes[n - 1 + k].parent;
    while current != INVALID_INDEX {
        let c = current as usize;
        if c >= n - 1 {
            return;
        }
        let previous = counters[c];
        counters[c] = previous + 1;
        if previous == 0 {
            // First arrival: the sibling subtree is not finished yet
            return;
        }

        let node = nodes[c];
        let aabb = nodes[node.left as usize].aabb().union(&nodes[node.right as usize].aabb());
        nodes[c].set_aabb(&aabb);
        current = node.parent;
    }
}

/// One thread per node over all `2N - 1` nodes: leaves copy their object's
/// current box, internal nodes take the union of their children's current
/// boxes. Repeated dispatches converge bottom-up.
pub fn refit_thread(
    thread_id: u32,
    params: &BuildParams,
    objects: &[GpuObject],
    nodes: &mut [GpuNode],
) {
    let i = thread_id as usize;
    if thread_id >= params.node_count || i >= nodes.len() {
        return;
    }

    let node = nodes[i];
    let aabb = if node.is_leaf != 0 {
        objects
            .get(node.object_index as usize)
            .map(|o| o.aabb())
            .unwrap_or(AABB::EMPTY)
    } else {
        match (nodes.get(node.left as usize), nodes.get(node.right as usize)) {
            (Some(left), Some(right)) => left.aabb().union(&right.aabb()),
            _ => return,
        }
    };
    nodes[i].set_aabb(&aabb);
}

/// One thread per object: traverse the whole tree with an explicit stack
/// and write 1 if the object's leaf is reached, 0 otherwise.
///
/// Pushes beyond `TRAVERSAL_STACK_CAPACITY` entries are dropped; builder
/// depth bounds keep real trees far from it.
pub fn frustum_cull_thread(
    thread_id: u32,
    params: &CullParams,
    frustum: &GpuFrustum,
    nodes: &[GpuNode],
    visibility: &mut [u32],
) {
    let object = thread_id as usize;
    if thread_id >= params.object_count || object >= visibility.len() {
        return;
    }

    visibility[object] = 0;
    let node_count = (params.node_count as usize).min(nodes.len());
    if params.root_index as usize >= node_count {
        return;
    }

    let planes = frustum.planes();
    let mut stack = [0u32; TRAVERSAL_STACK_CAPACITY];
    let mut stack_len = 0usize;
    stack[stack_len] = params.root_index;
    stack_len += 1;

    while stack_len > 0 {
        stack_len -= 1;
        let index = stack[stack_len] as usize;
        if index >= node_count {
            continue;
        }

        let node = &nodes[index];
        let aabb = node.aabb();
        if !aabb.is_valid() || planes_reject_box(&planes, aabb.min, aabb.max) {
            continue;
        }

        if node.is_leaf != 0 {
            if node.object_index == thread_id {
                visibility[object] = 1;
                return;
            }
        } else {
            for child in [node.right, node.left] {
                if child != INVALID_INDEX && stack_len < TRAVERSAL_STACK_CAPACITY {
                    stack[stack_len] = child;
                    stack_len += 1;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "kernels_tests.rs"]
mod tests;
