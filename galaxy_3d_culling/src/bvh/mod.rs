//! Bounding volume hierarchy module
//!
//! Node arena, CPU median-split builder, Morton/radix-tree helpers of the
//! LBVH builder, and the rebuild/refit maintenance policy.

mod node;
pub mod cpu_builder;
pub mod morton;
pub mod radix_tree;
mod maintenance;

pub use node::{Bvh, BvhNode, INVALID_INDEX, TRAVERSAL_STACK_CAPACITY};
pub use maintenance::{MaintenancePolicy, MaintenanceAction, RebuildReason};
