/// Morton codes for LBVH construction.
///
/// Object centers are normalized into the scene bounds, quantized to a
/// 1024^3 grid and interleaved into 30-bit codes (x in the highest bit of
/// each triplet). The `MortonCodes` kernel calls `morton_code_for` per thread.

use glam::Vec3;
use rdst::RadixSort;
use crate::compute::GpuMortonCode;
use crate::scene::{AABB, SceneBounds};

/// Largest quantized coordinate per axis (10 bits)
pub const MORTON_GRID_MAX: f32 = 1023.0;

/// Insert two zero bits after each of the 10 low bits of `v`
#[inline]
pub fn expand_bits(v: u32) -> u32 {
    let mut v = v & 0x3ff;
    v = v.wrapping_mul(0x0001_0001) & 0xFF00_00FF;
    v = v.wrapping_mul(0x0000_0101) & 0x0F00_F00F;
    v = v.wrapping_mul(0x0000_0011) & 0xC30C_30C3;
    v = v.wrapping_mul(0x0000_0005) & 0x4924_9249;
    v
}

/// 30-bit code of a point already normalized into `[0, 1]^3`.
///
/// Out-of-range coordinates are clamped; NaN quantizes to 0.
#[inline]
pub fn morton_3d(normalized: Vec3) -> u32 {
    let q = (normalized * MORTON_GRID_MAX).clamp(Vec3::ZERO, Vec3::splat(MORTON_GRID_MAX));
    let x = expand_bits(q.x as u32);
    let y = expand_bits(q.y as u32);
    let z = expand_bits(q.z as u32);
    (x << 2) | (y << 1) | z
}

/// Code of an object box center relative to the scene bounds.
///
/// Invalid boxes map to code 0 so they still get a deterministic leaf.
#[inline]
pub fn morton_code_for(aabb: &AABB, bounds: &SceneBounds) -> u32 {
    if !aabb.is_valid() {
        return 0;
    }
    morton_3d(bounds.normalize(aabb.center()))
}

/// Sort (code, object index) pairs ascending by code, ties by object index.
///
/// Stand-in for a GPU radix sort: runs on a CPU copy of the code buffer.
pub fn sort_morton_codes(codes: &mut [GpuMortonCode]) {
    codes.radix_sort_unstable();
}

#[cfg(test)]
#[path = "morton_tests.rs"]
mod tests;
