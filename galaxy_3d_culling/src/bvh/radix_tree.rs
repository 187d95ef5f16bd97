/// Binary radix tree over sorted Morton codes (Karras 2012).
///
/// Each internal node `i` of `N - 1` is built independently from the
/// sorted codes, which is what lets the `BuildInternalNodes` kernel run
/// one thread per node in any order.
///
/// Node layout shared with the kernels: internal nodes `0..N-1` (root is
/// node 0), leaves `N-1..2N-1` (leaf of sorted position `k` is `N-1+k`).
///
/// Keys are `(code, sorted position)`: equal codes fall back to the common
/// prefix of their positions, so every key is distinct.

/// Element of a sorted code array
pub trait MortonKey {
    fn morton(&self) -> u32;
}

impl MortonKey for u32 {
    #[inline]
    fn morton(&self) -> u32 {
        *self
    }
}

/// Length of the common prefix of keys `i` and `j`, `-1` when `j` is out of range
#[inline]
pub fn common_prefix<K: MortonKey>(codes: &[K], i: i64, j: i64) -> i32 {
    if j < 0 || j >= codes.len() as i64 {
        return -1;
    }
    let a = codes[i as usize].morton();
    let b = codes[j as usize].morton();
    if a == b {
        32 + ((i as u32) ^ (j as u32)).leading_zeros() as i32
    } else {
        (a ^ b).leading_zeros() as i32
    }
}

/// Range of sorted positions `[first, last]` covered by internal node `i`
pub fn determine_range<K: MortonKey>(codes: &[K], i: usize) -> (usize, usize) {
    let n = codes.len() as i64;
    let i = i as i64;
    if i == 0 {
        return (0, (n - 1) as usize);
    }

    let direction: i64 = if common_prefix(codes, i, i + 1) > common_prefix(codes, i, i - 1) { 1 } else { -1 };
    let min_prefix = common_prefix(codes, i, i - direction);

    let mut max_length: i64 = 2;
    while common_prefix(codes, i, i + max_length * direction) > min_prefix {
        max_length *= 2;
    }

    let mut length: i64 = 0;
    let mut step = max_length / 2;
    while step >= 1 {
        if common_prefix(codes, i, i + (length + step) * direction) > min_prefix {
            length += step;
        }
        step /= 2;
    }

    let j = i + length * direction;
    (i.min(j) as usize, i.max(j) as usize)
}

/// Position `s` such that `[first, s]` and `[s + 1, last]` are the two children
pub fn find_split<K: MortonKey>(codes: &[K], first: usize, last: usize) -> usize {
    let first_i = first as i64;
    let node_prefix = common_prefix(codes, first_i, last as i64);

    let mut split = first_i;
    let mut step = (last - first) as i64;
    loop {
        step = (step + 1) >> 1;
        let candidate = split + step;
        if candidate < last as i64 && common_prefix(codes, first_i, candidate) > node_prefix {
            split = candidate;
        }
        if step <= 1 {
            break;
        }
    }
    split as usize
}

/// Child node indices `(left, right)` of internal node `i`
pub fn internal_children<K: MortonKey>(codes: &[K], i: usize) -> (u32, u32) {
    let leaf_offset = codes.len() - 1;
    let (first, last) = determine_range(codes, i);
    let split = find_split(codes, first, last);

    let left = if split == first { leaf_offset + split } else { split };
    let right = if split + 1 == last { leaf_offset + split + 1 } else { split + 1 };
    (left as u32, right as u32)
}

#[cfg(test)]
#[path = "radix_tree_tests.rs"]
mod tests;
