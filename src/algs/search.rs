//! Binary search over sorted random-access sequences.
//!
//! Used for locating a column inside a CSR row, an off-diagonal column in the
//! sorted ghost-column list, a key in the non-local accumulators, and the
//! owner of a global index in `cpu_bounds`.

/// Position of `x` in the ascending slice `sorted`, if present.
#[inline]
pub fn binary_search<T: Ord>(sorted: &[T], x: &T) -> Option<usize> {
    let mut lo = 0usize;
    let mut hi = sorted.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match sorted[mid].cmp(x) {
            std::cmp::Ordering::Equal => return Some(mid),
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
        }
    }
    None
}

/// Index of the first element strictly greater than `x`.
#[inline]
pub fn upper_bound<T: Ord>(sorted: &[T], x: &T) -> usize {
    sorted.partition_point(|v| v <= x)
}

/// Rank owning global index `index`, given per-rank offsets `cpu_bounds`
/// (`size + 1` entries, rank `r` owns `[cpu_bounds[r], cpu_bounds[r+1])`).
///
/// Empty ranks are skipped: the owner is the last rank whose range starts at
/// or before `index`.
pub fn owner_of(cpu_bounds: &[usize], index: usize) -> Option<usize> {
    let total = *cpu_bounds.last()?;
    if index >= total {
        return None;
    }
    // at least cpu_bounds[0] == 0 <= index, so the bound is >= 1
    upper_bound(cpu_bounds, &index).checked_sub(1)
}
