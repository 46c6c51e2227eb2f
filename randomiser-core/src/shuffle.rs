//! Randomness primitives layered on the shared stream.
//!
//! Every helper here draws through `u32` ranges so the consumed values are
//! the same on 32-bit and 64-bit hosts.

use rand::Rng;

use crate::seed::RandomStream;

/// Fisher-Yates shuffle: for `n` from `len - 1` down to 1, swap slot `n`
/// with a uniformly drawn `k` in `0..=n`. Slices shorter than two elements
/// are left alone and consume nothing from the stream.
pub fn shuffle<T>(items: &mut [T], rng: &mut RandomStream) {
    let mut n = items.len();
    while n > 1 {
        n -= 1;
        let k = draw_inclusive(rng, n);
        items.swap(k, n);
    }
}

/// Uniform index in `0..=max`.
pub fn draw_inclusive(rng: &mut RandomStream, max: usize) -> usize {
    debug_assert!(max <= u32::MAX as usize);
    rng.gen_range(0..=max as u32) as usize
}

/// Pick an index with probability proportional to its weight.
///
/// Returns `None` when every weight is zero. Otherwise exactly one `u64`
/// draw is consumed, so weight sums beyond `u32::MAX` are fine.
pub fn pick_weighted(rng: &mut RandomStream, weights: &[u32]) -> Option<usize> {
    let total: u64 = weights.iter().map(|&w| u64::from(w)).sum();
    if total == 0 {
        return None;
    }
    let mut roll = rng.gen_range(0..total);
    for (idx, &w) in weights.iter().enumerate() {
        let w = u64::from(w);
        if roll < w {
            return Some(idx);
        }
        roll -= w;
    }
    None
}
