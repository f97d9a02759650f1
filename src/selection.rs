//! Partial top-K selection over the 26 neighbour weights
//!
//! Called once per voxel, label and round, so it never allocates and never
//! sorts the full array. A bounded insertion keeps the current best `k`
//! candidates in descending order; a candidate only displaces an entry with a
//! strictly smaller weight, which makes the selection stable (on ties the
//! neighbour enumerated first wins).

use crate::grid::NGB_SIZE;

/// Reusable top-K scratch buffer
#[derive(Debug, Clone)]
pub struct TopK {
    rank: [u8; NGB_SIZE],
    value: [f64; NGB_SIZE],
}

impl Default for TopK {
    fn default() -> Self {
        Self::new()
    }
}

impl TopK {
    pub fn new() -> Self {
        TopK {
            rank: [0; NGB_SIZE],
            value: [0.0; NGB_SIZE],
        }
    }

    /// Neighbour indices of the `k` largest `weights`, largest first
    ///
    /// `k` is clamped to `1..=weights.len()`; `weights` holds at most 26
    /// entries.
    pub fn select(&mut self, weights: &[f64], k: usize) -> &[u8] {
        debug_assert!(weights.len() <= NGB_SIZE);
        let k = k.clamp(1, weights.len().max(1)).min(weights.len());
        let mut filled = 0usize;

        for (j, &w) in weights.iter().enumerate() {
            // position of the first kept entry strictly smaller than w
            let mut pos = filled;
            while pos > 0 && self.value[pos - 1] < w {
                pos -= 1;
            }
            if pos >= k {
                continue;
            }
            let end = if filled < k { filled } else { k - 1 };
            let mut i = end;
            while i > pos {
                self.value[i] = self.value[i - 1];
                self.rank[i] = self.rank[i - 1];
                i -= 1;
            }
            self.value[pos] = w;
            self.rank[pos] = j as u8;
            if filled < k {
                filled += 1;
            }
        }

        &self.rank[..filled]
    }
}

/// Indices of the `k` largest values of `weights`, largest first
///
/// Convenience wrapper allocating its own scratch buffer.
pub fn argmax_k(weights: &[f64], k: usize) -> Vec<u8> {
    let mut top = TopK::new();
    top.select(weights, k).to_vec()
}
