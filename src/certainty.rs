//! Certainty of a voxel's ranking
//!
//! Certainty is a power-law transform of a probability margin:
//! `c = |delta|^factor`. Larger factors make the transform more selective,
//! so only voxels with a wide margin count as certain.

use rayon::prelude::*;

use crate::label_stack::LabelStack;

/// Power-law certainty of a probability margin
#[inline(always)]
pub fn certainty(delta: f64, factor: f64) -> f64 {
    delta.abs().powf(factor)
}

/// Certainty of the margin between the two best labels at every voxel
///
/// Voxels outside `mask` get 0.
pub fn max_certainty_map(stack: &LabelStack, mask: &[bool], factor: f64) -> Vec<f64> {
    debug_assert_eq!(mask.len(), stack.n_voxels());
    (0..stack.n_voxels())
        .into_par_iter()
        .map(|xyz| {
            if mask[xyz] {
                certainty(stack.top(xyz).proba - stack.second_proba(xyz), factor)
            } else {
                0.0
            }
        })
        .collect()
}
