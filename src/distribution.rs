//! Per-label Gaussian intensity model
//!
//! Optional reweighting applied at the start of a diffusion round: each
//! label's intensity mean and variance are estimated per used channel,
//! weighted by the top-slot probability of voxels where the label ranks
//! first. Every stored probability is then attenuated by the least likely
//! channel:
//!
//! ```text
//! p *= min_c exp(-0.5 * (I_c - mean[n][c])^2 / var[n][c])
//! ```

use rayon::prelude::*;

use crate::image::ChannelImage;
use crate::label_stack::LabelStack;

/// Weighted intensity statistics per label and channel
#[derive(Debug, Clone)]
pub struct ClassStatistics {
    /// `mean[n][c]`
    pub mean: Vec<Vec<f64>>,
    /// `var[n][c]`
    pub var: Vec<Vec<f64>>,
    /// Summed top-slot probability per label
    pub weight: Vec<f64>,
}

impl ClassStatistics {
    /// Estimate statistics of `nobj` labels over the masked voxels
    pub fn estimate(image: &ChannelImage, stack: &LabelStack, mask: &[bool], nobj: usize) -> Self {
        let nc = image.nc();
        let mut mean = vec![vec![0.0; nc]; nobj];
        let mut var = vec![vec![0.0; nc]; nobj];
        let mut weight = vec![0.0; nobj];

        let top_of = |xyz: usize| -> Option<(usize, f64)> {
            if !mask[xyz] {
                return None;
            }
            let top = stack.top(xyz);
            top.label.map(|l| l as usize).filter(|&n| n < nobj).map(|n| (n, top.proba))
        };

        for xyz in 0..stack.n_voxels() {
            if let Some((n, p)) = top_of(xyz) {
                for c in image.used_channels() {
                    mean[n][c] += p * image.channel(c)[xyz];
                }
                weight[n] += p;
            }
        }
        for n in 0..nobj {
            if weight[n] > 0.0 {
                for c in image.used_channels() {
                    mean[n][c] /= weight[n];
                }
            }
        }

        for xyz in 0..stack.n_voxels() {
            if let Some((n, p)) = top_of(xyz) {
                for c in image.used_channels() {
                    let d = image.channel(c)[xyz] - mean[n][c];
                    var[n][c] += p * d * d;
                }
            }
        }
        for n in 0..nobj {
            if weight[n] > 0.0 {
                for c in image.used_channels() {
                    var[n][c] /= weight[n];
                }
            }
        }

        ClassStatistics { mean, var, weight }
    }

    /// Gaussian likelihood factor of label `n` at `xyz`, minimum over channels
    ///
    /// Labels without support and channels with non-positive variance
    /// contribute a factor of 1.
    pub fn likelihood(&self, image: &ChannelImage, n: usize, xyz: usize) -> f64 {
        if n >= self.weight.len() || self.weight[n] <= 0.0 {
            return 1.0;
        }
        let mut proba = 1.0f64;
        for c in image.used_channels() {
            let v = self.var[n][c];
            if v > 0.0 {
                let d = image.channel(c)[xyz] - self.mean[n][c];
                let pc = (-0.5 * d * d / v).exp();
                if pc < proba {
                    proba = pc;
                }
            }
        }
        proba
    }
}

/// Attenuate every set slot of the masked voxels by its label's likelihood,
/// then re-sort those voxels
///
/// Returns the number of voxels whose top label changed.
pub fn apply_intensity_model(
    image: &ChannelImage,
    stack: &mut LabelStack,
    mask: &[bool],
    stats: &ClassStatistics,
) -> usize {
    let nbest = stack.nbest();
    stack
        .slots_mut()
        .par_chunks_mut(nbest)
        .enumerate()
        .filter(|(xyz, _)| mask[*xyz])
        .for_each(|(xyz, voxel)| {
            for slot in voxel.iter_mut() {
                if let Some(n) = slot.label {
                    slot.proba *= stats.likelihood(image, n as usize, xyz);
                }
            }
        });
    stack.sort_masked(mask)
}
