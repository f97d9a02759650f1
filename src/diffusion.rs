//! Statistical uncertainty reduction by label-probability diffusion
//!
//! Multi-atlas or statistical labelings leave many voxels with an ambiguous
//! ranking of candidate labels. This engine repeatedly replaces the
//! probability of each uncertain voxel with a weighted average over its most
//! relevant neighbours, where relevance combines the neighbour's own
//! certainty and the intensity similarity of the two voxels. Confident
//! voxels act as sources and are left untouched; the process runs until the
//! mean change per round falls below a tolerance.
//!
//! Every round reads a frozen copy of the label stacks and writes into a
//! second buffer, so the result does not depend on the order in which labels
//! or voxels are processed, and the voxel loop runs in parallel.

use log::{debug, info, trace};
use rayon::prelude::*;

use crate::certainty::{certainty, max_certainty_map};
use crate::distribution::{apply_intensity_model, ClassStatistics};
use crate::error::{Error, Result};
use crate::grid::{Grid, NGB_SIZE};
use crate::image::ChannelImage;
use crate::label_stack::{LabelCatalogue, LabelId, LabelStack, MAX_NBEST};
use crate::selection::TopK;
use crate::utils::alloc::try_filled;
use crate::utils::mask::{count, interior_signal_mask, intersect_mask};
use crate::weights::{self, NeighborWeights};

/// Mean absolute change below which the iteration is considered converged
pub const CONVERGENCE_TOLERANCE: f64 = 0.0005;

/// Denominators at or below this value skip the update
const MIN_DENOMINATOR: f64 = 1e-9;

/// Parameters of the diffusion iteration
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DiffusionParams {
    /// Maximum number of rounds
    pub iterations: usize,
    /// Image weight bandwidth: larger values let diffusion cross stronger
    /// intensity edges
    pub scale: f64,
    /// Certainty exponent; larger values make fewer voxels count as certain
    pub factor: f64,
    /// Number of neighbours (1..=26) averaged per update
    pub ngb_size: usize,
    /// Probability margin at or below which a voxel is updated; remapped
    /// through the certainty function before use
    pub min_certainty: f64,
    /// Re-estimate a Gaussian intensity model per label every round and
    /// attenuate unlikely labels before diffusing
    pub compute_distribution: bool,
    /// Mean absolute change per round that stops the iteration
    pub tolerance: f64,
}

impl Default for DiffusionParams {
    fn default() -> Self {
        Self {
            iterations: 500,
            scale: 1.0,
            factor: 1.0,
            ngb_size: 4,
            min_certainty: 0.5,
            compute_distribution: false,
            tolerance: CONVERGENCE_TOLERANCE,
        }
    }
}

impl DiffusionParams {
    pub fn validate(&self) -> Result<()> {
        if !(1..=NGB_SIZE).contains(&self.ngb_size) {
            return Err(Error::config(format!(
                "ngb_size must be in 1..={}, got {}", NGB_SIZE, self.ngb_size
            )));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(Error::config(format!("scale must be finite and positive, got {}", self.scale)));
        }
        if !(self.factor.is_finite() && self.factor > 0.0) {
            return Err(Error::config(format!("factor must be finite and positive, got {}", self.factor)));
        }
        if !(self.min_certainty.is_finite() && self.min_certainty >= 0.0) {
            return Err(Error::config(format!(
                "min_certainty must be finite and non-negative, got {}", self.min_certainty
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(Error::config(format!(
                "tolerance must be finite and non-negative, got {}", self.tolerance
            )));
        }
        Ok(())
    }
}

/// Why the iteration stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Converged,
    IterationLimitReached,
}

/// Statistics of one diffusion round
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RoundStats {
    /// 1-based round number
    pub round: usize,
    /// Mean absolute probability change over updated (voxel, label) pairs
    pub mean_diff: f64,
    pub max_diff: f64,
    /// Number of updated (voxel, label) pairs
    pub updated: usize,
    /// Updates crossing the 0.5 probability level
    pub flipped: usize,
    /// Voxels whose top label changed when re-sorting
    pub relabelled: usize,
}

/// Outcome of a diffusion run
#[derive(Debug, Clone, PartialEq)]
pub struct DiffusionReport {
    pub rounds: Vec<RoundStats>,
    pub termination: Termination,
}

impl DiffusionReport {
    pub fn iterations(&self) -> usize {
        self.rounds.len()
    }

    pub fn last(&self) -> Option<&RoundStats> {
        self.rounds.last()
    }

    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }
}

/// Running sums of probability changes within a round
#[derive(Debug, Clone, Copy, Default)]
struct DiffAccumulator {
    sum: f64,
    max: f64,
    count: usize,
    flipped: usize,
}

impl DiffAccumulator {
    #[inline]
    fn push(mut self, prev: f64, new: f64) -> Self {
        let d = (new - prev).abs();
        self.sum += d;
        self.max = self.max.max(d);
        self.count += 1;
        if (prev < 0.5 && new > 0.5) || (prev > 0.5 && new < 0.5) {
            self.flipped += 1;
        }
        self
    }

    fn merge(self, other: Self) -> Self {
        DiffAccumulator {
            sum: self.sum + other.sum,
            max: self.max.max(other.max),
            count: self.count + other.count,
            flipped: self.flipped + other.flipped,
        }
    }

    fn mean(&self) -> f64 {
        if self.count > 0 { self.sum / self.count as f64 } else { 0.0 }
    }
}

/// Read-only state shared by every label pass of a round
struct RoundContext<'a> {
    grid: &'a Grid,
    image: &'a ChannelImage,
    mask: &'a [bool],
    cache: &'a [NeighborWeights],
    nobj: usize,
    factor: f64,
    threshold: f64,
    ngb_size: usize,
    compute_distribution: bool,
}

/// Transient per-label maps, allocated once per run
struct LabelMaps {
    /// Slot of the current label per voxel, `nbest` when absent
    depth: Vec<u8>,
    certainty: Vec<f64>,
}

/// Certainty of a voxel for the label stored at `depth`
///
/// The margin is taken against the second slot for the top label, against
/// the label's own slot lower down, and against the last slot when the label
/// is absent.
#[inline]
fn voxel_certainty(stack: &LabelStack, xyz: usize, depth: usize, factor: f64) -> f64 {
    let voxel = stack.voxel(xyz);
    let nbest = stack.nbest();
    let reference = if depth == 0 {
        stack.second_proba(xyz)
    } else if depth < nbest {
        voxel[depth].proba
    } else {
        voxel[nbest - 1].proba
    };
    certainty(voxel[0].proba - reference, factor)
}

/// Diffuse one label: reads `current`, writes updated probabilities to `next`
fn diffuse_label(
    ctx: &RoundContext,
    current: &LabelStack,
    next: &mut LabelStack,
    maps: &mut LabelMaps,
    label: LabelId,
) -> DiffAccumulator {
    let nbest = current.nbest();
    let absent = nbest as u8;

    maps.depth
        .par_iter_mut()
        .enumerate()
        .for_each(|(xyz, d)| {
            *d = current.depth_of(xyz, label).map_or(absent, |m| m as u8);
        });

    let depth = &maps.depth;
    maps.certainty
        .par_iter_mut()
        .enumerate()
        .for_each(|(xyz, c)| {
            *c = if ctx.mask[xyz] {
                voxel_certainty(current, xyz, depth[xyz] as usize, ctx.factor)
            } else {
                0.0
            };
        });

    let certainty = &maps.certainty;
    next.slots_mut()
        .par_chunks_mut(nbest)
        .enumerate()
        .filter(|(xyz, _)| {
            ctx.mask[*xyz] && depth[*xyz] < absent && certainty[*xyz] <= ctx.threshold
        })
        .map_init(
            || (TopK::new(), [0.0f64; NGB_SIZE]),
            |(top, ngb_weight), (xyz, out)| {
                let m = depth[xyz] as usize;
                let own = certainty[xyz];
                let prev = current.voxel(xyz)[m].proba;

                let cached = &ctx.cache[xyz];
                for j in 0..NGB_SIZE {
                    ngb_weight[j] = certainty[ctx.grid.neighbor(xyz, j)] * cached[j] as f64;
                }

                let mut num = own * prev;
                let mut den = own;
                for &j in top.select(&ngb_weight[..], ctx.ngb_size) {
                    let ngb = ctx.grid.neighbor(xyz, j as usize);
                    let w = ngb_weight[j as usize];
                    let d = depth[ngb] as usize;
                    // absent label: fall back on the neighbour's lowest stored probability
                    let p = if d < nbest {
                        current.voxel(ngb)[d].proba
                    } else {
                        current.last_proba(ngb)
                    };
                    num += w * p;
                    den += w;
                }
                if den <= MIN_DENOMINATOR {
                    return None;
                }

                let new = num / den;
                out[m].proba = new;
                Some((prev, new))
            },
        )
        .fold(DiffAccumulator::default, |acc, update| match update {
            Some((prev, new)) => acc.push(prev, new),
            None => acc,
        })
        .reduce(DiffAccumulator::default, DiffAccumulator::merge)
}

/// One full round over all labels; `current` holds the result afterwards
fn diffusion_round(
    ctx: &RoundContext,
    current: &mut LabelStack,
    next: &mut LabelStack,
    maps: &mut LabelMaps,
    round: usize,
) -> RoundStats {
    if ctx.compute_distribution {
        let stats = ClassStatistics::estimate(ctx.image, current, ctx.mask, ctx.nobj);
        let changed = apply_intensity_model(ctx.image, current, ctx.mask, &stats);
        trace!("round {}: intensity model relabelled {} voxels", round, changed);
    }

    next.slots_mut().copy_from_slice(current.slots());

    let mut acc = DiffAccumulator::default();
    for n in 0..ctx.nobj {
        let label_acc = diffuse_label(ctx, current, next, maps, n as LabelId);
        trace!("round {}: label {} updated {} voxels", round, n, label_acc.count);
        acc = acc.merge(label_acc);
    }

    std::mem::swap(current, next);
    let relabelled = current.sort_masked(ctx.mask);

    RoundStats {
        round,
        mean_diff: acc.mean(),
        max_diff: acc.max,
        updated: acc.count,
        flipped: acc.flipped,
        relabelled,
    }
}

/// Label-probability diffusion engine
///
/// Owns the intensity image, the processing mask and, once initialised, the
/// label stacks that the diffusion mutates.
pub struct UncertaintyReduction {
    grid: Grid,
    image: ChannelImage,
    mask: Vec<bool>,
    nbest: usize,
    stack: Option<LabelStack>,
    catalogue: LabelCatalogue,
}

impl UncertaintyReduction {
    /// Create an engine over `image` on `grid`
    ///
    /// # Arguments
    /// * `grid` - Volume dimensions
    /// * `image` - Intensity channels, each of `grid.len()` voxels
    /// * `nbest` - Maximum number of labels tracked per voxel (1..=255)
    ///
    /// The processing mask excludes the 1-voxel border and voxels that are
    /// zero in every channel.
    pub fn new(grid: Grid, image: ChannelImage, nbest: usize) -> Result<Self> {
        if nbest == 0 || nbest > MAX_NBEST {
            return Err(Error::config(format!("nbest must be in 1..={}, got {}", MAX_NBEST, nbest)));
        }
        let mask = interior_signal_mask(&image, &grid)?;
        debug!("processing mask: {} of {} voxels", count(&mask), grid.len());
        Ok(UncertaintyReduction {
            grid,
            image,
            mask,
            nbest,
            stack: None,
            catalogue: LabelCatalogue::default(),
        })
    }

    /// Further restrict processing to voxels where `roi` is non-zero
    pub fn with_mask(mut self, roi: &[u8]) -> Result<Self> {
        intersect_mask(&mut self.mask, roi)?;
        debug!("processing mask after ROI: {} voxels", count(&self.mask));
        Ok(self)
    }

    /// Install the initial label stacks and their catalogue
    ///
    /// Every voxel is re-ranked on entry. A stack with more than `nbest`
    /// slots keeps only its top `nbest`; a stack with fewer slots lowers the
    /// engine's `nbest`.
    pub fn set_best_probabilities(&mut self, mut stack: LabelStack, catalogue: LabelCatalogue) -> Result<()> {
        if stack.n_voxels() != self.grid.len() {
            return Err(Error::config(format!(
                "label stack has {} voxels, grid has {}", stack.n_voxels(), self.grid.len()
            )));
        }
        if let Some(max) = stack.max_label() {
            if max as usize >= catalogue.len() {
                return Err(Error::config(format!(
                    "label index {} outside catalogue of {} labels", max, catalogue.len()
                )));
            }
        }
        stack.sort_all();
        if stack.nbest() > self.nbest {
            stack.truncate(self.nbest)?;
        } else if stack.nbest() < self.nbest {
            debug!("nbest lowered from {} to {}", self.nbest, stack.nbest());
            self.nbest = stack.nbest();
        }
        self.stack = Some(stack);
        self.catalogue = catalogue;
        Ok(())
    }

    /// Initialise from a discrete segmentation: every masked voxel gets its
    /// label with probability 1 in the top slot
    pub fn init_from_segmentation(&mut self, seg: &[i32]) -> Result<()> {
        if seg.len() != self.grid.len() {
            return Err(Error::config(format!(
                "segmentation has {} voxels, grid has {}", seg.len(), self.grid.len()
            )));
        }
        let (stack, catalogue) = LabelStack::from_segmentation(seg, &self.mask, self.nbest)?;
        info!("segmentation initialised with {} labels", catalogue.len());
        self.stack = Some(stack);
        self.catalogue = catalogue;
        Ok(())
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    pub fn nbest(&self) -> usize {
        self.nbest
    }

    pub fn catalogue(&self) -> &LabelCatalogue {
        &self.catalogue
    }

    pub fn label_stack(&self) -> Option<&LabelStack> {
        self.stack.as_ref()
    }

    pub fn into_label_stack(self) -> Option<LabelStack> {
        self.stack
    }

    /// Slot-major probabilities `[m][xyz]`
    pub fn probabilities(&self) -> Result<Vec<Vec<f64>>> {
        Ok(self.require_stack()?.probabilities())
    }

    /// Slot-major labels `[m][xyz]`
    pub fn labels(&self) -> Result<Vec<Vec<Option<LabelId>>>> {
        Ok(self.require_stack()?.labels())
    }

    fn require_stack(&self) -> Result<&LabelStack> {
        self.stack.as_ref().ok_or_else(|| Error::config("label probabilities have not been initialised"))
    }

    pub fn compute_max_image_weight(&self, scale: f64) -> Result<Vec<f64>> {
        weights::max_image_weight(&self.image, &self.grid, scale)
    }

    pub fn compute_min_image_weight(&self, scale: f64) -> Result<Vec<f64>> {
        weights::min_image_weight(&self.image, &self.grid, scale)
    }

    pub fn compute_all_image_weight(&self, scale: f64) -> Result<Vec<NeighborWeights>> {
        weights::all_image_weights(&self.image, &self.grid, scale)
    }

    pub fn compute_best_image_weight(&self, scale: f64, ngb_size: usize) -> Result<Vec<Vec<f64>>> {
        if !(1..=NGB_SIZE).contains(&ngb_size) {
            return Err(Error::config(format!("ngb_size must be in 1..={}, got {}", NGB_SIZE, ngb_size)));
        }
        weights::best_image_weights(&self.image, &self.grid, scale, ngb_size)
    }

    /// Certainty of the top-two margin per voxel, 0 outside the mask
    pub fn compute_max_certainty(&self, factor: f64) -> Result<Vec<f64>> {
        Ok(max_certainty_map(self.require_stack()?, &self.mask, factor))
    }

    /// Run the diffusion until convergence or the iteration cap
    pub fn diffuse_certainty(&mut self, params: &DiffusionParams) -> Result<DiffusionReport> {
        self.diffuse_certainty_with_progress(params, |_, _| {})
    }

    /// Diffusion with progress callback
    ///
    /// # Arguments
    /// * `params` - Diffusion parameters
    /// * `progress_callback` - Called after every round with (round, iterations)
    ///
    /// # Returns
    /// Per-round statistics and the reason the iteration stopped
    pub fn diffuse_certainty_with_progress<F>(
        &mut self,
        params: &DiffusionParams,
        mut progress_callback: F,
    ) -> Result<DiffusionReport>
    where
        F: FnMut(usize, usize),
    {
        params.validate()?;
        let n_total = self.grid.len();
        let current = self.stack.as_mut()
            .ok_or_else(|| Error::config("label probabilities have not been initialised"))?;

        info!("certainty exponent {}", params.factor);
        let threshold = certainty(params.min_certainty, params.factor);
        info!("minimum certainty threshold {}", threshold);

        let cache = weights::diffusion_weight_cache(&self.image, &self.grid, params.scale, params.ngb_size)?;
        let mut next = LabelStack::new(n_total, current.nbest())?;
        let mut maps = LabelMaps {
            depth: try_filled("depth map", n_total, 0u8)?,
            certainty: try_filled("certainty map", n_total, 0.0f64)?,
        };

        let ctx = RoundContext {
            grid: &self.grid,
            image: &self.image,
            mask: &self.mask,
            cache: &cache,
            nobj: self.catalogue.len(),
            factor: params.factor,
            threshold,
            ngb_size: params.ngb_size,
            compute_distribution: params.compute_distribution,
        };

        let mut rounds = Vec::with_capacity(params.iterations.min(1024));
        let mut termination = Termination::IterationLimitReached;
        for t in 0..params.iterations {
            let stats = diffusion_round(&ctx, current, &mut next, &mut maps, t + 1);
            debug!(
                "iter {}: mean diff. {:.6}, max diff. {:.6}, updated {}, flipped {}, relabelled {}",
                stats.round, stats.mean_diff, stats.max_diff, stats.updated, stats.flipped, stats.relabelled
            );
            progress_callback(t + 1, params.iterations);
            rounds.push(stats);

            if stats.updated == 0 || stats.mean_diff < params.tolerance {
                termination = Termination::Converged;
                break;
            }
        }

        info!("diffusion stopped after {} rounds: {:?}", rounds.len(), termination);
        Ok(DiffusionReport { rounds, termination })
    }

    /// Snapshot of the current stacks, e.g. to compare before/after a run
    pub fn snapshot(&self) -> Result<LabelStack> {
        Ok(self.require_stack()?.clone())
    }
}
