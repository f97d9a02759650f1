//! Per-voxel image weight maps over the 26-neighbourhood
//!
//! Border voxels have no complete neighbourhood and keep a weight of 0 in
//! every map.

use rayon::prelude::*;

use crate::error::Result;
use crate::grid::{Grid, NGB_SIZE};
use crate::image::ChannelImage;
use crate::selection::TopK;
use crate::utils::alloc::try_filled;

/// Weights of the 26 neighbours of one voxel, in `NEIGHBOR_OFFSETS` order
pub type NeighborWeights = [f32; NGB_SIZE];

fn neighbor_weights(image: &ChannelImage, grid: &Grid, xyz: usize, scale: f64) -> [f64; NGB_SIZE] {
    let mut w = [0.0f64; NGB_SIZE];
    for (j, wj) in w.iter_mut().enumerate() {
        *wj = image.weight(xyz, grid.neighbor(xyz, j), scale);
    }
    w
}

/// Fill `out[xyz]` from `f(xyz)` for interior voxels, in parallel
fn fill_interior<T, F>(grid: &Grid, out: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    out.par_iter_mut()
        .enumerate()
        .filter(|(xyz, _)| !grid.is_border(*xyz))
        .for_each(|(xyz, v)| *v = f(xyz));
}

/// Largest neighbour weight of each voxel
pub fn max_image_weight(image: &ChannelImage, grid: &Grid, scale: f64) -> Result<Vec<f64>> {
    let mut out = try_filled("max image weight", grid.len(), 0.0f64)?;
    fill_interior(grid, &mut out, |xyz| {
        neighbor_weights(image, grid, xyz, scale).iter().fold(0.0f64, |a, &b| a.max(b))
    });
    Ok(out)
}

/// Smallest neighbour weight of each voxel
pub fn min_image_weight(image: &ChannelImage, grid: &Grid, scale: f64) -> Result<Vec<f64>> {
    let mut out = try_filled("min image weight", grid.len(), 0.0f64)?;
    fill_interior(grid, &mut out, |xyz| {
        neighbor_weights(image, grid, xyz, scale).iter().fold(1.0f64, |a, &b| a.min(b))
    });
    Ok(out)
}

/// All 26 neighbour weights of each voxel
pub fn all_image_weights(image: &ChannelImage, grid: &Grid, scale: f64) -> Result<Vec<NeighborWeights>> {
    let mut out = try_filled("image weights", grid.len(), [0.0f32; NGB_SIZE])?;
    fill_interior(grid, &mut out, |xyz| {
        neighbor_weights(image, grid, xyz, scale).map(|w| w as f32)
    });
    Ok(out)
}

/// The `k` largest neighbour weights of each voxel, largest first
///
/// Returned slot-major: `out[n][xyz]` is the n-th best weight at `xyz`.
pub fn best_image_weights(
    image: &ChannelImage,
    grid: &Grid,
    scale: f64,
    k: usize,
) -> Result<Vec<Vec<f64>>> {
    let k = k.clamp(1, NGB_SIZE);
    let mut per_voxel = try_filled("best image weights", grid.len(), [0.0f64; NGB_SIZE])?;
    per_voxel
        .par_iter_mut()
        .enumerate()
        .filter(|(xyz, _)| !grid.is_border(*xyz))
        .for_each_init(TopK::new, |top, (xyz, best)| {
            let w = neighbor_weights(image, grid, xyz, scale);
            for (n, &j) in top.select(&w, k).iter().enumerate() {
                best[n] = w[j as usize];
            }
        });

    let mut out = Vec::with_capacity(k);
    for n in 0..k {
        let mut layer = try_filled("best image weights", grid.len(), 0.0f64)?;
        for (dst, src) in layer.iter_mut().zip(per_voxel.iter()) {
            *dst = src[n];
        }
        out.push(layer);
    }
    Ok(out)
}

/// Weight cache consumed by the diffusion iterator
///
/// Each neighbour weight is divided by the neighbourhood size `k` so the
/// summed contribution of the K selected neighbours stays on the scale of a
/// single voxel's own certainty.
pub fn diffusion_weight_cache(
    image: &ChannelImage,
    grid: &Grid,
    scale: f64,
    k: usize,
) -> Result<Vec<NeighborWeights>> {
    let inv_k = 1.0 / k.max(1) as f64;
    let mut out = try_filled("diffusion weight cache", grid.len(), [0.0f32; NGB_SIZE])?;
    fill_interior(grid, &mut out, |xyz| {
        neighbor_weights(image, grid, xyz, scale).map(|w| (w * inv_k) as f32)
    });
    Ok(out)
}
