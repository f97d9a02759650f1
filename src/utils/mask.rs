//! Processing masks for label diffusion
//!
//! A voxel takes part in diffusion only if it has a full 26-neighbourhood
//! (not on the 1-voxel border), carries signal in at least one channel, and
//! lies inside the optional caller-supplied mask.

use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::image::ChannelImage;

/// Interior voxels with non-zero intensity in at least one channel
pub fn interior_signal_mask(image: &ChannelImage, grid: &Grid) -> Result<Vec<bool>> {
    if image.n_voxels() != grid.len() {
        let (nx, ny, nz) = grid.dims();
        return Err(Error::config(format!(
            "image has {} voxels, grid {}x{}x{} needs {}",
            image.n_voxels(), nx, ny, nz, grid.len()
        )));
    }
    let mut mask = vec![false; grid.len()];
    for xyz in grid.interior_indices() {
        mask[xyz] = image.has_signal(xyz);
    }
    Ok(mask)
}

/// Restrict `mask` to voxels where `roi` is non-zero
pub fn intersect_mask(mask: &mut [bool], roi: &[u8]) -> Result<()> {
    if roi.len() != mask.len() {
        return Err(Error::config(format!(
            "mask has {} voxels, expected {}", roi.len(), mask.len()
        )));
    }
    for (m, &r) in mask.iter_mut().zip(roi.iter()) {
        *m = *m && r != 0;
    }
    Ok(())
}

/// Number of voxels set in `mask`
pub fn count(mask: &[bool]) -> usize {
    mask.iter().filter(|&&m| m).count()
}
