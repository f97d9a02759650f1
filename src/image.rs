//! Multi-channel intensity volume and the image similarity weight
//!
//! Diffusion between two neighbouring voxels is modulated by how similar
//! their intensity profiles are. For channels `c` marked as used:
//!
//! ```text
//! maxdiff = max_c |I_c[xyz] - I_c[ngb]| / norm_c
//! w       = 1 / (1 + (maxdiff / scale)^2)
//! ```
//!
//! where `norm_c` is either a global per-channel scale or a per-voxel
//! variance map evaluated at `xyz`.

use crate::error::{Error, Result};

/// Per-channel intensity normalisation
#[derive(Debug, Clone)]
pub enum Normalization {
    /// One scale value per channel
    Scale(Vec<f64>),
    /// One per-voxel variance map per channel
    Variance(Vec<Vec<f64>>),
}

/// Immutable multi-channel intensity volume
#[derive(Debug, Clone)]
pub struct ChannelImage {
    channels: Vec<Vec<f64>>,
    used: Vec<bool>,
    normalization: Normalization,
}

impl ChannelImage {
    /// Build an image normalised by one global scale per channel
    ///
    /// # Arguments
    /// * `channels` - `nc` intensity arrays of equal length (nx * ny * nz)
    /// * `used` - Which channels take part in the weight (length `nc`)
    /// * `scales` - Intensity scale of each channel (length `nc`)
    pub fn new(channels: Vec<Vec<f64>>, used: Vec<bool>, scales: Vec<f64>) -> Result<Self> {
        let image = ChannelImage {
            channels,
            used,
            normalization: Normalization::Scale(scales),
        };
        image.validate()?;
        Ok(image)
    }

    /// Build an image normalised by a per-voxel variance map per channel
    pub fn with_variance(
        channels: Vec<Vec<f64>>,
        used: Vec<bool>,
        variance: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let image = ChannelImage {
            channels,
            used,
            normalization: Normalization::Variance(variance),
        };
        image.validate()?;
        Ok(image)
    }

    /// Single used channel with unit scale
    pub fn single(channel: Vec<f64>) -> Result<Self> {
        Self::new(vec![channel], vec![true], vec![1.0])
    }

    fn validate(&self) -> Result<()> {
        let nc = self.channels.len();
        if nc == 0 {
            return Err(Error::config("image must have at least one channel"));
        }
        let n = self.channels[0].len();
        for (c, ch) in self.channels.iter().enumerate() {
            if ch.len() != n {
                return Err(Error::config(format!(
                    "channel {} has {} voxels, channel 0 has {}", c, ch.len(), n
                )));
            }
        }
        if self.used.len() != nc {
            return Err(Error::config(format!(
                "used flags: expected {} entries, got {}", nc, self.used.len()
            )));
        }
        if !self.used.iter().any(|&u| u) {
            return Err(Error::config("at least one channel must be used"));
        }
        match &self.normalization {
            Normalization::Scale(scales) => {
                if scales.len() != nc {
                    return Err(Error::config(format!(
                        "scales: expected {} entries, got {}", nc, scales.len()
                    )));
                }
                for (c, &s) in scales.iter().enumerate() {
                    if self.used[c] && !(s.is_finite() && s > 0.0) {
                        return Err(Error::config(format!(
                            "scale of channel {} must be finite and positive, got {}", c, s
                        )));
                    }
                }
            }
            Normalization::Variance(var) => {
                if var.len() != nc {
                    return Err(Error::config(format!(
                        "variance maps: expected {} channels, got {}", nc, var.len()
                    )));
                }
                for (c, v) in var.iter().enumerate() {
                    if self.used[c] && v.len() != n {
                        return Err(Error::config(format!(
                            "variance map {} has {} voxels, expected {}", c, v.len(), n
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of channels
    #[inline]
    pub fn nc(&self) -> usize {
        self.channels.len()
    }

    /// Number of voxels per channel
    #[inline]
    pub fn n_voxels(&self) -> usize {
        self.channels[0].len()
    }

    #[inline]
    pub fn channel(&self, c: usize) -> &[f64] {
        &self.channels[c]
    }

    #[inline]
    pub fn is_used(&self, c: usize) -> bool {
        self.used[c]
    }

    /// Indices of the channels taking part in weights and class statistics
    pub fn used_channels(&self) -> impl Iterator<Item = usize> + '_ {
        self.used.iter().enumerate().filter(|(_, &u)| u).map(|(c, _)| c)
    }

    pub fn normalization(&self) -> &Normalization {
        &self.normalization
    }

    /// True if any channel (used or not) is non-zero at `idx`
    #[inline]
    pub fn has_signal(&self, idx: usize) -> bool {
        self.channels.iter().any(|ch| ch[idx] != 0.0)
    }

    /// Similarity weight between voxel `xyz` and its neighbour `ngb`, in (0, 1]
    ///
    /// Symmetric when a global scale is used; with variance maps the
    /// normaliser is taken at `xyz`.
    #[inline]
    pub fn weight(&self, xyz: usize, ngb: usize, scale: f64) -> f64 {
        let mut maxdiff = 0.0f64;
        for c in self.used_channels() {
            let norm = match &self.normalization {
                Normalization::Scale(s) => s[c],
                Normalization::Variance(v) => v[c][xyz],
            };
            let diff = normalized_difference(self.channels[c][xyz] - self.channels[c][ngb], norm);
            if diff > maxdiff {
                maxdiff = diff;
            }
        }
        let r = maxdiff / scale;
        1.0 / (1.0 + r * r)
    }
}

/// |delta| / norm, with a zero normaliser mapping equal intensities to 0 and
/// different intensities to infinity
#[inline(always)]
fn normalized_difference(delta: f64, norm: f64) -> f64 {
    let delta = delta.abs();
    if norm == 0.0 {
        if delta == 0.0 { 0.0 } else { f64::INFINITY }
    } else {
        (delta / norm).abs()
    }
}
