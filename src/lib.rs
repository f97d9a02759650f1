//! LabelProb-Core: image-guided diffusion of multi-label probabilities
//!
//! This crate refines probabilistic multi-label segmentations of 3D
//! neuroimaging volumes. Every voxel carries a ranked stack of candidate
//! labels; uncertain voxels take on the probabilities of their most certain,
//! most similar neighbours until the labelling stabilises.
//!
//! # Modules
//! - `grid`: 3D indexing and the 26-connected neighbourhood
//! - `image`: Multi-channel intensity volume and similarity weight
//! - `weights`: Per-voxel neighbour weight maps
//! - `certainty`: Power-law certainty of probability margins
//! - `label_stack`: Ranked (probability, label) stacks and label catalogue
//! - `selection`: Partial top-K neighbour selection
//! - `distribution`: Optional per-label Gaussian intensity model
//! - `diffusion`: The uncertainty reduction engine
//! - `utils`: Masks and buffer allocation

// Core modules
pub mod error;
pub mod grid;
pub mod image;
pub mod label_stack;

// Algorithm modules
pub mod certainty;
pub mod selection;
pub mod weights;
pub mod distribution;
pub mod diffusion;
pub mod utils;

pub use diffusion::{
    DiffusionParams, DiffusionReport, RoundStats, Termination, UncertaintyReduction,
    CONVERGENCE_TOLERANCE,
};
pub use error::{Error, Result};
pub use grid::{Grid, NEIGHBOR_OFFSETS, NGB_SIZE};
pub use image::{ChannelImage, Normalization};
pub use label_stack::{LabelCatalogue, LabelId, LabelStack, Slot};
