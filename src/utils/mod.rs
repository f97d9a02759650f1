//! Utility functions for diffusion setup
//!
//! This module provides:
//! - Processing masks (border and zero-signal exclusion, ROI intersection)
//! - Fallible allocation of volume-sized working buffers

pub mod alloc;
pub mod mask;

pub use alloc::try_filled;
pub use mask::{count, interior_signal_mask, intersect_mask};
