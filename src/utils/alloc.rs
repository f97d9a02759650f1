//! Fallible allocation of working buffers
//!
//! The diffusion engine keeps several volume-sized arrays alive at once
//! (nbest * nvoxels slots, 26 weights per voxel). Allocation failure is
//! reported as an error instead of aborting the process.

use crate::error::{Error, Result};

/// Allocate a vector of `len` copies of `value`, or fail with `Error::Allocation`
pub fn try_filled<T: Clone>(what: &'static str, len: usize, value: T) -> Result<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::Allocation { what, len })?;
    buf.resize(len, value);
    Ok(buf)
}
