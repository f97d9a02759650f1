//! 3D voxel grid indexing and the 26-connected neighbourhood
//!
//! Volumes are stored flat in Fortran (column-major) order to match NIfTI:
//! index = x + y*nx + z*nx*ny. All linear-index arithmetic goes through
//! [`Grid`]; other modules only pass voxel indices around.

use crate::error::{Error, Result};

/// Number of neighbours in the 26-connected neighbourhood
pub const NGB_SIZE: usize = 26;

/// Neighbour offsets (dx, dy, dz) in enumeration order:
/// 6 faces, then 12 edges, then 8 corners.
///
/// The weight cache and the top-K selection both index neighbours by
/// position in this table.
pub const NEIGHBOR_OFFSETS: [(i32, i32, i32); NGB_SIZE] = [
    // faces
    (1, 0, 0),
    (-1, 0, 0),
    (0, 1, 0),
    (0, -1, 0),
    (0, 0, 1),
    (0, 0, -1),
    // edges
    (1, 1, 0),
    (1, -1, 0),
    (-1, 1, 0),
    (-1, -1, 0),
    (0, 1, 1),
    (0, 1, -1),
    (0, -1, 1),
    (0, -1, -1),
    (1, 0, 1),
    (-1, 0, 1),
    (1, 0, -1),
    (-1, 0, -1),
    // corners
    (1, 1, 1),
    (1, 1, -1),
    (1, -1, 1),
    (1, -1, -1),
    (-1, 1, 1),
    (-1, 1, -1),
    (-1, -1, 1),
    (-1, -1, -1),
];

/// Fixed-size 3D grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    nx: usize,
    ny: usize,
    nz: usize,
    /// Linear offsets matching `NEIGHBOR_OFFSETS`
    offsets: [isize; NGB_SIZE],
}

impl Grid {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Result<Self> {
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(Error::config(format!(
                "grid dimensions must be positive, got {}x{}x{}", nx, ny, nz
            )));
        }
        let len = nx.checked_mul(ny)
            .and_then(|v| v.checked_mul(nz))
            .filter(|&v| v <= isize::MAX as usize)
            .ok_or_else(|| Error::config(format!(
                "grid {}x{}x{} is too large to index", nx, ny, nz
            )))?;
        debug_assert!(len > 0);

        let sx = 1isize;
        let sy = nx as isize;
        let sz = (nx * ny) as isize;
        let mut offsets = [0isize; NGB_SIZE];
        for (o, &(dx, dy, dz)) in offsets.iter_mut().zip(NEIGHBOR_OFFSETS.iter()) {
            *o = dx as isize * sx + dy as isize * sy + dz as isize * sz;
        }

        Ok(Grid { nx, ny, nz, offsets })
    }

    #[inline]
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    /// Total number of voxels
    #[inline]
    pub fn len(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline(always)]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < self.nx && y < self.ny && z < self.nz);
        x + y * self.nx + z * self.nx * self.ny
    }

    #[inline]
    pub fn coords(&self, idx: usize) -> (usize, usize, usize) {
        let x = idx % self.nx;
        let y = (idx / self.nx) % self.ny;
        let z = idx / (self.nx * self.ny);
        (x, y, z)
    }

    /// True for voxels on the outer 1-voxel layer of the grid
    #[inline]
    pub fn is_border(&self, idx: usize) -> bool {
        let (x, y, z) = self.coords(idx);
        x == 0 || y == 0 || z == 0
            || x == self.nx - 1 || y == self.ny - 1 || z == self.nz - 1
    }

    /// Linear index of neighbour `j` (see `NEIGHBOR_OFFSETS`)
    ///
    /// Only valid for interior voxels; border voxels have no complete
    /// neighbourhood and must never be queried.
    #[inline(always)]
    pub fn neighbor(&self, idx: usize, j: usize) -> usize {
        debug_assert!(!self.is_border(idx), "neighbor query on border voxel {}", idx);
        (idx as isize + self.offsets[j]) as usize
    }

    /// All 26 neighbours of an interior voxel, in enumeration order
    #[inline]
    pub fn neighbors(&self, idx: usize) -> [usize; NGB_SIZE] {
        let mut out = [0usize; NGB_SIZE];
        for (j, o) in out.iter_mut().enumerate() {
            *o = self.neighbor(idx, j);
        }
        out
    }

    /// Iterate over the indices of all interior (non-border) voxels
    pub fn interior_indices(&self) -> impl Iterator<Item = usize> + '_ {
        let (nx, ny, nz) = self.dims();
        (1..nz.saturating_sub(1)).flat_map(move |z| {
            (1..ny.saturating_sub(1)).flat_map(move |y| {
                (1..nx.saturating_sub(1)).map(move |x| x + y * nx + z * nx * ny)
            })
        })
    }
}
