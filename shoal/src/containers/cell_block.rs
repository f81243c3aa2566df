// SPDX-License-Identifier: AGPL-3.0-only

//! Three-dimensional cell grid with a one-cell halo ring.
//!
//! Maps real-space coordinates to cell indices and back. The owned box is
//! surrounded by one layer of halo cells on each face; positions outside
//! the owned box clamp into the halo ring, so every particle the container
//! legally holds has a cell.
//!
//! Cell side lengths are at least `cell_size_factor · interaction_length`
//! per axis, so a cell's 27-neighborhood always covers the interaction
//! sphere of its particles.

use crate::error::{Result, ShoalError};
use crate::geometry::Region;
use crate::traversals::cell_pair::{one_to_three, three_to_one};

/// Geometry of a halo-ringed cell grid.
#[derive(Debug, Clone, Copy)]
pub struct CellBlock {
    box_min: [f64; 3],
    box_max: [f64; 3],
    cells_per_dim: [usize; 3],
    cell_length: [f64; 3],
    cell_length_reciprocal: [f64; 3],
    interaction_length: f64,
}

impl CellBlock {
    /// Builds the grid for the owned box `[box_min, box_max)`.
    ///
    /// # Errors
    ///
    /// [`ShoalError::Configuration`] when the box is smaller than one cell
    /// side along any axis.
    pub fn new(
        box_min: [f64; 3],
        box_max: [f64; 3],
        interaction_length: f64,
        cell_size_factor: f64,
    ) -> Result<Self> {
        if cell_size_factor <= 0.0 {
            return Err(ShoalError::Configuration(format!(
                "cell size factor must be positive, got {cell_size_factor}"
            )));
        }
        // A single-layer stencil needs sides of at least one interaction
        // length; factors below one therefore clamp to one here.
        let min_cell_side = interaction_length * cell_size_factor.max(1.0);
        let mut cells_per_dim = [0usize; 3];
        let mut cell_length = [0.0f64; 3];
        let mut cell_length_reciprocal = [0.0f64; 3];
        for d in 0..3 {
            let diff = box_max[d] - box_min[d];
            if diff < min_cell_side {
                return Err(ShoalError::Configuration(format!(
                    "box extent {diff} on axis {d} is smaller than one cell side {min_cell_side}"
                )));
            }
            let cells = ((diff / min_cell_side).floor() as usize).max(1);
            // +2: one halo layer on each face.
            cells_per_dim[d] = cells + 2;
            cell_length[d] = diff / cells as f64;
            // computed from the count, not the length, for least rounding
            cell_length_reciprocal[d] = cells as f64 / diff;
        }
        Ok(Self {
            box_min,
            box_max,
            cells_per_dim,
            cell_length,
            cell_length_reciprocal,
            interaction_length,
        })
    }

    /// Cells per dimension, halo ring included.
    #[inline]
    #[must_use]
    pub const fn dims(&self) -> [usize; 3] {
        self.cells_per_dim
    }

    /// Total number of cells, halo ring included.
    #[inline]
    #[must_use]
    pub const fn num_cells(&self) -> usize {
        self.cells_per_dim[0] * self.cells_per_dim[1] * self.cells_per_dim[2]
    }

    /// Side lengths of one cell.
    #[inline]
    #[must_use]
    pub const fn cell_length(&self) -> [f64; 3] {
        self.cell_length
    }

    /// The interaction length the grid was sized for.
    #[inline]
    #[must_use]
    pub const fn interaction_length(&self) -> f64 {
        self.interaction_length
    }

    /// Lower corner of the halo-extended box.
    #[inline]
    #[must_use]
    pub fn halo_min(&self) -> [f64; 3] {
        [
            self.box_min[0] - self.cell_length[0],
            self.box_min[1] - self.cell_length[1],
            self.box_min[2] - self.cell_length[2],
        ]
    }

    /// Upper corner of the halo-extended box.
    #[inline]
    #[must_use]
    pub fn halo_max(&self) -> [f64; 3] {
        [
            self.box_max[0] + self.cell_length[0],
            self.box_max[1] + self.cell_length[1],
            self.box_max[2] + self.cell_length[2],
        ]
    }

    /// The 3-D cell index containing `pos`.
    ///
    /// Positions outside the owned box clamp into the halo ring; positions
    /// at or beyond `box_max` land in the outermost layer. Rare rounding
    /// cases at the box faces are forced to the correct side so a particle
    /// can never be double-assigned.
    #[must_use]
    pub fn index_3d_of(&self, pos: [f64; 3]) -> [usize; 3] {
        let mut index = [0usize; 3];
        for d in 0..3 {
            let value =
                ((pos[d] - self.box_min[d]) * self.cell_length_reciprocal[d]).floor() as i64 + 1;
            let clamped = value.clamp(0, self.cells_per_dim[d] as i64 - 1) as usize;
            index[d] = clamped;
            if pos[d] >= self.box_max[d] {
                index[d] = self.cells_per_dim[d] - 1;
            } else if pos[d] < self.box_min[d] {
                index[d] = 0;
            }
        }
        index
    }

    /// The 1-D cell index containing `pos`.
    #[inline]
    #[must_use]
    pub fn index_of(&self, pos: [f64; 3]) -> usize {
        three_to_one(self.index_3d_of(pos), self.cells_per_dim)
    }

    /// Whether the 1-D cell index lies in the halo ring.
    #[inline]
    #[must_use]
    pub fn is_halo_cell(&self, index: usize) -> bool {
        let idx = one_to_three(index, self.cells_per_dim);
        (0..3).any(|d| idx[d] == 0 || idx[d] + 1 == self.cells_per_dim[d])
    }

    /// One `true` per cell in the halo ring, indexed by 1-D cell index.
    #[must_use]
    pub fn halo_flags(&self) -> Vec<bool> {
        (0..self.num_cells()).map(|i| self.is_halo_cell(i)).collect()
    }

    /// Real-space bounds of one cell.
    #[must_use]
    pub fn cell_bounds(&self, index: usize) -> ([f64; 3], [f64; 3]) {
        let idx = one_to_three(index, self.cells_per_dim);
        let mut min = [0.0; 3];
        let mut max = [0.0; 3];
        for d in 0..3 {
            min[d] = (idx[d] as f64 - 1.0).mul_add(self.cell_length[d], self.box_min[d]);
            max[d] = min[d] + self.cell_length[d];
        }
        (min, max)
    }

    /// 1-D indices of all cells whose bounds overlap the region.
    #[must_use]
    pub fn cells_in_region(&self, region: &Region) -> Vec<usize> {
        let lo = self.index_3d_of(region.min);
        let hi = self.index_3d_of(region.max);
        let mut out = Vec::new();
        for z in lo[2]..=hi[2] {
            for y in lo[1]..=hi[1] {
                for x in lo[0]..=hi[0] {
                    let index = three_to_one([x, y, z], self.cells_per_dim);
                    let (cmin, cmax) = self.cell_bounds(index);
                    if region.intersects(cmin, cmax) {
                        out.push(index);
                    }
                }
            }
        }
        out
    }
}
