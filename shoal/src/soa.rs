// SPDX-License-Identifier: AGPL-3.0-only

//! Structure-of-arrays particle storage.
//!
//! A [`SoaBuffer`] holds one contiguous column per particle attribute.
//! Cells own their buffer; the layout converter (the functor's load/extract
//! hooks, see [`crate::functor::PairFunctor`]) materialises it from the AoS
//! storage before an SoA traversal and writes results back afterwards. A
//! buffer is never shared across cells, so thread-safety of SoA access is
//! structural: whoever owns the cell owns its columns.

use crate::particle::{OwnershipState, Particle};

/// Typed attribute columns for one cell's particles.
///
/// Positions, velocities, and forces are split per component so kernels
/// iterate unit-stride lanes. Ownership is stored as `i64` (dummy = 0) so a
/// kernel can mask dummies branch-free.
#[derive(Debug, Default, Clone)]
pub struct SoaBuffer {
    /// Position components.
    pub px: Vec<f64>,
    /// Position components.
    pub py: Vec<f64>,
    /// Position components.
    pub pz: Vec<f64>,
    /// Force components.
    pub fx: Vec<f64>,
    /// Force components.
    pub fy: Vec<f64>,
    /// Force components.
    pub fz: Vec<f64>,
    /// Particle identifiers.
    pub id: Vec<u64>,
    /// Type tags.
    pub type_id: Vec<u64>,
    /// Ownership states as their column representation.
    pub ownership: Vec<i64>,
}

impl SoaBuffer {
    /// Number of particle slots in the buffer.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.px.len()
    }

    /// Whether the buffer holds no particles.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.px.is_empty()
    }

    /// Drops all slots, keeping allocations.
    pub fn clear(&mut self) {
        self.px.clear();
        self.py.clear();
        self.pz.clear();
        self.fx.clear();
        self.fy.clear();
        self.fz.clear();
        self.id.clear();
        self.type_id.clear();
        self.ownership.clear();
    }

    /// Appends one particle's attributes.
    pub fn push(&mut self, p: &Particle) {
        self.px.push(p.pos[0]);
        self.py.push(p.pos[1]);
        self.pz.push(p.pos[2]);
        self.fx.push(p.force[0]);
        self.fy.push(p.force[1]);
        self.fz.push(p.force[2]);
        self.id.push(p.id);
        self.type_id.push(p.type_id);
        self.ownership.push(p.ownership as i64);
    }

    /// Whether the slot at `i` holds an actual (non-dummy) particle.
    #[inline]
    #[must_use]
    pub fn is_actual(&self, i: usize) -> bool {
        self.ownership[i] != OwnershipState::Dummy as i64
    }

    /// Writes the accumulated force of slot `i` back into `p`.
    ///
    /// Positions and velocities are not written back: pair evaluation only
    /// mutates forces, and the AoS storage stays authoritative for the rest.
    #[inline]
    pub fn extract_force_into(&self, i: usize, p: &mut Particle) {
        p.force = [self.fx[i], self.fy[i], self.fz[i]];
    }
}
