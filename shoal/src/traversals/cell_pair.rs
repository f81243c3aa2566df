// SPDX-License-Identifier: AGPL-3.0-only

//! Cell self- and pair-interaction processing.
//!
//! The schedules in [`super::colored`] and [`super::sliced`] enumerate base
//! steps; this module turns one base step into functor calls. The c08 base
//! step covers a 2×2×2 block with one self-interaction and thirteen cell
//! pairs; the c18 base step covers the forward half-stencil of thirteen
//! unique ordered neighbor offsets plus the self-interaction. Over the
//! whole grid each unordered cell pair is processed exactly once either
//! way.
//!
//! Newton-3 handling per pair call:
//! - on — each unordered pair once, both particles updated;
//! - off — both orderings offered, only the first argument updated.
//!
//! Pairs between two halo cells are skipped: no owned particle could
//! receive a force from them.

use crate::cell::FullCell;
use crate::functor::PairFunctor;
use crate::particle::Particle;
use crate::traversals::grid::DisjointSlots;
use crate::traversals::DataLayout;

/// The thirteen c08 cell pairs relative to the base cell, as offset pairs
/// within the 2×2×2 block. Together with the base self-interaction they
/// cover every unordered neighbor relation exactly once across the grid.
pub const C08_BASE_PAIRS: [([i64; 3], [i64; 3]); 13] = [
    ([0, 0, 0], [1, 0, 0]),
    ([0, 0, 0], [0, 1, 0]),
    ([0, 0, 0], [0, 0, 1]),
    ([0, 0, 0], [1, 1, 0]),
    ([0, 0, 0], [1, 0, 1]),
    ([0, 0, 0], [0, 1, 1]),
    ([0, 0, 0], [1, 1, 1]),
    ([1, 0, 0], [0, 1, 0]),
    ([1, 0, 0], [0, 0, 1]),
    ([0, 1, 0], [0, 0, 1]),
    ([1, 0, 0], [0, 1, 1]),
    ([0, 1, 0], [1, 0, 1]),
    ([0, 0, 1], [1, 1, 0]),
];

/// The thirteen forward half-stencil offsets of the c18 scheme: all
/// neighbors with `dz = 1`, the `dy = 1` row at `dz = 0`, and `(1, 0, 0)`.
pub const C18_FORWARD_OFFSETS: [[i64; 3]; 13] = [
    [1, 0, 0],
    [-1, 1, 0],
    [0, 1, 0],
    [1, 1, 0],
    [-1, -1, 1],
    [0, -1, 1],
    [1, -1, 1],
    [-1, 0, 1],
    [0, 0, 1],
    [1, 0, 1],
    [-1, 1, 1],
    [0, 1, 1],
    [1, 1, 1],
];

/// Maps a 3-D cell index to its 1-D position (x fastest).
#[inline]
#[must_use]
pub fn three_to_one(idx: [usize; 3], dims: [usize; 3]) -> usize {
    idx[0] + dims[0] * (idx[1] + dims[1] * idx[2])
}

/// Maps a 1-D cell position back to its 3-D index.
#[inline]
#[must_use]
pub fn one_to_three(index: usize, dims: [usize; 3]) -> [usize; 3] {
    let x = index % dims[0];
    let rest = index / dims[0];
    [x, rest % dims[1], rest / dims[1]]
}

/// Offsets a 3-D index, returning `None` when it leaves the grid.
#[inline]
#[must_use]
pub fn offset_index(idx: [usize; 3], off: [i64; 3], dims: [usize; 3]) -> Option<[usize; 3]> {
    let mut out = [0usize; 3];
    for d in 0..3 {
        let v = idx[d] as i64 + off[d];
        if v < 0 || v >= dims[d] as i64 {
            return None;
        }
        out[d] = v as usize;
    }
    Some(out)
}

/// All self-interactions within one cell.
pub fn aos_cell_self<F: PairFunctor>(functor: &F, cell: &mut FullCell, newton3: bool) {
    let n = cell.len();
    if newton3 {
        for i in 0..n {
            for j in (i + 1)..n {
                if let Some((pi, pj)) = cell.pair_mut(i, j) {
                    if pi.is_dummy() || pj.is_dummy() {
                        continue;
                    }
                    functor.aos_pair(pi, pj, true);
                }
            }
        }
    } else {
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                if let Some((pi, pj)) = cell.pair_mut(i, j) {
                    if pi.is_dummy() || pj.is_dummy() {
                        continue;
                    }
                    functor.aos_pair(pi, pj, false);
                }
            }
        }
    }
}

/// All pair interactions between two distinct cells.
pub fn aos_cell_pair<F: PairFunctor>(
    functor: &F,
    ca: &mut FullCell,
    cb: &mut FullCell,
    newton3: bool,
) {
    for pi in ca.particles_mut() {
        if pi.is_dummy() {
            continue;
        }
        for pj in cb.particles_mut() {
            if pj.is_dummy() {
                continue;
            }
            functor.aos_pair(pi, pj, newton3);
            if !newton3 {
                functor.aos_pair(pj, pi, false);
            }
        }
    }
}

/// One-way pair interactions: updates only `base`, reading `others` from a
/// position snapshot. The c01 schedule uses this so concurrent workers
/// never write a foreign cell.
pub fn aos_cell_pair_oneway<F: PairFunctor>(functor: &F, base: &mut FullCell, others: &[Particle]) {
    for pi in base.particles_mut() {
        if pi.is_dummy() {
            continue;
        }
        for pj in others {
            if pj.is_dummy() {
                continue;
            }
            let mut copy = *pj;
            functor.aos_pair(pi, &mut copy, false);
        }
    }
}

/// Materialises every cell's SoA mirror through the functor's load hook.
pub fn load_cells_soa<F: PairFunctor>(functor: &F, cells: &mut [FullCell]) {
    use rayon::prelude::*;
    cells.par_iter_mut().for_each(|cell| {
        let mut soa = std::mem::take(&mut cell.soa);
        functor.soa_load(cell.particles(), &mut soa);
        cell.soa = soa;
    });
}

/// Writes every cell's SoA results back through the functor's extract hook.
pub fn extract_cells_soa<F: PairFunctor>(functor: &F, cells: &mut [FullCell]) {
    use rayon::prelude::*;
    cells.par_iter_mut().for_each(|cell| {
        let soa = std::mem::take(&mut cell.soa);
        functor.soa_extract(&soa, cell.particles_mut());
        cell.soa = soa;
    });
}

/// A schedule-facing kernel: turns cell indices into functor calls.
///
/// Schedules call [`Self::cell`] and [`Self::cell_pair`] with index sets
/// whose write footprints are disjoint across concurrently running
/// workers; that disjointness is the safety precondition of both methods.
pub trait CellStepKernel: Sync {
    /// Self-interactions of cell `c`.
    ///
    /// # Safety
    ///
    /// The caller must hold exclusive access to cell `c` for the duration
    /// of the call.
    unsafe fn cell(&self, c: usize);

    /// Pair interactions between cells `a` and `b`.
    ///
    /// # Safety
    ///
    /// The caller must hold exclusive access to both cells for the
    /// duration of the call, and `a != b`.
    unsafe fn cell_pair(&self, a: usize, b: usize);
}

/// The [`CellStepKernel`] over the full-cell arena.
pub struct FullCellKernel<'a, F> {
    cells: DisjointSlots<'a, FullCell>,
    halo: &'a [bool],
    functor: &'a F,
    layout: DataLayout,
    newton3: bool,
}

impl<'a, F: PairFunctor> FullCellKernel<'a, F> {
    /// Wraps the cell arena for one traversal.
    pub fn new(
        cells: &'a mut [FullCell],
        halo: &'a [bool],
        functor: &'a F,
        layout: DataLayout,
        newton3: bool,
    ) -> Self {
        Self {
            cells: DisjointSlots::new(cells),
            halo,
            functor,
            layout,
            newton3,
        }
    }

}

impl<F: PairFunctor> CellStepKernel for FullCellKernel<'_, F> {
    unsafe fn cell(&self, c: usize) {
        if self.halo[c] {
            return;
        }
        // SAFETY: exclusive access to `c` is the caller's precondition.
        let cell = unsafe { self.cells.slot_mut(c) };
        if cell.len() < 2 {
            return;
        }
        match self.layout {
            DataLayout::Aos => aos_cell_self(self.functor, cell, self.newton3),
            DataLayout::Soa => {
                let n = cell.soa.len();
                self.functor.soa_self(&mut cell.soa, 0..n, self.newton3);
            }
        }
    }

    unsafe fn cell_pair(&self, a: usize, b: usize) {
        if self.halo[a] && self.halo[b] {
            return;
        }
        // SAFETY: exclusive access to both indices is the caller's
        // precondition; the schedules' color strides provide it.
        let (ca, cb) = unsafe { self.cells.two_slots_mut(a, b) };
        if ca.is_empty() || cb.is_empty() {
            return;
        }
        match self.layout {
            DataLayout::Aos => aos_cell_pair(self.functor, ca, cb, self.newton3),
            DataLayout::Soa => {
                let (la, lb) = (ca.soa.len(), cb.soa.len());
                self.functor
                    .soa_pair(&mut ca.soa, 0..la, &mut cb.soa, 0..lb, self.newton3);
                if !self.newton3 {
                    self.functor
                        .soa_pair(&mut cb.soa, 0..lb, &mut ca.soa, 0..la, false);
                }
            }
        }
    }
}

/// Processes one c08 base step: the base self-interaction plus the
/// thirteen block pairs, clipped at the grid boundary.
///
/// # Safety
///
/// The caller must guarantee exclusive access to the 2×2×2 block anchored
/// at `base` (the c08 color stride of 2 per axis provides this).
pub unsafe fn process_c08_base<K: CellStepKernel>(kernel: &K, base: [usize; 3], dims: [usize; 3]) {
    // SAFETY: forwarded from the caller's block-exclusivity guarantee.
    unsafe {
        kernel.cell(three_to_one(base, dims));
        for (off_a, off_b) in C08_BASE_PAIRS {
            let (Some(a), Some(b)) = (
                offset_index(base, off_a, dims),
                offset_index(base, off_b, dims),
            ) else {
                continue;
            };
            kernel.cell_pair(three_to_one(a, dims), three_to_one(b, dims));
        }
    }
}

/// Processes one c18 base step: the base self-interaction plus pairs with
/// the forward half-stencil, clipped at the grid boundary.
///
/// # Safety
///
/// The caller must guarantee exclusive access to the base cell and its
/// forward half-stencil (the c18 color stride of 3·3·2 provides this).
pub unsafe fn process_c18_base<K: CellStepKernel>(kernel: &K, base: [usize; 3], dims: [usize; 3]) {
    // SAFETY: forwarded from the caller's stencil-exclusivity guarantee.
    unsafe {
        let b1 = three_to_one(base, dims);
        kernel.cell(b1);
        for off in C18_FORWARD_OFFSETS {
            let Some(nb) = offset_index(base, off, dims) else {
                continue;
            };
            kernel.cell_pair(b1, three_to_one(nb, dims));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn c08_pairs_cover_all_relations_once() {
        // Each base-step pair stands for one unordered neighbor relation
        // b − a; a relation and its negation must never both appear, and
        // the thirteen relations together with their negations are exactly
        // the 26 neighbor offsets.
        let mut relations = HashSet::new();
        for (a, b) in C08_BASE_PAIRS {
            let rel = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
            let neg = [-rel[0], -rel[1], -rel[2]];
            assert_ne!(rel, [0, 0, 0]);
            assert!(
                !relations.contains(&rel) && !relations.contains(&neg),
                "duplicate relation {rel:?}"
            );
            relations.insert(rel);
        }
        assert_eq!(relations.len(), 13, "13 of the 26 neighbor relations");
        for rel in &relations {
            assert!(rel.iter().all(|v| (-1..=1).contains(v)));
        }
    }

    #[test]
    fn c18_offsets_are_the_forward_half() {
        let mut seen = HashSet::new();
        for off in C18_FORWARD_OFFSETS {
            let forward =
                off[2] > 0 || (off[2] == 0 && off[1] > 0) || (off[2] == 0 && off[1] == 0 && off[0] > 0);
            assert!(forward, "offset {off:?} is not in the forward half-space");
            assert!(seen.insert(off));
        }
        assert_eq!(seen.len(), 13);
    }

    #[test]
    fn index_mapping_roundtrip() {
        let dims = [4, 5, 6];
        for i in 0..(4 * 5 * 6) {
            assert_eq!(three_to_one(one_to_three(i, dims), dims), i);
        }
    }

    #[test]
    fn offset_index_clips_at_bounds() {
        let dims = [3, 3, 3];
        assert_eq!(offset_index([0, 0, 0], [-1, 0, 0], dims), None);
        assert_eq!(offset_index([2, 2, 2], [0, 0, 1], dims), None);
        assert_eq!(offset_index([1, 1, 1], [1, -1, 0], dims), Some([2, 0, 1]));
    }

    #[test]
    fn oneway_pair_leaves_snapshot_untouched() {
        use crate::functor::PairFunctor;
        struct Mark;
        impl PairFunctor for Mark {
            fn aos_pair(&self, pi: &mut Particle, pj: &mut Particle, newton3: bool) {
                pi.force[0] += 1.0;
                if newton3 {
                    pj.force[0] += 1.0;
                }
            }
        }
        let mut base = FullCell::default();
        base.push(Particle::new(0, [0.0; 3]));
        let others = vec![Particle::new(1, [0.5, 0.0, 0.0]); 3];
        aos_cell_pair_oneway(&Mark, &mut base, &others);
        assert_eq!(base.particles()[0].force[0], 3.0);
        assert!(others.iter().all(|p| p.force[0] == 0.0));
    }
}
