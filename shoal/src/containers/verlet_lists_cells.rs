// SPDX-License-Identifier: AGPL-3.0-only

//! Verlet lists keyed by (cell, index within cell).
//!
//! Internally a linked-cells grid plus, for each particle, a list of
//! `(cell, index)` partners whose rebuild-time separation was within
//! cutoff + skin. The keying lets cell-colored schedules drive the pair
//! loop: the work of one base cell walks the lists of its own particles,
//! so a schedule's cell footprint bounds the write footprint.
//!
//! Lists built for Newton-3 hold each pair exactly once, with the partner
//! in the forward half-stencil of the owner's cell; lists built without
//! Newton-3 hold both directions, and the traversal then writes only the
//! owning particle.

use rayon::prelude::*;

use crate::cell::FullCell;
use crate::containers::linked_cells::LinkedCells;
use crate::containers::{ContainerChoice, ParticleContainer, RebuildTracker};
use crate::error::{Result, ShoalError};
use crate::functor::PairFunctor;
use crate::geometry::{dist_sq, Region};
use crate::particle::{IteratorBehavior, Particle};
use crate::tolerances::VERLET_RESERVE_FACTOR;
use crate::traversals::cell_pair::{offset_index, one_to_three, C18_FORWARD_OFFSETS};
use crate::traversals::colored::c18_cell_only;
use crate::traversals::grid::DisjointSlots;
use crate::traversals::sliced::{layer_loads, sliced, SlicedMode};
use crate::traversals::{
    DataLayout, LoadEstimator, TraversalChoice, TraversalSelectorInfo, TraversalSpec,
};

/// Per-cell, per-particle partner lists: `lists[cell][i]` holds the
/// `(cell, index)` partners of particle `i` in `cell`.
pub(crate) type CellKeyedLists = Vec<Vec<Vec<(usize, usize)>>>;

/// Builds (cell, index)-keyed skin lists over a linked-cells grid.
///
/// With `newton3` each pair lands in exactly one list and partners lie in
/// the forward half-stencil; without it both directions are recorded.
pub(crate) fn build_cell_keyed_lists(lc: &LinkedCells, newton3: bool) -> CellKeyedLists {
    let dims = lc.block.dims();
    let il_sq = lc.interaction_length() * lc.interaction_length();
    let cells = &lc.cells;

    let mut lists: CellKeyedLists = cells
        .iter()
        .map(|cell| {
            let mut per_particle = Vec::with_capacity(cell.len());
            per_particle
                .resize_with(cell.len(), || Vec::with_capacity(cell.len() * VERLET_RESERVE_FACTOR));
            per_particle
        })
        .collect();

    lists.par_iter_mut().enumerate().for_each(|(ci, cell_lists)| {
        let cell = &cells[ci];
        if cell.is_empty() {
            return;
        }
        let base3 = one_to_three(ci, dims);
        for (i, pi) in cell.particles().iter().enumerate() {
            if pi.is_dummy() {
                continue;
            }
            // intra-cell candidates
            for (j, pj) in cell.particles().iter().enumerate() {
                if j == i || pj.is_dummy() || (newton3 && j < i) {
                    continue;
                }
                if dist_sq(pi.pos, pj.pos) <= il_sq {
                    cell_lists[i].push((ci, j));
                }
            }
            // neighbor-cell candidates: forward half-stencil with
            // newton3, the full 26-stencil without
            let mut visit = |nb1: usize| {
                for (j, pj) in cells[nb1].particles().iter().enumerate() {
                    if pj.is_dummy() {
                        continue;
                    }
                    if dist_sq(pi.pos, pj.pos) <= il_sq {
                        cell_lists[i].push((nb1, j));
                    }
                }
            };
            if newton3 {
                for off in C18_FORWARD_OFFSETS {
                    if let Some(nb) = offset_index(base3, off, dims) {
                        visit(nb[0] + dims[0] * (nb[1] + dims[1] * nb[2]));
                    }
                }
            } else {
                for dz in -1i64..=1 {
                    for dy in -1i64..=1 {
                        for dx in -1i64..=1 {
                            if dx == 0 && dy == 0 && dz == 0 {
                                continue;
                            }
                            if let Some(nb) = offset_index(base3, [dx, dy, dz], dims) {
                                visit(nb[0] + dims[0] * (nb[1] + dims[1] * nb[2]));
                            }
                        }
                    }
                }
            }
        }
    });
    lists
}

/// Runs the list-driven pair loop for one cell.
///
/// # Safety
///
/// With `newton3` the caller must hold exclusive access to cell `c` and
/// every partner cell its lists reference (forward half-stencil). Without
/// `newton3` only cell `c` is written and `snapshot` provides the partner
/// reads, so exclusive access to `c` suffices.
pub(crate) unsafe fn process_cell_lists<F: PairFunctor>(
    cells: &DisjointSlots<'_, FullCell>,
    lists: &CellKeyedLists,
    snapshot: Option<&[Vec<Particle>]>,
    functor: &F,
    c: usize,
    newton3: bool,
) {
    // SAFETY: exclusivity of `c` is the caller's precondition.
    let cell = unsafe { cells.slot_mut(c) };
    for i in 0..lists[c].len() {
        for &(pc, pj) in &lists[c][i] {
            if newton3 {
                if pc == c {
                    if let Some((pi, pjr)) = cell.pair_mut(i, pj) {
                        functor.aos_pair(pi, pjr, true);
                    }
                } else {
                    // SAFETY: partner cells lie in the forward stencil of
                    // `c`, covered by the caller's exclusivity guarantee;
                    // pc != c here.
                    let (ca, cb) = unsafe { cells.two_slots_mut(c, pc) };
                    functor.aos_pair(&mut ca.particles_mut()[i], &mut cb.particles_mut()[pj], true);
                }
            } else {
                let Some(snapshot) = snapshot else { return };
                let mut copy = snapshot[pc][pj];
                functor.aos_pair(&mut cell.particles_mut()[i], &mut copy, false);
            }
        }
    }
}

/// Linked cells plus (cell, index)-keyed verlet lists.
#[derive(Debug)]
pub struct VerletListsCells {
    pub(crate) lc: LinkedCells,
    pub(crate) lists: CellKeyedLists,
    pub(crate) built_newton3: bool,
    pub(crate) tracker: RebuildTracker,
}

impl VerletListsCells {
    /// Creates an empty container for the given box.
    ///
    /// # Errors
    ///
    /// [`ShoalError::Configuration`] when the box cannot fit one cell.
    pub fn new(
        box_min: [f64; 3],
        box_max: [f64; 3],
        cutoff: f64,
        skin: f64,
        cell_size_factor: f64,
        strict: bool,
    ) -> Result<Self> {
        Ok(Self {
            lc: LinkedCells::new(box_min, box_max, cutoff, skin, cell_size_factor, strict)?,
            lists: Vec::new(),
            built_newton3: false,
            tracker: RebuildTracker::new(),
        })
    }

    fn current_positions(&self) -> Vec<(u64, [f64; 3])> {
        let mut out = Vec::new();
        self.lc
            .for_each_particle(IteratorBehavior::OwnedOrHalo, None, &mut |p| {
                out.push((p.id, p.pos));
            });
        out
    }

    /// Total number of list entries, the neighbor-list-length load signal.
    #[must_use]
    pub fn total_list_length(&self) -> usize {
        self.lists
            .iter()
            .map(|cell| cell.iter().map(Vec::len).sum::<usize>())
            .sum()
    }

    pub(crate) fn run_list_traversal<F: PairFunctor>(
        &mut self,
        functor: &F,
        spec: &TraversalSpec,
    ) -> Result<()> {
        if spec.layout == DataLayout::Soa {
            return Err(ShoalError::InvalidArgument(
                "cell-keyed lists drive aos iteration only".into(),
            ));
        }
        if self.lists.is_empty() || self.built_newton3 != spec.newton3 {
            self.rebuild_neighbor_lists(spec.newton3);
        }
        let dims = self.lc.block.dims();
        let snapshot: Option<Vec<Vec<Particle>>> = if spec.newton3 {
            None
        } else {
            Some(self.lc.cells.iter().map(|c| c.particles().to_vec()).collect())
        };
        let cells = DisjointSlots::new(&mut self.lc.cells);
        let lists = &self.lists;

        match spec.traversal {
            TraversalChoice::VerletC18 => {
                if spec.newton3 {
                    c18_cell_only(dims, |c| {
                        // SAFETY: c18 colors keep base + forward-stencil
                        // footprints of same-color cells disjoint.
                        unsafe {
                            process_cell_lists(&cells, lists, None, functor, c, true);
                        }
                    });
                } else {
                    // One-way writes: every cell can run concurrently.
                    (0..lists.len()).into_par_iter().for_each(|c| {
                        // SAFETY: only cell `c` is written; partner reads
                        // come from the snapshot.
                        unsafe {
                            process_cell_lists(
                                &cells,
                                lists,
                                snapshot.as_deref(),
                                functor,
                                c,
                                false,
                            );
                        }
                    });
                }
            }
            TraversalChoice::VerletSliced => {
                // Slabs along z: the forward half-stencil reaches one layer
                // forward in z only, matching the slab lock discipline.
                let loads = (spec.load_estimator == LoadEstimator::NeighborListLength).then(|| {
                    layer_loads(dims, 2, |c| {
                        lists[c].iter().map(Vec::len).sum::<usize>() as f64
                    })
                });
                sliced(
                    dims,
                    2,
                    spec.num_threads,
                    loads.as_deref(),
                    SlicedMode::Locked,
                    |base| {
                        let c = base[0] + dims[0] * (base[1] + dims[1] * base[2]);
                        // SAFETY: slab locks serialize boundary-layer
                        // access; within a slab the worker is sequential.
                        unsafe {
                            process_cell_lists(
                                &cells,
                                lists,
                                snapshot.as_deref(),
                                functor,
                                c,
                                spec.newton3,
                            );
                        }
                    },
                );
            }
            other => {
                return Err(ShoalError::InvalidArgument(format!(
                    "verlet-lists-cells container cannot run {other}"
                )));
            }
        }
        Ok(())
    }
}

impl ParticleContainer for VerletListsCells {
    fn choice(&self) -> ContainerChoice {
        ContainerChoice::VerletListsCells
    }

    fn box_min(&self) -> [f64; 3] {
        self.lc.box_min()
    }

    fn box_max(&self) -> [f64; 3] {
        self.lc.box_max()
    }

    fn cutoff(&self) -> f64 {
        self.lc.cutoff()
    }

    fn skin(&self) -> f64 {
        self.lc.skin()
    }

    fn selector_info(&self) -> TraversalSelectorInfo {
        self.lc.selector_info()
    }

    fn num_particles(&self) -> usize {
        self.lc.num_particles()
    }

    fn add(&mut self, p: Particle) -> Result<()> {
        self.tracker.mark_dirty();
        self.lc.add(p)
    }

    fn add_halo(&mut self, p: Particle) -> Result<()> {
        self.tracker.mark_dirty();
        self.lc.add_halo(p)
    }

    fn update_halo(&mut self, p: &Particle) -> bool {
        // Position updates within the skin keep the lists valid; the
        // membership is unchanged.
        self.lc.update_halo(p)
    }

    fn delete_halo(&mut self) {
        self.tracker.mark_dirty();
        self.lc.delete_halo();
    }

    fn update_container(&mut self, keep_lists: bool) -> Vec<Particle> {
        if keep_lists {
            // Dummy-marking keeps every (cell, index) stable: the lists
            // stay valid, leavers and halos just stop participating.
            self.lc.collect_leavers_mark_dummy()
        } else {
            self.tracker.mark_dirty();
            self.lc.update_container(false)
        }
    }

    fn delete_all(&mut self) {
        self.tracker.mark_dirty();
        self.lists.clear();
        self.lc.delete_all();
    }

    fn rebuild_neighbor_lists(&mut self, newton3: bool) {
        self.lists = build_cell_keyed_lists(&self.lc, newton3);
        self.built_newton3 = newton3;
        self.tracker.record(self.current_positions());
    }

    fn lists_valid(&self, skin_half: f64) -> bool {
        !self.lists.is_empty() && self.tracker.is_valid(self.current_positions(), skin_half)
    }

    fn iterate<F: PairFunctor>(&mut self, functor: &F, spec: &TraversalSpec) -> Result<()> {
        self.run_list_traversal(functor, spec)
    }

    fn for_each_particle(
        &self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&Particle),
    ) {
        self.lc.for_each_particle(behavior, region, f);
    }

    fn for_each_particle_mut(
        &mut self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&mut Particle),
    ) {
        self.lc.for_each_particle_mut(behavior, region, f);
    }
}
