// SPDX-License-Identifier: AGPL-3.0-only

//! Linked-cells containers.
//!
//! [`LinkedCells`] routes each particle to the cell containing it; pair
//! iteration walks cells against their 27-neighborhood under one of the
//! colored or sliced schedules. [`LinkedCellsReferences`] keeps all
//! particles in one flat store and bins arena indices instead, which keeps
//! particle addresses stable across re-binning at the cost of one
//! indirection per access (and therefore runs AoS only).

use crate::cell::{FullCell, ReferenceCell};
use crate::containers::cell_block::CellBlock;
use crate::containers::{
    check_halo_intake, check_owned_intake, ContainerChoice, ParticleContainer,
};
use crate::error::{Result, ShoalError};
use crate::functor::PairFunctor;
use crate::geometry::{dist_sq, in_box, Region};
use crate::particle::{IteratorBehavior, OwnershipState, Particle};
use crate::traversals::cell_pair::{
    extract_cells_soa, load_cells_soa, process_c08_base, CellStepKernel, FullCellKernel,
};
use crate::traversals::grid::DisjointSlots;
use crate::traversals::sliced::{layer_loads, longest_axis, sliced, SlicedMode};
use crate::traversals::{
    colored, DataLayout, LoadEstimator, TraversalChoice, TraversalSelectorInfo, TraversalSpec,
};

/// Cell grid container with value cells.
#[derive(Debug)]
pub struct LinkedCells {
    pub(crate) block: CellBlock,
    pub(crate) cells: Vec<FullCell>,
    pub(crate) halo_flags: Vec<bool>,
    box_min: [f64; 3],
    box_max: [f64; 3],
    cutoff: f64,
    skin: f64,
    strict: bool,
}

impl LinkedCells {
    /// Creates an empty container for the given box.
    ///
    /// # Errors
    ///
    /// [`ShoalError::Configuration`] when the box cannot fit one cell of
    /// `(cutoff + skin) · cell_size_factor` per axis.
    pub fn new(
        box_min: [f64; 3],
        box_max: [f64; 3],
        cutoff: f64,
        skin: f64,
        cell_size_factor: f64,
        strict: bool,
    ) -> Result<Self> {
        let block = CellBlock::new(box_min, box_max, cutoff + skin, cell_size_factor)?;
        let cells = vec![FullCell::default(); block.num_cells()];
        let halo_flags = block.halo_flags();
        Ok(Self {
            block,
            cells,
            halo_flags,
            box_min,
            box_max,
            cutoff,
            skin,
            strict,
        })
    }

    /// Per-layer loads for the balanced sliced schedule, or `None` for
    /// uniform slabs.
    fn balance_loads(&self, axis: usize, estimator: LoadEstimator) -> Option<Vec<f64>> {
        match estimator {
            LoadEstimator::None => None,
            // Without lists, list length degenerates to the same signal.
            LoadEstimator::SquaredParticlesPerCell | LoadEstimator::NeighborListLength => {
                Some(layer_loads(self.block.dims(), axis, |index| {
                    let n = self.cells[index].len() as f64;
                    n * n
                }))
            }
        }
    }

    /// Runs one of the cell-grid schedules over the functor.
    pub(crate) fn run_schedule<F: PairFunctor>(
        &mut self,
        functor: &F,
        spec: &TraversalSpec,
    ) -> Result<()> {
        let dims = self.block.dims();
        if spec.layout == DataLayout::Soa {
            load_cells_soa(functor, &mut self.cells);
        }
        match spec.traversal {
            TraversalChoice::C01 => {
                colored::c01(
                    functor,
                    &mut self.cells,
                    &self.halo_flags,
                    dims,
                    spec.layout,
                );
            }
            TraversalChoice::C08 => {
                let kernel = FullCellKernel::new(
                    &mut self.cells,
                    &self.halo_flags,
                    functor,
                    spec.layout,
                    spec.newton3,
                );
                colored::c08(&kernel, dims);
            }
            TraversalChoice::C18 => {
                let kernel = FullCellKernel::new(
                    &mut self.cells,
                    &self.halo_flags,
                    functor,
                    spec.layout,
                    spec.newton3,
                );
                colored::c18(&kernel, dims);
            }
            TraversalChoice::Sliced | TraversalChoice::SlicedC02 | TraversalChoice::BalancedSliced => {
                let axis = longest_axis(dims);
                let loads = if spec.traversal == TraversalChoice::BalancedSliced {
                    self.balance_loads(axis, spec.load_estimator)
                } else {
                    None
                };
                let mode = if spec.traversal == TraversalChoice::SlicedC02 {
                    SlicedMode::TwoColored
                } else {
                    SlicedMode::Locked
                };
                let kernel = FullCellKernel::new(
                    &mut self.cells,
                    &self.halo_flags,
                    functor,
                    spec.layout,
                    spec.newton3,
                );
                sliced(dims, axis, spec.num_threads, loads.as_deref(), mode, |base| {
                    // SAFETY: c08 base steps reach one layer forward; the
                    // slab discipline (locks or two colors) keeps
                    // concurrently processed footprints disjoint.
                    unsafe { process_c08_base(&kernel, base, dims) }
                });
            }
            other => {
                return Err(ShoalError::InvalidArgument(format!(
                    "linked-cells container cannot run {other}"
                )));
            }
        }
        if spec.layout == DataLayout::Soa {
            extract_cells_soa(functor, &mut self.cells);
        }
        Ok(())
    }

    /// Leaving-particle collection that keeps neighbor lists usable:
    /// halo particles and box leavers are marked dummy in place instead of
    /// being removed, so no cell-local index shifts. Returns copies of the
    /// leavers.
    pub(crate) fn collect_leavers_mark_dummy(&mut self) -> Vec<Particle> {
        let mut leavers = Vec::new();
        for cell in &mut self.cells {
            for p in cell.particles_mut() {
                if p.is_halo() {
                    p.ownership = OwnershipState::Dummy;
                } else if p.is_owned() && !in_box(p.pos, self.box_min, self.box_max) {
                    leavers.push(*p);
                    p.ownership = OwnershipState::Dummy;
                }
            }
        }
        leavers
    }

    fn re_bin(&mut self) -> Vec<Particle> {
        let mut moved = Vec::new();
        let mut leavers = Vec::new();
        for ci in 0..self.cells.len() {
            let mut i = 0;
            while i < self.cells[ci].len() {
                let p = self.cells[ci].particles()[i];
                if p.is_dummy() {
                    let _ = self.cells[ci].swap_remove(i);
                    continue;
                }
                let target = self.block.index_of(p.pos);
                if target == ci {
                    i += 1;
                    continue;
                }
                let p = self.cells[ci].swap_remove(i);
                if in_box(p.pos, self.box_min, self.box_max) {
                    moved.push(p);
                } else if p.is_owned() {
                    leavers.push(p);
                }
                // halo particles outside the box were deleted beforehand
            }
        }
        for p in moved {
            let target = self.block.index_of(p.pos);
            self.cells[target].push(p);
        }
        leavers
    }
}

impl ParticleContainer for LinkedCells {
    fn choice(&self) -> ContainerChoice {
        ContainerChoice::LinkedCells
    }

    fn box_min(&self) -> [f64; 3] {
        self.box_min
    }

    fn box_max(&self) -> [f64; 3] {
        self.box_max
    }

    fn cutoff(&self) -> f64 {
        self.cutoff
    }

    fn skin(&self) -> f64 {
        self.skin
    }

    fn selector_info(&self) -> TraversalSelectorInfo {
        TraversalSelectorInfo {
            dims: self.block.dims(),
            interaction_length: self.interaction_length(),
            cell_length: self.block.cell_length(),
            cluster_size: 0,
        }
    }

    fn num_particles(&self) -> usize {
        self.cells
            .iter()
            .map(|c| c.particles().iter().filter(|p| !p.is_dummy()).count())
            .sum()
    }

    fn add(&mut self, p: Particle) -> Result<()> {
        check_owned_intake(&p, self.box_min, self.box_max, self.strict)?;
        let index = self.block.index_of(p.pos);
        self.cells[index].push(p);
        Ok(())
    }

    fn add_halo(&mut self, p: Particle) -> Result<()> {
        check_halo_intake(
            &p,
            self.box_min,
            self.box_max,
            self.interaction_length(),
            self.strict,
        )?;
        let mut p = p;
        p.ownership = OwnershipState::Halo;
        let index = self.block.index_of(p.pos);
        self.cells[index].push(p);
        Ok(())
    }

    fn update_halo(&mut self, p: &Particle) -> bool {
        let skin_sq = self.skin * self.skin;
        // The copy may have drifted into an adjacent cell since it was
        // stored; search the containing cell first, then the full ring.
        let primary = self.block.index_of(p.pos);
        let mut candidates = vec![primary];
        candidates.extend(
            (0..self.cells.len()).filter(|&i| i != primary && self.halo_flags[i]),
        );
        for ci in candidates {
            for stored in self.cells[ci].particles_mut() {
                if stored.is_halo() && stored.id == p.id && dist_sq(stored.pos, p.pos) <= skin_sq {
                    *stored = *p;
                    stored.ownership = OwnershipState::Halo;
                    return true;
                }
            }
        }
        false
    }

    fn delete_halo(&mut self) {
        for (index, cell) in self.cells.iter_mut().enumerate() {
            if self.halo_flags[index] {
                cell.clear();
            }
        }
    }

    fn update_container(&mut self, _keep_lists: bool) -> Vec<Particle> {
        self.delete_halo();
        self.re_bin()
    }

    fn delete_all(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
    }

    fn iterate<F: PairFunctor>(&mut self, functor: &F, spec: &TraversalSpec) -> Result<()> {
        self.run_schedule(functor, spec)
    }

    fn for_each_particle(
        &self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&Particle),
    ) {
        // Region filtering prunes candidate cells first; the cell block
        // gives them in O(region volume).
        let candidate_cells: Option<Vec<usize>> = region.map(|r| self.block.cells_in_region(r));
        let indices: Box<dyn Iterator<Item = usize>> = match &candidate_cells {
            Some(list) => Box::new(list.iter().copied()),
            None => Box::new(0..self.cells.len()),
        };
        for ci in indices {
            for p in self.cells[ci].particles() {
                if behavior.matches(p.ownership) && region.map_or(true, |r| r.contains(p.pos)) {
                    f(p);
                }
            }
        }
    }

    fn for_each_particle_mut(
        &mut self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&mut Particle),
    ) {
        let candidate_cells: Option<Vec<usize>> = region.map(|r| self.block.cells_in_region(r));
        match candidate_cells {
            Some(list) => {
                for ci in list {
                    for p in self.cells[ci].particles_mut() {
                        if behavior.matches(p.ownership)
                            && region.map_or(true, |r| r.contains(p.pos))
                        {
                            f(p);
                        }
                    }
                }
            }
            None => {
                for cell in &mut self.cells {
                    for p in cell.particles_mut() {
                        if behavior.matches(p.ownership) {
                            f(p);
                        }
                    }
                }
            }
        }
    }
}

/// Cell grid over one flat particle store; cells hold arena indices.
#[derive(Debug)]
pub struct LinkedCellsReferences {
    block: CellBlock,
    cells: Vec<ReferenceCell>,
    arena: Vec<Particle>,
    halo_flags: Vec<bool>,
    box_min: [f64; 3],
    box_max: [f64; 3],
    cutoff: f64,
    skin: f64,
    strict: bool,
}

impl LinkedCellsReferences {
    /// Creates an empty container for the given box.
    ///
    /// # Errors
    ///
    /// [`ShoalError::Configuration`] when the box cannot fit one cell of
    /// `(cutoff + skin) · cell_size_factor` per axis.
    pub fn new(
        box_min: [f64; 3],
        box_max: [f64; 3],
        cutoff: f64,
        skin: f64,
        cell_size_factor: f64,
        strict: bool,
    ) -> Result<Self> {
        let block = CellBlock::new(box_min, box_max, cutoff + skin, cell_size_factor)?;
        let cells = vec![ReferenceCell::default(); block.num_cells()];
        let halo_flags = block.halo_flags();
        Ok(Self {
            block,
            cells,
            arena: Vec::new(),
            halo_flags,
            box_min,
            box_max,
            cutoff,
            skin,
            strict,
        })
    }

    fn re_bin_all(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
        for (slot, p) in self.arena.iter().enumerate() {
            let index = self.block.index_of(p.pos);
            self.cells[index].push(slot);
        }
    }
}

/// [`CellStepKernel`] over reference cells: cell indices resolve to arena
/// slots, which are mutated through the disjoint-slot view.
struct RefCellKernel<'a, F> {
    cells: &'a [ReferenceCell],
    arena: DisjointSlots<'a, Particle>,
    halo: &'a [bool],
    functor: &'a F,
    newton3: bool,
}

impl<F: PairFunctor> CellStepKernel for RefCellKernel<'_, F> {
    unsafe fn cell(&self, c: usize) {
        if self.halo[c] {
            return;
        }
        let slots = self.cells[c].slots();
        for (n, &si) in slots.iter().enumerate() {
            for &sj in &slots[n + 1..] {
                // SAFETY: a slot belongs to exactly one cell, so exclusive
                // access to cell `c` implies exclusive access to its slots;
                // si != sj within one cell.
                let (pi, pj) = unsafe { self.arena.two_slots_mut(si, sj) };
                if pi.is_dummy() || pj.is_dummy() {
                    continue;
                }
                self.functor.aos_pair(pi, pj, self.newton3);
                if !self.newton3 {
                    self.functor.aos_pair(pj, pi, false);
                }
            }
        }
    }

    unsafe fn cell_pair(&self, a: usize, b: usize) {
        if self.halo[a] && self.halo[b] {
            return;
        }
        for &si in self.cells[a].slots() {
            for &sj in self.cells[b].slots() {
                // SAFETY: slots of two distinct cells are disjoint, and
                // the schedule grants exclusive access to both cells.
                let (pi, pj) = unsafe { self.arena.two_slots_mut(si, sj) };
                if pi.is_dummy() || pj.is_dummy() {
                    continue;
                }
                self.functor.aos_pair(pi, pj, self.newton3);
                if !self.newton3 {
                    self.functor.aos_pair(pj, pi, false);
                }
            }
        }
    }
}

impl ParticleContainer for LinkedCellsReferences {
    fn choice(&self) -> ContainerChoice {
        ContainerChoice::LinkedCellsReferences
    }

    fn box_min(&self) -> [f64; 3] {
        self.box_min
    }

    fn box_max(&self) -> [f64; 3] {
        self.box_max
    }

    fn cutoff(&self) -> f64 {
        self.cutoff
    }

    fn skin(&self) -> f64 {
        self.skin
    }

    fn selector_info(&self) -> TraversalSelectorInfo {
        TraversalSelectorInfo {
            dims: self.block.dims(),
            interaction_length: self.interaction_length(),
            cell_length: self.block.cell_length(),
            cluster_size: 0,
        }
    }

    fn num_particles(&self) -> usize {
        self.arena.iter().filter(|p| !p.is_dummy()).count()
    }

    fn add(&mut self, p: Particle) -> Result<()> {
        check_owned_intake(&p, self.box_min, self.box_max, self.strict)?;
        let slot = self.arena.len();
        let index = self.block.index_of(p.pos);
        self.arena.push(p);
        self.cells[index].push(slot);
        Ok(())
    }

    fn add_halo(&mut self, p: Particle) -> Result<()> {
        check_halo_intake(
            &p,
            self.box_min,
            self.box_max,
            self.interaction_length(),
            self.strict,
        )?;
        let mut p = p;
        p.ownership = OwnershipState::Halo;
        let slot = self.arena.len();
        let index = self.block.index_of(p.pos);
        self.arena.push(p);
        self.cells[index].push(slot);
        Ok(())
    }

    fn update_halo(&mut self, p: &Particle) -> bool {
        let skin_sq = self.skin * self.skin;
        for stored in &mut self.arena {
            if stored.is_halo() && stored.id == p.id && dist_sq(stored.pos, p.pos) <= skin_sq {
                *stored = *p;
                stored.ownership = OwnershipState::Halo;
                return true;
            }
        }
        false
    }

    fn delete_halo(&mut self) {
        self.arena.retain(|p| !p.is_halo());
        self.re_bin_all();
    }

    fn update_container(&mut self, _keep_lists: bool) -> Vec<Particle> {
        let mut leavers = Vec::new();
        let arena = std::mem::take(&mut self.arena);
        for p in arena {
            if p.is_dummy() || p.is_halo() {
                continue;
            }
            if in_box(p.pos, self.box_min, self.box_max) {
                self.arena.push(p);
            } else {
                leavers.push(p);
            }
        }
        self.re_bin_all();
        leavers
    }

    fn delete_all(&mut self) {
        self.arena.clear();
        self.re_bin_all();
    }

    fn iterate<F: PairFunctor>(&mut self, functor: &F, spec: &TraversalSpec) -> Result<()> {
        if spec.layout == DataLayout::Soa {
            return Err(ShoalError::InvalidArgument(
                "reference cells keep one flat particle store; aos only".into(),
            ));
        }
        let dims = self.block.dims();
        match spec.traversal {
            TraversalChoice::C01 => {
                // One-way writes against an arena snapshot; each parallel
                // task writes only its base cell's slots.
                let snapshot = self.arena.clone();
                let arena = DisjointSlots::new(&mut self.arena);
                let cells = &self.cells;
                let halo = &self.halo_flags;
                use rayon::prelude::*;
                (0..cells.len()).into_par_iter().for_each(|ci| {
                    if halo[ci] || cells[ci].is_empty() {
                        return;
                    }
                    let base3 = crate::traversals::cell_pair::one_to_three(ci, dims);
                    for &si in cells[ci].slots() {
                        // SAFETY: slot si belongs only to cell ci, and ci is
                        // this task's base; no other task touches it.
                        let pi = unsafe { arena.slot_mut(si) };
                        if pi.is_dummy() {
                            continue;
                        }
                        for dz in -1i64..=1 {
                            for dy in -1i64..=1 {
                                for dx in -1i64..=1 {
                                    let Some(nb) = crate::traversals::cell_pair::offset_index(
                                        base3,
                                        [dx, dy, dz],
                                        dims,
                                    ) else {
                                        continue;
                                    };
                                    let nb1 =
                                        crate::traversals::cell_pair::three_to_one(nb, dims);
                                    for &sj in cells[nb1].slots() {
                                        if sj == si {
                                            continue;
                                        }
                                        let mut copy = snapshot[sj];
                                        if copy.is_dummy() {
                                            continue;
                                        }
                                        functor.aos_pair(pi, &mut copy, false);
                                    }
                                }
                            }
                        }
                    }
                });
            }
            TraversalChoice::C08 | TraversalChoice::C18 => {
                let kernel = RefCellKernel {
                    cells: &self.cells,
                    arena: DisjointSlots::new(&mut self.arena),
                    halo: &self.halo_flags,
                    functor,
                    newton3: spec.newton3,
                };
                if spec.traversal == TraversalChoice::C08 {
                    colored::c08(&kernel, dims);
                } else {
                    colored::c18(&kernel, dims);
                }
            }
            TraversalChoice::Sliced | TraversalChoice::SlicedC02 | TraversalChoice::BalancedSliced => {
                let axis = longest_axis(dims);
                let loads = if spec.traversal == TraversalChoice::BalancedSliced {
                    match spec.load_estimator {
                        LoadEstimator::None => None,
                        _ => Some(layer_loads(dims, axis, |index| {
                            let n = self.cells[index].len() as f64;
                            n * n
                        })),
                    }
                } else {
                    None
                };
                let mode = if spec.traversal == TraversalChoice::SlicedC02 {
                    SlicedMode::TwoColored
                } else {
                    SlicedMode::Locked
                };
                let kernel = RefCellKernel {
                    cells: &self.cells,
                    arena: DisjointSlots::new(&mut self.arena),
                    halo: &self.halo_flags,
                    functor,
                    newton3: spec.newton3,
                };
                sliced(dims, axis, spec.num_threads, loads.as_deref(), mode, |base| {
                    // SAFETY: c08 base steps reach one layer forward; the
                    // slab discipline keeps concurrent footprints disjoint,
                    // and cell exclusivity implies slot exclusivity.
                    unsafe { process_c08_base(&kernel, base, dims) }
                });
            }
            other => {
                return Err(ShoalError::InvalidArgument(format!(
                    "linked-cells-references container cannot run {other}"
                )));
            }
        }
        Ok(())
    }

    fn for_each_particle(
        &self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&Particle),
    ) {
        for p in &self.arena {
            if behavior.matches(p.ownership) && region.map_or(true, |r| r.contains(p.pos)) {
                f(p);
            }
        }
    }

    fn for_each_particle_mut(
        &mut self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&mut Particle),
    ) {
        for p in &mut self.arena {
            if behavior.matches(p.ownership) && region.map_or(true, |r| r.contains(p.pos)) {
                f(p);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functors::{LennardJones, PairCounter};

    fn spec(traversal: TraversalChoice, newton3: bool) -> TraversalSpec {
        TraversalSpec {
            traversal,
            layout: DataLayout::Aos,
            newton3,
            load_estimator: LoadEstimator::None,
            num_threads: 2,
        }
    }

    fn filled() -> LinkedCells {
        let Ok(mut lc) = LinkedCells::new([0.0; 3], [6.0; 3], 1.0, 0.0, 1.0, true) else {
            panic!("valid box");
        };
        let mut id = 0;
        for x in 0..6 {
            for y in 0..6 {
                for z in 0..6 {
                    let p = Particle::new(
                        id,
                        [x as f64 + 0.5, y as f64 + 0.5, z as f64 + 0.5],
                    );
                    let Ok(()) = lc.add(p) else { panic!("in box") };
                    id += 1;
                }
            }
        }
        lc
    }

    /// 6×6×6 unit lattice, cutoff 1: 3 · 5 · 36 face-adjacent pairs.
    const LATTICE_PAIRS: u64 = 540;

    #[test]
    fn add_routes_to_containing_cell() {
        let mut lc = filled();
        assert_eq!(lc.num_particles(), 216);
        let Ok(()) = lc.add_halo(Particle::new(999, [-0.3, 3.0, 3.0])) else {
            panic!("halo intake");
        };
        assert_eq!(lc.num_particles(), 217);
        assert_eq!(lc.particles(IteratorBehavior::Halo).len(), 1);
    }

    #[test]
    fn all_grid_schedules_count_the_same_pairs() {
        for traversal in [
            TraversalChoice::C08,
            TraversalChoice::C18,
            TraversalChoice::Sliced,
            TraversalChoice::SlicedC02,
            TraversalChoice::BalancedSliced,
        ] {
            let mut lc = filled();
            let counter = PairCounter::new(1.0);
            let Ok(()) = lc.iterate(&counter, &spec(traversal, true)) else {
                panic!("{traversal} must run");
            };
            assert_eq!(
                counter.kernel_calls(),
                LATTICE_PAIRS,
                "{traversal} pair count"
            );
        }
    }

    #[test]
    fn c01_counts_each_pair_twice() {
        let mut lc = filled();
        let counter = PairCounter::new(1.0);
        let Ok(()) = lc.iterate(&counter, &spec(TraversalChoice::C01, false)) else {
            panic!("c01 must run");
        };
        assert_eq!(counter.kernel_calls(), 2 * LATTICE_PAIRS);
    }

    #[test]
    fn newton3_off_counts_each_pair_twice() {
        let mut lc = filled();
        let counter = PairCounter::new(1.0);
        let Ok(()) = lc.iterate(&counter, &spec(TraversalChoice::C08, false)) else {
            panic!("c08 must run");
        };
        assert_eq!(counter.kernel_calls(), 2 * LATTICE_PAIRS);
    }

    #[test]
    fn update_container_rebins_and_returns_leavers() {
        let mut lc = filled();
        lc.for_each_particle_mut(IteratorBehavior::Owned, None, &mut |p| {
            if p.id == 0 {
                p.pos = [-0.4, 0.5, 0.5]; // leaves the box
            } else if p.id == 1 {
                p.pos = [2.7, 0.5, 0.5]; // moves two cells over
            }
        });
        let leavers = lc.update_container(false);
        assert_eq!(leavers.len(), 1);
        assert_eq!(leavers[0].id, 0);
        assert_eq!(lc.num_particles(), 215);
        // the moved particle is findable in its new cell region
        let region = Region::new([2.0, 0.0, 0.0], [3.0, 1.0, 1.0]);
        let mut found = false;
        lc.for_each_particle(IteratorBehavior::Owned, Some(&region), &mut |p| {
            found |= p.id == 1;
        });
        assert!(found, "re-binned particle must be in its new cell");
    }

    #[test]
    fn region_iterator_matches_brute_force() {
        let lc = filled();
        let region = Region::new([0.0; 3], [3.0; 3]);
        let mut via_region = Vec::new();
        lc.for_each_particle(IteratorBehavior::Owned, Some(&region), &mut |p| {
            via_region.push(p.id);
        });
        let mut brute: Vec<u64> = lc
            .particles(IteratorBehavior::Owned)
            .into_iter()
            .filter(|p| region.contains(p.pos))
            .map(|p| p.id)
            .collect();
        via_region.sort_unstable();
        brute.sort_unstable();
        assert_eq!(via_region, brute);
        assert_eq!(via_region.len(), 27, "3×3×3 cells of one particle each");
    }

    #[test]
    fn references_variant_agrees_with_value_cells() {
        let Ok(mut lcr) = LinkedCellsReferences::new([0.0; 3], [6.0; 3], 1.0, 0.0, 1.0, true)
        else {
            panic!("valid box");
        };
        let mut lc = filled();
        for p in lc.particles(IteratorBehavior::Owned) {
            let Ok(()) = lcr.add(p) else { panic!("in box") };
        }

        let lj = LennardJones::new(1.0, 1.0, 1.0);
        let Ok(()) = lc.iterate(&lj, &spec(TraversalChoice::C08, true)) else {
            panic!("value cells");
        };
        let Ok(()) = lcr.iterate(&lj, &spec(TraversalChoice::C08, true)) else {
            panic!("reference cells");
        };

        let mut a = lc.particles(IteratorBehavior::Owned);
        let mut b = lcr.particles(IteratorBehavior::Owned);
        a.sort_by_key(|p| p.id);
        b.sort_by_key(|p| p.id);
        for (pa, pb) in a.iter().zip(b.iter()) {
            for d in 0..3 {
                assert!(
                    (pa.force[d] - pb.force[d]).abs() < crate::tolerances::NEWTON3_PARITY_ABS,
                    "particle {} axis {d}",
                    pa.id
                );
            }
        }
    }

    #[test]
    fn references_reject_soa() {
        let Ok(mut lcr) = LinkedCellsReferences::new([0.0; 3], [6.0; 3], 1.0, 0.0, 1.0, true)
        else {
            panic!("valid box");
        };
        let mut s = spec(TraversalChoice::C08, true);
        s.layout = DataLayout::Soa;
        assert!(lcr.iterate(&LennardJones::new(1.0, 1.0, 1.0), &s).is_err());
    }

    #[test]
    fn soa_c08_matches_aos_c08() {
        let lj = LennardJones::new(1.0, 1.0, 1.0);
        let mut aos = filled();
        let mut soa = filled();
        let Ok(()) = aos.iterate(&lj, &spec(TraversalChoice::C08, true)) else {
            panic!("aos");
        };
        let mut s = spec(TraversalChoice::C08, true);
        s.layout = DataLayout::Soa;
        let Ok(()) = soa.iterate(&lj, &s) else { panic!("soa") };
        let mut a = aos.particles(IteratorBehavior::Owned);
        let mut b = soa.particles(IteratorBehavior::Owned);
        a.sort_by_key(|p| p.id);
        b.sort_by_key(|p| p.id);
        for (pa, pb) in a.iter().zip(b.iter()) {
            for d in 0..3 {
                assert!((pa.force[d] - pb.force[d]).abs() < 1e-12);
            }
        }
    }
}
