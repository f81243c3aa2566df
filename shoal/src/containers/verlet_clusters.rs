// SPDX-License-Identifier: AGPL-3.0-only

//! Verlet cluster lists.
//!
//! Particles are binned into a two-dimensional grid of *towers* in the xy
//! plane; each tower sorts its particles by z and groups them into
//! fixed-size *clusters* stored contiguously for SIMD-friendly SoA access.
//! The last cluster of a tower is padded: first with copies of the last
//! particle (so bounding boxes stay meaningful while neighbor lists are
//! built), then the copies become dummies parked outside the box.
//!
//! Cluster neighbor lists pair clusters whose bounding boxes lie within
//! cutoff + skin. With Newton-3 each pair is recorded once, owned by the
//! lexicographically smaller (tower x, tower y, cluster) — so a cluster's
//! partners never lie at smaller tower x, which is what the sliced tower
//! schedule's forward-only lock discipline relies on.
//!
//! Additions go to a pending buffer; a rebuild is the only moment the
//! buffer drains into towers. Iterators over a stale container include
//! pending particles.

use rayon::prelude::*;

use crate::cell::FullCell;
use crate::containers::{
    check_halo_intake, check_owned_intake, ContainerChoice, ParticleContainer, RebuildTracker,
};
use crate::error::{Result, ShoalError};
use crate::functor::PairFunctor;
use crate::geometry::{in_box, Region};
use crate::particle::{IteratorBehavior, OwnershipState, Particle};
use crate::tolerances::{CLUSTER_SIZE, DUMMY_PARTICLE_ID, MIN_CLUSTER_PAIRS_PER_THREAD};
use crate::traversals::grid::DisjointSlots;
use crate::traversals::{DataLayout, TraversalChoice, TraversalSelectorInfo, TraversalSpec};

/// One vertical stack of clusters.
#[derive(Debug, Default, Clone)]
struct Tower {
    cell: FullCell,
    num_dummies: usize,
    /// Per cluster: `(tower, cluster)` partners.
    neighbors: Vec<Vec<(usize, usize)>>,
}

impl Tower {
    fn num_clusters(&self) -> usize {
        self.cell.len() / CLUSTER_SIZE
    }

    fn num_actual(&self) -> usize {
        self.cell.len() - self.num_dummies
    }

    fn cluster_range(c: usize) -> std::ops::Range<usize> {
        c * CLUSTER_SIZE..(c + 1) * CLUSTER_SIZE
    }

    /// z extent over the cluster's non-dummy particles.
    fn cluster_z_extent(&self, c: usize) -> Option<(f64, f64)> {
        let slice = &self.cell.particles()[Self::cluster_range(c)];
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for p in slice {
            if p.is_dummy() {
                continue;
            }
            lo = lo.min(p.pos[2]);
            hi = hi.max(p.pos[2]);
        }
        (lo <= hi).then_some((lo, hi))
    }
}

/// A contiguous run of towers assigned to one worker by the static
/// cluster-thread partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterRange {
    /// First tower of the range.
    pub start_tower: usize,
    /// Number of towers in the range.
    pub num_towers: usize,
}

/// The tower-grid cluster container.
#[derive(Debug)]
pub struct VerletClusterLists {
    towers: Vec<Tower>,
    towers_per_dim: [usize; 2],
    tower_side: f64,
    towers_per_interaction_length: usize,
    pending: Vec<Particle>,
    built_newton3: bool,
    valid: bool,
    tracker: RebuildTracker,
    cluster_ranges: Vec<ClusterRange>,
    box_min: [f64; 3],
    box_max: [f64; 3],
    cutoff: f64,
    skin: f64,
    strict: bool,
}

impl VerletClusterLists {
    /// Creates an empty container for the given box.
    #[must_use]
    pub fn new(box_min: [f64; 3], box_max: [f64; 3], cutoff: f64, skin: f64, strict: bool) -> Self {
        Self {
            towers: vec![Tower::default()],
            towers_per_dim: [1, 1],
            tower_side: box_max[0] - box_min[0],
            towers_per_interaction_length: 1,
            pending: Vec::new(),
            built_newton3: false,
            valid: false,
            tracker: RebuildTracker::new(),
            cluster_ranges: Vec::new(),
            box_min,
            box_max,
            cutoff,
            skin,
            strict,
        }
    }

    /// Number of clusters currently held.
    #[must_use]
    pub fn num_clusters(&self) -> usize {
        self.towers.iter().map(Tower::num_clusters).sum()
    }

    /// The static tower partition computed at the last rebuild.
    #[must_use]
    pub fn cluster_thread_partition(&self) -> &[ClusterRange] {
        &self.cluster_ranges
    }

    fn tower_index(&self, x: usize, y: usize) -> usize {
        x + self.towers_per_dim[0] * y
    }

    fn tower_xy(&self, index: usize) -> (usize, usize) {
        (
            index % self.towers_per_dim[0],
            index / self.towers_per_dim[0],
        )
    }

    fn tower_of_position(&self, pos: [f64; 3]) -> usize {
        let lo_x = self.box_min[0] - self.interaction_length();
        let lo_y = self.box_min[1] - self.interaction_length();
        let x = (((pos[0] - lo_x) / self.tower_side).floor() as i64)
            .clamp(0, self.towers_per_dim[0] as i64 - 1) as usize;
        let y = (((pos[1] - lo_y) / self.tower_side).floor() as i64)
            .clamp(0, self.towers_per_dim[1] as i64 - 1) as usize;
        self.tower_index(x, y)
    }

    fn collect_all_actual(&mut self) -> Vec<Particle> {
        let mut all: Vec<Particle> = std::mem::take(&mut self.pending);
        for tower in &mut self.towers {
            all.extend(tower.cell.drain_all().into_iter().filter(|p| !p.is_dummy()));
            tower.num_dummies = 0;
            tower.neighbors.clear();
        }
        all
    }

    /// Rebuilds towers and clusters: grid sizing, binning, z-sort,
    /// padding with copies of the last particle.
    fn rebuild_towers(&mut self, particles: Vec<Particle>) {
        let il = self.interaction_length();
        let extent_x = self.box_max[0] - self.box_min[0] + 2.0 * il;
        let extent_y = self.box_max[1] - self.box_min[1] + 2.0 * il;

        // Tower side from estimated density: roughly one cluster of
        // particles per tower column per cluster height.
        let n = particles.len().max(1);
        let side_estimate = (extent_x * extent_y * CLUSTER_SIZE as f64 / n as f64).sqrt();
        let nx = ((extent_x / side_estimate).ceil() as usize).max(1);
        let ny = ((extent_y / side_estimate).ceil() as usize).max(1);
        self.towers_per_dim = [nx, ny];
        self.tower_side = (extent_x / nx as f64).max(extent_y / ny as f64);
        self.towers_per_interaction_length =
            ((il / self.tower_side).ceil() as usize).max(1);

        self.towers = vec![Tower::default(); nx * ny];
        for p in particles {
            let t = self.tower_of_position(p.pos);
            self.towers[t].cell.push(p);
        }
        for tower in &mut self.towers {
            if tower.cell.is_empty() {
                continue;
            }
            tower.cell.sort_by_axis(2);
            let remainder = tower.cell.len() % CLUSTER_SIZE;
            tower.num_dummies = if remainder == 0 {
                0
            } else {
                CLUSTER_SIZE - remainder
            };
            let last = tower.cell.particles()[tower.cell.len() - 1];
            for _ in 0..tower.num_dummies {
                tower.cell.push(last);
            }
        }
    }

    /// Replaces the padding copies made by the tower rebuild with dummy
    /// particles parked outside the box along z.
    fn fill_up_with_dummies(&mut self) {
        let dummy_x = self.box_max[0] + 8.0 * self.interaction_length();
        let dummy_dist_z = 2.0 * self.interaction_length();
        for tower in &mut self.towers {
            if tower.num_dummies == 0 {
                continue;
            }
            let len = tower.cell.len();
            for (k, p) in tower.cell.particles_mut()[len - tower.num_dummies..]
                .iter_mut()
                .enumerate()
            {
                p.ownership = OwnershipState::Dummy;
                p.id = DUMMY_PARTICLE_ID;
                p.pos = [dummy_x, 0.0, dummy_dist_z * (k + 1) as f64];
            }
        }
    }

    /// Minimal xy distance between two tower footprints.
    fn tower_xy_gap(&self, a: usize, b: usize) -> f64 {
        let (ax, ay) = self.tower_xy(a);
        let (bx, by) = self.tower_xy(b);
        let gap = |u: usize, v: usize| -> f64 {
            let d = u.abs_diff(v);
            if d <= 1 {
                0.0
            } else {
                (d - 1) as f64 * self.tower_side
            }
        };
        let gx = gap(ax, bx);
        let gy = gap(ay, by);
        gx.hypot(gy)
    }

    fn clusters_within_range(&self, ta: usize, ca: usize, tb: usize, cb: usize) -> bool {
        let il = self.interaction_length();
        let xy_gap = if ta == tb { 0.0 } else { self.tower_xy_gap(ta, tb) };
        if xy_gap > il {
            return false;
        }
        let (Some((alo, ahi)), Some((blo, bhi))) = (
            self.towers[ta].cluster_z_extent(ca),
            self.towers[tb].cluster_z_extent(cb),
        ) else {
            return false;
        };
        let z_gap = (blo - ahi).max(alo - bhi).max(0.0);
        xy_gap.hypot(z_gap) <= il
    }

    fn build_cluster_neighbor_lists(&mut self, newton3: bool) {
        let til = self.towers_per_interaction_length as i64;
        let [nx, ny] = self.towers_per_dim;

        // Partner tower offsets: forward (lex-greater) with newton3, the
        // full window without.
        let mut offsets: Vec<(i64, i64)> = Vec::new();
        for dy in -til..=til {
            for dx in -til..=til {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let forward = dx > 0 || (dx == 0 && dy > 0);
                if !newton3 || forward {
                    offsets.push((dx, dy));
                }
            }
        }

        for t in 0..self.towers.len() {
            let (tx, ty) = self.tower_xy(t);
            let num_clusters = self.towers[t].num_clusters();
            let mut lists: Vec<Vec<(usize, usize)>> = vec![Vec::new(); num_clusters];

            for ca in 0..num_clusters {
                // intra-tower partners
                for cb in 0..num_clusters {
                    if cb == ca || (newton3 && cb < ca) {
                        continue;
                    }
                    if self.clusters_within_range(t, ca, t, cb) {
                        lists[ca].push((t, cb));
                    }
                }
                // cross-tower partners
                for &(dx, dy) in &offsets {
                    let x = tx as i64 + dx;
                    let y = ty as i64 + dy;
                    if x < 0 || y < 0 || x >= nx as i64 || y >= ny as i64 {
                        continue;
                    }
                    let pt = self.tower_index(x as usize, y as usize);
                    for cb in 0..self.towers[pt].num_clusters() {
                        if self.clusters_within_range(t, ca, pt, cb) {
                            lists[ca].push((pt, cb));
                        }
                    }
                }
            }
            self.towers[t].neighbors = lists;
        }
    }

    /// Static partition: contiguous tower runs with roughly equal
    /// cluster-pair counts per worker.
    fn compute_cluster_thread_partition(&mut self, num_threads: usize) {
        let pair_count: Vec<usize> = self
            .towers
            .iter()
            .map(|t| t.neighbors.iter().map(Vec::len).sum::<usize>() + t.num_clusters())
            .collect();
        let total: usize = pair_count.iter().sum();
        let workers = (total / MIN_CLUSTER_PAIRS_PER_THREAD)
            .clamp(1, num_threads.max(1));
        let per_worker = total.div_ceil(workers).max(1);

        self.cluster_ranges.clear();
        let mut start = 0;
        let mut acc = 0;
        for (t, &count) in pair_count.iter().enumerate() {
            acc += count;
            if acc >= per_worker * (self.cluster_ranges.len() + 1)
                && self.cluster_ranges.len() + 1 < workers
            {
                self.cluster_ranges.push(ClusterRange {
                    start_tower: start,
                    num_towers: t + 1 - start,
                });
                start = t + 1;
            }
        }
        self.cluster_ranges.push(ClusterRange {
            start_tower: start,
            num_towers: self.towers.len() - start,
        });
    }

    fn current_positions(&self) -> Vec<(u64, [f64; 3])> {
        let mut out = Vec::new();
        self.for_each_particle(IteratorBehavior::OwnedOrHalo, None, &mut |p| {
            out.push((p.id, p.pos));
        });
        out
    }

    fn rebuild(&mut self, newton3: bool, num_threads: usize) {
        let all = self.collect_all_actual();
        self.rebuild_towers(all);
        self.build_cluster_neighbor_lists(newton3);
        self.fill_up_with_dummies();
        self.compute_cluster_thread_partition(num_threads);
        self.built_newton3 = newton3;
        self.valid = true;
        self.tracker.record(self.current_positions());
    }
}

/// Tower-step kernel: processes all cluster interactions owned by one
/// tower.
struct ClusterKernel<'a, F> {
    towers: DisjointSlots<'a, Tower>,
    /// AoS snapshot for one-way (non-Newton-3) partner reads.
    snapshot: Option<&'a [Vec<Particle>]>,
    functor: &'a F,
    layout: DataLayout,
    newton3: bool,
}

impl<F: PairFunctor> ClusterKernel<'_, F> {
    /// Processes tower `t`: intra-cluster self-interactions plus every
    /// neighbor-list cluster pair owned by this tower.
    ///
    /// # Safety
    ///
    /// With Newton-3 the caller must hold exclusive access to tower `t`
    /// and every partner tower its lists reference (forward towers and,
    /// for intra-tower pairs, `t` itself). Without Newton-3 only tower
    /// `t` is written and partner reads come from the snapshot, so
    /// exclusive access to `t` suffices.
    unsafe fn tower(&self, t: usize) {
        // Borrows of tower `t` are re-acquired per step and never overlap
        // the two-tower accesses below.
        // SAFETY: exclusivity of `t` is the caller's precondition.
        let (num_clusters, partner_lists) = {
            let tower = unsafe { self.towers.slot_mut(t) };
            (tower.num_clusters(), tower.neighbors.clone())
        };

        for ca in 0..num_clusters {
            let ra = Tower::cluster_range(ca);
            // intra-cluster self-interaction
            {
                // SAFETY: see above; the borrow ends with this block.
                let tower = unsafe { self.towers.slot_mut(t) };
                match self.layout {
                    DataLayout::Aos => {
                        for i in ra.clone() {
                            for j in ra.clone() {
                                if i == j || (self.newton3 && j < i) {
                                    continue;
                                }
                                if let Some((pi, pj)) = tower.cell.pair_mut(i, j) {
                                    if pi.is_dummy() || pj.is_dummy() {
                                        continue;
                                    }
                                    self.functor.aos_pair(pi, pj, self.newton3);
                                }
                            }
                        }
                    }
                    DataLayout::Soa => {
                        self.functor
                            .soa_self(&mut tower.cell.soa, ra.clone(), self.newton3);
                    }
                }
            }

            // neighbor-list cluster pairs
            for &(pt, cb) in &partner_lists[ca] {
                let rb = Tower::cluster_range(cb);
                if self.newton3 {
                    if pt == t {
                        // SAFETY: single borrow of `t`, scoped to this arm.
                        let tower = unsafe { self.towers.slot_mut(t) };
                        match self.layout {
                            DataLayout::Aos => {
                                for i in ra.clone() {
                                    for j in rb.clone() {
                                        if let Some((pi, pj)) = tower.cell.pair_mut(i, j) {
                                            if pi.is_dummy() || pj.is_dummy() {
                                                continue;
                                            }
                                            self.functor.aos_pair(pi, pj, true);
                                        }
                                    }
                                }
                            }
                            DataLayout::Soa => {
                                self.functor.soa_pair_within(
                                    &mut tower.cell.soa,
                                    ra.clone(),
                                    rb,
                                    true,
                                );
                            }
                        }
                    } else {
                        // SAFETY: partner towers of newton3 lists lie at
                        // lex-greater coordinates, inside the caller's
                        // exclusivity footprint; pt != t here.
                        let (ta, tb) = unsafe { self.towers.two_slots_mut(t, pt) };
                        match self.layout {
                            DataLayout::Aos => {
                                for i in ra.clone() {
                                    for j in rb.clone() {
                                        let pi = &mut ta.cell.particles_mut()[i];
                                        let pj = &mut tb.cell.particles_mut()[j];
                                        if pi.is_dummy() || pj.is_dummy() {
                                            continue;
                                        }
                                        self.functor.aos_pair(pi, pj, true);
                                    }
                                }
                            }
                            DataLayout::Soa => {
                                self.functor.soa_pair(
                                    &mut ta.cell.soa,
                                    ra.clone(),
                                    &mut tb.cell.soa,
                                    rb,
                                    true,
                                );
                            }
                        }
                    }
                } else {
                    let Some(snapshot) = self.snapshot else {
                        continue;
                    };
                    // SAFETY: only tower `t` is written; partner reads come
                    // from the snapshot.
                    let tower = unsafe { self.towers.slot_mut(t) };
                    match self.layout {
                        DataLayout::Aos => {
                            for i in ra.clone() {
                                let pi = &mut tower.cell.particles_mut()[i];
                                if pi.is_dummy() {
                                    continue;
                                }
                                for j in rb.clone() {
                                    let mut copy = snapshot[pt][j];
                                    if copy.is_dummy() {
                                        continue;
                                    }
                                    self.functor.aos_pair(pi, &mut copy, false);
                                }
                            }
                        }
                        DataLayout::Soa => {
                            // Partner lanes come from the snapshot via a
                            // small scratch buffer; one-way writes stay in
                            // this tower's columns.
                            let mut scratch = crate::soa::SoaBuffer::default();
                            for j in rb {
                                scratch.push(&snapshot[pt][j]);
                            }
                            let m = scratch.len();
                            self.functor.soa_pair(
                                &mut tower.cell.soa,
                                ra.clone(),
                                &mut scratch,
                                0..m,
                                false,
                            );
                        }
                    }
                }
            }
        }
    }
}

impl ParticleContainer for VerletClusterLists {
    fn choice(&self) -> ContainerChoice {
        ContainerChoice::VerletClusterLists
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
            dims: [self.towers_per_dim[0], self.towers_per_dim[1], 1],
            interaction_length: self.interaction_length(),
            cell_length: [
                self.tower_side,
                self.tower_side,
                self.box_max[2] - self.box_min[2],
            ],
            cluster_size: CLUSTER_SIZE,
        }
    }

    fn num_particles(&self) -> usize {
        self.towers.iter().map(Tower::num_actual).sum::<usize>() + self.pending.len()
    }

    fn add(&mut self, p: Particle) -> Result<()> {
        check_owned_intake(&p, self.box_min, self.box_max, self.strict)?;
        self.valid = false;
        self.tracker.mark_dirty();
        self.pending.push(p);
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
        self.valid = false;
        self.tracker.mark_dirty();
        self.pending.push(p);
        Ok(())
    }

    fn update_halo(&mut self, p: &Particle) -> bool {
        let skin_sq = self.skin * self.skin;
        for tower in &mut self.towers {
            for stored in tower.cell.particles_mut() {
                if stored.is_halo()
                    && stored.id == p.id
                    && crate::geometry::dist_sq(stored.pos, p.pos) <= skin_sq
                {
                    *stored = *p;
                    stored.ownership = OwnershipState::Halo;
                    return true;
                }
            }
        }
        for stored in &mut self.pending {
            if stored.is_halo()
                && stored.id == p.id
                && crate::geometry::dist_sq(stored.pos, p.pos) <= skin_sq
            {
                *stored = *p;
                stored.ownership = OwnershipState::Halo;
                return true;
            }
        }
        false
    }

    fn delete_halo(&mut self) {
        self.valid = false;
        self.tracker.mark_dirty();
        self.pending.retain(|p| !p.is_halo());
        for tower in &mut self.towers {
            let mut i = 0;
            while i < tower.cell.len() {
                if tower.cell.particles()[i].is_halo() {
                    let _ = tower.cell.swap_remove(i);
                } else {
                    i += 1;
                }
            }
        }
    }

    fn update_container(&mut self, _keep_lists: bool) -> Vec<Particle> {
        self.delete_halo();
        let all = self.collect_all_actual();
        let mut leavers = Vec::new();
        for p in all {
            if in_box(p.pos, self.box_min, self.box_max) {
                self.pending.push(p);
            } else if p.is_owned() {
                leavers.push(p);
            }
        }
        self.valid = false;
        self.tracker.mark_dirty();
        leavers
    }

    fn delete_all(&mut self) {
        self.pending.clear();
        self.towers = vec![Tower::default()];
        self.towers_per_dim = [1, 1];
        self.valid = false;
        self.tracker.mark_dirty();
        self.cluster_ranges.clear();
    }

    fn rebuild_neighbor_lists(&mut self, newton3: bool) {
        let threads = rayon::current_num_threads();
        self.rebuild(newton3, threads);
    }

    fn lists_valid(&self, skin_half: f64) -> bool {
        self.valid
            && self.pending.is_empty()
            && self.tracker.is_valid(self.current_positions(), skin_half)
    }

    fn iterate<F: PairFunctor>(&mut self, functor: &F, spec: &TraversalSpec) -> Result<()> {
        if !matches!(
            spec.traversal,
            TraversalChoice::ClusterC01 | TraversalChoice::ClusterC02 | TraversalChoice::ClusterSliced
        ) {
            return Err(ShoalError::InvalidArgument(format!(
                "verlet-cluster-lists container cannot run {}",
                spec.traversal
            )));
        }
        if !self.valid || self.built_newton3 != spec.newton3 {
            self.rebuild(spec.newton3, spec.num_threads);
        }

        if spec.layout == DataLayout::Soa {
            self.towers.par_iter_mut().for_each(|tower| {
                let mut soa = std::mem::take(&mut tower.cell.soa);
                functor.soa_load(tower.cell.particles(), &mut soa);
                tower.cell.soa = soa;
            });
        }

        let snapshot: Option<Vec<Vec<Particle>>> = if spec.newton3 {
            None
        } else {
            Some(
                self.towers
                    .iter()
                    .map(|t| t.cell.particles().to_vec())
                    .collect(),
            )
        };

        let [nx, ny] = self.towers_per_dim;
        let til = self.towers_per_interaction_length;
        let ranges = self.cluster_ranges.clone();
        let kernel = ClusterKernel {
            towers: DisjointSlots::new(&mut self.towers),
            snapshot: snapshot.as_deref(),
            functor,
            layout: spec.layout,
            newton3: spec.newton3,
        };

        match spec.traversal {
            TraversalChoice::ClusterC01 => {
                // One-way writes: the balanced tower ranges run in
                // parallel, towers within a range sequentially.
                ranges.par_iter().for_each(|range| {
                    for t in range.start_tower..range.start_tower + range.num_towers {
                        // SAFETY: each tower belongs to exactly one range;
                        // only tower `t` is written (snapshot reads).
                        unsafe { kernel.tower(t) }
                    }
                });
            }
            TraversalChoice::ClusterC02 => {
                // Two colors of x-stripes, each two interaction lengths
                // wide; same-color stripe footprints (± one interaction
                // length) cannot meet.
                let stripe = 2 * til;
                for color in 0..2usize {
                    let stripes: Vec<usize> =
                        (0..nx.div_ceil(stripe)).filter(|s| s % 2 == color).collect();
                    stripes.par_iter().for_each(|&s| {
                        for x in (s * stripe)..((s + 1) * stripe).min(nx) {
                            for y in 0..ny {
                                // SAFETY: stripes of one color are two
                                // stripes apart, so their ±til footprints
                                // are disjoint; within a stripe this task
                                // is sequential.
                                unsafe { kernel.tower(x + nx * y) }
                            }
                        }
                    });
                }
            }
            TraversalChoice::ClusterSliced => {
                // Slabs of x-columns with one lock per slab boundary.
                // Newton-3 partners lie at lex-greater towers, so writes
                // cross only into the next slab's first til columns.
                use std::sync::{Mutex, PoisonError};
                let num_slabs = (nx / til.max(1)).clamp(1, spec.num_threads.max(1));
                let cols_per_slab = nx.div_ceil(num_slabs);
                let locks: Vec<Mutex<()>> =
                    (0..num_slabs.saturating_sub(1)).map(|_| Mutex::new(())).collect();
                (0..num_slabs).into_par_iter().for_each(|slab| {
                    let x_start = slab * cols_per_slab;
                    let x_end = ((slab + 1) * cols_per_slab).min(nx);
                    for x in x_start..x_end {
                        let _left = (slab > 0 && x < x_start + til).then(|| {
                            locks[slab - 1]
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                        });
                        let _right = (slab + 1 < num_slabs && x + til >= x_end).then(|| {
                            locks[slab].lock().unwrap_or_else(PoisonError::into_inner)
                        });
                        for y in 0..ny {
                            // SAFETY: forward writes reach at most til
                            // columns right; the boundary locks serialize
                            // access to the shared columns.
                            unsafe { kernel.tower(x + nx * y) }
                        }
                    }
                });
            }
            _ => unreachable!("matched above"),
        }

        drop(kernel);

        if spec.layout == DataLayout::Soa {
            self.towers.par_iter_mut().for_each(|tower| {
                let soa = std::mem::take(&mut tower.cell.soa);
                functor.soa_extract(&soa, tower.cell.particles_mut());
                tower.cell.soa = soa;
            });
        }
        Ok(())
    }

    fn for_each_particle(
        &self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&Particle),
    ) {
        for tower in &self.towers {
            for p in tower.cell.particles() {
                if behavior.matches(p.ownership) && region.map_or(true, |r| r.contains(p.pos)) {
                    f(p);
                }
            }
        }
        // A stale-but-usable container still reports pending additions.
        for p in &self.pending {
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
        for tower in &mut self.towers {
            for p in tower.cell.particles_mut() {
                if behavior.matches(p.ownership) && region.map_or(true, |r| r.contains(p.pos)) {
                    f(p);
                }
            }
        }
        for p in &mut self.pending {
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
    use crate::traversals::LoadEstimator;

    fn spec(traversal: TraversalChoice, newton3: bool, layout: DataLayout) -> TraversalSpec {
        TraversalSpec {
            traversal,
            layout,
            newton3,
            load_estimator: LoadEstimator::None,
            num_threads: 2,
        }
    }

    fn filled() -> VerletClusterLists {
        let mut vcl = VerletClusterLists::new([0.0; 3], [6.0; 3], 0.9, 0.1, true);
        let mut id = 0;
        for x in 0..6 {
            for y in 0..6 {
                for z in 0..6 {
                    let p = Particle::new(id, [x as f64 + 0.5, y as f64 + 0.5, z as f64 + 0.5]);
                    let Ok(()) = vcl.add(p) else { panic!("in box") };
                    id += 1;
                }
            }
        }
        vcl
    }

    #[test]
    fn pending_particles_visible_before_rebuild() {
        let vcl = filled();
        assert_eq!(vcl.num_particles(), 216);
        assert_eq!(vcl.particles(IteratorBehavior::Owned).len(), 216);
    }

    #[test]
    fn rebuild_pads_last_cluster_with_dummies() {
        let mut vcl = filled();
        vcl.rebuild_neighbor_lists(true);
        assert_eq!(vcl.num_particles(), 216, "dummies are not actual particles");
        for tower in &vcl.towers {
            assert_eq!(tower.cell.len() % CLUSTER_SIZE, 0, "every tower is cluster-aligned");
            let dummies = tower
                .cell
                .particles()
                .iter()
                .filter(|p| p.is_dummy())
                .count();
            assert_eq!(dummies, tower.num_dummies);
            assert!(dummies < CLUSTER_SIZE);
            for p in tower.cell.particles() {
                if p.is_dummy() {
                    assert_eq!(p.id, DUMMY_PARTICLE_ID);
                    assert!(p.pos[0] > vcl.box_max[0], "dummies sit outside the box");
                }
            }
        }
    }

    #[test]
    fn towers_are_z_sorted() {
        let mut vcl = filled();
        vcl.rebuild_neighbor_lists(true);
        for tower in &vcl.towers {
            let actual = &tower.cell.particles()[..tower.num_actual()];
            for w in actual.windows(2) {
                assert!(w[0].pos[2] <= w[1].pos[2]);
            }
        }
    }

    #[test]
    fn cluster_z_extent_skips_dummies() {
        let mut vcl = VerletClusterLists::new([0.0; 3], [6.0; 3], 0.9, 0.1, true);
        // five particles: the second cluster holds two actual + two dummies
        for i in 0..5 {
            let Ok(()) = vcl.add(Particle::new(i, [3.0, 3.0, 0.5 + i as f64])) else {
                panic!("in box");
            };
        }
        vcl.rebuild_neighbor_lists(true);
        let tower = vcl
            .towers
            .iter()
            .find(|t| t.num_actual() > 0)
            .map_or_else(|| panic!("one tower holds the column"), |t| t);
        assert_eq!(tower.num_clusters(), 2);
        assert_eq!(tower.num_dummies, 3);
        let Some((lo, hi)) = tower.cluster_z_extent(1) else {
            panic!("partially dummy cluster still has an extent");
        };
        assert!((lo - 4.5).abs() < 1e-12 && (hi - 4.5).abs() < 1e-12);
    }

    #[test]
    fn traversals_agree_with_each_other() {
        let lj = LennardJones::new(1.0, 1.0, 1.0);
        let reference = {
            let mut vcl = filled();
            let Ok(()) = vcl.iterate(&lj, &spec(TraversalChoice::ClusterC02, true, DataLayout::Aos))
            else {
                panic!("c02 runs");
            };
            let mut p = vcl.particles(IteratorBehavior::Owned);
            p.sort_by_key(|p| p.id);
            p
        };
        for (traversal, newton3, layout) in [
            (TraversalChoice::ClusterC01, false, DataLayout::Aos),
            (TraversalChoice::ClusterC02, false, DataLayout::Aos),
            (TraversalChoice::ClusterSliced, true, DataLayout::Aos),
            (TraversalChoice::ClusterC02, true, DataLayout::Soa),
            (TraversalChoice::ClusterSliced, false, DataLayout::Soa),
        ] {
            let mut vcl = filled();
            let Ok(()) = vcl.iterate(&lj, &spec(traversal, newton3, layout)) else {
                panic!("{traversal} runs");
            };
            let mut got = vcl.particles(IteratorBehavior::Owned);
            got.sort_by_key(|p| p.id);
            for (a, b) in reference.iter().zip(got.iter()) {
                for d in 0..3 {
                    assert!(
                        (a.force[d] - b.force[d]).abs() < crate::tolerances::NEWTON3_PARITY_ABS,
                        "{traversal} newton3={newton3} {layout}: particle {} axis {d}: {} vs {}",
                        a.id,
                        a.force[d],
                        b.force[d]
                    );
                }
            }
        }
    }

    #[test]
    fn cluster_lists_prune_far_pairs() {
        let mut vcl = filled();
        let counter = PairCounter::new(1.0);
        let Ok(()) = vcl.iterate(
            &counter,
            &spec(TraversalChoice::ClusterC02, true, DataLayout::Aos),
        ) else {
            panic!("c02 runs");
        };
        // All 540 face pairs must be seen; cluster pruning may add some
        // extra candidates but far fewer than all-pairs (23 220).
        assert_eq!(counter.kernel_calls(), 540);
        assert!(
            counter.distance_calculations() < 23_220 / 2,
            "bounding-box pruning must discard most candidates, did {} distance checks",
            counter.distance_calculations()
        );
    }

    #[test]
    fn update_container_returns_leavers_and_keeps_rest_pending() {
        let mut vcl = filled();
        vcl.rebuild_neighbor_lists(true);
        vcl.for_each_particle_mut(IteratorBehavior::Owned, None, &mut |p| {
            if p.id == 0 {
                p.pos = [6.4, 0.5, 0.5];
            }
        });
        let leavers = vcl.update_container(false);
        assert_eq!(leavers.len(), 1);
        assert_eq!(leavers[0].id, 0);
        assert_eq!(vcl.num_particles(), 215);
        assert!(!vcl.lists_valid(vcl.skin() / 2.0));
    }

    #[test]
    fn partition_covers_all_towers_once() {
        let mut vcl = filled();
        vcl.rebuild_neighbor_lists(true);
        let ranges = vcl.cluster_thread_partition();
        let covered: usize = ranges.iter().map(|r| r.num_towers).sum();
        assert_eq!(covered, vcl.towers.len());
        for w in ranges.windows(2) {
            assert_eq!(w[0].start_tower + w[0].num_towers, w[1].start_tower);
        }
    }
}
