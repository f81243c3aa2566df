// SPDX-License-Identifier: AGPL-3.0-only

//! Direct-sum container: one owned cell, one halo cell.
//!
//! Every owned pair `(i, j)` with `i < j` and every (owned, halo) pair is
//! offered to the functor, with no spatial pruning. Quadratic, sequential,
//! and obviously correct — the baseline every other container is validated
//! against, and the fastest choice for very small systems.

use crate::cell::FullCell;
use crate::containers::{
    check_halo_intake, check_owned_intake, ContainerChoice, ParticleContainer,
};
use crate::error::{Result, ShoalError};
use crate::functor::PairFunctor;
use crate::geometry::{dist_sq, in_box, Region};
use crate::particle::{IteratorBehavior, Particle};
use crate::traversals::cell_pair::{aos_cell_pair, aos_cell_self};
use crate::traversals::{DataLayout, TraversalChoice, TraversalSelectorInfo, TraversalSpec};

/// The two-cell baseline container.
#[derive(Debug)]
pub struct DirectSum {
    owned: FullCell,
    halo: FullCell,
    box_min: [f64; 3],
    box_max: [f64; 3],
    cutoff: f64,
    skin: f64,
    strict: bool,
}

impl DirectSum {
    /// Creates an empty container for the given box.
    #[must_use]
    pub fn new(box_min: [f64; 3], box_max: [f64; 3], cutoff: f64, skin: f64, strict: bool) -> Self {
        Self {
            owned: FullCell::default(),
            halo: FullCell::default(),
            box_min,
            box_max,
            cutoff,
            skin,
            strict,
        }
    }

    fn for_cell(
        cell: &FullCell,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&Particle),
    ) {
        for p in cell.particles() {
            if behavior.matches(p.ownership) && region.map_or(true, |r| r.contains(p.pos)) {
                f(p);
            }
        }
    }
}

impl ParticleContainer for DirectSum {
    fn choice(&self) -> ContainerChoice {
        ContainerChoice::DirectSum
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
            dims: [2, 1, 1],
            interaction_length: self.interaction_length(),
            cell_length: [
                self.box_max[0] - self.box_min[0],
                self.box_max[1] - self.box_min[1],
                self.box_max[2] - self.box_min[2],
            ],
            cluster_size: 0,
        }
    }

    fn num_particles(&self) -> usize {
        self.owned.len() + self.halo.len()
    }

    fn add(&mut self, p: Particle) -> Result<()> {
        check_owned_intake(&p, self.box_min, self.box_max, self.strict)?;
        self.owned.push(p);
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
        p.ownership = crate::particle::OwnershipState::Halo;
        self.halo.push(p);
        Ok(())
    }

    fn update_halo(&mut self, p: &Particle) -> bool {
        let skin_sq = self.skin * self.skin;
        for stored in self.halo.particles_mut() {
            if stored.id == p.id && dist_sq(stored.pos, p.pos) <= skin_sq {
                *stored = *p;
                stored.ownership = crate::particle::OwnershipState::Halo;
                return true;
            }
        }
        false
    }

    fn delete_halo(&mut self) {
        self.halo.clear();
    }

    fn update_container(&mut self, _keep_lists: bool) -> Vec<Particle> {
        self.delete_halo();
        let mut leavers = Vec::new();
        let mut index = 0;
        while index < self.owned.len() {
            let pos = self.owned.particles()[index].pos;
            if in_box(pos, self.box_min, self.box_max) {
                index += 1;
            } else {
                leavers.push(self.owned.swap_remove(index));
            }
        }
        leavers
    }

    fn delete_all(&mut self) {
        self.owned.clear();
        self.halo.clear();
    }

    fn iterate<F: PairFunctor>(&mut self, functor: &F, spec: &TraversalSpec) -> Result<()> {
        if spec.traversal != TraversalChoice::Direct {
            return Err(ShoalError::InvalidArgument(format!(
                "direct-sum container cannot run {}",
                spec.traversal
            )));
        }
        match spec.layout {
            DataLayout::Aos => {
                aos_cell_self(functor, &mut self.owned, spec.newton3);
                if !self.halo.is_empty() && !self.owned.is_empty() {
                    aos_cell_pair(functor, &mut self.owned, &mut self.halo, spec.newton3);
                }
            }
            DataLayout::Soa => {
                let mut soa = std::mem::take(&mut self.owned.soa);
                functor.soa_load(self.owned.particles(), &mut soa);
                let n = soa.len();
                functor.soa_self(&mut soa, 0..n, spec.newton3);
                if !self.halo.is_empty() {
                    let mut halo_soa = std::mem::take(&mut self.halo.soa);
                    functor.soa_load(self.halo.particles(), &mut halo_soa);
                    let m = halo_soa.len();
                    functor.soa_pair(&mut soa, 0..n, &mut halo_soa, 0..m, spec.newton3);
                    if !spec.newton3 {
                        functor.soa_pair(&mut halo_soa, 0..m, &mut soa, 0..n, false);
                    }
                    self.halo.soa = halo_soa;
                }
                functor.soa_extract(&soa, self.owned.particles_mut());
                self.owned.soa = soa;
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
        Self::for_cell(&self.owned, behavior, region, f);
        Self::for_cell(&self.halo, behavior, region, f);
    }

    fn for_each_particle_mut(
        &mut self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&mut Particle),
    ) {
        for cell in [&mut self.owned, &mut self.halo] {
            for p in cell.particles_mut() {
                if behavior.matches(p.ownership) && region.map_or(true, |r| r.contains(p.pos)) {
                    f(p);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functors::{LennardJones, PairCounter};

    fn container() -> DirectSum {
        DirectSum::new([0.0; 3], [10.0; 3], 1.0, 0.2, true)
    }

    fn spec(newton3: bool, layout: DataLayout) -> TraversalSpec {
        TraversalSpec {
            traversal: TraversalChoice::Direct,
            layout,
            newton3,
            load_estimator: crate::traversals::LoadEstimator::None,
            num_threads: 1,
        }
    }

    #[test]
    fn owned_pairs_visited_once_under_newton3() {
        let mut ds = container();
        for i in 0..4 {
            let _ = ds.add(Particle::new(i, [0.1 * i as f64, 5.0, 5.0]));
        }
        let counter = PairCounter::new(1.0);
        let Ok(()) = ds.iterate(&counter, &spec(true, DataLayout::Aos)) else {
            panic!("direct traversal must run");
        };
        assert_eq!(counter.kernel_calls(), 6, "C(4,2) pairs");
    }

    #[test]
    fn owned_halo_pairs_included() {
        let mut ds = container();
        let _ = ds.add(Particle::new(0, [0.1, 5.0, 5.0]));
        let Ok(()) = ds.add_halo(Particle::new(1, [-0.3, 5.0, 5.0])) else {
            panic!("halo intake in the shell must succeed");
        };
        let counter = PairCounter::recording(1.0);
        let Ok(()) = ds.iterate(&counter, &spec(true, DataLayout::Aos)) else {
            panic!("direct traversal must run");
        };
        assert_eq!(counter.unordered_pairs(), vec![(0, 1)]);
    }

    #[test]
    fn rejects_foreign_traversals() {
        let mut ds = container();
        let mut s = spec(true, DataLayout::Aos);
        s.traversal = TraversalChoice::C08;
        assert!(ds.iterate(&LennardJones::new(1.0, 1.0, 1.0), &s).is_err());
    }

    #[test]
    fn strict_add_rejects_outside_position() {
        let mut ds = container();
        assert!(ds.add(Particle::new(0, [10.5, 5.0, 5.0])).is_err());
        assert!(ds.add_halo(Particle::new(1, [5.0, 5.0, 5.0])).is_err());
    }

    #[test]
    fn update_container_returns_leavers() {
        let mut ds = container();
        let _ = ds.add(Particle::new(0, [5.0, 5.0, 5.0]));
        let _ = ds.add(Particle::new(1, [9.9, 5.0, 5.0]));
        // move particle 1 out of the box between steps
        ds.for_each_particle_mut(IteratorBehavior::Owned, None, &mut |p| {
            if p.id == 1 {
                p.pos[0] = 10.3;
            }
        });
        let leavers = ds.update_container(false);
        assert_eq!(leavers.len(), 1);
        assert_eq!(leavers[0].id, 1);
        assert_eq!(ds.num_particles(), 1);
    }

    #[test]
    fn delete_halo_keeps_owned_count() {
        let mut ds = container();
        let _ = ds.add(Particle::new(0, [5.0; 3]));
        let _ = ds.add_halo(Particle::new(1, [-0.2, 5.0, 5.0]));
        assert_eq!(ds.num_particles(), 2);
        ds.delete_halo();
        assert_eq!(ds.num_particles(), 1);
        assert_eq!(ds.particles(IteratorBehavior::Owned).len(), 1);
    }

    #[test]
    fn soa_and_aos_forces_agree() {
        let lj = LennardJones::new(1.0, 1.0, 1.0);
        let mut aos = container();
        let mut soa = container();
        let positions = [[5.0, 5.0, 5.0], [5.9, 5.0, 5.0], [5.4, 5.6, 5.0]];
        for (i, &p) in positions.iter().enumerate() {
            let _ = aos.add(Particle::new(i as u64, p));
            let _ = soa.add(Particle::new(i as u64, p));
        }
        let Ok(()) = aos.iterate(&lj, &spec(true, DataLayout::Aos)) else {
            panic!("aos iterate");
        };
        let Ok(()) = soa.iterate(&lj, &spec(true, DataLayout::Soa)) else {
            panic!("soa iterate");
        };
        let fa = aos.particles(IteratorBehavior::Owned);
        let fs = soa.particles(IteratorBehavior::Owned);
        for (a, s) in fa.iter().zip(fs.iter()) {
            for d in 0..3 {
                assert!((a.force[d] - s.force[d]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn update_halo_replaces_matching_copy() {
        let mut ds = container();
        let _ = ds.add_halo(Particle::new(9, [-0.1, 5.0, 5.0]));
        let mut updated = Particle::new(9, [-0.15, 5.0, 5.0]);
        updated.vel = [1.0, 0.0, 0.0];
        assert!(ds.update_halo(&updated));
        let halos = ds.particles(IteratorBehavior::Halo);
        assert_eq!(halos[0].vel, [1.0, 0.0, 0.0]);
        // unknown id is reported as not found
        assert!(!ds.update_halo(&Particle::new(42, [-0.1, 5.0, 5.0])));
    }
}
