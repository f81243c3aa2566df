// SPDX-License-Identifier: AGPL-3.0-only

//! Classical verlet lists: one neighbor list per particle.
//!
//! The underlying machinery (linked-cells grid, skin lists, displacement
//! tracking) is shared with the (cell, index)-keyed variant; this
//! container additionally maintains the per-particle view — a flat slot
//! order with one global list per particle — which is what the
//! list-driven SoA entry point consumes, and what [`Self::neighbor_ids`]
//! exposes to callers.

use hashbrown::HashMap;

use crate::containers::verlet_lists_cells::VerletListsCells;
use crate::containers::{ContainerChoice, ParticleContainer};
use crate::error::{Result, ShoalError};
use crate::functor::PairFunctor;
use crate::geometry::Region;
use crate::particle::{IteratorBehavior, Particle};
use crate::soa::SoaBuffer;
use crate::traversals::{DataLayout, TraversalSelectorInfo, TraversalSpec};

/// Per-particle verlet lists over linked cells.
#[derive(Debug)]
pub struct VerletLists {
    inner: VerletListsCells,
    /// Flat slot order: `(cell, index)` of every actual particle.
    slots: Vec<(usize, usize)>,
    /// Global neighbor lists, indexed by flat slot.
    global_lists: Vec<Vec<usize>>,
    /// Slot lookup by particle id.
    slot_of_id: HashMap<u64, usize>,
}

impl VerletLists {
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
            inner: VerletListsCells::new(box_min, box_max, cutoff, skin, cell_size_factor, strict)?,
            slots: Vec::new(),
            global_lists: Vec::new(),
            slot_of_id: HashMap::new(),
        })
    }

    /// The neighbor ids of the particle with the given id, if known.
    #[must_use]
    pub fn neighbor_ids(&self, id: u64) -> Option<Vec<u64>> {
        let &slot = self.slot_of_id.get(&id)?;
        let ids = self.global_lists[slot]
            .iter()
            .map(|&n| {
                let (cell, index) = self.slots[n];
                self.inner.lc.cells[cell].particles()[index].id
            })
            .collect();
        Some(ids)
    }

    /// Rebuilds the flat per-particle view from the cell-keyed lists.
    fn rebuild_flat_view(&mut self) {
        self.slots.clear();
        self.slot_of_id.clear();
        let mut slot_of_cell_index: HashMap<(usize, usize), usize> = HashMap::new();
        for (ci, cell) in self.inner.lc.cells.iter().enumerate() {
            for (i, p) in cell.particles().iter().enumerate() {
                if p.is_dummy() {
                    continue;
                }
                let slot = self.slots.len();
                self.slots.push((ci, i));
                self.slot_of_id.insert(p.id, slot);
                slot_of_cell_index.insert((ci, i), slot);
            }
        }
        self.global_lists = vec![Vec::new(); self.slots.len()];
        for &(ci, i) in &self.slots {
            let Some(&slot) = slot_of_cell_index.get(&(ci, i)) else {
                continue;
            };
            for &(pc, pj) in &self.inner.lists[ci][i] {
                if let Some(&partner) = slot_of_cell_index.get(&(pc, pj)) {
                    self.global_lists[slot].push(partner);
                }
            }
        }
    }

    /// Flat-buffer list iteration: the SoA entry point of the list
    /// contract. One-way writes, so Newton-3 must be off.
    fn iterate_soa_flat<F: PairFunctor>(&mut self, functor: &F) -> Result<()> {
        if self.global_lists.is_empty() {
            return Ok(());
        }
        let mut all: Vec<Particle> = self
            .slots
            .iter()
            .map(|&(ci, i)| self.inner.lc.cells[ci].particles()[i])
            .collect();
        let mut buf = SoaBuffer::default();
        functor.soa_load(&all, &mut buf);
        let n = buf.len();
        functor.soa_verlet(&mut buf, 0, n, &self.global_lists, false);
        functor.soa_extract(&buf, &mut all);
        for (&(ci, i), p) in self.slots.iter().zip(all.iter()) {
            self.inner.lc.cells[ci].particles_mut()[i].force = p.force;
        }
        Ok(())
    }
}

impl ParticleContainer for VerletLists {
    fn choice(&self) -> ContainerChoice {
        ContainerChoice::VerletLists
    }

    fn box_min(&self) -> [f64; 3] {
        self.inner.box_min()
    }

    fn box_max(&self) -> [f64; 3] {
        self.inner.box_max()
    }

    fn cutoff(&self) -> f64 {
        self.inner.cutoff()
    }

    fn skin(&self) -> f64 {
        self.inner.skin()
    }

    fn selector_info(&self) -> TraversalSelectorInfo {
        self.inner.selector_info()
    }

    fn num_particles(&self) -> usize {
        self.inner.num_particles()
    }

    fn add(&mut self, p: Particle) -> Result<()> {
        self.inner.add(p)
    }

    fn add_halo(&mut self, p: Particle) -> Result<()> {
        self.inner.add_halo(p)
    }

    fn update_halo(&mut self, p: &Particle) -> bool {
        self.inner.update_halo(p)
    }

    fn delete_halo(&mut self) {
        self.inner.delete_halo();
    }

    fn update_container(&mut self, keep_lists: bool) -> Vec<Particle> {
        self.inner.update_container(keep_lists)
    }

    fn delete_all(&mut self) {
        self.slots.clear();
        self.global_lists.clear();
        self.slot_of_id.clear();
        self.inner.delete_all();
    }

    fn rebuild_neighbor_lists(&mut self, newton3: bool) {
        self.inner.rebuild_neighbor_lists(newton3);
        self.rebuild_flat_view();
    }

    fn lists_valid(&self, skin_half: f64) -> bool {
        self.inner.lists_valid(skin_half)
    }

    fn iterate<F: PairFunctor>(&mut self, functor: &F, spec: &TraversalSpec) -> Result<()> {
        match spec.layout {
            DataLayout::Aos => {
                // Rebuild through the override so the per-particle view
                // stays in sync with the cell-keyed lists.
                if self.inner.lists.is_empty() || self.inner.built_newton3 != spec.newton3 {
                    self.rebuild_neighbor_lists(spec.newton3);
                }
                self.inner.run_list_traversal(functor, spec)
            }
            DataLayout::Soa => {
                if spec.newton3 {
                    return Err(ShoalError::InvalidArgument(
                        "flat list iteration writes one particle per slot; newton3 must be off"
                            .into(),
                    ));
                }
                // The flat path needs both-direction lists.
                if self.inner.lists.is_empty() || self.inner.built_newton3 {
                    self.rebuild_neighbor_lists(false);
                }
                self.iterate_soa_flat(functor)
            }
        }
    }

    fn for_each_particle(
        &self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&Particle),
    ) {
        self.inner.for_each_particle(behavior, region, f);
    }

    fn for_each_particle_mut(
        &mut self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&mut Particle),
    ) {
        self.inner.for_each_particle_mut(behavior, region, f);
    }
}
