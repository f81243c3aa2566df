// SPDX-License-Identifier: AGPL-3.0-only

//! The spatial container family.
//!
//! Every container satisfies the same contract: particle intake (owned and
//! halo), the step-boundary sweep `update_container` returning box
//! leavers, pairwise iteration under a traversal spec, optional neighbor
//! lists with skin-based validity, and behavior-/region-masked particle
//! iteration.
//!
//! | Container | Index structure | Lists |
//! |-----------|-----------------|-------|
//! | direct-sum | one owned + one halo cell | none |
//! | linked-cells | halo-ringed 3-D cell grid | none |
//! | linked-cells-references | cell grid over one flat particle store | none |
//! | verlet-lists | cell grid + per-particle skin lists | yes |
//! | verlet-lists-cells | cell grid + (cell, index)-keyed skin lists | yes |
//! | verlet-cluster-lists | xy tower grid of z-sorted clusters | yes |
//! | octree | dual adaptive octrees (owned / halo) | leaf neighbors |

/// Halo-ringed 3-D cell grid geometry.
pub mod cell_block;
/// Two-cell baseline container.
pub mod direct_sum;
/// Value-cell and reference-cell linked-cells containers.
pub mod linked_cells;
/// Dual arena octrees with cached leaf neighbors.
pub mod octree;
/// Tower grid of fixed-size z-sorted clusters.
pub mod verlet_clusters;
/// Classical per-particle skin lists.
pub mod verlet_lists;
/// (cell, index)-keyed skin lists driving colored traversals.
pub mod verlet_lists_cells;

use std::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::functor::PairFunctor;
use crate::geometry::{dist_sq, Region};
use crate::particle::{IteratorBehavior, Particle};
use crate::traversals::{TraversalSelectorInfo, TraversalSpec};

pub use cell_block::CellBlock;
pub use direct_sum::DirectSum;
pub use linked_cells::{LinkedCells, LinkedCellsReferences};
pub use octree::OctreeContainer;
pub use verlet_clusters::VerletClusterLists;
pub use verlet_lists::VerletLists;
pub use verlet_lists_cells::VerletListsCells;

/// The container axis of a tuning configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerChoice {
    /// One owned cell, one halo cell; the correctness baseline.
    DirectSum,
    /// Halo-ringed cell grid with value cells.
    LinkedCells,
    /// Cell grid of references into one flat particle store.
    LinkedCellsReferences,
    /// Classical per-particle verlet lists over linked cells.
    VerletLists,
    /// Verlet lists keyed by (cell, index within cell).
    VerletListsCells,
    /// Two-dimensional tower grid of fixed-size clusters.
    VerletClusterLists,
    /// Adaptive octree pair (owned and halo trees).
    Octree,
}

impl ContainerChoice {
    /// All container options, in tuning enumeration order.
    #[must_use]
    pub const fn all() -> [Self; 7] {
        [
            Self::DirectSum,
            Self::LinkedCells,
            Self::LinkedCellsReferences,
            Self::VerletLists,
            Self::VerletListsCells,
            Self::VerletClusterLists,
            Self::Octree,
        ]
    }
}

impl fmt::Display for ContainerChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DirectSum => "direct-sum",
            Self::LinkedCells => "linked-cells",
            Self::LinkedCellsReferences => "linked-cells-references",
            Self::VerletLists => "verlet-lists",
            Self::VerletListsCells => "verlet-lists-cells",
            Self::VerletClusterLists => "verlet-cluster-lists",
            Self::Octree => "octree",
        };
        write!(f, "{name}")
    }
}

/// The contract every spatial container satisfies.
pub trait ParticleContainer {
    /// Which container this is.
    fn choice(&self) -> ContainerChoice;

    /// Lower corner of the owned box.
    fn box_min(&self) -> [f64; 3];
    /// Upper corner of the owned box.
    fn box_max(&self) -> [f64; 3];
    /// Interaction cutoff radius.
    fn cutoff(&self) -> f64;
    /// Neighbor-list skin radius.
    fn skin(&self) -> f64;
    /// Cutoff + skin: the neighbor construction radius.
    fn interaction_length(&self) -> f64 {
        self.cutoff() + self.skin()
    }

    /// Geometry info consulted by traversal applicability predicates.
    fn selector_info(&self) -> TraversalSelectorInfo;

    /// Number of actual (owned + halo) particles.
    fn num_particles(&self) -> usize;

    /// Adds an owned particle.
    ///
    /// # Errors
    ///
    /// [`crate::ShoalError::InvalidArgument`] in strict mode when the
    /// position lies outside the owned box.
    fn add(&mut self, p: Particle) -> Result<()>;

    /// Adds a halo particle.
    ///
    /// # Errors
    ///
    /// [`crate::ShoalError::InvalidArgument`] in strict mode when the
    /// position lies inside the owned box or beyond the halo shell.
    fn add_halo(&mut self, p: Particle) -> Result<()>;

    /// Overwrites the stored halo particle with the same id near the given
    /// particle's position. Returns whether it was found.
    fn update_halo(&mut self, p: &Particle) -> bool;

    /// Deletes all halo particles; owned particles are untouched.
    fn delete_halo(&mut self);

    /// Step-boundary sweep: re-bins moved particles and removes the ones
    /// that left the owned box, returning them. Halo particles are
    /// discarded. With `keep_lists` the container avoids invalidating its
    /// neighbor lists if it can.
    fn update_container(&mut self, keep_lists: bool) -> Vec<Particle>;

    /// Removes every particle.
    fn delete_all(&mut self);

    /// Rebuilds neighbor lists for the given Newton-3 mode, where the
    /// container keeps lists. The default is a no-op.
    fn rebuild_neighbor_lists(&mut self, newton3: bool) {
        let _ = newton3;
    }

    /// Whether the neighbor lists are still valid under the half-skin
    /// displacement bound. Containers without lists are always valid.
    fn lists_valid(&self, skin_half: f64) -> bool {
        let _ = skin_half;
        true
    }

    /// Runs one traversal of the pair functor over all particle pairs
    /// within the cutoff.
    ///
    /// # Errors
    ///
    /// [`crate::ShoalError::InvalidArgument`] when the spec's traversal is
    /// not applicable to this container (callers are expected to check
    /// applicability first via the tuner).
    fn iterate<F: PairFunctor>(&mut self, functor: &F, spec: &TraversalSpec) -> Result<()>;

    /// Visits every particle passing the behavior mask and the optional
    /// region filter.
    fn for_each_particle(
        &self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&Particle),
    );

    /// Mutable variant of [`Self::for_each_particle`]; the integrator seam.
    fn for_each_particle_mut(
        &mut self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&mut Particle),
    );

    /// Collects matching particles into a vector (copies).
    fn particles(&self, behavior: IteratorBehavior) -> Vec<Particle> {
        let mut out = Vec::new();
        self.for_each_particle(behavior, None, &mut |p| out.push(*p));
        out
    }
}

/// Skin-based neighbor-list validity tracking.
///
/// Caches each particle's position at rebuild time; the lists stay valid
/// while no particle has moved more than half the skin from its cached
/// position, no particle was added or removed, and no explicit
/// invalidation fired.
#[derive(Debug, Default, Clone)]
pub struct RebuildTracker {
    reference: HashMap<u64, [f64; 3]>,
    dirty: bool,
}

impl RebuildTracker {
    /// A tracker that starts invalid (nothing recorded yet).
    #[must_use]
    pub fn new() -> Self {
        Self {
            reference: HashMap::new(),
            dirty: true,
        }
    }

    /// Records the rebuild-time positions.
    pub fn record<I: IntoIterator<Item = (u64, [f64; 3])>>(&mut self, positions: I) {
        self.reference.clear();
        self.reference.extend(positions);
        self.dirty = false;
    }

    /// Flags the lists invalid (particle added/removed/deleted, load
    /// rebalanced, …).
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether the tracker has been explicitly invalidated.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Validity under the half-skin displacement bound: every current
    /// particle must be known and within `skin_half` of its recorded
    /// position. New particles invalidate; particles that vanished since
    /// the rebuild do not — a removal only shrinks the pair set, and the
    /// dummy-marking removal paths keep the list indices intact.
    pub fn is_valid<I: IntoIterator<Item = (u64, [f64; 3])>>(
        &self,
        current: I,
        skin_half: f64,
    ) -> bool {
        if self.dirty {
            return false;
        }
        let bound_sq = skin_half * skin_half;
        for (id, pos) in current {
            match self.reference.get(&id) {
                Some(&r0) => {
                    if dist_sq(pos, r0) > bound_sq {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

/// Shared helper: route an intake particle per O1/O2 under the configured
/// strictness. Returns an error in strict mode, logs and accepts in
/// lenient mode.
pub(crate) fn check_owned_intake(
    p: &Particle,
    box_min: [f64; 3],
    box_max: [f64; 3],
    strict: bool,
) -> Result<()> {
    if crate::geometry::in_box(p.pos, box_min, box_max) {
        return Ok(());
    }
    if strict {
        return Err(crate::ShoalError::InvalidArgument(format!(
            "owned particle {} at {:?} lies outside the box {box_min:?}..{box_max:?}",
            p.id, p.pos
        )));
    }
    log::warn!(
        "accepting owned particle {} at {:?} outside the box (lenient mode)",
        p.id,
        p.pos
    );
    Ok(())
}

/// Shared helper: validate a halo intake position against the halo shell.
pub(crate) fn check_halo_intake(
    p: &Particle,
    box_min: [f64; 3],
    box_max: [f64; 3],
    interaction_length: f64,
    strict: bool,
) -> Result<()> {
    let shell_min = crate::geometry::sub_scalar(box_min, interaction_length);
    let shell_max = crate::geometry::add_scalar(box_max, interaction_length);
    let in_shell = crate::geometry::in_box(p.pos, shell_min, shell_max)
        && !crate::geometry::in_box(p.pos, box_min, box_max);
    if in_shell {
        return Ok(());
    }
    if strict {
        return Err(crate::ShoalError::InvalidArgument(format!(
            "halo particle {} at {:?} lies outside the halo shell",
            p.id, p.pos
        )));
    }
    log::warn!(
        "accepting halo particle {} at {:?} outside the halo shell (lenient mode)",
        p.id,
        p.pos
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_starts_dirty() {
        let tracker = RebuildTracker::new();
        assert!(!tracker.is_valid(std::iter::empty(), 0.15));
    }

    #[test]
    fn tracker_tolerates_half_skin_motion() {
        let mut tracker = RebuildTracker::new();
        tracker.record([(0, [1.1, 1.1, 1.1]), (1, [3.5, 1.1, 1.1])]);
        // displacement 0.12 ≤ 0.15: still valid
        assert!(tracker.is_valid([(0, [1.22, 1.1, 1.1]), (1, [3.5, 1.1, 1.1])], 0.15));
        // displacement 0.5 > 0.15: invalid
        assert!(!tracker.is_valid([(0, [1.6, 1.1, 1.1]), (1, [3.5, 1.1, 1.1])], 0.15));
    }

    #[test]
    fn tracker_detects_membership_changes() {
        let mut tracker = RebuildTracker::new();
        tracker.record([(0, [0.0; 3]), (1, [1.0; 3])]);
        assert!(
            tracker.is_valid([(0, [0.0; 3])], 0.5),
            "a removal only shrinks the pair set"
        );
        assert!(
            !tracker.is_valid([(0, [0.0; 3]), (1, [1.0; 3]), (2, [2.0; 3])], 0.5),
            "addition invalidates"
        );
        tracker.mark_dirty();
        assert!(!tracker.is_valid([(0, [0.0; 3]), (1, [1.0; 3])], 0.5));
    }

    #[test]
    fn strict_intake_rejects_misplaced_particles() {
        let inside = Particle::new(0, [5.0; 3]);
        let outside = Particle::new(1, [11.0, 5.0, 5.0]);
        assert!(check_owned_intake(&inside, [0.0; 3], [10.0; 3], true).is_ok());
        assert!(check_owned_intake(&outside, [0.0; 3], [10.0; 3], true).is_err());
        assert!(
            check_owned_intake(&outside, [0.0; 3], [10.0; 3], false).is_ok(),
            "lenient mode accepts and logs"
        );

        let shell = Particle::new(2, [-0.5, 5.0, 5.0]);
        assert!(check_halo_intake(&shell, [0.0; 3], [10.0; 3], 1.0, true).is_ok());
        assert!(check_halo_intake(&inside, [0.0; 3], [10.0; 3], 1.0, true).is_err());
        let far = Particle::new(3, [-5.0, 5.0, 5.0]);
        assert!(check_halo_intake(&far, [0.0; 3], [10.0; 3], 1.0, true).is_err());
    }

    #[test]
    fn display_names() {
        assert_eq!(ContainerChoice::DirectSum.to_string(), "direct-sum");
        assert_eq!(
            ContainerChoice::VerletClusterLists.to_string(),
            "verlet-cluster-lists"
        );
        assert_eq!(ContainerChoice::all().len(), 7);
    }
}
