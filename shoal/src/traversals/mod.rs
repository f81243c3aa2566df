// SPDX-License-Identifier: AGPL-3.0-only

//! Traversal schedules.
//!
//! A traversal maps (cells, pair functor) to a race-free schedule of cell
//! self- and pair-interactions. The schedule must be consistent with the
//! Newton-3 flag: with Newton-3 each unordered pair is offered to the
//! functor exactly once and both particles are updated; without it, both
//! orderings are offered and only the first argument is updated.
//!
//! Race freedom is structural: each schedule partitions the cells into
//! per-worker write footprints (colors, slabs, stripes) that never overlap
//! within a parallel round. The single exception is the lock-based sliced
//! schedule, which shares each slab boundary plane under one mutex.
//!
//! | Schedule | Colors / sync | Newton-3 |
//! |----------|---------------|----------|
//! | c01 | none (base cell is sole write target) | off only |
//! | c08 | 8 (2·2·2 stride, 2×2×2 footprint) | on/off |
//! | c18 | 18 (3·3·2 stride, forward half-stencil) | on/off |
//! | sliced | lock per slab boundary plane | on/off |
//! | sliced-c02 | 2 slab colors, no locks | on/off |
//! | balanced-sliced | as sliced, load-balanced cuts | on/off |
//! | verlet-c18 / verlet-sliced | list-driven, forward-built lists | on/off |
//! | cluster-c01/c02/sliced | tower stripes | per variant |
//! | octree-c18 / octree-naive | leaf id tie-break / one-way | on / off |

/// Cell self-/pair-interaction kernels shared by the schedules.
pub mod cell_pair;
/// c01 / c08 / c18 colored schedules.
pub mod colored;
/// Shared disjoint-index cell access for parallel schedules.
pub mod grid;
/// Lock-based, 2-colored, and balanced sliced schedules.
pub mod sliced;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::containers::ContainerChoice;

/// The traversal axis of a tuning configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraversalChoice {
    /// Base cell with full 26-neighbor stencil; writes only the base cell.
    C01,
    /// Eight-colored 2×2×2 scheme; the default fast path for linked cells.
    C08,
    /// Eighteen-colored forward half-stencil scheme.
    C18,
    /// Lock-based sliced slabs along the longest axis.
    Sliced,
    /// Two-colored sliced slabs, no locks.
    SlicedC02,
    /// Sliced slabs with load-balanced cut positions.
    BalancedSliced,
    /// Neighbor-list-driven colored traversal.
    VerletC18,
    /// Neighbor-list-driven sliced traversal (slabs along z).
    VerletSliced,
    /// Cluster traversal, parallel over towers, one-way writes.
    ClusterC01,
    /// Cluster traversal with two tower-stripe colors.
    ClusterC02,
    /// Cluster traversal with sliced tower stripes and boundary locks.
    ClusterSliced,
    /// Octree leaves with `id <` tie-break under Newton-3.
    OctreeC18,
    /// Octree leaves, one-way writes, no parallelism.
    OctreeNaive,
    /// Direct-sum owned/halo two-cell traversal.
    Direct,
}

impl TraversalChoice {
    /// All traversal options, in tuning enumeration order.
    #[must_use]
    pub const fn all() -> [Self; 14] {
        [
            Self::C01,
            Self::C08,
            Self::C18,
            Self::Sliced,
            Self::SlicedC02,
            Self::BalancedSliced,
            Self::VerletC18,
            Self::VerletSliced,
            Self::ClusterC01,
            Self::ClusterC02,
            Self::ClusterSliced,
            Self::OctreeC18,
            Self::OctreeNaive,
            Self::Direct,
        ]
    }

    /// The containers this traversal can run on.
    #[must_use]
    pub const fn compatible_containers(self) -> &'static [ContainerChoice] {
        use ContainerChoice as C;
        match self {
            Self::C01 | Self::C08 | Self::C18 | Self::Sliced | Self::SlicedC02 | Self::BalancedSliced => {
                &[C::LinkedCells, C::LinkedCellsReferences]
            }
            Self::VerletC18 | Self::VerletSliced => &[C::VerletLists, C::VerletListsCells],
            Self::ClusterC01 | Self::ClusterC02 | Self::ClusterSliced => &[C::VerletClusterLists],
            Self::OctreeC18 | Self::OctreeNaive => &[C::Octree],
            Self::Direct => &[C::DirectSum],
        }
    }
}

impl fmt::Display for TraversalChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::C01 => "c01",
            Self::C08 => "c08",
            Self::C18 => "c18",
            Self::Sliced => "sliced",
            Self::SlicedC02 => "sliced-c02",
            Self::BalancedSliced => "balanced-sliced",
            Self::VerletC18 => "verlet-c18",
            Self::VerletSliced => "verlet-sliced",
            Self::ClusterC01 => "cluster-c01",
            Self::ClusterC02 => "cluster-c02",
            Self::ClusterSliced => "cluster-sliced",
            Self::OctreeC18 => "octree-c18",
            Self::OctreeNaive => "octree-naive",
            Self::Direct => "direct",
        };
        write!(f, "{name}")
    }
}

/// Physical particle attribute layout a traversal drives the kernel with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataLayout {
    /// Array of structures: one `Particle` per slot.
    #[default]
    Aos,
    /// Structure of arrays: one column per attribute.
    Soa,
}

impl fmt::Display for DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aos => write!(f, "aos"),
            Self::Soa => write!(f, "soa"),
        }
    }
}

/// Per-slab work estimator used by the balanced sliced schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LoadEstimator {
    /// Uniform slab thickness (no estimation).
    #[default]
    None,
    /// Sum of squared per-cell particle counts — proportional to the pair
    /// work of a dense cell.
    SquaredParticlesPerCell,
    /// Sum of neighbor-list lengths, where the container keeps lists.
    NeighborListLength,
}

impl fmt::Display for LoadEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::SquaredParticlesPerCell => write!(f, "squared-particles-per-cell"),
            Self::NeighborListLength => write!(f, "neighbor-list-length"),
        }
    }
}

/// Everything a container needs to run one traversal.
#[derive(Debug, Clone, Copy)]
pub struct TraversalSpec {
    /// Which schedule to run.
    pub traversal: TraversalChoice,
    /// Kernel entry layout.
    pub layout: DataLayout,
    /// Newton-3 symmetry.
    pub newton3: bool,
    /// Estimator for the balanced sliced schedule.
    pub load_estimator: LoadEstimator,
    /// Worker thread count the schedule partitions for.
    pub num_threads: usize,
}

/// Container geometry consulted by the applicability predicates.
#[derive(Debug, Clone, Copy)]
pub struct TraversalSelectorInfo {
    /// Cells (or towers) per dimension, halo included.
    pub dims: [usize; 3],
    /// Cutoff + skin.
    pub interaction_length: f64,
    /// Cell (or tower) side lengths.
    pub cell_length: [f64; 3],
    /// Particles per cluster, for cluster containers; zero otherwise.
    pub cluster_size: usize,
}

/// Checks whether `spec` can run on a container of the given kind and
/// geometry. Returns the rejection reason otherwise.
///
/// # Errors
///
/// A human-readable reason when the combination is rejected; the tuner
/// collects these for its all-rejected diagnostic.
pub fn check_applicable(
    container: ContainerChoice,
    spec: &TraversalSpec,
    info: &TraversalSelectorInfo,
) -> Result<(), String> {
    use TraversalChoice as T;

    if !spec.traversal.compatible_containers().contains(&container) {
        return Err(format!("{} does not run on {container}", spec.traversal));
    }

    match spec.traversal {
        T::C01 => {
            if spec.newton3 {
                return Err("c01 writes only the base cell; incompatible with newton3".into());
            }
        }
        T::Sliced | T::SlicedC02 | T::BalancedSliced => {
            let longest = (0..3).fold(0, |best, d| if info.dims[d] > info.dims[best] { d } else { best });
            if info.dims[longest] < 2 * spec.num_threads.max(1) {
                return Err(format!(
                    "sliced needs at least two layers per slab: {} layers on the longest axis for {} threads",
                    info.dims[longest], spec.num_threads
                ));
            }
        }
        T::VerletC18 | T::VerletSliced => {
            if spec.layout == DataLayout::Soa
                && (container == ContainerChoice::VerletListsCells || spec.newton3)
            {
                return Err(
                    "soa list iteration is only available for per-particle lists without newton3"
                        .into(),
                );
            }
            if spec.traversal == T::VerletSliced && info.dims[2] < 2 * spec.num_threads.max(1) {
                return Err(format!(
                    "verlet-sliced slices along z and needs two layers per slab: {} z layers for {} threads",
                    info.dims[2], spec.num_threads
                ));
            }
        }
        T::ClusterC01 => {
            if spec.newton3 {
                return Err("cluster-c01 writes only the owning cluster; incompatible with newton3".into());
            }
        }
        T::ClusterSliced => {
            // Stripe slabs along the tower x axis; each slab must be at
            // least one interaction length wide.
            let towers_per_il =
                (info.interaction_length / info.cell_length[0]).ceil().max(1.0) as usize;
            if info.dims[0] < spec.num_threads.max(1) * towers_per_il {
                return Err(format!(
                    "cluster-sliced needs {} towers per slab on x, have {}",
                    spec.num_threads.max(1) * towers_per_il,
                    info.dims[0]
                ));
            }
        }
        T::OctreeC18 => {
            if !spec.newton3 {
                return Err("octree-c18 visits each leaf pair once; requires newton3".into());
            }
        }
        T::OctreeNaive => {
            if spec.newton3 {
                return Err("octree-naive writes only the base leaf; incompatible with newton3".into());
            }
            if spec.layout == DataLayout::Soa {
                return Err("octree-naive supports aos only".into());
            }
        }
        T::C08 | T::C18 | T::ClusterC02 | T::Direct => {}
    }

    if container == ContainerChoice::LinkedCellsReferences && spec.layout == DataLayout::Soa {
        return Err("reference cells keep one flat particle store; aos only".into());
    }

    Ok(())
}
