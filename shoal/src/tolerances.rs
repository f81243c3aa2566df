// SPDX-License-Identifier: AGPL-3.0-only

//! Centralized constants with documented rationale.
//!
//! Every threshold, default, and structural constant used by the engine and
//! its validation binaries is defined here with its origin. No ad-hoc magic
//! numbers in module code.

// ═══════════════════════════════════════════════════════════════════
// Equivalence tolerances
// ═══════════════════════════════════════════════════════════════════

/// Cross-container force equivalence: relative tolerance.
///
/// All containers and traversals sum the same pairwise forces; differences
/// arise only from floating-point summation order. For systems of a few
/// thousand particles the reordering error stays below 1e-12 relative;
/// 1e-10 leaves two orders of margin.
pub const FORCE_EQUIVALENCE_REL: f64 = 1e-10;

/// Newton-3 on/off parity: absolute per-component tolerance.
///
/// With and without Newton-3 the same pair kernel values are accumulated,
/// only the association order differs, so agreement is near machine
/// precision per component.
pub const NEWTON3_PARITY_ABS: f64 = 1e-13;

/// Reflective-boundary force check: absolute tolerance.
///
/// The mirror-image force is a single kernel evaluation; the comparison is
/// exact up to rounding in the distance doubling.
pub const REFLECTION_FORCE_ABS: f64 = 1e-13;

/// Absolute floor for near-zero expected force components, where relative
/// error is meaningless (e.g. transverse components at a reflective wall).
pub const FORCE_ABSOLUTE_FLOOR: f64 = 1e-12;

// ═══════════════════════════════════════════════════════════════════
// Structural constants
// ═══════════════════════════════════════════════════════════════════

/// Number of particles in a full cluster.
///
/// Four doubles per attribute line up with one AVX2 lane set; the cluster
/// functor unrolls cluster×cluster loops over exactly this width.
pub const CLUSTER_SIZE: usize = 4;

/// Maximum number of particles in an octree leaf before it attempts to
/// split. Splitting below ~16 thrashes the arena for no traversal gain;
/// above ~32 the per-leaf pair loop dominates.
pub const TREE_SPLIT_THRESHOLD: usize = 16;

/// Per-particle neighbor-list reservation factor: in a cell with N
/// particles, reserve space for `N * VERLET_RESERVE_FACTOR` neighbors.
/// Empirically determined; avoids most reallocations during list builds.
pub const VERLET_RESERVE_FACTOR: usize = 5;

/// Minimum number of cluster-pair interactions assigned to one worker by
/// the static cluster-thread-partition. Below this, scheduling overhead
/// outweighs the parallelism.
pub const MIN_CLUSTER_PAIRS_PER_THREAD: usize = 1000;

/// ID assigned to generated dummy particles.
pub const DUMMY_PARTICLE_ID: u64 = u64::MAX;

// ═══════════════════════════════════════════════════════════════════
// Tuning defaults
// ═══════════════════════════════════════════════════════════════════

/// Iterations between tuning phases. 100 amortizes a full search over a
/// window long enough that the winner's advantage dominates the sampling
/// cost, while still reacting to drift within a few hundred steps.
pub const DEFAULT_TUNING_INTERVAL: usize = 100;

/// Timing samples per candidate configuration. Three samples let the
/// median reduction discard one outlier in either direction.
pub const DEFAULT_TUNING_SAMPLES: usize = 3;

/// Default evidence cap for the bayesian strategy: stop re-sampling a
/// configuration once this many measurements have been folded in.
pub const DEFAULT_TUNING_MAX_EVIDENCE: usize = 10;

/// Predictive strategy: a configuration whose predicted time lies within
/// this relative band above the predicted optimum is retested.
pub const PREDICTIVE_RELATIVE_BAND: f64 = 1.2;

/// Predictive strategy: force a retest of any configuration that has not
/// been measured for this many tuning phases, so mispredictions cannot
/// blacklist a configuration forever.
pub const PREDICTIVE_MAX_PHASES_WITHOUT_TEST: usize = 5;

/// Default rebuild frequency: upper bound on neighbor-list reuse in steps.
pub const DEFAULT_REBUILD_FREQUENCY: usize = 20;

/// Weight of the maximum density in the rank-similarity metric
/// `homogeneity + w * max_density` used to bucket ranks for search-space
/// splitting.
pub const SIMILARITY_MAX_DENSITY_WEIGHT: f64 = 0.1;

// ═══════════════════════════════════════════════════════════════════
// Boundary handling
// ═══════════════════════════════════════════════════════════════════

/// Reflective boundaries act within `2^(1/6) · σ` of the wall — the
/// Lennard-Jones minimum, so the mirror force is always repulsive and
/// vanishes continuously at the range boundary.
pub const SIXTH_ROOT_OF_TWO: f64 = 1.122_462_048_309_373;
