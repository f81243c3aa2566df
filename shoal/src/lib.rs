// SPDX-License-Identifier: AGPL-3.0-only

// Clippy pedantic/nursery + numeric-kernel allows are in [workspace.lints.clippy]
// in Cargo.toml. Library code must propagate errors, not panic:
#![deny(clippy::expect_used, clippy::unwrap_used)]
#![warn(missing_docs)]

//! shoal — auto-tuning short-range pairwise interaction engine
//!
//! Manages a population of point particles in a 3-D box with a global
//! interaction cutoff and evaluates a user-supplied symmetric pair kernel
//! between every particle pair within the cutoff. The engine chooses among
//! several spatial containers and several traversal schedules per container,
//! measures their runtime, and commits to whichever combination is
//! empirically fastest for the current particle distribution.
//!
//! # Architecture
//!
//! ```text
//! AutoTuner ──picks──▶ (container, traversal, layout, newton3, cell size)
//!     ▲                          │
//!     │ measured timing          ▼
//! Container (storage + neighbor lists) ──▶ Traversal (race-free schedule)
//!     │                                         │
//!     ▼ cells (AoS ⇄ SoA)                       ▼ per-pair call
//!                                         PairFunctor (user kernel)
//! ```
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `particle` | Particle data, ownership states, iterator behavior masks |
//! | `cell` | AoS cell storage with on-demand SoA mirror |
//! | `containers` | direct-sum, linked-cells (×2), verlet (×2), clusters, octree |
//! | `traversals` | c01/c08/c18 colored, sliced (×3), verlet, cluster, octree |
//! | `tuning` | search space, sampling, full/predictive/bayesian/rule strategies |
//! | `domain` | halo exchange, migration, periodic/reflective boundaries |
//! | `engine` | facade tying container lifecycle, rebuild cadence, and tuner |
//!
//! Containers own their cells; cells are the unit of ownership across
//! threads. Rebuilds and configuration switches happen strictly between
//! traversals, never inside one.

/// AoS particle cells with an on-demand SoA mirror, plus reference cells.
pub mod cell;
/// Engine-level options: box, cutoff, skin, allowed tuning option sets.
pub mod config;
/// The spatial container family and the shared container contract.
pub mod containers;
/// Domain decomposition seam: halo exchange, migration, boundary types.
pub mod domain;
/// The `Shoal` facade: container lifecycle, rebuild cadence, auto-tuning.
pub mod engine;
/// Typed errors for configuration, applicability, and invariant violations.
pub mod error;
/// Reference pair kernels: Lennard-Jones and a pair-counting diagnostic.
pub mod functors;
/// The pair-functor contract every user kernel implements.
pub mod functor;
/// Small fixed-size vector math and axis-aligned regions.
pub mod geometry;
/// Particle data model: attributes, ownership, iterator behavior masks.
pub mod particle;
/// Structure-of-arrays buffers and the AoS ⇄ SoA layout converter.
pub mod soa;
/// Centralized, justified constants (tolerances, thresholds, defaults).
pub mod tolerances;
/// Race-free traversal schedules over container cells.
pub mod traversals;
/// Auto-tuner: configuration space, sampling, selection strategies.
pub mod tuning;
/// Force-equivalence reporting shared by the validation binaries.
pub mod validation;

pub use config::EngineConfig;
pub use engine::Shoal;
pub use error::ShoalError;
pub use functor::PairFunctor;
pub use particle::{IteratorBehavior, OwnershipState, Particle};
