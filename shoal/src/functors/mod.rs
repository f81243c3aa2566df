// SPDX-License-Identifier: AGPL-3.0-only

//! Reference pair kernels.
//!
//! The engine treats the force kernel as an opaque plug-in; these two are
//! shipped for validation and diagnostics, not as a physics library.

/// Pair-counting diagnostic functor (distance calculations, kernel calls,
/// visited id pairs). Not relevant for tuning.
pub mod counter;
/// Truncated 12-6 Lennard-Jones kernel used by the validation suite.
pub mod lj;

pub use counter::PairCounter;
pub use lj::LennardJones;
