// SPDX-License-Identifier: AGPL-3.0-only

//! Particle data model.
//!
//! Every particle carries position, velocity, accumulated force, a 64-bit
//! identifier, a 64-bit type tag, and an ownership state. The ownership
//! state is the sole discriminator used by iterators and pair schedules:
//!
//! - *owned* — position lies inside the local box `[boxMin, boxMax)`
//! - *halo* — read-only copy from a neighbor subdomain, inside the halo
//!   shell `[boxMin − L, boxMax + L) ∖ [boxMin, boxMax)` with
//!   L = cutoff + skin
//! - *dummy* — placeholder that never participates in a pair call

use std::fmt;

/// State of ownership of a particle with respect to the local subdomain.
///
/// The discriminants are fixed so the state can be stored in a 64-bit SoA
/// column next to the particle's other attributes: dummy must be zero and
/// the lowest value, so a zeroed column reads as "no particle".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i64)]
pub enum OwnershipState {
    /// Dummy or deleted state; not an actual particle.
    #[default]
    Dummy = 0,
    /// An actual particle owned by the local subdomain.
    Owned = 1,
    /// An actual particle owned by a neighbor subdomain.
    Halo = 2,
}

impl fmt::Display for OwnershipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy => write!(f, "dummy"),
            Self::Owned => write!(f, "owned"),
            Self::Halo => write!(f, "halo"),
        }
    }
}

impl OwnershipState {
    /// Reconstructs a state from its SoA column representation.
    #[must_use]
    pub const fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Dummy),
            1 => Some(Self::Owned),
            2 => Some(Self::Halo),
            _ => None,
        }
    }
}

/// Ownership mask consulted by particle iterators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IteratorBehavior {
    /// Only owned particles.
    Owned,
    /// Only halo particles.
    Halo,
    /// Owned and halo particles (the default for force evaluation).
    #[default]
    OwnedOrHalo,
    /// Everything, including dummies. Diagnostic use only.
    OwnedOrHaloOrDummy,
}

impl IteratorBehavior {
    /// Whether a particle with the given ownership passes this mask.
    #[inline]
    #[must_use]
    pub const fn matches(self, state: OwnershipState) -> bool {
        match self {
            Self::Owned => matches!(state, OwnershipState::Owned),
            Self::Halo => matches!(state, OwnershipState::Halo),
            Self::OwnedOrHalo => !matches!(state, OwnershipState::Dummy),
            Self::OwnedOrHaloOrDummy => true,
        }
    }
}

/// A point particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    /// Unique identifier. Dummies use `u64::MAX`.
    pub id: u64,
    /// Type tag; interpreted only by the pair kernel.
    pub type_id: u64,
    /// Position.
    pub pos: [f64; 3],
    /// Velocity.
    pub vel: [f64; 3],
    /// Accumulated force.
    pub force: [f64; 3],
    /// Ownership with respect to the local subdomain.
    pub ownership: OwnershipState,
}

impl Particle {
    /// Creates an owned particle at rest with zero force.
    #[must_use]
    pub const fn new(id: u64, pos: [f64; 3]) -> Self {
        Self {
            id,
            type_id: 0,
            pos,
            vel: [0.0; 3],
            force: [0.0; 3],
            ownership: OwnershipState::Owned,
        }
    }

    /// Creates a halo copy of this particle at the given (possibly
    /// wrap-corrected) position.
    #[must_use]
    pub const fn as_halo(mut self, pos: [f64; 3]) -> Self {
        self.pos = pos;
        self.ownership = OwnershipState::Halo;
        self
    }

    /// Whether this particle is owned by the local subdomain.
    #[inline]
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        matches!(self.ownership, OwnershipState::Owned)
    }

    /// Whether this particle is a halo copy.
    #[inline]
    #[must_use]
    pub const fn is_halo(&self) -> bool {
        matches!(self.ownership, OwnershipState::Halo)
    }

    /// Whether this particle is a dummy.
    #[inline]
    #[must_use]
    pub const fn is_dummy(&self) -> bool {
        matches!(self.ownership, OwnershipState::Dummy)
    }

    /// Adds `df` to the accumulated force.
    #[inline]
    pub fn add_force(&mut self, df: [f64; 3]) {
        self.force[0] += df[0];
        self.force[1] += df[1];
        self.force[2] += df[2];
    }

    /// Subtracts `df` from the accumulated force.
    #[inline]
    pub fn sub_force(&mut self, df: [f64; 3]) {
        self.force[0] -= df[0];
        self.force[1] -= df[1];
        self.force[2] -= df[2];
    }
}
