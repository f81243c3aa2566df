// SPDX-License-Identifier: AGPL-3.0-only

//! Pair-counting diagnostic functor.
//!
//! Counts distance calculations and kernel calls (pairs within the cutoff)
//! and optionally records the visited id pairs. The equivalence tests use
//! the recorded multiset to prove that different containers and traversals
//! enumerate exactly the same pairs. Timings from this functor must not
//! feed the tuner, so `is_relevant_for_tuning` is false.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::functor::PairFunctor;
use crate::geometry::dist_sq;
use crate::particle::Particle;

/// Counts candidate and in-cutoff pairs; optionally records id pairs.
#[derive(Debug, Default)]
pub struct PairCounter {
    cutoff_sq: f64,
    distance_calculations: AtomicU64,
    kernel_calls: AtomicU64,
    record: Option<Mutex<Vec<(u64, u64)>>>,
}

impl PairCounter {
    /// Counter without pair recording.
    #[must_use]
    pub fn new(cutoff: f64) -> Self {
        Self {
            cutoff_sq: cutoff * cutoff,
            ..Self::default()
        }
    }

    /// Counter that also records every in-cutoff id pair (ordered as
    /// visited).
    #[must_use]
    pub fn recording(cutoff: f64) -> Self {
        Self {
            cutoff_sq: cutoff * cutoff,
            record: Some(Mutex::new(Vec::new())),
            ..Self::default()
        }
    }

    /// Number of distance evaluations performed.
    #[must_use]
    pub fn distance_calculations(&self) -> u64 {
        self.distance_calculations.load(Ordering::Relaxed)
    }

    /// Number of pairs whose separation was within the cutoff.
    #[must_use]
    pub fn kernel_calls(&self) -> u64 {
        self.kernel_calls.load(Ordering::Relaxed)
    }

    /// Fraction of candidate pairs that were within the cutoff.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let d = self.distance_calculations();
        if d == 0 {
            return 0.0;
        }
        self.kernel_calls() as f64 / d as f64
    }

    /// The recorded in-cutoff pairs as unordered id pairs `(min, max)`,
    /// sorted. Empty when recording was not enabled.
    #[must_use]
    pub fn unordered_pairs(&self) -> Vec<(u64, u64)> {
        let Some(record) = &self.record else {
            return Vec::new();
        };
        let guard = record.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pairs: Vec<(u64, u64)> = guard
            .iter()
            .map(|&(a, b)| (a.min(b), a.max(b)))
            .collect();
        pairs.sort_unstable();
        pairs
    }
}

impl PairFunctor for PairCounter {
    fn aos_pair(&self, pi: &mut Particle, pj: &mut Particle, _newton3: bool) {
        self.distance_calculations.fetch_add(1, Ordering::Relaxed);
        if dist_sq(pi.pos, pj.pos) <= self.cutoff_sq {
            self.kernel_calls.fetch_add(1, Ordering::Relaxed);
            if let Some(record) = &self.record {
                record
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((pi.id, pj.id));
            }
        }
    }

    fn is_relevant_for_tuning(&self) -> bool {
        false
    }
}
