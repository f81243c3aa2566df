// SPDX-License-Identifier: AGPL-3.0-only

//! The pair-functor contract.
//!
//! A pair functor is the user-supplied kernel evaluated for every particle
//! pair within the cutoff. The engine calls it through one of several entry
//! points depending on the active data layout:
//!
//! - [`PairFunctor::aos_pair`] — one pair of AoS particles. Updates the
//!   first particle; updates the second as well iff `newton3` is true.
//! - `soa_*` — SoA overloads over attribute columns. Default
//!   implementations fall back to the AoS kernel per slot, so a functor
//!   only has to override them when it wants vectorized column loops.
//! - [`PairFunctor::soa_load`] / [`PairFunctor::soa_extract`] — the layout
//!   conversion hooks. Load is called once per cell before an SoA
//!   traversal, extract once after; the SoA buffer is never shared across
//!   cells.
//!
//! Capability queries (`allows_newton3`, `allows_non_newton3`,
//! `is_relevant_for_tuning`) are consulted by the auto-tuner when it
//! enumerates applicable configurations.

use std::ops::Range;

use crate::particle::{OwnershipState, Particle};
use crate::soa::SoaBuffer;

/// Reconstructs an AoS particle from one SoA slot (fallback path).
#[inline]
#[must_use]
fn slot_particle(soa: &SoaBuffer, i: usize) -> Particle {
    Particle {
        id: soa.id[i],
        type_id: soa.type_id[i],
        pos: [soa.px[i], soa.py[i], soa.pz[i]],
        vel: [0.0; 3],
        force: [soa.fx[i], soa.fy[i], soa.fz[i]],
        ownership: OwnershipState::from_i64(soa.ownership[i]).unwrap_or(OwnershipState::Dummy),
    }
}

#[inline]
fn store_force(soa: &mut SoaBuffer, i: usize, f: [f64; 3]) {
    soa.fx[i] = f[0];
    soa.fy[i] = f[1];
    soa.fz[i] = f[2];
}

/// The contract every pair kernel implements.
///
/// Functors are shared across worker threads, so all entry points take
/// `&self`; kernels that accumulate global state (counters, recorders) use
/// interior mutability.
pub trait PairFunctor: Send + Sync {
    /// Evaluates the kernel for one particle pair.
    ///
    /// Must update `pi`; must update `pj` as well iff `newton3` is true.
    /// Dummy particles never reach this call.
    fn aos_pair(&self, pi: &mut Particle, pj: &mut Particle, newton3: bool);

    /// Whether this kernel supports Newton-3 schedules.
    fn allows_newton3(&self) -> bool {
        true
    }

    /// Whether this kernel supports non-Newton-3 schedules.
    fn allows_non_newton3(&self) -> bool {
        true
    }

    /// Whether timings measured with this functor should feed the
    /// auto-tuner. Diagnostic functors (pair counters and similar) return
    /// false so they cannot skew the tuning record.
    fn is_relevant_for_tuning(&self) -> bool {
        true
    }

    /// Materialises the SoA mirror of a cell. The default copies all
    /// standard attributes.
    fn soa_load(&self, particles: &[Particle], soa: &mut SoaBuffer) {
        soa.clear();
        for p in particles {
            soa.push(p);
        }
    }

    /// Writes SoA results back into the cell. The default copies the
    /// accumulated forces; positions and velocities stay AoS-authoritative.
    fn soa_extract(&self, soa: &SoaBuffer, particles: &mut [Particle]) {
        for (i, p) in particles.iter_mut().enumerate() {
            soa.extract_force_into(i, p);
        }
    }

    /// All pairs within one slot range of a buffer.
    fn soa_self(&self, soa: &mut SoaBuffer, range: Range<usize>, newton3: bool) {
        if newton3 {
            for i in range.clone() {
                if !soa.is_actual(i) {
                    continue;
                }
                for j in (i + 1)..range.end {
                    if !soa.is_actual(j) {
                        continue;
                    }
                    let mut pi = slot_particle(soa, i);
                    let mut pj = slot_particle(soa, j);
                    self.aos_pair(&mut pi, &mut pj, true);
                    store_force(soa, i, pi.force);
                    store_force(soa, j, pj.force);
                }
            }
        } else {
            for i in range.clone() {
                if !soa.is_actual(i) {
                    continue;
                }
                for j in range.clone() {
                    if i == j || !soa.is_actual(j) {
                        continue;
                    }
                    let mut pi = slot_particle(soa, i);
                    let mut pj = slot_particle(soa, j);
                    self.aos_pair(&mut pi, &mut pj, false);
                    store_force(soa, i, pi.force);
                }
            }
        }
    }

    /// All pairs between two slot ranges of distinct buffers. Updates the
    /// first buffer; updates the second as well iff `newton3` is true.
    fn soa_pair(
        &self,
        soa_a: &mut SoaBuffer,
        ra: Range<usize>,
        soa_b: &mut SoaBuffer,
        rb: Range<usize>,
        newton3: bool,
    ) {
        for i in ra {
            if !soa_a.is_actual(i) {
                continue;
            }
            for j in rb.clone() {
                if !soa_b.is_actual(j) {
                    continue;
                }
                let mut pi = slot_particle(soa_a, i);
                let mut pj = slot_particle(soa_b, j);
                self.aos_pair(&mut pi, &mut pj, newton3);
                store_force(soa_a, i, pi.force);
                if newton3 {
                    store_force(soa_b, j, pj.force);
                }
            }
        }
    }

    /// All pairs between two disjoint slot ranges of the *same* buffer.
    /// Cluster traversals use this: both clusters live in one tower buffer.
    fn soa_pair_within(
        &self,
        soa: &mut SoaBuffer,
        ra: Range<usize>,
        rb: Range<usize>,
        newton3: bool,
    ) {
        debug_assert!(ra.end <= rb.start || rb.end <= ra.start);
        for i in ra {
            if !soa.is_actual(i) {
                continue;
            }
            for j in rb.clone() {
                if !soa.is_actual(j) {
                    continue;
                }
                let mut pi = slot_particle(soa, i);
                let mut pj = slot_particle(soa, j);
                self.aos_pair(&mut pi, &mut pj, newton3);
                store_force(soa, i, pi.force);
                if newton3 {
                    store_force(soa, j, pj.force);
                }
            }
        }
    }

    /// Neighbor-list-driven iteration over slots `i_from..i_to` of a flat
    /// buffer. `lists[i]` holds the neighbor slots of slot `i`.
    fn soa_verlet(
        &self,
        soa: &mut SoaBuffer,
        i_from: usize,
        i_to: usize,
        lists: &[Vec<usize>],
        newton3: bool,
    ) {
        for i in i_from..i_to {
            if !soa.is_actual(i) {
                continue;
            }
            for &j in &lists[i] {
                if !soa.is_actual(j) {
                    continue;
                }
                let mut pi = slot_particle(soa, i);
                let mut pj = slot_particle(soa, j);
                self.aos_pair(&mut pi, &mut pj, newton3);
                store_force(soa, i, pi.force);
                if newton3 {
                    store_force(soa, j, pj.force);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Adds +1 to the first particle's fx per call, +1 to the second's when
    /// newton3 is set. Makes call multiplicity visible in the force field.
    struct MarkFunctor;

    impl PairFunctor for MarkFunctor {
        fn aos_pair(&self, pi: &mut Particle, pj: &mut Particle, newton3: bool) {
            pi.force[0] += 1.0;
            if newton3 {
                pj.force[0] += 1.0;
            }
        }
    }

    fn buffer_of(n: usize) -> SoaBuffer {
        let mut soa = SoaBuffer::default();
        for i in 0..n {
            soa.push(&Particle::new(i as u64, [i as f64, 0.0, 0.0]));
        }
        soa
    }

    #[test]
    fn soa_self_newton3_counts_each_pair_once() {
        let mut soa = buffer_of(3);
        MarkFunctor.soa_self(&mut soa, 0..3, true);
        // 3 unordered pairs, both sides incremented: total 6 marks.
        let total: f64 = soa.fx.iter().sum();
        assert!((total - 6.0).abs() < 1e-15);
        // Each particle participates in 2 pairs.
        assert!(soa.fx.iter().all(|&f| (f - 2.0).abs() < 1e-15));
    }

    #[test]
    fn soa_self_no_newton3_visits_both_orderings() {
        let mut soa = buffer_of(3);
        MarkFunctor.soa_self(&mut soa, 0..3, false);
        // Every ordered pair (i, j), i != j, updates only i: again 2 per slot.
        assert!(soa.fx.iter().all(|&f| (f - 2.0).abs() < 1e-15));
    }

    #[test]
    fn soa_pair_respects_newton3_flag() {
        let mut a = buffer_of(2);
        let mut b = buffer_of(2);
        MarkFunctor.soa_pair(&mut a, 0..2, &mut b, 0..2, false);
        assert!(a.fx.iter().all(|&f| (f - 2.0).abs() < 1e-15));
        assert!(b.fx.iter().all(|&f| f.abs() < 1e-15), "one-way without newton3");

        let mut a = buffer_of(2);
        let mut b = buffer_of(2);
        MarkFunctor.soa_pair(&mut a, 0..2, &mut b, 0..2, true);
        assert!(a.fx.iter().all(|&f| (f - 2.0).abs() < 1e-15));
        assert!(b.fx.iter().all(|&f| (f - 2.0).abs() < 1e-15));
    }

    #[test]
    fn soa_entry_points_skip_dummies() {
        let mut soa = buffer_of(3);
        soa.ownership[1] = OwnershipState::Dummy as i64;
        MarkFunctor.soa_self(&mut soa, 0..3, true);
        assert!(soa.fx[1].abs() < 1e-15, "dummy never participates");
        assert!((soa.fx[0] - 1.0).abs() < 1e-15);
        assert!((soa.fx[2] - 1.0).abs() < 1e-15);
    }

    #[test]
    fn soa_verlet_walks_lists() {
        let mut soa = buffer_of(3);
        let lists = vec![vec![1, 2], vec![], vec![]];
        MarkFunctor.soa_verlet(&mut soa, 0, 3, &lists, true);
        assert!((soa.fx[0] - 2.0).abs() < 1e-15);
        assert!((soa.fx[1] - 1.0).abs() < 1e-15);
        assert!((soa.fx[2] - 1.0).abs() < 1e-15);
    }

    #[test]
    fn default_load_extract_roundtrip() {
        let mut particles = vec![Particle::new(0, [1.0, 2.0, 3.0])];
        let mut soa = SoaBuffer::default();
        MarkFunctor.soa_load(&particles, &mut soa);
        soa.fx[0] = 5.0;
        MarkFunctor.soa_extract(&soa, &mut particles);
        assert_eq!(particles[0].force, [5.0, 0.0, 0.0]);
    }
}
