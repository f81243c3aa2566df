// SPDX-License-Identifier: AGPL-3.0-only

//! Truncated 12-6 Lennard-Jones kernel.
//!
//! Serves as the reference force for the cross-container validation suite
//! and the reflective boundary handling. Plain truncation at the cutoff, no
//! tail shift: the equivalence tests compare container/traversal variants
//! against each other, so absolute truncation artifacts cancel.

use std::ops::Range;

use crate::functor::PairFunctor;
use crate::particle::Particle;
use crate::soa::SoaBuffer;

/// Lennard-Jones 12-6 kernel with a global `(ε, σ)` pair and cutoff.
#[derive(Debug, Clone, Copy)]
pub struct LennardJones {
    epsilon: f64,
    sigma_sq: f64,
    cutoff_sq: f64,
}

impl LennardJones {
    /// Creates a kernel with the given well depth, particle diameter, and
    /// cutoff radius.
    #[must_use]
    pub fn new(epsilon: f64, sigma: f64, cutoff: f64) -> Self {
        Self {
            epsilon,
            sigma_sq: sigma * sigma,
            cutoff_sq: cutoff * cutoff,
        }
    }

    /// The scalar factor `F/r` such that the force on `i` is
    /// `factor * (r_i - r_j)`. Zero beyond the cutoff.
    #[inline]
    #[must_use]
    pub fn force_over_r(&self, dist_sq: f64) -> f64 {
        if dist_sq > self.cutoff_sq || dist_sq <= 0.0 {
            return 0.0;
        }
        let inv_r2 = 1.0 / dist_sq;
        let lj2 = self.sigma_sq * inv_r2;
        let lj6 = lj2 * lj2 * lj2;
        let lj12 = lj6 * lj6;
        24.0 * self.epsilon * (lj12 + (lj12 - lj6)) * inv_r2
    }
}

impl PairFunctor for LennardJones {
    fn aos_pair(&self, pi: &mut Particle, pj: &mut Particle, newton3: bool) {
        let dx = pi.pos[0] - pj.pos[0];
        let dy = pi.pos[1] - pj.pos[1];
        let dz = pi.pos[2] - pj.pos[2];
        let r_sq = dx * dx + dy * dy + dz * dz;
        let factor = self.force_over_r(r_sq);
        if factor == 0.0 {
            return;
        }
        let f = [factor * dx, factor * dy, factor * dz];
        pi.add_force(f);
        if newton3 {
            pj.sub_force(f);
        }
    }

    // Column loops over unit-stride lanes; the compiler vectorizes these.

    fn soa_self(&self, soa: &mut SoaBuffer, range: Range<usize>, newton3: bool) {
        for i in range.clone() {
            if !soa.is_actual(i) {
                continue;
            }
            let (xi, yi, zi) = (soa.px[i], soa.py[i], soa.pz[i]);
            let mut acc = [0.0f64; 3];
            let inner: Range<usize> = if newton3 { (i + 1)..range.end } else { range.clone() };
            for j in inner {
                if j == i || !soa.is_actual(j) {
                    continue;
                }
                let dx = xi - soa.px[j];
                let dy = yi - soa.py[j];
                let dz = zi - soa.pz[j];
                let factor = self.force_over_r(dx * dx + dy * dy + dz * dz);
                acc[0] += factor * dx;
                acc[1] += factor * dy;
                acc[2] += factor * dz;
                if newton3 {
                    soa.fx[j] -= factor * dx;
                    soa.fy[j] -= factor * dy;
                    soa.fz[j] -= factor * dz;
                }
            }
            soa.fx[i] += acc[0];
            soa.fy[i] += acc[1];
            soa.fz[i] += acc[2];
        }
    }

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
            let (xi, yi, zi) = (soa_a.px[i], soa_a.py[i], soa_a.pz[i]);
            let mut acc = [0.0f64; 3];
            for j in rb.clone() {
                if !soa_b.is_actual(j) {
                    continue;
                }
                let dx = xi - soa_b.px[j];
                let dy = yi - soa_b.py[j];
                let dz = zi - soa_b.pz[j];
                let factor = self.force_over_r(dx * dx + dy * dy + dz * dz);
                acc[0] += factor * dx;
                acc[1] += factor * dy;
                acc[2] += factor * dz;
                if newton3 {
                    soa_b.fx[j] -= factor * dx;
                    soa_b.fy[j] -= factor * dy;
                    soa_b.fz[j] -= factor * dz;
                }
            }
            soa_a.fx[i] += acc[0];
            soa_a.fy[i] += acc[1];
            soa_a.fz[i] += acc[2];
        }
    }

    fn soa_pair_within(
        &self,
        soa: &mut SoaBuffer,
        ra: Range<usize>,
        rb: Range<usize>,
        newton3: bool,
    ) {
        for i in ra {
            if !soa.is_actual(i) {
                continue;
            }
            let (xi, yi, zi) = (soa.px[i], soa.py[i], soa.pz[i]);
            let mut acc = [0.0f64; 3];
            for j in rb.clone() {
                if !soa.is_actual(j) {
                    continue;
                }
                let dx = xi - soa.px[j];
                let dy = yi - soa.py[j];
                let dz = zi - soa.pz[j];
                let factor = self.force_over_r(dx * dx + dy * dy + dz * dz);
                acc[0] += factor * dx;
                acc[1] += factor * dy;
                acc[2] += factor * dz;
                if newton3 {
                    soa.fx[j] -= factor * dx;
                    soa.fy[j] -= factor * dy;
                    soa.fz[j] -= factor * dz;
                }
            }
            soa.fx[i] += acc[0];
            soa.fy[i] += acc[1];
            soa.fz[i] += acc[2];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_beyond_cutoff() {
        let lj = LennardJones::new(1.0, 1.0, 2.5);
        assert_eq!(lj.force_over_r(2.6 * 2.6), 0.0);
        assert!(lj.force_over_r(2.4 * 2.4) != 0.0);
    }

    #[test]
    fn repulsive_inside_minimum_attractive_outside() {
        let lj = LennardJones::new(1.0, 1.0, 3.0);
        let r_min = 2.0_f64.powf(1.0 / 6.0);
        assert!(lj.force_over_r(0.9 * 0.9) > 0.0, "repulsive at short range");
        assert!(
            lj.force_over_r(1.5 * 1.5) < 0.0,
            "attractive beyond the minimum"
        );
        assert!(
            lj.force_over_r(r_min * r_min).abs() < 1e-12,
            "zero at the potential minimum"
        );
    }

    #[test]
    fn aos_pair_newton3_is_antisymmetric() {
        let lj = LennardJones::new(1.0, 1.0, 3.0);
        let mut a = Particle::new(0, [0.0; 3]);
        let mut b = Particle::new(1, [1.1, 0.0, 0.0]);
        lj.aos_pair(&mut a, &mut b, true);
        for d in 0..3 {
            assert!((a.force[d] + b.force[d]).abs() < 1e-15);
        }
    }

    #[test]
    fn aos_pair_without_newton3_leaves_second_untouched() {
        let lj = LennardJones::new(1.0, 1.0, 3.0);
        let mut a = Particle::new(0, [0.0; 3]);
        let mut b = Particle::new(1, [1.1, 0.0, 0.0]);
        lj.aos_pair(&mut a, &mut b, false);
        assert!(a.force[0] != 0.0);
        assert_eq!(b.force, [0.0; 3]);
    }

    #[test]
    fn soa_self_matches_aos() {
        let lj = LennardJones::new(1.0, 1.0, 3.0);
        let positions = [[0.0, 0.0, 0.0], [1.1, 0.0, 0.0], [0.4, 0.9, 0.2]];

        // AoS reference, newton3 on.
        let mut aos: Vec<Particle> = positions
            .iter()
            .enumerate()
            .map(|(i, &p)| Particle::new(i as u64, p))
            .collect();
        for i in 0..aos.len() {
            for j in (i + 1)..aos.len() {
                let (left, right) = aos.split_at_mut(j);
                lj.aos_pair(&mut left[i], &mut right[0], true);
            }
        }

        let mut soa = SoaBuffer::default();
        for (i, &p) in positions.iter().enumerate() {
            soa.push(&Particle::new(i as u64, p));
        }
        lj.soa_self(&mut soa, 0..3, true);

        for i in 0..3 {
            assert!((soa.fx[i] - aos[i].force[0]).abs() < 1e-14);
            assert!((soa.fy[i] - aos[i].force[1]).abs() < 1e-14);
            assert!((soa.fz[i] - aos[i].force[2]).abs() < 1e-14);
        }
    }

    #[test]
    fn soa_self_newton3_on_off_agree() {
        let lj = LennardJones::new(1.0, 1.0, 3.0);
        let positions = [[0.0, 0.0, 0.0], [1.1, 0.0, 0.0], [0.4, 0.9, 0.2]];
        let mut with = SoaBuffer::default();
        let mut without = SoaBuffer::default();
        for (i, &p) in positions.iter().enumerate() {
            with.push(&Particle::new(i as u64, p));
            without.push(&Particle::new(i as u64, p));
        }
        lj.soa_self(&mut with, 0..3, true);
        lj.soa_self(&mut without, 0..3, false);
        for i in 0..3 {
            assert!((with.fx[i] - without.fx[i]).abs() < 1e-13);
            assert!((with.fy[i] - without.fy[i]).abs() < 1e-13);
            assert!((with.fz[i] - without.fz[i]).abs() < 1e-13);
        }
    }
}
