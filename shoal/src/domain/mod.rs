// SPDX-License-Identifier: AGPL-3.0-only

//! Domain decomposition seam.
//!
//! The engine cooperates with an outer decomposition that owns particle
//! migration and halo exchange. This module implements the regular-grid
//! seam for the single-subdomain case: box leavers wrap around periodic
//! faces and re-enter, halo copies of near-face particles appear on the
//! opposite side, and reflective faces inject the mirror-image force. The
//! serialized particle records that would travel between ranks live in
//! [`wire`].

/// Byte-buffer particle records for the migration protocol.
pub mod wire;

use serde::{Deserialize, Serialize};

use crate::containers::ParticleContainer;
use crate::error::Result;
use crate::functors::LennardJones;
use crate::particle::{IteratorBehavior, Particle};
use crate::tolerances::SIXTH_ROOT_OF_TWO;

/// Boundary handling of one axis pair of faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoundaryType {
    /// Wrap around: leavers re-enter on the opposite face, halo copies
    /// mirror across.
    #[default]
    Periodic,
    /// Particles near the face receive the force of their mirror image.
    Reflective,
    /// Open face: leavers are handed to the caller.
    None,
}

/// The single-subdomain regular-grid decomposition.
#[derive(Debug, Clone, Copy)]
pub struct RegularGrid {
    box_min: [f64; 3],
    box_max: [f64; 3],
    boundaries: [BoundaryType; 3],
}

impl RegularGrid {
    /// A decomposition over the given box with per-axis boundaries.
    #[must_use]
    pub const fn new(
        box_min: [f64; 3],
        box_max: [f64; 3],
        boundaries: [BoundaryType; 3],
    ) -> Self {
        Self {
            box_min,
            box_max,
            boundaries,
        }
    }

    /// Whether `pos` lies inside this subdomain.
    #[must_use]
    pub fn is_inside_local_domain(&self, pos: [f64; 3]) -> bool {
        crate::geometry::in_box(pos, self.box_min, self.box_max)
    }

    /// Routes box leavers: periodic axes wrap the position and the
    /// particle re-enters; leavers through open or reflective faces are
    /// returned to the caller (an outer decomposition would ship them to
    /// the face neighbor).
    ///
    /// # Errors
    ///
    /// Propagates container intake errors for re-entering particles.
    pub fn exchange_migrating_particles<C: ParticleContainer>(
        &self,
        container: &mut C,
        emigrants: Vec<Particle>,
    ) -> Result<Vec<Particle>> {
        let mut unrouted = Vec::new();
        for mut p in emigrants {
            let mut wrapped = false;
            let mut open_exit = false;
            for d in 0..3 {
                let extent = self.box_max[d] - self.box_min[d];
                if p.pos[d] < self.box_min[d] || p.pos[d] >= self.box_max[d] {
                    match self.boundaries[d] {
                        BoundaryType::Periodic => {
                            p.pos[d] -= extent * ((p.pos[d] - self.box_min[d]) / extent).floor();
                            wrapped = true;
                        }
                        BoundaryType::Reflective | BoundaryType::None => open_exit = true,
                    }
                }
            }
            if open_exit || !wrapped {
                unrouted.push(p);
            } else {
                container.add(p)?;
            }
        }
        Ok(unrouted)
    }

    /// Creates halo copies across periodic faces: every owned particle
    /// within one interaction length of a periodic face appears on the
    /// opposite side, including edge and corner images.
    ///
    /// # Errors
    ///
    /// Propagates container intake errors for the generated halo copies.
    pub fn exchange_halo_particles<C: ParticleContainer>(&self, container: &mut C) -> Result<()> {
        let il = container.interaction_length();
        let owned = container.particles(IteratorBehavior::Owned);
        for p in owned {
            // per axis: -1 = image below the lower face, +1 = above the
            // upper face, 0 = no image
            let mut shift = [0i8; 3];
            for d in 0..3 {
                if self.boundaries[d] != BoundaryType::Periodic {
                    continue;
                }
                if p.pos[d] - self.box_min[d] < il {
                    shift[d] = 1;
                } else if self.box_max[d] - p.pos[d] < il {
                    shift[d] = -1;
                }
            }
            // enumerate all image combinations except the identity
            for ix in 0..=usize::from(shift[0] != 0) {
                for iy in 0..=usize::from(shift[1] != 0) {
                    for iz in 0..=usize::from(shift[2] != 0) {
                        if ix == 0 && iy == 0 && iz == 0 {
                            continue;
                        }
                        let mut pos = p.pos;
                        for (d, i) in [(0, ix), (1, iy), (2, iz)] {
                            if i == 1 {
                                let extent = self.box_max[d] - self.box_min[d];
                                pos[d] += f64::from(shift[d]) * extent;
                            }
                        }
                        container.add_halo(p.as_halo(pos))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies reflective boundary forces: a particle within
    /// `2^(1/6)·σ` of a reflective face receives the Lennard-Jones force
    /// of its mirror image across that face — equal in magnitude,
    /// opposite in sign, and zero in the transverse components.
    pub fn reflect_particles_at_boundaries<C: ParticleContainer>(
        &self,
        container: &mut C,
        epsilon: f64,
        sigma: f64,
    ) {
        let range = SIXTH_ROOT_OF_TWO * sigma;
        // Mirror distances are at most 2·range; any larger cutoff is
        // equivalent.
        let lj = LennardJones::new(epsilon, sigma, 2.0 * range);
        let (box_min, box_max, boundaries) = (self.box_min, self.box_max, self.boundaries);
        container.for_each_particle_mut(IteratorBehavior::Owned, None, &mut |p| {
            for d in 0..3 {
                if boundaries[d] != BoundaryType::Reflective {
                    continue;
                }
                let to_lower = p.pos[d] - box_min[d];
                let to_upper = box_max[d] - p.pos[d];
                if to_lower < range {
                    let mirror_sep = 2.0 * to_lower;
                    let factor = lj.force_over_r(mirror_sep * mirror_sep);
                    p.force[d] += factor * mirror_sep;
                }
                if to_upper < range {
                    let mirror_sep = 2.0 * to_upper;
                    let factor = lj.force_over_r(mirror_sep * mirror_sep);
                    p.force[d] -= factor * mirror_sep;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::DirectSum;
    use crate::tolerances::REFLECTION_FORCE_ABS;

    fn container() -> DirectSum {
        DirectSum::new([0.0; 3], [5.0; 3], 1.0, 0.0, true)
    }

    #[test]
    fn periodic_leaver_reenters_on_opposite_face() {
        let grid = RegularGrid::new([0.0; 3], [5.0; 3], [BoundaryType::Periodic; 3]);
        let mut ds = container();
        let leaver = {
            let mut p = Particle::new(0, [2.5, 2.5, 2.5]);
            p.pos[0] = 5.3; // crossed the upper x face
            p
        };
        let Ok(unrouted) = grid.exchange_migrating_particles(&mut ds, vec![leaver]) else {
            panic!("wrap must re-enter");
        };
        assert!(unrouted.is_empty());
        let back = ds.particles(IteratorBehavior::Owned);
        assert_eq!(back.len(), 1);
        assert!((back[0].pos[0] - 0.3).abs() < 1e-12, "wrapped to the lower face");
    }

    #[test]
    fn open_face_leavers_stay_unrouted() {
        let grid = RegularGrid::new(
            [0.0; 3],
            [5.0; 3],
            [BoundaryType::None, BoundaryType::Periodic, BoundaryType::Periodic],
        );
        let mut ds = container();
        let mut p = Particle::new(0, [2.5, 2.5, 2.5]);
        p.pos[0] = -0.2;
        let Ok(unrouted) = grid.exchange_migrating_particles(&mut ds, vec![p]) else {
            panic!("routing must succeed");
        };
        assert_eq!(unrouted.len(), 1);
        assert_eq!(ds.num_particles(), 0);
    }

    #[test]
    fn halo_exchange_mirrors_near_face_particles() {
        let grid = RegularGrid::new([0.0; 3], [5.0; 3], [BoundaryType::Periodic; 3]);
        let mut ds = container();
        let Ok(()) = ds.add(Particle::new(7, [0.3, 2.5, 2.5])) else {
            panic!("in box");
        };
        let Ok(()) = grid.exchange_halo_particles(&mut ds) else {
            panic!("halo exchange");
        };
        let halos = ds.particles(IteratorBehavior::Halo);
        assert_eq!(halos.len(), 1, "one face image");
        assert_eq!(halos[0].id, 7);
        assert!((halos[0].pos[0] - 5.3).abs() < 1e-12);
    }

    #[test]
    fn corner_particle_gets_edge_and_corner_images() {
        let grid = RegularGrid::new([0.0; 3], [5.0; 3], [BoundaryType::Periodic; 3]);
        let mut ds = container();
        let Ok(()) = ds.add(Particle::new(1, [0.2, 0.2, 0.2])) else {
            panic!("in box");
        };
        let Ok(()) = grid.exchange_halo_particles(&mut ds) else {
            panic!("halo exchange");
        };
        // 3 face images + 3 edge images + 1 corner image
        assert_eq!(ds.particles(IteratorBehavior::Halo).len(), 7);
    }

    #[test]
    fn reflective_wall_force_matches_mirror_image() {
        // One particle near the lower x wall, one near the upper.
        let grid = RegularGrid::new([0.0; 3], [5.0; 3], [BoundaryType::Reflective; 3]);
        let mut ds = container();
        let Ok(()) = ds.add(Particle::new(0, [0.005, 2.5, 2.5])) else {
            panic!("in box");
        };
        let Ok(()) = ds.add(Particle::new(1, [4.995, 2.5, 2.5])) else {
            panic!("in box");
        };
        grid.reflect_particles_at_boundaries(&mut ds, 1.0, 1.0);

        let lj = LennardJones::new(1.0, 1.0, 2.0 * SIXTH_ROOT_OF_TWO);
        let expected = {
            // mirror of particle 0 sits at -0.005: separation 0.01
            let factor = lj.force_over_r(0.01 * 0.01);
            factor * 0.01
        };

        let particles = ds.particles(IteratorBehavior::Owned);
        let p0 = particles.iter().find(|p| p.id == 0);
        let p1 = particles.iter().find(|p| p.id == 1);
        let (Some(p0), Some(p1)) = (p0, p1) else {
            panic!("both particles present");
        };
        assert!(expected > 0.0, "wall force is repulsive");
        assert!((p0.force[0] - expected).abs() < REFLECTION_FORCE_ABS);
        assert!((p1.force[0] + expected).abs() < REFLECTION_FORCE_ABS);
        for d in 1..3 {
            assert!(p0.force[d].abs() < REFLECTION_FORCE_ABS, "transverse components stay zero");
            assert!(p1.force[d].abs() < REFLECTION_FORCE_ABS);
        }
    }

    #[test]
    fn particles_beyond_reflection_range_feel_nothing() {
        let grid = RegularGrid::new([0.0; 3], [5.0; 3], [BoundaryType::Reflective; 3]);
        let mut ds = container();
        let Ok(()) = ds.add(Particle::new(0, [2.5, 2.5, 2.5])) else {
            panic!("in box");
        };
        grid.reflect_particles_at_boundaries(&mut ds, 1.0, 1.0);
        let p = ds.particles(IteratorBehavior::Owned)[0];
        assert_eq!(p.force, [0.0; 3]);
    }
}
