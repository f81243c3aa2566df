// SPDX-License-Identifier: AGPL-3.0-only

//! Cross-container force-equivalence validation.
//!
//! Scenario: 100 pseudo-random particles in [0, 10)³, Lennard-Jones
//! ε = σ = 1, cutoff 1. The direct-sum container is the reference; every
//! other (container, traversal, layout, newton3) combination must
//! reproduce its per-particle forces to the documented relative
//! tolerance. Exit 0 when every combination agrees, 1 otherwise.

use shoal::containers::{
    DirectSum, LinkedCells, LinkedCellsReferences, OctreeContainer, ParticleContainer,
    VerletClusterLists, VerletLists, VerletListsCells,
};
use shoal::functors::LennardJones;
use shoal::particle::{IteratorBehavior, Particle};
use shoal::tolerances::{FORCE_EQUIVALENCE_REL, NEWTON3_PARITY_ABS};
use shoal::traversals::{DataLayout, LoadEstimator, TraversalChoice, TraversalSpec};
use shoal::validation::EquivalenceReport;

const BOX_MAX: f64 = 10.0;
const CUTOFF: f64 = 1.0;
const SKIN: f64 = 0.2;
const NUM_PARTICLES: u64 = 100;

/// Deterministic particle cloud (splitmix-style integer mixing).
fn scenario_particles() -> Vec<Particle> {
    let mut seed = 42u64;
    let mut next = || {
        seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        (seed >> 33) as f64 / (1u64 << 31) as f64
    };
    (0..NUM_PARTICLES)
        .map(|id| Particle::new(id, [next() * BOX_MAX, next() * BOX_MAX, next() * BOX_MAX]))
        .collect()
}

fn spec(traversal: TraversalChoice, layout: DataLayout, newton3: bool) -> TraversalSpec {
    TraversalSpec {
        traversal,
        layout,
        newton3,
        load_estimator: LoadEstimator::None,
        num_threads: rayon::current_num_threads(),
    }
}

/// Runs one traversal on a freshly filled container; returns per-particle
/// forces sorted by id, or `None` when the combination is not runnable.
fn forces_of<C: ParticleContainer>(
    mut container: C,
    particles: &[Particle],
    traversal: TraversalChoice,
    layout: DataLayout,
    newton3: bool,
) -> Option<Vec<[f64; 3]>> {
    for p in particles {
        container.add(*p).ok()?;
    }
    container.rebuild_neighbor_lists(newton3);
    let lj = LennardJones::new(1.0, 1.0, CUTOFF);
    container
        .iterate(&lj, &spec(traversal, layout, newton3))
        .ok()?;
    let mut out = container.particles(IteratorBehavior::Owned);
    out.sort_by_key(|p| p.id);
    Some(out.into_iter().map(|p| p.force).collect())
}

#[allow(clippy::too_many_lines)]
fn main() {
    let mut report = EquivalenceReport::new(&format!(
        "{NUM_PARTICLES} particles, lj cutoff {CUTOFF}, skin {SKIN}"
    ));
    let particles = scenario_particles();
    let lo = [0.0; 3];
    let hi = [BOX_MAX; 3];

    let Some(reference) = forces_of(
        DirectSum::new(lo, hi, CUTOFF, SKIN, true),
        &particles,
        TraversalChoice::Direct,
        DataLayout::Aos,
        true,
    ) else {
        println!("reference direct-sum run failed");
        std::process::exit(1);
    };

    let combos: Vec<(&str, TraversalChoice, DataLayout, bool)> = vec![
        ("direct/soa/n3", TraversalChoice::Direct, DataLayout::Soa, true),
        ("direct/aos/no-n3", TraversalChoice::Direct, DataLayout::Aos, false),
        ("lc/c01/aos", TraversalChoice::C01, DataLayout::Aos, false),
        ("lc/c08/aos/n3", TraversalChoice::C08, DataLayout::Aos, true),
        ("lc/c08/soa/n3", TraversalChoice::C08, DataLayout::Soa, true),
        ("lc/c08/aos/no-n3", TraversalChoice::C08, DataLayout::Aos, false),
        ("lc/c18/aos/n3", TraversalChoice::C18, DataLayout::Aos, true),
        ("lc/sliced/aos/n3", TraversalChoice::Sliced, DataLayout::Aos, true),
        ("lc/sliced-c02/aos/n3", TraversalChoice::SlicedC02, DataLayout::Aos, true),
        ("lc/balanced/aos/n3", TraversalChoice::BalancedSliced, DataLayout::Aos, true),
        ("vl/verlet-c18/aos/n3", TraversalChoice::VerletC18, DataLayout::Aos, true),
        ("vl/verlet-c18/soa/no-n3", TraversalChoice::VerletC18, DataLayout::Soa, false),
        ("vlc/verlet-c18/aos/n3", TraversalChoice::VerletC18, DataLayout::Aos, true),
        ("vlc/verlet-sliced/aos/n3", TraversalChoice::VerletSliced, DataLayout::Aos, true),
        ("vcl/cluster-c01/aos", TraversalChoice::ClusterC01, DataLayout::Aos, false),
        ("vcl/cluster-c02/aos/n3", TraversalChoice::ClusterC02, DataLayout::Aos, true),
        ("vcl/cluster-c02/soa/n3", TraversalChoice::ClusterC02, DataLayout::Soa, true),
        ("vcl/cluster-sliced/aos/n3", TraversalChoice::ClusterSliced, DataLayout::Aos, true),
        ("ot/octree-c18/aos/n3", TraversalChoice::OctreeC18, DataLayout::Aos, true),
        ("ot/octree-naive/aos", TraversalChoice::OctreeNaive, DataLayout::Aos, false),
    ];

    for (label, traversal, layout, newton3) in combos {
        let forces = match label.split('/').next() {
            Some("direct") => forces_of(
                DirectSum::new(lo, hi, CUTOFF, SKIN, true),
                &particles,
                traversal,
                layout,
                newton3,
            ),
            Some("lc") => LinkedCells::new(lo, hi, CUTOFF, SKIN, 1.0, true)
                .ok()
                .and_then(|c| forces_of(c, &particles, traversal, layout, newton3)),
            Some("vl") => VerletLists::new(lo, hi, CUTOFF, SKIN, 1.0, true)
                .ok()
                .and_then(|c| forces_of(c, &particles, traversal, layout, newton3)),
            Some("vlc") => VerletListsCells::new(lo, hi, CUTOFF, SKIN, 1.0, true)
                .ok()
                .and_then(|c| forces_of(c, &particles, traversal, layout, newton3)),
            Some("vcl") => forces_of(
                VerletClusterLists::new(lo, hi, CUTOFF, SKIN, true),
                &particles,
                traversal,
                layout,
                newton3,
            ),
            Some("ot") => forces_of(
                OctreeContainer::new(lo, hi, CUTOFF, SKIN, 1.0, true),
                &particles,
                traversal,
                layout,
                newton3,
            ),
            _ => None,
        };
        match forces {
            Some(forces) => {
                report.record_forces(label, &reference, &forces, FORCE_EQUIVALENCE_REL);
            }
            None => report.record_failure(label, "combination refused to run"),
        }
    }

    // references variant: aos c08 against the direct-sum result
    let refs_forces = LinkedCellsReferences::new(lo, hi, CUTOFF, SKIN, 1.0, true)
        .ok()
        .and_then(|c| forces_of(c, &particles, TraversalChoice::C08, DataLayout::Aos, true));
    match refs_forces {
        Some(forces) => {
            report.record_forces("lcr/c08/aos/n3", &reference, &forces, FORCE_EQUIVALENCE_REL);
        }
        None => report.record_failure("lcr/c08/aos/n3", "combination refused to run"),
    }

    // Newton-3 on/off parity on linked cells
    let with_n3 = LinkedCells::new(lo, hi, CUTOFF, SKIN, 1.0, true)
        .ok()
        .and_then(|c| forces_of(c, &particles, TraversalChoice::C08, DataLayout::Aos, true));
    let without_n3 = LinkedCells::new(lo, hi, CUTOFF, SKIN, 1.0, true)
        .ok()
        .and_then(|c| forces_of(c, &particles, TraversalChoice::C08, DataLayout::Aos, false));
    if let (Some(a), Some(b)) = (with_n3, without_n3) {
        report.record_parity("lc/c08 newton3 on-vs-off", &a, &b, NEWTON3_PARITY_ABS);
    } else {
        report.record_failure("lc/c08 newton3 on-vs-off", "combination refused to run");
    }

    report.finish()
}
