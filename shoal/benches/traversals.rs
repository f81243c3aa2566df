// SPDX-License-Identifier: AGPL-3.0-only

//! Traversal throughput: pair iteration across containers and schedules
//! on a uniform random cloud.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use shoal::containers::{
    DirectSum, LinkedCells, ParticleContainer, VerletClusterLists, VerletListsCells,
};
use shoal::functors::LennardJones;
use shoal::particle::Particle;
use shoal::traversals::{DataLayout, LoadEstimator, TraversalChoice, TraversalSpec};

const BOX_MAX: f64 = 10.0;
const CUTOFF: f64 = 1.0;
const SKIN: f64 = 0.2;

fn random_particles(n: u64) -> Vec<Particle> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|id| {
            Particle::new(
                id,
                [
                    rng.gen_range(0.0..BOX_MAX),
                    rng.gen_range(0.0..BOX_MAX),
                    rng.gen_range(0.0..BOX_MAX),
                ],
            )
        })
        .collect()
}

fn spec(traversal: TraversalChoice, layout: DataLayout) -> TraversalSpec {
    TraversalSpec {
        traversal,
        layout,
        newton3: true,
        load_estimator: LoadEstimator::None,
        num_threads: rayon::current_num_threads(),
    }
}

fn bench_traversals(c: &mut Criterion) {
    let lj = LennardJones::new(1.0, 1.0, CUTOFF);
    let mut group = c.benchmark_group("pair_iteration");

    for &n in &[512u64, 4096] {
        let particles = random_particles(n);

        group.bench_with_input(BenchmarkId::new("direct_sum", n), &n, |b, _| {
            let mut ds = DirectSum::new([0.0; 3], [BOX_MAX; 3], CUTOFF, SKIN, true);
            for p in &particles {
                ds.add(*p).expect("in box");
            }
            b.iter(|| {
                ds.iterate(&lj, &spec(TraversalChoice::Direct, DataLayout::Aos))
                    .expect("direct runs");
                black_box(&ds);
            });
        });

        for (label, traversal, layout) in [
            ("lc_c08_aos", TraversalChoice::C08, DataLayout::Aos),
            ("lc_c08_soa", TraversalChoice::C08, DataLayout::Soa),
            ("lc_sliced_aos", TraversalChoice::Sliced, DataLayout::Aos),
        ] {
            group.bench_with_input(BenchmarkId::new(label, n), &n, |b, _| {
                let mut lc = LinkedCells::new([0.0; 3], [BOX_MAX; 3], CUTOFF, SKIN, 1.0, true)
                    .expect("valid box");
                for p in &particles {
                    lc.add(*p).expect("in box");
                }
                b.iter(|| {
                    lc.iterate(&lj, &spec(traversal, layout)).expect("runs");
                    black_box(&lc);
                });
            });
        }

        group.bench_with_input(BenchmarkId::new("vlc_verlet_c18", n), &n, |b, _| {
            let mut vlc = VerletListsCells::new([0.0; 3], [BOX_MAX; 3], CUTOFF, SKIN, 1.0, true)
                .expect("valid box");
            for p in &particles {
                vlc.add(*p).expect("in box");
            }
            vlc.rebuild_neighbor_lists(true);
            b.iter(|| {
                vlc.iterate(&lj, &spec(TraversalChoice::VerletC18, DataLayout::Aos))
                    .expect("runs");
                black_box(&vlc);
            });
        });

        group.bench_with_input(BenchmarkId::new("vcl_cluster_c02_soa", n), &n, |b, _| {
            let mut vcl = VerletClusterLists::new([0.0; 3], [BOX_MAX; 3], CUTOFF, SKIN, true);
            for p in &particles {
                vcl.add(*p).expect("in box");
            }
            vcl.rebuild_neighbor_lists(true);
            b.iter(|| {
                vcl.iterate(&lj, &spec(TraversalChoice::ClusterC02, DataLayout::Soa))
                    .expect("runs");
                black_box(&vcl);
            });
        });
    }
    group.finish();
}

fn bench_rebuild(c: &mut Criterion) {
    let particles = random_particles(4096);
    c.bench_function("vlc_list_rebuild_4096", |b| {
        let mut vlc = VerletListsCells::new([0.0; 3], [BOX_MAX; 3], CUTOFF, SKIN, 1.0, true)
            .expect("valid box");
        for p in &particles {
            vlc.add(*p).expect("in box");
        }
        b.iter(|| {
            vlc.rebuild_neighbor_lists(true);
            black_box(&vlc);
        });
    });
}

criterion_group!(benches, bench_traversals, bench_rebuild);
criterion_main!(benches);
