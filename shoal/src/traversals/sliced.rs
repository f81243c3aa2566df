// SPDX-License-Identifier: AGPL-3.0-only

//! Sliced schedules.
//!
//! The domain is cut along one axis into contiguous slabs, roughly one per
//! worker. Base steps are c08-shaped, so the write footprint of a layer
//! reaches exactly one layer forward; the only shared state between
//! adjacent slabs is the boundary plane.
//!
//! - **locked** — every slab runs concurrently; slab k+1 holds the
//!   boundary-plane lock k while it processes its first layer, and slab k
//!   takes the same lock while it processes its last layer (whose base
//!   steps write into the boundary plane).
//! - **two-colored** — even slabs run first, then odd slabs; the boundary
//!   plane is never touched concurrently, no locks.
//! - **balanced** — as locked, but the cut positions equalize estimated
//!   per-slab work instead of layer counts.

use std::ops::Range;
use std::sync::{Mutex, PoisonError};

use rayon::prelude::*;

/// Synchronization flavor of the sliced schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlicedMode {
    /// One lock per slab boundary plane, all slabs concurrent.
    Locked,
    /// Two slab colors in two rounds, no locks.
    TwoColored,
}

/// Picks the longest axis of the grid.
#[must_use]
pub fn longest_axis(dims: [usize; 3]) -> usize {
    (0..3).fold(0, |best, d| if dims[d] > dims[best] { d } else { best })
}

/// Splits `num_layers` into at most `num_threads` slabs of at least two
/// layers each, balancing the given per-layer loads (uniform when absent).
#[must_use]
pub fn slab_cuts(num_layers: usize, num_threads: usize, loads: Option<&[f64]>) -> Vec<Range<usize>> {
    let max_slabs = (num_layers / 2).max(1);
    let num_slabs = num_threads.clamp(1, max_slabs);

    let uniform;
    let loads = match loads {
        Some(l) => l,
        None => {
            uniform = vec![1.0; num_layers];
            &uniform
        }
    };

    let total: f64 = loads.iter().sum();
    let per_slab = total / num_slabs as f64;

    let mut cuts = Vec::with_capacity(num_slabs);
    let mut start = 0;
    let mut acc = 0.0;
    for layer in 0..num_layers {
        acc += loads[layer];
        let remaining_slabs = num_slabs - cuts.len();
        let remaining_layers = num_layers - layer - 1;
        // Close the slab when its share is reached, provided both it and
        // every remaining slab keep at least two layers.
        if cuts.len() + 1 < num_slabs
            && acc >= per_slab * (cuts.len() + 1) as f64
            && layer + 1 - start >= 2
            && remaining_layers >= 2 * (remaining_slabs - 1)
        {
            cuts.push(start..layer + 1);
            start = layer + 1;
        }
    }
    cuts.push(start..num_layers);
    cuts
}

/// Runs a sliced schedule.
///
/// `process_base` is invoked once per base cell; its write footprint must
/// be c08-shaped (base plus one cell forward per axis). The schedule
/// serializes boundary-plane access per `mode`.
pub fn sliced<P>(
    dims: [usize; 3],
    axis: usize,
    num_threads: usize,
    loads: Option<&[f64]>,
    mode: SlicedMode,
    process_base: P,
) where
    P: Fn([usize; 3]) + Sync,
{
    let slabs = slab_cuts(dims[axis], num_threads, loads);
    let locks: Vec<Mutex<()>> = (0..slabs.len().saturating_sub(1))
        .map(|_| Mutex::new(()))
        .collect();

    let run_slab = |slab_index: usize| {
        let slab = &slabs[slab_index];
        for layer in slab.clone() {
            // Boundary discipline, locked mode only: hold the left lock on
            // the first layer (the previous slab writes into it), hold the
            // right lock on the last layer (its base steps write into the
            // next slab's first layer).
            let _left = (mode == SlicedMode::Locked && layer == slab.start && slab_index > 0)
                .then(|| {
                    locks[slab_index - 1]
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                });
            let _right = (mode == SlicedMode::Locked
                && layer + 1 == slab.end
                && slab_index + 1 < slabs.len())
            .then(|| {
                locks[slab_index]
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
            });

            for_each_base_in_layer(dims, axis, layer, &process_base);
        }
    };

    match mode {
        SlicedMode::Locked => {
            (0..slabs.len()).into_par_iter().for_each(run_slab);
        }
        SlicedMode::TwoColored => {
            let evens: Vec<usize> = (0..slabs.len()).step_by(2).collect();
            let odds: Vec<usize> = (1..slabs.len()).step_by(2).collect();
            evens.par_iter().for_each(|&s| run_slab(s));
            odds.par_iter().for_each(|&s| run_slab(s));
        }
    }
}

/// Per-layer load totals along `axis`, from a per-cell weight function.
/// Input to [`slab_cuts`] for the balanced schedule.
#[must_use]
pub fn layer_loads<W>(dims: [usize; 3], axis: usize, weight: W) -> Vec<f64>
where
    W: Fn(usize) -> f64,
{
    let mut loads = vec![0.0; dims[axis]];
    for z in 0..dims[2] {
        for y in 0..dims[1] {
            for x in 0..dims[0] {
                let idx = [x, y, z];
                let index = idx[0] + dims[0] * (idx[1] + dims[1] * idx[2]);
                loads[idx[axis]] += weight(index);
            }
        }
    }
    loads
}

fn for_each_base_in_layer<P>(dims: [usize; 3], axis: usize, layer: usize, process_base: &P)
where
    P: Fn([usize; 3]) + Sync,
{
    let (u, v) = match axis {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    };
    for b in 0..dims[v] {
        for a in 0..dims[u] {
            let mut base = [0usize; 3];
            base[axis] = layer;
            base[u] = a;
            base[v] = b;
            process_base(base);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn longest_axis_picks_max() {
        assert_eq!(longest_axis([3, 9, 4]), 1);
        assert_eq!(longest_axis([5, 5, 5]), 0, "ties resolve to the first axis");
    }

    #[test]
    fn uniform_cuts_cover_all_layers() {
        let cuts = slab_cuts(12, 4, None);
        assert_eq!(cuts.len(), 4);
        assert_eq!(cuts[0].start, 0);
        assert_eq!(cuts.last().map(|r| r.end), Some(12));
        for w in cuts.windows(2) {
            assert_eq!(w[0].end, w[1].start, "slabs must tile the axis");
        }
        for cut in &cuts {
            assert!(cut.len() >= 2, "every slab keeps at least two layers");
        }
    }

    #[test]
    fn cuts_clamp_to_available_layers() {
        let cuts = slab_cuts(5, 8, None);
        assert_eq!(cuts.len(), 2, "5 layers feed at most two 2-layer slabs");
        assert_eq!(cuts.last().map(|r| r.end), Some(5));
    }

    #[test]
    fn balanced_cuts_follow_load() {
        // All load in the first four layers: the first slab should stay
        // narrow instead of taking half the axis.
        let mut loads = vec![0.0; 16];
        for l in loads.iter_mut().take(4) {
            *l = 100.0;
        }
        for l in loads.iter_mut().skip(4) {
            *l = 1.0;
        }
        let cuts = slab_cuts(16, 2, Some(&loads));
        assert_eq!(cuts.len(), 2);
        assert!(
            cuts[0].len() <= 4,
            "heavy head should close the first slab early, got {:?}",
            cuts[0]
        );
    }

    #[test]
    fn every_base_processed_exactly_once() {
        for mode in [SlicedMode::Locked, SlicedMode::TwoColored] {
            let dims = [4, 6, 16];
            let hits = AtomicU64::new(0);
            let seen = Mutex::new(HashSet::new());
            sliced(dims, 2, 4, None, mode, |base| {
                hits.fetch_add(1, Ordering::Relaxed);
                seen.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(base);
            });
            assert_eq!(hits.load(Ordering::Relaxed) as usize, 4 * 6 * 16);
            assert_eq!(
                seen.lock().unwrap_or_else(PoisonError::into_inner).len(),
                4 * 6 * 16
            );
        }
    }

    #[test]
    fn slicing_along_each_axis() {
        for axis in 0..3 {
            let dims = [8, 8, 8];
            let hits = AtomicU64::new(0);
            sliced(dims, axis, 2, None, SlicedMode::Locked, |_| {
                hits.fetch_add(1, Ordering::Relaxed);
            });
            assert_eq!(hits.load(Ordering::Relaxed), 512);
        }
    }
}
