// SPDX-License-Identifier: AGPL-3.0-only

//! Live scenario statistics for tuning heuristics.
//!
//! A `LiveInfo` record summarizes the current particle distribution:
//! count, mean density, density homogeneity, and peak density. The
//! rule-based strategy evaluates its expression program against it, and
//! the rank-bucketing helpers use it to group similar subdomains before a
//! distributed tuning phase splits the search space (the single-process
//! build keeps these as pure functions; there is no communication here).

use crate::tolerances::SIMILARITY_MAX_DENSITY_WEIGHT;

/// Snapshot of the particle distribution in one subdomain.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LiveInfo {
    /// Number of owned particles.
    pub num_particles: usize,
    /// Mean particle density over the box.
    pub density: f64,
    /// Standard deviation of per-bin densities; zero is perfectly
    /// homogeneous.
    pub homogeneity: f64,
    /// Peak per-bin density.
    pub max_density: f64,
}

impl LiveInfo {
    /// Gathers the statistics from particle positions, binning the box at
    /// one cutoff per side.
    #[must_use]
    pub fn gather(
        positions: &[[f64; 3]],
        box_min: [f64; 3],
        box_max: [f64; 3],
        cutoff: f64,
    ) -> Self {
        let num_particles = positions.len();
        let mut extent = [0.0; 3];
        let mut bins = [1usize; 3];
        for d in 0..3 {
            extent[d] = box_max[d] - box_min[d];
            bins[d] = ((extent[d] / cutoff).floor() as usize).max(1);
        }
        let volume = extent[0] * extent[1] * extent[2];
        if volume <= 0.0 {
            return Self::default();
        }
        let density = num_particles as f64 / volume;

        let num_bins = bins[0] * bins[1] * bins[2];
        let bin_volume = volume / num_bins as f64;
        let mut counts = vec![0usize; num_bins];
        for pos in positions {
            let mut idx = [0usize; 3];
            for d in 0..3 {
                idx[d] = (((pos[d] - box_min[d]) / extent[d] * bins[d] as f64).floor() as i64)
                    .clamp(0, bins[d] as i64 - 1) as usize;
            }
            counts[idx[0] + bins[0] * (idx[1] + bins[1] * idx[2])] += 1;
        }

        let densities: Vec<f64> = counts.iter().map(|&c| c as f64 / bin_volume).collect();
        let mean = densities.iter().sum::<f64>() / num_bins as f64;
        let variance =
            densities.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / num_bins as f64;
        let max_density = densities.iter().copied().fold(0.0, f64::max);

        Self {
            num_particles,
            density,
            homogeneity: variance.sqrt(),
            max_density,
        }
    }

    /// The similarity metric used to bucket subdomains:
    /// `homogeneity + w · max_density`.
    #[must_use]
    pub fn similarity(&self) -> f64 {
        SIMILARITY_MAX_DENSITY_WEIGHT.mul_add(self.max_density, self.homogeneity)
    }
}

/// Groups ranks into buckets of similar scenarios: ranks whose similarity
/// differs by at most `tolerance` from the bucket's first member share a
/// bucket. Returns one bucket id per rank.
#[must_use]
pub fn bucket_ranks(similarities: &[f64], tolerance: f64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..similarities.len()).collect();
    order.sort_by(|&a, &b| similarities[a].total_cmp(&similarities[b]));

    let mut buckets = vec![0usize; similarities.len()];
    let mut bucket = 0usize;
    let mut anchor = f64::NEG_INFINITY;
    let mut first = true;
    for &rank in &order {
        if first || similarities[rank] - anchor > tolerance {
            if !first {
                bucket += 1;
            }
            anchor = similarities[rank];
            first = false;
        }
        buckets[rank] = bucket;
    }
    buckets
}

/// The slice of a `num_configs`-sized search space assigned to `rank` of
/// `num_ranks` within one bucket: contiguous, near-equal shares, every
/// configuration covered exactly once.
#[must_use]
pub fn split_search_space(num_configs: usize, rank: usize, num_ranks: usize) -> std::ops::Range<usize> {
    let num_ranks = num_ranks.max(1);
    let rank = rank.min(num_ranks - 1);
    let base = num_configs / num_ranks;
    let extra = num_configs % num_ranks;
    let start = rank * base + rank.min(extra);
    let len = base + usize::from(rank < extra);
    start..start + len
}
