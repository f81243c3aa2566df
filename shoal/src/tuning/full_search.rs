// SPDX-License-Identifier: AGPL-3.0-only

//! Exhaustive tuning strategy: measure every candidate, commit the best.

use crate::tuning::configuration::Configuration;
use crate::tuning::TuningStrategy;

/// Tests every applicable candidate each phase.
#[derive(Debug, Default)]
pub struct FullSearch {
    times: Vec<Option<u64>>,
    cursor: usize,
}

impl FullSearch {
    /// A fresh full-search strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TuningStrategy for FullSearch {
    fn name(&self) -> &'static str {
        "full-search"
    }

    fn reset(&mut self, candidates: &[Configuration]) {
        self.times = vec![None; candidates.len()];
        self.cursor = 0;
    }

    fn current(&self) -> usize {
        self.cursor
    }

    fn add_evidence(&mut self, time: u64) -> bool {
        if self.cursor < self.times.len() {
            self.times[self.cursor] = Some(time);
            self.cursor += 1;
        }
        self.cursor < self.times.len()
    }

    fn optimum(&self) -> usize {
        self.times
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.map(|t| (i, t)))
            .min_by_key(|&(_, t)| t)
            .map_or(0, |(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::ContainerChoice;
    use crate::traversals::{DataLayout, LoadEstimator, TraversalChoice};

    fn candidates(n: usize) -> Vec<Configuration> {
        (0..n)
            .map(|_| Configuration {
                container: ContainerChoice::LinkedCells,
                traversal: TraversalChoice::C08,
                layout: DataLayout::Aos,
                newton3: true,
                cell_size_factor: 1.0,
                load_estimator: LoadEstimator::None,
            })
            .collect()
    }

    #[test]
    fn walks_every_candidate_then_stops() {
        let mut fs = FullSearch::new();
        fs.reset(&candidates(3));
        assert_eq!(fs.current(), 0);
        assert!(fs.add_evidence(30));
        assert_eq!(fs.current(), 1);
        assert!(fs.add_evidence(10));
        assert!(!fs.add_evidence(20), "third sample completes the phase");
        assert_eq!(fs.optimum(), 1);
    }

    #[test]
    fn repeat_phase_commits_same_winner_on_same_times() {
        let mut fs = FullSearch::new();
        for _ in 0..2 {
            fs.reset(&candidates(4));
            for &t in &[40u64, 25, 31, 60] {
                let _ = fs.add_evidence(t);
            }
            assert_eq!(fs.optimum(), 1);
        }
    }
}
