// SPDX-License-Identifier: AGPL-3.0-only

//! Predictive tuning strategy.
//!
//! Keeps a timing history per configuration across phases. Once every
//! candidate has at least two data points, a phase only retests the
//! candidates whose linear extrapolation lies within a relative band of
//! the predicted optimum — plus any candidate that has not been measured
//! for too many phases, so a misprediction cannot blacklist a
//! configuration forever.

use hashbrown::HashMap;

use crate::tolerances::{PREDICTIVE_MAX_PHASES_WITHOUT_TEST, PREDICTIVE_RELATIVE_BAND};
use crate::tuning::configuration::Configuration;
use crate::tuning::TuningStrategy;

#[derive(Debug, Default, Clone)]
struct History {
    /// (phase, reduced time) pairs, append-only.
    samples: Vec<(usize, u64)>,
}

impl History {
    /// Linear extrapolation from the last two points; the last value when
    /// only one exists.
    fn predict(&self, phase: usize) -> Option<f64> {
        match self.samples.as_slice() {
            [] => None,
            [(_, t)] => Some(*t as f64),
            [.., (p1, t1), (p2, t2)] => {
                if p2 == p1 {
                    return Some(*t2 as f64);
                }
                let slope = (*t2 as f64 - *t1 as f64) / (*p2 as f64 - *p1 as f64);
                Some(slope.mul_add(phase as f64 - *p2 as f64, *t2 as f64))
            }
        }
    }

    fn last_phase(&self) -> Option<usize> {
        self.samples.last().map(|&(p, _)| p)
    }
}

/// Prediction-band retesting strategy.
#[derive(Debug, Default)]
pub struct Predictive {
    history: HashMap<String, History>,
    phase: usize,
    /// Candidate indices under test this phase.
    to_test: Vec<usize>,
    cursor: usize,
    keys: Vec<String>,
    measured: Vec<Option<u64>>,
}

impl Predictive {
    /// A fresh predictive strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TuningStrategy for Predictive {
    fn name(&self) -> &'static str {
        "predictive"
    }

    fn reset(&mut self, candidates: &[Configuration]) {
        self.phase += 1;
        self.keys = candidates.iter().map(ToString::to_string).collect();
        self.measured = vec![None; candidates.len()];
        self.cursor = 0;

        let predictions: Vec<Option<f64>> = self
            .keys
            .iter()
            .map(|key| self.history.get(key).and_then(|h| h.predict(self.phase)))
            .collect();
        let predicted_optimum = predictions
            .iter()
            .filter_map(|p| *p)
            .fold(f64::INFINITY, f64::min);

        self.to_test = (0..candidates.len())
            .filter(|&i| {
                let overdue = self.history.get(&self.keys[i]).map_or(true, |h| {
                    h.last_phase()
                        .map_or(true, |last| self.phase - last >= PREDICTIVE_MAX_PHASES_WITHOUT_TEST)
                });
                match predictions[i] {
                    // never measured, or silent for too long: test it
                    None => true,
                    Some(p) => {
                        overdue
                            || !predicted_optimum.is_finite()
                            || p <= predicted_optimum * PREDICTIVE_RELATIVE_BAND
                    }
                }
            })
            .collect();
        if self.to_test.is_empty() {
            // degenerate (no prediction beat the band): fall back to all
            self.to_test = (0..candidates.len()).collect();
        }
    }

    fn current(&self) -> usize {
        self.to_test[self.cursor.min(self.to_test.len() - 1)]
    }

    fn add_evidence(&mut self, time: u64) -> bool {
        let candidate = self.current();
        self.measured[candidate] = Some(time);
        self.history
            .entry(self.keys[candidate].clone())
            .or_default()
            .samples
            .push((self.phase, time));
        self.cursor += 1;
        self.cursor < self.to_test.len()
    }

    fn optimum(&self) -> usize {
        self.measured
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

    fn candidates() -> Vec<Configuration> {
        TraversalChoice::all()
            .iter()
            .filter(|t| {
                t.compatible_containers()
                    .contains(&ContainerChoice::LinkedCells)
            })
            .map(|&traversal| Configuration {
                container: ContainerChoice::LinkedCells,
                traversal,
                layout: DataLayout::Aos,
                newton3: false,
                cell_size_factor: 1.0,
                load_estimator: LoadEstimator::None,
            })
            .collect()
    }

    /// Deterministic times: candidate i takes 100 + 50·i.
    fn run_phase(strategy: &mut Predictive, configs: &[Configuration]) -> usize {
        strategy.reset(configs);
        loop {
            let i = strategy.current();
            let done = !strategy.add_evidence(100 + 50 * i as u64);
            if done {
                break;
            }
        }
        strategy.optimum()
    }

    #[test]
    fn first_phase_tests_everything() {
        let configs = candidates();
        let mut p = Predictive::new();
        p.reset(&configs);
        assert_eq!(p.to_test.len(), configs.len());
    }

    #[test]
    fn later_phases_skip_slow_candidates() {
        let configs = candidates();
        let mut p = Predictive::new();
        // two full phases build up two history points each
        assert_eq!(run_phase(&mut p, &configs), 0);
        assert_eq!(run_phase(&mut p, &configs), 0);
        // now predictions exist; only candidates within the band and the
        // overdue ones remain
        p.reset(&configs);
        assert!(
            p.to_test.len() < configs.len(),
            "prediction band must prune: testing {:?} of {}",
            p.to_test,
            configs.len()
        );
        assert!(p.to_test.contains(&0), "the winner is always retested");
    }

    #[test]
    fn overdue_candidates_are_forced_back_in() {
        let configs = candidates();
        let mut p = Predictive::new();
        for _ in 0..2 {
            let _ = run_phase(&mut p, &configs);
        }
        // run enough pruned phases for the slowest candidate to go stale
        for _ in 0..PREDICTIVE_MAX_PHASES_WITHOUT_TEST {
            let _ = run_phase(&mut p, &configs);
        }
        p.reset(&configs);
        let slowest = configs.len() - 1;
        assert!(
            p.to_test.contains(&slowest),
            "stale candidate {slowest} must be retested, testing {:?}",
            p.to_test
        );
    }

    #[test]
    fn winner_is_stable_under_deterministic_times() {
        let configs = candidates();
        let mut p = Predictive::new();
        for _ in 0..5 {
            assert_eq!(run_phase(&mut p, &configs), 0);
        }
    }
}
