// SPDX-License-Identifier: AGPL-3.0-only

//! Evidence-capped lower-confidence-bound strategy.
//!
//! Tracks a running mean and variance per configuration. A phase first
//! measures every configuration without evidence, then the candidates
//! whose lower confidence bound `mean − β·σ` is smallest — the ones that
//! are either fast or still uncertain. Configurations at the evidence cap
//! are not re-measured; their mean keeps competing for the optimum.

use hashbrown::HashMap;

use crate::tuning::configuration::Configuration;
use crate::tuning::TuningStrategy;

/// Exploration weight of the acquisition function.
const LCB_BETA: f64 = 1.0;

#[derive(Debug, Default, Clone)]
struct Evidence {
    count: usize,
    mean: f64,
    m2: f64,
}

impl Evidence {
    fn update(&mut self, value: f64) {
        // Welford's running moments.
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return f64::INFINITY;
        }
        (self.m2 / (self.count - 1) as f64).sqrt()
    }

    fn lower_confidence_bound(&self) -> f64 {
        if self.count == 0 {
            return f64::NEG_INFINITY;
        }
        let spread = if self.count < 2 { self.mean } else { self.std_dev() };
        LCB_BETA.mul_add(-spread, self.mean)
    }
}

/// The acquisition-driven strategy.
#[derive(Debug)]
pub struct Bayesian {
    evidence: HashMap<String, Evidence>,
    max_evidence: usize,
    keys: Vec<String>,
    to_test: Vec<usize>,
    cursor: usize,
    measured: Vec<Option<u64>>,
}

impl Bayesian {
    /// A fresh strategy with the given per-configuration evidence cap.
    #[must_use]
    pub fn new(max_evidence: usize) -> Self {
        Self {
            evidence: HashMap::new(),
            max_evidence: max_evidence.max(1),
            keys: Vec::new(),
            to_test: Vec::new(),
            cursor: 0,
            measured: Vec::new(),
        }
    }
}

impl TuningStrategy for Bayesian {
    fn name(&self) -> &'static str {
        "bayesian"
    }

    fn reset(&mut self, candidates: &[Configuration]) {
        self.keys = candidates.iter().map(ToString::to_string).collect();
        self.measured = vec![None; candidates.len()];
        self.cursor = 0;

        let untested: Vec<usize> = (0..candidates.len())
            .filter(|&i| self.evidence.get(&self.keys[i]).map_or(true, |e| e.count == 0))
            .collect();
        if untested.is_empty() {
            // acquire by lower confidence bound among capped-out-free ones
            let mut scored: Vec<(usize, f64)> = (0..candidates.len())
                .filter(|&i| {
                    self.evidence
                        .get(&self.keys[i])
                        .map_or(true, |e| e.count < self.max_evidence)
                })
                .map(|i| {
                    let lcb = self
                        .evidence
                        .get(&self.keys[i])
                        .map_or(f64::NEG_INFINITY, Evidence::lower_confidence_bound);
                    (i, lcb)
                })
                .collect();
            scored.sort_by(|a, b| a.1.total_cmp(&b.1));
            let budget = (candidates.len() / 3).max(1);
            self.to_test = scored.into_iter().take(budget).map(|(i, _)| i).collect();
            if self.to_test.is_empty() {
                // everything capped: keep the record, re-measure nothing
                // beyond the current best to satisfy the phase protocol
                self.to_test = vec![self.best_mean_index()];
            }
        } else {
            self.to_test = untested;
        }
    }

    fn current(&self) -> usize {
        self.to_test[self.cursor.min(self.to_test.len() - 1)]
    }

    fn add_evidence(&mut self, time: u64) -> bool {
        let candidate = self.current();
        self.measured[candidate] = Some(time);
        self.evidence
            .entry(self.keys[candidate].clone())
            .or_default()
            .update(time as f64);
        self.cursor += 1;
        self.cursor < self.to_test.len()
    }

    fn optimum(&self) -> usize {
        self.best_mean_index()
    }
}

impl Bayesian {
    /// Index of the candidate with the smallest posterior mean (falling
    /// back to this phase's measurements for unseen keys).
    fn best_mean_index(&self) -> usize {
        (0..self.keys.len())
            .filter_map(|i| {
                let mean = self
                    .evidence
                    .get(&self.keys[i])
                    .filter(|e| e.count > 0)
                    .map(|e| e.mean)
                    .or_else(|| self.measured[i].map(|t| t as f64))?;
                Some((i, mean))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map_or(0, |(i, _)| i)
    }
}
