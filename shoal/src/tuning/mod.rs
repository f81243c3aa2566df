// SPDX-License-Identifier: AGPL-3.0-only

//! The auto-tuner.
//!
//! Treats the combined (container, traversal, layout, Newton-3, cell-size,
//! load-estimator) setting as a categorical optimization problem:
//!
//! 1. Enumerate the applicable subset of the search space (runtime
//!    geometry, thread count, functor capabilities).
//! 2. Let the strategy propose candidates; measure S samples each.
//! 3. Reduce samples to one number (min / mean / median).
//! 4. Commit the winner for the next I iterations, then retune.
//!
//! Configuration switches happen only at rebuild boundaries — the engine
//! asks for the active configuration before each traversal and never
//! mid-evaluation. An empty search space is fatal at init; a phase in
//! which every candidate is rejected is fatal with a per-candidate
//! diagnostic.

/// Evidence-capped lower-confidence-bound strategy.
pub mod bayesian;
/// Configuration tuple, search-space enumeration, sample reduction.
pub mod configuration;
/// Exhaustive strategy.
pub mod full_search;
/// Scenario statistics and rank-similarity helpers.
pub mod live_info;
/// Structured strategy logging and replay.
pub mod logger;
/// Prediction-band retesting strategy.
pub mod predictive;
/// Expression-program strategy over scenario statistics.
pub mod rule_based;

use crate::error::{Result, ShoalError};

pub use configuration::{
    enumerate_search_space, materialize_interval, Configuration, SearchSpaceOptions,
    SelectorStrategy,
};
pub use live_info::LiveInfo;

/// A tuning strategy proposes candidates and digests their timings.
///
/// The tuner drives it per phase: `reset` with the applicable candidates,
/// then alternate `current` / `add_evidence` until the latter reports the
/// phase complete, then `optimum`.
pub trait TuningStrategy {
    /// Human-readable strategy name.
    fn name(&self) -> &'static str;
    /// Starts a phase over the given candidates.
    fn reset(&mut self, candidates: &[Configuration]);
    /// The candidate index to measure next.
    fn current(&self) -> usize;
    /// Records the reduced time for the current candidate; returns whether
    /// more candidates remain in this phase.
    fn add_evidence(&mut self, time: u64) -> bool;
    /// The winning candidate index of the completed phase.
    fn optimum(&self) -> usize;
    /// Feeds fresh scenario statistics; only the rule-based strategy
    /// reacts.
    fn update_live_info(&mut self, info: &LiveInfo) {
        let _ = info;
    }
}

/// Which tuning strategy to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TuningStrategyChoice {
    /// Test all candidates.
    #[default]
    FullSearch,
    /// Retest only candidates predicted near the optimum.
    Predictive,
    /// Acquisition-driven sampling with an evidence cap.
    Bayesian,
    /// Expression program over live scenario statistics.
    RuleBased,
}

/// The auto-tuner: search space, sampling state, and the committed
/// configuration.
pub struct AutoTuner {
    search_space: Vec<Configuration>,
    strategy: Box<dyn TuningStrategy>,
    selector: SelectorStrategy,
    samples_per_config: usize,
    tuning_interval: usize,
    samples: Vec<u64>,
    iterations_since_tune: usize,
    tuning_phases_completed: usize,
    phase_candidates: Vec<Configuration>,
    in_phase: bool,
    current: Configuration,
}

impl AutoTuner {
    /// Creates a tuner over the given search space.
    ///
    /// # Errors
    ///
    /// [`ShoalError::Configuration`] when the search space is empty or the
    /// sampling parameters are zero.
    pub fn new(
        search_space: Vec<Configuration>,
        strategy: Box<dyn TuningStrategy>,
        selector: SelectorStrategy,
        tuning_interval: usize,
        samples_per_config: usize,
    ) -> Result<Self> {
        if search_space.is_empty() {
            return Err(ShoalError::Configuration(
                "tuning search space is empty".into(),
            ));
        }
        if tuning_interval == 0 || samples_per_config == 0 {
            return Err(ShoalError::Configuration(format!(
                "tuning interval ({tuning_interval}) and samples ({samples_per_config}) must be positive"
            )));
        }
        let current = search_space[0];
        Ok(Self {
            search_space,
            strategy,
            selector,
            samples_per_config,
            tuning_interval,
            samples: Vec::new(),
            iterations_since_tune: 0,
            tuning_phases_completed: 0,
            phase_candidates: Vec::new(),
            in_phase: false,
            current,
        })
    }

    /// The committed (or currently sampled) configuration.
    #[must_use]
    pub fn current_configuration(&self) -> Configuration {
        if self.in_phase {
            self.phase_candidates[self.strategy.current()]
        } else {
            self.current
        }
    }

    /// Whether a tuning phase is in progress.
    #[must_use]
    pub const fn in_tuning_phase(&self) -> bool {
        self.in_phase
    }

    /// Number of completed tuning phases.
    #[must_use]
    pub const fn phases_completed(&self) -> usize {
        self.tuning_phases_completed
    }

    /// The full (unfiltered) search space.
    #[must_use]
    pub fn search_space(&self) -> &[Configuration] {
        &self.search_space
    }

    /// Whether the next iteration should open a tuning phase.
    #[must_use]
    pub fn needs_tuning(&self) -> bool {
        !self.in_phase
            && (self.tuning_phases_completed == 0
                || self.iterations_since_tune >= self.tuning_interval)
    }

    /// Opens a tuning phase over the applicable subset of the space.
    ///
    /// `applicable` judges one configuration and returns the rejection
    /// reason otherwise.
    ///
    /// # Errors
    ///
    /// [`ShoalError::NoApplicableConfiguration`] listing every rejected
    /// candidate and its reason when nothing survives the filter.
    pub fn start_phase<A>(&mut self, applicable: A) -> Result<()>
    where
        A: Fn(&Configuration) -> std::result::Result<(), String>,
    {
        let mut rejected = Vec::new();
        let mut candidates = Vec::new();
        for config in &self.search_space {
            match applicable(config) {
                Ok(()) => candidates.push(*config),
                Err(reason) => rejected.push((config.to_string(), reason)),
            }
        }
        if candidates.is_empty() {
            return Err(ShoalError::NoApplicableConfiguration(rejected));
        }
        log::debug!(
            "tuning phase {}: {} applicable candidates ({} rejected)",
            self.tuning_phases_completed,
            candidates.len(),
            rejected.len()
        );
        self.strategy.reset(&candidates);
        self.phase_candidates = candidates;
        self.samples.clear();
        self.in_phase = true;
        Ok(())
    }

    /// Records one timing sample for the configuration under test. When
    /// enough samples accumulated, they reduce and feed the strategy; when
    /// the strategy finishes, the winner is committed.
    pub fn record_sample(&mut self, nanos: u64) {
        if !self.in_phase {
            return;
        }
        self.samples.push(nanos);
        if self.samples.len() < self.samples_per_config {
            return;
        }
        let reduced = self.selector.reduce(&self.samples);
        self.samples.clear();
        if !self.strategy.add_evidence(reduced) {
            let winner = self.phase_candidates[self.strategy.optimum()];
            log::info!("tuning phase {} committed {winner}", self.tuning_phases_completed);
            self.current = winner;
            self.in_phase = false;
            self.iterations_since_tune = 0;
            self.tuning_phases_completed += 1;
        }
    }

    /// Counts one non-tuning iteration toward the retune interval.
    pub fn advance_iteration(&mut self) {
        if !self.in_phase {
            self.iterations_since_tune += 1;
        }
    }

    /// Forwards fresh scenario statistics to the strategy.
    pub fn update_live_info(&mut self, info: &LiveInfo) {
        self.strategy.update_live_info(info);
    }
}
