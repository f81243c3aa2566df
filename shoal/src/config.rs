// SPDX-License-Identifier: AGPL-3.0-only

//! Engine-level options.
//!
//! One options struct covers the physical setup (box, cutoff, skin), the
//! rebuild cadence, the tuning parameters, and the allowed option sets the
//! search space is enumerated from. Validation happens once at engine
//! construction; contradictory values are configuration errors, never
//! silently corrected.

use crate::domain::BoundaryType;
use crate::error::{Result, ShoalError};
use crate::tolerances::{
    DEFAULT_REBUILD_FREQUENCY, DEFAULT_TUNING_INTERVAL, DEFAULT_TUNING_MAX_EVIDENCE,
    DEFAULT_TUNING_SAMPLES,
};
use crate::tuning::{SearchSpaceOptions, SelectorStrategy, TuningStrategyChoice};

/// Options of one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lower corner of the owned box.
    pub box_min: [f64; 3],
    /// Upper corner of the owned box.
    pub box_max: [f64; 3],
    /// Interaction cutoff radius.
    pub cutoff: f64,
    /// Neighbor-list skin radius.
    pub skin: f64,
    /// Upper bound on neighbor-list reuse, in iterations.
    pub rebuild_frequency: usize,
    /// Iterations between tuning phases.
    pub tuning_interval: usize,
    /// Timing samples per tuning candidate.
    pub tuning_samples: usize,
    /// Evidence cap for the bayesian strategy.
    pub tuning_max_evidence: usize,
    /// Sample reduction for candidate comparison.
    pub selector_strategy: SelectorStrategy,
    /// Which tuning strategy to run.
    pub tuning_strategy: TuningStrategyChoice,
    /// Allowed option sets of the search space.
    pub search_space: SearchSpaceOptions,
    /// Worker threads the schedules partition for; 0 means the rayon
    /// pool's current size.
    pub num_threads: usize,
    /// Reject (true) or log-and-accept (false) particles added outside
    /// their allowed region.
    pub strict: bool,
    /// Boundary handling per axis.
    pub boundaries: [BoundaryType; 3],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            box_min: [0.0; 3],
            box_max: [10.0; 3],
            cutoff: 1.0,
            skin: 0.2,
            rebuild_frequency: DEFAULT_REBUILD_FREQUENCY,
            tuning_interval: DEFAULT_TUNING_INTERVAL,
            tuning_samples: DEFAULT_TUNING_SAMPLES,
            tuning_max_evidence: DEFAULT_TUNING_MAX_EVIDENCE,
            selector_strategy: SelectorStrategy::default(),
            tuning_strategy: TuningStrategyChoice::default(),
            search_space: SearchSpaceOptions::default(),
            num_threads: 0,
            strict: true,
            boundaries: [BoundaryType::Periodic; 3],
        }
    }
}

impl EngineConfig {
    /// Cutoff + skin.
    #[must_use]
    pub fn interaction_length(&self) -> f64 {
        self.cutoff + self.skin
    }

    /// The effective worker count.
    #[must_use]
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            rayon::current_num_threads()
        } else {
            self.num_threads
        }
    }

    /// Checks the options for contradictions.
    ///
    /// # Errors
    ///
    /// [`ShoalError::Configuration`] naming the offending value.
    pub fn validate(&self) -> Result<()> {
        if self.cutoff <= 0.0 {
            return Err(ShoalError::Configuration(format!(
                "cutoff must be positive, got {}",
                self.cutoff
            )));
        }
        if self.skin < 0.0 {
            return Err(ShoalError::Configuration(format!(
                "skin must be non-negative, got {}",
                self.skin
            )));
        }
        for d in 0..3 {
            if self.box_max[d] <= self.box_min[d] {
                return Err(ShoalError::Configuration(format!(
                    "box is empty on axis {d}: [{}, {})",
                    self.box_min[d], self.box_max[d]
                )));
            }
        }
        if self.rebuild_frequency == 0 {
            return Err(ShoalError::Configuration(
                "rebuild frequency must be positive".into(),
            ));
        }
        if self.tuning_interval == 0 || self.tuning_samples == 0 {
            return Err(ShoalError::Configuration(
                "tuning interval and samples must be positive".into(),
            ));
        }
        if self
            .search_space
            .cell_size_factors
            .iter()
            .any(|&f| f <= 0.0)
        {
            return Err(ShoalError::Configuration(
                "cell size factors must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        let mut c = EngineConfig::default();
        c.cutoff = 0.0;
        assert!(c.validate().is_err());

        let mut c = EngineConfig::default();
        c.skin = -0.1;
        assert!(c.validate().is_err());

        let mut c = EngineConfig::default();
        c.box_max = c.box_min;
        assert!(c.validate().is_err());

        let mut c = EngineConfig::default();
        c.search_space.cell_size_factors = vec![0.0];
        assert!(c.validate().is_err());

        let mut c = EngineConfig::default();
        c.tuning_samples = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn interaction_length_is_cutoff_plus_skin() {
        let c = EngineConfig::default();
        assert!((c.interaction_length() - 1.2).abs() < 1e-12);
    }
}
