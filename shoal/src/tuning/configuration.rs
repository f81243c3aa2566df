// SPDX-License-Identifier: AGPL-3.0-only

//! Tuning configurations and search-space enumeration.
//!
//! A configuration fixes every tunable axis: container, traversal, data
//! layout, Newton-3, cell-size factor, and load estimator. The search
//! space is the filtered cross product of the allowed option sets —
//! traversals pair only with containers they can run on, so the space
//! stays free of structurally impossible combinations; the per-phase
//! runtime applicability check (thread count, current geometry, functor
//! capabilities) happens in the tuner.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::containers::ContainerChoice;
use crate::error::{Result, ShoalError};
use crate::traversals::{DataLayout, LoadEstimator, TraversalChoice};

/// One point of the tuning search space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Spatial container.
    pub container: ContainerChoice,
    /// Traversal schedule.
    pub traversal: TraversalChoice,
    /// Kernel entry layout.
    pub layout: DataLayout,
    /// Newton-3 symmetry.
    pub newton3: bool,
    /// Cell side = factor · interaction length.
    pub cell_size_factor: f64,
    /// Estimator for the balanced sliced schedule.
    pub load_estimator: LoadEstimator,
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}, {}, {}, newton3={}, csf={}, {}}}",
            self.container,
            self.traversal,
            self.layout,
            if self.newton3 { "on" } else { "off" },
            self.cell_size_factor,
            self.load_estimator
        )
    }
}

/// The allowed option sets the search space is built from.
#[derive(Debug, Clone)]
pub struct SearchSpaceOptions {
    /// Allowed containers.
    pub containers: Vec<ContainerChoice>,
    /// Allowed traversals.
    pub traversals: Vec<TraversalChoice>,
    /// Allowed data layouts.
    pub layouts: Vec<DataLayout>,
    /// Allowed Newton-3 modes.
    pub newton3: Vec<bool>,
    /// Allowed cell-size factors (already materialised to finitely many).
    pub cell_size_factors: Vec<f64>,
    /// Allowed load estimators.
    pub load_estimators: Vec<LoadEstimator>,
}

impl Default for SearchSpaceOptions {
    /// Everything enabled, cell-size factor 1, no load estimation.
    fn default() -> Self {
        Self {
            containers: ContainerChoice::all().to_vec(),
            traversals: TraversalChoice::all().to_vec(),
            layouts: vec![DataLayout::Aos, DataLayout::Soa],
            newton3: vec![true, false],
            cell_size_factors: vec![1.0],
            load_estimators: vec![LoadEstimator::None],
        }
    }
}

/// Samples a continuous cell-size-factor interval at `samples` evenly
/// spaced points (both endpoints included).
#[must_use]
pub fn materialize_interval(min: f64, max: f64, samples: usize) -> Vec<f64> {
    if samples <= 1 || max <= min {
        return vec![min];
    }
    let step = (max - min) / (samples - 1) as f64;
    (0..samples).map(|i| step.mul_add(i as f64, min)).collect()
}

/// Enumerates the search space as the filtered cross product of the
/// option sets.
///
/// # Errors
///
/// [`ShoalError::Configuration`] when the result is empty: nothing could
/// ever be tuned, which is a configuration mistake, not a runtime state.
pub fn enumerate_search_space(options: &SearchSpaceOptions) -> Result<Vec<Configuration>> {
    let mut space = Vec::new();
    for &container in &options.containers {
        for &traversal in &options.traversals {
            if !traversal.compatible_containers().contains(&container) {
                continue;
            }
            for &layout in &options.layouts {
                for &newton3 in &options.newton3 {
                    for &cell_size_factor in &options.cell_size_factors {
                        for &load_estimator in &options.load_estimators {
                            space.push(Configuration {
                                container,
                                traversal,
                                layout,
                                newton3,
                                cell_size_factor,
                                load_estimator,
                            });
                        }
                    }
                }
            }
        }
    }
    if space.is_empty() {
        return Err(ShoalError::Configuration(
            "tuning search space is empty: no allowed traversal runs on any allowed container"
                .into(),
        ));
    }
    Ok(space)
}

/// How per-candidate timing samples reduce to one number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectorStrategy {
    /// Minimum sample.
    #[default]
    FastestAbs,
    /// Arithmetic mean.
    FastestMean,
    /// Median sample.
    FastestMedian,
}

impl SelectorStrategy {
    /// Reduces a non-empty sample set; zero for an empty one.
    #[must_use]
    pub fn reduce(self, samples: &[u64]) -> u64 {
        if samples.is_empty() {
            return 0;
        }
        match self {
            Self::FastestAbs => samples.iter().copied().min().unwrap_or(0),
            Self::FastestMean => samples.iter().sum::<u64>() / samples.len() as u64,
            Self::FastestMedian => {
                let mut sorted = samples.to_vec();
                sorted.sort_unstable();
                sorted[sorted.len() / 2]
            }
        }
    }
}

impl fmt::Display for SelectorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FastestAbs => write!(f, "fastest-abs"),
            Self::FastestMean => write!(f, "fastest-mean"),
            Self::FastestMedian => write!(f, "fastest-median"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_space_pairs_traversals_with_their_containers() {
        let Ok(space) = enumerate_search_space(&SearchSpaceOptions::default()) else {
            panic!("default space is non-empty");
        };
        for config in &space {
            assert!(
                config
                    .traversal
                    .compatible_containers()
                    .contains(&config.container),
                "{config} pairs a traversal with a foreign container"
            );
        }
        // direct appears exactly with direct-sum × 2 layouts × 2 newton3
        let direct = space
            .iter()
            .filter(|c| c.traversal == TraversalChoice::Direct)
            .count();
        assert_eq!(direct, 4);
    }

    #[test]
    fn empty_space_is_a_configuration_error() {
        let options = SearchSpaceOptions {
            containers: vec![ContainerChoice::DirectSum],
            traversals: vec![TraversalChoice::C08],
            ..SearchSpaceOptions::default()
        };
        assert!(enumerate_search_space(&options).is_err());
    }

    #[test]
    fn interval_materialisation() {
        assert_eq!(materialize_interval(1.0, 2.0, 3), vec![1.0, 1.5, 2.0]);
        assert_eq!(materialize_interval(1.0, 2.0, 1), vec![1.0]);
        assert_eq!(materialize_interval(2.0, 1.0, 5), vec![2.0]);
    }

    #[test]
    fn selector_reductions() {
        let samples = [30u64, 10, 20];
        assert_eq!(SelectorStrategy::FastestAbs.reduce(&samples), 10);
        assert_eq!(SelectorStrategy::FastestMean.reduce(&samples), 20);
        assert_eq!(SelectorStrategy::FastestMedian.reduce(&samples), 20);
        assert_eq!(SelectorStrategy::FastestMedian.reduce(&[5, 100, 7]), 7);
        assert_eq!(SelectorStrategy::FastestAbs.reduce(&[]), 0);
    }

    #[test]
    fn configuration_display_is_complete() {
        let config = Configuration {
            container: ContainerChoice::LinkedCells,
            traversal: TraversalChoice::C08,
            layout: DataLayout::Soa,
            newton3: true,
            cell_size_factor: 1.5,
            load_estimator: LoadEstimator::None,
        };
        let s = config.to_string();
        assert!(s.contains("linked-cells"));
        assert!(s.contains("c08"));
        assert!(s.contains("soa"));
        assert!(s.contains("newton3=on"));
        assert!(s.contains("csf=1.5"));
    }
}
