// SPDX-License-Identifier: AGPL-3.0-only

//! Force-equivalence reporting for the validation binaries.
//!
//! The validation binaries all ask the same question: does a (container,
//! traversal, layout, newton3) combination reproduce the reference forces?
//! This module owns that comparison — worst per-component relative
//! deviation with an absolute floor for near-zero components, absolute
//! parity for newton3 on/off — and renders a machine-readable summary with
//! exit code 0 (every combination agrees) or 1.

use std::process;

use crate::tolerances::FORCE_ABSOLUTE_FLOOR;

/// Outcome of checking one combination against the reference.
#[derive(Debug, Clone)]
pub enum ComboOutcome {
    /// Forces agree; the worst per-component deviation observed.
    Agrees {
        /// Largest deviation over all particles and axes.
        worst: f64,
        /// The bound it stayed under.
        bound: f64,
    },
    /// Forces deviate beyond the bound.
    Deviates {
        /// Largest deviation over all particles and axes.
        worst: f64,
        /// The bound it broke.
        bound: f64,
        /// Particle index and axis of the worst deviation.
        at: (usize, usize),
    },
    /// The combination refused to run (construction or traversal error).
    NotRunnable {
        /// Why it refused.
        reason: String,
    },
}

impl ComboOutcome {
    /// Whether this outcome counts as agreement.
    #[must_use]
    pub const fn agrees(&self) -> bool {
        matches!(self, Self::Agrees { .. })
    }
}

/// One checked combination.
#[derive(Debug, Clone)]
pub struct ComboResult {
    /// Short combination label, e.g. `lc/c08/soa/n3`.
    pub label: String,
    /// What happened.
    pub outcome: ComboOutcome,
}

/// Accumulates per-combination force comparisons for one scenario.
#[derive(Debug, Default)]
#[must_use]
pub struct EquivalenceReport {
    scenario: String,
    results: Vec<ComboResult>,
}

impl EquivalenceReport {
    /// A report for a named scenario.
    pub fn new(scenario: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            results: Vec::new(),
        }
    }

    /// Compares per-particle force vectors against the reference under a
    /// relative bound. Components whose reference magnitude falls below
    /// the absolute floor are compared against the floor instead, so
    /// near-zero components cannot inflate the relative deviation.
    pub fn record_forces(
        &mut self,
        label: &str,
        reference: &[[f64; 3]],
        observed: &[[f64; 3]],
        bound: f64,
    ) {
        if reference.len() != observed.len() {
            self.record_failure(
                label,
                &format!(
                    "particle count mismatch: {} reference vs {} observed",
                    reference.len(),
                    observed.len()
                ),
            );
            return;
        }
        let mut worst = 0.0f64;
        let mut at = (0usize, 0usize);
        for (i, (r, o)) in reference.iter().zip(observed.iter()).enumerate() {
            for d in 0..3 {
                let denom = r[d].abs().max(FORCE_ABSOLUTE_FLOOR);
                let rel = (r[d] - o[d]).abs() / denom;
                if rel > worst {
                    worst = rel;
                    at = (i, d);
                }
            }
        }
        let outcome = if worst < bound {
            ComboOutcome::Agrees { worst, bound }
        } else {
            ComboOutcome::Deviates { worst, bound, at }
        };
        self.results.push(ComboResult {
            label: label.to_string(),
            outcome,
        });
    }

    /// Compares two force sets component-wise under an absolute bound —
    /// the newton3 on/off parity check, where the summation order is the
    /// only difference and near-machine agreement is expected.
    pub fn record_parity(
        &mut self,
        label: &str,
        with: &[[f64; 3]],
        without: &[[f64; 3]],
        bound: f64,
    ) {
        let mut worst = 0.0f64;
        let mut at = (0usize, 0usize);
        for (i, (a, b)) in with.iter().zip(without.iter()).enumerate() {
            for d in 0..3 {
                let diff = (a[d] - b[d]).abs();
                if diff > worst {
                    worst = diff;
                    at = (i, d);
                }
            }
        }
        let outcome = if worst < bound && with.len() == without.len() {
            ComboOutcome::Agrees { worst, bound }
        } else {
            ComboOutcome::Deviates { worst, bound, at }
        };
        self.results.push(ComboResult {
            label: label.to_string(),
            outcome,
        });
    }

    /// Records a combination that could not be run at all.
    pub fn record_failure(&mut self, label: &str, reason: &str) {
        self.results.push(ComboResult {
            label: label.to_string(),
            outcome: ComboOutcome::NotRunnable {
                reason: reason.to_string(),
            },
        });
    }

    /// Number of agreeing combinations.
    #[must_use]
    pub fn agreeing(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.agrees()).count()
    }

    /// Whether every combination agreed.
    #[must_use]
    pub fn all_agree(&self) -> bool {
        self.results.iter().all(|r| r.outcome.agrees())
    }

    /// The accumulated results.
    #[must_use]
    pub fn results(&self) -> &[ComboResult] {
        &self.results
    }

    /// Renders the summary.
    #[must_use]
    pub fn render(&self) -> String {
        use std::fmt::Write;
        let mut s = String::new();
        let _ = writeln!(
            s,
            "force equivalence [{}]: {}/{} combinations agree",
            self.scenario,
            self.agreeing(),
            self.results.len()
        );
        for result in &self.results {
            match &result.outcome {
                ComboOutcome::Agrees { worst, bound } => {
                    let _ = writeln!(
                        s,
                        "  ok    {:<28} worst {worst:.3e} (bound {bound:.1e})",
                        result.label
                    );
                }
                ComboOutcome::Deviates { worst, bound, at } => {
                    let _ = writeln!(
                        s,
                        "  FAIL  {:<28} worst {worst:.3e} exceeds {bound:.1e} at particle {} axis {}",
                        result.label, at.0, at.1
                    );
                }
                ComboOutcome::NotRunnable { reason } => {
                    let _ = writeln!(s, "  FAIL  {:<28} not runnable: {reason}", result.label);
                }
            }
        }
        s
    }

    /// Prints the summary and exits 0 (all agree) or 1.
    pub fn finish(&self) -> ! {
        println!();
        print!("{}", self.render());
        if self.all_agree() {
            println!("EQUIVALENCE HOLDS");
            process::exit(0);
        }
        let failing: Vec<&str> = self
            .results
            .iter()
            .filter(|r| !r.outcome.agrees())
            .map(|r| r.label.as_str())
            .collect();
        println!("EQUIVALENCE BROKEN BY: {}", failing.join(", "));
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_forces_agree() {
        let mut report = EquivalenceReport::new("test");
        let reference = vec![[1.0, -2.0, 0.5]; 3];
        report.record_forces("exact", &reference, &reference, 1e-10);
        assert!(report.all_agree());
        let ComboOutcome::Agrees { worst, .. } = &report.results()[0].outcome else {
            panic!("identical forces must agree");
        };
        assert_eq!(*worst, 0.0);
    }

    #[test]
    fn deviation_is_located() {
        let mut report = EquivalenceReport::new("test");
        let reference = vec![[1.0, 1.0, 1.0], [1.0, 1.0, 1.0]];
        let mut observed = reference.clone();
        observed[1][2] = 1.5;
        report.record_forces("off", &reference, &observed, 1e-10);
        let ComboOutcome::Deviates { worst, at, .. } = &report.results()[0].outcome else {
            panic!("a 50% deviation must be flagged");
        };
        assert!((*worst - 0.5).abs() < 1e-12);
        assert_eq!(*at, (1, 2));
        assert!(!report.all_agree());
    }

    #[test]
    fn near_zero_components_use_the_floor() {
        let mut report = EquivalenceReport::new("test");
        // reference ~0: a 1e-14 difference is harmless, not a huge
        // relative error
        let reference = vec![[0.0, 1.0, 0.0]];
        let observed = vec![[1e-14, 1.0, 0.0]];
        report.record_forces("transverse", &reference, &observed, 1e-10);
        assert!(report.all_agree(), "floor absorbs sub-floor noise");
    }

    #[test]
    fn parity_uses_absolute_bound() {
        let mut report = EquivalenceReport::new("test");
        let a = vec![[1e6, 0.0, 0.0]];
        let b = vec![[1e6 + 1e-14, 0.0, 0.0]];
        report.record_parity("n3", &a, &b, 1e-13);
        assert!(report.all_agree(), "large magnitudes, tiny absolute diff");
        report.record_parity("n3-broken", &a, &[[1e6 + 1.0, 0.0, 0.0]], 1e-13);
        assert!(!report.all_agree());
    }

    #[test]
    fn count_mismatch_and_failures_break_equivalence() {
        let mut report = EquivalenceReport::new("test");
        report.record_forces("short", &[[0.0; 3]; 2], &[[0.0; 3]; 1], 1e-10);
        report.record_failure("refused", "sliced needs more layers");
        assert_eq!(report.agreeing(), 0);
        let rendered = report.render();
        assert!(rendered.contains("0/2"));
        assert!(rendered.contains("count mismatch"));
        assert!(rendered.contains("not runnable: sliced needs more layers"));
    }

    #[test]
    fn render_names_scenario_and_combos() {
        let mut report = EquivalenceReport::new("lattice_100");
        report.record_forces("lc/c08/aos/n3", &[[1.0; 3]], &[[1.0; 3]], 1e-10);
        let rendered = report.render();
        assert!(rendered.contains("lattice_100"));
        assert!(rendered.contains("lc/c08/aos/n3"));
        assert!(rendered.contains("1/1"));
    }
}
