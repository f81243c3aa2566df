// SPDX-License-Identifier: AGPL-3.0-only

//! Logging wrapper for tuning strategies.
//!
//! Wraps any strategy and appends one structured entry per call, so a
//! tuning run can be dumped as JSON lines and replayed for post-hoc
//! analysis without rerunning the simulation.

use serde::{Deserialize, Serialize};

use crate::tuning::configuration::Configuration;
use crate::tuning::TuningStrategy;

/// One recorded strategy interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "kebab-case")]
pub enum TuningLogEntry {
    /// A phase started over the given candidates.
    Reset {
        /// Display forms of the candidates.
        candidates: Vec<String>,
    },
    /// A reduced sample was recorded.
    Evidence {
        /// Candidate index within the phase.
        candidate: usize,
        /// Display form of the candidate.
        configuration: String,
        /// Reduced time in nanoseconds.
        time_ns: u64,
    },
    /// A phase completed with this winner.
    Optimum {
        /// Winning candidate index.
        candidate: usize,
        /// Display form of the winner.
        configuration: String,
    },
}

/// A strategy that logs every call before delegating.
pub struct LoggingStrategy {
    inner: Box<dyn TuningStrategy>,
    entries: Vec<TuningLogEntry>,
    candidates: Vec<String>,
}

impl LoggingStrategy {
    /// Wraps a strategy.
    #[must_use]
    pub fn new(inner: Box<dyn TuningStrategy>) -> Self {
        Self {
            inner,
            entries: Vec::new(),
            candidates: Vec::new(),
        }
    }

    /// The recorded entries, in call order.
    #[must_use]
    pub fn entries(&self) -> &[TuningLogEntry] {
        &self.entries
    }

    /// Serializes the log as JSON lines.
    ///
    /// # Errors
    ///
    /// Propagates `serde_json` serialization failures.
    pub fn to_json_lines(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Parses a JSON-lines log back into entries.
    ///
    /// # Errors
    ///
    /// Propagates `serde_json` parse failures.
    pub fn parse_json_lines(text: &str) -> serde_json::Result<Vec<TuningLogEntry>> {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect()
    }
}

impl TuningStrategy for LoggingStrategy {
    fn name(&self) -> &'static str {
        "logged"
    }

    fn reset(&mut self, candidates: &[Configuration]) {
        self.candidates = candidates.iter().map(ToString::to_string).collect();
        self.entries.push(TuningLogEntry::Reset {
            candidates: self.candidates.clone(),
        });
        self.inner.reset(candidates);
    }

    fn current(&self) -> usize {
        self.inner.current()
    }

    fn add_evidence(&mut self, time: u64) -> bool {
        let candidate = self.inner.current();
        self.entries.push(TuningLogEntry::Evidence {
            candidate,
            configuration: self.candidates.get(candidate).cloned().unwrap_or_default(),
            time_ns: time,
        });
        let more = self.inner.add_evidence(time);
        if !more {
            let optimum = self.inner.optimum();
            self.entries.push(TuningLogEntry::Optimum {
                candidate: optimum,
                configuration: self.candidates.get(optimum).cloned().unwrap_or_default(),
            });
        }
        more
    }

    fn optimum(&self) -> usize {
        self.inner.optimum()
    }
}
