// SPDX-License-Identifier: AGPL-3.0-only

//! Typed errors for engine configuration and container operations.
//!
//! Replaces `Result<_, String>` in public APIs with a proper enum so callers
//! can pattern-match on failure modes (unsatisfiable search space, rejected
//! configurations, caller bugs) rather than parsing opaque strings.
//!
//! Classification follows the engine's error design: configuration errors
//! are fatal at init time; applicability errors are only fatal when every
//! candidate in the search space is rejected; invariant violations indicate
//! a caller bug and are always fatal. Stale neighbor lists are not errors —
//! they are detected by the skin check and recovered by a rebuild.

use std::fmt;

/// Errors arising from engine configuration, tuning, or container misuse.
#[derive(Debug, Clone)]
pub enum ShoalError {
    /// Contradictory or empty configuration detected at init time
    /// (e.g. an empty search space, skin < 0, boxMax ≤ boxMin).
    Configuration(String),

    /// Every candidate configuration was rejected at run time. Carries one
    /// `(configuration, reason)` pair per rejected candidate.
    NoApplicableConfiguration(Vec<(String, String)>),

    /// A caller violated a container invariant (particle added outside the
    /// allowed region in strict mode, tower index out of range, deletion of
    /// an unowned particle).
    InvalidArgument(String),
}

impl fmt::Display for ShoalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "Invalid engine configuration: {msg}"),
            Self::NoApplicableConfiguration(rejected) => {
                write!(
                    f,
                    "No applicable configuration in the search space; rejected {}: ",
                    rejected.len()
                )?;
                for (i, (conf, reason)) in rejected.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{conf} ({reason})")?;
                }
                Ok(())
            }
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
        }
    }
}

impl std::error::Error for ShoalError {}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ShoalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_configuration() {
        let err = ShoalError::Configuration("skin must be positive".into());
        assert_eq!(
            err.to_string(),
            "Invalid engine configuration: skin must be positive"
        );
    }

    #[test]
    fn display_no_applicable_lists_rejections() {
        let err = ShoalError::NoApplicableConfiguration(vec![
            ("lc_c08".into(), "needs newton3".into()),
            ("sliced".into(), "fewer layers than threads".into()),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("rejected 2"));
        assert!(msg.contains("lc_c08 (needs newton3)"));
        assert!(msg.contains("sliced (fewer layers than threads)"));
    }

    #[test]
    fn display_invalid_argument() {
        let err = ShoalError::InvalidArgument("tower index 7 out of range".into());
        assert!(err.to_string().contains("tower index 7"));
    }

    #[test]
    fn error_trait_works() {
        let err = ShoalError::Configuration("x".into());
        let dyn_err: &dyn std::error::Error = &err;
        assert!(dyn_err.to_string().contains("Invalid engine configuration"));
    }
}
