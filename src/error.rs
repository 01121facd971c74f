use thiserror::Error;

/// Errors surfaced by estimators, calibrators and their configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A mutator or a re-entrant run was attempted while a run is in progress.
    #[error("estimator is locked while a run is in progress")]
    Locked,
    /// Readiness preconditions are not met.
    #[error("estimator is not ready: {0}")]
    NotReady(String),
    /// A configuration value or an input is out of its valid range.
    #[error("invalid value for `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },
    /// An input collection does not have the expected size.
    #[error("{what}: expected {expected} elements, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// No trial produced a usable candidate.
    #[error("robust estimation failed after {iterations} iterations")]
    EstimationFailed { iterations: usize },
    /// Non-linear refinement did not converge or hit a singular system.
    #[error("refinement failed: {0}")]
    Refinement(String),
}

impl Error {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn messages_name_the_offending_field() {
        let err = Error::invalid("confidence", "must be within (0, 1), got 1.5");
        assert_eq!(
            err.to_string(),
            "invalid value for `confidence`: must be within (0, 1), got 1.5"
        );

        let err = Error::DimensionMismatch {
            what: "quality scores",
            expected: 10,
            actual: 4,
        };
        assert_eq!(err.to_string(), "quality scores: expected 10 elements, got 4");
    }
}
