//! Error taxonomy for the detection pipeline
//!
//! Disabled configuration and insufficient history are sentinel results,
//! not errors; only genuine failures surface here. Persistence failures
//! inside detection must propagate so a store outage never turns into a
//! silent "no anomaly" verdict.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = PulseError> = std::result::Result<T, E>;

/// Building a baseline from zero valid points.
///
/// This is a caller mistake (empty or fully-filtered input), not a
/// transient condition, so it is returned as a dedicated type the caller
/// has to handle rather than retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot build a baseline from an empty sample set")]
pub struct EmptyInputError;

/// Failures raised by a persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failed (snapshot files, sockets, ...).
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized or deserialized.
    #[error("store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend rejected the call or is unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Top-level error type for detection, scoring and alerting operations.
#[derive(Debug, Error)]
pub enum PulseError {
    /// Baseline construction received no usable data points.
    #[error(transparent)]
    EmptyBaselineInput(#[from] EmptyInputError),

    /// A persistence call failed; the surrounding operation was aborted.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An update or acknowledgement referenced an unknown record.
    /// The operation is a no-op; state is unchanged.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record category ("anomaly", "alert", ...).
        kind: &'static str,
        /// The id that failed to resolve.
        id: String,
    },

    /// A configuration value is structurally invalid (distinct from a
    /// disabled config, which short-circuits with a sentinel result).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PulseError {
    /// Shorthand for a [`PulseError::NotFound`] on a given record kind.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_message_is_stable() {
        let msg = EmptyInputError.to_string();
        assert!(msg.contains("empty sample set"));
    }

    #[test]
    fn not_found_reports_kind_and_id() {
        let err = PulseError::not_found("anomaly", "anomaly-pass_rate-42");
        assert_eq!(err.to_string(), "anomaly not found: anomaly-pass_rate-42");
    }

    #[test]
    fn store_error_wraps_into_pulse_error() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: PulseError = StoreError::from(io).into();
        assert!(matches!(err, PulseError::Store(_)));
    }
}
