//! Error types for the MSF estimator.

use thiserror::Error;

/// Per-cycle filter failures. None of these are fatal; the caller logs
/// and carries on with the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum FilterError {
    /// `predict` was asked to go back in time.
    #[error("out-of-order prediction: requested {requested_us} us, last prediction at {last_us} us")]
    InvalidTimestamp { last_us: u64, requested_us: u64 },

    /// Innovation covariance could not be inverted within tolerance.
    #[error("singular innovation covariance (condition estimate {condition:e})")]
    SingularCovariance { condition: f64 },

    /// Attitude sample not on the unit circle.
    #[error("attitude measurement is not unit norm (|q| = {norm})")]
    InvalidMeasurement { norm: f64 },
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

