//! Error types for pose-fitting operations.

use thiserror::Error;

/// Errors that can occur while building models or solving for poses.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PosefitError {
    /// Invalid body ID referenced.
    #[error("invalid body ID: {0}")]
    InvalidBodyId(u64),

    /// Invalid marker ID referenced.
    #[error("invalid marker ID: {0}")]
    InvalidMarkerId(u64),

    /// Invalid connector ID referenced.
    #[error("invalid connector ID: {0}")]
    InvalidConnectorId(u64),

    /// A solver was constructed with no markers to track.
    #[error("marker set is empty")]
    EmptyMarkerSet,

    /// A marker cannot participate in a solve.
    #[error("invalid marker: {reason}")]
    InvalidMarker {
        /// Description of what's wrong with the marker.
        reason: String,
    },

    /// A coordinate index does not exist on the referenced connector.
    #[error("connector {connector} has no coordinate {index}")]
    InvalidCoordinate {
        /// The connector that was addressed.
        connector: u64,
        /// The out-of-range coordinate index.
        index: usize,
    },

    /// Target vector shorter than the tracked marker set requires.
    #[error("target vector too short: need {expected} values, got {actual}")]
    TargetSizeMismatch {
        /// Required length (3 per marker).
        expected: usize,
        /// Provided length.
        actual: usize,
    },

    /// Weight vector length does not match the marker count.
    #[error("weight count mismatch: expected {expected}, got {actual}")]
    WeightSizeMismatch {
        /// Number of markers.
        expected: usize,
        /// Number of weights provided.
        actual: usize,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// A saved state buffer does not match the model it is restored into.
    #[error("state buffer mismatch: {reason}")]
    StateMismatch {
        /// Description of the mismatch.
        reason: String,
    },

    /// Numeric factorization failed.
    #[error("numerical failure: {reason}")]
    Numerical {
        /// Description of what went wrong.
        reason: String,
    },
}

impl PosefitError {
    /// Create an invalid marker error.
    #[must_use]
    pub fn invalid_marker(reason: impl Into<String>) -> Self {
        Self::InvalidMarker {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a state mismatch error.
    #[must_use]
    pub fn state_mismatch(reason: impl Into<String>) -> Self {
        Self::StateMismatch {
            reason: reason.into(),
        }
    }

    /// Create a numerical failure error.
    #[must_use]
    pub fn numerical(reason: impl Into<String>) -> Self {
        Self::Numerical {
            reason: reason.into(),
        }
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. })
    }

    /// Check if this is a numerical failure.
    #[must_use]
    pub fn is_numerical(&self) -> bool {
        matches!(self, Self::Numerical { .. })
    }
}
