//! Error types for the flyrec reconciliation system.
//!
//! Reconciler operations report problems through
//! [`Diagnostics`](crate::resources::Diagnostics) rather than `Result`; the
//! types here cover everything around them: configuration, tracked state,
//! API client construction, planning and execution.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for flyrec.
#[derive(Debug, Error)]
pub enum FlyrecError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Tracked state errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Fly API errors outside of a reconciler operation.
    #[error("Fly API error: {0}")]
    Api(#[from] ApiError),

    /// Planning and execution errors.
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// No API token could be found.
    #[error("Missing Fly API token: set {env_var} or log in with flyctl")]
    MissingToken {
        /// Environment variable that was checked.
        env_var: String,
    },
}

/// Tracked state errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Fly API errors raised while building or using clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP client construction failed.
    #[error("Failed to build HTTP client: {message}")]
    ClientBuild {
        /// Description of the failure.
        message: String,
    },

    /// Authentication failed.
    #[error("Fly authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// Rate limited.
    #[error("Fly API rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Network error.
    #[error("Network error communicating with Fly: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Non-success HTTP status.
    #[error("Fly API request failed: {status} - {message}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Response body or message.
        message: String,
    },

    /// Invalid response from API.
    #[error("Invalid response from Fly API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Planning and execution errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The manifest references an application that is neither declared nor tracked.
    #[error("{address} references unknown app '{app}'")]
    UnknownApp {
        /// Address of the referencing resource.
        address: String,
        /// The missing application name.
        app: String,
    },

    /// Execution stopped after failed actions.
    #[error("Apply failed: {failed} of {total} actions failed")]
    ApplyFailed {
        /// Number of failed actions.
        failed: usize,
        /// Number of actions in the plan.
        total: usize,
    },

    /// The user or a guard aborted the run.
    #[error("Aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for flyrec operations.
pub type Result<T> = std::result::Result<T, FlyrecError>;

impl FlyrecError {
    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Api(ApiError::RateLimited { .. } | ApiError::NetworkError { .. })
                | Self::State(StateError::LockFailed { .. })
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Api(ApiError::RateLimited { retry_after_secs }) => Some(*retry_after_secs),
            Self::Api(ApiError::NetworkError { .. }) => Some(5),
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl ApiError {
    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        let rate_limited = FlyrecError::Api(ApiError::RateLimited { retry_after_secs: 7 });
        assert!(rate_limited.is_retryable());
        assert_eq!(rate_limited.retry_delay_secs(), Some(7));

        let network = FlyrecError::Api(ApiError::network("reset by peer"));
        assert!(network.is_retryable());
        assert_eq!(network.retry_delay_secs(), Some(5));

        let auth = FlyrecError::Api(ApiError::AuthenticationFailed {
            message: String::from("bad token"),
        });
        assert!(!auth.is_retryable());
        assert_eq!(auth.retry_delay_secs(), None);
    }

    #[test]
    fn test_errors_carry_their_source_prefix() {
        let state: FlyrecError = StateError::VersionMismatch {
            expected: String::from("1.0"),
            found: String::from("0.9"),
        }
        .into();
        assert!(state.to_string().starts_with("State error: "));

        let plan: FlyrecError = PlanError::Aborted {
            reason: String::from("already tracked"),
        }
        .into();
        assert!(plan.to_string().starts_with("Plan error: "));

        let io: FlyrecError = std::io::Error::other("disk full").into();
        assert!(io.to_string().starts_with("IO error: "));
    }
}
