//! Typed errors for the numbering library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match on
//! the failure kind, e.g. retry the whole transaction on [`NumberingError::LockTimeout`].

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while numbering pending entities.
///
/// None of these are retried inside the library. A failed save must be rolled
/// back by the caller; no partially numbered entity is ever committed.
#[derive(Debug, Error)]
pub enum NumberingError {
    /// The exclusive scope lock was not granted in time, or the database
    /// aborted the wait to break a deadlock.
    #[error("timed out after {timeout:?} waiting for numbering lock on {scope_key}")]
    LockTimeout { scope_key: String, timeout: Duration },

    /// A store, probe or lock statement failed.
    #[error("data access error: {0}")]
    DataAccess(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A rule does not fit the entity it was applied to, or is invalid.
    #[error("misconfigured numbering rule for {entity_type}.{field}: {reason}")]
    MisconfiguredRule {
        entity_type: String,
        field: String,
        reason: String,
    },

    /// Every candidate within the attempt budget was already taken.
    #[error("no unique number for {scope_key} after {attempts} attempts")]
    RetryLimitExceeded { scope_key: String, attempts: u32 },

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl NumberingError {
    pub(crate) fn misconfigured(
        entity_type: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MisconfiguredRule {
            entity_type: entity_type.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the whole transaction from scratch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for NumberingError {
    fn from(e: sqlx::Error) -> Self {
        Self::DataAccess(Box::new(e))
    }
}

/// Result type alias for numbering operations.
pub type Result<T> = std::result::Result<T, NumberingError>;
