//! Outcome taxonomy for every call that leaves the process.
//!
//! The translator and the cache never fail; only the backend and the
//! write workflow produce these.

use serde_json::Value;
use thiserror::Error;

/// Classified failure of a query or write call.
///
/// `Clone` because one fetch outcome fans out to every request coalesced onto it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Transport error or a non-2xx status with no more specific meaning.
    /// Nothing was cached and nothing is retried.
    #[error("network failure{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    NetworkFailure { status: Option<u16>, message: String },

    /// Session is missing or expired. Surfaced to the session layer, never retried.
    #[error("unauthenticated")]
    Unauthorized,

    /// Delete refused because other records still reference the subject.
    #[error("conflict {code}: {message} ({ref_count} references)")]
    Conflict { code: String, message: String, ref_count: u64 },

    /// Server rejected a write body. `message` and `details` are the server's own words.
    #[error("rejected by server (HTTP {status}): {message}")]
    ValidationRejected { status: u16, message: String, details: Option<Value> },
}

impl ClientError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFailure { status: None, message: message.into() }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Number of blocking references, when this is a reference conflict.
    pub fn conflict_ref_count(&self) -> Option<u64> {
        match self {
            Self::Conflict { ref_count, .. } => Some(*ref_count),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        Self::NetworkFailure {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_status_when_known() {
        let err = ClientError::NetworkFailure { status: Some(503), message: "unavailable".into() };
        assert_eq!(err.to_string(), "network failure (HTTP 503): unavailable");
        assert_eq!(ClientError::network("reset").to_string(), "network failure: reset");
    }

    #[test]
    fn conflict_accessors() {
        let err = ClientError::Conflict {
            code: "FK_CONSTRAINT".into(),
            message: "referenced".into(),
            ref_count: 3,
        };
        assert_eq!(err.conflict_ref_count(), Some(3));
        assert!(!err.is_unauthorized());
        assert!(ClientError::Unauthorized.is_unauthorized());
    }
}
