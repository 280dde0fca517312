//! Error types shared across the client core

use crate::types::ActivityId;
use thiserror::Error;

/// Errors produced by the routing and query-execution core
#[derive(Error, Debug)]
pub enum DocDbError {
    /// Caller violated an argument contract; never retried
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// Cached routing state no longer reflects backend topology.
    /// The caller is expected to retry once with a forced refresh.
    #[error("Stale routing cache for {resource}; retry with forced refresh")]
    StaleCache { resource: String },

    /// Resource genuinely does not exist (distinct from staleness)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Transport-level failure against a specific endpoint
    #[error("Transport failure against {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// Backend rejected the request with a non-success status
    #[error("Backend request failed: status {status}, sub-status {sub_status}, activity {activity_id}: {message}")]
    Backend {
        status: u16,
        sub_status: u32,
        activity_id: ActivityId,
        request_charge: f64,
        message: String,
    },

    /// Backend payload violated the parse contract; resubmission
    /// would reproduce it, so never retried
    #[error("Response parse contract violation: {0}")]
    ParseContract(String),

    /// Serialization of a request payload or plan failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No endpoint in the directory can serve the request
    #[error("No endpoints available for {0}")]
    NoEndpointsAvailable(String),

    /// Operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,
}

impl DocDbError {
    /// Staleness errors are retryable exactly once with a forced refresh
    pub fn is_retryable_staleness(&self) -> bool {
        matches!(self, DocDbError::StaleCache { .. })
    }

    /// Endpoint-level failures feed the endpoint manager's
    /// mark-unavailable path and are retried against the next
    /// preference by the caller
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(self, DocDbError::Transport { .. })
    }

    /// Build a backend error from response parts
    pub fn backend(
        status: u16,
        sub_status: u32,
        activity_id: ActivityId,
        request_charge: f64,
        message: impl Into<String>,
    ) -> Self {
        DocDbError::Backend {
            status,
            sub_status,
            activity_id,
            request_charge,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for DocDbError {
    fn from(err: serde_json::Error) -> Self {
        DocDbError::Serialization(err.to_string())
    }
}

/// Result type for client core operations
pub type Result<T> = std::result::Result<T, DocDbError>;
