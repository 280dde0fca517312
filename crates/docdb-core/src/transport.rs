//! Transport seam between the client core and the HTTP/TCP layer
//!
//! The core never talks to the network directly; it hands fully
//! routed requests to a [`TransportClient`] and interprets the raw
//! response it gets back.

use crate::error::{DocDbError, Result};
use crate::types::{ActivityId, OperationType, ResourceType};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Well-known request and response header names
pub mod headers {
    pub const ACTIVITY_ID: &str = "x-ms-activity-id";
    pub const CORRELATION_ID: &str = "x-ms-correlation-id";
    pub const REQUEST_CHARGE: &str = "x-ms-request-charge";
    pub const SUB_STATUS: &str = "x-ms-substatus";
    pub const CONTINUATION: &str = "x-ms-continuation";
    pub const PAGE_SIZE: &str = "x-ms-max-item-count";
    pub const IS_QUERY: &str = "x-ms-documentdb-isquery";
    pub const PARTITION_KEY_RANGE_ID: &str = "x-ms-documentdb-partitionkeyrangeid";
    pub const QUERY_METRICS: &str = "x-ms-documentdb-query-metrics";
    pub const QUERY_EXECUTION_INFO: &str = "x-ms-cosmos-query-execution-info";
    pub const SUPPORTED_QUERY_FEATURES: &str = "x-ms-cosmos-supported-query-features";
    pub const QUERY_VERSION: &str = "x-ms-cosmos-query-version";
    pub const IS_QUERY_PLAN_REQUEST: &str = "x-ms-cosmos-is-query-plan-request";
}

/// Raw response handed back by the transport collaborator
#[derive(Debug)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers, lower-cased names
    pub headers: HashMap<String, String>,
    /// Response body
    pub body: Bytes,
    /// Query execution info blob, deserialized at most once
    execution_info: OnceLock<Option<serde_json::Value>>,
}

impl TransportResponse {
    /// Create a response from its parts
    pub fn new(status: u16, headers: HashMap<String, String>, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            execution_info: OnceLock::new(),
        }
    }

    /// Whether the status code indicates success
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Request charge reported by the backend, zero if absent
    pub fn request_charge(&self) -> f64 {
        self.headers
            .get(headers::REQUEST_CHARGE)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0)
    }

    /// Backend sub-status code, zero if absent
    pub fn sub_status(&self) -> u32 {
        self.headers
            .get(headers::SUB_STATUS)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Server-assigned activity id, a fresh one if the header is missing
    pub fn activity_id(&self) -> ActivityId {
        self.headers
            .get(headers::ACTIVITY_ID)
            .and_then(|v| ActivityId::parse(v))
            .unwrap_or_default()
    }

    /// Continuation token for the next page, if any. Opaque: returned
    /// byte-for-byte as the backend sent it.
    pub fn continuation(&self) -> Option<&str> {
        self.headers
            .get(headers::CONTINUATION)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Raw query-metrics text blob, if the backend attached one
    pub fn query_metrics(&self) -> Option<&str> {
        self.headers.get(headers::QUERY_METRICS).map(String::as_str)
    }

    /// Query execution info, lazily deserialized on first access.
    /// Malformed blobs yield `None`; the header is diagnostic only.
    pub fn query_execution_info(&self) -> Option<&serde_json::Value> {
        self.execution_info
            .get_or_init(|| {
                self.headers
                    .get(headers::QUERY_EXECUTION_INFO)
                    .and_then(|v| serde_json::from_str(v).ok())
            })
            .as_ref()
    }

    /// Translate a non-success response into a typed backend error
    pub fn into_backend_error(self) -> DocDbError {
        let message = String::from_utf8_lossy(&self.body).into_owned();
        DocDbError::backend(
            self.status,
            self.sub_status(),
            self.activity_id(),
            self.request_charge(),
            message,
        )
    }
}

/// Executes a routed request against a concrete endpoint.
///
/// Implementations own connection pooling, TLS, timeouts, and
/// auth-token attachment. A timeout surfaces as a `Transport` error
/// and feeds the endpoint manager's mark-unavailable path.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Send a request and return the raw response
    async fn send(
        &self,
        endpoint: &str,
        resource_type: ResourceType,
        operation_type: OperationType,
        headers: HashMap<String, String>,
        body: Bytes,
    ) -> Result<TransportResponse>;
}
