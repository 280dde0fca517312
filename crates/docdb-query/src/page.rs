//! Query page model
//!
//! One page of results from one partition, plus the continuation
//! state needed to fetch the next.

use docdb_core::ActivityId;
use serde::{Deserialize, Serialize};

/// Continuation state for one partition's result stream.
///
/// The token is opaque: it is stored and resubmitted byte-for-byte,
/// never inspected or mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContinuation {
    /// Opaque cursor identifying where the stream resumes
    pub token: String,
    /// Partition key range the token belongs to
    pub partition_range_id: String,
}

/// Backend/client execution-shape metadata accompanying a response.
///
/// Carried through for downstream operators; the backend/client split
/// is an extension point and nothing in the core consumes it yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionPlan {
    /// Backend-side plan fragment
    pub backend_plan: Option<serde_json::Value>,
    /// Client-side plan fragment
    pub client_plan: Option<serde_json::Value>,
}

/// One page of query results from one partition
#[derive(Debug, Clone)]
pub struct QueryPage {
    /// Result elements, in backend order
    pub items: Vec<serde_json::Value>,
    /// Request charge for producing this page
    pub request_charge: f64,
    /// Server-assigned activity id of the page request
    pub activity_id: ActivityId,
    /// Continuation for the next page; `None` marks the partition's
    /// stream exhausted
    pub continuation: Option<PageContinuation>,
    /// Distribution plan fragment, if the backend attached one
    pub distribution_plan: Option<DistributionPlan>,
    /// Whether the backend emitted results incrementally
    pub streaming: Option<bool>,
    /// Raw query-metrics text blob, if attached
    pub query_metrics: Option<String>,
}

impl QueryPage {
    /// Whether more pages exist for this partition
    pub fn has_more(&self) -> bool {
        self.continuation.is_some()
    }

    /// Number of result elements on the page
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the page holds no elements (an empty page can still
    /// carry a continuation)
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_page_can_continue() {
        let page = QueryPage {
            items: vec![],
            request_charge: 1.0,
            activity_id: ActivityId::new(),
            continuation: Some(PageContinuation {
                token: "+RID:abc#RT:2".into(),
                partition_range_id: "0".into(),
            }),
            distribution_plan: None,
            streaming: None,
            query_metrics: None,
        };
        assert!(page.is_empty());
        assert!(page.has_more());
    }
}
