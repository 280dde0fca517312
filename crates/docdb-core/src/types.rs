//! Core types for request routing

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of operation a request performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    /// Point read of a single resource
    Read,
    /// Create, replace, upsert, or delete
    Write,
    /// Document query against one partition
    Query,
    /// Query-plan request against the gateway
    QueryPlan,
    /// Feed read (change feed, range enumeration)
    ReadFeed,
}

impl OperationType {
    /// Whether this operation mutates backend state
    pub fn is_write(&self) -> bool {
        matches!(self, OperationType::Write)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Read => write!(f, "Read"),
            OperationType::Write => write!(f, "Write"),
            OperationType::Query => write!(f, "Query"),
            OperationType::QueryPlan => write!(f, "QueryPlan"),
            OperationType::ReadFeed => write!(f, "ReadFeed"),
        }
    }
}

/// Kind of resource a request addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    /// A document within a collection
    Document,
    /// A document collection
    Collection,
    /// Partition key range metadata
    PartitionKeyRange,
    /// The database account itself
    DatabaseAccount,
}

impl ResourceType {
    /// JSON property name under which the backend returns elements of
    /// this resource type in a feed/query response
    pub fn response_property(&self) -> &'static str {
        match self {
            ResourceType::Document => "Documents",
            ResourceType::Collection => "DocumentCollections",
            ResourceType::PartitionKeyRange => "PartitionKeyRanges",
            ResourceType::DatabaseAccount => "DatabaseAccounts",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Document => write!(f, "Document"),
            ResourceType::Collection => write!(f, "Collection"),
            ResourceType::PartitionKeyRange => write!(f, "PartitionKeyRange"),
            ResourceType::DatabaseAccount => write!(f, "DatabaseAccount"),
        }
    }
}

/// Server-assigned identifier correlating one request/response pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub Uuid);

impl ActivityId {
    /// Create a new random activity ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a header value, if well-formed
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for ActivityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-assigned identifier correlating all requests of one logical
/// operation (a query and all of its page requests share one)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Create a new random correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "corr-{}", &self.0.to_string()[..8])
    }
}

/// Routing-relevant facts about one request
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Resource the request addresses
    pub resource_type: ResourceType,
    /// Operation kind
    pub operation_type: OperationType,
    /// Self link or name link of the target resource
    pub resource_link: String,
    /// Preferred region, if the caller pinned one
    pub region_hint: Option<String>,
    /// Endpoints already tried and failed for this logical operation
    pub excluded_endpoints: Vec<String>,
}

impl RequestContext {
    /// Create a request context with no hints
    pub fn new(
        resource_type: ResourceType,
        operation_type: OperationType,
        resource_link: impl Into<String>,
    ) -> Self {
        Self {
            resource_type,
            operation_type,
            resource_link: resource_link.into(),
            region_hint: None,
            excluded_endpoints: Vec::new(),
        }
    }

    /// Pin the request to a preferred region
    pub fn with_region_hint(mut self, region: impl Into<String>) -> Self {
        self.region_hint = Some(region.into());
        self
    }

    /// Exclude an endpoint the caller has already failed against
    pub fn with_excluded_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.excluded_endpoints.push(endpoint.into());
        self
    }
}

/// Whether a resource link addresses the resource by immutable id or
/// by name. Name links can silently re-bind to a different resource
/// after a drop/recreate, so staleness handling differs.
pub fn is_name_link(link: &str) -> bool {
    // Self links are built from server-assigned rids, which are
    // base64-ish tokens; name links carry user-visible names. The
    // backend convention: self links always end with a trailing slash.
    !link.ends_with('/')
}
