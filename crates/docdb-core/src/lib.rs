//! Core types for the docdb client
//!
//! This crate holds the pieces every other client crate depends on:
//! the error taxonomy, request/resource classification, identifier
//! newtypes, and the collaborator seams (transport, account metadata,
//! routing metadata).

pub mod cancel;
pub mod error;
pub mod metadata;
pub mod transport;
pub mod types;

// Re-exports
pub use cancel::CancelFlag;
pub use error::{DocDbError, Result};
pub use metadata::{
    AccountMetadataSource, AccountTopology, CollectionProperties, PartitionKeyDefinition,
    PartitionKeyKind, PartitionKeyRangeProperties, RegionalEndpoint, RoutingMetadataSource,
};
pub use transport::{headers, TransportClient, TransportResponse};
pub use types::{
    is_name_link, ActivityId, CorrelationId, OperationType, RequestContext, ResourceType,
};
