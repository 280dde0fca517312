//! Topology-aware routing for the docdb client
//!
//! Two subsystems live here:
//! - The **global endpoint manager**: per-region read/write endpoints,
//!   health-based failover, and a background topology refresh.
//! - The **partition routing cache**: collection metadata and
//!   partition-key-range mappings, refreshed on staleness.
//!
//! # Modules
//!
//! - [`endpoint`]: regional endpoint model
//! - [`directory`]: ordered endpoint directory with health state
//! - [`manager`]: global endpoint manager
//! - [`range`]: partition key ranges over the hash space
//! - [`routing_cache`]: partition routing cache

pub mod directory;
pub mod endpoint;
pub mod manager;
pub mod range;
pub mod routing_cache;

// Re-exports
pub use directory::EndpointDirectory;
pub use endpoint::{Endpoint, EndpointRole};
pub use manager::{GlobalEndpointManager, LocationConfig};
pub use range::{
    covers_full_space, PartitionKeyRange, QueryRange, FULL_RANGE_MAX, FULL_RANGE_MIN,
};
pub use routing_cache::{CollectionRoutingEntry, PartitionRoutingCache};
