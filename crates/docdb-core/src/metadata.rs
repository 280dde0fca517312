//! Metadata collaborator seams
//!
//! Account topology and collection routing metadata are fetched
//! through these traits; the core never bootstraps them itself.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One region's endpoint as reported by the account topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionalEndpoint {
    /// Region name, e.g. "West US"
    pub region: String,
    /// Gateway URL for that region
    pub endpoint: String,
}

/// Current account topology as reported by the account-metadata source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountTopology {
    /// Write regions in failover-priority order; first is the current
    /// single write region when multi-write is disabled
    pub writable_regions: Vec<RegionalEndpoint>,
    /// Read regions in account preference order
    pub readable_regions: Vec<RegionalEndpoint>,
    /// Regions exposing a thin-client endpoint
    pub thin_client_regions: Vec<RegionalEndpoint>,
    /// Whether the account allows writes in every write region
    pub multi_write_enabled: bool,
}

/// Kind of the partition key (how the effective key is derived)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionKeyKind {
    /// Single hashed path
    Hash,
    /// Hierarchical multi-path key
    MultiHash,
}

/// Partition key definition of a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKeyDefinition {
    /// JSON paths making up the key, e.g. `["/customerId"]`
    pub paths: Vec<String>,
    /// Hashing scheme
    pub kind: PartitionKeyKind,
    /// Definition version (hash width)
    pub version: u32,
}

impl PartitionKeyDefinition {
    /// Single-path hash definition, the common case
    pub fn hash(path: impl Into<String>) -> Self {
        Self {
            paths: vec![path.into()],
            kind: PartitionKeyKind::Hash,
            version: 2,
        }
    }
}

/// Collection metadata relevant to routing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionProperties {
    /// Server-assigned immutable resource id
    pub rid: String,
    /// User-visible collection name
    pub name: String,
    /// Partition key definition
    pub partition_key: PartitionKeyDefinition,
    /// Vector embedding metadata, pass-through for downstream operators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_embedding_policy: Option<serde_json::Value>,
    /// Geospatial configuration, pass-through for downstream operators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geospatial_config: Option<serde_json::Value>,
}

/// A partition key range as reported by the routing metadata source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionKeyRangeProperties {
    /// Range id, unique within the collection
    pub id: String,
    /// Inclusive minimum of the effective-key range
    pub min_inclusive: String,
    /// Exclusive maximum of the effective-key range
    pub max_exclusive: String,
}

/// Fetches current account topology from the gateway
#[async_trait]
pub trait AccountMetadataSource: Send + Sync {
    /// Fetch the current region/endpoint mappings and capability flags
    async fn fetch_topology(&self) -> Result<AccountTopology>;
}

/// Fetches collection and partition-range metadata from the backend
#[async_trait]
pub trait RoutingMetadataSource: Send + Sync {
    /// Resolve a collection link (name or self link) to its properties
    async fn fetch_collection(&self, link: &str) -> Result<CollectionProperties>;

    /// Fetch the full set of ranges currently covering the collection
    async fn fetch_partition_key_ranges(
        &self,
        collection_rid: &str,
    ) -> Result<Vec<PartitionKeyRangeProperties>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_key_definition_hash() {
        let def = PartitionKeyDefinition::hash("/customerId");
        assert_eq!(def.paths, vec!["/customerId"]);
        assert_eq!(def.kind, PartitionKeyKind::Hash);
        assert_eq!(def.version, 2);
    }

    #[test]
    fn test_topology_serde_roundtrip() {
        let topology = AccountTopology {
            writable_regions: vec![RegionalEndpoint {
                region: "West US".into(),
                endpoint: "https://west.docdb.example".into(),
            }],
            readable_regions: vec![],
            thin_client_regions: vec![],
            multi_write_enabled: false,
        };
        let json = serde_json::to_string(&topology).unwrap();
        let back: AccountTopology = serde_json::from_str(&json).unwrap();
        assert_eq!(back.writable_regions.len(), 1);
        assert!(!back.multi_write_enabled);
    }
}
