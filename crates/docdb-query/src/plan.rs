//! Query plan model and plan cache

use crate::features::SupportedFeatures;
use ahash::AHasher;
use docdb_core::PartitionKeyDefinition;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A query with optional named parameters, as sent to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Query text
    pub query: String,
    /// Named parameters
    #[serde(default)]
    pub parameters: Vec<QueryParameter>,
}

impl QuerySpec {
    /// Create a parameterless query
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            parameters: Vec::new(),
        }
    }

    /// Add a named parameter
    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.push(QueryParameter {
            name: name.into(),
            value,
        });
        self
    }
}

/// One named query parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryParameter {
    /// Parameter name, e.g. `@customerId`
    pub name: String,
    /// Parameter value
    pub value: serde_json::Value,
}

/// Execution hints for a query, produced by the plan generator or the
/// gateway. Immutable once retrieved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Feature bitmask the plan was negotiated against
    pub features: SupportedFeatures,
    /// Backend-specific execution hints: ordering requirements,
    /// aggregate/group-by shape, rewritten query
    pub partitioned_query_info: serde_json::Value,
}

impl QueryPlan {
    /// Create a plan from its negotiated features and backend hints
    pub fn new(features: SupportedFeatures, partitioned_query_info: serde_json::Value) -> Self {
        Self {
            features,
            partitioned_query_info,
        }
    }
}

/// Key identifying a reusable plan: query text, partition key
/// definition, and the advertised feature bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlanCacheKey {
    query_hash: u64,
    definition_hash: u64,
    feature_bits: u64,
}

impl PlanCacheKey {
    /// Derive a key from the plan request inputs
    pub fn new(
        query: &str,
        definition: &PartitionKeyDefinition,
        features: SupportedFeatures,
    ) -> Self {
        let mut hasher = AHasher::default();
        query.hash(&mut hasher);
        let query_hash = hasher.finish();

        let mut hasher = AHasher::default();
        definition.hash(&mut hasher);
        let definition_hash = hasher.finish();

        Self {
            query_hash,
            definition_hash,
            feature_bits: features.bits(),
        }
    }
}

/// Counters for plan cache effectiveness
#[derive(Debug, Default)]
pub struct PlanCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PlanCacheStats {
    /// Number of cache hits
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of cache misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Thread-safe LRU cache of retrieved query plans
pub struct PlanCache {
    cache: Mutex<LruCache<PlanCacheKey, Arc<QueryPlan>>>,
    stats: Arc<PlanCacheStats>,
}

impl PlanCache {
    /// Create a cache holding up to `capacity` plans
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            stats: Arc::new(PlanCacheStats::default()),
        }
    }

    /// Look up a cached plan
    pub fn get(&self, key: &PlanCacheKey) -> Option<Arc<QueryPlan>> {
        let result = self.cache.lock().get(key).cloned();
        match result {
            Some(plan) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(plan)
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a retrieved plan
    pub fn put(&self, key: PlanCacheKey, plan: Arc<QueryPlan>) {
        self.cache.lock().put(key, plan);
    }

    /// Cache statistics
    pub fn stats(&self) -> Arc<PlanCacheStats> {
        Arc::clone(&self.stats)
    }

    /// Number of cached plans
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}
