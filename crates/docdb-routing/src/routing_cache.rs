//! Partition routing cache
//!
//! Maps a collection to the partition key ranges currently serving
//! it, refreshing on staleness. Concurrent misses for the same
//! collection coalesce onto a single metadata fetch.

use crate::range::{covers_full_space, PartitionKeyRange, QueryRange};
use dashmap::DashMap;
use docdb_core::{
    is_name_link, CancelFlag, CollectionProperties, DocDbError, Result, RoutingMetadataSource,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The set of ranges currently believed to cover a collection's key
/// space. Fresh entries cover the space exactly: no gaps, no overlaps.
#[derive(Debug, Clone)]
pub struct CollectionRoutingEntry {
    /// Collection resource id
    pub rid: String,
    /// Ranges sorted by minimum bound
    pub ranges: Vec<PartitionKeyRange>,
}

impl CollectionRoutingEntry {
    /// Whether this entry satisfies the freshness invariant
    pub fn is_complete(&self) -> bool {
        covers_full_space(&self.ranges)
    }
}

/// Caches collection metadata and partition-key-range mappings
pub struct PartitionRoutingCache {
    metadata: Arc<dyn RoutingMetadataSource>,
    /// rid -> routing entry; replaced wholesale on refresh
    entries: DashMap<String, Arc<CollectionRoutingEntry>>,
    /// collection link -> properties (name-to-rid indirection)
    collections: DashMap<String, Arc<CollectionProperties>>,
    /// Per-key mutual-exclusion gates so one fetch serves all
    /// concurrent missers of the same key
    gates: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl PartitionRoutingCache {
    /// Create a cache over the given metadata source
    pub fn new(metadata: Arc<dyn RoutingMetadataSource>) -> Self {
        Self {
            metadata,
            entries: DashMap::new(),
            collections: DashMap::new(),
            gates: DashMap::new(),
        }
    }

    /// All currently-cached ranges overlapping the query range.
    ///
    /// Empty is the staleness signal, not an error: the collection is
    /// not cached, or the cached view no longer covers the range.
    pub fn get_overlapping_ranges(
        &self,
        collection_rid: &str,
        query_range: &QueryRange,
    ) -> Vec<PartitionKeyRange> {
        match self.entries.get(collection_rid) {
            Some(entry) => entry
                .ranges
                .iter()
                .filter(|r| r.overlaps(query_range))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Resolve the physical partitions a set of query ranges targets.
    ///
    /// On cache miss the range set is fetched and cached. If
    /// resolution is still empty afterwards and the resource is
    /// addressed by name, the name may have re-bound to a different
    /// collection: the collection cache entry is dropped and the call
    /// fails with a staleness error the caller retries once.
    pub async fn resolve_target_ranges(
        &self,
        resource_link: &str,
        collection_rid: &str,
        provided_ranges: &[QueryRange],
        force_refresh: bool,
        cancel: &CancelFlag,
    ) -> Result<Vec<PartitionKeyRange>> {
        if collection_rid.is_empty() {
            return Err(DocDbError::ContractViolation(
                "collection_rid must not be empty".into(),
            ));
        }
        if provided_ranges.is_empty() {
            return Err(DocDbError::ContractViolation(
                "provided_ranges must not be empty".into(),
            ));
        }
        cancel.check()?;

        if force_refresh {
            self.invalidate_ranges(collection_rid);
        }

        let entry = self.load_ranges(collection_rid, cancel).await?;
        let resolved = overlapping(&entry.ranges, provided_ranges);

        if resolved.is_empty() {
            if is_name_link(resource_link) {
                // The name may now point at a recreated collection
                // with a different rid; drop it and let the caller
                // re-resolve from scratch.
                warn!(
                    link = resource_link,
                    rid = collection_rid,
                    "Empty range resolution for name-addressed resource, refreshing collection"
                );
                self.force_refresh_collection(resource_link);
                return Err(DocDbError::StaleCache {
                    resource: resource_link.to_string(),
                });
            }
            debug!(
                rid = collection_rid,
                "Query ranges overlap no cached partition"
            );
        }

        Ok(resolved)
    }

    /// Resolve a collection link to its cached properties, fetching
    /// on miss. A genuinely missing collection surfaces as not-found.
    pub async fn resolve_collection(
        &self,
        link: &str,
        cancel: &CancelFlag,
    ) -> Result<Arc<CollectionProperties>> {
        if link.is_empty() {
            return Err(DocDbError::ContractViolation(
                "collection link must not be empty".into(),
            ));
        }
        cancel.check()?;

        if let Some(props) = self.collections.get(link) {
            return Ok(Arc::clone(&props));
        }

        let gate = self.gate(&format!("coll:{link}"));
        let _guard = gate.lock().await;
        cancel.check()?;

        // A concurrent fetch may have populated the entry while we
        // waited on the gate.
        if let Some(props) = self.collections.get(link) {
            return Ok(Arc::clone(&props));
        }

        let props = Arc::new(self.metadata.fetch_collection(link).await?);
        info!(link, rid = %props.rid, "Cached collection properties");
        self.collections.insert(link.to_string(), Arc::clone(&props));
        self.release_gate(&format!("coll:{link}"));
        Ok(props)
    }

    /// Drop the cached properties for a collection link so the next
    /// resolution re-fetches
    pub fn force_refresh_collection(&self, link: &str) {
        self.collections.remove(link);
    }

    /// Drop the cached range set for a collection so the next
    /// resolution re-fetches. Used after the backend reports the
    /// cached partitions gone (split or merge).
    pub fn invalidate_ranges(&self, collection_rid: &str) {
        if self.entries.remove(collection_rid).is_some() {
            debug!(rid = collection_rid, "Invalidated cached range set");
        }
    }

    /// Routing entry snapshot, if cached
    pub fn routing_entry(&self, collection_rid: &str) -> Option<Arc<CollectionRoutingEntry>> {
        self.entries
            .get(collection_rid)
            .map(|entry| Arc::clone(&entry))
    }

    async fn load_ranges(
        &self,
        collection_rid: &str,
        cancel: &CancelFlag,
    ) -> Result<Arc<CollectionRoutingEntry>> {
        if let Some(entry) = self.entries.get(collection_rid) {
            return Ok(Arc::clone(&entry));
        }

        let gate = self.gate(&format!("ranges:{collection_rid}"));
        let _guard = gate.lock().await;
        cancel.check()?;

        if let Some(entry) = self.entries.get(collection_rid) {
            return Ok(Arc::clone(&entry));
        }

        let mut ranges: Vec<PartitionKeyRange> = self
            .metadata
            .fetch_partition_key_ranges(collection_rid)
            .await?
            .into_iter()
            .map(PartitionKeyRange::from)
            .collect();
        ranges.sort_by(|a, b| a.min_inclusive.cmp(&b.min_inclusive));

        let entry = Arc::new(CollectionRoutingEntry {
            rid: collection_rid.to_string(),
            ranges,
        });
        if !entry.is_complete() {
            warn!(
                rid = collection_rid,
                ranges = entry.ranges.len(),
                "Fetched range set does not cover the key space"
            );
        }
        info!(
            rid = collection_rid,
            ranges = entry.ranges.len(),
            "Cached partition key ranges"
        );

        // Replace-on-write: readers either see the old snapshot or
        // this complete new one, never a partial set.
        self.entries
            .insert(collection_rid.to_string(), Arc::clone(&entry));
        self.release_gate(&format!("ranges:{collection_rid}"));
        Ok(entry)
    }

    fn gate(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            &self
                .gates
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Drop a gate entry once its fetch has published. Waiters still
    /// hold their `Arc` to the mutex and re-check the cache on wake;
    /// a later miss for the same key creates a fresh gate.
    fn release_gate(&self, key: &str) {
        self.gates.remove(key);
    }
}

/// Overlap resolution across several query ranges, deduplicated by
/// range id, ordered by range minimum
fn overlapping(
    ranges: &[PartitionKeyRange],
    query_ranges: &[QueryRange],
) -> Vec<PartitionKeyRange> {
    let mut resolved: Vec<PartitionKeyRange> = Vec::new();
    for range in ranges {
        if query_ranges.iter().any(|q| range.overlaps(q)) {
            resolved.push(range.clone());
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docdb_core::{PartitionKeyDefinition, PartitionKeyRangeProperties};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockMetadata {
        ranges: parking_lot::Mutex<Vec<PartitionKeyRangeProperties>>,
        range_fetches: AtomicUsize,
        collection_fetches: AtomicUsize,
        missing: bool,
    }

    impl MockMetadata {
        fn with_ranges(ranges: Vec<(&str, &str, &str)>) -> Self {
            Self {
                ranges: parking_lot::Mutex::new(
                    ranges
                        .into_iter()
                        .map(|(id, min, max)| PartitionKeyRangeProperties {
                            id: id.into(),
                            min_inclusive: min.into(),
                            max_exclusive: max.into(),
                        })
                        .collect(),
                ),
                range_fetches: AtomicUsize::new(0),
                collection_fetches: AtomicUsize::new(0),
                missing: false,
            }
        }

        fn set_ranges(&self, ranges: Vec<(&str, &str, &str)>) {
            *self.ranges.lock() = ranges
                .into_iter()
                .map(|(id, min, max)| PartitionKeyRangeProperties {
                    id: id.into(),
                    min_inclusive: min.into(),
                    max_exclusive: max.into(),
                })
                .collect();
        }
    }

    #[async_trait]
    impl RoutingMetadataSource for MockMetadata {
        async fn fetch_collection(&self, link: &str) -> Result<CollectionProperties> {
            self.collection_fetches.fetch_add(1, Ordering::SeqCst);
            if self.missing {
                return Err(DocDbError::NotFound(link.to_string()));
            }
            Ok(CollectionProperties {
                rid: "ordersRid".into(),
                name: "Orders".into(),
                partition_key: PartitionKeyDefinition::hash("/customerId"),
                vector_embedding_policy: None,
                geospatial_config: None,
            })
        }

        async fn fetch_partition_key_ranges(
            &self,
            _collection_rid: &str,
        ) -> Result<Vec<PartitionKeyRangeProperties>> {
            self.range_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.ranges.lock().clone())
        }
    }

    fn orders_two_ranges() -> Arc<MockMetadata> {
        Arc::new(MockMetadata::with_ranges(vec![
            ("0", "", "B"),
            ("1", "B", "FF"),
        ]))
    }

    #[tokio::test]
    async fn test_resolve_overlapping_ranges() {
        let cache = PartitionRoutingCache::new(orders_two_ranges());
        let cancel = CancelFlag::new();

        let resolved = cache
            .resolve_target_ranges(
                "dbs/shop/colls/orders",
                "ordersRid",
                &[QueryRange::half_open("A", "C")],
                false,
                &cancel,
            )
            .await
            .unwrap();

        let ids: Vec<&str> = resolved.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1"]);
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent_without_refresh() {
        let metadata = orders_two_ranges();
        let cache = PartitionRoutingCache::new(Arc::clone(&metadata) as _);
        let cancel = CancelFlag::new();
        let ranges = [QueryRange::half_open("A", "C")];

        let first = cache
            .resolve_target_ranges("dbs/shop/colls/orders", "ordersRid", &ranges, false, &cancel)
            .await
            .unwrap();
        let second = cache
            .resolve_target_ranges("dbs/shop/colls/orders", "ordersRid", &ranges, false, &cancel)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(metadata.range_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_contract_violations_fail_fast() {
        let cache = PartitionRoutingCache::new(orders_two_ranges());
        let cancel = CancelFlag::new();

        let err = cache
            .resolve_target_ranges("dbs/shop/colls/orders", "", &[QueryRange::full()], false, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DocDbError::ContractViolation(_)));

        let err = cache
            .resolve_target_ranges("dbs/shop/colls/orders", "ordersRid", &[], false, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DocDbError::ContractViolation(_)));
    }

    #[tokio::test]
    async fn test_empty_is_staleness_signal_not_error() {
        let cache = PartitionRoutingCache::new(orders_two_ranges());
        assert!(cache
            .get_overlapping_ranges("ordersRid", &QueryRange::full())
            .is_empty());
    }

    #[tokio::test]
    async fn test_split_then_forced_refresh_scenario() {
        let metadata = orders_two_ranges();
        let cache = PartitionRoutingCache::new(Arc::clone(&metadata) as _);
        let cancel = CancelFlag::new();
        let query = QueryRange::half_open("A", "C");

        // Warm the cache with the pre-split view
        let resolved = cache
            .resolve_target_ranges(
                "dbs/shop/colls/orders",
                "ordersRid",
                std::slice::from_ref(&query),
                false,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(resolved.len(), 2);

        // Backend splits range 1 into [B,D) and [D,FF); the gone
        // response invalidates the cached view.
        metadata.set_ranges(vec![("0", "", "B"), ("2", "B", "D"), ("3", "D", "FF")]);
        cache.invalidate_ranges("ordersRid");

        // Stale cache now resolves to empty: the staleness signal.
        assert!(cache
            .get_overlapping_ranges("ordersRid", &query)
            .is_empty());

        // Retry with a forced refresh sees the post-split topology.
        let resolved = cache
            .resolve_target_ranges(
                "dbs/shop/colls/orders",
                "ordersRid",
                std::slice::from_ref(&query),
                true,
                &cancel,
            )
            .await
            .unwrap();
        let ids: Vec<&str> = resolved.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "2"]);
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce_to_one_fetch() {
        let metadata = orders_two_ranges();
        let cache = Arc::new(PartitionRoutingCache::new(Arc::clone(&metadata) as _));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                let cancel = CancelFlag::new();
                cache
                    .resolve_target_ranges(
                        "dbs/shop/colls/orders",
                        "ordersRid",
                        &[QueryRange::full()],
                        false,
                        &cancel,
                    )
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().len(), 2);
        }

        assert_eq!(metadata.range_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gates_do_not_accumulate_across_keys() {
        let metadata = orders_two_ranges();
        let cache = PartitionRoutingCache::new(Arc::clone(&metadata) as _);
        let cancel = CancelFlag::new();

        cache
            .resolve_collection("dbs/shop/colls/orders", &cancel)
            .await
            .unwrap();
        cache
            .resolve_target_ranges(
                "dbs/shop/colls/orders",
                "ordersRid",
                &[QueryRange::full()],
                false,
                &cancel,
            )
            .await
            .unwrap();

        // Each fetch released its gate; a long-lived client touching
        // many collections does not hold a mutex per key forever.
        assert!(cache.gates.is_empty());
    }

    #[tokio::test]
    async fn test_collection_cache_and_forced_refresh() {
        let metadata = orders_two_ranges();
        let cache = PartitionRoutingCache::new(Arc::clone(&metadata) as _);
        let cancel = CancelFlag::new();

        let props = cache
            .resolve_collection("dbs/shop/colls/orders", &cancel)
            .await
            .unwrap();
        assert_eq!(props.rid, "ordersRid");

        // Cached: no second fetch
        cache
            .resolve_collection("dbs/shop/colls/orders", &cancel)
            .await
            .unwrap();
        assert_eq!(metadata.collection_fetches.load(Ordering::SeqCst), 1);

        cache.force_refresh_collection("dbs/shop/colls/orders");
        cache
            .resolve_collection("dbs/shop/colls/orders", &cancel)
            .await
            .unwrap();
        assert_eq!(metadata.collection_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_collection_is_not_found() {
        let metadata = Arc::new(MockMetadata {
            ranges: parking_lot::Mutex::new(vec![]),
            range_fetches: AtomicUsize::new(0),
            collection_fetches: AtomicUsize::new(0),
            missing: true,
        });
        let cache = PartitionRoutingCache::new(metadata);
        let cancel = CancelFlag::new();

        let err = cache
            .resolve_collection("dbs/shop/colls/ghost", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DocDbError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_name_link_staleness_refreshes_collection() {
        // Ranges that cover nothing the query asks for, simulating a
        // name link whose collection was dropped and recreated.
        let metadata = Arc::new(MockMetadata::with_ranges(vec![("0", "", "5")]));
        let cache = PartitionRoutingCache::new(Arc::clone(&metadata) as _);
        let cancel = CancelFlag::new();

        // Warm the collection cache through the name link.
        cache
            .resolve_collection("dbs/shop/colls/orders", &cancel)
            .await
            .unwrap();

        let err = cache
            .resolve_target_ranges(
                "dbs/shop/colls/orders",
                "ordersRid",
                &[QueryRange::half_open("7", "9")],
                false,
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(err.is_retryable_staleness());

        // The collection entry was dropped; the next resolution
        // re-fetches the (possibly re-bound) name.
        cache
            .resolve_collection("dbs/shop/colls/orders", &cancel)
            .await
            .unwrap();
        assert_eq!(metadata.collection_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_resolution_releases_gate() {
        let metadata = orders_two_ranges();
        let cache = Arc::new(PartitionRoutingCache::new(Arc::clone(&metadata) as _));

        let cancelled = CancelFlag::new();
        cancelled.cancel();
        let err = cache
            .resolve_target_ranges(
                "dbs/shop/colls/orders",
                "ordersRid",
                &[QueryRange::full()],
                false,
                &cancelled,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocDbError::Cancelled));

        // The gate was released; a fresh caller proceeds normally.
        let cancel = CancelFlag::new();
        let resolved = cache
            .resolve_target_ranges(
                "dbs/shop/colls/orders",
                "ordersRid",
                &[QueryRange::full()],
                false,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(resolved.len(), 2);
    }
}
