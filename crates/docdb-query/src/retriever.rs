//! Query plan acquisition
//!
//! Prefers a local in-process plan generator; otherwise round-trips a
//! plan request through the gateway endpoint resolved by the global
//! endpoint manager. Retrieved plans are cached for reuse.

use crate::features::SupportedFeatures;
use crate::plan::{PlanCache, PlanCacheKey, QueryPlan, QuerySpec};
use bytes::Bytes;
use docdb_core::{
    headers, CancelFlag, OperationType, PartitionKeyDefinition, RequestContext, ResourceType,
    Result, TransportClient,
};
use docdb_routing::GlobalEndpointManager;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Query version advertised on plan requests
const QUERY_VERSION: &str = "1.0";

/// In-process plan generation, the fast path when available.
///
/// Returns `Ok(None)` for queries it cannot plan locally; the
/// retriever then falls back to the gateway.
pub trait QueryPlanGenerator: Send + Sync {
    /// Attempt to generate a plan locally
    fn generate(
        &self,
        spec: &QuerySpec,
        definition: &PartitionKeyDefinition,
        features: SupportedFeatures,
    ) -> Result<Option<QueryPlan>>;
}

/// Obtains query plans, locally or through the gateway
pub struct QueryPlanRetriever {
    generator: Option<Arc<dyn QueryPlanGenerator>>,
    transport: Arc<dyn TransportClient>,
    endpoint_manager: Arc<GlobalEndpointManager>,
    cache: PlanCache,
}

impl QueryPlanRetriever {
    /// Create a retriever with no local generator (gateway only)
    pub fn new(
        transport: Arc<dyn TransportClient>,
        endpoint_manager: Arc<GlobalEndpointManager>,
    ) -> Self {
        Self {
            generator: None,
            transport,
            endpoint_manager,
            cache: PlanCache::new(256),
        }
    }

    /// Use a local plan generator as the fast path
    pub fn with_generator(mut self, generator: Arc<dyn QueryPlanGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Get the plan for a query.
    ///
    /// `features` is the already-narrowed capability bitmask for this
    /// query; it is part of the cache key and is not re-negotiated.
    pub async fn get_query_plan(
        &self,
        collection_link: &str,
        spec: &QuerySpec,
        definition: &PartitionKeyDefinition,
        features: SupportedFeatures,
        cancel: &CancelFlag,
    ) -> Result<Arc<QueryPlan>> {
        cancel.check()?;

        let key = PlanCacheKey::new(&spec.query, definition, features);
        if let Some(plan) = self.cache.get(&key) {
            debug!(query = %spec.query, "Plan cache hit");
            return Ok(plan);
        }

        if let Some(generator) = &self.generator {
            if let Some(plan) = generator.generate(spec, definition, features)? {
                debug!(query = %spec.query, "Generated query plan locally");
                let plan = Arc::new(plan);
                self.cache.put(key, Arc::clone(&plan));
                return Ok(plan);
            }
        }

        let plan = Arc::new(
            self.fetch_plan_from_gateway(collection_link, spec, features, cancel)
                .await?,
        );
        self.cache.put(key, Arc::clone(&plan));
        Ok(plan)
    }

    /// Plan cache for inspection
    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    async fn fetch_plan_from_gateway(
        &self,
        collection_link: &str,
        spec: &QuerySpec,
        features: SupportedFeatures,
        cancel: &CancelFlag,
    ) -> Result<QueryPlan> {
        let request = RequestContext::new(
            ResourceType::Document,
            OperationType::QueryPlan,
            collection_link,
        );
        let endpoint = self.endpoint_manager.resolve_endpoint(&request)?;

        let mut request_headers = HashMap::new();
        request_headers.insert(headers::IS_QUERY_PLAN_REQUEST.to_string(), "true".to_string());
        request_headers.insert(
            headers::SUPPORTED_QUERY_FEATURES.to_string(),
            features.header_value(),
        );
        request_headers.insert(headers::QUERY_VERSION.to_string(), QUERY_VERSION.to_string());

        let body = Bytes::from(serde_json::to_vec(spec)?);
        cancel.check()?;

        let response = self
            .transport
            .send(
                &endpoint.url,
                ResourceType::Document,
                OperationType::QueryPlan,
                request_headers,
                body,
            )
            .await?;

        if !response.is_success() {
            return Err(response.into_backend_error());
        }

        let partitioned_query_info: serde_json::Value = serde_json::from_slice(&response.body)
            .map_err(|e| {
                docdb_core::DocDbError::ParseContract(format!("query plan body is not JSON: {e}"))
            })?;

        info!(
            query = %spec.query,
            endpoint = %endpoint,
            features = %features,
            "Retrieved query plan from gateway"
        );
        Ok(QueryPlan::new(features, partitioned_query_info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docdb_core::{
        AccountMetadataSource, AccountTopology, RegionalEndpoint, TransportResponse,
    };
    use docdb_routing::LocationConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OneRegion;

    #[async_trait]
    impl AccountMetadataSource for OneRegion {
        async fn fetch_topology(&self) -> Result<AccountTopology> {
            let west = RegionalEndpoint {
                region: "West US".into(),
                endpoint: "https://west.docdb.example".into(),
            };
            Ok(AccountTopology {
                writable_regions: vec![west.clone()],
                readable_regions: vec![west],
                thin_client_regions: vec![],
                multi_write_enabled: false,
            })
        }
    }

    struct PlanGateway {
        requests: AtomicUsize,
        status: u16,
    }

    impl PlanGateway {
        fn new() -> Self {
            Self {
                requests: AtomicUsize::new(0),
                status: 200,
            }
        }
    }

    #[async_trait]
    impl TransportClient for PlanGateway {
        async fn send(
            &self,
            _endpoint: &str,
            _resource_type: ResourceType,
            _operation_type: OperationType,
            request_headers: HashMap<String, String>,
            _body: Bytes,
        ) -> Result<TransportResponse> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            assert_eq!(
                request_headers.get(headers::IS_QUERY_PLAN_REQUEST).map(String::as_str),
                Some("true")
            );
            assert!(request_headers.contains_key(headers::SUPPORTED_QUERY_FEATURES));

            let body = json!({"queryInfo": {"rewrittenQuery": "SELECT * FROM c"}}).to_string();
            Ok(TransportResponse::new(
                self.status,
                HashMap::new(),
                Bytes::from(body),
            ))
        }
    }

    struct AlwaysLocal;

    impl QueryPlanGenerator for AlwaysLocal {
        fn generate(
            &self,
            _spec: &QuerySpec,
            _definition: &PartitionKeyDefinition,
            features: SupportedFeatures,
        ) -> Result<Option<QueryPlan>> {
            Ok(Some(QueryPlan::new(features, serde_json::json!({"local": true}))))
        }
    }

    struct NeverLocal;

    impl QueryPlanGenerator for NeverLocal {
        fn generate(
            &self,
            _spec: &QuerySpec,
            _definition: &PartitionKeyDefinition,
            _features: SupportedFeatures,
        ) -> Result<Option<QueryPlan>> {
            Ok(None)
        }
    }

    async fn manager() -> Arc<GlobalEndpointManager> {
        let manager = Arc::new(GlobalEndpointManager::new(
            Arc::new(OneRegion),
            LocationConfig::default(),
        ));
        manager.refresh_locations(true).await.unwrap();
        manager
    }

    #[tokio::test]
    async fn test_gateway_plan_is_cached() {
        let gateway = Arc::new(PlanGateway::new());
        let retriever =
            QueryPlanRetriever::new(Arc::clone(&gateway) as _, manager().await);

        let spec = QuerySpec::new("SELECT * FROM c ORDER BY c.ts");
        let definition = PartitionKeyDefinition::hash("/customerId");
        let features = SupportedFeatures::all();
        let cancel = CancelFlag::new();

        let first = retriever
            .get_query_plan("dbs/shop/colls/orders", &spec, &definition, features, &cancel)
            .await
            .unwrap();
        let second = retriever
            .get_query_plan("dbs/shop/colls/orders", &spec, &definition, features, &cancel)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(gateway.requests.load(Ordering::SeqCst), 1);
        assert_eq!(retriever.cache().stats().hits(), 1);
    }

    #[tokio::test]
    async fn test_local_generator_skips_gateway() {
        let gateway = Arc::new(PlanGateway::new());
        let retriever = QueryPlanRetriever::new(Arc::clone(&gateway) as _, manager().await)
            .with_generator(Arc::new(AlwaysLocal));

        let plan = retriever
            .get_query_plan(
                "dbs/shop/colls/orders",
                &QuerySpec::new("SELECT * FROM c"),
                &PartitionKeyDefinition::hash("/customerId"),
                SupportedFeatures::all(),
                &CancelFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(plan.partitioned_query_info["local"], true);
        assert_eq!(gateway.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_declining_generator_falls_back_to_gateway() {
        let gateway = Arc::new(PlanGateway::new());
        let retriever = QueryPlanRetriever::new(Arc::clone(&gateway) as _, manager().await)
            .with_generator(Arc::new(NeverLocal));

        let plan = retriever
            .get_query_plan(
                "dbs/shop/colls/orders",
                &QuerySpec::new("SELECT * FROM c"),
                &PartitionKeyDefinition::hash("/customerId"),
                SupportedFeatures::all(),
                &CancelFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            plan.partitioned_query_info["queryInfo"]["rewrittenQuery"],
            "SELECT * FROM c"
        );
        assert_eq!(gateway.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_features_miss_the_cache() {
        let gateway = Arc::new(PlanGateway::new());
        let retriever =
            QueryPlanRetriever::new(Arc::clone(&gateway) as _, manager().await);

        let spec = QuerySpec::new("SELECT * FROM c");
        let definition = PartitionKeyDefinition::hash("/customerId");
        let cancel = CancelFlag::new();

        retriever
            .get_query_plan(
                "dbs/shop/colls/orders",
                &spec,
                &definition,
                SupportedFeatures::all(),
                &cancel,
            )
            .await
            .unwrap();
        retriever
            .get_query_plan(
                "dbs/shop/colls/orders",
                &spec,
                &definition,
                SupportedFeatures::all().narrow_by(SupportedFeatures::NON_STREAMING_ORDER_BY),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(gateway.requests.load(Ordering::SeqCst), 2);
        assert_eq!(retriever.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_gateway_rejection_is_backend_error() {
        let mut gateway = PlanGateway::new();
        gateway.status = 400;
        let retriever = QueryPlanRetriever::new(Arc::new(gateway) as _, manager().await);

        let err = retriever
            .get_query_plan(
                "dbs/shop/colls/orders",
                &QuerySpec::new("SELECT INVALID"),
                &PartitionKeyDefinition::hash("/customerId"),
                SupportedFeatures::all(),
                &CancelFlag::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, docdb_core::DocDbError::Backend { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_gateway() {
        let gateway = Arc::new(PlanGateway::new());
        let retriever =
            QueryPlanRetriever::new(Arc::clone(&gateway) as _, manager().await);

        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = retriever
            .get_query_plan(
                "dbs/shop/colls/orders",
                &QuerySpec::new("SELECT * FROM c"),
                &PartitionKeyDefinition::hash("/customerId"),
                SupportedFeatures::all(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, docdb_core::DocDbError::Cancelled));
        assert_eq!(gateway.requests.load(Ordering::SeqCst), 0);
    }
}
