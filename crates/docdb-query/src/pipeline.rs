//! Query execution core
//!
//! Orchestrates one logical query: plan retrieval, target partition
//! resolution, per-partition page requests, and continuation
//! bookkeeping. Pages within one partition are requested strictly in
//! continuation order; cross-partition concurrency is the caller's
//! concern and is not imposed here.

use crate::features::SupportedFeatures;
use crate::page::{PageContinuation, QueryPage};
use crate::parser::parse_rest_stream;
use crate::plan::{QueryPlan, QuerySpec};
use crate::retriever::QueryPlanRetriever;
use bytes::Bytes;
use docdb_core::{
    headers, ActivityId, CancelFlag, CorrelationId, DocDbError, OperationType, RequestContext,
    ResourceType, Result, TransportClient,
};
use docdb_routing::{GlobalEndpointManager, PartitionKeyRange, PartitionRoutingCache, QueryRange};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Caller-facing options for one logical query
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Requested page size, sent on every page request
    pub page_size: usize,
    /// Features to strip from the advertised capability bitmask;
    /// applied once at query start, never re-negotiated
    pub disabled_features: SupportedFeatures,
    /// Effective key ranges the query targets; empty = full key space
    pub query_ranges: Vec<QueryRange>,
    /// Preferred region for page requests
    pub region_hint: Option<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            disabled_features: SupportedFeatures::NONE,
            query_ranges: Vec::new(),
            region_hint: None,
        }
    }
}

/// Lifecycle of one logical query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
    /// No plan yet
    PlanPending,
    /// Plan retrieved
    PlanReady,
    /// Target partitions resolved
    PartitionsResolved,
    /// A page request is in flight
    PageRequested,
    /// The most recent page request succeeded
    PageReady,
    /// Every target partition's stream is drained
    Exhausted,
    /// A page request failed terminally
    Failed(String),
}

/// Where one partition's stream stands
#[derive(Debug, Clone, PartialEq, Eq)]
enum PartitionCursor {
    /// No page fetched yet
    Start,
    /// Resume from this opaque token
    Continue(String),
    /// Stream drained
    Exhausted,
}

/// Drives one logical query across its target partitions
pub struct QueryExecutionContext {
    transport: Arc<dyn TransportClient>,
    endpoint_manager: Arc<GlobalEndpointManager>,
    routing_cache: Arc<PartitionRoutingCache>,
    retriever: Arc<QueryPlanRetriever>,
    collection_link: String,
    spec: QuerySpec,
    options: QueryOptions,
    /// Capability bitmask, narrowed once at construction
    features: SupportedFeatures,
    correlation_id: CorrelationId,
    state: QueryState,
    plan: Option<Arc<QueryPlan>>,
    targets: Vec<PartitionKeyRange>,
    cursors: HashMap<String, PartitionCursor>,
    total_request_charge: f64,
    pages_fetched: u64,
}

impl QueryExecutionContext {
    /// Create a context for one logical query
    pub fn new(
        transport: Arc<dyn TransportClient>,
        endpoint_manager: Arc<GlobalEndpointManager>,
        routing_cache: Arc<PartitionRoutingCache>,
        retriever: Arc<QueryPlanRetriever>,
        collection_link: impl Into<String>,
        spec: QuerySpec,
        options: QueryOptions,
    ) -> Self {
        let features = SupportedFeatures::all().narrow_by(options.disabled_features);
        Self {
            transport,
            endpoint_manager,
            routing_cache,
            retriever,
            collection_link: collection_link.into(),
            spec,
            options,
            features,
            correlation_id: CorrelationId::new(),
            state: QueryState::PlanPending,
            plan: None,
            targets: Vec::new(),
            cursors: HashMap::new(),
            total_request_charge: 0.0,
            pages_fetched: 0,
        }
    }

    /// Retrieve the plan and resolve target partitions.
    ///
    /// A staleness error from range resolution is retried exactly once
    /// with a forced refresh before propagating.
    pub async fn prepare(&mut self, cancel: &CancelFlag) -> Result<()> {
        cancel.check()?;

        let collection = self
            .routing_cache
            .resolve_collection(&self.collection_link, cancel)
            .await?;

        let plan = self
            .retriever
            .get_query_plan(
                &self.collection_link,
                &self.spec,
                &collection.partition_key,
                self.features,
                cancel,
            )
            .await?;
        self.plan = Some(plan);
        self.state = QueryState::PlanReady;

        let query_ranges = if self.options.query_ranges.is_empty() {
            vec![QueryRange::full()]
        } else {
            self.options.query_ranges.clone()
        };

        let targets = match self
            .routing_cache
            .resolve_target_ranges(&self.collection_link, &collection.rid, &query_ranges, false, cancel)
            .await
        {
            Ok(targets) => targets,
            Err(err) if err.is_retryable_staleness() => {
                info!(
                    link = %self.collection_link,
                    "Stale routing cache during query preparation, retrying with forced refresh"
                );
                let collection = self
                    .routing_cache
                    .resolve_collection(&self.collection_link, cancel)
                    .await?;
                self.routing_cache
                    .resolve_target_ranges(
                        &self.collection_link,
                        &collection.rid,
                        &query_ranges,
                        true,
                        cancel,
                    )
                    .await?
            }
            Err(err) => return Err(err),
        };

        self.cursors = targets
            .iter()
            .map(|range| (range.id.clone(), PartitionCursor::Start))
            .collect();
        self.targets = targets;
        self.state = QueryState::PartitionsResolved;

        debug!(
            correlation = %self.correlation_id,
            partitions = self.targets.len(),
            features = %self.features,
            "Query prepared"
        );
        Ok(())
    }

    /// Fetch the next page, draining partitions in range order.
    ///
    /// Returns `Ok(None)` once every target partition is exhausted.
    /// Pages already yielded are never retracted on a later failure.
    pub async fn next_page(&mut self, cancel: &CancelFlag) -> Result<Option<QueryPage>> {
        cancel.check()?;
        if self.state == QueryState::PlanPending || self.state == QueryState::PlanReady {
            return Err(DocDbError::ContractViolation(
                "next_page called before prepare".into(),
            ));
        }

        let Some((range, continuation)) = self.next_pending_partition() else {
            self.state = QueryState::Exhausted;
            return Ok(None);
        };

        self.state = QueryState::PageRequested;
        let page = match self.execute_item_query(&range, continuation.as_deref(), cancel).await {
            Ok(page) => page,
            Err(err) => {
                self.state = QueryState::Failed(err.to_string());
                return Err(err);
            }
        };

        let cursor = match &page.continuation {
            Some(continuation) => PartitionCursor::Continue(continuation.token.clone()),
            None => PartitionCursor::Exhausted,
        };
        self.cursors.insert(range.id.clone(), cursor);
        self.total_request_charge += page.request_charge;
        self.pages_fetched += 1;
        self.state = QueryState::PageReady;

        Ok(Some(page))
    }

    /// Issue one page request against one partition.
    ///
    /// The continuation token is resubmitted byte-for-byte; a
    /// transport-level failure flags the endpoint unavailable for
    /// reads before propagating.
    pub async fn execute_item_query(
        &self,
        range: &PartitionKeyRange,
        continuation: Option<&str>,
        cancel: &CancelFlag,
    ) -> Result<QueryPage> {
        cancel.check()?;

        let mut request =
            RequestContext::new(ResourceType::Document, OperationType::Query, &self.collection_link);
        request.region_hint = self.options.region_hint.clone();
        let endpoint = self.endpoint_manager.resolve_endpoint(&request)?;

        let activity_id = ActivityId::new();
        let mut request_headers = HashMap::new();
        request_headers.insert(headers::IS_QUERY.to_string(), "true".to_string());
        request_headers.insert(headers::PAGE_SIZE.to_string(), self.options.page_size.to_string());
        request_headers.insert(
            headers::PARTITION_KEY_RANGE_ID.to_string(),
            range.id.clone(),
        );
        request_headers.insert(headers::ACTIVITY_ID.to_string(), activity_id.to_string());
        request_headers.insert(
            headers::CORRELATION_ID.to_string(),
            self.correlation_id.to_string(),
        );
        if let Some(token) = continuation {
            request_headers.insert(headers::CONTINUATION.to_string(), token.to_string());
        }

        let body = Bytes::from(serde_json::to_vec(&self.spec)?);
        cancel.check()?;

        debug!(
            correlation = %self.correlation_id,
            range = %range.id,
            endpoint = %endpoint,
            has_continuation = continuation.is_some(),
            "Requesting query page"
        );

        let response = match self
            .transport
            .send(
                &endpoint.url,
                ResourceType::Document,
                OperationType::Query,
                request_headers,
                body,
            )
            .await
        {
            Ok(response) => response,
            Err(err) => {
                if err.is_endpoint_failure() {
                    warn!(endpoint = %endpoint, error = %err, "Endpoint-level query failure");
                    self.endpoint_manager
                        .mark_endpoint_unavailable_for_read(&endpoint.url);
                }
                return Err(err);
            }
        };

        if !response.is_success() {
            return Err(response.into_backend_error());
        }

        let request_charge = response.request_charge();
        let activity_id = response.activity_id();
        let continuation = response.continuation().map(|token| PageContinuation {
            token: token.to_string(),
            partition_range_id: range.id.clone(),
        });
        let query_metrics = response.query_metrics().map(str::to_string);

        let parsed = parse_rest_stream(&response.body, ResourceType::Document)?;

        Ok(QueryPage {
            items: parsed.items,
            request_charge,
            activity_id,
            continuation,
            distribution_plan: parsed.distribution_plan,
            streaming: parsed.streaming,
            query_metrics,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> &QueryState {
        &self.state
    }

    /// Target partitions, in range order
    pub fn targets(&self) -> &[PartitionKeyRange] {
        &self.targets
    }

    /// Retrieved plan, once prepared
    pub fn plan(&self) -> Option<&Arc<QueryPlan>> {
        self.plan.as_ref()
    }

    /// Sum of request charges over all fetched pages
    pub fn request_charge(&self) -> f64 {
        self.total_request_charge
    }

    /// Number of pages fetched so far
    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    /// Whether every target partition's stream is drained. A query
    /// that resolved to zero target partitions is vacuously exhausted.
    pub fn is_exhausted(&self) -> bool {
        match self.state {
            QueryState::Exhausted => true,
            QueryState::PlanPending | QueryState::PlanReady | QueryState::Failed(_) => false,
            _ => self
                .targets
                .iter()
                .all(|range| self.cursors.get(&range.id) == Some(&PartitionCursor::Exhausted)),
        }
    }

    /// First partition, in range order, with pages left to fetch
    fn next_pending_partition(&self) -> Option<(PartitionKeyRange, Option<String>)> {
        for range in &self.targets {
            match self.cursors.get(&range.id) {
                Some(PartitionCursor::Start) => return Some((range.clone(), None)),
                Some(PartitionCursor::Continue(token)) => {
                    return Some((range.clone(), Some(token.clone())));
                }
                _ => {}
            }
        }
        None
    }
}
