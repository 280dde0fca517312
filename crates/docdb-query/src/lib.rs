//! Query execution for the docdb client
//!
//! Turns a query into plan retrieval, per-partition page requests, and
//! continuation bookkeeping:
//! - The **plan retriever** obtains execution hints, preferring a
//!   local generator and falling back to a gateway round-trip with the
//!   client's capability bitmask.
//! - The **execution context** resolves target partitions through the
//!   routing cache and drains each partition's page stream in
//!   continuation order.
//! - The **response parser** extracts result elements, the optional
//!   distribution plan (inline or base64), and the streaming flag.
//!
//! # Modules
//!
//! - [`features`]: query feature capability bitmask
//! - [`plan`]: query plan model and plan cache
//! - [`retriever`]: plan acquisition (local or gateway)
//! - [`page`]: query page and continuation model
//! - [`parser`]: response body parsing
//! - [`pipeline`]: query execution context

pub mod features;
pub mod page;
pub mod parser;
pub mod pipeline;
pub mod plan;
pub mod retriever;

// Re-exports
pub use features::SupportedFeatures;
pub use page::{DistributionPlan, PageContinuation, QueryPage};
pub use parser::{parse_rest_stream, ParsedRestStream};
pub use pipeline::{QueryExecutionContext, QueryOptions, QueryState};
pub use plan::{PlanCache, PlanCacheKey, PlanCacheStats, QueryParameter, QueryPlan, QuerySpec};
pub use retriever::{QueryPlanGenerator, QueryPlanRetriever};
