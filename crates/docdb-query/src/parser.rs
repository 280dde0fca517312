//! Query response body parsing
//!
//! Turns a raw response body into result elements plus the optional
//! distribution plan and streaming flag. A property that is present
//! but wrong-typed is a backend contract violation and fails hard;
//! retrying would reproduce it.

use crate::page::DistributionPlan;
use base64::Engine;
use docdb_core::{DocDbError, ResourceType, Result};
use serde_json::Value;
use tracing::debug;

const DISTRIBUTION_PLAN_PROPERTY: &str = "_distributionPlan";
const STREAMING_PROPERTY: &str = "_streaming";
const BACKEND_PLAN_PROPERTY: &str = "backendDistributionPlan";
const CLIENT_PLAN_PROPERTY: &str = "clientDistributionPlan";

/// Parsed contents of a feed/query response body
#[derive(Debug, Clone)]
pub struct ParsedRestStream {
    /// Result elements under the resource-type property
    pub items: Vec<Value>,
    /// Distribution plan, normalized from either wire form
    pub distribution_plan: Option<DistributionPlan>,
    /// Whether the backend emitted results incrementally
    pub streaming: Option<bool>,
}

/// The two wire forms a distribution plan arrives in
enum RawDistributionPlan<'a> {
    /// Direct structured object
    Structured(&'a Value),
    /// Base64-encoded JSON, decoded and re-parsed
    BinaryEncoded(&'a str),
}

/// Parse a feed/query response body for the given resource type
pub fn parse_rest_stream(body: &[u8], resource_type: ResourceType) -> Result<ParsedRestStream> {
    let root: Value = serde_json::from_slice(body)
        .map_err(|e| DocDbError::ParseContract(format!("response body is not JSON: {e}")))?;
    let root = root.as_object().ok_or_else(|| {
        DocDbError::ParseContract("response body is not a JSON object".to_string())
    })?;

    let property = resource_type.response_property();
    let items = match root.get(property) {
        Some(Value::Array(values)) => values.clone(),
        Some(other) => {
            return Err(DocDbError::ParseContract(format!(
                "property '{property}' must be an array, found {}",
                type_name(other)
            )));
        }
        None => Vec::new(),
    };

    let distribution_plan = match root.get(DISTRIBUTION_PLAN_PROPERTY) {
        Some(value @ Value::Object(_)) => {
            Some(decode_distribution_plan(RawDistributionPlan::Structured(value))?)
        }
        Some(Value::String(encoded)) => {
            Some(decode_distribution_plan(RawDistributionPlan::BinaryEncoded(encoded))?)
        }
        Some(other) => {
            return Err(DocDbError::ParseContract(format!(
                "property '{DISTRIBUTION_PLAN_PROPERTY}' must be an object or base64 string, found {}",
                type_name(other)
            )));
        }
        None => None,
    };

    let streaming = match root.get(STREAMING_PROPERTY) {
        Some(Value::Bool(flag)) => Some(*flag),
        Some(other) => {
            return Err(DocDbError::ParseContract(format!(
                "property '{STREAMING_PROPERTY}' must be a boolean, found {}",
                type_name(other)
            )));
        }
        None => None,
    };

    debug!(
        items = items.len(),
        has_distribution_plan = distribution_plan.is_some(),
        streaming = ?streaming,
        "Parsed query response body"
    );

    Ok(ParsedRestStream {
        items,
        distribution_plan,
        streaming,
    })
}

/// Normalize either wire form to the canonical in-memory plan
fn decode_distribution_plan(raw: RawDistributionPlan<'_>) -> Result<DistributionPlan> {
    let decoded;
    let object = match raw {
        RawDistributionPlan::Structured(value) => value,
        RawDistributionPlan::BinaryEncoded(encoded) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| {
                    DocDbError::ParseContract(format!("distribution plan base64 is invalid: {e}"))
                })?;
            decoded = serde_json::from_slice::<Value>(&bytes).map_err(|e| {
                DocDbError::ParseContract(format!("decoded distribution plan is not JSON: {e}"))
            })?;
            &decoded
        }
    };

    let object = object.as_object().ok_or_else(|| {
        DocDbError::ParseContract("distribution plan must decode to a JSON object".to_string())
    })?;

    Ok(DistributionPlan {
        backend_plan: object.get(BACKEND_PLAN_PROPERTY).cloned(),
        client_plan: object.get(CLIENT_PLAN_PROPERTY).cloned(),
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
