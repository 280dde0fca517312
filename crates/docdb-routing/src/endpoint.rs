//! Regional endpoint model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role an endpoint can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointRole {
    /// Serves read operations
    Read,
    /// Serves write operations
    Write,
    /// Serves the thin-client protocol
    ThinClient,
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Read => write!(f, "Read"),
            EndpointRole::Write => write!(f, "Write"),
            EndpointRole::ThinClient => write!(f, "ThinClient"),
        }
    }
}

/// A regional endpoint and the roles it serves.
///
/// Immutable once constructed; a topology refresh replaces endpoints
/// wholesale rather than mutating them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Gateway URL
    pub url: String,
    /// Region name, e.g. "West US"
    pub region: String,
    /// Roles this endpoint serves
    pub roles: Vec<EndpointRole>,
}

impl Endpoint {
    /// Create an endpoint with the given roles
    pub fn new(url: impl Into<String>, region: impl Into<String>, roles: Vec<EndpointRole>) -> Self {
        Self {
            url: url.into(),
            region: region.into(),
            roles,
        }
    }

    /// Whether this endpoint serves the given role
    pub fn serves(&self, role: EndpointRole) -> bool {
        self.roles.contains(&role)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.region)
    }
}
