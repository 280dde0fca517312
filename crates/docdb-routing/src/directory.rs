//! Endpoint directory: the in-memory view of regional endpoints and
//! their health
//!
//! Pure data plus lookup. The directory is rebuilt wholesale from
//! account topology and published as a snapshot; readers never see a
//! partially updated view.

use crate::endpoint::{Endpoint, EndpointRole};
use docdb_core::AccountTopology;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Health record for an endpoint flagged after a transport failure
#[derive(Debug, Clone)]
struct UnavailabilityRecord {
    /// Roles the endpoint is unavailable for
    roles: Vec<EndpointRole>,
    /// When the endpoint becomes eligible for retry
    until: Instant,
}

/// Ordered view of regional endpoints per role, with health state.
///
/// Insertion order is preference order: most-preferred first.
#[derive(Debug, Clone, Default)]
pub struct EndpointDirectory {
    read_endpoints: Vec<Endpoint>,
    write_endpoints: Vec<Endpoint>,
    thin_client_endpoints: Vec<Endpoint>,
    by_region: HashMap<String, Endpoint>,
    unavailable: HashMap<String, UnavailabilityRecord>,
}

impl EndpointDirectory {
    /// Build a directory from account topology, ordering each role
    /// list by the caller's preferred regions first, then account
    /// order for the rest.
    ///
    /// The write list only honors the preference list when the
    /// account is multi-write: in single-write mode the first
    /// writable region is the only one accepting writes, so the list
    /// keeps account failover order.
    pub fn from_topology(topology: &AccountTopology, preferred_regions: &[String]) -> Self {
        let read_endpoints = order_by_preference(
            &topology.readable_regions,
            preferred_regions,
            &[EndpointRole::Read],
        );
        let write_preference: &[String] = if topology.multi_write_enabled {
            preferred_regions
        } else {
            &[]
        };
        let write_endpoints = order_by_preference(
            &topology.writable_regions,
            write_preference,
            &[EndpointRole::Write],
        );
        let thin_client_endpoints = order_by_preference(
            &topology.thin_client_regions,
            preferred_regions,
            &[EndpointRole::ThinClient],
        );

        let mut by_region = HashMap::new();
        for ep in read_endpoints
            .iter()
            .chain(write_endpoints.iter())
            .chain(thin_client_endpoints.iter())
        {
            by_region
                .entry(ep.region.clone())
                .and_modify(|existing: &mut Endpoint| {
                    for role in &ep.roles {
                        if !existing.roles.contains(role) {
                            existing.roles.push(*role);
                        }
                    }
                })
                .or_insert_with(|| ep.clone());
        }

        Self {
            read_endpoints,
            write_endpoints,
            thin_client_endpoints,
            by_region,
            unavailable: HashMap::new(),
        }
    }

    /// Carry unavailability records forward into a freshly built
    /// directory, dropping records for endpoints no longer present.
    pub fn carry_unavailability_from(&mut self, previous: &EndpointDirectory) {
        let now = Instant::now();
        for (url, record) in &previous.unavailable {
            let still_known = self
                .read_endpoints
                .iter()
                .chain(self.write_endpoints.iter())
                .chain(self.thin_client_endpoints.iter())
                .any(|ep| ep.url == *url);
            if still_known && record.until > now {
                self.unavailable.insert(url.clone(), record.clone());
            }
        }
    }

    /// Preference-ordered endpoints for a role
    pub fn endpoints_for(&self, role: EndpointRole) -> &[Endpoint] {
        match role {
            EndpointRole::Read => &self.read_endpoints,
            EndpointRole::Write => &self.write_endpoints,
            EndpointRole::ThinClient => &self.thin_client_endpoints,
        }
    }

    /// Endpoint serving a region, if the topology lists one
    pub fn endpoint_in_region(&self, region: &str) -> Option<&Endpoint> {
        self.by_region.get(region)
    }

    /// Whether an endpoint is currently available for a role.
    /// Expired marks count as available again; no sweep needed.
    pub fn is_available(&self, url: &str, role: EndpointRole) -> bool {
        match self.unavailable.get(url) {
            Some(record) => !record.roles.contains(&role) || record.until <= Instant::now(),
            None => true,
        }
    }

    /// Flag an endpoint unavailable for a role until the cooldown
    /// expires. Does not remove it from the preference lists.
    pub fn mark_unavailable(&mut self, url: &str, role: EndpointRole, cooldown: Duration) {
        let until = Instant::now() + cooldown;
        self.unavailable
            .entry(url.to_string())
            .and_modify(|record| {
                if !record.roles.contains(&role) {
                    record.roles.push(role);
                }
                record.until = until;
            })
            .or_insert(UnavailabilityRecord {
                roles: vec![role],
                until,
            });
    }

    /// Resolve the highest-preference available endpoint for a role.
    ///
    /// A region hint, when given, is tried first. Unavailable and
    /// excluded endpoints are skipped, except that the last remaining
    /// candidate for the role is returned even when flagged
    /// unavailable (fail-open: staleness beats a total outage).
    /// Excluded endpoints are never returned.
    pub fn resolve(
        &self,
        role: EndpointRole,
        region_hint: Option<&str>,
        excluded: &[String],
    ) -> Option<Endpoint> {
        if let Some(region) = region_hint {
            if let Some(ep) = self.by_region.get(region) {
                if ep.serves(role)
                    && !excluded.contains(&ep.url)
                    && self.is_available(&ep.url, role)
                {
                    return Some(ep.clone());
                }
            }
        }

        let candidates: Vec<&Endpoint> = self
            .endpoints_for(role)
            .iter()
            .filter(|ep| !excluded.contains(&ep.url))
            .collect();

        candidates
            .iter()
            .find(|ep| self.is_available(&ep.url, role))
            .or_else(|| candidates.first())
            .map(|ep| (*ep).clone())
    }

    /// Number of endpoints flagged unavailable (expired marks included)
    pub fn unavailable_count(&self) -> usize {
        self.unavailable.len()
    }
}

fn order_by_preference(
    regional: &[docdb_core::RegionalEndpoint],
    preferred_regions: &[String],
    roles: &[EndpointRole],
) -> Vec<Endpoint> {
    let mut ordered = Vec::with_capacity(regional.len());
    for region in preferred_regions {
        if let Some(re) = regional.iter().find(|re| re.region == *region) {
            ordered.push(Endpoint::new(&re.endpoint, &re.region, roles.to_vec()));
        }
    }
    for re in regional {
        if !ordered.iter().any(|ep: &Endpoint| ep.region == re.region) {
            ordered.push(Endpoint::new(&re.endpoint, &re.region, roles.to_vec()));
        }
    }
    ordered
}
