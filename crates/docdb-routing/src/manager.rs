//! Global endpoint manager
//!
//! Owns the endpoint directory, resolves endpoints for requests,
//! tracks endpoint health, and keeps the directory fresh against
//! account topology through a throttled, coalesced refresh.

use crate::directory::EndpointDirectory;
use crate::endpoint::{Endpoint, EndpointRole};
use docdb_core::{
    AccountMetadataSource, DocDbError, OperationType, RequestContext, ResourceType, Result,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Tuning knobs for the endpoint manager
#[derive(Debug, Clone)]
pub struct LocationConfig {
    /// Regions to prefer, closest first; empty = account order
    pub preferred_regions: Vec<String>,
    /// How long a flagged endpoint stays out of rotation
    pub unavailability_cooldown: Duration,
    /// Minimum time between unforced topology refreshes
    pub min_refresh_interval: Duration,
    /// Period of the background refresh loop
    pub background_refresh_interval: Duration,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            preferred_regions: Vec::new(),
            unavailability_cooldown: Duration::from_secs(60),
            min_refresh_interval: Duration::from_secs(30),
            background_refresh_interval: Duration::from_secs(300),
        }
    }
}

/// Resolves endpoints for requests and performs health-based failover
pub struct GlobalEndpointManager {
    account_source: Arc<dyn AccountMetadataSource>,
    config: LocationConfig,
    /// Published snapshot; replaced wholesale, never edited in place
    directory: RwLock<Arc<EndpointDirectory>>,
    multi_write_enabled: AtomicBool,
    last_refresh: Mutex<Option<Instant>>,
    /// Coalesces concurrent refreshes into one topology fetch
    refresh_gate: tokio::sync::Mutex<()>,
    shutdown: AtomicBool,
}

impl GlobalEndpointManager {
    /// Create a manager with an empty directory. Call
    /// [`refresh_locations`](Self::refresh_locations) before routing.
    pub fn new(account_source: Arc<dyn AccountMetadataSource>, config: LocationConfig) -> Self {
        Self {
            account_source,
            config,
            directory: RwLock::new(Arc::new(EndpointDirectory::default())),
            multi_write_enabled: AtomicBool::new(false),
            last_refresh: Mutex::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Resolve the endpoint a request should be sent to.
    ///
    /// Reads go to the nearest available read endpoint, honoring any
    /// region hint. Writes go to the single current write region
    /// unless multi-write applies to the resource/operation, in which
    /// case the nearest available write endpoint (hint honored) wins.
    pub fn resolve_endpoint(&self, request: &RequestContext) -> Result<Endpoint> {
        let directory = self.snapshot();
        let (role, hint) = if request.operation_type.is_write() {
            let multi_write = self
                .can_use_multiple_write_locations(request.resource_type, request.operation_type);
            let hint = if multi_write {
                request.region_hint.as_deref()
            } else {
                // Single-write mode pins writes to the current write
                // region; hints are ignored.
                None
            };
            (EndpointRole::Write, hint)
        } else {
            (EndpointRole::Read, request.region_hint.as_deref())
        };

        directory
            .resolve(role, hint, &request.excluded_endpoints)
            .ok_or_else(|| {
                DocDbError::NoEndpointsAvailable(format!(
                    "{} {}",
                    request.operation_type, request.resource_link
                ))
            })
    }

    /// Flag an endpoint unavailable for reads after an endpoint-level
    /// transport failure
    pub fn mark_endpoint_unavailable_for_read(&self, url: &str) {
        self.mark_unavailable(url, EndpointRole::Read);
    }

    /// Flag an endpoint unavailable for writes after an endpoint-level
    /// transport failure
    pub fn mark_endpoint_unavailable_for_write(&self, url: &str) {
        self.mark_unavailable(url, EndpointRole::Write);
    }

    fn mark_unavailable(&self, url: &str, role: EndpointRole) {
        warn!(
            endpoint = url,
            role = %role,
            cooldown_secs = self.config.unavailability_cooldown.as_secs(),
            "Marking endpoint unavailable"
        );
        let mut guard = self.directory.write();
        let mut updated = (**guard).clone();
        updated.mark_unavailable(url, role, self.config.unavailability_cooldown);
        *guard = Arc::new(updated);
    }

    /// Whether writes for this resource/operation may use any write
    /// region rather than the single current write region
    pub fn can_use_multiple_write_locations(
        &self,
        resource_type: ResourceType,
        operation_type: OperationType,
    ) -> bool {
        self.multi_write_enabled.load(Ordering::Acquire)
            && operation_type.is_write()
            && resource_type == ResourceType::Document
    }

    /// Fetch current account topology and atomically replace the
    /// directory snapshot. Unforced calls inside the minimum refresh
    /// interval are no-ops; concurrent callers coalesce onto one fetch.
    pub async fn refresh_locations(&self, force: bool) -> Result<()> {
        let _gate = self.refresh_gate.lock().await;

        if !force {
            let last = *self.last_refresh.lock();
            if let Some(last) = last {
                if last.elapsed() < self.config.min_refresh_interval {
                    debug!("Skipping topology refresh inside minimum interval");
                    return Ok(());
                }
            }
        }

        let topology = self.account_source.fetch_topology().await?;

        let mut directory =
            EndpointDirectory::from_topology(&topology, &self.config.preferred_regions);
        {
            let previous = self.snapshot();
            directory.carry_unavailability_from(&previous);
        }

        self.multi_write_enabled
            .store(topology.multi_write_enabled, Ordering::Release);
        *self.directory.write() = Arc::new(directory);
        *self.last_refresh.lock() = Some(Instant::now());

        info!(
            write_regions = topology.writable_regions.len(),
            read_regions = topology.readable_regions.len(),
            multi_write = topology.multi_write_enabled,
            "Refreshed endpoint directory"
        );
        Ok(())
    }

    /// Spawn the periodic refresh loop. Refresh failures are logged
    /// and swallowed; the directory degrades to last-known-good.
    pub fn start_background_refresh(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.background_refresh_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a freshly
            // started loop does not double the initial refresh.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if manager.shutdown.load(Ordering::Acquire) {
                    debug!("Background location refresh loop stopping");
                    break;
                }
                if let Err(err) = manager.refresh_locations(false).await {
                    warn!(error = %err, "Background location refresh failed");
                }
            }
        })
    }

    /// Stop the background refresh loop at its next tick
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Current directory snapshot
    pub fn snapshot(&self) -> Arc<EndpointDirectory> {
        Arc::clone(&self.directory.read())
    }
}
