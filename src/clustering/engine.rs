//! The clustering engine: one explicit context owning every component.
//!
//! Hosts build a [`ClusterEngine`] when clustering is enabled and call
//! [`ClusterEngine::shutdown`] when it is disabled. Nothing here is global, so
//! several engines (one per test, say) can coexist in a process.

use bevy::log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::cluster::Cluster;
use super::config::ClusterConfig;
use super::error::ClusterResult;
use super::finder::{ClusterFinder, SearchParams};
use super::host::{PositionSource, WorldTerrain};
use super::interceptor::{IgnoreReason, PlacementInterceptor, RelocationOutcome, RelocationRequest};
use super::location::{AgentId, Location, WorldId};
use super::report::{AgentClusterStatus, ClusterReport, TrackerStats, WorldClusterStats};
use super::tracker::MembershipTracker;

pub struct ClusterEngine {
    config: ClusterConfig,
    tracker: Arc<MembershipTracker>,
    finder: Arc<ClusterFinder>,
    interceptor: PlacementInterceptor,
    positions: Arc<dyn PositionSource>,
    terrain: Arc<dyn WorldTerrain>,
    enabled: AtomicBool,
}

impl ClusterEngine {
    /// Validate the config and wire up the components.
    pub fn new(
        config: ClusterConfig,
        positions: Arc<dyn PositionSource>,
        terrain: Arc<dyn WorldTerrain>,
    ) -> ClusterResult<Self> {
        config.validate()?;

        let tracker = Arc::new(MembershipTracker::new(config.movement_threshold));
        let finder = Arc::new(ClusterFinder::new(Arc::clone(&tracker), SearchParams::from(&config)));
        let interceptor = PlacementInterceptor::new(Arc::clone(&tracker), Arc::clone(&finder), &config);

        info!(
            "[CLUSTERS] Engine enabled (search radius {}, separation {}, cooldown {:.1}s)",
            config.search_radius, config.min_cluster_separation, config.processing_cooldown_secs
        );

        Ok(Self {
            config,
            tracker,
            finder,
            interceptor,
            positions,
            terrain,
            enabled: AtomicBool::new(true),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Drop all clusters, memberships and processing markers. Later
    /// notifications and relocations are ignored.
    pub fn shutdown(&self) {
        if !self.enabled.swap(false, Ordering::AcqRel) {
            return;
        }
        let stats = self.tracker.stats();
        self.tracker.clear_all();
        self.interceptor.clear();
        info!("[CLUSTERS] Engine disabled, dropped {}", stats);
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<MembershipTracker> {
        &self.tracker
    }

    pub fn interceptor(&self) -> &PlacementInterceptor {
        &self.interceptor
    }

    // Notifications

    pub fn on_join(&self, agent: AgentId, location: &Location) {
        if self.is_enabled() {
            self.tracker.on_join(agent, location);
        }
    }

    pub fn on_move(&self, agent: AgentId, location: &Location) {
        if self.is_enabled() {
            self.tracker.on_move(agent, location);
        }
    }

    pub fn on_teleport(&self, agent: AgentId, location: &Location) {
        if self.is_enabled() {
            self.tracker.on_teleport(agent, location);
        }
    }

    pub fn on_leave(&self, agent: AgentId) {
        if self.is_enabled() {
            self.tracker.on_leave(agent);
        }
    }

    /// Re-read every agent position from the host.
    pub fn refresh_all(&self) {
        if self.is_enabled() {
            self.tracker.refresh_all(self.positions.as_ref());
        }
    }

    // Placement

    /// Run a relocation through the interceptor, possibly rewriting its
    /// destination.
    pub fn intercept(&self, request: &mut RelocationRequest, now: Instant) -> RelocationOutcome {
        if !self.is_enabled() {
            return RelocationOutcome::Ignored(IgnoreReason::Disabled);
        }
        self.interceptor
            .on_relocation(request, self.positions.as_ref(), self.terrain.as_ref(), now)
    }

    pub fn find_best_cluster(&self, world: &WorldId) -> ClusterResult<Option<Arc<Cluster>>> {
        self.finder
            .find_best_cluster(world, self.positions.as_ref(), self.terrain.as_ref())
    }

    pub fn teleport_to_cluster(&self, agent: AgentId, cluster: &Cluster, now: Instant) -> ClusterResult<Location> {
        self.interceptor
            .teleport_to_cluster(agent, cluster, self.terrain.as_ref(), now)
    }

    // Maintenance

    /// Expire processing markers whose cooldown has passed.
    pub fn release_expired(&self, now: Instant) -> usize {
        let released = self.interceptor.release_expired(now);
        if released > 0 {
            debug!("[CLUSTERS] Released {} processing markers", released);
        }
        released
    }

    /// Remove clusters nobody stands in any more.
    pub fn cleanup(&self) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        self.tracker.cleanup_empty_clusters()
    }

    // Diagnostics

    pub fn report_for(&self, agent: AgentId) -> AgentClusterStatus {
        match self.tracker.get_cluster(agent) {
            Some(cluster) => {
                let viewer = self.positions.location_of(agent);
                AgentClusterStatus::Clustered(ClusterReport::build(&self.tracker, &cluster, viewer.as_ref()))
            }
            None => AgentClusterStatus::Unclustered {
                active_clusters: self.tracker.get_active_clusters().len(),
            },
        }
    }

    pub fn world_stats(&self, world: &WorldId) -> WorldClusterStats {
        self.finder.world_stats(world)
    }

    pub fn stats(&self) -> TrackerStats {
        self.tracker.stats()
    }
}
