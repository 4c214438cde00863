//! Placement Interceptor: redirects long feature-triggered teleports into
//! clusters.
//!
//! Per agent the interceptor is `Idle → Processing → Idle`. Accepting a
//! relocation marks the agent processing until a short cooldown has passed, so
//! the teleport it rewrites (which the host reports again) is not intercepted
//! a second time. The cooldown runs from resolution, not from the teleport
//! completing: the host settles positions asynchronously.
//!
//! The interceptor fails open. Whatever goes wrong, the destination the
//! upstream feature picked is left as it was.

use bevy::log::{debug, error, info};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::cluster::{Cluster, MAX_CAPACITY};
use super::config::ClusterConfig;
use super::error::ClusterResult;
use super::finder::ClusterFinder;
use super::host::{PositionSource, WorldTerrain};
use super::location::{AgentId, Location};
use super::tracker::MembershipTracker;


/// Why the host moved an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeleportCause {
    /// Triggered by a feature (random teleport, plugin command).
    Feature,
    /// The agent moved itself (pearl, portal, command it typed).
    AgentInitiated,
    /// Anything else the host reports.
    Other,
}

/// A pending teleport whose destination may still be changed.
#[derive(Debug, Clone, PartialEq)]
pub struct RelocationRequest {
    pub agent: AgentId,
    pub origin: Location,
    pub destination: Location,
    pub cause: TeleportCause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The engine has been shut down.
    Disabled,
    NotFeatureTriggered,
    AlreadyProcessing,
    TooShort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    /// The destination is already inside the agent's cluster.
    SameCluster,
    /// Nobody else in the destination world.
    DefaultPlacement,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelocationOutcome {
    /// Not a relocation the interceptor handles. The agent stays idle.
    Ignored(IgnoreReason),
    /// Accepted, destination untouched.
    Kept(KeepReason),
    /// Destination rewritten into the cluster.
    Redirected { cluster: Arc<Cluster> },
    /// Resolution failed; destination untouched.
    Failed(String),
}

impl RelocationOutcome {
    pub fn was_accepted(&self) -> bool {
        !matches!(self, RelocationOutcome::Ignored(_))
    }
}

pub struct PlacementInterceptor {
    tracker: Arc<MembershipTracker>,
    finder: Arc<ClusterFinder>,
    /// Agent → instant its processing marker expires.
    processing: DashMap<AgentId, Instant>,
    min_relocation_distance: f64,
    cooldown: Duration,
}

impl PlacementInterceptor {
    pub fn new(tracker: Arc<MembershipTracker>, finder: Arc<ClusterFinder>, config: &ClusterConfig) -> Self {
        Self {
            tracker,
            finder,
            processing: DashMap::new(),
            min_relocation_distance: config.min_relocation_distance,
            cooldown: config.processing_cooldown(),
        }
    }

    pub fn is_processing(&self, agent: AgentId, now: Instant) -> bool {
        self.processing.get(&agent).is_some_and(|until| *until > now)
    }

    pub fn processing_count(&self) -> usize {
        self.processing.len()
    }

    /// Drop markers whose cooldown has elapsed. Returns how many were dropped.
    pub fn release_expired(&self, now: Instant) -> usize {
        let before = self.processing.len();
        self.processing.retain(|_, until| *until > now);
        before.saturating_sub(self.processing.len())
    }

    pub fn clear(&self) {
        self.processing.clear();
    }

    /// Claim the agent for processing. Fails if it is already claimed.
    fn try_mark_processing(&self, agent: AgentId, now: Instant) -> bool {
        match self.processing.entry(agent) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() > now {
                    return false;
                }
                occupied.insert(now + self.cooldown);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now + self.cooldown);
                true
            }
        }
    }

    fn schedule_release(&self, agent: AgentId, now: Instant) {
        self.processing.insert(agent, now + self.cooldown);
    }

    /// Whether the request is a relocation this interceptor handles.
    fn screen(&self, request: &RelocationRequest, now: Instant) -> Option<IgnoreReason> {
        if request.cause != TeleportCause::Feature {
            return Some(IgnoreReason::NotFeatureTriggered);
        }
        if self.is_processing(request.agent, now) {
            return Some(IgnoreReason::AlreadyProcessing);
        }
        // Cross-world relocations always qualify
        match request.origin.planar_distance(&request.destination) {
            Some(distance) if distance < self.min_relocation_distance => Some(IgnoreReason::TooShort),
            _ => None,
        }
    }

    /// Entry point for a relocation notification.
    ///
    /// May rewrite `request.destination`. Never leaves it half-modified.
    pub fn on_relocation(
        &self,
        request: &mut RelocationRequest,
        positions: &dyn PositionSource,
        terrain: &dyn WorldTerrain,
        now: Instant,
    ) -> RelocationOutcome {
        self.on_relocation_with(request, positions, terrain, now, &mut rand::rng())
    }

    pub fn on_relocation_with<R: Rng>(
        &self,
        request: &mut RelocationRequest,
        positions: &dyn PositionSource,
        terrain: &dyn WorldTerrain,
        now: Instant,
        rng: &mut R,
    ) -> RelocationOutcome {
        if let Some(reason) = self.screen(request, now) {
            return RelocationOutcome::Ignored(reason);
        }
        if !self.try_mark_processing(request.agent, now) {
            return RelocationOutcome::Ignored(IgnoreReason::AlreadyProcessing);
        }

        info!(
            "[CLUSTERS] Detected relocation for {} ({})",
            request.agent,
            describe_distance(&request.origin, &request.destination)
        );

        let outcome = match self.resolve(request, positions, terrain, rng) {
            Ok(Resolution::Keep(reason)) => RelocationOutcome::Kept(reason),
            Ok(Resolution::Redirect { cluster, destination }) => {
                info!("[CLUSTERS] Redirected {} to cluster at {}", request.agent, destination);
                info!(
                    "[CLUSTERS] Cluster capacity: {}/{} agents",
                    self.tracker.get_capacity_count(&cluster),
                    MAX_CAPACITY
                );
                request.destination = destination;
                RelocationOutcome::Redirected { cluster }
            }
            Err(e) => {
                error!("[CLUSTERS] Error during cluster assignment for {}: {}", request.agent, e);
                RelocationOutcome::Failed(e.to_string())
            }
        };

        self.schedule_release(request.agent, now);
        outcome
    }

    /// Work out the new destination without touching the request.
    fn resolve<R: Rng>(
        &self,
        request: &RelocationRequest,
        positions: &dyn PositionSource,
        terrain: &dyn WorldTerrain,
        rng: &mut R,
    ) -> ClusterResult<Resolution> {
        if let Some(current) = self.tracker.get_cluster(request.agent) {
            if current.contains_point(&request.destination) {
                debug!("[CLUSTERS] Agent {} staying in same cluster", request.agent);
                return Ok(Resolution::Keep(KeepReason::SameCluster));
            }
        }

        let world = &request.destination.world;
        let Some(cluster) = self
            .finder
            .find_best_cluster_for(world, Some(request.agent), positions, terrain, rng)?
        else {
            info!("[CLUSTERS] Agent {} keeps default placement (nobody else in {})", request.agent, world);
            return Ok(Resolution::Keep(KeepReason::DefaultPlacement));
        };

        let destination = placement_in(&cluster, terrain, rng)?
            .with_facing(request.destination.yaw, request.destination.pitch);
        Ok(Resolution::Redirect { cluster, destination })
    }

    /// Send an agent straight into a cluster, bypassing the search.
    ///
    /// Returns the destination for the host to teleport to. The agent is marked
    /// processing so the resulting teleport is not intercepted.
    pub fn teleport_to_cluster(
        &self,
        agent: AgentId,
        cluster: &Cluster,
        terrain: &dyn WorldTerrain,
        now: Instant,
    ) -> ClusterResult<Location> {
        let destination = placement_in(cluster, terrain, &mut rand::rng())?;
        self.schedule_release(agent, now);
        info!("[CLUSTERS] Manually placing {} in cluster at {}", agent, destination);
        Ok(destination)
    }
}

enum Resolution {
    Keep(KeepReason),
    Redirect { cluster: Arc<Cluster>, destination: Location },
}

/// Random point in the cluster, standing one block above the terrain.
fn placement_in<R: Rng>(cluster: &Cluster, terrain: &dyn WorldTerrain, rng: &mut R) -> ClusterResult<Location> {
    let point = cluster.random_point_inside(rng);
    let ground = terrain.terrain_height(&point.world, point.x(), point.z())?;
    Ok(point.with_y(ground + 1.0))
}

fn describe_distance(from: &Location, to: &Location) -> String {
    match from.planar_distance(to) {
        Some(distance) => format!("distance: {distance:.1}"),
        None => format!("cross-world: {} -> {}", from.world, to.world),
    }
}
