//! Cluster Finder: decides which cluster a relocating agent should land in.
//!
//! # Algorithm
//!
//! 1. Nobody else in the world → no cluster, the host keeps its own placement
//! 2. Seed a cluster under every agent that is not in one yet
//! 3. Oldest cluster in the world with spare capacity wins
//! 4. Everything full → search for a fresh spot, preferring one with nobody
//!    nearby, otherwise the least crowded spot seen
//!
//! The finder holds no state of its own; every cluster it creates is handed to
//! the [`MembershipTracker`].

use bevy::log::{debug, info, warn};
use rand::Rng;
use rtp_clusters_macros::profile;
use std::sync::Arc;

use super::cluster::{Cluster, CAPACITY_RADIUS, MAX_CAPACITY};
use super::config::ClusterConfig;
use super::error::ClusterResult;
use super::host::{PositionSource, WorldTerrain};
use super::location::{AgentId, Location, WorldId};
use super::report::WorldClusterStats;
use super::tracker::MembershipTracker;


/// Search parameters, copied out of [`ClusterConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    pub search_radius: f64,
    pub min_cluster_separation: f64,
    pub max_search_attempts: usize,
    pub fallback_jitter: f64,
}

impl From<&ClusterConfig> for SearchParams {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            search_radius: config.search_radius,
            min_cluster_separation: config.min_cluster_separation,
            max_search_attempts: config.max_search_attempts,
            fallback_jitter: config.fallback_jitter,
        }
    }
}

impl Default for SearchParams {
    fn default() -> Self {
        Self::from(&ClusterConfig::default())
    }
}

/// How a new-cluster search ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// A spot with nobody in its capacity region.
    Empty { location: Location, attempts: usize },
    /// The least crowded spot that kept its distance from existing clusters.
    LeastCrowded { location: Location, nearby_agents: usize },
    /// Nothing kept its distance; a jittered spawn offset was used instead.
    Fallback { location: Location },
}

impl SearchOutcome {
    pub fn location(&self) -> &Location {
        match self {
            SearchOutcome::Empty { location, .. }
            | SearchOutcome::LeastCrowded { location, .. }
            | SearchOutcome::Fallback { location } => location,
        }
    }

    pub fn into_location(self) -> Location {
        match self {
            SearchOutcome::Empty { location, .. }
            | SearchOutcome::LeastCrowded { location, .. }
            | SearchOutcome::Fallback { location } => location,
        }
    }
}

pub struct ClusterFinder {
    tracker: Arc<MembershipTracker>,
    params: SearchParams,
}

impl ClusterFinder {
    pub fn new(tracker: Arc<MembershipTracker>, params: SearchParams) -> Self {
        Self { tracker, params }
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Best cluster for anyone arriving in `world`.
    pub fn find_best_cluster(
        &self,
        world: &WorldId,
        positions: &dyn PositionSource,
        terrain: &dyn WorldTerrain,
    ) -> ClusterResult<Option<Arc<Cluster>>> {
        self.find_best_cluster_for(world, None, positions, terrain, &mut rand::rng())
    }

    /// Best cluster for `relocating` arriving in `world`.
    ///
    /// The relocating agent is about to leave its current spot, so it neither
    /// seeds a cluster nor counts as a neighbour anywhere, and the cluster it
    /// is leaving is never offered back to it.
    #[profile(2)]
    pub fn find_best_cluster_for<R: Rng>(
        &self,
        world: &WorldId,
        relocating: Option<AgentId>,
        positions: &dyn PositionSource,
        terrain: &dyn WorldTerrain,
        rng: &mut R,
    ) -> ClusterResult<Option<Arc<Cluster>>> {
        let others: Vec<(AgentId, Location)> = positions
            .agents_in(world)
            .into_iter()
            .filter(|(agent, _)| Some(*agent) != relocating)
            .collect();

        if others.is_empty() {
            info!("[CLUSTERS] No agents found in {}, using default placement", world);
            return Ok(None);
        }
        debug!("[CLUSTERS] Found {} agents in {}", others.len(), world);

        self.seed_unclustered(&others);

        let clusters = self.clusters_in(world);
        let origin = relocating.map(|agent| self.origin_of(agent));
        let candidate = clusters.iter().find(|cluster| {
            if origin.as_ref().is_some_and(|origin| origin.is_origin(cluster)) {
                debug!("[CLUSTERS] Skipping {}: relocating agent is leaving it", cluster);
                return false;
            }
            !self.is_full(cluster, relocating)
        });
        if let Some(cluster) = candidate {
            info!(
                "[CLUSTERS] Cluster at {} has {}/{} capacity",
                cluster.anchor(),
                self.capacity_count(cluster, relocating),
                MAX_CAPACITY
            );
            return Ok(Some(Arc::clone(cluster)));
        }

        info!("[CLUSTERS] All {} clusters in {} at capacity, searching for a new location", clusters.len(), world);
        let outcome = self.search_new_location(world, &clusters, &others, terrain, rng)?;
        let cluster = Arc::new(Cluster::new(outcome.location().clone()));
        self.tracker.register_cluster(Arc::clone(&cluster));

        match &outcome {
            SearchOutcome::Empty { attempts, .. } => {
                info!("[CLUSTERS] Created {} with 0 nearby agents after {} attempts", cluster, attempts)
            }
            SearchOutcome::LeastCrowded { nearby_agents, .. } => {
                info!("[CLUSTERS] Created {} with {} nearby agents", cluster, nearby_agents)
            }
            SearchOutcome::Fallback { .. } => {
                warn!("[CLUSTERS] Could not find a separated location, created fallback {}", cluster)
            }
        }
        Ok(Some(cluster))
    }

    /// Make sure every listed agent belongs to some cluster, anchoring a new
    /// one at the agent's own position when nothing covers it.
    fn seed_unclustered(&self, agents: &[(AgentId, Location)]) {
        for (agent, location) in agents {
            if self.tracker.get_cluster(*agent).is_some() {
                if self.tracker.known_position(*agent).is_none() {
                    self.tracker.record_position(*agent, location);
                }
                continue;
            }
            // A cluster seeded earlier in this pass may already cover it
            if self.tracker.observe(*agent, location).is_some() {
                continue;
            }
            let cluster = Arc::new(Cluster::new(location.clone()));
            self.tracker.register_cluster(Arc::clone(&cluster));
            self.tracker.recompute_membership(*agent, location);
            info!("[CLUSTERS] Created cluster for untracked agent at {}", location);
        }
    }

    fn origin_of(&self, agent: AgentId) -> Origin {
        Origin {
            cluster: self.tracker.get_cluster(agent),
            position: self.tracker.known_position(agent),
        }
    }

    fn clusters_in(&self, world: &WorldId) -> Vec<Arc<Cluster>> {
        // Already sorted oldest first
        self.tracker
            .get_active_clusters()
            .into_iter()
            .filter(|cluster| cluster.world() == world)
            .collect()
    }

    fn capacity_count(&self, cluster: &Cluster, relocating: Option<AgentId>) -> usize {
        let count = self.tracker.get_capacity_count(cluster);
        let own = relocating
            .and_then(|agent| self.tracker.known_position(agent))
            .is_some_and(|location| cluster.contains_point_for_capacity(&location));
        count.saturating_sub(usize::from(own))
    }

    fn is_full(&self, cluster: &Cluster, relocating: Option<AgentId>) -> bool {
        self.capacity_count(cluster, relocating) >= MAX_CAPACITY
    }

    /// Bounded random search for a new anchor.
    ///
    /// Candidates closer than `min_cluster_separation` to an existing cluster
    /// are wasted attempts. The first candidate with nobody around wins
    /// outright; otherwise the strictly least crowded one (earliest on ties).
    pub fn search_new_location<R: Rng>(
        &self,
        world: &WorldId,
        existing: &[Arc<Cluster>],
        agents: &[(AgentId, Location)],
        terrain: &dyn WorldTerrain,
        rng: &mut R,
    ) -> ClusterResult<SearchOutcome> {
        let mut best: Option<(Location, usize)> = None;

        for attempt in 0..self.params.max_search_attempts {
            let candidate = self.random_candidate(world, existing, terrain, rng)?;

            if !self.is_separated(&candidate, existing) {
                continue;
            }

            let nearby = count_agents_in_square(&candidate, CAPACITY_RADIUS, agents);
            if nearby == 0 {
                debug!("[CLUSTERS] Found location with 0 agents after {} attempts", attempt + 1);
                return Ok(SearchOutcome::Empty { location: candidate, attempts: attempt + 1 });
            }
            if best.as_ref().map_or(true, |(_, fewest)| nearby < *fewest) {
                best = Some((candidate, nearby));
            }
        }

        if let Some((location, nearby_agents)) = best {
            return Ok(SearchOutcome::LeastCrowded { location, nearby_agents });
        }

        let jitter = self.params.fallback_jitter;
        let spawn = terrain.reference_point(world)?;
        let location = spawn.offset(symmetric(rng, jitter), symmetric(rng, jitter));
        let height = terrain.terrain_height(world, location.x(), location.z())?;
        Ok(SearchOutcome::Fallback { location: location.with_y(height) })
    }

    /// Offset from either a random existing anchor or the world's reference
    /// point, snapped to the terrain.
    fn random_candidate<R: Rng>(
        &self,
        world: &WorldId,
        existing: &[Arc<Cluster>],
        terrain: &dyn WorldTerrain,
        rng: &mut R,
    ) -> ClusterResult<Location> {
        let center = if !existing.is_empty() && rng.random_bool(0.5) {
            existing[rng.random_range(0..existing.len())].anchor().clone()
        } else {
            terrain.reference_point(world)?
        };

        let radius = self.params.search_radius;
        let candidate = center.offset(symmetric(rng, radius), symmetric(rng, radius));
        let height = terrain.terrain_height(world, candidate.x(), candidate.z())?;
        Ok(candidate.with_y(height))
    }

    fn is_separated(&self, candidate: &Location, existing: &[Arc<Cluster>]) -> bool {
        existing
            .iter()
            .all(|cluster| cluster.distance_to(candidate) >= self.params.min_cluster_separation)
    }

    pub fn world_stats(&self, world: &WorldId) -> WorldClusterStats {
        WorldClusterStats::collect(&self.tracker, world)
    }
}

/// Where a relocating agent is leaving from. Sending it back there would undo
/// the relocation.
struct Origin {
    cluster: Option<Arc<Cluster>>,
    position: Option<Location>,
}

impl Origin {
    fn is_origin(&self, cluster: &Cluster) -> bool {
        self.cluster.as_ref().is_some_and(|own| own.id() == cluster.id())
            || self.position.as_ref().is_some_and(|position| cluster.contains_point(position))
    }
}

fn symmetric<R: Rng>(rng: &mut R, radius: f64) -> f64 {
    if radius <= 0.0 {
        return 0.0;
    }
    rng.random_range(-radius..=radius)
}

/// Agents whose live position falls in the square of half-width `radius`.
pub fn count_agents_in_square(center: &Location, radius: f64, agents: &[(AgentId, Location)]) -> usize {
    agents
        .iter()
        .filter(|(_, location)| {
            location.world == center.world
                && (location.x() - center.x()).abs() <= radius
                && (location.z() - center.z()).abs() <= radius
        })
        .count()
}
