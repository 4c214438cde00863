//! Membership Tracker: the authoritative agent ↔ cluster index.
//!
//! # Structure
//!
//! Two-sided index kept in independent concurrent maps:
//!
//! - `agent_to_cluster`: which cluster an agent is in (at most one)
//! - `cluster_to_agents`: which agents a cluster holds
//!
//! plus the registry of active clusters, the position each agent was last
//! checked at, and the latest position reported for every present agent.
//!
//! # Consistency
//!
//! `agent_to_cluster[a] == c  ⇔  a ∈ cluster_to_agents[c]` after every update.
//! All cross-map edits go through [`MembershipTracker::move_agent`], which holds
//! the agent's `agent_to_cluster` entry while it edits the member sets. A
//! reader therefore sees either the old or the new assignment for that agent,
//! never half of each. Other agents are independent.
//!
//! Lock order is always agent shard → cluster shard. Nothing holds a
//! `cluster_to_agents` guard while touching `agent_to_cluster`.
//!
//! # Complexity
//!
//! - Join / teleport / move over threshold: O(c), c = active clusters
//! - Move under threshold: O(1)
//! - Leave, cluster lookup, member count: O(1)
//! - Capacity count: O(p), p = present agents

use bevy::log::{debug, info};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rustc_hash::FxHashSet;
use std::sync::Arc;

use super::cluster::{Cluster, ClusterId, MAX_CAPACITY};
use super::host::PositionSource;
use super::location::{AgentId, Location};
use super::report::TrackerStats;

#[cfg(test)]
mod tests;

pub struct MembershipTracker {
    agent_to_cluster: DashMap<AgentId, Arc<Cluster>>,
    cluster_to_agents: DashMap<ClusterId, FxHashSet<AgentId>>,
    active_clusters: DashMap<ClusterId, Arc<Cluster>>,
    last_checked: DashMap<AgentId, Location>,
    known_positions: DashMap<AgentId, Location>,
    movement_threshold: f64,
}

impl MembershipTracker {
    pub fn new(movement_threshold: f64) -> Self {
        Self {
            agent_to_cluster: DashMap::new(),
            cluster_to_agents: DashMap::new(),
            active_clusters: DashMap::new(),
            last_checked: DashMap::new(),
            known_positions: DashMap::new(),
            movement_threshold,
        }
    }

    // ------------------------------------------------------------------
    // Cluster registry
    // ------------------------------------------------------------------

    /// Start tracking a cluster. Registering twice is a no-op.
    pub fn register_cluster(&self, cluster: Arc<Cluster>) {
        let id = cluster.id();
        self.active_clusters.entry(id).or_insert(cluster);
        self.cluster_to_agents.entry(id).or_default();
    }

    /// Stop tracking a cluster and evict its members.
    ///
    /// Cached positions are kept so the next movement still has a baseline.
    pub fn unregister_cluster(&self, cluster: &Cluster) {
        let id = cluster.id();
        self.active_clusters.remove(&id);

        // Take the set out first so no cluster guard is held while we touch
        // agent entries.
        let Some((_, members)) = self.cluster_to_agents.remove(&id) else {
            return;
        };
        for agent in members {
            self.agent_to_cluster.remove_if(&agent, |_, current| current.id() == id);
        }
    }

    /// Drop all state. Used when the engine shuts down.
    pub fn clear_all(&self) {
        self.active_clusters.clear();
        self.cluster_to_agents.clear();
        self.agent_to_cluster.clear();
        self.last_checked.clear();
        self.known_positions.clear();
    }

    // ------------------------------------------------------------------
    // Membership updates
    // ------------------------------------------------------------------

    /// Oldest active cluster whose placement region holds `location`.
    ///
    /// Regions may overlap when the search had to fall back, so the lowest id
    /// wins to keep the choice reproducible.
    fn first_matching_cluster(&self, location: &Location) -> Option<Arc<Cluster>> {
        self.active_clusters
            .iter()
            .filter(|entry| entry.value().contains_point(location))
            .min_by_key(|entry| *entry.key())
            .map(|entry| Arc::clone(entry.value()))
    }

    fn attach(&self, agent: AgentId, cluster: ClusterId) -> bool {
        match self.cluster_to_agents.get_mut(&cluster) {
            Some(mut members) => {
                members.insert(agent);
                true
            }
            // Unregistered between the scan and now
            None => false,
        }
    }

    fn detach(&self, agent: AgentId, cluster: ClusterId) {
        if let Some(mut members) = self.cluster_to_agents.get_mut(&cluster) {
            members.remove(&agent);
        }
    }

    /// The single routine that edits both sides of the index.
    ///
    /// Returns the agent's cluster after the update.
    fn move_agent(&self, agent: AgentId, target: Option<Arc<Cluster>>) -> Option<Arc<Cluster>> {
        match self.agent_to_cluster.entry(agent) {
            Entry::Occupied(mut occupied) => {
                let current_id = occupied.get().id();
                if target.as_ref().map(|t| t.id()) == Some(current_id) {
                    return Some(Arc::clone(occupied.get()));
                }

                // Leave before joining so no member set snapshot lists the
                // agent twice
                self.detach(agent, current_id);
                let attached = target.filter(|t| self.attach(agent, t.id()));
                match attached {
                    Some(cluster) => {
                        debug!("[CLUSTERS] Agent {} moved {} -> {}", agent, current_id, cluster.id());
                        occupied.insert(Arc::clone(&cluster));
                        Some(cluster)
                    }
                    None => {
                        debug!("[CLUSTERS] Agent {} left cluster {}", agent, current_id);
                        occupied.remove();
                        None
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let cluster = target.filter(|t| self.attach(agent, t.id()))?;
                debug!("[CLUSTERS] Agent {} entered cluster {}", agent, cluster.id());
                vacant.insert(Arc::clone(&cluster));
                Some(cluster)
            }
        }
    }

    /// Re-derive the agent's cluster from its current location.
    ///
    /// Returns the cluster the agent ends up in, if any.
    pub fn recompute_membership(&self, agent: AgentId, location: &Location) -> Option<Arc<Cluster>> {
        let target = self.first_matching_cluster(location);
        let result = self.move_agent(agent, target);
        self.last_checked.insert(agent, location.clone());
        result
    }

    /// Whether a movement is large enough to warrant a recompute.
    ///
    /// Sub-threshold jitter is skipped; a world change always counts.
    pub fn should_recompute(&self, agent: AgentId, location: &Location) -> bool {
        let Some(last) = self.last_checked.get(&agent) else {
            return true;
        };
        if !last.same_world(location) {
            return true;
        }
        last.planar_distance_squared(location) >= self.movement_threshold * self.movement_threshold
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    pub fn on_join(&self, agent: AgentId, location: &Location) -> Option<Arc<Cluster>> {
        self.observe(agent, location)
    }

    /// Record a live position reported outside the notification stream (an
    /// agent that was present before the engine started, say) and recompute.
    pub fn observe(&self, agent: AgentId, location: &Location) -> Option<Arc<Cluster>> {
        self.record_position(agent, location);
        self.recompute_membership(agent, location)
    }

    /// Update the position capacity counting sees, without touching
    /// membership.
    pub fn record_position(&self, agent: AgentId, location: &Location) {
        self.known_positions.insert(agent, location.clone());
    }

    /// Movement. Only recomputes when [`Self::should_recompute`] allows.
    pub fn on_move(&self, agent: AgentId, location: &Location) {
        self.known_positions.insert(agent, location.clone());
        if self.should_recompute(agent, location) {
            self.recompute_membership(agent, location);
        }
    }

    /// Teleports always recompute: the position changed discontinuously.
    pub fn on_teleport(&self, agent: AgentId, location: &Location) -> Option<Arc<Cluster>> {
        self.known_positions.insert(agent, location.clone());
        self.recompute_membership(agent, location)
    }

    pub fn on_leave(&self, agent: AgentId) {
        self.move_agent(agent, None);
        self.last_checked.remove(&agent);
        self.known_positions.remove(&agent);
    }

    /// Recompute every agent the host reports, e.g. after a burst of new
    /// clusters.
    pub fn refresh_all(&self, source: &dyn PositionSource) {
        for (agent, location) in source.all_agents() {
            self.known_positions.insert(agent, location.clone());
            self.recompute_membership(agent, &location);
        }
    }

    /// Unregister every cluster whose placement region is empty.
    ///
    /// Returns how many clusters were removed.
    pub fn cleanup_empty_clusters(&self) -> usize {
        // Collect first: unregistering while iterating would re-lock shards
        let empty: Vec<Arc<Cluster>> = self
            .active_clusters
            .iter()
            .filter(|entry| self.member_count(entry.value()) == 0)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for cluster in &empty {
            self.unregister_cluster(cluster);
            debug!("[CLUSTERS] Cleaned up empty cluster at {}", cluster.anchor());
        }
        if !empty.is_empty() {
            info!("[CLUSTERS] Cleaned up {} empty clusters", empty.len());
        }
        empty.len()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_cluster(&self, agent: AgentId) -> Option<Arc<Cluster>> {
        self.agent_to_cluster.get(&agent).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of the agents in the cluster's placement region.
    pub fn get_members(&self, cluster: &Cluster) -> FxHashSet<AgentId> {
        self.cluster_to_agents
            .get(&cluster.id())
            .map(|members| members.value().clone())
            .unwrap_or_default()
    }

    pub fn member_count(&self, cluster: &Cluster) -> usize {
        self.cluster_to_agents
            .get(&cluster.id())
            .map_or(0, |members| members.len())
    }

    /// Agents physically inside the capacity region, whichever cluster their
    /// membership says. Scans every known position.
    pub fn get_capacity_count(&self, cluster: &Cluster) -> usize {
        self.known_positions
            .iter()
            .filter(|entry| cluster.contains_point_for_capacity(entry.value()))
            .count()
    }

    pub fn is_at_capacity(&self, cluster: &Cluster) -> bool {
        self.get_capacity_count(cluster) >= MAX_CAPACITY
    }

    pub fn get_active_clusters(&self) -> Vec<Arc<Cluster>> {
        let mut clusters: Vec<_> = self
            .active_clusters
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        clusters.sort_by_key(|cluster| cluster.id());
        clusters
    }

    pub fn is_registered(&self, cluster: &Cluster) -> bool {
        self.active_clusters.contains_key(&cluster.id())
    }

    pub fn last_checked_position(&self, agent: AgentId) -> Option<Location> {
        self.last_checked.get(&agent).map(|entry| entry.value().clone())
    }

    pub fn known_position(&self, agent: AgentId) -> Option<Location> {
        self.known_positions.get(&agent).map(|entry| entry.value().clone())
    }

    pub fn stats(&self) -> TrackerStats {
        let total_mappings = self
            .cluster_to_agents
            .iter()
            .map(|entry| entry.value().len())
            .sum();
        TrackerStats::new(
            self.agent_to_cluster.len(),
            self.active_clusters.len(),
            total_mappings,
        )
    }

    /// Describe every break in the two-sided index. Empty when consistent.
    ///
    /// Only meaningful while no updates are in flight.
    pub fn consistency_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for entry in self.agent_to_cluster.iter() {
            let (agent, cluster) = (entry.key(), entry.value());
            match self.cluster_to_agents.get(&cluster.id()) {
                Some(members) if members.contains(agent) => {}
                Some(_) => violations.push(format!("{agent} maps to {} but is not a member", cluster.id())),
                None => violations.push(format!("{agent} maps to unregistered {}", cluster.id())),
            }
        }

        let sets: Vec<(ClusterId, FxHashSet<AgentId>)> = self
            .cluster_to_agents
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        for (id, members) in sets {
            if !self.active_clusters.contains_key(&id) {
                violations.push(format!("member set for inactive {id}"));
            }
            for agent in members {
                let mapped = self.agent_to_cluster.get(&agent).map(|c| c.id());
                if mapped != Some(id) {
                    violations.push(format!("{agent} is a member of {id} but maps to {mapped:?}"));
                }
            }
        }

        violations
    }
}
