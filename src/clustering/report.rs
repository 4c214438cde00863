//! Read-only views for diagnostic front ends.
//!
//! Everything here is a snapshot: building one never mutates the tracker.

use serde::Serialize;
use std::fmt;

use super::cluster::{Cluster, ClusterId, MAX_CAPACITY};
use super::location::{AgentId, Location, WorldId};
use super::tracker::MembershipTracker;

/// Fraction of capacity at which a cluster is shown as nearly full.
pub const NEARLY_FULL_RATIO: f64 = 0.75;

// Rough per-entry footprints used by the memory estimate
const BYTES_PER_TRACKED_AGENT: usize = 64;
const BYTES_PER_CLUSTER: usize = 16;
const BYTES_PER_MAPPING: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CapacityStatus {
    Available,
    NearlyFull,
    Full,
}

/// Everything the status command shows about one agent's cluster.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    pub cluster_id: ClusterId,
    pub anchor: Location,
    pub world: WorldId,
    pub region_size: f64,
    pub member_count: usize,
    pub capacity_count: usize,
    pub max_capacity: usize,
    pub remaining_slots: usize,
    pub at_capacity: bool,
    pub status: CapacityStatus,
    /// Sorted so repeated reports are stable.
    pub members: Vec<AgentId>,
    /// 3D distance from the anchor to the agent, when the agent position is known.
    pub distance_from_anchor: Option<f64>,
}

impl ClusterReport {
    pub fn build(tracker: &MembershipTracker, cluster: &Cluster, viewer: Option<&Location>) -> Self {
        let mut members: Vec<_> = tracker.get_members(cluster).into_iter().collect();
        members.sort();
        let capacity_count = tracker.get_capacity_count(cluster);
        let at_capacity = capacity_count >= MAX_CAPACITY;
        let status = if at_capacity {
            CapacityStatus::Full
        } else if capacity_count as f64 >= MAX_CAPACITY as f64 * NEARLY_FULL_RATIO {
            CapacityStatus::NearlyFull
        } else {
            CapacityStatus::Available
        };

        Self {
            cluster_id: cluster.id(),
            anchor: cluster.anchor().clone(),
            world: cluster.world().clone(),
            region_size: Cluster::region_size(),
            member_count: members.len(),
            capacity_count,
            max_capacity: MAX_CAPACITY,
            remaining_slots: MAX_CAPACITY.saturating_sub(capacity_count),
            at_capacity,
            status,
            members,
            distance_from_anchor: viewer.and_then(|location| cluster.anchor().distance(location)),
        }
    }
}

/// Answer to "is this agent in a cluster, and which one".
#[derive(Debug, Clone, Serialize)]
pub enum AgentClusterStatus {
    Clustered(ClusterReport),
    Unclustered { active_clusters: usize },
}

impl fmt::Display for AgentClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentClusterStatus::Unclustered { active_clusters } => {
                writeln!(f, "Status: Not in any cluster")?;
                write!(f, "Total Active Clusters: {active_clusters}")
            }
            AgentClusterStatus::Clustered(report) => {
                writeln!(f, "Status: In a cluster")?;
                writeln!(
                    f,
                    "  Anchor Location: X: {:.1}, Y: {:.1}, Z: {:.1}",
                    report.anchor.x(),
                    report.anchor.y(),
                    report.anchor.z()
                )?;
                writeln!(f, "  World: {}", report.world)?;
                writeln!(f, "  Region Size: {0}x{0}", report.region_size)?;
                writeln!(f, "  Cluster Members: {}", report.member_count)?;
                writeln!(f, "  Capacity Region: {}/{}", report.capacity_count, report.max_capacity)?;
                if report.at_capacity {
                    write!(f, "  Status: FULL - new agents will be placed elsewhere")?;
                } else {
                    write!(f, "  Status: {} slots available", report.remaining_slots)?;
                }
                if let Some(distance) = report.distance_from_anchor {
                    write!(f, "\n  Distance from Anchor: {distance:.1}")?;
                }
                Ok(())
            }
        }
    }
}

/// Per-world aggregate over active clusters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldClusterStats {
    pub world: WorldId,
    pub active_clusters: usize,
    pub clusters_at_capacity: usize,
    /// Sum of capacity counts; an agent in overlapping regions counts twice.
    pub total_agents: usize,
    pub average_per_cluster: f64,
}

impl WorldClusterStats {
    pub fn collect(tracker: &MembershipTracker, world: &WorldId) -> Self {
        let mut active_clusters = 0;
        let mut clusters_at_capacity = 0;
        let mut total_agents = 0;

        for cluster in tracker.get_active_clusters() {
            if cluster.world() != world {
                continue;
            }
            active_clusters += 1;
            let count = tracker.get_capacity_count(&cluster);
            total_agents += count;
            if count >= MAX_CAPACITY {
                clusters_at_capacity += 1;
            }
        }

        let average_per_cluster = if active_clusters == 0 {
            0.0
        } else {
            total_agents as f64 / active_clusters as f64
        };

        Self {
            world: world.clone(),
            active_clusters,
            clusters_at_capacity,
            total_agents,
            average_per_cluster,
        }
    }
}

impl fmt::Display for WorldClusterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cluster Stats for {}: clusters={} full={} agents={} avg={:.1}",
            self.world, self.active_clusters, self.clusters_at_capacity, self.total_agents, self.average_per_cluster
        )
    }
}

/// Size of the tracker's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub tracked_agents: usize,
    pub active_clusters: usize,
    pub total_mappings: usize,
    pub estimated_bytes: usize,
}

impl TrackerStats {
    pub fn new(tracked_agents: usize, active_clusters: usize, total_mappings: usize) -> Self {
        Self {
            tracked_agents,
            active_clusters,
            total_mappings,
            estimated_bytes: tracked_agents * BYTES_PER_TRACKED_AGENT
                + active_clusters * BYTES_PER_CLUSTER
                + total_mappings * BYTES_PER_MAPPING,
        }
    }
}

impl fmt::Display for TrackerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tracked Agents: {} | Active Clusters: {} | Mappings: {} | ~{:.2} KB",
            self.tracked_agents,
            self.active_clusters,
            self.total_mappings,
            self.estimated_bytes as f64 / 1024.0
        )
    }
}
