//! Groups agents that get relocated across a world into bounded clusters.
//!
//! - [`tracker`] keeps the bidirectional agent ↔ cluster index
//! - [`finder`] picks (or creates) the cluster a relocating agent should join
//! - [`interceptor`] rewrites feature-triggered teleports into that cluster
//! - [`engine`] owns all of the above plus the host collaborators
//! - [`plugin`] wires the engine into a bevy app

pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod finder;
pub mod host;
pub mod interceptor;
pub mod location;
pub mod plugin;
pub mod report;
pub mod tracker;

pub use cluster::{Cluster, ClusterId, CAPACITY_RADIUS, CLUSTER_RADIUS, MAX_CAPACITY};
pub use config::ClusterConfig;
pub use engine::ClusterEngine;
pub use error::{ClusterError, ClusterResult};
pub use host::{InMemoryWorld, PositionSource, TerrainProfile, WorldTerrain};
pub use interceptor::{RelocationOutcome, RelocationRequest, TeleportCause};
pub use location::{AgentId, Location, WorldId};
pub use plugin::{ClusterEngineResource, ClusteringPlugin};
pub use report::{AgentClusterStatus, ClusterReport};
pub use tracker::MembershipTracker;
