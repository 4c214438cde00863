//! Error types for clustering operations.
//!
//! None of these are fatal to the host: the interceptor turns every one of them
//! into "leave the teleport alone".

use thiserror::Error;

use super::location::WorldId;

/// Errors that can occur while finding or placing into a cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The host could not report terrain height at a column.
    #[error("Terrain height unavailable in {world} at ({x:.1}, {z:.1})")]
    TerrainUnavailable {
        world: WorldId,
        x: f64,
        z: f64,
    },

    /// The host does not know the world.
    #[error("Unknown world: {0}")]
    UnknownWorld(WorldId),

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ClusterError {
    pub fn terrain_unavailable(world: &WorldId, x: f64, z: f64) -> Self {
        Self::TerrainUnavailable { world: world.clone(), x, z }
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;
