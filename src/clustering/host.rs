//! Contracts the clustering engine consumes from the host runtime.
//!
//! The engine never owns agent positions or terrain. It asks the host through
//! these traits, so the same engine runs inside a game server, the sandbox
//! binary, or a unit test.

use dashmap::DashMap;
use rustc_hash::FxHashMap;

use super::error::{ClusterError, ClusterResult};
use super::location::{AgentId, Location, WorldId};

/// Live agent positions, queryable on demand.
pub trait PositionSource: Send + Sync {
    fn location_of(&self, agent: AgentId) -> Option<Location>;

    /// Every agent currently present in `world`, with its position.
    fn agents_in(&self, world: &WorldId) -> Vec<(AgentId, Location)>;

    /// Every agent currently present anywhere.
    fn all_agents(&self) -> Vec<(AgentId, Location)>;
}

/// Terrain queries used to snap generated points onto the surface.
pub trait WorldTerrain: Send + Sync {
    /// Height of the highest solid block at a column.
    fn terrain_height(&self, world: &WorldId, x: f64, z: f64) -> ClusterResult<f64>;

    /// Default search centre of a world (its spawn point).
    fn reference_point(&self, world: &WorldId) -> ClusterResult<Location>;
}

/// Shape of the ground generated by [`InMemoryWorld`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TerrainProfile {
    /// Same height everywhere.
    Flat(f64),
    /// Gentle sine hills around `base`, `amplitude` high.
    Rolling { base: f64, amplitude: f64 },
}

impl TerrainProfile {
    fn height_at(&self, x: f64, z: f64) -> f64 {
        match *self {
            TerrainProfile::Flat(h) => h,
            TerrainProfile::Rolling { base, amplitude } => {
                (base + amplitude * ((x / 64.0).sin() + (z / 64.0).cos()) * 0.5).floor()
            }
        }
    }
}

/// In-process host used by the sandbox binary and the tests.
///
/// Positions live in a concurrent map so movement can be applied from any
/// thread while the engine queries it.
#[derive(Default)]
pub struct InMemoryWorld {
    positions: DashMap<AgentId, Location>,
    worlds: FxHashMap<WorldId, (Location, TerrainProfile)>,
}

impl InMemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a world with its spawn point and terrain.
    pub fn with_world(mut self, spawn: Location, terrain: TerrainProfile) -> Self {
        self.worlds.insert(spawn.world.clone(), (spawn, terrain));
        self
    }

    pub fn set_position(&self, agent: AgentId, location: Location) {
        self.positions.insert(agent, location);
    }

    pub fn remove_agent(&self, agent: AgentId) -> Option<Location> {
        self.positions.remove(&agent).map(|(_, location)| location)
    }

    pub fn agent_count(&self) -> usize {
        self.positions.len()
    }

    pub fn worlds(&self) -> impl Iterator<Item = &WorldId> {
        self.worlds.keys()
    }
}

impl PositionSource for InMemoryWorld {
    fn location_of(&self, agent: AgentId) -> Option<Location> {
        self.positions.get(&agent).map(|entry| entry.value().clone())
    }

    fn agents_in(&self, world: &WorldId) -> Vec<(AgentId, Location)> {
        let mut agents: Vec<_> = self
            .positions
            .iter()
            .filter(|entry| &entry.value().world == world)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        // Stable order keeps seeding decisions reproducible
        agents.sort_by_key(|(agent, _)| *agent);
        agents
    }

    fn all_agents(&self) -> Vec<(AgentId, Location)> {
        self.positions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}

impl WorldTerrain for InMemoryWorld {
    fn terrain_height(&self, world: &WorldId, x: f64, z: f64) -> ClusterResult<f64> {
        let (_, terrain) = self
            .worlds
            .get(world)
            .ok_or_else(|| ClusterError::terrain_unavailable(world, x, z))?;
        Ok(terrain.height_at(x, z))
    }

    fn reference_point(&self, world: &WorldId) -> ClusterResult<Location> {
        self.worlds
            .get(world)
            .map(|(spawn, _)| spawn.clone())
            .ok_or_else(|| ClusterError::UnknownWorld(world.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agents_are_filtered_by_world() {
        let overworld = WorldId::new("overworld");
        let nether = WorldId::new("nether");
        let host = InMemoryWorld::new();

        let a = AgentId::new_random();
        let b = AgentId::new_random();
        host.set_position(a, Location::new(overworld.clone(), 0.0, 64.0, 0.0));
        host.set_position(b, Location::new(nether.clone(), 0.0, 64.0, 0.0));

        let found = host.agents_in(&overworld);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, a);
        assert_eq!(host.all_agents().len(), 2);
    }

    #[test]
    fn test_unknown_world_is_an_error() {
        let host = InMemoryWorld::new();
        let world = WorldId::new("void");
        assert!(matches!(host.reference_point(&world), Err(ClusterError::UnknownWorld(_))));
        assert!(matches!(
            host.terrain_height(&world, 1.0, 2.0),
            Err(ClusterError::TerrainUnavailable { .. })
        ));
    }

    #[test]
    fn test_flat_terrain_height() {
        let spawn = Location::new(WorldId::new("overworld"), 0.0, 70.0, 0.0);
        let host = InMemoryWorld::new().with_world(spawn.clone(), TerrainProfile::Flat(70.0));
        assert_eq!(host.terrain_height(&spawn.world, 512.0, -77.0).unwrap(), 70.0);
        assert_eq!(host.reference_point(&spawn.world).unwrap(), spawn);
    }
}
