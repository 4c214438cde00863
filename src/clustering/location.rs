use bevy::math::DVec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Stable identifier of a tracked agent (a connected player).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a world (dimension) hosted by the runtime.
///
/// Cheap to clone: locations are copied on every movement notification.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorldId(Arc<str>);

impl WorldId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorldId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A point in a specific world, with the facing carried by teleports.
///
/// X and Z are the horizontal plane; Y is height and is ignored by every
/// planar query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: WorldId,
    pub position: DVec3,
    pub yaw: f32,
    pub pitch: f32,
}

impl Location {
    pub fn new(world: WorldId, x: f64, y: f64, z: f64) -> Self {
        Self {
            world,
            position: DVec3::new(x, y, z),
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn x(&self) -> f64 { self.position.x }
    pub fn y(&self) -> f64 { self.position.y }
    pub fn z(&self) -> f64 { self.position.z }

    pub fn same_world(&self, other: &Location) -> bool {
        self.world == other.world
    }

    /// Squared X/Z distance. Only meaningful when both points share a world.
    pub fn planar_distance_squared(&self, other: &Location) -> f64 {
        let dx = self.position.x - other.position.x;
        let dz = self.position.z - other.position.z;
        dx * dx + dz * dz
    }

    /// X/Z distance, or `None` across worlds.
    pub fn planar_distance(&self, other: &Location) -> Option<f64> {
        self.same_world(other)
            .then(|| self.planar_distance_squared(other).sqrt())
    }

    /// Full 3D distance, or `None` across worlds.
    pub fn distance(&self, other: &Location) -> Option<f64> {
        self.same_world(other)
            .then(|| self.position.distance(other.position))
    }

    /// Horizontal offset, keeping height and facing.
    pub fn offset(&self, dx: f64, dz: f64) -> Self {
        let mut moved = self.clone();
        moved.position.x += dx;
        moved.position.z += dz;
        moved
    }

    pub fn with_y(mut self, y: f64) -> Self {
        self.position.y = y;
        self
    }

    pub fn with_facing(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.1}, {:.1}, {:.1})",
            self.world, self.position.x, self.position.y, self.position.z
        )
    }
}
