use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::location::{Location, WorldId};

/// Half-width of the square agents are placed into (80x80 region).
pub const CLUSTER_RADIUS: f64 = 40.0;

/// Half-width of the square used for capacity accounting (90x90 region).
pub const CAPACITY_RADIUS: f64 = 45.0;

/// Agents allowed inside the capacity region before a cluster counts as full.
pub const MAX_CAPACITY: usize = 15;

const _: () = assert!(CAPACITY_RADIUS >= CLUSTER_RADIUS);

static NEXT_CLUSTER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique cluster identity. Ids grow monotonically, so ordering by id
/// is ordering by creation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub u64);

impl ClusterId {
    fn next() -> Self {
        Self(NEXT_CLUSTER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Axis-aligned horizontal extent of a cluster's placement region.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClusterBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_z: f64,
    pub max_z: f64,
}

/// A fixed square region around an anchor that groups nearby agents.
///
/// Clusters are immutable once built and compared by identity: two clusters
/// anchored at the same point are still different clusters. All geometry is
/// planar (X/Z); height only travels along with the anchor.
///
/// Membership uses the inner square (`CLUSTER_RADIUS`), capacity uses the
/// wider one (`CAPACITY_RADIUS`). Both are squares so a test is two
/// subtractions and two comparisons.
#[derive(Debug)]
pub struct Cluster {
    id: ClusterId,
    anchor: Location,
}

impl Cluster {
    pub fn new(anchor: Location) -> Self {
        Self { id: ClusterId::next(), anchor }
    }

    pub fn id(&self) -> ClusterId { self.id }
    pub fn anchor(&self) -> &Location { &self.anchor }
    pub fn world(&self) -> &WorldId { &self.anchor.world }

    fn within(&self, location: &Location, radius: f64) -> bool {
        if location.world != self.anchor.world {
            return false;
        }
        let dx = (location.x() - self.anchor.x()).abs();
        let dz = (location.z() - self.anchor.z()).abs();
        dx <= radius && dz <= radius
    }

    /// Placement-region test: same world and both planar deltas within
    /// `CLUSTER_RADIUS`.
    pub fn contains_point(&self, location: &Location) -> bool {
        self.within(location, CLUSTER_RADIUS)
    }

    /// Capacity-region test, same shape with `CAPACITY_RADIUS`.
    pub fn contains_point_for_capacity(&self, location: &Location) -> bool {
        self.within(location, CAPACITY_RADIUS)
    }

    /// Planar distance from the anchor. Infinite across worlds so it can never
    /// satisfy a minimum-separation check.
    pub fn distance_to(&self, location: &Location) -> f64 {
        self.anchor.planar_distance(location).unwrap_or(f64::INFINITY)
    }

    /// Uniform point in the placement region. Height is the anchor's; callers
    /// snap it to terrain.
    pub fn random_point_inside<R: Rng>(&self, rng: &mut R) -> Location {
        let dx = rng.random_range(-CLUSTER_RADIUS..=CLUSTER_RADIUS);
        let dz = rng.random_range(-CLUSTER_RADIUS..=CLUSTER_RADIUS);
        self.anchor.offset(dx, dz)
    }

    pub fn bounds(&self) -> ClusterBounds {
        ClusterBounds {
            min_x: self.anchor.x() - CLUSTER_RADIUS,
            max_x: self.anchor.x() + CLUSTER_RADIUS,
            min_z: self.anchor.z() - CLUSTER_RADIUS,
            max_z: self.anchor.z() + CLUSTER_RADIUS,
        }
    }

    /// Edge length of the placement region.
    pub fn region_size() -> f64 {
        CLUSTER_RADIUS * 2.0
    }
}

impl PartialEq for Cluster {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Cluster {}

impl std::hash::Hash for Cluster {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = Self::region_size();
        write!(
            f,
            "Cluster{}[anchor=({:.1}, {:.1}, {:.1}), world={}, region={}x{}]",
            self.id,
            self.anchor.x(),
            self.anchor.y(),
            self.anchor.z(),
            self.anchor.world,
            size,
            size
        )
    }
}
