use glam::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Edge length of one outside chunk, in world units.
pub const GRID_RESOLUTION: f32 = 100.0;

/// Lowest y extent of an outside chunk.
pub const MIN_CHUNK_HEIGHT: f32 = -10000.0;

/// Highest y extent of an outside chunk.
pub const MAX_CHUNK_HEIGHT: f32 = 10000.0;

/// Unique identifier for an item living in (or lent between) chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

/// A cell of the coarse 2D chunk grid (the y axis is ignored).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: i32,
    pub z: i32,
}

impl GridCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The grid cell containing a world-space point.
    pub fn from_point(point: Vec3) -> Self {
        Self {
            x: (point.x / GRID_RESOLUTION).floor() as i32,
            z: (point.z / GRID_RESOLUTION).floor() as i32,
        }
    }

    /// World-space centre of this cell at y = 0.
    pub fn centre(self) -> Vec3 {
        Vec3::new(
            (self.x as f32 + 0.5) * GRID_RESOLUTION,
            0.0,
            (self.z as f32 + 0.5) * GRID_RESOLUTION,
        )
    }

    /// Chebyshev distance between two cells.
    pub fn chebyshev(self, other: GridCoord) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }
}
