//! Columns: the per grid cell index of chunk hulls and obstacles, held in a
//! sliding window around the camera.

use chunkspace_common::{BoundingBox, GridCoord, ItemId, PlaneEq};
use glam::Vec3;

use crate::arena::ChunkId;

/// Convex hull of a focused chunk, in world space.
#[derive(Debug, Clone)]
pub struct Hull {
    pub chunk: ChunkId,
    /// Planes with normals facing into the chunk.
    pub border: Vec<PlaneEq>,
    pub bb: BoundingBox,
    pub volume: f32,
    pub outside: bool,
}

impl Hull {
    pub fn contains(&self, point: Vec3) -> bool {
        self.bb.contains_point(point) && self.border.iter().all(|p| p.distance_to(point) >= 0.0)
    }
}

/// Something a sweep can hit: a chunk's shell or one of its items.
#[derive(Debug, Clone)]
pub struct Obstacle {
    pub chunk: ChunkId,
    pub item: Option<ItemId>,
    pub bb: BoundingBox,
}

#[derive(Debug, Clone)]
pub struct Column {
    coord: GridCoord,
    outside_chunk: Option<ChunkId>,
    hulls: Vec<Hull>,
    obstacles: Vec<Obstacle>,
    /// Near the window edge; its chunks may still be unfocused.
    soft: bool,
}

impl Column {
    pub fn new(coord: GridCoord) -> Self {
        Self {
            coord,
            outside_chunk: None,
            hulls: Vec::new(),
            obstacles: Vec::new(),
            soft: false,
        }
    }

    pub fn coord(&self) -> GridCoord {
        self.coord
    }

    pub fn outside_chunk(&self) -> Option<ChunkId> {
        self.outside_chunk
    }

    pub fn hulls(&self) -> &[Hull] {
        &self.hulls
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn is_soft(&self) -> bool {
        self.soft
    }

    pub(crate) fn set_soft(&mut self, soft: bool) {
        self.soft = soft;
    }

    pub fn has_inside_chunks(&self) -> bool {
        self.hulls.iter().any(|h| !h.outside)
    }

    /// Every chunk with a hull or an obstacle here, each once.
    pub fn holders(&self) -> Vec<ChunkId> {
        let mut out: Vec<ChunkId> = self
            .hulls
            .iter()
            .map(|h| h.chunk)
            .chain(self.obstacles.iter().map(|o| o.chunk))
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn holds(&self, chunk: ChunkId) -> bool {
        self.hulls.iter().any(|h| h.chunk == chunk)
    }

    pub(crate) fn add_hull(&mut self, hull: Hull) {
        if hull.outside {
            self.outside_chunk = Some(hull.chunk);
        }
        self.hulls.push(hull);
    }

    pub(crate) fn add_obstacle(&mut self, obstacle: Obstacle) {
        self.obstacles.push(obstacle);
    }

    /// Drop a chunk's hulls and obstacles. Returns whether it held any.
    pub(crate) fn remove_chunk(&mut self, chunk: ChunkId) -> bool {
        let before = self.hulls.len() + self.obstacles.len();
        self.hulls.retain(|h| h.chunk != chunk);
        self.obstacles.retain(|o| o.chunk != chunk);
        if self.outside_chunk == Some(chunk) {
            self.outside_chunk = None;
        }
        before != self.hulls.len() + self.obstacles.len()
    }

    /// The chunk owning a world point: the smallest inside chunk whose hull
    /// contains it, otherwise the outside chunk.
    pub fn find_chunk(&self, point: Vec3) -> Option<ChunkId> {
        self.find_chunk_excluding(point, None)
    }

    pub fn find_chunk_excluding(&self, point: Vec3, exclude: Option<ChunkId>) -> Option<ChunkId> {
        let candidates = || {
            self.hulls
                .iter()
                .filter(move |h| Some(h.chunk) != exclude && h.contains(point))
        };
        candidates()
            .filter(|h| !h.outside)
            .min_by(|a, b| a.volume.total_cmp(&b.volume))
            .or_else(|| candidates().find(|h| h.outside))
            .map(|h| h.chunk)
    }
}

/// Square window of columns centred on the camera's cell, stored as a ring
/// buffer so sliding the window only touches the cells that leave it.
#[derive(Debug)]
pub struct FocusGrid {
    half_span: i32,
    width: i32,
    origin: GridCoord,
    cells: Vec<Option<Column>>,
}

impl FocusGrid {
    pub fn new(half_span: i32) -> Self {
        let half_span = half_span.max(1);
        let width = 2 * half_span + 1;
        Self {
            half_span,
            width,
            origin: GridCoord::new(0, 0),
            cells: (0..width * width).map(|_| None).collect(),
        }
    }

    pub fn half_span(&self) -> i32 {
        self.half_span
    }

    pub fn origin(&self) -> GridCoord {
        self.origin
    }

    pub fn in_window(&self, coord: GridCoord) -> bool {
        coord.chebyshev(self.origin) <= self.half_span
    }

    fn slot(&self, coord: GridCoord) -> Option<usize> {
        if !self.in_window(coord) {
            return None;
        }
        let x = coord.x.rem_euclid(self.width);
        let z = coord.z.rem_euclid(self.width);
        Some((x * self.width + z) as usize)
    }

    pub fn get(&self, coord: GridCoord) -> Option<&Column> {
        let slot = self.slot(coord)?;
        self.cells[slot].as_ref().filter(|c| c.coord() == coord)
    }

    pub fn get_mut(&mut self, coord: GridCoord) -> Option<&mut Column> {
        let slot = self.slot(coord)?;
        self.cells[slot].as_mut().filter(|c| c.coord() == coord)
    }

    /// The column at `coord`, created when missing. `None` outside the window.
    pub fn get_or_create(&mut self, coord: GridCoord) -> Option<&mut Column> {
        let slot = self.slot(coord)?;
        let cell = &mut self.cells[slot];
        if cell.as_ref().is_none_or(|c| c.coord() != coord) {
            *cell = Some(Column::new(coord));
        }
        cell.as_mut()
    }

    pub fn remove(&mut self, coord: GridCoord) -> Option<Column> {
        let slot = self.slot(coord)?;
        if self.cells[slot].as_ref().is_some_and(|c| c.coord() == coord) {
            self.cells[slot].take()
        } else {
            None
        }
    }

    /// Recentre the window. Returns the columns that fell out of it.
    pub fn set_origin(&mut self, origin: GridCoord) -> Vec<Column> {
        if origin == self.origin {
            return Vec::new();
        }
        self.origin = origin;
        let half = self.half_span;
        let mut gone = Vec::new();
        for cell in &mut self.cells {
            if cell.as_ref().is_some_and(|c| c.coord().chebyshev(origin) > half) {
                gone.extend(cell.take());
            }
        }
        gone
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.cells.iter().flatten()
    }

    pub fn columns_mut(&mut self) -> impl Iterator<Item = &mut Column> {
        self.cells.iter_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.columns().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
