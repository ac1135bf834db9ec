//! Focusing: indexing online chunks into the column grid around the camera.

use std::time::{Duration, Instant};

use chunkspace_common::{BoundingBox, GridCoord, ItemId};
use glam::Vec3;

use crate::arena::ChunkId;
use crate::column::{Hull, Obstacle};
use crate::error::GraphError;
use crate::space::Space;

impl Space {
    /// Recentre the focus window on `point` and focus every blurred chunk
    /// within range. Returns how many chunks were focused.
    pub fn focus(&mut self, point: Vec3) -> usize {
        self.focus_with_budget(point, None)
    }

    /// As [`Space::focus`], but once `budget` is spent chunks near the edge
    /// of the range wait for a later call.
    pub fn focus_with_budget(&mut self, point: Vec3, budget: Option<Duration>) -> usize {
        let _span = tracing::info_span!("space_focus").entered();
        let started = Instant::now();
        let origin = GridCoord::from_point(point);
        let range = self.focus_range;

        for column in self.focus.set_origin(origin) {
            for holder in column.holders() {
                self.smudge(holder);
            }
        }

        let mut focused = 0;
        let mut over_budget = false;
        let mut i = 0;
        while i < self.blurred.len() {
            let id = self.blurred[i];
            let Some(chunk) = self.chunks.get(id).filter(|c| c.online) else {
                self.blurred.remove(i);
                continue;
            };
            let cell = GridCoord::from_point(chunk.centre);
            let (dx, dz) = ((cell.x - origin.x).abs(), (cell.z - origin.z).abs());
            if dx > range || dz > range {
                i += 1;
                continue;
            }
            if over_budget && (dx >= range - 1 || dz >= range - 1) {
                i += 1;
                continue;
            }

            self.blurred.remove(i);
            match self.focus_chunk(id) {
                Ok(()) => focused += 1,
                Err(e) => tracing::warn!(chunk = %id, error = %e, "chunk could not be focused"),
            }
            if budget.is_some_and(|b| started.elapsed() > b) {
                over_budget = true;
            }
        }

        for column in self.focus.columns_mut() {
            let c = column.coord();
            let soft = (c.x - origin.x).abs() >= range - 1 || (c.z - origin.z).abs() >= range - 1;
            column.set_soft(soft);
        }

        if focused > 0 {
            self.nest_homeless();
        }
        tracing::trace!(focused, blurred = self.blurred.len(), "focus pass");
        focused
    }

    /// Grid cells a chunk's hull is indexed in: the centre cell for an
    /// outside chunk, every cell under the bounding box otherwise, limited
    /// to the window.
    fn chunk_cells(&self, id: ChunkId) -> Result<Vec<GridCoord>, GraphError> {
        let chunk = self.chunk_ref(id)?;
        if chunk.is_outside() {
            return Ok(vec![GridCoord::from_point(chunk.centre)]);
        }
        Ok(self.window_cells(&chunk.bounding_box))
    }

    /// Window cells under a world box.
    fn window_cells(&self, bb: &BoundingBox) -> Vec<GridCoord> {
        let origin = self.focus.origin();
        let half = self.focus.half_span();
        let lo = GridCoord::from_point(bb.min);
        let hi = GridCoord::from_point(bb.max);
        let mut cells = Vec::new();
        for x in lo.x.max(origin.x - half)..=hi.x.min(origin.x + half) {
            for z in lo.z.max(origin.z - half)..=hi.z.min(origin.z + half) {
                cells.push(GridCoord::new(x, z));
            }
        }
        cells
    }

    /// Take a chunk's hulls and obstacles out of every column it was
    /// indexed in.
    fn unindex_chunk(&mut self, id: ChunkId) {
        let Some(chunk) = self.chunks.get_mut(id) else {
            return;
        };
        for cell in std::mem::take(&mut chunk.focus_cells) {
            if let Some(column) = self.focus.get_mut(cell) {
                column.remove_chunk(id);
            }
        }
    }

    /// Add a chunk's hull to its columns and each of its obstacles to every
    /// column the obstacle's box reaches.
    pub(crate) fn focus_chunk(&mut self, id: ChunkId) -> Result<(), GraphError> {
        let chunk = self.chunk_ref(id)?;
        if !chunk.online {
            return Err(GraphError::Offline(chunk.identifier().to_string()));
        }
        let hull = Hull {
            chunk: id,
            border: chunk.world_border(),
            bb: chunk.bounding_box,
            volume: chunk.volume(),
            outside: chunk.is_outside(),
        };
        let transform = chunk.transform;
        let obstacles: Vec<Obstacle> = chunk
            .self_items
            .iter()
            .filter_map(|&item| {
                let bb = self
                    .items
                    .get(item)?
                    .item
                    .as_bounds()?
                    .collision_bounds(&transform)?;
                Some(Obstacle {
                    chunk: id,
                    item: Some(item),
                    bb,
                })
            })
            .collect();
        let identifier = chunk.identifier().to_string();
        let cells = self.chunk_cells(id)?;
        self.unindex_chunk(id);

        let mut invaded = Vec::new();
        let mut indexed = Vec::new();
        for cell in cells {
            let Some(column) = self.focus.get_or_create(cell) else {
                continue;
            };
            column.add_hull(hull.clone());
            if !hull.outside {
                invaded.extend(column.outside_chunk());
            }
            indexed.push(cell);
        }
        if indexed.is_empty() {
            self.chunk_mut(id)?.focus_count = 0;
            self.notice_chunk(id);
            return Err(GraphError::OutOfFocus(identifier));
        }
        let placed = indexed.len();

        for o in obstacles {
            for cell in self.window_cells(&o.bb) {
                if let Some(column) = self.focus.get_or_create(cell) {
                    column.add_obstacle(o.clone());
                    indexed.push(cell);
                }
            }
        }
        indexed.sort();
        indexed.dedup();

        let chunk = self.chunk_mut(id)?;
        chunk.focus_count = 1;
        chunk.focus_cells = indexed;
        tracing::trace!(chunk = %identifier, columns = placed, "chunk focused");

        invaded.sort();
        invaded.dedup();
        for outside in invaded {
            self.jog_foreign_items(outside)?;
        }
        Ok(())
    }

    /// Drop every column near a chunk or holding any of it, blurring
    /// whatever else they held.
    pub(crate) fn ignore_chunk(&mut self, id: ChunkId) -> Result<(), GraphError> {
        let chunk = self.chunk_ref(id)?;
        if !chunk.online {
            tracing::error!(chunk = %chunk.identifier(), "cannot ignore an offline chunk");
            return Err(GraphError::Offline(chunk.identifier().to_string()));
        }
        let centre = GridCoord::from_point(chunk.centre);
        let mut cells: Vec<GridCoord> = (-1..=1)
            .flat_map(|dx| (-1..=1).map(move |dz| GridCoord::new(centre.x + dx, centre.z + dz)))
            .collect();
        cells.extend(chunk.focus_cells.iter().copied());
        if !chunk.is_outside() {
            cells.extend(self.chunk_cells(id)?);
        }

        let mut holders = Vec::new();
        for cell in cells {
            if let Some(column) = self.focus.remove(cell) {
                holders.extend(column.holders());
            }
        }
        holders.sort();
        holders.dedup();
        for holder in holders {
            self.smudge(holder);
        }
        self.unindex_chunk(id);
        self.blurred.retain(|b| *b != id);
        Ok(())
    }

    /// A chunk lost its place in the grid and must be focused again.
    pub(crate) fn smudge(&mut self, id: ChunkId) {
        let Some(chunk) = self.chunks.get_mut(id) else {
            return;
        };
        if chunk.focus_count != 0 {
            chunk.focus_count = 0;
            self.unindex_chunk(id);
            self.notice_chunk(id);
        }
    }

    pub(crate) fn notice_chunk(&mut self, id: ChunkId) {
        if !self.blurred.contains(&id) {
            self.blurred.push(id);
        }
    }

    /// Items in a column's obstacle list, each once.
    pub fn obstacle_items(&self, point: Vec3) -> Vec<ItemId> {
        let mut items: Vec<ItemId> = self
            .column(point)
            .map(|c| c.obstacles().iter().filter_map(|o| o.item).collect())
            .unwrap_or_default();
        items.sort();
        items.dedup();
        items
    }
}
