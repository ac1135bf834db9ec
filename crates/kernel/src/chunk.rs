//! Chunks: convex cells of the world and their lifecycle flags.
//!
//! A chunk starts as a stub naming an identifier in a mapping. Loading fills
//! in geometry and boundaries, binding links its portals into the graph and
//! makes it online, and ejecting returns it to the stub state.

use std::sync::Arc;

use chunkspace_common::{
    BoundingBox, GRID_RESOLUTION, GridCoord, ItemId, MAX_CHUNK_HEIGHT, MIN_CHUNK_HEIGHT, PlaneEq,
    grid_from_chunk_name, is_outside_identifier,
};
use chunkspace_format::CHUNK_EXTENSION;
use glam::{Affine3A, Vec3};

use crate::arena::ChunkId;
use crate::body::ChunkBody;
use crate::boundary::Boundary;
use crate::error::GraphError;
use crate::mapping::DirMapping;
use crate::portal::{Portal, PortalTarget};

/// Items one chunk borrows from another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lender {
    pub lender: ChunkId,
    pub items: Vec<ItemId>,
}

/// Extent of every outside chunk in its own local space.
pub fn outside_local_bb() -> BoundingBox {
    BoundingBox::new(
        Vec3::new(0.0, MIN_CHUNK_HEIGHT, 0.0),
        Vec3::new(GRID_RESOLUTION, MAX_CHUNK_HEIGHT, GRID_RESOLUTION),
    )
}

/// World placement of an outside chunk: its grid offset under the mapping.
pub fn outside_transform(identifier: &str, mapping: &DirMapping) -> Option<Affine3A> {
    let (x, z) = grid_from_chunk_name(identifier).ok()?;
    let offset = Vec3::new(x as f32 * GRID_RESOLUTION, 0.0, z as f32 * GRID_RESOLUTION);
    Some(*mapping.mapper() * Affine3A::from_translation(offset))
}

#[derive(Debug)]
pub struct Chunk {
    identifier: String,
    mapping: Arc<DirMapping>,
    is_outside: bool,
    pub(crate) has_internal_chunks: bool,
    pub(crate) transform: Affine3A,
    pub(crate) inverse: Affine3A,
    pub(crate) local_bb: BoundingBox,
    pub(crate) bounding_box: BoundingBox,
    /// Chunk-local extent of everything drawn from this chunk.
    pub(crate) visibility_bb: BoundingBox,
    pub(crate) centre: Vec3,
    pub(crate) boundaries: Vec<Boundary>,
    pub(crate) shell_resource: Option<String>,
    pub(crate) self_items: Vec<ItemId>,
    pub(crate) dyno_items: Vec<ItemId>,
    pub(crate) sway_items: Vec<ItemId>,
    pub(crate) lenders: Vec<Lender>,
    pub(crate) borrowers: Vec<ChunkId>,
    pub(crate) ratified: bool,
    pub(crate) loading: bool,
    pub(crate) loaded: bool,
    pub(crate) online: bool,
    pub(crate) good: bool,
    pub(crate) focus_count: u32,
    /// Every column this chunk has a hull or obstacle in while focused.
    pub(crate) focus_cells: Vec<GridCoord>,
}

impl Chunk {
    /// A stub for `identifier` in `mapping`. Outside chunks know their
    /// placement from the identifier alone.
    pub fn new(identifier: &str, mapping: Arc<DirMapping>) -> Self {
        let is_outside = is_outside_identifier(identifier);
        let (transform, local_bb) = match outside_transform(identifier, &mapping) {
            Some(t) if is_outside => (t, outside_local_bb()),
            _ => (*mapping.mapper(), BoundingBox::EMPTY),
        };
        let bounding_box = local_bb.transformed(&transform);
        let centre = if bounding_box.is_empty() {
            Vec3::from(transform.translation)
        } else {
            bounding_box.centre()
        };
        Self {
            identifier: identifier.to_string(),
            mapping,
            is_outside,
            has_internal_chunks: false,
            inverse: transform.inverse(),
            transform,
            local_bb,
            bounding_box,
            visibility_bb: local_bb,
            centre,
            boundaries: Vec::new(),
            shell_resource: None,
            self_items: Vec::new(),
            dyno_items: Vec::new(),
            sway_items: Vec::new(),
            lenders: Vec::new(),
            borrowers: Vec::new(),
            ratified: false,
            loading: false,
            loaded: false,
            online: false,
            good: false,
            focus_count: 0,
            focus_cells: Vec::new(),
        }
    }

    /// Take over everything a background load produced.
    pub(crate) fn apply_body(&mut self, body: ChunkBody) {
        self.transform = body.transform;
        self.inverse = body.transform.inverse();
        self.local_bb = body.local_bb;
        self.bounding_box = body.local_bb.transformed(&body.transform);
        self.visibility_bb = body.local_bb;
        self.centre = self.bounding_box.centre();
        self.boundaries = body.boundaries;
        self.shell_resource = body.shell_resource;
        self.has_internal_chunks = false;
        self.good = body.good;
        self.loaded = true;
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn mapping(&self) -> &Arc<DirMapping> {
        &self.mapping
    }

    pub fn is_outside(&self) -> bool {
        self.is_outside
    }

    pub fn has_internal_chunks(&self) -> bool {
        self.has_internal_chunks
    }

    pub fn transform(&self) -> &Affine3A {
        &self.transform
    }

    pub fn inverse_transform(&self) -> &Affine3A {
        &self.inverse
    }

    pub fn local_bb(&self) -> &BoundingBox {
        &self.local_bb
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bounding_box
    }

    pub fn visibility_bb(&self) -> &BoundingBox {
        &self.visibility_bb
    }

    pub fn centre(&self) -> Vec3 {
        self.centre
    }

    pub fn boundaries(&self) -> &[Boundary] {
        &self.boundaries
    }

    pub fn shell_resource(&self) -> Option<&str> {
        self.shell_resource.as_deref()
    }

    pub fn self_items(&self) -> &[ItemId] {
        &self.self_items
    }

    pub fn dyno_items(&self) -> &[ItemId] {
        &self.dyno_items
    }

    pub fn sway_items(&self) -> &[ItemId] {
        &self.sway_items
    }

    pub fn lenders(&self) -> &[Lender] {
        &self.lenders
    }

    pub fn borrowers(&self) -> &[ChunkId] {
        &self.borrowers
    }

    pub fn is_ratified(&self) -> bool {
        self.ratified
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// False when the last load was degraded.
    pub fn is_good(&self) -> bool {
        self.good
    }

    pub fn focus_count(&self) -> u32 {
        self.focus_count
    }

    /// Path of the document this chunk loads from.
    pub fn resource_id(&self) -> String {
        format!("{}{}.{}", self.mapping.path(), self.identifier, CHUNK_EXTENSION)
    }

    /// Hull planes in chunk-local space.
    pub fn bounds(&self) -> impl Iterator<Item = &PlaneEq> {
        self.boundaries.iter().filter(|b| b.is_bound).map(|b| &b.plane)
    }

    /// Hull planes in world space.
    pub fn world_border(&self) -> Vec<PlaneEq> {
        self.bounds()
            .map(|p| p.transformed(&self.transform).normalized())
            .collect()
    }

    /// Whether a world point lies within the convex hull, at least `radius`
    /// inside every bounding plane.
    pub fn contains(&self, point: Vec3, radius: f32) -> bool {
        if !self.bounding_box.contains_point(point) {
            return false;
        }
        let local = self.inverse.transform_point3(point);
        self.bounds().all(|p| p.distance_to(local) >= radius)
    }

    /// Approximate volume, from the world bounding box.
    pub fn volume(&self) -> f32 {
        self.bounding_box.volume()
    }

    /// Every portal, bound and unbound.
    pub fn portals(&self) -> impl Iterator<Item = &Portal> {
        self.boundaries.iter().flat_map(|b| b.portals())
    }

    /// Targets of the bound portals that lead to chunks.
    pub fn bound_neighbours(&self) -> Vec<ChunkId> {
        self.boundaries
            .iter()
            .flat_map(|b| b.bound_portals.iter())
            .filter_map(|p| p.target.chunk())
            .collect()
    }

    /// Nearest chunk behind an unbound portal, measured to the portal centre.
    pub fn find_closest_unloaded_chunk_to(&self, point: Vec3) -> Option<(ChunkId, f32)> {
        self.boundaries
            .iter()
            .flat_map(|b| b.unbound_portals.iter())
            .filter_map(|p| p.target.chunk().map(|id| (id, p.centre.distance(point))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Move the chunk. Only allowed while it is offline.
    pub fn set_transform(&mut self, transform: Affine3A) -> Result<(), GraphError> {
        if self.online {
            return Err(GraphError::Online(self.identifier.clone()));
        }
        self.transform = transform;
        self.inverse = transform.inverse();
        self.bounding_box = self.local_bb.transformed(&transform);
        if !self.bounding_box.is_empty() {
            self.centre = self.bounding_box.centre();
        }
        for b in &mut self.boundaries {
            for p in b.bound_portals.iter_mut().chain(b.unbound_portals.iter_mut()) {
                p.update_centre(&transform);
            }
        }
        Ok(())
    }

    /// Locate the unbound portal targeting `other`.
    pub(crate) fn find_unbound_to(&self, other: ChunkId) -> Option<(usize, usize)> {
        self.boundaries.iter().enumerate().find_map(|(bi, b)| {
            b.unbound_portals
                .iter()
                .position(|p| p.target == PortalTarget::Chunk(other))
                .map(|pi| (bi, pi))
        })
    }

    /// Locate the bound portal targeting `other`.
    pub(crate) fn find_bound_to(&self, other: ChunkId) -> Option<(usize, usize)> {
        self.boundaries.iter().enumerate().find_map(|(bi, b)| {
            b.bound_portals
                .iter()
                .position(|p| p.target == PortalTarget::Chunk(other))
                .map(|pi| (bi, pi))
        })
    }

    /// Drop everything loading produced and return to the stub state.
    pub(crate) fn clear_loaded(&mut self) {
        self.boundaries.clear();
        self.self_items.clear();
        self.dyno_items.clear();
        self.sway_items.clear();
        self.lenders.clear();
        self.borrowers.clear();
        self.shell_resource = None;
        self.has_internal_chunks = false;
        self.good = false;
        self.loaded = false;
    }
}
