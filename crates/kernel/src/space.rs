//! The space: every chunk, mapping and item of one world, and the window of
//! columns kept around the camera.

use std::collections::BTreeMap;
use std::sync::Arc;

use chunkspace_common::{GRID_RESOLUTION, GridCoord, ItemId};
use chunkspace_format::{ChunkSource, GridBounds};
use glam::{Affine3A, Vec3};

use crate::arena::{ChunkArena, ChunkId};
use crate::body::{ChunkBody, LoadOutcome, LoadTicket};
use crate::chunk::Chunk;
use crate::column::{Column, FocusGrid};
use crate::error::{GraphError, LoadError};
use crate::item::{ItemKind, ItemRegistry, ShellModel};
use crate::mapping::{DirMapping, MappingId, guess_chunk};
use crate::portal::StubRef;

/// Distance, in grid cells, within which blurred chunks are focused.
pub const FOCUS_RANGE: i32 = (3001.0 / GRID_RESOLUTION) as i32;

/// Cells kept beyond the focus range so chunks straddling it stay indexed.
pub const FOCUS_MARGIN: i32 = 2;

#[derive(Debug)]
pub struct Space {
    pub(crate) chunks: ChunkArena,
    /// Canonical chunk for each identifier of each mapping.
    pub(crate) current: BTreeMap<(MappingId, String), ChunkId>,
    pub(crate) mappings: BTreeMap<MappingId, Arc<DirMapping>>,
    /// Deleted mappings still referenced by loads or stubs.
    condemned: Vec<Arc<DirMapping>>,
    next_mapping: u32,
    pub(crate) focus: FocusGrid,
    pub(crate) focus_range: i32,
    /// Online chunks waiting to be focused.
    pub(crate) blurred: Vec<ChunkId>,
    pub(crate) homeless: Vec<ItemId>,
    pub(crate) items: ItemRegistry,
    grid_bounds: GridBounds,
}

impl Default for Space {
    fn default() -> Self {
        Self::new()
    }
}

impl Space {
    pub fn new() -> Self {
        Self::with_focus_range(FOCUS_RANGE)
    }

    /// A space whose focus window reaches `range` cells from the camera.
    pub fn with_focus_range(range: i32) -> Self {
        let range = range.max(1);
        Self {
            chunks: ChunkArena::default(),
            current: BTreeMap::new(),
            mappings: BTreeMap::new(),
            condemned: Vec::new(),
            next_mapping: 0,
            focus: FocusGrid::new(range + FOCUS_MARGIN),
            focus_range: range,
            blurred: Vec::new(),
            homeless: Vec::new(),
            items: ItemRegistry::default(),
            grid_bounds: GridBounds::new(0, 0, 0, 0),
        }
    }

    // -- mappings ---------------------------------------------------------

    /// Place a chunk source into the space. Online chunks retry their extern
    /// portals against the new mapping.
    pub fn add_mapping(
        &mut self,
        source: Arc<dyn ChunkSource>,
        mapper: Affine3A,
    ) -> Result<Arc<DirMapping>, GraphError> {
        let id = MappingId(self.next_mapping);
        let mapping = Arc::new(DirMapping::new(id, source, mapper)?);
        self.next_mapping += 1;
        mapping.inc_ref();
        self.mappings.insert(id, Arc::clone(&mapping));
        self.recalc_grid_bounds();
        tracing::debug!(mapping = %id, path = mapping.path(), "mapping added");

        for chunk in self.online_chunks() {
            if let Err(e) = self.resolve_externs(chunk, None) {
                tracing::warn!(chunk = %chunk, error = %e, "extern resolution incomplete");
            }
        }
        Ok(mapping)
    }

    /// Remove a mapping. Its idle chunks are unloaded and deleted at once;
    /// chunks still loading are discarded when their load completes.
    pub fn del_mapping(&mut self, id: MappingId) -> Result<(), GraphError> {
        let mapping = self
            .mappings
            .remove(&id)
            .ok_or(GraphError::UnknownMapping(id))?;
        mapping.condemn();

        let doomed: Vec<ChunkId> = self
            .current
            .iter()
            .filter(|((m, _), _)| *m == id)
            .map(|(_, c)| *c)
            .collect();
        for chunk in doomed {
            let Some(c) = self.chunks.get(chunk) else {
                continue;
            };
            if c.loading {
                continue;
            }
            if c.online {
                if let Err(e) = self.loose(chunk, false) {
                    tracing::error!(chunk = %chunk, error = %e, "inconsistent loose of condemned chunk");
                }
            }
            self.eject(chunk)?;
            self.delete_chunk(chunk)?;
        }

        for chunk in self.online_chunks() {
            if let Err(e) = self.resolve_externs(chunk, Some(&mapping)) {
                tracing::warn!(chunk = %chunk, error = %e, "extern resolution incomplete");
            }
        }

        self.recalc_grid_bounds();
        mapping.dec_ref();
        tracing::debug!(mapping = %id, refs = mapping.refs(), "mapping condemned");
        self.condemned.push(mapping);
        self.reap_condemned();
        Ok(())
    }

    /// Drop condemned mappings nothing refers to any more.
    pub fn reap_condemned(&mut self) {
        self.condemned.retain(|m| {
            let keep = m.refs() > 0;
            if !keep {
                tracing::debug!(mapping = %m.id(), path = m.path(), "mapping released");
            }
            keep
        });
    }

    pub fn mapping(&self, id: MappingId) -> Option<&Arc<DirMapping>> {
        self.mappings.get(&id)
    }

    pub fn mappings(&self) -> impl Iterator<Item = &Arc<DirMapping>> {
        self.mappings.values()
    }

    pub(crate) fn live_mappings(&self) -> Vec<Arc<DirMapping>> {
        self.mappings.values().cloned().collect()
    }

    pub fn condemned_count(&self) -> usize {
        self.condemned.len()
    }

    /// Union of the world grid bounds of every live mapping.
    pub fn grid_bounds(&self) -> GridBounds {
        self.grid_bounds
    }

    fn recalc_grid_bounds(&mut self) {
        let mut it = self.mappings.values().map(|m| m.world_bounds());
        let Some(first) = it.next() else {
            self.grid_bounds = GridBounds::new(0, 0, 0, 0);
            return;
        };
        self.grid_bounds = it.fold(first, |acc, b| {
            GridBounds::new(
                acc.min_x.min(b.min_x),
                acc.min_y.min(b.min_y),
                acc.max_x.max(b.max_x),
                acc.max_y.max(b.max_y),
            )
        });
    }

    // -- chunk map --------------------------------------------------------

    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub(crate) fn chunk_ref(&self, id: ChunkId) -> Result<&Chunk, GraphError> {
        self.chunks.get(id).ok_or(GraphError::StaleChunk(id))
    }

    pub(crate) fn chunk_mut(&mut self, id: ChunkId) -> Result<&mut Chunk, GraphError> {
        self.chunks.get_mut(id).ok_or(GraphError::StaleChunk(id))
    }

    pub fn chunks(&self) -> impl Iterator<Item = (ChunkId, &Chunk)> {
        self.chunks.iter()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn online_chunks(&self) -> Vec<ChunkId> {
        self.chunks
            .iter()
            .filter(|(_, c)| c.online)
            .map(|(id, _)| id)
            .collect()
    }

    /// The canonical chunk for a stub, admitting the stub when it is new.
    /// Any mapping reference the stub carries stays with the caller.
    pub fn find_or_add_chunk(&mut self, stub: StubRef) -> ChunkId {
        let key = (stub.mapping.id(), stub.identifier);
        if let Some(&id) = self.current.get(&key) {
            return id;
        }
        let mut chunk = Chunk::new(&key.1, stub.mapping);
        chunk.ratified = true;
        let id = self.chunks.insert(chunk);
        tracing::trace!(chunk = %key.1, id = %id, "chunk ratified");
        self.current.insert(key, id);
        id
    }

    pub fn find_chunk_by_name(
        &mut self,
        identifier: &str,
        mapping: MappingId,
        create: bool,
    ) -> Option<ChunkId> {
        if let Some(&id) = self.current.get(&(mapping, identifier.to_string())) {
            return Some(id);
        }
        if !create {
            return None;
        }
        let mapping = Arc::clone(self.mappings.get(&mapping)?);
        Some(self.find_or_add_chunk(StubRef {
            identifier: identifier.to_string(),
            mapping,
        }))
    }

    /// The outside chunk at a local grid cell of `mapping`, if admitted.
    pub fn find_chunk_by_grid(&self, x: i32, z: i32, mapping: MappingId) -> Option<ChunkId> {
        let m = self.mappings.get(&mapping)?;
        let identifier = m.outside_chunk_identifier_at(x, z, true)?;
        self.current.get(&(mapping, identifier)).copied()
    }

    /// Guess which chunk holds a world point across every live mapping. The
    /// stub holds a reference on its mapping.
    pub fn guess_chunk(&self, point: Vec3, look_inside: bool) -> Option<StubRef> {
        guess_chunk(&self.live_mappings(), point, look_inside)
    }

    /// Remove an offline chunk from the space, releasing any foreign stubs
    /// its portals still hold.
    pub(crate) fn delete_chunk(&mut self, id: ChunkId) -> Result<(), GraphError> {
        let chunk = self.chunk_mut(id)?;
        if chunk.online {
            return Err(GraphError::Online(chunk.identifier().to_string()));
        }
        let own = chunk.mapping().id();
        for b in &mut chunk.boundaries {
            for p in b.unbound_portals.iter_mut().chain(b.bound_portals.iter_mut()) {
                if let Some(stub) = p.stub.take() {
                    if stub.mapping.id() != own {
                        stub.mapping.dec_ref();
                    }
                }
            }
        }
        let key = (own, chunk.identifier().to_string());
        if self.current.get(&key) == Some(&id) {
            self.current.remove(&key);
        }
        self.blurred.retain(|c| *c != id);
        self.chunks.remove(id);
        Ok(())
    }

    // -- loading ----------------------------------------------------------

    /// Mark a chunk as loading and hand out the work to do. The ticket holds
    /// a reference on the chunk's mapping until [`Space::complete_load`].
    pub fn prepare_load(&mut self, id: ChunkId) -> Result<LoadTicket, GraphError> {
        let mappings = self.live_mappings();
        let chunk = self.chunk_mut(id)?;
        if chunk.loaded || chunk.loading {
            return Err(GraphError::AlreadyLoaded(chunk.identifier().to_string()));
        }
        chunk.loading = true;
        let mapping = Arc::clone(chunk.mapping());
        mapping.inc_ref();
        Ok(LoadTicket {
            chunk: id,
            identifier: chunk.identifier().to_string(),
            mapping,
            mappings,
        })
    }

    /// Take over a finished load on the main thread and bind the chunk.
    /// Returns whether the chunk went online. Loads of condemned mappings
    /// are discarded.
    pub fn complete_load(&mut self, outcome: LoadOutcome) -> Result<bool, GraphError> {
        if !self.chunks.contains(outcome.chunk) {
            tracing::warn!(chunk = %outcome.identifier, "load finished for a deleted chunk");
            outcome.discard();
            self.reap_condemned();
            return Ok(false);
        }
        let LoadOutcome {
            chunk: id,
            identifier,
            mapping,
            result,
        } = outcome;

        let Some(chunk) = self.chunks.get_mut(id) else {
            return Err(GraphError::StaleChunk(id));
        };
        chunk.loading = false;

        let body = match result {
            Ok(body) => Some(body),
            Err(LoadError::Condemned(_)) => None,
            Err(LoadError::Format(e)) => {
                tracing::error!(chunk = %identifier, error = %e, "chunk document unreadable");
                Some(ChunkBody::from_doc(&identifier, &mapping, &[], None))
            }
        };

        if mapping.is_condemned() || body.is_none() {
            if let Some(body) = body {
                chunk.apply_body(body);
                self.eject_loaded_chunk_before_binding(id)?;
            }
            self.delete_chunk(id)?;
            mapping.dec_ref();
            self.reap_condemned();
            tracing::debug!(chunk = %identifier, "discarded load of condemned mapping");
            return Ok(false);
        }

        let Some(body) = body else {
            return Ok(false);
        };
        let shell = body
            .shell_resource
            .clone()
            .map(|r| ShellModel::new(r, body.local_bb));
        chunk.apply_body(body);
        tracing::debug!(chunk = %identifier, good = chunk.good, "chunk loaded");
        if let Some(shell) = shell {
            self.add_static_item(id, Box::new(shell))?;
        }

        let bound = self.bind(id, true);
        mapping.dec_ref();
        self.reap_condemned();
        bound.map(|()| true)
    }

    /// Load and bind a chunk on the calling thread.
    pub fn load_now(&mut self, id: ChunkId) -> Result<bool, GraphError> {
        let ticket = self.prepare_load(id)?;
        self.complete_load(ticket.load())
    }

    // -- queries ----------------------------------------------------------

    pub fn column(&self, point: Vec3) -> Option<&Column> {
        self.focus.get(GridCoord::from_point(point))
    }

    pub fn column_at(&self, coord: GridCoord) -> Option<&Column> {
        self.focus.get(coord)
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.focus.columns()
    }

    pub fn focus_origin(&self) -> GridCoord {
        self.focus.origin()
    }

    pub fn focus_range(&self) -> i32 {
        self.focus_range
    }

    /// The focused chunk holding a world point.
    pub fn find_chunk_from_point(&self, point: Vec3) -> Option<ChunkId> {
        let p = point + Vec3::new(0.0, 0.0001, 0.0);
        self.column(p)?.find_chunk(p)
    }

    /// Whether `id` is the chunk a point belongs to: inside its hull, and for
    /// an outside chunk not inside any focused inside chunk.
    pub fn owns(&self, id: ChunkId, point: Vec3) -> bool {
        let Some(chunk) = self.chunks.get(id) else {
            return false;
        };
        if !chunk.contains(point, 0.0) {
            return false;
        }
        if !chunk.is_outside() {
            return true;
        }
        self.column(point)
            .is_none_or(|c| !c.hulls().iter().any(|h| !h.outside && h.contains(point)))
    }

    pub fn items(&self) -> &ItemRegistry {
        &self.items
    }

    pub fn blurred(&self) -> &[ChunkId] {
        &self.blurred
    }

    pub fn homeless(&self) -> &[ItemId] {
        &self.homeless
    }

    // -- per frame --------------------------------------------------------

    /// Tick every item of every online chunk, and the homeless items.
    pub fn tick(&mut self, dt: f32) {
        let mut ids: Vec<ItemId> = self
            .chunks
            .iter()
            .filter(|(_, c)| c.online)
            .flat_map(|(_, c)| c.self_items.iter().chain(c.dyno_items.iter()).copied())
            .collect();
        ids.extend(self.homeless.iter().copied());
        for id in ids {
            if let Some(t) = self.items.get_mut(id).and_then(|e| e.item.as_tickable()) {
                t.tick(dt);
            }
        }
    }

    /// Draw a chunk's own items and the items it borrows. Returns how many
    /// items drew.
    pub fn draw_chunk(&mut self, id: ChunkId) -> Result<usize, GraphError> {
        let chunk = self.chunk_ref(id)?;
        let ids: Vec<ItemId> = chunk
            .self_items
            .iter()
            .chain(chunk.dyno_items.iter())
            .chain(chunk.lenders.iter().flat_map(|l| l.items.iter()))
            .copied()
            .collect();
        let mut drawn = 0;
        for item in ids {
            if let Some(d) = self.items.get_mut(item).and_then(|e| e.item.as_drawable()) {
                d.draw(id);
                drawn += 1;
            }
        }
        Ok(drawn)
    }

    pub(crate) fn item_kind(&self, id: ItemId) -> Option<ItemKind> {
        self.items.get(id).map(|e| e.kind)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chunkspace_format::{MemorySource, SpaceSettings, write_outside_grid};
    use std::sync::Weak;

    /// A space with one mapping of generated outside chunks over `bounds`.
    pub(crate) fn grid_space(bounds: GridBounds) -> (Space, Arc<DirMapping>, Arc<MemorySource>) {
        let settings = SpaceSettings::new(bounds);
        let source = Arc::new(MemorySource::new("grid/", settings.clone()));
        write_outside_grid(source.as_ref(), &settings).unwrap();
        let mut space = Space::with_focus_range(4);
        let mapping = space.add_mapping(source.clone(), Affine3A::IDENTITY).unwrap();
        (space, mapping, source)
    }

    pub(crate) fn load(space: &mut Space, mapping: &DirMapping, identifier: &str) -> ChunkId {
        let id = space
            .find_chunk_by_name(identifier, mapping.id(), true)
            .unwrap();
        space.load_now(id).unwrap();
        id
    }

    #[test]
    fn focus_range_covers_three_kilometres() {
        assert_eq!(FOCUS_RANGE, 30);
    }

    #[test]
    fn find_or_add_is_canonical() {
        let (mut space, mapping, _) = grid_space(GridBounds::new(0, 0, 1, 0));
        let stub = || StubRef {
            identifier: "00000000o".into(),
            mapping: Arc::clone(&mapping),
        };
        let a = space.find_or_add_chunk(stub());
        let b = space.find_or_add_chunk(stub());
        assert_eq!(a, b);
        assert!(space.chunk(a).unwrap().is_ratified());
        assert_eq!(space.find_chunk_by_grid(0, 0, mapping.id()), Some(a));
        assert_eq!(space.find_chunk_by_grid(1, 0, mapping.id()), None);
    }

    #[test]
    fn loading_binds_neighbours_both_ways() {
        let (mut space, mapping, _) = grid_space(GridBounds::new(0, 0, 1, 0));
        let a = load(&mut space, &mapping, "00000000o");
        let b = space.find_chunk_by_grid(1, 0, mapping.id()).unwrap();
        assert!(!space.chunk(b).unwrap().is_loaded());
        space.load_now(b).unwrap();

        let ca = space.chunk(a).unwrap();
        let cb = space.chunk(b).unwrap();
        assert!(ca.is_online() && cb.is_online());
        assert_eq!(ca.bound_neighbours(), vec![b]);
        assert_eq!(cb.bound_neighbours(), vec![a]);
        assert!(space.validate().is_empty());
        assert_eq!(mapping.refs(), 1);
    }

    #[test]
    fn grid_bounds_follow_mappings() {
        let (mut space, mapping, _) = grid_space(GridBounds::new(-1, -2, 3, 4));
        assert_eq!(space.grid_bounds(), GridBounds::new(-1, -2, 3, 4));
        space.del_mapping(mapping.id()).unwrap();
        assert_eq!(space.grid_bounds(), GridBounds::new(0, 0, 0, 0));
        assert!(matches!(
            space.del_mapping(mapping.id()),
            Err(GraphError::UnknownMapping(_))
        ));
    }

    #[test]
    fn condemned_mapping_outlives_its_last_load() {
        let (mut space, mapping, _) = grid_space(GridBounds::new(0, 0, 0, 0));
        let id = space.find_chunk_by_name("00000000o", mapping.id(), true).unwrap();
        let ticket = space.prepare_load(id).unwrap();
        assert_eq!(mapping.refs(), 2);

        let weak: Weak<DirMapping> = Arc::downgrade(&mapping);
        drop(mapping);
        space.del_mapping(MappingId(0)).unwrap();
        assert_eq!(space.condemned_count(), 1);
        assert!(weak.upgrade().is_some());

        let outcome = ticket.load();
        assert!(!space.complete_load(outcome).unwrap());
        assert_eq!(space.condemned_count(), 0);
        assert_eq!(space.chunk_count(), 0);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn load_of_a_deleted_chunk_releases_its_extern_stubs() {
        use chunkspace_format::outside_chunk_doc;

        let settings = SpaceSettings::new(GridBounds::new(0, 0, 0, 0));
        let home = Arc::new(MemorySource::new("home/", settings.clone()));
        let mut doc = outside_chunk_doc(0, 0, &GridBounds::new(0, 0, 1, 0));
        for p in doc.boundaries.iter_mut().flat_map(|b| b.portals.iter_mut()) {
            if p.chunk == "00010000o" {
                p.chunk = "extern".into();
            }
        }
        home.insert("00000000o", doc).unwrap();
        let east = Arc::new(MemorySource::new("east/", settings.clone()));
        write_outside_grid(east.as_ref(), &settings).unwrap();

        let mut space = Space::with_focus_range(4);
        let home = space.add_mapping(home, Affine3A::IDENTITY).unwrap();
        let east = space
            .add_mapping(east, Affine3A::from_translation(Vec3::new(100.0, 0.0, 0.0)))
            .unwrap();
        let id = space.find_chunk_by_name("00000000o", home.id(), true).unwrap();
        let outcome = space.prepare_load(id).unwrap().load();
        // the extern portal found the east mapping's chunk
        assert_eq!(east.refs(), 2);

        let east_id = east.id();
        let weak: Weak<DirMapping> = Arc::downgrade(&east);
        drop(east);
        space.del_mapping(east_id).unwrap();
        assert_eq!(space.condemned_count(), 1);
        space.delete_chunk(id).unwrap();

        assert!(!space.complete_load(outcome).unwrap());
        assert_eq!(space.condemned_count(), 0);
        assert!(weak.upgrade().is_none());
        assert_eq!(home.refs(), 1);
    }

    #[test]
    fn del_mapping_unloads_its_chunks() {
        let (mut space, mapping, _) = grid_space(GridBounds::new(0, 0, 1, 0));
        load(&mut space, &mapping, "00000000o");
        load(&mut space, &mapping, "00010000o");
        space.del_mapping(mapping.id()).unwrap();
        assert_eq!(space.chunk_count(), 0);
        assert!(space.blurred().is_empty());
        assert_eq!(space.condemned_count(), 0);
    }

    #[test]
    fn second_load_is_rejected() {
        let (mut space, mapping, _) = grid_space(GridBounds::new(0, 0, 0, 0));
        let id = load(&mut space, &mapping, "00000000o");
        assert!(matches!(
            space.prepare_load(id),
            Err(GraphError::AlreadyLoaded(_))
        ));
    }

    #[test]
    fn tick_reaches_chunk_and_homeless_items() {
        use crate::item::Actor;
        let (mut space, mapping, _) = grid_space(GridBounds::new(0, 0, 0, 0));
        let id = load(&mut space, &mapping, "00000000o");
        let inside = space
            .add_dynamic_item(id, Box::new(Actor::new("a", Vec3::new(50.0, 0.0, 50.0), 0.5)))
            .unwrap();
        let lost = space.add_homeless_item(Box::new(Actor::new("b", Vec3::splat(-500.0), 0.5)), ItemKind::Dynamic);
        space.tick(0.25);
        let elapsed = |i| space.items().downcast::<Actor>(i).unwrap().elapsed();
        assert_eq!(elapsed(inside), 0.25);
        assert_eq!(elapsed(lost), 0.25);
    }
}
