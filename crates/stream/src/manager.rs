//! The per-frame streaming scheduler.
//!
//! Each tick binds finished loads, refocuses the camera space, walks the
//! portal graph outwards from the camera chunk to find what to load next,
//! and ejects chunks that have fallen too far behind.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::sync::Arc;
use std::time::Instant;

use chunkspace_kernel::{ChunkId, DirMapping, GraphError, MappingId, PortalTarget, Space};
use glam::Vec3;

use crate::budget::{FrameTimer, StreamConfig, StreamStats};
use crate::context::{SpaceId, SpaceMap};
use crate::error::StreamError;
use crate::loader::{LoadDone, Loader};

/// A chunk reached by the graph walk, ordered nearest first.
#[derive(Debug, Clone, Copy)]
struct Reach {
    dist: f32,
    chunk: ChunkId,
    at: Vec3,
}

impl PartialEq for Reach {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Reach {}

impl PartialOrd for Reach {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Reach {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap pops the largest
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.chunk.cmp(&self.chunk))
    }
}

/// Result of walking the graph from the camera chunk.
#[derive(Debug, Default)]
struct Scan {
    /// Path distance to every online chunk reached.
    reached: BTreeMap<ChunkId, f32>,
    /// Unloaded neighbours within the load path, nearest first.
    wanted: Vec<(f32, ChunkId)>,
    closest: Option<f32>,
}

#[derive(Debug)]
pub struct ChunkManager {
    config: StreamConfig,
    loader: Loader,
    loading: BTreeSet<(SpaceId, ChunkId)>,
    pending: BTreeSet<(SpaceId, MappingId, String)>,
    camera: Option<(SpaceId, Vec3)>,
    camera_chunk: Option<ChunkId>,
    closest_unloaded: Option<f32>,
    stats: StreamStats,
    timer: FrameTimer,
}

impl ChunkManager {
    pub fn new(config: StreamConfig) -> Result<Self, StreamError> {
        Ok(Self {
            config,
            loader: Loader::spawn()?,
            loading: BTreeSet::new(),
            pending: BTreeSet::new(),
            camera: None,
            camera_chunk: None,
            closest_unloaded: None,
            stats: StreamStats::default(),
            timer: FrameTimer::new(120),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: StreamConfig) {
        self.config = config;
    }

    /// Place the camera. Streaming follows this point from the next tick.
    pub fn set_camera(&mut self, space: SpaceId, position: Vec3) {
        self.camera = Some((space, position));
    }

    pub fn camera(&self) -> Option<(SpaceId, Vec3)> {
        self.camera
    }

    /// The chunk holding the camera as of the last tick.
    pub fn camera_chunk(&self) -> Option<ChunkId> {
        self.camera_chunk
    }

    /// Path distance to the unloaded chunk the last scan wanted most.
    pub fn closest_unloaded_chunk(&self) -> Option<f32> {
        self.closest_unloaded
    }

    pub fn busy(&self) -> bool {
        !self.loading.is_empty()
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn timer(&self) -> &FrameTimer {
        &self.timer
    }

    /// Ask for a chunk to be loaded on a later tick, whether or not the
    /// scan would reach it.
    pub fn load_chunk_explicitly(&mut self, space: SpaceId, identifier: &str, mapping: &Arc<DirMapping>) {
        self.pending.insert((space, mapping.id(), identifier.to_string()));
    }

    /// Load and bind a chunk on the calling thread.
    pub fn load_chunk_now(&mut self, space: &mut Space, id: ChunkId) -> Result<bool, StreamError> {
        Ok(space.load_now(id)?)
    }

    pub fn tick(&mut self, spaces: &mut SpaceMap, dt: f32) -> Result<&StreamStats, StreamError> {
        let _span = tracing::info_span!("chunk_manager_tick").entered();
        let started = Instant::now();
        let mut stats = StreamStats::default();

        self.bind_finished(spaces, &mut stats)?;
        self.start_pending_loads(spaces, &mut stats)?;

        if let Some((space_id, position)) = self.camera {
            let space = spaces.get_mut(&space_id).ok_or(StreamError::UnknownSpace(space_id))?;
            stats.chunks_focused = space.focus_with_budget(position, Some(self.config.focus_budget()));
            self.camera_chunk = space.find_chunk_from_point(position);

            if self.camera_chunk.is_none() && self.blind_panic(space_id, space, position)? {
                space.focus(position);
                self.camera_chunk = space.find_chunk_from_point(position);
            }
            if let Some(seed) = self.camera_chunk {
                let scan = scan(space, seed, position, self.config.max_load_path);
                self.closest_unloaded = scan.closest;
                stats.loads_started += self.start_loads(space_id, space, &scan)?;
                stats.chunks_ejected = self.eject_chunks(space_id, space, seed, &scan)?;
            }
        }

        for space in spaces.values_mut() {
            space.tick(dt);
        }

        stats.loading = self.loading.len();
        stats.online = self
            .camera
            .and_then(|(id, _)| spaces.get(&id))
            .map_or(0, |s| s.chunks().filter(|(_, c)| c.is_online()).count());
        stats.closest_unloaded = self.closest_unloaded;
        stats.frame_time = started.elapsed();
        self.timer.record(stats.frame_time);
        tracing::trace!(
            started = stats.loads_started,
            bound = stats.loads_bound,
            ejected = stats.chunks_ejected,
            loading = stats.loading,
            "chunk manager tick"
        );
        self.stats = stats;
        Ok(&self.stats)
    }

    /// Bind loads the loader thread has finished, up to the bind budget.
    /// Returns whether anything was bound.
    pub fn check_loading_chunks(&mut self, spaces: &mut SpaceMap) -> Result<bool, StreamError> {
        let mut stats = StreamStats::default();
        self.bind_finished(spaces, &mut stats)
    }

    fn bind_finished(&mut self, spaces: &mut SpaceMap, stats: &mut StreamStats) -> Result<bool, StreamError> {
        let mut any = false;
        for _ in 0..self.config.bind_budget.max(1) {
            let Some(done) = self.loader.try_recv()? else {
                break;
            };
            any |= self.finish_load(spaces, done, stats);
        }
        Ok(any)
    }

    /// Block until every queued load has been bound.
    pub fn flush(&mut self, spaces: &mut SpaceMap) -> Result<(), StreamError> {
        let mut stats = StreamStats::default();
        while let Some(done) = self.loader.recv()? {
            self.finish_load(spaces, done, &mut stats);
        }
        Ok(())
    }

    fn finish_load(&mut self, spaces: &mut SpaceMap, done: LoadDone, stats: &mut StreamStats) -> bool {
        self.loading.remove(&(done.space, done.outcome.chunk));
        let Some(space) = spaces.get_mut(&done.space) else {
            // the space went away while its load was in flight
            done.outcome.discard();
            stats.loads_discarded += 1;
            return false;
        };
        let identifier = done.outcome.identifier.clone();
        match space.complete_load(done.outcome) {
            Ok(true) => {
                stats.loads_bound += 1;
                tracing::debug!(chunk = %identifier, load_ms = done.load_ms, "chunk bound");
                true
            }
            Ok(false) => {
                stats.loads_discarded += 1;
                false
            }
            Err(e) => {
                // the chunk is online; only some of its portals stayed unbound
                tracing::error!(chunk = %identifier, error = %e, "chunk bound with errors");
                stats.loads_bound += 1;
                true
            }
        }
    }

    fn start_pending_loads(&mut self, spaces: &mut SpaceMap, stats: &mut StreamStats) -> Result<(), StreamError> {
        for (space_id, mapping, identifier) in std::mem::take(&mut self.pending) {
            let Some(space) = spaces.get_mut(&space_id) else {
                continue;
            };
            let Some(id) = space.find_chunk_by_name(&identifier, mapping, true) else {
                tracing::warn!(chunk = %identifier, %mapping, "explicit load of a chunk in an unknown mapping");
                continue;
            };
            if self.submit(space_id, space, id)? {
                stats.loads_started += 1;
            }
        }
        Ok(())
    }

    fn submit(&mut self, space_id: SpaceId, space: &mut Space, id: ChunkId) -> Result<bool, StreamError> {
        let Some(chunk) = space.chunk(id) else {
            return Ok(false);
        };
        if chunk.is_loaded() || chunk.is_loading() {
            return Ok(false);
        }
        let ticket = space.prepare_load(id)?;
        tracing::debug!(chunk = %ticket.identifier, "chunk load queued");
        self.loader.submit(space_id, ticket)?;
        self.loading.insert((space_id, id));
        Ok(true)
    }

    fn start_loads(&mut self, space_id: SpaceId, space: &mut Space, scan: &Scan) -> Result<usize, StreamError> {
        let mut started = 0;
        for &(_, id) in &scan.wanted {
            if self.loading.len() >= self.config.max_loading_chunks {
                break;
            }
            if self.submit(space_id, space, id)? {
                started += 1;
            }
        }
        Ok(started)
    }

    /// The camera is in no online chunk. When nothing is on its way either,
    /// load the chunk under the camera synchronously. Returns whether a
    /// chunk was loaded.
    pub fn blind_panic(&mut self, space_id: SpaceId, space: &mut Space, position: Vec3) -> Result<bool, StreamError> {
        if self.loading.iter().any(|(s, _)| *s == space_id) {
            return Ok(false);
        }
        self.auto_bootstrap_seed_chunk(space, position)
    }

    /// Guess the chunk under `position` and load it now.
    pub fn auto_bootstrap_seed_chunk(&mut self, space: &mut Space, position: Vec3) -> Result<bool, StreamError> {
        let Some(stub) = space.guess_chunk(position, true) else {
            return Ok(false);
        };
        let mapping = Arc::clone(&stub.mapping);
        let id = space.find_or_add_chunk(stub);
        mapping.dec_ref();

        let chunk = space.chunk(id).ok_or(GraphError::StaleChunk(id))?;
        if chunk.is_loaded() || chunk.is_loading() {
            return Ok(false);
        }
        tracing::info!(chunk = %chunk.identifier(), "bootstrapping seed chunk");
        match space.load_now(id) {
            Ok(loaded) => Ok(loaded),
            Err(e) if space.chunk(id).is_some_and(|c| c.is_online()) => {
                tracing::error!(error = %e, "seed chunk bound with errors");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Eject the farthest chunks beyond the eject path, at most
    /// `max_eject_chunks` of them.
    fn eject_chunks(&mut self, space_id: SpaceId, space: &mut Space, seed: ChunkId, scan: &Scan) -> Result<usize, StreamError> {
        let mut victims: Vec<(f32, ChunkId)> = space
            .chunks()
            .filter(|(id, c)| c.is_online() && *id != seed && !self.loading.contains(&(space_id, *id)))
            .filter_map(|(id, _)| {
                let dist = scan.reached.get(&id).copied().unwrap_or(f32::INFINITY);
                (dist > self.config.min_eject_path).then_some((dist, id))
            })
            .collect();
        victims.sort_by(|a, b| b.0.total_cmp(&a.0));
        victims.truncate(self.config.max_eject_chunks);

        for &(dist, id) in &victims {
            if let Err(e) = space.loose(id, false) {
                tracing::error!(chunk = %id, error = %e, "chunk loosed with errors");
            }
            space.eject(id)?;
            tracing::debug!(chunk = %id, dist, "chunk ejected");
        }
        Ok(victims.len())
    }
}

/// Walk the bound portals outwards from `seed`, shortest path first.
fn scan(space: &Space, seed: ChunkId, camera: Vec3, max_load_path: f32) -> Scan {
    let mut out = Scan::default();
    let mut heap = BinaryHeap::new();
    let mut wanted: BTreeMap<ChunkId, f32> = BTreeMap::new();
    heap.push(Reach {
        dist: 0.0,
        chunk: seed,
        at: camera,
    });

    while let Some(Reach { dist, chunk, at }) = heap.pop() {
        if out.reached.contains_key(&chunk) {
            continue;
        }
        out.reached.insert(chunk, dist);
        let Some(c) = space.chunk(chunk) else {
            continue;
        };
        for boundary in c.boundaries() {
            for portal in &boundary.bound_portals {
                if let PortalTarget::Chunk(next) = portal.target {
                    if !out.reached.contains_key(&next) {
                        heap.push(Reach {
                            dist: dist + at.distance(portal.centre),
                            chunk: next,
                            at: portal.centre,
                        });
                    }
                }
            }
            for portal in &boundary.unbound_portals {
                let PortalTarget::Chunk(next) = portal.target else {
                    continue;
                };
                let Some(n) = space.chunk(next) else {
                    continue;
                };
                if n.is_loaded() || n.is_loading() {
                    continue;
                }
                let d = dist + at.distance(portal.centre);
                out.closest = Some(out.closest.map_or(d, |c| c.min(d)));
                if d <= max_load_path {
                    let best = wanted.entry(next).or_insert(d);
                    *best = best.min(d);
                }
            }
        }
    }

    out.wanted = wanted.into_iter().map(|(id, d)| (d, id)).collect();
    out.wanted.sort_by(|a, b| a.0.total_cmp(&b.0));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkspace_format::{GridBounds, MemorySource, SpaceSettings, write_outside_grid};
    use glam::Affine3A;

    fn grid(bounds: GridBounds) -> (SpaceMap, Arc<DirMapping>) {
        let settings = SpaceSettings::new(bounds);
        let source = Arc::new(MemorySource::new("mem/", settings.clone()));
        write_outside_grid(source.as_ref(), &settings).unwrap();
        let mut space = Space::with_focus_range(8);
        let mapping = space.add_mapping(source, Affine3A::IDENTITY).unwrap();
        let mut spaces = SpaceMap::new();
        spaces.insert(0, space);
        (spaces, mapping)
    }

    fn run(manager: &mut ChunkManager, spaces: &mut SpaceMap, frames: usize) {
        for _ in 0..frames {
            manager.tick(spaces, 0.016).unwrap();
            manager.flush(spaces).unwrap();
        }
    }

    #[test]
    fn blind_panic_loads_the_chunk_under_the_camera() {
        let (mut spaces, _) = grid(GridBounds::new(0, 0, 3, 3));
        let mut manager = ChunkManager::new(StreamConfig::default()).unwrap();
        manager.set_camera(0, Vec3::new(150.0, 0.0, 250.0));
        manager.tick(&mut spaces, 0.016).unwrap();

        let space = &spaces[&0];
        let seed = manager.camera_chunk().unwrap();
        assert_eq!(space.chunk(seed).unwrap().identifier(), "00010002o");
        assert!(space.chunk(seed).unwrap().is_online());
        assert!(manager.busy());
    }

    #[test]
    fn scan_loads_nearest_first_within_the_load_path() {
        let (mut spaces, mapping) = grid(GridBounds::new(0, 0, 9, 0));
        let config = StreamConfig {
            max_load_path: 250.0,
            min_eject_path: 400.0,
            max_loading_chunks: 1,
            ..StreamConfig::default()
        };
        let mut manager = ChunkManager::new(config).unwrap();
        manager.set_camera(0, Vec3::new(50.0, 0.0, 50.0));
        run(&mut manager, &mut spaces, 6);

        let space = &spaces[&0];
        let online = |x: i32| {
            space
                .find_chunk_by_grid(x, 0, mapping.id())
                .and_then(|id| space.chunk(id))
                .is_some_and(|c| c.is_online())
        };
        // portal centres sit on cell borders, 50, 150 and 250 m along the graph
        assert!(online(0) && online(1) && online(2) && online(3));
        assert!(!online(4));
        assert!(manager.closest_unloaded_chunk().unwrap() > 250.0);
        assert!(space.validate().is_empty());
    }

    #[test]
    fn chunks_left_behind_are_ejected_one_per_frame() {
        let (mut spaces, mapping) = grid(GridBounds::new(0, 0, 9, 0));
        let config = StreamConfig {
            max_load_path: 150.0,
            min_eject_path: 250.0,
            ..StreamConfig::default()
        };
        let mut manager = ChunkManager::new(config).unwrap();
        manager.set_camera(0, Vec3::new(50.0, 0.0, 50.0));
        run(&mut manager, &mut spaces, 3);
        let first = spaces[&0].find_chunk_by_grid(0, 0, mapping.id()).unwrap();
        assert!(spaces[&0].chunk(first).unwrap().is_online());

        manager.set_camera(0, Vec3::new(550.0, 0.0, 50.0));
        run(&mut manager, &mut spaces, 12);

        let space = &spaces[&0];
        assert!(!space.chunk(first).unwrap().is_loaded());
        assert!(space.chunk(manager.camera_chunk().unwrap()).unwrap().is_online());
        assert!(space.validate().is_empty());
        assert!(manager.stats().chunks_ejected <= 1);
    }

    #[test]
    fn explicit_load_is_honoured_outside_the_scan() {
        let (mut spaces, mapping) = grid(GridBounds::new(0, 0, 9, 0));
        let mut manager = ChunkManager::new(StreamConfig::default()).unwrap();
        manager.load_chunk_explicitly(0, "00090000o", &mapping);
        manager.tick(&mut spaces, 0.016).unwrap();
        manager.flush(&mut spaces).unwrap();

        let space = &spaces[&0];
        let far = space.find_chunk_by_grid(9, 0, mapping.id()).unwrap();
        assert!(space.chunk(far).unwrap().is_online());
        assert!(manager.camera_chunk().is_none());
    }

    #[test]
    fn load_for_a_dropped_space_releases_its_extern_stubs() {
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
        let mut spaces = SpaceMap::new();
        spaces.insert(0, space);

        let mut manager = ChunkManager::new(StreamConfig::default()).unwrap();
        manager.load_chunk_explicitly(0, "00000000o", &home);
        manager.tick(&mut spaces, 0.016).unwrap();
        assert!(manager.busy());
        spaces.remove(&0);
        manager.flush(&mut spaces).unwrap();

        // only the dropped space's own references remain
        assert_eq!(east.refs(), 1);
        assert_eq!(home.refs(), 1);
        assert!(!manager.busy());
    }

    #[test]
    fn load_chunk_now_binds_synchronously() {
        let (mut spaces, mapping) = grid(GridBounds::new(0, 0, 1, 0));
        let mut manager = ChunkManager::new(StreamConfig::default()).unwrap();
        let space = spaces.get_mut(&0).unwrap();
        let id = space.find_chunk_by_name("00010000o", mapping.id(), true).unwrap();
        assert!(manager.load_chunk_now(space, id).unwrap());
        assert!(space.chunk(id).unwrap().is_online());
        assert!(!manager.busy());
    }
}
