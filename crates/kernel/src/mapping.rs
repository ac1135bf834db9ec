//! Directory mappings: a streamed set of chunk documents placed into a space.
//!
//! A mapping is shared as `Arc<DirMapping>` between the space, stub chunks
//! that name it through extern portals, and in-flight loads. The `refs`
//! counter tracks those logical holders; the space drops a condemned mapping
//! once it reaches zero.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chunkspace_common::{BoundingBox, GRID_RESOLUTION, outside_chunk_identifier};
use chunkspace_format::{ChunkSource, FormatError, GridBounds};
use glam::{Affine3A, Vec3};

use crate::portal::StubRef;

/// Identifier of a mapping within its space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MappingId(pub u32);

impl fmt::Display for MappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

pub struct DirMapping {
    id: MappingId,
    path: String,
    source: Arc<dyn ChunkSource>,
    mapper: Affine3A,
    inv_mapper: Affine3A,
    local_bounds: GridBounds,
    world_bounds: GridBounds,
    single_dir: bool,
    refs: AtomicUsize,
    condemned: AtomicBool,
}

impl fmt::Debug for DirMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirMapping")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("world_bounds", &self.world_bounds)
            .field("refs", &self.refs())
            .field("condemned", &self.is_condemned())
            .finish()
    }
}

/// World grid bounds covered by a local grid box once placed by `mapper`.
pub fn world_grid_bounds(local: &GridBounds, mapper: &Affine3A) -> GridBounds {
    let lbb = BoundingBox::new(
        Vec3::new(local.min_x as f32, 0.0, local.min_y as f32) * GRID_RESOLUTION,
        Vec3::new((local.max_x + 1) as f32, 0.0, (local.max_y + 1) as f32) * GRID_RESOLUTION,
    );
    let wbb = lbb.transformed(mapper);
    let snap = |v: f32| (v / GRID_RESOLUTION + 0.5).floor() as i32;
    GridBounds::new(
        snap(wbb.min.x),
        snap(wbb.min.z),
        snap(wbb.max.x) - 1,
        snap(wbb.max.z) - 1,
    )
}

impl DirMapping {
    /// Read the source's settings and place it with `mapper`.
    /// The new mapping starts with no references.
    pub fn new(
        id: MappingId,
        source: Arc<dyn ChunkSource>,
        mapper: Affine3A,
    ) -> Result<Self, FormatError> {
        let settings = source.settings()?;
        let local_bounds = settings.bounds;
        Ok(Self {
            id,
            path: source.path().to_string(),
            world_bounds: world_grid_bounds(&local_bounds, &mapper),
            inv_mapper: mapper.inverse(),
            mapper,
            local_bounds,
            single_dir: settings.single_dir,
            source,
            refs: AtomicUsize::new(0),
            condemned: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> MappingId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn source(&self) -> &Arc<dyn ChunkSource> {
        &self.source
    }

    pub fn mapper(&self) -> &Affine3A {
        &self.mapper
    }

    pub fn inv_mapper(&self) -> &Affine3A {
        &self.inv_mapper
    }

    pub fn local_bounds(&self) -> GridBounds {
        self.local_bounds
    }

    pub fn world_bounds(&self) -> GridBounds {
        self.world_bounds
    }

    pub fn single_dir(&self) -> bool {
        self.single_dir
    }

    /// Outside chunk holding a mapping-local point, or `None` when
    /// `check_bounds` is set and the point lies beyond the local bounds.
    pub fn outside_chunk_identifier(&self, local_point: Vec3, check_bounds: bool) -> Option<String> {
        let x = (local_point.x / GRID_RESOLUTION).floor() as i32;
        let z = (local_point.z / GRID_RESOLUTION).floor() as i32;
        self.outside_chunk_identifier_at(x, z, check_bounds)
    }

    pub fn outside_chunk_identifier_at(&self, x: i32, z: i32, check_bounds: bool) -> Option<String> {
        if check_bounds && !self.local_bounds.contains(x, z) {
            return None;
        }
        let x = i16::try_from(x).ok()?;
        let z = i16::try_from(z).ok()?;
        Some(outside_chunk_identifier(x, z))
    }

    pub fn inc_ref(&self) -> usize {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Release one reference. Returns the remaining count.
    pub fn dec_ref(&self) -> usize {
        let prev = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| r.checked_sub(1));
        match prev {
            Ok(r) => r - 1,
            Err(_) => {
                tracing::error!(path = %self.path, "mapping reference count underflow");
                0
            }
        }
    }

    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub fn condemn(&self) {
        self.condemned.store(true, Ordering::Release);
    }

    pub fn is_condemned(&self) -> bool {
        self.condemned.load(Ordering::Acquire)
    }
}

/// Find the chunk holding a world point among `mappings`, as a fresh stub.
///
/// The outside chunk of the first mapping that has one wins, unless
/// `look_inside` is set and an overlapper of a nearby outside chunk declares
/// a bounding box containing the point. The returned stub holds a reference
/// on its mapping.
pub fn guess_chunk(mappings: &[Arc<DirMapping>], point: Vec3, look_inside: bool) -> Option<StubRef> {
    let mut best: Option<(&Arc<DirMapping>, String)> = None;
    let reach = if look_inside { 1 } else { 0 };

    for mapping in mappings.iter().filter(|m| !m.is_condemned()) {
        let lpoint = mapping.inv_mapper().transform_point3(point);
        let gx = (lpoint.x / GRID_RESOLUTION).floor() as i32;
        let gz = (lpoint.z / GRID_RESOLUTION).floor() as i32;
        let source = mapping.source();

        let mut found: Option<String> = None;
        let mut inside = false;
        'cells: for x in gx - reach..=gx + reach {
            for z in gz - reach..=gz + reach {
                let Some(cell) = mapping.outside_chunk_identifier_at(x, z, true) else {
                    continue;
                };
                if !source.has_chunk(&cell) {
                    continue;
                }
                if x == gx && z == gz && found.is_none() {
                    found = Some(cell.clone());
                }
                if !look_inside {
                    continue;
                }
                let overlappers = match source.read_chunk(&cell) {
                    Ok(Some(doc)) => doc.overlappers,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(chunk = %cell, error = %e, "unreadable outside chunk");
                        continue;
                    }
                };
                for name in overlappers {
                    let bb = match source.read_chunk(&name) {
                        Ok(Some(doc)) => doc.bounding_box,
                        _ => None,
                    };
                    if bb.is_some_and(|bb| bb.contains_point(lpoint)) {
                        found = Some(name);
                        inside = true;
                        break 'cells;
                    }
                }
            }
        }

        if let Some(identifier) = found {
            if inside || best.is_none() {
                best = Some((mapping, identifier));
            }
            if !look_inside {
                break;
            }
        }
    }

    best.map(|(mapping, identifier)| {
        mapping.inc_ref();
        StubRef {
            identifier,
            mapping: Arc::clone(mapping),
        }
    })
}
