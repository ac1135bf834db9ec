//! Standard boundary set of an outside chunk.
//!
//! Every outside chunk is the same box: four vertical walls on the grid cell
//! edges plus a floor and a ceiling at the chunk height limits. Plane normals
//! point into the chunk. Walls facing a neighbour inside the mapping carry a
//! portal to it; the floor and ceiling lead to `earth` and `heaven`.

use chunkspace_common::{
    GRID_RESOLUTION, MAX_CHUNK_HEIGHT, MIN_CHUNK_HEIGHT, outside_chunk_identifier,
};
use glam::Vec3;

use crate::doc::{BoundaryDoc, ChunkDoc, GridBounds, PortalDoc, SpaceSettings};
use crate::source::{ChunkSource, FormatError};

fn portal(chunk: String, u_axis: Vec3, points: [(f32, f32); 4]) -> PortalDoc {
    PortalDoc {
        label: String::new(),
        internal: false,
        permissive: true,
        chunk,
        u_axis,
        points: points.iter().map(|&(u, v)| Vec3::new(u, v, 0.0)).collect(),
    }
}

fn wall(normal: Vec3, d: f32, portal: Option<PortalDoc>) -> BoundaryDoc {
    BoundaryDoc {
        normal,
        d,
        portals: portal.into_iter().collect(),
    }
}

/// Build the document of the outside chunk at `(x, z)` in a mapping whose
/// local grid bounds are `bounds`.
pub fn outside_chunk_doc(x: i16, z: i16, bounds: &GridBounds) -> ChunkDoc {
    let gr = GRID_RESOLUTION;
    let lo = MIN_CHUNK_HEIGHT;
    let hi = MAX_CHUNK_HEIGHT;
    let (xi, zi) = (x as i32, z as i32);

    let neighbour = |dx: i16, dz: i16, at_edge: bool| -> Option<String> {
        (!at_edge).then(|| outside_chunk_identifier(x.wrapping_add(dx), z.wrapping_add(dz)))
    };
    let vertical = [(lo, 0.0), (hi, 0.0), (hi, gr), (lo, gr)];
    let horizontal = [(0.0, lo), (gr, lo), (gr, hi), (0.0, hi)];
    let cap = [(0.0, 0.0), (gr, 0.0), (gr, gr), (0.0, gr)];

    let boundaries = vec![
        wall(
            Vec3::X,
            0.0,
            neighbour(-1, 0, xi <= bounds.min_x).map(|c| portal(c, Vec3::Y, vertical)),
        ),
        wall(
            Vec3::NEG_X,
            -gr,
            neighbour(1, 0, xi >= bounds.max_x).map(|c| portal(c, Vec3::Z, horizontal)),
        ),
        wall(Vec3::Y, lo, Some(portal("earth".into(), Vec3::Z, cap))),
        wall(Vec3::NEG_Y, -hi, Some(portal("heaven".into(), Vec3::X, cap))),
        wall(
            Vec3::Z,
            0.0,
            neighbour(0, -1, zi <= bounds.min_y).map(|c| portal(c, Vec3::X, horizontal)),
        ),
        wall(
            Vec3::NEG_Z,
            -gr,
            neighbour(0, 1, zi >= bounds.max_y).map(|c| portal(c, Vec3::Y, vertical)),
        ),
    ];

    ChunkDoc {
        boundaries,
        ..ChunkDoc::default()
    }
}

/// Write an outside chunk for every cell of `settings.bounds`.
/// Returns the number of chunks written.
pub fn write_outside_grid(
    source: &dyn ChunkSource,
    settings: &SpaceSettings,
) -> Result<usize, FormatError> {
    let b = settings.bounds;
    let mut written = 0;
    for z in b.min_y..=b.max_y {
        for x in b.min_x..=b.max_x {
            let (gx, gz) = (x as i16, z as i16);
            let doc = outside_chunk_doc(gx, gz, &b);
            source.write_chunk(&outside_chunk_identifier(gx, gz), &doc)?;
            written += 1;
        }
    }
    tracing::debug!(written, path = source.path(), "generated outside grid");
    Ok(written)
}
