//! Common: grid constants, spatial primitives and chunk identifiers shared by
//! every chunkspace crate.
//!
//! # Invariants
//! - Outside chunk identifiers round-trip exactly through encode/decode.
//! - Grid cells are `GRID_RESOLUTION` wide and indexed by floor division.

mod geometry;
mod ident;
mod types;

pub use geometry::{BoundingBox, PlaneEq};
pub use ident::{IdentError, grid_from_chunk_name, is_outside_identifier, outside_chunk_identifier};
pub use types::{GRID_RESOLUTION, GridCoord, ItemId, MAX_CHUNK_HEIGHT, MIN_CHUNK_HEIGHT};

pub fn crate_info() -> &'static str {
    "chunkspace-common v0.1.0"
}
