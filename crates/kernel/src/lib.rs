//! Chunk kernel: the portal-connected graph of chunks that makes up a space,
//! the column index around the camera, and the items chunks own and lend.
//!
//! # Invariants
//! - A bound portal always has a bound reverse portal in its target with the
//!   same world centre.
//! - A chunk is online only while loaded, and only online chunks are focused.
//! - Columns never index a chunk whose focus count is zero.
//! - Loans are recorded on both the lender and the borrower, or on neither.
//! - A mapping's chunks keep it alive; a condemned mapping is dropped once
//!   its last chunk lets go.

mod arena;
mod body;
mod boundary;
mod chunk;
mod collide;
mod column;
mod error;
mod focus;
mod graph;
mod item;
mod lending;
mod mapping;
mod portal;
mod space;
mod validate;

pub use arena::ChunkId;
pub use body::{ChunkBody, LoadOutcome, LoadTicket};
pub use boundary::Boundary;
pub use chunk::{Chunk, Lender, outside_local_bb, outside_transform};
pub use chunkspace_common::ItemId;
pub use collide::{CollideMask, SweepHit, SweepShape};
pub use column::{Column, FocusGrid, Hull, Obstacle};
pub use error::{GraphError, LoadError};
pub use item::{
    Actor, BoundsContributor, ChunkItem, Drawable, ItemEntry, ItemKind, ItemRegistry, Lendable, PointLight,
    ShellModel, Tickable,
};
pub use mapping::{DirMapping, MappingId, guess_chunk, world_grid_bounds};
pub use portal::{PORTAL_EPSILON, Portal, PortalTarget, StubRef, can_bind, split_polygon};
pub use space::{FOCUS_MARGIN, FOCUS_RANGE, Space};
pub use validate::Violation;

pub fn crate_info() -> &'static str {
    "chunkspace-kernel v0.1.0"
}
