//! Format: chunk documents, space settings and the sources they are read from.
//!
//! # Invariants
//! - Settings with an unknown format version are rejected, never guessed at.
//! - A missing chunk document is `Ok(None)`, distinct from an unreadable one.

mod doc;
mod outside;
mod source;

pub use doc::{
    BoundaryDoc, ChunkDoc, GridBounds, PortalDoc, SETTINGS_FORMAT_VERSION, ShellDoc,
    SpaceSettings, TransformDoc,
};
pub use outside::{outside_chunk_doc, write_outside_grid};
pub use source::{CHUNK_EXTENSION, ChunkSource, DirSource, FormatError, MemorySource, SETTINGS_FILE};

pub fn crate_info() -> &'static str {
    "chunkspace-format v0.1.0"
}
