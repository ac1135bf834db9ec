//! Streaming: a background loader thread and the per-frame scheduler that
//! decides which chunks to load, bind and eject around the camera.
//!
//! # Invariants
//! - Only the main thread touches a space; the loader thread sees tickets
//!   and returns outcomes.
//! - A chunk is queued at most once while its load is in flight.
//! - Chunks are loaded within `max_load_path` and ejected only beyond
//!   `min_eject_path` along the portal graph.

mod budget;
mod context;
mod error;
mod loader;
mod manager;

pub use budget::{FrameTimer, StreamConfig, StreamStats};
pub use context::{SpaceId, SpaceMap, WorldContext};
pub use error::StreamError;
pub use loader::{LoadDone, Loader};
pub use manager::ChunkManager;

pub fn crate_info() -> &'static str {
    "chunkspace-stream v0.1.0"
}
