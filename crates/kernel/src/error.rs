use chunkspace_common::ItemId;
use chunkspace_format::FormatError;

use crate::arena::ChunkId;
use crate::mapping::MappingId;

/// Errors raised while mutating the chunk graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("chunk {0} no longer exists")]
    StaleChunk(ChunkId),
    #[error("chunk {0} is online")]
    Online(String),
    #[error("chunk {0} is offline")]
    Offline(String),
    #[error("chunk {0} is not loaded")]
    NotLoaded(String),
    #[error("chunk {0} is already loaded or loading")]
    AlreadyLoaded(String),
    #[error("chunk {chunk} has no reverse portal to {neighbour}")]
    MissingReversePortal { chunk: String, neighbour: String },
    #[error("lending records of {lender} and {borrower} disagree")]
    LendingMismatch { lender: String, borrower: String },
    #[error("unknown item {0:?}")]
    UnknownItem(ItemId),
    #[error("unknown mapping {0}")]
    UnknownMapping(MappingId),
    #[error("chunk {0} is outside the focus window")]
    OutOfFocus(String),
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Errors from loading a chunk document.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("mapping {0} was condemned during the load")]
    Condemned(String),
    #[error(transparent)]
    Format(#[from] FormatError),
}
