//! Error types for document model operations.

use thiserror::Error;

use crate::{BlockId, DocumentId};

/// Errors that can occur during document operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocError {
    /// Block not found in document (never existed, or tombstoned).
    #[error("block not found: {0:?}")]
    BlockNotFound(BlockId),

    /// Invalid reference block for insertion or move.
    #[error("reference block not found: {0:?}")]
    InvalidReference(BlockId),

    /// The document has not received its initial state yet.
    #[error("document not ready")]
    NotReady,

    /// Operation needs a text buffer but the block is a portal.
    #[error("block {0:?} has no text buffer")]
    NotTextBearing(BlockId),

    /// Portal-only patch applied to a text block.
    #[error("block {0:?} is not a portal")]
    NotAPortal(BlockId),

    /// Edit against a buffer whose block has been deleted.
    #[error("text buffer for {0:?} is detached")]
    Detached(BlockId),

    /// Edit position out of bounds (char positions).
    #[error("edit position {pos} out of bounds for block with length {len}")]
    PositionOutOfBounds { pos: usize, len: usize },

    /// Move would make a block its own ancestor.
    #[error("moving {0:?} under {1:?} would create a cycle")]
    Cycle(BlockId, BlockId),

    /// Block belongs to a different document.
    #[error("block {0:?} belongs to another document")]
    ForeignBlock(BlockId),

    /// Portal blocks are created through `insert_portal`, which needs a source.
    #[error("portal blocks need a source block")]
    PortalWithoutSource,

    /// Snapshot taken from a different document.
    #[error("snapshot is for document {found}, expected {expected}")]
    DocumentMismatch {
        expected: DocumentId,
        found: DocumentId,
    },

    /// Duplicate block ID on restore.
    #[error("block already exists: {0:?}")]
    DuplicateBlock(BlockId),

    /// Snapshot encode/decode failure.
    #[error("snapshot error: {0}")]
    Snapshot(String),
}
