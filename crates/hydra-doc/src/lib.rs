//! Shared document model for Hydra Notes.
//!
//! A document is a tree of blocks with base-62 fractional sibling order and
//! tombstone deletion. Text-bearing blocks own a [`TextBuffer`]; portals
//! resolve to their source's buffer, so every view of a block edits the same
//! text.
//!
//! # Example
//!
//! ```
//! use hydra_doc::{BlockKind, Document, DocumentId, PrincipalId};
//!
//! let doc = Document::new(DocumentId::new(), PrincipalId::new());
//! let src = doc.append_block(None, BlockKind::Bullet, "Hello").unwrap();
//! let portal = doc.insert_portal(None, Some(&src), &src).unwrap();
//!
//! doc.text_buffer(&portal).unwrap().append(" World").unwrap();
//! assert_eq!(doc.get_block(&src).unwrap().content, "Hello World");
//! ```

pub mod buffer;
pub mod document;
pub mod error;
pub mod events;
pub mod order;
pub mod snapshot;
mod store;

pub use buffer::TextBuffer;
pub use document::{Document, Transaction};
pub use error::DocError;
pub use events::{BlockEvent, BlockWatch, DocEvent, WatchHandle};
pub use snapshot::DocumentSnapshot;
pub use store::MAX_TREE_DEPTH;

pub use hydra_types::{
    BlockId, BlockKind, BlockPatch, BlockSnapshot, DocumentId, PortalLink, PrincipalId,
    SyncStatus, now_millis,
};

/// Result type for document operations.
pub type Result<T> = std::result::Result<T, DocError>;
