//! Shared identity and block types for Hydra Notes.
//!
//! A pure leaf crate: typed IDs, block kinds, portal links, and serializable
//! block snapshots. It has no internal hydra dependencies.
//!
//! ```text
//! Document (DocumentId)
//!     └── Block (BlockId = DocumentId + PrincipalId + seq)
//!           ├── bullet / heading / marker → owns a text buffer
//!           └── portal → PortalLink { source_block_id, sync_status }
//! ```

pub mod block;
pub mod ids;

pub use block::{BlockId, BlockKind, BlockPatch, BlockSnapshot, PortalLink, SyncStatus};
pub use ids::{DocumentId, PrincipalId};

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
