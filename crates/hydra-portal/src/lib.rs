//! Portal live-sync for Hydra Notes.
//!
//! A portal block mirrors a source block elsewhere in the same document.
//! This crate keeps the mirror honest:
//!
//! - [`observer`] follows one source block and debounces its text changes
//! - [`display`] maps persisted and transient flags to a visual state
//! - [`subtree`] copies the source's descendants for read-only previews
//! - [`cascade`] deletes every portal that would be left pointing at nothing
//! - [`editing`] binds an editable portal straight to the source's buffer
//! - [`view`] owns all of the above for one mounted portal
//!
//! # Example
//!
//! ```
//! use hydra_doc::{BlockKind, Document, DocumentId, PrincipalId};
//! use hydra_portal::{create_portal, delete_bullet};
//!
//! let doc = Document::new(DocumentId::new(), PrincipalId::new());
//! let src = doc.append_block(None, BlockKind::Bullet, "Hello").unwrap();
//! let portal = create_portal(&doc, None, Some(&src), &src).unwrap();
//!
//! let report = delete_bullet(&doc, &src).unwrap();
//! assert_eq!(report.portals_deleted, vec![portal]);
//! ```

pub mod cascade;
pub mod config;
pub mod display;
pub mod editing;
pub mod error;
pub mod observer;
pub mod portal;
pub mod subtree;
pub mod view;

pub use cascade::{
    CascadeFailure, CascadeReport, cascade, delete_bullet, find_portals_referencing,
    merge_into_parent, merge_with_previous_sibling,
};
pub use config::{DEFAULT_DEBOUNCE_MS, DEFAULT_MAX_SUBTREE_DEPTH, DEFAULT_PREVIEW_CHARS, PortalConfig};
pub use display::{DisplayState, compute_display_state, is_editable, status_label};
pub use editing::{EditingBridge, EditingSession, Surface, truncate_preview};
pub use error::{ConfigError, PortalError, Result};
pub use observer::{Callbacks, SourceListener, SourceObserver, callbacks, create_source_observer};
pub use portal::{
    EmbedCandidate, create_portal, find_embeddable, portal_link, toggle_portal_collapsed,
    validate_source,
};
pub use subtree::{
    LocalCollapse, SubtreeNode, SubtreeOptions, SubtreeRow, SubtreeSnapshot, depth_limit_warning,
    fetch_subtree, fetch_subtree_deferred,
};
pub use view::{PortalFrame, PortalView};
