//! Error types for the portal layer.
//!
//! Most portal failures never reach callers: the observer and view degrade
//! to the orphaned display state instead. These errors cover the explicit
//! operations (creation, subtree fetch, cascade) and configuration.

use thiserror::Error;

use hydra_doc::{BlockId, DocError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortalError {
    #[error("source block not found: {0}")]
    SourceNotFound(BlockId),

    #[error("block {0} is not a portal")]
    NotAPortal(BlockId),

    /// Portals may only point at text-bearing blocks.
    #[error("block {0} is a portal and cannot be a portal source")]
    SourceIsPortal(BlockId),

    #[error("cross-document portals are not supported (source {0})")]
    CrossDocument(BlockId),

    #[error("block {0} has nothing to merge into")]
    NoMergeTarget(BlockId),

    /// The portal is collapsed, orphaned, loading, or has no live buffer.
    #[error("portal {0} is not editable right now")]
    NotEditable(BlockId),

    #[error(transparent)]
    Doc(#[from] DocError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("RON encode error: {0}")]
    RonEncode(#[from] ron::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, PortalError>;
