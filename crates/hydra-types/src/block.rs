//! Block identity, kinds, and serializable snapshots.
//!
//! An outline is a tree of blocks. Text-bearing blocks (bullets, headings,
//! markers) own a collaboratively editable text buffer; portal blocks own no
//! text and instead carry a [`PortalLink`] to a source block in the same
//! document.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::{DocumentId, PrincipalId};

/// Globally unique block identifier.
///
/// Composed of:
/// - `document_id`: the document this block belongs to
/// - `agent_id`: the principal that created this block
/// - `seq`: agent-local sequence number (monotonically increasing)
#[derive(Clone, Copy, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BlockId {
    pub document_id: DocumentId,
    pub agent_id: PrincipalId,
    /// Agent-local sequence number. Uniqueness per (document, agent) is the
    /// document's job, not this type's.
    pub seq: u64,
}

impl BlockId {
    pub fn new(document_id: DocumentId, agent_id: PrincipalId, seq: u64) -> Self {
        Self {
            document_id,
            agent_id,
            seq,
        }
    }

    /// Convert to a compact string key: `"{document_hex}:{principal_hex}:{seq}"`.
    pub fn to_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.document_id.to_hex(),
            self.agent_id.to_hex(),
            self.seq
        )
    }

    /// Parse from key string: `"{document_hex}:{principal_hex}:{seq}"`.
    pub fn from_key(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.splitn(3, ':').collect();
        if parts.len() != 3 {
            return None;
        }
        let document_id = DocumentId::parse(parts[0]).ok()?;
        let agent_id = PrincipalId::parse(parts[1]).ok()?;
        let seq: u64 = parts[2].parse().ok()?;
        Some(Self {
            document_id,
            agent_id,
            seq,
        })
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}#{}",
            self.document_id.short(),
            self.agent_id.short(),
            self.seq
        )
    }
}

impl std::fmt::Debug for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockId({self})")
    }
}

/// What a block *is*.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum BlockKind {
    /// Plain outline bullet.
    #[default]
    Bullet,
    /// Section heading.
    Heading,
    /// Marker bullet (`%Template`, `%Visualization`, ...).
    Marker,
    /// Live transclusion of another block. Owns no text.
    #[strum(serialize = "portal", serialize = "embed")]
    Portal,
}

impl BlockKind {
    /// Parse from string (case-insensitive). Accepts "embed" for portals.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Bullet => "bullet",
            BlockKind::Heading => "heading",
            BlockKind::Marker => "marker",
            BlockKind::Portal => "portal",
        }
    }

    /// Whether blocks of this kind own a text buffer.
    pub fn has_text(&self) -> bool {
        !self.is_portal()
    }

    pub fn is_portal(&self) -> bool {
        matches!(self, BlockKind::Portal)
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted sync status of a portal.
///
/// Mutated only by the sync machinery, never directly by the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Portal content matches the source.
    #[default]
    Synced,
    /// A source change was seen; the debounced update has not landed yet.
    Stale,
    /// The source block no longer exists.
    Orphaned,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Stale => "stale",
            SyncStatus::Orphaned => "orphaned",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Link from a portal block to its source (a reference, not ownership).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalLink {
    /// Block being mirrored. May dangle after the source is deleted.
    pub source_block_id: BlockId,
    /// Reserved for cross-document portals. Always the owning document today.
    pub source_doc_id: DocumentId,
    pub sync_status: SyncStatus,
}

impl PortalLink {
    /// Link to a source in the same document, initially synced.
    pub fn to(source_block_id: BlockId) -> Self {
        Self {
            source_block_id,
            source_doc_id: source_block_id.document_id,
            sync_status: SyncStatus::Synced,
        }
    }
}

/// Serializable snapshot of a block (no live buffer state).
///
/// Encoded with postcard inside document snapshots, so no field may be
/// skipped on serialize. `default` only helps self-describing formats.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub id: BlockId,
    /// Tree edge. None for root blocks.
    #[serde(default)]
    pub parent_id: Option<BlockId>,
    pub kind: BlockKind,
    /// Text content. Always empty for portals.
    #[serde(default)]
    pub content: String,
    /// Fold state. For portals this is the persisted collapse toggle.
    #[serde(default)]
    pub collapsed: bool,
    /// Present only on portal blocks.
    #[serde(default)]
    pub portal: Option<PortalLink>,
    /// Fractional index among siblings (base-62 lexicographic).
    pub order_key: String,
    /// Unix millis.
    pub created_at: u64,
    /// Logical clock value of the last metadata mutation.
    pub updated_at: u64,
}

impl BlockSnapshot {
    /// The principal that authored this block (always `id.agent_id`).
    pub fn author(&self) -> PrincipalId {
        self.id.agent_id
    }

    pub fn is_portal(&self) -> bool {
        self.kind.is_portal()
    }

    /// Whether the block is unfolded in its own document.
    pub fn is_expanded(&self) -> bool {
        !self.collapsed
    }

    /// Source of a portal block.
    pub fn portal_source(&self) -> Option<BlockId> {
        self.portal.map(|link| link.source_block_id)
    }
}

/// Partial update applied through the document's normal update path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapsed: Option<bool>,
    /// Only meaningful for portal blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<SyncStatus>,
    /// Re-point a portal at another source block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_block_id: Option<BlockId>,
}

impl BlockPatch {
    pub fn collapsed(collapsed: bool) -> Self {
        Self {
            collapsed: Some(collapsed),
            ..Self::default()
        }
    }

    pub fn sync_status(status: SyncStatus) -> Self {
        Self {
            sync_status: Some(status),
            ..Self::default()
        }
    }

    pub fn source(source_block_id: BlockId) -> Self {
        Self {
            source_block_id: Some(source_block_id),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.collapsed.is_none() && self.sync_status.is_none() && self.source_block_id.is_none()
    }
}
