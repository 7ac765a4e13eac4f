//! Whole-document snapshots for save/load and sync bootstrap.

use serde::{Deserialize, Serialize};

use crate::error::DocError;
use crate::{BlockId, BlockSnapshot, DocumentId, PrincipalId, Result};

/// Serializable state of a document: every live block plus the counters
/// needed to keep allocating fresh IDs after a restore.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub document_id: DocumentId,
    /// Principal that produced the snapshot.
    pub agent_id: PrincipalId,
    pub next_seq: u64,
    pub clock: u64,
    /// Live blocks, in document (pre-order) order.
    pub blocks: Vec<BlockSnapshot>,
}

impl DocumentSnapshot {
    pub fn empty(document_id: DocumentId, agent_id: PrincipalId) -> Self {
        Self {
            document_id,
            agent_id,
            next_seq: 0,
            clock: 0,
            blocks: Vec::new(),
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn get(&self, id: &BlockId) -> Option<&BlockSnapshot> {
        self.blocks.iter().find(|b| &b.id == id)
    }

    /// Compact binary encoding (postcard).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_stdvec(self).map_err(|e| DocError::Snapshot(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes).map_err(|e| DocError::Snapshot(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| DocError::Snapshot(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DocError::Snapshot(e.to_string()))
    }
}
