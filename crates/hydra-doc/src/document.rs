//! The shared document handle.
//!
//! # Locking
//!
//! Lock order is store → text buffer → watcher registry. Nothing takes the
//! store lock while holding a buffer lock, and events produced under the
//! store lock are published only after it is released.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::buffer::TextBuffer;
use crate::error::DocError;
use crate::events::{BlockWatch, DocEvent, EventHub};
use crate::snapshot::DocumentSnapshot;
use crate::store::BlockStore;
use crate::{BlockId, BlockKind, BlockPatch, BlockSnapshot, DocumentId, PrincipalId, Result};

struct DocInner {
    document_id: DocumentId,
    agent_id: PrincipalId,
    store: RwLock<BlockStore>,
    hub: Arc<EventHub>,
    ready: AtomicBool,
}

/// A block-tree document. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocInner>,
}

impl Document {
    /// A ready, empty document.
    pub fn new(document_id: DocumentId, agent_id: PrincipalId) -> Self {
        let doc = Self::new_for_sync(document_id, agent_id);
        doc.inner.ready.store(true, Ordering::Release);
        doc
    }

    /// A document waiting for its initial state. Every access fails with
    /// [`DocError::NotReady`] until [`restore`](Self::restore) succeeds.
    pub fn new_for_sync(document_id: DocumentId, agent_id: PrincipalId) -> Self {
        let hub = EventHub::new();
        Self {
            inner: Arc::new(DocInner {
                document_id,
                agent_id,
                store: RwLock::new(BlockStore::new(document_id, agent_id, hub.clone())),
                hub,
                ready: AtomicBool::new(false),
            }),
        }
    }

    pub fn document_id(&self) -> DocumentId {
        self.inner.document_id
    }

    pub fn agent_id(&self) -> PrincipalId {
        self.inner.agent_id
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    fn read<R>(&self, f: impl FnOnce(&BlockStore) -> R) -> Result<R> {
        if !self.is_ready() {
            return Err(DocError::NotReady);
        }
        Ok(f(&self.inner.store.read()))
    }

    fn publish(&self, events: Vec<DocEvent>) {
        for event in events {
            self.inner.hub.emit(event);
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fallible lookup: `Err(NotReady)` before initial sync, `Ok(None)` for a
    /// missing or deleted block.
    pub fn try_get_block(&self, id: &BlockId) -> Result<Option<BlockSnapshot>> {
        self.read(|s| s.get_block(id))
    }

    pub fn get_block(&self, id: &BlockId) -> Option<BlockSnapshot> {
        self.try_get_block(id).ok().flatten()
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.read(|s| s.contains(id)).unwrap_or(false)
    }

    pub fn block_count(&self) -> usize {
        self.read(|s| s.block_count()).unwrap_or(0)
    }

    /// Children of `id` in sibling order.
    pub fn children(&self, id: &BlockId) -> Vec<BlockId> {
        self.read(|s| s.children(Some(id))).unwrap_or_default()
    }

    pub fn parent(&self, id: &BlockId) -> Option<BlockId> {
        self.read(|s| s.parent(id)).ok().flatten()
    }

    pub fn roots(&self) -> Vec<BlockId> {
        self.read(|s| s.children(None)).unwrap_or_default()
    }

    /// Descendants of `id` in pre-order, excluding `id`.
    pub fn descendants(&self, id: &BlockId) -> Vec<BlockId> {
        self.read(|s| s.descendants(id)).unwrap_or_default()
    }

    /// Every live portal block.
    pub fn portals(&self) -> Vec<BlockSnapshot> {
        self.read(|s| s.portals()).unwrap_or_default()
    }

    /// Live portals whose source is `source`.
    pub fn portals_in(&self, source: &BlockId) -> Vec<BlockId> {
        self.read(|s| s.portals_in(source)).unwrap_or_default()
    }

    /// Every live block in document order.
    pub fn blocks_ordered(&self) -> Vec<BlockSnapshot> {
        self.read(|s| s.blocks_ordered()).unwrap_or_default()
    }

    /// The text buffer `id` edits. For a portal this is the source's buffer.
    pub fn text_buffer(&self, id: &BlockId) -> Option<TextBuffer> {
        self.try_text_buffer(id).ok()
    }

    pub fn try_text_buffer(&self, id: &BlockId) -> Result<TextBuffer> {
        self.read(|s| s.text_buffer(id))?
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Run several mutations under one write lock. Events are published
    /// after the closure returns and the lock is released.
    pub fn transact<R>(&self, f: impl FnOnce(&mut Transaction<'_>) -> R) -> Result<R> {
        if !self.is_ready() {
            return Err(DocError::NotReady);
        }
        let (out, events) = {
            let mut store = self.inner.store.write();
            let mut tx = Transaction {
                store: &mut *store,
                events: Vec::new(),
            };
            let out = f(&mut tx);
            (out, tx.events)
        };
        tracing::trace!(events = events.len(), "transaction committed");
        self.publish(events);
        Ok(out)
    }

    pub fn insert_block(
        &self,
        parent: Option<&BlockId>,
        after: Option<&BlockId>,
        kind: BlockKind,
        text: &str,
    ) -> Result<BlockId> {
        self.transact(|tx| tx.insert_block(parent, after, kind, text))?
    }

    /// Insert as the last child of `parent`.
    pub fn append_block(
        &self,
        parent: Option<&BlockId>,
        kind: BlockKind,
        text: &str,
    ) -> Result<BlockId> {
        self.transact(|tx| tx.append_block(parent, kind, text))?
    }

    pub fn insert_portal(
        &self,
        parent: Option<&BlockId>,
        after: Option<&BlockId>,
        source: &BlockId,
    ) -> Result<BlockId> {
        self.transact(|tx| tx.insert_portal(parent, after, source))?
    }

    pub fn update_block(&self, id: &BlockId, patch: BlockPatch) -> Result<()> {
        self.transact(|tx| tx.update_block(id, patch))?
    }

    pub fn move_block(
        &self,
        id: &BlockId,
        new_parent: Option<&BlockId>,
        after: Option<&BlockId>,
    ) -> Result<()> {
        self.transact(|tx| tx.move_block(id, new_parent, after))?
    }

    /// Tombstone `id` with its subtree. Returns removed IDs in pre-order.
    pub fn delete_block(&self, id: &BlockId) -> Result<Vec<BlockId>> {
        self.transact(|tx| tx.delete_block(id))?
    }

    /// Edit a block's text (through the source buffer for portals).
    pub fn edit_text(&self, id: &BlockId, pos: usize, insert: &str, delete: usize) -> Result<()> {
        self.try_text_buffer(id)?.edit(pos, insert, delete)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Whole-document event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<DocEvent> {
        self.inner.hub.subscribe()
    }

    /// Per-block event stream. Works before the document is ready; the
    /// watch then sees whatever the initial restore does to the block.
    pub fn watch_block(&self, id: &BlockId) -> BlockWatch {
        self.inner.hub.watch(*id)
    }

    /// Number of live per-block watches.
    pub fn watcher_count(&self) -> usize {
        self.inner.hub.watcher_count()
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> Result<DocumentSnapshot> {
        self.read(|s| s.snapshot())
    }

    /// Replace the document state and mark it ready.
    ///
    /// Watchers of blocks absent from the snapshot receive `Deleted`;
    /// watchers of blocks whose text differs receive `TextChanged`.
    pub fn restore(&self, snapshot: DocumentSnapshot) -> Result<()> {
        let events = {
            let mut store = self.inner.store.write();
            let events = store.restore(snapshot)?;
            self.inner.ready.store(true, Ordering::Release);
            events
        };
        tracing::debug!(
            document_id = %self.inner.document_id,
            events = events.len(),
            "document restored"
        );
        self.publish(events);
        Ok(())
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("document_id", &self.inner.document_id)
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Mutations applied under one document write lock.
pub struct Transaction<'a> {
    store: &'a mut BlockStore,
    events: Vec<DocEvent>,
}

impl Transaction<'_> {
    pub fn get_block(&self, id: &BlockId) -> Option<BlockSnapshot> {
        self.store.get_block(id)
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.store.contains(id)
    }

    pub fn children(&self, id: &BlockId) -> Vec<BlockId> {
        self.store.children(Some(id))
    }

    pub fn roots(&self) -> Vec<BlockId> {
        self.store.children(None)
    }

    pub fn parent(&self, id: &BlockId) -> Option<BlockId> {
        self.store.parent(id)
    }

    pub fn descendants(&self, id: &BlockId) -> Vec<BlockId> {
        self.store.descendants(id)
    }

    pub fn portals_in(&self, source: &BlockId) -> Vec<BlockId> {
        self.store.portals_in(source)
    }

    /// Sibling immediately before `id`, if any.
    pub fn previous_sibling(&self, id: &BlockId) -> Option<BlockId> {
        let parent = self.store.parent(id);
        let siblings = self.store.children(parent.as_ref());
        let pos = siblings.iter().position(|s| s == id)?;
        pos.checked_sub(1).map(|p| siblings[p])
    }

    pub fn insert_block(
        &mut self,
        parent: Option<&BlockId>,
        after: Option<&BlockId>,
        kind: BlockKind,
        text: &str,
    ) -> Result<BlockId> {
        let (id, event) = self.store.insert_block(parent, after, kind, text)?;
        self.events.push(event);
        Ok(id)
    }

    pub fn append_block(
        &mut self,
        parent: Option<&BlockId>,
        kind: BlockKind,
        text: &str,
    ) -> Result<BlockId> {
        let last = self.store.children(parent).last().copied();
        self.insert_block(parent, last.as_ref(), kind, text)
    }

    pub fn insert_portal(
        &mut self,
        parent: Option<&BlockId>,
        after: Option<&BlockId>,
        source: &BlockId,
    ) -> Result<BlockId> {
        let (id, event) = self.store.insert_portal(parent, after, source)?;
        self.events.push(event);
        Ok(id)
    }

    pub fn update_block(&mut self, id: &BlockId, patch: BlockPatch) -> Result<()> {
        if let Some(event) = self.store.update_block(id, patch)? {
            self.events.push(event);
        }
        Ok(())
    }

    pub fn move_block(
        &mut self,
        id: &BlockId,
        new_parent: Option<&BlockId>,
        after: Option<&BlockId>,
    ) -> Result<()> {
        let event = self.store.move_block(id, new_parent, after)?;
        self.events.push(event);
        Ok(())
    }

    pub fn delete_block(&mut self, id: &BlockId) -> Result<Vec<BlockId>> {
        let (removed, events) = self.store.delete_block(id)?;
        self.events.extend(events);
        Ok(removed)
    }

    /// Append to a block's text. The change event joins the transaction's
    /// queue instead of firing immediately.
    pub fn append_text(&mut self, id: &BlockId, text: &str) -> Result<()> {
        let buffer = self.store.text_buffer(id)?;
        if let Some(event) = buffer.append_deferred(text)? {
            self.events.push(event);
        }
        Ok(())
    }

    /// Replace a block's text, published on commit.
    pub fn set_text(&mut self, id: &BlockId, text: &str) -> Result<()> {
        let buffer = self.store.text_buffer(id)?;
        if let Some(event) = buffer.set_text_deferred(text)? {
            self.events.push(event);
        }
        Ok(())
    }
}
