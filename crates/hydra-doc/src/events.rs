//! Change notification for documents.
//!
//! Two streams leave a [`Document`](crate::Document):
//!
//! - a whole-document `tokio::sync::broadcast` of [`DocEvent`] (lossy under
//!   lag, fine for logging and coarse re-renders)
//! - per-block watches ([`BlockWatch`]) over unbounded mpsc channels, which
//!   never drop events and deliver them in emission order
//!
//! A watch is cancelled synchronously through its [`WatchHandle`]: once
//! `cancel()` returns, the sender is gone from the registry and no further
//! event is queued for that watch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::{BlockId, BlockKind, BlockPatch};

/// Capacity of the whole-document broadcast channel.
const BROADCAST_CAPACITY: usize = 1024;

/// Events broadcast when the document changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocEvent {
    /// A block was inserted.
    BlockCreated {
        block_id: BlockId,
        parent_id: Option<BlockId>,
        kind: BlockKind,
    },
    /// A block's text buffer was mutated. Carries the full new text.
    TextChanged {
        block_id: BlockId,
        text: String,
        version: u64,
    },
    /// Metadata patch applied (fold state, sync status).
    BlockUpdated { block_id: BlockId, patch: BlockPatch },
    /// A block was re-parented or re-ordered.
    BlockMoved {
        block_id: BlockId,
        parent_id: Option<BlockId>,
    },
    /// A block was deleted (tombstoned).
    BlockDeleted { block_id: BlockId },
    /// The whole document was replaced from a snapshot.
    Restored { block_count: usize },
}

impl DocEvent {
    /// The block this event concerns, if it concerns exactly one.
    pub fn block_id(&self) -> Option<BlockId> {
        match self {
            DocEvent::BlockCreated { block_id, .. }
            | DocEvent::TextChanged { block_id, .. }
            | DocEvent::BlockUpdated { block_id, .. }
            | DocEvent::BlockMoved { block_id, .. }
            | DocEvent::BlockDeleted { block_id } => Some(*block_id),
            DocEvent::Restored { .. } => None,
        }
    }

    fn to_block_event(&self) -> Option<(BlockId, BlockEvent)> {
        let event = match self {
            DocEvent::TextChanged {
                block_id,
                text,
                version,
            } => (
                *block_id,
                BlockEvent::TextChanged {
                    text: text.clone(),
                    version: *version,
                },
            ),
            DocEvent::BlockUpdated { block_id, patch } => {
                (*block_id, BlockEvent::Updated { patch: *patch })
            }
            DocEvent::BlockMoved {
                block_id,
                parent_id,
            } => (
                *block_id,
                BlockEvent::Moved {
                    parent_id: *parent_id,
                },
            ),
            DocEvent::BlockDeleted { block_id } => (*block_id, BlockEvent::Deleted),
            DocEvent::BlockCreated { .. } | DocEvent::Restored { .. } => return None,
        };
        Some(event)
    }
}

/// Events delivered to a single block's watchers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockEvent {
    TextChanged { text: String, version: u64 },
    Updated { patch: BlockPatch },
    Moved { parent_id: Option<BlockId> },
    Deleted,
}

type WatcherList = Vec<(u64, mpsc::UnboundedSender<BlockEvent>)>;

/// Fan-out point shared by a document and all of its text buffers.
pub(crate) struct EventHub {
    broadcast: broadcast::Sender<DocEvent>,
    watchers: Mutex<HashMap<BlockId, WatcherList>>,
    next_watch_id: AtomicU64,
}

impl EventHub {
    pub(crate) fn new() -> Arc<Self> {
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        Arc::new(Self {
            broadcast,
            watchers: Mutex::new(HashMap::new()),
            next_watch_id: AtomicU64::new(0),
        })
    }

    pub(crate) fn emit(&self, event: DocEvent) {
        if let Some((block_id, block_event)) = event.to_block_event() {
            let mut watchers = self.watchers.lock();
            if let Some(list) = watchers.get_mut(&block_id) {
                list.retain(|(_, tx)| tx.send(block_event.clone()).is_ok());
                if list.is_empty() {
                    watchers.remove(&block_id);
                }
            }
        }
        // No receivers is fine: nobody is listening to the document stream.
        let _ = self.broadcast.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<DocEvent> {
        self.broadcast.subscribe()
    }

    pub(crate) fn watch(self: &Arc<Self>, block_id: BlockId) -> BlockWatch {
        let watch_id = self.next_watch_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers
            .lock()
            .entry(block_id)
            .or_default()
            .push((watch_id, tx));
        tracing::trace!(%block_id, watch_id, "block watch registered");
        BlockWatch {
            handle: WatchHandle {
                block_id,
                watch_id,
                hub: Arc::downgrade(self),
                cancelled: AtomicBool::new(false),
            },
            events: rx,
        }
    }

    fn unwatch(&self, block_id: BlockId, watch_id: u64) {
        let mut watchers = self.watchers.lock();
        if let Some(list) = watchers.get_mut(&block_id) {
            list.retain(|(id, _)| *id != watch_id);
            if list.is_empty() {
                watchers.remove(&block_id);
            }
        }
        tracing::trace!(%block_id, watch_id, "block watch cancelled");
    }

    pub(crate) fn watcher_count(&self) -> usize {
        self.watchers.lock().values().map(Vec::len).sum()
    }
}

/// A live subscription to one block's events.
pub struct BlockWatch {
    handle: WatchHandle,
    events: mpsc::UnboundedReceiver<BlockEvent>,
}

impl BlockWatch {
    pub fn block_id(&self) -> BlockId {
        self.handle.block_id
    }

    /// Next event, or `None` once the watch is cancelled and drained, or the
    /// document is gone.
    pub async fn recv(&mut self) -> Option<BlockEvent> {
        self.events.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<BlockEvent> {
        self.events.try_recv().ok()
    }

    /// Split into the cancel handle and the receiving end, so the receiver
    /// can move into a task while the owner keeps the handle.
    pub fn into_parts(self) -> (WatchHandle, mpsc::UnboundedReceiver<BlockEvent>) {
        (self.handle, self.events)
    }
}

/// Cancels a [`BlockWatch`]. Idempotent; also runs on drop.
pub struct WatchHandle {
    block_id: BlockId,
    watch_id: u64,
    hub: Weak<EventHub>,
    cancelled: AtomicBool,
}

impl WatchHandle {
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.unwatch(self.block_id, self.watch_id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("block_id", &self.block_id)
            .field("watch_id", &self.watch_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
