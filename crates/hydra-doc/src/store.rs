//! Block storage: the tree, tombstones, and sibling order.
//!
//! Not thread-safe on its own; [`Document`](crate::Document) wraps it in a
//! `RwLock` and turns the returned event lists into notifications after the
//! lock is released.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::buffer::TextBuffer;
use crate::error::DocError;
use crate::events::{DocEvent, EventHub};
use crate::order::{FIRST_KEY, order_after, order_midpoint};
use crate::snapshot::DocumentSnapshot;
use crate::{
    BlockId, BlockKind, BlockPatch, BlockSnapshot, DocumentId, PortalLink, PrincipalId, Result,
    now_millis,
};

/// Maximum tree depth walked before giving up. Guards against corrupt
/// parent chains.
pub const MAX_TREE_DEPTH: usize = 1024;

pub(crate) struct BlockEntry {
    id: BlockId,
    parent_id: Option<BlockId>,
    kind: BlockKind,
    collapsed: bool,
    portal: Option<PortalLink>,
    order_key: String,
    created_at: u64,
    updated_at: u64,
    deleted: bool,
    /// Present for text-bearing kinds. Kept on tombstones so a restore can
    /// revive the same buffer.
    buffer: Option<TextBuffer>,
}

impl BlockEntry {
    fn snapshot(&self) -> BlockSnapshot {
        BlockSnapshot {
            id: self.id,
            parent_id: self.parent_id,
            kind: self.kind,
            content: self.buffer.as_ref().map(TextBuffer::text).unwrap_or_default(),
            collapsed: self.collapsed,
            portal: self.portal,
            order_key: self.order_key.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

pub(crate) struct BlockStore {
    document_id: DocumentId,
    agent_id: PrincipalId,
    blocks: BTreeMap<BlockId, BlockEntry>,
    next_seq: u64,
    clock: u64,
    hub: Arc<EventHub>,
}

impl BlockStore {
    pub(crate) fn new(document_id: DocumentId, agent_id: PrincipalId, hub: Arc<EventHub>) -> Self {
        Self {
            document_id,
            agent_id,
            blocks: BTreeMap::new(),
            next_seq: 0,
            clock: 0,
            hub,
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    fn live(&self, id: &BlockId) -> Option<&BlockEntry> {
        self.blocks.get(id).filter(|e| !e.deleted)
    }

    pub(crate) fn contains(&self, id: &BlockId) -> bool {
        self.live(id).is_some()
    }

    pub(crate) fn get_block(&self, id: &BlockId) -> Option<BlockSnapshot> {
        self.live(id).map(BlockEntry::snapshot)
    }

    pub(crate) fn block_count(&self) -> usize {
        self.blocks.values().filter(|e| !e.deleted).count()
    }

    /// Live children of `parent` (roots when `None`), in sibling order.
    pub(crate) fn children(&self, parent: Option<&BlockId>) -> Vec<BlockId> {
        let mut kids: Vec<&BlockEntry> = self
            .blocks
            .values()
            .filter(|e| !e.deleted && e.parent_id.as_ref() == parent)
            .collect();
        kids.sort_by(|a, b| a.order_key.cmp(&b.order_key).then(a.id.cmp(&b.id)));
        kids.into_iter().map(|e| e.id).collect()
    }

    pub(crate) fn parent(&self, id: &BlockId) -> Option<BlockId> {
        self.live(id).and_then(|e| e.parent_id)
    }

    /// All live descendants of `id` in pre-order, excluding `id` itself.
    pub(crate) fn descendants(&self, id: &BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        self.collect_descendants(id, 0, &mut out);
        out
    }

    fn collect_descendants(&self, id: &BlockId, depth: usize, out: &mut Vec<BlockId>) {
        if depth >= MAX_TREE_DEPTH {
            tracing::warn!(%id, "tree depth limit reached while collecting descendants");
            return;
        }
        for child in self.children(Some(id)) {
            out.push(child);
            self.collect_descendants(&child, depth + 1, out);
        }
    }

    /// Whether `ancestor` is `id` or one of its ancestors.
    fn is_self_or_ancestor(&self, ancestor: &BlockId, id: &BlockId) -> bool {
        let mut cursor = Some(*id);
        let mut steps = 0;
        while let Some(current) = cursor {
            if &current == ancestor {
                return true;
            }
            steps += 1;
            if steps > MAX_TREE_DEPTH {
                return false;
            }
            cursor = self.blocks.get(&current).and_then(|e| e.parent_id);
        }
        false
    }

    pub(crate) fn portals(&self) -> Vec<BlockSnapshot> {
        self.blocks
            .values()
            .filter(|e| !e.deleted && e.kind.is_portal())
            .map(BlockEntry::snapshot)
            .collect()
    }

    /// Live portals pointing at `source`.
    pub(crate) fn portals_in(&self, source: &BlockId) -> Vec<BlockId> {
        self.blocks
            .values()
            .filter(|e| {
                !e.deleted && e.portal.is_some_and(|link| &link.source_block_id == source)
            })
            .map(|e| e.id)
            .collect()
    }

    /// Every live block in document order (pre-order from the roots).
    pub(crate) fn blocks_ordered(&self) -> Vec<BlockSnapshot> {
        let mut out = Vec::new();
        for root in self.children(None) {
            out.push(root);
            out.extend(self.descendants(&root));
        }
        out.iter().filter_map(|id| self.get_block(id)).collect()
    }

    /// The buffer a block edits: its own, or its source's for a portal.
    pub(crate) fn text_buffer(&self, id: &BlockId) -> Result<TextBuffer> {
        let entry = self.live(id).ok_or(DocError::BlockNotFound(*id))?;
        if let Some(link) = entry.portal {
            let source = self
                .live(&link.source_block_id)
                .ok_or(DocError::BlockNotFound(link.source_block_id))?;
            return source
                .buffer
                .clone()
                .ok_or(DocError::NotTextBearing(source.id));
        }
        entry.buffer.clone().ok_or(DocError::NotTextBearing(*id))
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn next_id(&mut self) -> BlockId {
        loop {
            let id = BlockId::new(self.document_id, self.agent_id, self.next_seq);
            self.next_seq += 1;
            if !self.blocks.contains_key(&id) {
                return id;
            }
        }
    }

    fn order_key_for(
        &self,
        parent: Option<&BlockId>,
        after: Option<&BlockId>,
        exclude: Option<&BlockId>,
    ) -> Result<String> {
        let siblings: Vec<BlockId> = self
            .children(parent)
            .into_iter()
            .filter(|id| Some(id) != exclude)
            .collect();
        let key_of = |id: &BlockId| {
            self.blocks
                .get(id)
                .map(|e| e.order_key.clone())
                .unwrap_or_default()
        };

        match after {
            None => match siblings.first() {
                Some(first) => Ok(order_midpoint("", &key_of(first))),
                None => Ok(FIRST_KEY.to_string()),
            },
            Some(after_id) => {
                let pos = siblings
                    .iter()
                    .position(|id| id == after_id)
                    .ok_or(DocError::InvalidReference(*after_id))?;
                let after_key = key_of(after_id);
                match siblings.get(pos + 1) {
                    Some(next) => Ok(order_midpoint(&after_key, &key_of(next))),
                    None => Ok(order_after(&after_key)),
                }
            }
        }
    }

    fn check_parent(&self, parent: Option<&BlockId>) -> Result<()> {
        match parent {
            Some(p) if !self.contains(p) => Err(DocError::InvalidReference(*p)),
            _ => Ok(()),
        }
    }

    fn check_foreign(&self, id: &BlockId) -> Result<()> {
        if id.document_id != self.document_id {
            return Err(DocError::ForeignBlock(*id));
        }
        Ok(())
    }

    pub(crate) fn insert_block(
        &mut self,
        parent: Option<&BlockId>,
        after: Option<&BlockId>,
        kind: BlockKind,
        text: &str,
    ) -> Result<(BlockId, DocEvent)> {
        if kind.is_portal() {
            return Err(DocError::PortalWithoutSource);
        }
        self.insert_entry(parent, after, kind, text, None)
    }

    pub(crate) fn insert_portal(
        &mut self,
        parent: Option<&BlockId>,
        after: Option<&BlockId>,
        source: &BlockId,
    ) -> Result<(BlockId, DocEvent)> {
        self.check_foreign(source)?;
        if !self.contains(source) {
            return Err(DocError::BlockNotFound(*source));
        }
        self.insert_entry(
            parent,
            after,
            BlockKind::Portal,
            "",
            Some(PortalLink::to(*source)),
        )
    }

    fn insert_entry(
        &mut self,
        parent: Option<&BlockId>,
        after: Option<&BlockId>,
        kind: BlockKind,
        text: &str,
        portal: Option<PortalLink>,
    ) -> Result<(BlockId, DocEvent)> {
        self.check_parent(parent)?;
        let order_key = self.order_key_for(parent, after, None)?;
        let id = self.next_id();
        let updated_at = self.tick();
        let buffer = kind
            .has_text()
            .then(|| TextBuffer::new(id, text.to_string(), self.hub.clone()));

        self.blocks.insert(
            id,
            BlockEntry {
                id,
                parent_id: parent.copied(),
                kind,
                collapsed: false,
                portal,
                order_key,
                created_at: now_millis(),
                updated_at,
                deleted: false,
                buffer,
            },
        );

        Ok((
            id,
            DocEvent::BlockCreated {
                block_id: id,
                parent_id: parent.copied(),
                kind,
            },
        ))
    }

    /// Apply a patch. Returns `None` when nothing changed.
    pub(crate) fn update_block(
        &mut self,
        id: &BlockId,
        patch: BlockPatch,
    ) -> Result<Option<DocEvent>> {
        if let Some(source) = &patch.source_block_id {
            self.check_foreign(source)?;
            if !self.contains(source) {
                return Err(DocError::BlockNotFound(*source));
            }
        }
        let clock = self.clock + 1;
        let entry = self
            .blocks
            .get_mut(id)
            .filter(|e| !e.deleted)
            .ok_or(DocError::BlockNotFound(*id))?;

        let mut applied = BlockPatch::default();
        if let Some(collapsed) = patch.collapsed
            && entry.collapsed != collapsed
        {
            entry.collapsed = collapsed;
            applied.collapsed = Some(collapsed);
        }
        if let Some(status) = patch.sync_status {
            match entry.portal.as_mut() {
                Some(link) if link.sync_status != status => {
                    link.sync_status = status;
                    applied.sync_status = Some(status);
                }
                Some(_) => {}
                None => tracing::debug!(%id, "sync status ignored on non-portal block"),
            }
        }
        if let Some(source) = patch.source_block_id {
            match entry.portal.as_mut() {
                Some(link) if link.source_block_id != source => {
                    link.source_block_id = source;
                    link.source_doc_id = source.document_id;
                    applied.source_block_id = Some(source);
                }
                Some(_) => {}
                None => return Err(DocError::NotAPortal(*id)),
            }
        }

        if applied.is_empty() {
            return Ok(None);
        }
        entry.updated_at = clock;
        self.clock = clock;
        Ok(Some(DocEvent::BlockUpdated {
            block_id: *id,
            patch: applied,
        }))
    }

    pub(crate) fn move_block(
        &mut self,
        id: &BlockId,
        new_parent: Option<&BlockId>,
        after: Option<&BlockId>,
    ) -> Result<DocEvent> {
        if !self.contains(id) {
            return Err(DocError::BlockNotFound(*id));
        }
        self.check_parent(new_parent)?;
        if let Some(p) = new_parent
            && self.is_self_or_ancestor(id, p)
        {
            return Err(DocError::Cycle(*id, *p));
        }
        if after == Some(id) {
            return Err(DocError::InvalidReference(*id));
        }

        let order_key = self.order_key_for(new_parent, after, Some(id))?;
        let clock = self.tick();
        if let Some(entry) = self.blocks.get_mut(id) {
            entry.parent_id = new_parent.copied();
            entry.order_key = order_key;
            entry.updated_at = clock;
        }
        Ok(DocEvent::BlockMoved {
            block_id: *id,
            parent_id: new_parent.copied(),
        })
    }

    /// Tombstone `id` and its subtree. Returns the removed IDs in pre-order.
    pub(crate) fn delete_block(&mut self, id: &BlockId) -> Result<(Vec<BlockId>, Vec<DocEvent>)> {
        if !self.contains(id) {
            return Err(DocError::BlockNotFound(*id));
        }
        let mut removed = vec![*id];
        removed.extend(self.descendants(id));

        let clock = self.tick();
        let mut events = Vec::with_capacity(removed.len());
        for block_id in &removed {
            if let Some(entry) = self.blocks.get_mut(block_id) {
                entry.deleted = true;
                entry.updated_at = clock;
                if let Some(buffer) = &entry.buffer {
                    buffer.detach();
                }
            }
            events.push(DocEvent::BlockDeleted {
                block_id: *block_id,
            });
        }
        Ok((removed, events))
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub(crate) fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            document_id: self.document_id,
            agent_id: self.agent_id,
            next_seq: self.next_seq,
            clock: self.clock,
            blocks: self.blocks_ordered(),
        }
    }

    /// Replace the live state with `snapshot`. Validates before mutating, so
    /// a rejected snapshot leaves the store untouched.
    pub(crate) fn restore(&mut self, snapshot: DocumentSnapshot) -> Result<Vec<DocEvent>> {
        if snapshot.document_id != self.document_id {
            return Err(DocError::DocumentMismatch {
                expected: self.document_id,
                found: snapshot.document_id,
            });
        }
        validate_snapshot(&snapshot)?;

        let incoming: HashSet<BlockId> = snapshot.blocks.iter().map(|b| b.id).collect();
        let mut events = Vec::new();

        for entry in self.blocks.values_mut() {
            if !entry.deleted && !incoming.contains(&entry.id) {
                entry.deleted = true;
                if let Some(buffer) = &entry.buffer {
                    buffer.detach();
                }
                events.push(DocEvent::BlockDeleted { block_id: entry.id });
            }
        }

        let block_count = snapshot.blocks.len();
        let mut max_own_seq = None;
        for block in snapshot.blocks {
            if block.id.agent_id == self.agent_id {
                max_own_seq = max_own_seq.max(Some(block.id.seq));
            }
            match self.blocks.get_mut(&block.id) {
                Some(entry) => {
                    restore_entry(entry, block, &self.hub, &mut events)?;
                }
                None => {
                    let buffer = block
                        .kind
                        .has_text()
                        .then(|| TextBuffer::new(block.id, block.content.clone(), self.hub.clone()));
                    events.push(DocEvent::BlockCreated {
                        block_id: block.id,
                        parent_id: block.parent_id,
                        kind: block.kind,
                    });
                    self.blocks.insert(
                        block.id,
                        BlockEntry {
                            id: block.id,
                            parent_id: block.parent_id,
                            kind: block.kind,
                            collapsed: block.collapsed,
                            portal: block.portal,
                            order_key: block.order_key,
                            created_at: block.created_at,
                            updated_at: block.updated_at,
                            deleted: false,
                            buffer,
                        },
                    );
                }
            }
        }

        self.next_seq = self
            .next_seq
            .max(snapshot.next_seq)
            .max(max_own_seq.map_or(0, |seq| seq + 1));
        self.clock = self.clock.max(snapshot.clock);
        events.push(DocEvent::Restored { block_count });
        Ok(events)
    }
}

fn restore_entry(
    entry: &mut BlockEntry,
    block: BlockSnapshot,
    hub: &Arc<EventHub>,
    events: &mut Vec<DocEvent>,
) -> Result<()> {
    let was_deleted = entry.deleted;
    if was_deleted {
        events.push(DocEvent::BlockCreated {
            block_id: block.id,
            parent_id: block.parent_id,
            kind: block.kind,
        });
    } else {
        let mut patch = BlockPatch::default();
        if entry.collapsed != block.collapsed {
            patch.collapsed = Some(block.collapsed);
        }
        let old_status = entry.portal.map(|l| l.sync_status);
        let new_status = block.portal.map(|l| l.sync_status);
        if old_status != new_status {
            patch.sync_status = new_status;
        }
        let old_source = entry.portal.map(|l| l.source_block_id);
        let new_source = block.portal.map(|l| l.source_block_id);
        if old_source != new_source {
            patch.source_block_id = new_source;
        }
        if !patch.is_empty() {
            events.push(DocEvent::BlockUpdated {
                block_id: block.id,
                patch,
            });
        }
        if entry.parent_id != block.parent_id || entry.order_key != block.order_key {
            events.push(DocEvent::BlockMoved {
                block_id: block.id,
                parent_id: block.parent_id,
            });
        }
    }

    if block.kind.has_text() {
        match &entry.buffer {
            Some(buffer) => {
                if let Some(event) = buffer.reattach_deferred(&block.content)? {
                    events.push(event);
                }
            }
            None => {
                entry.buffer = Some(TextBuffer::new(block.id, block.content.clone(), hub.clone()));
            }
        }
    } else if let Some(buffer) = entry.buffer.take() {
        buffer.detach();
    }

    entry.parent_id = block.parent_id;
    entry.kind = block.kind;
    entry.collapsed = block.collapsed;
    entry.portal = block.portal;
    entry.order_key = block.order_key;
    entry.created_at = block.created_at;
    entry.updated_at = block.updated_at;
    entry.deleted = false;
    Ok(())
}

/// Reject duplicate IDs, foreign blocks, dangling parents and parent cycles.
fn validate_snapshot(snapshot: &DocumentSnapshot) -> Result<()> {
    let mut parents: BTreeMap<BlockId, Option<BlockId>> = BTreeMap::new();
    for block in &snapshot.blocks {
        if block.id.document_id != snapshot.document_id {
            return Err(DocError::ForeignBlock(block.id));
        }
        if block.kind.is_portal() != block.portal.is_some() {
            return Err(DocError::PortalWithoutSource);
        }
        if parents.insert(block.id, block.parent_id).is_some() {
            return Err(DocError::DuplicateBlock(block.id));
        }
    }
    for (id, parent) in &parents {
        if let Some(p) = parent
            && !parents.contains_key(p)
        {
            return Err(DocError::InvalidReference(*p));
        }
        let mut cursor = *parent;
        let mut steps = 0;
        while let Some(current) = cursor {
            if &current == id || steps > parents.len() {
                return Err(DocError::Cycle(*id, current));
            }
            steps += 1;
            cursor = parents.get(&current).copied().flatten();
        }
    }
    Ok(())
}
