//! Shared, observable text buffers.
//!
//! Each text-bearing block owns exactly one [`TextBuffer`]. Handles are cheap
//! clones of the same `Arc`, so a portal's editor and the source's own editor
//! mutate one buffer and every mutation is seen by both.
//!
//! Positions are in chars, not bytes.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::DocError;
use crate::events::{DocEvent, EventHub};
use crate::{BlockId, Result};

struct TextState {
    text: String,
    version: u64,
    detached: bool,
}

struct TextCell {
    block_id: BlockId,
    state: RwLock<TextState>,
    hub: Arc<EventHub>,
}

/// Handle to a block's live text.
#[derive(Clone)]
pub struct TextBuffer {
    cell: Arc<TextCell>,
}

impl TextBuffer {
    pub(crate) fn new(block_id: BlockId, text: String, hub: Arc<EventHub>) -> Self {
        Self {
            cell: Arc::new(TextCell {
                block_id,
                state: RwLock::new(TextState {
                    text,
                    version: 0,
                    detached: false,
                }),
                hub,
            }),
        }
    }

    pub fn block_id(&self) -> BlockId {
        self.cell.block_id
    }

    pub fn text(&self) -> String {
        self.cell.state.read().text.clone()
    }

    /// Bumped by every successful mutation.
    pub fn version(&self) -> u64 {
        self.cell.state.read().version
    }

    /// Text and version read under one lock.
    pub fn read(&self) -> (String, u64) {
        let state = self.cell.state.read();
        (state.text.clone(), state.version)
    }

    /// Length in chars.
    pub fn len(&self) -> usize {
        self.cell.state.read().text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.cell.state.read().text.is_empty()
    }

    /// True once the owning block has been deleted. Detached buffers reject
    /// edits.
    pub fn is_detached(&self) -> bool {
        self.cell.state.read().detached
    }

    /// Whether two handles point at the same underlying buffer.
    pub fn same_buffer(&self, other: &TextBuffer) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Replace `delete` chars at `pos` with `insert`.
    ///
    /// The change event is emitted while the buffer lock is held, so
    /// watchers see versions in order.
    pub fn edit(&self, pos: usize, insert: &str, delete: usize) -> Result<()> {
        let mut state = self.cell.state.write();
        if let Some(event) = self.apply(&mut state, pos, insert, delete)? {
            self.cell.hub.emit(event);
        }
        Ok(())
    }

    pub fn insert(&self, pos: usize, text: &str) -> Result<()> {
        self.edit(pos, text, 0)
    }

    pub fn delete(&self, pos: usize, len: usize) -> Result<()> {
        self.edit(pos, "", len)
    }

    pub fn append(&self, text: &str) -> Result<()> {
        let mut state = self.cell.state.write();
        let end = state.text.chars().count();
        if let Some(event) = self.apply(&mut state, end, text, 0)? {
            self.cell.hub.emit(event);
        }
        Ok(())
    }

    /// Replace the whole text.
    pub fn set_text(&self, text: &str) -> Result<()> {
        let mut state = self.cell.state.write();
        let len = state.text.chars().count();
        if let Some(event) = self.apply(&mut state, 0, text, len)? {
            self.cell.hub.emit(event);
        }
        Ok(())
    }

    /// Mutate without emitting. Returns the event for the caller to queue,
    /// used by transactions that publish after commit.
    pub(crate) fn append_deferred(&self, text: &str) -> Result<Option<DocEvent>> {
        let mut state = self.cell.state.write();
        let end = state.text.chars().count();
        self.apply(&mut state, end, text, 0)
    }

    pub(crate) fn set_text_deferred(&self, text: &str) -> Result<Option<DocEvent>> {
        let mut state = self.cell.state.write();
        if state.text == text {
            return Ok(None);
        }
        let len = state.text.chars().count();
        self.apply(&mut state, 0, text, len)
    }

    pub(crate) fn detach(&self) {
        self.cell.state.write().detached = true;
    }

    /// Revive a buffer whose block came back through a restore.
    pub(crate) fn reattach_deferred(&self, text: &str) -> Result<Option<DocEvent>> {
        let mut state = self.cell.state.write();
        state.detached = false;
        if state.text == text {
            return Ok(None);
        }
        let len = state.text.chars().count();
        self.apply(&mut state, 0, text, len)
    }

    fn apply(
        &self,
        state: &mut TextState,
        pos: usize,
        insert: &str,
        delete: usize,
    ) -> Result<Option<DocEvent>> {
        if state.detached {
            return Err(DocError::Detached(self.cell.block_id));
        }
        let len = state.text.chars().count();
        if pos > len || pos + delete > len {
            return Err(DocError::PositionOutOfBounds {
                pos: pos + delete,
                len,
            });
        }
        if insert.is_empty() && delete == 0 {
            return Ok(None);
        }

        let start = char_to_byte(&state.text, pos);
        let end = char_to_byte(&state.text, pos + delete);
        state.text.replace_range(start..end, insert);
        state.version += 1;

        Ok(Some(DocEvent::TextChanged {
            block_id: self.cell.block_id,
            text: state.text.clone(),
            version: state.version,
        }))
    }
}

impl std::fmt::Debug for TextBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.cell.state.read();
        f.debug_struct("TextBuffer")
            .field("block_id", &self.cell.block_id)
            .field("version", &state.version)
            .field("detached", &state.detached)
            .finish()
    }
}

fn char_to_byte(text: &str, char_pos: usize) -> usize {
    text.char_indices()
        .nth(char_pos)
        .map_or(text.len(), |(byte, _)| byte)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DocumentId, PrincipalId};

    fn buffer(text: &str) -> TextBuffer {
        let id = BlockId::new(DocumentId::new(), PrincipalId::new(), 0);
        TextBuffer::new(id, text.to_string(), EventHub::new())
    }

    #[test]
    fn test_edit_uses_char_positions() {
        let buf = buffer("héllo");
        buf.edit(2, "L", 1).unwrap();
        assert_eq!(buf.text(), "héLlo");
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.version(), 1);
    }

    #[test]
    fn test_append_and_set_text() {
        let buf = buffer("a");
        buf.append("bc").unwrap();
        assert_eq!(buf.text(), "abc");
        buf.set_text("xyz").unwrap();
        assert_eq!(buf.text(), "xyz");
        assert_eq!(buf.version(), 2);
    }

    #[test]
    fn test_noop_edit_keeps_version() {
        let buf = buffer("abc");
        buf.edit(1, "", 0).unwrap();
        assert_eq!(buf.version(), 0);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let buf = buffer("abc");
        let err = buf.edit(2, "", 5).unwrap_err();
        assert!(matches!(err, DocError::PositionOutOfBounds { len: 3, .. }));
        assert_eq!(buf.text(), "abc");
    }

    #[test]
    fn test_detached_buffer_rejects_edits() {
        let buf = buffer("abc");
        let other = buf.clone();
        buf.detach();
        assert!(other.is_detached());
        assert!(matches!(other.append("d"), Err(DocError::Detached(_))));
    }

    #[test]
    fn test_clones_share_one_buffer() {
        let a = buffer("x");
        let b = a.clone();
        b.append("y").unwrap();
        assert_eq!(a.text(), "xy");
        assert!(a.same_buffer(&b));
        assert!(!a.same_buffer(&buffer("xy")));
    }
}
