//! Editing through a portal.
//!
//! The portal never holds text of its own: an editable portal surface is the
//! source's [`TextBuffer`] handle, so both views mutate one buffer. What
//! lives here is presentation policy: which surface to show and when to
//! show the one-time "this edits the source" notice.

use hydra_doc::TextBuffer;

use crate::config::DEFAULT_PREVIEW_CHARS;
use crate::display::{DisplayState, is_editable};

/// Per-instance editing flags. Not persisted; a remount starts fresh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EditingSession {
    is_editing: bool,
    has_edited_before: bool,
    warning_dismissed: bool,
}

impl EditingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the editing region. Ignored unless the surface is editable.
    /// Returns whether editing started.
    pub fn focus(&mut self, editable: bool) -> bool {
        self.is_editing = editable;
        editable
    }

    pub fn blur(&mut self) {
        self.is_editing = false;
    }

    pub fn record_edit(&mut self) {
        self.has_edited_before = true;
    }

    /// Hide the notice for the rest of this instance's life.
    pub fn dismiss_warning(&mut self) {
        self.warning_dismissed = true;
    }

    /// The notice shows while editing, until the first edit lands or the
    /// user dismisses it.
    pub fn should_show_warning(&self) -> bool {
        self.is_editing && !self.warning_dismissed && !self.has_edited_before
    }

    pub fn is_editing(&self) -> bool {
        self.is_editing
    }

    pub fn has_edited_before(&self) -> bool {
        self.has_edited_before
    }
}

/// What the portal's content area renders.
#[derive(Clone, Debug)]
pub enum Surface {
    Loading,
    Orphaned,
    /// Collapsed portal: truncated text only.
    Preview(String),
    /// Text is known but no live buffer could be bound.
    ReadOnly(String),
    /// Bound directly to the source's buffer.
    Editable(TextBuffer),
}

impl Surface {
    pub fn is_editable(&self) -> bool {
        matches!(self, Surface::Editable(_))
    }

    pub fn buffer(&self) -> Option<&TextBuffer> {
        match self {
            Surface::Editable(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Text to draw. Editable surfaces read the live buffer.
    pub fn text(&self) -> Option<String> {
        match self {
            Surface::Loading | Surface::Orphaned => None,
            Surface::Preview(text) | Surface::ReadOnly(text) => Some(text.clone()),
            Surface::Editable(buffer) => Some(buffer.text()),
        }
    }
}

impl PartialEq for Surface {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Surface::Loading, Surface::Loading) | (Surface::Orphaned, Surface::Orphaned) => true,
            (Surface::Preview(a), Surface::Preview(b)) | (Surface::ReadOnly(a), Surface::ReadOnly(b)) => {
                a == b
            }
            (Surface::Editable(a), Surface::Editable(b)) => a.same_buffer(b),
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EditingBridge {
    preview_chars: usize,
}

impl Default for EditingBridge {
    fn default() -> Self {
        Self::new(DEFAULT_PREVIEW_CHARS)
    }
}

impl EditingBridge {
    pub fn new(preview_chars: usize) -> Self {
        Self { preview_chars }
    }

    /// Pick the surface for a portal.
    ///
    /// `buffer` is the handle obtained when the observer was set up; a
    /// missing or detached one falls back to read-only text.
    pub fn surface(
        &self,
        state: DisplayState,
        is_collapsed: bool,
        text: &str,
        buffer: Option<&TextBuffer>,
    ) -> Surface {
        let editable = is_editable(
            is_collapsed,
            state == DisplayState::Orphaned,
            state == DisplayState::Loading,
        );
        if editable {
            return match buffer {
                Some(buffer) if !buffer.is_detached() => Surface::Editable(buffer.clone()),
                _ => Surface::ReadOnly(text.to_string()),
            };
        }
        match state {
            DisplayState::Loading => Surface::Loading,
            DisplayState::Orphaned => Surface::Orphaned,
            _ => Surface::Preview(truncate_preview(text, self.preview_chars)),
        }
    }
}

/// First `max_chars` chars of the first line, with "..." when cut.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    let cut = line.chars().count() > max_chars || line.len() < text.trim_end().len();
    let mut preview: String = line.chars().take(max_chars).collect();
    if cut {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_doc::{BlockKind, Document, DocumentId, PrincipalId};

    fn buffer(text: &str) -> (Document, TextBuffer) {
        let doc = Document::new(DocumentId::new(), PrincipalId::new());
        let id = doc.append_block(None, BlockKind::Bullet, text).unwrap();
        let buf = doc.text_buffer(&id).unwrap();
        (doc, buf)
    }

    #[test]
    fn test_warning_shows_on_first_focus_until_dismissed() {
        let mut session = EditingSession::new();
        assert!(!session.should_show_warning());
        assert!(session.focus(true));
        assert!(session.should_show_warning());

        session.dismiss_warning();
        assert!(!session.should_show_warning());
        session.blur();
        session.focus(true);
        assert!(!session.should_show_warning());
    }

    #[test]
    fn test_warning_hides_after_first_edit() {
        let mut session = EditingSession::new();
        session.focus(true);
        session.record_edit();
        assert!(!session.should_show_warning());
        assert!(session.has_edited_before());
    }

    #[test]
    fn test_focus_on_read_only_surface_does_not_edit() {
        let mut session = EditingSession::new();
        assert!(!session.focus(false));
        assert!(!session.is_editing());
        assert!(!session.should_show_warning());
    }

    #[test]
    fn test_surface_selection() {
        let (_doc, buf) = buffer("Hello");
        let bridge = EditingBridge::new(10);

        assert_eq!(
            bridge.surface(DisplayState::Loading, false, "", Some(&buf)),
            Surface::Loading
        );
        assert_eq!(
            bridge.surface(DisplayState::Orphaned, false, "Hello", Some(&buf)),
            Surface::Orphaned
        );
        assert_eq!(
            bridge.surface(DisplayState::Collapsed, true, "Hello", Some(&buf)),
            Surface::Preview("Hello".into())
        );
        assert!(bridge
            .surface(DisplayState::Expanded, false, "Hello", Some(&buf))
            .is_editable());
        assert!(bridge
            .surface(DisplayState::Stale, false, "Hello", Some(&buf))
            .is_editable());
        assert_eq!(
            bridge.surface(DisplayState::Stale, true, "Hello", Some(&buf)),
            Surface::Preview("Hello".into())
        );
        assert_eq!(
            bridge.surface(DisplayState::Expanded, false, "Hello", None),
            Surface::ReadOnly("Hello".into())
        );
    }

    #[test]
    fn test_editable_surface_is_the_source_buffer() {
        let (_doc, buf) = buffer("Hello");
        let surface = EditingBridge::default().surface(DisplayState::Expanded, false, "Hello", Some(&buf));
        surface.buffer().unwrap().append(" World").unwrap();
        assert_eq!(buf.text(), "Hello World");
        assert_eq!(surface.text().as_deref(), Some("Hello World"));
    }

    #[test]
    fn test_detached_buffer_falls_back_to_read_only() {
        let (doc, buf) = buffer("gone");
        doc.delete_block(&buf.block_id()).unwrap();
        assert_eq!(
            EditingBridge::default().surface(DisplayState::Expanded, false, "gone", Some(&buf)),
            Surface::ReadOnly("gone".into())
        );
    }

    #[test]
    fn test_truncate_preview() {
        assert_eq!(truncate_preview("short", 10), "short");
        assert_eq!(truncate_preview("abcdefghijkl", 5), "abcde...");
        assert_eq!(truncate_preview("line one\nline two", 20), "line one...");
        assert_eq!(truncate_preview("", 5), "");
    }
}
