//! A mounted portal instance.
//!
//! [`PortalView`] owns everything transient about one rendered portal: the
//! source observer, a watch on the portal block itself, the subtree snapshot
//! and its local fold overlay, and the editing session. With an embedded
//! subtree, the view also follows the document stream and re-fetches once
//! edits under the source settle. Each state change
//! publishes a fresh [`PortalFrame`] on a `tokio::sync::watch` channel.
//!
//! Lock discipline: observer callbacks take only the view state lock. An
//! observer is never disposed while that lock is held, since disposal waits
//! for a running callback to finish.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use hydra_doc::{
    BlockEvent, BlockId, BlockPatch, DocEvent, Document, SyncStatus, TextBuffer, WatchHandle,
};

use crate::config::PortalConfig;
use crate::display::{DisplayState, compute_display_state, status_label};
use crate::editing::{EditingBridge, EditingSession, Surface};
use crate::error::{PortalError, Result};
use crate::observer::{SourceListener, SourceObserver, create_source_observer};
use crate::portal::{portal_link, toggle_portal_collapsed, validate_source};
use crate::subtree::{
    LocalCollapse, SubtreeOptions, SubtreeRow, SubtreeSnapshot, depth_limit_warning, fetch_subtree,
    fetch_subtree_deferred,
};

/// Everything a renderer needs for one portal, at one moment.
#[derive(Clone, Debug, PartialEq)]
pub struct PortalFrame {
    pub portal_id: BlockId,
    pub source_block_id: BlockId,
    pub display: DisplayState,
    pub status_label: &'static str,
    pub surface: Surface,
    /// Last settled source text.
    pub text: String,
    /// Subtree rows under the mirrored text. Empty unless expanded.
    pub rows: Vec<SubtreeRow>,
    pub depth_warning: Option<String>,
    /// "Editing here changes the source" notice.
    pub edit_warning: bool,
    pub is_editing: bool,
    pub is_collapsed: bool,
    pub sync_status: SyncStatus,
    /// The portal block itself was deleted.
    pub removed: bool,
}

struct ViewState {
    source: BlockId,
    loading: bool,
    source_exists: bool,
    removed: bool,
    collapsed: bool,
    sync_status: SyncStatus,
    text: String,
    buffer: Option<TextBuffer>,
    subtree: Option<SubtreeSnapshot>,
    overlay: LocalCollapse,
    session: EditingSession,
}

#[derive(Default)]
struct Subscriptions {
    observer: Option<SourceObserver>,
    portal_watch: Option<WatchHandle>,
    tasks: Vec<JoinHandle<()>>,
    disposed: bool,
}

impl Subscriptions {
    /// Release everything. The caller drops the returned observer outside
    /// any view lock.
    fn dispose(&mut self) -> Option<SourceObserver> {
        self.disposed = true;
        if let Some(watch) = self.portal_watch.take() {
            watch.cancel();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.observer.take()
    }
}

struct ViewShared {
    document: Document,
    portal_id: BlockId,
    config: PortalConfig,
    bridge: EditingBridge,
    state: Mutex<ViewState>,
    frames: watch::Sender<PortalFrame>,
    subs: Mutex<Subscriptions>,
}

/// Owner of one mounted portal. Dropping it unmounts.
pub struct PortalView {
    shared: Arc<ViewShared>,
}

impl PortalView {
    /// Mount `portal_id` and start following its source.
    ///
    /// Fails only when `portal_id` is missing or not a portal. A dangling
    /// source still mounts and settles into the orphaned state.
    pub fn mount(document: &Document, portal_id: BlockId, config: PortalConfig) -> Result<Self> {
        let (block, link) = portal_link(document, &portal_id)?;
        let state = ViewState {
            source: link.source_block_id,
            loading: true,
            source_exists: true,
            removed: false,
            collapsed: block.collapsed,
            sync_status: link.sync_status,
            text: String::new(),
            buffer: None,
            subtree: None,
            overlay: LocalCollapse::new(),
            session: EditingSession::new(),
        };
        let bridge = EditingBridge::new(config.preview_chars);
        let (frames, _) = watch::channel(build_frame(portal_id, &bridge, &state));
        let shared = Arc::new(ViewShared {
            document: document.clone(),
            portal_id,
            config,
            bridge,
            state: Mutex::new(state),
            frames,
            subs: Mutex::new(Subscriptions::default()),
        });

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let (handle, events) = document.watch_block(&portal_id).into_parts();
                let task = runtime.spawn(follow_portal(Arc::downgrade(&shared), events));
                let mut subs = shared.subs.lock();
                subs.portal_watch = Some(handle);
                subs.tasks.push(task);
                if shared.config.embed_subtree {
                    // Subscribed before the observer's first delivery fetches.
                    let events = document.subscribe();
                    let debounce = shared.config.debounce();
                    subs.tasks
                        .push(runtime.spawn(follow_subtree(Arc::downgrade(&shared), events, debounce)));
                }
            }
            Err(_) => {
                tracing::warn!(portal = %portal_id, "no async runtime; portal metadata will not follow the document");
            }
        }

        shared.attach(link.source_block_id);
        tracing::debug!(portal = %portal_id, source = %link.source_block_id, "portal mounted");
        Ok(Self { shared })
    }

    pub fn portal_id(&self) -> BlockId {
        self.shared.portal_id
    }

    pub fn source_block_id(&self) -> BlockId {
        self.shared.state.lock().source
    }

    pub fn frame(&self) -> PortalFrame {
        self.shared.frames.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PortalFrame> {
        self.shared.frames.subscribe()
    }

    pub fn is_mounted(&self) -> bool {
        !self.shared.subs.lock().disposed
    }

    /// Flip the persisted collapse toggle. Collapsing ends any edit.
    pub fn toggle_collapsed(&self) -> Result<bool> {
        let collapsed = toggle_portal_collapsed(&self.shared.document, &self.shared.portal_id)?;
        self.shared.sync_portal();
        Ok(collapsed)
    }

    /// Fold or unfold a subtree node in this instance only.
    pub fn toggle_local_fold(&self, node: BlockId) -> bool {
        let mut state = self.shared.state.lock();
        let folded = state.overlay.toggle(node);
        self.shared.publish(&state);
        folded
    }

    /// Enter editing. Returns false when the surface is not editable.
    pub fn focus(&self) -> bool {
        let mut state = self.shared.state.lock();
        let editable = self.shared.surface(&state).is_editable();
        let editing = state.session.focus(editable);
        self.shared.publish(&state);
        editing
    }

    pub fn blur(&self) {
        let mut state = self.shared.state.lock();
        state.session.blur();
        self.shared.publish(&state);
    }

    pub fn dismiss_warning(&self) {
        let mut state = self.shared.state.lock();
        state.session.dismiss_warning();
        self.shared.publish(&state);
    }

    /// Edit the source's text through this portal.
    pub fn edit(&self, pos: usize, insert: &str, delete: usize) -> Result<()> {
        let buffer = {
            let state = self.shared.state.lock();
            self.shared
                .surface(&state)
                .buffer()
                .cloned()
                .ok_or(PortalError::NotEditable(self.shared.portal_id))?
        };
        buffer.edit(pos, insert, delete)?;
        let mut state = self.shared.state.lock();
        state.session.record_edit();
        self.shared.publish(&state);
        Ok(())
    }

    /// Re-read the source's subtree.
    pub async fn refresh_subtree(&self) -> Result<()> {
        let source = self.source_block_id();
        let options = SubtreeOptions::from(&self.shared.config);
        let snapshot = fetch_subtree_deferred(&self.shared.document, &source, options).await?;
        let mut state = self.shared.state.lock();
        if state.source != source {
            return Ok(());
        }
        store_subtree(&mut state, snapshot);
        self.shared.publish(&state);
        Ok(())
    }

    /// Point the portal at another source block.
    pub fn retarget(&self, source: BlockId) -> Result<()> {
        validate_source(&self.shared.document, &source)?;
        self.shared
            .document
            .update_block(&self.shared.portal_id, BlockPatch::source(source))?;
        self.shared.attach(source);
        Ok(())
    }

    /// Release the observer, the portal watch, and every task. Idempotent.
    pub fn unmount(&self) {
        let observer = {
            let mut subs = self.shared.subs.lock();
            if subs.disposed {
                return;
            }
            subs.dispose()
        };
        drop(observer);
        let mut state = self.shared.state.lock();
        state.session.blur();
        self.shared.publish(&state);
        tracing::debug!(portal = %self.shared.portal_id, "portal unmounted");
    }
}

impl Drop for PortalView {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl std::fmt::Debug for PortalView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalView")
            .field("portal_id", &self.shared.portal_id)
            .field("display", &self.frame().display)
            .finish()
    }
}

impl ViewShared {
    fn surface(&self, state: &ViewState) -> Surface {
        build_frame(self.portal_id, &self.bridge, state).surface
    }

    fn publish(&self, state: &ViewState) {
        self.frames
            .send_replace(build_frame(self.portal_id, &self.bridge, state));
    }

    /// Start observing `source`, replacing any previous observer.
    fn attach(self: &Arc<Self>, source: BlockId) {
        let previous = {
            let mut subs = self.subs.lock();
            if subs.disposed {
                return;
            }
            if subs
                .observer
                .as_ref()
                .is_some_and(|o| o.source_block_id() == source && !o.is_orphaned())
            {
                return;
            }
            subs.observer.take()
        };
        drop(previous);

        {
            let mut state = self.state.lock();
            state.source = source;
            state.loading = true;
            state.source_exists = true;
            state.text.clear();
            state.buffer = self.document.text_buffer(&source);
            state.subtree = None;
            state.overlay = LocalCollapse::new();
            state.session.blur();
            self.publish(&state);
        }

        let listener = Arc::new(ViewListener {
            view: Arc::downgrade(self),
        });
        let observer = create_source_observer(&self.document, source, self.config.debounce(), listener);

        let mut subs = self.subs.lock();
        if subs.disposed {
            drop(subs);
            drop(observer);
            return;
        }
        subs.observer = Some(observer);
    }

    /// Pull the portal's persisted fields from the document.
    fn sync_portal(self: &Arc<Self>) {
        let Some(block) = self.document.get_block(&self.portal_id) else {
            return;
        };
        let Some(link) = block.portal else {
            return;
        };
        let retarget = {
            let mut state = self.state.lock();
            if block.collapsed && !state.collapsed {
                state.session.blur();
            }
            state.collapsed = block.collapsed;
            state.sync_status = link.sync_status;
            let moved = link.source_block_id != state.source;
            if !moved {
                self.publish(&state);
            }
            moved.then_some(link.source_block_id)
        };
        if let Some(source) = retarget {
            self.attach(source);
        }
    }

    fn mark_removed(&self) {
        let observer = self.subs.lock().observer.take();
        drop(observer);
        let mut state = self.state.lock();
        state.removed = true;
        state.buffer = None;
        state.session.blur();
        self.publish(&state);
        tracing::debug!(portal = %self.portal_id, "portal block deleted");
    }

    fn write_status(&self, status: SyncStatus) {
        // No-op in the document when the status is unchanged.
        if let Err(err) = self
            .document
            .update_block(&self.portal_id, BlockPatch::sync_status(status))
        {
            tracing::debug!(portal = %self.portal_id, %status, %err, "sync status not written");
        }
    }

    fn handle_text(&self, text: &str) {
        {
            let mut state = self.state.lock();
            if state.removed {
                return;
            }
            state.text = text.to_string();
            state.loading = false;
            state.source_exists = true;
            if state.buffer.as_ref().is_none_or(TextBuffer::is_detached) {
                state.buffer = self.document.text_buffer(&state.source);
            }
            if self.config.embed_subtree {
                self.fetch_into(&mut state);
            }
            self.publish(&state);
        }
        // Only after the text has landed.
        self.write_status(SyncStatus::Synced);
    }

    fn fetch_into(&self, state: &mut ViewState) {
        let options = SubtreeOptions::from(&self.config);
        match fetch_subtree(&self.document, &state.source, options) {
            Ok(snapshot) => store_subtree(state, snapshot),
            Err(err) => {
                tracing::debug!(portal = %self.portal_id, %err, "subtree fetch failed");
            }
        }
    }

    /// Whether `event` changes what the current subtree snapshot shows.
    fn touches_subtree(&self, event: &DocEvent) -> bool {
        let state = self.state.lock();
        let Some(snapshot) = &state.subtree else {
            return false;
        };
        let holds = |id: &Option<BlockId>| id.as_ref().is_some_and(|id| snapshot.contains(id));
        match event {
            // The observer owns the source's own text.
            DocEvent::TextChanged { block_id, .. } => {
                *block_id != snapshot.root.id && snapshot.contains(block_id)
            }
            DocEvent::BlockCreated { parent_id, .. } => holds(parent_id),
            DocEvent::BlockMoved {
                block_id,
                parent_id,
            } => snapshot.contains(block_id) || holds(parent_id),
            DocEvent::BlockUpdated { block_id, .. } | DocEvent::BlockDeleted { block_id } => {
                snapshot.contains(block_id)
            }
            DocEvent::Restored { .. } => true,
        }
    }

    fn reload_subtree(&self) {
        let mut state = self.state.lock();
        if state.removed || !state.source_exists || state.subtree.is_none() {
            return;
        }
        self.fetch_into(&mut state);
        self.publish(&state);
        tracing::trace!(portal = %self.portal_id, "subtree refreshed");
    }

    fn handle_detected(&self) {
        if self.state.lock().removed {
            return;
        }
        self.write_status(SyncStatus::Stale);
    }

    fn handle_orphaned(&self) {
        let (removed, source) = {
            let mut state = self.state.lock();
            state.loading = false;
            state.source_exists = false;
            state.buffer = None;
            state.subtree = None;
            state.session.blur();
            self.publish(&state);
            (state.removed, state.source)
        };
        if !removed && !self.document.contains(&source) {
            self.write_status(SyncStatus::Orphaned);
        }
        tracing::debug!(portal = %self.portal_id, %source, "portal orphaned");
    }
}

fn store_subtree(state: &mut ViewState, snapshot: SubtreeSnapshot) {
    if state.subtree.is_none() && state.overlay.is_empty() {
        state.overlay = LocalCollapse::seeded_from(&snapshot);
    } else {
        state.overlay.retain_in(&snapshot);
    }
    state.subtree = Some(snapshot);
}

fn build_frame(portal_id: BlockId, bridge: &EditingBridge, state: &ViewState) -> PortalFrame {
    let display = compute_display_state(
        state.sync_status,
        state.collapsed,
        state.loading,
        state.source_exists && !state.removed,
    );
    let surface = bridge.surface(display, state.collapsed, &state.text, state.buffer.as_ref());
    let expanded = matches!(display, DisplayState::Expanded | DisplayState::Stale) && !state.collapsed;
    let (rows, depth_warning) = match &state.subtree {
        Some(snapshot) if expanded => (state.overlay.visible_rows(snapshot), depth_limit_warning(snapshot)),
        _ => (Vec::new(), None),
    };
    PortalFrame {
        portal_id,
        source_block_id: state.source,
        display,
        status_label: status_label(state.sync_status),
        surface,
        text: state.text.clone(),
        rows,
        depth_warning,
        edit_warning: state.session.should_show_warning(),
        is_editing: state.session.is_editing(),
        is_collapsed: state.collapsed,
        sync_status: state.sync_status,
        removed: state.removed,
    }
}

struct ViewListener {
    view: Weak<ViewShared>,
}

impl SourceListener for ViewListener {
    fn on_text_change(&self, text: &str) {
        if let Some(view) = self.view.upgrade() {
            view.handle_text(text);
        }
    }

    fn on_orphaned(&self) {
        if let Some(view) = self.view.upgrade() {
            view.handle_orphaned();
        }
    }

    fn on_change_detected(&self) {
        if let Some(view) = self.view.upgrade() {
            view.handle_detected();
        }
    }
}

async fn follow_portal(view: Weak<ViewShared>, mut events: mpsc::UnboundedReceiver<BlockEvent>) {
    while let Some(event) = events.recv().await {
        let Some(shared) = view.upgrade() else {
            return;
        };
        match event {
            BlockEvent::Updated { .. } => shared.sync_portal(),
            BlockEvent::Deleted => {
                shared.mark_removed();
                return;
            }
            BlockEvent::TextChanged { .. } | BlockEvent::Moved { .. } => {}
        }
    }
}

/// Trailing debounce over document events that land inside the subtree.
async fn follow_subtree(
    view: Weak<ViewShared>,
    mut events: broadcast::Receiver<DocEvent>,
    debounce: Duration,
) {
    let timer = tokio::time::sleep(debounce);
    tokio::pin!(timer);
    let mut pending = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let relevant = match event {
                    Ok(event) => {
                        let Some(shared) = view.upgrade() else {
                            return;
                        };
                        shared.touches_subtree(&event)
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "document stream lagged; refreshing subtree");
                        true
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                if relevant {
                    pending = true;
                    timer.as_mut().reset(Instant::now() + debounce);
                }
            }
            () = &mut timer, if pending => {
                pending = false;
                let Some(shared) = view.upgrade() else {
                    return;
                };
                shared.reload_subtree();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use hydra_doc::{BlockKind, DocumentId, PrincipalId};

    use crate::cascade::delete_bullet;
    use crate::portal::create_portal;

    fn config() -> PortalConfig {
        PortalConfig {
            embed_subtree: true,
            ..PortalConfig::default()
        }
    }

    fn setup(text: &str) -> (Document, BlockId, BlockId) {
        let doc = Document::new(DocumentId::new(), PrincipalId::new());
        let src = doc.append_block(None, BlockKind::Bullet, text).unwrap();
        let portal = create_portal(&doc, None, Some(&src), &src).unwrap();
        (doc, src, portal)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    fn persisted_status(doc: &Document, portal: &BlockId) -> SyncStatus {
        doc.get_block(portal).unwrap().portal.unwrap().sync_status
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_mount_starts_loading_then_expands() {
        let (doc, _src, portal) = setup("Hello");
        let view = PortalView::mount(&doc, portal, config()).unwrap();
        assert_eq!(view.frame().display, DisplayState::Loading);

        settle().await;
        let frame = view.frame();
        assert_eq!(frame.display, DisplayState::Expanded);
        assert_eq!(frame.text, "Hello");
        assert!(frame.surface.is_editable());
        assert_eq!(frame.status_label, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_rejects_non_portal() {
        let (doc, src, _portal) = setup("Hello");
        assert_eq!(
            PortalView::mount(&doc, src, config()).err(),
            Some(PortalError::NotAPortal(src))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_releases_watchers() {
        let (doc, _src, portal) = setup("Hello");
        let view = PortalView::mount(&doc, portal, config()).unwrap();
        settle().await;
        assert_eq!(doc.watcher_count(), 2);

        view.unmount();
        assert!(!view.is_mounted());
        assert_eq!(doc.watcher_count(), 0);
        view.unmount();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_unmounts() {
        let (doc, _src, portal) = setup("Hello");
        drop(PortalView::mount(&doc, portal, config()).unwrap());
        assert_eq!(doc.watcher_count(), 0);
    }

    // ========================================================================
    // Sync status
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_source_edit_goes_stale_then_synced() {
        let (doc, src, portal) = setup("Hello");
        let view = PortalView::mount(&doc, portal, config()).unwrap();
        settle().await;

        doc.text_buffer(&src).unwrap().append(" World").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(persisted_status(&doc, &portal), SyncStatus::Stale);
        let frame = view.frame();
        assert_eq!(frame.display, DisplayState::Stale);
        assert_eq!(frame.status_label, "Updating...");
        assert_eq!(frame.text, "Hello");

        settle().await;
        let frame = view.frame();
        assert_eq!(frame.text, "Hello World");
        assert_eq!(frame.display, DisplayState::Expanded);
        assert_eq!(persisted_status(&doc, &portal), SyncStatus::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_deleted_orphans_view() {
        let doc = Document::new(DocumentId::new(), PrincipalId::new());
        let src = doc.append_block(None, BlockKind::Bullet, "Hello").unwrap();
        let holder = doc.append_block(None, BlockKind::Heading, "holder").unwrap();
        let portal = create_portal(&doc, Some(&holder), None, &src).unwrap();
        let view = PortalView::mount(&doc, portal, config()).unwrap();
        settle().await;

        // Bypass the cascade so the portal survives its source.
        doc.delete_block(&src).unwrap();
        settle().await;
        let frame = view.frame();
        assert_eq!(frame.display, DisplayState::Orphaned);
        assert_eq!(frame.surface, Surface::Orphaned);
        assert_eq!(frame.status_label, "Source deleted");
        assert_eq!(persisted_status(&doc, &portal), SyncStatus::Orphaned);
        assert!(!view.focus());
    }

    #[tokio::test(start_paused = true)]
    async fn test_portal_deleted_by_cascade() {
        let (doc, src, portal) = setup("Hello");
        let view = PortalView::mount(&doc, portal, config()).unwrap();
        settle().await;

        let report = delete_bullet(&doc, &src).unwrap();
        assert_eq!(report.portals_deleted, vec![portal]);
        settle().await;
        let frame = view.frame();
        assert!(frame.removed);
        assert_ne!(frame.display, DisplayState::Expanded);
        assert!(!frame.surface.is_editable());
    }

    // ========================================================================
    // Collapse and editing
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_collapse_shows_preview_and_ends_editing() {
        let (doc, _src, portal) = setup("A rather long line that will be cut");
        let cfg = PortalConfig {
            preview_chars: 8,
            ..config()
        };
        let view = PortalView::mount(&doc, portal, cfg).unwrap();
        settle().await;
        assert!(view.focus());

        assert!(view.toggle_collapsed().unwrap());
        let frame = view.frame();
        assert_eq!(frame.display, DisplayState::Collapsed);
        assert_eq!(frame.surface, Surface::Preview("A rather...".into()));
        assert!(!frame.is_editing);
        assert!(frame.rows.is_empty());
        assert!(doc.get_block(&portal).unwrap().collapsed);

        assert!(!view.toggle_collapsed().unwrap());
        assert_eq!(view.frame().display, DisplayState::Expanded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_writes_through_to_source() {
        let (doc, src, portal) = setup("Hello");
        let view = PortalView::mount(&doc, portal, config()).unwrap();
        settle().await;

        assert!(view.focus());
        assert!(view.frame().edit_warning);
        view.edit(5, " there", 0).unwrap();
        assert_eq!(doc.get_block(&src).unwrap().content, "Hello there");
        assert!(!view.frame().edit_warning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_refused_while_collapsed() {
        let (doc, src, portal) = setup("Hello");
        let view = PortalView::mount(&doc, portal, config()).unwrap();
        settle().await;
        view.toggle_collapsed().unwrap();
        assert_eq!(view.edit(0, "x", 0), Err(PortalError::NotEditable(portal)));
        assert_eq!(doc.get_block(&src).unwrap().content, "Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismissed_warning_stays_dismissed() {
        let (doc, _src, portal) = setup("Hello");
        let view = PortalView::mount(&doc, portal, config()).unwrap();
        settle().await;
        view.focus();
        view.dismiss_warning();
        view.blur();
        view.focus();
        assert!(!view.frame().edit_warning);
        assert!(view.frame().is_editing);
    }

    // ========================================================================
    // Subtree and retarget
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_subtree_rows_and_local_fold() {
        let (doc, src, portal) = setup("root");
        let a = doc.append_block(Some(&src), BlockKind::Bullet, "a").unwrap();
        doc.append_block(Some(&a), BlockKind::Bullet, "a1").unwrap();
        doc.append_block(Some(&src), BlockKind::Bullet, "b").unwrap();
        let view = PortalView::mount(&doc, portal, config()).unwrap();
        settle().await;

        let texts: Vec<String> = view.frame().rows.into_iter().map(|r| r.text).collect();
        assert_eq!(texts, vec!["a", "a1", "b"]);

        assert!(view.toggle_local_fold(a));
        let texts: Vec<String> = view.frame().rows.into_iter().map(|r| r.text).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert!(!doc.get_block(&a).unwrap().collapsed);

        doc.append_block(Some(&src), BlockKind::Bullet, "c").unwrap();
        view.refresh_subtree().await.unwrap();
        let texts: Vec<String> = view.frame().rows.into_iter().map(|r| r.text).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retarget_follows_new_source() {
        let (doc, old, portal) = setup("old");
        let new = doc.append_block(None, BlockKind::Bullet, "new").unwrap();
        let view = PortalView::mount(&doc, portal, config()).unwrap();
        settle().await;

        view.retarget(new).unwrap();
        assert_eq!(view.frame().display, DisplayState::Loading);
        settle().await;
        assert_eq!(view.frame().text, "new");
        assert_eq!(view.source_block_id(), new);
        assert_eq!(doc.watcher_count(), 2);

        doc.text_buffer(&old).unwrap().set_text("ignored").unwrap();
        settle().await;
        assert_eq!(view.frame().text, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retarget_rejects_portal_source() {
        let (doc, _src, portal) = setup("x");
        let view = PortalView::mount(&doc, portal, config()).unwrap();
        assert_eq!(
            view.retarget(portal),
            Err(PortalError::SourceIsPortal(portal))
        );
    }
}
