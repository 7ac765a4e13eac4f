//! Source observer: one block's change stream, reduced to callbacks.
//!
//! ```text
//!            ┌──────────── create ────────────┐
//!            │ source resolves?               │
//!            ▼ yes                            ▼ no / model not ready
//!   initial on_text_change            on_orphaned (spawned)
//!            │
//!            ▼
//!   ┌─► Watching ── TextChanged ──► on_change_detected (burst start)
//!   │        │                      restart debounce timer
//!   │        │ timer fires
//!   └────────┤ on_text_change(latest)
//!            │
//!            └── Deleted / stream closed ──► on_orphaned (once) ──► done
//! ```
//!
//! Every callback passes through a [`Gate`]: a re-entrant lock around the
//! observer phase. `dispose()` takes the same lock, so once it returns no
//! callback is running on another thread and none will start. Disposing from
//! inside a callback re-enters the lock on the same thread and closes the
//! gate for everything after it.

use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use hydra_doc::{BlockEvent, BlockId, Document, WatchHandle};

/// Receives a source block's changes.
///
/// Callbacks run on the observer's task and must not block for long.
pub trait SourceListener: Send + Sync + 'static {
    /// Settled source text: the initial value, then one call per burst.
    fn on_text_change(&self, text: &str);

    /// The source is gone. Called at most once; nothing follows it.
    fn on_orphaned(&self);

    /// First raw change of a burst, before the debounce settles.
    fn on_change_detected(&self) {}
}

/// Closure-backed [`SourceListener`].
pub struct Callbacks<T, O> {
    on_text: T,
    on_orphaned: O,
}

impl<T, O> SourceListener for Callbacks<T, O>
where
    T: Fn(&str) + Send + Sync + 'static,
    O: Fn() + Send + Sync + 'static,
{
    fn on_text_change(&self, text: &str) {
        (self.on_text)(text);
    }

    fn on_orphaned(&self) {
        (self.on_orphaned)();
    }
}

pub fn callbacks<T, O>(on_text: T, on_orphaned: O) -> Arc<dyn SourceListener>
where
    T: Fn(&str) + Send + Sync + 'static,
    O: Fn() + Send + Sync + 'static,
{
    Arc::new(Callbacks {
        on_text,
        on_orphaned,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Watching,
    Orphaned,
    Disposed,
}

struct Gate {
    phase: ReentrantMutex<Cell<Phase>>,
}

impl Gate {
    fn new() -> Self {
        Self {
            phase: ReentrantMutex::new(Cell::new(Phase::Watching)),
        }
    }

    fn phase(&self) -> Phase {
        self.phase.lock().get()
    }

    /// Run `f` only while still watching.
    fn deliver(&self, f: impl FnOnce()) {
        let phase = self.phase.lock();
        if phase.get() == Phase::Watching {
            f();
        }
    }

    /// Move to orphaned and run `f`, once.
    fn orphan(&self, f: impl FnOnce()) {
        let phase = self.phase.lock();
        if phase.get() == Phase::Watching {
            phase.set(Phase::Orphaned);
            f();
        }
    }

    /// Close for good. Returns false if already closed.
    fn dispose(&self) -> bool {
        let phase = self.phase.lock();
        let first = phase.get() != Phase::Disposed;
        phase.set(Phase::Disposed);
        first
    }
}

/// Handle to a running observer. Dropping it disposes it.
pub struct SourceObserver {
    source_block_id: BlockId,
    gate: Arc<Gate>,
    watch: Option<WatchHandle>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Start observing `source_block_id`.
///
/// Never fails: a missing source or an uninitialized model ends in
/// `on_orphaned`, delivered from a spawned task after this returns.
///
/// Without a tokio runtime there is nowhere to spawn, so `on_orphaned` runs
/// synchronously on the calling thread before this function returns.
pub fn create_source_observer(
    document: &Document,
    source_block_id: BlockId,
    debounce: Duration,
    listener: Arc<dyn SourceListener>,
) -> SourceObserver {
    let gate = Arc::new(Gate::new());
    let mut observer = SourceObserver {
        source_block_id,
        gate: gate.clone(),
        watch: None,
        task: Mutex::new(None),
    };

    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(
            source = %source_block_id,
            "no async runtime for source observer; orphaning synchronously"
        );
        gate.orphan(|| listener.on_orphaned());
        return observer;
    };

    // Register before reading so no change between the read and the
    // subscription is lost.
    let watch = document.watch_block(&source_block_id);

    let initial = match document.try_get_block(&source_block_id) {
        Ok(Some(_)) => document.text_buffer(&source_block_id).map(|buf| buf.read()),
        Ok(None) => {
            tracing::debug!(source = %source_block_id, "portal source does not resolve");
            None
        }
        Err(err) => {
            tracing::warn!(source = %source_block_id, %err, "source lookup failed");
            None
        }
    };

    let Some((text, version)) = initial else {
        drop(watch);
        let task = runtime.spawn(async move {
            gate.orphan(|| listener.on_orphaned());
        });
        *observer.task.get_mut() = Some(task);
        return observer;
    };

    let (handle, events) = watch.into_parts();
    let task = runtime.spawn(run(
        events,
        text,
        version,
        debounce,
        gate,
        listener,
        source_block_id,
    ));
    observer.watch = Some(handle);
    *observer.task.get_mut() = Some(task);
    tracing::debug!(source = %source_block_id, ?debounce, "source observer started");
    observer
}

async fn run(
    mut events: mpsc::UnboundedReceiver<BlockEvent>,
    initial: String,
    mut last_version: u64,
    debounce: Duration,
    gate: Arc<Gate>,
    listener: Arc<dyn SourceListener>,
    source_block_id: BlockId,
) {
    gate.deliver(|| listener.on_text_change(&initial));
    let mut delivered = initial;
    let mut pending: Option<String> = None;

    let timer = tokio::time::sleep(debounce);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(BlockEvent::TextChanged { text, version }) => {
                    // Transactions publish after commit, so an older version
                    // can arrive after a newer direct edit.
                    if version <= last_version {
                        continue;
                    }
                    last_version = version;
                    if pending.is_none() {
                        if text == delivered {
                            continue;
                        }
                        gate.deliver(|| listener.on_change_detected());
                    }
                    pending = Some(text);
                    timer.as_mut().reset(Instant::now() + debounce);
                }
                Some(BlockEvent::Updated { .. } | BlockEvent::Moved { .. }) => {}
                Some(BlockEvent::Deleted) | None => {
                    if pending.take().is_some() {
                        tracing::debug!(source = %source_block_id, "dropping pending text on orphan");
                    }
                    gate.orphan(|| listener.on_orphaned());
                    tracing::debug!(source = %source_block_id, "portal source orphaned");
                    return;
                }
            },
            () = &mut timer, if pending.is_some() => {
                if let Some(text) = pending.take() {
                    gate.deliver(|| listener.on_text_change(&text));
                    delivered = text;
                }
            }
        }
    }
}

impl SourceObserver {
    pub fn source_block_id(&self) -> BlockId {
        self.source_block_id
    }

    /// Stop observing. Synchronous and idempotent; safe from inside a
    /// callback. No callback fires after this returns.
    pub fn dispose(&self) {
        let first = self.gate.dispose();
        if let Some(watch) = &self.watch {
            watch.cancel();
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        if first {
            tracing::debug!(source = %self.source_block_id, "source observer disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.gate.phase() == Phase::Disposed
    }

    pub fn is_orphaned(&self) -> bool {
        self.gate.phase() == Phase::Orphaned
    }
}

impl Drop for SourceObserver {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SourceObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceObserver")
            .field("source_block_id", &self.source_block_id)
            .field("phase", &self.gate.phase())
            .finish()
    }
}
