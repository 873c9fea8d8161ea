//! Cancelable context nodes.
//!
//! A cancelable node owns a [`CancelCore`]: one exclusive lock guarding the
//! terminal cause, the lazily-created cancellation signal, and the set of
//! tracked child nodes. Cancelling a node records the cause, latches the
//! signal, and cascades to every tracked child while the node's lock is still
//! held — the subtree transition is atomic to outside observers. Detaching
//! from the parent happens afterwards, with no child lock held, so parent and
//! child locks are never acquired in an inverting order.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use smallvec::SmallVec;

use crate::error::Error;
use crate::signal::{self, CancelSignal};
use crate::time::Time;

use super::propagate::{detach_child, propagate_cancel};
use super::{Context, ContextRef, Key, Value};

/// Internal cancellation interface shared by cancelable and deadline nodes.
///
/// `detach` controls whether the node unlinks from its parent's child set: a
/// cascading parent passes `false` because the whole set is being torn down.
pub(crate) trait Canceler: Send + Sync {
    fn cancel(&self, detach: bool, cause: Error);
}

/// Non-owning downward edge from a parent to a tracked child, keyed by the
/// child's node id.
pub(crate) type ChildRef = (u64, Weak<dyn Canceler>);

/// Hands out process-unique node identities for child tracking.
pub(crate) fn next_node_id() -> u64 {
    static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(0);
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Default)]
pub(crate) struct CoreState {
    /// Terminal cause; set at most once.
    pub(crate) error: Option<Error>,
    /// Tracked cancelable descendants; drained on cancellation.
    pub(crate) children: SmallVec<[ChildRef; 4]>,
}

/// Shared mutable core of a cancelable node.
///
/// Exposed only through [`Context::cancelable`] so that wrapper contexts can
/// delegate to the node they wrap; it has no public operations.
pub struct CancelCore {
    /// Lazily-installed signal; stable once set. Reads are lock-free, first
    /// installation is serialized by `state`.
    done: OnceLock<Arc<CancelSignal>>,
    state: Mutex<CoreState>,
}

impl CancelCore {
    pub(crate) fn new() -> Self {
        Self {
            done: OnceLock::new(),
            state: Mutex::new(CoreState::default()),
        }
    }

    /// Returns the signal, installing it on first request.
    pub(crate) fn signal(&self) -> Arc<CancelSignal> {
        if let Some(signal) = self.done.get() {
            return Arc::clone(signal);
        }
        let _state = self.state.lock().expect("lock poisoned");
        if let Some(signal) = self.done.get() {
            return Arc::clone(signal);
        }
        // Under the lock and still unset: the node is live, so the fresh
        // handle starts unlatched.
        let created = Arc::new(CancelSignal::new());
        let _ = self.done.set(Arc::clone(&created));
        created
    }

    /// Returns the currently-installed signal without creating one.
    pub(crate) fn installed_signal(&self) -> Option<Arc<CancelSignal>> {
        self.done.get().map(Arc::clone)
    }

    /// Returns the terminal cause, or `None` while live.
    pub(crate) fn error(&self) -> Option<Error> {
        self.state.lock().expect("lock poisoned").error
    }

    /// Locks the core state; used by deadline nodes to arm their timer only
    /// while provably live.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Registers a child for cascade, or returns the cause if this node is
    /// already cancelled.
    pub(crate) fn register_child(&self, child: ChildRef) -> Result<(), Error> {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(cause) = state.error {
            return Err(cause);
        }
        state.children.push(child);
        Ok(())
    }

    /// Removes a child from the tracked set by node identity, purging dead
    /// entries along the way.
    pub(crate) fn remove_child(&self, id: u64) {
        let mut state = self.state.lock().expect("lock poisoned");
        state
            .children
            .retain(|(child_id, child)| *child_id != id && child.strong_count() != 0);
    }

    /// Core cancellation: records the cause, latches the signal, and cascades
    /// to tracked children under this node's lock. Returns false if the node
    /// was already cancelled (every later call is a no-op).
    pub(crate) fn cancel(&self, cause: Error) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.error.is_some() {
            return false;
        }
        state.error = Some(cause);

        match self.done.get() {
            Some(signal) => signal.set(),
            // No observer ever asked for a handle; install the shared
            // pre-latched one so a late observation never blocks.
            None => {
                let _ = self.done.set(signal::signalled());
            }
        }

        // Cascade while still holding the lock: no observer may see this
        // node cancelled while a tracked child is still live.
        for (_, child) in state.children.drain(..) {
            if let Some(child) = child.upgrade() {
                child.cancel(false, cause);
            }
        }
        true
    }
}

impl fmt::Debug for CancelCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().expect("lock poisoned");
        f.debug_struct("CancelCore")
            .field("error", &state.error)
            .field("children", &state.children.len())
            .finish_non_exhaustive()
    }
}

/// A cancelable context node.
pub(crate) struct CancelCx {
    parent: ContextRef,
    core: Arc<CancelCore>,
    id: u64,
}

impl CancelCx {
    pub(crate) fn new(parent: ContextRef) -> Self {
        Self {
            parent,
            core: Arc::new(CancelCore::new()),
            id: next_node_id(),
        }
    }

    pub(crate) fn parent(&self) -> &ContextRef {
        &self.parent
    }

    pub(crate) fn core(&self) -> &Arc<CancelCore> {
        &self.core
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for CancelCx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelCx")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl Context for CancelCx {
    fn deadline(&self) -> Option<Time> {
        self.parent.deadline()
    }

    fn signal(&self) -> Option<Arc<CancelSignal>> {
        Some(self.core.signal())
    }

    fn error(&self) -> Option<Error> {
        self.core.error()
    }

    fn value(&self, key: &dyn Key) -> Option<Value> {
        self.parent.value(key)
    }

    fn cancelable(&self) -> Option<Arc<CancelCore>> {
        Some(Arc::clone(&self.core))
    }
}

impl Canceler for CancelCx {
    fn cancel(&self, detach: bool, cause: Error) {
        if !self.core.cancel(cause) {
            return; // already cancelled
        }
        tracing::trace!(cause = %cause, "context cancelled");
        if detach {
            detach_child(&self.parent, self.id);
        }
    }
}

/// Idempotent, thread-safe trigger for a cancelable or deadline node.
///
/// The first invocation cancels the node (and its subtree) with
/// [`ErrorKind::Cancelled`]; every later invocation, from any thread, is a
/// no-op. Callers should always invoke it, even after successful completion,
/// to release the node from its parent promptly; an untriggered node stays
/// tracked until the parent itself is cancelled or dropped.
///
/// [`ErrorKind::Cancelled`]: crate::error::ErrorKind::Cancelled
#[derive(Clone)]
pub struct CancelHandle {
    node: Arc<dyn Canceler>,
    detach: bool,
}

impl CancelHandle {
    pub(crate) fn new(node: Arc<dyn Canceler>, detach: bool) -> Self {
        Self { node, detach }
    }

    /// Cancels the node this handle was returned with.
    pub fn cancel(&self) {
        self.node.cancel(self.detach, Error::cancelled());
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("detach", &self.detach)
            .finish_non_exhaustive()
    }
}

/// Creates a cancelable child of `parent`.
///
/// Cancelling any ancestor cancels the new node; the returned
/// [`CancelHandle`] cancels it directly.
#[must_use]
pub fn with_cancel(parent: &ContextRef) -> (ContextRef, CancelHandle) {
    let cx = Arc::new(CancelCx::new(Arc::clone(parent)));
    propagate_cancel(parent, Arc::clone(&cx) as Arc<dyn Canceler>, cx.id(), cx.core());
    let handle = CancelHandle::new(Arc::clone(&cx) as Arc<dyn Canceler>, true);
    (cx, handle)
}
