//! Deadline context nodes.
//!
//! A deadline node is a cancelable node with a fixed expiry time and a
//! one-shot timer registered on the process-wide wall driver. The timer and
//! an explicit trigger race benignly: whichever cancels first records its
//! cause, and the loser is a no-op. Arming happens under the node's state
//! lock so an early cancellation can never leave an orphaned registration.

use core::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Error;
use crate::signal::CancelSignal;
use crate::time::{self, Time, TimerHandle};

use super::cancel::{CancelCore, CancelCx, CancelHandle, Canceler};
use super::propagate::{detach_child, propagate_cancel};
use super::{with_cancel, Context, ContextRef, Key, Value};

/// A cancelable context node that expires at a fixed time.
struct DeadlineCx {
    inner: CancelCx,
    deadline: Time,
    /// Owned timer registration; taken when the node is cancelled.
    timer: Mutex<Option<TimerHandle>>,
}

impl fmt::Debug for DeadlineCx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineCx")
            .field("deadline", &self.deadline)
            .field("core", self.inner.core())
            .finish_non_exhaustive()
    }
}

impl Context for DeadlineCx {
    fn deadline(&self) -> Option<Time> {
        Some(self.deadline)
    }

    fn signal(&self) -> Option<Arc<CancelSignal>> {
        Some(self.inner.core().signal())
    }

    fn error(&self) -> Option<Error> {
        self.inner.core().error()
    }

    fn value(&self, key: &dyn Key) -> Option<Value> {
        self.inner.parent().value(key)
    }

    fn cancelable(&self) -> Option<Arc<CancelCore>> {
        Some(Arc::clone(self.inner.core()))
    }
}

impl Canceler for DeadlineCx {
    fn cancel(&self, detach: bool, cause: Error) {
        let first = self.inner.core().cancel(cause);
        if first {
            tracing::trace!(cause = %cause, deadline = %self.deadline, "deadline context cancelled");
            if detach {
                detach_child(self.inner.parent(), self.inner.id());
            }
        }
        // Disarm whether or not this call won the race; cancelling an
        // already-fired registration is a no-op.
        if let Some(handle) = self.timer.lock().expect("lock poisoned").take() {
            time::wall_timer().cancel(&handle);
        }
    }
}

/// Creates a child of `parent` that is cancelled automatically at `at`.
///
/// If the parent's effective deadline is already earlier than `at`, the
/// result degrades to a plain cancelable child: the earlier deadline fires
/// first regardless, so a second timer would be redundant. If `at` has
/// already passed, the node is cancelled with `DeadlineExceeded` before this
/// function returns and no timer is armed.
#[must_use]
pub fn with_deadline(parent: &ContextRef, at: Time) -> (ContextRef, CancelHandle) {
    if let Some(current) = parent.deadline() {
        if current < at {
            return with_cancel(parent);
        }
    }

    let cx = Arc::new(DeadlineCx {
        inner: CancelCx::new(Arc::clone(parent)),
        deadline: at,
        timer: Mutex::new(None),
    });
    propagate_cancel(
        parent,
        Arc::clone(&cx) as Arc<dyn Canceler>,
        cx.inner.id(),
        cx.inner.core(),
    );

    if at <= time::now() {
        cx.cancel(true, Error::deadline_exceeded());
        // Nothing is registered anywhere by now, so the trigger has nothing
        // to detach.
        let handle = CancelHandle::new(Arc::clone(&cx) as Arc<dyn Canceler>, false);
        return (cx, handle);
    }

    {
        // Arm under the state lock: a cancellation racing this construction
        // either wins now (no timer is armed) or finds the handle to stop.
        let state = cx.inner.core().lock_state();
        if state.error.is_none() {
            let node = Arc::downgrade(&cx);
            let handle = time::wall_timer().register(at, move || {
                if let Some(node) = node.upgrade() {
                    node.cancel(true, Error::deadline_exceeded());
                }
            });
            *cx.timer.lock().expect("lock poisoned") = Some(handle);
        }
    }

    let handle = CancelHandle::new(Arc::clone(&cx) as Arc<dyn Canceler>, true);
    (cx, handle)
}

/// Creates a child of `parent` that is cancelled automatically after
/// `timeout` from now.
#[must_use]
pub fn with_timeout(parent: &ContextRef, timeout: Duration) -> (ContextRef, CancelHandle) {
    with_deadline(parent, time::now() + timeout)
}
