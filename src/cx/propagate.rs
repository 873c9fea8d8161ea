//! Linking new cancelable nodes to their nearest cancelable ancestor.
//!
//! Run once at construction time. The fast path registers the new node in a
//! native ancestor's child set; the fallback path covers parents that
//! implement [`Context`] outside this crate and therefore cannot be linked
//! through a shared core. Both paths preserve the cascading-cancellation
//! invariant: cancelling any ancestor cancels the new node.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task;
use std::thread;

use crate::error::Error;
use crate::signal::{CancelSignal, ThreadWaker};

use super::cancel::{CancelCore, Canceler};
use super::ContextRef;

/// Fallback waiters ever spawned / ever exited, for test instrumentation.
static WAITERS_SPAWNED: AtomicU64 = AtomicU64::new(0);
static WAITERS_EXITED: AtomicU64 = AtomicU64::new(0);

/// Returns the number of fallback waiter threads ever spawned and ever
/// exited, in that order.
///
/// Diagnostic counters: a linking fallback that leaks waiters shows up as a
/// growing gap between the two.
#[must_use]
pub fn waiter_counts() -> (u64, u64) {
    (
        WAITERS_SPAWNED.load(Ordering::Relaxed),
        WAITERS_EXITED.load(Ordering::Relaxed),
    )
}

/// Reads the cause recorded on a cancelled parent.
///
/// A context whose signal has latched must report a cause; anything else is a
/// defect in a foreign [`Context`] implementation.
///
/// [`Context`]: super::Context
fn parent_cause(parent: &ContextRef) -> Error {
    parent
        .error()
        .expect("cancelled context reports no cause")
}

/// Links `child` so that cancelling any ancestor of `parent` cancels it.
pub(crate) fn propagate_cancel(
    parent: &ContextRef,
    child: Arc<dyn Canceler>,
    child_id: u64,
    child_core: &Arc<CancelCore>,
) {
    let Some(parent_signal) = parent.signal() else {
        return; // parent can never be cancelled
    };

    if parent_signal.is_set() {
        // Nothing registered yet, so there is nothing to detach from.
        child.cancel(false, parent_cause(parent));
        return;
    }

    if let Some(ancestor) = cancelable_ancestor(parent) {
        match ancestor.register_child((child_id, Arc::downgrade(&child))) {
            Ok(()) => {}
            // The ancestor was cancelled between the signal check and taking
            // its lock.
            Err(cause) => child.cancel(false, cause),
        }
        return;
    }

    spawn_fallback_waiter(
        Arc::clone(parent),
        parent_signal,
        Arc::downgrade(&child),
        child_core.signal(),
    );
}

/// Finds the nearest native cancelable ancestor of `parent`, if a usable tree
/// edge to it exists.
///
/// Answers `None` when the parent has no signal (never cancelable) or its
/// signal has already latched (nothing to maintain for a dead branch), when
/// the capability walk finds no native core, and when the core's installed
/// signal is not the very handle the parent reported — a wrapper surfacing a
/// foreign signal must be linked through the fallback waiter instead.
pub(crate) fn cancelable_ancestor(parent: &ContextRef) -> Option<Arc<CancelCore>> {
    let reported = parent.signal()?;
    if reported.is_set() {
        return None;
    }
    let core = parent.cancelable()?;
    let installed = core.installed_signal()?;
    if !Arc::ptr_eq(&installed, &reported) {
        return None;
    }
    Some(core)
}

/// Removes the node identified by `child_id` from the child set of the
/// nearest cancelable ancestor.
///
/// Called by a cancelled node after it released its own lock; silently does
/// nothing when no ancestor edge exists (the ancestor was cancelled first and
/// already dropped its set).
pub(crate) fn detach_child(parent: &ContextRef, child_id: u64) {
    if let Some(ancestor) = cancelable_ancestor(parent) {
        ancestor.remove_child(child_id);
    }
}

/// Mirrors cancellation across a foreign edge.
///
/// The waiter blocks until the parent's signal latches (then cancels the
/// child with the parent's cause) or the child's own signal latches first
/// (then it simply exits). If neither ever latches the waiter blocks
/// forever; no supervisory timeout is imposed.
fn spawn_fallback_waiter(
    parent: ContextRef,
    parent_signal: Arc<CancelSignal>,
    child: Weak<dyn Canceler>,
    child_signal: Arc<CancelSignal>,
) {
    WAITERS_SPAWNED.fetch_add(1, Ordering::Relaxed);
    tracing::debug!("spawning fallback waiter for foreign parent context");

    thread::Builder::new()
        .name("cxtree-waiter".into())
        .spawn(move || {
            let waker = task::Waker::from(Arc::new(ThreadWaker(thread::current())));
            let mut poll_cx = task::Context::from_waker(&waker);
            let mut parent_observed = parent_signal.observed();
            let mut child_observed = child_signal.observed();

            loop {
                if Pin::new(&mut parent_observed).poll(&mut poll_cx).is_ready() {
                    if let Some(child) = child.upgrade() {
                        child.cancel(false, parent_cause(&parent));
                    }
                    break;
                }
                if Pin::new(&mut child_observed).poll(&mut poll_cx).is_ready() {
                    break; // child finished first; nothing to mirror
                }
                thread::park();
            }

            WAITERS_EXITED.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("fallback waiter exited");
        })
        .expect("failed to spawn fallback waiter thread");
}
