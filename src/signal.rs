//! One-shot cancellation signal.
//!
//! [`CancelSignal`] is an observable handle that becomes permanently latched
//! exactly once and is never reset. Observing it is the only suspending
//! operation in this crate: a waiter resumes when the signal latches (by
//! explicit cancellation, ancestor cascade, or deadline expiry) and never
//! otherwise.
//!
//! # Cancel Safety
//!
//! - `observed()`: cancel-safe, the waiter slot is reclaimed when the future
//!   is dropped before completion
//! - Latching before any waiter registers: later observers complete
//!   immediately
//!
//! A process-wide pre-latched instance is shared across all nodes that are
//! cancelled before anyone asked for their signal, so that path allocates
//! nothing.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

/// A one-shot, permanently-latching cancellation signal.
///
/// Once [`set`](CancelSignal::set), every current waiter is woken and every
/// future observation completes immediately. Handle identity matters to the
/// propagation algorithm: two handles refer to the same signal exactly when
/// their `Arc`s are pointer-equal.
#[derive(Debug)]
pub struct CancelSignal {
    /// Latch state; never transitions back to false.
    set: AtomicBool,
    /// Registered waiters (protected by mutex).
    waiters: StdMutex<WaiterSlab>,
}

/// Slab-like storage for waiters that reuses freed slots so repeated
/// register/drop cycles do not grow the vector.
#[derive(Debug)]
struct WaiterSlab {
    entries: Vec<Option<Waker>>,
    free_slots: Vec<usize>,
}

impl WaiterSlab {
    const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_slots: Vec::new(),
        }
    }

    /// Insert a waker, reusing a free slot if available.
    fn insert(&mut self, waker: Waker) -> usize {
        if let Some(index) = self.free_slots.pop() {
            self.entries[index] = Some(waker);
            index
        } else {
            self.entries.push(Some(waker));
            self.entries.len() - 1
        }
    }

    /// Remove a waker by index, returning its slot to the free list.
    fn remove(&mut self, index: usize) {
        if index >= self.entries.len() {
            return;
        }
        self.entries[index] = None;
        self.free_slots.push(index);

        // Shrink from the end: pop entries that are free and at the tail.
        while matches!(self.entries.last(), Some(None)) {
            let tail = self.entries.len() - 1;
            self.entries.pop();
            if let Some(pos) = self.free_slots.iter().position(|&i| i == tail) {
                self.free_slots.swap_remove(pos);
            }
        }
    }

    /// Count active waiters.
    fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

impl CancelSignal {
    /// Creates a new signal in the unlatched state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
            waiters: StdMutex::new(WaiterSlab::new()),
        }
    }

    /// Returns true if the signal has latched.
    ///
    /// This is a lock-free read; a `true` result is final.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Latches the signal and wakes every registered waiter.
    ///
    /// Idempotent: calls after the first are no-ops. Native context nodes
    /// latch their signal through the cancellation algorithm; call this
    /// directly only on a signal you created for a custom [`Context`]
    /// implementation.
    ///
    /// [`Context`]: crate::cx::Context
    pub fn set(&self) {
        if self.set.swap(true, Ordering::AcqRel) {
            return; // already latched
        }

        // Collect all wakers, then wake outside the lock.
        let wakers: Vec<Waker> = {
            let mut waiters = match self.waiters.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let wakers = waiters.entries.iter_mut().filter_map(Option::take).collect();
            waiters.entries.clear();
            waiters.free_slots.clear();
            wakers
        };

        for waker in wakers {
            waker.wake();
        }
    }

    /// Returns a future that completes when the signal latches.
    ///
    /// The returned future is cancel-safe: if dropped before completion, its
    /// waiter slot is cleanly reclaimed.
    #[must_use]
    pub fn observed(&self) -> Observed<'_> {
        Observed {
            signal: self,
            slot: None,
        }
    }

    /// Blocks the calling thread until the signal latches.
    ///
    /// Returns immediately if the signal is already set. Spurious wakeups of
    /// the underlying park are absorbed by re-checking the latch.
    pub fn wait(&self) {
        if self.is_set() {
            return;
        }
        let waker = Waker::from(Arc::new(ThreadWaker(thread::current())));
        let mut cx = Context::from_waker(&waker);
        let mut observed = self.observed();
        while Pin::new(&mut observed).poll(&mut cx).is_pending() {
            thread::park();
        }
    }

    /// Returns the number of waiters currently registered.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        let waiters = match self.waiters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        waiters.active_count()
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the process-wide pre-latched signal.
///
/// Reused whenever a node is cancelled before any observer asked for its
/// signal: a late observation then returns an already-set handle without
/// allocating one that would immediately be discarded.
pub(crate) fn signalled() -> Arc<CancelSignal> {
    static SIGNALLED: OnceLock<Arc<CancelSignal>> = OnceLock::new();
    Arc::clone(SIGNALLED.get_or_init(|| {
        let signal = CancelSignal::new();
        signal.set();
        Arc::new(signal)
    }))
}

/// A waker that unparks a thread, for blocking observation.
pub(crate) struct ThreadWaker(pub(crate) Thread);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}

/// Future returned by [`CancelSignal::observed`].
#[derive(Debug)]
pub struct Observed<'a> {
    signal: &'a CancelSignal,
    slot: Option<usize>,
}

impl Future for Observed<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        if this.signal.is_set() {
            // The slab was drained when the signal latched.
            this.slot = None;
            return Poll::Ready(());
        }

        let mut waiters = match this.signal.waiters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Re-check under the lock: set() latches before draining, so a miss
        // here means our waker below is guaranteed to be drained and woken.
        if this.signal.is_set() {
            this.slot = None;
            return Poll::Ready(());
        }

        match this.slot {
            Some(index) if index < waiters.entries.len() && waiters.entries[index].is_some() => {
                waiters.entries[index] = Some(cx.waker().clone());
            }
            _ => {
                this.slot = Some(waiters.insert(cx.waker().clone()));
            }
        }
        Poll::Pending
    }
}

impl Drop for Observed<'_> {
    fn drop(&mut self) {
        if let Some(index) = self.slot.take() {
            let mut waiters = match self.signal.waiters.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            waiters.remove(index);
        }
    }
}
