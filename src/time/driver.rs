//! One-shot timer driver.
//!
//! The driver keeps registrations ordered by deadline in a binary heap.
//! Cancellation removes the callback and leaves a stale heap entry behind;
//! stale entries are skipped when they surface at the head. This keeps
//! cancellation O(1) at the cost of bounded heap garbage.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use super::clock::{Time, TimeSource, WallClock};

type TimerCallback = Box<dyn FnOnce() + Send>;

/// Handle identifying a registered timer.
///
/// Used to cancel the registration before it fires. Cancelling a handle whose
/// timer has already fired (or was already cancelled) is a safe no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    id: u64,
}

impl TimerHandle {
    /// Returns the timer identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Default)]
struct TimerQueue {
    /// Min-heap of (deadline, id); entries whose id is no longer pending are
    /// stale and skipped on pop.
    heap: BinaryHeap<Reverse<(Time, u64)>>,
    /// Live registrations by id.
    pending: HashMap<u64, TimerCallback>,
}

/// One-shot timer driver ordered by deadline.
///
/// The driver itself is passive: someone must call
/// [`process_timers`](TimerDriver::process_timers) for due callbacks to run.
/// In production that someone is the process-wide worker thread; in tests a
/// [`VirtualClock`](super::VirtualClock) is advanced and the driver is
/// processed by hand.
///
/// # Thread Safety
///
/// The driver is thread-safe and can be shared across tasks.
pub struct TimerDriver<T: TimeSource> {
    clock: Arc<T>,
    queue: Mutex<TimerQueue>,
    next_id: AtomicU64,
}

impl<T: TimeSource> TimerDriver<T> {
    /// Creates a new timer driver with the given time source.
    #[must_use]
    pub fn with_clock(clock: Arc<T>) -> Self {
        Self {
            clock,
            queue: Mutex::new(TimerQueue::default()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Returns the current time from the underlying clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.clock.now()
    }

    /// Registers a one-shot callback to fire at the given deadline.
    pub fn register(
        &self,
        deadline: Time,
        callback: impl FnOnce() + Send + 'static,
    ) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut queue = self.queue.lock().expect("lock poisoned");
        queue.heap.push(Reverse((deadline, id)));
        queue.pending.insert(id, Box::new(callback));
        tracing::trace!(id, deadline = %deadline, "timer registered");
        TimerHandle { id }
    }

    /// Cancels a registration, dropping its callback without running it.
    ///
    /// Returns true if the timer was still pending.
    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        let removed = {
            let mut queue = self.queue.lock().expect("lock poisoned");
            queue.pending.remove(&handle.id).is_some()
        };
        if removed {
            tracing::trace!(id = handle.id, "timer cancelled");
        }
        removed
    }

    /// Returns the earliest pending deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Time> {
        let mut queue = self.queue.lock().expect("lock poisoned");
        while let Some(&Reverse((deadline, id))) = queue.heap.peek() {
            if queue.pending.contains_key(&id) {
                return Some(deadline);
            }
            queue.heap.pop();
        }
        None
    }

    /// Fires every callback whose deadline has passed.
    ///
    /// Callbacks run outside the queue lock, so they may freely re-enter the
    /// driver. Returns the number of timers fired.
    pub fn process_timers(&self) -> usize {
        let now = self.clock.now();

        let due: Vec<TimerCallback> = {
            let mut queue = self.queue.lock().expect("lock poisoned");
            let mut due = Vec::new();
            while let Some(&Reverse((deadline, id))) = queue.heap.peek() {
                if deadline > now {
                    break;
                }
                queue.heap.pop();
                if let Some(callback) = queue.pending.remove(&id) {
                    due.push(callback);
                }
            }
            due
        };

        let fired = due.len();
        for callback in due {
            callback();
        }
        if fired > 0 {
            tracing::trace!(fired, "timers fired");
        }
        fired
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.lock().expect("lock poisoned").pending.len()
    }

    /// Returns true if there are no pending timers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending_count() == 0
    }

    /// Drops all pending timers without firing them.
    pub fn clear(&self) {
        let mut queue = self.queue.lock().expect("lock poisoned");
        queue.heap.clear();
        queue.pending.clear();
    }
}

impl<T: TimeSource> std::fmt::Debug for TimerDriver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerDriver")
            .field("pending_count", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Process-wide wall-clock timer
// =============================================================================

struct WorkerShared {
    /// Wake-requested flag, set when an earlier deadline may have arrived.
    woken: Mutex<bool>,
    signal: Condvar,
}

/// The process-wide wall-clock timer backing deadline contexts.
///
/// A single worker thread sleeps until the next registered deadline and fires
/// due callbacks; registering an earlier deadline re-arms the wait.
pub(crate) struct WallTimer {
    driver: Arc<TimerDriver<WallClock>>,
    shared: Arc<WorkerShared>,
}

impl WallTimer {
    fn new() -> Self {
        let driver = Arc::new(TimerDriver::with_clock(Arc::new(WallClock::new())));
        let shared = Arc::new(WorkerShared {
            woken: Mutex::new(false),
            signal: Condvar::new(),
        });

        let worker_driver = Arc::clone(&driver);
        let worker_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("cxtree-timer".into())
            .spawn(move || Self::run(&worker_driver, &worker_shared))
            .expect("failed to spawn timer worker thread");

        Self { driver, shared }
    }

    fn run(driver: &TimerDriver<WallClock>, shared: &WorkerShared) {
        loop {
            driver.process_timers();

            // Hold the flag lock from deadline computation through the wait,
            // so a registration in between cannot be missed.
            let mut woken = shared.woken.lock().expect("lock poisoned");
            if !*woken {
                match driver.next_deadline() {
                    Some(deadline) => {
                        let now = driver.now();
                        if deadline > now {
                            let wait = Duration::from_nanos(deadline.duration_since(now));
                            let (guard, _timed_out) = shared
                                .signal
                                .wait_timeout(woken, wait)
                                .expect("lock poisoned");
                            woken = guard;
                        }
                    }
                    None => {
                        woken = shared.signal.wait(woken).expect("lock poisoned");
                    }
                }
            }
            *woken = false;
        }
    }

    pub(crate) fn now(&self) -> Time {
        self.driver.now()
    }

    pub(crate) fn register(
        &self,
        deadline: Time,
        callback: impl FnOnce() + Send + 'static,
    ) -> TimerHandle {
        let handle = self.driver.register(deadline, callback);
        let mut woken = self.shared.woken.lock().expect("lock poisoned");
        *woken = true;
        self.shared.signal.notify_one();
        handle
    }

    pub(crate) fn cancel(&self, handle: &TimerHandle) -> bool {
        self.driver.cancel(handle)
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.driver.pending_count()
    }
}

/// Returns the process-wide wall-clock timer, spawning its worker on first
/// use.
pub(crate) fn wall_timer() -> &'static WallTimer {
    static TIMER: OnceLock<WallTimer> = OnceLock::new();
    TIMER.get_or_init(WallTimer::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use crate::time::VirtualClock;
    use std::sync::atomic::AtomicUsize;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn counting_callback(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn register_and_fire() {
        init_test("register_and_fire");
        let clock = Arc::new(VirtualClock::new());
        let driver = TimerDriver::with_clock(Arc::clone(&clock));
        let fired = Arc::new(AtomicUsize::new(0));

        driver.register(Time::from_secs(1), counting_callback(&fired));
        let processed = driver.process_timers();
        crate::assert_with_log!(processed == 0, "nothing due at t=0", 0usize, processed);

        clock.set(Time::from_secs(2));
        let processed = driver.process_timers();
        crate::assert_with_log!(processed == 1, "one due at t=2", 1usize, processed);
        let count = fired.load(Ordering::SeqCst);
        crate::assert_with_log!(count == 1, "callback ran", 1usize, count);
        crate::assert_with_log!(driver.is_empty(), "driver drained", true, driver.is_empty());
        crate::test_complete!("register_and_fire");
    }

    #[test]
    fn next_deadline_is_earliest() {
        init_test("next_deadline_is_earliest");
        let clock = Arc::new(VirtualClock::new());
        let driver = TimerDriver::with_clock(clock);
        let fired = Arc::new(AtomicUsize::new(0));

        driver.register(Time::from_secs(5), counting_callback(&fired));
        driver.register(Time::from_secs(3), counting_callback(&fired));
        driver.register(Time::from_secs(7), counting_callback(&fired));

        let expected = Some(Time::from_secs(3));
        let actual = driver.next_deadline();
        crate::assert_with_log!(actual == expected, "earliest deadline", expected, actual);
        crate::test_complete!("next_deadline_is_earliest");
    }

    #[test]
    fn cancel_prevents_fire_and_skips_stale_entry() {
        init_test("cancel_prevents_fire_and_skips_stale_entry");
        let clock = Arc::new(VirtualClock::new());
        let driver = TimerDriver::with_clock(Arc::clone(&clock));
        let fired = Arc::new(AtomicUsize::new(0));

        let first = driver.register(Time::from_secs(1), counting_callback(&fired));
        driver.register(Time::from_secs(2), counting_callback(&fired));

        let cancelled = driver.cancel(&first);
        crate::assert_with_log!(cancelled, "cancel pending timer", true, cancelled);
        let again = driver.cancel(&first);
        crate::assert_with_log!(!again, "second cancel is a no-op", false, again);

        // The stale heap entry for `first` is skipped when computing the next
        // deadline and when processing.
        let expected = Some(Time::from_secs(2));
        let actual = driver.next_deadline();
        crate::assert_with_log!(actual == expected, "stale head skipped", expected, actual);

        clock.set(Time::from_secs(3));
        let processed = driver.process_timers();
        crate::assert_with_log!(processed == 1, "only live timer fired", 1usize, processed);
        let count = fired.load(Ordering::SeqCst);
        crate::assert_with_log!(count == 1, "cancelled callback never ran", 1usize, count);
        crate::test_complete!("cancel_prevents_fire_and_skips_stale_entry");
    }

    #[test]
    fn cancel_after_fire_is_noop() {
        init_test("cancel_after_fire_is_noop");
        let clock = Arc::new(VirtualClock::new());
        let driver = TimerDriver::with_clock(Arc::clone(&clock));
        let fired = Arc::new(AtomicUsize::new(0));

        let handle = driver.register(Time::from_secs(1), counting_callback(&fired));
        clock.set(Time::from_secs(1));
        let processed = driver.process_timers();
        crate::assert_with_log!(processed == 1, "fired at deadline", 1usize, processed);

        let cancelled = driver.cancel(&handle);
        crate::assert_with_log!(!cancelled, "cancel after fire", false, cancelled);
        crate::test_complete!("cancel_after_fire_is_noop");
    }

    #[test]
    fn clear_drops_pending_timers() {
        init_test("clear_drops_pending_timers");
        let clock = Arc::new(VirtualClock::new());
        let driver = TimerDriver::with_clock(Arc::clone(&clock));
        let fired = Arc::new(AtomicUsize::new(0));

        driver.register(Time::from_secs(1), counting_callback(&fired));
        driver.register(Time::from_secs(2), counting_callback(&fired));
        crate::assert_with_log!(driver.pending_count() == 2, "two pending", 2usize, driver.pending_count());

        driver.clear();
        crate::assert_with_log!(driver.is_empty(), "cleared", true, driver.is_empty());

        clock.set(Time::from_secs(5));
        let processed = driver.process_timers();
        crate::assert_with_log!(processed == 0, "nothing fires", 0usize, processed);
        let count = fired.load(Ordering::SeqCst);
        crate::assert_with_log!(count == 0, "no callbacks ran", 0usize, count);
        crate::test_complete!("clear_drops_pending_timers");
    }

    #[test]
    fn wall_timer_fires_in_background() {
        init_test("wall_timer_fires_in_background");
        let timer = wall_timer();
        let fired = Arc::new(AtomicUsize::new(0));

        let deadline = timer.now() + Duration::from_millis(20);
        timer.register(deadline, counting_callback(&fired));

        let waited = std::time::Instant::now();
        while fired.load(Ordering::SeqCst) == 0 {
            assert!(
                waited.elapsed() < Duration::from_secs(2),
                "timer did not fire within bound"
            );
            thread::sleep(Duration::from_millis(5));
        }
        crate::test_complete!("wall_timer_fires_in_background");
    }
}
