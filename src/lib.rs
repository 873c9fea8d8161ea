//! Cxtree: hierarchical cancellation and scoped-value propagation.
//!
//! # Overview
//!
//! Cxtree provides a tree of context nodes used to carry deadlines,
//! cancellation signals, and request-scoped key/value bindings down through a
//! graph of concurrently executing tasks. Cancelling any node — explicitly or
//! through deadline expiry — cancels every descendant exactly once, with the
//! originating cause visible at each node.
//!
//! # Core Guarantees
//!
//! - **Exactly-once delivery**: the first cancellation wins; every later
//!   attempt, from any source, is a race-free no-op
//! - **Atomic cascade**: no observer can see a node cancelled while one of
//!   its tracked descendants is still live
//! - **No orphan edges**: cancelled subtrees detach from their parents, and
//!   fallback waiters for foreign parent implementations always terminate
//! - **Upward value lookup**: the nearest binder on the path to the root
//!   wins; bindings are immutable and safe for unsynchronized reads
//!
//! # Module Structure
//!
//! - [`cx`]: The context tree — leaves, value bindings, cancelable and
//!   deadline nodes, and the propagation/cancellation algorithms
//! - [`signal`]: The one-shot, permanently-latching cancellation signal
//! - [`time`]: Time points, clocks, and the one-shot timer driver
//! - [`error`]: Terminal cancellation causes and their classification
//! - [`test_utils`]: Shared logging and assertion helpers for tests
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use cxtree::Context;
//!
//! let root = cxtree::background();
//! let (scope, cancel) = cxtree::with_cancel(&root);
//! let scope = cxtree::with_value(&scope, "request-id", 7_u64);
//! let (work, done) = cxtree::with_timeout(&scope, Duration::from_secs(5));
//!
//! assert!(work.error().is_none());
//! cancel.cancel();
//! assert!(work.error().is_some_and(|e| e.is_cancelled()));
//! # done.cancel();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod cx;
pub mod error;
pub mod signal;
pub mod test_utils;
pub mod time;

// Re-exports for convenient access to core types
pub use cx::{
    background, todo, waiter_counts, with_cancel, with_deadline, with_timeout, with_value,
    CancelHandle, Context, ContextRef, Key, Value,
};
pub use error::{Error, ErrorKind, Recoverability, Result};
pub use signal::CancelSignal;
pub use time::{now, Time, TimeSource, TimerDriver, TimerHandle, VirtualClock, WallClock};
