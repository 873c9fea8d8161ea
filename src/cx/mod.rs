//! The context tree.
//!
//! A context is a node in a tree that carries three things toward the work
//! running under it: an optional deadline, an observable cancellation signal,
//! and request-scoped key/value bindings. Four node shapes exist:
//!
//! - **Leaf**: the root of every tree; never cancelable, binds nothing.
//!   Obtained from [`background`] or [`todo`].
//! - **Value binding**: an immutable wrapper adding exactly one key/value
//!   pair; built with [`with_value`]. Lookups walk upward, nearest binder
//!   wins.
//! - **Cancelable**: a mutable node that can transition once to a terminal
//!   cancelled state and cascades that transition to every tracked
//!   descendant; built with [`with_cancel`].
//! - **Deadline**: a cancelable node with a fixed expiry time and an armed
//!   one-shot timer; built with [`with_deadline`] or [`with_timeout`].
//!
//! Cancellation flows strictly downward, value lookup strictly upward, and
//! detachment of a cancelled subtree is a single mutation on the parent's
//! child set. The first cancellation wins; every later attempt is a no-op.
//!
//! # Custom implementations
//!
//! [`Context`] can be implemented outside this crate. A custom
//! implementation that reports a cancellation signal but does not surface a
//! native cancelable core is still linked correctly: a background waiter
//! mirrors cancellation across the foreign edge (see [`waiter_counts`]).

use core::fmt;
use std::any::Any;
use std::sync::{Arc, OnceLock};

use crate::error::Error;
use crate::signal::CancelSignal;
use crate::time::Time;

mod cancel;
mod deadline;
mod propagate;
mod value;

pub use cancel::{with_cancel, CancelCore, CancelHandle};
pub use deadline::{with_deadline, with_timeout};
pub use propagate::waiter_counts;
pub use value::with_value;

/// A value bound into the tree, shared by every reader on the path below the
/// binder.
pub type Value = Arc<dyn Any + Send + Sync>;

/// A shared handle to a context node.
pub type ContextRef = Arc<dyn Context>;

/// A lookup key for value bindings.
///
/// Blanket-implemented for every `T: Any + PartialEq + Send + Sync + Debug`,
/// so any equality-comparable type works as a key. Keys of different types
/// never compare equal; libraries should use private key types to avoid
/// collisions rather than bare strings or integers.
pub trait Key: Any + Send + Sync + fmt::Debug {
    /// Returns true if `other` is a key of the same type with an equal value.
    fn eq_key(&self, other: &dyn Key) -> bool;

    /// Upcast used by the blanket equality check.
    fn as_any(&self) -> &dyn Any;
}

impl<T> Key for T
where
    T: Any + PartialEq + Send + Sync + fmt::Debug,
{
    fn eq_key(&self, other: &dyn Key) -> bool {
        other.as_any().downcast_ref::<T>().is_some_and(|other| other == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A node in the cancellation/value tree.
///
/// All four accessors are idempotent: repeated calls return the same result
/// until the node's state changes, and a cancelled node's answers are final.
pub trait Context: fmt::Debug + Send + Sync {
    /// Returns the effective deadline, if any ancestor (or this node) set
    /// one.
    fn deadline(&self) -> Option<Time>;

    /// Returns the cancellation signal, or `None` if this context can never
    /// be cancelled.
    ///
    /// The handle is created lazily on first request, exactly once, and is
    /// stable for the node's lifetime.
    fn signal(&self) -> Option<Arc<CancelSignal>>;

    /// Returns the terminal cancellation cause, or `None` while live.
    fn error(&self) -> Option<Error>;

    /// Resolves a value bound anywhere on the path from this node to the
    /// root; `None` if no ancestor bound the key.
    fn value(&self, key: &dyn Key) -> Option<Value>;

    /// Surfaces the nearest native cancelable core, walking parent
    /// references.
    ///
    /// The default answer is "not cancelable", which routes linking through
    /// the fallback waiter. Implementations that wrap another context may
    /// delegate to it.
    fn cancelable(&self) -> Option<Arc<CancelCore>> {
        None
    }
}

/// A terminal, never-cancelable context.
struct LeafCx {
    name: &'static str,
}

impl fmt::Debug for LeafCx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context::{}", self.name)
    }
}

impl Context for LeafCx {
    fn deadline(&self) -> Option<Time> {
        None
    }

    fn signal(&self) -> Option<Arc<CancelSignal>> {
        None
    }

    fn error(&self) -> Option<Error> {
        None
    }

    fn value(&self, _key: &dyn Key) -> Option<Value> {
        None
    }
}

/// Returns the root context for top-level work.
///
/// Never cancelable, no deadline, binds nothing.
#[must_use]
pub fn background() -> ContextRef {
    static BACKGROUND: OnceLock<ContextRef> = OnceLock::new();
    Arc::clone(BACKGROUND.get_or_init(|| Arc::new(LeafCx { name: "background" })))
}

/// Returns a placeholder root for call sites that have not yet been plumbed
/// to a real context.
///
/// Behaves identically to [`background`]; the distinct name exists so the
/// placeholder shows up in debug output and is easy to grep for.
#[must_use]
pub fn todo() -> ContextRef {
    static TODO: OnceLock<ContextRef> = OnceLock::new();
    Arc::clone(TODO.get_or_init(|| Arc::new(LeafCx { name: "todo" })))
}
