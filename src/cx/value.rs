//! Value-binding context nodes.

use core::fmt;
use std::any::Any;
use std::sync::Arc;

use crate::error::Error;
use crate::signal::CancelSignal;
use crate::time::Time;

use super::cancel::CancelCore;
use super::{Context, ContextRef, Key, Value};

/// An immutable `(parent, key, value)` triple.
///
/// Everything except the lookup delegates to the parent, so deadlines,
/// signals, and the capability walk pass transparently through value nodes.
/// No locking: the node never mutates after construction.
struct ValueCx {
    parent: ContextRef,
    key: Box<dyn Key>,
    value: Value,
}

impl fmt::Debug for ValueCx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCx")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Context for ValueCx {
    fn deadline(&self) -> Option<Time> {
        self.parent.deadline()
    }

    fn signal(&self) -> Option<Arc<CancelSignal>> {
        self.parent.signal()
    }

    fn error(&self) -> Option<Error> {
        self.parent.error()
    }

    fn value(&self, key: &dyn Key) -> Option<Value> {
        if self.key.eq_key(key) {
            return Some(Arc::clone(&self.value));
        }
        self.parent.value(key)
    }

    fn cancelable(&self) -> Option<Arc<CancelCore>> {
        self.parent.cancelable()
    }
}

/// Creates a child of `parent` that binds `key` to `value`.
///
/// Lookups from the new node (or below) resolve `key` to `value` unless a
/// deeper node rebinds it; the parent's bindings are otherwise unaffected —
/// a parent can never observe a child's bindings. The key type must be
/// equality-comparable, which the `Key` bound enforces at compile time.
#[must_use]
pub fn with_value<K, V>(parent: &ContextRef, key: K, value: V) -> ContextRef
where
    K: Key,
    V: Any + Send + Sync,
{
    Arc::new(ValueCx {
        parent: Arc::clone(parent),
        key: Box::new(key),
        value: Arc::new(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cx::{background, with_cancel};
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn lookup_u32(cx: &ContextRef, key: &dyn Key) -> Option<u32> {
        cx.value(key)
            .and_then(|v| v.downcast::<u32>().ok())
            .map(|v| *v)
    }

    #[test]
    fn nearest_binder_wins() {
        init_test("nearest_binder_wins");
        let root = background();
        let outer = with_value(&root, "n", 1_u32);
        let inner = with_value(&outer, "n", 2_u32);

        assert_eq!(lookup_u32(&outer, &"n"), Some(1));
        assert_eq!(lookup_u32(&inner, &"n"), Some(2));
        crate::test_complete!("nearest_binder_wins");
    }

    #[test]
    fn lookup_walks_to_the_root() {
        init_test("lookup_walks_to_the_root");
        let root = background();
        let a = with_value(&root, "a", 1_u32);
        let b = with_value(&a, "b", 2_u32);
        let c = with_value(&b, "c", 3_u32);

        assert_eq!(lookup_u32(&c, &"a"), Some(1));
        assert_eq!(lookup_u32(&c, &"b"), Some(2));
        assert_eq!(lookup_u32(&c, &"c"), Some(3));
        assert!(c.value(&"missing").is_none());

        // Bindings are invisible to ancestors.
        assert!(a.value(&"b").is_none());
        crate::test_complete!("lookup_walks_to_the_root");
    }

    #[test]
    fn keys_of_different_types_do_not_collide() {
        init_test("keys_of_different_types_do_not_collide");
        #[derive(Debug, PartialEq)]
        struct Tenant;

        let root = background();
        let cx = with_value(&root, Tenant, 7_u32);
        let cx = with_value(&cx, "Tenant", 8_u32);

        assert_eq!(lookup_u32(&cx, &Tenant), Some(7));
        assert_eq!(lookup_u32(&cx, &"Tenant"), Some(8));
        crate::test_complete!("keys_of_different_types_do_not_collide");
    }

    #[test]
    fn cancellation_state_passes_through() {
        init_test("cancellation_state_passes_through");
        let root = background();
        let (scope, cancel) = with_cancel(&root);
        let bound = with_value(&scope, "k", 1_u32);

        let scope_signal = scope.signal().expect("signal");
        let bound_signal = bound.signal().expect("signal");
        assert!(Arc::ptr_eq(&scope_signal, &bound_signal));
        assert!(bound.error().is_none());

        cancel.cancel();
        assert!(bound.error().expect("inherited").is_cancelled());
        assert!(bound_signal.is_set());
        crate::test_complete!("cancellation_state_passes_through");
    }
}
