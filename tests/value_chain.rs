//! Value-binding chain behavior over deep trees.

mod common;

use std::collections::HashMap;

use proptest::prelude::*;

use cxtree::{background, with_value, Context, ContextRef};

use common::init_test;

fn lookup_u64(cx: &ContextRef, key: &u32) -> Option<u64> {
    cx.value(key)
        .and_then(|v| v.downcast::<u64>().ok())
        .map(|v| *v)
}

#[test]
fn thousand_bindings_resolve_from_the_deepest_node() {
    init_test("thousand_bindings_resolve_from_the_deepest_node");

    let mut cx = background();
    for i in 0..1000_u32 {
        cx = with_value(&cx, i, u64::from(i) * 3);
    }

    for i in (0..1000_u32).step_by(97) {
        assert_eq!(lookup_u64(&cx, &i), Some(u64::from(i) * 3));
    }
    assert_eq!(lookup_u64(&cx, &0), Some(0));
    assert_eq!(lookup_u64(&cx, &999), Some(2997));
    assert_eq!(lookup_u64(&cx, &1000), None);
    cxtree::test_complete!("thousand_bindings_resolve_from_the_deepest_node");
}

proptest! {
    /// The deepest binder of a key wins, and unbound keys resolve to nothing,
    /// for arbitrary chains with rebinding.
    #[test]
    fn deepest_binder_wins(bindings in prop::collection::vec((0_u32..16, any::<u64>()), 0..64)) {
        let mut cx = background();
        let mut model: HashMap<u32, u64> = HashMap::new();
        for (key, value) in &bindings {
            cx = with_value(&cx, *key, *value);
            model.insert(*key, *value);
        }

        for key in 0_u32..16 {
            prop_assert_eq!(lookup_u64(&cx, &key), model.get(&key).copied());
        }
        prop_assert_eq!(lookup_u64(&cx, &999), None);
    }
}
