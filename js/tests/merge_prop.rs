//! Property tests for the config deep-merge

use jobstore::deep_merge;
use proptest::prelude::*;
use serde_json::{Value, json};

/// Small JSON values: scalars, arrays of scalars, and one level of nesting
fn json_value() -> impl Strategy<Value = Value> {
    let scalar = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
    ];
    let array = prop::collection::vec(scalar.clone(), 0..4).prop_map(Value::from);
    let leaf = prop_oneof![scalar, array];
    prop::collection::hash_map("[a-z]{1,5}", leaf, 0..5).prop_map(|m| json!(m))
}

proptest! {
    /// Merging a patch into itself changes nothing
    #[test]
    fn merge_is_idempotent(value in json_value()) {
        let mut once = value.clone();
        deep_merge(&mut once, &value);
        prop_assert_eq!(&once, &value);
    }

    /// The patch's keys always win at the top level
    #[test]
    fn patch_keys_win(base in json_value(), patch in json_value()) {
        let mut merged = base.clone();
        deep_merge(&mut merged, &patch);

        let (Value::Object(merged_map), Value::Object(patch_map)) = (&merged, &patch) else {
            return Ok(());
        };
        for (key, patch_value) in patch_map {
            if !patch_value.is_object() {
                prop_assert_eq!(merged_map.get(key), Some(patch_value));
            }
        }
    }

    /// Keys absent from the patch survive untouched
    #[test]
    fn base_keys_survive(base in json_value(), patch in json_value()) {
        let mut merged = base.clone();
        deep_merge(&mut merged, &patch);

        let (Value::Object(merged_map), Value::Object(base_map), Value::Object(patch_map)) =
            (&merged, &base, &patch)
        else {
            return Ok(());
        };
        for (key, base_value) in base_map {
            if !patch_map.contains_key(key) {
                prop_assert_eq!(merged_map.get(key), Some(base_value));
            }
        }
    }

    /// Arrays replace entirely, never element-merge
    #[test]
    fn arrays_replace(base_items in prop::collection::vec(any::<i32>(), 0..6),
                      patch_items in prop::collection::vec(any::<i32>(), 0..6)) {
        let mut merged = json!({"list": base_items});
        deep_merge(&mut merged, &json!({"list": patch_items.clone()}));
        prop_assert_eq!(&merged["list"], &json!(patch_items));
    }
}
