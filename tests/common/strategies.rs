use proptest::prelude::*;
use serde_json::{Map, Value};

/// Strategy for generating logical cache keys (no glob metacharacters)
pub fn cache_key_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_:/.-]{0,48}"
}

/// Strategy for generating tag names
pub fn tag_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_:]{0,24}"
}

/// Strategy for generating arbitrary JSON documents, nested a few levels deep
pub fn json_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        // Quarter steps stay exact through text round-trips
        (-1_000_000i32..1_000_000).prop_map(|n| Value::from(f64::from(n) / 4.0)),
        ".{0,64}".prop_map(Value::String),
    ];

    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..8)
                .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// Strategy for generating documents large enough to cross a 1 KiB threshold
pub fn large_document_strategy() -> impl Strategy<Value = Value> {
    prop::collection::vec("[a-z ]{16,64}", 32..64).prop_map(|lines| {
        serde_json::json!({
            "kind": "report",
            "lines": lines,
        })
    })
}
