//! Tests for the keyed object type.

use conflux::Object;
use serde_json::json;

fn obj(pairs: &[(&str, i32)]) -> Object<i32> {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}

#[test]
fn test_concat_prefers_right_hand_values() {
    let left = obj(&[("a", 1), ("b", 2)]);
    let right = obj(&[("b", 20), ("c", 3)]);

    let merged = left.concat(&right);
    assert_eq!(merged, obj(&[("a", 1), ("b", 20), ("c", 3)]));
    // inputs are untouched
    assert_eq!(left, obj(&[("a", 1), ("b", 2)]));
}

#[test]
fn test_clone_is_independent() {
    let original = obj(&[("a", 1)]);
    let mut copy = original.clone();
    copy.insert("a", 5);
    copy.insert("b", 6);
    assert_eq!(original.get("a"), Some(&1));
    assert!(!original.contains_key("b"));
}

#[test]
fn test_compatibility_only_checks_shared_keys() {
    let a = obj(&[("x", 1), ("y", 2)]);
    assert!(a.is_compatible(&obj(&[("y", 2), ("z", 9)])));
    assert!(a.is_compatible(&obj(&[("z", 9)])));
    assert!(a.is_compatible(&Object::new()));

    let conflicting = obj(&[("y", 3)]);
    assert!(!a.is_compatible(&conflicting));
    assert_eq!(a.conflicts_with(&conflicting).map(String::as_str), Some("y"));
}

#[test]
fn test_serializes_as_plain_map() {
    let o = Object::new().with("repo", json!({"ref": "abc"}));
    assert_eq!(serde_json::to_value(&o).unwrap(), json!({"repo": {"ref": "abc"}}));

    let back: Object<serde_json::Value> = serde_json::from_value(json!({"a": 1})).unwrap();
    assert_eq!(back.get("a"), Some(&json!(1)));
}
