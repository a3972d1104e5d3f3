//! Assertion functions for stream and pipeline outputs.

use crate::object::Object;
use crate::resource::ResourceVersion;
use serde_json::Value;
use std::fmt::Debug;

/// Assert that two collections are equal in order and content.
///
/// # Panics
///
/// Panics if the collections differ in length or content.
///
/// # Example
///
/// ```
/// use conflux::testing::assert_collections_equal;
///
/// assert_collections_equal(&[1, 2, 3], &[1, 2, 3]);
/// ```
pub fn assert_collections_equal<T: Debug + PartialEq>(actual: &[T], expected: &[T]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Collection length mismatch:\n  Expected length: {}\n  Actual length: {}\n  Expected: {expected:?}\n  Actual: {actual:?}",
        expected.len(),
        actual.len()
    );

    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert_eq!(
            a, e,
            "Collection mismatch at index {i}:\n  Expected: {e:?}\n  Actual: {a:?}\n  Full expected: {expected:?}\n  Full actual: {actual:?}"
        );
    }
}

/// Assert that every element matches `predicate`.
///
/// # Panics
///
/// Panics with the first failing element.
pub fn assert_all<T: Debug>(collection: &[T], predicate: impl Fn(&T) -> bool) {
    if let Some((i, item)) = collection.iter().enumerate().find(|(_, item)| !predicate(item)) {
        panic!("Element at index {i} does not satisfy predicate: {item:?}\n  Full collection: {collection:?}");
    }
}

/// Assert that `object` has exactly the keys in `expected`.
///
/// # Panics
///
/// Panics if any key is missing or unexpected.
pub fn assert_keys<T: Debug>(object: &Object<T>, expected: &[&str]) {
    let mut actual: Vec<&str> = object.keys().map(String::as_str).collect();
    let mut expected = expected.to_vec();
    actual.sort_unstable();
    expected.sort_unstable();
    assert_eq!(actual, expected, "Key mismatch in {object:?}");
}

/// Assert that a tuple binds each input name to the `{"v": n}` version given.
///
/// # Panics
///
/// Panics if the tuple has other keys or any version differs.
pub fn assert_tuple_versions(tuple: &Object<ResourceVersion>, expected: &[(&str, i64)]) {
    let names: Vec<&str> = expected.iter().map(|(name, _)| *name).collect();
    assert_keys(tuple, &names);
    for (name, v) in expected {
        let actual = tuple.get(name).map(|rv| &rv.version["v"]);
        assert_eq!(
            actual,
            Some(&Value::from(*v)),
            "Version mismatch for input {name}:\n  Tuple: {tuple:?}"
        );
    }
}

/// Assert that no object in `sequence` drops a key that an earlier one had.
///
/// # Panics
///
/// Panics at the first object missing a previously seen key.
pub fn assert_keys_never_removed<T: Debug>(sequence: &[Object<T>]) {
    for (i, pair) in sequence.windows(2).enumerate() {
        if let Some(missing) = pair[0].keys().find(|k| !pair[1].contains_key(k)) {
            panic!(
                "Key {missing:?} removed at index {}:\n  Before: {:?}\n  After: {:?}",
                i + 1,
                pair[0],
                pair[1]
            );
        }
    }
}
