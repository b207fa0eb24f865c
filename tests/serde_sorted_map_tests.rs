//! Serde round-trip tests for `PersistentSortedMap`.

#![cfg(feature = "serde")]

use arbors::PersistentSortedMap;
use rstest::rstest;

#[rstest]
fn test_serialize_empty_map() {
    let map: PersistentSortedMap<String, i32> = PersistentSortedMap::new();
    let json = serde_json::to_string(&map).expect("serialization succeeds");
    assert_eq!(json, "{}");
}

#[rstest]
fn test_serialize_entries_in_key_order() {
    let map = PersistentSortedMap::new()
        .insert("b".to_string(), 2)
        .insert("a".to_string(), 1)
        .insert("c".to_string(), 3);
    let json = serde_json::to_string(&map).expect("serialization succeeds");
    assert_eq!(json, "{\"a\":1,\"b\":2,\"c\":3}");
}

#[rstest]
fn test_round_trip_preserves_entries() {
    let original = PersistentSortedMap::new()
        .insert("one".to_string(), 1)
        .insert("two".to_string(), 2)
        .insert("three".to_string(), 3);

    let json = serde_json::to_string(&original).expect("serialization succeeds");
    let decoded: PersistentSortedMap<String, i32> =
        serde_json::from_str(&json).expect("deserialization succeeds");

    assert_eq!(original, decoded);
}

#[rstest]
fn test_deserialize_from_json_object() {
    let decoded: PersistentSortedMap<String, i32> =
        serde_json::from_str("{\"z\":26,\"a\":1}").expect("deserialization succeeds");
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded.min(), Some((&"a".to_string(), &1)));
    assert_eq!(decoded.max(), Some((&"z".to_string(), &26)));
}

#[rstest]
fn test_round_trip_with_struct_values() {
    #[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Coordinates {
        x: i32,
        y: i32,
    }

    let original = PersistentSortedMap::new()
        .insert("origin".to_string(), Coordinates { x: 0, y: 0 })
        .insert("unit".to_string(), Coordinates { x: 1, y: 1 });

    let json = serde_json::to_string(&original).expect("serialization succeeds");
    let decoded: PersistentSortedMap<String, Coordinates> =
        serde_json::from_str(&json).expect("deserialization succeeds");

    assert_eq!(original, decoded);
}
