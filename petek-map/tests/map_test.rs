//! Single-threaded semantics.

use petek_map::RcuMap;

#[test]
fn smoke() {
    let map = RcuMap::new(8);
    assert!(map.insert(1, 10));
    assert!(map.insert(2, 20));
    assert!(map.insert(3, 30));

    assert_eq!(map.get(&2), Some(20));
    assert!(map.remove(&2));
    assert_eq!(map.get(&2), None);
    assert!(map.insert(2, 21));
    assert_eq!(map.get(&2), Some(21));
}

#[test]
fn duplicate_rejection() {
    let map = RcuMap::new(8);
    assert!(map.insert(7, 1));
    assert!(!map.insert(7, 2));
    assert_eq!(map.get(&7), Some(1));
}

#[test]
fn insert_remove_lookup_round_trip() {
    let map = RcuMap::new(4);
    for key in 0..64 {
        assert!(map.insert(key, key * 3));
        assert!(map.remove(&key));
        assert_eq!(map.get(&key), None);
    }
}

#[test]
fn absent_key_operations_are_total() {
    let map: RcuMap<u64, u64> = RcuMap::new(4);
    assert_eq!(map.get(&99), None);
    assert!(!map.remove(&99));
    assert!(!map.contains_key(&99));
}

#[test]
fn len_tracks_successful_operations() {
    let map = RcuMap::new(8);
    assert!(map.is_empty());

    for key in 0..10 {
        assert!(map.insert(key, key));
    }
    assert_eq!(map.len(), 10);

    assert!(!map.insert(3, 0)); // duplicate, no change
    assert_eq!(map.len(), 10);

    for key in 0..5 {
        assert!(map.remove(&key));
    }
    assert!(!map.remove(&0)); // double remove, no change
    assert_eq!(map.len(), 5);
}

#[test]
fn clear_discards_everything() {
    let map = RcuMap::new(8);
    for key in 0..50 {
        map.insert(key, key);
    }
    map.clear();
    assert!(map.is_empty());
    for key in 0..50 {
        assert_eq!(map.get(&key), None);
    }
    // The map stays usable.
    assert!(map.insert(1, 1));
    assert_eq!(map.get(&1), Some(1));
}

#[test]
fn string_keys_via_borrow() {
    let map: RcuMap<String, Vec<u8>> = RcuMap::new(8);
    assert!(map.insert("comb".to_string(), vec![1, 2, 3]));
    assert_eq!(map.get("comb"), Some(vec![1, 2, 3]));
    assert!(map.contains_key("comb"));
    assert!(map.remove("comb"));
    assert_eq!(map.get("comb"), None);
}

#[test]
fn iteration_yields_every_entry() {
    let map = RcuMap::new(8);
    for key in 0u64..100 {
        map.insert(key, key * 2);
    }

    let mut entries: Vec<(u64, u64)> = map.iter().collect();
    entries.sort_unstable();
    assert_eq!(entries.len(), 100);
    for (i, (key, value)) in entries.into_iter().enumerate() {
        assert_eq!(key, i as u64);
        assert_eq!(value, key * 2);
    }

    let mut keys: Vec<u64> = map.keys().collect();
    keys.sort_unstable();
    assert_eq!(keys, (0..100).collect::<Vec<_>>());
}

#[test]
fn lookup_is_get() {
    let map = RcuMap::new(4);
    map.insert(5, 50);
    assert_eq!(map.lookup(&5), map.get(&5));
}
