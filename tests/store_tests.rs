use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tuplestore::{BincodeEncoder, Collection, KeyMode, Store, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Widget {
    id: u64,
    owner: String,
    tags: Vec<String>,
}

fn widgets(store: &Store, key_mode: KeyMode<Widget>) -> Collection<Widget> {
    store.collection("widgets", Arc::new(BincodeEncoder), key_mode).expect("collection open")
}

#[test]
fn put_get_roundtrip_with_auto_increment_keys() {
    let store = Store::open_mem().unwrap();
    let widgets = widgets(&store, KeyMode::AutoIncrement);

    // Three blind auto-increment puts yield keys (1,), (2,), (3,).
    let k1 = widgets.put(None, &Widget { id: 1, owner: "alice".into(), tags: vec!["red".into()] }, None, true).unwrap();
    let k2 = widgets.put(None, &Widget { id: 2, owner: "bob".into(), tags: vec!["blue".into()] }, None, true).unwrap();
    let k3 = widgets.put(None, &Widget { id: 3, owner: "carol".into(), tags: vec!["green".into()] }, None, true).unwrap();

    assert_eq!(k1, vec![Value::Int(1)]);
    assert_eq!(k2, vec![Value::Int(2)]);
    assert_eq!(k3, vec![Value::Int(3)]);

    let fetched = widgets.get(&k1).unwrap().unwrap();
    assert_eq!(fetched.owner, "alice");
    assert!(widgets.get(&vec![Value::Int(99)]).unwrap().is_none());
}

#[test]
fn ordered_scan_respects_bounds_and_direction() {
    let store = Store::open_mem().unwrap();
    let widgets = widgets(&store, KeyMode::Pure);

    for i in 0..10i64 {
        widgets.put(Some(vec![Value::Int(i)]), &Widget { id: i as u64, owner: format!("u{i}"), tags: vec![] }, None, false).unwrap();
    }

    let forward = widgets.keys(Some(&vec![Value::Int(2)]), Some(&vec![Value::Int(5)]), false, false, None).unwrap();
    assert_eq!(forward, vec![vec![Value::Int(2)], vec![Value::Int(3)], vec![Value::Int(4)]]);

    // Same upper bound, but inclusive this time.
    let forward_inclusive = widgets.keys(Some(&vec![Value::Int(2)]), Some(&vec![Value::Int(5)]), false, true, None).unwrap();
    assert_eq!(forward_inclusive, vec![vec![Value::Int(2)], vec![Value::Int(3)], vec![Value::Int(4)], vec![Value::Int(5)]]);

    let backward = widgets.keys(Some(&vec![Value::Int(5)]), Some(&vec![Value::Int(2)]), true, false, None).unwrap();
    assert_eq!(backward, vec![vec![Value::Int(5)], vec![Value::Int(4)], vec![Value::Int(3)]]);

    let limited = widgets.keys(None, None, false, false, Some(3)).unwrap();
    assert_eq!(limited.len(), 3);
    assert_eq!(limited[0], vec![Value::Int(0)]);

    let all_reverse = widgets.keys(None, None, true, false, None).unwrap();
    assert_eq!(all_reverse.first().unwrap(), &vec![Value::Int(9)]);
    assert_eq!(all_reverse.last().unwrap(), &vec![Value::Int(0)]);

    let prefix_only = widgets.scan_prefix(&vec![Value::Int(4)], false, None).unwrap();
    assert_eq!(prefix_only.into_iter().map(|(k, _)| k).collect::<Vec<_>>(), vec![vec![Value::Int(4)]]);
}

#[test]
fn secondary_index_tracks_mutations() {
    let store = Store::open_mem().unwrap();
    let widgets = widgets(&store, KeyMode::Pure);
    widgets.with_index("by_owner", |w: &Widget| vec![vec![Value::Text(w.owner.clone())]]).unwrap();

    let key = vec![Value::Int(1)];
    widgets.put(Some(key.clone()), &Widget { id: 1, owner: "alice".into(), tags: vec![] }, None, false).unwrap();

    let found = widgets.find("by_owner", &vec![Value::Text("alice".into())]).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].0, key);

    // Changing the owner must move the index entry, not duplicate it.
    widgets.put(Some(key.clone()), &Widget { id: 1, owner: "bob".into(), tags: vec![] }, None, false).unwrap();
    assert!(widgets.find("by_owner", &vec![Value::Text("alice".into())]).unwrap().is_empty());
    assert_eq!(widgets.find("by_owner", &vec![Value::Text("bob".into())]).unwrap().len(), 1);

    widgets.delete(&key).unwrap();
    assert!(widgets.find("by_owner", &vec![Value::Text("bob".into())]).unwrap().is_empty());
}

#[test]
fn index_get_resolves_a_single_match_against_the_collection() {
    let store = Store::open_mem().unwrap();
    let widgets = widgets(&store, KeyMode::Pure);
    widgets.with_index("by_age", |w: &Widget| vec![vec![Value::Int(w.id as i128)]]).unwrap();

    let key = vec![Value::Int(7)];
    widgets.put(Some(key.clone()), &Widget { id: 31, owner: "dave".into(), tags: vec![] }, None, false).unwrap();

    assert!(widgets.get_by_index("by_age", &vec![Value::Int(30)]).unwrap().is_none());
    let (found_key, value) = widgets.get_by_index("by_age", &vec![Value::Int(31)]).unwrap().unwrap();
    assert_eq!(found_key, key);
    assert_eq!(value.owner, "dave");
}

#[test]
fn with_index_backfills_records_already_present_and_is_idempotent() {
    let store = Store::open_mem().unwrap();
    let widgets = widgets(&store, KeyMode::Pure);

    widgets.put(Some(vec![Value::Int(1)]), &Widget { id: 1, owner: "alice".into(), tags: vec![] }, None, false).unwrap();
    widgets.put(Some(vec![Value::Int(2)]), &Widget { id: 2, owner: "bob".into(), tags: vec![] }, None, false).unwrap();

    // Index added after the records already exist must still see them.
    widgets.with_index("by_owner", |w: &Widget| vec![vec![Value::Text(w.owner.clone())]]).unwrap();
    assert_eq!(widgets.find("by_owner", &vec![Value::Text("alice".into())]).unwrap().len(), 1);
    assert_eq!(widgets.find("by_owner", &vec![Value::Text("bob".into())]).unwrap().len(), 1);

    // Registering the same name again is a no-op, not a duplicate backfill.
    widgets.with_index("by_owner", |w: &Widget| vec![vec![Value::Text(w.owner.clone())]]).unwrap();
    assert_eq!(widgets.find("by_owner", &vec![Value::Text("alice".into())]).unwrap().len(), 1);
}

#[test]
fn batch_compaction_is_transparent_to_point_and_range_reads() {
    let store = Store::open_mem().unwrap();
    let widgets = widgets(&store, KeyMode::Pure);

    for i in 0..20i64 {
        widgets.put(Some(vec![Value::Int(i)]), &Widget { id: i as u64, owner: format!("u{i}"), tags: vec![] }, None, false).unwrap();
    }

    let written = widgets.compact(&vec![Value::Int(0)], None, 8, 1 << 20, tuplestore::encoding::PLAIN_ENCODER_ID).unwrap();
    assert!(written > 0);

    // Every record is still independently addressable...
    for i in 0..20i64 {
        let v = widgets.get(&vec![Value::Int(i)]).unwrap().unwrap();
        assert_eq!(v.id, i as u64);
    }

    // ...and a full scan yields exactly the same ordered sequence as before.
    let all = widgets.keys(None, None, false, false, None).unwrap();
    assert_eq!(all.len(), 20);
    assert_eq!(all[0], vec![Value::Int(0)]);
    assert_eq!(all[19], vec![Value::Int(19)]);

    // Mutating a batched record splits it back into singletons transparently.
    widgets.put(Some(vec![Value::Int(3)]), &Widget { id: 99, owner: "updated".into(), tags: vec![] }, None, false).unwrap();
    assert_eq!(widgets.get(&vec![Value::Int(3)]).unwrap().unwrap().owner, "updated");
    assert_eq!(widgets.get(&vec![Value::Int(4)]).unwrap().unwrap().id, 4);
}

#[test]
fn derived_key_mode_rejects_mismatched_explicit_keys_by_default() {
    let store = Store::open_mem().unwrap();
    let widgets: Collection<Widget> = store
        .collection(
            "by_id",
            Arc::new(BincodeEncoder),
            KeyMode::Derived { key_fn: Arc::new(|w: &Widget| vec![Value::Int(w.id as i128)]), derived_keys: false },
        )
        .unwrap();

    let w = Widget { id: 42, owner: "carol".into(), tags: vec![] };
    let key = widgets.put(None, &w, None, false).unwrap();
    assert_eq!(key, vec![Value::Int(42)]);

    // An explicit key matching the derived one is accepted...
    let key2 = widgets.put(Some(vec![Value::Int(42)]), &w, None, false).unwrap();
    assert_eq!(key2, key);

    // ...but one that disagrees with the re-derived key is a key-mismatch.
    let err = widgets.put(Some(vec![Value::Int(1)]), &w, None, false).unwrap_err();
    assert!(matches!(err, tuplestore::Error::KeyMismatch));
}

#[test]
fn derived_keys_flag_relocates_instead_of_rejecting() {
    let store = Store::open_mem().unwrap();
    let widgets: Collection<Widget> = store
        .collection(
            "by_id",
            Arc::new(BincodeEncoder),
            KeyMode::Derived { key_fn: Arc::new(|w: &Widget| vec![Value::Int(w.id as i128)]), derived_keys: true },
        )
        .unwrap();
    widgets.with_index("by_owner", |w: &Widget| vec![vec![Value::Text(w.owner.clone())]]).unwrap();

    // Record starts at its derived key, id 1.
    let old_key = widgets.put(None, &Widget { id: 1, owner: "carol".into(), tags: vec![] }, None, false).unwrap();
    assert_eq!(old_key, vec![Value::Int(1)]);

    // Updating id to 42 while addressing the record at its old key
    // relocates it to the newly-derived key instead of erroring.
    let updated = Widget { id: 42, owner: "carol".into(), tags: vec![] };
    let new_key = widgets.put(Some(old_key.clone()), &updated, None, false).unwrap();
    assert_eq!(new_key, vec![Value::Int(42)]);

    // ...the old key is gone...
    assert!(widgets.get(&old_key).unwrap().is_none());
    // ...the record lives at the derived key...
    assert_eq!(widgets.get(&new_key).unwrap().unwrap().owner, "carol");
    // ...and its index entry moved with it, not duplicated.
    assert_eq!(widgets.find("by_owner", &vec![Value::Text("carol".into())]).unwrap().len(), 1);
}

#[test]
fn named_counters_increment_independently_per_collection() {
    let store = Store::open_mem().unwrap();
    let widgets = widgets(&store, KeyMode::Pure);
    let gadgets: Collection<Widget> = store.collection("gadgets", Arc::new(BincodeEncoder), KeyMode::Pure).unwrap();

    assert_eq!(widgets.count("views", 0, 1).unwrap(), 0);
    assert_eq!(widgets.count("views", 0, 1).unwrap(), 1);
    assert_eq!(gadgets.count("views", 0, 1).unwrap(), 0);
}
