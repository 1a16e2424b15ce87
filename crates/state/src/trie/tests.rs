use super::*;
use arca_storage::MemoryDatabase;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn fresh() -> PatriciaTrie {
    PatriciaTrie::new(Arc::new(MemoryDatabase::new()), TableId::InfoNodes, None)
}

#[test]
fn empty_trie_has_no_root() {
    let trie = fresh();
    assert_eq!(trie.root(), None);
    assert_eq!(trie.get(b"missing").unwrap(), None);
}

#[test]
fn put_then_get() {
    let mut trie = fresh();
    trie.put(b"alpha", b"1".to_vec()).unwrap();
    trie.put(b"beta", b"2".to_vec()).unwrap();
    assert_eq!(trie.get(b"alpha").unwrap(), Some(b"1".to_vec()));
    assert_eq!(trie.get(b"beta").unwrap(), Some(b"2".to_vec()));
    assert_eq!(trie.get(b"gamma").unwrap(), None);
}

#[test]
fn overwrite_replaces_value() {
    let mut trie = fresh();
    trie.put(b"key", b"old".to_vec()).unwrap();
    let root_before = trie.root();
    trie.put(b"key", b"new".to_vec()).unwrap();
    assert_eq!(trie.get(b"key").unwrap(), Some(b"new".to_vec()));
    assert_ne!(trie.root(), root_before);
}

#[test]
fn root_is_insertion_order_independent() {
    let mut a = fresh();
    let mut b = fresh();
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0u8..50)
        .map(|i| (vec![i, i + 1], vec![i; 3]))
        .collect();
    for (k, v) in &entries {
        a.put(k, v.clone()).unwrap();
    }
    for (k, v) in entries.iter().rev() {
        b.put(k, v.clone()).unwrap();
    }
    assert_eq!(a.root(), b.root());
    assert!(a.root().is_some());
}

#[test]
fn drained_nodes_survive_reopen() {
    let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
    let mut trie = PatriciaTrie::new(db.clone(), TableId::ResponseNodes, None);
    for i in 0u8..20 {
        trie.put(&[i], vec![i, i]).unwrap();
    }
    let root = trie.root();
    let mut batch = WriteBatch::new();
    trie.drain_into(&mut batch, 1);
    db.write(batch).unwrap();

    let reopened = PatriciaTrie::new(db, TableId::ResponseNodes, root);
    for i in 0u8..20 {
        assert_eq!(reopened.get(&[i]).unwrap(), Some(vec![i, i]));
    }
}

#[test]
fn gc_keeps_reachable_nodes_and_sweeps_old_garbage() {
    let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
    let mut trie = PatriciaTrie::new(db.clone(), TableId::HistoryNodes, None);

    // Commit 1: two keys.
    trie.put(b"a", b"1".to_vec()).unwrap();
    trie.put(b"b", b"1".to_vec()).unwrap();
    let mut batch = WriteBatch::new();
    trie.drain_into(&mut batch, 1);
    db.write(batch).unwrap();

    // Commit 2: overwrite both, obsoleting the commit-1 top of the trie.
    trie.put(b"a", b"2".to_vec()).unwrap();
    trie.put(b"b", b"2".to_vec()).unwrap();
    let root2 = trie.root().unwrap();
    let mut batch = WriteBatch::new();
    trie.drain_into(&mut batch, 2);
    db.write(batch).unwrap();

    let before = db.scan(TableId::HistoryNodes).unwrap().len();
    let mut batch = WriteBatch::new();
    let swept = trie.garbage_collect(&[root2], 2, &mut batch).unwrap();
    db.write(batch).unwrap();
    let after = db.scan(TableId::HistoryNodes).unwrap().len();

    assert!(swept > 0);
    assert_eq!(after, before - swept);
    // The current state stays fully readable.
    assert_eq!(trie.get(b"a").unwrap(), Some(b"2".to_vec()));
    assert_eq!(trie.get(b"b").unwrap(), Some(b"2".to_vec()));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn behaves_like_a_map(entries in proptest::collection::btree_map(
        proptest::collection::vec(any::<u8>(), 1..16),
        proptest::collection::vec(any::<u8>(), 0..32),
        0..40,
    )) {
        let mut trie = fresh();
        for (k, v) in &entries {
            trie.put(k, v.clone()).unwrap();
        }
        let model: BTreeMap<_, _> = entries;
        for (k, v) in &model {
            prop_assert_eq!(trie.get(k).unwrap(), Some(v.clone()));
        }
    }
}
