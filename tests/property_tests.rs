use bplusdb::{BPlusTree, Error, Node, NodeEntries, PageId, TreeConfig, PAGE_SIZE};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Operation {
    Insert { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    Get { key: Vec<u8> },
}

fn arb_key() -> impl Strategy<Value = Vec<u8>> {
    // Small alphabet so deletes and overwrites hit existing keys
    prop::collection::vec(b'a'..=b'f', 0..6)
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => (arb_key(), prop::collection::vec(any::<u8>(), 0..400))
            .prop_map(|(key, value)| Operation::Insert { key, value }),
        2 => arb_key().prop_map(|key| Operation::Delete { key }),
        1 => arb_key().prop_map(|key| Operation::Get { key }),
    ]
}

fn arb_leaf() -> impl Strategy<Value = Node> {
    prop::collection::btree_map(
        prop::collection::vec(any::<u8>(), 0..30),
        prop::collection::vec(any::<u8>(), 0..50),
        0..30,
    )
    .prop_map(|map| Node::from_entries(NodeEntries::Leaf(map)))
}

fn arb_internal() -> impl Strategy<Value = Node> {
    prop::collection::btree_map(
        prop::collection::vec(any::<u8>(), 0..40),
        (1u64..1_000_000).prop_map(PageId::new),
        0..60,
    )
    .prop_map(|map| Node::from_entries(NodeEntries::Internal(map)))
}

fn open_tree(dir: &tempfile::TempDir) -> BPlusTree {
    BPlusTree::open_with_config(dir.path().join("prop.db"), TreeConfig::new(4)).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_node_codec_roundtrip(node in prop_oneof![arb_leaf(), arb_internal()]) {
        let mut buf = vec![0u8; PAGE_SIZE];
        let size = node.encode_into(&mut buf).unwrap();
        prop_assert_eq!(size, node.encoded_size());

        let decoded = Node::decode(&buf).unwrap();
        prop_assert_eq!(decoded, node);
    }

    #[test]
    fn prop_tree_matches_btreemap(ops in prop::collection::vec(arb_operation(), 1..150)) {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = open_tree(&dir);
        let mut model = BTreeMap::new();

        for op in ops {
            match op {
                Operation::Insert { key, value } => {
                    tree.insert(&key, &value).unwrap();
                    model.insert(key, value);
                }
                Operation::Delete { key } => {
                    tree.delete(&key).unwrap();
                    model.remove(&key);
                }
                Operation::Get { key } => match model.get(&key) {
                    Some(expected) => prop_assert_eq!(&tree.get(&key).unwrap(), expected),
                    None => prop_assert!(matches!(tree.get(&key), Err(Error::KeyNotFound))),
                },
            }
        }

        let scanned: Vec<(Vec<u8>, Vec<u8>)> = tree.scan().unwrap();
        let expected: Vec<(Vec<u8>, Vec<u8>)> = model.into_iter().collect();
        prop_assert_eq!(scanned, expected);
    }

    #[test]
    fn prop_scan_keys_strictly_increasing(ops in prop::collection::vec(arb_operation(), 1..150)) {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = open_tree(&dir);

        for op in ops {
            match op {
                Operation::Insert { key, value } => tree.insert(&key, &value).unwrap(),
                Operation::Delete { key } => tree.delete(&key).unwrap(),
                Operation::Get { .. } => {}
            }
        }

        let keys: Vec<Vec<u8>> = tree.scan().unwrap().into_iter().map(|(k, _)| k).collect();
        prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn prop_delete_absent_key_is_idempotent(
        entries in prop::collection::btree_map(arb_key(), prop::collection::vec(any::<u8>(), 0..300), 0..60),
        absent in prop::collection::vec(b'g'..=b'z', 1..6),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = open_tree(&dir);
        for (key, value) in &entries {
            tree.insert(key, value).unwrap();
        }

        let before = tree.scan().unwrap();
        tree.delete(&absent).unwrap();
        tree.delete(&absent).unwrap();
        prop_assert_eq!(tree.scan().unwrap(), before);
    }
}
