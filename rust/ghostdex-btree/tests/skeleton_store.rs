use std::{collections::BTreeMap, sync::Arc};

use ghostdex_btree::{
    EntriesLayout, PackedEntries, Serializers, SkeletonBTree, SkeletonBTreeSet,
};
use ghostdex_common::Result;
use ghostdex_serial::{
    BatchArchiver, FileArchiver, MemoryArchiver, Packer, ParallelSerializer, Translator, Value,
    translate::{IntValue, StringValue},
};
use ghostdex_workflow::thread_pool::ThreadPool;
use tempfile::TempDir;

/// Word lists as lists of strings.
struct Words;

impl Translator<Vec<String>, Vec<Value>> for Words {
    fn app(&self, words: &Vec<String>) -> Result<Vec<Value>> {
        Ok(words.iter().map(|w| Value::from(w.as_str())).collect())
    }

    fn rev(&self, items: &Vec<Value>) -> Result<Vec<String>> {
        items
            .iter()
            .map(|v| v.as_str("word").map(str::to_string))
            .collect()
    }
}

fn file_store(dir: &TempDir, pool: &ThreadPool) -> Arc<dyn BatchArchiver<Value>> {
    Arc::new(ParallelSerializer::<Value, _>::with_pool(
        FileArchiver::open(dir.path()).unwrap(),
        pool.clone(),
    ))
}

fn serializers(store: Arc<dyn BatchArchiver<Value>>) -> Serializers<String, Vec<String>> {
    let packer = Packer::new(16, store.clone()).unwrap();
    Serializers::new(
        StringValue,
        EntriesLayout::Map,
        store,
        PackedEntries::new(Words, packer),
    )
}

fn words(i: usize) -> Vec<String> {
    (0..i % 23).map(|j| format!("w{i}-{j}")).collect()
}

#[test]
fn test_packed_tree_on_disk() {
    let dir = TempDir::new().unwrap();
    let pool = ThreadPool::new(4);
    let keys: Vec<String> = (0..500).map(|i| format!("term-{i:05}")).collect();
    let values: Vec<Vec<String>> = (0..500).map(words).collect();

    let mut tree =
        SkeletonBTree::build(4, keys.clone(), values.clone(), serializers(file_store(&dir, &pool)))
            .unwrap();
    let saved = tree.save().unwrap();
    assert!(tree.is_bare());
    drop(tree);

    // A fresh process view over the same directory.
    let mut reopened = SkeletonBTree::open(&saved, serializers(file_store(&dir, &pool))).unwrap();
    assert_eq!(reopened.len(), 500);
    assert_eq!(reopened.get(&keys[321]).unwrap(), Some(&words(321)));
    assert_eq!(reopened.get(&"missing".to_string()).unwrap(), None);

    reopened.put("term-00321".to_string(), vec!["changed".to_string()]).unwrap();
    reopened.remove(&keys[0]).unwrap();
    let mut expected: BTreeMap<String, Vec<String>> = keys.into_iter().zip(values).collect();
    expected.insert("term-00321".to_string(), vec!["changed".to_string()]);
    expected.remove("term-00000");

    let got: Vec<(String, Vec<String>)> = reopened
        .iter()
        .unwrap()
        .map(|r| r.map(|(k, v)| (k.clone(), v.clone())))
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(got, expected.into_iter().collect::<Vec<_>>());
    reopened.tree().verify_tree_integrity().unwrap();
}

#[test]
fn test_set_reloads_lazily() {
    let store = Arc::new(MemoryArchiver::new());
    let nodes: Arc<dyn BatchArchiver<Value>> = Arc::new(ParallelSerializer::<Value, _>::with_pool(
        store.clone(),
        ThreadPool::new(2),
    ));
    let mut set = SkeletonBTreeSet::<i64>::build(
        3,
        (0..1000).collect(),
        SkeletonBTreeSet::serializers(IntValue, nodes.clone()),
    )
    .unwrap();
    let saved = set.save().unwrap();
    let stored = store.len();

    let mut reopened =
        SkeletonBTreeSet::<i64>::open(&saved, SkeletonBTreeSet::serializers(IntValue, nodes)).unwrap();
    let pulls = store.pull_count();
    assert!(reopened.contains(&777).unwrap());
    // At most one node per level below the root.
    assert!(store.pull_count() - pulls <= reopened.height() - 1);
    assert!(reopened.tree().node_count() < stored);
    assert_eq!(reopened.first().unwrap(), Some(0));
    assert_eq!(reopened.last().unwrap(), Some(999));
}
