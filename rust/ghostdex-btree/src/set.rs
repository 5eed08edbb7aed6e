use std::{fmt, sync::Arc};

use ghostdex_common::Result;
use ghostdex_serial::{BatchArchiver, Translator, Value};

use crate::{
    entries::UnitEntries,
    node::NodeId,
    record::{EntriesLayout, TreeRecord},
    skeleton::{Serializers, SkeletonBTree},
    tree::BTree,
};

/// Ordered set over a skeleton tree. Nodes store their keys as a list.
pub struct SkeletonBTreeSet<K> {
    map: SkeletonBTree<K, ()>,
}

impl<K: Ord + Clone> SkeletonBTreeSet<K> {
    /// Serializers for a set: `List` layout, nothing stored per value.
    pub fn serializers(
        keys: impl Translator<K, Value> + 'static,
        nodes: Arc<dyn BatchArchiver<Value>>,
    ) -> Serializers<K, ()> {
        Serializers::new(keys, EntriesLayout::List, nodes, UnitEntries)
    }

    pub fn new(node_min: usize, serializers: Serializers<K, ()>) -> Result<Self> {
        Ok(SkeletonBTreeSet {
            map: SkeletonBTree::new(node_min, serializers)?,
        })
    }

    /// Bulk-loads from strictly ascending keys.
    pub fn build(node_min: usize, keys: Vec<K>, serializers: Serializers<K, ()>) -> Result<Self> {
        let values = vec![(); keys.len()];
        Ok(SkeletonBTreeSet {
            map: SkeletonBTree::build(node_min, keys, values, serializers)?,
        })
    }

    pub fn from_record(record: &TreeRecord, serializers: Serializers<K, ()>) -> Result<Self> {
        Ok(SkeletonBTreeSet {
            map: SkeletonBTree::from_record(record, serializers)?,
        })
    }

    pub fn open(value: &Value, serializers: Serializers<K, ()>) -> Result<Self> {
        Ok(SkeletonBTreeSet {
            map: SkeletonBTree::open(value, serializers)?,
        })
    }

    /// Returns `true` if the key was not present.
    pub fn insert(&mut self, key: K) -> Result<bool> {
        Ok(self.map.put(key, ())?.is_none())
    }

    /// Returns `true` if the key was present.
    pub fn remove(&mut self, key: &K) -> Result<bool> {
        Ok(self.map.remove(key)?.is_some())
    }

    pub fn contains(&mut self, key: &K) -> Result<bool> {
        self.map.contains_key(key)
    }

    /// All keys in order. Inflates every node.
    pub fn to_vec(&mut self) -> Result<Vec<K>> {
        self.map.keys()?.map(|k| k.cloned()).collect()
    }

    pub fn first(&mut self) -> Result<Option<K>> {
        self.map.first_key()
    }

    pub fn last(&mut self) -> Result<Option<K>> {
        self.map.last_key()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn node_min(&self) -> usize {
        self.map.node_min()
    }

    pub fn height(&self) -> usize {
        self.map.height()
    }

    pub fn root(&self) -> NodeId {
        self.map.root()
    }

    pub fn tree(&self) -> &BTree<K, ()> {
        self.map.tree()
    }

    pub fn is_live(&self) -> bool {
        self.map.is_live()
    }

    pub fn is_bare(&self) -> bool {
        self.map.is_bare()
    }

    pub fn deflate(&mut self) -> Result<()> {
        self.map.deflate()
    }

    pub fn inflate(&mut self) -> Result<()> {
        self.map.inflate()
    }

    pub fn to_record(&self) -> Result<TreeRecord> {
        self.map.to_record()
    }

    pub fn save(&mut self) -> Result<Value> {
        self.map.save()
    }
}

impl<K: fmt::Debug> fmt::Debug for SkeletonBTreeSet<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SkeletonBTreeSet").field(&self.map).finish()
    }
}

#[cfg(test)]
mod tests {
    use ghostdex_serial::{MemoryArchiver, Sequential, translate::IntValue};

    use super::*;

    fn serializers(store: &Arc<MemoryArchiver>) -> Serializers<i64, ()> {
        SkeletonBTreeSet::serializers(IntValue, Arc::new(Sequential(store.clone())))
    }

    #[test]
    fn test_set_operations() {
        let store = Arc::new(MemoryArchiver::new());
        let mut set = SkeletonBTreeSet::new(2, serializers(&store)).unwrap();
        for k in [5, 1, 9, 3, 7, 5] {
            set.insert(k).unwrap();
        }
        assert_eq!(set.len(), 5);
        assert!(!set.insert(3).unwrap());
        assert!(set.contains(&9).unwrap());
        assert!(set.remove(&9).unwrap());
        assert!(!set.remove(&9).unwrap());
        assert_eq!(set.to_vec().unwrap(), vec![1, 3, 5, 7]);
    }

    #[test]
    fn test_set_keys_stored_as_list() {
        let store = Arc::new(MemoryArchiver::new());
        let mut set = SkeletonBTreeSet::build(2, (0..40).collect(), serializers(&store)).unwrap();
        set.deflate().unwrap();
        let record = set.to_record().unwrap();
        assert!(record.root.entries.iter().all(|(k, m)| k.as_int("key").is_ok() && m.is_null()));
        assert_eq!(record.root.subnodes.as_ref().unwrap().len(), record.root.entries.len() + 1);

        let saved = set.save().unwrap();
        let mut reopened = SkeletonBTreeSet::open(&saved, serializers(&store)).unwrap();
        assert!(reopened.contains(&17).unwrap());
        assert!(!reopened.contains(&40).unwrap());
        assert!(!reopened.insert(17).unwrap());
        assert!(reopened.insert(40).unwrap());
        assert!(reopened.remove(&0).unwrap());
        assert_eq!(reopened.to_vec().unwrap(), (1..=40).collect::<Vec<_>>());
        reopened.tree().verify_tree_integrity().unwrap();
    }
}
