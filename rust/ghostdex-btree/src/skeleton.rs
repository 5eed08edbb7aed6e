//! A B-tree whose nodes and values are materialized on demand.
//!
//! Any node below the root can be swapped out to a store (deflated) and left
//! behind as a ghost that keeps only its bounds and the reference it was
//! stored under. Values are swapped out separately, through an
//! [`EntrySerializer`], and leave a per-value meta behind.
//!
//! `get`, `put` and `remove` run the plain tree operation; when it stops at a
//! ghost or an unloaded value, the missing piece is inflated and the
//! operation restarts from the root.

use std::{cmp::Ordering, fmt, sync::Arc};

use ghostdex_common::{
    Result,
    error::{Error, Unloaded},
    verify_data,
};
use ghostdex_serial::{
    BatchArchiver, CompositeSerializer, PullTask, PushTask, Translator, Value, codec,
};

use crate::{
    entries::EntrySerializer,
    node::{Entry, LiveNode, Node, NodeId, NodeState, Slot},
    order::KeyOrder,
    record::{EntriesLayout, NodeRecord, NodeTranslator, TreeRecord, TreeTranslator},
    tree::{BTree, Iter, Keys},
};

/// Everything a skeleton tree needs to move its parts to and from a store.
pub struct Serializers<K, V> {
    /// Translates keys for node records. With the `Map` layout every key
    /// must translate to a string.
    pub keys: Arc<dyn Translator<K, Value>>,
    pub layout: EntriesLayout,
    /// Stores node records.
    pub nodes: Arc<dyn BatchArchiver<Value>>,
    pub entries: Arc<dyn EntrySerializer<V>>,
}

impl<K, V> Serializers<K, V> {
    pub fn new(
        keys: impl Translator<K, Value> + 'static,
        layout: EntriesLayout,
        nodes: Arc<dyn BatchArchiver<Value>>,
        entries: impl EntrySerializer<V> + 'static,
    ) -> Self {
        Serializers {
            keys: Arc::new(keys),
            layout,
            nodes,
            entries: Arc::new(entries),
        }
    }
}

impl<K, V> Clone for Serializers<K, V> {
    fn clone(&self) -> Self {
        Serializers {
            keys: self.keys.clone(),
            layout: self.layout,
            nodes: self.nodes.clone(),
            entries: self.entries.clone(),
        }
    }
}

impl<K, V> fmt::Debug for Serializers<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializers")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

/// Node records to and from the node store.
type NodeStore =
    CompositeSerializer<NodeRecord, Value, NodeTranslator, Arc<dyn BatchArchiver<Value>>>;

pub struct SkeletonBTree<K, V> {
    tree: BTree<K, V>,
    serializers: Serializers<K, V>,
}

impl<K, V> SkeletonBTree<K, V>
where
    K: Ord + Clone,
{
    pub fn new(node_min: usize, serializers: Serializers<K, V>) -> Result<Self> {
        Ok(Self::with_tree(BTree::new(node_min)?, serializers))
    }

    pub fn with_order(
        node_min: usize,
        order: KeyOrder<K>,
        serializers: Serializers<K, V>,
    ) -> Result<Self> {
        Ok(Self::with_tree(BTree::with_order(node_min, order)?, serializers))
    }

    /// Wraps a tree, typically a freshly built one.
    pub fn with_tree(tree: BTree<K, V>, serializers: Serializers<K, V>) -> Self {
        SkeletonBTree { tree, serializers }
    }

    /// Bulk-loads from strictly ascending keys; see [`BTree::build`].
    pub fn build(
        node_min: usize,
        keys: Vec<K>,
        values: Vec<V>,
        serializers: Serializers<K, V>,
    ) -> Result<Self> {
        Ok(Self::with_tree(BTree::build(node_min, keys, values)?, serializers))
    }

    /// Reconstructs a tree from its record. Only the root is materialized;
    /// its children are ghosts and its values are unloaded.
    pub fn from_record(record: &TreeRecord, serializers: Serializers<K, V>) -> Result<Self> {
        Self::from_record_with_order(record, KeyOrder::natural(), serializers)
    }

    pub fn from_record_with_order(
        record: &TreeRecord,
        order: KeyOrder<K>,
        serializers: Serializers<K, V>,
    ) -> Result<Self> {
        let mut skeleton = Self::with_tree(BTree::with_order(record.node_min, order)?, serializers);
        let root = skeleton.tree.root;
        skeleton.materialize(root, &record.root)?;
        skeleton.tree.size = record.size;
        skeleton.tree.height = record.height;
        Ok(skeleton)
    }

    /// Loads a tree from the value form of its record.
    pub fn open(value: &Value, serializers: Serializers<K, V>) -> Result<Self> {
        let record = TreeTranslator::new(serializers.layout).rev(value)?;
        Self::from_record(&record, serializers)
    }

    pub fn tree(&self) -> &BTree<K, V> {
        &self.tree
    }

    pub fn serializers(&self) -> &Serializers<K, V> {
        &self.serializers
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn node_min(&self) -> usize {
        self.tree.node_min()
    }

    pub fn height(&self) -> usize {
        self.tree.height()
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn is_live(&self) -> bool {
        self.tree.is_live()
    }

    pub fn is_bare(&self) -> bool {
        self.tree.is_bare()
    }

    pub fn get(&mut self, key: &K) -> Result<Option<&V>> {
        match self.resolve(|tree| tree.find(key))? {
            Some((node, i)) => Ok(self.tree.live(node)?.entries[i].slot.loaded()),
            None => Ok(None),
        }
    }

    pub fn get_mut(&mut self, key: &K) -> Result<Option<&mut V>> {
        match self.resolve(|tree| tree.find(key))? {
            Some((node, i)) => match &mut self.tree.live_mut(node)?.entries[i].slot {
                Slot::Loaded(value) => Ok(Some(value)),
                Slot::Unloaded(_) => Err(Error::invalid_operation("value unloaded after lookup")),
            },
            None => Ok(None),
        }
    }

    /// Inserts or replaces; returns the previous value.
    pub fn put(&mut self, key: K, value: V) -> Result<Option<V>> {
        let mut value = Some(value);
        self.resolve(|tree| tree.try_put(&key, &mut value))
    }

    pub fn remove(&mut self, key: &K) -> Result<Option<V>> {
        self.resolve(|tree| tree.try_remove(key))
    }

    /// Does not load the key's value.
    pub fn contains_key(&mut self, key: &K) -> Result<bool> {
        self.resolve(|tree| Ok(tree.locate(key)?.is_some()))
    }

    pub fn first_key(&mut self) -> Result<Option<K>> {
        self.resolve(|tree| Ok(tree.first_key()?.cloned()))
    }

    pub fn last_key(&mut self) -> Result<Option<K>> {
        self.resolve(|tree| Ok(tree.last_key()?.cloned()))
    }

    /// In-order entries, after inflating the whole tree.
    pub fn iter(&mut self) -> Result<Iter<'_, K, V>> {
        self.inflate()?;
        Ok(self.tree.iter())
    }

    /// In-order keys, after inflating every node. Values stay as they are.
    pub fn keys(&mut self) -> Result<Keys<'_, K, V>> {
        self.inflate_levels(false)?;
        Ok(self.tree.keys())
    }

    /// Runs `op` until it no longer stops at missing data, inflating what it
    /// asked for between attempts.
    fn resolve<R>(&mut self, mut op: impl FnMut(&mut BTree<K, V>) -> Result<R>) -> Result<R> {
        loop {
            match op(&mut self.tree) {
                Err(e) if e.is_not_loaded() => self.recover(&e)?,
                result => return result,
            }
        }
    }

    fn recover(&mut self, error: &Error) -> Result<()> {
        let Some((node, slot)) = error.not_loaded_slot() else {
            return Err(Error::invalid_operation(format!("cannot recover from {error}")));
        };
        let node = NodeId::from_raw(node);
        if self.tree.arena.get(node).is_none() {
            return Err(Error::integrity(format!("missing data reported for stale node {node}")));
        }
        let progressed = match slot {
            Unloaded::Subnode(i) => self.inflate_child(node, i)?,
            Unloaded::Entry(_) => self.inflate_entries(node)?,
        };
        if !progressed {
            return Err(Error::integrity(format!(
                "missing data reported at {node} ({slot:?}), but nothing to load"
            )));
        }
        Ok(())
    }

    /// Materializes child `i` of `parent`. Returns `false` if it was live.
    ///
    /// The stored node must have the ghost's bounds; a different pair is a
    /// format error.
    pub fn inflate_child(&mut self, parent: NodeId, i: usize) -> Result<bool> {
        let child = self.tree.child_at(parent, i)?;
        Ok(self.inflate_ghosts(&[child])? > 0)
    }

    /// Loads every unloaded value of `node`. Returns `false` if there was none.
    pub fn inflate_entries(&mut self, node: NodeId) -> Result<bool> {
        let mut positions = Vec::new();
        let mut requests = Vec::new();
        for (i, entry) in self.tree.live(node)?.entries.iter().enumerate() {
            if let Slot::Unloaded(meta) = &entry.slot {
                positions.push(i);
                requests.push((self.label(&entry.key)?, meta.clone()));
            }
        }
        if requests.is_empty() {
            return Ok(false);
        }
        let values = self.serializers.entries.pull(&requests)?;
        if values.len() != positions.len() {
            return Err(Error::invalid_operation(format!(
                "{} values loaded for {} entries of {node}",
                values.len(),
                positions.len()
            )));
        }
        let live = self.tree.live_mut(node)?;
        for (i, value) in positions.into_iter().zip(values) {
            live.entries[i].slot = Slot::Loaded(value);
        }
        log::trace!("loaded {} values of {node}", requests.len());
        Ok(true)
    }

    /// Stores every loaded value of `node`, leaving metas behind. Returns
    /// `false` if there was none.
    pub fn deflate_entries(&mut self, node: NodeId) -> Result<bool> {
        let mut labels = Vec::new();
        for entry in &self.tree.live(node)?.entries {
            if entry.slot.is_loaded() {
                labels.push(self.label(&entry.key)?);
            }
        }
        if labels.is_empty() {
            return Ok(false);
        }
        let count = labels.len();

        let live = self.tree.live_mut(node)?;
        let mut batch: Vec<(String, &mut V)> = labels
            .into_iter()
            .zip(live.entries.iter_mut().filter_map(|e| match &mut e.slot {
                Slot::Loaded(value) => Some(value),
                Slot::Unloaded(_) => None,
            }))
            .collect();
        let metas = self.serializers.entries.push(&mut batch)?;
        drop(batch);
        if metas.len() != count {
            return Err(Error::invalid_operation(format!(
                "{} metas stored for {count} values of {node}",
                metas.len()
            )));
        }

        let mut metas = metas.into_iter();
        for entry in live.entries.iter_mut().filter(|e| e.slot.is_loaded()) {
            if let Some(meta) = metas.next() {
                entry.slot = Slot::Unloaded(meta);
            }
        }
        log::trace!("stored {count} values of {node}");
        Ok(true)
    }

    /// Swaps child `i` of `parent` out to the node store. The child must be
    /// bare. Returns `false` if it already was a ghost.
    pub fn deflate_child(&mut self, parent: NodeId, i: usize) -> Result<bool> {
        Ok(self.deflate_children(parent, &[i])? > 0)
    }

    /// Swaps the given children of `parent` out in one batch. Each must be
    /// bare; ghosts are skipped. Returns the number of nodes stored.
    pub fn deflate_children(&mut self, parent: NodeId, positions: &[usize]) -> Result<usize> {
        let mut targets = Vec::with_capacity(positions.len());
        for &i in positions {
            let child = self.tree.child_at(parent, i)?;
            if self.tree.is_ghost(child) {
                continue;
            }
            if !self.tree.node_is_bare(child) {
                return Err(Error::invalid_operation(format!(
                    "deflate: child {i} of {parent} is not bare"
                )));
            }
            targets.push(child);
        }
        if targets.is_empty() {
            return Ok(0);
        }

        let mut tasks = targets
            .iter()
            .map(|&child| Ok(PushTask::new(self.node_record(child)?)))
            .collect::<Result<Vec<_>>>()?;
        self.node_store().push_all(&mut tasks)?;
        if tasks.len() != targets.len() {
            return Err(Error::invalid_operation(format!(
                "deflate: {} of {} nodes were not stored",
                targets.len() - tasks.len(),
                targets.len()
            )));
        }
        for (child, task) in targets.iter().zip(tasks) {
            let meta = task
                .meta
                .ok_or_else(|| Error::invalid_operation(format!("deflate: no reference for {child}")))?;
            self.to_ghost(*child, meta)?;
        }
        Ok(targets.len())
    }

    /// Swaps everything out except the root, which stays live but bare.
    ///
    /// Goes depth-first; the children of a node are stored in one batch once
    /// their own subtrees are done.
    pub fn deflate(&mut self) -> Result<()> {
        let root = self.tree.root;
        let nodes = self.deflate_below(root)?;
        self.deflate_entries(root)?;
        log::debug!("deflated {nodes} nodes, {} entries", self.tree.size);
        Ok(())
    }

    fn deflate_below(&mut self, node: NodeId) -> Result<usize> {
        let Some(children) = self.tree.live(node)?.children.clone() else {
            return Ok(0);
        };
        let mut stored = 0;
        let mut positions = Vec::new();
        for (i, child) in children.into_iter().enumerate() {
            if self.tree.is_ghost(child) {
                continue;
            }
            stored += self.deflate_below(child)?;
            self.deflate_entries(child)?;
            positions.push(i);
        }
        stored += self.deflate_children(node, &positions)?;
        Ok(stored)
    }

    /// Materializes the whole tree, values included.
    ///
    /// Goes breadth-first with one node batch per level.
    pub fn inflate(&mut self) -> Result<()> {
        self.inflate_levels(true)
    }

    fn inflate_levels(&mut self, with_values: bool) -> Result<()> {
        let mut level = vec![self.tree.root];
        let mut loaded = 0;
        while !level.is_empty() {
            if with_values {
                for &node in &level {
                    self.inflate_entries(node)?;
                }
            }
            let mut next = Vec::new();
            let mut ghosts = Vec::new();
            for &node in &level {
                for &child in self.tree.children(node)? {
                    if self.tree.is_ghost(child) {
                        ghosts.push(child);
                    }
                    next.push(child);
                }
            }
            loaded += self.inflate_ghosts(&ghosts)?;
            level = next;
        }
        if loaded > 0 {
            log::debug!("inflated {loaded} nodes");
        }
        Ok(())
    }

    /// Pulls the given ghosts in one batch and materializes them.
    fn inflate_ghosts(&mut self, ghosts: &[NodeId]) -> Result<usize> {
        let mut targets = Vec::with_capacity(ghosts.len());
        let mut tasks: Vec<PullTask<NodeRecord>> = Vec::with_capacity(ghosts.len());
        for &id in ghosts {
            if let Some(meta) = self.tree.arena[id].ghost_meta() {
                targets.push(id);
                tasks.push(PullTask::new(meta.clone()));
            }
        }
        if tasks.is_empty() {
            return Ok(0);
        }
        self.node_store().pull_all(&mut tasks)?;
        if tasks.len() != targets.len() {
            return Err(Error::invalid_operation(format!(
                "inflate: {} of {} nodes could not be loaded",
                targets.len() - tasks.len(),
                targets.len()
            )));
        }
        for (id, task) in targets.iter().zip(tasks) {
            let record = task
                .data
                .ok_or_else(|| Error::invalid_operation(format!("inflate: no data for {id}")))?;
            self.materialize(*id, &record)?;
        }
        Ok(targets.len())
    }

    /// Makes `id` live with the contents of `record`: unloaded values, and
    /// ghost children bounded by the record's keys.
    fn materialize(&mut self, id: NodeId, record: &NodeRecord) -> Result<()> {
        self.check_bound("lkey", id, &record.lkey, self.tree.arena[id].lkey.as_ref())?;
        self.check_bound("rkey", id, &record.rkey, self.tree.arena[id].rkey.as_ref())?;

        let mut entries = record
            .entries
            .iter()
            .map(|(key, meta)| {
                Ok(Entry {
                    key: self.serializers.keys.rev(key)?,
                    slot: Slot::Unloaded(meta.clone()),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.sort_entries(&mut entries)?;
        if entries.len() > self.tree.ent_max() {
            return Err(Error::invalid_format(
                "entries",
                format!("{} entries in a node of at most {}", entries.len(), self.tree.ent_max()),
            ));
        }

        let (lkey, rkey) = {
            let node = &self.tree.arena[id];
            (node.lkey.clone(), node.rkey.clone())
        };
        let children = match &record.subnodes {
            None => None,
            Some(subnodes) => {
                let n = entries.len();
                verify_data!(subnodes, subnodes.len() == n + 1);
                let mut children = Vec::with_capacity(subnodes.len());
                for (j, meta) in subnodes.iter().enumerate() {
                    let lo = if j == 0 { lkey.clone() } else { Some(entries[j - 1].key.clone()) };
                    let hi = if j == n { rkey.clone() } else { Some(entries[j].key.clone()) };
                    children.push(self.tree.arena.alloc(Node {
                        lkey: lo,
                        rkey: hi,
                        parent: Some(id),
                        state: NodeState::Ghost(meta.clone()),
                    }));
                }
                Some(children)
            }
        };
        let ghosts = children.as_ref().map_or(0, Vec::len);

        let was_ghost = self.tree.is_ghost(id);
        self.tree.arena[id].state = NodeState::Live(LiveNode {
            entries,
            children,
            ghosts,
        });
        if was_ghost {
            if let Some(parent) = self.tree.arena[id].parent {
                self.tree.live_mut(parent)?.ghosts -= 1;
            }
        }
        log::trace!("materialized {id} with {ghosts} ghost children");
        Ok(())
    }

    /// Turns a bare live node into a ghost stored under `meta`.
    fn to_ghost(&mut self, id: NodeId, meta: Value) -> Result<()> {
        let state = std::mem::replace(&mut self.tree.arena[id].state, NodeState::Ghost(meta));
        if let NodeState::Live(LiveNode {
            children: Some(children),
            ..
        }) = state
        {
            for child in children {
                self.tree.arena.release_subtree(child);
            }
        }
        if let Some(parent) = self.tree.arena[id].parent {
            self.tree.live_mut(parent)?.ghosts += 1;
        }
        Ok(())
    }

    fn node_store(&self) -> NodeStore {
        CompositeSerializer::new(
            NodeTranslator::new(self.serializers.layout),
            self.serializers.nodes.clone(),
        )
    }

    fn node_record(&self, id: NodeId) -> Result<NodeRecord> {
        let node = &self.tree.arena[id];
        let live = self.tree.live(id)?;
        let entries = live
            .entries
            .iter()
            .map(|entry| match &entry.slot {
                Slot::Unloaded(meta) => Ok((self.serializers.keys.app(&entry.key)?, meta.clone())),
                Slot::Loaded(_) => Err(Error::invalid_operation(format!("{id} holds loaded values"))),
            })
            .collect::<Result<Vec<_>>>()?;
        let subnodes = live
            .children
            .as_ref()
            .map(|children| {
                children
                    .iter()
                    .map(|&child| {
                        self.tree.arena[child].ghost_meta().cloned().ok_or_else(|| {
                            Error::invalid_operation(format!("child {child} of {id} is live"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;
        Ok(NodeRecord {
            lkey: self.bound_value(node.lkey.as_ref())?,
            rkey: self.bound_value(node.rkey.as_ref())?,
            entries,
            subnodes,
        })
    }

    /// The record of the whole tree. The root must be bare; call
    /// [`deflate`](Self::deflate) first.
    pub fn to_record(&self) -> Result<TreeRecord> {
        if !self.tree.is_bare() {
            return Err(Error::invalid_operation("tree record: root is not bare"));
        }
        Ok(TreeRecord {
            node_min: self.tree.node_min(),
            size: self.tree.size,
            height: self.tree.height,
            root: self.node_record(self.tree.root)?,
        })
    }

    /// Deflates the tree and returns the value form of its record.
    pub fn save(&mut self) -> Result<Value> {
        self.deflate()?;
        TreeTranslator::new(self.serializers.layout).app(&self.to_record()?)
    }

    fn bound_value(&self, bound: Option<&K>) -> Result<Value> {
        match bound {
            None => Ok(Value::Null),
            Some(key) => self.serializers.keys.app(key),
        }
    }

    fn check_bound(&self, element: &str, id: NodeId, stored: &Value, expected: Option<&K>) -> Result<()> {
        let same = match (stored.is_null(), expected) {
            (true, None) => true,
            (false, Some(expected)) => {
                let key = self.serializers.keys.rev(stored)?;
                self.tree.order().compare(&key, expected)? == Ordering::Equal
            }
            _ => false,
        };
        if same {
            Ok(())
        } else {
            Err(Error::invalid_format(
                element,
                format!("stored node {stored} does not match the bounds of {id}"),
            ))
        }
    }

    fn sort_entries(&self, entries: &mut [Entry<K, V>]) -> Result<()> {
        let order = self.tree.order();
        let mut failure = None;
        entries.sort_by(|a, b| {
            order.compare(&a.key, &b.key).unwrap_or_else(|e| {
                failure.get_or_insert(e);
                Ordering::Equal
            })
        });
        if let Some(e) = failure {
            return Err(e);
        }
        for pair in entries.windows(2) {
            if order.compare(&pair[0].key, &pair[1].key)? != Ordering::Less {
                return Err(Error::invalid_format("entries", "duplicate key in node record"));
            }
        }
        Ok(())
    }

    /// The label of a key for entry serializers: its translation if that is
    /// a string, its canonical encoding otherwise.
    fn label(&self, key: &K) -> Result<String> {
        Ok(match self.serializers.keys.app(key)? {
            Value::String(s) => s,
            other => codec::canonical_key(&other),
        })
    }
}

impl<K: fmt::Debug, V> fmt::Debug for SkeletonBTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkeletonBTree")
            .field("tree", &self.tree)
            .field("serializers", &self.serializers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use ghostdex_serial::{
        Archiver, MemoryArchiver, Sequential,
        translate::{IntValue, StringValue},
    };

    use super::*;
    use crate::entries::InlineEntries;

    fn serializers(store: &Arc<MemoryArchiver>) -> Serializers<String, i64> {
        Serializers::new(
            StringValue,
            EntriesLayout::Map,
            Arc::new(Sequential(store.clone())),
            InlineEntries(IntValue),
        )
    }

    fn key(i: usize) -> String {
        format!("k{i:04}")
    }

    fn sample(store: &Arc<MemoryArchiver>, n: usize) -> SkeletonBTree<String, i64> {
        SkeletonBTree::build(
            3,
            (0..n).map(key).collect(),
            (0..n as i64).collect(),
            serializers(store),
        )
        .unwrap()
    }

    fn contents(skeleton: &mut SkeletonBTree<String, i64>) -> Vec<(String, i64)> {
        skeleton
            .iter()
            .unwrap()
            .map(|r| r.map(|(k, v)| (k.clone(), *v)))
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    fn test_deflated_leaf_reconstructs() {
        let store = Arc::new(MemoryArchiver::new());
        let mut skeleton = SkeletonBTree::build(
            2,
            ["a", "b", "c", "d", "e"].map(String::from).to_vec(),
            vec![1, 2, 3, 4, 5],
            serializers(&store),
        )
        .unwrap();
        skeleton.deflate().unwrap();
        assert!(skeleton.is_bare());

        let root = skeleton.root();
        let leaf = skeleton.tree().children(root).unwrap()[0];
        let meta = skeleton.tree().arena[leaf].ghost_meta().unwrap().clone();
        let stored = store.pull(&meta).unwrap();
        let record = NodeTranslator::new(EntriesLayout::Map).rev(&stored).unwrap();
        assert_eq!(
            record.entries,
            vec![
                (Value::from("a"), Value::Int(1)),
                (Value::from("b"), Value::Int(2)),
            ]
        );
        assert!(record.is_leaf());
        assert_eq!(record.lkey, Value::Null);
        assert_eq!(record.rkey, Value::from("c"));
    }

    #[test]
    fn test_node_store_reads_deflated_records() {
        let store = Arc::new(MemoryArchiver::new());
        let mut skeleton = sample(&store, 40);
        let expected = contents(&mut skeleton);
        skeleton.deflate().unwrap();

        let root = skeleton.root();
        let children = skeleton.tree().children(root).unwrap().to_vec();
        let mut tasks: Vec<_> = children
            .iter()
            .map(|&child| PullTask::new(skeleton.tree().arena[child].ghost_meta().unwrap().clone()))
            .collect();
        skeleton.node_store().pull_all(&mut tasks).unwrap();
        assert_eq!(tasks.len(), children.len());
        let root_keys: Vec<Value> = skeleton
            .node_record(root)
            .unwrap()
            .entries
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        for (j, task) in tasks.iter().enumerate() {
            let record = task.data.as_ref().unwrap();
            assert_eq!(record.lkey, if j == 0 { Value::Null } else { root_keys[j - 1].clone() });
            assert!(!record.entries.is_empty());
        }

        let pushes = store.push_count();
        skeleton.inflate().unwrap();
        assert_eq!(store.push_count(), pushes);
        assert_eq!(contents(&mut skeleton), expected);
    }

    #[test]
    fn test_deflate_inflate_round_trip() {
        let store = Arc::new(MemoryArchiver::new());
        let mut skeleton = sample(&store, 300);
        let expected = contents(&mut skeleton);
        let height = skeleton.height();

        skeleton.deflate().unwrap();
        assert!(skeleton.is_bare());
        assert!(!skeleton.is_live());
        let root_children = skeleton.tree().children(skeleton.root()).unwrap().len();
        assert_eq!(skeleton.tree().node_count(), 1 + root_children);
        skeleton.tree().verify_tree_integrity().unwrap();

        skeleton.inflate().unwrap();
        assert!(skeleton.is_live());
        assert_eq!(skeleton.height(), height);
        skeleton.tree().verify_tree_integrity().unwrap();
        assert_eq!(contents(&mut skeleton), expected);
    }

    #[test]
    fn test_materialization_is_idempotent() {
        let store = Arc::new(MemoryArchiver::new());
        let mut skeleton = sample(&store, 100);

        skeleton.inflate().unwrap();
        assert_eq!(store.pull_count(), 0);

        skeleton.deflate().unwrap();
        let pushes = store.push_count();
        skeleton.deflate().unwrap();
        assert_eq!(store.push_count(), pushes);

        let root = skeleton.root();
        assert!(skeleton.inflate_child(root, 0).unwrap());
        assert!(!skeleton.inflate_child(root, 0).unwrap());
        assert_eq!(skeleton.get(&key(0)).unwrap(), Some(&0));
        assert_eq!(skeleton.get(&key(99)).unwrap(), Some(&99));
    }

    #[test]
    fn test_lazy_operations() {
        let store = Arc::new(MemoryArchiver::new());
        let mut skeleton = sample(&store, 200);
        let mut model: BTreeMap<String, i64> = (0..200).map(|i| (key(i), i as i64)).collect();
        let mut rng = fastrand::Rng::with_seed(5);

        for step in 0..1500 {
            if step % 97 == 0 {
                skeleton.deflate().unwrap();
                assert!(skeleton.is_bare());
            }
            let k = key(rng.usize(0..400));
            match rng.u8(0..4) {
                0 => assert_eq!(skeleton.remove(&k).unwrap(), model.remove(&k), "step {step}"),
                1 => assert_eq!(skeleton.get(&k).unwrap(), model.get(&k), "step {step}"),
                2 => assert_eq!(skeleton.contains_key(&k).unwrap(), model.contains_key(&k)),
                _ => assert_eq!(
                    skeleton.put(k.clone(), step).unwrap(),
                    model.insert(k, step),
                    "step {step}"
                ),
            }
            skeleton.tree().verify_tree_integrity().unwrap();
        }
        assert_eq!(skeleton.len(), model.len());
        assert_eq!(contents(&mut skeleton), model.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_deflate_child_needs_bare_child() {
        let store = Arc::new(MemoryArchiver::new());
        let mut skeleton = sample(&store, 20);
        assert_eq!(skeleton.height(), 2);
        let root = skeleton.root();
        let err = skeleton.deflate_child(root, 0).unwrap_err();
        assert!(matches!(
            err.kind(),
            ghostdex_common::error::ErrorKind::InvalidOperation { .. }
        ));

        let leaf = skeleton.tree().children(root).unwrap()[0];
        assert!(skeleton.tree().children(leaf).unwrap().is_empty());
        assert!(skeleton.deflate_entries(leaf).unwrap());
        assert!(!skeleton.deflate_entries(leaf).unwrap());
        assert!(skeleton.deflate_child(root, 0).unwrap());
        assert!(skeleton.tree().is_ghost(leaf));
        assert!(!skeleton.deflate_child(root, 0).unwrap());
        assert_eq!(skeleton.first_key().unwrap(), Some(key(0)));
    }

    #[test]
    fn test_record_round_trip() {
        let store = Arc::new(MemoryArchiver::new());
        let mut skeleton = sample(&store, 120);
        let expected = contents(&mut skeleton);
        assert!(skeleton.to_record().is_err());

        let saved = skeleton.save().unwrap();
        let mut reopened = SkeletonBTree::open(&saved, serializers(&store)).unwrap();
        assert_eq!(reopened.len(), 120);
        assert_eq!(reopened.height(), skeleton.height());
        assert!(reopened.is_bare());
        assert_eq!(reopened.last_key().unwrap(), Some(key(119)));
        assert_eq!(contents(&mut reopened), expected);
        reopened.tree().verify_tree_integrity().unwrap();
    }

    #[test]
    fn test_swapped_subnodes_fail_bounds_check() {
        let store = Arc::new(MemoryArchiver::new());
        let mut skeleton = sample(&store, 120);
        skeleton.deflate().unwrap();
        let mut record = skeleton.to_record().unwrap();
        record.root.subnodes.as_mut().unwrap().swap(0, 1);

        let mut broken = SkeletonBTree::from_record(&record, serializers(&store)).unwrap();
        let err = broken.get(&key(0)).unwrap_err();
        assert!(err.is_invalid_format(), "{err}");
    }

    #[test]
    fn test_keys_leave_values_unloaded() {
        let store = Arc::new(MemoryArchiver::new());
        let mut skeleton = sample(&store, 60);
        skeleton.deflate().unwrap();
        let keys: Vec<String> = skeleton
            .keys()
            .unwrap()
            .map(|k| k.cloned())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(keys, (0..60).map(key).collect::<Vec<_>>());
        assert!(!skeleton.is_live());
        assert_eq!(skeleton.tree().iter().filter_map(|r| r.err()).count(), 1);
    }
}
