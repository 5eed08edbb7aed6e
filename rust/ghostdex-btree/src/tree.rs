//! Ordered map over fixed fan-out nodes.
//!
//! Insertion and deletion are single-pass and top-down: a full node is split
//! before the descent enters it, and a minimal node is refilled (by merging
//! with a sibling or rotating an entry in from one) before the descent enters
//! it. Every restructuring step leaves a valid tree, so an operation that
//! stops half-way because it reached a ghost node can simply be restarted
//! from the root once the ghost has been inflated.
//!
//! Node capacity is derived from `node_min`:
//!
//! ```text
//! ENT_MIN  = node_min - 1      (entries in any non-root node, at least)
//! ENT_MAX  = 2 * node_min - 1  (entries in any node, at most)
//! NODE_MAX = 2 * node_min      (children of an internal node, at most)
//! ```

use std::{cmp::Ordering, fmt, fmt::Write as _, mem};

use ghostdex_common::{
    Result,
    error::{Error, Unloaded},
    verify_arg,
};

use crate::{
    config::TreeConfig,
    node::{Arena, Entry, LiveNode, Node, NodeId, NodeState, Slot},
    order::KeyOrder,
};

pub struct BTree<K, V> {
    node_min: usize,
    order: KeyOrder<K>,
    pub(crate) arena: Arena<K, V>,
    pub(crate) root: NodeId,
    pub(crate) size: usize,
    pub(crate) height: usize,
}

impl<K, V> BTree<K, V>
where
    K: Ord + Clone,
{
    pub fn new(node_min: usize) -> Result<Self> {
        Self::with_order(node_min, KeyOrder::natural())
    }

    pub fn with_config(config: TreeConfig) -> Result<Self> {
        Self::new(config.node_min)
    }

    pub fn with_order(node_min: usize, order: KeyOrder<K>) -> Result<Self> {
        verify_arg!(node_min, node_min >= 2);
        let mut arena = Arena::new();
        let root = arena.alloc(empty_root());
        Ok(BTree {
            node_min,
            order,
            arena,
            root,
            size: 0,
            height: 1,
        })
    }

    /// Bulk-loads a tree from strictly ascending keys.
    ///
    /// Each level is laid out in the fewest nodes that can hold it: with `n`
    /// entries on a level, `k = (n + NODE_MAX) / NODE_MAX` nodes share
    /// `n - k + 1` entries as evenly as possible, and the `k - 1` entries
    /// between them become the next level up.
    pub fn build(node_min: usize, keys: Vec<K>, values: Vec<V>) -> Result<Self> {
        Self::build_with_order(node_min, KeyOrder::natural(), keys, values)
    }

    pub fn build_with_order(
        node_min: usize,
        order: KeyOrder<K>,
        keys: Vec<K>,
        values: Vec<V>,
    ) -> Result<Self> {
        verify_arg!(values, keys.len() == values.len());
        let mut tree = Self::with_order(node_min, order)?;
        for pair in keys.windows(2) {
            if tree.order.compare(&pair[0], &pair[1])? != Ordering::Less {
                return Err(Error::invalid_arg("keys", "expected strictly ascending keys"));
            }
        }
        if keys.is_empty() {
            return Ok(tree);
        }

        let node_max = tree.node_max();
        let size = keys.len();
        tree.arena.clear();
        let mut level: Vec<Entry<K, V>> = keys
            .into_iter()
            .zip(values)
            .map(|(k, v)| Entry::loaded(k, v))
            .collect();
        let mut below: Option<Vec<NodeId>> = None;
        let mut height = 0;
        loop {
            height += 1;
            let n = level.len();
            let k = (n + node_max) / node_max;
            let (base, extra) = ((n + 1 - k) / k, (n + 1 - k) % k);

            let mut entries = level.into_iter();
            let mut subnodes = below.take().map(Vec::into_iter);
            let mut nodes = Vec::with_capacity(k);
            let mut separators = Vec::with_capacity(k - 1);
            let mut lkey = None;
            for j in 0..k {
                let count = base + usize::from(j < extra);
                let node_entries: Vec<_> = entries.by_ref().take(count).collect();
                let children: Option<Vec<NodeId>> = subnodes
                    .as_mut()
                    .map(|it| it.by_ref().take(count + 1).collect());
                let separator = if j + 1 < k { entries.next() } else { None };
                let rkey = separator.as_ref().map(|e: &Entry<K, V>| e.key.clone());

                let moved = children.clone().unwrap_or_default();
                let id = tree.arena.alloc(Node {
                    lkey: lkey.take(),
                    rkey: rkey.clone(),
                    parent: None,
                    state: NodeState::Live(LiveNode {
                        entries: node_entries,
                        children,
                        ghosts: 0,
                    }),
                });
                for child in moved {
                    tree.arena[child].parent = Some(id);
                }
                nodes.push(id);
                lkey = rkey;
                separators.extend(separator);
            }

            if separators.is_empty() {
                tree.root = nodes[0];
                break;
            }
            level = separators;
            below = Some(nodes);
        }
        tree.size = size;
        tree.height = height;
        Ok(tree)
    }

    pub fn node_min(&self) -> usize {
        self.node_min
    }

    pub fn ent_min(&self) -> usize {
        self.node_min - 1
    }

    pub fn ent_max(&self) -> usize {
        2 * self.node_min - 1
    }

    pub fn node_max(&self) -> usize {
        2 * self.node_min
    }

    pub fn order(&self) -> &KeyOrder<K> {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of levels; a tree whose root is a leaf has height 1.
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes held in memory, ghosts included.
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Handles of the children of a live node; empty for a leaf.
    pub fn children(&self, id: NodeId) -> Result<&[NodeId]> {
        if self.arena.get(id).is_none() {
            return Err(Error::invalid_arg("node", format!("{id} is not a node of this tree")));
        }
        Ok(self.live(id)?.children.as_deref().unwrap_or(&[]))
    }

    pub fn is_ghost(&self, id: NodeId) -> bool {
        self.arena.get(id).is_some_and(Node::is_ghost)
    }

    pub fn clear(&mut self) {
        self.arena.clear();
        self.root = self.arena.alloc(empty_root());
        self.size = 0;
        self.height = 1;
    }

    pub fn get(&self, key: &K) -> Result<Option<&V>> {
        match self.find(key)? {
            Some((node, i)) => Ok(self.live(node)?.entries[i].slot.loaded()),
            None => Ok(None),
        }
    }

    pub fn get_mut(&mut self, key: &K) -> Result<Option<&mut V>> {
        match self.find(key)? {
            Some((node, i)) => match &mut self.live_mut(node)?.entries[i].slot {
                Slot::Loaded(v) => Ok(Some(v)),
                Slot::Unloaded(_) => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Does not require the entry's value to be loaded.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.locate(key)?.is_some())
    }

    /// Inserts or replaces; returns the previous value.
    pub fn put(&mut self, key: K, value: V) -> Result<Option<V>> {
        self.try_put(&key, &mut Some(value))
    }

    pub fn remove(&mut self, key: &K) -> Result<Option<V>> {
        self.try_remove(key)
    }

    pub fn first_key(&self) -> Result<Option<&K>> {
        self.edge_key(true)
    }

    pub fn last_key(&self) -> Result<Option<&K>> {
        self.edge_key(false)
    }

    /// In-order entries. Yields a not-loaded error, and then stops, on
    /// reaching a ghost node or an unloaded value.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            cursor: Cursor::new(self),
        }
    }

    /// In-order keys. Unloaded values are fine; ghost nodes are not.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys {
            cursor: Cursor::new(self),
        }
    }

    /// True if no ghost node and no unloaded value is left anywhere.
    pub fn is_live(&self) -> bool {
        self.subtree_is_live(self.root)
    }

    /// True if nothing below the root is materialized and every value of
    /// the root is unloaded.
    pub fn is_bare(&self) -> bool {
        self.node_is_bare(self.root)
    }

    pub(crate) fn node_is_bare(&self, id: NodeId) -> bool {
        match self.arena[id].live() {
            None => true,
            Some(live) => {
                live.entries.iter().all(|e| !e.slot.is_loaded())
                    && live
                        .children
                        .as_ref()
                        .is_none_or(|children| live.ghosts == children.len())
            }
        }
    }

    pub(crate) fn subtree_is_live(&self, id: NodeId) -> bool {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let Some(live) = self.arena[id].live() else {
                return false;
            };
            if live.ghosts > 0 || !live.entries.iter().all(|e| e.slot.is_loaded()) {
                return false;
            }
            stack.extend(live.children.iter().flatten());
        }
        true
    }

    /// The materialized contents of `id`, or a not-loaded error naming the
    /// slot of `id` in its parent.
    pub(crate) fn live(&self, id: NodeId) -> Result<&LiveNode<K, V>> {
        match &self.arena[id].state {
            NodeState::Live(live) => Ok(live),
            NodeState::Ghost(_) => Err(self.ghost_error(id)),
        }
    }

    pub(crate) fn live_mut(&mut self, id: NodeId) -> Result<&mut LiveNode<K, V>> {
        if self.arena[id].is_ghost() {
            return Err(self.ghost_error(id));
        }
        self.arena[id]
            .live_mut()
            .ok_or_else(|| Error::invalid_operation(format!("node {id} is not live")))
    }

    fn ghost_error(&self, id: NodeId) -> Error {
        let slot = self.arena[id].parent.and_then(|parent| {
            self.arena
                .get(parent)
                .and_then(Node::live)
                .and_then(|live| live.position_of(id))
                .map(|i| (parent, i))
        });
        match slot {
            Some((parent, i)) => Error::not_loaded(parent.get(), Unloaded::Subnode(i)),
            None => Error::invalid_operation(format!("node {id} is not loaded and has no live parent")),
        }
    }

    fn count(&self, id: NodeId) -> Result<usize> {
        Ok(self.live(id)?.entries.len())
    }

    fn search(&self, id: NodeId, key: &K) -> Result<std::result::Result<usize, usize>> {
        let live = self.live(id)?;
        self.order.search(&live.entries, key, |e| &e.key)
    }

    pub(crate) fn child_at(&self, id: NodeId, i: usize) -> Result<NodeId> {
        self.live(id)?
            .child(i)
            .ok_or_else(|| Error::integrity(format!("node {id} has no child {i}")))
    }

    /// Position of `key` in the tree, whether or not its value is loaded.
    pub(crate) fn locate(&self, key: &K) -> Result<Option<(NodeId, usize)>> {
        let mut node = self.root;
        loop {
            let live = self.live(node)?;
            match self.order.search(&live.entries, key, |e| &e.key)? {
                Ok(i) => return Ok(Some((node, i))),
                Err(i) => match live.child(i) {
                    Some(child) => node = child,
                    None => return Ok(None),
                },
            }
        }
    }

    /// Position of `key`; a not-loaded error if its value is unloaded.
    pub(crate) fn find(&self, key: &K) -> Result<Option<(NodeId, usize)>> {
        match self.locate(key)? {
            Some((node, i)) if !self.live(node)?.entries[i].slot.is_loaded() => {
                Err(Error::not_loaded(node.get(), Unloaded::Entry(i)))
            }
            found => Ok(found),
        }
    }

    /// Insertion that leaves `value` in place when it fails, so it can be
    /// retried.
    pub(crate) fn try_put(&mut self, key: &K, value: &mut Option<V>) -> Result<Option<V>> {
        let mut node = self.root;
        // A parent just returned by `split` is searched as is: it had room
        // before gaining the median, so it is never split again.
        let mut split_parent = false;
        loop {
            if !split_parent && self.count(node)? == self.ent_max() {
                node = self.split(node)?;
                split_parent = true;
                continue;
            }
            split_parent = false;
            match self.search(node, key)? {
                Ok(i) => {
                    let entry = &mut self.live_mut(node)?.entries[i];
                    if !entry.slot.is_loaded() {
                        return Err(Error::not_loaded(node.get(), Unloaded::Entry(i)));
                    }
                    let value = take_value(value)?;
                    return match mem::replace(&mut entry.slot, Slot::Loaded(value)) {
                        Slot::Loaded(old) => Ok(Some(old)),
                        Slot::Unloaded(_) => Ok(None),
                    };
                }
                Err(i) => match self.live(node)?.child(i) {
                    Some(child) => node = child,
                    None => {
                        let value = take_value(value)?;
                        self.live_mut(node)?
                            .entries
                            .insert(i, Entry::loaded(key.clone(), value));
                        self.size += 1;
                        return Ok(None);
                    }
                },
            }
        }
    }

    pub(crate) fn try_remove(&mut self, key: &K) -> Result<Option<V>> {
        let ent_min = self.ent_min();
        let mut node = self.root;
        loop {
            match self.search(node, key)? {
                Ok(i) => {
                    let live = self.live(node)?;
                    if !live.entries[i].slot.is_loaded() {
                        return Err(Error::not_loaded(node.get(), Unloaded::Entry(i)));
                    }
                    if live.is_leaf() {
                        let entry = self.live_mut(node)?.entries.remove(i);
                        self.size -= 1;
                        return Ok(entry.slot.into_loaded());
                    }

                    let (left, right) = (self.child_at(node, i)?, self.child_at(node, i + 1)?);
                    let (l, r) = (self.count(left)?, self.count(right)?);
                    if l == ent_min && r == ent_min {
                        node = self.merge(node, i)?;
                        continue;
                    }
                    // Replace the entry with its in-order neighbour from the
                    // larger side.
                    let neighbour = if l > r || (l == r && self.size % 2 == 0) {
                        self.take_edge(left, true)?
                    } else {
                        self.take_edge(right, false)?
                    };
                    let entry = mem::replace(&mut self.live_mut(node)?.entries[i], neighbour);
                    self.size -= 1;
                    return Ok(entry.slot.into_loaded());
                }
                Err(i) => {
                    let Some(child) = self.live(node)?.child(i) else {
                        return Ok(None);
                    };
                    node = if self.count(child)? == ent_min {
                        self.refill(node, i)?
                    } else {
                        child
                    };
                }
            }
        }
    }

    /// Detaches the last (or first) entry of the subtree under `start`, which
    /// must hold more than `ENT_MIN` entries.
    fn take_edge(&mut self, start: NodeId, last: bool) -> Result<Entry<K, V>> {
        let ent_min = self.ent_min();
        let mut node = start;
        loop {
            let live = self.live(node)?;
            let Some(children) = &live.children else {
                let live = self.live_mut(node)?;
                let entry = if last {
                    live.entries.pop()
                } else if live.entries.is_empty() {
                    None
                } else {
                    Some(live.entries.remove(0))
                };
                return entry.ok_or_else(|| Error::integrity(format!("leaf {node} is empty")));
            };
            let i = if last { children.len() - 1 } else { 0 };
            let child = children[i];
            node = if self.count(child)? == ent_min {
                self.refill(node, i)?
            } else {
                child
            };
        }
    }

    fn edge_key(&self, first: bool) -> Result<Option<&K>> {
        let mut node = self.root;
        loop {
            let live = self.live(node)?;
            let next = match &live.children {
                None => {
                    let entry = if first {
                        live.entries.first()
                    } else {
                        live.entries.last()
                    };
                    return Ok(entry.map(|e| &e.key));
                }
                Some(children) if first => children.first(),
                Some(children) => children.last(),
            };
            node = *next.ok_or_else(|| Error::integrity(format!("node {node} has no children")))?;
        }
    }

    /// Splits a full `child` around its median, which moves up into the
    /// parent (a new root if `child` was the root). Returns the parent.
    fn split(&mut self, child: NodeId) -> Result<NodeId> {
        let ent_min = self.ent_min();
        let parent = self.arena[child].parent;
        let (left_entries, median, left_children) = {
            let live = self.live_mut(child)?;
            let left_entries: Vec<_> = live.entries.drain(..ent_min).collect();
            let median = live.entries.remove(0);
            let left_children: Option<Vec<NodeId>> = live
                .children
                .as_mut()
                .map(|children| children.drain(..=ent_min).collect());
            (left_entries, median, left_children)
        };
        let moved = left_children.clone().unwrap_or_default();
        let left_ghosts = moved.iter().filter(|&&id| self.arena[id].is_ghost()).count();

        let left = self.arena.alloc(Node {
            lkey: self.arena[child].lkey.clone(),
            rkey: Some(median.key.clone()),
            parent,
            state: NodeState::Live(LiveNode {
                entries: left_entries,
                children: left_children,
                ghosts: left_ghosts,
            }),
        });
        for id in moved {
            self.arena[id].parent = Some(left);
        }
        self.arena[child].lkey = Some(median.key.clone());
        self.live_mut(child)?.ghosts -= left_ghosts;

        match parent {
            None => {
                let root = self.arena.alloc(Node {
                    lkey: None,
                    rkey: None,
                    parent: None,
                    state: NodeState::Live(LiveNode {
                        entries: vec![median],
                        children: Some(vec![left, child]),
                        ghosts: 0,
                    }),
                });
                self.arena[left].parent = Some(root);
                self.arena[child].parent = Some(root);
                self.root = root;
                self.height += 1;
                Ok(root)
            }
            Some(parent) => {
                let live = self.live_mut(parent)?;
                let pos = live
                    .position_of(child)
                    .ok_or_else(|| Error::integrity(format!("{child} is not a child of {parent}")))?;
                live.entries.insert(pos, median);
                if let Some(children) = live.children.as_mut() {
                    children.insert(pos, left);
                }
                Ok(parent)
            }
        }
    }

    /// Brings child `i` of `node`, which holds `ENT_MIN` entries, above the
    /// minimum. Returns the node to continue the descent from.
    fn refill(&mut self, node: NodeId, i: usize) -> Result<NodeId> {
        let ent_min = self.ent_min();
        let last = self.live(node)?.children.as_ref().map_or(0, |c| c.len() - 1);
        let l = if i > 0 {
            Some(self.count(self.child_at(node, i - 1)?)?)
        } else {
            None
        };
        let r = if i < last {
            Some(self.count(self.child_at(node, i + 1)?)?)
        } else {
            None
        };
        match (l, r) {
            (None, Some(r)) if r == ent_min => self.merge(node, i),
            (None, Some(_)) => self.rotate_left(node, i),
            (Some(l), None) if l == ent_min => self.merge(node, i - 1),
            (Some(_), None) => self.rotate_right(node, i - 1),
            (Some(l), Some(r)) if r > l => self.rotate_left(node, i),
            (Some(l), Some(r)) if l > r => self.rotate_right(node, i - 1),
            (Some(l), Some(r)) => {
                if self.size % 2 == 1 {
                    if r == ent_min {
                        self.merge(node, i)
                    } else {
                        self.rotate_left(node, i)
                    }
                } else if l == ent_min {
                    self.merge(node, i - 1)
                } else {
                    self.rotate_right(node, i - 1)
                }
            }
            (None, None) => Err(Error::integrity(format!("node {node} has a single child"))),
        }
    }

    /// Merges children `s` and `s + 1` of `node`, with entry `s` between
    /// them, into child `s + 1`. If that empties the root, the merged node
    /// becomes the root. Returns the node to continue from.
    fn merge(&mut self, node: NodeId, s: usize) -> Result<NodeId> {
        let left = self.child_at(node, s)?;
        let right = self.child_at(node, s + 1)?;
        self.live(left)?;
        self.live(right)?;

        let separator = {
            let live = self.live_mut(node)?;
            let separator = live.entries.remove(s);
            if let Some(children) = live.children.as_mut() {
                children.remove(s);
            }
            separator
        };
        let left_node = self
            .arena
            .release(left)
            .ok_or_else(|| Error::integrity(format!("stale handle {left}")))?;
        let NodeState::Live(left_live) = left_node.state else {
            return Err(Error::integrity(format!("merged node {left} is a ghost")));
        };
        let moved = left_live.children.clone().unwrap_or_default();

        self.arena[right].lkey = left_node.lkey;
        let right_live = self.live_mut(right)?;
        let mut entries = left_live.entries;
        entries.push(separator);
        entries.append(&mut right_live.entries);
        right_live.entries = entries;
        if let (Some(mut children), Some(right_children)) =
            (left_live.children, right_live.children.as_mut())
        {
            children.append(right_children);
            *right_children = children;
        }
        right_live.ghosts += left_live.ghosts;
        for id in moved {
            self.arena[id].parent = Some(right);
        }

        if node == self.root && self.live(node)?.entries.is_empty() {
            self.arena.release(node);
            self.arena[right].parent = None;
            self.root = right;
            self.height -= 1;
            return Ok(right);
        }
        Ok(node)
    }

    /// Moves the first entry of child `s + 1` up into `node` and entry `s`
    /// of `node` down to the end of child `s`.
    fn rotate_left(&mut self, node: NodeId, s: usize) -> Result<NodeId> {
        let left = self.child_at(node, s)?;
        let right = self.child_at(node, s + 1)?;
        self.live(left)?;
        self.live(right)?;

        let (first, crossing) = {
            let live = self.live_mut(right)?;
            let first = live.entries.remove(0);
            let crossing = live.children.as_mut().map(|c| c.remove(0));
            (first, crossing)
        };
        let bound = first.key.clone();
        let separator = mem::replace(&mut self.live_mut(node)?.entries[s], first);
        self.live_mut(left)?.entries.push(separator);
        if let Some(child) = crossing {
            let ghost = self.arena[child].is_ghost();
            self.arena[child].parent = Some(left);
            let live = self.live_mut(left)?;
            if let Some(children) = live.children.as_mut() {
                children.push(child);
            }
            if ghost {
                live.ghosts += 1;
                self.live_mut(right)?.ghosts -= 1;
            }
        }
        self.arena[left].rkey = Some(bound.clone());
        self.arena[right].lkey = Some(bound);
        Ok(node)
    }

    /// Moves the last entry of child `s` up into `node` and entry `s` of
    /// `node` down to the front of child `s + 1`.
    fn rotate_right(&mut self, node: NodeId, s: usize) -> Result<NodeId> {
        let left = self.child_at(node, s)?;
        let right = self.child_at(node, s + 1)?;
        self.live(left)?;
        self.live(right)?;

        let (last, crossing) = {
            let live = self.live_mut(left)?;
            let last = live
                .entries
                .pop()
                .ok_or_else(|| Error::integrity(format!("node {left} is empty")))?;
            let crossing = live.children.as_mut().and_then(Vec::pop);
            (last, crossing)
        };
        let bound = last.key.clone();
        let separator = mem::replace(&mut self.live_mut(node)?.entries[s], last);
        self.live_mut(right)?.entries.insert(0, separator);
        if let Some(child) = crossing {
            let ghost = self.arena[child].is_ghost();
            self.arena[child].parent = Some(right);
            let live = self.live_mut(right)?;
            if let Some(children) = live.children.as_mut() {
                children.insert(0, child);
            }
            if ghost {
                live.ghosts += 1;
                self.live_mut(left)?.ghosts -= 1;
            }
        }
        self.arena[left].rkey = Some(bound.clone());
        self.arena[right].lkey = Some(bound);
        Ok(node)
    }

    /// Checks the structural invariants of the materialized part of the
    /// tree and returns its height.
    ///
    /// Ghost subtrees are taken on trust, apart from their position. The
    /// entry count is checked against `len()` only when no ghost is present.
    pub fn verify_tree_integrity(&self) -> Result<usize> {
        let mut tally = Tally::default();
        if self.arena.get(self.root).is_none_or(Node::is_ghost) {
            return Err(Error::integrity("root is not live"));
        }
        self.verify_node(self.root, None, None, None, 1, &mut tally)?;
        if tally.ghosts == 0 && tally.entries != self.size {
            return Err(Error::integrity(format!(
                "tree holds {} entries, size is {}",
                tally.entries, self.size
            )));
        }
        Ok(self.height)
    }

    fn verify_node(
        &self,
        id: NodeId,
        lkey: Option<&K>,
        rkey: Option<&K>,
        parent: Option<NodeId>,
        depth: usize,
        tally: &mut Tally,
    ) -> Result<()> {
        let node = self
            .arena
            .get(id)
            .ok_or_else(|| Error::integrity(format!("dangling handle {id}")))?;
        if node.parent != parent {
            return Err(Error::integrity(format!(
                "node {id} records parent {:?}, expected {parent:?}",
                node.parent
            )));
        }
        if !self.same_bound(node.lkey.as_ref(), lkey)? || !self.same_bound(node.rkey.as_ref(), rkey)? {
            return Err(Error::integrity(format!("node {id} bounds differ from its separators")));
        }
        if depth > self.height {
            return Err(Error::integrity(format!("node {id} lies below height {}", self.height)));
        }
        let live = match &node.state {
            NodeState::Ghost(_) => {
                tally.ghosts += 1;
                return Ok(());
            }
            NodeState::Live(live) => live,
        };

        let n = live.entries.len();
        if (id != self.root && n < self.ent_min()) || n > self.ent_max() {
            return Err(Error::integrity(format!("node {id} holds {n} entries")));
        }
        for pair in live.entries.windows(2) {
            if self.order.compare(&pair[0].key, &pair[1].key)? != Ordering::Less {
                return Err(Error::integrity(format!("node {id} entries out of order")));
            }
        }
        if let (Some(lkey), Some(first)) = (lkey, live.entries.first()) {
            if self.order.compare(lkey, &first.key)? != Ordering::Less {
                return Err(Error::integrity(format!("node {id} entry below its lower bound")));
            }
        }
        if let (Some(rkey), Some(last)) = (rkey, live.entries.last()) {
            if self.order.compare(&last.key, rkey)? != Ordering::Less {
                return Err(Error::integrity(format!("node {id} entry above its upper bound")));
            }
        }
        tally.entries += n;

        match &live.children {
            None => {
                if depth != self.height {
                    return Err(Error::integrity(format!(
                        "leaf {id} at depth {depth}, height is {}",
                        self.height
                    )));
                }
                if live.ghosts != 0 {
                    return Err(Error::integrity(format!("leaf {id} counts ghosts")));
                }
            }
            Some(children) => {
                if n == 0 || children.len() != n + 1 {
                    return Err(Error::integrity(format!(
                        "node {id} has {} children for {n} entries",
                        children.len()
                    )));
                }
                let ghosts = children
                    .iter()
                    .filter(|&&c| self.arena.get(c).is_some_and(Node::is_ghost))
                    .count();
                if ghosts != live.ghosts {
                    return Err(Error::integrity(format!(
                        "node {id} counts {} ghosts, has {ghosts}",
                        live.ghosts
                    )));
                }
                for (j, &child) in children.iter().enumerate() {
                    let lo = if j == 0 { lkey } else { Some(&live.entries[j - 1].key) };
                    let hi = if j == n { rkey } else { Some(&live.entries[j].key) };
                    self.verify_node(child, lo, hi, Some(id), depth + 1, tally)?;
                }
            }
        }
        Ok(())
    }

    fn same_bound(&self, a: Option<&K>, b: Option<&K>) -> Result<bool> {
        match (a, b) {
            (None, None) => Ok(true),
            (Some(a), Some(b)) => Ok(self.order.compare(a, b)? == Ordering::Equal),
            _ => Ok(false),
        }
    }
}

impl<K: fmt::Debug, V> BTree<K, V> {
    /// Indented rendering of the tree, one node per line.
    pub fn to_tree_string(&self) -> String {
        let mut out = String::new();
        self.render(self.root, 0, &mut out);
        out
    }

    fn render(&self, id: NodeId, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        let node = &self.arena[id];
        match &node.state {
            NodeState::Ghost(meta) => {
                let _ = writeln!(out, "{indent}ghost ({:?}, {:?}) @ {meta}", node.lkey, node.rkey);
            }
            NodeState::Live(live) => {
                let keys: Vec<&K> = live.entries.iter().map(|e| &e.key).collect();
                let unloaded = live.entries.iter().filter(|e| !e.slot.is_loaded()).count();
                let _ = write!(out, "{indent}{id} {keys:?}");
                if unloaded > 0 {
                    let _ = write!(out, " [{unloaded} unloaded]");
                }
                out.push('\n');
                for &child in live.children.iter().flatten() {
                    self.render(child, depth + 1, out);
                }
            }
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for BTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BTree")
            .field("node_min", &self.node_min)
            .field("size", &self.size)
            .field("height", &self.height)
            .field("root", &self.root)
            .finish()
    }
}

fn empty_root<K, V>() -> Node<K, V> {
    Node {
        lkey: None,
        rkey: None,
        parent: None,
        state: NodeState::Live(LiveNode::leaf(Vec::new())),
    }
}

fn take_value<V>(value: &mut Option<V>) -> Result<V> {
    value
        .take()
        .ok_or_else(|| Error::invalid_operation("value already consumed by an earlier attempt"))
}

#[derive(Default)]
struct Tally {
    entries: usize,
    ghosts: usize,
}

/// Walks the entries of the materialized tree in order.
struct Cursor<'a, K, V> {
    tree: &'a BTree<K, V>,
    /// (node, position); in an internal node even positions are children and
    /// odd positions are entries.
    stack: Vec<(NodeId, usize)>,
}

impl<'a, K: Ord + Clone, V> Cursor<'a, K, V> {
    fn new(tree: &'a BTree<K, V>) -> Self {
        Cursor {
            tree,
            stack: vec![(tree.root, 0)],
        }
    }

    fn stop(&mut self) {
        self.stack.clear();
    }

    fn advance(&mut self) {
        if let Some(top) = self.stack.last_mut() {
            top.1 += 1;
        }
    }

    fn next_entry(&mut self) -> Option<Result<(NodeId, usize, &'a Entry<K, V>)>> {
        let tree = self.tree;
        loop {
            let (node, pos) = *self.stack.last()?;
            let live = match tree.live(node) {
                Ok(live) => live,
                Err(e) => {
                    self.stop();
                    return Some(Err(e));
                }
            };
            match &live.children {
                None => {
                    if pos < live.entries.len() {
                        self.advance();
                        return Some(Ok((node, pos, &live.entries[pos])));
                    }
                    self.stack.pop();
                }
                Some(children) => {
                    if pos > 2 * live.entries.len() {
                        self.stack.pop();
                        continue;
                    }
                    self.advance();
                    if pos % 2 == 0 {
                        self.stack.push((children[pos / 2], 0));
                    } else {
                        let i = pos / 2;
                        return Some(Ok((node, i, &live.entries[i])));
                    }
                }
            }
        }
    }
}

pub struct Iter<'a, K, V> {
    cursor: Cursor<'a, K, V>,
}

impl<'a, K: Ord + Clone, V> Iterator for Iter<'a, K, V> {
    type Item = Result<(&'a K, &'a V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor.next_entry()? {
            Ok((node, i, entry)) => match &entry.slot {
                Slot::Loaded(v) => Some(Ok((&entry.key, v))),
                Slot::Unloaded(_) => {
                    self.cursor.stop();
                    Some(Err(Error::not_loaded(node.get(), Unloaded::Entry(i))))
                }
            },
            Err(e) => Some(Err(e)),
        }
    }
}

pub struct Keys<'a, K, V> {
    cursor: Cursor<'a, K, V>,
}

impl<'a, K: Ord + Clone, V> Iterator for Keys<'a, K, V> {
    type Item = Result<&'a K>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.cursor.next_entry()?.map(|(_, _, entry)| &entry.key))
    }
}
