//! Tree nodes and the arena that owns them.
//!
//! Nodes refer to each other by [`NodeId`] handles into the arena: a node
//! lists its children's handles and records the handle of its parent. A child
//! that is not materialized is still an arena node, in the `Ghost` state,
//! holding its boundary keys and the reference it was stored under.

use std::{
    fmt,
    ops::{Index, IndexMut},
};

use ghostdex_serial::Value;

/// Handle of a node in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn get(self) -> u64 {
        self.0 as u64
    }

    pub(crate) fn from_raw(raw: u64) -> NodeId {
        NodeId(raw as usize)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// The value half of an entry: present, or stored under a reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot<V> {
    Loaded(V),
    Unloaded(Value),
}

impl<V> Slot<V> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Slot::Loaded(_))
    }

    pub fn loaded(&self) -> Option<&V> {
        match self {
            Slot::Loaded(v) => Some(v),
            Slot::Unloaded(_) => None,
        }
    }

    pub fn into_loaded(self) -> Option<V> {
        match self {
            Slot::Loaded(v) => Some(v),
            Slot::Unloaded(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Entry<K, V> {
    pub key: K,
    pub slot: Slot<V>,
}

impl<K, V> Entry<K, V> {
    pub fn loaded(key: K, value: V) -> Self {
        Entry {
            key,
            slot: Slot::Loaded(value),
        }
    }
}

/// Contents of a materialized node.
#[derive(Debug)]
pub(crate) struct LiveNode<K, V> {
    pub entries: Vec<Entry<K, V>>,
    /// `None` for a leaf; otherwise one more handle than there are entries.
    pub children: Option<Vec<NodeId>>,
    /// Number of children in the `Ghost` state.
    pub ghosts: usize,
}

impl<K, V> LiveNode<K, V> {
    pub fn leaf(entries: Vec<Entry<K, V>>) -> Self {
        LiveNode {
            entries,
            children: None,
            ghosts: 0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn child(&self, i: usize) -> Option<NodeId> {
        self.children.as_ref().and_then(|c| c.get(i).copied())
    }

    pub fn position_of(&self, child: NodeId) -> Option<usize> {
        self.children
            .as_ref()
            .and_then(|c| c.iter().position(|&id| id == child))
    }
}

#[derive(Debug)]
pub(crate) enum NodeState<K, V> {
    Live(LiveNode<K, V>),
    Ghost(Value),
}

#[derive(Debug)]
pub(crate) struct Node<K, V> {
    /// Exclusive lower bound; `None` is unbounded.
    pub lkey: Option<K>,
    /// Exclusive upper bound; `None` is unbounded.
    pub rkey: Option<K>,
    pub parent: Option<NodeId>,
    pub state: NodeState<K, V>,
}

impl<K, V> Node<K, V> {
    pub fn live(&self) -> Option<&LiveNode<K, V>> {
        match &self.state {
            NodeState::Live(live) => Some(live),
            NodeState::Ghost(_) => None,
        }
    }

    pub fn live_mut(&mut self) -> Option<&mut LiveNode<K, V>> {
        match &mut self.state {
            NodeState::Live(live) => Some(live),
            NodeState::Ghost(_) => None,
        }
    }

    pub fn is_ghost(&self) -> bool {
        matches!(self.state, NodeState::Ghost(_))
    }

    pub fn ghost_meta(&self) -> Option<&Value> {
        match &self.state {
            NodeState::Ghost(meta) => Some(meta),
            NodeState::Live(_) => None,
        }
    }
}

/// Slab of nodes with handle reuse.
#[derive(Debug)]
pub(crate) struct Arena<K, V> {
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<NodeId>,
}

impl<K, V> Arena<K, V> {
    pub fn new() -> Self {
        Arena {
            nodes: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn alloc(&mut self, node: Node<K, V>) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    pub fn release(&mut self, id: NodeId) -> Option<Node<K, V>> {
        let node = self.nodes.get_mut(id.0)?.take();
        if node.is_some() {
            self.free.push(id);
        }
        node
    }

    /// Releases a node together with every node below it.
    pub fn release_subtree(&mut self, id: NodeId) -> usize {
        let mut stack = vec![id];
        let mut released = 0;
        while let Some(id) = stack.pop() {
            if let Some(node) = self.release(id) {
                released += 1;
                if let NodeState::Live(LiveNode {
                    children: Some(children),
                    ..
                }) = node.state
                {
                    stack.extend(children);
                }
            }
        }
        released
    }

    pub fn get(&self, id: NodeId) -> Option<&Node<K, V>> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node<K, V>> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Number of allocated nodes.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
    }
}

impl<K, V> Index<NodeId> for Arena<K, V> {
    type Output = Node<K, V>;

    fn index(&self, id: NodeId) -> &Node<K, V> {
        match self.get(id) {
            Some(node) => node,
            None => panic!("stale node handle {id}"),
        }
    }
}

impl<K, V> IndexMut<NodeId> for Arena<K, V> {
    fn index_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        match self.get_mut(id) {
            Some(node) => node,
            None => panic!("stale node handle {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(keys: &[i32]) -> Node<i32, ()> {
        Node {
            lkey: None,
            rkey: None,
            parent: None,
            state: NodeState::Live(LiveNode::leaf(
                keys.iter().map(|&k| Entry::loaded(k, ())).collect(),
            )),
        }
    }

    #[test]
    fn test_handles_are_reused() {
        let mut arena = Arena::new();
        let a = arena.alloc(leaf(&[1]));
        let b = arena.alloc(leaf(&[2]));
        assert_eq!(arena.len(), 2);
        assert!(arena.release(a).is_some());
        assert!(arena.release(a).is_none());
        assert!(arena.get(a).is_none());
        let c = arena.alloc(leaf(&[3]));
        assert_eq!(c, a);
        assert_eq!(arena[b].live().unwrap().entries[0].key, 2);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_release_subtree() {
        let mut arena = Arena::new();
        let l = arena.alloc(leaf(&[1]));
        let g = arena.alloc(Node {
            lkey: Some(2),
            rkey: None,
            parent: None,
            state: NodeState::Ghost(Value::from("ref")),
        });
        let root = arena.alloc(Node {
            lkey: None,
            rkey: None,
            parent: None,
            state: NodeState::Live(LiveNode {
                entries: vec![Entry::loaded(2, ())],
                children: Some(vec![l, g]),
                ghosts: 1,
            }),
        });
        assert!(arena[g].is_ghost());
        assert_eq!(arena[root].live().unwrap().position_of(g), Some(1));
        assert_eq!(arena.release_subtree(root), 3);
        assert_eq!(arena.len(), 0);
    }
}
