//! B-tree whose nodes can live partially outside of memory.
//!
//! [`BTree`] is the in-memory algorithm over an arena of nodes. A node is
//! either live or a ghost: a stand-in that keeps its bounds and the reference
//! the node was stored under. [`SkeletonBTree`] pairs a tree with the
//! serializers that move nodes and values to and from a store, and loads
//! whatever an operation needs on the way.

pub mod config;
pub mod entries;
pub mod node;
pub mod order;
pub mod record;
pub mod set;
pub mod skeleton;
pub mod tree;

pub use config::TreeConfig;
pub use entries::{EntrySerializer, InlineEntries, PackedEntries, UnitEntries};
pub use node::{NodeId, Slot};
pub use order::KeyOrder;
pub use record::{EntriesLayout, NodeRecord, NodeTranslator, TreeRecord, TreeTranslator};
pub use set::SkeletonBTreeSet;
pub use skeleton::{Serializers, SkeletonBTree};
pub use tree::BTree;
