//! Persisted shapes of nodes and trees.
//!
//! A node record is a map:
//!
//! ```text
//! { "lkey": <key or null>, "rkey": <key or null>,
//!   "entries": <see EntriesLayout>,
//!   "subnodes": [<reference>, ...] }      (internal nodes only)
//! ```
//!
//! `subnodes` lists one reference per child, left to right, one more than
//! there are entries. A tree record wraps the root node record:
//!
//! ```text
//! { "format": "ghostdex.btree", "version": 1,
//!   "node_min": n, "size": n, "height": n, "root": <node record> }
//! ```

use std::collections::BTreeMap;

use ghostdex_common::{Result, error::Error, verify_data};
use ghostdex_serial::{Translator, Value};

pub const TREE_FORMAT: &str = "ghostdex.btree";
pub const TREE_VERSION: i64 = 1;

/// How a node record holds its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntriesLayout {
    /// A map from key to value meta. Keys must translate to strings.
    #[default]
    Map,
    /// A list of keys, in order. For sets: every value meta must be null.
    List,
}

/// A node as stored: translated bounds, translated keys with the meta of
/// each value, and the references of the children.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub lkey: Value,
    pub rkey: Value,
    pub entries: Vec<(Value, Value)>,
    pub subnodes: Option<Vec<Value>>,
}

impl NodeRecord {
    pub fn is_leaf(&self) -> bool {
        self.subnodes.is_none()
    }
}

/// Converts node records to and from their stored map shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeTranslator {
    pub layout: EntriesLayout,
}

impl NodeTranslator {
    pub fn new(layout: EntriesLayout) -> NodeTranslator {
        NodeTranslator { layout }
    }
}

impl Translator<NodeRecord, Value> for NodeTranslator {
    fn app(&self, node: &NodeRecord) -> Result<Value> {
        let entries = match self.layout {
            EntriesLayout::Map => {
                let mut map = BTreeMap::new();
                for (key, meta) in &node.entries {
                    let label = key.as_str("entry key").map_err(|_| {
                        Error::invalid_arg(
                            "entries",
                            format!("map layout needs string keys, found {}", key.type_name()),
                        )
                    })?;
                    if map.insert(label.to_string(), meta.clone()).is_some() {
                        return Err(Error::invalid_arg("entries", format!("duplicate key {label:?}")));
                    }
                }
                Value::Map(map)
            }
            EntriesLayout::List => {
                if let Some((key, _)) = node.entries.iter().find(|(_, meta)| !meta.is_null()) {
                    return Err(Error::invalid_arg(
                        "entries",
                        format!("list layout holds keys only; {key} has a value"),
                    ));
                }
                Value::List(node.entries.iter().map(|(key, _)| key.clone()).collect())
            }
        };

        let mut fields = BTreeMap::from([
            ("lkey".to_string(), node.lkey.clone()),
            ("rkey".to_string(), node.rkey.clone()),
            ("entries".to_string(), entries),
        ]);
        if let Some(subnodes) = &node.subnodes {
            fields.insert("subnodes".to_string(), Value::List(subnodes.clone()));
        }
        Ok(Value::Map(fields))
    }

    fn rev(&self, value: &Value) -> Result<NodeRecord> {
        let entries: Vec<(Value, Value)> = match self.layout {
            EntriesLayout::Map => value
                .field("entries")?
                .as_map("entries")?
                .iter()
                .map(|(label, meta)| (Value::String(label.clone()), meta.clone()))
                .collect(),
            EntriesLayout::List => value
                .field("entries")?
                .as_list("entries")?
                .iter()
                .map(|key| (key.clone(), Value::Null))
                .collect(),
        };
        let subnodes = value
            .opt_field("subnodes")?
            .map(|s| s.as_list("subnodes").map(<[Value]>::to_vec))
            .transpose()?;
        if let Some(subnodes) = &subnodes {
            verify_data!(subnodes, subnodes.len() == entries.len() + 1);
        }
        Ok(NodeRecord {
            lkey: value.field("lkey")?.clone(),
            rkey: value.field("rkey")?.clone(),
            entries,
            subnodes,
        })
    }
}

/// A whole tree as stored: parameters plus the root node.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeRecord {
    pub node_min: usize,
    pub size: usize,
    pub height: usize,
    pub root: NodeRecord,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TreeTranslator {
    pub nodes: NodeTranslator,
}

impl TreeTranslator {
    pub fn new(layout: EntriesLayout) -> TreeTranslator {
        TreeTranslator {
            nodes: NodeTranslator::new(layout),
        }
    }
}

impl Translator<TreeRecord, Value> for TreeTranslator {
    fn app(&self, tree: &TreeRecord) -> Result<Value> {
        Ok(Value::map([
            ("format", Value::from(TREE_FORMAT)),
            ("version", Value::Int(TREE_VERSION)),
            ("node_min", Value::from(tree.node_min)),
            ("size", Value::from(tree.size)),
            ("height", Value::from(tree.height)),
            ("root", self.nodes.app(&tree.root)?),
        ]))
    }

    fn rev(&self, value: &Value) -> Result<TreeRecord> {
        let format = value.field("format")?.as_str("format")?;
        if format != TREE_FORMAT {
            return Err(Error::invalid_format(
                "format",
                format!("expected {TREE_FORMAT}, found {format}"),
            ));
        }
        let version = value.field("version")?.as_int("version")?;
        if version != TREE_VERSION {
            return Err(Error::invalid_format(
                "version",
                format!("unsupported tree version {version}"),
            ));
        }
        let record = TreeRecord {
            node_min: value.field("node_min")?.as_usize("node_min")?,
            size: value.field("size")?.as_usize("size")?,
            height: value.field("height")?.as_usize("height")?,
            root: self.nodes.rev(value.field("root")?)?,
        };
        verify_data!(node_min, record.node_min >= 2);
        verify_data!(height, record.height >= 1);
        verify_data!(root, record.root.lkey.is_null() && record.root.rkey.is_null());
        Ok(record)
    }
}
