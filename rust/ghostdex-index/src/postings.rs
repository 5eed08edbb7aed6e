//! Storage of the postings sets held by the term table.
//!
//! A postings set is itself a skeleton tree. On deflation its nodes below the
//! root go to the node store as usual, while the postings of its root are
//! packed together with those of its neighbours in the term table. The meta
//! of a set is the packer's placement plus the shape of the tree:
//!
//! ```text
//! { "bins": [...], "size": [...],
//!   "tree": { "node_min": n, "size": n, "height": n, "subnodes": [...] } }
//! ```
//!
//! Small sets (a root leaf) cost no node of their own.

use std::{collections::BTreeMap, sync::Arc};

use ghostdex_btree::{EntrySerializer, NodeRecord, Serializers, TreeRecord};
use ghostdex_common::{Result, error::Error};
use ghostdex_serial::{BatchArchiver, Packer, Value};

use crate::posting::{Posting, PostingSet, PostingValue};

const FIELD_TREE: &str = "tree";

pub struct PostingsEntries {
    sets: Serializers<Posting, ()>,
    packer: Packer<Arc<dyn BatchArchiver<Value>>>,
}

impl PostingsEntries {
    pub fn new(store: Arc<dyn BatchArchiver<Value>>, packer_capacity: usize) -> Result<Self> {
        Ok(PostingsEntries {
            sets: Self::set_serializers(store.clone()),
            packer: Packer::new(packer_capacity, store)?,
        })
    }

    /// Serializers of postings sets over `store`.
    pub fn set_serializers(store: Arc<dyn BatchArchiver<Value>>) -> Serializers<Posting, ()> {
        PostingSet::serializers(PostingValue, store)
    }

    pub fn sets(&self) -> &Serializers<Posting, ()> {
        &self.sets
    }
}

impl EntrySerializer<PostingSet> for PostingsEntries {
    fn push(&self, values: &mut [(String, &mut PostingSet)]) -> Result<Vec<Value>> {
        let mut payloads = BTreeMap::new();
        let mut shapes = Vec::with_capacity(values.len());
        for (term, set) in values.iter_mut() {
            set.deflate()?;
            let record = set.to_record()?;
            let mut shape = vec![
                ("node_min", Value::from(record.node_min)),
                ("size", Value::from(record.size)),
                ("height", Value::from(record.height)),
            ];
            if let Some(subnodes) = record.root.subnodes {
                shape.push(("subnodes", Value::List(subnodes)));
            }
            shapes.push(Value::map(shape));
            let postings = record.root.entries.into_iter().map(|(key, _)| key).collect();
            payloads.insert(term.clone(), postings);
        }

        let mut placements = self.packer.push(payloads)?;
        values
            .iter()
            .zip(shapes)
            .map(|((term, _), shape)| {
                let mut meta = placements
                    .remove(term)
                    .ok_or_else(|| Error::invalid_operation(format!("no placement for {term:?}")))?;
                meta.as_map_mut("postings meta")?
                    .insert(FIELD_TREE.to_string(), shape);
                Ok(meta)
            })
            .collect()
    }

    fn pull(&self, metas: &[(String, Value)]) -> Result<Vec<PostingSet>> {
        let requests: BTreeMap<String, Value> = metas.iter().cloned().collect();
        let mut payloads = self.packer.pull(&requests)?;
        metas
            .iter()
            .map(|(term, meta)| {
                let postings = payloads
                    .remove(term)
                    .ok_or_else(|| Error::invalid_format("postings", format!("no payload for {term:?}")))?;
                let shape = meta.field(FIELD_TREE)?;
                let subnodes = shape
                    .opt_field("subnodes")?
                    .map(|s| s.as_list("subnodes").map(<[Value]>::to_vec))
                    .transpose()?;
                let record = TreeRecord {
                    node_min: shape.field("node_min")?.as_usize("node_min")?,
                    size: shape.field("size")?.as_usize("size")?,
                    height: shape.field("height")?.as_usize("height")?,
                    root: NodeRecord {
                        lkey: Value::Null,
                        rkey: Value::Null,
                        entries: postings.into_iter().map(|p| (p, Value::Null)).collect(),
                        subnodes,
                    },
                };
                PostingSet::from_record(&record, self.sets.clone())
            })
            .collect()
    }
}
