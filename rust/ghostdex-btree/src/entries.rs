//! Storage of entry values, separately from the nodes that hold them.
//!
//! A node's values are pushed as one batch and replaced by per-value metas.
//! The meta of each value is kept in the node record, next to its key, so a
//! node can be inflated without loading its values.

use std::{collections::BTreeMap, sync::Arc};

use ghostdex_common::{Result, error::Error, verify_arg};
use ghostdex_serial::{BatchArchiver, Packer, Translator, Value};

/// Pushes and pulls the values of one node.
///
/// Every value comes with a label: its key translated to a string, unique
/// within the batch.
pub trait EntrySerializer<V>: Send + Sync {
    /// Stores the values; returns one meta per value, in input order.
    ///
    /// Values are passed mutably so that a value owning storage of its own can
    /// release it first.
    fn push(&self, values: &mut [(String, &mut V)]) -> Result<Vec<Value>>;

    /// Loads values back from the metas returned by `push`, in input order.
    fn pull(&self, metas: &[(String, Value)]) -> Result<Vec<V>>;
}

impl<V, E: EntrySerializer<V> + ?Sized> EntrySerializer<V> for Arc<E> {
    fn push(&self, values: &mut [(String, &mut V)]) -> Result<Vec<Value>> {
        (**self).push(values)
    }

    fn pull(&self, metas: &[(String, Value)]) -> Result<Vec<V>> {
        (**self).pull(metas)
    }
}

/// Keeps each value inside the node record: the meta is the translated value.
#[derive(Debug, Clone, Default)]
pub struct InlineEntries<T>(pub T);

impl<V, T: Translator<V, Value>> EntrySerializer<V> for InlineEntries<T> {
    fn push(&self, values: &mut [(String, &mut V)]) -> Result<Vec<Value>> {
        values.iter().map(|(_, value)| self.0.app(value)).collect()
    }

    fn pull(&self, metas: &[(String, Value)]) -> Result<Vec<V>> {
        metas.iter().map(|(_, meta)| self.0.rev(meta)).collect()
    }
}

/// Values of sets: nothing to store, every meta is null.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitEntries;

impl EntrySerializer<()> for UnitEntries {
    fn push(&self, values: &mut [(String, &mut ())]) -> Result<Vec<Value>> {
        Ok(vec![Value::Null; values.len()])
    }

    fn pull(&self, metas: &[(String, Value)]) -> Result<Vec<()>> {
        Ok(vec![(); metas.len()])
    }
}

/// Packs the values of a node into shared bins.
///
/// Each value is translated to a list of items; the lists are packed by a
/// [`Packer`] and the packer's per-key metadata becomes the value's meta.
pub struct PackedEntries<T, B> {
    translator: T,
    packer: Packer<B>,
}

impl<T, B: BatchArchiver<Value>> PackedEntries<T, B> {
    pub fn new(translator: T, packer: Packer<B>) -> Self {
        PackedEntries { translator, packer }
    }

    pub fn packer(&self) -> &Packer<B> {
        &self.packer
    }
}

impl<V, T, B> EntrySerializer<V> for PackedEntries<T, B>
where
    T: Translator<V, Vec<Value>>,
    B: BatchArchiver<Value>,
{
    fn push(&self, values: &mut [(String, &mut V)]) -> Result<Vec<Value>> {
        let mut payloads = BTreeMap::new();
        for (label, value) in values.iter() {
            let items = self.translator.app(value)?;
            verify_arg!(labels, payloads.insert(label.clone(), items).is_none());
        }
        let mut metas = self.packer.push(payloads)?;
        values
            .iter()
            .map(|(label, _)| {
                metas
                    .remove(label)
                    .ok_or_else(|| Error::invalid_operation(format!("no packer meta for {label:?}")))
            })
            .collect()
    }

    fn pull(&self, metas: &[(String, Value)]) -> Result<Vec<V>> {
        let requests: BTreeMap<String, Value> = metas.iter().cloned().collect();
        let payloads = self.packer.pull(&requests)?;
        metas
            .iter()
            .map(|(label, _)| {
                let items = payloads
                    .get(label)
                    .ok_or_else(|| Error::invalid_format("entries", format!("no payload for {label:?}")))?;
                self.translator.rev(items)
            })
            .collect()
    }
}
