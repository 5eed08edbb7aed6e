//! Bin packing of small keyed payloads into capacity-bounded storage units.
//!
//! [`bin_pack`] decides the layout; [`Packer`] writes the bins through a batch
//! archiver and reads them back. A payload is a list of items; its size is the
//! number of items.
//!
//! Each key's placement is recorded in per-key metadata kept by the *owner* of
//! the payloads, so reassembly knows which bins to read and how long each
//! partition is without first reading the bins:
//!
//! ```text
//! { "bins": [<bin reference>, ...], "size": [<partition length>, ...] }
//! ```
//!
//! A bin itself is a map from key to that key's partition.

use std::collections::BTreeMap;

use ahash::AHashMap;
use ghostdex_common::{Result, error::Error, verify_arg, verify_data};

use crate::{
    archive::BatchArchiver,
    codec,
    task::{PullTask, PushTask},
    value::Value,
};

pub const FIELD_BINS: &str = "bins";
pub const FIELD_SIZE: &str = "size";

/// A contiguous slice of one payload placed in a bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// Index of the payload in the input.
    pub item: usize,
    /// Sequence number of this partition within the payload.
    pub seq: usize,
    pub offset: usize,
    pub len: usize,
}

/// One bin of a packing plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinPlan {
    pub index: usize,
    pub load: usize,
    pub partitions: Vec<Partition>,
}

impl BinPlan {
    fn new(index: usize) -> BinPlan {
        BinPlan {
            index,
            load: 0,
            partitions: Vec::new(),
        }
    }

    fn put(&mut self, partition: Partition) {
        self.load += partition.len;
        self.partitions.push(partition);
    }

    fn holds_item(&self, item: usize) -> bool {
        self.partitions.iter().any(|p| p.item == item)
    }

    /// Position of the smallest partition; among equals, the latest placed.
    fn smallest(&self) -> Option<usize> {
        self.partitions
            .iter()
            .enumerate()
            .min_by_key(|(pos, p)| (p.len, std::cmp::Reverse(*pos)))
            .map(|(pos, _)| pos)
    }
}

/// Packs payloads of the given sizes into bins of `capacity`.
///
/// - A payload larger than half the capacity is split into
///   `(size - 1) / capacity + 1` near-equal partitions, each opening its own
///   bin; the first `size % num` partitions carry one extra item.
/// - The remaining payloads, largest first, go into the fullest bin that still
///   has room, or into a new bin.
/// - A rebalancing pass then repeatedly moves the smallest partition of the
///   fullest bin into the emptiest bin while that narrows the gap between them,
///   for at most `payloads × bins` steps.
///
/// When no payload needs splitting, at most one bin ends up half full or less.
/// Bins are returned ordered by index; partitions carry their sequence number
/// since rebalancing may move them.
pub fn bin_pack(capacity: usize, sizes: &[usize]) -> Result<Vec<BinPlan>> {
    verify_arg!(capacity, capacity > 0);
    let half = capacity / 2;
    let mut bins: Vec<BinPlan> = Vec::new();
    let mut small: Vec<(usize, usize)> = Vec::new();

    for (item, &size) in sizes.iter().enumerate() {
        if size > half {
            let num = (size - 1) / capacity + 1;
            let base = size / num;
            let extra = size - num * base;
            let mut offset = 0;
            for seq in 0..num {
                let len = base + usize::from(seq < extra);
                let mut bin = BinPlan::new(bins.len());
                bin.put(Partition {
                    item,
                    seq,
                    offset,
                    len,
                });
                bins.push(bin);
                offset += len;
            }
        } else {
            small.push((item, size));
        }
    }

    small.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for (item, size) in small {
        let partition = Partition {
            item,
            seq: 0,
            offset: 0,
            len: size,
        };
        let target = bins
            .iter()
            .enumerate()
            .filter(|(_, bin)| bin.load + size <= capacity)
            .max_by_key(|(_, bin)| (bin.load, std::cmp::Reverse(bin.index)))
            .map(|(pos, _)| pos);
        match target {
            Some(pos) => bins[pos].put(partition),
            None => {
                let mut bin = BinPlan::new(bins.len());
                bin.put(partition);
                bins.push(bin);
            }
        }
    }

    rebalance(&mut bins, sizes.len());
    Ok(bins)
}

fn rebalance(bins: &mut [BinPlan], num_items: usize) {
    if bins.len() < 2 {
        return;
    }
    // Emptiest bin; among equals, the highest index.
    let mut smallest = (0..bins.len())
        .min_by_key(|&i| (bins[i].load, std::cmp::Reverse(bins[i].index)))
        .unwrap_or(0);
    let mut queue: Vec<usize> = (0..bins.len()).filter(|&i| i != smallest).collect();
    let max_steps = num_items * queue.len();

    let mut steps = 0;
    while !queue.is_empty() && steps < max_steps {
        steps += 1;
        let q = (0..queue.len())
            .max_by_key(|&q| (bins[queue[q]].load, std::cmp::Reverse(bins[queue[q]].index)))
            .unwrap_or(0);
        let fullest = queue.swap_remove(q);

        let Some(pos) = bins[fullest].smallest() else {
            continue;
        };
        let candidate = bins[fullest].partitions[pos];
        let gap = bins[fullest].load.saturating_sub(bins[smallest].load);
        if candidate.len < gap && !bins[smallest].holds_item(candidate.item) {
            bins[fullest].partitions.remove(pos);
            bins[fullest].load -= candidate.len;
            bins[smallest].put(candidate);
            if bins[fullest].load < bins[smallest].load {
                queue.push(smallest);
                smallest = fullest;
            } else {
                queue.push(fullest);
            }
        }
        // Otherwise no move can ever involve this bin again; it stays out.
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackerConfig {
    /// Items per bin.
    pub capacity: usize,
}

impl Default for PackerConfig {
    fn default() -> Self {
        PackerConfig { capacity: 256 }
    }
}

/// Stores keyed payloads in packed bins through a batch archiver.
pub struct Packer<B> {
    capacity: usize,
    bins: B,
}

impl<B: BatchArchiver<Value>> Packer<B> {
    pub fn new(capacity: usize, bins: B) -> Result<Packer<B>> {
        verify_arg!(capacity, capacity > 0);
        Ok(Packer { capacity, bins })
    }

    pub fn with_config(config: PackerConfig, bins: B) -> Result<Packer<B>> {
        Self::new(config.capacity, bins)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bins(&self) -> &B {
        &self.bins
    }

    /// Packs and pushes the payloads; returns the per-key metadata.
    pub fn push(
        &self,
        payloads: BTreeMap<String, Vec<Value>>,
    ) -> Result<BTreeMap<String, Value>> {
        if payloads.is_empty() {
            return Ok(BTreeMap::new());
        }
        let keys: Vec<&String> = payloads.keys().collect();
        let items: Vec<&Vec<Value>> = payloads.values().collect();
        let sizes: Vec<usize> = items.iter().map(|p| p.len()).collect();
        let plan = bin_pack(self.capacity, &sizes)?;

        let mut tasks: Vec<PushTask<Value>> = plan
            .iter()
            .map(|bin| {
                let record: BTreeMap<String, Value> = bin
                    .partitions
                    .iter()
                    .map(|p| {
                        let slice = &items[p.item][p.offset..p.offset + p.len];
                        (keys[p.item].clone(), Value::List(slice.to_vec()))
                    })
                    .collect();
                PushTask::new(Value::Map(record))
            })
            .collect();
        self.bins.push_all(&mut tasks)?;
        if tasks.len() != plan.len() {
            return Err(Error::invalid_operation(format!(
                "packer: {} of {} bins were not stored",
                plan.len() - tasks.len(),
                plan.len()
            )));
        }
        log::debug!(
            "packed {} payloads ({} items) into {} bins of capacity {}",
            keys.len(),
            sizes.iter().sum::<usize>(),
            plan.len(),
            self.capacity
        );

        // Partitions of each payload, by sequence number.
        let mut placement: Vec<Vec<(usize, usize, usize)>> = vec![Vec::new(); keys.len()];
        for bin in &plan {
            for p in &bin.partitions {
                placement[p.item].push((p.seq, bin.index, p.len));
            }
        }
        let mut metas = BTreeMap::new();
        for (item, mut parts) in placement.into_iter().enumerate() {
            parts.sort_unstable();
            let mut refs = Vec::with_capacity(parts.len());
            let mut lens = Vec::with_capacity(parts.len());
            for (_, bin, len) in parts {
                let meta = tasks[bin].meta.clone().ok_or_else(|| {
                    Error::invalid_operation(format!("packer: bin {bin} has no reference"))
                })?;
                refs.push(meta);
                lens.push(len as i64);
            }
            metas.insert(
                keys[item].clone(),
                Value::map([
                    (FIELD_BINS, Value::List(refs)),
                    (FIELD_SIZE, Value::Ints(lens)),
                ]),
            );
        }
        Ok(metas)
    }

    /// Pulls the bins named by the metadata (each distinct bin once) and
    /// reassembles every key's payload.
    pub fn pull(&self, metas: &BTreeMap<String, Value>) -> Result<BTreeMap<String, Vec<Value>>> {
        let mut layouts = Vec::with_capacity(metas.len());
        let mut bin_slots: AHashMap<String, usize> = AHashMap::new();
        let mut tasks: Vec<PullTask<Value>> = Vec::new();
        for (key, meta) in metas {
            let refs = meta.field(FIELD_BINS)?.as_list(FIELD_BINS)?;
            let lens = meta.field(FIELD_SIZE)?.as_ints(FIELD_SIZE)?;
            verify_data!(meta, refs.len() == lens.len());
            let mut parts = Vec::with_capacity(refs.len());
            for (bin_ref, &len) in refs.iter().zip(lens) {
                verify_data!(size, len >= 0);
                let slot = *bin_slots
                    .entry(codec::canonical_key(bin_ref))
                    .or_insert_with(|| {
                        tasks.push(PullTask::new(bin_ref.clone()));
                        tasks.len() - 1
                    });
                parts.push((slot, len as usize));
            }
            layouts.push((key, parts));
        }

        let requested = tasks.len();
        self.bins.pull_all(&mut tasks)?;
        if tasks.len() != requested {
            return Err(Error::invalid_operation(format!(
                "packer: {} of {requested} bins could not be loaded",
                requested - tasks.len()
            )));
        }

        let mut payloads = BTreeMap::new();
        for (key, parts) in layouts {
            let mut payload = Vec::with_capacity(parts.iter().map(|(_, len)| len).sum());
            for (slot, len) in parts {
                let bin = tasks[slot]
                    .data
                    .as_ref()
                    .ok_or_else(|| Error::invalid_operation("packer: bin not loaded"))?;
                let partition = bin
                    .as_map("bin")?
                    .get(key)
                    .ok_or_else(|| Error::invalid_format("bin", format!("no partition for {key:?}")))?
                    .as_list("partition")?;
                if partition.len() != len {
                    return Err(Error::invalid_format(
                        "partition",
                        format!("{key:?}: expected {len} items, found {}", partition.len()),
                    ));
                }
                payload.extend_from_slice(partition);
            }
            payloads.insert(key.clone(), payload);
        }
        Ok(payloads)
    }
}
