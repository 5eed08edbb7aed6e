use std::{
    sync::{
        RwLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use ahash::AHashMap;
use ghostdex_common::{Result, error::Error};

use crate::{archive::Archiver, codec, value::Value};

/// Content-addressed in-memory store.
///
/// Units are kept in their leaf encoding, so a push/pull cycle exercises the
/// same codec as a persistent store. References are `Value::String` content
/// addresses. Counts every pull and push, and can simulate a slow store.
#[derive(Default)]
pub struct MemoryArchiver {
    blobs: RwLock<AHashMap<String, Vec<u8>>>,
    pulls: AtomicUsize,
    pushes: AtomicUsize,
    latency: Option<Duration>,
}

impl MemoryArchiver {
    pub fn new() -> MemoryArchiver {
        Self::default()
    }

    /// Every pull sleeps for `latency` before returning.
    pub fn with_latency(latency: Duration) -> MemoryArchiver {
        MemoryArchiver {
            latency: Some(latency),
            ..Default::default()
        }
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Number of distinct units stored.
    pub fn len(&self) -> usize {
        self.blobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, meta: &Value) -> bool {
        meta.as_str("reference")
            .map(|key| self.blobs.read().unwrap().contains_key(key))
            .unwrap_or(false)
    }

    /// Size in bytes of all stored units.
    pub fn stored_bytes(&self) -> usize {
        self.blobs.read().unwrap().values().map(Vec::len).sum()
    }
}

impl Archiver<Value> for MemoryArchiver {
    fn pull(&self, meta: &Value) -> Result<Value> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let key = meta.as_str("reference")?;
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        let blobs = self.blobs.read().unwrap();
        let bytes = blobs
            .get(key)
            .ok_or_else(|| Error::invalid_format("reference", format!("no unit stored at {key}")))?;
        codec::decode(bytes)
    }

    fn push(&self, data: &Value) -> Result<Value> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let bytes = codec::encode(data)?;
        let key = codec::content_address(&bytes);
        self.blobs
            .write()
            .unwrap()
            .entry(key.clone())
            .or_insert(bytes);
        Ok(Value::String(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pull() {
        let store = MemoryArchiver::new();
        let unit = Value::map([("a", Value::Int(1)), ("b", Value::Int(2))]);
        let meta = store.push(&unit).unwrap();
        assert!(store.contains(&meta));
        assert_eq!(store.pull(&meta).unwrap(), unit);
        assert_eq!((store.push_count(), store.pull_count()), (1, 1));
    }

    #[test]
    fn test_equal_units_share_address() {
        let store = MemoryArchiver::new();
        let m1 = store.push(&Value::Ints(vec![1, 2])).unwrap();
        let m2 = store.push(&Value::Ints(vec![1, 2])).unwrap();
        let m3 = store.push(&Value::List(vec![Value::Int(1), Value::Int(2)])).unwrap();
        assert_eq!(m1, m2);
        assert_ne!(m1, m3);
        assert_eq!(store.len(), 2);
        assert_eq!(store.push_count(), 3);
    }

    #[test]
    fn test_unknown_reference() {
        let store = MemoryArchiver::new();
        assert!(store.pull(&Value::from("nope")).unwrap_err().is_invalid_format());
        assert!(store.pull(&Value::Int(1)).unwrap_err().is_invalid_format());
    }
}
