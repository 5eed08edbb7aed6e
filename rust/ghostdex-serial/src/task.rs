//! Units of storage work.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::value::Value;

/// Identifier issued to every task when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn next() -> TaskId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Loads the data behind `meta`. `data` is filled in once the task completes.
#[derive(Debug)]
pub struct PullTask<T> {
    id: TaskId,
    pub meta: Value,
    pub data: Option<T>,
}

impl<T> PullTask<T> {
    pub fn new(meta: Value) -> PullTask<T> {
        PullTask {
            id: TaskId::next(),
            meta,
            data: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }
}

/// Stores `data`. `meta` receives the reference once the task completes.
#[derive(Debug)]
pub struct PushTask<T> {
    id: TaskId,
    pub data: Arc<T>,
    pub meta: Option<Value>,
}

impl<T> PushTask<T> {
    pub fn new(data: T) -> PushTask<T> {
        Self::from_arc(Arc::new(data))
    }

    pub fn from_arc(data: Arc<T>) -> PushTask<T> {
        PushTask {
            id: TaskId::next(),
            data,
            meta: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }
}
