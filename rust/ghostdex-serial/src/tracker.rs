//! In-flight task registry.
//!
//! Pulls are registered under the canonical form of their reference, pushes
//! under their [`TaskId`]. Registration happens under the tracker lock together
//! with the submission of the task to the worker queue, so a unit of work is
//! never queued twice while it is in flight.

use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use ghostdex_common::{Result, error::Error};
use ghostdex_workflow::progress::{Progress, ProgressParts, SimpleProgress};

use crate::{task::TaskId, value::Value};

/// Progress of one task together with the slot its result lands in.
pub struct TaskProgress<R> {
    id: TaskId,
    progress: SimpleProgress,
    result: Mutex<Option<R>>,
}

impl<R: Clone> TaskProgress<R> {
    pub fn new(id: TaskId, subject: impl Into<String>) -> TaskProgress<R> {
        TaskProgress {
            id,
            progress: SimpleProgress::new(subject),
            result: Mutex::new(None),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn progress(&self) -> &SimpleProgress {
        &self.progress
    }

    /// Publishes the result, then signals completion.
    pub fn complete(&self, result: R) {
        *self.result.lock().unwrap() = Some(result);
        self.progress.finish();
    }

    pub fn fail(&self, error: Error) {
        self.progress.abort(error);
    }

    /// The result of a finished task. Call after a successful `join`.
    pub fn result(&self) -> Result<R> {
        self.result
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::invalid_operation(format!("result of task {}", self.id)))
    }

    /// Blocks until the task finishes and returns its result.
    pub fn wait(&self) -> Result<R> {
        self.progress.join()?;
        self.result()
    }
}

impl<R: Clone + Send + Sync> Progress for TaskProgress<R> {
    fn subject(&self) -> String {
        self.progress.subject()
    }

    fn status(&self) -> String {
        self.progress.status()
    }

    fn parts(&self) -> ProgressParts {
        self.progress.parts()
    }

    fn is_done(&self) -> bool {
        self.progress.is_done()
    }

    fn join(&self) -> Result<()> {
        self.progress.join()
    }
}

/// Outcome of registering a task with the tracker.
pub enum Admission<R> {
    /// The task was registered and submitted.
    New(Arc<TaskProgress<R>>),
    /// An equivalent task is already in flight; wait on its progress instead.
    Joined(Arc<TaskProgress<R>>),
}

impl<R> Admission<R> {
    pub fn progress(&self) -> &Arc<TaskProgress<R>> {
        match self {
            Admission::New(p) | Admission::Joined(p) => p,
        }
    }

    pub fn into_progress(self) -> Arc<TaskProgress<R>> {
        match self {
            Admission::New(p) | Admission::Joined(p) => p,
        }
    }

    pub fn is_joined(&self) -> bool {
        matches!(self, Admission::Joined(_))
    }
}

/// A point-in-time view of one in-flight task.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub subject: String,
    pub status: String,
    pub parts: ProgressParts,
}

struct TrackerState<T> {
    pulls: AHashMap<String, Arc<TaskProgress<T>>>,
    pushes: AHashMap<TaskId, Arc<TaskProgress<Value>>>,
}

/// Registry of in-flight pulls (yielding `T`) and pushes (yielding references).
pub struct ProgressTracker<T> {
    state: Mutex<TrackerState<T>>,
}

impl<T: Clone + Send + Sync + 'static> ProgressTracker<T> {
    pub fn new() -> ProgressTracker<T> {
        ProgressTracker {
            state: Mutex::new(TrackerState {
                pulls: AHashMap::new(),
                pushes: AHashMap::new(),
            }),
        }
    }

    /// Registers a pull of the unit identified by `key`, calling `submit` with
    /// the new progress while the tracker is locked. If a pull of the same
    /// unit is in flight, nothing is submitted and its progress is returned.
    pub fn admit_pull(
        &self,
        id: TaskId,
        key: &str,
        submit: impl FnOnce(Arc<TaskProgress<T>>),
    ) -> Admission<T> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.pulls.get(key) {
            return Admission::Joined(existing.clone());
        }
        let progress = Arc::new(TaskProgress::new(id, format!("pull {key}")));
        state.pulls.insert(key.to_string(), progress.clone());
        submit(progress.clone());
        Admission::New(progress)
    }

    /// Registers a push task; see [`admit_pull`](Self::admit_pull).
    pub fn admit_push(
        &self,
        id: TaskId,
        submit: impl FnOnce(Arc<TaskProgress<Value>>),
    ) -> Admission<Value> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.pushes.get(&id) {
            return Admission::Joined(existing.clone());
        }
        let progress = Arc::new(TaskProgress::new(id, format!("push {id}")));
        state.pushes.insert(id, progress.clone());
        submit(progress.clone());
        Admission::New(progress)
    }

    /// Removes a pull registration, if it still belongs to task `id`.
    pub fn retire_pull(&self, key: &str, id: TaskId) {
        let mut state = self.state.lock().unwrap();
        if state.pulls.get(key).is_some_and(|p| p.id() == id) {
            state.pulls.remove(key);
        }
    }

    pub fn retire_push(&self, id: TaskId) {
        self.state.lock().unwrap().pushes.remove(&id);
    }

    pub fn is_pulling(&self, key: &str) -> bool {
        self.state.lock().unwrap().pulls.contains_key(key)
    }

    /// Looks up the progress of an in-flight task.
    pub fn progress(&self, id: TaskId) -> Option<Arc<dyn Progress>> {
        let state = self.state.lock().unwrap();
        if let Some(p) = state.pushes.get(&id) {
            return Some(p.clone() as Arc<dyn Progress>);
        }
        state
            .pulls
            .values()
            .find(|p| p.id() == id)
            .map(|p| p.clone() as Arc<dyn Progress>)
    }

    /// Snapshot of all in-flight tasks, ordered by id.
    pub fn active(&self) -> Vec<TaskSnapshot> {
        let state = self.state.lock().unwrap();
        let mut snapshots: Vec<TaskSnapshot> = state
            .pulls
            .values()
            .map(|p| snapshot(p.as_ref()))
            .chain(state.pushes.values().map(|p| snapshot(p.as_ref())))
            .collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots
    }
}

impl<T: Clone + Send + Sync + 'static> Default for ProgressTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot<R: Clone + Send + Sync>(p: &TaskProgress<R>) -> TaskSnapshot {
    TaskSnapshot {
        id: p.id(),
        subject: p.subject(),
        status: p.status(),
        parts: p.parts(),
    }
}
