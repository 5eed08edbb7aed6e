//! Batch execution of storage tasks on a worker pool.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use ghostdex_common::{Result, error::Error};
use ghostdex_workflow::{
    progress::{CompositeProgress, Progress},
    thread_pool::ThreadPool,
};

use crate::{
    archive::{Archiver, BatchArchiver},
    codec,
    task::{PullTask, PushTask},
    tracker::{ProgressTracker, TaskProgress, TaskSnapshot},
    value::Value,
};

/// Runs batches of pulls and pushes through an [`Archiver`] on a shared
/// [`ThreadPool`].
///
/// A pull of a unit that is already being pulled (by this batch or any other
/// caller) waits for the in-flight pull instead of issuing a second one; all
/// waiters observe the same value. A batch call returns once every task in it
/// has finished. Tasks failing with a benign abort are dropped from the batch,
/// and the first fatal abort is returned to the caller.
///
/// A fatal abort does not cancel the rest of the batch. Tasks already queued
/// still run to completion and their stores may be written; the error is
/// only reported after the whole batch has drained.
///
/// Must not be called from a worker of its own pool: the caller blocks until
/// the batch drains.
pub struct ParallelSerializer<T, A> {
    inner: Arc<Shared<T, A>>,
}

struct Shared<T, A> {
    name: String,
    archiver: A,
    pool: ThreadPool,
    tracker: ProgressTracker<T>,
}

impl<T, A> ParallelSerializer<T, A>
where
    T: Clone + Send + Sync + 'static,
    A: Archiver<T> + 'static,
{
    /// Runs tasks on the global pool.
    pub fn new(archiver: A) -> Self {
        Self::with_pool(archiver, ThreadPool::global().clone())
    }

    pub fn with_pool(archiver: A, pool: ThreadPool) -> Self {
        Self::named("serializer", archiver, pool)
    }

    /// `name` prefixes log lines and progress subjects.
    pub fn named(name: impl Into<String>, archiver: A, pool: ThreadPool) -> Self {
        ParallelSerializer {
            inner: Arc::new(Shared {
                name: name.into(),
                archiver,
                pool,
                tracker: ProgressTracker::new(),
            }),
        }
    }

    pub fn archiver(&self) -> &A {
        &self.inner.archiver
    }

    pub fn tracker(&self) -> &ProgressTracker<T> {
        &self.inner.tracker
    }

    /// In-flight tasks of this serializer.
    pub fn active(&self) -> Vec<TaskSnapshot> {
        self.inner.tracker.active()
    }

    fn join_batch<R: Clone + Send + Sync + 'static>(
        &self,
        what: &str,
        progresses: &[Arc<TaskProgress<R>>],
        joined: usize,
    ) -> Vec<Result<()>> {
        let batch = CompositeProgress::new(
            format!("{}: {what} batch of {}", self.inner.name, progresses.len()),
            progresses
                .iter()
                .map(|p| p.clone() as Arc<dyn Progress>)
                .collect(),
        );
        let outcomes = batch.join_each();
        log::debug!(
            "{}: {} ({joined} joined in-flight tasks)",
            batch.subject(),
            batch.parts()
        );
        outcomes
    }
}

impl<T, A> Shared<T, A>
where
    T: Clone + Send + Sync + 'static,
    A: Archiver<T> + 'static,
{
    fn run_pull(&self, key: String, meta: Value, progress: Arc<TaskProgress<T>>) {
        let p = progress.progress();
        p.add_part_known(1, true);
        p.add_part_started();
        p.set_status("pulling");
        let result = catch_unwind(AssertUnwindSafe(|| self.archiver.pull(&meta)))
            .unwrap_or_else(|_| Err(self.panicked()));
        self.tracker.retire_pull(&key, progress.id());
        match result {
            Ok(data) => progress.complete(data),
            Err(e) => {
                if !e.is_benign_abort() {
                    log::warn!("{}: pull {key} failed: {e}", self.name);
                }
                progress.fail(e);
            }
        }
    }

    fn run_push(&self, data: Arc<T>, progress: Arc<TaskProgress<Value>>) {
        let p = progress.progress();
        p.add_part_known(1, true);
        p.add_part_started();
        p.set_status("pushing");
        let result = catch_unwind(AssertUnwindSafe(|| self.archiver.push(&data)))
            .unwrap_or_else(|_| Err(self.panicked()));
        self.tracker.retire_push(progress.id());
        match result {
            Ok(meta) => progress.complete(meta),
            Err(e) => {
                if !e.is_benign_abort() {
                    log::warn!("{}: push {} failed: {e}", self.name, progress.id());
                }
                progress.fail(e);
            }
        }
    }

    #[cold]
    fn panicked(&self) -> Error {
        Error::invalid_operation(format!("{}: archiver panicked", self.name))
    }
}

impl<T, A> BatchArchiver<T> for ParallelSerializer<T, A>
where
    T: Clone + Send + Sync + 'static,
    A: Archiver<T> + 'static,
{
    fn pull_all(&self, tasks: &mut Vec<PullTask<T>>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let mut joined = 0;
        let progresses: Vec<_> = tasks
            .iter()
            .map(|task| {
                let key = codec::canonical_key(&task.meta);
                let admission = self.inner.tracker.admit_pull(task.id(), &key, |progress| {
                    let shared = self.inner.clone();
                    let meta = task.meta.clone();
                    let key = key.clone();
                    self.inner
                        .pool
                        .spawn_detached(move || shared.run_pull(key, meta, progress));
                });
                if admission.is_joined() {
                    log::trace!("{}: task {} joins pull of {key}", self.inner.name, task.id());
                    joined += 1;
                }
                admission.into_progress()
            })
            .collect();

        let outcomes = self.join_batch("pull", &progresses, joined);
        let mut fatal = None;
        for ((task, progress), outcome) in tasks.iter_mut().zip(&progresses).zip(outcomes) {
            match outcome {
                Ok(()) => task.data = Some(progress.result()?),
                Err(e) if e.is_benign_abort() => task.data = None,
                Err(e) => {
                    fatal.get_or_insert(e);
                }
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }
        tasks.retain(|task| task.data.is_some());
        Ok(())
    }

    fn push_all(&self, tasks: &mut Vec<PushTask<T>>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let mut joined = 0;
        let progresses: Vec<_> = tasks
            .iter()
            .map(|task| {
                let admission = self.inner.tracker.admit_push(task.id(), |progress| {
                    let shared = self.inner.clone();
                    let data = task.data.clone();
                    self.inner
                        .pool
                        .spawn_detached(move || shared.run_push(data, progress));
                });
                if admission.is_joined() {
                    joined += 1;
                }
                admission.into_progress()
            })
            .collect();

        let outcomes = self.join_batch("push", &progresses, joined);
        let mut fatal = None;
        for ((task, progress), outcome) in tasks.iter_mut().zip(&progresses).zip(outcomes) {
            match outcome {
                Ok(()) => task.meta = Some(progress.result()?),
                Err(e) if e.is_benign_abort() => task.meta = None,
                Err(e) => {
                    fatal.get_or_insert(e);
                }
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }
        tasks.retain(|task| task.meta.is_some());
        Ok(())
    }
}

impl<T, A> Archiver<T> for ParallelSerializer<T, A>
where
    T: Clone + Send + Sync + 'static,
    A: Archiver<T> + 'static,
{
    fn pull(&self, meta: &Value) -> Result<T> {
        self.pull_one(meta.clone())
    }

    fn push(&self, data: &T) -> Result<Value> {
        self.push_one(data.clone())
    }
}

impl<T, A> Clone for ParallelSerializer<T, A> {
    fn clone(&self) -> Self {
        ParallelSerializer {
            inner: self.inner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryArchiver;
    use std::{thread, time::Duration};

    fn pool() -> ThreadPool {
        ThreadPool::new(4)
    }

    #[test]
    fn test_push_and_pull_batches() {
        let serializer = ParallelSerializer::<Value, _>::with_pool(MemoryArchiver::new(), pool());
        let mut pushes: Vec<_> = (0..10i64).map(|i| PushTask::new(Value::Int(i))).collect();
        serializer.push_all(&mut pushes).unwrap();
        assert_eq!(pushes.len(), 10);
        assert_eq!(serializer.archiver().push_count(), 10);

        let mut pulls: Vec<_> = pushes
            .iter()
            .map(|t| PullTask::new(t.meta.clone().unwrap()))
            .collect();
        serializer.pull_all(&mut pulls).unwrap();
        let values: Vec<_> = pulls.into_iter().map(|t| t.data.unwrap()).collect();
        assert_eq!(values, (0..10).map(Value::Int).collect::<Vec<_>>());
        assert!(serializer.active().is_empty());
    }

    #[test]
    fn test_duplicate_refs_in_one_batch_pull_once() {
        let store = MemoryArchiver::with_latency(Duration::from_millis(50));
        let serializer = ParallelSerializer::<Value, _>::with_pool(store, pool());
        let meta = serializer.archiver().push(&Value::from("x")).unwrap();
        let mut pulls = vec![PullTask::new(meta.clone()), PullTask::new(meta)];
        serializer.pull_all(&mut pulls).unwrap();
        assert_eq!(pulls.len(), 2);
        assert_eq!(pulls[0].data, Some(Value::from("x")));
        assert_eq!(pulls[1].data, Some(Value::from("x")));
        assert_eq!(serializer.archiver().pull_count(), 1);
    }

    #[test]
    fn test_concurrent_pulls_dedup() {
        let store = MemoryArchiver::with_latency(Duration::from_millis(200));
        let serializer = ParallelSerializer::<Value, _>::with_pool(store, pool());
        let unit = Value::map([("a", Value::Int(1))]);
        let meta = serializer.archiver().push(&unit).unwrap();

        let callers: Vec<_> = (0..2)
            .map(|_| {
                let serializer = serializer.clone();
                let meta = meta.clone();
                thread::spawn(move || serializer.pull(&meta))
            })
            .collect();
        let results: Vec<_> = callers
            .into_iter()
            .map(|c| c.join().unwrap().unwrap())
            .collect();
        assert_eq!(results, vec![unit.clone(), unit]);
        assert_eq!(serializer.archiver().pull_count(), 1);
    }

    struct Failing;

    impl Archiver<Value> for Failing {
        fn pull(&self, meta: &Value) -> Result<Value> {
            match meta.as_int("ref")? {
                0 => Err(Error::task_complete("zero")),
                1 => Err(Error::invalid_format("unit", "corrupt")),
                2 => panic!("store exploded"),
                i => Ok(Value::Int(i)),
            }
        }

        fn push(&self, data: &Value) -> Result<Value> {
            Ok(data.clone())
        }
    }

    #[test]
    fn test_benign_aborts_are_dropped() {
        let serializer = ParallelSerializer::<Value, _>::with_pool(Failing, pool());
        let mut pulls: Vec<_> = [5i64, 0, 7]
            .into_iter()
            .map(|i| PullTask::new(Value::Int(i)))
            .collect();
        serializer.pull_all(&mut pulls).unwrap();
        let values: Vec<_> = pulls.iter().map(|t| t.data.clone().unwrap()).collect();
        assert_eq!(values, vec![Value::Int(5), Value::Int(7)]);
    }

    #[test]
    fn test_fatal_abort_fails_batch() {
        let serializer = ParallelSerializer::<Value, _>::with_pool(Failing, pool());
        let mut pulls: Vec<_> = [5i64, 1, 7]
            .into_iter()
            .map(|i| PullTask::new(Value::Int(i)))
            .collect();
        let err = serializer.pull_all(&mut pulls).unwrap_err();
        assert!(err.is_fatal_abort());
        assert!(err.root_cause().is_invalid_format());
    }

    /// Stores everything except negative numbers.
    struct NoNegatives(MemoryArchiver);

    impl Archiver<Value> for NoNegatives {
        fn pull(&self, meta: &Value) -> Result<Value> {
            self.0.pull(meta)
        }

        fn push(&self, data: &Value) -> Result<Value> {
            if data.as_int("unit")? < 0 {
                return Err(Error::invalid_arg("unit", "negative"));
            }
            self.0.push(data)
        }
    }

    #[test]
    fn test_fatal_abort_waits_for_batch() {
        let store = NoNegatives(MemoryArchiver::new());
        let serializer = ParallelSerializer::<Value, _>::with_pool(store, pool());
        let mut pushes: Vec<_> = [-1i64, 1, 2, 3, 4, 5, 6, 7]
            .into_iter()
            .map(|i| PushTask::new(Value::Int(i)))
            .collect();
        assert!(serializer.push_all(&mut pushes).unwrap_err().is_fatal_abort());
        // Every other push went through before the error came back.
        assert_eq!(serializer.archiver().0.len(), 7);
        assert!(serializer.active().is_empty());
    }

    #[test]
    fn test_panicking_archiver_is_fatal() {
        let serializer = ParallelSerializer::<Value, _>::with_pool(Failing, pool());
        let err = serializer.pull(&Value::Int(2)).unwrap_err();
        assert!(err.is_fatal_abort());
        // The pool survives the panic.
        assert_eq!(serializer.pull(&Value::Int(9)).unwrap(), Value::Int(9));
    }

    #[test]
    fn test_single_push_pull() {
        let serializer = ParallelSerializer::<Value, _>::with_pool(MemoryArchiver::new(), pool());
        let unit = Value::Ints(vec![3, 1, 4]);
        let meta = serializer.push(&unit).unwrap();
        assert_eq!(serializer.pull(&meta).unwrap(), unit);
        assert!(serializer.pull(&Value::Int(0)).is_err());
    }
}
