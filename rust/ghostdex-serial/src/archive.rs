//! Archivers: the stages that talk to a backing store.

use std::sync::Arc;

use ghostdex_common::{Result, error::Error};

use crate::{
    task::{PullTask, PushTask},
    value::Value,
};

/// Stores and loads one unit of data addressed by an opaque reference.
///
/// References are `Value`s meaningful only to the archiver that issued them.
pub trait Archiver<T>: Send + Sync {
    fn pull(&self, meta: &Value) -> Result<T>;

    fn push(&self, data: &T) -> Result<Value>;
}

impl<T, A: Archiver<T> + ?Sized> Archiver<T> for Arc<A> {
    fn pull(&self, meta: &Value) -> Result<T> {
        (**self).pull(meta)
    }

    fn push(&self, data: &T) -> Result<Value> {
        (**self).push(data)
    }
}

impl<T, A: Archiver<T> + ?Sized> Archiver<T> for &A {
    fn pull(&self, meta: &Value) -> Result<T> {
        (**self).pull(meta)
    }

    fn push(&self, data: &T) -> Result<Value> {
        (**self).push(data)
    }
}

/// Runs batches of pull and push tasks.
///
/// On return, every task left in the batch is complete. Tasks that reported a
/// benign abort ("already done elsewhere") are removed from the batch; a fatal
/// abort fails the whole call.
pub trait BatchArchiver<T>: Send + Sync {
    fn pull_all(&self, tasks: &mut Vec<PullTask<T>>) -> Result<()>;

    fn push_all(&self, tasks: &mut Vec<PushTask<T>>) -> Result<()>;

    /// Pulls a single unit. A benign abort is returned as the error.
    fn pull_one(&self, meta: Value) -> Result<T> {
        let mut tasks = vec![PullTask::new(meta)];
        self.pull_all(&mut tasks)?;
        tasks
            .pop()
            .and_then(|task| task.data)
            .ok_or_else(|| Error::task_complete("pull"))
    }

    /// Pushes a single unit. A benign abort is returned as the error.
    fn push_one(&self, data: T) -> Result<Value> {
        let mut tasks = vec![PushTask::new(data)];
        self.push_all(&mut tasks)?;
        tasks
            .pop()
            .and_then(|task| task.meta)
            .ok_or_else(|| Error::task_complete("push"))
    }
}

impl<T, B: BatchArchiver<T> + ?Sized> BatchArchiver<T> for Arc<B> {
    fn pull_all(&self, tasks: &mut Vec<PullTask<T>>) -> Result<()> {
        (**self).pull_all(tasks)
    }

    fn push_all(&self, tasks: &mut Vec<PushTask<T>>) -> Result<()> {
        (**self).push_all(tasks)
    }
}

/// Runs a batch one task after the other on the calling thread.
#[derive(Debug, Clone, Default)]
pub struct Sequential<A>(pub A);

impl<T, A: Archiver<T>> BatchArchiver<T> for Sequential<A> {
    fn pull_all(&self, tasks: &mut Vec<PullTask<T>>) -> Result<()> {
        let mut dropped = false;
        for task in tasks.iter_mut() {
            match self.0.pull(&task.meta) {
                Ok(data) => task.data = Some(data),
                Err(e) if e.is_benign_abort() => dropped = true,
                Err(e) => return Err(e),
            }
        }
        if dropped {
            tasks.retain(|task| task.data.is_some());
        }
        Ok(())
    }

    fn push_all(&self, tasks: &mut Vec<PushTask<T>>) -> Result<()> {
        let mut dropped = false;
        for task in tasks.iter_mut() {
            match self.0.push(&task.data) {
                Ok(meta) => task.meta = Some(meta),
                Err(e) if e.is_benign_abort() => dropped = true,
                Err(e) => return Err(e),
            }
        }
        if dropped {
            tasks.retain(|task| task.meta.is_some());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Refuses to store negative numbers; treats zero as already stored.
    struct Picky;

    impl Archiver<i64> for Picky {
        fn pull(&self, meta: &Value) -> Result<i64> {
            match meta.as_int("ref")? {
                0 => Err(Error::task_complete("zero")),
                i => Ok(i),
            }
        }

        fn push(&self, data: &i64) -> Result<Value> {
            match *data {
                0 => Err(Error::task_complete("zero")),
                i if i < 0 => Err(Error::invalid_arg("data", "negative")),
                i => Ok(Value::Int(i)),
            }
        }
    }

    #[test]
    fn test_sequential_drops_benign_aborts() {
        let batch = Sequential(Picky);
        let mut pushes: Vec<_> = [3i64, 0, 5].into_iter().map(PushTask::new).collect();
        batch.push_all(&mut pushes).unwrap();
        let metas: Vec<_> = pushes.iter().map(|t| t.meta.clone().unwrap()).collect();
        assert_eq!(metas, vec![Value::Int(3), Value::Int(5)]);

        let mut pulls: Vec<_> = [0i64, 7]
            .into_iter()
            .map(|i| PullTask::new(Value::Int(i)))
            .collect();
        batch.pull_all(&mut pulls).unwrap();
        assert_eq!(pulls.len(), 1);
        assert_eq!(pulls[0].data, Some(7));
    }

    #[test]
    fn test_sequential_fails_on_fatal() {
        let batch = Sequential(Picky);
        let mut pushes: Vec<_> = [1i64, -1].into_iter().map(PushTask::new).collect();
        assert!(batch.push_all(&mut pushes).is_err());
    }

    #[test]
    fn test_single_helpers() {
        let batch = Sequential(Picky);
        assert_eq!(batch.push_one(4i64).unwrap(), Value::Int(4));
        assert!(batch.push_one(0i64).unwrap_err().is_benign_abort());
        assert_eq!(batch.pull_one(Value::Int(4)).unwrap(), 4);
    }
}
