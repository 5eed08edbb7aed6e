use std::marker::PhantomData;

use ghostdex_common::{Result, error::Error};

use crate::{
    archive::{Archiver, BatchArchiver},
    task::{PullTask, PushTask, TaskId},
    translate::Translator,
    value::Value,
};

/// An archiver for `T` built from a translator `T -> I` and a child archiver
/// for `I`.
///
/// `pull` is the child's pull followed by `rev`; `push` is `app` followed by
/// the child's push. With a [`BatchArchiver`] child the composite runs whole
/// batches: every task is translated, the child runs the batch once, and
/// tasks the child dropped as benign aborts are dropped here too.
pub struct CompositeSerializer<T, I, Tr, A> {
    translator: Tr,
    child: A,
    _types: PhantomData<fn(T) -> I>,
}

impl<T, I, Tr, A> CompositeSerializer<T, I, Tr, A>
where
    Tr: Translator<T, I>,
{
    pub fn new(translator: Tr, child: A) -> Self {
        CompositeSerializer {
            translator,
            child,
            _types: PhantomData,
        }
    }

    pub fn translator(&self) -> &Tr {
        &self.translator
    }

    pub fn child(&self) -> &A {
        &self.child
    }
}

impl<T, I, Tr, A> Archiver<T> for CompositeSerializer<T, I, Tr, A>
where
    Tr: Translator<T, I>,
    A: Archiver<I>,
{
    fn pull(&self, meta: &Value) -> Result<T> {
        let intermediate = self.child.pull(meta)?;
        self.translator.rev(&intermediate)
    }

    fn push(&self, data: &T) -> Result<Value> {
        let intermediate = self.translator.app(data)?;
        self.child.push(&intermediate)
    }
}

impl<T, I, Tr, A> BatchArchiver<T> for CompositeSerializer<T, I, Tr, A>
where
    Tr: Translator<T, I>,
    A: BatchArchiver<I>,
{
    fn pull_all(&self, tasks: &mut Vec<PullTask<T>>) -> Result<()> {
        let mut inner: Vec<PullTask<I>> =
            tasks.iter().map(|task| PullTask::new(task.meta.clone())).collect();
        let ids: Vec<TaskId> = inner.iter().map(PullTask::id).collect();
        self.child.pull_all(&mut inner)?;

        // The child keeps the order of the tasks it does not drop.
        let mut completed = inner.into_iter().peekable();
        for (task, id) in tasks.iter_mut().zip(ids) {
            task.data = match completed.next_if(|done| done.id() == id) {
                Some(done) => {
                    let data = done
                        .data
                        .ok_or_else(|| Error::invalid_operation(format!("pull: no data for {id}")))?;
                    Some(self.translator.rev(&data)?)
                }
                None => None,
            };
        }
        tasks.retain(|task| task.data.is_some());
        Ok(())
    }

    fn push_all(&self, tasks: &mut Vec<PushTask<T>>) -> Result<()> {
        let mut inner = tasks
            .iter()
            .map(|task| Ok(PushTask::new(self.translator.app(&task.data)?)))
            .collect::<Result<Vec<PushTask<I>>>>()?;
        let ids: Vec<TaskId> = inner.iter().map(PushTask::id).collect();
        self.child.push_all(&mut inner)?;

        let mut completed = inner.into_iter().peekable();
        for (task, id) in tasks.iter_mut().zip(ids) {
            task.meta = completed
                .next_if(|done| done.id() == id)
                .and_then(|done| done.meta);
        }
        tasks.retain(|task| task.meta.is_some());
        Ok(())
    }
}
