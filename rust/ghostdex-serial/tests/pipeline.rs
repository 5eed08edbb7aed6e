use std::{collections::BTreeMap, sync::Arc, time::Duration};

use ghostdex_common::Result;
use ghostdex_serial::{
    Archiver, BatchArchiver, CompositeSerializer, FileArchiver, MemoryArchiver, Packer,
    ParallelSerializer, PullTask, PushTask, Translator, Value,
};
use ghostdex_workflow::thread_pool::ThreadPool;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
struct Record {
    name: String,
    counts: Vec<i64>,
}

struct RecordValue;

impl Translator<Record, Value> for RecordValue {
    fn app(&self, r: &Record) -> Result<Value> {
        Ok(Value::map([
            ("name", Value::from(r.name.as_str())),
            ("counts", Value::Ints(r.counts.clone())),
        ]))
    }

    fn rev(&self, v: &Value) -> Result<Record> {
        Ok(Record {
            name: v.field("name")?.as_str("name")?.to_string(),
            counts: v.field("counts")?.as_ints("counts")?.to_vec(),
        })
    }
}

fn record(i: i64) -> Record {
    Record {
        name: format!("record-{i}"),
        counts: (0..i).collect(),
    }
}

#[test]
fn test_records_through_file_store() {
    let dir = TempDir::new().unwrap();
    let store = FileArchiver::open(dir.path()).unwrap();
    let serializer = ParallelSerializer::with_pool(
        CompositeSerializer::<Record, Value, _, _>::new(RecordValue, store.clone()),
        ThreadPool::new(3),
    );

    let mut pushes: Vec<PushTask<Record>> = (0..20).map(|i| PushTask::new(record(i))).collect();
    serializer.push_all(&mut pushes).unwrap();
    assert_eq!(pushes.len(), 20);
    assert_eq!(store.references().unwrap().len(), 20);

    // Pull everything back, twice over, in one batch.
    let mut pulls: Vec<PullTask<Record>> = pushes
        .iter()
        .chain(pushes.iter())
        .map(|task| PullTask::new(task.meta.clone().unwrap()))
        .collect();
    serializer.pull_all(&mut pulls).unwrap();
    assert_eq!(pulls.len(), 40);
    for (i, task) in pulls.iter().enumerate() {
        assert_eq!(task.data.as_ref().unwrap(), &record((i % 20) as i64));
    }
    assert!(serializer.active().is_empty());
}

#[test]
fn test_concurrent_batches_share_pulls() {
    let store = Arc::new(MemoryArchiver::with_latency(Duration::from_millis(50)));
    let refs: Vec<Value> = (0..8)
        .map(|i| store.push(&Value::Int(i)).unwrap())
        .collect();
    let serializer = ParallelSerializer::<Value, _>::with_pool(store.clone(), ThreadPool::new(8));

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let serializer = serializer.clone();
            let refs = refs.clone();
            scope.spawn(move || {
                let mut tasks: Vec<PullTask<Value>> =
                    refs.into_iter().map(PullTask::new).collect();
                serializer.pull_all(&mut tasks).unwrap();
                let values: Vec<i64> = tasks
                    .iter()
                    .map(|t| t.data.as_ref().unwrap().as_int("value").unwrap())
                    .collect();
                assert_eq!(values, (0..8).collect::<Vec<_>>());
            });
        }
    });
    // Four overlapping batches over eight units; overlapping requests join.
    assert!(store.pull_count() < 32, "{} pulls", store.pull_count());
}

#[test]
fn test_packed_payloads_on_disk() {
    let dir = TempDir::new().unwrap();
    let bins = ParallelSerializer::<Value, _>::with_pool(
        FileArchiver::open(dir.path()).unwrap(),
        ThreadPool::new(2),
    );
    let packer = Packer::new(16, bins).unwrap();
    let payloads: BTreeMap<String, Vec<Value>> = (0..12)
        .map(|i| {
            let items = (0..i * 3).map(|j| Value::Int(i * 100 + j)).collect();
            (format!("key-{i:02}"), items)
        })
        .collect();
    let metas = packer.push(payloads.clone()).unwrap();
    assert_eq!(metas.len(), 12);

    let reopened = Packer::new(
        16,
        ParallelSerializer::<Value, _>::with_pool(
            FileArchiver::open(dir.path()).unwrap(),
            ThreadPool::new(2),
        ),
    )
    .unwrap();
    assert_eq!(reopened.pull(&metas).unwrap(), payloads);
}
