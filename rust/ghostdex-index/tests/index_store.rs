use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    thread,
};

use ghostdex_index::{IndexConfig, Posting, TermIndex, file_store};
use ghostdex_serial::{BatchArchiver, MemoryArchiver, ParallelSerializer, Value};
use ghostdex_workflow::thread_pool::ThreadPool;
use tempfile::TempDir;

fn config() -> IndexConfig {
    IndexConfig {
        node_min: 3,
        postings_node_min: 2,
        packer_capacity: 32,
    }
}

fn words(doc: u64) -> Vec<String> {
    let mut words = vec![format!("w{:03}", doc % 40), format!("doc{doc:04}")];
    if doc % 2 == 0 {
        words.push("even".to_string());
    }
    words
}

#[test]
fn test_build_commit_reopen() {
    let dir = TempDir::new().unwrap();
    let pool = ThreadPool::new(4);
    let store: Arc<dyn BatchArchiver<Value>> = Arc::new(file_store(dir.path(), pool.clone()).unwrap());

    let index = TermIndex::new("corpus", config(), store.clone()).unwrap();
    for doc in 0..400u64 {
        for (pos, word) in words(doc).iter().enumerate() {
            index
                .insert(word, Posting::new(doc, format!("title {doc}"), vec![pos as i64]))
                .unwrap();
        }
    }
    assert_eq!(index.term_count(), 40 + 400 + 1);
    let reference = index.commit().unwrap();

    // Reopen over a fresh store on the same directory.
    let store: Arc<dyn BatchArchiver<Value>> = Arc::new(file_store(dir.path(), pool).unwrap());
    let reopened = TermIndex::open(store, &reference).unwrap();
    assert_eq!(reopened.term_count(), 441);
    assert_eq!(reopened.postings("even").unwrap().len(), 200);
    let docs: Vec<u64> = reopened
        .postings("w007")
        .unwrap()
        .iter()
        .map(|p| p.doc)
        .collect();
    assert_eq!(docs, (0..10).map(|i| 7 + 40 * i).collect::<Vec<u64>>());
    let posting = &reopened.postings("doc0123").unwrap()[0];
    assert_eq!(posting.title, "title 123");
    assert_eq!(posting.positions, vec![1]);

    // Update after reopening, commit again, reopen again.
    assert!(reopened.remove("doc0123", 123).unwrap());
    assert!(reopened.insert("fresh", Posting::new(9000, "new", vec![])).unwrap());
    let reference = reopened.commit().unwrap();
    let store: Arc<dyn BatchArchiver<Value>> = Arc::new(file_store(dir.path(), ThreadPool::new(2)).unwrap());
    let last = TermIndex::open(store, &reference).unwrap();
    assert!(last.postings("doc0123").unwrap().is_empty());
    assert_eq!(last.postings("fresh").unwrap()[0].doc, 9000);
    assert_eq!(last.term_count(), 441);

    let terms = last.terms().unwrap();
    assert_eq!(terms.len(), 441);
    assert!(terms.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_concurrent_inserts() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn BatchArchiver<Value>> =
        Arc::new(file_store(dir.path(), ThreadPool::new(2)).unwrap());
    let index = Arc::new(TermIndex::new("shared", config(), store).unwrap());

    let writers: Vec<_> = (0..4u64)
        .map(|w| {
            let index = index.clone();
            thread::spawn(move || {
                for doc in (w * 100)..(w * 100 + 100) {
                    for word in words(doc) {
                        index.insert(&word, Posting::new(doc, "", vec![])).unwrap();
                    }
                    if doc % 25 == 0 {
                        index.commit().unwrap();
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(index.term_count(), 441);
    assert_eq!(index.postings("even").unwrap().len(), 200);
    assert_eq!(index.postings("w000").unwrap().len(), 10);
}

#[test]
fn test_random_updates_match_model() {
    let mut rng = fastrand::Rng::with_seed(11);
    let pool = ThreadPool::new(3);
    let store: Arc<dyn BatchArchiver<Value>> = Arc::new(ParallelSerializer::with_pool(
        MemoryArchiver::new(),
        pool,
    ));
    let mut index = TermIndex::new("random", config(), store.clone()).unwrap();
    let mut model: BTreeMap<String, BTreeSet<u64>> = BTreeMap::new();

    for step in 0..3000 {
        let term = format!("t{:02}", rng.usize(0..60));
        let doc = rng.u64(0..80);
        if rng.u8(0..3) == 0 {
            let expected = model.get_mut(&term).is_some_and(|docs| docs.remove(&doc));
            if model.get(&term).is_some_and(BTreeSet::is_empty) {
                model.remove(&term);
            }
            assert_eq!(index.remove(&term, doc).unwrap(), expected);
        } else {
            let expected = model.entry(term.clone()).or_default().insert(doc);
            assert_eq!(index.insert(&term, Posting::new(doc, "", vec![step])).unwrap(), expected);
        }
        if step % 250 == 249 {
            let reference = index.commit().unwrap();
            index = TermIndex::open(store.clone(), &reference).unwrap();
        }
    }

    assert_eq!(index.term_count(), model.len());
    for (term, docs) in &model {
        let found: Vec<u64> = index.postings(term).unwrap().iter().map(|p| p.doc).collect();
        assert_eq!(&found, &docs.iter().copied().collect::<Vec<_>>(), "postings of {term}");
    }
    let terms: Vec<String> = index.terms().unwrap().iter().map(|t| t.to_string()).collect();
    assert_eq!(terms, model.keys().cloned().collect::<Vec<_>>());
}
