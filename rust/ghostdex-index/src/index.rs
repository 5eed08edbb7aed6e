use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use ghostdex_btree::{EntriesLayout, Serializers, SkeletonBTree};
use ghostdex_common::{Result, error::Error};
use ghostdex_serial::{
    BatchArchiver, FileArchiver, ParallelSerializer, Value, translate::StringValue,
};
use ghostdex_workflow::thread_pool::ThreadPool;
use serde::Serialize;

use crate::{
    config::IndexConfig,
    interner::TermInterner,
    posting::{Posting, PostingSet},
    postings::PostingsEntries,
};

pub const INDEX_FORMAT: &str = "ghostdex.index";
pub const INDEX_VERSION: i64 = 1;

/// A store of node records and bins in a directory, run on `pool`.
pub fn file_store(
    dir: impl AsRef<Path>,
    pool: ThreadPool,
) -> Result<ParallelSerializer<Value, FileArchiver>> {
    Ok(ParallelSerializer::named(
        "store",
        FileArchiver::open(dir)?,
        pool,
    ))
}

/// Term to postings index over a skeleton tree.
///
/// All operations take the index lock for their whole duration, including
/// the loading of whatever part of the tree they touch.
pub struct TermIndex {
    name: String,
    config: IndexConfig,
    store: Arc<dyn BatchArchiver<Value>>,
    state: Mutex<IndexState>,
}

struct IndexState {
    interner: TermInterner,
    terms: SkeletonBTree<Arc<str>, PostingSet>,
    postings: Serializers<Posting, ()>,
}

/// Shape of an index, for display.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub name: String,
    pub config: IndexConfig,
    pub terms: usize,
    pub height: usize,
    pub first_term: Option<String>,
    pub last_term: Option<String>,
}

impl TermIndex {
    pub fn new(
        name: impl Into<String>,
        config: IndexConfig,
        store: Arc<dyn BatchArchiver<Value>>,
    ) -> Result<TermIndex> {
        config.validate()?;
        let (serializers, postings) = Self::serializers(&config, &store)?;
        Ok(TermIndex {
            name: name.into(),
            config,
            store,
            state: Mutex::new(IndexState {
                interner: TermInterner::new(),
                terms: SkeletonBTree::new(config.node_min, serializers)?,
                postings,
            }),
        })
    }

    /// Opens the index stored under `reference`. Only the root of the term
    /// table is loaded.
    pub fn open(store: Arc<dyn BatchArchiver<Value>>, reference: &Value) -> Result<TermIndex> {
        let record = store.pull_one(reference.clone())?;
        let format = record.field("format")?.as_str("format")?;
        if format != INDEX_FORMAT {
            return Err(Error::invalid_format(
                "format",
                format!("expected {INDEX_FORMAT}, found {format}"),
            ));
        }
        let version = record.field("version")?.as_int("version")?;
        if version != INDEX_VERSION {
            return Err(Error::invalid_format(
                "version",
                format!("unsupported index version {version}"),
            ));
        }
        let name = record.field("name")?.as_str("name")?.to_string();
        let config = IndexConfig::from_value(record.field("config")?)?;
        let (serializers, postings) = Self::serializers(&config, &store)?;
        let terms = SkeletonBTree::open(record.field("terms")?, serializers)?;
        log::debug!("opened index {name:?} with {} terms", terms.len());
        Ok(TermIndex {
            name,
            config,
            store,
            state: Mutex::new(IndexState {
                interner: TermInterner::new(),
                terms,
                postings,
            }),
        })
    }

    fn serializers(
        config: &IndexConfig,
        store: &Arc<dyn BatchArchiver<Value>>,
    ) -> Result<(Serializers<Arc<str>, PostingSet>, Serializers<Posting, ()>)> {
        let entries = PostingsEntries::new(store.clone(), config.packer_capacity)?;
        let postings = entries.sets().clone();
        let terms = Serializers::new(StringValue, EntriesLayout::Map, store.clone(), entries);
        Ok((terms, postings))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Adds or replaces the posting of `posting.doc` for `term`. Returns
    /// `true` if the term had no posting for that document.
    pub fn insert(&self, term: &str, posting: Posting) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        let term = state.interner.intern(term);
        if let Some(set) = state.terms.get_mut(&term)? {
            let replaced = set.remove(&posting)?;
            set.insert(posting)?;
            return Ok(!replaced);
        }
        let mut set = PostingSet::new(self.config.postings_node_min, state.postings.clone())?;
        set.insert(posting)?;
        state.terms.put(term, set)?;
        Ok(true)
    }

    /// Removes the posting of `doc` for `term`; a term left without postings
    /// is dropped. Returns `true` if there was such a posting.
    pub fn remove(&self, term: &str, doc: u64) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let key: Arc<str> = Arc::from(term);
        let Some(set) = state.terms.get_mut(&key)? else {
            return Ok(false);
        };
        if !set.remove(&Posting::probe(doc))? {
            return Ok(false);
        }
        if set.is_empty() {
            state.terms.remove(&key)?;
            state.interner.purge();
        }
        Ok(true)
    }

    /// Postings of `term`, by document.
    pub fn postings(&self, term: &str) -> Result<Vec<Posting>> {
        let mut state = self.state.lock().unwrap();
        match state.terms.get_mut(&Arc::from(term))? {
            Some(set) => set.to_vec(),
            None => Ok(Vec::new()),
        }
    }

    pub fn contains_term(&self, term: &str) -> Result<bool> {
        self.state.lock().unwrap().terms.contains_key(&Arc::from(term))
    }

    /// All terms in order. Loads the term table, not the postings.
    pub fn terms(&self) -> Result<Vec<Arc<str>>> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        let keys: Vec<Arc<str>> = state.terms.keys()?.map(|k| k.cloned()).collect::<Result<_>>()?;
        Ok(keys.into_iter().map(|k| state.interner.adopt(k)).collect())
    }

    pub fn term_count(&self) -> usize {
        self.state.lock().unwrap().terms.len()
    }

    pub fn summary(&self) -> Result<IndexSummary> {
        let mut state = self.state.lock().unwrap();
        Ok(IndexSummary {
            name: self.name.clone(),
            config: self.config,
            terms: state.terms.len(),
            height: state.terms.height(),
            first_term: state.terms.first_key()?.map(|t| t.to_string()),
            last_term: state.terms.last_key()?.map(|t| t.to_string()),
        })
    }

    /// Stores everything and returns the reference of the index record.
    /// The index stays usable; it reloads on demand.
    pub fn commit(&self) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        let terms = state.terms.save()?;
        state.interner.purge();
        let record = Value::map([
            ("format", Value::from(INDEX_FORMAT)),
            ("version", Value::Int(INDEX_VERSION)),
            ("name", Value::from(self.name.as_str())),
            ("config", self.config.to_value()),
            ("terms", terms),
        ]);
        let reference = self.store.push_one(record)?;
        log::debug!(
            "committed index {:?}: {} terms, height {}",
            self.name,
            state.terms.len(),
            state.terms.height()
        );
        Ok(reference)
    }
}
