//! Command implementations for ghostdex-cmd

use std::sync::Arc;

use anyhow::{Context, Result};
use ghostdex_index::{TermIndex, file_store};
use ghostdex_serial::{BatchArchiver, FileArchiver, ParallelSerializer, Value};
use ghostdex_workflow::thread_pool::ThreadPool;

use crate::StoreArgs;

pub mod build;
pub mod inspect;
pub mod lookup;

/// The store named by the command line. The concrete serializer is kept
/// around for progress reporting.
pub struct Store {
    serializer: ParallelSerializer<Value, FileArchiver>,
    verbose: bool,
}

impl Store {
    pub fn open(args: &StoreArgs) -> Result<Store> {
        let pool = match args.threads {
            Some(n) => ThreadPool::new(n),
            None => ThreadPool::global().clone(),
        };
        let serializer = file_store(&args.store, pool)
            .with_context(|| format!("Failed to open store {}", args.store))?;
        Ok(Store {
            serializer,
            verbose: args.verbose,
        })
    }

    pub fn archiver(&self) -> Arc<dyn BatchArchiver<Value>> {
        Arc::new(self.serializer.clone())
    }

    pub fn open_index(&self, reference: &str) -> Result<TermIndex> {
        TermIndex::open(self.archiver(), &Value::String(reference.to_string()))
            .with_context(|| format!("Failed to open index {reference}"))
    }

    /// Prints the tasks still in flight, if asked to.
    pub fn report(&self) {
        if !self.verbose {
            return;
        }
        let active = self.serializer.active();
        eprintln!("{} store task(s) in flight", active.len());
        for task in active {
            eprintln!("  {} {} [{}] {}", task.id, task.subject, task.status, task.parts);
        }
    }
}
