//! Lookup command implementation

use anyhow::Result;
use ghostdex_index::Posting;
use serde::Serialize;

use crate::{StoreArgs, commands::Store};

#[derive(Serialize)]
struct TermPostings {
    term: String,
    count: usize,
    postings: Vec<Posting>,
}

/// Run the lookup command
pub fn run(args: &StoreArgs, index: String, terms: Vec<String>) -> Result<()> {
    let store = Store::open(args)?;
    let index = store.open_index(&index)?;
    let results = terms
        .into_iter()
        .map(|term| -> Result<TermPostings> {
            let postings = index.postings(&term)?;
            Ok(TermPostings {
                term,
                count: postings.len(),
                postings,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    store.report();
    Ok(())
}
