use std::cmp::Ordering;

use ghostdex_btree::SkeletonBTreeSet;
use ghostdex_common::{Result, error::Error};
use ghostdex_serial::{Translator, Value};
use serde::{Deserialize, Serialize};

/// Occurrences of a term in one document.
///
/// Postings are ordered and compared by document only: a term has at most
/// one posting per document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Posting {
    pub doc: u64,
    pub title: String,
    pub positions: Vec<i64>,
}

impl Posting {
    pub fn new(doc: u64, title: impl Into<String>, positions: Vec<i64>) -> Posting {
        Posting {
            doc,
            title: title.into(),
            positions,
        }
    }

    /// A posting that compares equal to every posting of `doc`.
    pub fn probe(doc: u64) -> Posting {
        Posting {
            doc,
            ..Default::default()
        }
    }
}

impl PartialEq for Posting {
    fn eq(&self, other: &Self) -> bool {
        self.doc == other.doc
    }
}

impl Eq for Posting {}

impl PartialOrd for Posting {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Posting {
    fn cmp(&self, other: &Self) -> Ordering {
        self.doc.cmp(&other.doc)
    }
}

/// The postings of one term.
pub type PostingSet = SkeletonBTreeSet<Posting>;

/// `{ "doc": n, "title": s, "pos": [n, ...] }`
#[derive(Debug, Clone, Copy, Default)]
pub struct PostingValue;

impl Translator<Posting, Value> for PostingValue {
    fn app(&self, posting: &Posting) -> Result<Value> {
        let doc = i64::try_from(posting.doc)
            .map_err(|_| Error::invalid_arg("doc", format!("{} is out of range", posting.doc)))?;
        Ok(Value::map([
            ("doc", Value::Int(doc)),
            ("title", Value::from(posting.title.as_str())),
            ("pos", Value::Ints(posting.positions.clone())),
        ]))
    }

    fn rev(&self, value: &Value) -> Result<Posting> {
        let doc = value.field("doc")?.as_int("doc")?;
        let doc = u64::try_from(doc)
            .map_err(|_| Error::invalid_format("doc", format!("negative document {doc}")))?;
        Ok(Posting {
            doc,
            title: value.field("title")?.as_str("title")?.to_string(),
            positions: value.field("pos")?.as_ints("pos")?.to_vec(),
        })
    }
}
