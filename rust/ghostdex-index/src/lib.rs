//! Term to postings index over skeleton B-trees.
//!
//! The term table maps each term to a postings set. Both levels are
//! [`SkeletonBTree`](ghostdex_btree::SkeletonBTree)s sharing one store: the
//! table's nodes, the interior nodes of large postings sets and the bins that
//! pack the postings of small ones. Only the root of the table is loaded when
//! an index is opened; everything else is pulled in as lookups reach it.

pub mod config;
pub mod index;
pub mod interner;
pub mod posting;
pub mod postings;

pub use config::IndexConfig;
pub use index::{INDEX_FORMAT, INDEX_VERSION, IndexSummary, TermIndex, file_store};
pub use interner::TermInterner;
pub use posting::{Posting, PostingSet, PostingValue};
pub use postings::PostingsEntries;
