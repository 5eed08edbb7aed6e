use std::sync::Arc;

use ahash::AHashSet;

/// Hands out one shared `Arc<str>` per distinct term.
#[derive(Debug, Default)]
pub struct TermInterner {
    terms: AHashSet<Arc<str>>,
}

impl TermInterner {
    pub fn new() -> TermInterner {
        Default::default()
    }

    pub fn intern(&mut self, term: &str) -> Arc<str> {
        if let Some(shared) = self.terms.get(term) {
            return shared.clone();
        }
        let shared: Arc<str> = Arc::from(term);
        self.terms.insert(shared.clone());
        shared
    }

    /// Adopts `term` if it is not interned yet; returns the shared copy.
    pub fn adopt(&mut self, term: Arc<str>) -> Arc<str> {
        match self.terms.get(&term) {
            Some(shared) => shared.clone(),
            None => {
                self.terms.insert(term.clone());
                term
            }
        }
    }

    pub fn get(&self, term: &str) -> Option<Arc<str>> {
        self.terms.get(term).cloned()
    }

    /// Drops the terms nobody else holds. Returns how many were dropped.
    pub fn purge(&mut self) -> usize {
        let before = self.terms.len();
        self.terms.retain(|term| Arc::strong_count(term) > 1);
        before - self.terms.len()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}
