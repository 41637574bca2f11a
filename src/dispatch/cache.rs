//! Dispatch cache - invokers keyed by call site
//!
//! Read-mostly: lookups take a shard read lock only. Construction is
//! first-writer-wins: racing builders for one key all adopt the instance
//! built by the first, and the builder runs once.

use crate::invoke::Invoker;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::sync::Arc;

#[derive(Default)]
pub struct DispatchCache {
    entries: DashMap<Arc<str>, Arc<OnceCell<Arc<Invoker>>>>,
}

impl DispatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Published invoker for `name`
    #[inline]
    pub fn get(&self, name: &str) -> Option<Arc<Invoker>> {
        self.entries.get(name).and_then(|cell| cell.get().cloned())
    }

    /// Invoker for `name`, building it at most once
    pub fn get_or_insert_with(&self, name: &Arc<str>, build: impl FnOnce() -> Invoker) -> Arc<Invoker> {
        if let Some(invoker) = self.get(name) {
            return invoker;
        }
        let cell = Arc::clone(
            self.entries
                .entry(Arc::clone(name))
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        );
        // Built outside the shard lock
        Arc::clone(cell.get_or_init(|| Arc::new(build())))
    }

    /// Publish `invoker` unless one exists; returns the one that won
    pub fn insert(&self, name: &Arc<str>, invoker: Invoker) -> Arc<Invoker> {
        self.get_or_insert_with(name, move || invoker)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<Arc<str>> {
        self.entries.iter().map(|e| Arc::clone(e.key())).collect()
    }
}
