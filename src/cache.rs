//! Last-seen depth per currency pair.
//!
//! Shared by every worker of a `Fetcher` and lives as long as it does.
//! The map is only reachable through methods that take the lock, so a
//! reader never sees part of a pair's entry from one fetch and the
//! rest from another.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::schema::{DepthSnapshot, Level};

#[derive(Debug, Default)]
pub struct SnapshotCache {
    entries: Mutex<HashMap<String, DepthSnapshot>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DepthSnapshot>> {
        // A panicking writer cannot leave an entry half-written, every field
        // of an entry is assigned under one guard.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces a pair's entry with the result of one fetch.
    ///
    /// Bids, asks and the last price are assigned under one guard. A
    /// `None` price keeps the previous one.
    pub fn update(&self, pair: &str, bids: Vec<Level>, asks: Vec<Level>, last_price: Option<f64>) {
        let mut entries = self.lock();
        let entry = entries.entry(pair.to_string()).or_default();
        entry.bids = bids;
        entry.asks = asks;
        if let Some(price) = last_price {
            entry.last_price = price;
        }
    }

    /// Replaces both sides of a pair's book. The last price is kept.
    pub fn update_depth(&self, pair: &str, bids: Vec<Level>, asks: Vec<Level>) {
        self.update(pair, bids, asks, None);
    }

    /// Copy of the current entry for `pair`.
    pub fn get(&self, pair: &str) -> Option<DepthSnapshot> {
        self.lock().get(pair).cloned()
    }

    /// Pairs with an entry, sorted.
    pub fn pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = self.lock().keys().cloned().collect();
        pairs.sort();
        pairs
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
