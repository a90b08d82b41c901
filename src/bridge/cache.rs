//! Per-cookie cache of the latest element values
//!
//! Lets scripts read "current" state between events. Entries are replaced on
//! every update for their cookie and evicted wholesale on reset.

use dashmap::DashMap;
use tracing::trace;

use crate::device::{ElementInfo, ElementUpdate};

#[derive(Debug, Clone, PartialEq)]
pub struct CachedElement {
    pub value: i32,
    pub min: i32,
    pub max: i32,
    pub info: ElementInfo,
}

/// Element cache keyed by cookie
///
/// Uses DashMap so the device thread can record updates without waiting for a
/// script dispatch that holds the script lock.
#[derive(Default)]
pub struct ElementCache {
    entries: DashMap<u64, CachedElement>,
}

impl ElementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, update: &ElementUpdate) {
        trace!("Cache cookie {} = {}", update.cookie, update.value);
        self.entries.insert(
            update.cookie,
            CachedElement {
                value: update.value,
                min: update.min,
                max: update.max,
                info: update.info.clone(),
            },
        );
    }

    pub fn get(&self, cookie: u64) -> Option<CachedElement> {
        self.entries.get(&cookie).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict every entry
    pub fn clear(&self) {
        self.entries.clear();
    }
}
