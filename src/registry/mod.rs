//! Alive-object registry - which native objects exist right now
//!
//! Debug-only ledger used to report leaks at shutdown. Compiled in with
//! `debug_assertions` or the `track-alive` feature; otherwise every
//! operation is a no-op and reports are empty.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::logging::log_leaks;


/// Whether tracking is compiled in
pub const ENABLED: bool = cfg!(any(debug_assertions, feature = "track-alive"));

/// Global registry used by [`Ref::new`](crate::object::Ref::new)
static GLOBAL: Lazy<Arc<AliveRegistry>> = Lazy::new(|| Arc::new(AliveRegistry::new()));

/// Identity of a live object: the address of its allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl ObjectId {
    #[inline]
    pub fn of<T: ?Sized>(ptr: *const T) -> Self {
        Self(ptr as *const u8 as usize)
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0
    }
}

/// One line of a leak report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveEntry {
    pub tag: &'static str,
    pub count: usize,
}

/// Live objects keyed by identity, guarded by a single mutex
#[derive(Default)]
pub struct AliveRegistry {
    entries: Mutex<HashMap<ObjectId, &'static str>>,
}

impl AliveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn track(&self, id: ObjectId, tag: &'static str) {
        if !ENABLED {
            return;
        }
        self.entries.lock().insert(id, tag);
    }

    /// Absent entries are ignored; teardown may race with destruction
    #[inline]
    pub fn untrack(&self, id: ObjectId) {
        if !ENABLED {
            return;
        }
        self.entries.lock().remove(&id);
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live objects grouped by tag, ordered by tag
    pub fn report(&self) -> Vec<LiveEntry> {
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for tag in self.entries.lock().values() {
            *counts.entry(tag).or_default() += 1;
        }

        counts
            .into_iter()
            .map(|(tag, count)| LiveEntry { tag, count })
            .collect()
    }

    /// Snapshot of [`report`](Self::report) for diagnostics tooling
    pub fn report_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.report())
    }

    /// Log every live entry as a leak and return the report
    pub fn report_leaks(&self) -> Vec<LiveEntry> {
        let report = self.report();
        for entry in &report {
            log_leaks(entry.tag, entry.count);
        }
        report
    }
}

impl std::fmt::Debug for AliveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AliveRegistry")
            .field("enabled", &ENABLED)
            .field("live", &self.len())
            .finish()
    }
}

/// Process-wide registry
pub fn global() -> &'static Arc<AliveRegistry> {
    &GLOBAL
}
