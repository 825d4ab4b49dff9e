//! Recently processed idempotency keys

use std::collections::BTreeMap;

/// Keys kept in ledger state; older keys are answered by the event log
pub const IDEMPOTENCY_WINDOW: usize = 1000;

/// The most recent idempotency keys of a ledger and the versions that
/// recorded them, bounded to [`IDEMPOTENCY_WINDOW`] entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdempotencyWindow {
    by_key: BTreeMap<String, u64>,
    by_version: BTreeMap<u64, String>,
}

impl IdempotencyWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from snapshot contents, keeping the newest keys
    pub fn from_map(keys: BTreeMap<String, u64>) -> Self {
        let mut window = Self::new();
        let mut entries: Vec<_> = keys.into_iter().collect();
        entries.sort_by_key(|(_, version)| *version);
        for (key, version) in entries {
            window.insert(key, version);
        }
        window
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.by_key.get(key).copied()
    }

    /// Record a key, evicting the oldest once the window is full
    pub fn insert(&mut self, key: String, version: u64) {
        if let Some(previous) = self.by_key.insert(key.clone(), version) {
            self.by_version.remove(&previous);
        }
        self.by_version.insert(version, key);

        while self.by_version.len() > IDEMPOTENCY_WINDOW {
            if let Some((_, oldest)) = self.by_version.pop_first() {
                self.by_key.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Whether keys may already have been evicted, so a miss is not conclusive
    pub fn is_full(&self) -> bool {
        self.len() >= IDEMPOTENCY_WINDOW
    }

    pub fn to_map(&self) -> BTreeMap<String, u64> {
        self.by_key.clone()
    }
}
