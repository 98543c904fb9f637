//! TTL cache for resolved identities and instance-ownership facts.
//!
//! Expiry is a state, not a deletion: `get` hands back stale entries instead
//! of dropping them, so the gateway can keep serving previously validated
//! tenants while the authority is unreachable.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Lookup result
// ---------------------------------------------------------------------------

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// No entry stored under the key.
    Miss,
    /// Entry present and within its TTL.
    Fresh(V),
    /// Entry present but past its TTL. The value is still returned so the
    /// caller can decide whether to trust it anyway.
    Stale(V),
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Unbounded key→value store with per-entry TTL, safe for concurrent use.
///
/// A single mutex guards the map; callers must not hold lookups across
/// network calls. Writes overwrite, last writer wins. Entries are only ever
/// removed by [`TtlCache::clear`].
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Store `value` under `key`, expiring `ttl` from now. Overwrites and
    /// re-stamps any existing entry.
    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().unwrap().insert(key.to_string(), entry);
    }

    /// Look up `key`, distinguishing absent, fresh, and stale entries.
    pub fn get(&self, key: &str) -> Lookup<V> {
        let entries = self.entries.lock().unwrap();
        match entries.get(key) {
            None => Lookup::Miss,
            Some(entry) if Instant::now() < entry.expires_at => Lookup::Fresh(entry.value.clone()),
            Some(entry) => Lookup::Stale(entry.value.clone()),
        }
    }

    /// Number of entries currently stored, fresh and stale alike.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
