//! Durable node-local facts.
//!
//! A small key-value store for facts that must survive restarts: the current
//! sync tick, the session sequence, per-peer sync bookmarks and the device
//! signing credential. Values are stored as strings; typed helpers parse
//! ticks on the way out.

use crate::error::{CoreError, CoreResult};
use crate::types::{DeviceId, Tick};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Fact key for the node's current sync tick.
pub const FACT_CURRENT_TICK: &str = "sync.currentTick";
/// Fact key for the session id sequence.
pub const FACT_SESSION_SEQUENCE: &str = "sync.sessionSequence";
/// Fact key for the device signing credential (hex-encoded secret key).
pub const FACT_DEVICE_SIGNING_KEY: &str = "device.signingKey";

/// Fact key holding the last fully-committed sync tick for a peer.
#[must_use]
pub fn last_synced_tick_key(peer: &DeviceId) -> String {
    format!("sync.lastSyncedTick:{}", peer.as_uuid())
}

/// A durable store of node-local facts.
///
/// # Invariants
///
/// - `set` and `increment` are atomic: a fact is either durably updated or
///   the call fails and the previous value is still in force.
/// - `increment` never returns the same value twice, which is what makes it
///   safe to allocate ticks and session ids from.
pub trait FactStore: Send + Sync {
    /// Reads a fact, returning `None` if it was never set.
    fn get(&self, key: &str) -> CoreResult<Option<String>>;

    /// Durably writes a fact.
    fn set(&self, key: &str, value: &str) -> CoreResult<()>;

    /// Atomically adds `by` to a numeric fact (0 if absent) and durably
    /// persists the result, returning the new value.
    fn increment(&self, key: &str, by: u64) -> CoreResult<u64>;

    /// Reads a fact as a tick.
    fn get_tick(&self, key: &str) -> CoreResult<Option<Tick>> {
        match self.get(key)? {
            None => Ok(None),
            Some(raw) => raw
                .parse::<u64>()
                .map(|v| Some(Tick::new(v)))
                .map_err(|e| CoreError::MalformedFact {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    /// Writes a tick-valued fact.
    fn set_tick(&self, key: &str, tick: Tick) -> CoreResult<()> {
        self.set(key, &tick.as_u64().to_string())
    }
}

/// An in-memory fact store for tests and ephemeral nodes.
#[derive(Default)]
pub struct MemoryFactStore {
    facts: RwLock<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemoryFactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the durable store becoming unavailable; subsequent writes
    /// fail until cleared. Reads are unaffected.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> CoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CoreError::fact_store("store marked unavailable"))
        } else {
            Ok(())
        }
    }
}

impl FactStore for MemoryFactStore {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.facts.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        self.check_available()?;
        self.facts.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn increment(&self, key: &str, by: u64) -> CoreResult<u64> {
        self.check_available()?;
        let mut facts = self.facts.write();
        let current = match facts.get(key) {
            None => 0,
            Some(raw) => raw.parse::<u64>().map_err(|e| CoreError::MalformedFact {
                key: key.to_string(),
                message: e.to_string(),
            })?,
        };
        let next = current + by;
        facts.insert(key.to_string(), next.to_string());
        Ok(next)
    }
}

/// A file-backed fact store.
///
/// The whole map is serialized as JSON and replaced atomically (write to a
/// temporary file, then rename), so a crash mid-write leaves the previous
/// state intact.
pub struct FileFactStore {
    path: PathBuf,
    facts: RwLock<HashMap<String, String>>,
}

impl FileFactStore {
    /// Opens or creates a fact store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let facts = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw)?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            facts: RwLock::new(facts),
        })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, facts: &HashMap<String, String>) -> CoreResult<()> {
        let serialized = serde_json::to_vec_pretty(facts)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serialized)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| CoreError::fact_store(format!("{}: {e}", self.path.display())))
    }
}

impl FactStore for FileFactStore {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.facts.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        let mut facts = self.facts.write();
        let previous = facts.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&facts) {
            // roll the in-memory view back so memory and disk stay in step
            match previous {
                Some(old) => facts.insert(key.to_string(), old),
                None => facts.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn increment(&self, key: &str, by: u64) -> CoreResult<u64> {
        let mut facts = self.facts.write();
        let current = match facts.get(key) {
            None => 0,
            Some(raw) => raw.parse::<u64>().map_err(|e| CoreError::MalformedFact {
                key: key.to_string(),
                message: e.to_string(),
            })?,
        };
        let next = current + by;
        let previous = facts.insert(key.to_string(), next.to_string());
        if let Err(e) = self.persist(&facts) {
            match previous {
                Some(old) => facts.insert(key.to_string(), old),
                None => facts.remove(key),
            };
            return Err(e);
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_get_set() {
        let store = MemoryFactStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn memory_increment_from_absent() {
        let store = MemoryFactStore::new();
        assert_eq!(store.increment(FACT_CURRENT_TICK, 1).unwrap(), 1);
        assert_eq!(store.increment(FACT_CURRENT_TICK, 2).unwrap(), 3);
    }

    #[test]
    fn memory_unavailable_fails_writes() {
        let store = MemoryFactStore::new();
        store.set("k", "1").unwrap();
        store.set_unavailable(true);
        assert!(store.set("k", "2").is_err());
        assert!(store.increment("k", 1).is_err());
        // reads still work, and the old value is intact
        assert_eq!(store.get("k").unwrap(), Some("1".to_string()));
    }

    #[test]
    fn tick_helpers() {
        let store = MemoryFactStore::new();
        assert_eq!(store.get_tick(FACT_CURRENT_TICK).unwrap(), None);
        store.set_tick(FACT_CURRENT_TICK, Tick::new(41)).unwrap();
        assert_eq!(
            store.get_tick(FACT_CURRENT_TICK).unwrap(),
            Some(Tick::new(41))
        );
    }

    #[test]
    fn malformed_tick_is_reported() {
        let store = MemoryFactStore::new();
        store.set(FACT_CURRENT_TICK, "not-a-number").unwrap();
        assert!(store.get_tick(FACT_CURRENT_TICK).is_err());
        assert!(store.increment(FACT_CURRENT_TICK, 1).is_err());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.json");

        {
            let store = FileFactStore::open(&path).unwrap();
            store.set_tick(FACT_CURRENT_TICK, Tick::new(100)).unwrap();
            store.increment(FACT_SESSION_SEQUENCE, 1).unwrap();
        }

        let reopened = FileFactStore::open(&path).unwrap();
        assert_eq!(
            reopened.get_tick(FACT_CURRENT_TICK).unwrap(),
            Some(Tick::new(100))
        );
        assert_eq!(reopened.increment(FACT_SESSION_SEQUENCE, 1).unwrap(), 2);
    }

    #[test]
    fn peer_bookmark_key_is_per_device() {
        let a = DeviceId::generate();
        let b = DeviceId::generate();
        assert_ne!(last_synced_tick_key(&a), last_synced_tick_key(&b));
    }
}
