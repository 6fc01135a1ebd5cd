//! Shared answer cache. The flat 60-second TTL is deliberate: upstream TTLs
//! are not honoured because this cache is a latency and upstream-failure
//! shield, not an RFC-compliant resolver cache. Entries linger 600 seconds
//! past expiry so stale answers can be salvaged when every upstream fails.

use tracing::debug;

use crate::constants::{
    FWD_CACHE_EXPIRING_SECS, FWD_CACHE_SALVAGE_SECS, FWD_CACHE_TTL_SECS,
};
use crate::striped::{StripedMap, TableEntry};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub qname: String,
    pub qtype: u16,
}

#[derive(Debug)]
pub struct CacheEntry {
    pub qname: String,
    pub qtype: u16,
    pub data: Vec<u8>,
    /// Wall-clock epoch seconds.
    pub expires_at: u64,
}

impl TableEntry for CacheEntry {
    type Key = CacheKey;

    fn key(&self) -> CacheKey {
        CacheKey {
            qname: self.qname.clone(),
            qtype: self.qtype,
        }
    }

    fn expired(&self, now: u64) -> bool {
        self.expires_at + FWD_CACHE_SALVAGE_SECS < now
    }
}

/// Freshness classification of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    NotFound,
    Fresh(Vec<u8>),
    /// Still servable, but within the pre-expiry window: the caller serves
    /// the bytes and spawns one background refresh.
    Expiring(Vec<u8>),
    /// Past expiry but within the salvage window; only served when every
    /// upstream has failed.
    Expired(Vec<u8>),
}

/// One row of the management-plane cache dump.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheView {
    pub domain: String,
    pub qtype: u16,
    pub expires_at: u64,
}

pub struct FwdCache {
    map: StripedMap<CacheEntry>,
}

impl FwdCache {
    pub fn new() -> Self {
        Self {
            map: StripedMap::new(),
        }
    }

    pub fn lookup(&self, qname: &str, qtype: u16, now: u64) -> CacheState {
        let key = CacheKey {
            qname: qname.to_string(),
            qtype,
        };
        self.map
            .get(&key, |e| {
                if e.expires_at > now + FWD_CACHE_EXPIRING_SECS {
                    CacheState::Fresh(e.data.clone())
                } else if e.expires_at >= now {
                    CacheState::Expiring(e.data.clone())
                } else if e.expires_at + FWD_CACHE_SALVAGE_SECS >= now {
                    CacheState::Expired(e.data.clone())
                } else {
                    CacheState::NotFound
                }
            })
            .unwrap_or(CacheState::NotFound)
    }

    /// Install a fresh entry for the key, replacing any previous one.
    pub fn update(&self, qname: &str, qtype: u16, data: &[u8], now: u64) {
        self.map.insert(CacheEntry {
            qname: qname.to_string(),
            qtype,
            data: data.to_vec(),
            expires_at: now + FWD_CACHE_TTL_SECS,
        });
    }

    pub fn delete(&self, qname: &str, qtype: u16) -> bool {
        let key = CacheKey {
            qname: qname.to_string(),
            qtype,
        };
        self.map.remove(&key).is_some()
    }

    pub fn delete_all(&self) {
        self.map.clear();
    }

    /// Evict entries whose salvage window has passed. Returns the eviction
    /// count for the sweeper's log line.
    pub fn sweep(&self, now: u64) -> usize {
        self.map.sweep(now, |e| {
            debug!(domain = %e.qname, qtype = e.qtype, "cache entry expired");
        })
    }

    pub fn dump(&self) -> Vec<CacheView> {
        let mut out = Vec::with_capacity(self.map.len());
        self.map.for_each(|e| {
            out.push(CacheView {
                domain: e.qname.clone(),
                qtype: e.qtype,
                expires_at: e.expires_at,
            })
        });
        out
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Test hook: install an entry with an explicit expiry.
    pub fn insert_raw(&self, qname: &str, qtype: u16, data: &[u8], expires_at: u64) {
        self.map.insert(CacheEntry {
            qname: qname.to_string(),
            qtype,
            data: data.to_vec(),
            expires_at,
        });
    }
}

impl Default for FwdCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::QTYPE_A;

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn lookup_miss() {
        let cache = FwdCache::new();
        assert_eq!(cache.lookup("a.example.", QTYPE_A, NOW), CacheState::NotFound);
    }

    #[test]
    fn update_then_fresh() {
        let cache = FwdCache::new();
        cache.update("a.example.", QTYPE_A, b"payload", NOW);
        assert_eq!(
            cache.lookup("a.example.", QTYPE_A, NOW),
            CacheState::Fresh(b"payload".to_vec())
        );
        // distinct qtype is a distinct key
        assert_eq!(cache.lookup("a.example.", 28, NOW), CacheState::NotFound);
    }

    #[test]
    fn freshness_classes() {
        let cache = FwdCache::new();
        cache.insert_raw("f.", QTYPE_A, b"x", NOW + 11);
        cache.insert_raw("e.", QTYPE_A, b"x", NOW + 10);
        cache.insert_raw("e2.", QTYPE_A, b"x", NOW);
        cache.insert_raw("x.", QTYPE_A, b"x", NOW - 1);
        cache.insert_raw("x2.", QTYPE_A, b"x", NOW - FWD_CACHE_SALVAGE_SECS);
        cache.insert_raw("gone.", QTYPE_A, b"x", NOW - FWD_CACHE_SALVAGE_SECS - 1);

        assert!(matches!(cache.lookup("f.", QTYPE_A, NOW), CacheState::Fresh(_)));
        assert!(matches!(cache.lookup("e.", QTYPE_A, NOW), CacheState::Expiring(_)));
        assert!(matches!(cache.lookup("e2.", QTYPE_A, NOW), CacheState::Expiring(_)));
        assert!(matches!(cache.lookup("x.", QTYPE_A, NOW), CacheState::Expired(_)));
        assert!(matches!(cache.lookup("x2.", QTYPE_A, NOW), CacheState::Expired(_)));
        assert_eq!(cache.lookup("gone.", QTYPE_A, NOW), CacheState::NotFound);
    }

    #[test]
    fn update_is_idempotent() {
        let cache = FwdCache::new();
        cache.update("a.example.", QTYPE_A, b"payload", NOW);
        cache.update("a.example.", QTYPE_A, b"payload", NOW);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.lookup("a.example.", QTYPE_A, NOW),
            CacheState::Fresh(b"payload".to_vec())
        );
    }

    #[test]
    fn update_replaces_payload() {
        let cache = FwdCache::new();
        cache.update("a.example.", QTYPE_A, b"old", NOW);
        cache.update("a.example.", QTYPE_A, b"new", NOW + 5);
        assert_eq!(
            cache.lookup("a.example.", QTYPE_A, NOW + 5),
            CacheState::Fresh(b"new".to_vec())
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sweep_evicts_only_garbage() {
        let cache = FwdCache::new();
        cache.insert_raw("live.", QTYPE_A, b"x", NOW + 60);
        cache.insert_raw("stale.", QTYPE_A, b"x", NOW - 30);
        cache.insert_raw("dead.", QTYPE_A, b"x", NOW - FWD_CACHE_SALVAGE_SECS - 1);

        assert_eq!(cache.sweep(NOW), 1);
        assert_eq!(cache.len(), 2);
        assert!(matches!(cache.lookup("stale.", QTYPE_A, NOW), CacheState::Expired(_)));
    }

    #[test]
    fn delete_all_empties() {
        let cache = FwdCache::new();
        cache.update("a.", QTYPE_A, b"x", NOW);
        cache.update("b.", QTYPE_A, b"x", NOW);
        cache.delete_all();
        assert!(cache.is_empty());
        assert_eq!(cache.lookup("a.", QTYPE_A, NOW), CacheState::NotFound);
    }

    #[test]
    fn dump_lists_entries() {
        let cache = FwdCache::new();
        cache.update("a.example.", QTYPE_A, b"x", NOW);
        let dump = cache.dump();
        assert_eq!(dump.len(), 1);
        assert_eq!(dump[0].domain, "a.example.");
        assert_eq!(dump[0].qtype, QTYPE_A);
        assert_eq!(dump[0].expires_at, NOW + FWD_CACHE_TTL_SECS);
    }
}
