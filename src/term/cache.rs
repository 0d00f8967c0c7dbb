//! Term Cache (C2) — a bounded, process-wide two-way mapping between a
//! term's lexical identity and its UUID.
//!
//! The cache is purely an optimization: a miss falls back to the codec
//! plus a database lookup, and the result set of any query must be
//! identical whether the cache is empty, warm, or evicted mid-query
//! (cache transparency, spec invariant 3). Eviction is LRU, bounded by
//! [`crate::config::TermCacheOptions::capacity`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use lru::LruCache;
use std::num::NonZeroUsize;
use uuid::Uuid;

use crate::term::codec::{Term, TermKind};

/// The lexical key a term resolves from: kind + lexical form + datatype
/// + language, matching the encode/decode contract in [`crate::term::codec`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LexicalKey {
    space_id: String,
    kind: TermKind,
    lexical: String,
    datatype: Option<String>,
    language: Option<String>,
}

impl LexicalKey {
    fn from_term(space_id: &str, term: &Term) -> Self {
        LexicalKey {
            space_id: space_id.to_string(),
            kind: term.kind,
            lexical: term.lexical.clone(),
            datatype: term.datatype.clone(),
            language: term.language.clone(),
        }
    }
}

#[derive(Default)]
pub struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
}

impl CacheCounters {
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

/// A bounded two-way term cache. Safe for concurrent access from many
/// tasks; internally guarded by a single mutex per direction, which is
/// adequate since entries are small and lookups are fast — lock
/// contention is never held across an `.await`.
pub struct TermCache {
    lexical_to_uuid: Mutex<LruCache<LexicalKey, Uuid>>,
    uuid_to_term: Mutex<LruCache<Uuid, Term>>,
    counters: CacheCounters,
}

impl TermCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            lexical_to_uuid: Mutex::new(LruCache::new(capacity)),
            uuid_to_term: Mutex::new(LruCache::new(capacity)),
            counters: CacheCounters::default(),
        }
    }

    pub fn lookup_uuid(&self, space_id: &str, term: &Term) -> Option<Uuid> {
        let key = LexicalKey::from_term(space_id, term);
        let mut cache = self.lexical_to_uuid.lock().unwrap();
        match cache.get(&key) {
            Some(uuid) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(*uuid)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn lookup_term(&self, uuid: Uuid) -> Option<Term> {
        let mut cache = self.uuid_to_term.lock().unwrap();
        match cache.get(&uuid) {
            Some(term) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(term.clone())
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, space_id: &str, term: Term) {
        let key = LexicalKey::from_term(space_id, &term);
        self.lexical_to_uuid
            .lock()
            .unwrap()
            .put(key, term.uuid);
        self.uuid_to_term.lock().unwrap().put(term.uuid, term);
    }

    /// Invalidates every cached blank-node entry belonging to `space_id`.
    /// Called after a space's tables are dropped, since blank-node UUIDs
    /// are scoped per space and otherwise a later space reusing the same
    /// id could observe stale entries.
    pub fn invalidate_space_blank_nodes(&self, space_id: &str) {
        {
            let mut cache = self.lexical_to_uuid.lock().unwrap();
            let stale: Vec<LexicalKey> = cache
                .iter()
                .filter(|(k, _)| k.kind == TermKind::BlankNode && k.space_id == space_id)
                .map(|(k, _)| k.clone())
                .collect();
            for key in stale {
                cache.pop(&key);
            }
        }
        // uuid_to_term entries for those blank nodes become unreachable
        // via lookup_uuid and will simply age out of the LRU; we don't
        // walk the reverse map since blank-node uuids aren't otherwise
        // distinguishable once namespaced.
    }

    pub fn counters(&self) -> (u64, u64) {
        self.counters.snapshot()
    }

    pub fn len(&self) -> (usize, usize) {
        (
            self.lexical_to_uuid.lock().unwrap().len(),
            self.uuid_to_term.lock().unwrap().len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_insert_then_hit() {
        let cache = TermCache::new(16);
        let term = Term::uri("http://ex/a");
        assert!(cache.lookup_uuid("s1", &term).is_none());
        cache.insert("s1", term.clone());
        assert_eq!(cache.lookup_uuid("s1", &term), Some(term.uuid));
        assert_eq!(cache.lookup_term(term.uuid).map(|t| t.uuid), Some(term.uuid));
        let (hits, misses) = cache.counters();
        assert_eq!(hits, 2);
        assert_eq!(misses, 1);
    }

    #[test]
    fn eviction_under_capacity_pressure_falls_back_cleanly() {
        let cache = TermCache::new(1);
        let a = Term::uri("http://ex/a");
        let b = Term::uri("http://ex/b");
        cache.insert("s1", a.clone());
        cache.insert("s1", b.clone());
        // `a` was evicted; a cache miss is not an error, the caller just
        // recomputes via the codec (cache transparency).
        assert!(cache.lookup_uuid("s1", &a).is_none());
        assert_eq!(cache.lookup_uuid("s1", &b), Some(b.uuid));
    }

    #[test]
    fn invalidate_space_blank_nodes_clears_only_that_space() {
        let cache = TermCache::new(16);
        let b1 = Term::blank_node("s1", "x");
        let b2 = Term::blank_node("s2", "x");
        cache.insert("s1", b1.clone());
        cache.insert("s2", b2.clone());
        cache.invalidate_space_blank_nodes("s1");
        assert!(cache.lookup_uuid("s1", &b1).is_none());
        assert_eq!(cache.lookup_uuid("s2", &b2), Some(b2.uuid));
    }
}
