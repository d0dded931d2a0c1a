//! Generic keyed store with TTL, negative entries, a stale-while-revalidate
//! window, and bounded size.
//!
//! Entry lifecycle: written by `set`; served fresh while `now <= expires_at`;
//! served stale while `expires_at < now <= stale_at` (only when a stale
//! window is configured); removed on expiry past `stale_at`, on explicit
//! invalidation, on insertion-order eviction at `max_entries`, or on
//! `clear`. Negative entries use the shorter negative TTL and are never
//! served stale. Entries with an infinite TTL never expire.

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use capbus_core::constants::DEFAULT_MAX_CACHE_ENTRIES;
use capbus_core::constants::DEFAULT_NEGATIVE_TTL;
use capbus_core::constants::DEFAULT_RESOLUTION_TTL;
use capbus_core::constants::DEFAULT_STALE_WINDOW;
use parking_lot::RwLock;

/// Configuration for a [`TtlCache`].
#[derive(Debug, Clone)]
pub struct TtlCacheConfig {
    /// TTL applied when `set` is called without one.
    pub default_ttl: Duration,
    /// TTL applied to negative entries.
    pub negative_ttl: Duration,
    /// Stale-while-revalidate window appended after expiry; `None` disables
    /// stale serving.
    pub stale_window: Option<Duration>,
    /// Upper bound on stored entries; the oldest insertion is evicted first.
    pub max_entries: usize,
}

impl Default for TtlCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_RESOLUTION_TTL,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            stale_window: Some(DEFAULT_STALE_WINDOW),
            max_entries: DEFAULT_MAX_CACHE_ENTRIES,
        }
    }
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup<V> {
    /// The cached value, when one is present and not negative.
    pub value: Option<V>,
    /// Whether an entry was found at all.
    pub found: bool,
    /// Whether the entry was served from the stale window.
    pub is_stale: bool,
    /// Whether the entry is a negative marker.
    pub is_negative: bool,
}

impl<V> CacheLookup<V> {
    fn miss() -> Self {
        Self {
            value: None,
            found: false,
            is_stale: false,
            is_negative: false,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: Option<V>,
    expires_at: Option<Instant>,
    stale_at: Option<Instant>,
    is_negative: bool,
    etag: Option<String>,
    seq: u64,
}

enum EntryState {
    Fresh,
    Stale,
    Dead,
}

impl<V> Entry<V> {
    fn state(&self, now: Instant) -> EntryState {
        match self.expires_at {
            None => EntryState::Fresh,
            Some(expires_at) if now <= expires_at => EntryState::Fresh,
            Some(_) => match self.stale_at {
                Some(stale_at) if now <= stale_at => EntryState::Stale,
                _ => EntryState::Dead,
            },
        }
    }
}

/// Thread-safe TTL cache. Share behind an `Arc`.
pub struct TtlCache<V: Clone> {
    config: TtlCacheConfig,
    entries: RwLock<HashMap<String, Entry<V>>>,
    next_seq: RwLock<u64>,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache with the given configuration.
    pub fn new(config: TtlCacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            next_seq: RwLock::new(0),
        }
    }

    /// Look up a key. Dead entries are removed on the way out.
    pub fn get(&self, key: &str) -> CacheLookup<V> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return CacheLookup::miss(),
                Some(entry) => match entry.state(now) {
                    EntryState::Fresh => {
                        return CacheLookup {
                            value: entry.value.clone(),
                            found: true,
                            is_stale: false,
                            is_negative: entry.is_negative,
                        };
                    }
                    EntryState::Stale => {
                        return CacheLookup {
                            value: entry.value.clone(),
                            found: true,
                            is_stale: true,
                            is_negative: entry.is_negative,
                        };
                    }
                    EntryState::Dead => {}
                },
            }
        }

        // Entry outlived its stale window; drop it.
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(key)
            && matches!(entry.state(now), EntryState::Dead)
        {
            entries.remove(key);
        }
        CacheLookup::miss()
    }

    /// Store a positive value. `ttl` of `None` uses the default;
    /// `Duration::ZERO` stores the entry without expiry.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        self.set_with_etag(key, value, ttl, None);
    }

    /// Store a positive value together with its etag.
    pub fn set_with_etag(&self, key: impl Into<String>, value: V, ttl: Option<Duration>, etag: Option<String>) {
        self.insert(key.into(), Some(value), ttl.unwrap_or(self.config.default_ttl), false, etag);
    }

    /// Store a negative marker under the negative TTL.
    pub fn set_negative(&self, key: impl Into<String>) {
        self.insert(key.into(), None, self.config.negative_ttl, true, None);
    }

    /// Remove one key.
    pub fn invalidate(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Remove every key matched by the predicate; returns how many went.
    pub fn invalidate_matching(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        before - entries.len()
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of stored entries, dead ones included until they are touched.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True only for fresh (non-stale) entries.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .is_some_and(|entry| matches!(entry.state(now), EntryState::Fresh))
    }

    /// Etag of a live (fresh or stale) entry.
    pub fn get_etag(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entries = self.entries.read();
        entries.get(key).and_then(|entry| match entry.state(now) {
            EntryState::Dead => None,
            _ => entry.etag.clone(),
        })
    }

    fn insert(&self, key: String, value: Option<V>, ttl: Duration, is_negative: bool, etag: Option<String>) {
        let now = Instant::now();
        let (expires_at, stale_at) = if ttl.is_zero() {
            (None, None)
        } else {
            let expires_at = now + ttl;
            let stale_at = match self.config.stale_window {
                Some(window) if !is_negative => Some(expires_at + window),
                _ => None,
            };
            (Some(expires_at), stale_at)
        };

        let mut entries = self.entries.write();
        if entries.len() >= self.config.max_entries && !entries.contains_key(&key) {
            evict_oldest(&mut entries);
        }
        let seq = {
            let mut next = self.next_seq.write();
            *next += 1;
            *next
        };
        entries.insert(
            key,
            Entry {
                value,
                expires_at,
                stale_at,
                is_negative,
                etag,
                seq,
            },
        );
    }
}

fn evict_oldest<V>(entries: &mut HashMap<String, Entry<V>>) {
    let oldest = entries.iter().min_by_key(|(_, entry)| entry.seq).map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        entries.remove(&key);
    }
}
