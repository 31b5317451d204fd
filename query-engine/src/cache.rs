// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Fingerprint-keyed LRU caches with TTL staleness caps.
//!
//! Never a source of truth: entries are dropped on TTL expiry, LRU
//! pressure, and manifest change of the touched partition.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use core_types::config::CacheConfig;
use core_types::types::{ChainView, Symbol, UnderlyingBar};
use lru::LruCache;
use parking_lot::Mutex;
use rust_decimal::Decimal;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

pub(crate) struct TtlCache<V> {
    entries: Mutex<LruCache<String, Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero capacity");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        let stale = match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            entries.pop(key);
        }
        None
    }

    pub(crate) fn put(&self, key: String, value: V) {
        self.entries.lock().put(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub(crate) fn invalidate_prefix(&self, prefix: &str) {
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            entries.pop(&key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

pub(crate) struct QueryCaches {
    pub(crate) chains: TtlCache<ChainView>,
    pub(crate) bars: TtlCache<Vec<UnderlyingBar>>,
    pub(crate) spot: TtlCache<Option<Decimal>>,
}

impl QueryCaches {
    pub(crate) fn from_config(cfg: &CacheConfig) -> Self {
        Self {
            chains: TtlCache::new(cfg.chain_entries, Duration::from_secs(cfg.chain_ttl_s)),
            bars: TtlCache::new(cfg.bars_entries, Duration::from_secs(cfg.bars_ttl_s)),
            spot: TtlCache::new(cfg.spot_entries, Duration::from_secs(cfg.spot_ttl_s)),
        }
    }

    /// Drop every cached observation of one symbol after its partition's
    /// manifest changed.
    pub(crate) fn invalidate_symbol(&self, symbol: &Symbol) {
        let prefix = format!("{symbol}|");
        self.chains.invalidate_prefix(&prefix);
        self.bars.invalidate_prefix(&prefix);
        self.spot.invalidate_prefix(&prefix);
    }
}
