use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use dashmap::DashMap;
use log::{debug, info};
use tokio::task::JoinHandle;

use crate::rate::Rate;

/// Default lifetime of a cached rate. Published daily rates do not change intraday.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest lifetime an entry may be given.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Process-local, time-expiring view of rates keyed by date.
///
/// Advisory only: a miss means "ask the next tier" and dropping every entry
/// never changes an answer.
pub trait RateCache: Send + Sync {
    fn get(&self, date: NaiveDate) -> Option<Rate>;

    fn set(&self, rate: Rate, ttl: Duration);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    rate: Rate,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
}

/// Thread-safe in-memory cache; each date lives in its own DashMap slot.
#[derive(Debug, Default)]
pub struct MemoryRateCache {
    entries: DashMap<NaiveDate, CacheEntry>,
}

impl MemoryRateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evict_expired(&self) {
        self.entries.retain(|_, entry| entry.is_valid());
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.entries.len();
        let valid = self.entries.iter().filter(|e| e.is_valid()).count();

        CacheStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
        }
    }
}

impl RateCache for MemoryRateCache {
    fn get(&self, date: NaiveDate) -> Option<Rate> {
        if let Some(entry) = self.entries.get(&date) {
            if entry.is_valid() {
                return Some(entry.rate.clone());
            }
            drop(entry);
            debug!("Cache entry for {} expired", date);
            self.entries.remove_if(&date, |_, entry| !entry.is_valid());
        }
        None
    }

    fn set(&self, rate: Rate, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl.min(MAX_TTL))
            .or_else(|| now.checked_add(DEFAULT_TTL))
            .unwrap_or(now);
        let entry = CacheEntry { expires_at, rate };
        self.entries.insert(entry.rate.date, entry);
    }
}

pub type SharedRateCache = Arc<dyn RateCache>;

/// Drops expired entries every `every` until the runtime shuts down.
pub fn spawn_eviction(cache: Arc<MemoryRateCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let before = cache.stats();
            cache.evict_expired();
            info!(
                "Cache sweep: {} live, {} expired evicted",
                before.valid_entries, before.expired_entries
            );
        }
    })
}
