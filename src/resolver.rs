//! Tiered rate lookup: cache, then store, then the upstream feed.
//!
//! Each request walks `CHECK_CACHE -> CHECK_STORE -> FETCH_SOURCE -> DONE` over a
//! [`Lookup`], which tracks what is resolved and which dates are still missing.
//! The store and the source are each asked at most once per request, for the
//! smallest span covering every missing date.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use log::{debug, info, warn};
use rust_decimal::Decimal;

use crate::cache::{DEFAULT_TTL, SharedRateCache};
use crate::error::Result;
use crate::rate::{Rate, days};
use crate::source::SharedRateSource;
use crate::store::SharedRateStore;

/// Whether an average may be computed over a partially resolved range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoveragePolicy {
    /// Average whatever resolved, as long as at least one day did.
    #[default]
    Partial,
    /// Every day of the range must resolve.
    Full,
}

impl FromStr for CoveragePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "partial" => Ok(CoveragePolicy::Partial),
            "full" => Ok(CoveragePolicy::Full),
            other => Err(format!("unknown coverage policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Average {
    Mean {
        value: Decimal,
        resolved_days: usize,
        requested_days: usize,
    },
    InsufficientData,
}

/// Outcome of resolving `[start, end]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Ascending by date, one entry per resolved day.
    pub rates: Vec<Rate>,
    /// Days no tier could answer, ascending.
    pub missing: Vec<NaiveDate>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn requested_days(&self) -> usize {
        self.rates.len() + self.missing.len()
    }

    pub fn average(&self, policy: CoveragePolicy) -> Average {
        if self.rates.is_empty() || (policy == CoveragePolicy::Full && !self.is_complete()) {
            return Average::InsufficientData;
        }
        let sum: Decimal = self.rates.iter().map(|r| r.value).sum();
        Average::Mean {
            value: sum / Decimal::from(self.rates.len()),
            resolved_days: self.rates.len(),
            requested_days: self.requested_days(),
        }
    }
}

/// Resolved rates and still-missing dates of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    start: NaiveDate,
    end: NaiveDate,
    resolved: BTreeMap<NaiveDate, Rate>,
    missing: BTreeSet<NaiveDate>,
}

impl Lookup {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            resolved: BTreeMap::new(),
            missing: days(start, end).collect(),
        }
    }

    /// Asks `tier` for every missing date, one date at a time. Returns the hit count.
    pub fn probe(&mut self, mut tier: impl FnMut(NaiveDate) -> Option<Rate>) -> usize {
        let hits: Vec<Rate> = self.missing.iter().filter_map(|d| tier(*d)).collect();
        self.fill(hits).len()
    }

    /// Smallest span containing every missing date.
    pub fn missing_span(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((*self.missing.first()?, *self.missing.last()?))
    }

    /// Resolves missing dates from `rates`; dates already resolved or outside
    /// the request are ignored. Returns the rates that were taken.
    pub fn fill(&mut self, rates: impl IntoIterator<Item = Rate>) -> Vec<Rate> {
        let mut taken = Vec::new();
        for rate in rates {
            if self.missing.remove(&rate.date) {
                self.resolved.insert(rate.date, rate.clone());
                taken.push(rate);
            }
        }
        taken
    }

    /// Like [`Lookup::fill`] but also replaces already-resolved dates, for data
    /// straight from the authority.
    pub fn overwrite(&mut self, rates: impl IntoIterator<Item = Rate>) {
        for rate in rates {
            if rate.date < self.start || rate.date > self.end {
                continue;
            }
            self.missing.remove(&rate.date);
            self.resolved.insert(rate.date, rate);
        }
    }

    pub fn finish(self) -> Resolution {
        Resolution {
            start: self.start,
            end: self.end,
            rates: self.resolved.into_values().collect(),
            missing: self.missing.into_iter().collect(),
        }
    }
}

pub struct RateResolver {
    cache: SharedRateCache,
    store: SharedRateStore,
    source: SharedRateSource,
    ttl: Duration,
    coverage: CoveragePolicy,
}

impl RateResolver {
    pub fn new(cache: SharedRateCache, store: SharedRateStore, source: SharedRateSource) -> Self {
        Self {
            cache,
            store,
            source,
            ttl: DEFAULT_TTL,
            coverage: CoveragePolicy::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_coverage(mut self, coverage: CoveragePolicy) -> Self {
        self.coverage = coverage;
        self
    }

    pub fn coverage(&self) -> CoveragePolicy {
        self.coverage
    }

    pub async fn resolve(&self, date: NaiveDate) -> Result<Option<Rate>> {
        let resolution = self.resolve_range(date, date).await?;
        Ok(resolution.rates.into_iter().next())
    }

    pub async fn resolve_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Resolution> {
        let mut lookup = Lookup::new(start, end);

        let cache_hits = lookup.probe(|date| self.cache.get(date));
        debug!("{}..{}: {} cache hits", start, end, cache_hits);

        if let Some((lo, hi)) = lookup.missing_span() {
            let stored = self.store.get_range(lo, hi).await?;
            let store_hits = lookup.fill(stored);
            debug!("{}..{}: {} store hits", start, end, store_hits.len());
            for rate in store_hits {
                self.cache.set(rate, self.ttl);
            }
        }

        if let Some((lo, hi)) = lookup.missing_span() {
            match self.source.fetch_range(lo, hi).await {
                Ok(fetched) => {
                    if !fetched.is_empty() {
                        self.store.upsert_batch(&fetched).await?;
                        info!("Stored {} rates fetched for {}..{}", fetched.len(), lo, hi);
                        for rate in &fetched {
                            self.cache.set(rate.clone(), self.ttl);
                        }
                    }
                    lookup.overwrite(fetched);
                }
                Err(e) if e.is_upstream() => {
                    warn!("Upstream unavailable for {}..{}, serving known rates: {}", lo, hi, e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(lookup.finish())
    }

    /// Mean rate over `[start, end]` under the configured coverage policy.
    pub async fn average(&self, start: NaiveDate, end: NaiveDate) -> Result<Average> {
        let resolution = self.resolve_range(start, end).await?;
        Ok(resolution.average(self.coverage))
    }
}
