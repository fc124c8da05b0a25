//! UAH/USD official exchange rates with tiered lookup.
//!
//! Rates are answered from an in-memory cache, then a durable store, then the
//! National Bank of Ukraine feed. Anything fetched upstream is written back to
//! the store and the cache.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod gate;
pub mod nbu;
pub mod rate;
pub mod resolver;
pub mod source;
pub mod store;

pub use cache::{MemoryRateCache, RateCache};
pub use error::{Error, Result};
pub use gate::{Rejection, RetentionGate};
pub use rate::Rate;
pub use resolver::{Average, CoveragePolicy, RateResolver, Resolution};
pub use source::{NbuClient, RateSource, RetryPolicy};
pub use store::{MemoryRateStore, PgRateStore, RateStore};
