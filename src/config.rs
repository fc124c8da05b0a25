use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cache::MAX_TTL;
use crate::nbu::FeedFormat;
use crate::resolver::CoveragePolicy;
use crate::source::{DEFAULT_NBU_URL, RetryPolicy};

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// No URL means rates are only kept in memory.
    pub database_url: Option<String>,
    pub nbu_api_url: String,
    pub feed_format: FeedFormat,
    pub cache_ttl: Duration,
    pub retention_months: u32,
    pub max_span_days: u32,
    pub cache_sweep_interval: Duration,
    pub coverage: CoveragePolicy,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            database_url: None,
            nbu_api_url: DEFAULT_NBU_URL.to_string(),
            feed_format: FeedFormat::Json,
            cache_ttl: crate::cache::DEFAULT_TTL,
            retention_months: 12,
            max_span_days: crate::gate::DEFAULT_MAX_SPAN_DAYS,
            cache_sweep_interval: Duration::from_secs(60 * 60),
            coverage: CoveragePolicy::Partial,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

fn parse<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("Invalid value '{}' for {}", raw, name))
}

impl Config {
    /// Reads `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = var("BIND_ADDR") {
            config.bind_addr = addr;
        }
        config.database_url = var("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if let Some(url) = var("NBU_API_URL") {
            config.nbu_api_url = url;
        }
        if let Some(raw) = var("NBU_FORMAT") {
            config.feed_format = parse("NBU_FORMAT", &raw)?;
        }
        if let Some(raw) = var("CACHE_TTL_SECS") {
            config.cache_ttl = Duration::from_secs(parse("CACHE_TTL_SECS", &raw)?);
        }
        if let Some(raw) = var("DATA_RETENTION_MONTHS") {
            config.retention_months = parse("DATA_RETENTION_MONTHS", &raw)?;
        }
        if let Some(raw) = var("MAX_SPAN_DAYS") {
            config.max_span_days = parse("MAX_SPAN_DAYS", &raw)?;
        }
        if let Some(raw) = var("CACHE_SWEEP_SECS") {
            config.cache_sweep_interval = Duration::from_secs(parse("CACHE_SWEEP_SECS", &raw)?);
        }
        if let Some(raw) = var("AVERAGE_COVERAGE") {
            config.coverage = parse("AVERAGE_COVERAGE", &raw)?;
        }
        if let Some(raw) = var("FETCH_RETRY_ATTEMPTS") {
            config.retry.attempts = parse("FETCH_RETRY_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = var("FETCH_RETRY_BASE_MS") {
            config.retry.base_delay = Duration::from_millis(parse("FETCH_RETRY_BASE_MS", &raw)?);
        }
        if let Some(raw) = var("FETCH_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse("FETCH_TIMEOUT_SECS", &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nbu_api_url.trim().is_empty() {
            anyhow::bail!("NBU_API_URL cannot be empty");
        }
        if self.retry.attempts == 0 {
            anyhow::bail!("FETCH_RETRY_ATTEMPTS must be at least 1");
        }
        if self.cache_ttl.is_zero() {
            anyhow::bail!("CACHE_TTL_SECS must be positive");
        }
        if self.cache_ttl > MAX_TTL {
            anyhow::bail!("CACHE_TTL_SECS cannot exceed {} seconds", MAX_TTL.as_secs());
        }
        if self.cache_sweep_interval.is_zero() {
            anyhow::bail!("CACHE_SWEEP_SECS must be positive");
        }
        if self.max_span_days == 0 {
            anyhow::bail!("MAX_SPAN_DAYS must be at least 1");
        }
        Ok(())
    }
}
