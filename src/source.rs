use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};

use crate::error::{Error, Result};
use crate::nbu::{self, FeedFormat, USD_CODE};
use crate::rate::Rate;

pub const DEFAULT_NBU_URL: &str = "https://bank.gov.ua/NBUStatService/v1/statdirectory/exchange";

/// Authoritative upstream for published rates.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// One request for the whole `[start, end]` span. Days without a published
    /// rate are missing from the result; that is not an error.
    async fn fetch_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Rate>>;

    async fn fetch_one(&self, date: NaiveDate) -> Result<Option<Rate>> {
        let rates = self.fetch_range(date, date).await?;
        Ok(rates.into_iter().find(|r| r.date == date))
    }
}

pub type SharedRateSource = Arc<dyn RateSource>;

/// Exponential backoff for transient transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

struct Failure {
    retryable: bool,
    message: String,
}

impl From<reqwest::Error> for Failure {
    fn from(e: reqwest::Error) -> Self {
        Self {
            retryable: e.is_connect() || e.is_timeout() || e.is_request(),
            message: e.to_string(),
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// HTTP client for the National Bank of Ukraine exchange feed.
pub struct NbuClient {
    client: Client,
    base_url: String,
    format: FeedFormat,
    retry: RetryPolicy,
}

impl NbuClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            format: FeedFormat::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_format(mut self, format: FeedFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn get_url(&self, start: NaiveDate, end: NaiveDate) -> String {
        let mut url = format!(
            "{}?start={}&end={}&valcode=usd",
            self.base_url,
            start.format("%Y%m%d"),
            end.format("%Y%m%d")
        );
        if self.format == FeedFormat::Json {
            url.push_str("&json");
        }
        url
    }

    async fn load_once(&self, url: &str) -> std::result::Result<String, Failure> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Failure {
                retryable: is_retryable_status(status),
                message: format!("unexpected status {}", status),
            });
        }
        Ok(resp.text().await?)
    }

    async fn load(&self, url: &str) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.load_once(url).await {
                Ok(body) => return Ok(body),
                Err(failure) if failure.retryable && attempt < self.retry.attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "NBU request failed (attempt {}/{}): {}; retrying in {:?}",
                        attempt, self.retry.attempts, failure.message, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(failure) => {
                    return Err(Error::Transport(format!(
                        "{} after {} attempt(s)",
                        failure.message, attempt
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl RateSource for NbuClient {
    async fn fetch_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Rate>> {
        let url = self.get_url(start, end);
        info!("Fetching NBU rates for {}..{}", start, end);

        let body = self.load(&url).await?;
        debug!("NBU body: {}", body.chars().take(200).collect::<String>());

        let rates = nbu::to_rates(nbu::parse(&body, self.format)?, USD_CODE);
        if rates.is_empty() {
            warn!("NBU published no USD rate for {}..{}", start, end);
        }
        Ok(rates)
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockFailure, MockRateSource};

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;

    /// Kind of upstream error a failing mock reports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MockFailure {
        Transport,
        Format,
    }

    impl MockFailure {
        fn to_error(self) -> Error {
            match self {
                Self::Transport => Error::Transport("connection refused".to_string()),
                Self::Format => Error::Format("unexpected end of JSON input".to_string()),
            }
        }
    }

    /// Source serving a fixed set of published rates and recording each request.
    #[derive(Default)]
    pub struct MockRateSource {
        published: Mutex<BTreeMap<NaiveDate, Rate>>,
        requests: Mutex<Vec<(NaiveDate, NaiveDate)>>,
        failure: Mutex<Option<MockFailure>>,
    }

    impl MockRateSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn publish(&self, rate: Rate) {
            self.published.lock().unwrap().insert(rate.date, rate);
        }

        /// Makes every following fetch fail with a transport error.
        pub fn fail(&self) {
            self.fail_with(MockFailure::Transport);
        }

        pub fn fail_with(&self, kind: MockFailure) {
            *self.failure.lock().unwrap() = Some(kind);
        }

        pub fn requests(&self) -> Vec<(NaiveDate, NaiveDate)> {
            self.requests.lock().unwrap().clone()
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RateSource for MockRateSource {
        async fn fetch_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Rate>> {
            self.requests.lock().unwrap().push((start, end));
            if let Some(kind) = *self.failure.lock().unwrap() {
                return Err(kind.to_error());
            }
            Ok(self
                .published
                .lock()
                .unwrap()
                .range(start..=end)
                .map(|(_, rate)| rate.clone())
                .collect())
        }
    }
}
