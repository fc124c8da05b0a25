use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, info};
use rust_decimal::Decimal;
use sqlx::FromRow;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::rate::{Rate, merge};

/// Durable rates keyed by date.
///
/// Absence is `None` / a gap in the returned range, never an error. Any
/// `Err` is a storage outage and must not be read as "no rate".
#[async_trait]
pub trait RateStore: Send + Sync {
    async fn get(&self, date: NaiveDate) -> Result<Option<Rate>>;

    /// Stored rates in `[start, end]`, ascending by date.
    async fn get_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Rate>>;

    async fn upsert(&self, rate: &Rate) -> Result<()>;

    /// Applies every upsert or none of them.
    async fn upsert_batch(&self, rates: &[Rate]) -> Result<()>;
}

pub type SharedRateStore = Arc<dyn RateStore>;

#[derive(Debug, FromRow)]
struct RateRow {
    date: NaiveDate,
    rate: Decimal,
}

impl From<RateRow> for Rate {
    fn from(row: RateRow) -> Self {
        Rate::new(row.date, row.rate)
    }
}

pub struct PgRateStore {
    pool: PgPool,
}

impl PgRateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RateStore for PgRateStore {
    async fn get(&self, date: NaiveDate) -> Result<Option<Rate>> {
        let row: Option<RateRow> =
            sqlx::query_as("SELECT date, rate FROM uah_usd_rates WHERE date = $1")
                .bind(date)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Rate::from))
    }

    async fn get_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Rate>> {
        let rows: Vec<RateRow> = sqlx::query_as(
            "SELECT date, rate FROM uah_usd_rates WHERE date BETWEEN $1 AND $2 ORDER BY date",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        debug!("Store returned {} rates for {}..{}", rows.len(), start, end);
        Ok(rows.into_iter().map(Rate::from).collect())
    }

    async fn upsert(&self, rate: &Rate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO uah_usd_rates (date, rate, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (date) DO UPDATE SET
                rate = EXCLUDED.rate,
                updated_at = NOW()
            "#,
        )
        .bind(rate.date)
        .bind(rate.value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_batch(&self, rates: &[Rate]) -> Result<()> {
        if rates.is_empty() {
            return Ok(());
        }

        // ON CONFLICT cannot touch the same row twice in one statement.
        let unique: BTreeMap<NaiveDate, Decimal> =
            rates.iter().map(|r| (r.date, r.value)).collect();
        let dates: Vec<NaiveDate> = unique.keys().copied().collect();
        let values: Vec<Decimal> = unique.values().copied().collect();

        let result = sqlx::query(
            r#"
            INSERT INTO uah_usd_rates (date, rate, updated_at)
            SELECT d, r, NOW() FROM UNNEST($1::date[], $2::numeric[]) AS t(d, r)
            ON CONFLICT (date) DO UPDATE SET
                rate = EXCLUDED.rate,
                updated_at = NOW()
            "#,
        )
        .bind(&dates)
        .bind(&values)
        .execute(&self.pool)
        .await?;

        info!("Upserted {} rates", result.rows_affected());
        Ok(())
    }
}

/// Store kept in process memory. Used when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryRateStore {
    rates: RwLock<BTreeMap<NaiveDate, Rate>>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rates.read().await.len()
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn get(&self, date: NaiveDate) -> Result<Option<Rate>> {
        Ok(self.rates.read().await.get(&date).cloned())
    }

    async fn get_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Rate>> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .rates
            .read()
            .await
            .range(start..=end)
            .map(|(_, rate)| rate.clone())
            .collect())
    }

    async fn upsert(&self, rate: &Rate) -> Result<()> {
        let mut rates = self.rates.write().await;
        let stored = merge(rates.get(&rate.date), rate.clone());
        rates.insert(stored.date, stored);
        Ok(())
    }

    async fn upsert_batch(&self, batch: &[Rate]) -> Result<()> {
        let mut rates = self.rates.write().await;
        for rate in batch {
            let stored = merge(rates.get(&rate.date), rate.clone());
            rates.insert(stored.date, stored);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[tokio::test]
    async fn test_get_absent_is_none() {
        let store = MemoryRateStore::new();
        assert_eq!(store.get(day(10)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryRateStore::new();
        let rate = Rate::new(day(10), dec!(39.5000));

        store.upsert(&rate).await.unwrap();
        let once = store.get_range(day(1), day(31)).await.unwrap();

        store.upsert(&rate).await.unwrap();
        let twice = store.get_range(day(1), day(31)).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_value() {
        let store = MemoryRateStore::new();
        store.upsert(&Rate::new(day(10), dec!(39.5000))).await.unwrap();
        store.upsert(&Rate::new(day(10), dec!(39.4321))).await.unwrap();

        assert_eq!(store.get(day(10)).await.unwrap().unwrap().value, dec!(39.4321));
    }

    #[tokio::test]
    async fn test_range_omits_gaps_and_is_ordered() {
        let store = MemoryRateStore::new();
        store
            .upsert_batch(&[
                Rate::new(day(5), dec!(38.5)),
                Rate::new(day(2), dec!(38.2)),
                Rate::new(day(9), dec!(38.9)),
            ])
            .await
            .unwrap();

        let dates: Vec<_> = store
            .get_range(day(2), day(5))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.date)
            .collect();
        assert_eq!(dates, vec![day(2), day(5)]);

        assert!(store.get_range(day(6), day(8)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_with_duplicate_dates_keeps_last() {
        let store = MemoryRateStore::new();
        store
            .upsert_batch(&[Rate::new(day(3), dec!(1.1)), Rate::new(day(3), dec!(1.2))])
            .await
            .unwrap();

        assert_eq!(store.get(day(3)).await.unwrap().unwrap().value, dec!(1.2));
    }
}
