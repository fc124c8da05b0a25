use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};
use crate::rate::Rate;

/// ISO 4217 numeric code of the US dollar, the only currency tracked.
pub const USD_CODE: u16 = 840;

const DATE_FORMAT: &str = "%d.%m.%Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedFormat {
    #[default]
    Json,
    Xml,
}

impl FromStr for FeedFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(FeedFormat::Json),
            "xml" => Ok(FeedFormat::Xml),
            other => Err(format!("unknown feed format '{}'", other)),
        }
    }
}

/// One record of the NBU `statdirectory/exchange` feed.
#[derive(Debug, Clone, PartialEq)]
pub struct NbuRate {
    pub exchange_date: NaiveDate,
    pub r030: u16,
    pub rate: Decimal,
}

#[derive(Debug, Deserialize)]
struct JsonRecord {
    #[serde(rename = "exchangedate", deserialize_with = "day_first_date")]
    exchange_date: NaiveDate,
    r030: u16,
    rate: serde_json::Number,
}

#[derive(Debug, Deserialize)]
struct XmlRecord {
    #[serde(rename = "exchangedate", deserialize_with = "day_first_date")]
    exchange_date: NaiveDate,
    r030: u16,
    rate: String,
}

#[derive(Debug, Deserialize)]
struct XmlExchange {
    #[serde(rename = "currency", default)]
    currency: Vec<XmlRecord>,
}

fn day_first_date<'de, D>(deserializer: D) -> std::result::Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).map_err(serde::de::Error::custom)
}

fn normalize_decimal_string(s: &str) -> String {
    s.trim().replace(',', ".")
}

fn parse_decimal(text: &str) -> Result<Decimal> {
    Decimal::from_str(&normalize_decimal_string(text))
        .map_err(|e| Error::Format(format!("invalid rate '{}': {}", text, e)))
}

/// Parses a raw feed body into records, keeping every currency.
pub fn parse(body: &str, format: FeedFormat) -> Result<Vec<NbuRate>> {
    match format {
        FeedFormat::Json => {
            let records: Vec<JsonRecord> =
                serde_json::from_str(body).map_err(|e| Error::Format(e.to_string()))?;
            records
                .into_iter()
                .map(|r| {
                    Ok(NbuRate {
                        exchange_date: r.exchange_date,
                        r030: r.r030,
                        rate: parse_decimal(&r.rate.to_string())?,
                    })
                })
                .collect()
        }
        FeedFormat::Xml => {
            let exchange: XmlExchange =
                quick_xml::de::from_str(body).map_err(|e| Error::Format(e.to_string()))?;
            exchange
                .currency
                .into_iter()
                .map(|r| {
                    Ok(NbuRate {
                        exchange_date: r.exchange_date,
                        r030: r.r030,
                        rate: parse_decimal(&r.rate)?,
                    })
                })
                .collect()
        }
    }
}

/// Keeps the records for `currency_code` and orders them by date.
pub fn to_rates(records: Vec<NbuRate>, currency_code: u16) -> Vec<Rate> {
    let mut rates: Vec<Rate> = records
        .into_iter()
        .filter(|r| r.r030 == currency_code)
        .map(|r| Rate::new(r.exchange_date, r.rate))
        .collect();
    rates.sort_by_key(|r| r.date);
    rates.dedup_by_key(|r| r.date);
    rates
}
