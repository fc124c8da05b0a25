use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

/// Official UAH price of one USD on a calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rate {
    pub date: NaiveDate,
    #[serde(rename = "rate")]
    pub value: Decimal,
}

impl Rate {
    pub fn new(date: NaiveDate, value: Decimal) -> Self {
        Self { date, value }
    }
}

/// Upsert rule shared by every tier: the incoming value always wins.
pub fn merge(_existing: Option<&Rate>, incoming: Rate) -> Rate {
    incoming
}

/// Every calendar day in `[start, end]`, ascending. Empty when `start > end`.
pub fn days(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |day| *day <= end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_merge_takes_incoming() {
        let old = Rate::new(date(2024, 1, 10), dec!(39.5000));
        let new = Rate::new(date(2024, 1, 10), dec!(39.6123));

        assert_eq!(merge(Some(&old), new.clone()), new);
        assert_eq!(merge(None, new.clone()), new);
    }

    #[test]
    fn test_days_inclusive() {
        let all: Vec<_> = days(date(2024, 2, 28), date(2024, 3, 1)).collect();
        assert_eq!(all, vec![date(2024, 2, 28), date(2024, 2, 29), date(2024, 3, 1)]);

        assert_eq!(days(date(2024, 3, 1), date(2024, 3, 1)).count(), 1);
        assert_eq!(days(date(2024, 3, 2), date(2024, 3, 1)).count(), 0);
    }

    #[test]
    fn test_serializes_date_and_rate() {
        let rate = Rate::new(date(2024, 2, 2), dec!(38.1234));
        let json = serde_json::to_value(&rate).unwrap();

        assert_eq!(json["date"], "2024-02-02");
        assert_eq!(json["rate"], "38.1234");
    }
}
