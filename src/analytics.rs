use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

pub const DEFAULT_WINDOW_DAYS: u32 = 7;
pub const MAX_WINDOW_DAYS: u32 = 90;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DailyBucket {
    pub date: NaiveDate,
    pub count: i64,
    pub amount: Decimal,
}

/// Clamps a requested reporting window to `1..=MAX_WINDOW_DAYS`.
pub fn window_days(requested: Option<u32>) -> u32 {
    requested
        .unwrap_or(DEFAULT_WINDOW_DAYS)
        .clamp(1, MAX_WINDOW_DAYS)
}

/// First instant of the window ending today (inclusive), `days` long.
pub fn window_start(today: NaiveDate, days: u32) -> DateTime<Utc> {
    let first_day = today - Duration::days(i64::from(days) - 1);
    first_day.and_time(NaiveTime::MIN).and_utc()
}

/// Groups `(timestamp, amount)` rows by UTC day over the `days` ending at
/// `today`. Every day of the window is present, empty days carry zeros, and
/// rows outside the window are ignored.
pub fn bucket_by_day(
    rows: impl IntoIterator<Item = (DateTime<Utc>, Decimal)>,
    today: NaiveDate,
    days: u32,
) -> Vec<DailyBucket> {
    let first_day = today - Duration::days(i64::from(days) - 1);
    let mut buckets: BTreeMap<NaiveDate, DailyBucket> = first_day
        .iter_days()
        .take(days as usize)
        .map(|date| {
            (
                date,
                DailyBucket {
                    date,
                    count: 0,
                    amount: Decimal::ZERO,
                },
            )
        })
        .collect();

    for (at, amount) in rows {
        if let Some(bucket) = buckets.get_mut(&at.date_naive()) {
            bucket.count += 1;
            bucket.amount += amount;
        }
    }

    buckets.into_values().collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0).unwrap()
    }

    #[test]
    fn window_is_clamped() {
        assert_eq!(window_days(None), DEFAULT_WINDOW_DAYS);
        assert_eq!(window_days(Some(0)), 1);
        assert_eq!(window_days(Some(365)), MAX_WINDOW_DAYS);
        assert_eq!(window_days(Some(30)), 30);
    }

    #[test]
    fn window_start_is_midnight_of_first_day() {
        assert_eq!(window_start(day(10), 3), at(8, 0));
        assert_eq!(window_start(day(10), 1), at(10, 0));
    }

    #[test]
    fn zero_fills_and_sums_per_day() {
        let rows = vec![
            (at(8, 9), Decimal::new(500, 2)),
            (at(8, 23), Decimal::new(125, 2)),
            (at(10, 1), Decimal::new(300, 2)),
        ];
        let buckets = bucket_by_day(rows, day(10), 3);

        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].date, day(8));
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[0].amount, Decimal::new(625, 2));
        assert_eq!(buckets[1].count, 0);
        assert_eq!(buckets[1].amount, Decimal::ZERO);
        assert_eq!(buckets[2].amount, Decimal::new(300, 2));
    }

    #[test]
    fn ignores_rows_outside_the_window() {
        let rows = vec![(at(1, 12), Decimal::ONE), (at(11, 0), Decimal::ONE)];
        let buckets = bucket_by_day(rows, day(10), 2);
        assert!(buckets.iter().all(|b| b.count == 0));
    }
}
