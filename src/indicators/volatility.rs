// =============================================================================
// Five-Day Volatility
// =============================================================================
//
// Mean daily range over the five most recent *completed* UTC days. Candles are
// bucketed by the UTC date of their open time; the day of the newest candle is
// still in progress and is excluded. Each day contributes
// max(high) - min(low); days with a non-positive range are dropped.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};

use crate::market_data::Candle;

const DAYS: usize = 5;

/// Mean range of the last five complete UTC days, or 0 when fewer than five
/// days qualify. Candle order does not matter.
pub fn volatility_5day(candles: &[Candle]) -> f64 {
    let Some(newest) = candles.iter().map(|c| c.open_time).max() else {
        return 0.0;
    };
    let Some(current_day) = utc_day(newest) else {
        return 0.0;
    };

    let mut days: BTreeMap<NaiveDate, (f64, f64)> = BTreeMap::new();
    for candle in candles {
        let Some(day) = utc_day(candle.open_time) else {
            continue;
        };
        if day >= current_day {
            continue;
        }
        let entry = days.entry(day).or_insert((candle.high, candle.low));
        entry.0 = entry.0.max(candle.high);
        entry.1 = entry.1.min(candle.low);
    }

    let ranges: Vec<f64> = days
        .values()
        .rev()
        .map(|(high, low)| high - low)
        .filter(|range| *range > 0.0)
        .take(DAYS)
        .collect();

    if ranges.len() < DAYS {
        return 0.0;
    }
    ranges.iter().sum::<f64>() / DAYS as f64
}

fn utc_day(timestamp_ms: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(timestamp_ms).map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 3_600_000;
    const DAY_MS: i64 = 24 * HOUR_MS;
    // 2024-01-01T00:00:00Z
    const EPOCH: i64 = 1_704_067_200_000;

    /// Two candles per day for `days` days, with day `d` spanning a range of
    /// `d + 1`, plus one candle at the start of the following (current) day.
    fn daily_candles(days: i64) -> Vec<Candle> {
        let mut out = Vec::new();
        for d in 0..days {
            let base = 100.0;
            for h in [0, 12] {
                let open_time = EPOCH + d * DAY_MS + h * HOUR_MS;
                out.push(Candle {
                    open_time,
                    close_time: open_time + HOUR_MS - 1,
                    open: base,
                    high: if h == 0 { base + (d + 1) as f64 } else { base },
                    low: base,
                    close: base,
                    volume: 1.0,
                });
            }
        }
        let open_time = EPOCH + days * DAY_MS;
        out.push(Candle {
            open_time,
            close_time: open_time + HOUR_MS - 1,
            open: 100.0,
            high: 10_000.0,
            low: 1.0,
            close: 100.0,
            volume: 1.0,
        });
        out
    }

    #[test]
    fn fewer_than_five_days_is_zero() {
        assert_eq!(volatility_5day(&daily_candles(4)), 0.0);
        assert_eq!(volatility_5day(&[]), 0.0);
    }

    #[test]
    fn uses_five_most_recent_complete_days() {
        // Six complete days with ranges 1..=6; the current day is ignored.
        // Most recent five: 2, 3, 4, 5, 6 → mean 4.
        assert_eq!(volatility_5day(&daily_candles(6)), 4.0);
        // Eight days: 4..=8 → mean 6.
        assert_eq!(volatility_5day(&daily_candles(8)), 6.0);
    }

    #[test]
    fn order_independent() {
        let mut candles = daily_candles(7);
        let forward = volatility_5day(&candles);
        candles.reverse();
        assert_eq!(volatility_5day(&candles), forward);
    }

    #[test]
    fn flat_days_do_not_count() {
        let mut candles = daily_candles(6);
        // Flatten the most recent complete day (index 5): its range becomes 0.
        for c in candles.iter_mut() {
            if c.open_time >= EPOCH + 5 * DAY_MS && c.open_time < EPOCH + 6 * DAY_MS {
                c.high = c.low;
            }
        }
        // Remaining positive days: 1..=5 → mean 3.
        assert_eq!(volatility_5day(&candles), 3.0);
    }
}
