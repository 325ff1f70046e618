// =============================================================================
// Recompute — candle window + config → Snapshot
// =============================================================================
//
// Pure: works on a copy of the window taken under the buffer's read lock, so
// no lock is held while the indicator math runs.
//
// Periods are configured in hours and scaled to candle counts for the active
// interval. Result maps stay keyed by the configured values so that clients
// see stable keys (`"48"`, `"48_72"`) whatever the interval.
// =============================================================================

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::warn;

use crate::config_store::IndicatorConfig;
use crate::indicators::{
    calculate_bollinger, calculate_cci, calculate_envelope, calculate_macd, calculate_rsi,
    composite_price, latest_zone, volatility_5day,
};
use crate::market_data::{Candle, CandleKey};
use crate::period::{scale_period, Interval};
use crate::snapshot::{BandSnapshot, CandleView, Snapshot};

/// Newest-first composite price of an oldest-first `candles` window.
pub fn composite_series(candles: &[Candle]) -> Vec<f64> {
    let high: Vec<f64> = candles.iter().rev().map(|c| c.high).collect();
    let low: Vec<f64> = candles.iter().rev().map(|c| c.low).collect();
    let close: Vec<f64> = candles.iter().rev().map(|c| c.close).collect();
    composite_price(&high, &low, &close)
}

/// Build a snapshot from an oldest-first `candles` window. Returns `None` for
/// an empty window.
pub fn compute_snapshot(
    key: &CandleKey,
    candles: &[Candle],
    config: &IndicatorConfig,
    stale_source: bool,
) -> Option<Snapshot> {
    let newest = candles.last()?;

    let interval = match Interval::parse(&key.interval) {
        Ok(iv) => Some(iv),
        Err(e) => {
            warn!(key = %key, error = %e, "cannot scale periods, using configured values");
            None
        }
    };
    let scale = |period: u32| match &interval {
        Some(iv) => scale_period(period, iv),
        None => period as usize,
    };

    let price_series = composite_series(candles);

    let cci: BTreeMap<String, Vec<f64>> = config
        .cci_periods()
        .into_iter()
        .map(|p| (p.to_string(), calculate_cci(&price_series, scale(p))))
        .collect();

    let rsi: BTreeMap<String, Vec<f64>> = config
        .rsi_periods()
        .into_iter()
        .map(|p| (p.to_string(), calculate_rsi(&price_series, scale(p))))
        .collect();

    let macd = config
        .macd_triples()
        .into_iter()
        .map(|(fast, slow, signal)| {
            (
                format!("{fast}_{slow}"),
                calculate_macd(&price_series, scale(fast), scale(slow), scale(signal)),
            )
        })
        .collect();

    let price = newest.close;

    let bollinger = calculate_bollinger(
        &price_series,
        scale(config.boll_period),
        config.boll_deviation,
    );
    let bollinger_zone = latest_zone(price, &bollinger);

    let envelope = calculate_envelope(
        &price_series,
        scale(config.env_period),
        config.env_deviation,
    );
    let envelope_zone = latest_zone(price, &envelope);

    Some(Snapshot {
        symbol: key.symbol.clone(),
        interval: key.interval.clone(),
        timestamp: Utc::now(),
        price,
        klines: candles.iter().rev().map(CandleView::from).collect(),
        cci,
        rsi,
        macd,
        bollinger: BandSnapshot::new(bollinger, bollinger_zone),
        envelope: BandSnapshot::new(envelope, envelope_zone),
        volatility: volatility_5day(candles),
        stale_source,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const HOUR_MS: i64 = 3_600_000;
    // 2024-01-01T00:00:00Z
    const EPOCH: i64 = 1_704_067_200_000;

    /// `n` hourly candles (oldest-first) tracing a noisy sine wave.
    pub(crate) fn synthetic_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                let mid = 100.0 + 10.0 * (t / 12.0).sin() + 0.05 * t;
                let open_time = EPOCH + i as i64 * HOUR_MS;
                Candle {
                    open_time,
                    close_time: open_time + HOUR_MS - 1,
                    open: mid - 0.3,
                    high: mid + 1.0 + (t / 5.0).cos().abs(),
                    low: mid - 1.0 - (t / 7.0).sin().abs(),
                    close: mid + 0.2 * (t / 3.0).sin(),
                    volume: 10.0 + t,
                }
            })
            .collect()
    }

    fn keys<V>(map: &BTreeMap<String, V>) -> Vec<&str> {
        map.keys().map(String::as_str).collect()
    }

    #[test]
    fn end_to_end_200_hourly_candles() {
        let candles = synthetic_candles(200);
        let key = CandleKey::new("BTCUSDT", "1h");
        let snapshot =
            compute_snapshot(&key, &candles, &IndicatorConfig::default(), false).unwrap();

        assert_eq!(snapshot.symbol, "BTCUSDT");
        assert_eq!(snapshot.interval, "1h");
        assert_eq!(snapshot.price, candles[199].close);

        assert_eq!(keys(&snapshot.cci), vec!["168", "48", "72"]);
        assert_eq!(keys(&snapshot.rsi), vec!["48", "72"]);
        assert_eq!(keys(&snapshot.macd), vec!["48_72", "72_168"]);

        for series in snapshot.cci.values().chain(snapshot.rsi.values()) {
            assert_eq!(series.len(), 200);
        }
        for macd in snapshot.macd.values() {
            assert_eq!(macd.macd_line.len(), 200);
        }
        assert_eq!(snapshot.bollinger.middle.len(), 200);
        assert_eq!(snapshot.envelope.upper.len(), 200);

        assert!((-10..=10).contains(&snapshot.bollinger.zone));
        assert!((-10..=10).contains(&snapshot.envelope.zone));

        // Klines newest-first.
        assert_eq!(snapshot.klines.len(), 200);
        assert!(snapshot.klines[0].time > snapshot.klines[199].time);
        assert_eq!(snapshot.klines[0].close, candles[199].close);

        // 200 hours covers 8 complete UTC days, so volatility is defined.
        assert!(snapshot.volatility > 0.0);
        assert!(!snapshot.stale_source);
    }

    #[test]
    fn keys_stay_configured_when_interval_scales() {
        let candles = synthetic_candles(200);
        let key = CandleKey::new("BTCUSDT", "4h");
        let snapshot =
            compute_snapshot(&key, &candles, &IndicatorConfig::default(), true).unwrap();

        // 168 hours on 4h candles is 42 samples; the key is still "168".
        assert_eq!(keys(&snapshot.cci), vec!["168", "48", "72"]);
        assert_eq!(snapshot.cci["168"].len(), 200);
        assert!(snapshot.stale_source);
    }

    #[test]
    fn short_window_yields_empty_series_not_failure() {
        let candles = synthetic_candles(30);
        let key = CandleKey::new("BTCUSDT", "1h");
        let snapshot =
            compute_snapshot(&key, &candles, &IndicatorConfig::default(), false).unwrap();

        assert!(snapshot.cci["168"].is_empty());
        assert!(snapshot.macd["72_168"].macd_line.is_empty());
        assert_eq!(snapshot.bollinger.middle.len(), 30);
        assert_eq!(snapshot.volatility, 0.0);
    }

    #[test]
    fn unparseable_interval_falls_back_to_raw_periods() {
        let candles = synthetic_candles(60);
        let key = CandleKey::new("BTCUSDT", "weird");
        let snapshot =
            compute_snapshot(&key, &candles, &IndicatorConfig::default(), false).unwrap();
        assert_eq!(snapshot.cci["48"].len(), 60);
    }

    #[test]
    fn composite_series_is_newest_first() {
        let candles = synthetic_candles(3);
        let series = composite_series(&candles);
        let newest = &candles[2];
        assert_eq!(series.len(), 3);
        assert_eq!(series[0], (newest.high + newest.low + newest.close) / 3.0);
    }

    #[test]
    fn empty_window_yields_nothing() {
        let key = CandleKey::new("BTCUSDT", "1h");
        assert!(compute_snapshot(&key, &[], &IndicatorConfig::default(), false).is_none());
    }

    #[test]
    fn wire_shape() {
        let candles = synthetic_candles(200);
        let key = CandleKey::new("BTCUSDT", "1h");
        let snapshot =
            compute_snapshot(&key, &candles, &IndicatorConfig::default(), false).unwrap();
        let json = serde_json::to_value(&snapshot).unwrap();

        for field in [
            "symbol", "interval", "timestamp", "price", "klines", "cci", "rsi", "macd",
            "bollinger", "envelope", "volatility", "stale_source",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        let kline = &json["klines"][0];
        for field in ["time", "open", "high", "low", "close", "volume"] {
            assert!(kline.get(field).is_some(), "missing klines[0].{field}");
        }
        let macd = &json["macd"]["48_72"];
        for field in ["macd_line", "signal_line", "histogram"] {
            assert!(macd.get(field).is_some(), "missing macd.{field}");
        }
        for field in ["upper", "middle", "lower", "zone"] {
            assert!(json["bollinger"].get(field).is_some(), "missing bollinger.{field}");
        }
        // RFC 3339 timestamp.
        let ts = json["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
