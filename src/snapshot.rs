// =============================================================================
// Snapshot — the immutable result of one recompute
// =============================================================================
//
// Broadcast as `Arc<Snapshot>`; subscribers share one allocation and nobody
// can mutate it after delivery. All series are newest-first. The serialized
// shape is the wire contract for stream clients.
// =============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::indicators::{Bands, MacdSeries};
use crate::market_data::Candle;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandleView {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl From<&Candle> for CandleView {
    fn from(c: &Candle) -> Self {
        Self {
            time: DateTime::from_timestamp_millis(c.open_time).unwrap_or_default(),
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
        }
    }
}

/// A band series plus the zone of the latest price against it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BandSnapshot {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
    pub zone: i32,
}

impl BandSnapshot {
    pub fn new(bands: Bands, zone: i32) -> Self {
        Self {
            upper: bands.upper,
            middle: bands.middle,
            lower: bands.lower,
            zone,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub symbol: String,
    pub interval: String,
    /// Serialized as RFC 3339.
    pub timestamp: DateTime<Utc>,
    /// Close of the newest candle.
    pub price: f64,
    pub klines: Vec<CandleView>,
    /// Keyed by configured period, e.g. `"48"`.
    pub cci: BTreeMap<String, Vec<f64>>,
    pub rsi: BTreeMap<String, Vec<f64>>,
    /// Keyed by `"fast_slow"`, e.g. `"48_72"`.
    pub macd: BTreeMap<String, MacdSeries>,
    pub bollinger: BandSnapshot,
    pub envelope: BandSnapshot,
    pub volatility: f64,
    /// True when the stream was not live while this snapshot was built.
    pub stale_source: bool,
}
