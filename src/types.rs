// =============================================================================
// Shared types used across the indicator engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// A single incremental price update extracted from a kline stream frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    /// Latest close price of the in-progress candle.
    pub price: f64,
    /// Running open / high / low / volume of that candle. Frames that omit
    /// them fall back to `price` (and 0 volume).
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    /// Candle close time in ms (falls back to the open time when absent).
    pub timestamp: i64,
    /// Open time (ms) of the candle this tick belongs to.
    pub candle_open_time: i64,
    /// Whether the exchange marked the candle as final.
    pub is_final: bool,
}

/// Liveness of the supervised market stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamHealth {
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

impl Default for StreamHealth {
    fn default() -> Self {
        Self::Connecting
    }
}

impl StreamHealth {
    /// Snapshots built while the stream is not live are flagged as stale.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for StreamHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}
