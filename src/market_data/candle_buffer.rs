use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::Tick;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV candle. Timestamps are UTC milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// A candle is identified by its open time.
    pub fn timestamp(&self) -> i64 {
        self.open_time
    }
}

/// The active (symbol, interval) pair.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: String,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            interval: interval.into(),
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

// ---------------------------------------------------------------------------
// CandleBuffer -- the rolling window for the active key
// ---------------------------------------------------------------------------

struct BufferState {
    key: CandleKey,
    candles: Vec<Candle>,
}

/// Thread-safe rolling window of candles (oldest-first) for a single active
/// `(symbol, interval)` pair. The key and the window live under one lock so a
/// reader never observes candles of one pair labelled with another.
pub struct CandleBuffer {
    state: RwLock<BufferState>,
    max_candles: usize,
}

impl CandleBuffer {
    /// Create a buffer for `key` retaining at most `max_candles` candles.
    pub fn new(key: CandleKey, candles: Vec<Candle>, max_candles: usize) -> Self {
        let buffer = Self {
            state: RwLock::new(BufferState {
                key: key.clone(),
                candles: Vec::new(),
            }),
            max_candles: max_candles.max(1),
        };
        buffer.replace(key, candles);
        buffer
    }

    /// Swap in a new key and window. The candles are sorted and de-duplicated
    /// by open time (the later entry wins) and trimmed to `max_candles`.
    pub fn replace(&self, key: CandleKey, candles: Vec<Candle>) {
        let candles = self.normalize(candles);
        let mut state = self.state.write();
        debug!(key = %key, count = candles.len(), "candle window replaced");
        state.key = key;
        state.candles = candles;
    }

    /// Fold a streaming tick into the window.
    ///
    /// A tick for the newest candle updates it in place. A tick for a later
    /// candle (the exchange rolled over before the next reconciliation) opens a
    /// new in-progress candle, trimming the oldest one if the window is full.
    /// Ticks for another symbol or for an already closed candle are ignored.
    /// Returns `true` when the window changed.
    pub fn apply_tick(&self, tick: &Tick) -> bool {
        let mut state = self.state.write();
        if !state.key.symbol.eq_ignore_ascii_case(&tick.symbol) {
            return false;
        }

        let Some(last) = state.candles.last_mut() else {
            return false;
        };
        let last_open = last.open_time;

        // Frames without a candle open time are attributed to the live candle.
        if tick.candle_open_time == 0 || tick.candle_open_time == last_open {
            last.close = tick.price;
            last.high = last.high.max(tick.high).max(tick.price);
            last.low = last.low.min(tick.low).min(tick.price);
            if tick.volume > 0.0 {
                last.volume = tick.volume;
            }
            return true;
        }
        if tick.candle_open_time < last_open {
            return false;
        }

        state.candles.push(Candle {
            open_time: tick.candle_open_time,
            close_time: tick.timestamp.max(tick.candle_open_time),
            open: tick.open,
            high: tick.high.max(tick.price),
            low: tick.low.min(tick.price),
            close: tick.price,
            volume: tick.volume,
        });
        if state.candles.len() > self.max_candles {
            let excess = state.candles.len() - self.max_candles;
            state.candles.drain(..excess);
        }
        debug!(key = %state.key, open_time = tick.candle_open_time, "live candle rolled over");
        true
    }

    /// Replace the window with `fetched` if it was fetched for the still-active
    /// key and is either longer or ends strictly later than the current window.
    pub fn reconcile(&self, key: &CandleKey, fetched: Vec<Candle>) -> bool {
        let fetched = self.normalize(fetched);
        let mut state = self.state.write();
        if &state.key != key {
            debug!(fetched_for = %key, active = %state.key, "discarding stale reconciliation");
            return false;
        }

        let current_last = state.candles.last().map(Candle::timestamp);
        let fetched_last = fetched.last().map(Candle::timestamp);
        let newer = match (fetched_last, current_last) {
            (Some(f), Some(c)) => f > c,
            (Some(_), None) => true,
            _ => false,
        };

        if fetched.len() > state.candles.len() || newer {
            state.candles = fetched;
            true
        } else {
            false
        }
    }

    /// Copy of the active key and window (oldest-first). The lock is released
    /// before the caller does any work with the copy.
    pub fn snapshot(&self) -> (CandleKey, Vec<Candle>) {
        let state = self.state.read();
        (state.key.clone(), state.candles.clone())
    }

    pub fn key(&self) -> CandleKey {
        self.state.read().key.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().candles.len()
    }

    fn normalize(&self, mut candles: Vec<Candle>) -> Vec<Candle> {
        // Stable sort keeps arrival order among equal open times, so the
        // later duplicate survives the reverse dedup below.
        candles.sort_by_key(Candle::timestamp);
        candles.reverse();
        candles.dedup_by_key(|c| c.open_time);
        candles.reverse();

        if candles.len() > self.max_candles {
            candles.drain(..candles.len() - self.max_candles);
        }
        candles
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
