// =============================================================================
// Kline WebSocket stream — one connection per (symbol, interval)
// =============================================================================
//
// Two workers per connection:
//   reader:    parses kline frames into ticks and pushes them into a bounded
//               queue without blocking (a full queue drops the tick).
//   heartbeat: owns the write half and sends a Ping every `heartbeat` so the
//               exchange never sees the connection idle for 30 s.
//
// When the reader stops (read error, server close, or `close()`), the tick
// queue is closed and `next_tick()` returns `None`.
// =============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::binance::client::parse_str_f64;
use crate::error::{EngineError, EngineResult};
use crate::market_data::CandleKey;
use crate::types::Tick;

/// Stream URL for a single kline subscription.
pub fn kline_stream_url(stream_base: &str, key: &CandleKey) -> String {
    format!(
        "{}/ws/{}@kline_{}",
        stream_base.trim_end_matches('/'),
        key.symbol.to_lowercase(),
        key.interval
    )
}

pub struct KlineStream {
    ticks: mpsc::Receiver<Tick>,
    close_tx: watch::Sender<bool>,
}

impl KlineStream {
    /// Connect and start the reader and heartbeat workers.
    pub async fn open(
        stream_base: &str,
        key: &CandleKey,
        heartbeat: Duration,
        capacity: usize,
    ) -> EngineResult<Self> {
        let url = kline_stream_url(stream_base, key);
        info!(url = %url, key = %key, "connecting to kline WebSocket");

        let (ws_stream, _response) =
            connect_async(&url)
                .await
                .map_err(|e| EngineError::TransientNetwork {
                    attempts: 1,
                    message: format!("failed to connect to {url}: {e}"),
                })?;

        info!(key = %key, "kline WebSocket connected");
        let (mut write, mut read) = ws_stream.split();

        let (tick_tx, ticks) = mpsc::channel(capacity.max(1));
        let (close_tx, close_rx) = watch::channel(false);

        // ── Reader ──────────────────────────────────────────────────────
        let mut reader_close = close_rx.clone();
        let reader_key = key.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_close.changed() => {
                        debug!(key = %reader_key, "kline reader closed");
                        break;
                    }
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => match parse_kline_frame(&text) {
                            Ok(tick) => match tick_tx.try_send(tick) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    debug!(key = %reader_key, "tick queue full, dropping tick");
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => break,
                            },
                            Err(e) => warn!(key = %reader_key, error = %e, "skipping kline frame"),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            warn!(key = %reader_key, frame = ?frame, "kline WebSocket closed by server");
                            break;
                        }
                        // Ping / Pong / Binary frames carry no ticks.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(key = %reader_key, error = %e, "kline WebSocket read error");
                            break;
                        }
                        None => {
                            warn!(key = %reader_key, "kline WebSocket stream ended");
                            break;
                        }
                    }
                }
            }
        });

        // ── Heartbeat ───────────────────────────────────────────────────
        let mut heartbeat_close = close_rx;
        let heartbeat_key = key.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = heartbeat_close.changed() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                            debug!(key = %heartbeat_key, error = %e, "heartbeat ping failed");
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self { ticks, close_tx })
    }

    /// Next parsed tick, or `None` once the connection is gone.
    pub async fn next_tick(&mut self) -> Option<Tick> {
        self.ticks.recv().await
    }

    /// Stop both workers. Unblocks a pending read.
    pub fn close(&self) {
        let _ = self.close_tx.send(true);
    }
}

impl Drop for KlineStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Parse a single-stream kline frame:
///
/// ```json
/// { "e": "kline", "E": 1700000000123, "s": "BTCUSDT",
///   "k": { "t": 1700000000000, "T": 1700000059999, "s": "BTCUSDT", "i": "1m",
///          "o": "37000.00", "c": "37020.00", "h": "37050.00", "l": "36990.00",
///          "v": "123.456", "x": false } }
/// ```
///
/// A combined-stream envelope (`{"stream": .., "data": {..}}`) is unwrapped.
pub fn parse_kline_frame(text: &str) -> EngineResult<Tick> {
    let malformed = EngineError::MalformedMessage;

    let root: Value =
        serde_json::from_str(text).map_err(|e| malformed(format!("invalid JSON: {e}")))?;
    let data = root.get("data").unwrap_or(&root);

    let k = data
        .get("k")
        .filter(|k| k.is_object())
        .ok_or_else(|| malformed("missing kline object 'k'".into()))?;

    let symbol = data
        .get("s")
        .or_else(|| k.get("s"))
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing symbol".into()))?
        .to_uppercase();

    let price = parse_str_f64(&k["c"], "k.c").map_err(|e| malformed(e.to_string()))?;
    let candle_open_time = k.get("t").and_then(Value::as_i64).unwrap_or(0);
    let timestamp = k
        .get("T")
        .and_then(Value::as_i64)
        .unwrap_or(candle_open_time);
    let is_final = k.get("x").and_then(Value::as_bool).unwrap_or(false);
    let optional = |name: &str| k.get(name).and_then(|v| parse_str_f64(v, name).ok());

    Ok(Tick {
        symbol,
        price,
        open: optional("o").unwrap_or(price),
        high: optional("h").unwrap_or(price),
        low: optional("l").unwrap_or(price),
        volume: optional("v").unwrap_or(0.0),
        timestamp,
        candle_open_time,
        is_final,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_uses_lowercase_symbol() {
        let key = CandleKey::new("BTCUSDT", "15m");
        assert_eq!(
            kline_stream_url("wss://stream.binance.com:9443/", &key),
            "wss://stream.binance.com:9443/ws/btcusdt@kline_15m"
        );
    }

    #[test]
    fn parse_single_stream_frame() {
        let json = r#"{
            "e": "kline", "E": 1700000000123, "s": "BTCUSDT",
            "k": {
                "t": 1700000000000, "T": 1700000059999, "s": "BTCUSDT", "i": "1m",
                "o": "37000.00", "c": "37020.50", "h": "37050.00", "l": "36990.00",
                "v": "123.456", "x": true
            }
        }"#;
        let tick = parse_kline_frame(json).unwrap();
        assert_eq!(tick.symbol, "BTCUSDT");
        assert_eq!(tick.price, 37020.5);
        assert_eq!(tick.candle_open_time, 1_700_000_000_000);
        assert_eq!(tick.timestamp, 1_700_000_059_999);
        assert_eq!(tick.open, 37000.0);
        assert_eq!(tick.high, 37050.0);
        assert_eq!(tick.low, 36990.0);
        assert_eq!(tick.volume, 123.456);
        assert!(tick.is_final);
    }

    #[test]
    fn close_time_falls_back_to_open_time() {
        let json = r#"{"s":"ethusdt","k":{"t":1000,"c":"1.5"}}"#;
        let tick = parse_kline_frame(json).unwrap();
        assert_eq!(tick.symbol, "ETHUSDT");
        assert_eq!(tick.timestamp, 1000);
        assert_eq!((tick.open, tick.high, tick.low), (1.5, 1.5, 1.5));
        assert_eq!(tick.volume, 0.0);
        assert!(!tick.is_final);
    }

    #[test]
    fn combined_envelope_is_unwrapped() {
        let json = r#"{"stream":"btcusdt@kline_1m","data":{"s":"BTCUSDT","k":{"t":1,"T":2,"c":"3"}}}"#;
        assert_eq!(parse_kline_frame(json).unwrap().price, 3.0);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        for text in [
            "not json",
            r#"{"result":null,"id":1}"#,
            r#"{"s":"BTCUSDT","k":{"t":1,"c":"abc"}}"#,
            r#"{"k":{"t":1,"c":"1.0"}}"#,
        ] {
            assert!(
                matches!(parse_kline_frame(text), Err(EngineError::MalformedMessage(_))),
                "{text}"
            );
        }
    }

    #[tokio::test]
    async fn open_against_unreachable_host_fails() {
        let key = CandleKey::new("BTCUSDT", "1m");
        let result = KlineStream::open("ws://127.0.0.1:1", &key, Duration::from_secs(25), 10).await;
        assert!(matches!(result, Err(EngineError::TransientNetwork { .. })));
    }
}
