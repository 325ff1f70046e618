// =============================================================================
// Stream supervisor — keeps one kline stream alive for the active key
// =============================================================================
//
// Reconnects on fault with bounded exponential backoff plus random jitter,
// resets the backoff after every successful connection, reconnects at once
// when the active key changes, and exits on cancellation. Liveness is
// published on a watch channel so recompute can flag stale snapshots.
// =============================================================================

use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::binance::KlineStream;
use crate::market_data::CandleKey;
use crate::settings::ServiceSettings;
use crate::types::{StreamHealth, Tick};

/// Capped doubling with a random extension of up to `jitter` × the delay.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn from_settings(settings: &ServiceSettings) -> Self {
        Self {
            initial: settings.backoff_initial(),
            max: settings.backoff_max(),
            jitter: settings.backoff_jitter.clamp(0.0, 1.0),
        }
    }

    /// Delay before reconnect attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .initial
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..=self.jitter);
        base.mul_f64(factor)
    }
}

/// Everything the supervisor needs, bundled so the engine can hand it over in
/// one move.
pub struct SupervisorChannels {
    pub key_rx: watch::Receiver<CandleKey>,
    pub tick_tx: mpsc::Sender<Tick>,
    pub health_tx: watch::Sender<StreamHealth>,
    pub cancel_rx: watch::Receiver<bool>,
}

enum SessionEnd {
    Cancelled,
    KeyChanged,
    Disconnected,
}

pub async fn supervise_stream(
    stream_base: String,
    heartbeat: Duration,
    tick_capacity: usize,
    backoff: BackoffPolicy,
    channels: SupervisorChannels,
) {
    let SupervisorChannels {
        mut key_rx,
        tick_tx,
        health_tx,
        mut cancel_rx,
    } = channels;

    let mut attempt: u32 = 0;

    'outer: loop {
        if *cancel_rx.borrow() {
            break;
        }

        let key = key_rx.borrow_and_update().clone();
        health_tx.send_replace(if attempt == 0 {
            StreamHealth::Connecting
        } else {
            StreamHealth::Reconnecting
        });

        let opened = tokio::select! {
            _ = cancel_rx.changed() => break 'outer,
            opened = KlineStream::open(&stream_base, &key, heartbeat, tick_capacity) => opened,
        };

        match opened {
            Ok(mut stream) => {
                attempt = 0;
                health_tx.send_replace(StreamHealth::Connected);

                let end = loop {
                    tokio::select! {
                        _ = cancel_rx.changed() => break SessionEnd::Cancelled,
                        changed = key_rx.changed() => {
                            break if changed.is_ok() {
                                SessionEnd::KeyChanged
                            } else {
                                SessionEnd::Cancelled
                            };
                        }
                        tick = stream.next_tick() => match tick {
                            Some(tick) => match tick_tx.try_send(tick) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    debug!(key = %key, "engine tick queue full, dropping tick");
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => {
                                    break SessionEnd::Cancelled;
                                }
                            },
                            None => break SessionEnd::Disconnected,
                        }
                    }
                };
                stream.close();

                match end {
                    SessionEnd::Cancelled => break,
                    SessionEnd::KeyChanged => {
                        let next = key_rx.borrow().clone();
                        info!(from = %key, to = %next, "active key changed, reconnecting stream");
                        continue;
                    }
                    SessionEnd::Disconnected => {
                        warn!(key = %key, "kline stream disconnected");
                    }
                }
            }
            Err(e) => {
                warn!(key = %key, attempt, error = %e, "kline stream connect failed");
            }
        }

        let delay = backoff.delay(attempt);
        attempt = attempt.saturating_add(1);
        health_tx.send_replace(StreamHealth::Reconnecting);
        info!(key = %key, delay_ms = delay.as_millis() as u64, attempt, "reconnecting kline stream");

        tokio::select! {
            _ = cancel_rx.changed() => break,
            changed = key_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                attempt = 0;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    health_tx.send_replace(StreamHealth::Stopped);
    info!("stream supervisor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let policy = BackoffPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter: 0.0,
        };
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(5), Duration::from_secs(32));
        assert_eq!(policy.delay(6), Duration::from_secs(60));
        assert_eq!(policy.delay(40), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = BackoffPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter: 0.2,
        };
        for attempt in 0..10 {
            let base = Duration::from_secs(1)
                .saturating_mul(2u32.pow(attempt))
                .min(Duration::from_secs(60));
            let delay = policy.delay(attempt);
            assert!(delay >= base, "{delay:?} < {base:?}");
            assert!(delay <= base.mul_f64(1.2), "{delay:?} > 1.2 × {base:?}");
        }
    }

    #[tokio::test]
    async fn reports_reconnecting_then_stops_on_cancel() {
        let (_key_tx, key_rx) = watch::channel(CandleKey::new("BTCUSDT", "1m"));
        let (tick_tx, _tick_rx) = mpsc::channel(10);
        let (health_tx, mut health_rx) = watch::channel(StreamHealth::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let policy = BackoffPolicy {
            initial: Duration::from_secs(30),
            max: Duration::from_secs(30),
            jitter: 0.0,
        };
        let handle = tokio::spawn(supervise_stream(
            "ws://127.0.0.1:1".into(),
            Duration::from_secs(25),
            10,
            policy,
            SupervisorChannels {
                key_rx,
                tick_tx,
                health_tx,
                cancel_rx,
            },
        ));

        // Nothing listens on port 1: the first connect fails and the
        // supervisor parks in its backoff sleep.
        tokio::time::timeout(
            Duration::from_secs(5),
            health_rx.wait_for(|h| *h == StreamHealth::Reconnecting),
        )
        .await
        .expect("supervisor should report reconnecting")
        .unwrap();

        cancel_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervisor should exit on cancel")
            .unwrap();
        assert_eq!(*health_rx.borrow(), StreamHealth::Stopped);
    }
}
