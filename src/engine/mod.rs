// =============================================================================
// Realtime Engine — candle window, recompute cycle and stream supervision
// =============================================================================
//
// Workers (all stop on the shared cancellation signal):
//   supervisor:  keeps the kline stream for the active key alive and feeds
//                 ticks into a bounded queue.
//   recompute:   folds ticks into the window and publishes a snapshot on
//                 every tick batch, every `recompute_interval`, on config
//                 changes for the active symbol, and on explicit requests.
//   reconcile:   every `reconcile_interval` re-fetches the window from REST
//                 and adopts it if it is longer or newer.
//
// Lock discipline: the buffer, the config cache and the subscriber set each
// sit behind their own RwLock and none is held while another is taken.
// =============================================================================

pub mod recompute;
pub mod supervisor;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::binance::client::MAX_KLINES_LIMIT;
use crate::binance::BinanceClient;
use crate::broadcaster::{SnapshotBroadcaster, SubscriberToken};
use crate::config_store::ConfigStore;
use crate::error::EngineResult;
use crate::market_data::{Candle, CandleBuffer, CandleKey};
use crate::period::{candles_for_days, Interval};
use crate::settings::ServiceSettings;
use crate::snapshot::Snapshot;
use crate::types::{StreamHealth, Tick};

use self::recompute::compute_snapshot;
use self::supervisor::{supervise_stream, BackoffPolicy, SupervisorChannels};

pub struct RealtimeEngine {
    client: BinanceClient,
    buffer: CandleBuffer,
    configs: Arc<ConfigStore>,
    broadcaster: SnapshotBroadcaster,
    settings: ServiceSettings,

    key_tx: watch::Sender<CandleKey>,
    health_rx: watch::Receiver<StreamHealth>,
    cancel_tx: watch::Sender<bool>,
    recompute: Notify,

    /// Serialises symbol/interval switches. Held across the history fetch.
    switch_lock: tokio::sync::Mutex<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RealtimeEngine {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Fetch the initial window for the default pair and start all workers.
    ///
    /// Failure here disables only the real-time subsystem; the caller keeps
    /// serving config requests.
    pub async fn start(
        settings: ServiceSettings,
        client: BinanceClient,
        configs: Arc<ConfigStore>,
    ) -> EngineResult<Arc<Self>> {
        let key = CandleKey::new(&settings.default_symbol, &settings.default_interval);
        let interval = Interval::parse(&key.interval)?;

        let candles = client
            .fetch_candles(&key.symbol, &key.interval, history_limit(&settings, &interval))
            .await?;
        configs.get(&key.symbol);
        info!(key = %key, candles = candles.len(), "initial candle window loaded");

        let (engine, tick_rx, channels) = Self::assemble(settings, client, configs, key, candles);

        let supervisor = tokio::spawn(supervise_stream(
            engine.settings.stream_base_url.clone(),
            engine.settings.heartbeat(),
            engine.settings.tick_queue_capacity,
            BackoffPolicy::from_settings(&engine.settings),
            channels,
        ));
        let recompute = engine.spawn_recompute_loop(tick_rx);
        let reconcile = tokio::spawn(Arc::clone(&engine).run_reconcile_loop());
        engine
            .workers
            .lock()
            .extend([supervisor, recompute, reconcile]);

        engine.recompute.notify_one();
        Ok(engine)
    }

    /// Wire up state and channels without spawning anything.
    fn assemble(
        settings: ServiceSettings,
        client: BinanceClient,
        configs: Arc<ConfigStore>,
        key: CandleKey,
        candles: Vec<Candle>,
    ) -> (Arc<Self>, mpsc::Receiver<Tick>, SupervisorChannels) {
        let (key_tx, key_rx) = watch::channel(key.clone());
        let (tick_tx, tick_rx) = mpsc::channel(settings.tick_queue_capacity.max(1));
        let (health_tx, health_rx) = watch::channel(StreamHealth::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let engine = Arc::new(Self {
            client,
            buffer: CandleBuffer::new(key, candles, MAX_KLINES_LIMIT),
            configs,
            broadcaster: SnapshotBroadcaster::new(settings.subscriber_queue_capacity),
            settings,
            key_tx,
            health_rx,
            cancel_tx,
            recompute: Notify::new(),
            switch_lock: tokio::sync::Mutex::new(()),
            workers: Mutex::new(Vec::new()),
        });

        let channels = SupervisorChannels {
            key_rx,
            tick_tx,
            health_tx,
            cancel_rx,
        };
        (engine, tick_rx, channels)
    }

    // -------------------------------------------------------------------------
    // Public operations
    // -------------------------------------------------------------------------

    /// Make `(symbol, interval)` the active pair.
    ///
    /// Fetches the new history first; on any failure the current window, key
    /// and stream are left untouched. Switching to the already active pair
    /// only triggers a recompute.
    pub async fn change_symbol_interval(
        &self,
        symbol: &str,
        interval: &str,
    ) -> EngineResult<CandleKey> {
        let _guard = self.switch_lock.lock().await;

        let key = CandleKey::new(symbol.trim(), interval.trim());
        if key == self.buffer.key() {
            self.recompute.notify_one();
            return Ok(key);
        }

        let parsed = Interval::parse(&key.interval)?;
        let candles = self
            .client
            .fetch_candles(&key.symbol, &key.interval, history_limit(&self.settings, &parsed))
            .await?;
        self.configs.get(&key.symbol);

        let previous = self.buffer.key();
        self.buffer.replace(key.clone(), candles);
        self.key_tx.send_replace(key.clone());
        self.recompute.notify_one();

        info!(from = %previous, to = %key, "active pair switched");
        Ok(key)
    }

    /// Compute a snapshot from the current window and publish it.
    pub fn recompute_and_publish(&self) -> Option<Arc<Snapshot>> {
        let (key, candles) = self.buffer.snapshot();
        let config = self.configs.get(&key.symbol);
        let stale = !self.health_rx.borrow().is_live();

        let snapshot = Arc::new(compute_snapshot(&key, &candles, &config, stale)?);
        let delivered = self.broadcaster.publish(Arc::clone(&snapshot));
        debug!(key = %key, delivered, stale, "snapshot published");
        Some(snapshot)
    }

    pub fn subscribe(&self) -> (SubscriberToken, mpsc::Receiver<Arc<Snapshot>>) {
        self.broadcaster.subscribe()
    }

    pub fn unsubscribe(&self, token: SubscriberToken) -> bool {
        self.broadcaster.unsubscribe(token)
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    pub fn active_key(&self) -> CandleKey {
        self.buffer.key()
    }

    pub fn health(&self) -> StreamHealth {
        *self.health_rx.borrow()
    }

    /// Signal every worker to stop and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel_tx.send_replace(true);
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "engine worker ended abnormally");
            }
        }
        info!("realtime engine stopped");
    }

    // -------------------------------------------------------------------------
    // Workers
    // -------------------------------------------------------------------------

    fn spawn_recompute_loop(self: &Arc<Self>, tick_rx: mpsc::Receiver<Tick>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run_recompute_loop(tick_rx))
    }

    async fn run_recompute_loop(self: Arc<Self>, mut tick_rx: mpsc::Receiver<Tick>) {
        let mut cancel_rx = self.cancel_tx.subscribe();
        let mut config_rx = self.configs.subscribe_changes();
        let mut ticker = tokio::time::interval(self.settings.recompute_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if *cancel_rx.borrow() {
            return;
        }

        loop {
            tokio::select! {
                _ = cancel_rx.changed() => break,
                tick = tick_rx.recv() => {
                    let Some(tick) = tick else { break };
                    let mut changed = self.buffer.apply_tick(&tick);
                    // Ticks that queued up meanwhile coalesce into one recompute.
                    while let Ok(tick) = tick_rx.try_recv() {
                        changed |= self.buffer.apply_tick(&tick);
                    }
                    if !changed {
                        debug!(symbol = %tick.symbol, "tick did not touch the live candle");
                    }
                    self.recompute_and_publish();
                }
                _ = ticker.tick() => {
                    self.recompute_and_publish();
                }
                event = config_rx.recv() => match event {
                    Ok(event) => {
                        if event.symbol == self.buffer.key().symbol {
                            self.recompute_and_publish();
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "config events lagged");
                        self.recompute_and_publish();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = self.recompute.notified() => {
                    self.recompute_and_publish();
                }
            }
        }
        debug!("recompute loop stopped");
    }

    async fn run_reconcile_loop(self: Arc<Self>) {
        let mut cancel_rx = self.cancel_tx.subscribe();
        let mut ticker = tokio::time::interval(self.settings.reconcile_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The window was just fetched; skip the immediate first tick.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel_rx.changed() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel_rx.changed() => break,
                        _ = self.reconcile_once() => {}
                    }
                }
            }
        }
        debug!("reconcile loop stopped");
    }

    async fn reconcile_once(&self) {
        let key = self.buffer.key();
        let limit = match Interval::parse(&key.interval) {
            Ok(iv) => history_limit(&self.settings, &iv),
            Err(_) => MAX_KLINES_LIMIT,
        };

        match self.client.fetch_candles(&key.symbol, &key.interval, limit).await {
            Ok(fetched) => {
                if self.buffer.reconcile(&key, fetched) {
                    debug!(key = %key, "candle window reconciled");
                    self.recompute.notify_one();
                }
            }
            Err(e) => warn!(key = %key, error = %e, "reconciliation fetch failed"),
        }
    }
}

/// Candles fetched for the history window, capped at one REST page.
fn history_limit(settings: &ServiceSettings, interval: &Interval) -> usize {
    candles_for_days(settings.history_days, interval).min(MAX_KLINES_LIMIT)
}
