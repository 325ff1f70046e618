// =============================================================================
// Service Settings — process configuration for the indicator engine
// =============================================================================
//
// Loaded once at startup from `indicator_engine.json` and then overridden by
// environment variables. Every field carries `#[serde(default)]` so that a
// partial (or empty) settings file deserialises cleanly.
//
// Settings are passed explicitly to every component at construction; nothing
// reads them from a global.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Idle timeout after which the exchange drops a silent stream.
const STREAM_IDLE_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Default value helpers (required by serde)
// ---------------------------------------------------------------------------

fn default_bind_addr() -> String {
    "0.0.0.0:8080".into()
}

fn default_symbol() -> String {
    "BTCUSDT".into()
}

fn default_interval() -> String {
    "1h".into()
}

fn default_rest_base_url() -> String {
    "https://api.binance.com".into()
}

fn default_stream_base_url() -> String {
    "wss://stream.binance.com:9443".into()
}

fn default_http_timeout_secs() -> u64 {
    60
}

fn default_fetch_attempts() -> u32 {
    3
}

fn default_fetch_retry_delay_ms() -> u64 {
    1_000
}

fn default_heartbeat_secs() -> u64 {
    25
}

fn default_recompute_interval_ms() -> u64 {
    1_000
}

fn default_reconcile_interval_secs() -> u64 {
    5
}

fn default_history_days() -> u32 {
    7
}

fn default_subscriber_queue_capacity() -> usize {
    10
}

fn default_tick_queue_capacity() -> usize {
    100
}

fn default_backoff_initial_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_backoff_jitter() -> f64 {
    0.2
}

fn default_config_store_path() -> String {
    "indicator_configs.json".into()
}

fn default_config_retry_secs() -> u64 {
    5
}

// ---------------------------------------------------------------------------
// ServiceSettings
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Address the HTTP / WebSocket surface listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Pair the engine tracks until a client switches it.
    #[serde(default = "default_symbol")]
    pub default_symbol: String,
    #[serde(default = "default_interval")]
    pub default_interval: String,

    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,
    #[serde(default = "default_stream_base_url")]
    pub stream_base_url: String,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Attempts per historical fetch (at least 1).
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    #[serde(default = "default_fetch_retry_delay_ms")]
    pub fetch_retry_delay_ms: u64,

    /// Ping cadence on the stream. Clamped below the 30 s idle timeout.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_recompute_interval_ms")]
    pub recompute_interval_ms: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    /// Calendar days of history kept in the candle window.
    #[serde(default = "default_history_days")]
    pub history_days: u32,

    #[serde(default = "default_subscriber_queue_capacity")]
    pub subscriber_queue_capacity: usize,
    #[serde(default = "default_tick_queue_capacity")]
    pub tick_queue_capacity: usize,

    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Maximum random extension of each backoff delay, as a fraction.
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,

    /// JSON document holding per-symbol indicator configs. Empty disables
    /// persistence.
    #[serde(default = "default_config_store_path")]
    pub config_store_path: String,
    /// How long defaults are served for a symbol whose stored config could
    /// not be read before the store is tried again.
    #[serde(default = "default_config_retry_secs")]
    pub config_retry_secs: u64,

    // Credentials only ever come from the environment.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default, skip_serializing)]
    pub api_secret: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            default_symbol: default_symbol(),
            default_interval: default_interval(),
            rest_base_url: default_rest_base_url(),
            stream_base_url: default_stream_base_url(),
            http_timeout_secs: default_http_timeout_secs(),
            fetch_attempts: default_fetch_attempts(),
            fetch_retry_delay_ms: default_fetch_retry_delay_ms(),
            heartbeat_secs: default_heartbeat_secs(),
            recompute_interval_ms: default_recompute_interval_ms(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            history_days: default_history_days(),
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
            tick_queue_capacity: default_tick_queue_capacity(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_jitter: default_backoff_jitter(),
            config_store_path: default_config_store_path(),
            config_retry_secs: default_config_retry_secs(),
            api_key: String::new(),
            api_secret: String::new(),
        }
    }
}

impl ServiceSettings {
    /// Load settings from a JSON file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %settings.default_symbol,
            interval = %settings.default_interval,
            "service settings loaded"
        );

        Ok(settings)
    }

    /// Apply `INDICATOR_*` and `BINANCE_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(symbol) = non_empty("INDICATOR_SYMBOL") {
            self.default_symbol = symbol.to_uppercase();
        }
        if let Some(interval) = non_empty("INDICATOR_INTERVAL") {
            self.default_interval = interval;
        }
        if let Some(addr) = non_empty("INDICATOR_BIND_ADDR") {
            self.bind_addr = addr;
        }
        // An explicitly empty store path disables persistence.
        if let Some(path) = lookup("INDICATOR_CONFIG_STORE") {
            self.config_store_path = path.trim().to_string();
        }
        if let Some(key) = non_empty("BINANCE_API_KEY") {
            self.api_key = key;
        }
        if let Some(secret) = non_empty("BINANCE_API_SECRET") {
            self.api_secret = secret;
        }
    }

    // -------------------------------------------------------------------------
    // Derived values
    // -------------------------------------------------------------------------

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn fetch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_delay_ms)
    }

    /// Heartbeat period, kept strictly below the stream idle timeout.
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.clamp(1, STREAM_IDLE_TIMEOUT_SECS - 1))
    }

    pub fn recompute_interval(&self) -> Duration {
        Duration::from_millis(self.recompute_interval_ms.max(10))
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms.max(1))
    }

    pub fn config_retry(&self) -> Duration {
        Duration::from_secs(self.config_retry_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms.max(self.backoff_initial_ms.max(1)))
    }
}

impl std::fmt::Debug for ServiceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSettings")
            .field("bind_addr", &self.bind_addr)
            .field("default_symbol", &self.default_symbol)
            .field("default_interval", &self.default_interval)
            .field("rest_base_url", &self.rest_base_url)
            .field("stream_base_url", &self.stream_base_url)
            .field("config_store_path", &self.config_store_path)
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish_non_exhaustive()
    }
}
