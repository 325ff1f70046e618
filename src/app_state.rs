// =============================================================================
// Application State — shared by every HTTP / WebSocket handler
// =============================================================================
//
// The config store always exists. The exchange client and the engine are
// optional: when the exchange is unreachable at startup the service still
// serves configuration, and the stream endpoint answers 503.
// =============================================================================

use std::sync::Arc;

use crate::binance::BinanceClient;
use crate::config_store::ConfigStore;
use crate::engine::RealtimeEngine;
use crate::settings::ServiceSettings;

pub struct AppState {
    pub configs: Arc<ConfigStore>,
    /// Used by one-shot indicator queries, independent of the live engine.
    pub client: Option<BinanceClient>,
    pub engine: Option<Arc<RealtimeEngine>>,
    /// Pair used when a request omits `symbol` / `interval`.
    pub default_symbol: String,
    pub default_interval: String,
}

impl AppState {
    pub fn new(
        settings: &ServiceSettings,
        configs: Arc<ConfigStore>,
        client: Option<BinanceClient>,
        engine: Option<Arc<RealtimeEngine>>,
    ) -> Self {
        Self {
            configs,
            client,
            engine,
            default_symbol: settings.default_symbol.clone(),
            default_interval: settings.default_interval.clone(),
        }
    }

    /// `symbol` trimmed and upper-cased, or the default when absent or blank.
    pub fn symbol_or_default(&self, symbol: Option<&str>) -> String {
        symbol
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.default_symbol.as_str())
            .to_uppercase()
    }

    pub fn interval_or_default(&self, interval: Option<&str>) -> String {
        interval
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.default_interval.as_str())
            .to_string()
    }
}
