// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
//   GET  /api/health
//   GET  /api/indicators?symbol=BTCUSDT&interval=1h&limit=500
//   GET  /api/config?symbol=BTCUSDT
//   POST /api/config?symbol=BTCUSDT     body: IndicatorConfig JSON
//   GET  /api/ws?symbol=BTCUSDT&interval=1h   (see ws.rs)
//
// CORS is configured permissively; the service has no authenticated routes.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::config_store::IndicatorConfig;
use crate::engine::recompute::{composite_series, compute_snapshot};
use crate::error::EngineError;
use crate::indicators::MacdSeries;
use crate::market_data::CandleKey;
use crate::period::Interval;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/indicators", get(get_indicators))
        .route("/api/config", get(get_config).post(update_config))
        .route("/api/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    realtime: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<String>,
    subscribers: usize,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = match &state.engine {
        Some(engine) => {
            let key = engine.active_key();
            HealthResponse {
                status: "ok",
                realtime: true,
                symbol: Some(key.symbol),
                interval: Some(key.interval),
                stream: Some(engine.health().to_string()),
                subscribers: engine.subscriber_count(),
                server_time: chrono::Utc::now().timestamp_millis(),
            }
        }
        None => HealthResponse {
            status: "degraded",
            realtime: false,
            symbol: None,
            interval: None,
            stream: None,
            subscribers: 0,
            server_time: chrono::Utc::now().timestamp_millis(),
        },
    };
    Json(resp)
}

// =============================================================================
// One-shot indicator query
// =============================================================================
//
// Fetches history for any pair and computes the indicator bank on it without
// touching the live engine's active pair.

const DEFAULT_INDICATOR_LIMIT: usize = 500;

#[derive(Debug, Default, Deserialize)]
pub struct IndicatorQuery {
    symbol: Option<String>,
    interval: Option<String>,
    limit: Option<String>,
}

#[derive(Serialize)]
struct IndicatorResponse {
    symbol: String,
    interval: String,
    timestamp: DateTime<Utc>,
    cci: BTreeMap<String, Vec<f64>>,
    macd: BTreeMap<String, MacdSeries>,
    rsi: BTreeMap<String, Vec<f64>>,
    /// Composite price, newest-first.
    price: Vec<f64>,
}

/// Requested candle count; anything missing, unparseable or zero means 500.
fn indicator_limit(raw: Option<&str>) -> usize {
    raw.and_then(|l| l.trim().parse::<usize>().ok())
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_INDICATOR_LIMIT)
}

async fn get_indicators(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IndicatorQuery>,
) -> Response {
    let Some(symbol) = query
        .symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
    else {
        return error_response(StatusCode::BAD_REQUEST, "symbol is required");
    };

    let interval = state.interval_or_default(query.interval.as_deref());
    if let Err(e) = Interval::parse(&interval) {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    let Some(client) = &state.client else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "exchange client unavailable");
    };

    let limit = indicator_limit(query.limit.as_deref());
    let candles = match client.fetch_candles(&symbol, &interval, limit).await {
        Ok(candles) => candles,
        Err(e) => {
            warn!(symbol = %symbol, interval = %interval, error = %e, "indicator query fetch failed");
            return error_response(StatusCode::BAD_GATEWAY, e.to_string());
        }
    };

    let key = CandleKey::new(&symbol, &interval);
    let config = state.configs.get(&symbol);
    let Some(snapshot) = compute_snapshot(&key, &candles, &config, false) else {
        return error_response(StatusCode::BAD_GATEWAY, "exchange returned no candles");
    };

    Json(IndicatorResponse {
        symbol: snapshot.symbol,
        interval: snapshot.interval,
        timestamp: snapshot.timestamp,
        cci: snapshot.cci,
        macd: snapshot.macd,
        rsi: snapshot.rsi,
        price: composite_series(&candles),
    })
    .into_response()
}

// =============================================================================
// Indicator config
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SymbolQuery {
    symbol: Option<String>,
}

async fn get_config(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SymbolQuery>,
) -> Response {
    let symbol = state.symbol_or_default(query.symbol.as_deref());
    Json(state.configs.get(&symbol)).into_response()
}

#[derive(Serialize)]
struct ConfigUpdateResponse {
    message: &'static str,
    symbol: String,
    config: IndicatorConfig,
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SymbolQuery>,
    body: Result<Json<IndicatorConfig>, JsonRejection>,
) -> Response {
    let symbol = state.symbol_or_default(query.symbol.as_deref());

    let Json(config) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid config body: {}", rejection.body_text()),
            )
        }
    };

    if let Err(e) = config.validate() {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    match state.configs.update(&symbol, config) {
        Ok(()) => {
            info!(symbol = %symbol, "indicator config updated via API");
            Json(ConfigUpdateResponse {
                message: "config updated",
                symbol,
                config,
            })
            .into_response()
        }
        Err(e @ EngineError::Persistence(_)) => {
            warn!(symbol = %symbol, error = %e, "config applied but not persisted");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binance::client::tests::serve_canned;
    use crate::binance::BinanceClient;
    use crate::config_store::{ConfigRepository, ConfigStore};
    use crate::engine::recompute::tests::synthetic_candles;
    use crate::error::EngineResult;
    use crate::settings::ServiceSettings;
    use serde_json::Value;

    struct ReadOnlyRepository;

    impl ConfigRepository for ReadOnlyRepository {
        fn get(&self, _symbol: &str) -> EngineResult<Option<IndicatorConfig>> {
            Ok(None)
        }
        fn save(&self, _symbol: &str, _config: &IndicatorConfig) -> EngineResult<()> {
            Err(EngineError::Persistence("read-only".into()))
        }
    }

    fn state_with(store: ConfigStore) -> Arc<AppState> {
        Arc::new(AppState::new(&ServiceSettings::default(), Arc::new(store), None, None))
    }

    fn query(symbol: &str) -> Query<SymbolQuery> {
        Query(SymbolQuery {
            symbol: Some(symbol.into()),
        })
    }

    fn custom() -> IndicatorConfig {
        IndicatorConfig {
            rsi_period1: 14,
            ..IndicatorConfig::default()
        }
    }

    #[tokio::test]
    async fn update_then_get() {
        let state = state_with(ConfigStore::new(None));

        let resp = update_config(State(state.clone()), query("ethusdt"), Ok(Json(custom()))).await;
        assert_eq!(resp.status(), StatusCode::OK);

        assert_eq!(state.configs.get("ETHUSDT"), custom());
        let resp = get_config(State(state), query("ETHUSDT")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_without_mutation() {
        let state = state_with(ConfigStore::new(None));
        let bad = IndicatorConfig {
            boll_deviation: 0.0,
            ..IndicatorConfig::default()
        };

        let resp = update_config(State(state.clone()), query("BTCUSDT"), Ok(Json(bad))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.configs.get("BTCUSDT"), IndicatorConfig::default());
    }

    #[tokio::test]
    async fn persistence_failure_is_500_but_cache_keeps_value() {
        let state = state_with(ConfigStore::new(Some(Arc::new(ReadOnlyRepository))));

        let resp = update_config(State(state.clone()), query("BTCUSDT"), Ok(Json(custom()))).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(state.configs.get("BTCUSDT"), custom());
    }

    #[tokio::test]
    async fn health_without_engine_is_degraded() {
        let state = state_with(ConfigStore::new(None));
        let resp = health(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    fn state_with_exchange(base_url: &str) -> Arc<AppState> {
        let settings = ServiceSettings {
            rest_base_url: base_url.into(),
            fetch_attempts: 1,
            fetch_retry_delay_ms: 1,
            ..ServiceSettings::default()
        };
        let client = BinanceClient::new(&settings).unwrap();
        Arc::new(AppState::new(
            &settings,
            Arc::new(ConfigStore::new(None)),
            Some(client),
            None,
        ))
    }

    fn indicator_query(symbol: Option<&str>, interval: Option<&str>) -> Query<IndicatorQuery> {
        Query(IndicatorQuery {
            symbol: symbol.map(Into::into),
            interval: interval.map(Into::into),
            limit: None,
        })
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn indicator_limit_defaults_to_500() {
        assert_eq!(indicator_limit(None), 500);
        assert_eq!(indicator_limit(Some("abc")), 500);
        assert_eq!(indicator_limit(Some("0")), 500);
        assert_eq!(indicator_limit(Some(" 200 ")), 200);
    }

    #[tokio::test]
    async fn indicators_require_symbol() {
        let state = state_with(ConfigStore::new(None));
        let resp = get_indicators(State(state.clone()), indicator_query(None, None)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = get_indicators(State(state), indicator_query(Some("  "), Some("1h"))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn indicators_reject_bad_interval_before_fetching() {
        let state = state_with_exchange("http://127.0.0.1:1");
        let resp = get_indicators(State(state), indicator_query(Some("BTCUSDT"), Some("7x"))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn indicators_without_client_are_unavailable() {
        let state = state_with(ConfigStore::new(None));
        let resp = get_indicators(State(state), indicator_query(Some("BTCUSDT"), None)).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn indicators_unreachable_exchange_is_bad_gateway() {
        let state = state_with_exchange("http://127.0.0.1:1");
        let resp = get_indicators(State(state), indicator_query(Some("BTCUSDT"), None)).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn indicators_are_computed_from_fetched_history() {
        let rows: Vec<Value> = synthetic_candles(200)
            .iter()
            .map(|c| {
                serde_json::json!([
                    c.open_time,
                    c.open.to_string(),
                    c.high.to_string(),
                    c.low.to_string(),
                    c.close.to_string(),
                    c.volume.to_string(),
                    c.close_time
                ])
            })
            .collect();
        let (base, hits) =
            serve_canned("200 OK", "application/json", Value::Array(rows).to_string()).await;
        let state = state_with_exchange(&base);

        let resp = get_indicators(State(state), indicator_query(Some("ethusdt"), None)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);

        let body = json_body(resp).await;
        assert_eq!(body["symbol"], "ETHUSDT");
        assert_eq!(body["interval"], "1h");
        assert_eq!(body["price"].as_array().unwrap().len(), 200);
        for key in ["48", "72", "168"] {
            assert_eq!(body["cci"][key].as_array().unwrap().len(), 200, "cci {key}");
        }
        for key in ["48", "72"] {
            assert!(body["rsi"][key].is_array(), "rsi {key}");
        }
        for key in ["48_72", "72_168"] {
            assert!(body["macd"][key]["histogram"].is_array(), "macd {key}");
        }
    }
}
