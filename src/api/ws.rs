// =============================================================================
// WebSocket Handler — snapshot relay
// =============================================================================
//
// Clients connect to `/api/ws?symbol=<SYMBOL>&interval=<INTERVAL>`. Before the
// upgrade the engine is switched to the requested pair; the connection then
// subscribes to the broadcaster and relays every snapshot as a JSON text
// frame.
//
// The handler also:
//   - Responds to Ping frames with Pong frames.
//   - Unsubscribes by token when the client goes away or a send fails.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::engine::RealtimeEngine;
use crate::error::EngineError;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    symbol: Option<String>,
    interval: Option<String>,
}

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let Some(engine) = state.engine.clone() else {
        warn!("WebSocket connection rejected: realtime engine unavailable");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Realtime engine unavailable",
        )
            .into_response();
    };

    let symbol = state.symbol_or_default(query.symbol.as_deref());
    let interval = state.interval_or_default(query.interval.as_deref());

    if let Err(e) = engine.change_symbol_interval(&symbol, &interval).await {
        warn!(symbol = %symbol, interval = %interval, error = %e, "WebSocket pair switch failed");
        let status = match e {
            EngineError::InvalidInterval(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        return (status, e.to_string()).into_response();
    }

    info!(symbol = %symbol, interval = %interval, "WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, engine))
        .into_response()
}

/// Relays snapshots until the client leaves.
async fn handle_ws_connection(socket: WebSocket, engine: Arc<RealtimeEngine>) {
    let (token, mut snapshots) = engine.subscribe();
    let (mut sender, mut receiver) = socket.split();

    // Give the new subscriber something to render right away.
    engine.recompute_and_publish();

    loop {
        tokio::select! {
            snapshot = snapshots.recv() => {
                let Some(snapshot) = snapshot else {
                    debug!(token = %token, "subscription pruned");
                    break;
                };
                let json = match serde_json::to_string(snapshot.as_ref()) {
                    Ok(json) => json,
                    Err(e) => {
                        // Serialisation errors are not network errors; keep going.
                        warn!(error = %e, "Failed to serialize snapshot");
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(json)).await {
                    debug!(error = %e, "WebSocket send failed — disconnecting");
                    break;
                }
            }

            msg = receiver.next() => match msg {
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sender.send(Message::Pong(data)).await {
                        debug!(error = %e, "Failed to send Pong — disconnecting");
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("WebSocket Close frame received — disconnecting");
                    break;
                }
                // Text / Binary / Pong from the client are ignored.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket receive error — disconnecting");
                    break;
                }
                None => {
                    info!("WebSocket stream ended");
                    break;
                }
            }
        }
    }

    engine.unsubscribe(token);
    info!(token = %token, "WebSocket connection closed — unsubscribed");
}
