use crate::config::GatewayConfig;
use crate::hub::RelayHub;
use axum::{
    Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RelayHub>,
}

pub async fn run_server(config: GatewayConfig, state: AppState) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/modules", get(list_modules))
        .route("/ws/:module", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.ws_addr).await?;
    tracing::info!("WebSocket server listening on {}", config.ws_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn list_modules(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.hub.active_modules())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(module): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, module))
}

/// A listener's control update: `{"option": "gain", "value": 42}`.
#[derive(Deserialize)]
struct ClientUpdate {
    option: String,
    value: serde_json::Value,
}

async fn handle_socket(socket: WebSocket, state: AppState, module: String) {
    tracing::info!("listener connected for module '{}'", module);

    if let Err(e) = state.hub.ensure_module(&module) {
        tracing::warn!("cannot relay module '{}': {}", module, e);
        return;
    }
    // A new listener needs the full control state, not just future deltas.
    state.hub.resend_tuners(&module);

    let mut rx = state.hub.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let send_module = module.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.module != send_module {
                        continue;
                    }
                    if sender.send(Message::Text(event.payload)).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("listener lagged, skipped {} messages", skipped);
                }
                Err(_) => break,
            }
        }
    });

    let recv_hub = Arc::clone(&state.hub);
    let recv_module = module.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            match serde_json::from_str::<ClientUpdate>(&text) {
                Ok(update) => {
                    if let Err(e) =
                        recv_hub.update_tuner(&recv_module, &update.option, &update.value)
                    {
                        tracing::warn!("rejected control update '{}': {}", update.option, e);
                    }
                }
                Err(e) => tracing::debug!("ignoring malformed client message: {}", e),
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!("listener for module '{}' disconnected", module);
}
