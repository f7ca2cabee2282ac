//! Gateway HTTP server.

use crate::bridge::{Forwarder, WebhookPipeline};
use crate::channels::{ConnectionManager, ProtocolConnector, SendResult, INTEGRATION_ID};
use crate::config::{resolve_bridge_config, resolve_credentials_dir, Config};
use crate::credentials::CredentialStore;
use crate::gateway::protocol::{OutboundPayload, StatusReport};
use crate::init;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared state for the gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub manager: Arc<ConnectionManager>,
    /// Reported by the health probe.
    pub port: u16,
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route(
            "/raccoonai/send",
            post(send_http).fallback(send_wrong_method),
        )
        .route("/raccoonai/status", get(status_http))
        .with_state(state)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Sessions are started in the background from the integrations listing, so the listener
/// is up even when the Raccoon API is unreachable. Blocks until shutdown (e.g. Ctrl+C),
/// then disconnects every session.
/// Requires the configuration directory to be initialized (`raccoon init`).
pub async fn run_gateway(
    config: Config,
    config_path: PathBuf,
    connector: Arc<dyn ProtocolConnector>,
) -> Result<()> {
    init::require_initialized(&config_path)?;

    let bridge = Arc::new(resolve_bridge_config(&config));
    if !bridge.enabled {
        log::warn!("bridge is disabled; inbound messages will not be forwarded");
    }
    if bridge.webhook_url.is_none() {
        log::warn!("no webhook URL configured (bridge.webhookUrl or RACCOON_WEBHOOK_URL)");
    }
    let store = CredentialStore::new(resolve_credentials_dir(&config, &config_path));
    log::info!("credentials directory: {}", store.base_dir().display());

    let manager = Arc::new(ConnectionManager::new(bridge.clone(), store, connector));
    manager
        .set_on_message(Arc::new(WebhookPipeline::new(Forwarder::new(bridge))))
        .await;

    {
        let manager = manager.clone();
        tokio::spawn(async move {
            match manager.initialize().await {
                Ok(()) => log::info!(
                    "connection manager initialized, {} user(s) connected",
                    manager.get_connected_user_ids().await.len()
                ),
                Err(e) => log::warn!("connection manager initialization failed: {}", e),
            }
        });
    }

    let app = router(GatewayState {
        manager: manager.clone(),
        port: config.gateway.port,
    });

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(manager))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Disconnects every session before returning.
async fn shutdown_signal(manager: Arc<ConnectionManager>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, disconnecting sessions");
    manager.shutdown().await;
}

type SendResponse = (StatusCode, Json<SendResult>);

fn reject(status: StatusCode, error: impl Into<String>) -> SendResponse {
    (status, Json(SendResult::err(error)))
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

/// POST /raccoonai/send: send a message as one of the connected users.
/// The body is parsed by hand so malformed JSON answers 500 with the parse error.
async fn send_http(State(state): State<GatewayState>, body: Bytes) -> SendResponse {
    let payload: OutboundPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            log::error!("send: invalid request body: {}", e);
            return reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("invalid request body: {}", e),
            );
        }
    };

    let (Some(integration_id), Some(chat_id), Some(text)) = (
        present(&payload.integration_id),
        present(&payload.chat_id),
        present(&payload.text),
    ) else {
        return reject(
            StatusCode::BAD_REQUEST,
            "Missing required fields: integrationId, chatId, text",
        );
    };

    let user_id = match present(&payload.user_id) {
        Some(u) => u.to_string(),
        None => {
            let mut connected = state.manager.get_connected_user_ids().await;
            match connected.len() {
                0 => {
                    return reject(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "No WhatsApp users connected",
                    )
                }
                1 => connected.remove(0),
                n => {
                    return reject(
                        StatusCode::BAD_REQUEST,
                        format!("{} users connected; userId is required", n),
                    )
                }
            }
        }
    };

    if integration_id != INTEGRATION_ID {
        return reject(
            StatusCode::BAD_REQUEST,
            format!("Unsupported integration: {}", integration_id),
        );
    }

    let result = state
        .manager
        .send_message(&user_id, chat_id, text, payload.first_media())
        .await;
    if !result.success {
        log::warn!(
            "send: user {} to {} failed: {}",
            user_id,
            chat_id,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    (StatusCode::OK, Json(result))
}

/// Any other method on /raccoonai/send: 405 with the usual JSON failure body.
async fn send_wrong_method() -> SendResponse {
    reject(
        StatusCode::METHOD_NOT_ALLOWED,
        "Method not allowed; use POST",
    )
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "connectedUsers": state.manager.get_connected_user_ids().await.len(),
        "port": state.port,
    }))
}

/// GET /raccoonai/status lists every tracked session.
async fn status_http(State(state): State<GatewayState>) -> Json<StatusReport> {
    Json(StatusReport {
        initialized: state.manager.is_initialized(),
        connections: state.manager.snapshots().await,
    })
}
