//! HTTP server
//!
//! Assembles the engine's routes: the media WebSocket, call lifecycle
//! endpoints, and carrier webhooks. On SIGTERM/SIGINT every live session is
//! ended with reason "server-shutdown" before the listener and the store
//! close.

pub mod calls;
pub mod telephony;
pub mod ws;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::session::SessionRegistry;
use crate::storage::CallStore;
use crate::telephony::twilio::TwilioAdapter;
use crate::telephony::CarrierAdapter;

/// Shared server state injected into every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: CallStore,
    pub registry: Arc<SessionRegistry>,
    pub carrier: Option<Arc<dyn CarrierAdapter>>,
}

impl AppState {
    pub fn new(config: Config, store: CallStore) -> Self {
        let carrier: Option<Arc<dyn CarrierAdapter>> = match (
            config.provider_keys.twilio_account_sid.clone(),
            config.provider_keys.twilio_auth_token.clone(),
        ) {
            (Some(sid), Some(token)) => Some(Arc::new(TwilioAdapter::new(sid, token))),
            _ => {
                warn!("Twilio credentials not set; telephony endpoints disabled");
                None
            }
        };
        Self {
            config: Arc::new(config),
            store,
            registry: SessionRegistry::new(),
            carrier,
        }
    }
}

/// Build the full router
pub fn router(state: AppState) -> Router {
    let cors = if state.config.cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origin = state
            .config
            .cors_origin
            .parse::<HeaderValue>()
            .unwrap_or_else(|_| HeaderValue::from_static("*"));
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        // Media transport
        .route("/ws/{call_id}", get(ws::media_ws_handler))
        // Call lifecycle
        .route("/api/calls", post(calls::create_call_handler))
        .route("/api/calls/outbound", post(calls::outbound_call_handler))
        .route("/api/calls/{call_id}/session", get(calls::session_info_handler))
        .route("/api/calls/{call_id}/end", post(calls::end_call_handler))
        .route("/api/calls/{call_id}/transfer", post(calls::transfer_call_handler))
        .route("/api/calls/{call_id}/dtmf", post(calls::dtmf_handler))
        .route("/api/status", get(calls::status_handler))
        // Carrier webhooks
        .route("/telephony/twilio/inbound", post(telephony::twilio_inbound_handler))
        .route("/telephony/twilio/answer", post(telephony::twilio_answer_handler))
        .route("/telephony/twilio/status", post(telephony::twilio_status_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until a shutdown signal arrives
pub async fn serve(state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port)
        .parse()
        .context("Invalid HOST/PORT")?;
    let registry = state.registry.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Voice engine listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            registry.shutdown_all().await;
        })
        .await
        .context("Server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::config::{ProviderKeys, Secrets};

    fn test_state() -> AppState {
        let config = Config {
            host: "127.0.0.1".into(),
            port: 0,
            cors_origin: "*".into(),
            api_url: "http://127.0.0.1".into(),
            voice_engine_ws_url: "ws://127.0.0.1".into(),
            database_path: ":memory:".into(),
            recordings_dir: "recordings".into(),
            secrets: Secrets {
                jwt_secret: "test-secret".into(),
                ..Default::default()
            },
            provider_keys: ProviderKeys::default(),
        };
        let store = crate::storage::CallStore::open_in_memory().unwrap();
        AppState::new(config, store)
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_media_socket_requires_token() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ws/call_1")
                    .header("upgrade", "websocket")
                    .header("connection", "upgrade")
                    .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                    .header("sec-websocket-version", "13")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_call_unknown_assistant_is_404() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/calls")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"assistant_id":"missing"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_info_without_session_is_404() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/calls/nope/session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
