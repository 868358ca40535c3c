use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::channel::line::{LineChannel, LineEvent};
use crate::channel::{is_allowed, Channel};
use crate::config::Config;
use crate::dialogue::Dispatcher;
use crate::error::BotError;
use crate::provider::{self, LlmProvider};
use crate::store;
use crate::util::preview;

const SIGNATURE_HEADER: &str = "x-line-signature";

/// Webhook bodies larger than this are rejected before parsing.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state for the webhook service.
pub struct AppState {
    pub config: Config,
    pub channel: Arc<dyn Channel>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(config: Config, channel: Arc<dyn Channel>, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            channel,
            dispatcher,
        }
    }

    /// Wire up the store, model and LINE channel described by `config`.
    pub fn from_config(config: Config) -> Result<Self, BotError> {
        let store = store::create_store(&config)?;
        let provider = provider::create_provider(&config.gemini)
            .map(|p| Arc::new(p) as Arc<dyn LlmProvider>);
        if provider.is_none() {
            warn!("No Gemini API key configured; chat replies are disabled");
        }
        let dispatcher = Dispatcher::new(&config.bot, store.clone(), provider);
        let channel: Arc<dyn Channel> = Arc::new(LineChannel::new(&config.line));

        info!(
            "Bot ready: mode={}, store={}",
            config.bot.mode,
            store.name()
        );
        Ok(Self::new(config, channel, dispatcher))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Create the axum Router with the webhook and health routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(handle_line_webhook))
        .route("/webhooks/line", post(handle_line_webhook))
        .route("/health", get(handle_health))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST / and /webhooks/line: LINE webhook
async fn handle_line_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    debug!("LINE webhook received: {} bytes", body.len());

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !LineChannel::verify_signature(&state.config.line.channel_secret, &body, signature) {
        warn!("Rejected LINE webhook with invalid signature");
        return (StatusCode::BAD_REQUEST, "Invalid signature");
    }

    let events = match std::str::from_utf8(&body)
        .map_err(|e| e.to_string())
        .and_then(|text| LineChannel::parse_webhook_events(text).map_err(|e| e.to_string()))
    {
        Ok(events) => events,
        Err(e) => {
            error!("Failed to parse LINE webhook: {}", e);
            return (StatusCode::BAD_REQUEST, "Malformed payload");
        }
    };

    for event in &events {
        handle_event(&state, event).await;
    }

    (StatusCode::OK, "OK")
}

async fn handle_event(state: &AppState, event: &LineEvent) {
    let Some(reply_token) = event.reply_token.as_deref() else {
        debug!("Ignoring {} event without reply token", event.event_type);
        return;
    };
    let Some(sender_id) = event.sender_id() else {
        debug!("Ignoring {} event without source", event.event_type);
        return;
    };
    if !is_allowed(sender_id, &state.config.line.allow_from) {
        debug!("Ignoring event from {} (not in allowFrom)", sender_id);
        return;
    }

    let reply = if event.event_type == "follow" {
        info!("New follower {}", sender_id);
        state.dispatcher.welcome().to_string()
    } else if let Some(text) = event.text() {
        info!("Message from {}: {}", sender_id, preview(text));
        state.dispatcher.dispatch(sender_id, text).await
    } else {
        debug!("Ignoring {} event from {}", event.event_type, sender_id);
        return;
    };

    if let Err(e) = state.channel.reply(reply_token, &reply).await {
        error!("Failed to reply via {}: {}", state.channel.name(), e);
    }
}

/// GET /health: health check
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// Start the HTTP server on the given address.
pub async fn serve(addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}
