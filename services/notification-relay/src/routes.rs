//! HTTP surface: the webhook receiver, a channel proxy, and read-only views
//! over relay state.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use legalrelay_database::WebhookEventStore;
use legalrelay_models::{
    ChatChannel, EmailTrackingEvent, WebhookEvent, WebhookEventType, WebhookPayload,
};
use legalrelay_utils::{RelayError, RelayResult};

use crate::metrics::RelayMetrics;
use crate::middleware::request_id_middleware;
use crate::providers::ChatProvider;
use crate::reply_router::{EmailReplyRouter, PollSummary};
use crate::retry::WebhookRetryEngine;
use crate::signature::{self, SIGNATURE_HEADER};
use crate::tracking::{EmailStats, EmailTrackingService};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WebhookRetryEngine>,
    pub events: Arc<dyn WebhookEventStore>,
    pub router: Arc<EmailReplyRouter>,
    pub chat: Arc<dyn ChatProvider>,
    pub tracking: EmailTrackingService,
    pub metrics: RelayMetrics,
    pub webhook_secret: Option<String>,
}

pub fn create_app(state: AppState, max_request_size: usize) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/webhooks/:provider", post(receive_webhook))
        .nest("/api/v1", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(max_request_size))
                .layer(axum::middleware::from_fn(request_id_middleware)),
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/webhooks/events", get(events_by_type))
        .route("/webhooks/events/failed", get(failed_events))
        .route("/webhooks/events/:id", get(event_status))
        .route("/channels", post(create_channel))
        .route("/emails/poll", post(poll_emails))
        .route("/emails/:email_id/events", get(email_events))
        .route("/emails/:email_id/stats", get(email_stats))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "legalrelay-notification-relay",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .metrics
        .render()
        .unwrap_or_else(|_| "Error encoding metrics".to_string())
}

/// Verifies and records a chat webhook; processing continues in the background.
async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> RelayResult<Json<Value>> {
    let secret = state
        .webhook_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RelayError::authentication("Webhook secret is not configured"))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RelayError::authentication("Missing webhook signature"))?;

    if !signature::verify(&body, signature, secret) {
        tracing::warn!(provider = %provider, "Rejected webhook with invalid signature");
        return Err(RelayError::authentication("Invalid webhook signature"));
    }

    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::warn!(provider = %provider, error = %err, "Webhook body is not JSON");
            return Ok(Json(json!({ "success": false, "message": "Malformed event payload" })));
        }
    };

    let event_type = match WebhookPayload::parse(&raw) {
        Ok(payload) => payload.event_type(),
        Err(err) => {
            tracing::warn!(provider = %provider, error = %err, "Malformed webhook payload");
            return Ok(Json(json!({ "success": false, "message": "Malformed event payload" })));
        }
    };

    let Some(event_type) = event_type else {
        tracing::info!(provider = %provider, "Unhandled webhook category");
        return Ok(Json(json!({ "success": false, "message": "Unhandled event category" })));
    };

    let event = WebhookEvent::new(event_type, raw, signature);
    let event_id = event.id.clone();
    state
        .engine
        .submit(event)
        .await
        .map_err(|e| RelayError::internal(format!("Failed to record webhook event: {}", e)))?;

    tracing::info!(provider = %provider, event_id = %event_id, event_type = %event_type, "Webhook accepted");
    Ok(Json(json!({ "success": true, "eventId": event_id })))
}

async fn event_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> RelayResult<Json<WebhookEvent>> {
    let event = state
        .events
        .get(&id)
        .await
        .map_err(|e| RelayError::database(e.to_string()))?
        .ok_or_else(|| RelayError::not_found(format!("Webhook event {}", id)))?;
    Ok(Json(event))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(rename = "type")]
    event_type: Option<String>,
}

async fn events_by_type(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> RelayResult<Json<Vec<WebhookEvent>>> {
    let raw = query
        .event_type
        .ok_or_else(|| RelayError::validation("type", "Query parameter is required"))?;
    let event_type = WebhookEventType::parse(&raw)
        .ok_or_else(|| RelayError::validation("type", format!("Unknown event type {}", raw)))?;

    let events = state
        .events
        .find_by_type(event_type)
        .await
        .map_err(|e| RelayError::database(e.to_string()))?;
    Ok(Json(events))
}

async fn failed_events(State(state): State<AppState>) -> RelayResult<Json<Vec<WebhookEvent>>> {
    let events = state
        .events
        .find_failed()
        .await
        .map_err(|e| RelayError::database(e.to_string()))?;
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
struct CreateChannelRequest {
    user_ids: Vec<String>,
}

/// Opens a distinct group channel for the given users.
async fn create_channel(
    State(state): State<AppState>,
    Json(request): Json<CreateChannelRequest>,
) -> RelayResult<Json<ChatChannel>> {
    let user_ids: Vec<String> = request
        .user_ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    if user_ids.len() < 2 {
        return Err(RelayError::validation("user_ids", "At least two users are required"));
    }

    let channel = state
        .chat
        .create_channel(&user_ids)
        .await
        .map_err(|e| RelayError::external_service("chat", e.to_string()))?;

    tracing::info!(channel_url = %channel.channel_url, members = user_ids.len(), "Chat channel created");
    Ok(Json(channel))
}

async fn poll_emails(State(state): State<AppState>) -> RelayResult<Json<PollSummary>> {
    let summary = state
        .router
        .poll_and_relay()
        .await
        .map_err(|e| RelayError::external_service("mail", format!("{:#}", e)))?;
    Ok(Json(summary))
}

async fn email_events(
    State(state): State<AppState>,
    Path(email_id): Path<String>,
) -> Json<Vec<EmailTrackingEvent>> {
    Json(state.tracking.events(&email_id).await)
}

async fn email_stats(State(state): State<AppState>, Path(email_id): Path<String>) -> Json<EmailStats> {
    Json(state.tracking.stats(&email_id).await)
}
