use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use courier_common::mask::mask_recipient;
use courier_common::types::NotificationStatus;
use courier_storage::ApiClientRow;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::dispatch::SubmitError;
use crate::state::AppState;

/// API error body: a stable machine code plus a human-readable message.
#[derive(Serialize, ToSchema)]
pub struct ApiErrorResponse {
    /// Error code (e.g. INVALID_CHANNEL, RATE_LIMIT_EXCEEDED)
    pub error: String,
    /// Human-readable description
    pub message: String,
}

pub fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(ApiErrorResponse {
            error: code.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// Request body for `POST /api/v1/send`.
///
/// Either `message` is given directly, or `template_code` +
/// `template_variables` select and fill an active template.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SendRequest {
    /// Delivery channel: EMAIL, TELEGRAM, SMS, WHATSAPP
    pub channel: String,
    /// Recipient address (email, chat id, phone number)
    pub recipient: String,
    /// Subject; required for EMAIL
    pub subject: Option<String>,
    /// Message body (unless a template is used)
    pub message: Option<String>,
    /// Template code; subject and message are rendered from the template
    pub template_code: Option<String>,
    /// Variables substituted into the template: {{key}} -> value
    pub template_variables: Option<HashMap<String, String>>,
    /// Priority: HIGH, NORMAL (default), LOW
    pub priority: Option<String>,
    /// Deduplication key; at most one notification per key
    pub idempotency_key: Option<String>,
    /// Webhook endpoint notified on terminal events
    pub callback_url: Option<String>,
    /// Opaque metadata replayed in webhook payloads
    pub metadata: Option<serde_json::Value>,
}

/// Response for an accepted send request.
#[derive(Serialize, ToSchema)]
pub struct SubmitResponse {
    /// Server-assigned notification id
    pub notification_id: String,
    /// Status at accept time (PENDING; replayed rows return their state)
    pub status: String,
    /// Creation instant
    pub created_at: DateTime<Utc>,
}

/// Response for a status lookup. Recipient is masked.
#[derive(Serialize, ToSchema)]
pub struct StatusResponse {
    pub id: String,
    pub status: String,
    pub channel: String,
    pub recipient: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub error_message: Option<String>,
}

/// Submit a notification for asynchronous delivery.
/// Auth: `X-API-Key` header; rate limited per client.
#[utoipa::path(
    post,
    path = "/api/v1/send",
    tag = "Notifications",
    security(("api_key" = [])),
    request_body = SendRequest,
    responses(
        (status = 202, description = "Accepted for delivery", body = SubmitResponse),
        (status = 400, description = "Validation failure", body = ApiErrorResponse),
        (status = 401, description = "Missing or invalid API key", body = ApiErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ApiErrorResponse)
    )
)]
async fn send_notification(
    State(state): State<AppState>,
    Extension(client): Extension<ApiClientRow>,
    headers: axum::http::HeaderMap,
    Json(request): Json<SendRequest>,
) -> impl IntoResponse {
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());

    match state.dispatcher.submit(request, &client, client_ip).await {
        Ok(row) => (
            StatusCode::ACCEPTED,
            Json(SubmitResponse {
                notification_id: row.id,
                status: row.status.to_string(),
                created_at: row.created_at,
            }),
        )
            .into_response(),
        Err(SubmitError::Validation { code, message }) => {
            error_response(StatusCode::BAD_REQUEST, code, &message)
        }
        Err(SubmitError::Storage(e)) => {
            tracing::error!(error = %e, "Failed to persist notification");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                "Database error",
            )
        }
    }
}

/// Look up delivery status by notification id.
/// Auth: `X-API-Key` header.
#[utoipa::path(
    get,
    path = "/api/v1/status/{id}",
    tag = "Notifications",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Current status", body = StatusResponse),
        (status = 401, description = "Missing or invalid API key", body = ApiErrorResponse),
        (status = 404, description = "Notification not found", body = ApiErrorResponse)
    )
)]
async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.find_notification_by_id(&id).await {
        Ok(Some(row)) => (
            StatusCode::OK,
            Json(StatusResponse {
                id: row.id,
                status: row.status.to_string(),
                channel: row.channel.to_string(),
                recipient: mask_recipient(&row.recipient, row.channel),
                created_at: row.created_at,
                sent_at: row.sent_at,
                retry_count: row.retry_count,
                error_message: row.error_message,
            }),
        )
            .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "Notification not found"),
        Err(e) => {
            tracing::error!(id = %id, error = %e, "Failed to load notification");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                "Database error",
            )
        }
    }
}

/// Re-queue a FAILED notification (resets the retry counter).
/// Auth: `X-API-Key` header.
#[utoipa::path(
    post,
    path = "/api/v1/retry/{id}",
    tag = "Notifications",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Retry queued", body = SubmitResponse),
        (status = 400, description = "Notification is not in FAILED state", body = ApiErrorResponse),
        (status = 401, description = "Missing or invalid API key", body = ApiErrorResponse),
        (status = 404, description = "Notification not found", body = ApiErrorResponse)
    )
)]
async fn retry_notification(
    State(state): State<AppState>,
    Extension(client): Extension<ApiClientRow>,
    headers: axum::http::HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let row = match state.store.find_notification_by_id(&id).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "Notification not found")
        }
        Err(e) => {
            tracing::error!(id = %id, error = %e, "Failed to load notification");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                "Database error",
            );
        }
    };

    if row.status != NotificationStatus::Failed {
        return error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_STATE",
            "Only FAILED notifications can be retried",
        );
    }

    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());

    match state.dispatcher.force_retry(&id, &client, client_ip).await {
        Ok(true) => (
            StatusCode::OK,
            Json(SubmitResponse {
                notification_id: id,
                status: NotificationStatus::Pending.to_string(),
                created_at: row.created_at,
            }),
        )
            .into_response(),
        Ok(false) => error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_STATE",
            "Only FAILED notifications can be retried",
        ),
        Err(e) => {
            tracing::error!(id = %id, error = %e, "Failed to force retry");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                "Database error",
            )
        }
    }
}

#[derive(Serialize, ToSchema)]
struct ChannelHealth {
    /// UP, MISCONFIGURED, or DISABLED
    status: String,
    enabled: bool,
    configured: bool,
}

#[derive(Serialize, ToSchema)]
struct HealthComponents {
    database: String,
    channels: HashMap<String, ChannelHealth>,
}

#[derive(Serialize, ToSchema)]
struct HealthResponse {
    /// UP, DEGRADED, or DOWN
    status: String,
    timestamp: DateTime<Utc>,
    uptime_secs: i64,
    components: HealthComponents,
}

/// Service health: database liveness and per-channel state.
/// Unconfigured WhatsApp is excluded from the rollup verdict.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses((status = 200, description = "Health report", body = HealthResponse))
)]
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_healthy = state.store.ping().await;

    let mut channels = HashMap::new();
    let mut degraded = false;
    for status in state.router.snapshot().await {
        let verdict = if status.enabled && status.configured {
            "UP"
        } else if status.enabled {
            "MISCONFIGURED"
        } else {
            "DISABLED"
        };
        let counts_toward_rollup = !(status.channel == courier_common::types::Channel::Whatsapp
            && !status.configured);
        if counts_toward_rollup && status.enabled && !status.configured {
            degraded = true;
        }
        channels.insert(
            status.channel.to_string(),
            ChannelHealth {
                status: verdict.to_string(),
                enabled: status.enabled,
                configured: status.configured,
            },
        );
    }

    let overall = if !db_healthy {
        "DOWN"
    } else if degraded {
        "DEGRADED"
    } else {
        "UP"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: overall.to_string(),
            timestamp: Utc::now(),
            uptime_secs: (Utc::now() - state.start_time).num_seconds(),
            components: HealthComponents {
                database: if db_healthy { "UP" } else { "DOWN" }.to_string(),
                channels,
            },
        }),
    )
}

#[derive(Serialize, ToSchema)]
struct NotificationMetrics {
    total: u64,
    pending: u64,
    failed: u64,
    due_retries: u64,
}

#[derive(Serialize, ToSchema)]
struct MetricsResponse {
    notifications: NotificationMetrics,
}

/// Notification counters for dashboards and probes.
#[utoipa::path(
    get,
    path = "/api/v1/metrics",
    tag = "Health",
    responses((status = 200, description = "Service metrics", body = MetricsResponse))
)]
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let total = state
        .store
        .count_notifications(&Default::default())
        .await
        .unwrap_or(0);
    let pending = state
        .store
        .count_by_status(NotificationStatus::Pending)
        .await
        .unwrap_or(0);
    let sending = state
        .store
        .count_by_status(NotificationStatus::Sending)
        .await
        .unwrap_or(0);
    let failed = state
        .store
        .count_by_status(NotificationStatus::Failed)
        .await
        .unwrap_or(0);
    let due_retries = state.store.count_due_retries(Utc::now()).await.unwrap_or(0);

    (
        StatusCode::OK,
        Json(MetricsResponse {
            notifications: NotificationMetrics {
                total,
                pending: pending + sending,
                failed,
                due_retries,
            },
        }),
    )
}

/// Routes served without authentication.
pub fn public_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(metrics))
}

/// Routes behind the API-key middleware.
pub fn client_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(send_notification))
        .routes(routes!(get_status))
        .routes(routes!(retry_notification))
}
