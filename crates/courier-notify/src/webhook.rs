use base64::Engine;
use chrono::Utc;
use courier_common::mask::mask_recipient;
use courier_storage::NotificationRow;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);

/// Terminal event reported to the caller's webhook endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEvent {
    Sent,
    Failed,
}

impl std::fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookEvent::Sent => write!(f, "SENT"),
            WebhookEvent::Failed => write!(f, "FAILED"),
        }
    }
}

/// Fires signed webhook POSTs on terminal notification events.
///
/// Delivery is best-effort: any non-2xx outcome is logged and dropped, and
/// nothing here ever feeds back into notification state.
pub struct WebhookNotifier {
    client: reqwest::Client,
    secret: String,
}

impl WebhookNotifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(OUTBOUND_TIMEOUT)
                .build()
                .unwrap_or_default(),
            secret: secret.into(),
        }
    }

    /// Build the payload for a terminal event.
    pub fn build_payload(
        row: &NotificationRow,
        event: WebhookEvent,
        used_channel: Option<courier_common::types::Channel>,
    ) -> serde_json::Value {
        let channel = used_channel.unwrap_or(row.channel);
        let mut payload = serde_json::json!({
            "event": event.to_string(),
            "notification_id": row.id,
            "channel": channel.to_string(),
            "recipient": mask_recipient(&row.recipient, row.channel),
            "status": event.to_string(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        let obj = payload.as_object_mut().expect("payload is an object");

        if let Some(metadata) = &row.metadata {
            obj.insert("metadata".to_string(), metadata.clone());
        }
        if event == WebhookEvent::Failed {
            obj.insert(
                "error_message".to_string(),
                serde_json::json!(row.error_message),
            );
            obj.insert("error_code".to_string(), serde_json::json!(row.error_code));
            obj.insert(
                "retry_count".to_string(),
                serde_json::json!(row.retry_count),
            );
        }
        if event == WebhookEvent::Sent {
            if let Some(pmid) = &row.provider_message_id {
                obj.insert("provider_message_id".to_string(), serde_json::json!(pmid));
            }
        }
        payload
    }

    /// `"sha256=" + base64(HMAC_SHA256(secret, payload_bytes))`.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload);
        let digest = mac.finalize().into_bytes();
        format!(
            "sha256={}",
            base64::engine::general_purpose::STANDARD.encode(digest)
        )
    }

    /// POST the event to the row's callback URL, if any.
    pub async fn fire(
        &self,
        row: &NotificationRow,
        event: WebhookEvent,
        used_channel: Option<courier_common::types::Channel>,
    ) {
        let Some(url) = row.callback_url.as_deref().filter(|u| !u.is_empty()) else {
            return;
        };

        let payload = Self::build_payload(row, event, used_channel);
        let body = match serde_json::to_vec(&payload) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(id = %row.id, error = %e, "Failed to serialize webhook payload");
                return;
            }
        };
        let signature = self.sign(&body);

        let result = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", signature)
            .header(
                "X-Webhook-Timestamp",
                Utc::now().timestamp_millis().to_string(),
            )
            .header("X-Webhook-Event", event.to_string())
            .body(body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(id = %row.id, event = %event, "Webhook delivered");
            }
            Ok(resp) => {
                tracing::warn!(
                    id = %row.id,
                    event = %event,
                    status = %resp.status(),
                    "Webhook returned non-2xx status"
                );
            }
            Err(e) => {
                tracing::warn!(id = %row.id, event = %event, error = %e, "Webhook send failed");
            }
        }
    }
}
