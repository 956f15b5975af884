use chrono::{Duration, Utc};
use courier_common::id::next_id;
use courier_common::mask::mask_recipient;
use courier_common::types::{Channel, NotificationStatus, Priority};
use courier_notify::router::ChannelRouter;
use courier_notify::webhook::{WebhookEvent, WebhookNotifier};
use courier_storage::{ApiClientRow, AuditLogRow, NotificationRow, StorageError, Store};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::api::SendRequest;

/// Fixed backoff schedule: delay before the Nth retry attempt, minutes.
/// Attempts past the table reuse the last entry.
const BACKOFF_MINUTES: [i64; 5] = [1, 5, 15, 60, 240];

pub fn backoff_delay(retry_count: i32) -> Duration {
    let idx = (retry_count - 1).clamp(0, BACKOFF_MINUTES.len() as i32 - 1) as usize;
    Duration::minutes(BACKOFF_MINUTES[idx])
}

/// A unit of work on the delivery queue. `leased` marks rows the retry
/// scheduler already flipped to SENDING.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub id: String,
    pub leased: bool,
}

/// Submit-time failure, mapped to an HTTP status by the API layer.
#[derive(Debug)]
pub enum SubmitError {
    /// Request rejected at validation; never retried.
    Validation { code: &'static str, message: String },
    /// Storage failure; surfaced as 5xx so it stays observable.
    Storage(anyhow::Error),
}

impl SubmitError {
    fn invalid(code: &'static str, message: impl Into<String>) -> Self {
        SubmitError::Validation {
            code,
            message: message.into(),
        }
    }
}

/// Accepts validated requests, enforces idempotency, persists rows, and
/// feeds the shared delivery worker pool. Delivery attempts themselves are
/// also executed here (the retry scheduler re-enters through the same
/// queue).
pub struct Dispatcher {
    store: Arc<Store>,
    router: Arc<ChannelRouter>,
    webhook: Arc<WebhookNotifier>,
    jobs: mpsc::Sender<DeliveryJob>,
    ttl: Duration,
}

impl Dispatcher {
    /// Build the dispatcher and spawn `worker_count` queue consumers.
    pub fn start(
        store: Arc<Store>,
        router: Arc<ChannelRouter>,
        webhook: Arc<WebhookNotifier>,
        worker_count: usize,
        notification_ttl_s: u64,
    ) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel::<DeliveryJob>(1024);
        let dispatcher = Arc::new(Self {
            store,
            router,
            webhook,
            jobs: tx,
            ttl: Duration::seconds(notification_ttl_s as i64),
        });

        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(worker_count.max(1));
        for worker_id in 0..worker_count.max(1) {
            let dispatcher = dispatcher.clone();
            let rx = rx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => dispatcher.deliver(&job.id, job.leased).await,
                        None => break,
                    }
                }
                tracing::debug!(worker_id, "Delivery worker stopped");
            }));
        }

        (dispatcher, handles)
    }

    /// Validate, dedupe, persist, and enqueue one send request.
    ///
    /// Returns the persisted row; for an idempotent replay that is the
    /// original row, untouched, and no new delivery is attempted.
    pub async fn submit(
        &self,
        request: SendRequest,
        client: &ApiClientRow,
        client_ip: Option<String>,
    ) -> Result<NotificationRow, SubmitError> {
        let channel: Channel = request
            .channel
            .parse()
            .map_err(|_| SubmitError::invalid("INVALID_CHANNEL", format!("unknown channel: {}", request.channel)))?;

        if !client.channel_allowed(channel) {
            return Err(SubmitError::invalid(
                "CHANNEL_NOT_ALLOWED",
                format!("client is not allowed to send on {channel}"),
            ));
        }

        if request.recipient.is_empty() || request.recipient.len() > 255 {
            return Err(SubmitError::invalid(
                "RECIPIENT_FORMAT",
                "recipient must be 1-255 characters",
            ));
        }
        if !recipient_format_ok(channel, &request.recipient) {
            return Err(SubmitError::invalid(
                "RECIPIENT_FORMAT",
                format!("recipient is not valid for channel {channel}"),
            ));
        }

        if let Some(key) = &request.idempotency_key {
            if key.len() > 255 {
                return Err(SubmitError::invalid(
                    "INVALID_REQUEST",
                    "idempotency_key must be at most 255 characters",
                ));
            }
        }
        if let Some(url) = &request.callback_url {
            if url.len() > 500 {
                return Err(SubmitError::invalid(
                    "INVALID_REQUEST",
                    "callback_url must be at most 500 characters",
                ));
            }
        }

        // Template rendering (subject/body) or direct message.
        let (subject, body) = self.resolve_content(&request, channel).await?;

        if let Some(s) = &subject {
            if s.len() > 500 {
                return Err(SubmitError::invalid(
                    "INVALID_REQUEST",
                    "subject must be at most 500 characters",
                ));
            }
        }
        if channel == Channel::Email && subject.as_deref().unwrap_or("").is_empty() {
            return Err(SubmitError::invalid(
                "MISSING_SUBJECT",
                "subject is required for EMAIL",
            ));
        }
        if body.is_empty() {
            return Err(SubmitError::invalid(
                "MISSING_MESSAGE",
                "message is required when no template is used",
            ));
        }

        let priority = Priority::parse_or_default(request.priority.as_deref());

        // Idempotency pre-check; the unique index below is the authority.
        if let Some(key) = &request.idempotency_key {
            match self.store.find_notification_by_idempotency_key(key).await {
                Ok(Some(existing)) => {
                    tracing::info!(
                        id = %existing.id,
                        "Duplicate request, returning existing notification"
                    );
                    return Ok(existing);
                }
                Ok(None) => {}
                Err(e) => return Err(SubmitError::Storage(e)),
            }
        }

        let now = Utc::now();
        let row = NotificationRow {
            id: next_id(),
            client_id: client.id.clone(),
            channel,
            recipient: request.recipient.clone(),
            subject,
            body,
            status: NotificationStatus::Pending,
            priority,
            retry_count: 0,
            max_retries: 5,
            next_retry_at: None,
            error_code: None,
            error_message: None,
            provider_message_id: None,
            idempotency_key: request.idempotency_key.clone(),
            callback_url: request.callback_url.clone(),
            metadata: request.metadata.clone(),
            created_at: now,
            updated_at: now,
            sent_at: None,
            expires_at: Some(now + self.ttl),
        };

        let saved = match self.store.insert_notification(&row).await {
            Ok(saved) => saved,
            Err(e) => {
                if let Some(StorageError::DuplicateIdempotency { key }) =
                    e.downcast_ref::<StorageError>()
                {
                    // Lost the insert race; the winner's row is the answer.
                    match self.store.find_notification_by_idempotency_key(key).await {
                        Ok(Some(existing)) => return Ok(existing),
                        Ok(None) => return Err(SubmitError::Storage(e)),
                        Err(e) => return Err(SubmitError::Storage(e)),
                    }
                }
                return Err(SubmitError::Storage(e));
            }
        };

        tracing::info!(
            id = %saved.id,
            channel = %channel,
            recipient = %mask_recipient(&saved.recipient, channel),
            priority = %priority,
            "Notification created"
        );

        self.audit(
            Some(client.id.clone()),
            "SEND_NOTIFICATION",
            &saved.id,
            client_ip,
        )
        .await;

        if let Err(e) = self.store.touch_client_last_used(&client.id).await {
            tracing::warn!(client_id = %client.id, error = %e, "Failed to update last_used_at");
        }

        self.enqueue(&saved.id, false).await;
        Ok(saved)
    }

    async fn resolve_content(
        &self,
        request: &SendRequest,
        channel: Channel,
    ) -> Result<(Option<String>, String), SubmitError> {
        let Some(code) = request.template_code.as_deref().filter(|c| !c.is_empty()) else {
            return Ok((
                request.subject.clone().filter(|s| !s.is_empty()),
                request.message.clone().unwrap_or_default(),
            ));
        };

        let template = self
            .store
            .find_active_template(code, channel)
            .await
            .map_err(SubmitError::Storage)?
            .ok_or_else(|| {
                SubmitError::invalid(
                    "TEMPLATE_NOT_FOUND",
                    format!("no active template '{code}' for channel {channel}"),
                )
            })?;

        let empty = std::collections::HashMap::new();
        let vars = request.template_variables.as_ref().unwrap_or(&empty);
        if let Err(missing) = courier_notify::template::validate(&template.variables, vars) {
            return Err(SubmitError::invalid(
                "INVALID_TEMPLATE_ARGS",
                format!("missing template variables: {}", missing.join(", ")),
            ));
        }

        let subject = template
            .subject_template
            .as_deref()
            .map(|t| courier_notify::template::render(t, vars))
            .filter(|s| !s.is_empty())
            .or_else(|| request.subject.clone());
        let body = courier_notify::template::render(&template.body_template, vars);
        Ok((subject, body))
    }

    /// Reset a FAILED row and queue it for immediate redelivery.
    pub async fn force_retry(
        &self,
        id: &str,
        client: &ApiClientRow,
        client_ip: Option<String>,
    ) -> Result<bool, anyhow::Error> {
        if !self.store.force_retry(id).await? {
            return Ok(false);
        }
        self.audit(Some(client.id.clone()), "FORCE_RETRY", id, client_ip)
            .await;
        self.enqueue(id, false).await;
        Ok(true)
    }

    /// Put a delivery job on the shared queue.
    pub async fn enqueue(&self, id: &str, leased: bool) {
        let job = DeliveryJob {
            id: id.to_string(),
            leased,
        };
        if let Err(e) = self.jobs.send(job).await {
            tracing::error!(id, error = %e, "Delivery queue closed, job dropped");
        }
    }

    /// Execute one delivery attempt.
    ///
    /// Rows not yet leased are claimed here (PENDING -> SENDING); losing
    /// the lease means another worker owns the row and we back off. All
    /// adapter/router failures reduce to state transitions; storage errors
    /// are logged and the row is left for the next sweep.
    pub async fn deliver(&self, id: &str, already_leased: bool) {
        if !already_leased {
            match self.store.lease_for_dispatch(id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(id, "Row not leasable, skipping");
                    return;
                }
                Err(e) => {
                    tracing::error!(id, error = %e, "Failed to lease notification");
                    return;
                }
            }
        }

        let row = match self.store.find_notification_by_id(id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                tracing::error!(id, "Leased notification disappeared");
                return;
            }
            Err(e) => {
                tracing::error!(id, error = %e, "Failed to load notification");
                return;
            }
        };

        self.attempt(row).await;
    }

    async fn attempt(&self, row: NotificationRow) {
        let now = Utc::now();

        if let Some(expires_at) = row.expires_at {
            if expires_at <= now {
                if let Err(e) = self
                    .store
                    .update_notification_status(
                        &row.id,
                        NotificationStatus::Expired,
                        Some("EXPIRED"),
                        Some("notification expired before delivery"),
                    )
                    .await
                {
                    tracing::error!(id = %row.id, error = %e, "Failed to expire notification");
                    return;
                }
                self.fire_webhook(&row.id, WebhookEvent::Failed, None).await;
                return;
            }
        }

        let fallback = ChannelRouter::default_fallback(row.channel);
        let result = self
            .router
            .send_with_fallback(
                row.channel,
                fallback,
                &row.recipient,
                row.subject.as_deref(),
                &row.body,
            )
            .await;

        if result.ok {
            if let Err(e) = self
                .store
                .update_notification_status(&row.id, NotificationStatus::Sent, None, None)
                .await
            {
                tracing::error!(id = %row.id, error = %e, "Failed to mark notification SENT");
                return;
            }
            if let Some(pmid) = &result.provider_message_id {
                if let Err(e) = self.store.set_provider_message_id(&row.id, pmid).await {
                    tracing::warn!(id = %row.id, error = %e, "Failed to store provider message id");
                }
            }
            tracing::info!(
                id = %row.id,
                channel = %result.used_channel.unwrap_or(row.channel),
                "Notification sent"
            );
            let used = result.used_channel.filter(|c| *c != row.channel);
            self.fire_webhook(&row.id, WebhookEvent::Sent, used).await;
            return;
        }

        let code = result.error_code.as_deref();
        let message = result.error_message.as_deref();
        let next_count = row.retry_count + 1;

        if result.retryable && next_count < row.max_retries {
            let next_retry_at = now + backoff_delay(next_count);
            match self
                .store
                .schedule_retry(&row.id, next_count, next_retry_at, code, message)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        id = %row.id,
                        attempt = next_count,
                        next_retry_at = %next_retry_at,
                        code = code.unwrap_or("?"),
                        "Notification scheduled for retry"
                    );
                }
                Err(e) => {
                    tracing::error!(id = %row.id, error = %e, "Failed to schedule retry");
                }
            }
        } else {
            if let Err(e) = self
                .store
                .update_notification_status(&row.id, NotificationStatus::Failed, code, message)
                .await
            {
                tracing::error!(id = %row.id, error = %e, "Failed to mark notification FAILED");
                return;
            }
            tracing::warn!(
                id = %row.id,
                code = code.unwrap_or("?"),
                retryable = result.retryable,
                "Notification failed permanently"
            );
            self.fire_webhook(&row.id, WebhookEvent::Failed, None).await;
        }
    }

    /// Fire a terminal-event webhook from the freshly persisted row so the
    /// payload reflects final retry counts and error fields.
    async fn fire_webhook(&self, id: &str, event: WebhookEvent, used_channel: Option<Channel>) {
        match self.store.find_notification_by_id(id).await {
            Ok(Some(fresh)) => self.webhook.fire(&fresh, event, used_channel).await,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(id, error = %e, "Failed to reload row for webhook");
            }
        }
    }

    async fn audit(
        &self,
        client_id: Option<String>,
        action: &str,
        entity_id: &str,
        ip_address: Option<String>,
    ) {
        let row = AuditLogRow {
            id: next_id(),
            client_id,
            action: action.to_string(),
            entity_type: "notification".to_string(),
            entity_id: Some(entity_id.to_string()),
            details: None,
            ip_address,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.insert_audit_log(&row).await {
            tracing::warn!(action, error = %e, "Failed to write audit record");
        }
    }
}

/// Channel-specific recipient shape checks applied at ingress.
fn recipient_format_ok(channel: Channel, recipient: &str) -> bool {
    match channel {
        Channel::Email => {
            let Some(at) = recipient.find('@') else {
                return false;
            };
            at > 0
                && at < recipient.len() - 1
                && !recipient.contains(char::is_whitespace)
                && recipient.matches('@').count() == 1
        }
        Channel::Sms | Channel::Whatsapp => {
            let digits = recipient.chars().filter(|c| c.is_ascii_digit()).count();
            digits >= 7
                && recipient
                    .chars()
                    .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'))
        }
        Channel::Telegram => {
            if let Some(username) = recipient.strip_prefix('@') {
                return !username.is_empty()
                    && username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            }
            let digits = recipient.strip_prefix('-').unwrap_or(recipient);
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_is_fixed_and_capped() {
        assert_eq!(backoff_delay(1), Duration::minutes(1));
        assert_eq!(backoff_delay(2), Duration::minutes(5));
        assert_eq!(backoff_delay(3), Duration::minutes(15));
        assert_eq!(backoff_delay(4), Duration::minutes(60));
        assert_eq!(backoff_delay(5), Duration::minutes(240));
        // Past the table: capped at the last entry.
        assert_eq!(backoff_delay(6), Duration::minutes(240));
        assert_eq!(backoff_delay(42), Duration::minutes(240));
    }

    #[test]
    fn backoff_is_monotone() {
        let mut prev = Duration::zero();
        for attempt in 1..=8 {
            let delay = backoff_delay(attempt);
            assert!(delay >= prev, "attempt {attempt} shrank the delay");
            prev = delay;
        }
    }

    #[test]
    fn email_recipient_format() {
        assert!(recipient_format_ok(Channel::Email, "user@example.com"));
        assert!(!recipient_format_ok(Channel::Email, "userexample.com"));
        assert!(!recipient_format_ok(Channel::Email, "@example.com"));
        assert!(!recipient_format_ok(Channel::Email, "user@"));
        assert!(!recipient_format_ok(Channel::Email, "a b@example.com"));
        assert!(!recipient_format_ok(Channel::Email, "a@@example.com"));
    }

    #[test]
    fn phone_recipient_format() {
        assert!(recipient_format_ok(Channel::Sms, "+7 (916) 123-45-67"));
        assert!(recipient_format_ok(Channel::Whatsapp, "89161234567"));
        assert!(!recipient_format_ok(Channel::Sms, "12345"));
        assert!(!recipient_format_ok(Channel::Sms, "call-me-maybe"));
    }

    #[test]
    fn telegram_recipient_format() {
        assert!(recipient_format_ok(Channel::Telegram, "123456789"));
        assert!(recipient_format_ok(Channel::Telegram, "-1001234567890"));
        assert!(recipient_format_ok(Channel::Telegram, "@some_user"));
        assert!(!recipient_format_ok(Channel::Telegram, "@"));
        assert!(!recipient_format_ok(Channel::Telegram, "not a chat"));
    }
}
