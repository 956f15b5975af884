use async_trait::async_trait;
use courier_common::mask::mask_recipient;
use courier_common::types::Channel;
use courier_storage::ChannelConfigRow;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use std::time::Duration;

use crate::error::ChannelError;
use crate::ChannelAdapter;

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);

/// SMTP refusal fragments that indicate a bad mailbox rather than a
/// transport problem; retrying these is pointless.
const TERMINAL_SMTP_PATTERNS: [&str; 4] = [
    "invalid address",
    "invalid recipient",
    "user unknown",
    "no such user",
];

/// HTML sentinels: a body containing any of these is sent as text/html.
const HTML_SENTINELS: [&str; 5] = ["<!doctype", "<html", "<p>", "<div", "<br"];

#[derive(Deserialize)]
struct EmailSettings {
    smtp_host: String,
    #[serde(default = "default_smtp_port")]
    smtp_port: u16,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    from: String,
}

fn default_smtp_port() -> u16 {
    587
}

pub struct EmailAdapter {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Option<Mailbox>,
    enabled: bool,
}

impl EmailAdapter {
    /// Build from the channel config row. Missing or invalid settings
    /// produce an unconfigured adapter (sends fail with NOT_CONFIGURED);
    /// the channel surface stays registered either way.
    pub fn from_config(row: &ChannelConfigRow) -> Self {
        let settings: Option<EmailSettings> =
            serde_json::from_value(row.settings.clone()).ok();
        let Some(cfg) = settings else {
            tracing::warn!("Email channel settings missing or invalid, adapter unconfigured");
            return Self {
                transport: None,
                from: None,
                enabled: row.enabled,
            };
        };

        let from = match cfg.from.parse::<Mailbox>() {
            Ok(mb) => mb,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid email 'from' address, adapter unconfigured");
                return Self {
                    transport: None,
                    from: None,
                    enabled: row.enabled,
                };
            }
        };

        let transport = match AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host) {
            Ok(mut builder) => {
                builder = builder
                    .port(cfg.smtp_port)
                    .timeout(Some(OUTBOUND_TIMEOUT));
                if let (Some(user), Some(pass)) = (&cfg.smtp_username, &cfg.smtp_password) {
                    builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
                }
                Some(builder.build())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build SMTP transport, adapter unconfigured");
                None
            }
        };

        Self {
            transport,
            from: Some(from),
            enabled: row.enabled,
        }
    }

    fn is_html(body: &str) -> bool {
        let lower = body.to_lowercase();
        HTML_SENTINELS.iter().any(|s| lower.contains(s))
    }

    fn classify_smtp_error(e: &lettre::transport::smtp::Error) -> ChannelError {
        let msg = e.to_string();
        let lower = msg.to_lowercase();
        if TERMINAL_SMTP_PATTERNS.iter().any(|p| lower.contains(p)) {
            ChannelError::terminal("INVALID_RECIPIENT", msg)
        } else {
            ChannelError::transient("SMTP_ERROR", msg)
        }
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> Result<String, ChannelError> {
        let (Some(transport), Some(from)) = (&self.transport, &self.from) else {
            return Err(ChannelError::terminal(
                "NOT_CONFIGURED",
                "email channel is not configured",
            ));
        };

        tracing::info!(
            recipient = %mask_recipient(recipient, Channel::Email),
            "Sending email"
        );

        let to: Mailbox = recipient
            .parse()
            .map_err(|e| ChannelError::terminal("INVALID_RECIPIENT", format!("{e}")))?;

        let content_type = if Self::is_html(body) {
            ContentType::TEXT_HTML
        } else {
            ContentType::TEXT_PLAIN
        };

        let message = Message::builder()
            .from(from.clone())
            .to(to)
            .subject(subject.unwrap_or("Notification"))
            .header(content_type)
            .body(body.to_string())
            .map_err(|e| ChannelError::terminal("MESSAGE_ERROR", e.to_string()))?;

        match transport.send(message).await {
            Ok(_) => {
                tracing::info!(
                    recipient = %mask_recipient(recipient, Channel::Email),
                    "Email accepted by SMTP server"
                );
                // SMTP has no provider message id; synthesize one.
                Ok(format!("email-{}", chrono::Utc::now().timestamp_millis()))
            }
            Err(e) => {
                tracing::warn!(
                    recipient = %mask_recipient(recipient, Channel::Email),
                    error = %e,
                    "Email send failed"
                );
                Err(Self::classify_smtp_error(&e))
            }
        }
    }

    async fn health_check(&self) -> bool {
        match &self.transport {
            Some(transport) => transport.test_connection().await.unwrap_or(false),
            None => false,
        }
    }

    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_configured(&self) -> bool {
        self.transport.is_some() && self.from.is_some()
    }
}
