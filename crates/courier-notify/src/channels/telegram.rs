use async_trait::async_trait;
use courier_common::mask::mask_recipient;
use courier_common::types::Channel;
use courier_storage::ChannelConfigRow;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::ChannelError;
use crate::ChannelAdapter;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct TelegramSettings {
    bot_token: String,
    #[serde(default = "default_api_base")]
    api_base: String,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

pub struct TelegramAdapter {
    client: reqwest::Client,
    bot_token: Option<String>,
    api_base: String,
    enabled: bool,
}

impl TelegramAdapter {
    pub fn from_config(row: &ChannelConfigRow) -> Self {
        let settings: Option<TelegramSettings> =
            serde_json::from_value(row.settings.clone()).ok();
        let (bot_token, api_base) = match settings {
            Some(cfg) if !cfg.bot_token.is_empty() => (Some(cfg.bot_token), cfg.api_base),
            _ => {
                tracing::warn!("Telegram bot token missing, adapter unconfigured");
                (None, DEFAULT_API_BASE.to_string())
            }
        };
        Self {
            client: reqwest::Client::builder()
                .timeout(OUTBOUND_TIMEOUT)
                .build()
                .unwrap_or_default(),
            bot_token,
            api_base,
            enabled: row.enabled,
        }
    }

    /// Escape characters Telegram treats as Markdown markup in subjects.
    fn escape_markdown(text: &str) -> String {
        text.replace('_', "\\_")
            .replace('*', "\\*")
            .replace('[', "\\[")
            .replace('`', "\\`")
    }

    /// A present subject becomes a bold header line above the body.
    fn format_message(subject: Option<&str>, body: &str) -> String {
        match subject {
            Some(s) if !s.is_empty() => {
                format!("*{}*\n\n{}", Self::escape_markdown(s), body)
            }
            _ => body.to_string(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> Result<String, ChannelError> {
        let Some(token) = &self.bot_token else {
            return Err(ChannelError::terminal(
                "NOT_CONFIGURED",
                "telegram channel is not configured",
            ));
        };

        tracing::info!(
            chat_id = %mask_recipient(recipient, Channel::Telegram),
            "Sending Telegram message"
        );

        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        let payload = serde_json::json!({
            "chat_id": recipient,
            "text": Self::format_message(subject, body),
            "parse_mode": "Markdown",
        });

        let resp = self.client.post(&url).json(&payload).send().await?;
        let status = resp.status();
        let response_body: Value = resp.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            if response_body.get("ok").and_then(Value::as_bool) == Some(true) {
                let message_id = response_body
                    .pointer("/result/message_id")
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                tracing::info!(message_id = %message_id, "Telegram message sent");
                return Ok(message_id);
            }
            let description = response_body
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(ChannelError::transient(
                "API_ERROR",
                format!("Telegram API error: {description}"),
            ));
        }

        let description = response_body
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        tracing::warn!(
            status = %status,
            chat_id = %mask_recipient(recipient, Channel::Telegram),
            description = description,
            "Telegram API returned error"
        );

        // 429 and 5xx are worth retrying; other 4xx mean the request
        // itself is bad (unknown chat, bot blocked).
        if status.as_u16() == 429 || status.is_server_error() {
            Err(ChannelError::transient(
                "SERVER_ERROR",
                format!("HTTP {status}: {description}"),
            ))
        } else {
            Err(ChannelError::terminal(
                "CLIENT_ERROR",
                format!("HTTP {status}: {description}"),
            ))
        }
    }

    async fn health_check(&self) -> bool {
        let Some(token) = &self.bot_token else {
            return false;
        };
        let url = format!("{}/bot{}/getMe", self.api_base, token);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let body: Value = resp.json().await.unwrap_or(Value::Null);
                body.get("ok").and_then(Value::as_bool) == Some(true)
            }
            _ => false,
        }
    }

    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_configured(&self) -> bool {
        self.bot_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_is_escaped_and_bolded() {
        let msg = TelegramAdapter::format_message(Some("Order *123* [new]"), "details");
        assert_eq!(msg, "*Order \\*123\\* \\[new]*\n\ndetails");
    }

    #[test]
    fn missing_subject_leaves_body_untouched() {
        assert_eq!(TelegramAdapter::format_message(None, "just text"), "just text");
        assert_eq!(TelegramAdapter::format_message(Some(""), "x"), "x");
    }
}
