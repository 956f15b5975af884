use async_trait::async_trait;
use courier_common::mask::mask_recipient;
use courier_common::types::Channel;
use courier_storage::ChannelConfigRow;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::ChannelError;
use crate::ChannelAdapter;

const DEFAULT_API_BASE: &str = "https://api.twilio.com";
const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct SmsSettings {
    account_sid: String,
    auth_token: String,
    from_number: String,
    #[serde(default = "default_api_base")]
    api_base: String,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

pub struct SmsAdapter {
    client: reqwest::Client,
    settings: Option<SmsSettings>,
    enabled: bool,
}

impl SmsAdapter {
    pub fn from_config(row: &ChannelConfigRow) -> Self {
        let settings: Option<SmsSettings> = serde_json::from_value(row.settings.clone()).ok();
        if settings.is_none() {
            tracing::warn!("SMS gateway settings missing, adapter unconfigured");
        }
        Self {
            client: reqwest::Client::builder()
                .timeout(OUTBOUND_TIMEOUT)
                .build()
                .unwrap_or_default(),
            settings,
            enabled: row.enabled,
        }
    }

    /// Normalize a phone number to E.164: keep a leading `+`, strip
    /// everything but digits, and map the 11-digit `8XXXXXXXXXX` form to
    /// `+7XXXXXXXXXX`.
    pub fn normalize_phone(phone: &str) -> String {
        let has_plus = phone.trim_start().starts_with('+');
        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        if has_plus {
            return format!("+{digits}");
        }
        if digits.len() == 11 && digits.starts_with('8') {
            return format!("+7{}", &digits[1..]);
        }
        if digits.len() == 11 && digits.starts_with('7') {
            return format!("+{digits}");
        }
        format!("+{digits}")
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    async fn send(
        &self,
        recipient: &str,
        _subject: Option<&str>,
        body: &str,
    ) -> Result<String, ChannelError> {
        let Some(cfg) = &self.settings else {
            return Err(ChannelError::terminal(
                "NOT_CONFIGURED",
                "sms channel is not configured",
            ));
        };

        tracing::info!(
            phone = %mask_recipient(recipient, Channel::Sms),
            "Sending SMS"
        );

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            cfg.api_base, cfg.account_sid
        );
        let form = [
            ("To", Self::normalize_phone(recipient)),
            ("From", cfg.from_number.clone()),
            ("Body", body.to_string()),
        ];

        let resp = self
            .client
            .post(&url)
            .basic_auth(&cfg.account_sid, Some(&cfg.auth_token))
            .form(&form)
            .send()
            .await?;
        let status = resp.status();
        let response_body: Value = resp.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            let sid = response_body
                .get("sid")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            tracing::info!(sid = %sid, "SMS accepted by gateway");
            return Ok(sid);
        }

        let gateway_message = response_body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        tracing::warn!(
            status = %status,
            phone = %mask_recipient(recipient, Channel::Sms),
            message = gateway_message,
            "SMS gateway returned error"
        );

        // Only 400 means the request (usually the number) is bad; every
        // other gateway status is worth retrying.
        if status.as_u16() == 400 {
            Err(ChannelError::terminal(
                "INVALID_RECIPIENT",
                format!("HTTP {status}: {gateway_message}"),
            ))
        } else if status.is_server_error() {
            Err(ChannelError::transient(
                "SERVER_ERROR",
                format!("HTTP {status}: {gateway_message}"),
            ))
        } else {
            Err(ChannelError::transient(
                "CLIENT_ERROR",
                format!("HTTP {status}: {gateway_message}"),
            ))
        }
    }

    async fn health_check(&self) -> bool {
        let Some(cfg) = &self.settings else {
            return false;
        };
        let url = format!("{}/2010-04-01/Accounts/{}.json", cfg.api_base, cfg.account_sid);
        match self
            .client
            .get(&url)
            .basic_auth(&cfg.account_sid, Some(&cfg.auth_token))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_configured(&self) -> bool {
        self.settings.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_to_e164() {
        assert_eq!(SmsAdapter::normalize_phone("+7 916 123-45-67"), "+79161234567");
        assert_eq!(SmsAdapter::normalize_phone("89161234567"), "+79161234567");
        assert_eq!(SmsAdapter::normalize_phone("79161234567"), "+79161234567");
        assert_eq!(SmsAdapter::normalize_phone("+14155552671"), "+14155552671");
        assert_eq!(SmsAdapter::normalize_phone("(415) 555-2671"), "+4155552671");
    }
}
