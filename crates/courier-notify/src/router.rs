use courier_common::types::{Channel, HealthStatus};
use courier_storage::{ChannelConfigRow, Store};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::channels::email::EmailAdapter;
use crate::channels::sms::SmsAdapter;
use crate::channels::telegram::TelegramAdapter;
use crate::channels::whatsapp::WhatsAppAdapter;
use crate::ChannelAdapter;

/// Outcome of a routed send, flattened for the dispatcher's state machine.
#[derive(Debug, Clone)]
pub struct SendResult {
    pub ok: bool,
    pub provider_message_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retryable: bool,
    /// The channel that actually delivered; differs from the requested
    /// channel after a successful fallback.
    pub used_channel: Option<Channel>,
}

impl SendResult {
    fn success(provider_message_id: Option<String>, used_channel: Channel) -> Self {
        Self {
            ok: true,
            provider_message_id,
            error_code: None,
            error_message: None,
            retryable: false,
            used_channel: Some(used_channel),
        }
    }

    fn failure(code: &str, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            ok: false,
            provider_message_id: None,
            error_code: Some(code.to_string()),
            error_message: Some(message.into()),
            retryable,
            used_channel: None,
        }
    }
}

/// Enabled/configured snapshot of one registered adapter (health surface).
#[derive(Debug, Clone)]
pub struct ChannelStatus {
    pub channel: Channel,
    pub enabled: bool,
    pub configured: bool,
}

/// Registry over channel adapters with fallback-chain orchestration.
///
/// The adapter map is immutable between reloads; `reload()` rebuilds every
/// adapter from its `channel_configs` row and swaps the whole map in one
/// write (build-then-swap).
pub struct ChannelRouter {
    adapters: RwLock<HashMap<Channel, Arc<dyn ChannelAdapter>>>,
    store: Arc<Store>,
}

impl ChannelRouter {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Rebuild all adapters from their persisted channel configs.
    pub async fn reload(&self) -> anyhow::Result<()> {
        let configs = self.store.list_channel_configs().await?;
        let mut new_adapters: HashMap<Channel, Arc<dyn ChannelAdapter>> = HashMap::new();
        for row in &configs {
            let adapter = Self::build_adapter(row);
            tracing::info!(
                channel = %row.channel,
                enabled = row.enabled,
                configured = adapter.is_configured(),
                "Loaded channel adapter"
            );
            new_adapters.insert(row.channel, adapter);
        }

        let count = new_adapters.len();
        {
            let mut guard = self.adapters.write().await;
            *guard = new_adapters;
        }
        tracing::info!(count, "Channel adapters reloaded");
        Ok(())
    }

    fn build_adapter(row: &ChannelConfigRow) -> Arc<dyn ChannelAdapter> {
        match row.channel {
            Channel::Email => Arc::new(EmailAdapter::from_config(row)),
            Channel::Telegram => Arc::new(TelegramAdapter::from_config(row)),
            Channel::Sms => Arc::new(SmsAdapter::from_config(row)),
            Channel::Whatsapp => Arc::new(WhatsAppAdapter::from_config(row)),
        }
    }

    /// Register an adapter directly, bypassing config construction.
    pub async fn install(&self, adapter: Arc<dyn ChannelAdapter>) {
        let mut guard = self.adapters.write().await;
        guard.insert(adapter.channel(), adapter);
    }

    pub async fn adapter(&self, channel: Channel) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.read().await.get(&channel).cloned()
    }

    /// Default fallback chain: EMAIL<->SMS, TELEGRAM->EMAIL,
    /// WHATSAPP->TELEGRAM.
    pub fn default_fallback(channel: Channel) -> Option<Channel> {
        match channel {
            Channel::Email => Some(Channel::Sms),
            Channel::Sms => Some(Channel::Email),
            Channel::Telegram => Some(Channel::Email),
            Channel::Whatsapp => Some(Channel::Telegram),
        }
    }

    /// Send through a single channel; registry and config gating happen
    /// here, wire errors come back classified from the adapter.
    pub async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> SendResult {
        let Some(adapter) = self.adapter(channel).await else {
            return SendResult::failure(
                "UNKNOWN_CHANNEL",
                format!("unknown channel: {channel}"),
                false,
            );
        };

        if !adapter.is_enabled() {
            return SendResult::failure(
                "CHANNEL_DISABLED",
                format!("channel disabled: {channel}"),
                false,
            );
        }

        if let Err(result) = self.check_daily_limit(channel).await {
            return result;
        }

        match adapter.send(recipient, subject, body).await {
            Ok(provider_message_id) => {
                if let Err(e) = self.store.increment_daily_sent(channel).await {
                    tracing::warn!(channel = %channel, error = %e, "Failed to bump daily counter");
                }
                let pmid = if provider_message_id.is_empty() {
                    None
                } else {
                    Some(provider_message_id)
                };
                SendResult::success(pmid, channel)
            }
            Err(e) => {
                tracing::warn!(
                    channel = %channel,
                    code = %e.code,
                    retryable = e.retryable,
                    "Channel send failed"
                );
                SendResult::failure(&e.code, e.message, e.retryable)
            }
        }
    }

    async fn check_daily_limit(&self, channel: Channel) -> Result<(), SendResult> {
        let config = match self.store.get_channel_config(channel).await {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "Failed to read channel config");
                return Ok(());
            }
        };
        if let Some(cfg) = config {
            if let Some(limit) = cfg.daily_limit {
                if cfg.daily_sent_count >= limit {
                    return Err(SendResult::failure(
                        "DAILY_LIMIT_EXCEEDED",
                        format!("daily limit of {limit} reached for {channel}"),
                        false,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Attempt `primary`; on a *retryable* failure try `fallback`.
    ///
    /// Terminal primary failures (bad recipient, disabled channel) never
    /// cascade: sending to a fallback after a validation error is wrong.
    /// When the fallback also fails, the primary result is returned so the
    /// requested channel keeps driving the retry classification.
    pub async fn send_with_fallback(
        &self,
        primary: Channel,
        fallback: Option<Channel>,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> SendResult {
        let result = self.send(primary, recipient, subject, body).await;
        if result.ok || !result.retryable {
            return result;
        }

        let Some(fallback) = fallback else {
            return result;
        };

        tracing::info!(
            primary = %primary,
            fallback = %fallback,
            "Primary channel failed, trying fallback"
        );
        let fallback_result = self.send(fallback, recipient, subject, body).await;
        if fallback_result.ok {
            fallback_result
        } else {
            result
        }
    }

    /// Ping every registered adapter and record the outcome on the channel
    /// config row. Unconfigured WhatsApp is left out of the rollup.
    pub async fn health_check_all(&self) -> HashMap<Channel, bool> {
        let adapters: Vec<Arc<dyn ChannelAdapter>> =
            self.adapters.read().await.values().cloned().collect();
        let mut results = HashMap::new();
        for adapter in adapters {
            if adapter.channel() == Channel::Whatsapp && !adapter.is_configured() {
                continue;
            }
            let healthy = adapter.health_check().await;
            let status = if healthy {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            };
            if let Err(e) = self
                .store
                .update_channel_health(adapter.channel(), status)
                .await
            {
                tracing::warn!(channel = %adapter.channel(), error = %e, "Failed to record channel health");
            }
            results.insert(adapter.channel(), healthy);
        }
        results
    }

    /// Enabled/configured snapshot for the health endpoint.
    pub async fn snapshot(&self) -> Vec<ChannelStatus> {
        let guard = self.adapters.read().await;
        let mut statuses: Vec<ChannelStatus> = guard
            .values()
            .map(|a| ChannelStatus {
                channel: a.channel(),
                enabled: a.is_enabled(),
                configured: a.is_configured(),
            })
            .collect();
        statuses.sort_by_key(|s| s.channel.to_string());
        statuses
    }
}
