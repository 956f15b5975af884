use chrono::Utc;
use courier_common::id::next_id;
use courier_common::types::{Channel, HealthStatus};
use courier_storage::{ChannelConfigRow, Store};

/// Seed one disabled config row per channel when the table is empty, so
/// every adapter has a registration surface from first boot. Operators
/// enable channels and supply settings afterwards.
pub async fn init_default_channels(store: &Store) -> anyhow::Result<()> {
    let existing = store.list_channel_configs().await?;
    if !existing.is_empty() {
        return Ok(());
    }

    for channel in Channel::ALL {
        let row = ChannelConfigRow {
            id: next_id(),
            channel,
            enabled: false,
            provider_name: Some(default_provider(channel).to_string()),
            credentials: None,
            settings: serde_json::json!({}),
            priority: 0,
            daily_limit: None,
            daily_sent_count: 0,
            health_status: HealthStatus::Unknown,
            last_health_check: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        match store.insert_channel_config(&row).await {
            Ok(_) => tracing::info!(channel = %channel, "Seeded default channel config"),
            Err(e) => tracing::error!(channel = %channel, error = %e, "Failed to seed channel config"),
        }
    }
    Ok(())
}

fn default_provider(channel: Channel) -> &'static str {
    match channel {
        Channel::Email => "smtp",
        Channel::Telegram => "telegram-bot",
        Channel::Sms => "twilio",
        Channel::Whatsapp => "whatsapp-business",
    }
}
