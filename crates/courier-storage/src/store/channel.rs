use anyhow::Result;
use chrono::{DateTime, Utc};
use courier_common::types::{Channel, HealthStatus};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};

use crate::entities::channel_config::{self, Column, Entity};
use crate::store::Store;

/// Per-channel configuration singleton row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfigRow {
    pub id: String,
    pub channel: Channel,
    pub enabled: bool,
    pub provider_name: Option<String>,
    /// Opaque credential blob; may be encrypted at rest.
    pub credentials: Option<String>,
    /// Channel-specific settings (JSON object; shape per adapter).
    pub settings: serde_json::Value,
    pub priority: i32,
    pub daily_limit: Option<i64>,
    pub daily_sent_count: i64,
    pub health_status: HealthStatus,
    pub last_health_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn model_to_row(m: channel_config::Model) -> ChannelConfigRow {
    ChannelConfigRow {
        id: m.id,
        channel: m.channel.parse().unwrap_or(Channel::Email),
        enabled: m.enabled,
        provider_name: m.provider_name,
        credentials: m.credentials,
        settings: serde_json::from_str(&m.settings).unwrap_or_else(|_| serde_json::json!({})),
        priority: m.priority,
        daily_limit: m.daily_limit,
        daily_sent_count: m.daily_sent_count,
        health_status: m.health_status.parse().unwrap_or(HealthStatus::Unknown),
        last_health_check: m.last_health_check.map(|t| t.with_timezone(&Utc)),
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl Store {
    pub async fn insert_channel_config(&self, row: &ChannelConfigRow) -> Result<ChannelConfigRow> {
        let now = Utc::now().fixed_offset();
        let am = channel_config::ActiveModel {
            id: Set(row.id.clone()),
            channel: Set(row.channel.to_string()),
            enabled: Set(row.enabled),
            provider_name: Set(row.provider_name.clone()),
            credentials: Set(row.credentials.clone()),
            settings: Set(row.settings.to_string()),
            priority: Set(row.priority),
            daily_limit: Set(row.daily_limit),
            daily_sent_count: Set(row.daily_sent_count),
            health_status: Set(row.health_status.to_string()),
            last_health_check: Set(row.last_health_check.map(|t| t.fixed_offset())),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        Ok(model_to_row(model))
    }

    /// Create or replace the config row for `row.channel`.
    ///
    /// The channel column is unique, so this is how operators supply
    /// provider settings, credentials, and limits after the seeded row
    /// exists. Health fields and timestamps stay store-managed.
    pub async fn upsert_channel_config(&self, row: &ChannelConfigRow) -> Result<ChannelConfigRow> {
        let existing = Entity::find()
            .filter(Column::Channel.eq(row.channel.to_string()))
            .one(self.db())
            .await?;
        let Some(model) = existing else {
            return self.insert_channel_config(row).await;
        };

        let mut am: channel_config::ActiveModel = model.into();
        am.enabled = Set(row.enabled);
        am.provider_name = Set(row.provider_name.clone());
        am.credentials = Set(row.credentials.clone());
        am.settings = Set(row.settings.to_string());
        am.priority = Set(row.priority);
        am.daily_limit = Set(row.daily_limit);
        am.updated_at = Set(Utc::now().fixed_offset());
        let updated = am.update(self.db()).await?;
        Ok(model_to_row(updated))
    }

    pub async fn get_channel_config(&self, channel: Channel) -> Result<Option<ChannelConfigRow>> {
        let model = Entity::find()
            .filter(Column::Channel.eq(channel.to_string()))
            .one(self.db())
            .await?;
        Ok(model.map(model_to_row))
    }

    pub async fn list_channel_configs(&self) -> Result<Vec<ChannelConfigRow>> {
        let rows = Entity::find()
            .order_by(Column::Channel, sea_orm::Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(model_to_row).collect())
    }

    pub async fn update_channel_enabled(&self, channel: Channel, enabled: bool) -> Result<bool> {
        let res = Entity::update_many()
            .col_expr(Column::Enabled, Expr::value(enabled))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Channel.eq(channel.to_string()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// Bump the daily sent counter after a successful provider accept.
    pub async fn increment_daily_sent(&self, channel: Channel) -> Result<()> {
        Entity::update_many()
            .col_expr(
                Column::DailySentCount,
                Expr::col(Column::DailySentCount).add(1),
            )
            .filter(Column::Channel.eq(channel.to_string()))
            .exec(self.db())
            .await?;
        Ok(())
    }

    /// Zero all daily counters. Invoked by the UTC-midnight maintenance
    /// task; the counter column is reserved by the schema regardless.
    pub async fn reset_daily_counts(&self) -> Result<u64> {
        let res = Entity::update_many()
            .col_expr(Column::DailySentCount, Expr::value(0i64))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }

    pub async fn update_channel_health(
        &self,
        channel: Channel,
        status: HealthStatus,
    ) -> Result<()> {
        let now = Utc::now().fixed_offset();
        Entity::update_many()
            .col_expr(Column::HealthStatus, Expr::value(status.to_string()))
            .col_expr(Column::LastHealthCheck, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Channel.eq(channel.to_string()))
            .exec(self.db())
            .await?;
        Ok(())
    }
}
