use anyhow::Result;
use chrono::{DateTime, Utc};
use courier_common::types::Channel;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};

use crate::entities::api_client::{self, Column, Entity};
use crate::store::Store;

/// API client data row. The plaintext key never touches storage; only the
/// SHA-256 hex digest and a short display prefix are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiClientRow {
    pub id: String,
    pub name: String,
    pub api_key_hash: String,
    pub api_key_prefix: String,
    pub active: bool,
    pub rate_limit: Option<i32>,
    /// Channels this client may submit to; empty means all.
    pub allowed_channels: Vec<Channel>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiClientRow {
    pub fn channel_allowed(&self, channel: Channel) -> bool {
        self.allowed_channels.is_empty() || self.allowed_channels.contains(&channel)
    }
}

fn model_to_row(m: api_client::Model) -> ApiClientRow {
    let allowed_channels: Vec<Channel> = serde_json::from_str::<Vec<String>>(&m.allowed_channels)
        .unwrap_or_default()
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();
    ApiClientRow {
        id: m.id,
        name: m.name,
        api_key_hash: m.api_key_hash,
        api_key_prefix: m.api_key_prefix,
        active: m.active,
        rate_limit: m.rate_limit,
        allowed_channels,
        created_at: m.created_at.with_timezone(&Utc),
        last_used_at: m.last_used_at.map(|t| t.with_timezone(&Utc)),
    }
}

impl Store {
    pub async fn insert_api_client(&self, row: &ApiClientRow) -> Result<ApiClientRow> {
        let allowed: Vec<String> = row
            .allowed_channels
            .iter()
            .map(|c| c.to_string())
            .collect();
        let am = api_client::ActiveModel {
            id: Set(row.id.clone()),
            name: Set(row.name.clone()),
            api_key_hash: Set(row.api_key_hash.clone()),
            api_key_prefix: Set(row.api_key_prefix.clone()),
            active: Set(row.active),
            rate_limit: Set(row.rate_limit),
            allowed_channels: Set(serde_json::to_string(&allowed)?),
            created_at: Set(row.created_at.fixed_offset()),
            last_used_at: Set(row.last_used_at.map(|t| t.fixed_offset())),
        };
        let model = am.insert(self.db()).await?;
        Ok(model_to_row(model))
    }

    pub async fn find_client_by_api_key_hash(&self, hash: &str) -> Result<Option<ApiClientRow>> {
        let model = Entity::find()
            .filter(Column::ApiKeyHash.eq(hash))
            .one(self.db())
            .await?;
        Ok(model.map(model_to_row))
    }

    /// Best-effort bump of `last_used_at`; callers log and ignore failures.
    pub async fn touch_client_last_used(&self, id: &str) -> Result<()> {
        Entity::update_many()
            .col_expr(
                Column::LastUsedAt,
                Expr::value(Some(Utc::now().fixed_offset())),
            )
            .filter(Column::Id.eq(id))
            .exec(self.db())
            .await?;
        Ok(())
    }

    pub async fn count_clients(&self) -> Result<u64> {
        Ok(Entity::find().count(self.db()).await?)
    }
}
