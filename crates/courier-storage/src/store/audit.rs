use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};

use crate::entities::audit_log::{self, Column, Entity};
use crate::store::Store;

/// Audit record. The core only appends; inserts are best-effort and never
/// fail the operation they describe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogRow {
    pub id: String,
    pub client_id: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn model_to_row(m: audit_log::Model) -> AuditLogRow {
    AuditLogRow {
        id: m.id,
        client_id: m.client_id,
        action: m.action,
        entity_type: m.entity_type,
        entity_id: m.entity_id,
        details: m
            .details
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok()),
        ip_address: m.ip_address,
        created_at: m.created_at.with_timezone(&Utc),
    }
}

impl Store {
    pub async fn insert_audit_log(&self, row: &AuditLogRow) -> Result<()> {
        let am = audit_log::ActiveModel {
            id: Set(row.id.clone()),
            client_id: Set(row.client_id.clone()),
            action: Set(row.action.clone()),
            entity_type: Set(row.entity_type.clone()),
            entity_id: Set(row.entity_id.clone()),
            details: Set(row
                .details
                .as_ref()
                .map(|v| serde_json::to_string(v))
                .transpose()?),
            ip_address: Set(row.ip_address.clone()),
            created_at: Set(row.created_at.fixed_offset()),
        };
        am.insert(self.db()).await?;
        Ok(())
    }

    pub async fn list_audit_logs(&self, limit: usize, offset: usize) -> Result<Vec<AuditLogRow>> {
        let rows = Entity::find()
            .order_by(Column::CreatedAt, sea_orm::Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(model_to_row).collect())
    }
}
