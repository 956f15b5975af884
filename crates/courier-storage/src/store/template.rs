use anyhow::Result;
use chrono::{DateTime, Utc};
use courier_common::types::Channel;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};

use crate::entities::message_template::{self, Column, Entity};
use crate::store::Store;

/// Message template data row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplateRow {
    pub id: String,
    pub code: String,
    pub name: String,
    pub channel: Channel,
    pub subject_template: Option<String>,
    pub body_template: String,
    /// Ordered list of variable names required for rendering.
    pub variables: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn model_to_row(m: message_template::Model) -> MessageTemplateRow {
    MessageTemplateRow {
        id: m.id,
        code: m.code,
        name: m.name,
        channel: m.channel.parse().unwrap_or(Channel::Email),
        subject_template: m.subject_template,
        body_template: m.body_template,
        variables: serde_json::from_str(&m.variables).unwrap_or_default(),
        active: m.active,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl Store {
    pub async fn insert_template(&self, row: &MessageTemplateRow) -> Result<MessageTemplateRow> {
        let now = Utc::now().fixed_offset();
        let am = message_template::ActiveModel {
            id: Set(row.id.clone()),
            code: Set(row.code.clone()),
            name: Set(row.name.clone()),
            channel: Set(row.channel.to_string()),
            subject_template: Set(row.subject_template.clone()),
            body_template: Set(row.body_template.clone()),
            variables: Set(serde_json::to_string(&row.variables)?),
            active: Set(row.active),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        Ok(model_to_row(model))
    }

    /// Look up the active template for `(code, channel)`.
    pub async fn find_active_template(
        &self,
        code: &str,
        channel: Channel,
    ) -> Result<Option<MessageTemplateRow>> {
        let model = Entity::find()
            .filter(Column::Code.eq(code))
            .filter(Column::Channel.eq(channel.to_string()))
            .filter(Column::Active.eq(true))
            .one(self.db())
            .await?;
        Ok(model.map(model_to_row))
    }
}
