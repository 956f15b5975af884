use anyhow::Result;
use chrono::{DateTime, Utc};
use courier_common::types::{Channel, NotificationStatus, Priority};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};

use crate::entities::notification::{self, Column, Entity};
use crate::error::StorageError;
use crate::store::Store;

/// Notification data row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRow {
    pub id: String,
    pub client_id: String,
    pub channel: Channel,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub status: NotificationStatus,
    pub priority: Priority,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub provider_message_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub callback_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Filter for admin-style notification listings.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub status_eq: Option<NotificationStatus>,
    pub channel_eq: Option<Channel>,
    pub client_id_eq: Option<String>,
    pub created_gte: Option<DateTime<Utc>>,
    pub created_lte: Option<DateTime<Utc>>,
}

fn model_to_row(m: notification::Model) -> NotificationRow {
    NotificationRow {
        id: m.id,
        client_id: m.client_id,
        channel: m.channel.parse().unwrap_or(Channel::Email),
        recipient: m.recipient,
        subject: m.subject,
        body: m.body,
        status: m.status.parse().unwrap_or(NotificationStatus::Pending),
        priority: Priority::from_rank(m.priority),
        retry_count: m.retry_count,
        max_retries: m.max_retries,
        next_retry_at: m.next_retry_at.map(|t| t.with_timezone(&Utc)),
        error_code: m.error_code,
        error_message: m.error_message,
        provider_message_id: m.provider_message_id,
        idempotency_key: m.idempotency_key,
        callback_url: m.callback_url,
        metadata: m
            .metadata
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok()),
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
        sent_at: m.sent_at.map(|t| t.with_timezone(&Utc)),
        expires_at: m.expires_at.map(|t| t.with_timezone(&Utc)),
    }
}

/// Transitions the dispatcher/scheduler may perform through
/// [`Store::update_notification_status`]. Returning to PENDING goes through
/// `schedule_retry` / `force_retry` / lease release only.
fn transition_allowed(from: NotificationStatus, to: NotificationStatus) -> bool {
    use NotificationStatus::*;
    matches!(
        (from, to),
        (Pending, Sending)
            | (Pending, Expired)
            | (Sending, Sent)
            | (Sending, Failed)
            | (Sending, Expired)
            | (Sent, Delivered)
    )
}

fn apply_filter(
    mut q: sea_orm::Select<Entity>,
    filter: &NotificationFilter,
) -> sea_orm::Select<Entity> {
    if let Some(status) = filter.status_eq {
        q = q.filter(Column::Status.eq(status.to_string()));
    }
    if let Some(channel) = filter.channel_eq {
        q = q.filter(Column::Channel.eq(channel.to_string()));
    }
    if let Some(ref client_id) = filter.client_id_eq {
        q = q.filter(Column::ClientId.eq(client_id.as_str()));
    }
    if let Some(t) = filter.created_gte {
        q = q.filter(Column::CreatedAt.gte(t.fixed_offset()));
    }
    if let Some(t) = filter.created_lte {
        q = q.filter(Column::CreatedAt.lte(t.fixed_offset()));
    }
    q
}

impl Store {
    /// Insert a freshly constructed notification row.
    ///
    /// The partial unique index on `idempotency_key` is the authority for
    /// deduplication: a lost race surfaces as
    /// [`StorageError::DuplicateIdempotency`], and the caller re-reads the
    /// winning row.
    pub async fn insert_notification(&self, row: &NotificationRow) -> Result<NotificationRow> {
        let am = notification::ActiveModel {
            id: Set(row.id.clone()),
            client_id: Set(row.client_id.clone()),
            channel: Set(row.channel.to_string()),
            recipient: Set(row.recipient.clone()),
            subject: Set(row.subject.clone()),
            body: Set(row.body.clone()),
            status: Set(row.status.to_string()),
            priority: Set(row.priority.rank()),
            retry_count: Set(row.retry_count),
            max_retries: Set(row.max_retries),
            next_retry_at: Set(row.next_retry_at.map(|t| t.fixed_offset())),
            error_code: Set(row.error_code.clone()),
            error_message: Set(row.error_message.clone()),
            provider_message_id: Set(row.provider_message_id.clone()),
            idempotency_key: Set(row.idempotency_key.clone()),
            callback_url: Set(row.callback_url.clone()),
            metadata: Set(row
                .metadata
                .as_ref()
                .map(|v| serde_json::to_string(v))
                .transpose()?),
            created_at: Set(row.created_at.fixed_offset()),
            updated_at: Set(row.updated_at.fixed_offset()),
            sent_at: Set(row.sent_at.map(|t| t.fixed_offset())),
            expires_at: Set(row.expires_at.map(|t| t.fixed_offset())),
        };
        match am.insert(self.db()).await {
            Ok(model) => Ok(model_to_row(model)),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("UNIQUE constraint failed")
                    && msg.contains("idempotency_key")
                {
                    Err(StorageError::DuplicateIdempotency {
                        key: row.idempotency_key.clone().unwrap_or_default(),
                    }
                    .into())
                } else {
                    Err(e.into())
                }
            }
        }
    }

    pub async fn find_notification_by_id(&self, id: &str) -> Result<Option<NotificationRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(model_to_row))
    }

    pub async fn find_notification_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<NotificationRow>> {
        let model = Entity::find()
            .filter(Column::IdempotencyKey.eq(key))
            .one(self.db())
            .await?;
        Ok(model.map(model_to_row))
    }

    /// Apply a state-machine transition.
    ///
    /// Sets `sent_at` when entering SENT and clears `next_retry_at` on
    /// every terminal state. The update is conditional on the row still
    /// being in its observed status, so a concurrent transition loses
    /// cleanly instead of clobbering.
    pub async fn update_notification_status(
        &self,
        id: &str,
        new_status: NotificationStatus,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        let Some(model) = model else {
            return Err(StorageError::NotFound {
                entity: "notification",
                id: id.to_string(),
            }
            .into());
        };
        let current: NotificationStatus =
            model.status.parse().unwrap_or(NotificationStatus::Pending);
        if !transition_allowed(current, new_status) {
            return Err(StorageError::InvalidTransition {
                id: id.to_string(),
                from: current.to_string(),
                to: new_status.to_string(),
            }
            .into());
        }

        let now = Utc::now().fixed_offset();
        let mut update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(new_status.to_string()))
            .col_expr(Column::ErrorCode, Expr::value(error_code.map(str::to_string)))
            .col_expr(
                Column::ErrorMessage,
                Expr::value(error_message.map(str::to_string)),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now));
        if new_status == NotificationStatus::Sent {
            update = update.col_expr(Column::SentAt, Expr::value(Some(now)));
        }
        if new_status.is_terminal() {
            update = update.col_expr(
                Column::NextRetryAt,
                Expr::value(None::<chrono::DateTime<chrono::FixedOffset>>),
            );
        }
        let res = update
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(current.to_string()))
            .exec(self.db())
            .await?;
        if res.rows_affected == 0 {
            return Err(StorageError::InvalidTransition {
                id: id.to_string(),
                from: current.to_string(),
                to: new_status.to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub async fn set_provider_message_id(&self, id: &str, pmid: &str) -> Result<()> {
        Entity::update_many()
            .col_expr(
                Column::ProviderMessageId,
                Expr::value(Some(pmid.to_string())),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(self.db())
            .await?;
        Ok(())
    }

    /// Move a SENDING row back to PENDING with a scheduled retry.
    pub async fn schedule_retry(
        &self,
        id: &str,
        new_retry_count: i32,
        next_retry_at: DateTime<Utc>,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()> {
        let res = Entity::update_many()
            .col_expr(
                Column::Status,
                Expr::value(NotificationStatus::Pending.to_string()),
            )
            .col_expr(Column::RetryCount, Expr::value(new_retry_count))
            .col_expr(
                Column::NextRetryAt,
                Expr::value(Some(next_retry_at.fixed_offset())),
            )
            .col_expr(Column::ErrorCode, Expr::value(error_code.map(str::to_string)))
            .col_expr(
                Column::ErrorMessage,
                Expr::value(error_message.map(str::to_string)),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(NotificationStatus::Sending.to_string()))
            .exec(self.db())
            .await?;
        if res.rows_affected == 0 {
            return Err(StorageError::InvalidTransition {
                id: id.to_string(),
                from: "?".to_string(),
                to: NotificationStatus::Pending.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Ingress-side lease: PENDING -> SENDING for exactly one caller.
    ///
    /// Returns `false` when another worker already owns the row (or the
    /// row left PENDING in the meantime).
    pub async fn lease_for_dispatch(&self, id: &str) -> Result<bool> {
        let res = Entity::update_many()
            .col_expr(
                Column::Status,
                Expr::value(NotificationStatus::Sending.to_string()),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(NotificationStatus::Pending.to_string()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// Lease up to `limit` due retries, ordered `priority DESC,
    /// next_retry_at ASC`.
    ///
    /// Each returned row has already been flipped to SENDING by a
    /// conditional update keyed on the observed PENDING status, so two
    /// concurrent sweepers can never both receive the same row.
    pub async fn lease_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<NotificationRow>> {
        let candidates = Entity::find()
            .filter(Column::Status.eq(NotificationStatus::Pending.to_string()))
            .filter(Column::NextRetryAt.is_not_null())
            .filter(Column::NextRetryAt.lte(now.fixed_offset()))
            .filter(
                sea_orm::Condition::any()
                    .add(Column::ExpiresAt.is_null())
                    .add(Column::ExpiresAt.gt(now.fixed_offset())),
            )
            .order_by(Column::Priority, Order::Desc)
            .order_by(Column::NextRetryAt, Order::Asc)
            .limit(limit as u64)
            .all(self.db())
            .await?;

        let mut leased = Vec::with_capacity(candidates.len());
        for model in candidates {
            if self.lease_for_dispatch(&model.id).await? {
                let mut row = model_to_row(model);
                row.status = NotificationStatus::Sending;
                leased.push(row);
            }
        }
        Ok(leased)
    }

    /// Return SENDING rows whose lease expired (worker died mid-attempt)
    /// to PENDING with an immediate retry slot. Called on startup and at
    /// every scheduler tick.
    pub async fn release_stale_leases(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let now = Utc::now();
        // Strictly after updated_at, while still due on the next sweep.
        let retry_slot = now + chrono::Duration::milliseconds(1);
        let res = Entity::update_many()
            .col_expr(
                Column::Status,
                Expr::value(NotificationStatus::Pending.to_string()),
            )
            .col_expr(
                Column::NextRetryAt,
                Expr::value(Some(retry_slot.fixed_offset())),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Status.eq(NotificationStatus::Sending.to_string()))
            .filter(Column::UpdatedAt.lte(cutoff.fixed_offset()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }

    /// Transition expired PENDING/SENDING rows to EXPIRED and return them
    /// so the caller can fire webhooks.
    pub async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<NotificationRow>> {
        let active = [
            NotificationStatus::Pending.to_string(),
            NotificationStatus::Sending.to_string(),
        ];
        let candidates = Entity::find()
            .filter(Column::Status.is_in(active.clone()))
            .filter(Column::ExpiresAt.is_not_null())
            .filter(Column::ExpiresAt.lte(now.fixed_offset()))
            .limit(limit as u64)
            .all(self.db())
            .await?;

        let mut expired = Vec::with_capacity(candidates.len());
        for model in candidates {
            let res = Entity::update_many()
                .col_expr(
                    Column::Status,
                    Expr::value(NotificationStatus::Expired.to_string()),
                )
                .col_expr(Column::ErrorCode, Expr::value(Some("EXPIRED".to_string())))
                .col_expr(
                    Column::NextRetryAt,
                    Expr::value(None::<chrono::DateTime<chrono::FixedOffset>>),
                )
                .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
                .filter(Column::Id.eq(model.id.clone()))
                .filter(Column::Status.is_in(active.clone()))
                .exec(self.db())
                .await?;
            if res.rows_affected == 1 {
                let mut row = model_to_row(model);
                row.status = NotificationStatus::Expired;
                row.error_code = Some("EXPIRED".to_string());
                row.next_retry_at = None;
                expired.push(row);
            }
        }
        Ok(expired)
    }

    /// Administrative reset of a FAILED row: `retry_count = 0`, back to
    /// PENDING with an immediate retry slot, errors cleared. Atomic; the
    /// only permitted exit from a terminal state.
    pub async fn force_retry(&self, id: &str) -> Result<bool> {
        let now = Utc::now();
        // Strictly after updated_at, while still due on the next sweep.
        let retry_slot = now + chrono::Duration::milliseconds(1);
        let res = Entity::update_many()
            .col_expr(
                Column::Status,
                Expr::value(NotificationStatus::Pending.to_string()),
            )
            .col_expr(Column::RetryCount, Expr::value(0))
            .col_expr(
                Column::NextRetryAt,
                Expr::value(Some(retry_slot.fixed_offset())),
            )
            .col_expr(Column::ErrorCode, Expr::value(None::<String>))
            .col_expr(Column::ErrorMessage, Expr::value(None::<String>))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(NotificationStatus::Failed.to_string()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected == 1)
    }

    pub async fn list_notifications(
        &self,
        filter: &NotificationFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NotificationRow>> {
        let rows = apply_filter(Entity::find(), filter)
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(model_to_row).collect())
    }

    pub async fn count_notifications(&self, filter: &NotificationFilter) -> Result<u64> {
        Ok(apply_filter(Entity::find(), filter)
            .count(self.db())
            .await?)
    }

    pub async fn count_by_status(&self, status: NotificationStatus) -> Result<u64> {
        Ok(Entity::find()
            .filter(Column::Status.eq(status.to_string()))
            .count(self.db())
            .await?)
    }

    /// Number of PENDING rows whose retry is already due (metrics surface).
    pub async fn count_due_retries(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(Entity::find()
            .filter(Column::Status.eq(NotificationStatus::Pending.to_string()))
            .filter(Column::NextRetryAt.is_not_null())
            .filter(Column::NextRetryAt.lte(now.fixed_offset()))
            .count(self.db())
            .await?)
    }
}
