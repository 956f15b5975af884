use chrono::{Duration, Utc};
use courier_common::id::next_id;
use courier_common::types::{Channel, NotificationStatus, Priority};
use tempfile::TempDir;

use crate::error::StorageError;
use crate::store::{ApiClientRow, NotificationRow, Store};

async fn open_store() -> (Store, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path()).await.unwrap();
    (store, dir)
}

async fn seed_client(store: &Store) -> ApiClientRow {
    store
        .insert_api_client(&ApiClientRow {
            id: next_id(),
            name: "test-client".to_string(),
            api_key_hash: "deadbeef".repeat(8),
            api_key_prefix: "deadbeef".to_string(),
            active: true,
            rate_limit: Some(100),
            allowed_channels: vec![],
            created_at: Utc::now(),
            last_used_at: None,
        })
        .await
        .unwrap()
}

fn pending_row(client_id: &str, channel: Channel) -> NotificationRow {
    let now = Utc::now();
    NotificationRow {
        id: next_id(),
        client_id: client_id.to_string(),
        channel,
        recipient: "user@example.com".to_string(),
        subject: Some("Hi".to_string()),
        body: "Hello".to_string(),
        status: NotificationStatus::Pending,
        priority: Priority::Normal,
        retry_count: 0,
        max_retries: 5,
        next_retry_at: None,
        error_code: None,
        error_message: None,
        provider_message_id: None,
        idempotency_key: None,
        callback_url: None,
        metadata: None,
        created_at: now,
        updated_at: now,
        sent_at: None,
        expires_at: Some(now + Duration::hours(24)),
    }
}

#[tokio::test]
async fn insert_and_find_roundtrip() {
    let (store, _dir) = open_store().await;
    let client = seed_client(&store).await;

    let mut row = pending_row(&client.id, Channel::Email);
    row.metadata = Some(serde_json::json!({"order": "12345"}));
    let inserted = store.insert_notification(&row).await.unwrap();

    let found = store
        .find_notification_by_id(&inserted.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.status, NotificationStatus::Pending);
    assert_eq!(found.channel, Channel::Email);
    assert_eq!(found.metadata, Some(serde_json::json!({"order": "12345"})));
    assert_eq!(found.retry_count, 0);
}

#[tokio::test]
async fn duplicate_idempotency_key_is_rejected() {
    let (store, _dir) = open_store().await;
    let client = seed_client(&store).await;

    let mut first = pending_row(&client.id, Channel::Email);
    first.idempotency_key = Some("abc-123".to_string());
    store.insert_notification(&first).await.unwrap();

    let mut second = pending_row(&client.id, Channel::Email);
    second.idempotency_key = Some("abc-123".to_string());
    let err = store.insert_notification(&second).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StorageError>(),
        Some(StorageError::DuplicateIdempotency { .. })
    ));

    // Exactly one row persisted; the key resolves to the first id.
    let found = store
        .find_notification_by_idempotency_key("abc-123")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, first.id);
}

#[tokio::test]
async fn rows_without_keys_do_not_collide() {
    let (store, _dir) = open_store().await;
    let client = seed_client(&store).await;

    store
        .insert_notification(&pending_row(&client.id, Channel::Email))
        .await
        .unwrap();
    store
        .insert_notification(&pending_row(&client.id, Channel::Email))
        .await
        .unwrap();
}

#[tokio::test]
async fn sent_transition_sets_sent_at_and_clears_retry() {
    let (store, _dir) = open_store().await;
    let client = seed_client(&store).await;
    let row = store
        .insert_notification(&pending_row(&client.id, Channel::Email))
        .await
        .unwrap();

    assert!(store.lease_for_dispatch(&row.id).await.unwrap());
    store
        .update_notification_status(&row.id, NotificationStatus::Sent, None, None)
        .await
        .unwrap();

    let found = store
        .find_notification_by_id(&row.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.status, NotificationStatus::Sent);
    assert!(found.sent_at.is_some());
    assert!(found.sent_at.unwrap() >= found.created_at);
    assert!(found.next_retry_at.is_none());
}

#[tokio::test]
async fn terminal_states_reject_further_transitions() {
    let (store, _dir) = open_store().await;
    let client = seed_client(&store).await;
    let row = store
        .insert_notification(&pending_row(&client.id, Channel::Email))
        .await
        .unwrap();

    assert!(store.lease_for_dispatch(&row.id).await.unwrap());
    store
        .update_notification_status(&row.id, NotificationStatus::Failed, Some("SMTP_ERROR"), None)
        .await
        .unwrap();

    // FAILED -> SENT is not a legal transition.
    let err = store
        .update_notification_status(&row.id, NotificationStatus::Sent, None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StorageError>(),
        Some(StorageError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn lease_is_exclusive() {
    let (store, _dir) = open_store().await;
    let client = seed_client(&store).await;
    let row = store
        .insert_notification(&pending_row(&client.id, Channel::Email))
        .await
        .unwrap();

    assert!(store.lease_for_dispatch(&row.id).await.unwrap());
    // Second lease on the same row must lose.
    assert!(!store.lease_for_dispatch(&row.id).await.unwrap());
}

#[tokio::test]
async fn due_retries_are_leased_in_priority_order() {
    let (store, _dir) = open_store().await;
    let client = seed_client(&store).await;
    let now = Utc::now();

    let mut low = pending_row(&client.id, Channel::Email);
    low.priority = Priority::Low;
    let mut high = pending_row(&client.id, Channel::Email);
    high.priority = Priority::High;
    let low = store.insert_notification(&low).await.unwrap();
    let high = store.insert_notification(&high).await.unwrap();

    for id in [&low.id, &high.id] {
        assert!(store.lease_for_dispatch(id).await.unwrap());
        store
            .schedule_retry(id, 1, now - Duration::seconds(30), Some("SMTP_ERROR"), None)
            .await
            .unwrap();
    }

    let batch = store.lease_due_retries(now, 10).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].id, high.id);
    assert_eq!(batch[1].id, low.id);
    for row in &batch {
        assert_eq!(row.status, NotificationStatus::Sending);
    }

    // Already leased: a second sweep gets nothing.
    let again = store.lease_due_retries(now, 10).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn future_retries_are_not_due() {
    let (store, _dir) = open_store().await;
    let client = seed_client(&store).await;
    let now = Utc::now();

    let row = store
        .insert_notification(&pending_row(&client.id, Channel::Email))
        .await
        .unwrap();
    assert!(store.lease_for_dispatch(&row.id).await.unwrap());
    store
        .schedule_retry(&row.id, 1, now + Duration::minutes(5), Some("SMTP_ERROR"), None)
        .await
        .unwrap();

    assert!(store.lease_due_retries(now, 10).await.unwrap().is_empty());
    let later = now + Duration::minutes(6);
    assert_eq!(store.lease_due_retries(later, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn expired_rows_are_swept_not_leased() {
    let (store, _dir) = open_store().await;
    let client = seed_client(&store).await;
    let now = Utc::now();

    let mut row = pending_row(&client.id, Channel::Email);
    row.expires_at = Some(now - Duration::minutes(1));
    row.next_retry_at = Some(now - Duration::minutes(10));
    let row = store.insert_notification(&row).await.unwrap();

    // Never handed to a worker once past expires_at.
    assert!(store.lease_due_retries(now, 10).await.unwrap().is_empty());

    let swept = store.sweep_expired(now, 100).await.unwrap();
    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].id, row.id);
    assert_eq!(swept[0].status, NotificationStatus::Expired);

    let found = store
        .find_notification_by_id(&row.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.status, NotificationStatus::Expired);
    assert_eq!(found.error_code.as_deref(), Some("EXPIRED"));
    assert!(found.next_retry_at.is_none());

    // Sweeping again is a no-op.
    assert!(store.sweep_expired(now, 100).await.unwrap().is_empty());
}

#[tokio::test]
async fn stale_leases_are_released() {
    let (store, _dir) = open_store().await;
    let client = seed_client(&store).await;
    let row = store
        .insert_notification(&pending_row(&client.id, Channel::Email))
        .await
        .unwrap();
    assert!(store.lease_for_dispatch(&row.id).await.unwrap());

    // Cutoff in the future covers the just-updated row.
    let released = store
        .release_stale_leases(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(released, 1);

    let found = store
        .find_notification_by_id(&row.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.status, NotificationStatus::Pending);
    assert!(found.next_retry_at.unwrap() > found.updated_at);
}

#[tokio::test]
async fn force_retry_resets_failed_rows_only() {
    let (store, _dir) = open_store().await;
    let client = seed_client(&store).await;
    let row = store
        .insert_notification(&pending_row(&client.id, Channel::Email))
        .await
        .unwrap();

    // Not failed yet.
    assert!(!store.force_retry(&row.id).await.unwrap());

    assert!(store.lease_for_dispatch(&row.id).await.unwrap());
    store
        .update_notification_status(
            &row.id,
            NotificationStatus::Failed,
            Some("INVALID_RECIPIENT"),
            Some("bad address"),
        )
        .await
        .unwrap();

    assert!(store.force_retry(&row.id).await.unwrap());
    let found = store
        .find_notification_by_id(&row.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.status, NotificationStatus::Pending);
    assert_eq!(found.retry_count, 0);
    assert!(found.error_code.is_none());
    assert!(found.error_message.is_none());
    assert!(found.next_retry_at.unwrap() > found.updated_at);
}

#[tokio::test]
async fn client_allowed_channels() {
    let (store, _dir) = open_store().await;
    let row = store
        .insert_api_client(&ApiClientRow {
            id: next_id(),
            name: "email-only".to_string(),
            api_key_hash: "cafebabe".repeat(8),
            api_key_prefix: "cafebabe".to_string(),
            active: true,
            rate_limit: None,
            allowed_channels: vec![Channel::Email],
            created_at: Utc::now(),
            last_used_at: None,
        })
        .await
        .unwrap();

    let found = store
        .find_client_by_api_key_hash(&row.api_key_hash)
        .await
        .unwrap()
        .unwrap();
    assert!(found.channel_allowed(Channel::Email));
    assert!(!found.channel_allowed(Channel::Sms));

    let unrestricted = seed_client(&store).await;
    assert!(unrestricted.channel_allowed(Channel::Whatsapp));
}

#[tokio::test]
async fn daily_counter_increments_and_resets() {
    let (store, _dir) = open_store().await;
    store
        .insert_channel_config(&crate::store::ChannelConfigRow {
            id: next_id(),
            channel: Channel::Sms,
            enabled: true,
            provider_name: Some("twilio".to_string()),
            credentials: None,
            settings: serde_json::json!({}),
            priority: 0,
            daily_limit: Some(100),
            daily_sent_count: 0,
            health_status: courier_common::types::HealthStatus::Unknown,
            last_health_check: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    store.increment_daily_sent(Channel::Sms).await.unwrap();
    store.increment_daily_sent(Channel::Sms).await.unwrap();
    let cfg = store
        .get_channel_config(Channel::Sms)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cfg.daily_sent_count, 2);

    store.reset_daily_counts().await.unwrap();
    let cfg = store
        .get_channel_config(Channel::Sms)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cfg.daily_sent_count, 0);
}

#[tokio::test]
async fn listing_filters_by_status_and_channel() {
    let (store, _dir) = open_store().await;
    let client = seed_client(&store).await;

    let email = store
        .insert_notification(&pending_row(&client.id, Channel::Email))
        .await
        .unwrap();
    let mut sms = pending_row(&client.id, Channel::Sms);
    sms.recipient = "+79161234567".to_string();
    let sms = store.insert_notification(&sms).await.unwrap();

    assert!(store.lease_for_dispatch(&email.id).await.unwrap());
    store
        .update_notification_status(&email.id, NotificationStatus::Sent, None, None)
        .await
        .unwrap();

    let sent = store
        .list_notifications(
            &crate::store::NotificationFilter {
                status_eq: Some(NotificationStatus::Sent),
                ..Default::default()
            },
            20,
            0,
        )
        .await
        .unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, email.id);

    let sms_rows = store
        .list_notifications(
            &crate::store::NotificationFilter {
                channel_eq: Some(Channel::Sms),
                ..Default::default()
            },
            20,
            0,
        )
        .await
        .unwrap();
    assert_eq!(sms_rows.len(), 1);
    assert_eq!(sms_rows[0].id, sms.id);

    let total = store
        .count_notifications(&Default::default())
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(
        store
            .count_by_status(NotificationStatus::Sent)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn upsert_channel_config_replaces_seeded_settings() {
    let (store, _dir) = open_store().await;
    let seeded = store
        .insert_channel_config(&crate::store::ChannelConfigRow {
            id: next_id(),
            channel: Channel::Email,
            enabled: false,
            provider_name: Some("smtp".to_string()),
            credentials: None,
            settings: serde_json::json!({}),
            priority: 0,
            daily_limit: None,
            daily_sent_count: 0,
            health_status: courier_common::types::HealthStatus::Unknown,
            last_health_check: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    // Same channel, new settings: the seeded row is updated in place.
    let updated = store
        .upsert_channel_config(&crate::store::ChannelConfigRow {
            enabled: true,
            credentials: Some("smtp-credential-blob".to_string()),
            settings: serde_json::json!({
                "smtp_host": "smtp.example.com",
                "smtp_port": 587,
                "from": "noreply@example.com"
            }),
            daily_limit: Some(1000),
            ..seeded.clone()
        })
        .await
        .unwrap();
    assert_eq!(updated.id, seeded.id);
    assert!(updated.enabled);
    assert_eq!(updated.settings["smtp_host"], "smtp.example.com");
    assert_eq!(updated.daily_limit, Some(1000));
    assert_eq!(
        updated.credentials.as_deref(),
        Some("smtp-credential-blob")
    );

    let fetched = store
        .get_channel_config(Channel::Email)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.settings["from"], "noreply@example.com");

    // A channel with no row yet is inserted.
    let inserted = store
        .upsert_channel_config(&crate::store::ChannelConfigRow {
            id: next_id(),
            channel: Channel::Telegram,
            enabled: true,
            provider_name: Some("telegram-bot".to_string()),
            credentials: None,
            settings: serde_json::json!({"bot_token": "123:abc"}),
            priority: 0,
            daily_limit: None,
            daily_sent_count: 0,
            health_status: courier_common::types::HealthStatus::Unknown,
            last_health_check: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();
    assert_eq!(inserted.channel, Channel::Telegram);
    assert!(store
        .get_channel_config(Channel::Telegram)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn channel_enable_toggle_round_trips() {
    let (store, _dir) = open_store().await;
    store
        .insert_channel_config(&crate::store::ChannelConfigRow {
            id: next_id(),
            channel: Channel::Email,
            enabled: false,
            provider_name: Some("smtp".to_string()),
            credentials: None,
            settings: serde_json::json!({}),
            priority: 0,
            daily_limit: None,
            daily_sent_count: 0,
            health_status: courier_common::types::HealthStatus::Unknown,
            last_health_check: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    assert!(store.update_channel_enabled(Channel::Email, true).await.unwrap());
    let cfg = store
        .get_channel_config(Channel::Email)
        .await
        .unwrap()
        .unwrap();
    assert!(cfg.enabled);

    // No row for this channel yet.
    assert!(!store.update_channel_enabled(Channel::Sms, true).await.unwrap());
}

#[tokio::test]
async fn audit_records_append_and_list() {
    let (store, _dir) = open_store().await;
    let client = seed_client(&store).await;

    store
        .insert_audit_log(&crate::store::AuditLogRow {
            id: next_id(),
            client_id: Some(client.id.clone()),
            action: "SEND_NOTIFICATION".to_string(),
            entity_type: "notification".to_string(),
            entity_id: Some("n-1".to_string()),
            details: Some(serde_json::json!({"channel": "EMAIL"})),
            ip_address: Some("10.0.0.1".to_string()),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let logs = store.list_audit_logs(10, 0).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "SEND_NOTIFICATION");
    assert_eq!(logs[0].details.as_ref().unwrap()["channel"], "EMAIL");
}

#[tokio::test]
async fn active_template_lookup_respects_channel_and_flag() {
    let (store, _dir) = open_store().await;
    store
        .insert_template(&crate::store::MessageTemplateRow {
            id: next_id(),
            code: "order-confirmation".to_string(),
            name: "Order confirmation".to_string(),
            channel: Channel::Email,
            subject_template: Some("Order {{order_id}}".to_string()),
            body_template: "Hello {{name}}, order {{order_id}} confirmed.".to_string(),
            variables: vec!["name".to_string(), "order_id".to_string()],
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    assert!(store
        .find_active_template("order-confirmation", Channel::Email)
        .await
        .unwrap()
        .is_some());
    assert!(store
        .find_active_template("order-confirmation", Channel::Sms)
        .await
        .unwrap()
        .is_none());
    assert!(store
        .find_active_template("missing-code", Channel::Email)
        .await
        .unwrap()
        .is_none());
}
