mod common;

use chrono::{Duration, Utc};
use common::{MockAdapter, TestApp};
use courier_common::types::{Channel, NotificationStatus, Priority};
use courier_notify::error::ChannelError;
use courier_server::api::SendRequest;
use courier_storage::NotificationRow;

fn email_request() -> SendRequest {
    SendRequest {
        channel: "EMAIL".to_string(),
        recipient: "user@example.com".to_string(),
        subject: Some("Hi".to_string()),
        message: Some("Hello".to_string()),
        template_code: None,
        template_variables: None,
        priority: None,
        idempotency_key: None,
        callback_url: None,
        metadata: None,
    }
}

fn pending_row(client_id: &str) -> NotificationRow {
    let now = Utc::now();
    NotificationRow {
        id: courier_common::id::next_id(),
        client_id: client_id.to_string(),
        channel: Channel::Email,
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

/// Poll until the stored row satisfies `pred`.
async fn wait_until<F>(app: &TestApp, id: &str, pred: F) -> NotificationRow
where
    F: Fn(&NotificationRow) -> bool,
{
    for _ in 0..200 {
        if let Ok(Some(row)) = app.store.find_notification_by_id(id).await {
            if pred(&row) {
                return row;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("notification {id} never reached the expected state");
}

#[tokio::test]
async fn transient_failure_schedules_backoff_then_succeeds() {
    let app = TestApp::new().await;
    let email = MockAdapter::scripted(
        Channel::Email,
        vec![
            Err(ChannelError::transient("SMTP_ERROR", "relay down")),
            Ok("mid-1".to_string()),
        ],
    );
    // No SMS adapter installed: the EMAIL->SMS fallback hits
    // UNKNOWN_CHANNEL and the primary classification is kept.
    app.router.install(email.clone()).await;

    let before = Utc::now();
    let row = app
        .dispatcher
        .submit(email_request(), &app.client, None)
        .await
        .unwrap();

    let pending = wait_until(&app, &row.id, |r| {
        r.status == NotificationStatus::Pending && r.retry_count == 1
    })
    .await;
    assert_eq!(pending.error_code.as_deref(), Some("SMTP_ERROR"));
    let next_retry_at = pending.next_retry_at.expect("retry must be scheduled");
    let delay = next_retry_at - before;
    assert!(
        delay >= Duration::seconds(55) && delay <= Duration::seconds(70),
        "first retry should land about a minute out, got {delay}"
    );

    // Advance the clock past the slot: the sweeper leases the row and the
    // second attempt succeeds.
    let later = next_retry_at + Duration::seconds(1);
    let batch = app.store.lease_due_retries(later, 10).await.unwrap();
    assert_eq!(batch.len(), 1);
    app.dispatcher.deliver(&row.id, true).await;

    let sent = wait_until(&app, &row.id, |r| r.status == NotificationStatus::Sent).await;
    assert_eq!(sent.retry_count, 1, "retry count persists after success");
    assert_eq!(sent.provider_message_id.as_deref(), Some("mid-1"));
    assert!(sent.next_retry_at.is_none());
    assert_eq!(email.call_count(), 2);
}

#[tokio::test]
async fn terminal_failure_goes_straight_to_failed_without_fallback() {
    let app = TestApp::new().await;
    let email = MockAdapter::scripted(
        Channel::Email,
        vec![Err(ChannelError::terminal("INVALID_RECIPIENT", "mailbox gone"))],
    );
    let sms = MockAdapter::ok(Channel::Sms);
    app.router.install(email.clone()).await;
    app.router.install(sms.clone()).await;

    let row = app
        .dispatcher
        .submit(email_request(), &app.client, None)
        .await
        .unwrap();
    let failed = wait_until(&app, &row.id, |r| r.status == NotificationStatus::Failed).await;

    assert_eq!(failed.error_code.as_deref(), Some("INVALID_RECIPIENT"));
    assert_eq!(failed.retry_count, 0, "terminal errors do not burn retries");
    assert_eq!(sms.call_count(), 0, "no fallback after a terminal failure");
}

#[tokio::test]
async fn retryable_failure_delivers_through_fallback() {
    let app = TestApp::new().await;
    let email = MockAdapter::scripted(
        Channel::Email,
        vec![Err(ChannelError::transient("SMTP_ERROR", "relay down"))],
    );
    let sms = MockAdapter::scripted(Channel::Sms, vec![Ok("sms-77".to_string())]);
    app.router.install(email.clone()).await;
    app.router.install(sms.clone()).await;

    let row = app
        .dispatcher
        .submit(email_request(), &app.client, None)
        .await
        .unwrap();
    let sent = wait_until(&app, &row.id, |r| r.status == NotificationStatus::Sent).await;

    // The stored channel reflects the request; only the provider id (and
    // the webhook payload) reveal the fallback.
    assert_eq!(sent.channel, Channel::Email);
    assert_eq!(sent.provider_message_id.as_deref(), Some("sms-77"));
    assert_eq!(email.call_count(), 1);
    assert_eq!(sms.call_count(), 1);
}

#[tokio::test]
async fn retries_exhaust_into_failed() {
    let app = TestApp::new().await;
    let email = MockAdapter::scripted(
        Channel::Email,
        vec![
            Err(ChannelError::transient("SMTP_ERROR", "down 1")),
            Err(ChannelError::transient("SMTP_ERROR", "down 2")),
            Err(ChannelError::transient("SMTP_ERROR", "down 3")),
            Err(ChannelError::transient("SMTP_ERROR", "down 4")),
            Err(ChannelError::transient("SMTP_ERROR", "down 5")),
        ],
    );
    app.router.install(email.clone()).await;

    let row = app
        .dispatcher
        .submit(email_request(), &app.client, None)
        .await
        .unwrap();

    // Drive each scheduled retry as if its slot had arrived, until the
    // row lands in FAILED.
    let failed = loop {
        let current = wait_until(&app, &row.id, |r| {
            r.status == NotificationStatus::Failed
                || (r.status == NotificationStatus::Pending && r.next_retry_at.is_some())
        })
        .await;
        if current.status == NotificationStatus::Failed {
            break current;
        }
        let due = current.next_retry_at.unwrap() + Duration::seconds(1);
        let batch = app.store.lease_due_retries(due, 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        app.dispatcher.deliver(&row.id, true).await;
    };

    assert_eq!(email.call_count(), 5, "max_retries bounds total attempts");
    assert!(failed.retry_count <= failed.max_retries);
    assert_eq!(failed.error_code.as_deref(), Some("SMTP_ERROR"));
    assert!(failed.next_retry_at.is_none());
}

#[tokio::test]
async fn expired_pending_rows_are_swept_never_sent() {
    let app = TestApp::new().await;
    let email = MockAdapter::ok(Channel::Email);
    app.router.install(email.clone()).await;

    // A PENDING row whose TTL already elapsed, due for retry.
    let now = Utc::now();
    let mut row = pending_row(&app.client.id);
    row.next_retry_at = Some(now - Duration::minutes(5));
    row.expires_at = Some(now - Duration::minutes(1));
    let row = app.store.insert_notification(&row).await.unwrap();

    app.scheduler.tick_once().await.unwrap();

    let swept = app
        .store
        .find_notification_by_id(&row.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(swept.status, NotificationStatus::Expired);
    assert_eq!(swept.error_code.as_deref(), Some("EXPIRED"));
    assert_eq!(email.call_count(), 0, "expired rows are not delivered");

    // Another tick does not resurrect it.
    app.scheduler.tick_once().await.unwrap();
    let still = app
        .store
        .find_notification_by_id(&row.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(still.status, NotificationStatus::Expired);
    assert_eq!(email.call_count(), 0);
}

#[tokio::test]
async fn stale_leases_are_recovered() {
    let app = TestApp::new().await;

    // Strand a row in SENDING, as if a worker died mid-attempt.
    let stranded = app
        .store
        .insert_notification(&pending_row(&app.client.id))
        .await
        .unwrap();
    assert!(app.store.lease_for_dispatch(&stranded.id).await.unwrap());

    // Within the lease window nothing changes.
    let released = app
        .store
        .release_stale_leases(Utc::now() - Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(released, 0);

    // Past the window the row returns to PENDING with an immediate slot.
    let released = app
        .store
        .release_stale_leases(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(released, 1);
    let recovered = app
        .store
        .find_notification_by_id(&stranded.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recovered.status, NotificationStatus::Pending);
    assert!(recovered.next_retry_at.is_some());
}

#[tokio::test]
async fn high_priority_rows_lease_before_normal_ones() {
    let app = TestApp::new().await;
    let now = Utc::now();

    let mut normal = pending_row(&app.client.id);
    normal.next_retry_at = Some(now - Duration::minutes(1));
    let mut high = pending_row(&app.client.id);
    high.priority = Priority::High;
    high.next_retry_at = Some(now - Duration::seconds(30));

    let normal = app.store.insert_notification(&normal).await.unwrap();
    let high = app.store.insert_notification(&high).await.unwrap();

    let batch = app.store.lease_due_retries(now, 10).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].id, high.id, "HIGH priority leases first");
    assert_eq!(batch[1].id, normal.id);
}
