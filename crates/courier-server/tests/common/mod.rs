#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use chrono::Utc;
use courier_common::id::next_id;
use courier_common::types::{Channel, NotificationStatus};
use courier_notify::error::ChannelError;
use courier_notify::router::ChannelRouter;
use courier_notify::webhook::WebhookNotifier;
use courier_notify::ChannelAdapter;
use courier_server::app::build_http_app;
use courier_server::auth::hash_api_key;
use courier_server::config::ServerConfig;
use courier_server::dispatch::Dispatcher;
use courier_server::ratelimit::RateLimiter;
use courier_server::scheduler::RetryScheduler;
use courier_server::state::AppState;
use courier_storage::{ApiClientRow, Store};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const TEST_API_KEY: &str = "ck_live_9f8e7d6c5b4a3210";

/// Scripted channel adapter: pops one result per send, defaulting to
/// success once the script is exhausted.
pub struct MockAdapter {
    channel: Channel,
    enabled: bool,
    results: Mutex<VecDeque<Result<String, ChannelError>>>,
    calls: AtomicUsize,
}

impl MockAdapter {
    pub fn ok(channel: Channel) -> Arc<Self> {
        Self::scripted(channel, vec![])
    }

    pub fn scripted(
        channel: Channel,
        results: Vec<Result<String, ChannelError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel,
            enabled: true,
            results: Mutex::new(results.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelAdapter for MockAdapter {
    async fn send(
        &self,
        _recipient: &str,
        _subject: Option<&str>,
        _body: &str,
    ) -> Result<String, ChannelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(format!("mid-{}", self.calls.load(Ordering::SeqCst))))
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_configured(&self) -> bool {
        true
    }
}

pub struct TestApp {
    pub app: Router,
    pub store: Arc<Store>,
    pub router: Arc<ChannelRouter>,
    pub dispatcher: Arc<Dispatcher>,
    pub scheduler: RetryScheduler,
    pub client: ApiClientRow,
    _dir: TempDir,
}

fn test_config() -> ServerConfig {
    toml::from_str(
        r#"
        [core]
        webhook_secret = "integration-test-secret"
        worker_count = 2
        "#,
    )
    .unwrap()
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_rate_limit(Some(100)).await
    }

    pub async fn with_rate_limit(rate_limit: Option<i32>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()).await.unwrap());
        let config = test_config();

        let client = store
            .insert_api_client(&ApiClientRow {
                id: next_id(),
                name: "integration-client".to_string(),
                api_key_hash: hash_api_key(TEST_API_KEY),
                api_key_prefix: TEST_API_KEY[..8].to_string(),
                active: true,
                rate_limit,
                allowed_channels: vec![],
                created_at: Utc::now(),
                last_used_at: None,
            })
            .await
            .unwrap();

        let router = Arc::new(ChannelRouter::new(store.clone()));
        let webhook = Arc::new(WebhookNotifier::new(config.core.webhook_secret.clone()));
        let (dispatcher, _workers) = Dispatcher::start(
            store.clone(),
            router.clone(),
            webhook.clone(),
            config.core.worker_count,
            config.core.notification_ttl_s,
        );
        let rate_limiter = Arc::new(RateLimiter::new(
            store.clone(),
            config.core.default_rate_limit_per_min,
        ));
        let scheduler = RetryScheduler::new(
            store.clone(),
            dispatcher.clone(),
            webhook,
            config.core.retry_poll_interval_s,
            config.core.retry_batch_limit,
            config.core.lease_timeout_s,
        );

        let state = AppState {
            store: store.clone(),
            router: router.clone(),
            dispatcher: dispatcher.clone(),
            rate_limiter,
            start_time: Utc::now(),
            config: Arc::new(config),
        };

        Self {
            app: build_http_app(state),
            store,
            router,
            dispatcher,
            scheduler,
            client,
            _dir: dir,
        }
    }

    /// Poll until the row reaches `status` (delivery workers are async).
    pub async fn wait_for_status(&self, id: &str, status: NotificationStatus) {
        for _ in 0..200 {
            if let Ok(Some(row)) = self.store.find_notification_by_id(id).await {
                if row.status == status {
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("notification {id} never reached {status}");
    }
}
