use chrono::{Duration, Utc};
use courier_notify::webhook::{WebhookEvent, WebhookNotifier};
use courier_storage::Store;
use std::sync::Arc;
use tokio::time::interval;

use crate::dispatch::Dispatcher;

/// Periodic sweeper: re-leases stale SENDING rows, hands due retries to
/// the worker pool, and expires rows past their `expires_at`.
pub struct RetryScheduler {
    store: Arc<Store>,
    dispatcher: Arc<Dispatcher>,
    webhook: Arc<WebhookNotifier>,
    tick_secs: u64,
    batch_limit: usize,
    lease_timeout_s: u64,
}

impl RetryScheduler {
    pub fn new(
        store: Arc<Store>,
        dispatcher: Arc<Dispatcher>,
        webhook: Arc<WebhookNotifier>,
        tick_secs: u64,
        batch_limit: usize,
        lease_timeout_s: u64,
    ) -> Self {
        Self {
            store,
            dispatcher,
            webhook,
            tick_secs,
            batch_limit,
            lease_timeout_s,
        }
    }

    pub async fn run(&self) {
        tracing::info!(
            tick_secs = self.tick_secs,
            batch_limit = self.batch_limit,
            lease_timeout_s = self.lease_timeout_s,
            "Retry scheduler started"
        );

        let mut tick = interval(std::time::Duration::from_secs(self.tick_secs.max(1)));
        loop {
            tick.tick().await;
            if let Err(e) = self.tick_once().await {
                tracing::error!(error = %e, "Retry scheduler tick failed");
            }
        }
    }

    /// One scheduler pass. Split out so tests can drive ticks directly.
    pub async fn tick_once(&self) -> anyhow::Result<()> {
        let now = Utc::now();

        let cutoff = now - Duration::seconds(self.lease_timeout_s as i64);
        let released = self.store.release_stale_leases(cutoff).await?;
        if released > 0 {
            tracing::warn!(released, "Released stale delivery leases");
        }

        let batch = self.store.lease_due_retries(now, self.batch_limit).await?;
        if !batch.is_empty() {
            tracing::info!(count = batch.len(), "Processing due retries");
        }
        for row in batch {
            self.dispatcher.enqueue(&row.id, true).await;
        }

        let expired = self.store.sweep_expired(now, self.batch_limit).await?;
        for row in &expired {
            tracing::info!(id = %row.id, "Notification expired");
            self.webhook.fire(row, WebhookEvent::Failed, None).await;
        }

        Ok(())
    }
}
