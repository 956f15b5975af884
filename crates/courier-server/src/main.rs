use anyhow::Result;
use chrono::{Duration, Utc};
use courier_notify::router::ChannelRouter;
use courier_notify::webhook::WebhookNotifier;
use courier_storage::Store;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use courier_server::app;
use courier_server::channel_seed;
use courier_server::config::ServerConfig;
use courier_server::dispatch::Dispatcher;
use courier_server::ratelimit::RateLimiter;
use courier_server::scheduler::RetryScheduler;
use courier_server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("courier=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .get(1)
        .map(|s| s.as_str())
        .unwrap_or("config/server.toml");
    let config = ServerConfig::load(config_path)?;

    tracing::info!(
        http_port = config.http_port,
        data_dir = %config.data_dir,
        workers = config.core.worker_count,
        "courier-server starting"
    );

    let store = Arc::new(Store::new(Path::new(&config.data_dir)).await?);

    // Seed per-channel config rows on first boot (all disabled).
    if let Err(e) = channel_seed::init_default_channels(&store).await {
        tracing::error!(error = %e, "Failed to seed default channel configs");
    }

    match store.count_clients().await {
        Ok(0) => tracing::warn!(
            "No API clients registered; every request will be rejected until one is created"
        ),
        Ok(count) => tracing::info!(count, "API clients loaded"),
        Err(e) => tracing::error!(error = %e, "Failed to count API clients"),
    }

    // Recover rows stranded in SENDING by an unclean shutdown.
    let lease_cutoff = Utc::now() - Duration::seconds(config.core.lease_timeout_s as i64);
    match store.release_stale_leases(lease_cutoff).await {
        Ok(released) if released > 0 => {
            tracing::warn!(released, "Released leases left over from previous run")
        }
        Err(e) => tracing::error!(error = %e, "Failed to release stale leases"),
        _ => {}
    }

    let router = Arc::new(ChannelRouter::new(store.clone()));
    if let Err(e) = router.reload().await {
        tracing::error!(error = %e, "Failed to load channel adapters");
    }

    let webhook = Arc::new(WebhookNotifier::new(config.core.webhook_secret.clone()));
    let (dispatcher, worker_handles) = Dispatcher::start(
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

    let state = AppState {
        store: store.clone(),
        router,
        dispatcher: dispatcher.clone(),
        rate_limiter,
        start_time: Utc::now(),
        config: Arc::new(config.clone()),
    };

    let scheduler = RetryScheduler::new(
        store.clone(),
        dispatcher,
        webhook,
        config.core.retry_poll_interval_s,
        config.core.retry_batch_limit,
        config.core.lease_timeout_s,
    );
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run().await;
    });

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let app = app::build_http_app(state);
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(http = %http_addr, "Server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
        })
        .await?;

    // Give in-flight delivery attempts a moment to finish; anything still
    // SENDING is re-leased on next start.
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    scheduler_handle.abort();
    for handle in worker_handles {
        handle.abort();
    }
    tracing::info!("Server stopped");

    Ok(())
}
