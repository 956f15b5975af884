use chrono::{DateTime, Utc};
use courier_notify::router::ChannelRouter;
use courier_storage::Store;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::ratelimit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub router: Arc<ChannelRouter>,
    pub dispatcher: Arc<Dispatcher>,
    pub rate_limiter: Arc<RateLimiter>,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}
