use chrono::Utc;
use courier_storage::{ApiClientRow, Store};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const WINDOW_SIZE_MS: i64 = 60_000;

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    InvalidApiKey,
    ClientInactive,
    RateLimitExceeded,
}

impl RateLimitError {
    pub fn code(&self) -> &'static str {
        match self {
            RateLimitError::InvalidApiKey => "INVALID_API_KEY",
            RateLimitError::ClientInactive => "CLIENT_INACTIVE",
            RateLimitError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
        }
    }
}

/// Outcome of a limiter check; header values are always populated so the
/// ingress layer can emit `X-RateLimit-*` even on denial.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_epoch_ms: i64,
    pub error: Option<RateLimitError>,
    /// Resolved client, present whenever the key was valid.
    pub client: Option<ApiClientRow>,
}

impl RateLimitDecision {
    fn denied(error: RateLimitError) -> Self {
        Self {
            allowed: false,
            limit: 0,
            remaining: 0,
            reset_epoch_ms: 0,
            error: Some(error),
            client: None,
        }
    }
}

struct Bucket {
    window_start_ms: i64,
    count: u32,
}

/// Fixed 60-second-window request counter per API client.
///
/// State is process-local; buckets live in a map guarded by one lock, so
/// mutation and window rotation are serialized per key. When the service is
/// scaled horizontally this moves to shared storage behind the same check.
pub struct RateLimiter {
    store: Arc<Store>,
    buckets: Mutex<HashMap<String, Bucket>>,
    default_limit: u32,
}

impl RateLimiter {
    pub fn new(store: Arc<Store>, default_limit: u32) -> Self {
        Self {
            store,
            buckets: Mutex::new(HashMap::new()),
            default_limit,
        }
    }

    /// Resolve the client for `api_key_hash` and consume one request slot.
    pub async fn check(&self, api_key_hash: &str) -> RateLimitDecision {
        self.check_at(api_key_hash, Utc::now().timestamp_millis())
            .await
    }

    /// Clock-injectable variant of [`check`](Self::check).
    pub async fn check_at(&self, api_key_hash: &str, now_ms: i64) -> RateLimitDecision {
        let client = match self.store.find_client_by_api_key_hash(api_key_hash).await {
            Ok(Some(client)) => client,
            Ok(None) => return RateLimitDecision::denied(RateLimitError::InvalidApiKey),
            Err(e) => {
                tracing::error!(error = %e, "Failed to resolve API client");
                return RateLimitDecision::denied(RateLimitError::InvalidApiKey);
            }
        };

        if !client.active {
            return RateLimitDecision::denied(RateLimitError::ClientInactive);
        }

        let limit = client
            .rate_limit
            .and_then(|l| u32::try_from(l).ok())
            .unwrap_or(self.default_limit);

        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let bucket = buckets.entry(client.id.clone()).or_insert(Bucket {
            window_start_ms: now_ms,
            count: 0,
        });

        if now_ms - bucket.window_start_ms >= WINDOW_SIZE_MS {
            bucket.window_start_ms = now_ms;
            bucket.count = 0;
        }

        let reset_epoch_ms = bucket.window_start_ms + WINDOW_SIZE_MS;

        if bucket.count >= limit {
            tracing::warn!(
                client = %client.name,
                limit,
                "Rate limit exceeded"
            );
            return RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_epoch_ms,
                error: Some(RateLimitError::RateLimitExceeded),
                client: Some(client),
            };
        }

        bucket.count += 1;
        let remaining = limit - bucket.count;
        RateLimitDecision {
            allowed: true,
            limit,
            remaining,
            reset_epoch_ms,
            error: None,
            client: Some(client),
        }
    }
}
