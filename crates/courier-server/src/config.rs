use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    pub core: CoreConfig,
}

/// Dispatch-pipeline tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// Delivery concurrency: number of worker tasks draining the queue.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Retry scheduler tick, seconds.
    #[serde(default = "default_retry_poll_interval_s")]
    pub retry_poll_interval_s: u64,
    /// Max due rows leased per tick.
    #[serde(default = "default_retry_batch_limit")]
    pub retry_batch_limit: usize,
    /// Max time a row may sit in SENDING before being re-leased, seconds.
    #[serde(default = "default_lease_timeout_s")]
    pub lease_timeout_s: u64,
    /// Default `expires_at` offset for new notifications, seconds.
    #[serde(default = "default_notification_ttl_s")]
    pub notification_ttl_s: u64,
    /// HMAC key for webhook signatures. Required.
    pub webhook_secret: String,
    /// Used when the client row does not carry its own limit.
    #[serde(default = "default_rate_limit_per_min")]
    pub default_rate_limit_per_min: u32,
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_worker_count() -> usize {
    16
}

fn default_retry_poll_interval_s() -> u64 {
    60
}

fn default_retry_batch_limit() -> usize {
    100
}

fn default_lease_timeout_s() -> u64 {
    300
}

fn default_notification_ttl_s() -> u64 {
    86400
}

fn default_rate_limit_per_min() -> u32 {
    100
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        if config.core.webhook_secret.is_empty() {
            anyhow::bail!("core.webhook_secret must not be empty");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let config: ServerConfig = toml::from_str(
            r#"
            [core]
            webhook_secret = "s3cret"
            "#,
        )
        .unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.core.worker_count, 16);
        assert_eq!(config.core.retry_poll_interval_s, 60);
        assert_eq!(config.core.retry_batch_limit, 100);
        assert_eq!(config.core.lease_timeout_s, 300);
        assert_eq!(config.core.notification_ttl_s, 86400);
        assert_eq!(config.core.default_rate_limit_per_min, 100);
    }

    #[test]
    fn webhook_secret_is_required() {
        let parsed: Result<ServerConfig, _> = toml::from_str("http_port = 9000");
        assert!(parsed.is_err());
    }
}
