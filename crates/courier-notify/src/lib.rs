//! Channel delivery framework for the courier notification service.
//!
//! Each delivery channel (email/SMTP, Telegram Bot, SMS gateway, WhatsApp
//! Business) implements [`ChannelAdapter`]; the [`router::ChannelRouter`]
//! keeps the registry, applies daily caps, and orchestrates the fallback
//! chain. Terminal outcomes are reported through the HMAC-signed
//! [`webhook::WebhookNotifier`], and templated messages are rendered by the
//! pure [`template`] module.

pub mod channels;
pub mod error;
pub mod router;
pub mod template;
pub mod webhook;


use async_trait::async_trait;
use courier_common::types::Channel;
use error::ChannelError;

/// A delivery channel that turns an abstract send into a concrete provider
/// interaction (SMTP envelope, Bot API call, SMS gateway POST).
///
/// Adapters are constructed from their `channel_configs` row at startup or
/// on an explicit router reload; enabled state and credentials are captured
/// at construction, never read through global mutable state. Implementations
/// must mask recipients in every log line they produce.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Deliver one message. Returns the provider message id on accept.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] carrying the provider error code and
    /// whether the failure is worth retrying.
    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> Result<String, ChannelError>;

    /// Cheap provider reachability probe for the health surface.
    async fn health_check(&self) -> bool;

    /// The channel label this adapter serves.
    fn channel(&self) -> Channel;

    /// Whether the channel is administratively enabled.
    fn is_enabled(&self) -> bool;

    /// Whether credentials are present.
    fn is_configured(&self) -> bool;
}
