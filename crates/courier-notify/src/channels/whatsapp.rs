use async_trait::async_trait;
use courier_common::types::Channel;
use courier_storage::ChannelConfigRow;

use crate::error::ChannelError;
use crate::ChannelAdapter;

/// WhatsApp Business placeholder.
///
/// The channel surface exists (registration, routing, fallback target) but
/// no provider integration is wired yet: `is_configured()` is `false` and
/// every send fails terminally with NOT_CONFIGURED. The health rollup
/// skips unconfigured WhatsApp.
pub struct WhatsAppAdapter {
    enabled: bool,
}

impl WhatsAppAdapter {
    pub fn from_config(row: &ChannelConfigRow) -> Self {
        Self { enabled: row.enabled }
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppAdapter {
    async fn send(
        &self,
        _recipient: &str,
        _subject: Option<&str>,
        _body: &str,
    ) -> Result<String, ChannelError> {
        Err(ChannelError::terminal(
            "NOT_CONFIGURED",
            "whatsapp channel is not configured",
        ))
    }

    async fn health_check(&self) -> bool {
        false
    }

    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_configured(&self) -> bool {
        false
    }
}
