pub mod api_client;
pub mod audit_log;
pub mod channel_config;
pub mod message_template;
pub mod notification;
