//! Persistence layer for the courier notification service.
//!
//! A single SQLite database (WAL mode) accessed through SeaORM holds
//! notifications, API clients, per-channel configuration, message templates,
//! and audit records. [`store::Store`] is the unified access layer; the
//! schema is managed by the `migration` crate.

pub mod entities;
pub mod error;
pub mod store;

#[cfg(test)]
mod tests;

pub use error::StorageError;
pub use store::{
    ApiClientRow, AuditLogRow, ChannelConfigRow, MessageTemplateRow, NotificationFilter,
    NotificationRow, Store,
};
