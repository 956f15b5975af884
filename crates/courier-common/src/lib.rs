//! Shared domain types for the courier notification service.
//!
//! Everything here is dependency-light on purpose: the storage, channel,
//! and server crates all build on these enums and helpers.

pub mod id;
pub mod mask;
pub mod types;
