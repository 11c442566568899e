//! Data models for the shard router.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{ConnectionKey, Driver, GroupKind, HandleRole, ShardRef, mask_dsn};
pub use query::{CompareOp, Filter, Predicate, QueryParam, Record, Row, validate_identifier};
