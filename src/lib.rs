//! Shard Router Library
//!
//! Static, configuration-driven routing over horizontally-sharded SQL
//! databases (SQLite, PostgreSQL, MySQL): logical partitioned tables are
//! mapped onto physical databases, shared DSNs are de-duplicated into one
//! pool, reads and writes are split, and scatter-gather queries merge
//! results from every shard deterministically.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod sharding;

pub use config::{Config, DatabaseGroupsConfig};
pub use error::{ShardError, ShardResult};
pub use sharding::{GroupManager, ManagerOptions, ShardedTable};
