//! Storage capability trait.
//!
//! Routing and aggregation only ever talk to a physical database through this
//! trait, so they work the same over sqlx pools and in-memory fakes.

use crate::error::ShardResult;
use crate::models::{QueryParam, Row};
use async_trait::async_trait;

/// Minimal capability set of one physical database handle.
#[async_trait]
pub trait DbHandle: Send + Sync + std::fmt::Debug {
    /// Execute a statement and return the number of affected rows.
    async fn exec(&self, sql: &str, params: &[QueryParam]) -> ShardResult<u64>;

    /// Run a query and return all rows in result order.
    async fn query(&self, sql: &str, params: &[QueryParam]) -> ShardResult<Vec<Row>>;

    /// Verify the database is reachable.
    async fn ping(&self) -> ShardResult<()>;

    /// Close the handle. Called once per handle by the owning group manager.
    async fn close(&self);
}
