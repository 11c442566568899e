//! Sharded routing layer.
//!
//! - `router`: key to logical index and physical table naming
//! - `ranges`: table range validation and the immutable routing table
//! - `manager`: master and sharding groups, lifecycle
//! - `aggregator`: scatter-gather over distinct sharding connections
//! - `health`: fail-fast startup ping
//! - `table`: per logical table operations

pub mod aggregator;
pub mod health;
pub mod manager;
pub mod ranges;
pub mod router;
pub mod table;

pub use aggregator::CrossShardAggregator;
pub use health::HealthChecker;
pub use manager::{GroupManager, ManagerOptions, ShardAssignment};
pub use ranges::{RoutingTable, TableRange, validate_ranges};
pub use router::{ShardKey, TableRouter, physical_table_name};
pub use table::{RoutedInsert, ShardStats, ShardStatsReport, ShardedTable};

use crate::error::{ShardError, ShardResult};
use std::future::Future;
use std::time::Duration;

/// Run one handle call under a deadline.
pub(crate) async fn with_deadline<T, F>(operation: &str, limit: Duration, call: F) -> ShardResult<T>
where
    F: Future<Output = ShardResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ShardError::timeout(operation, limit.as_millis() as u64)),
    }
}
