//! Startup health checks.

use crate::db::{PhysicalConnection, connection_suggestion};
use crate::error::{ShardError, ShardResult};
use crate::sharding::with_deadline;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Pings a set of distinct physical connections concurrently.
pub struct HealthChecker {
    connections: Vec<Arc<PhysicalConnection>>,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(connections: Vec<Arc<PhysicalConnection>>, timeout: Duration) -> Self {
        Self {
            connections,
            timeout,
        }
    }

    /// Ping every connection once. Returns as soon as any ping fails; the
    /// remaining pings are dropped rather than awaited.
    pub async fn check_all(&self) -> ShardResult<()> {
        let started = Instant::now();
        let mut pending: FuturesUnordered<_> = self
            .connections
            .iter()
            .map(|connection| self.check_one(connection))
            .collect();

        while let Some(result) = pending.next().await {
            if let Err(e) = result {
                error!(error = %e, "Health check failed");
                return Err(e);
            }
        }

        info!(
            connections = self.connections.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "All connections healthy"
        );
        Ok(())
    }

    async fn check_one(&self, connection: &PhysicalConnection) -> ShardResult<()> {
        let shard = connection.shard();
        match with_deadline("ping", self.timeout, connection.ping()).await {
            Ok(()) => {
                debug!(shard = %shard, "Ping ok");
                Ok(())
            }
            Err(ShardError::Closed) => Err(ShardError::Closed),
            Err(ShardError::Timeout { elapsed_ms, .. }) => Err(ShardError::connection(
                shard,
                format!("ping timed out after {}ms", elapsed_ms),
                connection_suggestion(
                    connection.driver(),
                    &ShardError::timeout("ping", elapsed_ms),
                ),
            )),
            Err(e) => Err(ShardError::connection(
                shard,
                format!("ping failed: {}", e),
                connection_suggestion(connection.driver(), &e),
            )),
        }
    }
}
