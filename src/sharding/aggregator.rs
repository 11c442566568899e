//! Scatter-gather across distinct sharding connections.
//!
//! Calls run with bounded concurrency but results are collected in
//! enumeration order, so merged output does not depend on completion order.
//! The first failure aborts the call and drops every in-flight shard call.

use crate::db::types::row_count_value;
use crate::error::{ShardError, ShardResult};
use crate::models::{QueryParam, Row};
use crate::sharding::manager::{GroupManager, ShardAssignment};
use crate::sharding::with_deadline;
use futures_util::{StreamExt, TryStreamExt, stream};
use std::future::Future;
use tracing::debug;

pub struct CrossShardAggregator<'a> {
    manager: &'a GroupManager,
}

impl<'a> CrossShardAggregator<'a> {
    pub fn new(manager: &'a GroupManager) -> Self {
        Self { manager }
    }

    /// Run `task` once per distinct sharding connection.
    ///
    /// Returns one result per connection in enumeration order, or the first
    /// error annotated with the connection's shard.
    pub async fn fan_out<T, F, Fut>(&self, task: F) -> ShardResult<Vec<T>>
    where
        F: Fn(ShardAssignment) -> Fut,
        Fut: Future<Output = ShardResult<T>>,
    {
        let assignments = self.manager.sharding_assignments()?;
        let concurrency = self.manager.options().max_concurrency.max(1);
        debug!(
            connections = assignments.len(),
            concurrency, "Fanning out across sharding connections"
        );

        stream::iter(assignments)
            .map(|assignment| {
                let shard = assignment.connection.shard();
                let call = task(assignment);
                async move { call.await.map_err(|e| e.on_shard(shard)) }
            })
            .buffered(concurrency)
            .try_collect()
            .await
    }

    /// Run the same read on every connection's reader and concatenate the rows.
    pub async fn query_all(&self, sql: &str, params: &[QueryParam]) -> ShardResult<Vec<Row>> {
        let timeout = self.manager.options().query_timeout;
        let parts = self
            .fan_out(|assignment| async move {
                let reader = assignment.connection.reader()?;
                with_deadline("query", timeout, reader.query(sql, params)).await
            })
            .await?;
        Ok(parts.into_iter().flatten().collect())
    }

    /// Run the same statement on every connection's writer; returns total affected rows.
    pub async fn exec_all(&self, sql: &str, params: &[QueryParam]) -> ShardResult<u64> {
        let timeout = self.manager.options().query_timeout;
        let parts = self
            .fan_out(|assignment| async move {
                let writer = assignment.connection.writer()?;
                with_deadline("exec", timeout, writer.exec(sql, params)).await
            })
            .await?;
        Ok(parts.into_iter().sum())
    }

    /// Run a single-row count query on every reader and sum `column`.
    pub async fn count_all(
        &self,
        sql: &str,
        params: &[QueryParam],
        column: &str,
    ) -> ShardResult<u64> {
        let timeout = self.manager.options().query_timeout;
        let parts = self
            .fan_out(|assignment| async move {
                let reader = assignment.connection.reader()?;
                let rows = with_deadline("count", timeout, reader.query(sql, params)).await?;
                read_count(&rows, column)
            })
            .await?;
        Ok(parts.into_iter().sum())
    }
}

/// Read the count from the first row of a count query.
pub(crate) fn read_count(rows: &[Row], column: &str) -> ShardResult<u64> {
    rows.first()
        .and_then(|row| row_count_value(row, column))
        .ok_or_else(|| {
            ShardError::internal(format!("Count query returned no numeric '{}' column", column))
        })
}
