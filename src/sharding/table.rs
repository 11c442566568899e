//! Operations on one logical sharded table.

use crate::db::PhysicalConnection;
use crate::error::{ShardError, ShardResult};
use crate::models::{Predicate, QueryParam, Record, Row, ShardRef};
use crate::sharding::aggregator::read_count;
use crate::sharding::manager::GroupManager;
use crate::sharding::router::{ShardKey, TableRouter, physical_table_name};
use crate::sharding::with_deadline;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

/// Where an insert landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutedInsert {
    pub index: u32,
    pub table: String,
    pub shard: ShardRef,
    pub rows_affected: u64,
}

/// Row count of one physical table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    pub shard: ShardRef,
    pub table_index: u32,
    pub table_name: String,
    pub row_count: u64,
}

/// Per-table row counts of a logical table, in index order.
#[derive(Debug, Clone, Serialize)]
pub struct ShardStatsReport {
    pub table: String,
    pub collected_at: DateTime<Utc>,
    pub shards: Vec<ShardStats>,
}

impl ShardStatsReport {
    pub fn total_rows(&self) -> u64 {
        self.shards.iter().map(|s| s.row_count).sum()
    }
}

/// Routing-aware access to one logical table.
pub struct ShardedTable<'a> {
    manager: &'a GroupManager,
    router: TableRouter,
}

impl<'a> ShardedTable<'a> {
    pub fn new(manager: &'a GroupManager, router: TableRouter) -> Self {
        Self { manager, router }
    }

    pub fn name(&self) -> &str {
        self.router.name()
    }

    pub fn router(&self) -> &TableRouter {
        &self.router
    }

    /// Configured owner of `index`, falling back to the connection's label.
    fn owner(&self, index: u32, connection: &PhysicalConnection) -> ShardRef {
        self.manager
            .entry_for(index)
            .unwrap_or_else(|| connection.shard())
    }

    /// Insert `record` into the physical table `key` routes to.
    pub async fn insert<K: ShardKey + ?Sized>(
        &self,
        key: &K,
        record: &Record,
    ) -> ShardResult<RoutedInsert> {
        let index = self.router.index_for_key(key);
        self.insert_at(index, record).await
    }

    /// Insert `record` into an explicitly chosen logical index.
    pub async fn insert_at(&self, index: u32, record: &Record) -> ShardResult<RoutedInsert> {
        self.router.check_index(index)?;
        let (shard, connection) = self.manager.route(index)?;
        let table = physical_table_name(self.router.name(), index);
        let sql = record.insert_sql(&table, connection.driver())?;
        let params: Vec<QueryParam> = record.values().cloned().collect();

        let rows_affected = with_deadline(
            "insert",
            self.manager.options().query_timeout,
            connection.writer()?.exec(&sql, &params),
        )
        .await
        .map_err(|e| e.on_shard(shard))?;

        debug!(table = %table, index, shard = %shard, rows_affected, "Inserted row");
        Ok(RoutedInsert {
            index,
            table,
            shard,
            rows_affected,
        })
    }

    /// Read matching rows from the single physical table `key` routes to.
    pub async fn find_in_shard<K: ShardKey + ?Sized>(
        &self,
        key: &K,
        predicate: &Predicate,
    ) -> ShardResult<Vec<Row>> {
        let index = self.router.index_for_key(key);
        let (shard, connection) = self.manager.route(index)?;
        let table = physical_table_name(self.router.name(), index);
        let sql = predicate.select_sql(&table, connection.driver())?;
        let params = predicate.params();

        with_deadline(
            "query",
            self.manager.options().query_timeout,
            connection.reader()?.query(&sql, &params),
        )
        .await
        .map_err(|e| e.on_shard(shard))
    }

    /// Matching rows from every physical table.
    ///
    /// Rows are concatenated in connection enumeration order, then ascending
    /// table index within a connection, keeping each table's own row order.
    pub async fn find_across_shards(&self, predicate: &Predicate) -> ShardResult<Vec<Row>> {
        let timeout = self.manager.options().query_timeout;
        let params = predicate.params();
        let params = params.as_slice();
        let parts = self
            .manager
            .aggregator()
            .fan_out(|assignment| async move {
                let driver = assignment.connection.driver();
                let mut rows = Vec::new();
                for index in assignment.indices {
                    let table = physical_table_name(self.router.name(), index);
                    let sql = predicate.select_sql(&table, driver)?;
                    let part = with_deadline(
                        "query",
                        timeout,
                        assignment.connection.reader()?.query(&sql, params),
                    )
                    .await
                    .map_err(|e| e.on_shard(self.owner(index, &assignment.connection)))?;
                    rows.extend(part);
                }
                Ok::<_, ShardError>(rows)
            })
            .await?;

        let rows: Vec<Row> = parts.into_iter().flatten().collect();
        debug!(table = %self.router.name(), rows = rows.len(), "Merged rows across shards");
        Ok(rows)
    }

    /// Total matching rows over every physical table.
    pub async fn count_across_shards(&self, predicate: &Predicate) -> ShardResult<u64> {
        let stats = self.count_tables(predicate).await?;
        Ok(stats.iter().map(|s| s.row_count).sum())
    }

    /// Row count of every physical table, for observability.
    pub async fn shard_stats(&self) -> ShardResult<ShardStatsReport> {
        let shards = self.count_tables(&Predicate::all()).await?;
        Ok(ShardStatsReport {
            table: self.router.name().to_string(),
            collected_at: Utc::now(),
            shards,
        })
    }

    async fn count_tables(&self, predicate: &Predicate) -> ShardResult<Vec<ShardStats>> {
        let timeout = self.manager.options().query_timeout;
        let params = predicate.params();
        let params = params.as_slice();
        let parts = self
            .manager
            .aggregator()
            .fan_out(|assignment| async move {
                let driver = assignment.connection.driver();
                let mut stats = Vec::with_capacity(assignment.indices.len());
                for index in assignment.indices {
                    let shard = self.owner(index, &assignment.connection);
                    let table = physical_table_name(self.router.name(), index);
                    let sql = predicate.count_sql(&table, driver)?;
                    let rows = with_deadline(
                        "count",
                        timeout,
                        assignment.connection.reader()?.query(&sql, params),
                    )
                    .await
                    .map_err(|e| e.on_shard(shard))?;
                    let row_count = read_count(&rows, "row_count").map_err(|e| e.on_shard(shard))?;
                    stats.push(ShardStats {
                        shard,
                        table_index: index,
                        table_name: table,
                        row_count,
                    });
                }
                Ok::<_, ShardError>(stats)
            })
            .await?;

        let mut stats: Vec<ShardStats> = parts.into_iter().flatten().collect();
        stats.sort_by_key(|s| s.table_index);
        Ok(stats)
    }

    /// Create every physical table on its owner's writer if missing.
    ///
    /// `columns_ddl` is the column list, e.g. `id INTEGER PRIMARY KEY, name TEXT`.
    /// Returns the number of physical tables ensured.
    pub async fn ensure_tables(&self, columns_ddl: &str) -> ShardResult<usize> {
        let columns_ddl = columns_ddl.trim();
        if columns_ddl.is_empty() || columns_ddl.contains(';') {
            return Err(ShardError::invalid_input(
                "Column definitions must be a non-empty list without ';'",
            ));
        }

        let timeout = self.manager.options().query_timeout;
        let parts = self
            .manager
            .aggregator()
            .fan_out(|assignment| async move {
                let mut ensured = 0usize;
                for index in assignment.indices {
                    let table = physical_table_name(self.router.name(), index);
                    let sql = format!("CREATE TABLE IF NOT EXISTS {} ({})", table, columns_ddl);
                    with_deadline(
                        "create table",
                        timeout,
                        assignment.connection.writer()?.exec(&sql, &[]),
                    )
                    .await
                    .map_err(|e| e.on_shard(self.owner(index, &assignment.connection)))?;
                    ensured += 1;
                }
                Ok::<_, ShardError>(ensured)
            })
            .await?;

        let ensured: usize = parts.into_iter().sum();
        info!(table = %self.router.name(), tables = ensured, "Ensured physical tables");
        Ok(ensured)
    }
}
