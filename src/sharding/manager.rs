//! Group manager: owns the master and sharding connections.
//!
//! A manager is either Ready (returned by `connect`) or Closed (after
//! `close_all`). Construction never yields a partially usable manager: any
//! failure closes whatever was already opened and returns the error.

use crate::config::{
    DEFAULT_MAX_CONCURRENCY, DEFAULT_PING_TIMEOUT_SECS, DEFAULT_QUERY_TIMEOUT_SECS,
    DatabaseGroupsConfig,
};
use crate::db::{ConnectionFactory, HandleOpener, PhysicalConnection, SqlxOpener};
use crate::error::{ShardError, ShardResult};
use crate::models::{GroupKind, ShardRef};
use crate::sharding::aggregator::CrossShardAggregator;
use crate::sharding::health::HealthChecker;
use crate::sharding::ranges::{RoutingTable, TableRange, validate_ranges};
use crate::sharding::router::TableRouter;
use crate::sharding::table::ShardedTable;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runtime knobs for handle calls issued by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Deadline for each query or exec on one shard.
    pub query_timeout: Duration,
    /// Deadline for each connection ping.
    pub ping_timeout: Duration,
    /// Maximum shards queried at once by scatter-gather calls.
    pub max_concurrency: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            ping_timeout: Duration::from_secs(DEFAULT_PING_TIMEOUT_SECS),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// A distinct sharding connection and the logical indices it owns.
#[derive(Debug, Clone)]
pub struct ShardAssignment {
    pub connection: Arc<PhysicalConnection>,
    /// Ascending.
    pub indices: Vec<u32>,
}

/// Validated layout of the sharding group, computed before any connection opens.
struct ShardingPlan {
    tables: Vec<TableRouter>,
    ranges: Vec<TableRange>,
    suffix_count: Option<u32>,
}

#[derive(Debug)]
pub struct GroupManager {
    /// Every distinct physical connection, master and sharding.
    connections: Vec<Arc<PhysicalConnection>>,
    /// Distinct master slots in configuration order.
    masters: Vec<usize>,
    /// Distinct sharding slots ordered by the smallest index each owns.
    sharding: Vec<usize>,
    routing: RoutingTable,
    tables: Vec<TableRouter>,
    options: ManagerOptions,
    closed: AtomicBool,
}

impl GroupManager {
    /// Connect with sqlx-backed pools.
    pub async fn connect(cfg: &DatabaseGroupsConfig, options: ManagerOptions) -> ShardResult<Self> {
        Self::connect_with(cfg, Arc::new(SqlxOpener), options).await
    }

    /// Connect using `opener` for every handle.
    pub async fn connect_with(
        cfg: &DatabaseGroupsConfig,
        opener: Arc<dyn HandleOpener>,
        options: ManagerOptions,
    ) -> ShardResult<Self> {
        let plan = Self::plan(cfg)?;

        let mut factory = ConnectionFactory::new(opener);
        let (master_slots, sharding_slots) = match Self::open_all(&mut factory, cfg).await {
            Ok(slots) => slots,
            Err(e) => {
                warn!(error = %e, opened = factory.len(), "Construction failed, closing opened connections");
                factory.abort().await;
                return Err(e);
            }
        };

        let routing = match plan.suffix_count {
            Some(suffix_count) => {
                match RoutingTable::build(&plan.ranges, &sharding_slots, suffix_count) {
                    Ok(table) => table,
                    Err(e) => {
                        factory.abort().await;
                        return Err(e);
                    }
                }
            }
            None => RoutingTable::empty(),
        };

        let mut masters = Vec::with_capacity(master_slots.len());
        for slot in master_slots {
            if !masters.contains(&slot) {
                masters.push(slot);
            }
        }
        if masters.len() > 1 {
            warn!(
                count = masters.len(),
                "Multiple master databases configured; only the first is returned as the master connection"
            );
        }

        let sharding = routing.slots_in_order();
        let connections = factory.finish();

        info!(
            connections = connections.len(),
            masters = masters.len(),
            sharding = sharding.len(),
            suffix_count = routing.suffix_count(),
            tables = plan.tables.len(),
            "Group manager ready"
        );

        Ok(Self {
            connections,
            masters,
            sharding,
            routing,
            tables: plan.tables,
            options,
            closed: AtomicBool::new(false),
        })
    }

    fn plan(cfg: &DatabaseGroupsConfig) -> ShardResult<ShardingPlan> {
        if cfg.master.is_empty() {
            return Err(ShardError::config(
                "At least one master database must be configured",
            ));
        }
        check_unique_ids(GroupKind::Master, cfg.master.iter().map(|e| e.id))?;
        check_unique_ids(
            GroupKind::Sharding,
            cfg.sharding.databases.iter().map(|e| e.id),
        )?;

        let mut tables: Vec<TableRouter> = Vec::with_capacity(cfg.sharding.tables.len());
        for table in &cfg.sharding.tables {
            let router = TableRouter::new(&table.name, table.suffix_count)?;
            if tables.iter().any(|t| t.name() == router.name()) {
                return Err(ShardError::config(format!(
                    "Sharding table '{}' is configured twice",
                    router.name()
                )));
            }
            if let Some(first) = tables.first() {
                if first.suffix_count() != router.suffix_count() {
                    return Err(ShardError::config(format!(
                        "Sharding table '{}' has suffix_count {} but '{}' has {}; all sharding tables share one range layout",
                        router.name(),
                        router.suffix_count(),
                        first.name(),
                        first.suffix_count()
                    )));
                }
            }
            tables.push(router);
        }

        let suffix_count = tables.first().map(TableRouter::suffix_count);
        let mut ranges = Vec::with_capacity(cfg.sharding.databases.len());
        match suffix_count {
            Some(suffix_count) => {
                for entry in &cfg.sharding.databases {
                    let shard = ShardRef::sharding(entry.id);
                    let [start, end] = entry.table_range.ok_or_else(|| {
                        ShardError::config(format!("{}: table_range is required", shard))
                    })?;
                    ranges.push(TableRange::new(shard, start, end));
                }
                validate_ranges(&ranges, suffix_count)?;
            }
            None if !cfg.sharding.databases.is_empty() => {
                return Err(ShardError::config(
                    "Sharding databases are configured but no sharding table is defined",
                ));
            }
            None => {}
        }

        Ok(ShardingPlan {
            tables,
            ranges,
            suffix_count,
        })
    }

    async fn open_all(
        factory: &mut ConnectionFactory,
        cfg: &DatabaseGroupsConfig,
    ) -> ShardResult<(Vec<usize>, Vec<usize>)> {
        let mut master_slots = Vec::with_capacity(cfg.master.len());
        for entry in &cfg.master {
            master_slots.push(factory.open_entry(GroupKind::Master, entry).await?);
        }
        let mut sharding_slots = Vec::with_capacity(cfg.sharding.databases.len());
        for entry in &cfg.sharding.databases {
            sharding_slots.push(factory.open_entry(GroupKind::Sharding, entry).await?);
        }
        Ok((master_slots, sharding_slots))
    }

    fn ensure_open(&self) -> ShardResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ShardError::Closed);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Ping every distinct physical connection once; fails fast on the first error.
    pub async fn ping_all(&self) -> ShardResult<()> {
        self.ensure_open()?;
        HealthChecker::new(self.connections.clone(), self.options.ping_timeout)
            .check_all()
            .await
    }

    /// The master connection (the first configured master).
    pub fn get_master_connection(&self) -> ShardResult<Arc<PhysicalConnection>> {
        self.ensure_open()?;
        self.masters
            .first()
            .map(|slot| Arc::clone(&self.connections[*slot]))
            .ok_or_else(|| ShardError::internal("No master connection"))
    }

    /// Every distinct master connection in configuration order.
    pub fn get_master_connections(&self) -> ShardResult<Vec<Arc<PhysicalConnection>>> {
        self.ensure_open()?;
        Ok(self
            .masters
            .iter()
            .map(|slot| Arc::clone(&self.connections[*slot]))
            .collect())
    }

    /// The connection owning logical `index`.
    pub fn get_sharding_connection(&self, index: u32) -> ShardResult<Arc<PhysicalConnection>> {
        self.route(index).map(|(_, connection)| connection)
    }

    /// The shard entry and connection owning logical `index`.
    pub fn route(&self, index: u32) -> ShardResult<(ShardRef, Arc<PhysicalConnection>)> {
        self.ensure_open()?;
        let (shard, slot) = self.routing.owner(index).ok_or_else(|| {
            ShardError::routing(
                index,
                format!(
                    "no sharding connection owns this index (suffix_count {})",
                    self.routing.suffix_count()
                ),
            )
        })?;
        debug!(index, shard = %shard, "Routed table index");
        Ok((shard, Arc::clone(&self.connections[slot])))
    }

    /// The shard entry configured to own `index`.
    pub(crate) fn entry_for(&self, index: u32) -> Option<ShardRef> {
        self.routing.owner(index).map(|(shard, _)| shard)
    }

    /// Distinct sharding connections, ordered by the smallest index each owns.
    pub fn get_all_sharding_connections(&self) -> ShardResult<Vec<Arc<PhysicalConnection>>> {
        self.ensure_open()?;
        Ok(self
            .sharding
            .iter()
            .map(|slot| Arc::clone(&self.connections[*slot]))
            .collect())
    }

    /// Distinct sharding connections with the indices each owns, in enumeration order.
    pub fn sharding_assignments(&self) -> ShardResult<Vec<ShardAssignment>> {
        self.ensure_open()?;
        Ok(self
            .sharding
            .iter()
            .map(|slot| ShardAssignment {
                connection: Arc::clone(&self.connections[*slot]),
                indices: self.routing.indices_for_slot(*slot),
            })
            .collect())
    }

    /// Close every distinct physical connection once.
    ///
    /// Callers must drain in-flight requests first. A second call returns
    /// `Closed` and closes nothing.
    pub async fn close_all(&self) -> ShardResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ShardError::Closed);
        }
        let mut closed = 0;
        for connection in &self.connections {
            if connection.close().await {
                closed += 1;
            }
        }
        info!(closed, "Group manager closed");
        Ok(())
    }

    /// `(index, owning entry)` for every logical index, ascending.
    pub fn routes(&self) -> ShardResult<Vec<(u32, ShardRef)>> {
        self.ensure_open()?;
        Ok(self.routing.iter().map(|(i, shard, _)| (i, shard)).collect())
    }

    /// Shared suffix count of the sharding tables; 0 without a sharding group.
    pub fn suffix_count(&self) -> ShardResult<u32> {
        self.ensure_open()?;
        Ok(self.routing.suffix_count())
    }

    pub fn tables(&self) -> ShardResult<&[TableRouter]> {
        self.ensure_open()?;
        Ok(&self.tables)
    }

    /// Operations on the logical table `name`.
    pub fn table(&self, name: &str) -> ShardResult<ShardedTable<'_>> {
        self.ensure_open()?;
        let router = self
            .tables
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| {
                ShardError::invalid_input(format!("Unknown sharding table '{}'", name))
            })?;
        Ok(ShardedTable::new(self, router.clone()))
    }

    pub fn aggregator(&self) -> CrossShardAggregator<'_> {
        CrossShardAggregator::new(self)
    }
}

fn check_unique_ids(group: GroupKind, ids: impl Iterator<Item = u32>) -> ShardResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ShardError::config(format!(
                "{} is configured more than once",
                ShardRef::new(group, id)
            )));
        }
    }
    Ok(())
}
