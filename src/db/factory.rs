//! Connection factory with (driver, DSN) de-duplication.

use crate::config::{PoolOptions, ShardConfig};
use crate::db::handle::DbHandle;
use crate::db::physical::PhysicalConnection;
use crate::error::{ShardError, ShardResult};
use crate::models::{ConnectionKey, Driver, GroupKind, HandleRole, ShardRef};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Opens a single database handle.
///
/// The production implementation is `SqlxOpener`; tests plug in fakes.
#[async_trait]
pub trait HandleOpener: Send + Sync {
    async fn open(
        &self,
        driver: Driver,
        dsn: &str,
        pool: &PoolOptions,
        role: HandleRole,
    ) -> ShardResult<Arc<dyn DbHandle>>;
}

/// Builds physical connections for shard entries, sharing one connection
/// between entries whose resolved writer DSN is identical.
pub struct ConnectionFactory {
    opener: Arc<dyn HandleOpener>,
    connections: Vec<PhysicalConnection>,
    by_key: HashMap<ConnectionKey, usize>,
    options: Vec<(Vec<String>, PoolOptions)>,
}

impl ConnectionFactory {
    pub fn new(opener: Arc<dyn HandleOpener>) -> Self {
        Self {
            opener,
            connections: Vec::new(),
            by_key: HashMap::new(),
            options: Vec::new(),
        }
    }

    /// Number of distinct physical connections opened so far.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Open (or reuse) the physical connection for `entry`.
    ///
    /// Returns the slot of the connection in the order returned by `finish`.
    pub async fn open_entry(&mut self, group: GroupKind, entry: &ShardConfig) -> ShardResult<usize> {
        let shard = ShardRef::new(group, entry.id);
        let driver = entry.resolve_driver(group)?;
        entry
            .pool
            .validate()
            .map_err(|msg| ShardError::config(format!("{}: {}", shard, msg)))?;
        let dsn = entry.resolve_writer_dsn(group)?;
        let key = ConnectionKey::new(driver, dsn);

        if let Some(&slot) = self.by_key.get(&key) {
            let existing = &mut self.connections[slot];
            info!(
                shard = %shard,
                shared_with = %existing.shard(),
                key = %key.masked(),
                "Reusing physical connection"
            );
            let (readers, pool) = &self.options[slot];
            if readers != &entry.reader_dsns
                || pool != &entry.pool
                || existing.reader_policy() != entry.reader_policy
            {
                warn!(
                    shard = %shard,
                    shared_with = %existing.shard(),
                    "Shard entry shares a DSN but configures different readers or pool options; \
                     the first entry's settings are used"
                );
            }
            existing.add_shard_ref(shard);
            return Ok(slot);
        }

        let writer = self
            .open_handle(shard, driver, &key.dsn, &entry.pool, HandleRole::Writer)
            .await?;
        let mut readers: Vec<Arc<dyn DbHandle>> = Vec::with_capacity(entry.reader_dsns.len());
        for (position, reader_dsn) in entry.reader_dsns.iter().enumerate() {
            let opened = self
                .open_handle(
                    shard,
                    driver,
                    reader_dsn,
                    &entry.pool,
                    HandleRole::Reader(position),
                )
                .await;
            match opened {
                Ok(handle) => readers.push(handle),
                Err(e) => {
                    for handle in readers.iter().chain(std::iter::once(&writer)) {
                        handle.close().await;
                    }
                    return Err(e);
                }
            }
        }

        info!(
            shard = %shard,
            driver = %driver,
            key = %key.masked(),
            readers = readers.len(),
            policy = %entry.reader_policy,
            "Opened physical connection"
        );

        let slot = self.connections.len();
        self.connections.push(PhysicalConnection::new(
            key.clone(),
            shard,
            writer,
            readers,
            entry.reader_policy,
        ));
        self.options
            .push((entry.reader_dsns.clone(), entry.pool.clone()));
        self.by_key.insert(key, slot);
        Ok(slot)
    }

    async fn open_handle(
        &self,
        shard: ShardRef,
        driver: Driver,
        dsn: &str,
        pool: &PoolOptions,
        role: HandleRole,
    ) -> ShardResult<Arc<dyn DbHandle>> {
        self.opener
            .open(driver, dsn, pool, role)
            .await
            .map_err(|e| match e {
                ShardError::Config { message } => {
                    ShardError::config(format!("{} ({}): {}", shard, role, message))
                }
                ShardError::Connection { .. } => e,
                other => ShardError::connection(
                    shard,
                    format!("cannot open {} handle: {}", role, other),
                    crate::db::pool::connection_suggestion(driver, &other),
                ),
            })
    }

    /// Freeze the opened connections, in slot order.
    pub fn finish(self) -> Vec<Arc<PhysicalConnection>> {
        self.connections.into_iter().map(Arc::new).collect()
    }

    /// Close everything opened so far. Used when construction fails midway.
    pub async fn abort(self) {
        for connection in &self.connections {
            connection.close().await;
        }
    }
}
