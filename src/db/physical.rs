//! One physical database: a writer handle plus ordered reader handles.

use crate::config::ReaderPolicy;
use crate::db::handle::DbHandle;
use crate::db::policy::ReaderSelector;
use crate::error::{ShardError, ShardResult};
use crate::models::{ConnectionKey, Driver, ShardRef};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// A de-duplicated physical connection.
///
/// Owned by the group manager; shard entries resolving to the same
/// `ConnectionKey` all refer to one instance.
#[derive(Debug)]
pub struct PhysicalConnection {
    key: ConnectionKey,
    shard: ShardRef,
    shard_refs: Vec<ShardRef>,
    writer: Arc<dyn DbHandle>,
    readers: Vec<Arc<dyn DbHandle>>,
    selector: ReaderSelector,
    closed: AtomicBool,
}

impl PhysicalConnection {
    pub fn new(
        key: ConnectionKey,
        shard: ShardRef,
        writer: Arc<dyn DbHandle>,
        readers: Vec<Arc<dyn DbHandle>>,
        policy: ReaderPolicy,
    ) -> Self {
        Self {
            key,
            shard,
            shard_refs: vec![shard],
            writer,
            readers,
            selector: ReaderSelector::new(policy),
            closed: AtomicBool::new(false),
        }
    }

    /// Record another shard entry sharing this connection.
    pub(crate) fn add_shard_ref(&mut self, shard: ShardRef) {
        if !self.shard_refs.contains(&shard) {
            self.shard_refs.push(shard);
        }
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn driver(&self) -> Driver {
        self.key.driver
    }

    /// The first shard entry that opened this connection; used in error context.
    pub fn shard(&self) -> ShardRef {
        self.shard
    }

    /// Every shard entry referencing this connection, in configuration order.
    pub fn shard_refs(&self) -> &[ShardRef] {
        &self.shard_refs
    }

    fn ensure_open(&self) -> ShardResult<()> {
        if self.is_closed() {
            return Err(ShardError::Closed);
        }
        Ok(())
    }

    /// Handle for mutations. Fails with `Closed` once the connection is closed.
    pub fn writer(&self) -> ShardResult<&Arc<dyn DbHandle>> {
        self.ensure_open()?;
        Ok(&self.writer)
    }

    /// Handle for one read call, chosen by the reader policy.
    ///
    /// Falls back to the writer when no readers are configured.
    pub fn reader(&self) -> ShardResult<&Arc<dyn DbHandle>> {
        self.ensure_open()?;
        Ok(match self.selector.select(self.readers.len()) {
            Some(position) => &self.readers[position],
            None => &self.writer,
        })
    }

    pub fn readers(&self) -> &[Arc<dyn DbHandle>] {
        &self.readers
    }

    pub fn reader_policy(&self) -> ReaderPolicy {
        self.selector.policy()
    }

    /// Ping the writer and then every reader; stops at the first failure.
    pub async fn ping(&self) -> ShardResult<()> {
        self.ensure_open()?;
        self.writer.ping().await?;
        for reader in &self.readers {
            reader.ping().await?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every handle. Returns `false` if this connection was already closed.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!(shard = %self.shard, key = %self.key.masked(), "Closing physical connection");
        for reader in &self.readers {
            reader.close().await;
        }
        self.writer.close().await;
        true
    }
}
