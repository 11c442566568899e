//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use shard_router::config::{
    DatabaseGroupsConfig, PoolOptions, ShardConfig, ShardingConfig, ShardingTableConfig,
};
use shard_router::db::{DbHandle, HandleOpener};
use shard_router::error::{ShardError, ShardResult};
use shard_router::models::{Driver, HandleRole, QueryParam, Row};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A fake database that understands the statements the router issues:
/// `INSERT INTO t (..) VALUES (..)`, `SELECT * FROM t ...` and
/// `SELECT COUNT(*) AS row_count FROM t ...`. Filters are ignored.
#[derive(Debug, Default)]
pub struct FakeHandle {
    pub dsn: String,
    pub pings: AtomicUsize,
    pub closes: AtomicUsize,
    pub queries: AtomicUsize,
    pub execs: AtomicUsize,
    pub fail_ping: bool,
    pub fail_queries: bool,
    pub delay: Option<Duration>,
    tables: Mutex<HashMap<String, Vec<Row>>>,
}

impl FakeHandle {
    pub fn new(dsn: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            ..Self::default()
        }
    }

    /// Seed `count` rows into `table`.
    pub fn seed(&self, table: &str, count: usize) {
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table.to_string()).or_default();
        for i in 0..count {
            let mut row = Row::new();
            row.insert("table".to_string(), JsonValue::from(table));
            row.insert("seq".to_string(), JsonValue::from(i as u64));
            rows.push(row);
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn table_after<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let mut tokens = sql.split_whitespace();
    tokens.find(|t| t.eq_ignore_ascii_case(keyword))?;
    tokens.next()
}

fn param_json(param: &QueryParam) -> JsonValue {
    match param {
        QueryParam::Null => JsonValue::Null,
        QueryParam::Bool(v) => JsonValue::from(*v),
        QueryParam::Int(v) => JsonValue::from(*v),
        QueryParam::Float(v) => JsonValue::from(*v),
        QueryParam::String(v) => JsonValue::from(v.as_str()),
        QueryParam::Json(v) => v.clone(),
    }
}

#[async_trait]
impl DbHandle for FakeHandle {
    async fn exec(&self, sql: &str, params: &[QueryParam]) -> ShardResult<u64> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_queries {
            return Err(ShardError::database("fake exec failure", None, ""));
        }

        if let Some(table) = table_after(sql, "INTO") {
            let columns = sql
                .find('(')
                .zip(sql.find(')'))
                .map(|(open, close)| &sql[open + 1..close])
                .unwrap_or_default();
            let row: Row = columns
                .split(',')
                .map(str::trim)
                .zip(params.iter().map(param_json))
                .map(|(c, v)| (c.to_string(), v))
                .collect();
            self.tables
                .lock()
                .unwrap()
                .entry(table.to_string())
                .or_default()
                .push(row);
            return Ok(1);
        }

        if let Some(table) = table_after(sql, "EXISTS") {
            self.tables
                .lock()
                .unwrap()
                .entry(table.to_string())
                .or_default();
        }
        Ok(0)
    }

    async fn query(&self, sql: &str, _params: &[QueryParam]) -> ShardResult<Vec<Row>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_queries {
            return Err(ShardError::database("fake query failure", None, ""));
        }

        let table = table_after(sql, "FROM").unwrap_or_default();
        let rows = self.rows(table);
        if sql.contains("COUNT(*)") {
            let mut row = Row::new();
            row.insert("row_count".to_string(), JsonValue::from(rows.len() as u64));
            return Ok(vec![row]);
        }
        Ok(rows)
    }

    async fn ping(&self) -> ShardResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_ping {
            return Err(ShardError::database("connection refused", None, ""));
        }
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opener producing `FakeHandle`s, one per DSN it is asked to open.
#[derive(Debug, Default)]
pub struct FakeOpener {
    handles: Mutex<Vec<Arc<FakeHandle>>>,
    opens: AtomicUsize,
    unreachable: HashSet<String>,
    failing: HashSet<String>,
    broken_opens: HashSet<String>,
    slow: HashMap<String, Duration>,
}

impl FakeOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pings to `dsn` fail.
    pub fn unreachable(mut self, dsn: &str) -> Self {
        self.unreachable.insert(dsn.to_string());
        self
    }

    /// Queries and execs on `dsn` fail.
    pub fn failing(mut self, dsn: &str) -> Self {
        self.failing.insert(dsn.to_string());
        self
    }

    /// Opening `dsn` fails.
    pub fn broken(mut self, dsn: &str) -> Self {
        self.broken_opens.insert(dsn.to_string());
        self
    }

    /// Every call on `dsn` waits `delay` first.
    pub fn slow(mut self, dsn: &str, delay: Duration) -> Self {
        self.slow.insert(dsn.to_string(), delay);
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn handles(&self) -> Vec<Arc<FakeHandle>> {
        self.handles.lock().unwrap().clone()
    }

    /// The handle opened for `dsn`. Panics if none was opened.
    pub fn handle(&self, dsn: &str) -> Arc<FakeHandle> {
        self.handles
            .lock()
            .unwrap()
            .iter()
            .find(|h| h.dsn == dsn)
            .cloned()
            .unwrap_or_else(|| panic!("no handle opened for {}", dsn))
    }
}

#[async_trait]
impl HandleOpener for FakeOpener {
    async fn open(
        &self,
        _driver: Driver,
        dsn: &str,
        _pool: &PoolOptions,
        _role: HandleRole,
    ) -> ShardResult<Arc<dyn DbHandle>> {
        if self.broken_opens.contains(dsn) {
            return Err(ShardError::database("fake open failure", None, ""));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(FakeHandle {
            fail_ping: self.unreachable.contains(dsn),
            fail_queries: self.failing.contains(dsn),
            delay: self.slow.get(dsn).copied(),
            ..FakeHandle::new(dsn)
        });
        self.handles.lock().unwrap().push(Arc::clone(&handle));
        Ok(handle)
    }
}

/// A sharding entry on a fake DSN.
pub fn shard(id: u32, dsn: &str, start: u32, end: u32) -> ShardConfig {
    ShardConfig::with_dsn(id, "mysql", dsn).table_range(start, end)
}

/// Master `fake://master` plus the given sharding entries over `dm_users`.
pub fn groups(databases: Vec<ShardConfig>, suffix_count: u32) -> DatabaseGroupsConfig {
    DatabaseGroupsConfig {
        master: vec![ShardConfig::with_dsn(0, "mysql", "fake://master")],
        sharding: ShardingConfig {
            databases,
            tables: vec![ShardingTableConfig {
                name: "dm_users".to_string(),
                suffix_count,
            }],
        },
    }
}

/// The two-database layout: `[0,15]` and `[16,31]` over 32 partitions.
pub fn two_shards() -> DatabaseGroupsConfig {
    groups(
        vec![
            shard(1, "fake://db1", 0, 15),
            shard(2, "fake://db2", 16, 31),
        ],
        32,
    )
}
