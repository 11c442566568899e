//! Configuration handling for the shard router.
//!
//! Two layers live here: the operator CLI (`Config`, parsed with clap from
//! arguments and environment variables) and the database groups document
//! (`DatabaseGroupsConfig`) describing master and sharding connections.

use crate::error::{ShardError, ShardResult};
use crate::models::{Driver, GroupKind, ShardRef};
use crate::sharding::ManagerOptions;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PING_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 0;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Environment variable prefixes for password overrides, suffixed with the shard id.
pub const SHARD_PASSWORD_ENV_PREFIX: &str = "DB_PASSWORD_SHARD";
pub const MASTER_PASSWORD_ENV_PREFIX: &str = "DB_PASSWORD_MASTER";

/// Connection pool sizing for one shard entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Maximum open connections (default: 10, 1 for SQLite writers)
    #[serde(default)]
    pub max_open_conns: Option<u32>,
    /// Connections kept open while idle (default: 0)
    #[serde(default)]
    pub max_idle_conns: Option<u32>,
    /// Maximum lifetime of a single connection in seconds (default: unlimited)
    #[serde(default)]
    pub conn_max_lifetime_secs: Option<u64>,
    /// Idle timeout in seconds (default: 600)
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    #[serde(default)]
    pub acquire_timeout_secs: Option<u64>,
}

impl PoolOptions {
    /// Get max connections with default value based on driver.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_open_conns.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min connections (idle pool size), never above the maximum.
    pub fn min_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_idle_conns
            .unwrap_or(DEFAULT_MIN_CONNECTIONS)
            .min(self.max_connections_or_default(is_sqlite))
    }

    /// Get idle timeout with default value.
    pub fn idle_timeout_or_default(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    /// Get acquire timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.conn_max_lifetime_secs.map(Duration::from_secs)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_open_conns {
            if max == 0 {
                return Err("max_open_conns must be greater than 0".to_string());
            }
            if let Some(idle) = self.max_idle_conns {
                if idle > max {
                    return Err(format!(
                        "max_idle_conns ({}) cannot exceed max_open_conns ({})",
                        idle, max
                    ));
                }
            }
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err("acquire_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Algorithm selecting a read replica per read call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderPolicy {
    /// Uniform pick among configured readers.
    #[default]
    Random,
    /// Cyclic pick driven by an atomic per-connection counter.
    #[serde(alias = "roundrobin")]
    RoundRobin,
}

impl std::fmt::Display for ReaderPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Random => write!(f, "random"),
            Self::RoundRobin => write!(f, "round_robin"),
        }
    }
}

/// One configured database endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    pub id: u32,
    pub driver: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name (file path for SQLite)
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    /// Contains sensitive data - never log
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Raw DSN used instead of the composed one.
    #[serde(default)]
    pub dsn: Option<String>,
    /// Writer DSN; takes precedence over `dsn`.
    #[serde(default)]
    pub writer_dsn: Option<String>,
    #[serde(default)]
    pub reader_dsns: Vec<String>,
    #[serde(default)]
    pub reader_policy: ReaderPolicy,
    #[serde(default)]
    pub pool: PoolOptions,
    /// Inclusive `[start, end]` logical indices owned by this entry (sharding only).
    #[serde(default)]
    pub table_range: Option<[u32; 2]>,
}

impl std::fmt::Debug for ShardConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardConfig")
            .field("id", &self.id)
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("has_password", &self.password.is_some())
            .field("reader_count", &self.reader_dsns.len())
            .field("reader_policy", &self.reader_policy)
            .field("pool", &self.pool)
            .field("table_range", &self.table_range)
            .finish_non_exhaustive()
    }
}

impl ShardConfig {
    /// Minimal entry for a driver and raw DSN.
    pub fn with_dsn(id: u32, driver: &str, dsn: impl Into<String>) -> Self {
        Self {
            id,
            driver: driver.to_string(),
            host: None,
            port: None,
            name: None,
            user: None,
            password: None,
            dsn: Some(dsn.into()),
            writer_dsn: None,
            reader_dsns: Vec::new(),
            reader_policy: ReaderPolicy::default(),
            pool: PoolOptions::default(),
            table_range: None,
        }
    }

    pub fn table_range(mut self, start: u32, end: u32) -> Self {
        self.table_range = Some([start, end]);
        self
    }

    pub fn readers(mut self, reader_dsns: Vec<String>, policy: ReaderPolicy) -> Self {
        self.reader_dsns = reader_dsns;
        self.reader_policy = policy;
        self
    }

    /// Resolve the configured driver name, failing for unknown drivers.
    pub fn resolve_driver(&self, group: GroupKind) -> ShardResult<Driver> {
        Driver::from_name(&self.driver).ok_or_else(|| {
            ShardError::config(format!(
                "{}: unknown driver '{}' (expected mysql, postgres or sqlite)",
                ShardRef::new(group, self.id),
                self.driver
            ))
        })
    }

    /// Resolve the writer DSN: `writer_dsn`, then `dsn`, then composed from parts.
    pub fn resolve_writer_dsn(&self, group: GroupKind) -> ShardResult<String> {
        let explicit = self
            .writer_dsn
            .as_deref()
            .or(self.dsn.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        match explicit {
            Some(dsn) => Ok(dsn.to_string()),
            None => self.compose_dsn(group),
        }
    }

    /// Compose a DSN from host/port/name/user/password.
    fn compose_dsn(&self, group: GroupKind) -> ShardResult<String> {
        let shard = ShardRef::new(group, self.id);
        let driver = self.resolve_driver(group)?;
        let name = self
            .name
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ShardError::config(format!("{}: no dsn configured and 'name' is missing", shard))
            })?;

        if driver == Driver::Sqlite {
            return Ok(format!("sqlite:{}", name));
        }

        let host = self
            .host
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ShardError::config(format!("{}: no dsn configured and 'host' is missing", shard))
            })?;
        let port = self.port.or(driver.default_port()).unwrap_or_default();

        let mut url = Url::parse(&format!("{}://{}:{}/{}", driver.scheme(), host, port, name))
            .map_err(|e| ShardError::config(format!("{}: invalid DSN parts: {}", shard, e)))?;
        if let Some(user) = self.user.as_deref().filter(|s| !s.is_empty()) {
            url.set_username(user)
                .map_err(|_| ShardError::config(format!("{}: cannot set user", shard)))?;
        }
        if let Some(password) = self.password.as_deref() {
            url.set_password(Some(password))
                .map_err(|_| ShardError::config(format!("{}: cannot set password", shard)))?;
        }
        Ok(url.to_string())
    }

    /// Replace the password, both in the field and in any explicit network DSN.
    pub fn override_password(&mut self, password: &str) {
        self.password = Some(password.to_string());
        self.dsn = self.dsn.take().map(|dsn| inject_password(&dsn, password));
        self.writer_dsn = self
            .writer_dsn
            .take()
            .map(|dsn| inject_password(&dsn, password));
        self.reader_dsns = self
            .reader_dsns
            .iter()
            .map(|dsn| inject_password(dsn, password))
            .collect();
    }
}

/// Set the password of a URL-shaped DSN. Non-URL and SQLite DSNs are returned unchanged.
fn inject_password(dsn: &str, password: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) if url.scheme() != "sqlite" && url.has_host() => {
            if url.set_password(Some(password)).is_ok() {
                url.to_string()
            } else {
                dsn.to_string()
            }
        }
        _ => dsn.to_string(),
    }
}

/// A logical partitioned table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingTableConfig {
    /// Logical table name prefix, e.g. `dm_users`.
    pub name: String,
    /// Number of logical partitions, e.g. 32.
    pub suffix_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardingConfig {
    #[serde(default, alias = "Databases")]
    pub databases: Vec<ShardConfig>,
    #[serde(default, alias = "Tables")]
    pub tables: Vec<ShardingTableConfig>,
}

/// The database groups document: unsharded master plus routed sharding group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseGroupsConfig {
    #[serde(default, alias = "Master")]
    pub master: Vec<ShardConfig>,
    #[serde(default, alias = "Sharding")]
    pub sharding: ShardingConfig,
}

impl DatabaseGroupsConfig {
    /// Load the document from a file. `.toml` files are parsed as TOML, anything else as JSON.
    pub fn load(path: impl AsRef<Path>) -> ShardResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ShardError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    pub fn from_toml_str(content: &str) -> ShardResult<Self> {
        toml::from_str(content)
            .map_err(|e| ShardError::config(format!("Invalid TOML configuration: {}", e)))
    }

    pub fn from_json_str(content: &str) -> ShardResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| ShardError::config(format!("Invalid JSON configuration: {}", e)))
    }

    /// Apply password overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> usize {
        self.apply_overrides_with(|key| std::env::var(key).ok())
    }

    /// Apply password overrides from `lookup`; returns how many entries were overridden.
    ///
    /// Sharding entries read `DB_PASSWORD_SHARD<id>`, master entries `DB_PASSWORD_MASTER<id>`.
    pub fn apply_overrides_with<F>(&mut self, lookup: F) -> usize
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = 0;
        let groups = [
            (MASTER_PASSWORD_ENV_PREFIX, &mut self.master),
            (SHARD_PASSWORD_ENV_PREFIX, &mut self.sharding.databases),
        ];
        for (prefix, entries) in groups {
            for entry in entries.iter_mut() {
                let key = format!("{}{}", prefix, entry.id);
                if let Some(password) = lookup(&key) {
                    tracing::debug!(key = %key, shard_id = entry.id, "Applying password override");
                    entry.override_password(&password);
                    applied += 1;
                }
            }
        }
        applied
    }
}

/// Operator commands.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Ping every distinct physical connection (startup gate)
    Ping,
    /// Print the logical index to shard routing table
    Routes,
    /// Show where a sharding key routes for a logical table
    Route {
        #[arg(long)]
        table: String,
        #[arg(long)]
        key: String,
    },
    /// Print per-shard row counts for a logical table
    Stats {
        #[arg(long)]
        table: String,
    },
    /// Create every physical table of a logical table on its owning writer
    Bootstrap {
        #[arg(long)]
        table: String,
        /// Column definitions, e.g. "id INTEGER PRIMARY KEY, name TEXT"
        #[arg(long)]
        columns: String,
    },
}

/// Configuration for the shard router CLI.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "shard-router",
    about = "Static routing layer over horizontally-sharded SQL databases",
    version,
    author
)]
pub struct Config {
    /// Database groups document (.toml or .json)
    #[arg(short = 'c', long = "config", value_name = "PATH", env = "SHARD_CONFIG")]
    pub config_path: PathBuf,

    /// Per-shard call timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "SHARD_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Ping timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_PING_TIMEOUT_SECS,
        env = "SHARD_PING_TIMEOUT"
    )]
    pub ping_timeout: u64,

    /// Maximum shards queried concurrently by scatter-gather calls
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_CONCURRENCY,
        env = "SHARD_MAX_CONCURRENCY"
    )]
    pub max_concurrency: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SHARD_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SHARD_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            config_path: PathBuf::from("shards.toml"),
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            ping_timeout: DEFAULT_PING_TIMEOUT_SECS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            log_level: "info".to_string(),
            json_logs: false,
            command: Command::Ping,
        }
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    /// Get the ping timeout as a Duration.
    pub fn ping_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.ping_timeout)
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            query_timeout: self.query_timeout_duration(),
            ping_timeout: self.ping_timeout_duration(),
            max_concurrency: self.max_concurrency.max(1),
        }
    }
}
