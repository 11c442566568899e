//! Connection-related data models.
//!
//! This module defines the identity types shared by the factory, the router and
//! the error taxonomy.

use serde::{Deserialize, Serialize};

/// Supported database drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// Includes MariaDB
    MySql,
    Postgres,
    Sqlite,
}

impl Driver {
    /// Parse a driver from its configured name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Some(Self::MySql),
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Get the display name for this driver.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::Postgres => "PostgreSQL",
            Self::Sqlite => "SQLite",
        }
    }

    /// URL scheme used when composing a DSN from parts.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Get the default port for this driver.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::MySql => Some(3306),
            Self::Postgres => Some(5432),
            Self::Sqlite => None,
        }
    }

    /// Bind placeholder for the 1-based parameter `position`.
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Self::Postgres => format!("${}", position),
            Self::MySql | Self::Sqlite => "?".to_string(),
        }
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Routing role of a connection group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    /// Unsharded connections.
    Master,
    /// Connections owning logical table ranges.
    Sharding,
}

impl std::fmt::Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Sharding => write!(f, "sharding"),
        }
    }
}

/// Identity of a configured shard entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardRef {
    pub group: GroupKind,
    pub id: u32,
}

impl ShardRef {
    pub fn new(group: GroupKind, id: u32) -> Self {
        Self { group, id }
    }

    pub fn master(id: u32) -> Self {
        Self::new(GroupKind::Master, id)
    }

    pub fn sharding(id: u32) -> Self {
        Self::new(GroupKind::Sharding, id)
    }
}

impl std::fmt::Display for ShardRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} shard {}", self.group, self.id)
    }
}

/// De-duplication key of a physical connection.
///
/// Two shard entries resolving to the same key share one pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub driver: Driver,
    /// Resolved writer DSN. Contains sensitive data - never log
    pub dsn: String,
}

impl ConnectionKey {
    pub fn new(driver: Driver, dsn: impl Into<String>) -> Self {
        Self {
            driver,
            dsn: dsn.into(),
        }
    }

    /// Display-safe version of the key (credentials masked).
    pub fn masked(&self) -> String {
        format!("{}:{}", self.driver.scheme(), mask_dsn(&self.dsn))
    }
}

/// Which handle of a physical connection a pool was opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleRole {
    Writer,
    /// Reader at the given position in the configured reader list.
    Reader(usize),
}

impl HandleRole {
    pub fn is_writer(&self) -> bool {
        matches!(self, Self::Writer)
    }
}

impl std::fmt::Display for HandleRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Writer => write!(f, "writer"),
            Self::Reader(idx) => write!(f, "reader[{}]", idx),
        }
    }
}

/// Get a display-safe version of a DSN (password masked).
pub fn mask_dsn(dsn: &str) -> String {
    // Simple masking: replace password in URL
    if let Some(at_pos) = dsn.rfind('@') {
        let scheme_end = dsn.find("://").map(|p| p + 3).unwrap_or(0);
        if let Some(colon_pos) = dsn[scheme_end..at_pos].rfind(':') {
            let colon_pos = scheme_end + colon_pos;
            let prefix = &dsn[..colon_pos + 1];
            let suffix = &dsn[at_pos..];
            return format!("{}****{}", prefix, suffix);
        }
    }
    dsn.to_string()
}
