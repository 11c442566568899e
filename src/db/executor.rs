//! Statement execution against sqlx pools.
//!
//! Each driver gets an identical module generated by `driver_executor!`:
//! - `fetch_all`: run a query and decode every row to JSON
//! - `execute`: run a statement and report affected rows
//! - `ping`: round-trip a trivial statement
//!
//! Deadlines are not applied here; callers in the sharding layer wrap every
//! call in a timeout so fakes and real pools behave the same. Pool acquire
//! timeouts report the pool's own configured limit.

use crate::db::types::RowToJson;
use crate::error::{ShardError, ShardResult};
use crate::models::{QueryParam, Row};
use serde_json::Value as JsonValue;
use sqlx::types::Json;

/// Bind every parameter in order. `$json` converts an owned JSON value into
/// the driver's bindable JSON representation.
macro_rules! bind_all {
    ($query:expr, $params:expr, $json:expr) => {{
        let mut query = $query;
        for param in $params {
            query = match param {
                QueryParam::Null => query.bind(None::<String>),
                QueryParam::Bool(v) => query.bind(*v),
                QueryParam::Int(v) => query.bind(*v),
                QueryParam::Float(v) => query.bind(*v),
                QueryParam::String(v) => query.bind(v.as_str()),
                QueryParam::Json(v) => query.bind(($json)(v.clone())),
            };
        }
        query
    }};
}

macro_rules! driver_executor {
    ($module:ident, $db:ty, $pool:ty, $json:expr) => {
        pub(crate) mod $module {
            use super::*;

            fn pool_error(pool: &$pool, err: sqlx::Error) -> ShardError {
                match err {
                    sqlx::Error::PoolTimedOut => ShardError::timeout(
                        "connection pool acquire",
                        pool.options().get_acquire_timeout().as_millis() as u64,
                    ),
                    other => other.into(),
                }
            }

            pub async fn fetch_all(
                pool: &$pool,
                sql: &str,
                params: &[QueryParam],
            ) -> ShardResult<Vec<Row>> {
                // Without params, use raw SQL to avoid prepared statement issues
                let fetched = if params.is_empty() {
                    use sqlx::Executor;
                    pool.fetch_all(sql).await
                } else {
                    bind_all!(sqlx::query::<$db>(sql), params, $json)
                        .fetch_all(pool)
                        .await
                };
                let rows = fetched.map_err(|e| pool_error(pool, e))?;
                Ok(rows.iter().map(|r| r.to_row()).collect())
            }

            pub async fn execute(
                pool: &$pool,
                sql: &str,
                params: &[QueryParam],
            ) -> ShardResult<u64> {
                let executed = if params.is_empty() {
                    use sqlx::Executor;
                    pool.execute(sql).await
                } else {
                    bind_all!(sqlx::query::<$db>(sql), params, $json)
                        .execute(pool)
                        .await
                };
                let result = executed.map_err(|e| pool_error(pool, e))?;
                Ok(result.rows_affected())
            }

            pub async fn ping(pool: &$pool) -> ShardResult<()> {
                sqlx::query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(|e| pool_error(pool, e))?;
                Ok(())
            }
        }
    };
}

driver_executor!(mysql, sqlx::MySql, sqlx::MySqlPool, Json::<JsonValue>);
driver_executor!(postgres, sqlx::Postgres, sqlx::PgPool, Json::<JsonValue>);
// SQLite doesn't have native JSON type, store as string
driver_executor!(sqlite, sqlx::Sqlite, sqlx::SqlitePool, |v: JsonValue| v.to_string());
