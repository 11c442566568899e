//! Shard Router - operator CLI.
//!
//! Loads a database groups document, builds the group manager and runs one
//! command against it (ping, routing inspection, stats, schema bootstrap).

use clap::Parser;
use shard_router::config::{Command, Config, DatabaseGroupsConfig};
use shard_router::error::ShardError;
use shard_router::sharding::GroupManager;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(config: &Config, manager: &GroupManager) -> Result<(), ShardError> {
    match &config.command {
        Command::Ping => {
            manager.ping_all().await?;
            println!("ok");
        }
        Command::Routes => {
            let connections = manager.get_all_sharding_connections()?;
            let routers = manager.tables()?;
            for (index, shard) in manager.routes()? {
                let tables: Vec<String> = routers
                    .iter()
                    .filter_map(|t| t.physical_table(index).ok())
                    .collect();
                println!("{:>4}  {}  {}", index, shard, tables.join(" "));
            }
            println!(
                "{} logical indices over {} physical connections",
                manager.suffix_count()?,
                connections.len()
            );
        }
        Command::Route { table, key } => {
            let table = manager.table(table)?;
            let (index, physical) = table.router().resolve(key.as_str());
            let (shard, connection) = manager.route(index)?;
            let output = serde_json::json!({
                "table": table.name(),
                "key": key,
                "index": index,
                "physical_table": physical,
                "shard": shard.to_string(),
                "connection": connection.key().masked(),
            });
            println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
        }
        Command::Stats { table } => {
            let report = manager.table(table)?.shard_stats().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report)
                    .map_err(|e| ShardError::internal(e.to_string()))?
            );
        }
        Command::Bootstrap { table, columns } => {
            let ensured = manager.table(table)?.ensure_tables(columns).await?;
            println!("ensured {} physical tables", ensured);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!(
        config = %config.config_path.display(),
        "Starting shard-router v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut groups = DatabaseGroupsConfig::load(&config.config_path)?;
    let overridden = groups.apply_env_overrides();
    if overridden > 0 {
        info!(count = overridden, "Applied password overrides from environment");
    }

    let manager = match GroupManager::connect(&groups, config.manager_options()).await {
        Ok(manager) => manager,
        Err(e) => {
            error!(error = %e, "Failed to build group manager");
            return Err(e.into());
        }
    };

    let result = run(&config, &manager).await;
    if let Err(close_err) = manager.close_all().await {
        error!(error = %close_err, "Shutdown error");
    }

    if let Err(e) = result {
        error!(error = %e, suggestion = e.suggestion().unwrap_or(""), "Command failed");
        return Err(e.into());
    }

    info!("Shutdown complete");
    Ok(())
}
