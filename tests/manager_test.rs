//! Integration tests for group manager construction and lifecycle.

mod common;

use common::{FakeOpener, groups, shard, two_shards};
use shard_router::config::ShardConfig;
use shard_router::error::ShardError;
use shard_router::models::ShardRef;
use shard_router::sharding::{GroupManager, ManagerOptions};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

async fn connect(
    cfg: &shard_router::DatabaseGroupsConfig,
    opener: &Arc<FakeOpener>,
) -> Result<GroupManager, ShardError> {
    GroupManager::connect_with(cfg, opener.clone(), ManagerOptions::default()).await
}

#[tokio::test]
async fn test_ready_manager_routes_every_index() {
    let opener = Arc::new(FakeOpener::new());
    let manager = assert_ok!(connect(&two_shards(), &opener).await);

    assert_eq!(assert_ok!(manager.suffix_count()), 32);
    let routes = assert_ok!(manager.routes());
    assert_eq!(routes.len(), 32);
    assert_eq!(routes[0], (0, ShardRef::sharding(1)));
    assert_eq!(routes[15], (15, ShardRef::sharding(1)));
    assert_eq!(routes[16], (16, ShardRef::sharding(2)));
    assert_eq!(routes[31], (31, ShardRef::sharding(2)));

    let conn = assert_ok!(manager.get_sharding_connection(20));
    assert_eq!(conn.shard(), ShardRef::sharding(2));
    assert_eq!(conn.key().dsn, "fake://db2");

    let master = assert_ok!(manager.get_master_connection());
    assert_eq!(master.shard(), ShardRef::master(0));

    // One master + two sharding writers.
    assert_eq!(opener.open_count(), 3);
}

#[tokio::test]
async fn test_index_out_of_range_is_routing_error() {
    let opener = Arc::new(FakeOpener::new());
    let manager = assert_ok!(connect(&two_shards(), &opener).await);
    let err = assert_err!(manager.get_sharding_connection(32));
    assert!(matches!(err, ShardError::Routing { index: 32, .. }));
}

#[tokio::test]
async fn test_shared_dsn_is_one_connection_closed_once() {
    let opener = Arc::new(FakeOpener::new());
    let cfg = groups(
        vec![
            shard(1, "fake://shared", 0, 7),
            shard(2, "fake://other", 8, 15),
            shard(3, "fake://shared", 16, 31),
        ],
        32,
    );
    let manager = assert_ok!(connect(&cfg, &opener).await);

    let a = assert_ok!(manager.get_sharding_connection(0));
    let b = assert_ok!(manager.get_sharding_connection(20));
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(
        a.shard_refs(),
        &[ShardRef::sharding(1), ShardRef::sharding(3)]
    );

    // Entry 3 still owns its indices for routing purposes.
    assert_eq!(manager.routes().unwrap()[20].1, ShardRef::sharding(3));

    let all = assert_ok!(manager.get_all_sharding_connections());
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].key().dsn, "fake://shared");
    assert_eq!(all[1].key().dsn, "fake://other");

    // master + shared + other
    assert_eq!(opener.open_count(), 3);

    assert_ok!(manager.close_all().await);
    assert_eq!(opener.handle("fake://shared").close_count(), 1);
    assert_eq!(opener.handle("fake://other").close_count(), 1);
    assert_eq!(opener.handle("fake://master").close_count(), 1);
}

#[tokio::test]
async fn test_master_and_shard_sharing_a_dsn_share_the_connection() {
    let opener = Arc::new(FakeOpener::new());
    let mut cfg = two_shards();
    cfg.master = vec![ShardConfig::with_dsn(0, "mysql", "fake://db1")];
    let manager = assert_ok!(connect(&cfg, &opener).await);

    let master = assert_ok!(manager.get_master_connection());
    let shard = assert_ok!(manager.get_sharding_connection(0));
    assert!(Arc::ptr_eq(&master, &shard));

    assert_ok!(manager.ping_all().await);
    assert_eq!(opener.handle("fake://db1").pings.load(std::sync::atomic::Ordering::SeqCst), 1);

    assert_ok!(manager.close_all().await);
    assert_eq!(opener.handle("fake://db1").close_count(), 1);
}

#[tokio::test]
async fn test_second_close_returns_closed() {
    let opener = Arc::new(FakeOpener::new());
    let manager = assert_ok!(connect(&two_shards(), &opener).await);

    assert_ok!(manager.close_all().await);
    assert!(manager.is_closed());
    let err = assert_err!(manager.close_all().await);
    assert!(matches!(err, ShardError::Closed));

    for handle in opener.handles() {
        assert_eq!(handle.close_count(), 1, "{} closed more than once", handle.dsn);
    }
}

#[tokio::test]
async fn test_operations_after_close_fail_with_closed() {
    let opener = Arc::new(FakeOpener::new());
    let manager = assert_ok!(connect(&two_shards(), &opener).await);
    // A table handle taken before shutdown must not keep working after it.
    let table = assert_ok!(manager.table("dm_users"));
    assert_ok!(manager.close_all().await);

    assert!(matches!(manager.get_master_connection(), Err(ShardError::Closed)));
    assert!(matches!(manager.get_sharding_connection(3), Err(ShardError::Closed)));
    assert!(matches!(manager.get_all_sharding_connections(), Err(ShardError::Closed)));
    assert!(matches!(manager.ping_all().await, Err(ShardError::Closed)));
    assert!(matches!(manager.routes(), Err(ShardError::Closed)));
    assert!(matches!(manager.suffix_count(), Err(ShardError::Closed)));
    assert!(matches!(manager.tables(), Err(ShardError::Closed)));
    assert!(matches!(manager.table("dm_users"), Err(ShardError::Closed)));

    let record = shard_router::models::Record::new().with("id", 1i64);
    assert!(matches!(table.insert("k", &record).await, Err(ShardError::Closed)));
    assert!(matches!(
        table.count_across_shards(&shard_router::models::Predicate::all()).await,
        Err(ShardError::Closed)
    ));
}

#[tokio::test]
async fn test_connection_held_across_close_reports_closed() {
    let opener = Arc::new(FakeOpener::new());
    let manager = assert_ok!(connect(&two_shards(), &opener).await);
    let conn = assert_ok!(manager.get_sharding_connection(0));
    assert_ok!(manager.close_all().await);

    assert!(conn.is_closed());
    assert!(matches!(conn.writer(), Err(ShardError::Closed)));
    assert!(matches!(conn.reader(), Err(ShardError::Closed)));
    assert!(matches!(conn.ping().await, Err(ShardError::Closed)));

    // Nothing reached the underlying handle after shutdown.
    let db1 = opener.handle("fake://db1");
    assert_eq!(db1.query_count(), 0);
    assert_eq!(db1.pings.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_gap_and_overlap_are_config_errors() {
    let opener = Arc::new(FakeOpener::new());

    let gap = groups(
        vec![shard(1, "fake://db1", 0, 14), shard(2, "fake://db2", 16, 31)],
        32,
    );
    let err = assert_err!(connect(&gap, &opener).await);
    assert!(matches!(err, ShardError::Config { .. }));

    let overlap = groups(
        vec![shard(1, "fake://db1", 0, 16), shard(2, "fake://db2", 16, 31)],
        32,
    );
    let err = assert_err!(connect(&overlap, &opener).await);
    assert!(matches!(err, ShardError::Config { .. }));

    // Validation happens before anything is opened.
    assert_eq!(opener.open_count(), 0);
}

#[tokio::test]
async fn test_structural_config_errors() {
    let opener = Arc::new(FakeOpener::new());

    let mut unknown_driver = two_shards();
    unknown_driver.sharding.databases[1].driver = "oracle".to_string();
    let err = assert_err!(connect(&unknown_driver, &opener).await);
    assert!(matches!(err, ShardError::Config { .. }));
    assert!(err.to_string().contains("oracle"));

    let mut duplicate = two_shards();
    duplicate.sharding.databases[1].id = 1;
    let err = assert_err!(connect(&duplicate, &opener).await);
    assert!(err.to_string().contains("more than once"));

    let mut no_master = two_shards();
    no_master.master.clear();
    assert!(matches!(
        connect(&no_master, &opener).await,
        Err(ShardError::Config { .. })
    ));

    let mut missing_range = two_shards();
    missing_range.sharding.databases[0].table_range = None;
    assert!(matches!(
        connect(&missing_range, &opener).await,
        Err(ShardError::Config { .. })
    ));

    let mut mixed_counts = two_shards();
    mixed_counts
        .sharding
        .tables
        .push(shard_router::config::ShardingTableConfig {
            name: "dm_orders".to_string(),
            suffix_count: 16,
        });
    assert!(matches!(
        connect(&mixed_counts, &opener).await,
        Err(ShardError::Config { .. })
    ));
}

#[tokio::test]
async fn test_failed_construction_closes_opened_connections() {
    let opener = Arc::new(FakeOpener::new().broken("fake://db2"));
    let err = assert_err!(connect(&two_shards(), &opener).await);
    assert_eq!(err.shard(), Some(ShardRef::sharding(2)));
    assert!(matches!(err, ShardError::Connection { .. }));

    // master and db1 were opened before db2 failed; both are closed again.
    assert_eq!(opener.open_count(), 2);
    for handle in opener.handles() {
        assert_eq!(handle.close_count(), 1);
    }
}

#[tokio::test]
async fn test_ping_all_pings_each_distinct_connection_once() {
    let opener = Arc::new(FakeOpener::new());
    let cfg = groups(
        vec![
            shard(1, "fake://shared", 0, 15),
            shard(2, "fake://shared", 16, 31),
        ],
        32,
    );
    let manager = assert_ok!(connect(&cfg, &opener).await);
    assert_ok!(manager.ping_all().await);

    for handle in opener.handles() {
        assert_eq!(handle.pings.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_ping_all_fails_fast_with_shard_id() {
    let opener = Arc::new(
        FakeOpener::new()
            .unreachable("fake://db2")
            .slow("fake://db1", Duration::from_secs(5))
            .slow("fake://master", Duration::from_secs(5)),
    );
    let manager = assert_ok!(connect(&two_shards(), &opener).await);

    let started = Instant::now();
    let err = assert_err!(manager.ping_all().await);
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(matches!(err, ShardError::Connection { .. }));
    assert_eq!(err.shard(), Some(ShardRef::sharding(2)));
    assert!(err.to_string().contains("sharding shard 2"));
}

#[tokio::test]
async fn test_ping_all_fails_on_unreachable_reader() {
    let opener = Arc::new(FakeOpener::new().unreachable("fake://db2-r1"));
    let readers = vec!["fake://db2-r0".to_string(), "fake://db2-r1".to_string()];
    let cfg = groups(
        vec![
            shard(1, "fake://db1", 0, 15),
            shard(2, "fake://db2", 16, 31)
                .readers(readers, shard_router::config::ReaderPolicy::RoundRobin),
        ],
        32,
    );
    let manager = assert_ok!(connect(&cfg, &opener).await);

    let err = assert_err!(manager.ping_all().await);
    assert!(matches!(err, ShardError::Connection { .. }));
    assert_eq!(err.shard(), Some(ShardRef::sharding(2)));

    // The writer and the healthy reader were reached first.
    assert_eq!(opener.handle("fake://db2").pings.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(opener.handle("fake://db2-r0").pings.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ping_timeout_is_connection_error() {
    let opener = Arc::new(FakeOpener::new().slow("fake://db1", Duration::from_secs(5)));
    let options = ManagerOptions {
        ping_timeout: Duration::from_millis(50),
        ..ManagerOptions::default()
    };
    let manager = assert_ok!(
        GroupManager::connect_with(&two_shards(), opener.clone(), options).await
    );

    let err = assert_err!(manager.ping_all().await);
    assert_eq!(err.shard(), Some(ShardRef::sharding(1)));
    assert!(err.to_string().contains("timed out"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_multiple_masters_returns_first() {
    let opener = Arc::new(FakeOpener::new());
    let mut cfg = two_shards();
    cfg.master
        .push(ShardConfig::with_dsn(1, "mysql", "fake://master-2"));
    let manager = assert_ok!(connect(&cfg, &opener).await);

    let master = assert_ok!(manager.get_master_connection());
    assert_eq!(master.key().dsn, "fake://master");
    assert_eq!(assert_ok!(manager.get_master_connections()).len(), 2);
}

#[tokio::test]
async fn test_unknown_table() {
    let opener = Arc::new(FakeOpener::new());
    let manager = assert_ok!(connect(&two_shards(), &opener).await);
    assert!(manager.table("dm_users").is_ok());
    assert!(matches!(
        manager.table("dm_orders"),
        Err(ShardError::InvalidInput { .. })
    ));
    assert_eq!(assert_ok!(manager.tables()).len(), 1);
}
