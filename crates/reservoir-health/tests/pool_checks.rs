//! Pool-backed checks against real `ConnectionPool`s over a mock backend.

mod common;

use std::sync::Arc;

use common::{MockBackend, manager, manager_with_backend};
use reservoir_health::{
    ComponentCheck, ConnectionPoolsCheck, DatabaseCheck, HealthCheckConfig, HealthCheckService,
    HealthStatus, PoolProbeCheck,
};
use reservoir_pool::{PoolManager, PoolManagerConfig};
use rstest::rstest;

/// Hold `active` of `total` connections checked out of the `database` pool
async fn hold(
    manager: &PoolManager,
    active: usize,
    total: usize,
) -> Vec<reservoir_pool::PooledConnection<MockBackend>> {
    let pool = manager.get_typed_pool::<MockBackend>("database").unwrap();
    let mut held = Vec::new();
    for _ in 0..total {
        held.push(pool.get_connection().await.unwrap());
    }
    held.truncate(active);
    held
}

#[rstest]
#[case(90.0, HealthStatus::Degraded)]
#[case(95.0, HealthStatus::Healthy)]
#[tokio::test]
async fn test_database_usage_threshold(#[case] threshold: f64, #[case] expected: HealthStatus) {
    let manager = manager(&[("database", 0, 20)]).await;
    let _held = hold(&manager, 18, 20).await;

    let health = DatabaseCheck::new(Arc::clone(&manager), threshold)
        .check()
        .await
        .unwrap();

    assert_eq!(health.status, expected);
    assert_eq!(health.usage_percent(), Some(90.0));
    assert_eq!(health.threshold_percent(), Some(threshold));
    assert_eq!(health.metadata["active_connections"], 18);
    assert_eq!(health.metadata["total_connections"], 20);
}

#[tokio::test]
async fn test_database_degradation_alert_carries_usage() {
    let manager = manager(&[("database", 0, 20)]).await;
    let _held = hold(&manager, 18, 20).await;

    let service = HealthCheckService::new(HealthCheckConfig::default()).unwrap();
    service.register(DatabaseCheck::new(Arc::clone(&manager), 90.0));
    let result = service.perform_comprehensive_health_check().await;

    assert_eq!(result.overall_status, HealthStatus::Degraded);
    assert_eq!(
        result.alerts,
        vec!["database is degraded: pool usage at 90.0% (threshold 90.0%)"]
    );
}

#[tokio::test]
async fn test_database_check_on_closed_pool_is_unhealthy() {
    let manager = manager(&[("database", 2, 4)]).await;
    manager.get_pool("database").unwrap().close().await.unwrap();

    let health = DatabaseCheck::new(manager, 90.0).check().await.unwrap();
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert!(health.message.contains("failed its health probe"));
}

#[tokio::test]
async fn test_pool_checks_agree_after_error_burst() {
    let (manager, backend) = manager_with_backend(&[("database", 1, 4)]).await;
    let pool = manager.get_typed_pool::<MockBackend>("database").unwrap();

    // Each checkout discards the idle connection and opens a fresh one
    backend.set_invalid(true);
    for _ in 0..6 {
        drop(pool.get_connection().await.unwrap());
    }
    backend.set_invalid(false);
    assert_eq!(pool.stats().connection_errors, 6);

    let service = HealthCheckService::new(HealthCheckConfig::default()).unwrap();
    service.register(DatabaseCheck::new(Arc::clone(&manager), 90.0));
    service.register(ConnectionPoolsCheck::new(Arc::clone(&manager), 90.0));
    service.register(PoolProbeCheck::new(
        "database_ping",
        reservoir_health::ComponentType::Database,
        Arc::clone(&manager),
        "database",
    ));

    for _ in 0..2 {
        let result = service.perform_comprehensive_health_check().await;

        assert_eq!(result.components["database"].status, HealthStatus::Unhealthy);
        assert_eq!(
            result.components["database_ping"].status,
            HealthStatus::Unhealthy
        );
        let pools = &result.components["connection_pools"];
        assert_eq!(pools.status, HealthStatus::Degraded);
        assert_eq!(pools.metadata["failing_pools"], serde_json::json!(["database"]));
    }

    // Health checks stay out of the hit counter
    assert_eq!(pool.stats().pool_hits, 0);
}

#[tokio::test]
async fn test_unconfigured_components_report_healthy() {
    let empty = Arc::new(PoolManager::new(PoolManagerConfig::new()));
    empty.initialize().await.unwrap();

    let database = DatabaseCheck::new(Arc::clone(&empty), 90.0).check().await.unwrap();
    assert_eq!(database.status, HealthStatus::Healthy);
    assert_eq!(database.message, "database not configured");

    let cache = PoolProbeCheck::cache(Arc::clone(&empty)).check().await.unwrap();
    assert_eq!(cache.status, HealthStatus::Healthy);
    assert_eq!(cache.message, "cache not configured");

    let api = PoolProbeCheck::external_api(Arc::clone(&empty))
        .check()
        .await
        .unwrap();
    assert_eq!(api.status, HealthStatus::Healthy);

    let pools = ConnectionPoolsCheck::new(empty, 90.0).check().await.unwrap();
    assert_eq!(pools.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_cache_probe_reports_pool_state() {
    let manager = manager(&[("cache", 1, 2)]).await;

    let health = PoolProbeCheck::cache(Arc::clone(&manager))
        .check()
        .await
        .unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.metadata["backend"], "other");

    manager.get_pool("cache").unwrap().close().await.unwrap();
    let health = PoolProbeCheck::cache(manager).check().await.unwrap();
    assert_eq!(health.status, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn test_connection_pools_near_capacity() {
    let manager = manager(&[("database", 0, 10)]).await;
    let _held = hold(&manager, 10, 10).await;

    let health = ConnectionPoolsCheck::new(Arc::clone(&manager), 90.0)
        .check()
        .await
        .unwrap();
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.message, "connection pools near capacity: 10/10");
}

#[tokio::test]
async fn test_connection_pools_with_no_connections_are_unhealthy() {
    let manager = manager(&[("database", 0, 4)]).await;
    manager.get_pool("database").unwrap().close().await.unwrap();

    let health = ConnectionPoolsCheck::new(manager, 90.0).check().await.unwrap();
    assert_eq!(health.status, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn test_connection_pools_healthy() {
    let manager = manager(&[("database", 2, 10), ("cache", 1, 4)]).await;

    let health = ConnectionPoolsCheck::new(manager, 90.0).check().await.unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.metadata["pools"], 2);
}

#[tokio::test]
async fn test_default_check_set() {
    let manager = manager(&[("database", 1, 4)]).await;
    let service = HealthCheckService::with_default_checks(HealthCheckConfig::default(), manager)
        .unwrap();

    let mut names = service.check_names();
    names.sort();
    assert_eq!(
        names,
        vec![
            "cache",
            "connection_pools",
            "cpu",
            "database",
            "external_api",
            "file_system",
            "memory"
        ]
    );
}
