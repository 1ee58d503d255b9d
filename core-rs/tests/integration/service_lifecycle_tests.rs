//! Service Lifecycle Integration Tests
//!
//! Tests the coordinator from start to shutdown: config loading, storage
//! directory creation, path ensuring, connection churn, flush barriers and
//! draining shutdown.
//!
//! Uses tempfile for isolation - NO /tmp pollution

#[path = "../contracts/support.rs"]
mod support;

use originstore_core::{CoordinatorService, QueuePolicy, RawRequest, ReplyPayload, ServiceConfig, StoreError};
use serde_json::json;
use std::fs;
use support::*;
use tempfile::TempDir;

#[test]
fn test_start_from_yaml_config() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("originstore.yaml");
    fs::write(
        &config_path,
        format!(
            "storageDirectory: {}\nqueue:\n  policy: bounded\n  capacity: 16\nlogging:\n  level: debug\n",
            storage_root(&temp).display()
        ),
    )
    .unwrap();

    let config = ServiceConfig::load(&config_path).unwrap();
    assert_eq!(config.queue, QueuePolicy::Bounded { capacity: 16 });

    let service = CoordinatorService::start(config).unwrap();
    assert!(storage_root(&temp).is_dir());
    assert_eq!(service.config().logging.level, "debug");
    service.shutdown().unwrap();
}

#[test]
fn test_malformed_config_rejected() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("bad.yaml");
    fs::write(&config_path, "queue:\n  policy: sometimes\n").unwrap();
    assert!(ServiceConfig::load(&config_path).is_err());
}

#[tokio::test]
async fn test_ensure_then_open_under_new_directory() {
    let temp = TempDir::new().unwrap();
    let service = start_service(&temp);
    let mut client = service.attach();

    let relative = database("https://fresh.example", "db").relative_path();
    service.ensure_relative_path_exists(relative.clone()).unwrap();

    // Queued after the ensure, so the directory already exists when it runs
    let reply = call(&service, &mut client, "open-database", json!({"origin": "https://fresh.example", "name": "db"}), 1).await;
    assert!(matches!(reply.payload, ReplyPayload::Opened { .. }));
    assert_eq!(service.absolute_path(&relative).unwrap(), storage_root(&temp).join(&relative));
    assert!(storage_root(&temp).join(&relative).is_dir());
    service.shutdown().unwrap();
}

#[test]
fn test_path_escape_rejected_synchronously() {
    let temp = TempDir::new().unwrap();
    let service = start_service(&temp);

    for bad in ["../outside", "/etc", "a/../../b"] {
        let err = service.ensure_relative_path_exists(bad).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(_)), "{} should be rejected", bad);
    }
    assert!(!temp.path().join("outside").exists());
    service.shutdown().unwrap();
}

#[tokio::test]
async fn test_connection_churn_leaves_registry_empty() {
    let temp = TempDir::new().unwrap();
    let service = start_service(&temp);

    for round in 0..20u64 {
        let mut client = service.attach();
        let params = json!({"origin": "https://churn.example", "name": format!("db{}", round % 3)});
        call(&service, &mut client, "open-database", params.clone(), 1).await;
        if round % 2 == 0 {
            call(&service, &mut client, "close-database", params, 2).await;
        }
        service.on_connection_closed(client.id());
    }

    assert!(service.registered_databases().await.unwrap().is_empty());
    assert!(service.connections().is_empty());
    service.shutdown().unwrap();
}

#[tokio::test]
async fn test_unknown_connection_rejected() {
    let temp = TempDir::new().unwrap();
    let service = start_service(&temp);
    let client = service.attach();
    service.on_connection_closed(client.id());

    let err = service
        .on_request_arrived(client.id(), RawRequest::new("delete-all", json!(null), 1))
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownConnection(_)));

    // Closing twice is harmless
    service.on_connection_closed(client.id());
    service.shutdown().unwrap();
}

#[tokio::test]
async fn test_flush_waits_for_queued_work() {
    let temp = TempDir::new().unwrap();
    let (service, gate) = start_gated(&temp, QueuePolicy::Unbounded);
    let mut client = service.attach();

    send(&service, &client, "enumerate-origins", json!(null), 1);
    gate.wait_parked();
    for callback in 2..=5 {
        send(&service, &client, "delete-all", json!(null), callback);
    }
    assert!(service.queue_depth() >= 4);

    let mut flushed = service.flush().unwrap();
    assert!(flushed.try_recv().is_err(), "flush resolved while work was still queued");

    gate.open();
    flushed.await.unwrap();
    assert_eq!(service.queue_depth(), 0);
    for callback in 1..=5 {
        assert_eq!(client.try_next_reply().unwrap().callback_id.0, callback);
    }
    service.shutdown().unwrap();
}

#[test]
fn test_shutdown_drains_before_returning() {
    let temp = TempDir::new().unwrap();
    let service = start_service(&temp);

    for i in 0..25 {
        service.ensure_relative_path_exists(format!("drain/{}", i)).unwrap();
    }
    service.shutdown().unwrap();

    for i in 0..25 {
        assert!(storage_root(&temp).join("drain").join(i.to_string()).is_dir());
    }
    assert!(matches!(service.flush(), Err(StoreError::QueueClosed)));
}

#[tokio::test]
async fn test_pending_reference_tracks_queued_open() {
    let temp = TempDir::new().unwrap();
    let (service, gate) = start_gated(&temp, QueuePolicy::Unbounded);
    let mut client = service.attach();
    let id = database("https://ref.example", "db");

    send(&service, &client, "enumerate-origins", json!(null), 1);
    gate.wait_parked();
    send(&service, &client, "open-database", json!({"origin": "https://ref.example", "name": "db"}), 2);
    assert_eq!(service.pending_references(&id), 1);

    gate.open();
    next_reply(&mut client).await;
    next_reply(&mut client).await;
    assert_eq!(service.pending_references(&id), 0);
    service.shutdown().unwrap();
}
