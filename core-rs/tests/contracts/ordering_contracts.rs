// Ordering Contract Tests
//
// Tasks run one at a time, in enqueue order, whoever enqueued them.

use crate::support::*;
use originstore_core::{QueuePolicy, ReplyPayload, StoreError};
use serde_json::json;
use tempfile::TempDir;

/// WHY: A task must see every side effect of the tasks queued before it
/// REASON: Clients rely on "open, then delete, then enumerate" meaning exactly that
/// BREAKS: Any client that pipelines requests without waiting for replies
#[tokio::test]
async fn pipelined_requests_observe_earlier_effects() {
    let temp = TempDir::new().unwrap();
    let service = start_service(&temp);
    let mut client = service.attach();

    send(&service, &client, "open-database", json!({"origin": "https://a.example", "name": "x"}), 1);
    send(&service, &client, "enumerate-origins", json!(null), 2);
    send(&service, &client, "delete-for-origin", json!({"origin": "https://a.example"}), 3);
    send(&service, &client, "enumerate-origins", json!(null), 4);

    let replies = [
        next_reply(&mut client).await,
        next_reply(&mut client).await,
        next_reply(&mut client).await,
        next_reply(&mut client).await,
    ];

    let callbacks: Vec<u64> = replies.iter().map(|r| r.callback_id.0).collect();
    assert_eq!(callbacks, vec![1, 2, 3, 4], "replies arrive in execution order");
    assert_eq!(
        replies[1].payload,
        ReplyPayload::Origins {
            origins: vec![origin("https://a.example")]
        }
    );
    assert_eq!(replies[2].payload, ReplyPayload::Removed { count: 1 });
    assert_eq!(replies[3].payload, ReplyPayload::Origins { origins: vec![] });
    service.shutdown().unwrap();
}

/// WHY: Requests from different connections interleave by arrival, not by owner
/// REASON: Fairness is arrival order; there is no per-connection priority
/// BREAKS: Cross-connection consistency (a delete could overtake an open)
#[tokio::test]
async fn connections_interleave_by_arrival() {
    let temp = TempDir::new().unwrap();
    let (service, gate) = start_gated(&temp, QueuePolicy::Unbounded);
    let mut parker = service.attach();
    let mut opener = service.attach();
    let mut wiper = service.attach();

    send(&service, &parker, "enumerate-origins", json!(null), 1);
    gate.wait_parked();

    send(&service, &opener, "open-database", json!({"origin": "https://b.example", "name": "x"}), 7);
    send(&service, &wiper, "delete-all", json!(null), 8);
    gate.open();

    next_reply(&mut parker).await;
    assert!(matches!(next_reply(&mut opener).await.payload, ReplyPayload::Opened { .. }));
    assert_eq!(next_reply(&mut wiper).await.payload, ReplyPayload::Removed { count: 1 });
    service.shutdown().unwrap();
}

/// WHY: Enqueue never blocks, so a full bounded queue must say so immediately
/// REASON: Producers run on connection threads that must stay responsive
/// BREAKS: Liveness of every connection when the worker falls behind
#[tokio::test]
async fn full_queue_rejects_without_blocking() {
    let temp = TempDir::new().unwrap();
    let (service, gate) = start_gated(&temp, QueuePolicy::Bounded { capacity: 2 });
    let mut client = service.attach();

    send(&service, &client, "enumerate-origins", json!(null), 1);
    gate.wait_parked();
    send(&service, &client, "delete-all", json!(null), 2);
    send(&service, &client, "delete-all", json!(null), 3);

    let err = service
        .on_request_arrived(client.id(), originstore_core::RawRequest::new("delete-all", json!(null), 4))
        .unwrap_err();
    assert!(matches!(err, StoreError::QueueFull { capacity: 2 }));
    assert!(!err.is_protocol_violation());

    gate.open();
    for expected in 1..=3 {
        assert_eq!(next_reply(&mut client).await.callback_id.0, expected);
    }
    service.shutdown().unwrap();
}

fn list_storage(temp: &TempDir) -> Vec<std::path::PathBuf> {
    let mut paths: Vec<_> = walkdir::WalkDir::new(storage_root(temp))
        .into_iter()
        .map(|entry| entry.unwrap().into_path())
        .collect();
    paths.sort();
    paths
}

/// WHY: Ensuring a directory twice must be as good as ensuring it once
/// REASON: Callers ensure paths defensively before every database creation
/// BREAKS: Database creation for any origin whose directory already exists
#[tokio::test]
async fn ensure_path_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let service = start_service(&temp);

    service.ensure_relative_path_exists("https_a.example_443").unwrap();
    service.flushed().await.unwrap();
    let first = list_storage(&temp);

    service.ensure_relative_path_exists("https_a.example_443").unwrap();
    service.flushed().await.unwrap();
    let second = list_storage(&temp);

    assert_eq!(first, second);
    assert!(storage_root(&temp).join("https_a.example_443").is_dir());
    service.shutdown().unwrap();
}
