use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use fleet_http_insecure::InsecureHttpServer;
use fleet_node::{
    Error, Lifecycle, LifecycleState, Node, NodeOptions, TeardownReport, load_migrations,
};
use fleet_replica_memory::{MemoryReplica, ReplicaEvent};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

const WAIT: Duration = Duration::from_secs(10);

struct Harness {
    addr: SocketAddr,
    lifecycle: Lifecycle,
    replica: Arc<MemoryReplica>,
    run: JoinHandle<fleet_node::Result<TeardownReport>>,
    shutdown: CancellationToken,
}

fn start(replica: MemoryReplica, ready_timeout: Option<Duration>) -> Harness {
    let addr = SocketAddr::V4(SocketAddrV4::new(
        Ipv4Addr::LOCALHOST,
        fleet_util::allocate_port(),
    ));
    let replica = Arc::new(replica);
    let shutdown = CancellationToken::new();

    let migrations =
        load_migrations(concat!(env!("CARGO_MANIFEST_DIR"), "/../../sql/migrations")).unwrap();

    let node = Node::new(NodeOptions {
        replica: replica.clone(),
        http_server: InsecureHttpServer::with_drain_timeout(addr, Duration::from_secs(5)),
        db_name: "test".to_string(),
        migrations,
        ready_timeout,
        shutdown: shutdown.clone(),
    });
    let lifecycle = node.lifecycle().clone();

    Harness {
        addr,
        lifecycle,
        replica,
        run: tokio::spawn(node.run()),
        shutdown,
    }
}

async fn wait_for_state(lifecycle: &Lifecycle, state: LifecycleState) {
    let mut receiver = lifecycle.subscribe();

    tokio::time::timeout(WAIT, receiver.wait_for(|current| *current == state))
        .await
        .expect("timed out waiting for lifecycle state")
        .unwrap();
}

#[tokio::test]
#[traced_test]
async fn test_serves_only_after_ready_and_tears_down_in_order() {
    let harness = start(MemoryReplica::gated("mem-0"), None);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.lifecycle.state(), LifecycleState::Starting);
    assert!(
        reqwest::get(format!("http://{}/ping", harness.addr))
            .await
            .is_err()
    );

    harness.replica.mark_ready();
    wait_for_state(&harness.lifecycle, LifecycleState::Serving).await;

    let body = reqwest::get(format!("http://{}/ping", harness.addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "pong");

    harness.shutdown.cancel();
    let report = harness.run.await.unwrap().unwrap();

    assert!(report.is_clean());
    assert_eq!(harness.lifecycle.state(), LifecycleState::Stopped);
    assert_eq!(
        harness.replica.events(),
        vec![
            ReplicaEvent::Ready,
            ReplicaEvent::Opened("test".to_string()),
            ReplicaEvent::ConnectionClosed("test".to_string()),
            ReplicaEvent::Handover,
            ReplicaEvent::Closed,
        ]
    );
}

#[tokio::test]
async fn test_client_surface_over_migrated_database() {
    let harness = start(MemoryReplica::new("mem-0"), None);
    wait_for_state(&harness.lifecycle, LifecycleState::Serving).await;

    let client = reqwest::Client::new();
    let base = format!("http://{}", harness.addr);

    let response = client
        .post(format!("{base}/debug"))
        .json(&serde_json::json!({ "note": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_LOCATION],
        "/debug/1"
    );

    for _ in 0..2 {
        let response = client.get(format!("{base}/inc")).send().await.unwrap();
        assert!(response.status().is_success());
    }

    let body = client
        .get(format!("{base}/"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "count: 2\n");

    harness.shutdown.cancel();
    assert!(harness.run.await.unwrap().unwrap().is_clean());
}

#[tokio::test]
async fn test_handover_failure_does_not_skip_replica_close() {
    let replica = MemoryReplica::new("mem-0");
    replica.fail_handover("no other voter");

    let harness = start(replica, None);
    wait_for_state(&harness.lifecycle, LifecycleState::Serving).await;

    harness.shutdown.cancel();
    let report = harness.run.await.unwrap().unwrap();

    assert!(report.close_database.is_ok());
    assert!(report.handover.is_err());
    assert!(report.close_replica.is_ok());
    assert_eq!(
        harness.replica.events().last(),
        Some(&ReplicaEvent::Closed)
    );
}

#[tokio::test]
async fn test_shutdown_before_ready_fails_startup() {
    let harness = start(MemoryReplica::gated("mem-0"), None);

    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.shutdown.cancel();

    let result = harness.run.await.unwrap();

    assert!(matches!(result, Err(Error::Bootstrap(_))));
    assert_eq!(harness.lifecycle.state(), LifecycleState::Stopped);
    assert!(!harness.replica.events().contains(&ReplicaEvent::Ready));
    assert_eq!(
        harness.replica.events().last(),
        Some(&ReplicaEvent::Closed)
    );
}

#[tokio::test]
async fn test_ready_timeout_fails_startup() {
    let harness = start(
        MemoryReplica::gated("mem-0"),
        Some(Duration::from_millis(100)),
    );

    let result = tokio::time::timeout(WAIT, harness.run).await.unwrap().unwrap();

    assert!(matches!(result, Err(Error::Bootstrap(_))));
    assert!(
        reqwest::get(format!("http://{}/ping", harness.addr))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_request_finish() {
    let harness = start(MemoryReplica::new("mem-0"), None);
    wait_for_state(&harness.lifecycle, LifecycleState::Serving).await;

    harness.replica.slow_writes(Duration::from_millis(500));

    let url = format!("http://{}/debug", harness.addr);
    let in_flight = tokio::spawn(async move {
        reqwest::Client::new()
            .post(url)
            .json(&serde_json::json!({ "note": "x" }))
            .send()
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.shutdown.cancel();

    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_LOCATION],
        "/debug/1"
    );

    let report = tokio::time::timeout(WAIT, harness.run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(report.is_clean());
    assert_eq!(harness.lifecycle.state(), LifecycleState::Stopped);
    assert!(
        reqwest::get(format!("http://{}/ping", harness.addr))
            .await
            .is_err()
    );
}
