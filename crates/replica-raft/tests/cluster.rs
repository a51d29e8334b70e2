use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fleet_replica::{Replica, ReplicaError};
use fleet_replica_raft::{Error, RaftReplica, RaftReplicaOptions};
use fleet_sql::{Migration, SqlConnection, SqlParam};
use fleet_tls::TlsIdentity;
use fleet_util::{allocate_port, write_self_signed};
use tempfile::TempDir;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

const READY_TIMEOUT: Duration = Duration::from_secs(30);

fn identity(dir: &Path) -> Arc<TlsIdentity> {
    write_self_signed(dir, &["fleet.test"]).unwrap();
    Arc::new(TlsIdentity::load(dir).unwrap())
}

fn options(
    name: &str,
    port: u16,
    seeds: Vec<String>,
    data_dir: &Path,
    tls: Arc<TlsIdentity>,
) -> RaftReplicaOptions {
    let mut options = RaftReplicaOptions::new(
        name,
        format!("127.0.0.1:{port}"),
        SocketAddr::from(([127, 0, 0, 1], port)),
        seeds,
        data_dir,
        tls,
    );
    options.join_retry_interval = Duration::from_millis(200);
    options.handover_timeout = Duration::from_secs(15);
    options
}

async fn wait_ready(replica: &RaftReplica) {
    timeout(READY_TIMEOUT, replica.ready(&CancellationToken::new()))
        .await
        .expect("replica did not become ready in time")
        .unwrap();
}

fn counter_migration() -> Migration {
    Migration::new(
        1,
        "create_counter",
        "CREATE TABLE counter (id INTEGER PRIMARY KEY, count INTEGER NOT NULL);\n\
         INSERT INTO counter (id, count) VALUES (1, 0);",
    )
}

async fn increment<C: SqlConnection>(connection: &C) {
    connection
        .execute("UPDATE counter SET count = count + 1 WHERE id = 1", vec![])
        .await
        .unwrap();
}

async fn count<C: SqlConnection>(connection: &C) -> i64 {
    connection
        .query(
            "SELECT count FROM counter WHERE id = ?1",
            vec![SqlParam::Integer(1)],
        )
        .await
        .unwrap()
        .row(0)
        .and_then(|row| row.get_integer(0))
        .unwrap()
}

#[tokio::test]
async fn test_single_node_lifecycle() {
    let tls_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();
    let port = allocate_port();

    let replica = RaftReplica::bootstrap(options(
        "node-0",
        port,
        vec![],
        data_dir.path(),
        identity(tls_dir.path()),
    ))
    .await
    .unwrap();

    wait_ready(&replica).await;
    assert!(replica.is_leader());

    let connection = replica.open("test").await.unwrap();
    assert_eq!(connection.schema_version().await.unwrap(), None);
    assert!(connection.migrate(counter_migration()).await.unwrap());
    assert!(!connection.migrate(counter_migration()).await.unwrap());
    assert_eq!(connection.schema_version().await.unwrap(), Some(1));

    increment(&connection).await;
    increment(&connection).await;
    assert_eq!(count(&connection).await, 2);

    let failed = connection
        .execute("INSERT INTO missing (id) VALUES (1)", vec![])
        .await;
    assert!(matches!(failed, Err(Error::Sql(_))));

    let shared_handle = connection.clone();
    connection.close().await.unwrap();
    assert!(matches!(
        shared_handle
            .execute("UPDATE counter SET count = 0 WHERE id = 1", vec![])
            .await,
        Err(Error::Closed)
    ));
    assert!(matches!(
        shared_handle.schema_version().await,
        Err(Error::Closed)
    ));
    assert!(matches!(connection.close().await, Err(Error::Closed)));

    // Sole voter: nothing to hand over.
    replica.handover(&CancellationToken::new()).await.unwrap();

    replica.close().await.unwrap();
    replica.close().await.unwrap();

    let after_close = replica.ready(&CancellationToken::new()).await;
    assert!(matches!(after_close, Err(Error::Closed)));
}

#[tokio::test]
async fn test_invalid_database_name_is_rejected() {
    let tls_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();

    let replica = RaftReplica::bootstrap(options(
        "node-0",
        allocate_port(),
        vec![],
        data_dir.path(),
        identity(tls_dir.path()),
    ))
    .await
    .unwrap();

    let result = replica.open("../escape").await;
    assert!(matches!(result, Err(Error::InvalidDatabaseName(_))));

    replica.close().await.unwrap();
}

#[tokio::test]
async fn test_ready_is_cancellable() {
    let tls_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();
    let unreachable = format!("127.0.0.1:{}", allocate_port());

    let replica = RaftReplica::bootstrap(options(
        "node-1",
        allocate_port(),
        vec![unreachable],
        data_dir.path(),
        identity(tls_dir.path()),
    ))
    .await
    .unwrap();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        canceller.cancel();
    });

    let result = replica.ready(&cancel).await;

    assert!(matches!(result, Err(ref e) if e.is_cancelled()));

    replica.close().await.unwrap();
}

#[tokio::test]
async fn test_close_does_not_wait_on_stalled_seed() {
    let tls_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();

    // Accepts connections and never answers, so the join request hangs.
    let seed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let seed_addr = seed.local_addr().unwrap();
    let stalled = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = seed.accept().await {
            held.push(socket);
        }
    });

    let mut options = options(
        "node-1",
        allocate_port(),
        vec![seed_addr.to_string()],
        data_dir.path(),
        identity(tls_dir.path()),
    );
    options.request_timeout = Duration::from_secs(60);

    let replica = RaftReplica::bootstrap(options).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    timeout(Duration::from_secs(5), replica.close())
        .await
        .expect("close blocked on the stalled join")
        .unwrap();

    stalled.abort();
}

#[tokio::test]
async fn test_restart_replays_log() {
    let tls_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();
    let tls = identity(tls_dir.path());
    let port = allocate_port();

    {
        let replica = RaftReplica::bootstrap(options(
            "node-0",
            port,
            vec![],
            data_dir.path(),
            tls.clone(),
        ))
        .await
        .unwrap();

        wait_ready(&replica).await;

        let connection = replica.open("test").await.unwrap();
        connection.migrate(counter_migration()).await.unwrap();
        increment(&connection).await;
        increment(&connection).await;
        increment(&connection).await;

        drop(connection);
        replica.close().await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    let replica =
        RaftReplica::bootstrap(options("node-0", port, vec![], data_dir.path(), tls))
            .await
            .unwrap();

    wait_ready(&replica).await;

    let connection = replica.open("test").await.unwrap();
    assert_eq!(count(&connection).await, 3);
    assert_eq!(connection.schema_version().await.unwrap(), Some(1));

    replica.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn test_three_node_cluster_forwarding_and_handover() {
    let tls_dir = TempDir::new().unwrap();
    let tls = identity(tls_dir.path());

    let ports = [allocate_port(), allocate_port(), allocate_port()];
    let founder_addr = format!("127.0.0.1:{}", ports[0]);
    let data_dirs = [
        TempDir::new().unwrap(),
        TempDir::new().unwrap(),
        TempDir::new().unwrap(),
    ];

    let mut replicas = Vec::new();

    for (ordinal, port) in ports.iter().enumerate() {
        let seeds = if ordinal == 0 {
            vec![]
        } else {
            vec![founder_addr.clone()]
        };

        let replica = RaftReplica::bootstrap(options(
            &format!("node-{ordinal}"),
            *port,
            seeds,
            data_dirs[ordinal].path(),
            tls.clone(),
        ))
        .await
        .unwrap();

        wait_ready(&replica).await;
        replicas.push(replica);
    }

    for replica in &replicas {
        assert_eq!(replica.metrics().membership_config.membership().voter_ids().count(), 3);
    }

    // Writes and reads issued on a follower are forwarded to the leader.
    let follower = replicas.iter().find(|r| !r.is_leader()).unwrap();
    let connection = follower.open("test").await.unwrap();
    assert!(connection.migrate(counter_migration()).await.unwrap());
    increment(&connection).await;
    assert_eq!(count(&connection).await, 1);

    let leader = replicas.iter().find(|r| r.is_leader()).unwrap();
    let old_leader = leader.current_leader().unwrap();

    leader.handover(&CancellationToken::new()).await.unwrap();

    let new_leader = leader.current_leader().unwrap();
    assert_ne!(new_leader, old_leader);

    // The old leader keeps serving through the new one.
    let connection = leader.open("test").await.unwrap();
    increment(&connection).await;
    assert_eq!(count(&connection).await, 2);

    for replica in &replicas {
        replica.close().await.unwrap();
    }
}
