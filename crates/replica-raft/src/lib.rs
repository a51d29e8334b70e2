//! Consensus-backed replica of the cluster's SQL store, built on openraft
//! with a RocksDB log and one libsql database per name.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod api;
mod cluster;
mod connection;
mod error;
mod log_store;
mod network;
mod state_machine;
mod types;

pub use connection::RaftConnection;
pub use error::Error;
pub use types::TypeConfig;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use cluster::Shared;
use fleet_replica::Replica;
use fleet_tls::TlsIdentity;
use log_store::LogStore;
use network::{NetworkFactory, PeerClient, paths};
use openraft::error::{InitializeError, RaftError};
use openraft::{BasicNode, Config, Raft, RaftMetrics};
use state_machine::{StateMachineStore, validate_database_name};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use types::{JoinRequest, PeerFailure};

const RAFT_DIR: &str = "raft";
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const SERVER_DRAIN: Duration = Duration::from_secs(1);

/// Options for [`RaftReplica::bootstrap`].
#[derive(Clone, Debug)]
pub struct RaftReplicaOptions {
    /// Stable id of this member.
    pub node_id: String,

    /// `host:port` other members reach this one on.
    pub advertise_addr: String,

    /// Local address the inter-node server binds.
    pub listen_addr: SocketAddr,

    /// Members to ask for admission. Empty means this node founds the
    /// cluster.
    pub seed_peers: Vec<String>,

    /// Directory for the log, databases and snapshots.
    pub data_dir: PathBuf,

    /// Identity presented to and expected from peers.
    pub tls: Arc<TlsIdentity>,

    /// Delay between admission attempts.
    pub join_retry_interval: Duration,

    /// Upper bound on a leadership handover.
    pub handover_timeout: Duration,

    /// Upper bound on one join or forwarded database call to a peer.
    pub request_timeout: Duration,
}

impl RaftReplicaOptions {
    /// Options with the default intervals.
    #[must_use]
    pub fn new(
        node_id: impl Into<String>,
        advertise_addr: impl Into<String>,
        listen_addr: SocketAddr,
        seed_peers: Vec<String>,
        data_dir: impl Into<PathBuf>,
        tls: Arc<TlsIdentity>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            advertise_addr: advertise_addr.into(),
            listen_addr,
            seed_peers,
            data_dir: data_dir.into(),
            tls,
            join_retry_interval: Duration::from_secs(1),
            handover_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
        }
    }
}

fn raft_config() -> Result<Config, Error> {
    Config {
        cluster_name: "fleet".to_string(),
        heartbeat_interval: 500,
        election_timeout_min: 1500,
        election_timeout_max: 3000,
        ..Config::default()
    }
    .validate()
    .map_err(|e| Error::Config(e.to_string()))
}

/// A running member of the replicated store.
pub struct RaftReplica {
    shared: Arc<Shared>,
    server_handle: Handle,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
    handover_timeout: Duration,
    closed: AtomicBool,
}

impl std::fmt::Debug for RaftReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftReplica")
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

impl RaftReplica {
    /// Starts the replica: opens storage, serves the inter-node endpoints and
    /// either founds the cluster or begins asking the seed peers for
    /// admission in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be opened, the listener cannot
    /// bind, or the founder fails to initialize the cluster.
    pub async fn bootstrap(options: RaftReplicaOptions) -> Result<Self, Error> {
        tokio::fs::create_dir_all(&options.data_dir).await?;

        let log_store = LogStore::open(options.data_dir.join(RAFT_DIR))?;
        let state_machine = StateMachineStore::open(&options.data_dir).await?;
        let peers = PeerClient::new(options.tls.client_config()?, options.request_timeout)?;

        let raft = Raft::new(
            options.node_id.clone(),
            Arc::new(raft_config()?),
            NetworkFactory::new(peers.clone()),
            log_store,
            state_machine.clone(),
        )
        .await
        .map_err(|e| Error::Raft(e.to_string()))?;

        let shared = Arc::new(Shared {
            node_id: options.node_id.clone(),
            addr: options.advertise_addr.clone(),
            raft,
            state_machine,
            peers,
        });

        let shutdown_token = CancellationToken::new();
        let task_tracker = TaskTracker::new();
        let server_handle = Handle::new();

        let rustls_config = RustlsConfig::from_config(Arc::new(options.tls.server_config()?));
        let server = axum_server::bind_rustls(options.listen_addr, rustls_config)
            .handle(server_handle.clone())
            .serve(api::router(shared.clone()).into_make_service());

        let server_task = task_tracker.spawn(server);

        if server_handle.listening().await.is_none() {
            let error = match server_task.await {
                Ok(Err(e)) => e,
                Ok(Ok(())) => std::io::Error::other("server exited before listening"),
                Err(e) => std::io::Error::other(e),
            };
            shared.raft.shutdown().await.ok();
            return Err(Error::Bind(error));
        }

        info!(
            node_id = %options.node_id,
            listen_addr = %options.listen_addr,
            "inter-node server listening"
        );

        let replica = Self {
            shared,
            server_handle,
            shutdown_token,
            task_tracker,
            handover_timeout: options.handover_timeout,
            closed: AtomicBool::new(false),
        };

        if options.seed_peers.is_empty() {
            if let Err(e) = replica.found().await {
                if let Err(close_error) = replica.close().await {
                    warn!(error = %close_error, "failed to close replica after founding failed");
                }
                return Err(e);
            }
        } else {
            replica.task_tracker.spawn(join_cluster(
                replica.shared.clone(),
                options.seed_peers,
                options.join_retry_interval,
                replica.shutdown_token.clone(),
            ));
        }

        Ok(replica)
    }

    async fn found(&self) -> Result<(), Error> {
        let raft = &self.shared.raft;

        if raft
            .is_initialized()
            .await
            .map_err(|e| Error::Raft(e.to_string()))?
        {
            info!("cluster already initialized");
            return Ok(());
        }

        let members = BTreeMap::from([(
            self.shared.node_id.clone(),
            BasicNode::new(self.shared.addr.clone()),
        )]);

        match raft.initialize(members).await {
            Ok(()) => {
                info!(node_id = %self.shared.node_id, "initialized cluster as founder");
                Ok(())
            }
            Err(RaftError::APIError(InitializeError::NotAllowed(_))) => {
                info!("cluster already initialized");
                Ok(())
            }
            Err(e) => Err(Error::Raft(e.to_string())),
        }
    }

    /// Current raft metrics of this member.
    #[must_use]
    pub fn metrics(&self) -> RaftMetrics<TypeConfig> {
        self.shared.metrics()
    }

    /// Whether this member currently leads the cluster.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.shared.is_leader()
    }

    /// Node id of the current leader, if one is known.
    #[must_use]
    pub fn current_leader(&self) -> Option<String> {
        self.shared.metrics().current_leader
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }
}

/// Asks seed peers for admission until this node is a voter, following
/// leader redirects.
async fn join_cluster(
    shared: Arc<Shared>,
    seeds: Vec<String>,
    retry_interval: Duration,
    shutdown_token: CancellationToken,
) {
    let request = JoinRequest {
        node_id: shared.node_id.clone(),
        addr: shared.addr.clone(),
    };

    let mut attempt = 0;
    let mut target = seeds[0].clone();

    loop {
        if Shared::is_voter(&shared.metrics(), &shared.node_id) {
            info!("already a voter, not joining");
            return;
        }

        let outcome = tokio::select! {
            () = shutdown_token.cancelled() => return,
            outcome = shared.peers.call_raw::<_, ()>(&target, paths::JOIN, &request) => outcome,
        };

        match outcome {
            Ok(Ok(())) => {
                info!(peer = %target, "admitted to cluster");
                return;
            }
            Ok(Err(PeerFailure::NotLeader {
                leader: Some(leader),
            })) if leader != target => {
                debug!(peer = %target, %leader, "redirected to leader");
                target = leader;
                continue;
            }
            Ok(Err(failure)) => warn!(peer = %target, ?failure, "join rejected"),
            Err(e) => warn!(peer = %target, error = %e, "join attempt failed"),
        }

        attempt += 1;
        target = seeds[attempt % seeds.len()].clone();

        tokio::select! {
            () = shutdown_token.cancelled() => return,
            () = sleep(retry_interval) => {}
        }
    }
}

/// Voter other than `self_id` whose replicated log reaches furthest.
fn most_caught_up_voter(metrics: &RaftMetrics<TypeConfig>, self_id: &str) -> Option<String> {
    let replication = metrics.replication.as_ref();

    metrics
        .membership_config
        .membership()
        .voter_ids()
        .filter(|id| id != self_id)
        .max_by_key(|id| {
            replication
                .and_then(|r| r.get(id))
                .and_then(|matched| matched.as_ref())
                .map(|log_id| log_id.index)
        })
}

#[async_trait]
impl Replica for RaftReplica {
    type Error = Error;
    type Connection = RaftConnection;

    fn address(&self) -> &str {
        &self.shared.addr
    }

    async fn ready(&self, cancel: &CancellationToken) -> Result<(), Self::Error> {
        self.ensure_open()?;

        let mut metrics = self.shared.raft.metrics();

        loop {
            {
                let current = metrics.borrow_and_update();

                if current.current_leader.is_some()
                    && Shared::is_voter(&current, &self.shared.node_id)
                {
                    info!(leader = ?current.current_leader, "replica ready");
                    return Ok(());
                }
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                changed = metrics.changed() => {
                    if changed.is_err() {
                        return Err(Error::Closed);
                    }
                }
            }
        }
    }

    async fn open(&self, name: &str) -> Result<Self::Connection, Self::Error> {
        self.ensure_open()?;
        validate_database_name(name)?;

        debug!(database = name, "opening database");

        Ok(RaftConnection::new(self.shared.clone(), name.to_string()))
    }

    async fn handover(&self, cancel: &CancellationToken) -> Result<(), Self::Error> {
        self.ensure_open()?;

        let metrics = self.shared.metrics();

        if !metrics.state.is_leader() {
            debug!("not the leader, nothing to hand over");
            return Ok(());
        }

        let Some(target) = most_caught_up_voter(&metrics, &self.shared.node_id) else {
            info!("no other voter to hand leadership to");
            return Ok(());
        };

        info!(%target, "transferring leadership");

        self.shared
            .raft
            .trigger()
            .transfer_leader(target.clone())
            .await
            .map_err(|e| Error::Raft(e.to_string()))?;

        let moved = async {
            loop {
                if let Some(leader) = self.shared.metrics().current_leader {
                    if leader != self.shared.node_id {
                        return leader;
                    }
                }

                sleep(POLL_INTERVAL).await;
            }
        };

        tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            () = sleep(self.handover_timeout) => Err(Error::HandoverTimeout(self.handover_timeout)),
            leader = moved => {
                info!(%leader, "leadership transferred");
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("closing replica");

        self.shutdown_token.cancel();

        let raft_result = self.shared.raft.shutdown().await;

        self.server_handle.graceful_shutdown(Some(SERVER_DRAIN));
        self.task_tracker.close();
        self.task_tracker.wait().await;

        if let Err(e) = raft_result {
            error!(error = %e, "raft did not shut down cleanly");
            return Err(Error::Raft(e.to_string()));
        }

        info!("replica closed");

        Ok(())
    }
}
