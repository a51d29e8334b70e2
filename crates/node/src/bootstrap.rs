use std::sync::Arc;
use std::time::Duration;

use fleet_bootable::Bootable;
use fleet_http::HttpServer;
use fleet_http_insecure::InsecureHttpServer;
use fleet_replica::{Replica, ReplicaError};
use fleet_replica_raft::{RaftReplica, RaftReplicaOptions};
use fleet_sql::{Migration, SqlConnection};
use fleet_tls::TlsIdentity;
use fleet_topology::ClusterTopology;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::migrations::{apply_migrations, load_migrations};
use crate::router::router;
use crate::service::HttpService;

/// Outcome of one teardown step; errors are kept as text for reporting.
pub type StepOutcome = std::result::Result<(), String>;

/// What happened during teardown. Every step is attempted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TeardownReport {
    /// Closing the logical database handle.
    pub close_database: StepOutcome,

    /// Handing leadership to another voter.
    pub handover: StepOutcome,

    /// Stopping the local replica.
    pub close_replica: StepOutcome,
}

impl TeardownReport {
    /// Whether every step succeeded.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.close_database.is_ok() && self.handover.is_ok() && self.close_replica.is_ok()
    }
}

/// Closes the database handle, hands over leadership, then closes the
/// replica. A failing step is logged and the next one still runs.
pub async fn teardown<R>(replica: &R, connection: Option<&R::Connection>) -> TeardownReport
where
    R: Replica,
{
    let close_database = match connection {
        Some(connection) => connection.close().await.map_err(|e| e.to_string()),
        None => Ok(()),
    };
    if let Err(e) = &close_database {
        error!("failed to close database: {e}");
    }

    // The shutdown token is already cancelled here; handover gets its own.
    let handover = replica
        .handover(&CancellationToken::new())
        .await
        .map_err(|e| e.to_string());
    if let Err(e) = &handover {
        error!("leadership handover failed: {e}");
    }

    let close_replica = replica.close().await.map_err(|e| e.to_string());
    if let Err(e) = &close_replica {
        error!("failed to close replica: {e}");
    }

    TeardownReport {
        close_database,
        handover,
        close_replica,
    }
}

/// Everything a [`Node`] needs, already constructed.
pub struct NodeOptions<R, H>
where
    R: Replica,
    H: HttpServer,
{
    /// Bootstrapped replica.
    pub replica: Arc<R>,

    /// Client-facing server, not yet started.
    pub http_server: H,

    /// Logical database to open and serve.
    pub db_name: String,

    /// Ordered schema changes applied before serving.
    pub migrations: Vec<Migration>,

    /// Optional cap on the readiness wait.
    pub ready_timeout: Option<Duration>,

    /// Cancelled on the first termination signal.
    pub shutdown: CancellationToken,
}

/// Drives one node from `Starting` to `Stopped`.
pub struct Node<R, H>
where
    R: Replica,
    H: HttpServer,
{
    db_name: String,
    http_server: Arc<H>,
    lifecycle: Lifecycle,
    migrations: Vec<Migration>,
    ready_timeout: Option<Duration>,
    replica: Arc<R>,
    shutdown: CancellationToken,
}

impl<R, H> Node<R, H>
where
    R: Replica,
    H: HttpServer,
{
    /// Creates a node in the `Starting` state.
    pub fn new(
        NodeOptions {
            replica,
            http_server,
            db_name,
            migrations,
            ready_timeout,
            shutdown,
        }: NodeOptions<R, H>,
    ) -> Self {
        Self {
            db_name,
            http_server: Arc::new(http_server),
            lifecycle: Lifecycle::new(),
            migrations,
            ready_timeout,
            replica,
            shutdown,
        }
    }

    /// Lifecycle handle, for observing transitions.
    #[must_use]
    pub const fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Waits for readiness, migrates, serves until shutdown, then drains and
    /// tears down.
    ///
    /// # Errors
    ///
    /// Returns an error if the node never reaches `Serving`. Resources
    /// acquired so far are released first. Teardown failures after serving
    /// are reported in the returned [`TeardownReport`] instead.
    pub async fn run(self) -> Result<TeardownReport> {
        self.lifecycle.transition(LifecycleState::Starting);

        if let Err(e) = self.wait_ready().await {
            self.abort_startup(None).await;
            return Err(e);
        }

        let connection = match self.replica.open(&self.db_name).await {
            Ok(connection) => connection,
            Err(e) => {
                self.abort_startup(None).await;
                return Err(Error::Bootstrap(format!(
                    "failed to open database {}: {e}",
                    self.db_name
                )));
            }
        };

        if let Err(e) = apply_migrations(&connection, &self.migrations).await {
            self.abort_startup(Some(&connection)).await;
            return Err(e);
        }

        let service = HttpService::new(self.http_server.clone(), router(connection.clone()));

        if let Err(e) = service.start().await {
            self.abort_startup(Some(&connection)).await;
            return Err(Error::Http(e.to_string()));
        }

        self.lifecycle.transition(LifecycleState::Serving);

        tokio::select! {
            () = self.shutdown.cancelled() => {}
            () = service.wait() => {
                error!("http server stopped unexpectedly");
            }
        }

        self.lifecycle.transition(LifecycleState::Draining);

        if let Err(e) = service.shutdown().await {
            warn!("http drain failed: {e}");
        }

        let report = teardown(&*self.replica, Some(&connection)).await;

        self.lifecycle.transition(LifecycleState::Stopped);

        Ok(report)
    }

    async fn wait_ready(&self) -> Result<()> {
        info!(address = self.replica.address(), "waiting for cluster readiness");

        let ready = self.replica.ready(&self.shutdown);

        let result = match self.ready_timeout {
            Some(bound) => tokio::time::timeout(bound, ready)
                .await
                .map_err(|_| Error::Bootstrap(format!("cluster not ready after {bound:?}")))?,
            None => ready.await,
        };

        result.map_err(|e| {
            if e.is_cancelled() {
                Error::Bootstrap("shutdown requested before the cluster became ready".to_string())
            } else {
                Error::Bootstrap(e.to_string())
            }
        })?;

        info!("cluster ready");

        Ok(())
    }

    async fn abort_startup(&self, connection: Option<&R::Connection>) {
        let report = teardown(&*self.replica, connection).await;

        if !report.is_clean() {
            warn!(?report, "teardown after failed startup was not clean");
        }

        self.lifecycle.transition(LifecycleState::Stopped);
    }
}

/// Resolves the topology, loads credentials and migrations, bootstraps the
/// raft replica and runs the node until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if any startup step fails before the node is serving.
pub async fn run(config: NodeConfig, shutdown: CancellationToken) -> Result<TeardownReport> {
    let topology = ClusterTopology::resolve(config.naming_segments())?;
    info!(%topology, "resolved topology");

    let tls = Arc::new(TlsIdentity::load(&config.cert_path)?);
    let migrations = load_migrations(&config.migrations_dir)?;

    let mut options = RaftReplicaOptions::new(
        topology.self_address(),
        topology.peer_address(config.raft_port),
        config.raft_listen_addr(),
        topology.seed_peers(config.raft_port),
        &config.data_dir,
        tls,
    );
    options.handover_timeout = config.handover_timeout();

    let replica = RaftReplica::bootstrap(options)
        .await
        .map_err(|e| Error::Bootstrap(e.to_string()))?;

    let http_server =
        InsecureHttpServer::with_drain_timeout(config.http_listen_addr(), config.drain_timeout());

    Node::new(NodeOptions {
        replica: Arc::new(replica),
        http_server,
        db_name: config.db_name,
        migrations,
        ready_timeout: config.ready_timeout(),
        shutdown,
    })
    .run()
    .await
}
