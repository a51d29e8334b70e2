use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The server could not bind its listen address.
    #[error("failed to bind inter-node listener: {0}")]
    Bind(#[source] std::io::Error),

    /// The supplied cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The replica has already been closed.
    #[error("replica is closed")]
    Closed,

    /// Openraft rejected its configuration.
    #[error("invalid raft configuration: {0}")]
    Config(String),

    /// Leadership did not move within the allotted time.
    #[error("handover did not complete within {0:?}")]
    HandoverTimeout(Duration),

    /// Failed to build or use the inter-node HTTP client.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Database names become file names and must stay simple.
    #[error("invalid database name `{0}`")]
    InvalidDatabaseName(String),

    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The cluster currently has no known leader.
    #[error("no leader is known")]
    NoLeader,

    /// A peer rejected the request.
    #[error("peer {peer} rejected request: {message}")]
    Peer {
        /// `host:port` of the peer.
        peer: String,
        /// What the peer reported.
        message: String,
    },

    /// A consensus operation failed.
    #[error("raft: {0}")]
    Raft(String),

    /// A statement failed against the state machine.
    #[error("sql: {0}")]
    Sql(String),

    /// Log storage could not be opened.
    #[error(transparent)]
    Storage(#[from] rocksdb::Error),

    /// TLS material could not be turned into configs.
    #[error(transparent)]
    Tls(#[from] fleet_tls::Error),
}

impl fleet_replica::ReplicaError for Error {
    fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fleet_sql::SqlError for Error {}
