//! Type definitions for the replicated log

use std::io::Cursor;

use fleet_sql::{Executed, Migration, Rows, SqlParam};
use openraft::BasicNode;
use serde::{Deserialize, Serialize};

openraft::declare_raft_types!(
    /// Types for the replicated SQL store
    pub TypeConfig:
        D = Request,
        R = Response,
        NodeId = String,
        Node = BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = openraft::TokioRuntime,
);

/// A write proposed through the log. Every member applies it to its copy of
/// the named database.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum Request {
    /// Run one data-modifying statement.
    Execute {
        /// Target database.
        database: String,
        /// Statement text.
        query: String,
        /// Bound parameters.
        params: Vec<SqlParam>,
    },

    /// Check the ledger and apply a schema change in one step.
    Migrate {
        /// Target database.
        database: String,
        /// The migration to apply.
        migration: Migration,
    },
}

impl Request {
    /// Database the request targets.
    #[must_use]
    pub fn database(&self) -> &str {
        match self {
            Self::Execute { database, .. } | Self::Migrate { database, .. } => database,
        }
    }
}

/// Outcome of applying a log entry.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum Response {
    /// Blank and membership entries.
    Empty,

    /// Result of [`Request::Execute`].
    Executed(Executed),

    /// Whether [`Request::Migrate`] had anything to do.
    Migrated(bool),

    /// The statement failed on the state machine. Failures are deterministic,
    /// so every member records the same one.
    Failed(String),
}

/// A read served from the leader's copy.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReadRequest {
    /// Target database.
    pub database: String,

    /// What to read.
    pub read: Read,
}

/// Kinds of read.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum Read {
    /// A row-returning statement.
    Query {
        /// Statement text.
        query: String,
        /// Bound parameters.
        params: Vec<SqlParam>,
    },

    /// Highest applied migration version.
    SchemaVersion,
}

/// Outcome of a [`ReadRequest`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum ReadResponse {
    /// Rows returned by [`Read::Query`].
    Rows(Rows),

    /// Answer to [`Read::SchemaVersion`].
    SchemaVersion(Option<u64>),
}

/// Sent by a fresh member to the leader.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct JoinRequest {
    /// Node id of the member.
    pub node_id: String,

    /// `host:port` other members reach it on.
    pub addr: String,
}

/// Failure reported by a peer's inter-node endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum PeerFailure {
    /// The peer is not the leader; retry against `leader` if known.
    NotLeader {
        /// `host:port` of the leader as seen by the peer.
        leader: Option<String>,
    },

    /// Anything else.
    Failed(String),
}

/// Body of every inter-node cluster and database endpoint.
pub type PeerResult<T> = Result<T, PeerFailure>;
