//! Abstract interface for a node's replica of the cluster's consensus-backed
//! SQL store.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use fleet_sql::SqlConnection;
use tokio_util::sync::CancellationToken;

/// Marker trait for replica errors
pub trait ReplicaError: Debug + Error + Send + Sync + 'static {
    /// Whether the error was caused by the supplied token being cancelled.
    fn is_cancelled(&self) -> bool;
}

/// A running member of the replicated store.
///
/// Construction joins or bootstraps the cluster; the remaining operations
/// follow the node's lifecycle: wait for [`ready`](Replica::ready), open a
/// database, and on the way out [`handover`](Replica::handover) then
/// [`close`](Replica::close).
#[async_trait]
pub trait Replica: Send + Sync + 'static {
    /// Error type of the replica.
    type Error: ReplicaError;

    /// Connection handed out by [`open`](Replica::open).
    type Connection: SqlConnection;

    /// Network identity this replica advertises.
    fn address(&self) -> &str;

    /// Resolves once the replica is a functioning member with a known leader.
    async fn ready(&self, cancel: &CancellationToken) -> Result<(), Self::Error>;

    /// Opens a named database.
    async fn open(&self, name: &str) -> Result<Self::Connection, Self::Error>;

    /// Hands any leadership held by this replica to another voter.
    async fn handover(&self, cancel: &CancellationToken) -> Result<(), Self::Error>;

    /// Stops the replica and releases its resources.
    async fn close(&self) -> Result<(), Self::Error>;
}
