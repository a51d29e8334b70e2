use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The supplied cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The replica has been closed.
    #[error("replica is closed")]
    Closed,

    /// Handover was configured to fail.
    #[error("handover failed: {0}")]
    Handover(String),

    /// Underlying database error.
    #[error(transparent)]
    Sql(#[from] fleet_libsql::Error),
}

impl fleet_replica::ReplicaError for Error {
    fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fleet_sql::SqlError for Error {}
