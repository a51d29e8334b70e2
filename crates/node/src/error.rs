use std::path::PathBuf;

use fleet_bootable::BootableError;
use thiserror::Error;

/// Convenience alias for this crate's results.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that stop a node from reaching the serving state.
#[derive(Debug, Error)]
pub enum Error {
    /// The service was started twice.
    #[error("already started")]
    AlreadyStarted,

    /// Configuration could not be used.
    #[error("configuration error: {0}")]
    Config(String),

    /// Naming segments did not describe a valid instance.
    #[error(transparent)]
    Topology(#[from] fleet_topology::TopologyError),

    /// Credential material could not be loaded.
    #[error(transparent)]
    Tls(#[from] fleet_tls::Error),

    /// The replica could not be started, or never became ready.
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    /// A migration script could not be read or applied.
    #[error("migration failed: {0}")]
    Migration(String),

    /// Migration script directory could not be read.
    #[error("failed to read migrations from {path}: {source}")]
    MigrationsDir {
        /// Directory being read.
        path: PathBuf,

        /// Underlying error.
        source: std::io::Error,
    },

    /// Two scripts share a version.
    #[error("duplicate migration version {0}")]
    DuplicateMigration(u64),

    /// The HTTP server could not be started.
    #[error("http server error: {0}")]
    Http(String),
}

impl BootableError for Error {}
