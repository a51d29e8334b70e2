use crate::SqlType;

use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Incorrect SQL type for request.
    #[error("incorrect SQL type: expected {0}, got {1}")]
    IncorrectSqlType(SqlType, SqlType),

    /// Result set is wider than a row can describe.
    #[error("invalid column count")]
    InvalidColumnCount,

    /// Libsql error.
    #[error(transparent)]
    Libsql(#[from] libsql::Error),

    /// A migration arrived with a version lower than one already applied.
    #[error("migration {version} is older than applied version {latest}")]
    OutOfOrderMigration {
        /// Version of the rejected migration.
        version: u64,

        /// Highest version already applied.
        latest: u64,
    },

    /// Migration version does not fit the database's integer type.
    #[error("migration version {0} is out of range")]
    VersionOutOfRange(u64),

    /// Used reserved table prefix.
    #[error("cannot use reserved table prefix")]
    UsedReservedTablePrefix,
}

impl fleet_sql::SqlError for Error {}
