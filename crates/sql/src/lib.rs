//! Connection abstraction shared by every replicated SQL backend.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod migration;
mod rows;
mod sql_param;

pub use migration::Migration;
pub use rows::{Row, Rows};
pub use sql_param::SqlParam;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::Debug;

/// Marker trait for SQL connection errors
pub trait SqlError: Debug + Error + Send + Sync + 'static {}

/// Outcome of a data-modifying statement.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Executed {
    /// Number of rows changed by the statement.
    pub rows_affected: u64,

    /// Rowid of the most recent successful insert on the connection.
    pub last_insert_rowid: i64,
}

/// A handle onto one named database.
#[async_trait]
pub trait SqlConnection: Clone + Send + Sync + 'static {
    /// Error type of the connection.
    type Error: SqlError;

    /// Execute a SQL statement that modifies data
    async fn execute<Q: Into<String> + Send>(
        &self,
        query: Q,
        params: Vec<SqlParam>,
    ) -> Result<Executed, Self::Error>;

    /// Apply a versioned schema change and return whether it was needed
    async fn migrate(&self, migration: Migration) -> Result<bool, Self::Error>;

    /// Execute a SQL query that returns data
    async fn query<Q: Into<String> + Send>(
        &self,
        query: Q,
        params: Vec<SqlParam>,
    ) -> Result<Rows, Self::Error>;

    /// Highest applied migration version, if any
    async fn schema_version(&self) -> Result<Option<u64>, Self::Error>;

    /// Release the handle
    async fn close(&self) -> Result<(), Self::Error>;
}
