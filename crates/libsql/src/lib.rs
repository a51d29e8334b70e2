//! Wrapper around [libsql](https://github.com/tursodatabase/libsql) which
//! adds statement classification, a reserved migration ledger, and file
//! level backups.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod conversion;
mod error;
mod sql_type;

use std::fmt::Debug;
use std::path::Path;

pub use error::Error;
pub use sql_type::SqlType;

use conversion::{convert_libsql_rows, convert_params};
use fleet_sql::{Executed, Migration, Rows, SqlParam};
use libsql::{Builder, Connection, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Table name prefix reserved for internal bookkeeping.
pub static RESERVED_TABLE_PREFIX: &str = "__fleet_";
static CREATE_MIGRATIONS_TABLE_SQL: &str = include_str!("../sql/create_migrations_table.sql");
static INSERT_MIGRATION_SQL: &str = include_str!("../sql/insert_migration.sql");
static SELECT_MIGRATION_HASH_SQL: &str = include_str!("../sql/select_migration_hash.sql");
static SELECT_SCHEMA_VERSION_SQL: &str = include_str!("../sql/select_schema_version.sql");

/// A libsql database wrapper.
#[derive(Clone)]
pub struct Database {
    connection: Connection,
}

impl Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

impl Database {
    /// Connects to the database at the given path.
    ///
    /// # Errors
    ///
    /// This function will return an error if the connection to the database fails.
    pub async fn connect(path: impl AsRef<Path> + Send) -> Result<Self, Error> {
        let connection = Builder::new_local(path).build().await?.connect()?;

        connection
            .execute(CREATE_MIGRATIONS_TABLE_SQL, convert_params(vec![]))
            .await?;

        Ok(Self { connection })
    }

    /// Executes a mutation SQL query with the given parameters.
    ///
    /// # Errors
    ///
    /// This function will return an error if the query contains a reserved table prefix,
    /// if the SQL type is incorrect, or if there is an issue executing the query.
    pub async fn execute(&self, query: &str, params: Vec<SqlParam>) -> Result<Executed, Error> {
        Self::expect_type(query, SqlType::Mutation)?;

        debug!(query, "execute");

        let rows_affected = self
            .connection
            .execute(query, convert_params(params))
            .await?;

        Ok(Executed {
            rows_affected,
            last_insert_rowid: self.connection.last_insert_rowid(),
        })
    }

    /// Applies a versioned migration.
    ///
    /// Returns `Ok(false)` when the version was already applied. A recorded
    /// version whose script no longer hashes the same is logged and skipped.
    /// The script and its ledger entry commit together or not at all.
    ///
    /// # Errors
    ///
    /// This function will return an error if the script touches the reserved
    /// prefix, if a later version is already applied, or if the script fails.
    pub async fn migrate(&self, migration: &Migration) -> Result<bool, Error> {
        if Self::uses_reserved_prefix(&migration.script) {
            return Err(Error::UsedReservedTablePrefix);
        }

        let version = i64::try_from(migration.version)
            .map_err(|_| Error::VersionOutOfRange(migration.version))?;
        let hash = Self::script_hash(&migration.script);

        let transaction = self.connection.transaction().await?;

        let recorded = {
            let mut rows = transaction
                .query(
                    SELECT_MIGRATION_HASH_SQL,
                    convert_params(vec![SqlParam::Integer(version)]),
                )
                .await?;

            match rows.next().await? {
                Some(row) => Some(row.get_value(0)?),
                None => None,
            }
        };

        if let Some(recorded) = recorded {
            if let Value::Text(recorded) = recorded {
                if recorded != hash {
                    warn!(
                        migration = %migration,
                        recorded = %recorded,
                        current = %hash,
                        "applied migration script has changed, skipping"
                    );
                }
            }

            transaction.rollback().await?;
            return Ok(false);
        }

        if let Some(latest) = Self::latest_version(&transaction).await? {
            if latest > migration.version {
                transaction.rollback().await?;
                return Err(Error::OutOfOrderMigration {
                    version: migration.version,
                    latest,
                });
            }
        }

        if let Err(e) = transaction.execute_batch(&migration.script).await {
            transaction.rollback().await?;
            return Err(e.into());
        }

        transaction
            .execute(
                INSERT_MIGRATION_SQL,
                convert_params(vec![
                    SqlParam::Integer(version),
                    SqlParam::Text(migration.name.clone()),
                    SqlParam::Text(hash),
                ]),
            )
            .await?;

        transaction.commit().await?;

        info!(migration = %migration, "applied migration");

        Ok(true)
    }

    /// Executes a query SQL statement with the given parameters.
    ///
    /// # Errors
    ///
    /// This function will return an error if the query contains a reserved table prefix,
    /// if the SQL type is incorrect, or if there is an issue executing the query.
    pub async fn query(&self, query: &str, params: Vec<SqlParam>) -> Result<Rows, Error> {
        Self::expect_type(query, SqlType::Query)?;

        debug!(query, "query");

        let libsql_rows = self
            .connection
            .query(query, convert_params(params))
            .await?;

        convert_libsql_rows(libsql_rows).await
    }

    /// Highest applied migration version.
    ///
    /// # Errors
    ///
    /// This function will return an error if the ledger cannot be read.
    pub async fn schema_version(&self) -> Result<Option<u64>, Error> {
        Self::latest_version(&self.connection).await
    }

    /// Writes a consistent copy of the database to `path`.
    ///
    /// # Errors
    ///
    /// This function will return an error if the copy cannot be written, for
    /// example because `path` already exists.
    pub async fn backup_to(&self, path: impl AsRef<Path> + Send) -> Result<(), Error> {
        let path = path.as_ref().to_string_lossy().to_string();

        debug!(path = %path, "backing up database");

        self.connection
            .execute("VACUUM INTO ?1", convert_params(vec![SqlParam::Text(path)]))
            .await?;

        Ok(())
    }

    async fn latest_version(connection: &Connection) -> Result<Option<u64>, Error> {
        let mut rows = connection
            .query(SELECT_SCHEMA_VERSION_SQL, convert_params(vec![]))
            .await?;

        match rows.next().await? {
            Some(row) => match row.get_value(0)? {
                Value::Integer(latest) => Ok(u64::try_from(latest).ok()),
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    fn expect_type(query: &str, expected: SqlType) -> Result<(), Error> {
        if Self::uses_reserved_prefix(query) {
            return Err(Error::UsedReservedTablePrefix);
        }

        let actual = SqlType::classify(query);

        if actual == expected {
            Ok(())
        } else {
            Err(Error::IncorrectSqlType(expected, actual))
        }
    }

    fn uses_reserved_prefix(sql: &str) -> bool {
        sql.to_lowercase().contains(RESERVED_TABLE_PREFIX)
    }

    fn script_hash(script: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(script);
        format!("{:x}", hasher.finalize())
    }
}
