use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use fleet_sql::{Executed, Migration, Rows, SqlConnection, SqlParam};
use tracing::debug;

use crate::cluster::Shared;
use crate::error::Error;
use crate::types::{Read, ReadRequest, ReadResponse, Request, Response};

/// Connection to one named database. Writes go through the replicated log;
/// reads are answered by the leader.
///
/// Clones share one handle: closing any of them closes all.
#[derive(Clone, Debug)]
pub struct RaftConnection {
    shared: Arc<Shared>,
    database: String,
    closed: Arc<AtomicBool>,
}

impl RaftConnection {
    pub(crate) fn new(shared: Arc<Shared>, database: String) -> Self {
        Self {
            shared,
            database,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Name of the database.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    async fn write(&self, request: Request) -> Result<Response, Error> {
        self.ensure_open()?;

        match self.shared.write(request).await? {
            Response::Failed(message) => Err(Error::Sql(message)),
            response => Ok(response),
        }
    }

    async fn read(&self, read: Read) -> Result<ReadResponse, Error> {
        self.ensure_open()?;

        self.shared
            .read(ReadRequest {
                database: self.database.clone(),
                read,
            })
            .await
    }
}

fn unexpected<T>(response: impl std::fmt::Debug) -> Result<T, Error> {
    Err(Error::Raft(format!("unexpected response: {response:?}")))
}

#[async_trait]
impl SqlConnection for RaftConnection {
    type Error = Error;

    async fn execute<Q: Into<String> + Send>(
        &self,
        query: Q,
        params: Vec<SqlParam>,
    ) -> Result<Executed, Self::Error> {
        let request = Request::Execute {
            database: self.database.clone(),
            query: query.into(),
            params,
        };

        match self.write(request).await? {
            Response::Executed(executed) => Ok(executed),
            other => unexpected(other),
        }
    }

    async fn migrate(&self, migration: Migration) -> Result<bool, Self::Error> {
        let request = Request::Migrate {
            database: self.database.clone(),
            migration,
        };

        match self.write(request).await? {
            Response::Migrated(applied) => Ok(applied),
            other => unexpected(other),
        }
    }

    async fn query<Q: Into<String> + Send>(
        &self,
        query: Q,
        params: Vec<SqlParam>,
    ) -> Result<Rows, Self::Error> {
        let read = Read::Query {
            query: query.into(),
            params,
        };

        match self.read(read).await? {
            ReadResponse::Rows(rows) => Ok(rows),
            other => unexpected(other),
        }
    }

    async fn schema_version(&self) -> Result<Option<u64>, Self::Error> {
        match self.read(Read::SchemaVersion).await? {
            ReadResponse::SchemaVersion(version) => Ok(version),
            other => unexpected(other),
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        debug!(database = %self.database, "closed connection");

        Ok(())
    }
}
