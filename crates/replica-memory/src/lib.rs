//! Single-process replica over in-memory libsql databases, for exercising
//! lifecycle code without a cluster.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fleet_libsql::Database;
use fleet_replica::Replica;
use fleet_sql::{Executed, Migration, Rows, SqlConnection, SqlParam};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Calls observed by a [`MemoryReplica`], in order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReplicaEvent {
    /// `ready` resolved successfully.
    Ready,
    /// A database was opened.
    Opened(String),
    /// A connection was closed.
    ConnectionClosed(String),
    /// `handover` was called.
    Handover,
    /// `close` was called.
    Closed,
}

type EventLog = Arc<Mutex<Vec<ReplicaEvent>>>;
type WriteDelay = Arc<Mutex<Option<Duration>>>;

/// In-process replica.
#[derive(Debug)]
pub struct MemoryReplica {
    address: String,
    closed: AtomicBool,
    databases: Mutex<HashMap<String, Database>>,
    events: EventLog,
    handover_failure: Mutex<Option<String>>,
    ready_tx: watch::Sender<bool>,
    write_delay: WriteDelay,
}

impl MemoryReplica {
    /// A replica that is ready immediately.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        let replica = Self::gated(address);
        replica.mark_ready();
        replica
    }

    /// A replica whose `ready` waits for [`mark_ready`](Self::mark_ready).
    #[must_use]
    pub fn gated(address: impl Into<String>) -> Self {
        let (ready_tx, _) = watch::channel(false);

        Self {
            address: address.into(),
            closed: AtomicBool::new(false),
            databases: Mutex::new(HashMap::new()),
            events: Arc::new(Mutex::new(Vec::new())),
            handover_failure: Mutex::new(None),
            ready_tx,
            write_delay: Arc::new(Mutex::new(None)),
        }
    }

    /// Opens the readiness gate.
    pub fn mark_ready(&self) {
        self.ready_tx.send_replace(true);
    }

    /// Makes every later `handover` fail with `message`.
    pub fn fail_handover(&self, message: impl Into<String>) {
        *self.handover_failure.lock() = Some(message.into());
    }

    /// Holds every later `execute` for `delay` before it runs.
    pub fn slow_writes(&self, delay: Duration) {
        *self.write_delay.lock() = Some(delay);
    }

    /// Calls observed so far.
    #[must_use]
    pub fn events(&self) -> Vec<ReplicaEvent> {
        self.events.lock().clone()
    }

    fn record(&self, event: ReplicaEvent) {
        self.events.lock().push(event);
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Replica for MemoryReplica {
    type Error = Error;
    type Connection = MemoryConnection;

    fn address(&self) -> &str {
        &self.address
    }

    async fn ready(&self, cancel: &CancellationToken) -> Result<(), Self::Error> {
        self.ensure_open()?;

        let mut ready_rx = self.ready_tx.subscribe();

        tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = ready_rx.wait_for(|ready| *ready) => {
                result.map_err(|_| Error::Closed)?;
                self.record(ReplicaEvent::Ready);
                Ok(())
            }
        }
    }

    async fn open(&self, name: &str) -> Result<Self::Connection, Self::Error> {
        self.ensure_open()?;

        let existing = self.databases.lock().get(name).cloned();

        let database = match existing {
            Some(database) => database,
            None => {
                let database = Database::connect(":memory:").await?;
                self.databases
                    .lock()
                    .entry(name.to_string())
                    .or_insert(database)
                    .clone()
            }
        };

        debug!(database = name, "opened in-memory database");
        self.record(ReplicaEvent::Opened(name.to_string()));

        Ok(MemoryConnection {
            name: name.to_string(),
            database,
            events: self.events.clone(),
            closed: Arc::new(AtomicBool::new(false)),
            write_delay: self.write_delay.clone(),
        })
    }

    async fn handover(&self, cancel: &CancellationToken) -> Result<(), Self::Error> {
        self.record(ReplicaEvent::Handover);

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match self.handover_failure.lock().clone() {
            Some(message) => Err(Error::Handover(message)),
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.closed.store(true, Ordering::SeqCst);
        self.databases.lock().clear();
        self.record(ReplicaEvent::Closed);

        Ok(())
    }
}

/// Connection to one in-memory database. Clones share the handle.
#[derive(Clone, Debug)]
pub struct MemoryConnection {
    name: String,
    database: Database,
    events: EventLog,
    closed: Arc<AtomicBool>,
    write_delay: WriteDelay,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SqlConnection for MemoryConnection {
    type Error = Error;

    async fn execute<Q: Into<String> + Send>(
        &self,
        query: Q,
        params: Vec<SqlParam>,
    ) -> Result<Executed, Self::Error> {
        self.ensure_open()?;

        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(self.database.execute(&query.into(), params).await?)
    }

    async fn migrate(&self, migration: Migration) -> Result<bool, Self::Error> {
        self.ensure_open()?;

        Ok(self.database.migrate(&migration).await?)
    }

    async fn query<Q: Into<String> + Send>(
        &self,
        query: Q,
        params: Vec<SqlParam>,
    ) -> Result<Rows, Self::Error> {
        self.ensure_open()?;

        Ok(self.database.query(&query.into(), params).await?)
    }

    async fn schema_version(&self) -> Result<Option<u64>, Self::Error> {
        self.ensure_open()?;

        Ok(self.database.schema_version().await?)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        self.events
            .lock()
            .push(ReplicaEvent::ConnectionClosed(self.name.clone()));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    #[tokio::test]
    async fn test_gated_ready_waits_for_mark() {
        let replica = Arc::new(MemoryReplica::gated("mem-0"));
        let cancel = CancellationToken::new();

        let waiter = {
            let replica = replica.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { replica.ready(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        replica.mark_ready();
        waiter.await.unwrap().unwrap();

        assert_eq!(replica.events(), vec![ReplicaEvent::Ready]);
    }

    #[tokio::test]
    async fn test_ready_cancelled() {
        let replica = MemoryReplica::gated("mem-0");
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(replica.ready(&cancel).await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_same_name_shares_database() {
        let replica = MemoryReplica::new("mem-0");

        let first = replica.open("test").await.unwrap();
        first
            .migrate(Migration::new(1, "t", "CREATE TABLE t (id INTEGER)"))
            .await
            .unwrap();
        first
            .execute("INSERT INTO t (id) VALUES (?1)", vec![SqlParam::Integer(5)])
            .await
            .unwrap();

        let second = replica.open("test").await.unwrap();
        let rows = second.query("SELECT id FROM t", vec![]).await.unwrap();

        assert_eq!(rows.row(0).unwrap().get_integer(0), Some(5));
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_use() {
        let replica = MemoryReplica::new("mem-0");
        let connection = replica.open("test").await.unwrap();
        let clone = connection.clone();

        connection.close().await.unwrap();

        assert!(matches!(
            clone.query("SELECT 1", vec![]).await,
            Err(Error::Closed)
        ));
        assert!(matches!(
            clone
                .migrate(Migration::new(1, "t", "CREATE TABLE t (id INTEGER)"))
                .await,
            Err(Error::Closed)
        ));
        assert!(matches!(connection.close().await, Err(Error::Closed)));
        assert_eq!(
            replica.events(),
            vec![
                ReplicaEvent::Opened("test".to_string()),
                ReplicaEvent::ConnectionClosed("test".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_handover_failure_and_close() {
        let replica = MemoryReplica::new("mem-0");
        replica.fail_handover("no voters");

        let result = replica.handover(&CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Handover(_))));

        replica.close().await.unwrap();
        assert!(matches!(replica.open("test").await, Err(Error::Closed)));
        assert_eq!(
            replica.events(),
            vec![ReplicaEvent::Handover, ReplicaEvent::Closed]
        );
    }
}
