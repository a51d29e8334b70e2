//! State machine that applies committed requests to one libsql database per
//! name. Snapshots carry a `VACUUM INTO` copy of every database.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use fleet_libsql::Database;
use openraft::entry::RaftEntry;
use openraft::storage::{RaftStateMachine, Snapshot};
use openraft::{
    AnyError, Entry, EntryPayload, ErrorSubject, ErrorVerb, LogId, RaftSnapshotBuilder,
    SnapshotMeta, StorageError, StoredMembership,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::types::{Read, ReadRequest, ReadResponse, Request, Response, TypeConfig};

const DB_DIR: &str = "db";
const SNAPSHOT_FILE: &str = "snapshot";
const MAX_DATABASE_NAME_LEN: usize = 64;

/// Persisted form of the latest snapshot.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct StoredSnapshot {
    meta: SnapshotMeta<TypeConfig>,
    data: Bytes,
}

/// Contents of a snapshot: a full copy of each database file.
#[derive(Debug, Default, Deserialize, Serialize)]
struct SnapshotPayload {
    databases: BTreeMap<String, Bytes>,
}

#[derive(Debug, Default)]
struct StateMachineData {
    last_applied: Option<LogId<TypeConfig>>,
    last_membership: StoredMembership<TypeConfig>,
    databases: BTreeMap<String, Database>,
}

/// Shared handle onto the state machine. Clones see the same state, so the
/// replica keeps one for reads while openraft drives another.
#[derive(Clone, Debug)]
pub struct StateMachineStore {
    data: Arc<RwLock<StateMachineData>>,
    current_snapshot: Arc<RwLock<Option<StoredSnapshot>>>,
    data_dir: PathBuf,
}

impl StateMachineStore {
    /// Opens the state machine under `data_dir`.
    ///
    /// Database files are rebuilt from the last persisted snapshot, or
    /// started empty without one, so replaying the log after the snapshot's
    /// last applied entry reproduces the committed state exactly once.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be prepared or the persisted
    /// snapshot cannot be restored.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, Error> {
        let store = Self {
            data: Arc::new(RwLock::new(StateMachineData::default())),
            current_snapshot: Arc::new(RwLock::new(None)),
            data_dir: data_dir.as_ref().to_path_buf(),
        };

        let snapshot_path = store.snapshot_path();

        if tokio::fs::try_exists(&snapshot_path).await? {
            let bytes = tokio::fs::read(&snapshot_path).await?;
            let stored: StoredSnapshot = ciborium::from_reader(bytes.as_slice())
                .map_err(|e| Error::Raft(format!("corrupt snapshot: {e}")))?;

            let mut data = store.data.write().await;
            store.restore(&mut data, &stored).await?;
            drop(data);

            info!(snapshot_id = %stored.meta.snapshot_id, "restored state machine from snapshot");

            *store.current_snapshot.write().await = Some(stored);
        } else {
            store.reset_db_dir().await?;
        }

        Ok(store)
    }

    /// Serves a read from the local copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the read fails.
    pub async fn read(&self, request: ReadRequest) -> Result<ReadResponse, Error> {
        let database = self.database(&request.database).await?;

        match request.read {
            Read::Query { query, params } => database
                .query(&query, params)
                .await
                .map(ReadResponse::Rows)
                .map_err(|e| Error::Sql(e.to_string())),
            Read::SchemaVersion => database
                .schema_version()
                .await
                .map(ReadResponse::SchemaVersion)
                .map_err(|e| Error::Sql(e.to_string())),
        }
    }

    /// Index of the last applied entry.
    pub async fn last_applied_index(&self) -> Option<u64> {
        self.data
            .read()
            .await
            .last_applied
            .as_ref()
            .map(|log_id| log_id.index)
    }

    async fn database(&self, name: &str) -> Result<Database, Error> {
        if let Some(database) = self.data.read().await.databases.get(name) {
            return Ok(database.clone());
        }

        let mut data = self.data.write().await;
        self.get_or_open(&mut data, name).await
    }

    async fn get_or_open(
        &self,
        data: &mut StateMachineData,
        name: &str,
    ) -> Result<Database, Error> {
        validate_database_name(name)?;

        if let Some(database) = data.databases.get(name) {
            return Ok(database.clone());
        }

        let database = Database::connect(self.database_path(name))
            .await
            .map_err(|e| Error::Sql(e.to_string()))?;

        debug!(database = name, "opened database");

        data.databases.insert(name.to_string(), database.clone());

        Ok(database)
    }

    async fn apply_request(&self, data: &mut StateMachineData, request: Request) -> Response {
        let database = match self.get_or_open(data, request.database()).await {
            Ok(database) => database,
            Err(e) => return Response::Failed(e.to_string()),
        };

        let response = match request {
            Request::Execute { query, params, .. } => database
                .execute(&query, params)
                .await
                .map(Response::Executed),
            Request::Migrate { migration, .. } => database
                .migrate(&migration)
                .await
                .map(Response::Migrated),
        };

        response.unwrap_or_else(|e| {
            debug!(error = %e, "request failed on state machine");
            Response::Failed(e.to_string())
        })
    }

    async fn restore(
        &self,
        data: &mut StateMachineData,
        stored: &StoredSnapshot,
    ) -> Result<(), Error> {
        let payload: SnapshotPayload = ciborium::from_reader(stored.data.as_ref())
            .map_err(|e| Error::Raft(format!("corrupt snapshot payload: {e}")))?;

        data.databases.clear();
        self.reset_db_dir().await?;

        for (name, bytes) in payload.databases {
            validate_database_name(&name)?;
            tokio::fs::write(self.database_path(&name), &bytes).await?;
            self.get_or_open(data, &name).await?;
        }

        data.last_applied.clone_from(&stored.meta.last_log_id);
        data.last_membership = stored.meta.last_membership.clone();

        Ok(())
    }

    async fn build(&self) -> Result<StoredSnapshot, Error> {
        let data = self.data.read().await;

        let scratch = tempfile::tempdir_in(&self.data_dir)?;
        let mut payload = SnapshotPayload::default();

        for (name, database) in &data.databases {
            let path = scratch.path().join(name);

            database
                .backup_to(&path)
                .await
                .map_err(|e| Error::Sql(e.to_string()))?;

            payload
                .databases
                .insert(name.clone(), Bytes::from(tokio::fs::read(&path).await?));
        }

        let meta = SnapshotMeta {
            last_log_id: data.last_applied.clone(),
            last_membership: data.last_membership.clone(),
            snapshot_id: format!(
                "snapshot-{}",
                data.last_applied.as_ref().map_or(0, |id| id.index)
            ),
        };

        drop(data);

        let mut encoded = Vec::new();
        ciborium::into_writer(&payload, &mut encoded)
            .map_err(|e| Error::Raft(format!("failed to encode snapshot: {e}")))?;

        Ok(StoredSnapshot {
            meta,
            data: Bytes::from(encoded),
        })
    }

    async fn persist(&self, stored: StoredSnapshot) -> Result<(), Error> {
        let mut encoded = Vec::new();
        ciborium::into_writer(&stored, &mut encoded)
            .map_err(|e| Error::Raft(format!("failed to encode snapshot: {e}")))?;

        let tmp_path = self.data_dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        tokio::fs::write(&tmp_path, &encoded).await?;
        tokio::fs::rename(&tmp_path, self.snapshot_path()).await?;

        debug!(snapshot_id = %stored.meta.snapshot_id, "persisted snapshot");

        *self.current_snapshot.write().await = Some(stored);

        Ok(())
    }

    async fn reset_db_dir(&self) -> Result<(), Error> {
        let db_dir = self.data_dir.join(DB_DIR);

        if tokio::fs::try_exists(&db_dir).await? {
            tokio::fs::remove_dir_all(&db_dir).await?;
        }

        tokio::fs::create_dir_all(&db_dir).await?;

        Ok(())
    }

    fn database_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(DB_DIR).join(format!("{name}.db"))
    }

    fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }
}

/// Database names become file names.
pub fn validate_database_name(name: &str) -> Result<(), Error> {
    let valid = !name.is_empty()
        && name.len() <= MAX_DATABASE_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidDatabaseName(name.to_string()))
    }
}

fn state_machine_err(verb: ErrorVerb, e: &Error) -> StorageError<TypeConfig> {
    StorageError::new(ErrorSubject::StateMachine, verb, AnyError::new(e))
}

impl RaftStateMachine<TypeConfig> for StateMachineStore {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<TypeConfig>>, StoredMembership<TypeConfig>), StorageError<TypeConfig>>
    {
        let data = self.data.read().await;

        Ok((data.last_applied.clone(), data.last_membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<Response>, StorageError<TypeConfig>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + Send,
        I::IntoIter: Send,
    {
        let mut responses = Vec::new();
        let mut data = self.data.write().await;

        for entry in entries {
            let log_id = entry.log_id();
            data.last_applied = Some(log_id.clone());

            match entry.payload {
                EntryPayload::Blank => responses.push(Response::Empty),
                EntryPayload::Normal(request) => {
                    let response = self.apply_request(&mut data, request).await;
                    responses.push(response);
                }
                EntryPayload::Membership(membership) => {
                    data.last_membership = StoredMembership::new(Some(log_id), membership);
                    responses.push(Response::Empty);
                }
            }
        }

        Ok(responses)
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Cursor<Vec<u8>>, StorageError<TypeConfig>> {
        Ok(Cursor::new(Vec::new()))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<TypeConfig>,
        snapshot: Cursor<Vec<u8>>,
    ) -> Result<(), StorageError<TypeConfig>> {
        info!(snapshot_id = %meta.snapshot_id, "installing snapshot");

        let stored = StoredSnapshot {
            meta: meta.clone(),
            data: Bytes::from(snapshot.into_inner()),
        };

        let mut data = self.data.write().await;

        self.restore(&mut data, &stored)
            .await
            .map_err(|e| state_machine_err(ErrorVerb::Write, &e))?;

        drop(data);

        self.persist(stored)
            .await
            .map_err(|e| state_machine_err(ErrorVerb::Write, &e))
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<TypeConfig>> {
        let current = self.current_snapshot.read().await;

        Ok(current.as_ref().map(|stored| Snapshot {
            meta: stored.meta.clone(),
            snapshot: Cursor::new(stored.data.to_vec()),
        }))
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }
}

impl RaftSnapshotBuilder<TypeConfig> for StateMachineStore {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<TypeConfig>> {
        let stored = self
            .build()
            .await
            .map_err(|e| state_machine_err(ErrorVerb::Read, &e))?;

        let snapshot = Snapshot {
            meta: stored.meta.clone(),
            snapshot: Cursor::new(stored.data.to_vec()),
        };

        self.persist(stored).await.map_err(|e| {
            warn!(error = %e, "failed to persist snapshot");
            state_machine_err(ErrorVerb::Write, &e)
        })?;

        Ok(snapshot)
    }
}
