//! Durable raft log and vote, kept in RocksDB.

use std::fmt::Debug;
use std::ops::{Bound, RangeBounds};
use std::path::Path;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use openraft::entry::RaftEntry;
use openraft::storage::{IOFlushed, LogState, RaftLogStorage};
use openraft::{Entry, LogId, RaftLogReader, StorageError, Vote};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options};
use tracing::debug;

use crate::types::TypeConfig;

const CF_META: &str = "meta";
const CF_LOGS: &str = "logs";

/// Log storage backed by two RocksDB column families: `meta` for the vote
/// and purge marker, `logs` for entries keyed by big-endian index.
#[derive(Debug, Clone)]
pub struct LogStore {
    db: Arc<DB>,
}

impl LogStore {
    /// Opens or creates the log at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if RocksDB cannot open the directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, rocksdb::Error> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
            ColumnFamilyDescriptor::new(CF_LOGS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError<TypeConfig>> {
        self.db.cf_handle(name).ok_or_else(|| {
            StorageError::read_logs(&std::io::Error::other(format!(
                "column family `{name}` not found"
            )))
        })
    }

    fn get_meta<M: meta::StoreMeta<TypeConfig>>(
        &self,
    ) -> Result<Option<M::Value>, StorageError<TypeConfig>> {
        let bytes = self
            .db
            .get_cf(self.cf(CF_META)?, M::KEY)
            .map_err(|e| M::read_err(e))?;

        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let value = serde_json::from_slice(&bytes).map_err(|e| M::read_err(e))?;

        Ok(Some(value))
    }

    fn put_meta<M: meta::StoreMeta<TypeConfig>>(
        &self,
        value: &M::Value,
    ) -> Result<(), StorageError<TypeConfig>> {
        let json_value = serde_json::to_vec(value).map_err(|e| M::write_err(value, e))?;

        self.db
            .put_cf(self.cf(CF_META)?, M::KEY, json_value)
            .map_err(|e| M::write_err(value, e))?;

        Ok(())
    }

    fn flush(&self) -> Result<(), rocksdb::Error> {
        self.db.flush_wal(true)
    }
}

impl RaftLogReader<TypeConfig> for LogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + Send>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<TypeConfig>> {
        let start = match range.start_bound() {
            Bound::Included(x) => id_to_bin(*x),
            Bound::Excluded(x) => id_to_bin(*x + 1),
            Bound::Unbounded => id_to_bin(0),
        };

        let mut entries = Vec::new();

        let it = self.db.iterator_cf(
            self.cf(CF_LOGS)?,
            IteratorMode::From(&start, Direction::Forward),
        );

        for item in it {
            let (key, val) = item.map_err(|e| StorageError::read_logs(&e))?;

            let id = bin_to_id(&key)?;
            if !range.contains(&id) {
                break;
            }

            let entry: Entry<TypeConfig> =
                serde_json::from_slice(&val).map_err(|e| StorageError::read_logs(&e))?;

            entries.push(entry);
        }

        Ok(entries)
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<TypeConfig>>, StorageError<TypeConfig>> {
        self.get_meta::<meta::Vote>()
    }
}

impl RaftLogStorage<TypeConfig> for LogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<TypeConfig>> {
        let last = self
            .db
            .iterator_cf(self.cf(CF_LOGS)?, IteratorMode::End)
            .next();

        let last_log_id = match last {
            Some(item) => {
                let (_, entry_bytes) = item.map_err(|e| StorageError::read_logs(&e))?;
                let entry = serde_json::from_slice::<Entry<TypeConfig>>(&entry_bytes)
                    .map_err(|e| StorageError::read_logs(&e))?;
                Some(entry.log_id())
            }
            None => None,
        };

        let last_purged_log_id = self.get_meta::<meta::LastPurged>()?;

        let last_log_id = last_log_id.or_else(|| last_purged_log_id.clone());

        Ok(LogState {
            last_purged_log_id,
            last_log_id,
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn save_vote(&mut self, vote: &Vote<TypeConfig>) -> Result<(), StorageError<TypeConfig>> {
        self.put_meta::<meta::Vote>(vote)?;
        self.flush().map_err(|e| StorageError::write_vote(&e))?;

        Ok(())
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: IOFlushed<TypeConfig>,
    ) -> Result<(), StorageError<TypeConfig>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + Send,
    {
        let cf = self.cf(CF_LOGS)?;

        for entry in entries {
            let value = serde_json::to_vec(&entry).map_err(|e| StorageError::write_logs(&e))?;

            self.db
                .put_cf(cf, id_to_bin(entry.index()), value)
                .map_err(|e| StorageError::write_logs(&e))?;
        }

        self.flush().map_err(|e| StorageError::write_logs(&e))?;

        callback.io_completed(Ok(()));

        Ok(())
    }

    async fn truncate(
        &mut self,
        log_id: LogId<TypeConfig>,
    ) -> Result<(), StorageError<TypeConfig>> {
        debug!("truncate: [{:?}, +oo)", log_id);

        let from = id_to_bin(log_id.index);
        let to = id_to_bin(u64::MAX);

        self.db
            .delete_range_cf(self.cf(CF_LOGS)?, &from, &to)
            .map_err(|e| StorageError::write_logs(&e))?;

        self.flush().map_err(|e| StorageError::write_logs(&e))?;

        Ok(())
    }

    async fn purge(&mut self, log_id: LogId<TypeConfig>) -> Result<(), StorageError<TypeConfig>> {
        debug!("purge: [0, {:?}]", log_id);

        // The marker must land before the entries go.
        self.put_meta::<meta::LastPurged>(&log_id)?;

        let from = id_to_bin(0);
        let to = id_to_bin(log_id.index + 1);

        self.db
            .delete_range_cf(self.cf(CF_LOGS)?, &from, &to)
            .map_err(|e| StorageError::write_logs(&e))?;

        Ok(())
    }
}

mod meta {
    use openraft::{AnyError, ErrorSubject, ErrorVerb, StorageError};

    use crate::types::TypeConfig;

    /// A metadata key and the type stored under it
    pub trait StoreMeta<C: openraft::RaftTypeConfig> {
        const KEY: &'static str;

        type Value: serde::Serialize + serde::de::DeserializeOwned;

        fn subject(v: Option<&Self::Value>) -> ErrorSubject<C>;

        fn read_err(e: impl std::error::Error + 'static) -> StorageError<C> {
            StorageError::new(Self::subject(None), ErrorVerb::Read, AnyError::new(&e))
        }

        fn write_err(v: &Self::Value, e: impl std::error::Error + 'static) -> StorageError<C> {
            StorageError::new(Self::subject(Some(v)), ErrorVerb::Write, AnyError::new(&e))
        }
    }

    pub struct LastPurged;
    pub struct Vote;

    impl StoreMeta<TypeConfig> for LastPurged {
        const KEY: &'static str = "last_purged_log_id";
        type Value = openraft::LogId<TypeConfig>;

        fn subject(_v: Option<&Self::Value>) -> ErrorSubject<TypeConfig> {
            ErrorSubject::Store
        }
    }

    impl StoreMeta<TypeConfig> for Vote {
        const KEY: &'static str = "vote";
        type Value = openraft::Vote<TypeConfig>;

        fn subject(_v: Option<&Self::Value>) -> ErrorSubject<TypeConfig> {
            ErrorSubject::Vote
        }
    }
}

// Big-endian keys keep RocksDB's byte order equal to index order.
fn id_to_bin(id: u64) -> [u8; 8] {
    let mut buf = [0; 8];
    BigEndian::write_u64(&mut buf, id);
    buf
}

fn bin_to_id(buf: &[u8]) -> Result<u64, StorageError<TypeConfig>> {
    buf.get(..8).map(BigEndian::read_u64).ok_or_else(|| {
        StorageError::read_logs(&std::io::Error::other("log key shorter than 8 bytes"))
    })
}
