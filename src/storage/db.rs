use redb::{
    Database as RedbDatabase, Key, ReadOnlyTable, ReadTransaction, ReadableTable,
    ReadableTableMetadata, Table, TableDefinition, Value,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::tables::*;
use super::unit_of_work::Transaction;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(Box<redb::CommitError>),
    #[error("Database error: {0}")]
    Redb(Box<redb::Error>),
    #[error("Database error: {0}")]
    RedbDatabase(Box<redb::DatabaseError>),
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),
    #[error("Storage error: {0}")]
    Storage(Box<redb::StorageError>),
    #[error("Table error: {0}")]
    Table(Box<redb::TableError>),
    #[error("Transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
}

impl From<redb::CommitError> for DatabaseError {
    fn from(e: redb::CommitError) -> Self {
        DatabaseError::Commit(Box::new(e))
    }
}

impl From<redb::DatabaseError> for DatabaseError {
    fn from(e: redb::DatabaseError) -> Self {
        DatabaseError::RedbDatabase(Box::new(e))
    }
}

impl From<redb::Error> for DatabaseError {
    fn from(e: redb::Error) -> Self {
        DatabaseError::Redb(Box::new(e))
    }
}

impl From<redb::StorageError> for DatabaseError {
    fn from(e: redb::StorageError) -> Self {
        DatabaseError::Storage(Box::new(e))
    }
}

impl From<redb::TableError> for DatabaseError {
    fn from(e: redb::TableError) -> Self {
        DatabaseError::Table(Box::new(e))
    }
}

impl From<redb::TransactionError> for DatabaseError {
    fn from(e: redb::TransactionError) -> Self {
        DatabaseError::Transaction(Box::new(e))
    }
}

pub struct Database {
    db: Arc<RedbDatabase>,
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
        }
    }
}

/// Statistics from a purge operation
#[derive(Debug, Default)]
pub struct PurgeStats {
    pub events: u64,
    pub files: u64,
    pub versions: u64,
}

/// Anything repository queries can read tables from: a read snapshot or an
/// open write transaction (read-your-writes).
pub trait Reader {
    type Table<'a, K: Key + 'static, V: Value + 'static>: ReadableTable<K, V>
    where
        Self: 'a;

    fn table<K: Key + 'static, V: Value + 'static>(
        &self,
        definition: TableDefinition<K, V>,
    ) -> Result<Self::Table<'_, K, V>, DatabaseError>;
}

/// A consistent read-only view of the database.
pub struct Snapshot {
    txn: ReadTransaction,
}

impl Reader for Snapshot {
    type Table<'a, K: Key + 'static, V: Value + 'static> = ReadOnlyTable<K, V>;

    fn table<K: Key + 'static, V: Value + 'static>(
        &self,
        definition: TableDefinition<K, V>,
    ) -> Result<Self::Table<'_, K, V>, DatabaseError> {
        Ok(self.txn.open_table(definition)?)
    }
}

impl Reader for Transaction {
    type Table<'a, K: Key + 'static, V: Value + 'static> = Table<'a, K, V>;

    fn table<K: Key + 'static, V: Value + 'static>(
        &self,
        definition: TableDefinition<K, V>,
    ) -> Result<Self::Table<'_, K, V>, DatabaseError> {
        Ok(self.inner().open_table(definition)?)
    }
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("file-vault.redb");
        let db = Arc::new(RedbDatabase::create(db_path)?);

        // Initialize application tables
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(FILES)?;
            let _ = write_txn.open_table(OWNER_FILES)?;
            let _ = write_txn.open_table(FILE_VERSIONS)?;
            let _ = write_txn.open_table(FILE_VERSION_NUMBERS)?;
            let _ = write_txn.open_table(VERSION_STATUS)?;
            let _ = write_txn.open_table(EVENTS)?;
            let _ = write_txn.open_table(PENDING_EVENTS)?;
            let _ = write_txn.open_table(PARKED_EVENTS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Begin a read snapshot
    pub fn read(&self) -> Result<Snapshot, DatabaseError> {
        Ok(Snapshot {
            txn: self.db.begin_read()?,
        })
    }

    /// Begin a write transaction. Only the unit of work calls this.
    pub(crate) fn begin_write(&self) -> Result<Transaction, DatabaseError> {
        Ok(Transaction::new(self.db.begin_write()?))
    }

    // ========================================================================
    // Admin operations
    // ========================================================================

    /// Purge all data - for testing only
    pub fn purge_all(&self) -> Result<PurgeStats, DatabaseError> {
        let write_txn = self.db.begin_write()?;
        let stats = PurgeStats {
            events: write_txn.open_table(EVENTS)?.len()?,
            files: write_txn.open_table(FILES)?.len()?,
            versions: write_txn.open_table(FILE_VERSIONS)?.len()?,
        };

        write_txn.delete_table(FILES)?;
        write_txn.delete_table(OWNER_FILES)?;
        write_txn.delete_table(FILE_VERSIONS)?;
        write_txn.delete_table(FILE_VERSION_NUMBERS)?;
        write_txn.delete_table(VERSION_STATUS)?;
        write_txn.delete_table(EVENTS)?;
        write_txn.delete_table(PENDING_EVENTS)?;
        write_txn.delete_table(PARKED_EVENTS)?;
        {
            let _ = write_txn.open_table(FILES)?;
            let _ = write_txn.open_table(OWNER_FILES)?;
            let _ = write_txn.open_table(FILE_VERSIONS)?;
            let _ = write_txn.open_table(FILE_VERSION_NUMBERS)?;
            let _ = write_txn.open_table(VERSION_STATUS)?;
            let _ = write_txn.open_table(EVENTS)?;
            let _ = write_txn.open_table(PENDING_EVENTS)?;
            let _ = write_txn.open_table(PARKED_EVENTS)?;
        }

        write_txn.commit()?;
        Ok(stats)
    }
}

/// Decode a msgpack record stored under a string key.
pub(crate) fn get_record<T, R>(table: &T, id: &str) -> Result<Option<R>, DatabaseError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
    R: serde::de::DeserializeOwned,
{
    match table.get(id)? {
        Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
        None => Ok(None),
    }
}
