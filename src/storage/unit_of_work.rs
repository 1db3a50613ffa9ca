//! Atomic write boundary for repository commands.
//!
//! Every mutating repository function takes a `&Transaction`, and the only way
//! to obtain one is [`UnitOfWork::run`]. Work that must join an enclosing
//! transaction receives the same handle instead of opening its own.

use redb::WriteTransaction;

use super::db::{Database, DatabaseError};

/// An open write transaction, lent to the closure passed to [`UnitOfWork::run`].
pub struct Transaction {
    txn: WriteTransaction,
}

impl Transaction {
    pub(crate) fn new(txn: WriteTransaction) -> Self {
        Self { txn }
    }

    pub(crate) fn inner(&self) -> &WriteTransaction {
        &self.txn
    }

    fn commit(self) -> Result<(), DatabaseError> {
        self.txn.commit()?;
        Ok(())
    }

    fn abort(self) -> Result<(), DatabaseError> {
        self.txn.abort()?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct UnitOfWork {
    db: Database,
}

impl UnitOfWork {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Run `work` inside one write transaction.
    ///
    /// Commits when `work` returns `Ok`; rolls back and returns the error
    /// otherwise. Nothing written inside `work` is visible to other readers
    /// until the commit.
    pub fn run<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        let tx = self.db.begin_write()?;
        match work(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = tx.abort() {
                    tracing::warn!(error = %abort_err, "Failed to abort transaction");
                }
                Err(e)
            }
        }
    }
}
