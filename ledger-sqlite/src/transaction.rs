use crate::{SQLiteConnection, SQLiteDriver};
use ledger_core::{
    BackendError, Cause, Error, Executor, Result, Transaction, impl_executor_transaction,
};

/// Transaction on a [`SQLiteConnection`], holding the database write lock from `begin`.
///
/// Dropped without `commit` or `rollback`, it is rolled back synchronously.
/// Both wait for statements still running on the connection to stop first.
pub struct SQLiteTransaction<'c> {
    connection: &'c mut SQLiteConnection,
    finished: bool,
}

impl<'c> SQLiteTransaction<'c> {
    pub(crate) async fn new(connection: &'c mut SQLiteConnection) -> Result<Self> {
        connection.execute("BEGIN IMMEDIATE").await?;
        log::trace!("Transaction started");
        Ok(Self {
            connection,
            finished: false,
        })
    }
}

impl_executor_transaction!(SQLiteDriver, SQLiteTransaction<'c>, connection);
impl<'c> Transaction<'c> for SQLiteTransaction<'c> {
    fn commit(mut self) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.connection.settle().await;
            if !self.connection.in_transaction() {
                // An interrupted write rolls back the whole transaction
                self.finished = true;
                return Err(Error::new(BackendError::new(
                    Cause::Other,
                    "The transaction was already rolled back by SQLite",
                )));
            }
            let result = self.connection.execute("COMMIT").await.map(|_| ());
            if result.is_err() && self.connection.in_transaction() {
                // A failed commit leaves the transaction open
                if let Err(error) = self.connection.execute("ROLLBACK").await {
                    log::error!("{:#}", error.context("While rolling back after a failed commit"));
                }
            }
            self.finished = true;
            result
        }
    }

    fn rollback(mut self) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.connection.settle().await;
            if !self.connection.in_transaction() {
                log::debug!("The transaction was already rolled back by SQLite");
                self.finished = true;
                return Ok(());
            }
            let result = self.connection.execute("ROLLBACK").await.map(|_| ());
            self.finished = true;
            result
        }
    }
}

impl Drop for SQLiteTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        log::debug!("Rolling back a transaction dropped while open");
        if let Err(error) = self.connection.rollback_sync() {
            log::error!("{error:#}");
        }
    }
}
