use crate::{MemoryConnection, MemoryDriver, session::Session};
use async_stream::try_stream;
use ledger_core::{
    ErrorContext, Executor, QueryResult, Result, Statement, Transaction, stream::Stream,
    truncate_long,
};
use std::future;

/// Snapshot isolated transaction on a [`MemoryConnection`].
///
/// Reads see the store as it was when the transaction began plus its own
/// writes. Commit fails with a conflict when another transaction committed a
/// write to a row or table this one also wrote.
pub struct MemoryTransaction<'c> {
    connection: &'c mut MemoryConnection,
    session: Session,
}

impl<'c> MemoryTransaction<'c> {
    pub(crate) fn new(connection: &'c mut MemoryConnection) -> Self {
        let session = Session::begin(connection.store.clone());
        log::trace!("Transaction started on `{}`", connection.store_name());
        Self {
            connection,
            session,
        }
    }
}

impl<'c> Executor for MemoryTransaction<'c> {
    type Driver = MemoryDriver;

    fn run<'s>(&'s mut self, statement: Statement) -> impl Stream<Item = Result<QueryResult>> + Send {
        try_stream! {
            let context = || format!("While running the statement:\n{}", truncate_long!(statement.sql()));
            let results = self.session.run(&statement).with_context(context).inspect_err(|e| {
                log::error!("{e:#}");
            })?;
            for result in results {
                yield result;
            }
        }
    }
}

impl<'c> Transaction<'c> for MemoryTransaction<'c> {
    fn commit(self) -> impl Future<Output = Result<()>> + Send {
        let store = self.session.store().clone();
        let result = store.commit(self.session).inspect_err(|e| {
            log::error!("{:#}", e);
        });
        log::trace!("Commit on `{}`", self.connection.store_name());
        future::ready(result)
    }

    fn rollback(self) -> impl Future<Output = Result<()>> + Send {
        log::trace!("Rollback on `{}`", self.connection.store_name());
        drop(self.session);
        future::ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{BackendError, Cause, Connection};

    async fn connect(name: &str) -> MemoryConnection {
        MemoryConnection::connect(format!("memory://{name}").into())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn snapshot_isolation() {
        let mut setup = connect("snapshot_isolation").await;
        setup
            .execute("CREATE TABLE counters (id INTEGER PRIMARY KEY, value INTEGER); INSERT INTO counters (value) VALUES (0)")
            .await
            .unwrap();
        let (mut a, mut b) = (
            connect("snapshot_isolation").await,
            connect("snapshot_isolation").await,
        );
        let mut first = a.begin().await.unwrap();
        let mut second = b.begin().await.unwrap();
        first
            .execute("UPDATE counters SET value = value + 1")
            .await
            .unwrap();
        // Uncommitted writes are invisible to others
        let rows = second.query("SELECT value FROM counters").await.unwrap();
        assert_eq!(rows[0].get::<i64>("value").unwrap(), 0);
        second
            .execute("UPDATE counters SET value = value + 10")
            .await
            .unwrap();
        first.commit().await.unwrap();
        let error = second.commit().await.unwrap_err();
        assert_eq!(BackendError::cause_of(&error), Cause::Conflict);
        let rows = setup.query("SELECT value FROM counters").await.unwrap();
        assert_eq!(rows[0].get::<i64>("value").unwrap(), 1);
    }

    #[tokio::test]
    async fn rollback_discards() {
        let mut connection = connect("rollback_discards").await;
        connection
            .execute("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        let mut transaction = connection.begin().await.unwrap();
        let affected = transaction
            .execute("INSERT INTO items (name) VALUES ('a')")
            .await
            .unwrap();
        assert_eq!(affected.last_affected_id, Some(1));
        transaction.rollback().await.unwrap();
        assert!(connection.query("SELECT * FROM items").await.unwrap().is_empty());
        // Ids are not reused
        let affected = connection
            .execute("INSERT INTO items (name) VALUES ('b')")
            .await
            .unwrap();
        assert_eq!(affected.last_affected_id, Some(2));
    }

    #[tokio::test]
    async fn disjoint_writes_commit() {
        let mut setup = connect("disjoint_writes_commit").await;
        setup
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v INTEGER); INSERT INTO t (v) VALUES (1), (2)")
            .await
            .unwrap();
        let (mut a, mut b) = (
            connect("disjoint_writes_commit").await,
            connect("disjoint_writes_commit").await,
        );
        let mut first = a.begin().await.unwrap();
        let mut second = b.begin().await.unwrap();
        first.execute("UPDATE t SET v = 10 WHERE id = 1").await.unwrap();
        second.execute("UPDATE t SET v = 20 WHERE id = 2").await.unwrap();
        first.commit().await.unwrap();
        second.commit().await.unwrap();
        let rows = setup.query("SELECT v FROM t ORDER BY id").await.unwrap();
        let values = rows
            .iter()
            .map(|r| r.get::<i64>("v").unwrap())
            .collect::<Vec<_>>();
        assert_eq!(values, [10, 20]);
    }
}
