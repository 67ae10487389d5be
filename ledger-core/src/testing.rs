//! Backend double recording what the core sends to it.

use crate::{
    BackendError, Cause, Connection, Driver, Error, Executor, QueryResult, Result, RowLabeled,
    RowsAffected, Statement, Transaction, Value,
    stream::{self, Stream},
};
use parking_lot::Mutex;
use std::{borrow::Cow, future, sync::Arc, time::Duration};

#[derive(Debug, Default)]
pub(crate) struct Journal {
    pub(crate) calls: Vec<String>,
    pub(crate) fail_commit: bool,
}

/// Shared journal of a recording connection.
///
/// Statements containing `FAIL` are rejected with a constraint error, statements
/// containing `SLEEP` take one second, statements starting with `SELECT` return
/// one row with the statement text.
#[derive(Debug, Default, Clone)]
pub(crate) struct Recorder(pub(crate) Arc<Mutex<Journal>>);

impl Recorder {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.0.lock().calls.clone()
    }
    pub(crate) fn fail_commit(&self) {
        self.0.lock().fail_commit = true;
    }
    fn push(&self, call: impl Into<String>) {
        self.0.lock().calls.push(call.into());
    }
}

#[derive(Debug, Default, Clone)]
pub(crate) struct RecordingDriver;

impl Driver for RecordingDriver {
    type Connection = RecordingConnection;
    type Transaction<'c> = RecordingTransaction<'c>;
    const NAME: &'static [&'static str] = &["recording"];
}

pub(crate) struct RecordingConnection(pub(crate) Recorder);

impl RecordingConnection {
    pub(crate) fn new() -> Self {
        Self(Default::default())
    }
}

impl Executor for RecordingConnection {
    type Driver = RecordingDriver;

    fn run<'s>(
        &'s mut self,
        statement: Statement,
    ) -> impl Stream<Item = Result<QueryResult>> + Send {
        self.0.push(statement.sql.clone());
        stream::once(async move {
            if statement.sql.contains("SLEEP") {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            if statement.sql.contains("FAIL") {
                return Err(Error::new(BackendError::new(Cause::Constraint, "rejected")));
            }
            Ok(if statement.is_query() {
                QueryResult::Row(RowLabeled::new(
                    ["sql".to_string()].into(),
                    [Value::Varchar(Some(statement.sql))].into(),
                ))
            } else {
                QueryResult::Affected(RowsAffected {
                    rows_affected: Some(1),
                    last_affected_id: None,
                })
            })
        })
    }
}

impl Connection for RecordingConnection {
    async fn connect(_url: Cow<'static, str>) -> Result<RecordingConnection> {
        Ok(RecordingConnection::new())
    }

    fn begin(&mut self) -> impl Future<Output = Result<RecordingTransaction<'_>>> + Send {
        self.0.push("BEGIN");
        future::ready(Ok(RecordingTransaction { connection: self }))
    }

    fn disconnect(self) -> impl Future<Output = Result<()>> + Send {
        self.0.push("DISCONNECT");
        future::ready(Ok(()))
    }
}

pub(crate) struct RecordingTransaction<'c> {
    connection: &'c mut RecordingConnection,
}

impl Executor for RecordingTransaction<'_> {
    type Driver = RecordingDriver;

    fn run<'s>(
        &'s mut self,
        statement: Statement,
    ) -> impl Stream<Item = Result<QueryResult>> + Send {
        self.connection.run(statement)
    }
}

impl<'c> Transaction<'c> for RecordingTransaction<'c> {
    fn commit(self) -> impl Future<Output = Result<()>> + Send {
        let recorder = &self.connection.0;
        recorder.push("COMMIT");
        let fail = recorder.0.lock().fail_commit;
        future::ready(if fail {
            Err(Error::new(BackendError::new(Cause::Conflict, "write conflict")))
        } else {
            Ok(())
        })
    }

    fn rollback(self) -> impl Future<Output = Result<()>> + Send {
        self.connection.0.push("ROLLBACK");
        future::ready(Ok(()))
    }
}
