use crate::{
    CBox, SQLiteDriver, SQLiteTransaction,
    extract::{bind_values, extract_name, extract_value, last_error},
};
use async_stream::try_stream;
use flume::Sender;
use ledger_core::{
    BackendError, Cause, Connection, Error, ErrorContext, Executor, QueryResult, Result,
    RowLabeled, RowsAffected, Statement, Value, send_value, stream::Stream, truncate_long,
};
use libsqlite3_sys::*;
use parking_lot::Mutex;
use std::{
    borrow::Cow,
    ffi::{CStr, CString, c_char, c_int},
    ptr,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::task::{JoinHandle, spawn_blocking};

/// Milliseconds a statement waits for a lock held by another connection.
const BUSY_TIMEOUT_MS: c_int = 5_000;

/// Open `sqlite3` handle, shared with the thread running statements on it.
///
/// The handle is closed once both the connection and the running thread let go of it.
pub(crate) struct Handle {
    pub(crate) db: CBox<*mut sqlite3>,
    /// Held for as long as statements run on the handle.
    running: Mutex<()>,
    /// Set when nobody waits anymore for the results of the current run.
    abandoned: AtomicBool,
}

impl Handle {
    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Stop the current run: no further statement starts, the running one is interrupted.
    fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
        unsafe { sqlite3_interrupt(*self.db) };
    }
}

/// Abandons the run it was created for, unless disarmed once the run completed.
struct Abandon(Option<Arc<Handle>>);

impl Abandon {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for Abandon {
    fn drop(&mut self) {
        if let Some(handle) = &self.0 {
            log::debug!("Interrupting the statements of an abandoned run");
            handle.abandon();
        }
    }
}

/// Wrapper for a SQLite `sqlite3` connection pointer.
///
/// Statements run on a blocking thread, their rows and affected counts are
/// streamed back as they are produced. Foreign keys are enforced.
///
/// Dropping a result stream early interrupts the thread. Anything issued next on
/// the connection waits for that thread to stop first.
pub struct SQLiteConnection {
    pub(crate) handle: Arc<Handle>,
    running: Option<JoinHandle<()>>,
}

impl SQLiteConnection {
    pub fn last_error(&self) -> String {
        unsafe {
            let errcode = sqlite3_errcode(*self.handle.db);
            last_error(*self.handle.db, errcode).to_string()
        }
    }

    /// Whether a transaction is open on this connection.
    pub fn in_transaction(&self) -> bool {
        unsafe { sqlite3_get_autocommit(*self.handle.db) == 0 }
    }

    /// Wait for the thread of the previous run, if any, to stop.
    pub(crate) async fn settle(&mut self) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        let result = running.await;
        self.running = None;
        if let Err(error) = result {
            let error = Error::new(error).context("While waiting for the previous statement");
            log::error!("{error:#}");
        }
    }

    /// Run `sql` on the calling thread, without parameters nor results.
    ///
    /// Blocks until the thread of the previous run released the handle.
    pub(crate) fn execute_sync(&self, sql: &CStr) -> Result<()> {
        let _running = self.handle.running.lock();
        Self::exec(*self.handle.db, sql)
    }

    /// Roll back the open transaction on the calling thread, once the previous run stopped.
    pub(crate) fn rollback_sync(&self) -> Result<()> {
        let _running = self.handle.running.lock();
        if !self.in_transaction() {
            return Ok(());
        }
        Self::exec(*self.handle.db, c"ROLLBACK")
    }

    fn exec(connection: *mut sqlite3, sql: &CStr) -> Result<()> {
        unsafe {
            let rc = sqlite3_exec(connection, sql.as_ptr(), None, ptr::null_mut(), ptr::null_mut());
            if rc != SQLITE_OK {
                return Err(last_error(connection, rc)
                    .context(format!("While running `{}`", sql.to_string_lossy())));
            }
        }
        Ok(())
    }

    /// Step `statement` to completion, returns `false` when it failed.
    fn do_run_prepared(
        handle: &Handle,
        statement: *mut sqlite3_stmt,
        tx: &Sender<Result<QueryResult>>,
    ) -> bool {
        let connection = *handle.db;
        unsafe {
            let count = sqlite3_column_count(statement);
            let labels = match (0..count)
                .map(|i| extract_name(statement, i))
                .collect::<Result<Arc<[_]>>>()
            {
                Ok(labels) => labels,
                Err(error) => {
                    send_value!(tx, Err(error));
                    return false;
                }
            };
            let changes = sqlite3_total_changes64(connection);
            loop {
                if handle.is_abandoned() {
                    return false;
                }
                match sqlite3_step(statement) {
                    SQLITE_ROW => {
                        let values = match (0..count)
                            .map(|i| extract_value(statement, i))
                            .collect::<Result<_>>()
                        {
                            Ok(values) => values,
                            Err(error) => {
                                send_value!(tx, Err(error));
                                return false;
                            }
                        };
                        send_value!(tx, Ok(QueryResult::Row(RowLabeled::new(labels.clone(), values))));
                    }
                    SQLITE_DONE => {
                        if sqlite3_stmt_readonly(statement) == 0 {
                            send_value!(
                                tx,
                                Ok(QueryResult::Affected(RowsAffected {
                                    rows_affected: Some(
                                        (sqlite3_total_changes64(connection) - changes) as _
                                    ),
                                    last_affected_id: Some(sqlite3_last_insert_rowid(connection)),
                                }))
                            );
                        }
                        return true;
                    }
                    rc => {
                        if !handle.is_abandoned() {
                            send_value!(tx, Err(last_error(connection, rc)));
                        }
                        return false;
                    }
                }
            }
        }
    }

    /// Prepare and run every statement of `sql` in order, each one consuming
    /// as many `params` as it has placeholders.
    ///
    /// Stops before the next statement once the run is abandoned.
    pub(crate) fn do_run(
        handle: &Handle,
        sql: &str,
        params: &[Value],
        tx: Sender<Result<QueryResult>>,
    ) {
        let _running = handle.running.lock();
        let connection = *handle.db;
        let mismatch = |needed: usize| {
            Error::new(BackendError::new(
                Cause::Syntax,
                format!(
                    "The statement has {needed} parameters but {} values were bound",
                    params.len()
                ),
            ))
        };
        unsafe {
            let sql = sql.trim();
            let mut it = sql.as_ptr() as *const c_char;
            let mut len = sql.len();
            let mut bound = 0;
            while len > 0 {
                if handle.is_abandoned() || tx.is_disconnected() {
                    log::debug!("Skipping the remaining statements of an abandoned run");
                    return;
                }
                let mut statement = CBox::new(ptr::null_mut(), |p| {
                    sqlite3_finalize(p);
                });
                let mut tail = ptr::null();
                let rc = sqlite3_prepare_v2(
                    connection,
                    it,
                    len as c_int,
                    &mut *statement,
                    &mut tail,
                );
                if rc != SQLITE_OK {
                    send_value!(tx, Err(last_error(connection, rc)));
                    return;
                }
                len = if tail.is_null() {
                    0
                } else {
                    len - tail.offset_from_unsigned(it)
                };
                it = tail;
                if statement.is_null() {
                    // Only whitespace or comments
                    continue;
                }
                let needed = sqlite3_bind_parameter_count(*statement) as usize;
                if len == 0 && bound + needed < params.len() {
                    send_value!(tx, Err(mismatch(bound + needed)));
                    return;
                }
                let Some(values) = params.get(bound..bound + needed) else {
                    send_value!(tx, Err(mismatch(bound + needed)));
                    return;
                };
                if let Err(error) = bind_values(*statement, values) {
                    send_value!(tx, Err(error));
                    return;
                }
                bound += needed;
                if !Self::do_run_prepared(handle, *statement, &tx) {
                    return;
                }
            }
            if bound != params.len() {
                send_value!(tx, Err(mismatch(bound)));
            }
        }
    }
}

impl Executor for SQLiteConnection {
    type Driver = SQLiteDriver;

    fn run<'s>(&'s mut self, statement: Statement) -> impl Stream<Item = Result<QueryResult>> + Send {
        let context = Arc::new(format!(
            "While running the statement:\n{}",
            truncate_long!(statement.sql())
        ));
        try_stream! {
            self.settle().await;
            let (tx, rx) = flume::unbounded::<Result<QueryResult>>();
            let handle = self.handle.clone();
            handle.abandoned.store(false, Ordering::SeqCst);
            let mut abandon = Abandon(Some(handle.clone()));
            self.running = Some(spawn_blocking(move || {
                Self::do_run(&handle, statement.sql(), statement.params(), tx);
            }));
            while let Ok(result) = rx.recv_async().await {
                if result.is_err() {
                    abandon.disarm();
                }
                yield result.map_err(|e| {
                    let error = e.context(context.clone());
                    log::error!("{:#}", error);
                    error
                })?;
            }
            abandon.disarm();
            self.settle().await;
        }
    }
}

impl Connection for SQLiteConnection {
    async fn connect(url: Cow<'static, str>) -> Result<SQLiteConnection> {
        let context = format!("While trying to connect to `{}`", truncate_long!(url));
        let url = Self::sanitize_url(url)?;
        let url = CString::from_str(&url.as_str().replacen("sqlite://", "file:", 1))
            .with_context(|| context.clone())?;
        let mut connection;
        unsafe {
            connection = CBox::new(ptr::null_mut(), |p| {
                if sqlite3_close(p) != SQLITE_OK {
                    let error = last_error(p, sqlite3_errcode(p))
                        .context("While closing the sqlite connection");
                    log::error!("{error:#}");
                }
            });
            let rc = sqlite3_open_v2(
                url.as_ptr(),
                &mut *connection,
                SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE | SQLITE_OPEN_URI,
                ptr::null(),
            );
            if rc != SQLITE_OK {
                let error = last_error(*connection, rc).context(context);
                log::error!("{:#}", error);
                return Err(error);
            }
            sqlite3_busy_timeout(*connection, BUSY_TIMEOUT_MS);
        }
        let connection = Self {
            handle: Arc::new(Handle {
                db: connection,
                running: Mutex::new(()),
                abandoned: AtomicBool::new(false),
            }),
            running: None,
        };
        connection
            .execute_sync(c"PRAGMA foreign_keys = ON")
            .with_context(|| context.clone())
            .inspect_err(|e| log::error!("{e:#}"))?;
        log::debug!("Connected to `{}`", url.to_string_lossy());
        Ok(connection)
    }

    fn begin(&mut self) -> impl Future<Output = Result<SQLiteTransaction<'_>>> + Send {
        SQLiteTransaction::new(self)
    }

    async fn disconnect(mut self) -> Result<()> {
        self.settle().await;
        log::debug!("Disconnecting from SQLite");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::stream::TryStreamExt;
    use std::time::Duration;

    async fn connect() -> SQLiteConnection {
        SQLiteConnection::connect("sqlite://:memory:".into())
            .await
            .expect("Could not open an in-memory database")
    }

    #[tokio::test]
    async fn positional_parameters_across_statements() {
        let mut connection = connect().await;
        connection
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, a TEXT, b INTEGER)")
            .await
            .unwrap();
        let affected = connection
            .execute(
                Statement::new(
                    "INSERT INTO t (a, b) VALUES (?, ?); -- first\nINSERT INTO t (a) VALUES (?);",
                )
                .bind("x")
                .bind(1)
                .bind("y"),
            )
            .await
            .unwrap();
        assert_eq!(affected.rows_affected, Some(2));
        assert_eq!(affected.last_affected_id, Some(2));
        let rows = connection
            .fetch("SELECT a, b FROM t ORDER BY id")
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(rows[0].values(), [Value::Varchar(Some("x".into())), Value::Int64(Some(1))]);
        assert_eq!(rows[1].values(), [Value::Varchar(Some("y".into())), Value::Null]);

        let error = connection
            .execute(Statement::new("INSERT INTO t (a) VALUES (?)"))
            .await
            .unwrap_err();
        assert_eq!(BackendError::cause_of(&error), Cause::Syntax);
        let error = connection
            .execute(Statement::new("INSERT INTO t (a) VALUES (?)").bind("z").bind("extra"))
            .await
            .unwrap_err();
        assert!(format!("{error:#}").contains("has 1 parameters but 2 values"));
    }

    #[tokio::test]
    async fn ddl_does_not_report_previous_changes() {
        let mut connection = connect().await;
        connection
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        connection.execute("INSERT INTO t DEFAULT VALUES").await.unwrap();
        let affected = connection
            .execute("CREATE TABLE u (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        assert_eq!(affected.rows_affected, Some(0));
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let mut connection = connect().await;
        connection
            .execute(
                "CREATE TABLE a (id INTEGER PRIMARY KEY);
                 CREATE TABLE b (id INTEGER PRIMARY KEY, a_id INTEGER REFERENCES a(id));",
            )
            .await
            .unwrap();
        let error = connection
            .execute("INSERT INTO b (a_id) VALUES (42)")
            .await
            .unwrap_err();
        assert_eq!(BackendError::cause_of(&error), Cause::Constraint);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn abandoned_run_stops() {
        let mut connection = connect().await;
        connection
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        let slow = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 100000000) SELECT COUNT(*) FROM c;";
        let sql = format!("INSERT INTO t DEFAULT VALUES; {slow}").repeat(10);
        let outcome = tokio::time::timeout(Duration::from_millis(100), connection.execute(sql)).await;
        assert!(outcome.is_err(), "The slow statements completed");

        // Only the first insert ran, the next statement waits for the interrupted thread
        let rows = connection
            .query("SELECT COUNT(*) AS total FROM t")
            .await
            .unwrap();
        assert_eq!(rows[0].get::<i64>("total").unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        let rows = connection
            .query("SELECT COUNT(*) AS total FROM t")
            .await
            .unwrap();
        assert_eq!(rows[0].get::<i64>("total").unwrap(), 1);
    }

    #[tokio::test]
    async fn wrong_scheme() {
        assert!(
            SQLiteConnection::connect("memory://localhost/db".into())
                .await
                .is_err()
        );
    }
}
