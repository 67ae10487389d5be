use crate::{
    Connection, ContextState, CoordinatorConfig, Driver, Error, ErrorContext, Pool, Pooled,
    Result, Statement, StatementResult, TransactionContext, TransactionError,
    future::BoxFuture,
};
use std::{
    fmt::{self, Debug},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

static COORDINATOR_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    /// Coordinators with a unit of work in flight on the current task.
    static IN_FLIGHT: Vec<u64>;
}

/// Runs units of work atomically against a backend.
///
/// Each invocation checks out its own connection, opens one [`TransactionContext`]
/// on it, runs the unit of work and then commits, or rolls back on any failure.
/// Different invocations run concurrently on separate connections and rely on the
/// backend isolation. Nothing is retried here, see [`retry`](crate::retry).
///
/// Clones share the connection pool and are the same coordinator for nesting detection.
pub struct Coordinator<D: Driver> {
    id: u64,
    pool: Arc<Pool<D>>,
    config: CoordinatorConfig,
}

impl<D: Driver> Clone for Coordinator<D> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            pool: self.pool.clone(),
            config: self.config.clone(),
        }
    }
}

impl<D: Driver> Debug for Coordinator<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("id", &self.id)
            .field("pool", &self.pool)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

impl<D: Driver> Coordinator<D> {
    /// Open a first connection to validate the configuration and build the coordinator around it.
    pub async fn connect(driver: D, config: CoordinatorConfig) -> Result<Self> {
        let connection = driver.connect(config.url.clone()).await?;
        let pool = Pool::new(driver, config.url.clone(), config.max_connections);
        pool.release(connection);
        let id = COORDINATOR_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Coordinator {id} connected to {} with up to {} connections",
            pool.driver().name(),
            pool.max_connections()
        );
        Ok(Self {
            id,
            pool: Arc::new(pool),
            config,
        })
    }

    pub fn driver(&self) -> &D {
        self.pool.driver()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn pool(&self) -> &Pool<D> {
        &self.pool
    }

    /// Disconnect the idle connections, every later unit of work fails to acquire one.
    ///
    /// Shared by all the clones of this coordinator.
    pub async fn close(&self) -> Result<()> {
        log::debug!("Closing coordinator {}", self.id);
        self.pool.close().await
    }

    /// Check out a connection for autocommit work outside of any unit of work.
    ///
    /// Waits if every connection is in use, including the one held by a unit of
    /// work of the calling task.
    pub async fn acquire(&self) -> Result<Pooled<'_, D>> {
        self.pool.get().await
    }

    /// Run independent statements in order inside one transaction.
    ///
    /// Statements starting with `SELECT` are run as queries, the others as
    /// executes. The first failing statement stops the batch and rolls back
    /// everything it did. An empty batch commits and returns no result.
    pub async fn run_batch<I>(&self, statements: I) -> Result<Vec<StatementResult>>
    where
        I: IntoIterator,
        I::Item: Into<Statement>,
    {
        let statements = statements.into_iter().map(Into::into).collect::<Vec<_>>();
        self.run_interactive(move |tx| {
            Box::pin(async move {
                let mut results = Vec::with_capacity(statements.len());
                for (i, statement) in statements.into_iter().enumerate() {
                    let result = if statement.is_query() {
                        tx.query(statement).await.map(StatementResult::Rows)
                    } else {
                        tx.execute(statement).await.map(StatementResult::Affected)
                    };
                    results.push(
                        result.with_context(|| {
                            format!("While running statement {} of the batch", i + 1)
                        })?,
                    );
                }
                Ok(results)
            })
        })
        .await
    }

    /// Invoke `callback` exactly once with a fresh transaction context.
    ///
    /// The transaction is committed when the callback returns `Ok`, and its value
    /// is returned only after the commit succeeded. It is rolled back when the
    /// callback returns `Err`, and that same error is returned. A callback may
    /// commit the context itself, the coordinator then leaves it alone.
    ///
    /// Calling this (or [`Coordinator::run_batch`]) from inside a callback of the
    /// same coordinator fails with [`TransactionError::NestedUnitOfWork`].
    ///
    /// ```ignore
    /// let post_id = coordinator
    ///     .run_interactive(|tx| {
    ///         Box::pin(async move {
    ///             let author = tx
    ///                 .execute(Statement::new("INSERT INTO users (email) VALUES (?)").bind("a@x.com"))
    ///                 .await?;
    ///             let post = tx
    ///                 .execute(
    ///                     Statement::new("INSERT INTO posts (title, author_id) VALUES (?, ?)")
    ///                         .bind("Hello")
    ///                         .bind(author.last_affected_id),
    ///                 )
    ///                 .await?;
    ///             Ok(post.last_affected_id)
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn run_interactive<R, F>(&self, callback: F) -> Result<R>
    where
        R: Send,
        F: for<'t, 'c> FnOnce(
                &'t mut TransactionContext<D::Transaction<'c>>,
            ) -> BoxFuture<'t, Result<R>>
            + Send,
    {
        let mut in_flight = IN_FLIGHT.try_with(Clone::clone).unwrap_or_default();
        if in_flight.contains(&self.id) {
            let error = Error::new(TransactionError::NestedUnitOfWork);
            log::error!("{:#}", error);
            return Err(error);
        }
        in_flight.push(self.id);
        IN_FLIGHT.scope(in_flight, self.unit_of_work(callback)).await
    }

    async fn unit_of_work<R, F>(&self, callback: F) -> Result<R>
    where
        R: Send,
        F: for<'t, 'c> FnOnce(
                &'t mut TransactionContext<D::Transaction<'c>>,
            ) -> BoxFuture<'t, Result<R>>
            + Send,
    {
        let mut connection = self
            .pool
            .get()
            .await
            .map_err(TransactionError::begin)?;
        // Not returned to the pool if this future is dropped midway
        connection.set_reusable(false);
        let (result, healthy) =
            Self::transact(&mut *connection, self.config.timeout, callback).await;
        connection.set_reusable(healthy);
        result
    }

    /// Run the unit of work on `connection`, returning its outcome and whether the
    /// connection is left in a known state.
    async fn transact<R, F>(
        connection: &mut D::Connection,
        timeout: Option<Duration>,
        callback: F,
    ) -> (Result<R>, bool)
    where
        F: for<'t, 'c> FnOnce(
            &'t mut TransactionContext<D::Transaction<'c>>,
        ) -> BoxFuture<'t, Result<R>>,
    {
        let transaction = match connection.begin().await {
            Ok(transaction) => transaction,
            Err(error) => {
                let error = TransactionError::begin(error);
                log::error!("{:#}", error);
                return (Err(error), false);
            }
        };
        let mut context = TransactionContext::new(transaction);
        let result = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, callback(&mut context))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::new(TransactionError::Cancelled).context(format!(
                        "The unit of work did not complete within {timeout:?}"
                    )))
                }),
            None => callback(&mut context).await,
        };
        match result {
            Ok(value) => match context.state() {
                ContextState::Open => match context.commit().await {
                    Ok(()) => (Ok(value), true),
                    Err(error) => {
                        log::error!("{:#}", error);
                        (Err(error), true)
                    }
                },
                ContextState::Committed => (Ok(value), true),
                ContextState::RolledBack => {
                    let error = Error::new(TransactionError::ContextClosed)
                        .context("The unit of work returned successfully after rolling back");
                    log::error!("{:#}", error);
                    (Err(error), true)
                }
            },
            Err(error) => {
                if !context.is_open() {
                    return (Err(error), true);
                }
                match context.rollback().await {
                    Ok(()) => {
                        log::debug!("Unit of work rolled back: {error:#}");
                        (Err(error), true)
                    }
                    Err(rollback) => {
                        log::error!(
                            "{:#}",
                            rollback.context(format!("While rolling back after: {error:#}"))
                        );
                        (Err(error), false)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Recorder, RecordingDriver};
    use std::sync::atomic::AtomicUsize;

    async fn coordinator(config: CoordinatorConfig) -> (Coordinator<RecordingDriver>, Recorder) {
        let coordinator = Coordinator::connect(RecordingDriver, config.with_max_connections(1))
            .await
            .unwrap();
        let recorder = coordinator.acquire().await.unwrap().0.clone();
        (coordinator, recorder)
    }

    fn kind(error: &Error) -> &TransactionError {
        TransactionError::of(error).expect("Missing transaction error")
    }

    #[tokio::test]
    async fn empty_batch_commits() {
        let (coordinator, recorder) = coordinator(CoordinatorConfig::new("recording://")).await;
        let results = coordinator.run_batch(Vec::<Statement>::new()).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(recorder.calls(), ["BEGIN", "COMMIT"]);
    }

    #[tokio::test]
    async fn batch_results_in_order() {
        let (coordinator, recorder) = coordinator(CoordinatorConfig::new("recording://")).await;
        let results = coordinator
            .run_batch(["INSERT 1", "SELECT 2", "UPDATE 3"])
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].rows_affected().unwrap().rows_affected, Some(1));
        let rows = results[1].rows().unwrap();
        assert_eq!(rows[0].get::<String>("sql").unwrap(), "SELECT 2");
        assert!(results[2].rows_affected().is_some());
        assert_eq!(
            recorder.calls(),
            ["BEGIN", "INSERT 1", "SELECT 2", "UPDATE 3", "COMMIT"]
        );
    }

    #[tokio::test]
    async fn batch_stops_at_first_failure() {
        let (coordinator, recorder) = coordinator(CoordinatorConfig::new("recording://")).await;
        let error = coordinator
            .run_batch(["INSERT 1", "INSERT FAIL", "INSERT 3"])
            .await
            .unwrap_err();
        assert!(matches!(kind(&error), TransactionError::Statement { .. }));
        assert!(format!("{error:#}").starts_with("While running statement 2 of the batch"));
        assert_eq!(
            recorder.calls(),
            ["BEGIN", "INSERT 1", "INSERT FAIL", "ROLLBACK"]
        );
    }

    #[tokio::test]
    async fn callback_runs_once() {
        let (coordinator, recorder) = coordinator(CoordinatorConfig::new("recording://")).await;
        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = invocations.clone();
        let value = coordinator
            .run_interactive(move |tx| {
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                    let affected = tx.execute("INSERT 1").await?;
                    Ok(affected.rows_affected.unwrap_or_default() + 41)
                })
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(invocations.load(Ordering::Relaxed), 1);
        assert_eq!(recorder.calls(), ["BEGIN", "INSERT 1", "COMMIT"]);
    }

    #[tokio::test]
    async fn callback_failure_rolls_back() {
        let (coordinator, recorder) = coordinator(CoordinatorConfig::new("recording://")).await;
        let error = coordinator
            .run_interactive(|tx| {
                Box::pin(async move {
                    tx.execute("INSERT 1").await?;
                    tx.execute("INSERT 2").await?;
                    Err::<(), _>(Error::msg("Author is not allowed to publish"))
                })
            })
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "Author is not allowed to publish");
        assert_eq!(
            recorder.calls(),
            ["BEGIN", "INSERT 1", "INSERT 2", "ROLLBACK"]
        );
    }

    #[tokio::test]
    async fn no_op_callback_commits() {
        let (coordinator, recorder) = coordinator(CoordinatorConfig::new("recording://")).await;
        coordinator
            .run_interactive(|_| Box::pin(async { Ok(()) }))
            .await
            .unwrap();
        assert_eq!(recorder.calls(), ["BEGIN", "COMMIT"]);
    }

    #[tokio::test]
    async fn nested_unit_of_work_fails_fast() {
        let (coordinator, recorder) = coordinator(CoordinatorConfig::new("recording://")).await;
        let nested = coordinator.clone();
        let error = coordinator
            .run_interactive(move |tx| {
                Box::pin(async move {
                    tx.execute("INSERT 1").await?;
                    nested.run_batch(["INSERT 2"]).await?;
                    Ok(())
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(kind(&error), TransactionError::NestedUnitOfWork));
        assert_eq!(recorder.calls(), ["BEGIN", "INSERT 1", "ROLLBACK"]);

        // Sequential units of work are not nested
        coordinator.run_batch(["INSERT 3"]).await.unwrap();
        coordinator.run_batch(["INSERT 4"]).await.unwrap();
    }

    #[tokio::test]
    async fn timeout_rolls_back() {
        let (coordinator, recorder) = coordinator(
            CoordinatorConfig::new("recording://").with_timeout(Duration::from_millis(50)),
        )
        .await;
        let error = coordinator
            .run_batch(["INSERT 1", "UPDATE SLEEP"])
            .await
            .unwrap_err();
        assert!(matches!(kind(&error), TransactionError::Cancelled));
        assert_eq!(
            recorder.calls(),
            ["BEGIN", "INSERT 1", "UPDATE SLEEP", "ROLLBACK"]
        );
        assert_eq!(coordinator.pool().idle(), 1);
    }

    #[tokio::test]
    async fn commit_failure_is_reported() {
        let (coordinator, recorder) = coordinator(CoordinatorConfig::new("recording://")).await;
        recorder.fail_commit();
        let error = coordinator.run_batch(["UPDATE 1"]).await.unwrap_err();
        let found = kind(&error);
        assert!(matches!(found, TransactionError::Commit { .. }));
        assert_eq!(found.cause(), Some(crate::Cause::Conflict));
        assert!(found.is_retryable());
    }

    #[tokio::test]
    async fn callback_closing_the_context() {
        let (coordinator, recorder) = coordinator(CoordinatorConfig::new("recording://")).await;
        coordinator
            .run_interactive(|tx| {
                Box::pin(async move {
                    tx.execute("INSERT 1").await?;
                    tx.commit().await
                })
            })
            .await
            .unwrap();
        assert_eq!(recorder.calls(), ["BEGIN", "INSERT 1", "COMMIT"]);

        let error = coordinator
            .run_interactive(|tx| Box::pin(async move { tx.rollback().await }))
            .await
            .unwrap_err();
        assert!(matches!(kind(&error), TransactionError::ContextClosed));
    }

    #[tokio::test]
    async fn cancelled_invocation_discards_the_connection() {
        let (coordinator, recorder) = coordinator(CoordinatorConfig::new("recording://")).await;
        let invocation = coordinator.run_batch(["UPDATE SLEEP"]);
        let result = tokio::time::timeout(Duration::from_millis(50), invocation).await;
        assert!(result.is_err());
        assert_eq!(coordinator.pool().idle(), 0);
        assert_eq!(recorder.calls(), ["BEGIN", "UPDATE SLEEP"]);
        // A new connection is opened for the next unit of work
        coordinator.run_batch(["INSERT 1"]).await.unwrap();
        assert_eq!(coordinator.pool().idle(), 1);
    }

    #[tokio::test]
    async fn closed_coordinator_rejects_units_of_work() {
        let (coordinator, recorder) = coordinator(CoordinatorConfig::new("recording://")).await;
        coordinator.run_batch(["INSERT 1"]).await.unwrap();
        coordinator.clone().close().await.unwrap();
        assert_eq!(recorder.calls(), ["BEGIN", "INSERT 1", "COMMIT", "DISCONNECT"]);
        assert!(coordinator.run_batch(["INSERT 2"]).await.is_err());
        assert_eq!(recorder.calls().len(), 4);
    }
}
