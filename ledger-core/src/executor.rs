use crate::{
    Driver, QueryResult, Result, RowLabeled, RowsAffected, Statement,
    stream::{Stream, StreamExt, TryStreamExt},
};
use std::future::Future;

/// Async statement executor bound to a concrete `Driver`.
///
/// Responsibilities:
/// - Send statements to the backend in the order they are issued
/// - Stream results without buffering (when possible)
/// - Provide helpers for fetching rows and counting affected rows
///
/// Implementors typically wrap a connection or a live transaction.
pub trait Executor: Send + Sized {
    /// Associated driver type.
    type Driver: Driver;

    /// Returns a driver instance.
    ///
    /// Override if the executor carries specific driver state.
    fn driver(&self) -> Self::Driver {
        Default::default()
    }

    /// Execute a statement, streaming `QueryResult` (rows or affected counts).
    fn run<'s>(
        &'s mut self,
        statement: Statement,
    ) -> impl Stream<Item = Result<QueryResult>> + Send;

    /// Execute a statement yielding `RowLabeled` from the resulting stream (filtering out `RowsAffected`).
    fn fetch<'s>(
        &'s mut self,
        statement: impl Into<Statement>,
    ) -> impl Stream<Item = Result<RowLabeled>> + Send {
        self.run(statement.into()).filter_map(|v| async move {
            match v {
                Ok(QueryResult::Row(v)) => Some(Ok(v)),
                Err(e) => Some(Err(e)),
                _ => None,
            }
        })
    }

    /// Execute a read statement collecting every row in order.
    fn query<'s>(
        &'s mut self,
        statement: impl Into<Statement>,
    ) -> impl Future<Output = Result<Vec<RowLabeled>>> + Send {
        self.fetch(statement).try_collect()
    }

    /// Execute and aggregate affected rows counter.
    fn execute<'s>(
        &'s mut self,
        statement: impl Into<Statement>,
    ) -> impl Future<Output = Result<RowsAffected>> + Send {
        self.run(statement.into())
            .filter_map(|v| async move {
                match v {
                    Ok(QueryResult::Affected(v)) => Some(Ok(v)),
                    Err(e) => Some(Err(e)),
                    _ => None,
                }
            })
            .try_collect()
    }
}
