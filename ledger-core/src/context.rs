use crate::{
    Error, Result, RowLabeled, RowsAffected, Statement, Transaction, TransactionError,
    future::{BoxFuture, FutureExt},
    stream::{Stream, StreamExt},
};
use async_stream::try_stream;
use std::fmt::{self, Display};

/// Lifecycle of a [`TransactionContext`]. Both terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    Open,
    Committed,
    RolledBack,
}

impl Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContextState::Open => "open",
            ContextState::Committed => "committed",
            ContextState::RolledBack => "rolled back",
        })
    }
}

/// Execute and query surface scoped to one live backend transaction.
///
/// The context owns the transaction exclusively: every method takes `&mut self`
/// so operations are issued one at a time, in the order they are called.
/// Once committed or rolled back the context rejects any further operation.
///
/// Dropping an open context drops the backend transaction, which discards its effects.
#[derive(Debug)]
pub struct TransactionContext<T> {
    transaction: Option<T>,
    state: ContextState,
    operations: usize,
}

impl<T> TransactionContext<T> {
    pub fn state(&self) -> ContextState {
        self.state
    }
    pub fn is_open(&self) -> bool {
        self.state == ContextState::Open
    }
    /// Number of statements issued through this context.
    pub fn operations(&self) -> usize {
        self.operations
    }
}

impl<'c, T: Transaction<'c>> TransactionContext<T> {
    pub fn new(transaction: T) -> Self {
        Self {
            transaction: Some(transaction),
            state: ContextState::Open,
            operations: 0,
        }
    }

    /// Send a mutating statement, returning the affected rows.
    pub fn execute<'s>(
        &'s mut self,
        statement: impl Into<Statement>,
    ) -> BoxFuture<'s, Result<RowsAffected>> {
        let statement = statement.into();
        async move {
            let Some(transaction) = self.transaction.as_mut() else {
                return Err(Error::new(TransactionError::ContextClosed));
            };
            self.operations += 1;
            log::trace!("Executing {statement}");
            transaction
                .execute(statement)
                .await
                .map_err(TransactionError::statement)
        }
        .boxed()
    }

    /// Send a read statement, returning every row in order.
    pub fn query<'s>(
        &'s mut self,
        statement: impl Into<Statement>,
    ) -> BoxFuture<'s, Result<Vec<RowLabeled>>> {
        let statement = statement.into();
        async move {
            let Some(transaction) = self.transaction.as_mut() else {
                return Err(Error::new(TransactionError::ContextClosed));
            };
            self.operations += 1;
            log::trace!("Querying {statement}");
            transaction
                .query(statement)
                .await
                .map_err(TransactionError::statement)
        }
        .boxed()
    }

    /// Streaming version of [`TransactionContext::query`].
    pub fn fetch<'s>(
        &'s mut self,
        statement: impl Into<Statement>,
    ) -> impl Stream<Item = Result<RowLabeled>> + Send + 's {
        let statement = statement.into();
        try_stream! {
            let transaction = self
                .transaction
                .as_mut()
                .ok_or_else(|| Error::new(TransactionError::ContextClosed))?;
            self.operations += 1;
            let mut stream = transaction.fetch(statement).boxed();
            while let Some(row) = stream.next().await {
                yield row.map_err(TransactionError::statement)?;
            }
        }
    }

    /// Take the transaction out, closing the context as rolled back.
    ///
    /// The state is updated before the backend is awaited so a context whose
    /// commit future is dropped midway never reports itself open.
    fn take(&mut self) -> Result<T> {
        match self.transaction.take() {
            Some(transaction) => {
                self.state = ContextState::RolledBack;
                Ok(transaction)
            }
            None => Err(Error::new(TransactionError::AlreadyClosed(self.state))),
        }
    }

    /// Finalize every effect of the context.
    ///
    /// Terminal in all cases: `Committed` on success, `RolledBack` if the
    /// backend could not apply the effects.
    pub fn commit(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            let transaction = self.take()?;
            transaction
                .commit()
                .await
                .map_err(TransactionError::commit)?;
            self.state = ContextState::Committed;
            log::debug!("Committed after {} operations", self.operations);
            Ok(())
        }
        .boxed()
    }

    /// Discard every effect of the context.
    pub fn rollback(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            let transaction = self.take()?;
            transaction
                .rollback()
                .await
                .map_err(TransactionError::rollback)?;
            log::debug!("Rolled back after {} operations", self.operations);
            Ok(())
        }
        .boxed()
    }
}

impl<T> Drop for TransactionContext<T> {
    fn drop(&mut self) {
        if self.transaction.is_some() {
            log::warn!(
                "Transaction context dropped while open after {} operations, its effects are discarded",
                self.operations
            );
        }
    }
}
