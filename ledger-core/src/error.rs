use crate::{ContextState, Error};
use std::fmt::{self, Display};
use thiserror::Error;

/// Why a backend rejected an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cause {
    /// Uniqueness, NOT NULL or foreign key violation.
    Constraint,
    /// Malformed statement, or one referring to unknown tables or columns.
    Syntax,
    /// Value does not fit the declared column type.
    Type,
    /// Concurrent transaction interfered (serialization failure, lock contention).
    Conflict,
    /// The backend could not be reached or its storage failed.
    Connection,
    Other,
}

impl Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cause::Constraint => "constraint",
            Cause::Syntax => "syntax",
            Cause::Type => "type",
            Cause::Conflict => "conflict",
            Cause::Connection => "connection",
            Cause::Other => "other",
        })
    }
}

/// Error raised by drivers, classified so the core can tell conflicts from connectivity failures.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BackendError {
    pub cause: Cause,
    pub message: String,
}

impl BackendError {
    pub fn new(cause: Cause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
        }
    }
    /// Cause of a driver error, `Cause::Other` when the driver did not classify it.
    pub fn cause_of(error: &Error) -> Cause {
        error
            .downcast_ref::<BackendError>()
            .map(|e| e.cause)
            .unwrap_or(Cause::Other)
    }
}

/// Failure kinds of a transaction context or coordinator.
///
/// Attached to the `anyhow` error returned to the caller, retrieve it with [`TransactionError::of`].
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The backend rejected a statement, the unit of work is rolled back.
    #[error("Statement rejected ({cause})")]
    Statement { cause: Cause, message: String },
    /// The backend could not finalize the transaction, none of its effects are applied.
    #[error("Commit failed ({cause})")]
    Commit { cause: Cause, message: String },
    /// The backend could not open a transaction.
    #[error("Could not begin a transaction ({cause})")]
    Begin { cause: Cause, message: String },
    #[error("Rollback failed ({cause})")]
    Rollback { cause: Cause, message: String },
    /// Operation attempted on a context that was already committed or rolled back.
    #[error("The transaction context is closed")]
    ContextClosed,
    /// Redundant commit or rollback.
    #[error("The transaction context is already {0}")]
    AlreadyClosed(ContextState),
    /// A unit of work was started from inside another one of the same coordinator.
    #[error("A unit of work is already in flight on this coordinator")]
    NestedUnitOfWork,
    /// The unit of work timed out or was abandoned, its effects were rolled back.
    #[error("The unit of work was cancelled")]
    Cancelled,
}

impl TransactionError {
    /// Find the transaction error attached to `error`, looking through any context layer.
    pub fn of(error: &Error) -> Option<&TransactionError> {
        error.downcast_ref::<TransactionError>()
    }

    pub(crate) fn statement(error: Error) -> Error {
        let (cause, message) = Self::describe(&error);
        error.context(TransactionError::Statement { cause, message })
    }

    pub(crate) fn commit(error: Error) -> Error {
        let (cause, message) = Self::describe(&error);
        error.context(TransactionError::Commit { cause, message })
    }

    pub(crate) fn begin(error: Error) -> Error {
        let (cause, message) = Self::describe(&error);
        error.context(TransactionError::Begin { cause, message })
    }

    pub(crate) fn rollback(error: Error) -> Error {
        let (cause, message) = Self::describe(&error);
        error.context(TransactionError::Rollback { cause, message })
    }

    fn describe(error: &Error) -> (Cause, String) {
        (BackendError::cause_of(error), error.root_cause().to_string())
    }

    /// Backend classification, when the failure came from the backend.
    pub fn cause(&self) -> Option<Cause> {
        match self {
            Self::Statement { cause, .. }
            | Self::Commit { cause, .. }
            | Self::Begin { cause, .. }
            | Self::Rollback { cause, .. } => Some(*cause),
            _ => None,
        }
    }

    /// Underlying backend message, when the failure came from the backend.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Statement { message, .. }
            | Self::Commit { message, .. }
            | Self::Begin { message, .. }
            | Self::Rollback { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Returns `true` if running the whole unit of work again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Statement { cause, .. } | Self::Commit { cause, .. } | Self::Begin { cause, .. }
                if matches!(cause, Cause::Conflict | Cause::Connection)
        )
    }
}
