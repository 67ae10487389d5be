use crate::{Executor, Result};

/// Transactional `Executor` with `commit` and `rollback`.
///
/// Dropping a transaction without finalizing it must discard its effects. A
/// failed `commit` must leave none of the effects applied.
pub trait Transaction<'c>: Executor {
    /// Commit the outstanding changes.
    fn commit(self) -> impl Future<Output = Result<()>> + Send;
    /// Rollback any uncommitted changes.
    fn rollback(self) -> impl Future<Output = Result<()>> + Send;
}
