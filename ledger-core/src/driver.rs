use crate::{Connection, Result, Transaction};
use std::{borrow::Cow, fmt::Debug, future::Future};

/// Backend connector.
pub trait Driver: Default + Debug + Clone + Send + Sync + 'static {
    /// Concrete connection.
    type Connection: Connection<Driver = Self>;
    /// Transaction type, borrowing the connection it was opened on.
    type Transaction<'c>: Transaction<'c>;

    /// URL schemes accepted by this backend.
    const NAME: &'static [&'static str];

    /// Driver name (used in URLs).
    fn name(&self) -> &'static str {
        Self::NAME[0]
    }

    /// Connect to the backend at `url`.
    ///
    /// The returned future must be awaited to obtain the connection object.
    fn connect(
        &self,
        url: Cow<'static, str>,
    ) -> impl Future<Output = Result<Self::Connection>> + Send {
        Self::Connection::connect(url)
    }
}
