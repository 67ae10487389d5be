use crate::{MemoryConnection, MemoryTransaction};
use ledger_core::Driver;

/// Driver for named in-memory stores: `memory://localhost/<name>`.
///
/// Connections to the same name share the store for as long as one of them is
/// alive. `memory://:memory:` opens a private store per connection.
#[derive(Default, Clone, Copy, Debug)]
pub struct MemoryDriver;

impl MemoryDriver {
    pub const fn new() -> Self {
        Self
    }
}

impl Driver for MemoryDriver {
    type Connection = MemoryConnection;
    type Transaction<'c> = MemoryTransaction<'c>;

    const NAME: &'static [&'static str] = &["memory"];
}
