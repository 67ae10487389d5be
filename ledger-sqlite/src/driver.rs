use crate::{SQLiteConnection, SQLiteTransaction};
use ledger_core::Driver;

/// Driver for SQLite databases: `sqlite:///path/to/file.db` or `sqlite://:memory:`.
#[derive(Default, Clone, Copy, Debug)]
pub struct SQLiteDriver;

impl SQLiteDriver {
    pub const fn new() -> Self {
        Self
    }
}

impl Driver for SQLiteDriver {
    type Connection = SQLiteConnection;
    type Transaction<'c> = SQLiteTransaction<'c>;

    const NAME: &'static [&'static str] = &["sqlite"];
}
