//! SQLite backend for `ledger`.
//!
//! Statements run on blocking threads and stream their results back through a
//! channel. Transactions take the write lock when they begin (`BEGIN IMMEDIATE`),
//! so concurrent units of work on the same database wait for each other instead
//! of failing at commit.
mod cbox;
mod connection;
mod driver;
mod extract;
mod transaction;

pub(crate) use cbox::*;
pub use connection::*;
pub use driver::*;
pub use transaction::*;
