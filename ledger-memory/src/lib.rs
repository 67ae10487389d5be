//! In-memory backend for `ledger`.
//!
//! Every transaction works on a snapshot of the committed state taken at
//! `begin`. Commits are checked against what other transactions committed in
//! the meantime: writing a row or a table that changed since the snapshot fails
//! with a conflict, and constraints are validated again on the merged state.
mod connection;
mod driver;
mod eval;
mod lexer;
mod parser;
mod session;
mod store;
mod transaction;

pub use connection::*;
pub use driver::*;
pub use transaction::*;
