//! Ledger: atomic units of work over pluggable storage backends.
//!
//! A [`Coordinator`] runs either a batch of independent statements or an
//! interactive callback inside one backend transaction: everything commits or
//! nothing does. Backends are plugged in through the [`Driver`] family of traits,
//! see the `ledger-memory` and `ledger-sqlite` crates.
pub use ledger_core::*;
