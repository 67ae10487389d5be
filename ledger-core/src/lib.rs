mod as_value;
mod config;
mod connection;
mod context;
mod coordinator;
mod driver;
mod error;
mod executor;
mod pool;
mod retry;
mod row;
mod statement;
#[cfg(test)]
mod testing;
mod transaction;
mod util;
mod value;

pub use ::anyhow::Context as ErrorContext;
pub use as_value::*;
pub use config::*;
pub use connection::*;
pub use context::*;
pub use coordinator::*;
pub use driver::*;
pub use error::*;
pub use executor::*;
pub use pool::*;
pub use retry::*;
pub use row::*;
pub use statement::*;
pub use transaction::*;
pub use util::*;
pub use value::*;
pub mod stream {
    pub use ::futures::stream::*;
}
pub use ::futures::future;

/// Result type.
pub type Result<T> = anyhow::Result<T>;
/// Error type.
pub type Error = anyhow::Error;

pub use ::indoc;
