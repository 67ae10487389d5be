mod blog;
mod concurrency;
mod context;
mod products;

pub use blog::*;
pub use concurrency::*;
pub use context::*;
use ledger::{Coordinator, Driver, TransactionError};
use log::LevelFilter;
pub use products::*;
use std::env;

pub fn init_logs() {
    let mut logger = env_logger::builder();
    logger
        .is_test(true)
        .format_file(true)
        .format_line_number(true);
    if env::var("RUST_LOG").is_err() {
        logger.filter_level(LevelFilter::Warn);
    }
    let _ = logger.try_init();
}

pub async fn execute_tests<D: Driver>(coordinator: Coordinator<D>) {
    macro_rules! do_test {
        ($test_function:ident) => {
            Box::pin($test_function(&coordinator)).await
        };
    }
    do_test!(blog);
    do_test!(blog_failures);
    #[cfg(not(feature = "disable-multiple-statements"))]
    do_test!(multiple_statements);
    do_test!(upsert);
    do_test!(aggregates);
    #[cfg(not(feature = "disable-json"))]
    do_test!(products);
    do_test!(context_lifecycle);
    do_test!(isolation);
    do_test!(nested_unit_of_work);
    do_test!(timeout);
    do_test!(statement_timeout);
    #[cfg(not(feature = "disable-commit-conflicts"))]
    do_test!(commit_conflicts);
    #[cfg(not(feature = "disable-commit-conflicts"))]
    do_test!(retried_conflicts);
}

#[macro_export]
macro_rules! silent_logs {
    ($($code:tt)+) => {{
        let level = log::max_level();
        log::set_max_level(log::LevelFilter::Off);
        let result = { $($code)+ };
        log::set_max_level(level);
        result
    }};
}

/// Transaction error kind of a failed unit of work.
pub fn kind(error: &ledger::Error) -> &TransactionError {
    TransactionError::of(error)
        .unwrap_or_else(|| panic!("Expected a transaction error, got: {error:#}"))
}
