use crate::{kind, silent_logs};
use ledger::{
    Cause, Coordinator, Driver, Executor, RetryPolicy, Statement, TransactionError, retry,
};
use std::{
    sync::{
        Arc, LazyLock,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};
use tokio::sync::{Barrier, Mutex, Notify};
use uuid::Uuid;

static MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Read statement taking well over a second to complete.
#[cfg(not(feature = "disable-recursive-queries"))]
const SLOW_QUERY: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 100000000) SELECT COUNT(*) AS total FROM c";
#[cfg(feature = "disable-recursive-queries")]
const SLOW_QUERY: &str = "SELECT COUNT(*) AS total FROM accounts WHERE owner LIKE '%never%'";

async fn reset_accounts<D: Driver>(coordinator: &Coordinator<D>) {
    coordinator
        .run_batch([
            "DROP TABLE IF EXISTS accounts",
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT NOT NULL UNIQUE, balance INTEGER NOT NULL)",
            "INSERT INTO accounts (id, owner, balance) VALUES (1, 'treasury', 0)",
        ])
        .await
        .expect("Failed to create the accounts table");
}

async fn balance<D: Driver>(coordinator: &Coordinator<D>) -> i64 {
    let mut connection = coordinator.acquire().await.unwrap();
    let rows = connection
        .query("SELECT balance FROM accounts WHERE id = 1")
        .await
        .expect("Could not read the balance");
    rows[0].get("balance").unwrap()
}

async fn owners<D: Driver>(coordinator: &Coordinator<D>, owner: &str) -> usize {
    let mut connection = coordinator.acquire().await.unwrap();
    connection
        .query(Statement::new("SELECT id FROM accounts WHERE owner = ?").bind(owner.to_string()))
        .await
        .expect("Could not select the accounts")
        .len()
}

/// Uncommitted writes are invisible outside of their unit of work.
pub async fn isolation<D: Driver>(coordinator: &Coordinator<D>) {
    let _lock = MUTEX.lock().await;
    reset_accounts(coordinator).await;
    let owner = format!("{}@example.com", Uuid::new_v4());
    let observer = coordinator.clone();
    let inserted = owner.clone();
    coordinator
        .run_interactive(move |tx| {
            Box::pin(async move {
                tx.execute(
                    Statement::new("INSERT INTO accounts (owner, balance) VALUES (?, 100)")
                        .bind(inserted.clone()),
                )
                .await?;
                let own = tx
                    .query(
                        Statement::new("SELECT balance FROM accounts WHERE owner = ?")
                            .bind(inserted.clone()),
                    )
                    .await?;
                assert_eq!(own.len(), 1);
                let mut connection = observer.acquire().await?;
                let other = connection
                    .query(
                        Statement::new("SELECT balance FROM accounts WHERE owner = ?")
                            .bind(inserted),
                    )
                    .await?;
                assert!(other.is_empty(), "An uncommitted write is visible");
                Ok(())
            })
        })
        .await
        .expect("The isolation unit of work failed");
    assert_eq!(owners(coordinator, &owner).await, 1);
}

/// Units of work do not nest on the same coordinator.
pub async fn nested_unit_of_work<D: Driver>(coordinator: &Coordinator<D>) {
    let _lock = MUTEX.lock().await;
    reset_accounts(coordinator).await;
    let inner = coordinator.clone();
    let error = silent_logs! {
        coordinator
            .run_interactive(move |tx| {
                Box::pin(async move {
                    tx.execute("INSERT INTO accounts (owner, balance) VALUES ('outer', 1)")
                        .await?;
                    inner
                        .run_batch(["INSERT INTO accounts (owner, balance) VALUES ('inner', 1)"])
                        .await?;
                    Ok(())
                })
            })
            .await
            .expect_err("The nested unit of work was accepted")
    };
    assert!(matches!(kind(&error), TransactionError::NestedUnitOfWork));
    assert_eq!(owners(coordinator, "outer").await, 0);
    assert_eq!(owners(coordinator, "inner").await, 0);

    // Sequential units of work are not nested
    coordinator
        .run_batch(["INSERT INTO accounts (owner, balance) VALUES ('after', 1)"])
        .await
        .expect("A sequential unit of work was rejected");
    assert_eq!(owners(coordinator, "after").await, 1);
}

/// A unit of work exceeding the deadline is rolled back and reported as cancelled.
pub async fn timeout<D: Driver>(coordinator: &Coordinator<D>) {
    let _lock = MUTEX.lock().await;
    reset_accounts(coordinator).await;
    let bounded = Coordinator::connect(
        coordinator.driver().clone(),
        coordinator
            .config()
            .clone()
            .with_timeout(Duration::from_millis(200)),
    )
    .await
    .expect("Could not create the coordinator with a timeout");
    let error = silent_logs! {
        bounded
            .run_interactive(|tx| {
                Box::pin(async move {
                    tx.execute("INSERT INTO accounts (owner, balance) VALUES ('slow', 1)")
                        .await?;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
            })
            .await
            .expect_err("The slow unit of work was not cancelled")
    };
    assert!(matches!(kind(&error), TransactionError::Cancelled));
    assert_eq!(owners(coordinator, "slow").await, 0);

    // The connection was rolled back and can be used again
    bounded
        .run_batch(["INSERT INTO accounts (owner, balance) VALUES ('fast', 1)"])
        .await
        .expect("The coordinator is not usable after a timeout");
    assert_eq!(owners(coordinator, "fast").await, 1);
}

/// A unit of work cancelled while a multi statement text is still running leaves no trace.
pub async fn statement_timeout<D: Driver>(coordinator: &Coordinator<D>) {
    let _lock = MUTEX.lock().await;
    reset_accounts(coordinator).await;
    let bounded = Coordinator::connect(
        coordinator.driver().clone(),
        coordinator
            .config()
            .clone()
            .with_timeout(Duration::from_millis(100)),
    )
    .await
    .expect("Could not create the coordinator with a timeout");
    let sql = (0..40)
        .map(|i| format!("INSERT INTO accounts (owner, balance) VALUES ('leak-{i}', 1); {SLOW_QUERY};"))
        .collect::<String>();
    let error = silent_logs! {
        bounded
            .run_interactive(move |tx| {
                Box::pin(async move {
                    tx.execute(sql).await?;
                    // Never completes, the deadline always expires
                    std::future::pending::<()>().await;
                    Ok(())
                })
            })
            .await
            .expect_err("The slow unit of work was not cancelled")
    };
    assert!(matches!(kind(&error), TransactionError::Cancelled));

    let leaked = async || {
        let mut connection = coordinator
            .driver()
            .connect(coordinator.config().url.clone())
            .await
            .expect("Could not open a new connection");
        connection
            .query("SELECT id FROM accounts WHERE owner LIKE 'leak-%'")
            .await
            .expect("Could not select the accounts")
            .len()
    };
    assert_eq!(leaked().await, 0);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(leaked().await, 0, "Statements ran after the rollback");

    bounded
        .run_batch(["INSERT INTO accounts (owner, balance) VALUES ('fast', 1)"])
        .await
        .expect("The coordinator is not usable after a timeout");
    assert_eq!(owners(coordinator, "fast").await, 1);
}

async fn increment<D: Driver>(
    coordinator: &Coordinator<D>,
    barrier: Arc<Barrier>,
    proceed: Option<Arc<Notify>>,
) -> ledger::Result<i64> {
    coordinator
        .run_interactive(move |tx| {
            Box::pin(async move {
                let rows = tx.query("SELECT balance FROM accounts WHERE id = 1").await?;
                let balance: i64 = rows[0].get("balance")?;
                barrier.wait().await;
                if let Some(proceed) = proceed {
                    proceed.notified().await;
                }
                tx.execute(
                    Statement::new("UPDATE accounts SET balance = ? WHERE id = 1").bind(balance + 1),
                )
                .await?;
                Ok(balance + 1)
            })
        })
        .await
}

/// Two units of work writing the same row: the second to commit fails.
pub async fn commit_conflicts<D: Driver>(coordinator: &Coordinator<D>) {
    let _lock = MUTEX.lock().await;
    reset_accounts(coordinator).await;
    let barrier = Arc::new(Barrier::new(2));
    let (first, second) = silent_logs! {
        tokio::join!(
            increment(coordinator, barrier.clone(), None),
            increment(coordinator, barrier.clone(), None),
        )
    };
    let (committed, failed) = match (first, second) {
        (Ok(v), Err(e)) | (Err(e), Ok(v)) => (v, e),
        (first, second) => panic!("Expected exactly one conflict, got {first:?} and {second:?}"),
    };
    assert_eq!(committed, 1);
    let found = kind(&failed);
    assert!(matches!(found, TransactionError::Commit { .. }));
    assert_eq!(found.cause(), Some(Cause::Conflict));
    assert!(found.is_retryable());
    assert_eq!(balance(coordinator).await, 1);
}

/// The retry layer runs a conflicting unit of work again from scratch.
pub async fn retried_conflicts<D: Driver>(coordinator: &Coordinator<D>) {
    let _lock = MUTEX.lock().await;
    reset_accounts(coordinator).await;
    let barrier = Arc::new(Barrier::new(2));
    let proceed = Arc::new(Notify::new());
    let attempts = AtomicU32::new(0);
    let policy = RetryPolicy::new(3, Duration::from_millis(5));
    let retried = retry(&policy, || {
        // Only the first attempt waits for the competing unit of work
        let first = attempts.fetch_add(1, Ordering::Relaxed) == 0;
        let (barrier, proceed) = if first {
            (barrier.clone(), Some(proceed.clone()))
        } else {
            (Arc::new(Barrier::new(1)), None)
        };
        increment(coordinator, barrier, proceed)
    });
    let competing = async {
        let result = increment(coordinator, barrier.clone(), None).await;
        proceed.notify_one();
        result
    };
    let (retried, competing) = silent_logs! { tokio::join!(retried, competing) };
    assert_eq!(competing.expect("The competing unit of work failed"), 1);
    assert_eq!(retried.expect("The retried unit of work failed"), 2);
    assert_eq!(attempts.load(Ordering::Relaxed), 2);
    assert_eq!(balance(coordinator).await, 2);
}
