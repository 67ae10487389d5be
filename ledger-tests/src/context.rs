use crate::kind;
use ledger::{
    ContextState, Coordinator, Driver, Executor, Statement, TransactionError,
    stream::TryStreamExt,
};
use std::sync::LazyLock;
use tokio::sync::Mutex;

static MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

async fn notes<D: Driver>(coordinator: &Coordinator<D>) -> Vec<String> {
    let mut connection = coordinator.acquire().await.unwrap();
    connection
        .query("SELECT text FROM notes ORDER BY id")
        .await
        .expect("Could not select the notes")
        .into_iter()
        .map(|row| row.get("text").unwrap())
        .collect()
}

/// State machine of the context handed to callbacks.
pub async fn context_lifecycle<D: Driver>(coordinator: &Coordinator<D>) {
    let _lock = MUTEX.lock().await;
    coordinator
        .run_batch([
            "DROP TABLE IF EXISTS notes",
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, text TEXT NOT NULL)",
        ])
        .await
        .expect("Failed to create the notes table");

    // The callback commits itself, the coordinator leaves the context alone
    let operations = coordinator
        .run_interactive(|tx| {
            Box::pin(async move {
                assert_eq!(tx.state(), ContextState::Open);
                tx.execute("INSERT INTO notes (text) VALUES ('committed by the callback')")
                    .await?;
                tx.commit().await?;
                assert_eq!(tx.state(), ContextState::Committed);
                let error = tx
                    .execute("INSERT INTO notes (text) VALUES ('too late')")
                    .await
                    .expect_err("The closed context accepted a statement");
                assert!(matches!(kind(&error), TransactionError::ContextClosed));
                let error = tx.query("SELECT * FROM notes").await.unwrap_err();
                assert!(matches!(kind(&error), TransactionError::ContextClosed));
                let error = tx.commit().await.unwrap_err();
                assert!(matches!(
                    kind(&error),
                    TransactionError::AlreadyClosed(ContextState::Committed)
                ));
                let error = tx.rollback().await.unwrap_err();
                assert!(matches!(
                    kind(&error),
                    TransactionError::AlreadyClosed(ContextState::Committed)
                ));
                Ok(tx.operations())
            })
        })
        .await
        .expect("The self committing callback failed");
    assert_eq!(operations, 1);
    assert_eq!(notes(coordinator).await, ["committed by the callback"]);

    // Rolled back by the callback, then reported as a success: not committed
    let error = coordinator
        .run_interactive(|tx| {
            Box::pin(async move {
                tx.execute("INSERT INTO notes (text) VALUES ('rolled back')")
                    .await?;
                tx.rollback().await?;
                assert_eq!(tx.state(), ContextState::RolledBack);
                let error = tx.rollback().await.unwrap_err();
                assert!(matches!(
                    kind(&error),
                    TransactionError::AlreadyClosed(ContextState::RolledBack)
                ));
                Ok(())
            })
        })
        .await
        .expect_err("A rolled back unit of work was reported as committed");
    assert!(matches!(kind(&error), TransactionError::ContextClosed));
    assert_eq!(notes(coordinator).await, ["committed by the callback"]);

    // Reads see the writes of the same context, streamed in order
    let streamed = coordinator
        .run_interactive(|tx| {
            Box::pin(async move {
                tx.execute(
                    Statement::new("INSERT INTO notes (text) VALUES (?), (?)")
                        .bind("second")
                        .bind("third"),
                )
                .await?;
                let rows = tx
                    .fetch("SELECT text FROM notes ORDER BY id")
                    .map_ok(|row| row.get::<String>("text"))
                    .try_collect::<Vec<_>>()
                    .await?;
                rows.into_iter().collect::<ledger::Result<Vec<_>>>()
            })
        })
        .await
        .expect("Could not stream the notes");
    assert_eq!(streamed, ["committed by the callback", "second", "third"]);
    assert_eq!(notes(coordinator).await, streamed);
}
