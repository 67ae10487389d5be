#[cfg(test)]
mod tests {
    use ledger::{Coordinator, CoordinatorConfig};
    use ledger_sqlite::SQLiteDriver;
    use ledger_tests::{create_author_and_first_post, execute_tests, init_logs};

    #[tokio::test(flavor = "multi_thread")]
    async fn sqlite() {
        init_logs();
        let dir = tempfile::tempdir().expect("Could not create a temporary directory");
        let url = format!("sqlite://{}", dir.path().join("ledger_tests.db").display());
        let coordinator = Coordinator::connect(
            SQLiteDriver::new(),
            CoordinatorConfig::new(url.clone()).with_max_connections(4),
        )
        .await
        .unwrap_or_else(|e| panic!("Could not connect to `{url}`: {e:#}"));
        execute_tests(coordinator.clone()).await;
        coordinator
            .close()
            .await
            .expect("Could not close the coordinator");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_database() {
        init_logs();
        // Every connection opens its own in-memory database, keep only one
        let coordinator = Coordinator::connect(
            SQLiteDriver::new(),
            CoordinatorConfig::new("sqlite://:memory:").with_max_connections(1),
        )
        .await
        .expect("Could not open an in-memory database");
        coordinator
            .run_batch([
                "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL UNIQUE, name TEXT)",
                "CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT NOT NULL, content TEXT, published BOOLEAN NOT NULL DEFAULT 0, author_id INTEGER REFERENCES users(id))",
            ])
            .await
            .expect("Could not create the tables");
        let (author_id, post_id) = create_author_and_first_post(
            &coordinator,
            "ada@example.com",
            "Ada",
            "Notes",
            "On the analytical engine",
        )
        .await
        .expect("Could not create the author and the post");
        assert_eq!((author_id, post_id), (1, 1));
    }
}
