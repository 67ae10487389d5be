#[cfg(test)]
mod tests {
    use ledger::{Coordinator, CoordinatorConfig};
    use ledger_memory::MemoryDriver;
    use ledger_tests::{execute_tests, init_logs};

    #[tokio::test(flavor = "multi_thread")]
    async fn memory() {
        init_logs();
        let config = CoordinatorConfig::new("memory://localhost/ledger_tests").with_max_connections(4);
        let coordinator = Coordinator::connect(MemoryDriver::new(), config)
            .await
            .expect("Could not connect to the in-memory store");
        execute_tests(coordinator.clone()).await;
        coordinator
            .close()
            .await
            .expect("Could not close the coordinator");
    }

    #[tokio::test]
    async fn private_stores_are_isolated() {
        let config = CoordinatorConfig::new("memory://:memory:").with_max_connections(1);
        let coordinator = Coordinator::connect(MemoryDriver::new(), config)
            .await
            .expect("Could not connect to a private store");
        coordinator
            .run_batch(["CREATE TABLE t (id INTEGER PRIMARY KEY)"])
            .await
            .unwrap();
        let other = Coordinator::connect(
            MemoryDriver::new(),
            CoordinatorConfig::new("memory://:memory:"),
        )
        .await
        .unwrap();
        assert!(other.run_batch(["SELECT * FROM t"]).await.is_err());
    }
}
