use crate::{MemoryDriver, MemoryTransaction, session::Session, store::Store};
use async_stream::try_stream;
use ledger_core::{
    Connection, ErrorContext, Executor, QueryResult, Result, Statement, stream::Stream,
    truncate_long,
};
use std::{borrow::Cow, future, sync::Arc};

/// Connection to an in-memory store.
///
/// `memory://:memory:` opens a private store, `memory://localhost/name` (or
/// `memory://name`) joins the store shared by every connection using that name.
/// A named store lives as long as at least one connection to it.
#[derive(Debug)]
pub struct MemoryConnection {
    pub(crate) store: Arc<Store>,
}

impl MemoryConnection {
    /// Name of the connected store, `:memory:` when private.
    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Run `statement` in its own transaction, committed when every statement of it succeeds.
    fn autocommit(&self, statement: &Statement) -> Result<Vec<QueryResult>> {
        let mut session = Session::begin(self.store.clone());
        let results = session.run(statement)?;
        self.store.commit(session)?;
        Ok(results)
    }
}

impl Executor for MemoryConnection {
    type Driver = MemoryDriver;

    fn run<'s>(&'s mut self, statement: Statement) -> impl Stream<Item = Result<QueryResult>> + Send {
        try_stream! {
            let context = || format!("While running the statement:\n{}", truncate_long!(statement.sql()));
            let results = self.autocommit(&statement).with_context(context).inspect_err(|e| {
                log::error!("{e:#}");
            })?;
            for result in results {
                yield result;
            }
        }
    }
}

impl Connection for MemoryConnection {
    async fn connect(url: Cow<'static, str>) -> Result<MemoryConnection> {
        let url = Self::sanitize_url(url)?;
        let private = url
            .query_pairs()
            .any(|(k, v)| k == "mode" && v == "memory");
        let path = urlencoding::decode(url.path().trim_start_matches('/'))
            .with_context(|| format!("The store name in `{url}` is not valid UTF-8"))?;
        let name = match (url.host_str(), path.as_ref()) {
            _ if private => None,
            (Some("localhost") | None, "") => None,
            (Some("localhost") | None, path) => Some(path.to_string()),
            (Some(host), "") => Some(host.to_string()),
            (Some(host), path) => Some(format!("{host}/{path}")),
        };
        let store = Store::open(name.as_deref());
        log::debug!("Connected to the in-memory store `{}`", store.name());
        Ok(Self { store })
    }

    fn begin(&mut self) -> impl Future<Output = Result<MemoryTransaction<'_>>> + Send {
        future::ready(Ok(MemoryTransaction::new(self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_names() {
        let private = MemoryConnection::connect("memory://:memory:".into())
            .await
            .unwrap();
        assert_eq!(private.store_name(), ":memory:");
        let a = MemoryConnection::connect("memory://localhost/connect_names".into())
            .await
            .unwrap();
        let b = MemoryConnection::connect("memory://connect_names".into())
            .await
            .unwrap();
        assert_eq!(a.store_name(), "connect_names");
        assert!(Arc::ptr_eq(&a.store, &b.store));
        let spaced = MemoryConnection::connect("memory://localhost/connect%20names".into())
            .await
            .unwrap();
        assert_eq!(spaced.store_name(), "connect names");
        assert!(
            MemoryConnection::connect("sqlite://connect_names".into())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn autocommit() {
        let mut a = MemoryConnection::connect("memory://autocommit".into())
            .await
            .unwrap();
        let mut b = MemoryConnection::connect("memory://autocommit".into())
            .await
            .unwrap();
        a.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)")
            .await
            .unwrap();
        let affected = a.execute("INSERT INTO t (v) VALUES ('x')").await.unwrap();
        assert_eq!(affected.last_affected_id, Some(1));
        assert!(a.execute("INSERT INTO t (id) VALUES (1)").await.is_err());
        let rows = b.query("SELECT v FROM t").await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
