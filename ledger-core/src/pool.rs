use crate::{Connection, Driver, ErrorContext, Result};
use parking_lot::Mutex;
use std::{
    borrow::Cow,
    fmt::{self, Debug},
    mem,
    ops::{Deref, DerefMut},
};
use tokio::sync::{Semaphore, SemaphorePermit};

/// Bounded set of connections to one backend.
///
/// At most `max_connections` connections are checked out at the same time,
/// callers beyond that wait for one to be returned. Idle connections are
/// reused before opening new ones.
pub struct Pool<D: Driver> {
    driver: D,
    url: Cow<'static, str>,
    idle: Mutex<Vec<D::Connection>>,
    permits: Semaphore,
    max_connections: usize,
}

impl<D: Driver> Pool<D> {
    pub fn new(driver: D, url: Cow<'static, str>, max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            driver,
            url,
            idle: Mutex::new(Vec::with_capacity(max_connections)),
            permits: Semaphore::new(max_connections),
            max_connections,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Number of connections currently waiting to be reused.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Hand a connection to the pool, dropped if the pool is already full or closed.
    pub fn release(&self, connection: D::Connection) {
        if self.permits.is_closed() {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_connections {
            idle.push(connection);
        }
    }

    /// Refuse any further checkout and disconnect the idle connections.
    ///
    /// Connections still checked out are dropped once returned. Returns the
    /// first error reported by a disconnect.
    pub async fn close(&self) -> Result<()> {
        self.permits.close();
        let idle = mem::take(&mut *self.idle.lock());
        log::debug!(
            "Closing the {} pool, disconnecting {} idle connections",
            self.driver.name(),
            idle.len()
        );
        let mut result = Ok(());
        for connection in idle {
            if let Err(error) = connection.disconnect().await {
                log::error!("{error:#}");
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }
        result
    }

    /// Check out a connection, opening a new one when none is idle.
    pub async fn get(&self) -> Result<Pooled<'_, D>> {
        let permit = self
            .permits
            .acquire()
            .await
            .context("The connection pool is closed")?;
        let idle = self.idle.lock().pop();
        let connection = match idle {
            Some(connection) => connection,
            None => {
                log::debug!("Opening a new {} connection", self.driver.name());
                self.driver.connect(self.url.clone()).await?
            }
        };
        Ok(Pooled {
            pool: self,
            connection: Some(connection),
            reusable: true,
            _permit: permit,
        })
    }
}

impl<D: Driver> Debug for Pool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("driver", &self.driver)
            .field("max_connections", &self.max_connections)
            .field("available", &self.permits.available_permits())
            .finish()
    }
}

/// Connection checked out of a [`Pool`], returned to it on drop unless marked not reusable.
pub struct Pooled<'p, D: Driver> {
    pool: &'p Pool<D>,
    /// Only taken when dropped.
    connection: Option<D::Connection>,
    reusable: bool,
    _permit: SemaphorePermit<'p>,
}

impl<D: Driver> Pooled<'_, D> {
    /// Whether the connection goes back to the pool once dropped.
    pub fn set_reusable(&mut self, reusable: bool) {
        self.reusable = reusable;
    }

    /// Close the connection instead of returning it.
    pub fn discard(mut self) {
        self.reusable = false;
    }
}

impl<D: Driver> Deref for Pooled<'_, D> {
    type Target = D::Connection;
    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("The pooled connection is only taken on drop")
    }
}

impl<D: Driver> DerefMut for Pooled<'_, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("The pooled connection is only taken on drop")
    }
}

impl<D: Driver> Drop for Pooled<'_, D> {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        if self.reusable {
            self.pool.release(connection);
        } else {
            log::debug!("Discarding a {} connection", self.pool.driver.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDriver;
    use std::{sync::Arc, time::Duration};

    fn pool(max_connections: usize) -> Pool<RecordingDriver> {
        Pool::new(RecordingDriver, "recording://".into(), max_connections)
    }

    #[tokio::test]
    async fn reuses_idle_connections() {
        let pool = pool(2);
        let first = pool.get().await.unwrap();
        let recorder = first.0.clone();
        drop(first);
        assert_eq!(pool.idle(), 1);
        let again = pool.get().await.unwrap();
        assert!(Arc::ptr_eq(&again.0.0, &recorder.0));
        assert_eq!(pool.idle(), 0);
    }

    #[tokio::test]
    async fn waits_for_a_free_connection() {
        let pool = pool(1);
        let held = pool.get().await.unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(20), pool.get())
                .await
                .is_err()
        );
        drop(held);
        assert!(pool.get().await.is_ok());
    }

    #[tokio::test]
    async fn discarded_connections_are_closed() {
        let pool = pool(2);
        pool.get().await.unwrap().discard();
        assert_eq!(pool.idle(), 0);
        let mut connection = pool.get().await.unwrap();
        connection.set_reusable(false);
        drop(connection);
        assert_eq!(pool.idle(), 0);
    }

    #[tokio::test]
    async fn close_disconnects_idle_connections() {
        let pool = pool(2);
        let idle = pool.get().await.unwrap();
        let held = pool.get().await.unwrap();
        let (idle_recorder, held_recorder) = (idle.0.clone(), held.0.clone());
        drop(idle);
        pool.close().await.unwrap();
        assert_eq!(idle_recorder.calls(), ["DISCONNECT"]);
        assert!(pool.get().await.is_err());

        // Returned after the close, the connection is dropped
        drop(held);
        assert_eq!(pool.idle(), 0);
        assert!(held_recorder.calls().is_empty());
    }
}
