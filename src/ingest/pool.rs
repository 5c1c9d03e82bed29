//! Bounded pool of storage connections.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::storage::{StorageConnection, StorageConnector};

/// A fixed set of connections handed out one at a time. `acquire` blocks
/// until a connection is free; dropping the guard returns it.
pub struct ConnectionPool<C: StorageConnection> {
    idle: Mutex<Vec<C>>,
    available: Condvar,
    capacity: usize,
}

impl<C: StorageConnection> ConnectionPool<C> {
    /// Open up to `requested` connections. Individual connect failures are
    /// logged and the pool opens with fewer; a pool with zero connections
    /// is an error.
    pub fn new<K>(connector: &K, requested: usize) -> Result<Self>
    where
        K: StorageConnector<Conn = C>,
    {
        let mut idle = Vec::with_capacity(requested);
        for slot in 0..requested {
            match connector.connect() {
                Ok(conn) => idle.push(conn),
                Err(err) => {
                    tracing::warn!(slot, %err, "connection failed, pool will run smaller");
                }
            }
        }
        if idle.is_empty() {
            return Err(Error::NoConnections);
        }
        if idle.len() < requested {
            tracing::warn!(
                opened = idle.len(),
                requested,
                "pool opened under capacity"
            );
        }
        let capacity = idle.len();
        Ok(ConnectionPool {
            idle: Mutex::new(idle),
            available: Condvar::new(),
            capacity,
        })
    }

    /// Number of connections the pool owns in total.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Borrow a connection, blocking until one is idle.
    pub fn acquire(&self) -> PooledConnection<'_, C> {
        let mut idle = lock_clean(&self.idle);
        loop {
            if let Some(conn) = idle.pop() {
                return PooledConnection {
                    pool: self,
                    conn: Some(conn),
                };
            }
            idle = match self.available.wait(idle) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    fn release(&self, conn: C) {
        let mut idle = lock_clean(&self.idle);
        idle.push(conn);
        drop(idle);
        self.available.notify_one();
    }
}

fn lock_clean<C>(mutex: &Mutex<Vec<C>>) -> MutexGuard<'_, Vec<C>> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// RAII guard over a borrowed connection.
pub struct PooledConnection<'a, C: StorageConnection> {
    pool: &'a ConnectionPool<C>,
    conn: Option<C>,
}

impl<C: StorageConnection> Deref for PooledConnection<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().unwrap()
    }
}

impl<C: StorageConnection> DerefMut for PooledConnection<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().unwrap()
    }
}

impl<C: StorageConnection> Drop for PooledConnection<'_, C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
