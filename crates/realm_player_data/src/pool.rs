//! Fixed-size connection pool for persistence backends.

use crate::error::PersistenceError;
use crossbeam::channel::{bounded, select, Receiver, Sender};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// A fixed set of backend connections shared by every domain.
///
/// Connections are handed out as [`PooledConnection`] guards and go back to
/// the free list when the guard drops. `acquire` blocks, so it must only be
/// called from work running on the [`WorkExecutor`](crate::WorkExecutor).
pub struct ConnectionPool<C> {
    free_tx: Sender<C>,
    free_rx: Receiver<C>,
    /// Never sent on. Dropping it in `close` wakes every blocked acquire.
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    size: usize,
    closed: AtomicBool,
}

impl<C: Send> ConnectionPool<C> {
    /// Builds a pool from already-opened connections.
    pub fn new(connections: Vec<C>) -> Self {
        let size = connections.len();
        let (free_tx, free_rx) = bounded(size.max(1));
        for connection in connections {
            // Capacity equals the number of connections, so this never blocks.
            let _ = free_tx.send(connection);
        }
        debug!("Connection pool created with {} connection(s)", size);
        let (close_tx, close_rx) = bounded(0);

        Self {
            free_tx,
            free_rx,
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            size,
            closed: AtomicBool::new(false),
        }
    }

    /// Opens `size` connections with `open`.
    pub fn open_with<E>(size: usize, mut open: impl FnMut(usize) -> Result<C, E>) -> Result<Self, E> {
        let mut connections = Vec::with_capacity(size);
        for index in 0..size {
            connections.push(open(index)?);
        }
        Ok(Self::new(connections))
    }

    /// Blocks until a connection is free or the pool is closed.
    pub fn acquire(&self) -> Result<PooledConnection<'_, C>, PersistenceError> {
        if self.is_closed() {
            return Err(PersistenceError::PoolClosed);
        }
        select! {
            recv(self.free_rx) -> connection => match connection {
                Ok(connection) => Ok(PooledConnection {
                    pool: self,
                    connection: Some(connection),
                }),
                Err(_) => Err(PersistenceError::PoolClosed),
            },
            recv(self.close_rx) -> _ => Err(PersistenceError::PoolClosed),
        }
    }

    /// Releases every idle connection and rejects further acquires.
    /// Connections currently checked out are dropped when returned.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(self.close_tx.lock().unwrap_or_else(PoisonError::into_inner).take());
        let released = self.free_rx.try_iter().count();
        info!("🔌 Connection pool closed ({} idle connection(s) released)", released);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn idle(&self) -> usize {
        self.free_rx.len()
    }

    fn release(&self, connection: C) {
        if self.is_closed() {
            return;
        }
        let _ = self.free_tx.try_send(connection);
    }
}

/// RAII guard for a borrowed connection.
pub struct PooledConnection<'a, C: Send> {
    pool: &'a ConnectionPool<C>,
    connection: Option<C>,
}

impl<C: Send> Deref for PooledConnection<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only taken in Drop.
        match &self.connection {
            Some(connection) => connection,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<C: Send> DerefMut for PooledConnection<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        match &mut self.connection {
            Some(connection) => connection,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<C: Send> Drop for PooledConnection<'_, C> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(connection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn connections_return_on_drop() {
        let pool = ConnectionPool::new(vec![1u32, 2]);
        {
            let a = pool.acquire().unwrap();
            let b = pool.acquire().unwrap();
            assert_eq!(*a + *b, 3);
            assert_eq!(pool.idle(), 0);
        }
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn acquire_waits_for_a_free_connection() {
        let pool = Arc::new(ConnectionPool::new(vec![String::from("conn")]));
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|c| c.len()))
        };
        thread::sleep(Duration::from_millis(30));
        drop(held);

        assert_eq!(waiter.join().unwrap().unwrap(), 4);
    }

    #[test]
    fn closed_pool_rejects_acquire() {
        let pool = ConnectionPool::new(vec![(), ()]);
        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.idle(), 0);
        assert!(matches!(pool.acquire(), Err(PersistenceError::PoolClosed)));
    }

    #[test]
    fn close_wakes_blocked_acquire() {
        let pool = Arc::new(ConnectionPool::new(vec![7u8]));
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|c| *c))
        };
        thread::sleep(Duration::from_millis(30));
        pool.close();

        assert!(matches!(waiter.join().unwrap(), Err(PersistenceError::PoolClosed)));
        drop(held);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn open_with_propagates_errors() {
        let result = ConnectionPool::<u8>::open_with(3, |i| if i == 2 { Err("refused") } else { Ok(i as u8) });
        assert_eq!(result.err(), Some("refused"));
    }
}
