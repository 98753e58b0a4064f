//! Bounded off-thread executor for blocking persistence work.

use crate::config::PlayerDataConfig;
use crate::error::PersistenceError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Runs synchronous load/save closures on tokio's blocking pool.
///
/// At most `max_concurrent_io` closures run at once; the rest wait for a
/// permit. Work never runs on the calling task, so a slow disk never stalls
/// the game loop.
#[derive(Debug)]
pub struct WorkExecutor {
    permits: Arc<Semaphore>,
    slow_warn: Duration,
    closed: AtomicBool,
}

impl WorkExecutor {
    pub fn new(config: &PlayerDataConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_io.max(1))),
            slow_warn: config.slow_operation_warn,
            closed: AtomicBool::new(false),
        }
    }

    /// Runs `work` off-thread and returns its result.
    ///
    /// Fails with [`PersistenceError::ExecutorClosed`] once [`close`](Self::close)
    /// has been called, and with [`PersistenceError::TaskFailed`] if the
    /// closure panics.
    pub async fn run<T, F>(&self, label: &str, work: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_closed() {
            return Err(PersistenceError::ExecutorClosed);
        }

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PersistenceError::ExecutorClosed)?;

        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
        .map_err(|e| PersistenceError::TaskFailed(format!("{}: {}", label, e)))?;

        let elapsed = started.elapsed();
        if elapsed > self.slow_warn {
            warn!("⏱️ Slow persistence operation '{}' took {:?}", label, elapsed);
        } else {
            debug!("Persistence operation '{}' finished in {:?}", label, elapsed);
        }

        Ok(result)
    }

    /// Rejects all future work. Tasks already running are unaffected.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.permits.close();
            debug!("Work executor closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
