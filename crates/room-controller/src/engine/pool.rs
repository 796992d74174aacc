//! Engine pool allocator.
//!
//! A fixed set of worker handles created at startup, handed out round-robin.
//! `acquire` never blocks and never removes a worker. A worker that dies trips
//! the pool-wide failure token; the binary treats that as fatal and exits so a
//! supervisor can restart the process.

use super::{EngineError, MediaWorker};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct EnginePool {
    workers: Vec<Arc<dyn MediaWorker>>,
    cursor: AtomicUsize,
    failure: CancellationToken,
}

impl std::fmt::Debug for EnginePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnginePool")
            .field("workers", &self.workers.len())
            .field("failed", &self.failure.is_cancelled())
            .finish()
    }
}

impl EnginePool {
    /// Build a pool from already-initialised workers.
    ///
    /// `failure` must be the token the workers cancel when they die.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidParameters` if `workers` is empty.
    pub fn new(
        workers: Vec<Arc<dyn MediaWorker>>,
        failure: CancellationToken,
    ) -> Result<Self, EngineError> {
        if workers.is_empty() {
            return Err(EngineError::InvalidParameters(
                "engine pool needs at least one worker".to_string(),
            ));
        }

        info!(
            target: "rc.engine.pool",
            workers = workers.len(),
            "Engine pool initialised"
        );

        Ok(Self {
            workers,
            cursor: AtomicUsize::new(0),
            failure,
        })
    }

    /// Next worker in rotation. Wraps around at the end of the list.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::WorkerDied` if the selected worker is dead. The
    /// failure token has already fired in that case.
    pub fn acquire(&self) -> Result<Arc<dyn MediaWorker>, EngineError> {
        let ticket = self.cursor.fetch_add(1, Ordering::Relaxed);
        let index = ticket % self.workers.len();

        let worker = self
            .workers
            .get(index)
            .ok_or(EngineError::WorkerDied { worker: index })?;

        if !worker.is_alive() {
            return Err(EngineError::WorkerDied {
                worker: worker.index(),
            });
        }

        debug!(target: "rc.engine.pool", worker = worker.index(), "Engine worker acquired");
        Ok(Arc::clone(worker))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Whether any worker has died.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failure.is_cancelled()
    }

    /// Resolves once any worker has died.
    pub async fn failed(&self) {
        self.failure.cancelled().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::simulated::SimulatedWorker;

    fn pool_of(n: usize) -> (EnginePool, Vec<Arc<SimulatedWorker>>) {
        let failure = CancellationToken::new();
        let workers: Vec<Arc<SimulatedWorker>> = (0..n)
            .map(|i| Arc::new(SimulatedWorker::new(i, failure.clone())))
            .collect();
        let dyn_workers = workers
            .iter()
            .map(|w| Arc::clone(w) as Arc<dyn MediaWorker>)
            .collect();
        (EnginePool::new(dyn_workers, failure).unwrap(), workers)
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        let result = EnginePool::new(Vec::new(), CancellationToken::new());
        assert!(matches!(result, Err(EngineError::InvalidParameters(_))));
    }

    #[test]
    fn test_acquire_rotates_and_wraps() {
        let (pool, _) = pool_of(3);

        let picks: Vec<usize> = (0..7).map(|_| pool.acquire().unwrap().index()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_cursor_overflow_wraps() {
        let (pool, _) = pool_of(4);
        pool.cursor.store(usize::MAX, Ordering::Relaxed);

        let first = pool.acquire().unwrap().index();
        let second = pool.acquire().unwrap().index();
        assert_eq!(first, usize::MAX % 4);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn test_worker_death_trips_failure_signal() {
        let (pool, workers) = pool_of(2);
        assert!(!pool.has_failed());

        workers[1].kill();

        tokio::time::timeout(std::time::Duration::from_secs(1), pool.failed())
            .await
            .expect("failure signal should fire");
        assert!(pool.has_failed());

        // Healthy worker still served, dead one reported
        assert_eq!(pool.acquire().unwrap().index(), 0);
        assert!(matches!(
            pool.acquire(),
            Err(EngineError::WorkerDied { worker: 1 })
        ));
    }
}
