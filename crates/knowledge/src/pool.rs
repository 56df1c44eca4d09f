//! Bounded worker pool for model calls.
//!
//! Embedding and generation calls are CPU/network heavy. Every such call runs
//! through `WorkerPool::run`, which waits for one of a fixed number of permits
//! before spawning the work. Waiting for a permit is the request queue.

use mentor_core::{AppError, AppResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool running at most `size` jobs at once (minimum 1).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Run `job` on a spawned task once a permit is free.
    ///
    /// Dropping the returned future while the job runs does not cancel the
    /// spawned task; the permit is released when the job finishes.
    pub async fn run<F, T>(&self, job: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Other("worker pool closed".to_string()))?;

        let handle = tokio::spawn(async move {
            let result = job.await;
            drop(permit);
            result
        });

        handle
            .await
            .map_err(|e| AppError::Other(format!("worker task failed: {}", e)))?
    }
}
