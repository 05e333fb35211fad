//! Bounded flush task pool
//!
//! A semaphore-bounded pool: `submit` waits for a permit before
//! spawning, so a saturated pool blocks the engine worker. That stall
//! is the system's only backpressure mechanism on ingress. `wait_all`
//! takes every permit, which only succeeds once all in-flight tasks
//! finished.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::warn;

/// Bounded pool for flush tasks.
#[derive(Debug)]
pub struct TaskPool {
    semaphore: Arc<Semaphore>,
    capacity: u32,
}

impl TaskPool {
    /// Create a pool with `capacity` concurrent task slots.
    pub fn new(capacity: usize) -> Self {
        let capacity = u32::try_from(capacity).unwrap_or(u32::MAX);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
        }
    }

    /// Run `task` on the pool, waiting for a free slot first.
    pub async fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // The semaphore is never closed, so acquisition only fails if
        // the pool itself is gone.
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!("task pool semaphore closed, dropping task");
                return;
            }
        };
        tokio::spawn(async move {
            task.await;
            drop(permit);
        });
    }

    /// Wait until every submitted task has finished.
    pub async fn wait_all(&self) {
        if let Ok(all) = self.semaphore.acquire_many(self.capacity).await {
            drop(all);
        }
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
