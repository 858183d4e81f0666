//! Bounded pool for background work spawned by request handlers.
//!
//! # Responsibilities
//! - Cap the number of concurrently running background jobs
//! - Reject submissions when the cap is reached (backpressure)
//! - Let shutdown wait for running jobs
//!
//! # Design Decisions
//! - Rejection instead of queueing: callers never wait on the pool
//! - A permit is held for the job's whole lifetime, released even on panic

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

/// Why a job was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("background job pool is saturated")]
    Saturated,

    #[error("background job pool is draining")]
    Closed,
}

/// Fixed-capacity background job pool.
#[derive(Debug, Clone)]
pub struct JobPool {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    capacity: usize,
}

impl JobPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            tracker: TaskTracker::new(),
            capacity,
        }
    }

    /// Run `job` in the background if a slot is free.
    pub fn try_spawn<F>(&self, job: F) -> Result<(), JobError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(JobError::Closed);
        }

        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| JobError::Saturated)?;

        self.tracker.spawn(async move {
            let _permit = permit;
            job.await;
        });
        Ok(())
    }

    /// Jobs currently running.
    pub fn running(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop accepting jobs and wait for the running ones to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
