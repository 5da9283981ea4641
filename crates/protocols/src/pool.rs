//! Bounded worker pool owned by one participant.
//!
//! A thin wrapper over a dedicated rayon pool. Machine code calls [`Pool::map`]
//! synchronously; the harness runs deliveries off the async workers, so a
//! blocking `map` never stalls other participants. One pool serves every
//! phase of its participant and is torn down once, at the end of the
//! participant's sequence.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by [`Pool`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("failed to build worker pool: {0}")]
    Spawn(String),

    #[error("pool has been torn down")]
    Closed,

    #[error("pool job panicked")]
    JobPanicked,
}

/// Bounded set of worker threads.
#[derive(Debug)]
pub struct Pool {
    size: usize,
    inner: Mutex<Option<Arc<ThreadPool>>>,
}

impl Pool {
    /// Build a pool of `max_workers` threads; `0` lets rayon size it to the
    /// available parallelism of the machine.
    pub fn new(max_workers: usize) -> Result<Self, PoolError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(max_workers)
            .thread_name(|i| format!("pool-worker-{}", i))
            .build()
            .map_err(|e| PoolError::Spawn(e.to_string()))?;

        let size = pool.current_num_threads();
        debug!(workers = size, "Worker pool started");

        Ok(Self {
            size,
            inner: Mutex::new(Some(Arc::new(pool))),
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        self.current().is_none()
    }

    fn current(&self) -> Option<Arc<ThreadPool>> {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Apply `f` to every input on the workers and return the results in
    /// input order. Blocks the caller until every job finished.
    pub fn map<I, R, F>(&self, inputs: Vec<I>, f: F) -> Result<Vec<R>, PoolError>
    where
        I: Send,
        R: Send,
        F: Fn(I) -> R + Send + Sync,
    {
        let pool = self.current().ok_or(PoolError::Closed)?;

        // rayon re-raises a job panic on the caller once the batch settles.
        panic::catch_unwind(AssertUnwindSafe(|| {
            pool.install(|| inputs.into_par_iter().map(f).collect::<Vec<R>>())
        }))
        .map_err(|_| {
            warn!("Pool job panicked");
            PoolError::JobPanicked
        })
    }

    /// Stop accepting jobs and release the workers. Idempotent.
    pub fn teardown(&self) {
        let pool = match self.inner.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if pool.is_some() {
            debug!(workers = self.size, "Worker pool torn down");
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.teardown();
    }
}
