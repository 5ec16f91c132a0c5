//! Bounded pool for CPU-bound jobs.

use std::sync::Arc;

use affilscan_shared::{AffilscanError, Result};
use tokio::sync::Semaphore;
use tracing::error;

/// Runs closures on tokio's blocking threads, at most `size` at a time.
///
/// Clones share the same bound.
#[derive(Debug, Clone)]
pub struct CpuPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl CpuPool {
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

    /// Run `job` on a blocking thread once a slot is free and await its value.
    ///
    /// A panicking job surfaces as [`AffilscanError::Task`].
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| AffilscanError::Task("cpu pool closed".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| {
            error!(error = %e, "cpu job did not complete");
            AffilscanError::Task(format!("cpu job failed: {e}"))
        })
    }
}
