use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::AppError;

/// Process-wide vision state.
///
/// Created once at startup and handed to every component that does
/// pixel-parallel work. Dropping the last handle tears the pool down; no
/// component reaches for an implicit global pool.
pub struct VisionRuntime {
    pool: ThreadPool,
}

impl VisionRuntime {
    /// Builds the runtime. `worker_threads == 0` lets rayon pick one thread per core.
    pub fn init(worker_threads: usize) -> Result<Arc<Self>, AppError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|index| format!("vision-{index}"))
            .build()
            .map_err(|e| AppError::Session(format!("Failed to start vision thread pool: {e}")))?;
        tracing::info!(threads = pool.current_num_threads(), "Vision runtime initialised");
        Ok(Arc::new(Self { pool }))
    }

    /// Runs `op` inside the vision pool so nested rayon iterators use it.
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Drop for VisionRuntime {
    fn drop(&mut self) {
        tracing::info!("Vision runtime shut down");
    }
}
