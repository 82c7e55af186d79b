//! Worker pool for load tasks.
//!
//! The loader owns a dedicated multi-threaded tokio runtime so it can be
//! started from synchronous code and never competes with the host
//! application's runtime. Async workers stay alive for the life of the pool;
//! blocking threads (disk I/O, decoding) grow on demand up to the configured
//! maximum and retire after the keep-alive. A semaphore bounds how many load
//! tasks run at once; the rest queue on it without limit.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::config::PoolConfig;

/// Dedicated runtime plus concurrency slots.
pub struct WorkerPool {
    handle: Handle,
    slots: Arc<Semaphore>,
    runtime: Mutex<Option<Runtime>>,
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(config: &PoolConfig) -> io::Result<Self> {
        let min_workers = config.min_workers.max(1);
        let max_workers = config.max_workers.max(min_workers);
        let thread_counter = Arc::new(AtomicUsize::new(1));

        let runtime = Builder::new_multi_thread()
            .worker_threads(min_workers)
            .max_blocking_threads(max_workers)
            .thread_keep_alive(config.keep_alive)
            .thread_name_fn(move || {
                let n = thread_counter.fetch_add(1, Ordering::Relaxed);
                format!("image-loader-{}", n)
            })
            .enable_all()
            .build()?;

        info!(
            min_workers,
            max_workers,
            keep_alive_ms = config.keep_alive.as_millis() as u64,
            "Worker pool started"
        );

        Ok(Self {
            handle: runtime.handle().clone(),
            slots: Arc::new(Semaphore::new(max_workers)),
            runtime: Mutex::new(Some(runtime)),
            max_workers,
        })
    }

    /// Spawns a task on the pool's runtime.
    ///
    /// After shutdown the future is dropped without running.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shut_down() {
            debug!("Worker pool is shut down, dropping task");
            return;
        }
        self.handle.spawn(future);
    }

    /// Waits for a free run slot.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        Arc::clone(&self.slots).acquire_owned().await
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Slots currently free.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn is_shut_down(&self) -> bool {
        self.runtime.lock().is_none()
    }

    /// Stops the runtime without waiting for running tasks.
    ///
    /// Safe to call from any thread, including from inside another runtime.
    pub fn shutdown(&self) {
        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            self.slots.close();
            runtime.shutdown_background();
            info!("Worker pool shut down");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
