use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};

/**
 * General-purpose thread pool for short jobs: helper write passes,
 * ordered completion drains and unordered completions.
 *
 * Built once per multiplexer and passed around by reference. Backed by the
 * blocking pool of a tokio runtime, either owned or borrowed from the caller.
 */
#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
    runtime: Option<Arc<OwnedRuntime>>,
}

struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        // Dropping a runtime from inside async code panics; detach instead
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

impl WorkerPool {
    /**
     * Owns a dedicated runtime with at most `threads` pool threads
     */
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads.max(1))
            .thread_name("redis-mux-pool")
            .enable_all()
            .build()?;

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    /**
     * Runs jobs on an existing runtime owned by the caller
     */
    pub fn from_handle(handle: Handle) -> Self {
        Self { handle, runtime: None }
    }

    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Detached: jobs report through their own channels
        drop(self.handle.spawn_blocking(job));
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn owns_runtime(&self) -> bool {
        self.runtime.is_some()
    }
}
