use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::Duration,
};

use tracing::{debug, error, trace};

use crate::{
    connection::{Connection, WriteBudget, WriteOutcome},
    runtime::WorkerPool,
};

const WRITER_THREAD_NAME: &str = "redis-mux-writer";

#[derive(Debug, Clone, Copy)]
pub struct WriterSettings {
    pub dedicated: bool,
    pub budget: WriteBudget,
    pub helper_threshold: usize,
    pub idle_timeout: Duration,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            dedicated: true,
            budget: WriteBudget::default(),
            helper_threshold: 2,
            idle_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Connections waiting in the rotation
    pub backlog: usize,
    pub helper_passes: u64,
    pub writer_starts: u64,
    pub writer_running: bool,
}

#[derive(Default)]
struct ReadyState {
    ready: VecDeque<Arc<Connection>>,
    writer_running: bool,
    shutdown: bool,
}

struct Shared {
    settings: WriterSettings,
    pool: WorkerPool,
    state: Mutex<ReadyState>,
    work_available: Condvar,
    depth: AtomicUsize,
    helper_passes: AtomicU64,
    writer_starts: AtomicU64,
}

/**
 * Shares writer threads fairly across connections.
 *
 * Connections with queued messages wait in one global FIFO. A writer takes the
 * connection at the head, writes within its budget, and puts it back at the
 * tail if work remains, so no connection can starve the others. One dedicated
 * writer thread runs while there is work; when the backlog builds up, helper
 * passes on the worker pool join in.
 */
#[derive(Clone)]
pub struct WriteScheduler {
    shared: Arc<Shared>,
}

impl WriteScheduler {
    pub fn new(settings: WriterSettings, pool: WorkerPool) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                pool,
                state: Mutex::new(ReadyState::default()),
                work_available: Condvar::new(),
                depth: AtomicUsize::new(0),
                helper_passes: AtomicU64::new(0),
                writer_starts: AtomicU64::new(0),
            }),
        }
    }

    /**
     * Puts a connection with queued messages into the rotation.
     * A connection that is already scheduled is left where it is.
     */
    pub fn schedule(&self, connection: &Arc<Connection>) {
        if !connection.has_pending_writes() || !connection.try_mark_scheduled() {
            return;
        }
        self.shared.enqueue(Arc::clone(connection));
    }

    /**
     * Runs one writer pass on the calling thread: takes the connection at the
     * head of the rotation and writes its budget. Returns false when the
     * rotation is empty.
     */
    pub fn pump(&self) -> bool {
        self.shared.pass()
    }

    /**
     * Stops the dedicated writer and empties the rotation.
     * Queued messages stay on their connections.
     */
    pub fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut state = self.shared.lock();
            state.shutdown = true;
            self.shared.depth.store(0, Ordering::Release);
            state.ready.drain(..).collect()
        };
        self.shared.work_available.notify_all();

        for connection in drained {
            connection.clear_scheduled();
        }
        debug!("write scheduler shut down");
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            backlog: self.shared.depth.load(Ordering::Acquire),
            helper_passes: self.shared.helper_passes.load(Ordering::Relaxed),
            writer_starts: self.shared.writer_starts.load(Ordering::Relaxed),
            writer_running: self.shared.lock().writer_running,
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ReadyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(self: &Arc<Self>, connection: Arc<Connection>) {
        let (depth, start_writer) = {
            let mut state = self.lock();
            if state.shutdown {
                drop(state);
                connection.clear_scheduled();
                return;
            }
            state.ready.push_back(connection);
            let depth = state.ready.len();
            self.depth.store(depth, Ordering::Release);

            let start_writer = self.settings.dedicated && !state.writer_running;
            if start_writer {
                state.writer_running = true;
            }
            (depth, start_writer)
        };

        if start_writer {
            self.start_writer();
        } else {
            self.work_available.notify_one();
        }

        if depth >= self.settings.helper_threshold {
            trace!(depth, "backlog building up; adding a helper pass");
            let shared = Arc::clone(self);
            self.pool.spawn(move || {
                shared.helper_passes.fetch_add(1, Ordering::Relaxed);
                shared.pass();
            });
        }
    }

    fn start_writer(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(WRITER_THREAD_NAME.to_owned())
            .spawn(move || shared.run_writer());

        match spawned {
            Ok(_) => {
                self.writer_starts.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                error!(error = %err, "failed to start dedicated writer; falling back to helper passes");
                self.lock().writer_running = false;
                let shared = Arc::clone(self);
                self.pool.spawn(move || while shared.pass() {});
            }
        }
    }

    fn run_writer(&self) {
        debug!("dedicated writer started");
        while let Some(connection) = self.next_for_writer() {
            self.process(connection);
        }
        debug!("dedicated writer exiting");
    }

    /**
     * Waits for the next ready connection. Returns None, having cleared
     * `writer_running`, on shutdown or after the idle timeout.
     */
    fn next_for_writer(&self) -> Option<Arc<Connection>> {
        let mut state = self.lock();
        loop {
            if let Some(connection) = state.ready.pop_front() {
                self.depth.store(state.ready.len(), Ordering::Release);
                return Some(connection);
            }
            if state.shutdown {
                state.writer_running = false;
                return None;
            }

            let (next, timeout) = self
                .work_available
                .wait_timeout(state, self.settings.idle_timeout)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;

            if timeout.timed_out() && state.ready.is_empty() {
                // Cleared under the lock, so the next enqueue starts a fresh writer
                state.writer_running = false;
                return None;
            }
        }
    }

    fn pass(&self) -> bool {
        let next = {
            let mut state = self.lock();
            let next = state.ready.pop_front();
            self.depth.store(state.ready.len(), Ordering::Release);
            next
        };

        match next {
            Some(connection) => {
                self.process(connection);
                true
            }
            None => false,
        }
    }

    fn process(&self, connection: Arc<Connection>) {
        match connection.write_pending(&self.settings.budget) {
            WriteOutcome::MoreWork => self.requeue(connection),
            // Whoever holds the transport requeues or clears it
            WriteOutcome::Busy => {}
            WriteOutcome::NoTransport | WriteOutcome::Failed => connection.clear_scheduled(),
            // A producer may have pushed after the drain but before the flag
            // was cleared; its schedule() saw the flag set and backed off
            WriteOutcome::Drained => {
                if connection.release_scheduled() {
                    self.requeue(connection);
                }
            }
        }
    }

    fn requeue(&self, connection: Arc<Connection>) {
        let mut state = self.lock();
        if state.shutdown {
            drop(state);
            connection.clear_scheduled();
            return;
        }
        state.ready.push_back(connection);
        self.depth.store(state.ready.len(), Ordering::Release);
        drop(state);
        self.work_available.notify_one();
    }
}
