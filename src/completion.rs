use std::{
    any::Any,
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
    },
    thread,
};

use tracing::{error, trace};

use crate::{cell::ReplySink, runtime::WorkerPool};

/// Notified with a description of any panic raised by caller completion code
pub type InternalErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct OrderedQueue {
    items: VecDeque<Box<dyn ReplySink>>,
    worker_active: bool,
}

/**
 * Point-in-time completion counters
 */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionStats {
    pub completed_sync: u64,
    pub completed_async: u64,
    pub failed_async: u64,
    pub backlog: usize,
}

/**
 * Delivers finished results to their consumers.
 *
 * Consumers that can be finished cheaply are completed on the calling (I/O)
 * thread. Everything else goes to the worker pool: in ordered mode through a
 * single drain worker so callbacks run in the order their replies arrived,
 * otherwise as one independent job per result.
 */
pub struct CompletionScheduler {
    preserve_order: bool,
    drain_spins: usize,
    pool: WorkerPool,
    ordered: Mutex<OrderedQueue>,
    completed_sync: AtomicU64,
    completed_async: AtomicU64,
    failed_async: AtomicU64,
    backlog: AtomicUsize,
    on_internal_error: RwLock<Option<InternalErrorHandler>>,
}

impl CompletionScheduler {
    pub fn new(pool: WorkerPool, preserve_order: bool, drain_spins: usize) -> Arc<Self> {
        Arc::new(Self {
            preserve_order,
            drain_spins,
            pool,
            ordered: Mutex::new(OrderedQueue::default()),
            completed_sync: AtomicU64::new(0),
            completed_async: AtomicU64::new(0),
            failed_async: AtomicU64::new(0),
            backlog: AtomicUsize::new(0),
            on_internal_error: RwLock::new(None),
        })
    }

    pub fn set_internal_error_handler(&self, handler: InternalErrorHandler) {
        *self.on_internal_error.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn lock(&self) -> MutexGuard<'_, OrderedQueue> {
        // Callbacks never run under this lock
        self.ordered.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /**
     * Completes a sink whose outcome has been set.
     * Never blocks on caller code: callbacks are always handed to the pool.
     */
    pub fn complete(self: &Arc<Self>, mut sink: Box<dyn ReplySink>) {
        if sink.try_complete(false) {
            self.completed_sync.fetch_add(1, Ordering::Relaxed);
            sink.release();
            return;
        }

        self.backlog.fetch_add(1, Ordering::AcqRel);

        if !self.preserve_order {
            let scheduler = Arc::clone(self);
            self.pool.spawn(move || scheduler.run_async(sink));
            return;
        }

        let start_worker = {
            let mut queue = self.lock();
            queue.items.push_back(sink);
            !std::mem::replace(&mut queue.worker_active, true)
        };

        if start_worker {
            trace!("starting ordered completion worker");
            let scheduler = Arc::clone(self);
            self.pool.spawn(move || scheduler.drain_ordered());
        }
    }

    fn drain_ordered(&self) {
        loop {
            let next = self.lock().items.pop_front();
            if let Some(sink) = next {
                self.run_async(sink);
                continue;
            }

            // Linger briefly so a burst of replies does not restart the worker per item
            let mut refilled = false;
            for _ in 0..self.drain_spins {
                thread::yield_now();
                if !self.lock().items.is_empty() {
                    refilled = true;
                    break;
                }
            }
            if refilled {
                continue;
            }

            // Exit decision and emptiness check happen under one lock, so an
            // enqueue either lands before (and is drained) or starts a new worker
            let mut queue = self.lock();
            if queue.items.is_empty() {
                queue.worker_active = false;
                trace!("ordered completion worker idle; exiting");
                return;
            }
        }
    }

    fn run_async(&self, mut sink: Box<dyn ReplySink>) {
        let result = catch_unwind(AssertUnwindSafe(|| sink.try_complete(true)));
        self.backlog.fetch_sub(1, Ordering::AcqRel);

        match result {
            Ok(_) => {
                self.completed_async.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                self.failed_async.fetch_add(1, Ordering::Relaxed);
                let description = panic_message(payload.as_ref());
                error!(panic = %description, "completion callback panicked");
                self.notify_internal_error(&description);
            }
        }

        sink.release();
    }

    fn notify_internal_error(&self, description: &str) {
        let handler = self
            .on_internal_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if let Some(handler) = handler {
            // A panicking handler must not take the drain worker down with it
            if catch_unwind(AssertUnwindSafe(|| handler(description))).is_err() {
                error!("internal error handler panicked");
            }
        }
    }

    pub fn stats(&self) -> CompletionStats {
        CompletionStats {
            completed_sync: self.completed_sync.load(Ordering::Relaxed),
            completed_async: self.completed_async.load(Ordering::Relaxed),
            failed_async: self.failed_async.load(Ordering::Relaxed),
            backlog: self.backlog.load(Ordering::Acquire),
        }
    }

    pub fn preserves_order(&self) -> bool {
        self.preserve_order
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
