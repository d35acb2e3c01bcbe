use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt, mem,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, Weak,
    },
    time::Duration,
};

use crossbeam_queue::ArrayQueue;
use tokio::sync::oneshot;
use tracing::warn;

use crate::{
    error::RedisError,
    resp::{FromReply, RESPFrame},
};

pub type Outcome<T> = Result<T, RedisError>;

pub type Callback<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

/**
 * Who is waiting on a cell, and therefore how completing it is delivered
 */
pub enum Consumer<T> {
    /// Fire-and-forget: the outcome is dropped
    Detached,
    /// A thread parked on a waiter
    Blocking(Arc<Waiter<T>>),
    /// An async task awaiting a oneshot receiver
    Future(oneshot::Sender<Outcome<T>>),
    /// Caller code to run with the outcome; never run on the I/O thread
    Callback(Callback<T>),
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Consumer::Detached => "Detached",
            Consumer::Blocking(_) => "Blocking",
            Consumer::Future(_) => "Future",
            Consumer::Callback(_) => "Callback",
        })
    }
}

/**
 * Type-erased result destination carried by a pending message
 */
pub trait ReplySink: Send {
    fn set_reply(&mut self, frame: RESPFrame);

    fn set_error(&mut self, error: RedisError);

    /// Whether the recorded outcome is a success; false while pending
    fn is_success(&self) -> bool;

    /**
     * Delivers the outcome to the consumer.
     * Returns false when delivery needs an asynchronous worker, in which case
     * nothing was delivered and the call must be repeated with `is_async`.
     */
    fn try_complete(&mut self, is_async: bool) -> bool;

    /// Hands the sink back to its pool. Only valid after delivery.
    fn release(self: Box<Self>);
}

/**
 * Single-use handoff slot for one command's outcome, recycled through a `ResultCellPool`.
 *
 * A cell is only ever reachable through its `Box`, so whoever holds the box
 * owns it outright; `release` clears it as it goes back to the pool.
 */
pub struct ResultCell<T> {
    outcome: Option<Outcome<T>>,
    consumer: Consumer<T>,
    pool: Weak<ResultCellPool<T>>,
}

impl<T> ResultCell<T> {
    fn new(pool: Weak<ResultCellPool<T>>) -> Self {
        Self {
            outcome: None,
            consumer: Consumer::Detached,
            pool,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.outcome.is_none()
    }

    /**
     * Records a value. Only the first outcome set is kept.
     */
    pub fn set_value(&mut self, value: T) -> bool {
        self.set_outcome(Ok(value))
    }

    pub fn set_failure(&mut self, error: RedisError) -> bool {
        self.set_outcome(Err(error))
    }

    fn set_outcome(&mut self, outcome: Outcome<T>) -> bool {
        if self.outcome.is_some() {
            warn!("result cell already holds an outcome; ignoring the second one");
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    /// Removes the outcome, leaving the cell pending
    pub fn take_outcome(&mut self) -> Option<Outcome<T>> {
        self.outcome.take()
    }

    pub fn complete(&mut self, is_async: bool) -> bool {
        if !is_async && matches!(self.consumer, Consumer::Callback(_)) {
            return false;
        }

        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| Err(RedisError::UnexpectedReply("completed without a result".to_owned())));

        match mem::replace(&mut self.consumer, Consumer::Detached) {
            Consumer::Detached => {}
            Consumer::Blocking(waiter) => waiter.deliver(outcome),
            Consumer::Future(sender) => {
                // The receiver may have been dropped by a caller that gave up
                let _ = sender.send(outcome);
            }
            Consumer::Callback(callback) => callback(outcome),
        }
        true
    }

    /**
     * Extract-and-clear, then return the cell to its pool if the pool is still alive
     */
    pub fn release(mut self: Box<Self>) {
        self.outcome = None;
        self.consumer = Consumer::Detached;
        if let Some(pool) = self.pool.upgrade() {
            pool.recycle(self);
        }
    }
}

impl<T: FromReply> ReplySink for ResultCell<T> {
    fn set_reply(&mut self, frame: RESPFrame) {
        let outcome = match frame {
            RESPFrame::Error(message) => Err(RedisError::Server(String::from_utf8_lossy(&message).into_owned())),
            frame => T::from_reply(frame),
        };
        self.set_outcome(outcome);
    }

    fn set_error(&mut self, error: RedisError) {
        self.set_failure(error);
    }

    fn is_success(&self) -> bool {
        matches!(self.outcome, Some(Ok(_)))
    }

    fn try_complete(&mut self, is_async: bool) -> bool {
        self.complete(is_async)
    }

    fn release(self: Box<Self>) {
        ResultCell::release(self)
    }
}

impl<T> Drop for ResultCell<T> {
    fn drop(&mut self) {
        match mem::replace(&mut self.consumer, Consumer::Detached) {
            Consumer::Detached => {}
            Consumer::Blocking(waiter) => waiter.deliver(Err(RedisError::Abandoned)),
            Consumer::Future(sender) => {
                let _ = sender.send(Err(RedisError::Abandoned));
            }
            Consumer::Callback(_) => warn!("dropping an uncompleted callback"),
        }
    }
}

/**
 * Bounded lock-free free list of result cells for one result type.
 * An empty list falls back to allocation; a full list drops the returned cell.
 */
pub struct ResultCellPool<T> {
    free: ArrayQueue<Box<ResultCell<T>>>,
    allocated: AtomicUsize,
    reused: AtomicUsize,
}

impl<T> ResultCellPool<T> {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: ArrayQueue::new(capacity.max(1)),
            allocated: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
        })
    }

    pub fn acquire(self: &Arc<Self>, consumer: Consumer<T>) -> Box<ResultCell<T>> {
        let mut cell = match self.free.pop() {
            Some(cell) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                cell
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Box::new(ResultCell::new(Arc::downgrade(self)))
            }
        };
        cell.consumer = consumer;
        cell
    }

    fn recycle(&self, cell: Box<ResultCell<T>>) {
        debug_assert!(cell.outcome.is_none() && matches!(cell.consumer, Consumer::Detached));
        // A full free list just drops the cell
        let _ = self.free.push(cell);
    }

    /// Cells currently sitting in the free list
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Cells ever allocated because the free list was empty
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn reused(&self) -> usize {
        self.reused.load(Ordering::Relaxed)
    }
}

/**
 * Parking spot for a blocking caller. Recycled through a `WaiterPool` so a
 * blocking call does not allocate a fresh wait primitive each time.
 */
pub struct Waiter<T> {
    slot: Mutex<Option<Outcome<T>>>,
    ready: Condvar,
}

impl<T> Default for Waiter<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }
}

impl<T> Waiter<T> {
    fn lock(&self) -> MutexGuard<'_, Option<Outcome<T>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, outcome: Outcome<T>) {
        *self.lock() = Some(outcome);
        self.ready.notify_one();
    }

    /**
     * Blocks until an outcome is delivered or the timeout passes
     */
    pub fn wait(&self, timeout: Duration) -> Option<Outcome<T>> {
        let slot = self.lock();
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |slot| slot.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.take()
    }
}

/**
 * Bounded pool of waiters. A waiter is only taken back when the returning
 * caller is its sole owner; one abandoned after a timeout is simply dropped.
 */
pub struct WaiterPool<T> {
    free: ArrayQueue<Arc<Waiter<T>>>,
}

impl<T> WaiterPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
        }
    }

    pub fn acquire(&self) -> Arc<Waiter<T>> {
        self.free.pop().unwrap_or_default()
    }

    pub fn release(&self, mut waiter: Arc<Waiter<T>>) {
        if let Some(exclusive) = Arc::get_mut(&mut waiter) {
            *exclusive.slot.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
            let _ = self.free.push(waiter);
        }
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

/**
 * Cell and waiter pools for one result type
 */
pub struct ResultPools<T> {
    pub cells: Arc<ResultCellPool<T>>,
    pub waiters: WaiterPool<T>,
}

/**
 * Pools keyed by result type, built once per multiplexer and shared by reference
 */
pub struct PoolRegistry {
    cell_capacity: usize,
    waiter_capacity: usize,
    pools: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl PoolRegistry {
    pub fn new(cell_capacity: usize, waiter_capacity: usize) -> Self {
        Self {
            cell_capacity,
            waiter_capacity,
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub fn get<T: FromReply>(&self) -> Arc<ResultPools<T>> {
        let key = TypeId::of::<T>();
        let existing = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();

        let erased = match existing {
            Some(erased) => erased,
            None => {
                let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
                pools
                    .entry(key)
                    .or_insert_with(|| {
                        Arc::new(ResultPools::<T> {
                            cells: ResultCellPool::new(self.cell_capacity),
                            waiters: WaiterPool::new(self.waiter_capacity),
                        })
                    })
                    .clone()
            }
        };

        match erased.downcast::<ResultPools<T>>() {
            Ok(pools) => pools,
            Err(_) => unreachable!("pool registry entry keyed by the wrong type"),
        }
    }
}
