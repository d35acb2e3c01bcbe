use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

/**
 * Outbound priority class. Administrative traffic such as heartbeats goes High.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

pub trait QueueItem {
    fn priority(&self) -> Priority;

    fn is_heartbeat(&self) -> bool {
        false
    }
}

/**
 * Two FIFOs, high drained before normal. Not thread-safe on its own.
 */
#[derive(Debug)]
pub struct PriorityFifo<T> {
    high: VecDeque<T>,
    normal: VecDeque<T>,
}

impl<T> Default for PriorityFifo<T> {
    fn default() -> Self {
        Self {
            high: VecDeque::new(),
            normal: VecDeque::new(),
        }
    }
}

impl<T: QueueItem> PriorityFifo<T> {
    pub fn push(&mut self, item: T) {
        match item.priority() {
            Priority::High => self.high.push_back(item),
            Priority::Normal => self.normal.push_back(item),
        }
    }

    pub fn pop(&mut self) -> Option<T> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }

    pub fn peek(&self) -> Option<&T> {
        self.high.front().or_else(|| self.normal.front())
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty()
    }

    pub fn drain(&mut self) -> Vec<T> {
        self.high.drain(..).chain(self.normal.drain(..)).collect()
    }
}

/**
 * Per-connection outbound queue, safe for many producers.
 * The lock is held only for the enqueue/dequeue itself, never across a write.
 */
#[derive(Debug)]
pub struct OutboundQueue<T> {
    fifo: Mutex<PriorityFifo<T>>,
    count: AtomicUsize,
}

impl<T> Default for OutboundQueue<T> {
    fn default() -> Self {
        Self {
            fifo: Mutex::new(PriorityFifo::default()),
            count: AtomicUsize::new(0),
        }
    }
}

impl<T: QueueItem> OutboundQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PriorityFifo<T>> {
        // No user code runs under this lock, so a poisoned queue is still consistent
        self.fifo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /**
     * Returns true when the queue went from empty to non-empty
     */
    pub fn push(&self, item: T) -> bool {
        let mut fifo = self.lock();
        let was_empty = fifo.is_empty();
        fifo.push(item);
        self.count.store(fifo.len(), Ordering::Release);
        was_empty
    }

    /**
     * Pushes a heartbeat unless one is already next in line.
     * A coalesced heartbeat is handed back in `Err`.
     */
    pub fn push_heartbeat(&self, item: T) -> Result<bool, T> {
        let mut fifo = self.lock();
        if fifo.peek().map_or(false, QueueItem::is_heartbeat) {
            return Err(item);
        }
        let was_empty = fifo.is_empty();
        fifo.push(item);
        self.count.store(fifo.len(), Ordering::Release);
        Ok(was_empty)
    }

    pub fn pop(&self) -> Option<T> {
        let mut fifo = self.lock();
        let item = fifo.pop();
        self.count.store(fifo.len(), Ordering::Release);
        item
    }

    pub fn peek_is_heartbeat(&self) -> bool {
        self.lock().peek().map_or(false, QueueItem::is_heartbeat)
    }

    /// Lock-free snapshot; may be stale by the time it is read
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn has_work(&self) -> bool {
        self.count() > 0
    }

    pub fn drain(&self) -> Vec<T> {
        let mut fifo = self.lock();
        let items = fifo.drain();
        self.count.store(0, Ordering::Release);
        items
    }
}
