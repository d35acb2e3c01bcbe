use std::{
    collections::VecDeque,
    fmt,
    io::{BufWriter, ErrorKind, Read, Write},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, TryLockError,
    },
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::{
    cell::ReplySink,
    clock::Clock,
    completion::CompletionScheduler,
    error::{ConnectionFailure, RedisError},
    message::Message,
    profiling::{ProfiledCommand, ProfilingRegistry},
    queue::OutboundQueue,
    resp::{RESPFrame, RESPParser, ReplyDecoder},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub type Transport = Box<dyn Write + Send>;

/**
 * Limits on how much one writer pass may send for a single connection
 * before rotating to the next one
 */
#[derive(Debug, Clone, Copy)]
pub struct WriteBudget {
    pub messages: usize,
    pub bytes: usize,
    pub time: Duration,
}

impl Default for WriteBudget {
    fn default() -> Self {
        Self {
            messages: 128,
            bytes: 64 * 1024,
            time: Duration::from_millis(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Budget ran out with messages still queued
    MoreWork,
    /// The queue was emptied
    Drained,
    /// Another writer holds the transport
    Busy,
    /// Nothing to write to
    NoTransport,
    /// The write failed and the connection was failed with it
    Failed,
}

/**
 * One server connection: an outbound queue, the transport it drains into and
 * the FIFO of messages awaiting replies.
 *
 * Replies are matched to requests strictly in send order. A message joins the
 * in-flight list before its bytes are written, under the transport lock, so
 * the list order is the wire order.
 */
pub struct Connection {
    id: ConnectionId,
    name: String,
    queue: OutboundQueue<Message>,
    scheduled: AtomicBool,
    transport: Mutex<Option<BufWriter<Transport>>>,
    in_flight: Mutex<VecDeque<Message>>,
    decoder: Mutex<ReplyDecoder>,
    failure: Mutex<Option<ConnectionFailure>>,
    failed: AtomicBool,
    completions: Arc<CompletionScheduler>,
    profiling: Arc<ProfilingRegistry>,
    written: AtomicU64,
    last_write: Mutex<Option<Instant>>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        name: impl Into<String>,
        transport: Option<Transport>,
        parser: RESPParser,
        completions: Arc<CompletionScheduler>,
        profiling: Arc<ProfilingRegistry>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            queue: OutboundQueue::new(),
            scheduled: AtomicBool::new(false),
            transport: Mutex::new(transport.map(BufWriter::new)),
            in_flight: Mutex::new(VecDeque::new()),
            decoder: Mutex::new(ReplyDecoder::new(parser)),
            failure: Mutex::new(None),
            failed: AtomicBool::new(false),
            completions,
            profiling,
            written: AtomicU64::new(0),
            last_write: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn failure(&self) -> Option<ConnectionFailure> {
        lock(&self.failure).clone()
    }

    /// Messages queued but not yet written
    pub fn pending_writes(&self) -> usize {
        self.queue.count()
    }

    pub fn has_pending_writes(&self) -> bool {
        self.queue.has_work()
    }

    /// Messages written and still waiting for a reply
    pub fn awaiting_reply(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn messages_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn last_write(&self) -> Option<Instant> {
        *lock(&self.last_write)
    }

    /**
     * Queues a message. On a failed connection the message is failed right away.
     * Returns true when the queue went from empty to non-empty.
     */
    pub fn enqueue(&self, message: Message) -> bool {
        if self.is_failed() {
            self.reject(message);
            return false;
        }
        let became_ready = self.queue.push(message);
        // A failure racing this push may have drained the queue before it landed
        if self.is_failed() {
            self.fail_queued();
        }
        became_ready
    }

    /**
     * Queues a heartbeat unless one is already next to be written.
     * Returns false when it was coalesced with the queued one.
     */
    pub fn enqueue_heartbeat(&self, message: Message) -> bool {
        if self.is_failed() {
            self.reject(message);
            return false;
        }
        match self.queue.push_heartbeat(message) {
            Ok(_) => {
                if self.is_failed() {
                    self.fail_queued();
                }
                true
            }
            Err(coalesced) => {
                trace!(connection = %self.id, "heartbeat coalesced");
                self.completions.complete(Self::resolve(coalesced.into_sink(), Ok(RESPFrame::simple("PONG"))));
                false
            }
        }
    }

    /**
     * Claims a place in the writer rotation. Returns false when the
     * connection is already scheduled.
     */
    pub(crate) fn try_mark_scheduled(&self) -> bool {
        !self.scheduled.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_scheduled(&self) {
        self.scheduled.swap(false, Ordering::AcqRel);
    }

    /**
     * Leaves the writer rotation after a pass emptied the queue. Returns true
     * when a message landed meanwhile and the connection was claimed again, in
     * which case the caller must put it back in the rotation.
     *
     * The clear is a read-modify-write: a producer whose claim still saw the
     * flag set is then ordered before it, so its message is visible to the
     * re-check below.
     */
    pub(crate) fn release_scheduled(&self) -> bool {
        self.clear_scheduled();
        self.has_pending_writes() && self.try_mark_scheduled()
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    /**
     * Writes queued messages until the queue is empty or the budget is spent.
     * Never waits for the transport: a connection another writer is serving is `Busy`.
     */
    pub fn write_pending(&self, budget: &WriteBudget) -> WriteOutcome {
        let mut transport = match self.transport.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return WriteOutcome::Busy,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        let writer = match transport.as_mut() {
            Some(writer) => writer,
            None => return WriteOutcome::NoTransport,
        };

        let started = Instant::now();
        let mut messages = 0;
        let mut bytes = 0;

        while messages < budget.messages && bytes < budget.bytes && started.elapsed() < budget.time && !self.is_failed() {
            let mut message = match self.queue.pop() {
                Some(message) => message,
                None => break,
            };
            let payload = message.payload().clone();
            message.mark_sent();
            if let Some(previous) = message.retry_of() {
                debug!(connection = %self.id, message = message.id(), retry_of = previous, "resending redirected command");
            }
            lock(&self.in_flight).push_back(message);

            if let Err(err) = writer.write_all(&payload) {
                *transport = None;
                drop(transport);
                self.fail(err.into());
                return WriteOutcome::Failed;
            }
            messages += 1;
            bytes += payload.len();
        }

        if let Err(err) = writer.flush() {
            *transport = None;
            drop(transport);
            self.fail(err.into());
            return WriteOutcome::Failed;
        }

        if messages > 0 {
            self.written.fetch_add(messages as u64, Ordering::Relaxed);
            *lock(&self.last_write) = Some(Clock::now());
            trace!(connection = %self.id, messages, bytes, "wrote batch");
        }

        // Failed while this pass held the transport: anything it moved in flight
        // after the failure drained the list would otherwise never complete
        if self.is_failed() {
            *transport = None;
            drop(transport);
            self.fail_pending();
            return WriteOutcome::Failed;
        }

        if self.queue.has_work() {
            WriteOutcome::MoreWork
        } else {
            WriteOutcome::Drained
        }
    }

    /**
     * Feeds bytes read from the server, completing every reply they finish.
     * A framing error fails the connection.
     */
    pub fn receive(&self, chunk: Bytes) -> Result<usize, ConnectionFailure> {
        let mut decoder = lock(&self.decoder);
        decoder.feed(chunk);

        let mut completed = 0;
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    self.complete_next(frame)?;
                    completed += 1;
                }
                Ok(None) => return Ok(completed),
                Err(err) => {
                    drop(decoder);
                    let failure = ConnectionFailure::from(err);
                    self.fail(failure.clone());
                    return Err(failure);
                }
            }
        }
    }

    fn complete_next(&self, frame: RESPFrame) -> Result<(), ConnectionFailure> {
        // Bound first so the in-flight lock is released before `fail` takes it again
        let next = lock(&self.in_flight).pop_front();
        let message = match next {
            Some(message) => message,
            None => {
                warn!(connection = %self.id, "reply arrived with nothing awaiting it");
                let failure = ConnectionFailure::Unsolicited;
                self.fail(failure.clone());
                return Err(failure);
            }
        };

        if let Some(handle) = message.profile() {
            self.profiling.record(
                handle,
                ProfiledCommand {
                    command: message.name(),
                    connection: self.id,
                    enqueued_at: message.enqueued_at,
                    sent_at: message.sent_at(),
                    replied_at: Clock::now(),
                    succeeded: !frame.is_error(),
                },
            );
        }

        self.completions.complete(Self::resolve(message.into_sink(), Ok(frame)));
        Ok(())
    }

    /**
     * Blocks reading from `source` until it closes or fails, feeding every
     * chunk to `receive`. Meant to run on a thread of its own.
     */
    pub fn read_loop(&self, mut source: impl Read, buffer_size: usize) {
        let mut buffer = BytesMut::new();
        debug!(connection = %self.id, name = %self.name, "reader started");

        loop {
            buffer.resize(buffer_size, 0);
            let read = match source.read(&mut buffer[..]) {
                Ok(0) => {
                    self.fail(ConnectionFailure::Closed);
                    break;
                }
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.fail(err.into());
                    break;
                }
            };

            let chunk = buffer.split_to(read).freeze();
            if self.receive(chunk).is_err() {
                break;
            }
        }

        debug!(connection = %self.id, "reader stopped");
    }

    /**
     * Takes the connection out of service, failing everything queued or in flight
     * with the same error. Only the first failure is recorded.
     */
    pub fn fail(&self, failure: ConnectionFailure) {
        {
            let mut recorded = lock(&self.failure);
            if recorded.is_none() {
                warn!(connection = %self.id, name = %self.name, error = %failure, "connection failed");
                *recorded = Some(failure);
            }
            self.failed.store(true, Ordering::Release);
        }

        // A writer holding the transport drops it itself on its way out
        if let Ok(mut transport) = self.transport.try_lock() {
            *transport = None;
        }
        self.fail_pending();
    }

    fn fail_pending(&self) {
        let in_flight: Vec<_> = lock(&self.in_flight).drain(..).collect();
        for message in in_flight {
            self.reject(message);
        }
        self.fail_queued();
    }

    fn fail_queued(&self) {
        for message in self.queue.drain() {
            self.reject(message);
        }
    }

    fn reject(&self, message: Message) {
        let error = self.failure_error();
        self.completions.complete(Self::resolve(message.into_sink(), Err(error)));
    }

    fn failure_error(&self) -> RedisError {
        RedisError::Connection {
            connection: self.id,
            failure: self.failure().unwrap_or(ConnectionFailure::Closed),
        }
    }

    fn resolve(mut sink: Box<dyn ReplySink>, outcome: Result<RESPFrame, RedisError>) -> Box<dyn ReplySink> {
        match outcome {
            Ok(frame) => sink.set_reply(frame),
            Err(error) => sink.set_error(error),
        }
        sink
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pending_writes", &self.pending_writes())
            .field("failed", &self.is_failed())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        io::{self, Cursor},
        sync::mpsc,
        time::Duration,
    };

    use super::*;
    use crate::{
        cell::{Consumer, ResultCellPool, Waiter},
        resp::Command,
        runtime::WorkerPool,
    };

    /**
     * Transport capturing everything written, optionally failing after a number of writes
     */
    #[derive(Clone, Default)]
    pub(crate) struct MemoryTransport {
        pub written: Arc<Mutex<Vec<u8>>>,
        pub fail_after: Option<usize>,
        pub writes: Arc<AtomicU64>,
    }

    impl Write for MemoryTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let writes = self.writes.fetch_add(1, Ordering::SeqCst) as usize;
            if self.fail_after.map_or(false, |limit| writes >= limit) {
                return Err(io::Error::new(ErrorKind::BrokenPipe, "peer went away"));
            }
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /**
     * Holds the transport as a concurrent writer would, so passes see the connection as busy
     */
    pub(crate) fn hold_transport(connection: &Connection) -> MutexGuard<'_, Option<BufWriter<Transport>>> {
        connection.transport.lock().unwrap()
    }

    pub(crate) fn connection_with(transport: MemoryTransport) -> Arc<Connection> {
        let completions = CompletionScheduler::new(WorkerPool::new(2).unwrap(), true, 4);
        Arc::new(Connection::new(
            ConnectionId(1),
            "test",
            Some(Box::new(transport)),
            RESPParser::default(),
            completions,
            Arc::new(ProfilingRegistry::new()),
        ))
    }

    fn blocking(pool: &Arc<ResultCellPool<RESPFrame>>, id: u64, command: Command) -> (Message, Arc<Waiter<RESPFrame>>) {
        let waiter = Arc::new(Waiter::default());
        let cell = pool.acquire(Consumer::Blocking(waiter.clone()));
        (Message::new(id, &command, cell), waiter)
    }

    fn outcome(waiter: &Waiter<RESPFrame>) -> Result<RESPFrame, RedisError> {
        waiter.wait(Duration::from_secs(5)).expect("no outcome delivered")
    }

    #[test]
    fn should_display_id_with_hash() {
        assert_eq!("#12", ConnectionId(12).to_string());
    }

    #[test]
    fn should_write_queue_and_match_replies_in_order() {
        let transport = MemoryTransport::default();
        let connection = connection_with(transport.clone());
        let pool = ResultCellPool::new(4);

        let (get, get_waiter) = blocking(&pool, 1, Command::new("GET").arg("k"));
        let (ping, ping_waiter) = blocking(&pool, 2, Command::ping());
        assert!(connection.enqueue(get));
        assert!(!connection.enqueue(ping));

        assert_eq!(WriteOutcome::Drained, connection.write_pending(&WriteBudget::default()));
        assert_eq!(
            b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n*1\r\n$4\r\nPING\r\n".to_vec(),
            *transport.written.lock().unwrap()
        );
        assert_eq!(2, connection.awaiting_reply());

        // Replies split across reads
        assert_eq!(0, connection.receive(Bytes::from_static(b"$5\r\nval")).unwrap());
        assert_eq!(2, connection.receive(Bytes::from_static(b"ue\r\n+PONG\r\n")).unwrap());

        assert_eq!(RESPFrame::bulk("value"), outcome(&get_waiter).unwrap());
        assert_eq!(RESPFrame::simple("PONG"), outcome(&ping_waiter).unwrap());
        assert_eq!(0, connection.awaiting_reply());
        assert_eq!(2, connection.messages_written());
    }

    #[test]
    fn should_stop_at_message_budget() {
        let connection = connection_with(MemoryTransport::default());
        let pool = ResultCellPool::<RESPFrame>::new(4);
        for id in 0..5 {
            connection.enqueue(Message::new(id, &Command::ping(), pool.acquire(Consumer::Detached)));
        }
        let budget = WriteBudget {
            messages: 2,
            ..WriteBudget::default()
        };

        assert_eq!(WriteOutcome::MoreWork, connection.write_pending(&budget));
        assert_eq!(WriteOutcome::MoreWork, connection.write_pending(&budget));
        assert_eq!(WriteOutcome::Drained, connection.write_pending(&budget));
        assert_eq!(5, connection.messages_written());
    }

    #[test]
    fn should_report_busy_when_transport_is_held() {
        let connection = connection_with(MemoryTransport::default());
        let _held = hold_transport(&connection);

        assert_eq!(WriteOutcome::Busy, connection.write_pending(&WriteBudget::default()));
    }

    #[test]
    fn should_fail_every_pending_message_on_write_error() {
        let transport = MemoryTransport {
            fail_after: Some(0),
            ..MemoryTransport::default()
        };
        let connection = connection_with(transport);
        let pool = ResultCellPool::new(4);
        // A budget this small makes the buffered writer hit the transport immediately
        let (first, first_waiter) = blocking(&pool, 1, Command::new("SET").arg("k").arg(vec![b'x'; 16 * 1024]));
        let (second, second_waiter) = blocking(&pool, 2, Command::ping());
        connection.enqueue(first);
        connection.enqueue(second);

        assert_eq!(WriteOutcome::Failed, connection.write_pending(&WriteBudget::default()));

        for waiter in [&first_waiter, &second_waiter] {
            match outcome(waiter) {
                Err(RedisError::Connection {
                    connection: id,
                    failure: ConnectionFailure::Io(_),
                }) => assert_eq!(ConnectionId(1), id),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert!(connection.is_failed());
        assert_eq!(WriteOutcome::NoTransport, connection.write_pending(&WriteBudget::default()));
    }

    #[test]
    fn should_fail_messages_enqueued_after_failure() {
        let connection = connection_with(MemoryTransport::default());
        let pool = ResultCellPool::new(2);
        connection.fail(ConnectionFailure::Closed);

        let (late, waiter) = blocking(&pool, 1, Command::ping());
        assert!(!connection.enqueue(late));

        assert!(matches!(
            outcome(&waiter),
            Err(RedisError::Connection {
                failure: ConnectionFailure::Closed,
                ..
            })
        ));
        assert_eq!(0, connection.pending_writes());
    }

    #[test]
    fn should_fail_connection_on_malformed_reply() {
        let connection = connection_with(MemoryTransport::default());
        let pool = ResultCellPool::new(2);
        let (get, waiter) = blocking(&pool, 1, Command::new("GET").arg("k"));
        connection.enqueue(get);
        connection.write_pending(&WriteBudget::default());

        assert!(matches!(
            connection.receive(Bytes::from_static(b"?oops\r\n")),
            Err(ConnectionFailure::Protocol(_))
        ));
        assert!(matches!(
            outcome(&waiter),
            Err(RedisError::Connection {
                failure: ConnectionFailure::Protocol(_),
                ..
            })
        ));
    }

    #[test]
    fn should_fail_connection_on_unsolicited_reply() {
        let connection = connection_with(MemoryTransport::default());

        assert!(matches!(
            connection.receive(Bytes::from_static(b"+OK\r\n")),
            Err(ConnectionFailure::Unsolicited)
        ));
        assert!(connection.is_failed());
        assert_eq!(0, connection.awaiting_reply());
    }

    #[test]
    fn should_fail_queued_messages_on_unsolicited_reply() {
        let connection = connection_with(MemoryTransport::default());
        let pool = ResultCellPool::new(2);
        let (queued, waiter) = blocking(&pool, 1, Command::ping());
        connection.enqueue(queued);

        assert!(connection.receive(Bytes::from_static(b"+OK\r\n")).is_err());

        assert!(matches!(
            outcome(&waiter),
            Err(RedisError::Connection {
                failure: ConnectionFailure::Unsolicited,
                ..
            })
        ));
        assert_eq!(0, connection.pending_writes());
    }

    #[test]
    fn should_reclaim_rotation_when_work_lands_before_release() {
        let connection = connection_with(MemoryTransport::default());
        let pool = ResultCellPool::<RESPFrame>::new(2);
        assert!(connection.try_mark_scheduled());

        // A producer racing the writer: its claim sees the flag still set
        connection.enqueue(Message::new(1, &Command::ping(), pool.acquire(Consumer::Detached)));
        assert!(!connection.try_mark_scheduled());

        assert!(connection.release_scheduled());
        assert!(connection.is_scheduled());
    }

    #[test]
    fn should_leave_rotation_when_queue_stays_empty() {
        let connection = connection_with(MemoryTransport::default());
        assert!(connection.try_mark_scheduled());

        assert!(!connection.release_scheduled());
        assert!(!connection.is_scheduled());
        assert!(connection.try_mark_scheduled());
    }

    #[test]
    fn should_coalesce_heartbeats() {
        let transport = MemoryTransport::default();
        let connection = connection_with(transport.clone());
        let pool = ResultCellPool::<RESPFrame>::new(4);

        assert!(connection.enqueue_heartbeat(Message::new(1, &Command::ping().high_priority(), pool.acquire(Consumer::Detached))));
        assert!(!connection.enqueue_heartbeat(Message::new(2, &Command::ping().high_priority(), pool.acquire(Consumer::Detached))));
        connection.write_pending(&WriteBudget::default());

        assert_eq!(b"*1\r\n$4\r\nPING\r\n".to_vec(), *transport.written.lock().unwrap());
    }

    #[test]
    fn should_read_until_source_closes() {
        let connection = connection_with(MemoryTransport::default());
        let pool = ResultCellPool::new(4);
        let (sender, receiver) = mpsc::channel();
        let callback = pool.acquire(Consumer::Callback(Box::new(move |outcome: Result<RESPFrame, RedisError>| {
            sender.send(outcome).unwrap()
        })));
        let (after, after_waiter) = blocking(&pool, 2, Command::ping());
        connection.enqueue(Message::new(1, &Command::new("ECHO").arg("hi"), callback));
        connection.enqueue(after);
        connection.write_pending(&WriteBudget::default());

        // Only the first reply is ever sent; the second request sees the close
        connection.read_loop(Cursor::new(b"$2\r\nhi\r\n".to_vec()), 4);

        assert_eq!(
            RESPFrame::bulk("hi"),
            receiver.recv_timeout(Duration::from_secs(5)).unwrap().unwrap()
        );
        assert!(matches!(
            outcome(&after_waiter),
            Err(RedisError::Connection {
                failure: ConnectionFailure::Closed,
                ..
            })
        ));
    }
}

#[cfg(test)]
mod concurrent_tests {
    use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use loom::sync::{Arc, Mutex};
    use loom::thread;

    /**
     * The queue count and scheduled flag of a connection, driven with the same
     * orderings as `OutboundQueue` and `Connection`
     */
    struct Rotation {
        queue: Mutex<usize>,
        count: AtomicUsize,
        scheduled: AtomicBool,
    }

    impl Rotation {
        fn push(&self) {
            let mut queue = self.queue.lock().unwrap();
            *queue += 1;
            self.count.store(*queue, Ordering::Release);
        }

        fn drain(&self) {
            let mut queue = self.queue.lock().unwrap();
            *queue = 0;
            self.count.store(0, Ordering::Release);
        }

        fn try_mark_scheduled(&self) -> bool {
            !self.scheduled.swap(true, Ordering::AcqRel)
        }

        /// `WriteScheduler::schedule`
        fn schedule(&self) -> bool {
            self.count.load(Ordering::Acquire) > 0 && self.try_mark_scheduled()
        }

        /// `Connection::release_scheduled`
        fn release_scheduled(&self) -> bool {
            self.scheduled.swap(false, Ordering::AcqRel);
            self.count.load(Ordering::Acquire) > 0 && self.try_mark_scheduled()
        }
    }

    #[test]
    fn simulate_producer_racing_a_drained_writer() {
        // The writer holds the rotation slot and has just emptied the queue while
        // a producer pushes; whatever the interleaving, queued work stays in rotation
        loom::model(|| {
            let rotation = Arc::new(Rotation {
                queue: Mutex::new(0),
                count: AtomicUsize::new(0),
                scheduled: AtomicBool::new(true),
            });

            let writer = {
                let rotation = rotation.clone();
                thread::spawn(move || {
                    rotation.drain();
                    rotation.release_scheduled()
                })
            };
            let producer = {
                let rotation = rotation.clone();
                thread::spawn(move || {
                    rotation.push();
                    rotation.schedule()
                })
            };

            let requeued = writer.join().unwrap();
            let claimed = producer.join().unwrap();

            assert!(!(requeued && claimed), "connection put in rotation twice");
            if *rotation.queue.lock().unwrap() > 0 {
                assert!(requeued || claimed, "queued message left out of rotation");
            }
        });
    }
}
