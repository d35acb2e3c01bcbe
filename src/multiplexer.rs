use std::{
    future::Future,
    io::{self, Read, Write},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::Duration,
};

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::{
    cell::{Consumer, PoolRegistry},
    completion::{CompletionScheduler, CompletionStats},
    config::MultiplexerConfig,
    connection::{Connection, ConnectionId, WriteBudget},
    error::{ConnectionFailure, RedisError},
    message::{Message, Redirect},
    profiling::ProfilingRegistry,
    resp::{Command, FromReply, RESPFrame, RESPParser},
    runtime::WorkerPool,
    scheduler::{WriteScheduler, WriterSettings, WriterStats},
};

/**
 * Snapshot of pipeline activity
 */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiplexerStats {
    pub completions: CompletionStats,
    pub writer: WriterStats,
    pub connections: usize,
    /// Messages queued across all connections
    pub pending_writes: usize,
    /// Messages written and awaiting a reply across all connections
    pub awaiting_reply: usize,
    pub messages_written: u64,
}

/**
 * Client facade: owns the worker pool, the write and completion schedulers and
 * the result pools, and routes commands to attached connections.
 *
 * Everything here is built once and shared by reference; dropping the
 * multiplexer shuts it down.
 */
pub struct Multiplexer {
    config: MultiplexerConfig,
    writer: WriteScheduler,
    completions: Arc<CompletionScheduler>,
    results: PoolRegistry,
    profiling: Arc<ProfilingRegistry>,
    parser: RESPParser,
    connections: Mutex<Vec<Arc<Connection>>>,
    next_connection: AtomicU64,
    next_message: AtomicU64,
    shutting_down: AtomicBool,
}

impl Multiplexer {
    /**
     * Builds a multiplexer with its own worker pool
     */
    pub fn new(config: MultiplexerConfig) -> io::Result<Self> {
        let pool = WorkerPool::new(config.pool_threads)?;
        Ok(Self::with_pool(config, pool))
    }

    pub fn with_pool(config: MultiplexerConfig, pool: WorkerPool) -> Self {
        let settings = WriterSettings {
            dedicated: config.dedicated_writer,
            budget: WriteBudget {
                messages: config.writer_budget_messages,
                bytes: config.writer_budget_bytes,
                time: config.writer_budget_time,
            },
            helper_threshold: config.helper_threshold,
            idle_timeout: config.writer_idle_timeout,
        };

        Self {
            writer: WriteScheduler::new(settings, pool.clone()),
            completions: CompletionScheduler::new(pool, config.preserve_async_order, config.ordered_drain_spins),
            results: PoolRegistry::new(config.result_pool_capacity, config.waiter_pool_capacity),
            profiling: Arc::new(ProfilingRegistry::new()),
            parser: RESPParser::new(config.max_nesting_depth),
            connections: Mutex::new(vec![]),
            next_connection: AtomicU64::new(1),
            next_message: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            config,
        }
    }

    fn connections(&self) -> MutexGuard<'_, Vec<Arc<Connection>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &MultiplexerConfig {
        &self.config
    }

    /**
     * Attaches a connection writing into `sink`. Replies are pushed in with
     * `Connection::receive`.
     */
    pub fn attach(&self, name: impl Into<String>, sink: impl Write + Send + 'static) -> Arc<Connection> {
        let id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        let connection = Arc::new(Connection::new(
            id,
            name,
            Some(Box::new(sink)),
            self.parser,
            self.completions.clone(),
            self.profiling.clone(),
        ));
        if self.is_shutting_down() {
            connection.fail(ConnectionFailure::Closed);
        }

        info!(connection = %id, name = connection.name(), "connection attached");
        self.connections().push(connection.clone());
        connection
    }

    /**
     * Attaches a connection and starts a reader thread draining `source` into it
     */
    pub fn attach_stream(
        &self,
        name: impl Into<String>,
        source: impl Read + Send + 'static,
        sink: impl Write + Send + 'static,
    ) -> io::Result<Arc<Connection>> {
        let connection = self.attach(name, sink);
        let reader = connection.clone();
        let buffer_size = self.config.read_buffer_size;

        let spawned = thread::Builder::new()
            .name(format!("redis-mux-reader-{}", connection.id().0))
            .spawn(move || reader.read_loop(source, buffer_size));

        if let Err(err) = spawned {
            connection.fail(ConnectionFailure::Closed);
            return Err(err);
        }
        Ok(connection)
    }

    /**
     * Removes a connection, failing whatever it still has pending
     */
    pub fn detach(&self, connection: &Arc<Connection>) {
        self.connections().retain(|attached| !Arc::ptr_eq(attached, connection));
        connection.fail(ConnectionFailure::Closed);
        debug!(connection = %connection.id(), "connection detached");
    }

    /**
     * Queues a command whose outcome goes to `consumer`, returning the message id
     */
    pub fn submit<T: FromReply>(&self, connection: &Arc<Connection>, command: &Command, consumer: Consumer<T>) -> u64 {
        self.dispatch(connection, command, consumer, None)
    }

    /**
     * Resends a command the server redirected, recording which message it retries
     */
    pub fn resubmit<T: FromReply>(
        &self,
        connection: &Arc<Connection>,
        command: &Command,
        consumer: Consumer<T>,
        previous: u64,
        redirect: Redirect,
    ) -> u64 {
        self.dispatch(connection, command, consumer, Some((previous, redirect)))
    }

    fn dispatch<T: FromReply>(
        &self,
        connection: &Arc<Connection>,
        command: &Command,
        consumer: Consumer<T>,
        lineage: Option<(u64, Redirect)>,
    ) -> u64 {
        let id = self.next_message.fetch_add(1, Ordering::Relaxed);
        let mut cell = self.results.get::<T>().cells.acquire(consumer);

        if self.is_shutting_down() {
            cell.set_failure(RedisError::ShuttingDown);
            self.completions.complete(cell);
            return id;
        }

        let mut message = Message::new(id, command, cell);
        if let Some((previous, redirect)) = lineage {
            message = message.retrying(previous, redirect);
        }
        connection.enqueue(message);
        self.writer.schedule(connection);
        id
    }

    /**
     * Runs a command and blocks for its reply, up to the configured sync timeout
     */
    pub fn execute<T: FromReply>(&self, connection: &Arc<Connection>, command: Command) -> Result<T, RedisError> {
        self.execute_timeout(connection, command, self.config.sync_timeout)
    }

    pub fn execute_timeout<T: FromReply>(
        &self,
        connection: &Arc<Connection>,
        command: Command,
        timeout: Duration,
    ) -> Result<T, RedisError> {
        let pools = self.results.get::<T>();
        let waiter = pools.waiters.acquire();
        self.submit(connection, &command, Consumer::Blocking(waiter.clone()));

        let outcome = waiter.wait(timeout);
        pools.waiters.release(waiter);
        outcome.unwrap_or(Err(RedisError::Timeout(timeout)))
    }

    /**
     * Runs a command and hands its outcome to `callback` on a worker thread.
     * Callbacks run in reply order unless ordering is disabled in the config.
     */
    pub fn execute_with<T, F>(&self, connection: &Arc<Connection>, command: Command, callback: F) -> u64
    where
        T: FromReply,
        F: FnOnce(Result<T, RedisError>) + Send + 'static,
    {
        self.submit(connection, &command, Consumer::Callback(Box::new(callback)))
    }

    /**
     * Queues a command now and returns a future for its reply.
     * The command is submitted even if the future is never polled.
     */
    pub fn execute_async<T: FromReply>(
        &self,
        connection: &Arc<Connection>,
        command: Command,
    ) -> impl Future<Output = Result<T, RedisError>> + Send + 'static {
        let (sender, receiver) = oneshot::channel();
        self.submit(connection, &command, Consumer::Future(sender));

        async move { receiver.await.unwrap_or(Err(RedisError::Abandoned)) }
    }

    /**
     * Queues a command whose reply nobody waits for
     */
    pub fn send(&self, connection: &Arc<Connection>, command: Command) -> u64 {
        self.submit::<RESPFrame>(connection, &command, Consumer::Detached)
    }

    /**
     * Queues a high-priority PING unless one is already next in line.
     * Returns false when it was coalesced.
     */
    pub fn heartbeat(&self, connection: &Arc<Connection>) -> bool {
        if self.is_shutting_down() {
            return false;
        }
        let id = self.next_message.fetch_add(1, Ordering::Relaxed);
        let cell = self.results.get::<RESPFrame>().cells.acquire(Consumer::Detached);
        let message = Message::new(id, &Command::ping().high_priority(), cell);

        let queued = connection.enqueue_heartbeat(message);
        self.writer.schedule(connection);
        queued
    }

    /**
     * Runs one write pass on the calling thread. Without a dedicated writer this
     * is how queued messages reach the wire between helper passes.
     */
    pub fn pump(&self) -> bool {
        self.writer.pump()
    }

    pub fn profiling(&self) -> &ProfilingRegistry {
        &self.profiling
    }

    /**
     * Installs a hook told about every panic raised by completion callbacks
     */
    pub fn on_internal_error(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.completions.set_internal_error_handler(Arc::new(handler));
    }

    pub fn stats(&self) -> MultiplexerStats {
        let connections = self.connections();

        MultiplexerStats {
            completions: self.completions.stats(),
            writer: self.writer.stats(),
            connections: connections.len(),
            pending_writes: connections.iter().map(|c| c.pending_writes()).sum(),
            awaiting_reply: connections.iter().map(|c| c.awaiting_reply()).sum(),
            messages_written: connections.iter().map(|c| c.messages_written()).sum(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /**
     * Stops writing and fails everything still pending. Later submissions
     * fail with `ShuttingDown`.
     */
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("multiplexer shutting down");
        self.writer.shutdown();

        let connections: Vec<_> = self.connections().drain(..).collect();
        for connection in connections {
            connection.fail(ConnectionFailure::Closed);
        }
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
