//! Multiplexer configuration

use std::{str::FromStr, time::Duration};

use crate::resp::parser::DEFAULT_MAX_DEPTH;

/**
 * Tuning for the write, completion and pooling machinery.
 * `helper_threshold` and `writer_idle_timeout` are tuning knobs, not correctness requirements.
 */
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// Deliver callback completions in submission order
    pub preserve_async_order: bool,

    /// Run a long-lived writer thread; without it writes only happen through
    /// helper passes and explicit pumping
    pub dedicated_writer: bool,

    /// Messages one connection may write before yielding to the next
    pub writer_budget_messages: usize,

    /// Bytes one connection may write before yielding to the next
    pub writer_budget_bytes: usize,

    /// Time one connection may hold a writer before yielding
    pub writer_budget_time: Duration,

    /// Ready-connection backlog at which a helper write pass is spawned
    pub helper_threshold: usize,

    /// How long the dedicated writer waits for work before exiting
    pub writer_idle_timeout: Duration,

    /// Re-checks an ordered completion worker makes before exiting on an empty queue
    pub ordered_drain_spins: usize,

    /// Free-list capacity per result type
    pub result_pool_capacity: usize,

    /// Free-list capacity of blocking waiters per result type
    pub waiter_pool_capacity: usize,

    /// Default wait for blocking calls
    pub sync_timeout: Duration,

    /// Threads in the general-purpose pool
    pub pool_threads: usize,

    /// Read size of per-connection reader threads
    pub read_buffer_size: usize,

    /// Deepest reply nesting accepted before the connection is failed
    pub max_nesting_depth: usize,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        let num_cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            preserve_async_order: true,
            dedicated_writer: true,
            writer_budget_messages: 128,
            writer_budget_bytes: 64 * 1024,
            writer_budget_time: Duration::from_millis(5),
            helper_threshold: 2,
            writer_idle_timeout: Duration::from_secs(20),
            ordered_drain_spins: 8,
            result_pool_capacity: 32,
            waiter_pool_capacity: 16,
            sync_timeout: Duration::from_secs(5),
            pool_threads: num_cpus.max(2),
            read_buffer_size: 16 * 1024,
            max_nesting_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl MultiplexerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /**
     * Defaults overridden by `REDIS_MUX_*` environment variables.
     * Durations are in milliseconds; unparsable values keep the default.
     */
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            preserve_async_order: env_get_bool("REDIS_MUX_PRESERVE_ORDER", defaults.preserve_async_order),
            dedicated_writer: env_get_bool("REDIS_MUX_DEDICATED_WRITER", defaults.dedicated_writer),
            writer_budget_messages: env_get("REDIS_MUX_WRITER_BUDGET_MESSAGES", defaults.writer_budget_messages),
            writer_budget_bytes: env_get("REDIS_MUX_WRITER_BUDGET_BYTES", defaults.writer_budget_bytes),
            writer_budget_time: env_get_millis("REDIS_MUX_WRITER_BUDGET_MS", defaults.writer_budget_time),
            helper_threshold: env_get("REDIS_MUX_HELPER_THRESHOLD", defaults.helper_threshold),
            writer_idle_timeout: env_get_millis("REDIS_MUX_WRITER_IDLE_MS", defaults.writer_idle_timeout),
            ordered_drain_spins: env_get("REDIS_MUX_ORDERED_DRAIN_SPINS", defaults.ordered_drain_spins),
            result_pool_capacity: env_get("REDIS_MUX_RESULT_POOL", defaults.result_pool_capacity),
            waiter_pool_capacity: env_get("REDIS_MUX_WAITER_POOL", defaults.waiter_pool_capacity),
            sync_timeout: env_get_millis("REDIS_MUX_SYNC_TIMEOUT_MS", defaults.sync_timeout),
            pool_threads: env_get("REDIS_MUX_POOL_THREADS", defaults.pool_threads),
            read_buffer_size: env_get("REDIS_MUX_READ_BUFFER", defaults.read_buffer_size),
            max_nesting_depth: env_get("REDIS_MUX_MAX_NESTING", defaults.max_nesting_depth),
        }
    }

    pub fn preserve_async_order(mut self, preserve: bool) -> Self {
        self.preserve_async_order = preserve;
        self
    }

    pub fn dedicated_writer(mut self, enabled: bool) -> Self {
        self.dedicated_writer = enabled;
        self
    }

    pub fn writer_budget(mut self, messages: usize, bytes: usize, time: Duration) -> Self {
        self.writer_budget_messages = messages.max(1);
        self.writer_budget_bytes = bytes.max(1);
        self.writer_budget_time = time;
        self
    }

    pub fn helper_threshold(mut self, depth: usize) -> Self {
        self.helper_threshold = depth;
        self
    }

    pub fn writer_idle_timeout(mut self, timeout: Duration) -> Self {
        self.writer_idle_timeout = timeout;
        self
    }

    pub fn ordered_drain_spins(mut self, spins: usize) -> Self {
        self.ordered_drain_spins = spins;
        self
    }

    pub fn pool_capacities(mut self, results: usize, waiters: usize) -> Self {
        self.result_pool_capacity = results;
        self.waiter_pool_capacity = waiters;
        self
    }

    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn pool_threads(mut self, threads: usize) -> Self {
        self.pool_threads = threads.max(1);
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(64);
        self
    }

    pub fn max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }
}

fn env_get<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn env_get_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
