//! Redis client pipeline: queues commands per connection, shares writer threads
//! fairly across connections, decodes chunked replies incrementally and hands
//! results back through pooled cells.

pub mod cell;
pub mod clock;
pub mod completion;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod multiplexer;
pub mod profiling;
pub mod queue;
pub mod resp;
pub mod runtime;
pub mod scheduler;

pub use cell::{Consumer, ResultCell, ResultCellPool, Waiter, WaiterPool};
pub use completion::{CompletionScheduler, CompletionStats};
pub use config::MultiplexerConfig;
pub use connection::{Connection, ConnectionId, WriteBudget, WriteOutcome};
pub use error::{ConnectionFailure, ProtocolError, RedisError};
pub use message::{Message, Redirect, RedirectKind};
pub use multiplexer::{Multiplexer, MultiplexerStats};
pub use profiling::{ProfiledCommand, ProfilingHandle, ProfilingRegistry};
pub use queue::{OutboundQueue, Priority};
pub use resp::{Command, CommandName, FromReply, RESPFrame};
pub use runtime::WorkerPool;
pub use scheduler::{WriteScheduler, WriterStats};
