use std::{fmt, io, sync::Arc, time::Duration};

use thiserror::Error;

use crate::connection::ConnectionId;

/**
 * Framing errors raised while decoding inbound bytes.
 * Any of these is fatal to the connection that produced them.
 */
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("expected line terminator at offset {position}")]
    InvalidTerminator { position: u64 },

    #[error("invalid type prefix {0:#04x}")]
    InvalidPrefix(u8),

    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    #[error("invalid length: {0}")]
    InvalidLength(i64),

    #[error("reply nesting deeper than {0}")]
    NestingTooDeep(usize),
}

/**
 * Why a connection stopped accepting work
 */
#[derive(Debug, Clone, Error)]
pub enum ConnectionFailure {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("io error: {0}")]
    Io(Arc<io::Error>),

    #[error("connection closed")]
    Closed,

    /// The server replied while nothing was awaiting a reply
    #[error("unsolicited reply")]
    Unsolicited,
}

impl From<io::Error> for ConnectionFailure {
    fn from(err: io::Error) -> ConnectionFailure {
        ConnectionFailure::Io(Arc::new(err))
    }
}

/**
 * Outcome of a failed command as seen by the caller.
 * Cloneable so that one connection failure can be handed to every pending command.
 */
#[derive(Debug, Clone, Error)]
pub enum RedisError {
    /// Error reply sent by the server
    #[error("server error: {0}")]
    Server(String),

    #[error("connection {connection} failed: {failure}")]
    Connection {
        connection: ConnectionId,
        failure: ConnectionFailure,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("multiplexer is shutting down")]
    ShuttingDown,

    /// The pending result was discarded before anything completed it
    #[error("result abandoned before completion")]
    Abandoned,
}

impl RedisError {
    /**
     * True for failures that took the whole connection down,
     * as opposed to a failure of this one command
     */
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, RedisError::Connection { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RedisError::Timeout(_))
    }

    pub(crate) fn unexpected(expected: &str, got: impl fmt::Debug) -> RedisError {
        RedisError::UnexpectedReply(format!("expected {}, got {:?}", expected, got))
    }
}
