use std::{fmt, str::from_utf8};

use bytes::{BufMut, Bytes, BytesMut};

use super::token::RESPToken;
use crate::{profiling::ProfilingHandle, queue::Priority};

pub const INLINE_NAME_CAPACITY: usize = 23;

/**
 * Command name stored inline, without a heap allocation.
 * Names longer than the inline capacity are truncated; the name is a label for
 * matching and diagnostics, the full name is still what goes on the wire.
 */
#[derive(Clone, Copy)]
pub struct CommandName {
    bytes: [u8; INLINE_NAME_CAPACITY],
    len: u8,
}

impl CommandName {
    pub fn new(name: &[u8]) -> Self {
        let len = name.len().min(INLINE_NAME_CAPACITY);
        let mut bytes = [0u8; INLINE_NAME_CAPACITY];
        bytes[..len].copy_from_slice(&name[..len]);
        Self { bytes, len: len as u8 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn eq_ignore_ascii_case(&self, other: &[u8]) -> bool {
        let mine = self.as_bytes();
        mine.len() == other.len()
            && mine
                .iter()
                .zip(other)
                .all(|(a, b)| a.to_ascii_uppercase() == b.to_ascii_uppercase())
    }
}

impl PartialEq for CommandName {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for CommandName {}

impl fmt::Debug for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandName({})", self)
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match from_utf8(self.as_bytes()) {
            Ok(name) => f.write_str(name),
            Err(_) => write!(f, "{:?}", self.as_bytes()),
        }
    }
}

/**
 * Redis command, encoded as a RESP array of bulk strings.
 * Arguments are encoded as they are added so encoding the whole command is one copy.
 */
#[derive(Debug, Clone)]
pub struct Command {
    name: CommandName,
    wire_name: Bytes,
    args: BytesMut,
    argc: usize,
    priority: Priority,
    profile: Option<ProfilingHandle>,
}

impl Command {
    pub fn new(name: impl AsRef<[u8]>) -> Self {
        let name = name.as_ref();
        Self {
            name: CommandName::new(name),
            wire_name: Bytes::copy_from_slice(name),
            args: BytesMut::new(),
            argc: 0,
            priority: Priority::Normal,
            profile: None,
        }
    }

    pub fn ping() -> Self {
        Self::new("PING")
    }

    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        RESPToken::BulkString(arg.as_ref()).encode(&mut self.args);
        self.argc += 1;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn high_priority(self) -> Self {
        self.with_priority(Priority::High)
    }

    /**
     * Attributes this command's timings to a registered profiling session
     */
    pub fn profiled(mut self, handle: ProfilingHandle) -> Self {
        self.profile = Some(handle);
        self
    }

    pub fn name(&self) -> CommandName {
        self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn profile(&self) -> Option<ProfilingHandle> {
        self.profile
    }

    pub fn arg_count(&self) -> usize {
        self.argc
    }

    /**
     * Argument-less PING, the keepalive sent on idle connections
     */
    pub fn is_heartbeat(&self) -> bool {
        self.argc == 0 && self.name.eq_ignore_ascii_case(b"PING")
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_name.len() + self.args.len() + 32);
        RESPToken::ArraySize(self.argc + 1).encode(&mut buf);
        RESPToken::BulkString(&self.wire_name).encode(&mut buf);
        buf.put_slice(&self.args);
        buf.freeze()
    }
}
