use std::{fmt, time::Instant};

use bytes::Bytes;

use crate::{
    cell::ReplySink,
    clock::Clock,
    error::RedisError,
    profiling::ProfilingHandle,
    queue::{Priority, QueueItem},
    resp::{Command, CommandName},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// Slot ownership moved permanently
    Moved,
    /// One-off redirect during slot migration
    Ask,
}

/**
 * Cluster redirect carried by a MOVED or ASK error reply
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub kind: RedirectKind,
    pub slot: u16,
    pub endpoint: String,
}

impl Redirect {
    /**
     * Parses error text of the form `MOVED 3999 127.0.0.1:6381`
     */
    pub fn parse(error: &str) -> Option<Redirect> {
        let mut parts = error.split_ascii_whitespace();
        let kind = match parts.next()? {
            "MOVED" => RedirectKind::Moved,
            "ASK" => RedirectKind::Ask,
            _ => return None,
        };
        let slot = parts.next()?.parse().ok()?;
        let endpoint = parts.next()?.to_owned();
        if parts.next().is_some() {
            return None;
        }
        Some(Redirect { kind, slot, endpoint })
    }
}

impl RedisError {
    /// The redirect a server error asks for, if it is one
    pub fn redirect(&self) -> Option<Redirect> {
        match self {
            RedisError::Server(message) => Redirect::parse(message),
            _ => None,
        }
    }
}

/**
 * One outbound command: its encoded bytes, where its reply goes and the
 * bookkeeping needed for profiling and diagnostics.
 */
pub struct Message {
    id: u64,
    name: CommandName,
    payload: Bytes,
    priority: Priority,
    heartbeat: bool,
    profile: Option<ProfilingHandle>,
    pub(crate) sink: Box<dyn ReplySink>,
    pub(crate) enqueued_at: Instant,
    pub(crate) sent_at: Option<Instant>,
    retry_of: Option<u64>,
    redirect: Option<Redirect>,
}

impl Message {
    pub fn new(id: u64, command: &Command, sink: Box<dyn ReplySink>) -> Self {
        Self {
            id,
            name: command.name(),
            payload: command.encode(),
            priority: command.priority(),
            heartbeat: command.is_heartbeat(),
            profile: command.profile(),
            sink,
            enqueued_at: Clock::now(),
            sent_at: None,
            retry_of: None,
            redirect: None,
        }
    }

    /**
     * Marks this message as the resend of an earlier one that was redirected
     */
    pub fn retrying(mut self, previous: u64, redirect: Redirect) -> Self {
        self.retry_of = Some(previous);
        self.redirect = Some(redirect);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> CommandName {
        self.name
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn profile(&self) -> Option<ProfilingHandle> {
        self.profile
    }

    pub fn retry_of(&self) -> Option<u64> {
        self.retry_of
    }

    pub fn redirect(&self) -> Option<&Redirect> {
        self.redirect.as_ref()
    }

    pub fn sent_at(&self) -> Option<Instant> {
        self.sent_at
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent_at = Some(Clock::now());
    }

    pub(crate) fn into_sink(self) -> Box<dyn ReplySink> {
        self.sink
    }
}

impl QueueItem for Message {
    fn priority(&self) -> Priority {
        self.priority
    }

    fn is_heartbeat(&self) -> bool {
        self.heartbeat
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("bytes", &self.payload.len())
            .field("retry_of", &self.retry_of)
            .field("redirect", &self.redirect)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Consumer, ResultCellPool};
    use rstest::rstest;

    #[rstest]
    #[case("MOVED 3999 127.0.0.1:6381", Some((RedirectKind::Moved, 3999, "127.0.0.1:6381")))]
    #[case("ASK 12 10.0.0.2:7000", Some((RedirectKind::Ask, 12, "10.0.0.2:7000")))]
    #[case("ERR unknown command", None)]
    #[case("MOVED notaslot 127.0.0.1:6381", None)]
    #[case("MOVED 3999", None)]
    #[case("MOVED 3999 127.0.0.1:6381 extra", None)]
    fn should_parse_redirects(#[case] error: &str, #[case] expected: Option<(RedirectKind, u16, &str)>) {
        let expected = expected.map(|(kind, slot, endpoint)| Redirect {
            kind,
            slot,
            endpoint: endpoint.to_owned(),
        });

        assert_eq!(expected, Redirect::parse(error))
    }

    #[test]
    fn should_find_redirect_in_server_error() {
        let error = RedisError::Server("ASK 1 host:1".to_owned());

        assert_eq!(Some(RedirectKind::Ask), error.redirect().map(|r| r.kind));
        assert_eq!(None, RedisError::ShuttingDown.redirect());
    }

    #[test]
    fn should_carry_command_metadata_and_lineage() {
        let pool = ResultCellPool::<i64>::new(1);
        let command = Command::ping().high_priority();
        let redirect = Redirect::parse("MOVED 1 other:6379").unwrap();

        let message = Message::new(42, &command, pool.acquire(Consumer::Detached)).retrying(41, redirect.clone());

        assert_eq!(Priority::High, message.priority());
        assert!(message.is_heartbeat());
        assert_eq!(Some(41), message.retry_of());
        assert_eq!(Some(&redirect), message.redirect());
        assert_eq!(&command.encode(), message.payload());
        assert!(message.sent_at().is_none());
    }
}
