use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{clock::Clock, connection::ConnectionId, resp::CommandName};

/**
 * Caller-chosen key identifying one profiling session
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfilingHandle(pub u64);

/**
 * Timings of one command that completed under a profiling session
 */
#[derive(Debug, Clone)]
pub struct ProfiledCommand {
    pub command: CommandName,
    pub connection: ConnectionId,
    pub enqueued_at: Instant,
    pub sent_at: Option<Instant>,
    pub replied_at: Instant,
    pub succeeded: bool,
}

impl ProfiledCommand {
    /// Time spent waiting in the outbound queue
    pub fn queued_for(&self) -> Option<Duration> {
        self.sent_at.map(|sent| sent.saturating_duration_since(self.enqueued_at))
    }

    pub fn round_trip(&self) -> Duration {
        self.replied_at.saturating_duration_since(self.enqueued_at)
    }
}

struct Session {
    ttl: Duration,
    expires_at: Instant,
    commands: Vec<ProfiledCommand>,
}

/**
 * Explicit registry of profiling sessions.
 *
 * Sessions end with `unregister`. A session that is abandoned without being
 * unregistered is dropped by `sweep` once `ttl` passes without any activity.
 */
#[derive(Default)]
pub struct ProfilingRegistry {
    sessions: Mutex<HashMap<ProfilingHandle, Session>>,
}

impl ProfilingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ProfilingHandle, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /**
     * Starts a session. Returns false if the handle is already registered.
     */
    pub fn register(&self, handle: ProfilingHandle, ttl: Duration) -> bool {
        let now = Clock::now();
        let mut sessions = self.lock();
        Self::sweep_locked(&mut sessions, now);

        if sessions.contains_key(&handle) {
            return false;
        }
        sessions.insert(
            handle,
            Session {
                ttl,
                expires_at: now + ttl,
                commands: vec![],
            },
        );
        true
    }

    /**
     * Appends a command to a live session, extending its expiry.
     * Returns false when the session is unknown or has expired.
     */
    pub fn record(&self, handle: ProfilingHandle, command: ProfiledCommand) -> bool {
        let now = Clock::now();
        let mut sessions = self.lock();
        match sessions.get_mut(&handle) {
            Some(session) if session.expires_at > now => {
                session.expires_at = now + session.ttl;
                session.commands.push(command);
                true
            }
            _ => false,
        }
    }

    /**
     * Ends a session, handing back everything it recorded
     */
    pub fn unregister(&self, handle: ProfilingHandle) -> Option<Vec<ProfiledCommand>> {
        self.lock().remove(&handle).map(|session| session.commands)
    }

    /**
     * Drops expired sessions, returning how many were removed
     */
    pub fn sweep(&self) -> usize {
        let now = Clock::now();
        Self::sweep_locked(&mut self.lock(), now)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep_locked(sessions: &mut HashMap<ProfilingHandle, Session>, now: Instant) -> usize {
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "swept abandoned profiling sessions");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClockSession;

    fn profiled(name: &[u8]) -> ProfiledCommand {
        let now = Clock::now();
        ProfiledCommand {
            command: CommandName::new(name),
            connection: ConnectionId(1),
            enqueued_at: now,
            sent_at: Some(now + Duration::from_millis(2)),
            replied_at: now + Duration::from_millis(5),
            succeeded: true,
        }
    }

    #[test]
    fn should_collect_commands_until_unregistered() {
        let registry = ProfilingRegistry::new();
        let handle = ProfilingHandle(1);

        assert!(registry.register(handle, Duration::from_secs(60)));
        assert!(!registry.register(handle, Duration::from_secs(60)));
        assert!(registry.record(handle, profiled(b"GET")));
        assert!(registry.record(handle, profiled(b"SET")));

        let commands = registry.unregister(handle).unwrap();
        assert_eq!(2, commands.len());
        assert!(commands[1].command.eq_ignore_ascii_case(b"set"));
        assert_eq!(Some(Duration::from_millis(2)), commands[0].queued_for());
        assert_eq!(Duration::from_millis(5), commands[0].round_trip());

        assert!(registry.unregister(handle).is_none());
        assert!(!registry.record(handle, profiled(b"GET")));
    }

    #[test]
    fn should_sweep_abandoned_sessions() {
        let _session = MockClockSession::new();
        Clock::mock_freeze();
        let registry = ProfilingRegistry::new();
        registry.register(ProfilingHandle(1), Duration::from_secs(10));
        registry.register(ProfilingHandle(2), Duration::from_secs(30));

        Clock::mock_advance(Duration::from_secs(11));
        assert!(!registry.record(ProfilingHandle(1), profiled(b"GET")));
        assert_eq!(1, registry.sweep());
        assert_eq!(1, registry.len());

        Clock::mock_advance(Duration::from_secs(20));
        assert!(registry.register(ProfilingHandle(3), Duration::from_secs(30)));
        assert_eq!(1, registry.len());
    }

    #[test]
    fn should_extend_expiry_on_activity() {
        let _session = MockClockSession::new();
        Clock::mock_freeze();
        let registry = ProfilingRegistry::new();
        let handle = ProfilingHandle(9);
        registry.register(handle, Duration::from_secs(10));

        Clock::mock_advance(Duration::from_secs(8));
        assert!(registry.record(handle, profiled(b"GET")));
        Clock::mock_advance(Duration::from_secs(8));

        assert_eq!(0, registry.sweep());
        assert_eq!(1, registry.unregister(handle).unwrap().len());
    }
}
