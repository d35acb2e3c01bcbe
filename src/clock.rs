use std::time::Instant;

/**
 * Monotonic clock for message timestamps and profiling expiry
 */
pub struct Clock;

#[cfg(not(test))]
impl Clock {
    pub fn now() -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
pub use test_clock::*;

/**
 * Test implementation for Clock, including mocked time
 */
#[cfg(test)]
mod test_clock {
    use super::*;

    use once_cell::sync::Lazy;
    use std::{
        ops::Add,
        sync::{Mutex, MutexGuard},
        time::Duration,
    };

    static MOCK_TIME: Lazy<Mutex<Option<Instant>>> = Lazy::new(|| Mutex::new(None));

    fn mock_time() -> MutexGuard<'static, Option<Instant>> {
        MOCK_TIME.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    impl Clock {
        pub fn now() -> Instant {
            mock_time().unwrap_or_else(Instant::now)
        }

        /**
         * Revert clock back to the real monotonic clock
         */
        pub fn mock_disable() {
            *mock_time() = None;
        }

        /**
         * Keeps mocked time frozen at the time of the call
         */
        pub fn mock_freeze() {
            *mock_time() = Some(Instant::now());
        }

        /**
         * Advance mock time
         * If mock time was disabled, advances from the current real time
         */
        pub fn mock_advance(duration: Duration) {
            let mut time = mock_time();
            *time = Some(time.unwrap_or_else(Instant::now).add(duration));
        }
    }

    struct MockSessionLock;

    /**
     * Only allows one test to use mocked clock at a time to avoid sync issues
     */
    static SESSION_LOCK: Lazy<Mutex<MockSessionLock>> = Lazy::new(|| Mutex::new(MockSessionLock));

    /**
     * Captures lifetime of clock session to avoid tests writing over each other's mocked time
     * Use this for any test that relies on mocked time
     */
    pub struct MockClockSession(#[allow(dead_code)] MutexGuard<'static, MockSessionLock>);

    impl MockClockSession {
        /**
         * Blocks session if another session is already active
         */
        pub fn new() -> Self {
            Self(SESSION_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
        }
    }

    impl Drop for MockClockSession {
        fn drop(&mut self) {
            Clock::mock_disable()
        }
    }
}
