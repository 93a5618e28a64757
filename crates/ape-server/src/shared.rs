//! State shared between the connection reader and the agent thread.

use std::path::PathBuf;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Timestamp value recorded when the peer disconnects or misbehaves.
pub const CRASHED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    Idle(i64),
    TimedOut,
    Crashed,
}

impl IdleOutcome {
    /// The idle timestamp, or `-1` for a timeout or crash.
    pub fn as_timestamp(self) -> i64 {
        match self {
            IdleOutcome::Idle(ts) => ts,
            IdleOutcome::TimedOut | IdleOutcome::Crashed => CRASHED,
        }
    }
}

#[derive(Debug)]
struct ProtocolInner {
    last_idle: i64,
    last_target: i64,
    last_method: i32,
    connections: u32,
    main_thread: Option<i32>,
    peer_directory: Option<PathBuf>,
    pending_moves: Vec<(PathBuf, PathBuf)>,
}

/// Timestamps, connection bookkeeping and the idle monitor.
#[derive(Debug)]
pub struct SharedProtocolState {
    inner: Mutex<ProtocolInner>,
    idle: Condvar,
}

impl Default for SharedProtocolState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedProtocolState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ProtocolInner {
                last_idle: 0,
                last_target: 0,
                last_method: -1,
                connections: 0,
                main_thread: None,
                peer_directory: None,
                pending_moves: Vec::new(),
            }),
            idle: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProtocolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A peer completed the handshake. Clears any crash sentinel left by
    /// the previous connection.
    pub fn connection_opened(&self, main_thread: i32, directory: PathBuf) -> u32 {
        let mut inner = self.lock();
        inner.connections += 1;
        inner.main_thread = Some(main_thread);
        inner.peer_directory = Some(directory);
        inner.last_idle = 0;
        inner.last_target = 0;
        inner.last_method = -1;
        info!(connection = inner.connections, main_thread, "peer connected");
        inner.connections
    }

    pub fn record_target(&self, method: i32, timestamp: i64) {
        let mut inner = self.lock();
        inner.last_target = timestamp;
        inner.last_method = method;
    }

    pub fn record_idle(&self, timestamp: i64) {
        let mut inner = self.lock();
        inner.last_idle = timestamp;
        self.idle.notify_all();
    }

    /// Set the crash sentinel and wake every idle waiter.
    pub fn mark_crashed(&self) {
        let mut inner = self.lock();
        inner.last_idle = CRASHED;
        inner.last_target = CRASHED;
        self.idle.notify_all();
        debug!("crash sentinel set");
    }

    /// Block until an idle heartbeat newer than `since` arrives, the crash
    /// sentinel is set, or `timeout` elapses.
    pub fn wait_for_idle(&self, since: i64, timeout: Duration) -> IdleOutcome {
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.lock();
        loop {
            if inner.last_idle == CRASHED {
                return IdleOutcome::Crashed;
            }
            if inner.last_idle > since {
                return IdleOutcome::Idle(inner.last_idle);
            }
            inner = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return IdleOutcome::TimedOut;
                    }
                    self.idle
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                // Unrepresentable deadline: wait for a heartbeat or crash.
                None => self.idle.wait(inner).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Whether a target event strictly newer than `timestamp` was seen.
    pub fn met_target_methods(&self, timestamp: i64) -> bool {
        let inner = self.lock();
        let met = inner.last_target > timestamp;
        if met {
            debug!(method = inner.last_method, at = inner.last_target, "target met");
        }
        met
    }

    pub fn last_target_method_id(&self) -> Option<i32> {
        let method = self.lock().last_method;
        (method >= 0).then_some(method)
    }

    pub fn last_idle_timestamp(&self) -> i64 {
        self.lock().last_idle
    }

    pub fn connection_count(&self) -> u32 {
        self.lock().connections
    }

    pub fn main_thread_id(&self) -> Option<i32> {
        self.lock().main_thread
    }

    pub fn peer_directory(&self) -> Option<PathBuf> {
        self.lock().peer_directory.clone()
    }

    pub(crate) fn queue_move(&self, source: PathBuf, destination: PathBuf) {
        self.lock().pending_moves.push((source, destination));
    }

    pub(crate) fn take_moves(&self) -> Vec<(PathBuf, PathBuf)> {
        std::mem::take(&mut self.lock().pending_moves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_times_out() {
        let state = SharedProtocolState::new();
        let start = Instant::now();
        let outcome = state.wait_for_idle(0, Duration::from_millis(50));
        assert_eq!(outcome, IdleOutcome::TimedOut);
        assert_eq!(outcome.as_timestamp(), -1);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_idle_wakes_waiter() {
        let state = Arc::new(SharedProtocolState::new());
        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_for_idle(10, Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));
        state.record_idle(5);
        state.record_idle(11);
        assert_eq!(waiter.join().unwrap(), IdleOutcome::Idle(11));
    }

    #[test]
    fn test_unbounded_timeout_waits_for_heartbeat() {
        let state = Arc::new(SharedProtocolState::new());
        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_for_idle(0, Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        state.record_idle(3);
        assert_eq!(waiter.join().unwrap(), IdleOutcome::Idle(3));
    }

    #[test]
    fn test_crash_returns_immediately() {
        let state = Arc::new(SharedProtocolState::new());
        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                let start = Instant::now();
                (state.wait_for_idle(0, Duration::from_secs(30)), start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        state.mark_crashed();
        let (outcome, waited) = waiter.join().unwrap();
        assert_eq!(outcome, IdleOutcome::Crashed);
        assert!(waited < Duration::from_secs(5));
        assert_eq!(state.wait_for_idle(0, Duration::from_secs(30)), IdleOutcome::Crashed);
    }

    #[test]
    fn test_met_target_is_strict() {
        let state = SharedProtocolState::new();
        state.record_target(1, 1000);
        assert!(state.met_target_methods(999));
        assert!(!state.met_target_methods(1000));
        assert_eq!(state.last_target_method_id(), Some(1));
    }
}
