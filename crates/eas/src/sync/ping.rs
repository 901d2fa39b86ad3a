//! Ping task lifecycle
//!
//! A "ping" is the hanging request used to receive push notifications.
//! The protocol loop itself lives outside this crate behind the [`Pinger`]
//! trait; this module owns the thread that runs it and the control handle
//! used to stop or reconfigure it.

use log::debug;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::models::Account;
use crate::sync::SyncCoordinator;

/// Terminal outcome of one ping task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingStatus {
    /// The task observed a stop request and wound down
    Stopped,
    /// The hanging request ran its course; the server is reachable and a
    /// fresh ping should be issued right away
    Expired,
    /// The task hit a network or protocol error; retrying immediately
    /// would spin, so the next ping must wait out a backoff
    Failed,
}

/// The hanging-request protocol loop, implemented outside this crate
///
/// Contract:
/// - `run` owns the account's network channel until it returns.
/// - Implementations must poll `control` between (and ideally during)
///   requests: once [`PingControl::stop_requested`] is true, return
///   [`PingStatus::Stopped`] as soon as possible.
/// - A restart request ([`PingControl::take_restart`]) means "re-read the
///   current push parameters and keep going"; the loop absorbs it and
///   does NOT return.
/// - [`PingControl::wait`] is the sanctioned way to sleep between
///   requests; it wakes early when a stop or restart comes in.
pub trait Pinger: Send + Sync {
    /// Run the ping loop for `account` until it terminates
    fn run(&self, account: &Account, control: &PingControl) -> PingStatus;
}

#[derive(Default)]
struct ControlFlags {
    stop: bool,
    restart: bool,
}

/// Shared control handle between the sync engine and a running ping loop
///
/// Both stop and restart are advisory: requesting them returns
/// immediately, and the loop acts on them at its next check.
pub struct PingControl {
    flags: Mutex<ControlFlags>,
    cond: Condvar,
}

impl PingControl {
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(ControlFlags::default()),
            cond: Condvar::new(),
        }
    }

    /// Ask the loop to terminate as soon as possible
    pub fn request_stop(&self) {
        let mut flags = self.flags.lock().unwrap();
        flags.stop = true;
        self.cond.notify_all();
    }

    /// Ask the loop to re-read its push parameters and continue
    pub fn request_restart(&self) {
        let mut flags = self.flags.lock().unwrap();
        flags.restart = true;
        self.cond.notify_all();
    }

    /// Whether a stop has been requested
    pub fn stop_requested(&self) -> bool {
        self.flags.lock().unwrap().stop
    }

    /// Consume a pending restart request, if any
    pub fn take_restart(&self) -> bool {
        let mut flags = self.flags.lock().unwrap();
        std::mem::take(&mut flags.restart)
    }

    /// Sleep for up to `timeout`, waking early on a stop or restart request
    ///
    /// Returns `true` if a request is pending (the caller should re-check
    /// which one), `false` if the full timeout elapsed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flags = self.flags.lock().unwrap();
        loop {
            if flags.stop || flags.restart {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cond.wait_timeout(flags, deadline - now).unwrap();
            flags = guard;
        }
    }
}

impl Default for PingControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one running ping task
///
/// Spawning takes ownership of a thread that runs the [`Pinger`] loop and
/// reports back to the coordinator exactly once when the loop returns.
/// Dropping the handle does not stop the task; the coordinator keeps it
/// only to forward stop/restart requests.
pub(crate) struct PingTask {
    control: Arc<PingControl>,
}

impl PingTask {
    /// Start a ping task for `account` on its own thread
    ///
    /// The thread holds only a weak reference to the coordinator. If the
    /// coordinator is gone by the time the loop returns, the completion
    /// report is simply discarded.
    pub(crate) fn spawn(
        account: Account,
        pinger: Arc<dyn Pinger>,
        coordinator: Weak<SyncCoordinator>,
    ) -> Self {
        let control = Arc::new(PingControl::new());
        let task_control = control.clone();
        thread::spawn(move || {
            debug!("ping task for account {} running", account.id);
            let status = pinger.run(&account, &task_control);
            debug!("ping task for account {} finished: {:?}", account.id, status);
            match coordinator.upgrade() {
                Some(coordinator) => coordinator.ping_end(&account, status),
                None => debug!(
                    "coordinator gone before ping for account {} could report",
                    account.id
                ),
            }
        });
        Self { control }
    }

    /// Forward a stop request to the loop (does not block)
    pub(crate) fn stop(&self) {
        self.control.request_stop();
    }

    /// Forward a restart request to the loop (does not block)
    pub(crate) fn restart(&self) {
        self.control.request_restart();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_wait_times_out_without_requests() {
        let control = PingControl::new();
        let start = Instant::now();
        let interrupted = control.wait(Duration::from_millis(30));
        assert!(!interrupted);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_returns_immediately_when_stop_pending() {
        let control = PingControl::new();
        control.request_stop();
        assert!(control.wait(Duration::from_secs(10)));
        assert!(control.stop_requested());
    }

    #[test]
    fn test_wait_wakes_on_restart_from_another_thread() {
        let control = Arc::new(PingControl::new());
        let waker = control.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.request_restart();
        });
        let interrupted = control.wait(Duration::from_secs(10));
        handle.join().unwrap();
        assert!(interrupted);
        assert!(control.take_restart());
        // A restart is consumed once taken.
        assert!(!control.take_restart());
    }

    #[test]
    fn test_stop_is_sticky() {
        let control = PingControl::new();
        control.request_stop();
        assert!(control.stop_requested());
        assert!(control.stop_requested());
    }
}
