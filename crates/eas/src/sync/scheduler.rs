//! Delayed and periodic ping scheduling
//!
//! When a ping dies of anything other than preemption, restarting it
//! immediately would spin against a broken network path. The coordinator
//! instead hands the retry to a [`PingScheduler`], which owes it a
//! push-restart attempt once the delay elapses. The same facility carries
//! the periodic "kick" that notices a silently-dead push connection.

use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::models::{Account, AccountId};

/// Timer facility the sync engine hands deferred push work to
///
/// Implementations must only *enqueue* here: the engine may call these
/// methods while holding its own lock, so calling back into it
/// synchronously would deadlock. The eventual callback must go through
/// the normal push-modify entry point on a different thread.
pub trait PingScheduler: Send + Sync {
    /// Arrange for push to be re-established for `account` after `delay`
    fn schedule_delayed_ping(&self, account: &Account, delay: Duration);

    /// Keep a low-frequency periodic push-restart around for `account`
    ///
    /// Scheduling twice for the same account is a no-op; the existing
    /// kick keeps its interval.
    fn schedule_kick(&self, account: &Account, interval: Duration);

    /// Drop the periodic kick for `account`, if one is scheduled
    fn cancel_kick(&self, account_id: AccountId);
}

/// Thread-backed [`PingScheduler`]
///
/// Each delayed ping gets a sleeper thread; each kick gets a looping
/// thread that runs until cancelled. The callback supplied at
/// construction is invoked with the account whenever a timer fires,
/// typically forwarding to the service's push-modify path.
pub struct SleepScheduler {
    restart: Arc<dyn Fn(Account) + Send + Sync>,
    kicks: Mutex<HashMap<AccountId, Arc<AtomicBool>>>,
}

impl SleepScheduler {
    pub fn new(restart: impl Fn(Account) + Send + Sync + 'static) -> Self {
        Self {
            restart: Arc::new(restart),
            kicks: Mutex::new(HashMap::new()),
        }
    }
}

impl PingScheduler for SleepScheduler {
    fn schedule_delayed_ping(&self, account: &Account, delay: Duration) {
        debug!(
            "scheduling push restart for account {} in {:?}",
            account.id, delay
        );
        let restart = self.restart.clone();
        let account = account.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            debug!("delayed push restart firing for account {}", account.id);
            restart(account);
        });
    }

    fn schedule_kick(&self, account: &Account, interval: Duration) {
        let mut kicks = self.kicks.lock().unwrap();
        if kicks.contains_key(&account.id) {
            return;
        }
        debug!(
            "scheduling periodic kick for account {} every {:?}",
            account.id, interval
        );
        let cancelled = Arc::new(AtomicBool::new(false));
        kicks.insert(account.id, cancelled.clone());
        let restart = self.restart.clone();
        let account = account.clone();
        thread::spawn(move || {
            loop {
                thread::sleep(interval);
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }
                debug!("periodic kick firing for account {}", account.id);
                restart(account.clone());
            }
        });
    }

    fn cancel_kick(&self, account_id: AccountId) {
        if let Some(cancelled) = self.kicks.lock().unwrap().remove(&account_id) {
            debug!("cancelling periodic kick for account {}", account_id);
            cancelled.store(true, Ordering::SeqCst);
        }
    }
}
