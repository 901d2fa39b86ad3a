//! Push/sync arbitration per account
//!
//! At most one operation (a ping, i.e. a hanging push request, or a
//! sync) may own an account's network channel at a time. Syncs outrank
//! pings: a sync arriving while a ping runs stops the ping and takes
//! over once it has actually wound down; pings never interrupt a sync.
//! Concurrent syncs for the same account are serialized; accounts never
//! contend with each other.
//!
//! All bookkeeping sits behind one mutex. Each account carries its own
//! condition variable (created against that same mutex) so waking one
//! account's waiters never disturbs another's.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use thiserror::Error;

use crate::config::SyncConfig;
use crate::models::{Account, AccountId};
use crate::sync::ping::PingTask;
use crate::sync::{PingScheduler, PingStatus, Pinger};

/// Process keep-alive signal
///
/// The coordinator calls `start_service` when the first account becomes
/// active and `stop_service` when the last one goes idle, so whatever
/// hosts the engine knows when it must stay resident. Implementations
/// must not call back into the coordinator from these hooks; they run
/// with its lock held.
pub trait ServiceHost: Send + Sync {
    /// The first account just became active
    fn start_service(&self);
    /// The last active account just went idle
    fn stop_service(&self);
}

/// Error surfaced to a blocked sync when the engine is torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The coordinator is shutting down; the sync was cancelled and no
    /// matching `sync_end` call must be made
    #[error("sync coordinator is shutting down")]
    ShuttingDown,
}

/// Bookkeeping for a single account
///
/// An entry exists only while the account is active: it has a running
/// ping, at least one pending or running sync, or is mid-transition
/// between the two.
struct AccountState {
    /// The running ping task, if any
    ping: Option<PingTask>,
    /// Last requested push state for this account
    push_enabled: bool,
    /// Syncs currently running or blocked in `sync_start`
    sync_count: u32,
    /// Whether one of those syncs currently holds the account
    sync_active: bool,
    /// Parks syncs that have to wait for the ping or an earlier sync
    cond: Arc<Condvar>,
}

impl AccountState {
    fn new() -> Self {
        Self {
            ping: None,
            push_enabled: false,
            sync_count: 0,
            sync_active: false,
            cond: Arc::new(Condvar::new()),
        }
    }
}

struct Registry {
    accounts: HashMap<AccountId, AccountState>,
    shutting_down: bool,
}

/// Registry arbitrating pings and syncs across all accounts
///
/// One instance per hosting service. Construct with
/// [`SyncCoordinator::new`] and share the returned [`Arc`]; ping threads
/// hold only weak references back to it.
pub struct SyncCoordinator {
    registry: Mutex<Registry>,
    pinger: Arc<dyn Pinger>,
    scheduler: Arc<dyn PingScheduler>,
    host: Arc<dyn ServiceHost>,
    config: SyncConfig,
}

impl SyncCoordinator {
    pub fn new(
        pinger: Arc<dyn Pinger>,
        scheduler: Arc<dyn PingScheduler>,
        host: Arc<dyn ServiceHost>,
        config: SyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry {
                accounts: HashMap::new(),
                shutting_down: false,
            }),
            pinger,
            scheduler,
            host,
            config,
        })
    }

    /// Claim the account for a sync, blocking until it is free
    ///
    /// If a ping is running it is told to stop, and this call waits for
    /// its termination report (stopping is asynchronous, so the wait is
    /// real). If another sync holds the account, this call waits its turn.
    /// The caller owns the account from a successful return until its
    /// matching [`sync_end`](Self::sync_end).
    ///
    /// Returns [`SyncError::ShuttingDown`] (with all bookkeeping undone)
    /// if the coordinator is torn down before the account frees up.
    pub fn sync_start(self: &Arc<Self>, account_id: AccountId) -> Result<(), SyncError> {
        let mut registry = self.registry.lock().unwrap();
        if registry.shutting_down {
            return Err(SyncError::ShuttingDown);
        }
        debug!("sync start for account {}", account_id);
        let state = self.get_or_create(&mut registry, account_id);
        state.sync_count += 1;
        if let Some(ping) = &state.ping {
            // Syncs outrank push; tell the ping to clear the channel.
            debug!("sync is preempting the ping for account {}", account_id);
            ping.stop();
        }
        let cond = state.cond.clone();
        loop {
            if registry.shutting_down {
                self.abandon_sync(&mut registry, account_id);
                return Err(SyncError::ShuttingDown);
            }
            let state = registry
                .accounts
                .get_mut(&account_id)
                .expect("account state disappeared while a sync was pending");
            if state.ping.is_none() && !state.sync_active {
                state.sync_active = true;
                return Ok(());
            }
            debug!(
                "sync for account {} waiting (ping running: {}, pending syncs: {})",
                account_id,
                state.ping.is_some(),
                state.sync_count
            );
            registry = cond.wait(registry).unwrap();
        }
    }

    /// Release the account after a sync
    ///
    /// Wakes the next waiting sync if there is one; otherwise restarts
    /// push if the account still wants it. A sync that ended in error
    /// defers that restart to the scheduler so a broken network path is
    /// not hammered. Removes the account's state entirely once idle.
    pub fn sync_end(self: &Arc<Self>, account: &Account, had_error: bool) {
        let mut registry = self.registry.lock().unwrap();
        debug!("sync end for account {} (error: {})", account.id, had_error);
        let shutting_down = registry.shutting_down;
        let Some(state) = registry.accounts.get_mut(&account.id) else {
            warn!("sync end for account {} but no state found", account.id);
            return;
        };
        if state.sync_count == 0 {
            warn!(
                "sync end for account {} without a matching sync start",
                account.id
            );
            return;
        }
        state.sync_count -= 1;
        state.sync_active = false;
        let idle = if state.sync_count > 0 {
            debug!("waking a pending sync for account {}", account.id);
            state.cond.notify_one();
            false
        } else if state.push_enabled && !shutting_down {
            if had_error {
                warn!(
                    "sync for account {} failed, deferring push restart",
                    account.id
                );
                self.scheduler
                    .schedule_delayed_ping(account, self.config.ping_error_backoff);
                true
            } else {
                state.ping = Some(self.start_ping(account));
                false
            }
        } else {
            true
        };
        if idle {
            self.remove_account(&mut registry, account.id);
        }
    }

    /// Record the termination of the account's ping task
    ///
    /// Called exactly once per spawned ping, on the ping's own thread. A
    /// waiting sync always wins the freed channel. Otherwise, if push is
    /// still wanted, a failed ping is retried only after the configured
    /// backoff (through the scheduler), while a stopped or expired one is
    /// reissued immediately.
    pub fn ping_end(self: &Arc<Self>, account: &Account, status: PingStatus) {
        let mut registry = self.registry.lock().unwrap();
        debug!("ping end for account {}: {:?}", account.id, status);
        let shutting_down = registry.shutting_down;
        let Some(state) = registry.accounts.get_mut(&account.id) else {
            warn!("ping end for account {} but no state found", account.id);
            return;
        };
        state.ping = None;
        let idle = if state.sync_count > 0 {
            debug!("waking a pending sync for account {}", account.id);
            state.cond.notify_one();
            false
        } else if state.push_enabled && !shutting_down {
            match status {
                PingStatus::Failed => {
                    warn!(
                        "ping for account {} failed, deferring push restart",
                        account.id
                    );
                    self.scheduler
                        .schedule_delayed_ping(account, self.config.ping_error_backoff);
                    // The retry now lives with the scheduler; until it
                    // fires, the account counts as idle.
                    true
                }
                PingStatus::Stopped | PingStatus::Expired => {
                    state.ping = Some(self.start_ping(account));
                    false
                }
            }
        } else {
            true
        };
        if idle {
            self.remove_account(&mut registry, account.id);
        }
    }

    /// Enable push for the account, starting or reconfiguring its ping
    ///
    /// A running ping is told to restart in place, never torn down and
    /// respawned, so repeated calls cannot produce duplicate pings. If a
    /// sync is in flight, nothing happens now; `sync_end` starts the ping
    /// once syncing finishes.
    pub fn push_modify(self: &Arc<Self>, account: &Account) {
        let mut registry = self.registry.lock().unwrap();
        if registry.shutting_down {
            debug!("ignoring push modify for account {} during shutdown", account.id);
            return;
        }
        debug!("push modify for account {}", account.id);
        let state = self.get_or_create(&mut registry, account.id);
        state.push_enabled = true;
        if state.sync_count == 0 {
            match &state.ping {
                Some(ping) => ping.restart(),
                None => state.ping = Some(self.start_ping(account)),
            }
        }
    }

    /// Disable push for the account, stopping its ping if one is running
    ///
    /// Sync bookkeeping is untouched; removal of a now-idle entry happens
    /// when the stopped ping reports back through [`ping_end`](Self::ping_end).
    pub fn push_stop(&self, account_id: AccountId) {
        let mut registry = self.registry.lock().unwrap();
        debug!("push stop for account {}", account_id);
        let Some(state) = registry.accounts.get_mut(&account_id) else {
            debug!("push stop for account {} but no state found", account_id);
            return;
        };
        state.push_enabled = false;
        if let Some(ping) = &state.ping {
            ping.stop();
        }
    }

    /// Tell every running ping to stop and drop every push request
    pub fn stop_all_pings(&self) {
        let mut registry = self.registry.lock().unwrap();
        for (account_id, state) in registry.accounts.iter_mut() {
            state.push_enabled = false;
            if let Some(ping) = &state.ping {
                debug!("stopping ping for account {}", account_id);
                ping.stop();
            }
        }
    }

    /// Release the hosting service if no account is active
    pub fn stop_service_if_idle(&self) {
        let registry = self.registry.lock().unwrap();
        if registry.accounts.is_empty() {
            info!("no active accounts; releasing the service");
            self.host.stop_service();
        }
    }

    /// Tear the coordinator down
    ///
    /// Stops all pings, drops all push requests, and cancels every sync
    /// blocked in [`sync_start`](Self::sync_start); those callers get
    /// [`SyncError::ShuttingDown`]. Later entry-point calls become no-ops.
    pub fn shutdown(&self) {
        let mut registry = self.registry.lock().unwrap();
        if registry.shutting_down {
            return;
        }
        info!("sync coordinator shutting down");
        registry.shutting_down = true;
        for state in registry.accounts.values_mut() {
            state.push_enabled = false;
            if let Some(ping) = &state.ping {
                ping.stop();
            }
            state.cond.notify_all();
        }
    }

    /// Number of accounts with a running or pending operation
    pub fn active_accounts(&self) -> usize {
        self.registry.lock().unwrap().accounts.len()
    }

    /// Whether the account currently has a running or pending operation
    pub fn is_active(&self, account_id: AccountId) -> bool {
        self.registry
            .lock()
            .unwrap()
            .accounts
            .contains_key(&account_id)
    }

    fn start_ping(self: &Arc<Self>, account: &Account) -> PingTask {
        debug!("starting ping for account {}", account.id);
        PingTask::spawn(account.clone(), self.pinger.clone(), Arc::downgrade(self))
    }

    /// Fetch the account's state, creating it if this is the account's
    /// first operation. Caller holds the registry lock.
    fn get_or_create<'a>(
        &self,
        registry: &'a mut Registry,
        account_id: AccountId,
    ) -> &'a mut AccountState {
        if !registry.accounts.contains_key(&account_id) {
            debug!("adding sync state for account {}", account_id);
            registry.accounts.insert(account_id, AccountState::new());
            if registry.accounts.len() == 1 {
                info!("first account became active; keeping the service alive");
                self.host.start_service();
            }
        }
        registry
            .accounts
            .get_mut(&account_id)
            .expect("account state just inserted")
    }

    /// Undo a `sync_start` that was cancelled while waiting
    fn abandon_sync(&self, registry: &mut Registry, account_id: AccountId) {
        if let Some(state) = registry.accounts.get_mut(&account_id) {
            state.sync_count = state.sync_count.saturating_sub(1);
            if state.sync_count == 0 && state.ping.is_none() {
                self.remove_account(registry, account_id);
            }
        }
    }

    fn remove_account(&self, registry: &mut Registry, account_id: AccountId) {
        debug!("removing sync state for account {}", account_id);
        registry.accounts.remove(&account_id);
        if registry.accounts.is_empty() {
            info!("last active account removed; releasing the service");
            self.host.stop_service();
        }
    }
}
