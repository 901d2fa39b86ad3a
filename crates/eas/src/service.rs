//! Service facade over the sync coordinator
//!
//! Wires the coordinator to an account store, applies push-eligibility
//! policy, and brackets sync operations so callers cannot forget the
//! release half of the start/end pair. This is the surface the protocol
//! and platform layers talk to; they never touch the coordinator's
//! bookkeeping directly except through [`SyncService::coordinator`].

use anyhow::Result;
use log::{debug, info};
use std::sync::Arc;

use crate::accounts::AccountSource;
use crate::config::SyncConfig;
use crate::models::{Account, AccountId, SyncInterval};
use crate::sync::{PingScheduler, Pinger, ServiceHost, SyncCoordinator};

/// Entry point for running syncs and managing push across accounts
pub struct SyncService {
    coordinator: Arc<SyncCoordinator>,
    accounts: Arc<dyn AccountSource>,
    scheduler: Arc<dyn PingScheduler>,
    config: SyncConfig,
}

impl SyncService {
    /// Create a new service
    ///
    /// The same scheduler instance is handed to the coordinator for its
    /// backoff handling and used here for the periodic kick.
    pub fn new(
        accounts: Arc<dyn AccountSource>,
        pinger: Arc<dyn Pinger>,
        scheduler: Arc<dyn PingScheduler>,
        host: Arc<dyn ServiceHost>,
        config: SyncConfig,
    ) -> Self {
        let coordinator =
            SyncCoordinator::new(pinger, scheduler.clone(), host, config.clone());
        Self {
            coordinator,
            accounts,
            scheduler,
            config,
        }
    }

    /// The underlying coordinator (ping callbacks and tests need it)
    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Restart push for every account that wants it
    ///
    /// Run once at service startup: push connections do not survive a
    /// process restart, so any account configured for push needs its
    /// ping reissued. Releases the keep-alive again if the sweep started
    /// nothing.
    pub fn start(&self) {
        info!("restarting push for accounts that want it");
        let mut restarted = false;
        for account in self.accounts.push_accounts() {
            if self.ping_needed(&account) {
                restarted = true;
                self.coordinator.push_modify(&account);
                if self.config.schedule_kick {
                    self.scheduler
                        .schedule_kick(&account, self.config.kick_interval);
                }
            }
        }
        if !restarted {
            debug!("startup sweep started no pings");
            self.coordinator.stop_service_if_idle();
        }
    }

    /// Stop all pings and tear the coordinator down
    pub fn stop(&self) {
        info!("sync service stopping");
        self.coordinator.stop_all_pings();
        self.coordinator.shutdown();
    }

    /// Run a sync operation for `account`, serialized against the
    /// account's other activity
    ///
    /// Claims the account (preempting a running ping), runs `op`, and
    /// releases the account again whatever happens; an error result
    /// feeds the backoff decision for the automatic push restart. Fails
    /// without running `op` if the service is shutting down.
    pub fn run_sync<T>(&self, account: &Account, op: impl FnOnce() -> Result<T>) -> Result<T> {
        self.coordinator.sync_start(account.id)?;

        // Release the account even if the operation panics.
        struct EndGuard<'a> {
            coordinator: &'a Arc<SyncCoordinator>,
            account: &'a Account,
            had_error: bool,
        }
        impl Drop for EndGuard<'_> {
            fn drop(&mut self) {
                self.coordinator.sync_end(self.account, self.had_error);
            }
        }
        let mut guard = EndGuard {
            coordinator: &self.coordinator,
            account,
            had_error: true,
        };

        let result = op();
        guard.had_error = result.is_err();
        result
    }

    /// React to a change in the account's desired push state
    ///
    /// Resolves the account, applies the eligibility policy, and either
    /// starts/reconfigures push (plus the periodic kick) or stops it.
    /// An account that no longer exists is treated like one that no
    /// longer wants push.
    pub fn push_modify(&self, account_id: AccountId) {
        debug!("push modify requested for account {}", account_id);
        match self.accounts.account(account_id) {
            Some(account) if self.ping_needed(&account) => {
                self.coordinator.push_modify(&account);
                if self.config.schedule_kick {
                    self.scheduler
                        .schedule_kick(&account, self.config.kick_interval);
                }
            }
            _ => {
                self.coordinator.push_stop(account_id);
                if self.config.schedule_kick {
                    self.scheduler.cancel_kick(account_id);
                }
            }
        }
    }

    /// Whether the account should have a push connection right now
    ///
    /// All of the following must hold: the account is configured for
    /// push, is not on security hold, has completed its initial sync,
    /// and has at least one push-marked folder whose content class is
    /// enabled for syncing.
    pub fn ping_needed(&self, account: &Account) -> bool {
        if account.sync_interval != SyncInterval::Push {
            debug!("no ping: account {} not configured for push", account.id);
            return false;
        }
        if account.security_hold {
            debug!("no ping: account {} is on security hold", account.id);
            return false;
        }
        if !account.initial_sync_done() {
            debug!(
                "no ping: account {} has not done its initial sync",
                account.id
            );
            return false;
        }
        let wanted = self
            .accounts
            .push_folders(account.id)
            .iter()
            .any(|folder| account.content_enabled(folder.kind));
        if !wanted {
            debug!(
                "no ping: account {} has no folders configured for push",
                account.id
            );
        }
        wanted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::InMemoryAccountSource;
    use crate::models::{ContentKind, Folder};
    use crate::sync::{PingControl, PingStatus};
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Pinger that blocks until stopped
    #[derive(Default)]
    struct BlockingPinger {
        starts: AtomicUsize,
    }

    impl Pinger for BlockingPinger {
        fn run(&self, _account: &Account, control: &PingControl) -> PingStatus {
            self.starts.fetch_add(1, Ordering::SeqCst);
            while !control.stop_requested() {
                control.wait(Duration::from_millis(10));
            }
            PingStatus::Stopped
        }
    }

    #[derive(Default)]
    struct RecordingScheduler {
        delayed: Mutex<Vec<AccountId>>,
        kicks: Mutex<Vec<AccountId>>,
        cancelled: Mutex<Vec<AccountId>>,
    }

    impl PingScheduler for RecordingScheduler {
        fn schedule_delayed_ping(&self, account: &Account, _delay: Duration) {
            self.delayed.lock().unwrap().push(account.id);
        }

        fn schedule_kick(&self, account: &Account, _interval: Duration) {
            self.kicks.lock().unwrap().push(account.id);
        }

        fn cancel_kick(&self, account_id: AccountId) {
            self.cancelled.lock().unwrap().push(account_id);
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        stopped: AtomicUsize,
    }

    impl ServiceHost for RecordingHost {
        fn start_service(&self) {}

        fn stop_service(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        service: SyncService,
        source: Arc<InMemoryAccountSource>,
        pinger: Arc<BlockingPinger>,
        scheduler: Arc<RecordingScheduler>,
        host: Arc<RecordingHost>,
    }

    fn make_fixture() -> Fixture {
        let source = Arc::new(InMemoryAccountSource::new());
        let pinger = Arc::new(BlockingPinger::default());
        let scheduler = Arc::new(RecordingScheduler::default());
        let host = Arc::new(RecordingHost::default());
        let service = SyncService::new(
            source.clone(),
            pinger.clone(),
            scheduler.clone(),
            host.clone(),
            SyncConfig::default(),
        );
        Fixture {
            service,
            source,
            pinger,
            scheduler,
            host,
        }
    }

    /// An account that passes every push-eligibility check
    fn eligible_account(id: AccountId) -> Account {
        Account::new(id, format!("user{}@example.com", id))
            .with_push()
            .with_sync_key("5:8")
    }

    fn add_pushable_account(fixture: &Fixture, id: AccountId) -> Account {
        let account = eligible_account(id);
        fixture.source.add_account(account.clone());
        fixture
            .source
            .add_folder(Folder::new(id * 100, id, "Inbox", ContentKind::Email).with_push(true));
        account
    }

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("timed out waiting for {}", what);
    }

    #[test]
    fn test_ping_needed_policy() {
        let fixture = make_fixture();
        let account = add_pushable_account(&fixture, 1);
        assert!(fixture.service.ping_needed(&account));

        // Not configured for push.
        assert!(!fixture
            .service
            .ping_needed(&account.clone().with_sync_interval(SyncInterval::Manual)));

        // On security hold.
        assert!(!fixture
            .service
            .ping_needed(&account.clone().with_security_hold(true)));

        // Initial sync not done yet.
        assert!(!fixture
            .service
            .ping_needed(&account.clone().with_sync_key("0")));

        // Push folder exists, but its content class is disabled.
        assert!(!fixture.service.ping_needed(
            &account
                .clone()
                .with_enabled_content(vec![ContentKind::Calendar])
        ));

        // No push-marked folders at all.
        let bare = eligible_account(2);
        fixture.source.add_account(bare.clone());
        assert!(!fixture.service.ping_needed(&bare));
    }

    #[test]
    fn test_push_modify_starts_ping_and_kick() {
        let fixture = make_fixture();
        let account = add_pushable_account(&fixture, 1);

        fixture.service.push_modify(account.id);
        wait_until("ping to start", || {
            fixture.pinger.starts.load(Ordering::SeqCst) == 1
        });
        assert_eq!(fixture.scheduler.kicks.lock().unwrap().as_slice(), &[1]);
    }

    #[test]
    fn test_push_modify_stops_ineligible_account() {
        let fixture = make_fixture();
        let account = add_pushable_account(&fixture, 1);

        fixture.service.push_modify(account.id);
        wait_until("ping to start", || {
            fixture.pinger.starts.load(Ordering::SeqCst) == 1
        });

        // The account goes on hold; the next push modify must stop the
        // ping instead of restarting it.
        fixture
            .source
            .add_account(account.clone().with_security_hold(true));
        fixture.service.push_modify(account.id);

        wait_until("account to go idle", || {
            fixture.service.coordinator().active_accounts() == 0
        });
        assert_eq!(fixture.scheduler.cancelled.lock().unwrap().as_slice(), &[1]);
    }

    #[test]
    fn test_push_modify_unknown_account_is_a_stop() {
        let fixture = make_fixture();
        fixture.service.push_modify(42);
        assert_eq!(fixture.pinger.starts.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.scheduler.cancelled.lock().unwrap().as_slice(), &[42]);
    }

    #[test]
    fn test_run_sync_passes_through_result() {
        let fixture = make_fixture();
        let account = Account::new(1, "user@example.com");

        let value = fixture.service.run_sync(&account, || Ok(17)).unwrap();
        assert_eq!(value, 17);
        assert_eq!(fixture.service.coordinator().active_accounts(), 0);

        let err = fixture
            .service
            .run_sync(&account, || Err::<(), _>(anyhow!("server unreachable")))
            .unwrap_err();
        assert_eq!(err.to_string(), "server unreachable");
        assert_eq!(fixture.service.coordinator().active_accounts(), 0);
    }

    #[test]
    fn test_failed_sync_defers_push_restart() {
        let fixture = make_fixture();
        let account = add_pushable_account(&fixture, 1);

        fixture.service.push_modify(account.id);
        wait_until("ping to start", || {
            fixture.pinger.starts.load(Ordering::SeqCst) == 1
        });

        // The sync preempts the ping and fails; push must come back via
        // the scheduler, not immediately.
        let result = fixture
            .service
            .run_sync(&account, || Err::<(), _>(anyhow!("boom")));
        assert!(result.is_err());

        assert_eq!(fixture.scheduler.delayed.lock().unwrap().as_slice(), &[1]);
        wait_until("account to go idle", || {
            fixture.service.coordinator().active_accounts() == 0
        });
        assert_eq!(fixture.pinger.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_sweeps_eligible_accounts() {
        let fixture = make_fixture();
        add_pushable_account(&fixture, 1);
        add_pushable_account(&fixture, 2);
        // Present but ineligible: never finished initial sync.
        fixture
            .source
            .add_account(eligible_account(3).with_sync_key("0"));

        fixture.service.start();
        wait_until("both pings to start", || {
            fixture.pinger.starts.load(Ordering::SeqCst) == 2
        });
        assert_eq!(fixture.service.coordinator().active_accounts(), 2);
    }

    #[test]
    fn test_start_with_nothing_to_do_releases_service() {
        let fixture = make_fixture();
        fixture.service.start();
        assert_eq!(fixture.pinger.starts.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.host.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_sync_after_stop_fails() {
        let fixture = make_fixture();
        let account = Account::new(1, "user@example.com");

        fixture.service.stop();
        let result = fixture.service.run_sync(&account, || Ok(()));
        assert!(result.is_err());
    }
}
