//! Account lookup abstraction
//!
//! Account and folder storage lives outside this crate (a content
//! provider, a database, a test fixture). The sync engine only needs the
//! narrow read surface below to resolve ids and evaluate push policy.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::{Account, AccountId, Folder, SyncInterval};

/// Read access to the accounts and folders the engine coordinates
pub trait AccountSource: Send + Sync {
    /// Look up a single account
    fn account(&self, account_id: AccountId) -> Option<Account>;

    /// All accounts whose sync interval is configured for push
    fn push_accounts(&self) -> Vec<Account>;

    /// Folders of the account that are marked for push notifications
    fn push_folders(&self, account_id: AccountId) -> Vec<Folder>;
}

/// In-memory implementation of AccountSource
///
/// Used for testing and as a stand-in until a real account store is
/// wired up.
pub struct InMemoryAccountSource {
    accounts: RwLock<HashMap<AccountId, Account>>,
    folders: RwLock<Vec<Folder>>,
}

impl InMemoryAccountSource {
    /// Create a new empty source
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            folders: RwLock::new(Vec::new()),
        }
    }

    /// Add or replace an account
    pub fn add_account(&self, account: Account) {
        self.accounts.write().unwrap().insert(account.id, account);
    }

    /// Remove an account and its folders
    pub fn remove_account(&self, account_id: AccountId) {
        self.accounts.write().unwrap().remove(&account_id);
        self.folders
            .write()
            .unwrap()
            .retain(|f| f.account_id != account_id);
    }

    /// Add a folder
    pub fn add_folder(&self, folder: Folder) {
        self.folders.write().unwrap().push(folder);
    }
}

impl Default for InMemoryAccountSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountSource for InMemoryAccountSource {
    fn account(&self, account_id: AccountId) -> Option<Account> {
        self.accounts.read().unwrap().get(&account_id).cloned()
    }

    fn push_accounts(&self) -> Vec<Account> {
        self.accounts
            .read()
            .unwrap()
            .values()
            .filter(|a| a.sync_interval == SyncInterval::Push)
            .cloned()
            .collect()
    }

    fn push_folders(&self, account_id: AccountId) -> Vec<Folder> {
        self.folders
            .read()
            .unwrap()
            .iter()
            .filter(|f| f.account_id == account_id && f.push_enabled)
            .cloned()
            .collect()
    }
}
