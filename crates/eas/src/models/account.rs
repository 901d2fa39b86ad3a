//! Account model for an Exchange ActiveSync account

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique integer identifier for an account (database primary key)
pub type AccountId = i64;

/// The sync key an account carries before its first successful sync
pub const INITIAL_SYNC_KEY: &str = "0";

/// How an account checks for new data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncInterval {
    /// Maintain a hanging request so the server can notify us immediately
    Push,
    /// Only sync when the user asks
    Manual,
    /// Poll on a fixed schedule
    Minutes(u32),
}

/// Content classes an account can sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    Email,
    Calendar,
    Contacts,
}

/// A configured Exchange account
///
/// Storage of accounts lives outside this crate; this model carries just
/// the fields the sync engine needs to decide whether and how to run
/// push and sync for the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique integer identifier
    pub id: AccountId,
    /// Email address (unique)
    pub email: String,
    /// How this account checks for new data
    pub sync_interval: SyncInterval,
    /// Server-issued sync key; stays at [`INITIAL_SYNC_KEY`] until the
    /// initial sync has completed
    pub sync_key: String,
    /// Whether the account is blocked from syncing by a policy hold
    pub security_hold: bool,
    /// Content classes the user has enabled for this account
    pub enabled_content: Vec<ContentKind>,
    /// When the account was added
    pub added_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with manual checking and email sync enabled
    pub fn new(id: AccountId, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            sync_interval: SyncInterval::Manual,
            sync_key: INITIAL_SYNC_KEY.to_string(),
            security_hold: false,
            enabled_content: vec![ContentKind::Email],
            added_at: Utc::now(),
        }
    }

    /// Set the sync interval
    pub fn with_sync_interval(mut self, interval: SyncInterval) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Configure the account for push
    pub fn with_push(self) -> Self {
        self.with_sync_interval(SyncInterval::Push)
    }

    /// Set the server-issued sync key
    pub fn with_sync_key(mut self, sync_key: impl Into<String>) -> Self {
        self.sync_key = sync_key.into();
        self
    }

    /// Put the account on (or take it off) security hold
    pub fn with_security_hold(mut self, hold: bool) -> Self {
        self.security_hold = hold;
        self
    }

    /// Replace the enabled content classes
    pub fn with_enabled_content(mut self, kinds: Vec<ContentKind>) -> Self {
        self.enabled_content = kinds;
        self
    }

    /// Whether the account has completed its initial sync
    ///
    /// Push is pointless before then: the server has no folder state to
    /// notify us about.
    pub fn initial_sync_done(&self) -> bool {
        self.sync_key != INITIAL_SYNC_KEY
    }

    /// Whether the user enabled syncing for the given content class
    pub fn content_enabled(&self, kind: ContentKind) -> bool {
        self.enabled_content.contains(&kind)
    }
}
