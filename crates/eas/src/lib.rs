//! EAS crate - Push/sync coordination for Exchange ActiveSync accounts
//!
//! This crate provides the bookkeeping that arbitrates between push
//! connections and sync operations:
//! - Domain models (Account, Folder)
//! - Per-account sync/push state machine and registry
//! - Ping task lifecycle contract and control handle
//! - Backoff scheduling for failed push connections
//! - Service facade with push-eligibility policy
//!
//! The wire protocol, account storage, and platform service lifecycle
//! all live outside this crate behind narrow traits ([`Pinger`],
//! [`AccountSource`], [`PingScheduler`], [`ServiceHost`]).

pub mod accounts;
pub mod config;
pub mod models;
pub mod service;
pub mod sync;

pub use accounts::{AccountSource, InMemoryAccountSource};
pub use config::SyncConfig;
pub use models::{Account, AccountId, ContentKind, Folder, SyncInterval, INITIAL_SYNC_KEY};
pub use service::SyncService;
pub use sync::{
    PingControl, PingScheduler, PingStatus, Pinger, ServiceHost, SleepScheduler, SyncCoordinator,
    SyncError,
};
