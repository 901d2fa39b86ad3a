//! Domain models for sync bookkeeping

mod account;
mod folder;

pub use account::{Account, AccountId, ContentKind, SyncInterval, INITIAL_SYNC_KEY};
pub use folder::Folder;
