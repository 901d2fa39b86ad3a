//! Folder model for the server-side folders an account syncs

use serde::{Deserialize, Serialize};

use super::{AccountId, ContentKind};

/// A synced folder (mailbox, calendar, or address book) on the server
///
/// Only the fields that feed the push-eligibility decision are modeled
/// here; message contents and folder hierarchy are out of scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    /// Unique integer identifier
    pub id: i64,
    /// Owning account
    pub account_id: AccountId,
    /// Display name ("Inbox", "Calendar", ...)
    pub name: String,
    /// Which content class lives in this folder
    pub kind: ContentKind,
    /// Whether this folder should be watched by the push connection
    pub push_enabled: bool,
}

impl Folder {
    /// Create a folder that is not watched for push
    pub fn new(
        id: i64,
        account_id: AccountId,
        name: impl Into<String>,
        kind: ContentKind,
    ) -> Self {
        Self {
            id,
            account_id,
            name: name.into(),
            kind,
            push_enabled: false,
        }
    }

    /// Mark the folder for push
    pub fn with_push(mut self, push_enabled: bool) -> Self {
        self.push_enabled = push_enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_new() {
        let folder = Folder::new(10, 1, "Inbox", ContentKind::Email);
        assert_eq!(folder.account_id, 1);
        assert_eq!(folder.kind, ContentKind::Email);
        assert!(!folder.push_enabled);
    }

    #[test]
    fn test_with_push() {
        let folder = Folder::new(10, 1, "Inbox", ContentKind::Email).with_push(true);
        assert!(folder.push_enabled);
    }
}
