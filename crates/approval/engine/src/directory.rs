//! Directory collaborator: resolves user identities
//!
//! The engine keeps only user identifiers. Existence and enablement
//! are looked up here at creation time and at decision intake.

use approval_types::UserId;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// What the directory knows about a user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl UserRecord {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            display_name: display_name.into(),
            contact: String::new(),
            enabled: true,
        }
    }

    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = contact.into();
        self
    }
}

/// Directory lookup failures
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Directory unreachable: {0}")]
    Unreachable(String),
}

/// Resolves users by identifier
#[async_trait]
pub trait Directory: Send + Sync {
    /// `Ok(None)` means the user does not exist
    async fn resolve_user(&self, id: &UserId) -> Result<Option<UserRecord>, DirectoryError>;
}

/// In-memory directory for development and testing
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = UserRecord>) -> Self {
        let directory = Self::new();
        for user in users {
            directory.upsert(user);
        }
        directory
    }

    pub fn upsert(&self, user: UserRecord) {
        self.users.write().insert(user.id.clone(), user);
    }

    pub fn disable(&self, id: &UserId) -> bool {
        match self.users.write().get_mut(id) {
            Some(user) => {
                user.enabled = false;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn resolve_user(&self, id: &UserId) -> Result<Option<UserRecord>, DirectoryError> {
        Ok(self.users.read().get(id).cloned())
    }
}

/// Directory that treats every identifier as an active user.
///
/// For deployments where identities are verified upstream.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenDirectory;

#[async_trait]
impl Directory for OpenDirectory {
    async fn resolve_user(&self, id: &UserId) -> Result<Option<UserRecord>, DirectoryError> {
        Ok(Some(UserRecord::new(id.as_str(), id.as_str())))
    }
}
