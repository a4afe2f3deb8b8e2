//! Authenticated-user collaborator.
//!
//! Sign-in and sign-up live outside this crate; all the assistant needs is
//! the id of whoever is signed in right now.

use async_trait::async_trait;

/// Source of the current user's identity.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Id of the signed-in user, or `None` when nobody is signed in.
    async fn current_user(&self) -> Option<String>;
}

/// Fixed identity, e.g. from config or a test.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user_id: Option<String>,
}

impl StaticIdentity {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { user_id: None }
    }
}

#[async_trait]
impl AuthProvider for StaticIdentity {
    async fn current_user(&self) -> Option<String> {
        self.user_id.clone()
    }
}
