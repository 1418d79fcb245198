//! Identity provider seam.
//!
//! Gameplay needs a stable, anonymous user identifier before the first login.
//! Real deployments plug in their authentication backend by implementing
//! [`IdentityProvider`]; [`AnonymousIdentity`] issues a random UUID in-process.

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use crate::error::Result;
use crate::protocol::UserId;

/// Source of the anonymous user identifier.
#[async_trait]
pub trait IdentityProvider: Send {
    /// Sign in anonymously and return the user's identifier.
    ///
    /// Calling this again on a signed-in provider returns the same identifier.
    ///
    /// # Errors
    ///
    /// Returns [`QuickQuestError::Identity`](crate::QuickQuestError::Identity)
    /// if the provider cannot issue an identifier.
    async fn sign_in_anonymously(&mut self) -> Result<UserId>;

    /// Subscribe to sign-in state. `None` means signed out.
    fn on_auth_state_changed(&self) -> watch::Receiver<Option<UserId>>;
}

/// In-process provider issuing one random UUID per instance.
#[derive(Debug)]
pub struct AnonymousIdentity {
    state: watch::Sender<Option<UserId>>,
}

impl AnonymousIdentity {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    /// Forget the current identifier and notify subscribers.
    pub fn sign_out(&self) {
        self.state.send_replace(None);
    }

    pub fn current(&self) -> Option<UserId> {
        self.state.borrow().clone()
    }
}

impl Default for AnonymousIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for AnonymousIdentity {
    async fn sign_in_anonymously(&mut self) -> Result<UserId> {
        if let Some(id) = self.current() {
            return Ok(id);
        }
        let id = UserId::new(uuid::Uuid::new_v4().to_string());
        info!(user_id = %id, "signed in anonymously");
        self.state.send_replace(Some(id.clone()));
        Ok(id)
    }

    fn on_auth_state_changed(&self) -> watch::Receiver<Option<UserId>> {
        self.state.subscribe()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_in_is_stable() {
        let mut identity = AnonymousIdentity::new();
        let first = identity.sign_in_anonymously().await.unwrap();
        let second = identity.sign_in_anonymously().await.unwrap();
        assert_eq!(first, second);
        assert!(uuid::Uuid::parse_str(first.as_str()).is_ok());
    }

    #[tokio::test]
    async fn subscribers_see_sign_in_and_sign_out() {
        let mut identity = AnonymousIdentity::new();
        let mut rx = identity.on_auth_state_changed();
        assert!(rx.borrow().is_none());

        let id = identity.sign_in_anonymously().await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref(), Some(&id));

        identity.sign_out();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }

    #[tokio::test]
    async fn fresh_instances_issue_distinct_ids() {
        let a = AnonymousIdentity::new().sign_in_anonymously().await.unwrap();
        let b = AnonymousIdentity::new().sign_in_anonymously().await.unwrap();
        assert_ne!(a, b);
    }
}
