use shared::domain::User;
use tokio::sync::watch;

/// Source of the signed-in user. Authentication itself happens elsewhere.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<User>;
    /// Yields a new value every time the session changes.
    fn subscribe(&self) -> watch::Receiver<Option<User>>;
}

pub struct SessionIdentity {
    current: watch::Sender<Option<User>>,
}

impl SessionIdentity {
    pub fn anonymous() -> Self {
        let (current, _) = watch::channel(None);
        Self { current }
    }

    pub fn signed_in(user: User) -> Self {
        let (current, _) = watch::channel(Some(user));
        Self { current }
    }

    pub fn sign_in(&self, user: User) {
        self.current.send_replace(Some(user));
    }

    pub fn sign_out(&self) {
        self.current.send_replace(None);
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_user(&self) -> Option<User> {
        self.current.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<User>> {
        self.current.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::UserId;

    fn alice() -> User {
        User {
            id: UserId::new("u-alice"),
            username: "alice".into(),
            email: "alice@example.com".into(),
            is_moderator: false,
        }
    }

    #[tokio::test]
    async fn subscribers_observe_sign_in_and_out() {
        let identity = SessionIdentity::anonymous();
        let mut changes = identity.subscribe();
        assert!(identity.current_user().is_none());

        identity.sign_in(alice());
        changes.changed().await.expect("sign in observed");
        assert_eq!(
            changes.borrow_and_update().as_ref().map(|u| u.username.clone()),
            Some("alice".to_string())
        );

        identity.sign_out();
        changes.changed().await.expect("sign out observed");
        assert!(changes.borrow().is_none());
        assert!(identity.current_user().is_none());
    }
}
