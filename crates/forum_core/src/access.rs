//! Authorization preconditions for thread mutations.
//!
//! Any signed-in user may create threads and comment. Locking, editing and choosing the answer
//! of a thread are reserved for its creator and for moderators.

use shared::domain::{Thread, User};

use crate::{error::ForumError, identity::IdentityProvider};

pub fn can_manage_thread(user: &User, thread: &Thread) -> bool {
    user.is_moderator || thread.is_created_by(&user.id)
}

pub fn require_user(identity: &dyn IdentityProvider) -> Result<User, ForumError> {
    identity.current_user().ok_or(ForumError::Unauthenticated)
}

pub fn require_manager(identity: &dyn IdentityProvider, thread: &Thread) -> Result<User, ForumError> {
    let user = require_user(identity)?;
    if !can_manage_thread(&user, thread) {
        return Err(ForumError::Forbidden);
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use shared::domain::{Category, ThreadId, UserId, UserRef};

    use super::*;
    use crate::identity::SessionIdentity;

    fn user(id: &str, is_moderator: bool) -> User {
        User {
            id: UserId::new(id),
            username: id.into(),
            email: format!("{id}@example.com"),
            is_moderator,
        }
    }

    fn thread_by(creator: &str) -> Thread {
        Thread {
            id: ThreadId::new(),
            title: "Access control thread".into(),
            description: "Who may manage this?".into(),
            category: Category::SoftwareDevelopment,
            creator: UserRef {
                id: UserId::new(creator),
                username: creator.into(),
            },
            creation_date: Utc::now(),
            comments: Vec::new(),
            tags: Vec::new(),
            is_qna: false,
            is_answered: false,
            answered_comment_id: None,
            is_locked: false,
            version: 1,
        }
    }

    #[test]
    fn creator_and_moderator_can_manage() {
        let thread = thread_by("alice");
        assert!(can_manage_thread(&user("alice", false), &thread));
        assert!(can_manage_thread(&user("mod", true), &thread));
        assert!(!can_manage_thread(&user("bob", false), &thread));
    }

    #[test]
    fn anonymous_callers_are_unauthenticated() {
        let thread = thread_by("alice");
        let identity = SessionIdentity::anonymous();
        assert!(matches!(
            require_manager(&identity, &thread),
            Err(ForumError::Unauthenticated)
        ));

        identity.sign_in(user("bob", false));
        assert!(matches!(
            require_manager(&identity, &thread),
            Err(ForumError::Forbidden)
        ));
    }
}
